use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use thiserror::Error;

use crate::core::config::Settings;
use crate::grading::GradingVerdict;

const GRADING_SYSTEM_PROMPT: &str = r#"You are an experienced mathematics teacher checking a student's handwritten answer.
The first images show the question, the remaining images show the student's answer.
Judge whether the final answer and the reasoning are correct.

Respond with strict JSON:
{
  "is_correct": <bool>,
  "critical_errors": [{"description": "...", "phrases": ["exact phrase from the answer"]}],
  "part_errors": [{"description": "...", "phrases": ["..."]}],
  "partial_credit": <bool>
}
Critical errors make the answer wrong. Part errors are minor slips that still allow partial credit.
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExecutorErrorKind {
    Auth,
    RateLimit,
    MalformedResponse,
    Timeout,
    Transport,
    InvalidInput,
}

impl fmt::Display for ExecutorErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Auth => "auth",
            Self::RateLimit => "rate limit",
            Self::MalformedResponse => "malformed response",
            Self::Timeout => "timeout",
            Self::Transport => "transport",
            Self::InvalidInput => "invalid input",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Error)]
#[error("grading executor {kind} error: {message}")]
pub(crate) struct ExecutorError {
    pub(crate) kind: ExecutorErrorKind,
    pub(crate) message: String,
}

impl ExecutorError {
    pub(crate) fn new(kind: ExecutorErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct GradeRequest {
    pub(crate) submission_item_id: i64,
    pub(crate) question_image_paths: Vec<String>,
    pub(crate) answer_image_paths: Vec<String>,
    pub(crate) clarification: Option<String>,
    pub(crate) previous: Option<GradingVerdict>,
    pub(crate) solution_steps: Option<Value>,
}

/// Judges one answer. Safe to call repeatedly for the same input; results
/// are made idempotent by the grading upsert, not by the executor.
#[async_trait]
pub(crate) trait GradingExecutor: Send + Sync {
    async fn grade(&self, request: &GradeRequest) -> Result<GradingVerdict, ExecutorError>;
}

/// Executor backed by an OpenAI-compatible chat completions endpoint.
/// Makes exactly one HTTP attempt per call.
#[derive(Debug, Clone)]
pub(crate) struct OpenAiGradingService {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
    temperature: f64,
    media_root: PathBuf,
}

impl OpenAiGradingService {
    pub(crate) fn from_settings(settings: &Settings) -> Result<Self> {
        let timeout = Duration::from_secs(settings.ai().ai_request_timeout);
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            api_key: settings.ai().openai_api_key.clone(),
            base_url: settings.ai().openai_base_url.trim_end_matches('/').to_string(),
            model: settings.ai().ai_model.clone(),
            max_tokens: settings.ai().ai_max_tokens,
            temperature: settings.ai().ai_temperature,
            media_root: PathBuf::from(&settings.upscale().media_root),
        })
    }

    fn user_prompt(request: &GradeRequest) -> String {
        let mut prompt = String::from("Grade the student's answer shown in the images.");

        if let Some(steps) = &request.solution_steps {
            prompt.push_str("\n\nReference solution steps:\n");
            prompt.push_str(&serde_json::to_string_pretty(steps).unwrap_or_default());
        }
        if let Some(previous) = &request.previous {
            prompt.push_str("\n\nPrevious grading of this answer:\n");
            prompt.push_str(&serde_json::to_string_pretty(previous).unwrap_or_default());
        }
        if let Some(clarification) = &request.clarification {
            prompt.push_str("\n\nTeacher clarification, take it into account:\n");
            prompt.push_str(clarification);
        }

        prompt
    }
}

#[async_trait]
impl GradingExecutor for OpenAiGradingService {
    async fn grade(&self, request: &GradeRequest) -> Result<GradingVerdict, ExecutorError> {
        if request.question_image_paths.is_empty() {
            return Err(ExecutorError::new(ExecutorErrorKind::InvalidInput, "no question images"));
        }
        if request.answer_image_paths.is_empty() {
            return Err(ExecutorError::new(ExecutorErrorKind::InvalidInput, "no answer images"));
        }

        let mut content = vec![json!({"type": "text", "text": Self::user_prompt(request)})];
        for path in request.question_image_paths.iter().chain(&request.answer_image_paths) {
            let url = image_data_url(&self.media_root, path).await?;
            content.push(json!({"type": "image_url", "image_url": {"url": url}}));
        }

        let payload = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": GRADING_SYSTEM_PROMPT},
                {"role": "user", "content": content}
            ],
            "max_completion_tokens": self.max_tokens,
            "temperature": self.temperature,
            "response_format": {"type": "json_object"}
        });

        tracing::info!(
            submission_item_id = request.submission_item_id,
            model = %self.model,
            regrade = request.clarification.is_some(),
            "Sending grading request"
        );
        let timer = Instant::now();

        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExecutorError::new(
                classify_status(status),
                format!("upstream returned {status}: {}", truncate(&body, 300)),
            ));
        }

        let body: Value = response.json().await.map_err(|err| {
            if err.is_timeout() {
                ExecutorError::new(ExecutorErrorKind::Timeout, err.to_string())
            } else {
                ExecutorError::new(ExecutorErrorKind::MalformedResponse, err.to_string())
            }
        })?;

        let verdict = parse_verdict(&body)?;
        tracing::info!(
            submission_item_id = request.submission_item_id,
            is_correct = verdict.is_correct,
            elapsed_seconds = timer.elapsed().as_secs_f64(),
            "Grading response received"
        );
        Ok(verdict)
    }
}

pub(crate) fn classify_status(status: StatusCode) -> ExecutorErrorKind {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ExecutorErrorKind::Auth,
        StatusCode::TOO_MANY_REQUESTS => ExecutorErrorKind::RateLimit,
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => ExecutorErrorKind::Timeout,
        StatusCode::BAD_REQUEST | StatusCode::PAYLOAD_TOO_LARGE | StatusCode::UNPROCESSABLE_ENTITY => {
            ExecutorErrorKind::InvalidInput
        }
        _ => ExecutorErrorKind::Transport,
    }
}

fn classify_transport(err: reqwest::Error) -> ExecutorError {
    let kind =
        if err.is_timeout() { ExecutorErrorKind::Timeout } else { ExecutorErrorKind::Transport };
    ExecutorError::new(kind, err.to_string())
}

/// Extract the verdict from a chat completions response body.
pub(crate) fn parse_verdict(body: &Value) -> Result<GradingVerdict, ExecutorError> {
    let content = body
        .get("choices")
        .and_then(|choices| choices.get(0))
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("content"))
        .and_then(Value::as_str)
        .ok_or_else(|| {
            ExecutorError::new(ExecutorErrorKind::MalformedResponse, "missing response content")
        })?;

    let trimmed = strip_code_fence(content);
    serde_json::from_str::<GradingVerdict>(trimmed).map_err(|err| {
        ExecutorError::new(
            ExecutorErrorKind::MalformedResponse,
            format!("verdict is not valid JSON: {err}"),
        )
    })
}

fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

async fn image_data_url(media_root: &Path, path: &str) -> Result<String, ExecutorError> {
    let resolved = resolve_media_path(media_root, path);
    let bytes = tokio::fs::read(&resolved).await.map_err(|err| {
        ExecutorError::new(
            ExecutorErrorKind::InvalidInput,
            format!("image {} is unreadable: {err}", resolved.display()),
        )
    })?;

    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    Ok(format!("data:{};base64,{encoded}", mime_for(&resolved)))
}

pub(crate) fn resolve_media_path(media_root: &Path, path: &str) -> PathBuf {
    let candidate = Path::new(path);
    if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        media_root.join(candidate)
    }
}

fn mime_for(path: &Path) -> &'static str {
    match path.extension().and_then(|ext| ext.to_str()).map(str::to_ascii_lowercase).as_deref() {
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        _ => "image/jpeg",
    }
}

fn truncate(value: &str, limit: usize) -> &str {
    match value.char_indices().nth(limit) {
        Some((index, _)) => &value[..index],
        None => value,
    }
}
