use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;

use crate::core::config::Settings;
use crate::services::ai_grading::resolve_media_path;

#[derive(Debug, Error)]
pub(crate) enum UpscaleError {
    #[error("no Real-ESRGAN binary is configured")]
    NotConfigured,
    #[error("input image {0} does not exist")]
    MissingInput(String),
    #[error("failed to prepare output directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("upscaler exited with {status} for {input}: {stderr}")]
    Failed { input: String, status: String, stderr: String },
    #[error("upscaler gave no result for {input} within {seconds}s")]
    TimedOut { input: String, seconds: u64 },
}

#[async_trait]
pub(crate) trait Upscaler: Send + Sync {
    /// Upscale every image of a submission; returns the output paths in
    /// input order.
    async fn upscale(
        &self,
        submission_id: i64,
        image_paths: &[String],
    ) -> Result<Vec<String>, UpscaleError>;
}

/// Runs the `realesrgan-ncnn-vulkan` style CLI once per image.
#[derive(Debug, Clone)]
pub(crate) struct RealEsrganUpscaler {
    binary: Option<PathBuf>,
    model: String,
    scale: u32,
    gpu_index: u32,
    media_root: PathBuf,
    timeout: Duration,
}

impl RealEsrganUpscaler {
    pub(crate) fn from_settings(settings: &Settings) -> Self {
        let upscale = settings.upscale();
        Self {
            binary: upscale.binary.as_ref().map(PathBuf::from),
            model: upscale.model.clone(),
            scale: upscale.scale,
            gpu_index: upscale.gpu_index,
            media_root: PathBuf::from(&upscale.media_root),
            timeout: Duration::from_secs(upscale.timeout_seconds),
        }
    }

    async fn upscale_one(&self, binary: &Path, input: &Path, output_dir: &Path) -> Result<PathBuf, UpscaleError> {
        let output = output_path(output_dir, input, self.scale);

        let run = Command::new(binary)
            .arg("-i")
            .arg(input)
            .arg("-o")
            .arg(&output)
            .arg("-n")
            .arg(&self.model)
            .arg("-s")
            .arg(self.scale.to_string())
            .arg("-g")
            .arg(self.gpu_index.to_string())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        // Dropping the timed-out future kills the child.
        let result = tokio::time::timeout(self.timeout, run).await.map_err(|_| {
            UpscaleError::TimedOut { input: input.display().to_string(), seconds: self.timeout.as_secs() }
        })??;

        if !result.status.success() {
            return Err(UpscaleError::Failed {
                input: input.display().to_string(),
                status: result.status.to_string(),
                stderr: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            });
        }

        Ok(output)
    }
}

#[async_trait]
impl Upscaler for RealEsrganUpscaler {
    async fn upscale(
        &self,
        submission_id: i64,
        image_paths: &[String],
    ) -> Result<Vec<String>, UpscaleError> {
        let binary = self.binary.as_deref().ok_or(UpscaleError::NotConfigured)?;
        let output_dir = self.media_root.join(format!("submission_{submission_id}")).join("upscaled");
        tokio::fs::create_dir_all(&output_dir).await?;

        let mut outputs = Vec::with_capacity(image_paths.len());
        for path in image_paths {
            let input = resolve_media_path(&self.media_root, path);
            if !tokio::fs::try_exists(&input).await.unwrap_or(false) {
                return Err(UpscaleError::MissingInput(path.clone()));
            }

            let output = self.upscale_one(binary, &input, &output_dir).await?;
            tracing::info!(submission_id, input = %input.display(), output = %output.display(), "Image upscaled");
            outputs.push(output.display().to_string());
        }

        Ok(outputs)
    }
}

/// `{stem}_x{scale}{.ext}` inside `output_dir`.
pub(crate) fn output_path(output_dir: &Path, input: &Path, scale: u32) -> PathBuf {
    let stem = input.file_stem().and_then(|stem| stem.to_str()).unwrap_or("image");
    let name = match input.extension().and_then(|ext| ext.to_str()) {
        Some(ext) => format!("{stem}_x{scale}.{ext}"),
        None => format!("{stem}_x{scale}"),
    };
    output_dir.join(name)
}
