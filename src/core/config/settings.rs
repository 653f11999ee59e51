use super::parsing::{
    env_optional, env_or_default, parse_bool, parse_cors_origins, parse_environment,
    parse_event_backend, parse_f64, parse_u16, parse_u32, parse_u64, parse_usize,
};
use super::types::{
    AiSettings, ApiSettings, ConfigError, CorsSettings, DatabaseSettings, EventSettings,
    LiveSettings, RedisSettings, RuntimeSettings, ServerHost, ServerPort, ServerSettings,
    Settings, TelemetrySettings, UpscaleSettings, WorkerSettings,
};

impl Settings {
    pub(crate) fn load() -> Result<Self, ConfigError> {
        let host = env_or_default("GRADEFLOW_HOST", "0.0.0.0");
        let port = env_or_default("GRADEFLOW_PORT", "8000");

        let environment = parse_environment(
            env_optional("GRADEFLOW_ENV").or_else(|| env_optional("ENVIRONMENT")),
        );
        let strict_config = env_optional("GRADEFLOW_STRICT_CONFIG")
            .map(|value| parse_bool(&value))
            .unwrap_or(false)
            || environment.is_production();

        let project_name = env_or_default("PROJECT_NAME", "Gradeflow");
        let version = env_or_default("VERSION", env!("CARGO_PKG_VERSION"));
        let api_v1_str = env_or_default("API_V1_STR", "/api/v1");

        let cors_origins = parse_cors_origins(env_optional("BACKEND_CORS_ORIGINS"))?;

        let postgres_server = env_or_default("POSTGRES_SERVER", "localhost");
        let postgres_port = parse_u16("POSTGRES_PORT", env_or_default("POSTGRES_PORT", "5432"))?;
        let postgres_user = env_or_default("POSTGRES_USER", "gradeflow");
        let postgres_password = env_or_default("POSTGRES_PASSWORD", "");
        let postgres_db = env_or_default("POSTGRES_DB", "gradeflow");
        let database_url = env_optional("DATABASE_URL");
        let db_max_connections = parse_u32(
            "DATABASE_MAX_CONNECTIONS",
            env_or_default("DATABASE_MAX_CONNECTIONS", "10"),
        )?;

        let redis_host = env_or_default("REDIS_HOST", "localhost");
        let redis_port = parse_u16("REDIS_PORT", env_or_default("REDIS_PORT", "6379"))?;
        let redis_db = parse_u16("REDIS_DB", env_or_default("REDIS_DB", "0"))?;
        let redis_password = env_or_default("REDIS_PASSWORD", "");

        let event_backend = parse_event_backend(env_optional("EVENT_BUS"))?;

        let openai_api_key = env_or_default("OPENAI_API_KEY", "");
        let openai_base_url = env_or_default("OPENAI_BASE_URL", "https://api.openai.com/v1");
        let ai_model = env_or_default("AI_MODEL", "gpt-4o");
        let ai_max_tokens = parse_u32("AI_MAX_TOKENS", env_or_default("AI_MAX_TOKENS", "4000"))?;
        let ai_request_timeout =
            parse_u64("AI_REQUEST_TIMEOUT", env_or_default("AI_REQUEST_TIMEOUT", "120"))?;
        let ai_temperature =
            parse_f64("AI_TEMPERATURE", env_or_default("AI_TEMPERATURE", "0"))?;

        let worker_concurrency =
            parse_usize("WORKER_CONCURRENCY", env_or_default("WORKER_CONCURRENCY", "1"))?;
        let embedded_workers =
            parse_usize("EMBEDDED_WORKERS", env_or_default("EMBEDDED_WORKERS", "0"))?;
        let worker_poll_interval_ms = parse_u64(
            "WORKER_POLL_INTERVAL_MS",
            env_or_default("WORKER_POLL_INTERVAL_MS", "1000"),
        )?;
        let stale_timeout_seconds = parse_u64(
            "JOB_STALE_TIMEOUT_SECONDS",
            env_or_default("JOB_STALE_TIMEOUT_SECONDS", "0"),
        )?;
        let stale_sweep_interval_seconds = parse_u64(
            "JOB_STALE_SWEEP_INTERVAL_SECONDS",
            env_or_default("JOB_STALE_SWEEP_INTERVAL_SECONDS", "60"),
        )?;

        let upscale_binary = env_optional("REAL_ESRGAN_BIN");
        let upscale_model = env_or_default("REAL_ESRGAN_MODEL", "realesrgan-x4plus");
        let upscale_scale =
            parse_u32("REAL_ESRGAN_SCALE", env_or_default("REAL_ESRGAN_SCALE", "2"))?;
        let gpu_index = parse_u32("GPU_INDEX", env_or_default("GPU_INDEX", "0"))?;
        let media_root = env_or_default("MEDIA_ROOT", "media");
        let upscale_timeout_seconds = parse_u64(
            "REAL_ESRGAN_TIMEOUT_SECONDS",
            env_or_default("REAL_ESRGAN_TIMEOUT_SECONDS", "300"),
        )?;

        let live_url = env_or_default("LIVE_CHANNEL_URL", "ws://localhost:8000/api/v1/ws");
        let server_url = env_or_default("GRADEFLOW_SERVER_URL", "http://localhost:8000");
        let heartbeat_seconds =
            parse_u64("LIVE_HEARTBEAT_SECONDS", env_or_default("LIVE_HEARTBEAT_SECONDS", "25"))?;
        let backoff_floor_ms =
            parse_u64("LIVE_BACKOFF_FLOOR_MS", env_or_default("LIVE_BACKOFF_FLOOR_MS", "1000"))?;
        let backoff_cap_ms =
            parse_u64("LIVE_BACKOFF_CAP_MS", env_or_default("LIVE_BACKOFF_CAP_MS", "30000"))?;
        let backoff_jitter_ms =
            parse_u64("LIVE_BACKOFF_JITTER_MS", env_or_default("LIVE_BACKOFF_JITTER_MS", "500"))?;
        let poll_interval_seconds =
            parse_u64("POLL_INTERVAL_SECONDS", env_or_default("POLL_INTERVAL_SECONDS", "5"))?;

        let log_level = env_or_default("GRADEFLOW_LOG_LEVEL", "info");
        let json = env_optional("GRADEFLOW_LOG_JSON").map(|value| parse_bool(&value)).unwrap_or(false);
        let prometheus_enabled =
            env_optional("PROMETHEUS_ENABLED").map(|value| parse_bool(&value)).unwrap_or(false);

        let settings = Self {
            server: ServerSettings {
                host: ServerHost::parse(host)?,
                port: ServerPort::parse(port)?,
            },
            runtime: RuntimeSettings { environment, strict_config },
            api: ApiSettings { project_name, version, api_v1_str },
            cors: CorsSettings { origins: cors_origins },
            database: DatabaseSettings {
                postgres_server,
                postgres_port,
                postgres_user,
                postgres_password,
                postgres_db,
                database_url,
                max_connections: db_max_connections,
            },
            redis: RedisSettings {
                host: redis_host,
                port: redis_port,
                db: redis_db,
                password: redis_password,
            },
            events: EventSettings { backend: event_backend },
            ai: AiSettings {
                openai_api_key,
                openai_base_url,
                ai_model,
                ai_max_tokens,
                ai_request_timeout,
                ai_temperature,
            },
            worker: WorkerSettings {
                concurrency: worker_concurrency,
                embedded: embedded_workers,
                poll_interval_ms: worker_poll_interval_ms,
                stale_timeout_seconds,
                stale_sweep_interval_seconds,
            },
            upscale: UpscaleSettings {
                binary: upscale_binary,
                model: upscale_model,
                scale: upscale_scale,
                gpu_index,
                media_root,
                timeout_seconds: upscale_timeout_seconds,
            },
            live: LiveSettings {
                url: live_url,
                server_url,
                heartbeat_seconds,
                backoff_floor_ms,
                backoff_cap_ms,
                backoff_jitter_ms,
                poll_interval_seconds,
            },
            telemetry: TelemetrySettings { log_level, json, prometheus_enabled },
        };

        settings.validate()?;
        Ok(settings)
    }

    pub(crate) fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host.0, self.server.port.0)
    }

    pub(crate) fn server_host(&self) -> &str {
        &self.server.host.0
    }

    pub(crate) fn server_port(&self) -> u16 {
        self.server.port.0
    }

    pub(crate) fn api(&self) -> &ApiSettings {
        &self.api
    }

    pub(crate) fn cors(&self) -> &CorsSettings {
        &self.cors
    }

    pub(crate) fn database(&self) -> &DatabaseSettings {
        &self.database
    }

    pub(crate) fn redis(&self) -> &RedisSettings {
        &self.redis
    }

    pub(crate) fn events(&self) -> &EventSettings {
        &self.events
    }

    pub(crate) fn ai(&self) -> &AiSettings {
        &self.ai
    }

    pub(crate) fn worker(&self) -> &WorkerSettings {
        &self.worker
    }

    pub(crate) fn upscale(&self) -> &UpscaleSettings {
        &self.upscale
    }

    pub(crate) fn live(&self) -> &LiveSettings {
        &self.live
    }

    pub(crate) fn telemetry(&self) -> &TelemetrySettings {
        &self.telemetry
    }

    pub(crate) fn runtime(&self) -> &RuntimeSettings {
        &self.runtime
    }

    /// Worker processes cannot run without executor credentials, whatever
    /// the strictness of the environment.
    pub(crate) fn require_executor_credentials(&self) -> Result<(), ConfigError> {
        if self.ai.openai_api_key.is_empty() {
            return Err(ConfigError::MissingSecret("OPENAI_API_KEY"));
        }
        if self.ai.openai_base_url.is_empty() {
            return Err(ConfigError::MissingSecret("OPENAI_BASE_URL"));
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.worker.concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                field: "WORKER_CONCURRENCY",
                value: "0".to_string(),
            });
        }

        if self.worker.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "WORKER_POLL_INTERVAL_MS",
                value: "0".to_string(),
            });
        }

        if self.worker.stale_timeout_seconds > 0 && self.worker.stale_sweep_interval_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "JOB_STALE_SWEEP_INTERVAL_SECONDS",
                value: "0".to_string(),
            });
        }

        if self.upscale.scale == 0 {
            return Err(ConfigError::InvalidValue {
                field: "REAL_ESRGAN_SCALE",
                value: "0".to_string(),
            });
        }

        if self.upscale.timeout_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "REAL_ESRGAN_TIMEOUT_SECONDS",
                value: "0".to_string(),
            });
        }

        if self.live.heartbeat_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "LIVE_HEARTBEAT_SECONDS",
                value: "0".to_string(),
            });
        }

        if self.live.poll_interval_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "POLL_INTERVAL_SECONDS",
                value: "0".to_string(),
            });
        }

        if self.live.backoff_floor_ms == 0 || self.live.backoff_floor_ms > self.live.backoff_cap_ms
        {
            return Err(ConfigError::InvalidValue {
                field: "LIVE_BACKOFF_FLOOR_MS",
                value: self.live.backoff_floor_ms.to_string(),
            });
        }

        if !(self.runtime.strict_config || self.runtime.environment.is_production()) {
            return Ok(());
        }

        if self.database.database_url.is_none() && self.database.postgres_password.is_empty() {
            return Err(ConfigError::MissingSecret("POSTGRES_PASSWORD"));
        }

        Ok(())
    }
}
