use crate::error::{PipelineError, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Which worker role a process should run as. Each role subscribes to
/// exactly one broker queue and never touches the others (SPEC_FULL.md §2
/// "Deployment shape").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerRole {
    Dispatcher,
    ChunkWorker,
    Merger,
    Summarizer,
}

impl FromStr for WorkerRole {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dispatcher" => Ok(WorkerRole::Dispatcher),
            "chunk-worker" | "chunk_worker" => Ok(WorkerRole::ChunkWorker),
            "merger" => Ok(WorkerRole::Merger),
            "summarizer" => Ok(WorkerRole::Summarizer),
            other => Err(format!(
                "unknown worker role '{other}'; expected one of dispatcher, chunk-worker, merger, summarizer"
            )),
        }
    }
}

/// Which transcription backend a chunk worker uses. Collapses the source
/// system's three variants (GPU/MLX/LiteLLM) into two Rust-native ones per
/// SPEC_FULL.md §9: `Local` covers both GPU and Apple-Silicon cases via a
/// compile-time feature flag on the same local-inference backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TranscriptionProvider {
    #[default]
    Local,
    Remote,
}

impl FromStr for TranscriptionProvider {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" | "gpu" | "mlx" => Ok(TranscriptionProvider::Local),
            "remote" | "litellm" => Ok(TranscriptionProvider::Remote),
            other => Err(format!(
                "unknown transcription provider '{other}'; expected 'local' or 'remote'"
            )),
        }
    }
}

/// Full process configuration, loaded once in each worker's `main` and
/// passed explicitly through constructor wiring (SPEC_FULL.md §9, §10.3).
/// No field is read again from the environment after this struct is built.
#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,
    pub broker_url: String,
    pub cache_url: String,

    pub object_store_endpoint: Option<String>,
    pub object_store_access_key: Option<String>,
    pub object_store_secret_key: Option<String>,

    pub upload_root: PathBuf,

    pub chunk_duration_minutes: u32,
    pub summary_chunk_size: usize,

    pub transcription_provider: TranscriptionProvider,
    pub whisper_model_path: Option<PathBuf>,
    pub whisper_language: String,

    pub llm_api_key: Option<String>,
    pub llm_model: String,
    pub llm_api_base: Option<String>,

    pub max_retries: u32,
    pub retry_delay_seconds: f64,

    pub prefetch_multiplier: u32,
    pub max_tasks_per_child: u32,

    pub log_level: String,

    pub max_upload_size_mb: u32,
    pub max_duration_hours: u32,
    pub allowed_extensions: Vec<String>,
}

impl Settings {
    /// Loads configuration from process environment, reading a `.env` file
    /// first if one is present (mirrors the config-file-then-env-override
    /// precedence this codebase already used, substituting `dotenvy` for the
    /// interactive CLI's TOML file since worker processes have no per-user
    /// config directory to read from).
    pub fn load() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let chunk_duration_minutes = env_or("CHUNK_DURATION_MINUTES", "10")
            .parse()
            .map_err(|_| PipelineError::Configuration("CHUNK_DURATION_MINUTES must be an integer".into()))?;
        let max_retries = env_or("MAX_RETRIES", "3")
            .parse()
            .map_err(|_| PipelineError::Configuration("MAX_RETRIES must be an integer".into()))?;
        let retry_delay_seconds = env_or("RETRY_DELAY_SECONDS", "1.0")
            .parse()
            .map_err(|_| PipelineError::Configuration("RETRY_DELAY_SECONDS must be a number".into()))?;
        let prefetch_multiplier = env_or("PREFETCH_MULTIPLIER", "1")
            .parse()
            .map_err(|_| PipelineError::Configuration("PREFETCH_MULTIPLIER must be an integer".into()))?;
        let max_tasks_per_child = env_or("MAX_TASKS_PER_CHILD", "100")
            .parse()
            .map_err(|_| PipelineError::Configuration("MAX_TASKS_PER_CHILD must be an integer".into()))?;
        let max_upload_size_mb = env_or("MAX_UPLOAD_SIZE_MB", "500")
            .parse()
            .map_err(|_| PipelineError::Configuration("MAX_UPLOAD_SIZE_MB must be an integer".into()))?;
        let max_duration_hours = env_or("MAX_DURATION_HOURS", "10")
            .parse()
            .map_err(|_| PipelineError::Configuration("MAX_DURATION_HOURS must be an integer".into()))?;
        let summary_chunk_size = env_or("SUMMARY_CHUNK_SIZE", "20000")
            .parse()
            .map_err(|_| PipelineError::Configuration("SUMMARY_CHUNK_SIZE must be an integer".into()))?;

        let transcription_provider = env_or("TRANSCRIPTION_PROVIDER", "local")
            .parse::<TranscriptionProvider>()
            .map_err(PipelineError::Configuration)?;

        let settings = Settings {
            database_url: require_env("DATABASE_URL")?,
            broker_url: require_env("BROKER_URL")?,
            cache_url: require_env("CACHE_URL")?,

            object_store_endpoint: std::env::var("OBJECT_STORE_ENDPOINT").ok(),
            object_store_access_key: std::env::var("OBJECT_STORE_ACCESS_KEY").ok(),
            object_store_secret_key: std::env::var("OBJECT_STORE_SECRET_KEY").ok(),

            upload_root: PathBuf::from(env_or("UPLOAD_ROOT", "/tmp/scribeline-uploads")),

            chunk_duration_minutes,
            summary_chunk_size,

            transcription_provider,
            whisper_model_path: std::env::var("WHISPER_MODEL_PATH").ok().map(PathBuf::from),
            whisper_language: env_or("WHISPER_LANGUAGE", "auto"),

            llm_api_key: std::env::var("LLM_API_KEY").ok(),
            llm_model: env_or("LLM_MODEL", "gpt-4o-mini"),
            llm_api_base: std::env::var("LLM_API_BASE").ok(),

            max_retries,
            retry_delay_seconds,

            prefetch_multiplier,
            max_tasks_per_child,

            log_level: env_or("LOG_LEVEL", "info"),

            max_upload_size_mb,
            max_duration_hours,
            allowed_extensions: vec![
                "mp3", "wav", "m4a", "flac", "ogg", "opus", "aac", "wma", "aiff",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        };

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=60).contains(&self.chunk_duration_minutes) {
            return Err(PipelineError::Configuration(
                "CHUNK_DURATION_MINUTES must be between 1 and 60".into(),
            ));
        }
        if !(1..=10).contains(&self.max_retries) {
            return Err(PipelineError::Configuration(
                "MAX_RETRIES must be between 1 and 10".into(),
            ));
        }
        if self.prefetch_multiplier < 1 {
            return Err(PipelineError::Configuration(
                "PREFETCH_MULTIPLIER must be >= 1".into(),
            ));
        }
        if self.max_tasks_per_child < 1 {
            return Err(PipelineError::Configuration(
                "MAX_TASKS_PER_CHILD must be >= 1".into(),
            ));
        }
        if !(1..=5000).contains(&self.max_upload_size_mb) {
            return Err(PipelineError::Configuration(
                "MAX_UPLOAD_SIZE_MB must be between 1 and 5000".into(),
            ));
        }
        if !(1..=24).contains(&self.max_duration_hours) {
            return Err(PipelineError::Configuration(
                "MAX_DURATION_HOURS must be between 1 and 24".into(),
            ));
        }
        if self.transcription_provider == TranscriptionProvider::Local
            && self.whisper_model_path.is_none()
        {
            return Err(PipelineError::Configuration(
                "WHISPER_MODEL_PATH is required when TRANSCRIPTION_PROVIDER=local".into(),
            ));
        }
        if self.transcription_provider == TranscriptionProvider::Remote
            && self.llm_api_key.is_none()
        {
            return Err(PipelineError::Configuration(
                "LLM_API_KEY is required when TRANSCRIPTION_PROVIDER=remote".into(),
            ));
        }
        Ok(())
    }

    pub fn chunk_duration_ms(&self) -> i64 {
        self.chunk_duration_minutes as i64 * 60 * 1000
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs_f64(self.retry_delay_seconds)
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key)
        .map_err(|_| PipelineError::Configuration(format!("{key} is required but not set")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_worker_role() {
        assert_eq!(
            "chunk-worker".parse::<WorkerRole>().unwrap(),
            WorkerRole::ChunkWorker
        );
        assert!("nonsense".parse::<WorkerRole>().is_err());
    }

    #[test]
    fn parses_transcription_provider_aliases() {
        assert_eq!(
            "gpu".parse::<TranscriptionProvider>().unwrap(),
            TranscriptionProvider::Local
        );
        assert_eq!(
            "mlx".parse::<TranscriptionProvider>().unwrap(),
            TranscriptionProvider::Local
        );
        assert_eq!(
            "litellm".parse::<TranscriptionProvider>().unwrap(),
            TranscriptionProvider::Remote
        );
    }

    #[test]
    fn chunk_duration_ms_conversion() {
        let mut s = sample_settings();
        s.chunk_duration_minutes = 10;
        assert_eq!(s.chunk_duration_ms(), 600_000);
    }

    #[test]
    fn validate_rejects_out_of_range_chunk_duration() {
        let mut s = sample_settings();
        s.chunk_duration_minutes = 0;
        assert!(s.validate().is_err());
        s.chunk_duration_minutes = 61;
        assert!(s.validate().is_err());
    }

    #[test]
    fn validate_requires_model_path_for_local_provider() {
        let mut s = sample_settings();
        s.transcription_provider = TranscriptionProvider::Local;
        s.whisper_model_path = None;
        assert!(s.validate().is_err());
    }

    fn sample_settings() -> Settings {
        Settings {
            database_url: "postgres://localhost/scribeline".into(),
            broker_url: "amqp://localhost".into(),
            cache_url: "redis://localhost".into(),
            object_store_endpoint: None,
            object_store_access_key: None,
            object_store_secret_key: None,
            upload_root: PathBuf::from("/tmp/scribeline-uploads"),
            chunk_duration_minutes: 10,
            summary_chunk_size: 20000,
            transcription_provider: TranscriptionProvider::Local,
            whisper_model_path: Some(PathBuf::from("/models/ggml-base.bin")),
            whisper_language: "auto".into(),
            llm_api_key: Some("key".into()),
            llm_model: "gpt-4o-mini".into(),
            llm_api_base: None,
            max_retries: 3,
            retry_delay_seconds: 1.0,
            prefetch_multiplier: 1,
            max_tasks_per_child: 100,
            log_level: "info".into(),
            max_upload_size_mb: 500,
            max_duration_hours: 10,
            allowed_extensions: vec!["mp3".into()],
        }
    }
}
