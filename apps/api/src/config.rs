use anyhow::{Context, Result};

/// Application configuration loaded from environment variables.
/// Resolved once at startup and passed explicitly via `AppState`.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub s3_bucket: String,
    pub s3_endpoint: String,
    pub aws_access_key_id: String,
    pub aws_secret_access_key: String,
    pub openai_api_key: String,
    pub port: u16,
    pub rust_log: String,
    /// Upload size cap in megabytes. Enforced server-side, not just in the UI.
    pub max_upload_mb: u64,
    /// Maximum resumes scored in parallel within one batch run.
    pub batch_concurrency: usize,
    /// When true a pipeline stage error terminates the batch run.
    /// When false the run continues best-effort, matching the legacy behavior.
    pub halt_on_stage_error: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            redis_url: require_env("REDIS_URL")?,
            s3_bucket: require_env("S3_BUCKET")?,
            s3_endpoint: require_env("S3_ENDPOINT")?,
            aws_access_key_id: require_env("AWS_ACCESS_KEY_ID")?,
            aws_secret_access_key: require_env("AWS_SECRET_ACCESS_KEY")?,
            openai_api_key: require_env("OPENAI_API_KEY")?,
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse::<u16>()
                .context("PORT must be a valid port number")?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            max_upload_mb: std::env::var("MAX_UPLOAD_MB")
                .unwrap_or_else(|_| "10".to_string())
                .parse::<u64>()
                .context("MAX_UPLOAD_MB must be a number of megabytes")?,
            batch_concurrency: std::env::var("BATCH_CONCURRENCY")
                .unwrap_or_else(|_| "4".to_string())
                .parse::<usize>()
                .context("BATCH_CONCURRENCY must be a positive integer")?,
            halt_on_stage_error: std::env::var("HALT_ON_STAGE_ERROR")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(true),
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}
