use std::sync::Arc;

use aws_sdk_s3::Client as S3Client;
use redis::Client as RedisClient;
use sqlx::PgPool;

use crate::config::Config;
use crate::llm_client::TextCompletionProvider;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    /// Carries batch progress snapshots for the progress endpoint.
    pub redis: RedisClient,
    pub s3: S3Client,
    /// Plain HTTP client for fetching stored files during extraction.
    pub http: reqwest::Client,
    /// Pluggable completion provider. Production: `OpenAiClient`; tests
    /// swap in deterministic stubs.
    pub llm: Arc<dyn TextCompletionProvider>,
    pub config: Config,
}
