pub mod health;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};

use crate::pipeline::handlers;
use crate::state::AppState;
use crate::upload;

pub fn build_router(state: AppState) -> Router {
    // Leave headroom above the per-file cap for multipart framing.
    let body_limit =
        DefaultBodyLimit::max(((state.config.max_upload_mb as usize) + 2) * 1024 * 1024);

    Router::new()
        .route("/health", get(health::health_handler))
        // Job descriptions
        .route(
            "/api/v1/job-descriptions",
            post(handlers::handle_create_job_description),
        )
        .route(
            "/api/v1/job-descriptions/:id",
            get(handlers::handle_get_job_description),
        )
        // Resumes
        .route("/api/v1/resumes/upload", post(upload::handle_upload_resumes))
        .route("/api/v1/resumes/:id", get(handlers::handle_get_resume))
        // Pipeline
        .route("/api/v1/extract-text", post(handlers::handle_extract_text))
        .route(
            "/api/v1/analyze-resume",
            post(handlers::handle_analyze_resume),
        )
        // Batch runs
        .route("/api/v1/batches", post(handlers::handle_create_batch))
        .route(
            "/api/v1/batches/:id/progress",
            get(handlers::handle_batch_progress),
        )
        .route(
            "/api/v1/batches/:id/results",
            get(handlers::handle_batch_results),
        )
        // Profiles
        .route("/api/v1/profiles/:id", get(handlers::handle_get_profile))
        .layer(body_limit)
        .with_state(state)
}
