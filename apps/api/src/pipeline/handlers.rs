use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::job::JobDescriptionRow;
use crate::models::resume::ResumeRow;
use crate::pipeline::extract::{extract_text, store_extraction};
use crate::pipeline::orchestrator::{BatchOutcome, BatchRunner};
use crate::pipeline::parse::parse_structured;
use crate::pipeline::progress::{load_progress, ProcessingStep};
use crate::pipeline::score::{score_resume, store_analysis};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ExtractTextRequest {
    pub file_url: String,
    pub file_name: String,
    pub resume_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct ExtractTextResponse {
    pub success: bool,
    pub extracted_text: String,
    pub parsed_data: Value,
}

/// POST /api/v1/extract-text
pub async fn handle_extract_text(
    State(state): State<AppState>,
    Json(req): Json<ExtractTextRequest>,
) -> Result<Json<ExtractTextResponse>, AppError> {
    let extracted_text =
        extract_text(&state.http, state.llm.as_ref(), &req.file_url, &req.file_name).await?;
    let parsed_data = parse_structured(state.llm.as_ref(), &extracted_text).await;
    store_extraction(&state.db, req.resume_id, &extracted_text, &parsed_data).await?;

    Ok(Json(ExtractTextResponse {
        success: true,
        extracted_text,
        parsed_data,
    }))
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeResumeRequest {
    pub resume_id: Uuid,
    pub job_description_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct AnalyzeResumeResponse {
    pub success: bool,
    pub analysis: crate::models::resume::AnalysisResultRow,
}

/// POST /api/v1/analyze-resume
pub async fn handle_analyze_resume(
    State(state): State<AppState>,
    Json(req): Json<AnalyzeResumeRequest>,
) -> Result<Json<AnalyzeResumeResponse>, AppError> {
    let resume = sqlx::query_as::<_, ResumeRow>("SELECT * FROM resumes WHERE id = $1")
        .bind(req.resume_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Resume {} not found", req.resume_id)))?;

    let jd = sqlx::query_as::<_, JobDescriptionRow>("SELECT * FROM job_descriptions WHERE id = $1")
        .bind(req.job_description_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(format!("Job description {} not found", req.job_description_id))
        })?;

    let resume_text = resume.extracted_text.unwrap_or_default();
    let analysis = score_resume(state.llm.as_ref(), &jd, &resume_text).await?;
    let row = store_analysis(&state.db, req.resume_id, req.job_description_id, &analysis).await?;

    Ok(Json(AnalyzeResumeResponse {
        success: true,
        analysis: row,
    }))
}

#[derive(Debug, Deserialize)]
pub struct CreateBatchRequest {
    pub job_description_id: Uuid,
    pub resume_ids: Vec<Uuid>,
}

/// POST /api/v1/batches
///
/// Runs the whole pipeline for the batch inside this request; dropping the
/// connection cancels the run.
pub async fn handle_create_batch(
    State(state): State<AppState>,
    Json(req): Json<CreateBatchRequest>,
) -> Result<Json<BatchOutcome>, AppError> {
    if req.resume_ids.is_empty() {
        return Err(AppError::Validation(
            "A batch requires at least one resume".to_string(),
        ));
    }

    let runner = BatchRunner::new(
        state.db.clone(),
        state.redis.clone(),
        state.http.clone(),
        state.llm.clone(),
        state.config.batch_concurrency,
        state.config.halt_on_stage_error,
    );

    let outcome = runner
        .run(req.job_description_id, req.resume_ids)
        .await?;
    Ok(Json(outcome))
}

/// GET /api/v1/batches/:id/progress
pub async fn handle_batch_progress(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
) -> Result<Json<Vec<ProcessingStep>>, AppError> {
    load_progress(&state.redis, batch_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("No progress recorded for batch {batch_id}")))
}

#[derive(Debug, FromRow)]
struct ScorecardRow {
    resume_id: Uuid,
    file_name: String,
    parsed_data: Option<Value>,
    relevance_score: i32,
    verdict: String,
    hard_match_score: i32,
    soft_match_score: i32,
    missing_skills: Vec<String>,
    improvement_suggestions: Vec<String>,
    processed_at: chrono::DateTime<chrono::Utc>,
}

/// Per-candidate scorecard fed to the presentation layer. Pure view data.
#[derive(Debug, Serialize)]
pub struct ScorecardView {
    pub resume_id: Uuid,
    pub candidate_name: String,
    pub file_name: String,
    pub relevance_score: i32,
    pub verdict: String,
    pub hard_match_score: i32,
    pub soft_match_score: i32,
    pub missing_skills: Vec<String>,
    pub improvement_suggestions: Vec<String>,
    pub processed_at: chrono::DateTime<chrono::Utc>,
}

/// GET /api/v1/batches/:id/results
///
/// Latest analysis per resume for the batch's job description, best score
/// first.
pub async fn handle_batch_results(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
) -> Result<Json<Vec<ScorecardView>>, AppError> {
    let job_description_id: Option<Uuid> =
        sqlx::query_scalar("SELECT job_description_id FROM batch_jobs WHERE id = $1")
            .bind(batch_id)
            .fetch_optional(&state.db)
            .await?;
    let job_description_id = job_description_id
        .ok_or_else(|| AppError::NotFound(format!("Batch {batch_id} not found")))?;

    let rows = sqlx::query_as::<_, ScorecardRow>(
        r#"
        SELECT DISTINCT ON (ar.resume_id)
               ar.resume_id, r.file_name, r.parsed_data,
               ar.relevance_score, ar.verdict, ar.hard_match_score,
               ar.soft_match_score, ar.missing_skills,
               ar.improvement_suggestions, ar.processed_at
        FROM analysis_results ar
        JOIN resumes r ON r.id = ar.resume_id
        WHERE ar.job_description_id = $1
        ORDER BY ar.resume_id, ar.processed_at DESC
        "#,
    )
    .bind(job_description_id)
    .fetch_all(&state.db)
    .await?;

    let mut views: Vec<ScorecardView> = rows.into_iter().map(to_scorecard).collect();
    views.sort_by(|a, b| b.relevance_score.cmp(&a.relevance_score));
    Ok(Json(views))
}

fn to_scorecard(row: ScorecardRow) -> ScorecardView {
    let candidate_name = candidate_name(row.parsed_data.as_ref(), &row.file_name);
    ScorecardView {
        resume_id: row.resume_id,
        candidate_name,
        file_name: row.file_name,
        relevance_score: row.relevance_score,
        verdict: row.verdict,
        hard_match_score: row.hard_match_score,
        soft_match_score: row.soft_match_score,
        missing_skills: row.missing_skills,
        improvement_suggestions: row.improvement_suggestions,
        processed_at: row.processed_at,
    }
}

/// Pulls the candidate's name out of parsed resume data, falling back to
/// the file name when parsing failed or is missing.
fn candidate_name(parsed_data: Option<&Value>, file_name: &str) -> String {
    parsed_data
        .and_then(|d| d.get("personal_info"))
        .and_then(|p| p.get("name"))
        .and_then(|n| n.as_str())
        .filter(|n| !n.is_empty())
        .map(String::from)
        .unwrap_or_else(|| file_name.to_string())
}

#[derive(Debug, Deserialize)]
pub struct CreateJobDescriptionRequest {
    pub user_id: Uuid,
    #[serde(default)]
    pub title: String,
    pub company: Option<String>,
    pub location: Option<String>,
    pub experience_level: Option<String>,
    pub salary_range: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub requirements: String,
    #[serde(default)]
    pub required_skills: Vec<String>,
    pub preferred_skills: Option<Vec<String>>,
    pub file_url: Option<String>,
}

/// A job description is valid with either the complete manual field set or
/// an uploaded file, never both and never neither.
fn validate_job_description(req: &CreateJobDescriptionRequest) -> Result<(), String> {
    let manual_complete = !req.title.trim().is_empty()
        && !req.description.trim().is_empty()
        && !req.requirements.trim().is_empty();
    let has_file = req.file_url.as_deref().is_some_and(|u| !u.trim().is_empty());

    match (manual_complete, has_file) {
        (true, false) | (false, true) => Ok(()),
        (true, true) => {
            Err("Provide either manual job description fields or a file, not both".to_string())
        }
        (false, false) => Err(
            "Provide a complete job description (title, description, requirements) or upload a file"
                .to_string(),
        ),
    }
}

/// POST /api/v1/job-descriptions
pub async fn handle_create_job_description(
    State(state): State<AppState>,
    Json(req): Json<CreateJobDescriptionRequest>,
) -> Result<Json<JobDescriptionRow>, AppError> {
    validate_job_description(&req).map_err(AppError::Validation)?;

    let row = sqlx::query_as::<_, JobDescriptionRow>(
        r#"
        INSERT INTO job_descriptions
            (id, user_id, title, company, location, experience_level, salary_range,
             description, requirements, required_skills, preferred_skills, file_url)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(req.user_id)
    .bind(&req.title)
    .bind(&req.company)
    .bind(&req.location)
    .bind(&req.experience_level)
    .bind(&req.salary_range)
    .bind(&req.description)
    .bind(&req.requirements)
    .bind(&req.required_skills)
    .bind(&req.preferred_skills)
    .bind(&req.file_url)
    .fetch_one(&state.db)
    .await?;

    Ok(Json(row))
}

/// GET /api/v1/job-descriptions/:id
pub async fn handle_get_job_description(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<JobDescriptionRow>, AppError> {
    sqlx::query_as::<_, JobDescriptionRow>("SELECT * FROM job_descriptions WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Job description {id} not found")))
}

/// GET /api/v1/profiles/:id
pub async fn handle_get_profile(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<crate::models::user::ProfileRow>, AppError> {
    sqlx::query_as::<_, crate::models::user::ProfileRow>("SELECT * FROM profiles WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Profile {id} not found")))
}

/// GET /api/v1/resumes/:id
pub async fn handle_get_resume(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ResumeRow>, AppError> {
    sqlx::query_as::<_, ResumeRow>("SELECT * FROM resumes WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Resume {id} not found")))
}
