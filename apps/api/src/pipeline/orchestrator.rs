//! Pipeline orchestrator — runs one batch (one job description, many
//! resumes) through the six canonical stages.
//!
//! The runner is the sole writer of batch progress. Resumes fan out across
//! a bounded worker pool inside the extraction and scoring stages; stages
//! themselves always run in fixed order. A stage error halts the run by
//! default (`HALT_ON_STAGE_ERROR=false` restores best-effort continuation),
//! and the batch always reports per-resume outcomes rather than a single
//! all-or-nothing result.
//!
//! The run executes inside the initiating request future, so a client
//! disconnect drops it and cancels in-flight model calls.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use sqlx::PgPool;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::llm_client::TextCompletionProvider;
use crate::models::job::JobDescriptionRow;
use crate::models::resume::{AnalysisResultRow, ResumeRow, Verdict};
use crate::pipeline::extract::{extract_text, store_extraction};
use crate::pipeline::parse::parse_structured;
use crate::pipeline::progress::{publish_progress, BatchProgress, ProgressError};
use crate::pipeline::score::{score_resume, store_analysis, ResumeAnalysis};

/// Outcome for a single resume within a batch run.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResumeOutcome {
    Analyzed {
        resume_id: Uuid,
        analysis: AnalysisResultRow,
    },
    Failed {
        resume_id: Uuid,
        stage: String,
        error: String,
    },
    /// The run halted before this resume was processed.
    Skipped { resume_id: Uuid },
}

impl ResumeOutcome {
    pub fn resume_id(&self) -> Uuid {
        match self {
            ResumeOutcome::Analyzed { resume_id, .. }
            | ResumeOutcome::Failed { resume_id, .. }
            | ResumeOutcome::Skipped { resume_id } => *resume_id,
        }
    }
}

/// Final batch report returned to the caller.
#[derive(Debug, Serialize)]
pub struct BatchOutcome {
    pub batch_id: Uuid,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<String>,
    pub outcomes: Vec<ResumeOutcome>,
}

/// Executes batch runs. Cheap to construct per request from `AppState`.
pub struct BatchRunner {
    pool: PgPool,
    redis: redis::Client,
    http: reqwest::Client,
    provider: Arc<dyn TextCompletionProvider>,
    concurrency: usize,
    halt_on_error: bool,
}

impl BatchRunner {
    pub fn new(
        pool: PgPool,
        redis: redis::Client,
        http: reqwest::Client,
        provider: Arc<dyn TextCompletionProvider>,
        concurrency: usize,
        halt_on_error: bool,
    ) -> Self {
        Self {
            pool,
            redis,
            http,
            provider,
            concurrency: concurrency.max(1),
            halt_on_error,
        }
    }

    pub async fn run(
        &self,
        job_description_id: Uuid,
        resume_ids: Vec<Uuid>,
    ) -> Result<BatchOutcome, AppError> {
        let batch_id = self
            .create_batch_job(job_description_id, resume_ids.len() as i32)
            .await?;
        info!(
            "Starting batch {batch_id}: {} resumes against JD {job_description_id}",
            resume_ids.len()
        );

        let mut progress = BatchProgress::new();
        let mut failures: HashMap<Uuid, (String, String)> = HashMap::new();
        self.publish(batch_id, &progress).await;

        // Stage 1: parse-jd
        self.start(&mut progress, batch_id, "parse-jd").await?;
        let jd = match self.load_job_description(job_description_id).await {
            Ok(jd) => jd,
            Err(e) => {
                return self
                    .halt(batch_id, progress, "parse-jd", &e, &resume_ids, &[], &failures)
                    .await;
            }
        };
        self.complete(&mut progress, batch_id, "parse-jd").await?;

        // Stage 2: extract-resumes
        self.start(&mut progress, batch_id, "extract-resumes").await?;
        let texts = self
            .run_extractions(batch_id, &mut progress, &resume_ids, &mut failures)
            .await?;
        if self.halt_on_error && !failures.is_empty() {
            let e = first_failure(&failures);
            return self
                .halt(batch_id, progress, "extract-resumes", &e, &resume_ids, &[], &failures)
                .await;
        }
        self.complete(&mut progress, batch_id, "extract-resumes").await?;

        // Stage 3: analyze-skills — the per-resume model calls
        self.start(&mut progress, batch_id, "analyze-skills").await?;
        let analyses = self
            .run_scoring(batch_id, &mut progress, &jd, &texts, &resume_ids, &mut failures)
            .await?;
        if self.halt_on_error
            && failures.values().any(|(s, _)| s.as_str() == "analyze-skills")
        {
            let e = first_failure(&failures);
            return self
                .halt(batch_id, progress, "analyze-skills", &e, &resume_ids, &[], &failures)
                .await;
        }
        self.complete(&mut progress, batch_id, "analyze-skills").await?;

        // Stage 4: semantic-matching — reconcile verdicts with the fixed thresholds
        self.start(&mut progress, batch_id, "semantic-matching").await?;
        for (resume_id, analysis) in &analyses {
            let derived = Verdict::from_score(analysis.relevance_score);
            if analysis.verdict != derived.as_str() {
                warn!(
                    "Model verdict '{}' disagrees with score {} for resume {resume_id}; storing {derived}",
                    analysis.verdict, analysis.relevance_score
                );
            }
        }
        self.complete(&mut progress, batch_id, "semantic-matching").await?;

        // Stage 5: generate-scores — persist results, bump batch counters
        self.start(&mut progress, batch_id, "generate-scores").await?;
        let mut stored: Vec<(Uuid, AnalysisResultRow)> = Vec::with_capacity(analyses.len());
        let total = analyses.len().max(1);
        for (done, (resume_id, analysis)) in analyses.iter().enumerate() {
            match store_analysis(&self.pool, *resume_id, jd.id, analysis).await {
                Ok(row) => {
                    self.increment_processed(batch_id).await?;
                    stored.push((*resume_id, row));
                }
                Err(e) => {
                    failures.insert(*resume_id, ("generate-scores".to_string(), e.to_string()));
                    if self.halt_on_error {
                        return self
                            .halt(
                                batch_id,
                                progress,
                                "generate-scores",
                                &e,
                                &resume_ids,
                                &stored,
                                &failures,
                            )
                            .await;
                    }
                }
            }
            self.tick(&mut progress, batch_id, "generate-scores", done + 1, total)
                .await?;
        }
        self.complete(&mut progress, batch_id, "generate-scores").await?;

        // Stage 6: create-recommendations — assemble the per-resume report
        self.start(&mut progress, batch_id, "create-recommendations").await?;
        let outcomes = assemble_outcomes(&resume_ids, &stored, &failures);
        self.complete(&mut progress, batch_id, "create-recommendations").await?;

        self.set_batch_status(batch_id, "completed").await?;
        info!(
            "Batch {batch_id} completed: {} analyzed, {} failed",
            stored.len(),
            failures.len()
        );

        Ok(BatchOutcome {
            batch_id,
            status: "completed".to_string(),
            failed_stage: None,
            outcomes,
        })
    }

    /// Extraction + structured parsing for every resume, fanned out across
    /// the bounded worker pool. Returns extracted text keyed by resume id.
    async fn run_extractions(
        &self,
        batch_id: Uuid,
        progress: &mut BatchProgress,
        resume_ids: &[Uuid],
        failures: &mut HashMap<Uuid, (String, String)>,
    ) -> Result<HashMap<Uuid, String>, AppError> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut join_set: JoinSet<(Uuid, Result<String, AppError>)> = JoinSet::new();

        for &resume_id in resume_ids {
            let pool = self.pool.clone();
            let http = self.http.clone();
            let provider = Arc::clone(&self.provider);
            let semaphore = Arc::clone(&semaphore);
            join_set.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(p) => p,
                    Err(_) => {
                        return (
                            resume_id,
                            Err(AppError::Internal(anyhow::anyhow!("worker pool closed"))),
                        )
                    }
                };
                (
                    resume_id,
                    extract_one(&pool, &http, provider.as_ref(), resume_id).await,
                )
            });
        }

        let total = resume_ids.len().max(1);
        let mut texts = HashMap::new();
        let mut done = 0usize;
        while let Some(joined) = join_set.join_next().await {
            done += 1;
            match joined {
                Ok((resume_id, Ok(text))) => {
                    texts.insert(resume_id, text);
                }
                Ok((resume_id, Err(e))) => {
                    warn!("Extraction failed for resume {resume_id}: {e}");
                    failures.insert(resume_id, ("extract-resumes".to_string(), e.to_string()));
                    if self.halt_on_error {
                        join_set.abort_all();
                        break;
                    }
                }
                Err(e) => warn!("Extraction task aborted: {e}"),
            }
            self.tick(progress, batch_id, "extract-resumes", done, total).await?;
        }

        Ok(texts)
    }

    /// Relevance scoring for every successfully extracted resume, bounded
    /// the same way as extraction.
    async fn run_scoring(
        &self,
        batch_id: Uuid,
        progress: &mut BatchProgress,
        jd: &JobDescriptionRow,
        texts: &HashMap<Uuid, String>,
        resume_ids: &[Uuid],
        failures: &mut HashMap<Uuid, (String, String)>,
    ) -> Result<Vec<(Uuid, ResumeAnalysis)>, AppError> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut join_set: JoinSet<(Uuid, Result<ResumeAnalysis, AppError>)> = JoinSet::new();

        // Preserve the caller's resume order for deterministic reporting.
        let pending: Vec<Uuid> = resume_ids
            .iter()
            .copied()
            .filter(|id| texts.contains_key(id))
            .collect();

        for resume_id in &pending {
            let resume_id = *resume_id;
            let jd = jd.clone();
            let text = texts[&resume_id].clone();
            let provider = Arc::clone(&self.provider);
            let semaphore = Arc::clone(&semaphore);
            join_set.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(p) => p,
                    Err(_) => {
                        return (
                            resume_id,
                            Err(AppError::Internal(anyhow::anyhow!("worker pool closed"))),
                        )
                    }
                };
                (resume_id, score_resume(provider.as_ref(), &jd, &text).await)
            });
        }

        let total = pending.len().max(1);
        let mut by_id: HashMap<Uuid, ResumeAnalysis> = HashMap::new();
        let mut done = 0usize;
        while let Some(joined) = join_set.join_next().await {
            done += 1;
            match joined {
                Ok((resume_id, Ok(analysis))) => {
                    by_id.insert(resume_id, analysis);
                }
                Ok((resume_id, Err(e))) => {
                    warn!("Scoring failed for resume {resume_id}: {e}");
                    failures.insert(resume_id, ("analyze-skills".to_string(), e.to_string()));
                    if self.halt_on_error {
                        join_set.abort_all();
                        break;
                    }
                }
                Err(e) => warn!("Scoring task aborted: {e}"),
            }
            self.tick(progress, batch_id, "analyze-skills", done, total).await?;
        }

        Ok(pending
            .into_iter()
            .filter_map(|id| by_id.remove(&id).map(|a| (id, a)))
            .collect())
    }

    /// Loads the JD row; file-based rows get their text extracted first.
    async fn load_job_description(&self, id: Uuid) -> Result<JobDescriptionRow, AppError> {
        let mut jd = sqlx::query_as::<_, JobDescriptionRow>(
            "SELECT * FROM job_descriptions WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Job description {id} not found")))?;

        if jd.description.trim().is_empty() {
            if let Some(url) = jd.file_url.clone() {
                let file_name = url.rsplit('/').next().unwrap_or("job-description.pdf");
                jd.description =
                    extract_text(&self.http, self.provider.as_ref(), &url, file_name).await?;
            }
        }

        Ok(jd)
    }

    /// Creates the batch row, taking the owner from the job description so
    /// callers never pass a user id of their own.
    async fn create_batch_job(
        &self,
        job_description_id: Uuid,
        total: i32,
    ) -> Result<Uuid, AppError> {
        let id = Uuid::new_v4();
        let result = sqlx::query(
            r#"
            INSERT INTO batch_jobs
                (id, user_id, job_description_id, total_resumes, processed_resumes, status)
            SELECT $1, user_id, $2, $3, 0, 'processing'
            FROM job_descriptions WHERE id = $2
            "#,
        )
        .bind(id)
        .bind(job_description_id)
        .bind(total)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "Job description {job_description_id} not found"
            )));
        }
        Ok(id)
    }

    async fn increment_processed(&self, batch_id: Uuid) -> Result<(), AppError> {
        sqlx::query("UPDATE batch_jobs SET processed_resumes = processed_resumes + 1 WHERE id = $1")
            .bind(batch_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_batch_status(&self, batch_id: Uuid, status: &str) -> Result<(), AppError> {
        sqlx::query("UPDATE batch_jobs SET status = $1 WHERE id = $2")
            .bind(status)
            .bind(batch_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Marks the failing stage, publishes the terminal snapshot and returns
    /// the partial report. The batch row goes to 'failed'.
    #[allow(clippy::too_many_arguments)]
    async fn halt(
        &self,
        batch_id: Uuid,
        mut progress: BatchProgress,
        stage: &str,
        error: &AppError,
        resume_ids: &[Uuid],
        stored: &[(Uuid, AnalysisResultRow)],
        failures: &HashMap<Uuid, (String, String)>,
    ) -> Result<BatchOutcome, AppError> {
        warn!("Batch {batch_id} halted at stage {stage}: {error}");
        progress.fail(stage, &error.to_string()).map_err(fsm_error)?;
        self.publish(batch_id, &progress).await;
        self.set_batch_status(batch_id, "failed").await?;

        Ok(BatchOutcome {
            batch_id,
            status: "failed".to_string(),
            failed_stage: Some(stage.to_string()),
            outcomes: assemble_outcomes(resume_ids, stored, failures),
        })
    }

    async fn start(
        &self,
        progress: &mut BatchProgress,
        batch_id: Uuid,
        stage: &str,
    ) -> Result<(), AppError> {
        progress.start(stage).map_err(fsm_error)?;
        self.publish(batch_id, progress).await;
        Ok(())
    }

    async fn complete(
        &self,
        progress: &mut BatchProgress,
        batch_id: Uuid,
        stage: &str,
    ) -> Result<(), AppError> {
        progress.complete(stage).map_err(fsm_error)?;
        self.publish(batch_id, progress).await;
        Ok(())
    }

    async fn tick(
        &self,
        progress: &mut BatchProgress,
        batch_id: Uuid,
        stage: &str,
        done: usize,
        total: usize,
    ) -> Result<(), AppError> {
        progress
            .set_progress(stage, ((done * 100) / total) as u8)
            .map_err(fsm_error)?;
        self.publish(batch_id, progress).await;
        Ok(())
    }

    /// Snapshot publication is advisory: a Redis hiccup must not kill a
    /// half-finished batch of model calls.
    async fn publish(&self, batch_id: Uuid, progress: &BatchProgress) {
        if let Err(e) = publish_progress(&self.redis, batch_id, progress).await {
            warn!("Failed to publish progress for batch {batch_id}: {e}");
        }
    }
}

/// One resume through extraction + structured parsing, persisting both.
/// Already-extracted resumes are not re-extracted.
async fn extract_one(
    pool: &PgPool,
    http: &reqwest::Client,
    provider: &dyn TextCompletionProvider,
    resume_id: Uuid,
) -> Result<String, AppError> {
    let resume = sqlx::query_as::<_, ResumeRow>("SELECT * FROM resumes WHERE id = $1")
        .bind(resume_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Resume {resume_id} not found")))?;

    if let Some(text) = resume.extracted_text {
        return Ok(text);
    }

    let text = extract_text(http, provider, &resume.file_url, &resume.file_name).await?;
    let parsed = parse_structured(provider, &text).await;
    store_extraction(pool, resume.id, &text, &parsed).await?;
    Ok(text)
}

fn assemble_outcomes(
    resume_ids: &[Uuid],
    stored: &[(Uuid, AnalysisResultRow)],
    failures: &HashMap<Uuid, (String, String)>,
) -> Vec<ResumeOutcome> {
    let analyzed: HashMap<Uuid, &AnalysisResultRow> =
        stored.iter().map(|(id, row)| (*id, row)).collect();

    resume_ids
        .iter()
        .map(|&resume_id| {
            if let Some(row) = analyzed.get(&resume_id) {
                ResumeOutcome::Analyzed {
                    resume_id,
                    analysis: (*row).clone(),
                }
            } else if let Some((stage, error)) = failures.get(&resume_id) {
                ResumeOutcome::Failed {
                    resume_id,
                    stage: stage.clone(),
                    error: error.clone(),
                }
            } else {
                ResumeOutcome::Skipped { resume_id }
            }
        })
        .collect()
}

fn first_failure(failures: &HashMap<Uuid, (String, String)>) -> AppError {
    let message = failures
        .values()
        .next()
        .map(|(_, e)| e.clone())
        .unwrap_or_else(|| "unknown failure".to_string());
    AppError::Internal(anyhow::anyhow!(message))
}

fn fsm_error(e: ProgressError) -> AppError {
    AppError::Internal(anyhow::Error::new(e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn make_row(resume_id: Uuid) -> AnalysisResultRow {
        AnalysisResultRow {
            id: Uuid::new_v4(),
            resume_id,
            job_description_id: Uuid::new_v4(),
            relevance_score: 88,
            verdict: "High".to_string(),
            hard_match_score: 85,
            soft_match_score: 90,
            missing_skills: vec!["Kubernetes".to_string()],
            improvement_suggestions: vec![],
            detailed_analysis: json!({}),
            processed_at: Utc::now(),
        }
    }

    #[test]
    fn test_outcomes_preserve_request_order() {
        let ids = [Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];
        let stored = vec![(ids[2], make_row(ids[2])), (ids[0], make_row(ids[0]))];
        let mut failures = HashMap::new();
        failures.insert(
            ids[1],
            ("analyze-skills".to_string(), "model unavailable".to_string()),
        );

        let outcomes = assemble_outcomes(&ids, &stored, &failures);
        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[0].resume_id(), ids[0]);
        assert!(matches!(outcomes[0], ResumeOutcome::Analyzed { .. }));
        assert!(matches!(outcomes[1], ResumeOutcome::Failed { .. }));
        assert!(matches!(outcomes[2], ResumeOutcome::Analyzed { .. }));
    }

    #[test]
    fn test_unprocessed_resumes_report_skipped() {
        let ids = [Uuid::new_v4(), Uuid::new_v4()];
        let mut failures = HashMap::new();
        failures.insert(
            ids[0],
            ("extract-resumes".to_string(), "fetch failed".to_string()),
        );

        let outcomes = assemble_outcomes(&ids, &[], &failures);
        assert!(matches!(outcomes[0], ResumeOutcome::Failed { .. }));
        assert!(matches!(outcomes[1], ResumeOutcome::Skipped { .. }));
    }

    #[test]
    fn test_outcome_serialization_is_tagged() {
        let resume_id = Uuid::new_v4();
        let outcome = ResumeOutcome::Failed {
            resume_id,
            stage: "extract-resumes".to_string(),
            error: "fetch failed".to_string(),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["stage"], "extract-resumes");
        assert_eq!(json["resume_id"], resume_id.to_string());
    }
}
