//! Batch progress tracking — the six canonical pipeline steps as a small
//! finite-state machine.
//!
//! The orchestrator is the sole writer. After every transition it publishes
//! a JSON snapshot to Redis; the progress endpoint (and any UI) is a pure
//! reader. A step may enter `processing` only once its predecessor has
//! completed, so observers always see stages finish in order.

use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::errors::AppError;

/// Canonical stage ids and display labels, in fixed pipeline order.
pub const STAGES: [(&str, &str); 6] = [
    ("parse-jd", "Parsing Job Description"),
    ("extract-resumes", "Extracting Resume Content"),
    ("analyze-skills", "Analyzing Skills & Experience"),
    ("semantic-matching", "AI Semantic Matching"),
    ("generate-scores", "Generating Relevance Scores"),
    ("create-recommendations", "Creating Improvement Suggestions"),
];

/// Snapshots live for an hour past the last transition.
const SNAPSHOT_TTL_SECS: u64 = 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Processing,
    Completed,
    Error,
}

/// One UI-facing step. Transient: never persisted to Postgres.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingStep {
    pub id: String,
    pub label: String,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Error)]
pub enum ProgressError {
    #[error("Unknown pipeline stage '{0}'")]
    UnknownStage(String),

    #[error("Stage '{0}' cannot start before its predecessor completes")]
    OutOfOrder(String),

    #[error("Invalid transition for stage '{stage}' from {from:?}")]
    InvalidTransition { stage: String, from: StepStatus },
}

/// The per-batch step state machine.
#[derive(Debug, Clone, Serialize)]
pub struct BatchProgress {
    steps: Vec<ProcessingStep>,
}

impl BatchProgress {
    pub fn new() -> Self {
        Self {
            steps: STAGES
                .iter()
                .map(|(id, label)| ProcessingStep {
                    id: id.to_string(),
                    label: label.to_string(),
                    status: StepStatus::Pending,
                    progress: None,
                    error: None,
                })
                .collect(),
        }
    }

    pub fn steps(&self) -> &[ProcessingStep] {
        &self.steps
    }

    /// Moves a pending stage to `processing`. Rejected unless every earlier
    /// stage has completed.
    pub fn start(&mut self, stage: &str) -> Result<(), ProgressError> {
        let idx = self.index_of(stage)?;
        if self.steps[..idx]
            .iter()
            .any(|s| s.status != StepStatus::Completed)
        {
            return Err(ProgressError::OutOfOrder(stage.to_string()));
        }
        let step = &mut self.steps[idx];
        if step.status != StepStatus::Pending {
            return Err(ProgressError::InvalidTransition {
                stage: stage.to_string(),
                from: step.status,
            });
        }
        step.status = StepStatus::Processing;
        step.progress = Some(0);
        Ok(())
    }

    /// Updates intra-stage progress (clamped to 100). Processing stages only.
    pub fn set_progress(&mut self, stage: &str, pct: u8) -> Result<(), ProgressError> {
        let idx = self.index_of(stage)?;
        let step = &mut self.steps[idx];
        if step.status != StepStatus::Processing {
            return Err(ProgressError::InvalidTransition {
                stage: stage.to_string(),
                from: step.status,
            });
        }
        step.progress = Some(pct.min(100));
        Ok(())
    }

    pub fn complete(&mut self, stage: &str) -> Result<(), ProgressError> {
        let idx = self.index_of(stage)?;
        let step = &mut self.steps[idx];
        if step.status != StepStatus::Processing {
            return Err(ProgressError::InvalidTransition {
                stage: stage.to_string(),
                from: step.status,
            });
        }
        step.status = StepStatus::Completed;
        step.progress = Some(100);
        Ok(())
    }

    pub fn fail(&mut self, stage: &str, message: &str) -> Result<(), ProgressError> {
        let idx = self.index_of(stage)?;
        let step = &mut self.steps[idx];
        step.status = StepStatus::Error;
        step.error = Some(message.to_string());
        Ok(())
    }

    /// Terminal when the last stage completed or any stage errored.
    pub fn is_terminal(&self) -> bool {
        self.failed_stage().is_some()
            || self
                .steps
                .last()
                .map(|s| s.status == StepStatus::Completed)
                .unwrap_or(false)
    }

    pub fn failed_stage(&self) -> Option<&str> {
        self.steps
            .iter()
            .find(|s| s.status == StepStatus::Error)
            .map(|s| s.id.as_str())
    }

    fn index_of(&self, stage: &str) -> Result<usize, ProgressError> {
        self.steps
            .iter()
            .position(|s| s.id == stage)
            .ok_or_else(|| ProgressError::UnknownStage(stage.to_string()))
    }
}

impl Default for BatchProgress {
    fn default() -> Self {
        Self::new()
    }
}

fn snapshot_key(batch_id: Uuid) -> String {
    format!("batch:{batch_id}:progress")
}

/// Publishes the current step list to Redis for pollers.
pub async fn publish_progress(
    redis: &redis::Client,
    batch_id: Uuid,
    progress: &BatchProgress,
) -> Result<(), AppError> {
    let payload = serde_json::to_string(progress.steps())
        .map_err(|e| AppError::Internal(anyhow::anyhow!("snapshot serialization: {e}")))?;
    let mut conn = redis
        .get_multiplexed_async_connection()
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("redis connection: {e}")))?;
    conn.set_ex::<_, _, ()>(snapshot_key(batch_id), payload, SNAPSHOT_TTL_SECS)
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("redis write: {e}")))?;
    Ok(())
}

/// Reads the latest step snapshot for a batch, if one exists.
pub async fn load_progress(
    redis: &redis::Client,
    batch_id: Uuid,
) -> Result<Option<Vec<ProcessingStep>>, AppError> {
    let mut conn = redis
        .get_multiplexed_async_connection()
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("redis connection: {e}")))?;
    let payload: Option<String> = conn
        .get(snapshot_key(batch_id))
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("redis read: {e}")))?;
    payload
        .map(|p| {
            serde_json::from_str(&p)
                .map_err(|e| AppError::Internal(anyhow::anyhow!("snapshot deserialization: {e}")))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_run_is_all_pending() {
        let progress = BatchProgress::new();
        assert_eq!(progress.steps().len(), 6);
        assert!(progress
            .steps()
            .iter()
            .all(|s| s.status == StepStatus::Pending));
        assert!(!progress.is_terminal());
    }

    #[test]
    fn test_stage_cannot_start_before_predecessor_completes() {
        let mut progress = BatchProgress::new();
        let err = progress.start("extract-resumes").unwrap_err();
        assert!(matches!(err, ProgressError::OutOfOrder(_)));

        progress.start("parse-jd").unwrap();
        // Predecessor is processing, not completed — still out of order.
        let err = progress.start("extract-resumes").unwrap_err();
        assert!(matches!(err, ProgressError::OutOfOrder(_)));

        progress.complete("parse-jd").unwrap();
        progress.start("extract-resumes").unwrap();
    }

    #[test]
    fn test_full_run_in_order_reaches_terminal() {
        let mut progress = BatchProgress::new();
        for (id, _) in STAGES {
            progress.start(id).unwrap();
            progress.set_progress(id, 40).unwrap();
            progress.complete(id).unwrap();
        }
        assert!(progress.is_terminal());
        assert!(progress.failed_stage().is_none());
    }

    #[test]
    fn test_progress_requires_processing_state() {
        let mut progress = BatchProgress::new();
        let err = progress.set_progress("parse-jd", 50).unwrap_err();
        assert!(matches!(err, ProgressError::InvalidTransition { .. }));
    }

    #[test]
    fn test_progress_clamps_to_100() {
        let mut progress = BatchProgress::new();
        progress.start("parse-jd").unwrap();
        progress.set_progress("parse-jd", 250).unwrap();
        assert_eq!(progress.steps()[0].progress, Some(100));
    }

    #[test]
    fn test_error_is_terminal_and_names_stage() {
        let mut progress = BatchProgress::new();
        progress.start("parse-jd").unwrap();
        progress.fail("parse-jd", "job description not found").unwrap();
        assert!(progress.is_terminal());
        assert_eq!(progress.failed_stage(), Some("parse-jd"));
        assert_eq!(
            progress.steps()[0].error.as_deref(),
            Some("job description not found")
        );
    }

    #[test]
    fn test_unknown_stage_is_rejected() {
        let mut progress = BatchProgress::new();
        let err = progress.start("rank-candidates").unwrap_err();
        assert!(matches!(err, ProgressError::UnknownStage(_)));
    }

    #[test]
    fn test_snapshot_serialization_shape() {
        let mut progress = BatchProgress::new();
        progress.start("parse-jd").unwrap();
        let json = serde_json::to_value(progress.steps()).unwrap();
        assert_eq!(json[0]["id"], "parse-jd");
        assert_eq!(json[0]["status"], "processing");
        assert_eq!(json[0]["progress"], 0);
        // Pending steps omit optional fields entirely.
        assert!(json[1].get("progress").is_none());
        assert_eq!(json[1]["status"], "pending");
    }
}
