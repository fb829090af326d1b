use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

/// An uploaded resume. `extracted_text` and `parsed_data` stay NULL until
/// the extraction and parsing stages fill them in, in that order; after
/// that the row is only touched by new analysis runs.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ResumeRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub file_name: String,
    pub file_url: String,
    pub extracted_text: Option<String>,
    pub parsed_data: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One scoring outcome for a (resume, job description) pair. Append-only:
/// re-analysis inserts a new row, prior rows are never touched.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AnalysisResultRow {
    pub id: Uuid,
    pub resume_id: Uuid,
    pub job_description_id: Uuid,
    pub relevance_score: i32,
    pub verdict: String,
    pub hard_match_score: i32,
    pub soft_match_score: i32,
    pub missing_skills: Vec<String>,
    pub improvement_suggestions: Vec<String>,
    pub detailed_analysis: Value,
    pub processed_at: DateTime<Utc>,
}

/// Advisory bookkeeping for one batch run. `processed_resumes` is bumped by
/// the orchestrator as scoring completes; nothing reconciles it against the
/// actual `analysis_results` rows.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BatchJobRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub job_description_id: Uuid,
    pub total_resumes: i32,
    pub processed_resumes: i32,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// Coarse relevance tier derived from the 0–100 score.
/// Thresholds are fixed: High ≥ 80, Medium 50–79, Low ≤ 49.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    High,
    Medium,
    Low,
}

impl Verdict {
    pub fn from_score(score: u8) -> Self {
        match score {
            80.. => Verdict::High,
            50..=79 => Verdict::Medium,
            _ => Verdict::Low,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::High => "High",
            Verdict::Medium => "Medium",
            Verdict::Low => "Low",
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_boundary_at_80_is_high() {
        assert_eq!(Verdict::from_score(80), Verdict::High);
    }

    #[test]
    fn test_verdict_boundary_at_79_is_medium() {
        assert_eq!(Verdict::from_score(79), Verdict::Medium);
    }

    #[test]
    fn test_verdict_boundary_at_50_is_medium() {
        assert_eq!(Verdict::from_score(50), Verdict::Medium);
    }

    #[test]
    fn test_verdict_boundary_at_49_is_low() {
        assert_eq!(Verdict::from_score(49), Verdict::Low);
    }

    #[test]
    fn test_verdict_extremes() {
        assert_eq!(Verdict::from_score(0), Verdict::Low);
        assert_eq!(Verdict::from_score(100), Verdict::High);
    }

    #[test]
    fn test_verdict_display_matches_stored_form() {
        assert_eq!(Verdict::High.to_string(), "High");
        assert_eq!(Verdict::Medium.to_string(), "Medium");
        assert_eq!(Verdict::Low.to_string(), "Low");
    }
}
