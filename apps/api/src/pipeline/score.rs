//! Relevance scoring stage — resume text vs. job description.
//!
//! The model's JSON is held to a strict schema; anything else is
//! `AnalysisFailed` and no result row is written. The stored verdict is
//! re-derived from the returned score so the 80/50 thresholds hold even
//! when the model mislabels its own output.

use serde::Deserialize;
use serde_json::Value;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::errors::AppError;
use crate::llm_client::{complete_json, CompletionRequest, LlmError, TextCompletionProvider};
use crate::models::job::JobDescriptionRow;
use crate::models::resume::{AnalysisResultRow, Verdict};
use crate::pipeline::prompts::{ANALYZE_PROMPT_TEMPLATE, ANALYZE_SYSTEM};

const ANALYZE_TEMPERATURE: f32 = 0.3;
const ANALYZE_MAX_TOKENS: u32 = 2000;

/// The scoring schema the model must return. Deserialization failure of
/// any field is a malformed-output error, not a partial result.
#[derive(Debug, Clone, Deserialize)]
pub struct ResumeAnalysis {
    pub relevance_score: u8,
    pub verdict: String,
    pub hard_match_score: u8,
    pub soft_match_score: u8,
    pub missing_skills: Vec<String>,
    pub improvement_suggestions: Vec<String>,
    pub detailed_analysis: Value,
}

/// Builds the deterministic scoring prompt. Optional JD fields default to
/// "Not specified" so the same inputs always produce the same prompt.
pub fn build_analysis_prompt(jd: &JobDescriptionRow, resume_text: &str) -> String {
    let preferred = jd
        .preferred_skills
        .as_ref()
        .filter(|s| !s.is_empty())
        .map(|s| s.join(", "));

    let required = if jd.required_skills.is_empty() {
        "Not specified".to_string()
    } else {
        jd.required_skills.join(", ")
    };

    let resume_text = if resume_text.is_empty() {
        "No text content available"
    } else {
        resume_text
    };

    ANALYZE_PROMPT_TEMPLATE
        .replace("{title}", &jd.title)
        .replace("{company}", jd.company.as_deref().unwrap_or("Not specified"))
        .replace(
            "{experience_level}",
            jd.experience_level.as_deref().unwrap_or("Not specified"),
        )
        .replace(
            "{location}",
            jd.location.as_deref().unwrap_or("Not specified"),
        )
        .replace("{required_skills}", &required)
        .replace(
            "{preferred_skills}",
            preferred.as_deref().unwrap_or("Not specified"),
        )
        .replace("{description}", &jd.description)
        .replace("{resume_text}", resume_text)
}

/// Scores one resume against one job description.
pub async fn score_resume(
    provider: &dyn TextCompletionProvider,
    jd: &JobDescriptionRow,
    resume_text: &str,
) -> Result<ResumeAnalysis, AppError> {
    let prompt = build_analysis_prompt(jd, resume_text);

    let analysis = complete_json::<ResumeAnalysis>(
        provider,
        CompletionRequest {
            system: ANALYZE_SYSTEM,
            prompt: &prompt,
            temperature: ANALYZE_TEMPERATURE,
            max_tokens: ANALYZE_MAX_TOKENS,
        },
    )
    .await
    .map_err(|e| match e {
        LlmError::Parse(e) => {
            AppError::AnalysisFailed(format!("Model returned malformed analysis JSON: {e}"))
        }
        LlmError::EmptyContent => {
            AppError::AnalysisFailed("Model returned empty analysis".to_string())
        }
        other => AppError::Llm(other.to_string()),
    })?;

    // Scores are 0-100; a structurally valid reply can still be out of range.
    for (field, value) in [
        ("relevance_score", analysis.relevance_score),
        ("hard_match_score", analysis.hard_match_score),
        ("soft_match_score", analysis.soft_match_score),
    ] {
        if value > 100 {
            return Err(AppError::AnalysisFailed(format!(
                "Model returned out-of-range {field}: {value}"
            )));
        }
    }

    Ok(analysis)
}

/// Persists one analysis outcome. Plain INSERT: repeated runs on the same
/// (resume, job description) pair accumulate history, nothing is upserted.
pub async fn store_analysis(
    pool: &PgPool,
    resume_id: Uuid,
    job_description_id: Uuid,
    analysis: &ResumeAnalysis,
) -> Result<AnalysisResultRow, AppError> {
    let verdict = Verdict::from_score(analysis.relevance_score);

    let row = sqlx::query_as::<_, AnalysisResultRow>(
        r#"
        INSERT INTO analysis_results
            (id, resume_id, job_description_id, relevance_score, verdict,
             hard_match_score, soft_match_score, missing_skills,
             improvement_suggestions, detailed_analysis, processed_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, NOW())
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(resume_id)
    .bind(job_description_id)
    .bind(analysis.relevance_score as i32)
    .bind(verdict.as_str())
    .bind(analysis.hard_match_score as i32)
    .bind(analysis.soft_match_score as i32)
    .bind(&analysis.missing_skills)
    .bind(&analysis.improvement_suggestions)
    .bind(&analysis.detailed_analysis)
    .fetch_one(pool)
    .await?;

    info!(
        "Stored analysis for resume {resume_id}: score={} verdict={}",
        analysis.relevance_score, verdict
    );
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_client::testing::StaticProvider;
    use chrono::Utc;

    fn make_jd(company: Option<&str>, required_skills: Vec<&str>) -> JobDescriptionRow {
        JobDescriptionRow {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            title: "Senior Software Engineer".to_string(),
            company: company.map(String::from),
            location: None,
            experience_level: Some("Senior".to_string()),
            salary_range: None,
            description: "Build and run web services.".to_string(),
            requirements: "5+ years experience.".to_string(),
            required_skills: required_skills.into_iter().map(String::from).collect(),
            preferred_skills: None,
            file_url: None,
            created_at: Utc::now(),
        }
    }

    const HIGH_MATCH_RESPONSE: &str = r#"{
        "relevance_score": 88,
        "verdict": "High",
        "hard_match_score": 85,
        "soft_match_score": 90,
        "missing_skills": ["Kubernetes"],
        "improvement_suggestions": ["Add container orchestration experience"],
        "detailed_analysis": {
            "strengths": ["React", "AWS"],
            "weaknesses": ["No Kubernetes"],
            "experience_match": "Strong",
            "skills_match": "Strong",
            "education_match": "Adequate"
        }
    }"#;

    #[test]
    fn test_prompt_defaults_absent_fields_to_not_specified() {
        let jd = make_jd(None, vec![]);
        let prompt = build_analysis_prompt(&jd, "some resume text");
        assert!(prompt.contains("Company: Not specified"));
        assert!(prompt.contains("Location: Not specified"));
        assert!(prompt.contains("Required Skills: Not specified"));
        assert!(prompt.contains("Preferred Skills: Not specified"));
    }

    #[test]
    fn test_prompt_is_deterministic_and_embeds_inputs() {
        let jd = make_jd(Some("Acme"), vec!["React", "AWS"]);
        let a = build_analysis_prompt(&jd, "5 years React, Node.js, AWS");
        let b = build_analysis_prompt(&jd, "5 years React, Node.js, AWS");
        assert_eq!(a, b);
        assert!(a.contains("Required Skills: React, AWS"));
        assert!(a.contains("5 years React, Node.js, AWS"));
        assert!(a.contains("Hard Match (40%)"));
        assert!(a.contains("Soft Match (60%)"));
    }

    #[test]
    fn test_prompt_substitutes_empty_resume_text() {
        let jd = make_jd(Some("Acme"), vec!["React"]);
        let prompt = build_analysis_prompt(&jd, "");
        assert!(prompt.contains("No text content available"));
    }

    #[tokio::test]
    async fn test_high_match_scenario() {
        let jd = make_jd(Some("Acme"), vec!["React", "AWS"]);
        let provider = StaticProvider::ok(HIGH_MATCH_RESPONSE);

        let analysis = score_resume(&provider, &jd, "5 years React, Node.js, AWS")
            .await
            .unwrap();

        assert_eq!(analysis.relevance_score, 88);
        assert_eq!(Verdict::from_score(analysis.relevance_score), Verdict::High);
        assert!(!analysis.missing_skills.contains(&"React".to_string()));
        assert!(!analysis.missing_skills.contains(&"AWS".to_string()));
        assert!(analysis.hard_match_score >= 80);
    }

    #[tokio::test]
    async fn test_malformed_model_output_is_analysis_failed() {
        let jd = make_jd(Some("Acme"), vec!["React"]);
        let provider = StaticProvider::ok("I'd rate this resume about an 8 out of 10.");

        let err = score_resume(&provider, &jd, "resume text").await.unwrap_err();
        assert!(matches!(err, AppError::AnalysisFailed(_)));
    }

    #[tokio::test]
    async fn test_schema_violation_is_analysis_failed() {
        // Valid JSON, wrong shape: missing required fields.
        let jd = make_jd(Some("Acme"), vec!["React"]);
        let provider = StaticProvider::ok(r#"{"relevance_score": 70}"#);

        let err = score_resume(&provider, &jd, "resume text").await.unwrap_err();
        assert!(matches!(err, AppError::AnalysisFailed(_)));
    }

    #[tokio::test]
    async fn test_out_of_range_score_is_analysis_failed() {
        // Well-formed reply, score beyond 100: must be rejected, not stored.
        let jd = make_jd(Some("Acme"), vec!["React"]);
        let provider = StaticProvider::ok(
            r#"{
                "relevance_score": 250,
                "verdict": "High",
                "hard_match_score": 85,
                "soft_match_score": 90,
                "missing_skills": [],
                "improvement_suggestions": [],
                "detailed_analysis": {}
            }"#,
        );

        let err = score_resume(&provider, &jd, "resume text").await.unwrap_err();
        assert!(matches!(err, AppError::AnalysisFailed(_)));
    }

    #[tokio::test]
    async fn test_out_of_range_sub_score_is_analysis_failed() {
        let jd = make_jd(Some("Acme"), vec!["React"]);
        let provider = StaticProvider::ok(
            r#"{
                "relevance_score": 70,
                "verdict": "Medium",
                "hard_match_score": 101,
                "soft_match_score": 60,
                "missing_skills": [],
                "improvement_suggestions": [],
                "detailed_analysis": {}
            }"#,
        );

        let err = score_resume(&provider, &jd, "resume text").await.unwrap_err();
        assert!(matches!(err, AppError::AnalysisFailed(_)));
    }

    #[tokio::test]
    async fn test_model_api_failure_is_llm_error() {
        let jd = make_jd(Some("Acme"), vec!["React"]);
        let provider = StaticProvider::failing("upstream 500");

        let err = score_resume(&provider, &jd, "resume text").await.unwrap_err();
        assert!(matches!(err, AppError::Llm(_)));
    }
}
