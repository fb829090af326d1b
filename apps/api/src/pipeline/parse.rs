//! Structured parsing stage — extracted text in, structured resume JSON out.
//!
//! Parse failures degrade to an `{"error": ...}` marker stored as the
//! parsed data. A resume whose text extracted fine is never failed just
//! because the model mangled the JSON.

use serde_json::{json, Value};
use tracing::warn;

use crate::llm_client::{CompletionRequest, TextCompletionProvider};
use crate::pipeline::prompts::{PARSE_PROMPT_TEMPLATE, PARSE_SYSTEM};

const PARSE_TEMPERATURE: f32 = 0.1;
const PARSE_MAX_TOKENS: u32 = 2000;

/// Parses extracted resume text into the fixed structured schema
/// (personal info, skills, experience, education, certifications, projects).
///
/// Empty text short-circuits to an empty object. Model or JSON failures
/// produce an error marker object, never an `Err`.
pub async fn parse_structured(provider: &dyn TextCompletionProvider, resume_text: &str) -> Value {
    if resume_text.is_empty() {
        return json!({});
    }

    let prompt = PARSE_PROMPT_TEMPLATE.replace("{resume_text}", resume_text);

    let text = match provider
        .complete(CompletionRequest {
            system: PARSE_SYSTEM,
            prompt: &prompt,
            temperature: PARSE_TEMPERATURE,
            max_tokens: PARSE_MAX_TOKENS,
        })
        .await
    {
        Ok(text) => text,
        Err(e) => {
            warn!("Structured parsing model call failed: {e}");
            return json!({ "error": "Error during parsing" });
        }
    };

    match serde_json::from_str::<Value>(text.trim()) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!("Structured parsing returned invalid JSON: {e}");
            json!({ "error": "Failed to parse structured data" })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_client::testing::StaticProvider;

    #[tokio::test]
    async fn test_empty_text_skips_model_call() {
        let provider = StaticProvider::failing("should not be called");
        let parsed = parse_structured(&provider, "").await;
        assert_eq!(parsed, json!({}));
    }

    #[tokio::test]
    async fn test_valid_json_is_stored_as_is() {
        let provider = StaticProvider::ok(
            r#"{"personal_info": {"name": "Jane Doe"}, "skills": ["React", "AWS"]}"#,
        );
        let parsed = parse_structured(&provider, "Jane Doe ...").await;
        assert_eq!(parsed["personal_info"]["name"], "Jane Doe");
        assert_eq!(parsed["skills"][1], "AWS");
    }

    #[tokio::test]
    async fn test_malformed_json_degrades_to_error_marker() {
        let provider = StaticProvider::ok("Sure! Here is the resume summary you asked for...");
        let parsed = parse_structured(&provider, "some text").await;
        assert_eq!(parsed, json!({ "error": "Failed to parse structured data" }));
    }

    #[tokio::test]
    async fn test_model_failure_degrades_to_error_marker() {
        let provider = StaticProvider::failing("timeout");
        let parsed = parse_structured(&provider, "some text").await;
        assert_eq!(parsed, json!({ "error": "Error during parsing" }));
    }
}
