//! Text extraction stage — turns a stored resume file into plain text.
//!
//! `.txt` decodes directly; `.pdf` goes through the document-understanding
//! model. A failed model call is an explicit `ExtractionFailed`, never an
//! empty success: callers must be able to tell "empty resume" from
//! "extraction broke".

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::errors::AppError;
use crate::llm_client::{CompletionRequest, TextCompletionProvider};
use crate::pipeline::prompts::{EXTRACT_PROMPT_TEMPLATE, EXTRACT_SYSTEM};

/// Stored verbatim when a non-PDF file cannot be decoded as UTF-8.
pub const UNSUPPORTED_TYPE_SENTINEL: &str = "Unable to extract text from this file type";

const EXTRACT_MAX_TOKENS: u32 = 4000;

/// Fetches the file behind `file_url` and extracts its text.
pub async fn extract_text(
    http: &reqwest::Client,
    provider: &dyn TextCompletionProvider,
    file_url: &str,
    file_name: &str,
) -> Result<String, AppError> {
    info!("Extracting text from {file_name}");

    let response = http
        .get(file_url)
        .send()
        .await
        .map_err(|e| AppError::UpstreamFetch(format!("Failed to download {file_name}: {e}")))?;

    if !response.status().is_success() {
        return Err(AppError::UpstreamFetch(format!(
            "Failed to download {file_name}: storage returned {}",
            response.status()
        )));
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| AppError::UpstreamFetch(format!("Failed to read {file_name}: {e}")))?;

    extract_from_bytes(provider, &bytes, file_name).await
}

/// Extracts text from raw file bytes, branching on the file extension.
pub async fn extract_from_bytes(
    provider: &dyn TextCompletionProvider,
    bytes: &[u8],
    file_name: &str,
) -> Result<String, AppError> {
    match file_extension(file_name).as_deref() {
        // Plain text is decoded byte-exact, no lossy transform.
        Some("txt") => String::from_utf8(bytes.to_vec())
            .map_err(|_| AppError::ExtractionFailed(format!("{file_name} is not valid UTF-8"))),
        Some("pdf") => extract_pdf(provider, bytes, file_name).await,
        // Other formats: best-effort UTF-8 decode with a sentinel fallback.
        _ => Ok(String::from_utf8(bytes.to_vec())
            .unwrap_or_else(|_| UNSUPPORTED_TYPE_SENTINEL.to_string())),
    }
}

async fn extract_pdf(
    provider: &dyn TextCompletionProvider,
    bytes: &[u8],
    file_name: &str,
) -> Result<String, AppError> {
    let encoded = BASE64.encode(bytes);
    let prompt = EXTRACT_PROMPT_TEMPLATE.replace("{base64_pdf}", &encoded);

    let text = provider
        .complete(CompletionRequest {
            system: EXTRACT_SYSTEM,
            prompt: &prompt,
            temperature: 0.0,
            max_tokens: EXTRACT_MAX_TOKENS,
        })
        .await
        .map_err(|e| {
            AppError::ExtractionFailed(format!("Document model call failed for {file_name}: {e}"))
        })?;

    if text.trim().is_empty() {
        return Err(AppError::ExtractionFailed(format!(
            "Document model returned no text for {file_name}"
        )));
    }

    Ok(text)
}

/// Writes the extraction (and parsing) output back onto the resume row.
pub async fn store_extraction(
    pool: &PgPool,
    resume_id: Uuid,
    extracted_text: &str,
    parsed_data: &serde_json::Value,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        UPDATE resumes
        SET extracted_text = $1, parsed_data = $2, updated_at = NOW()
        WHERE id = $3
        "#,
    )
    .bind(extracted_text)
    .bind(parsed_data)
    .bind(resume_id)
    .execute(pool)
    .await?;

    info!("Stored extracted text for resume {resume_id}");
    Ok(())
}

fn file_extension(file_name: &str) -> Option<String> {
    file_name.rsplit('.').next().and_then(|ext| {
        if ext == file_name {
            None
        } else {
            Some(ext.to_lowercase())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_client::testing::StaticProvider;

    #[tokio::test]
    async fn test_txt_round_trips_byte_exact() {
        let raw = "Jane Doe\njane@example.com\n5 years React, Node.js, AWS\n";
        let provider = StaticProvider::failing("should not be called");
        let text = extract_from_bytes(&provider, raw.as_bytes(), "resume.txt")
            .await
            .unwrap();
        assert_eq!(text, raw);
    }

    #[tokio::test]
    async fn test_txt_invalid_utf8_is_extraction_failure() {
        let provider = StaticProvider::failing("should not be called");
        let err = extract_from_bytes(&provider, &[0xff, 0xfe, 0x00], "resume.txt")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ExtractionFailed(_)));
    }

    #[tokio::test]
    async fn test_pdf_uses_document_model() {
        let provider = StaticProvider::ok("Jane Doe\nSenior Engineer");
        let text = extract_from_bytes(&provider, b"%PDF-1.4 ...", "resume.pdf")
            .await
            .unwrap();
        assert_eq!(text, "Jane Doe\nSenior Engineer");
    }

    #[tokio::test]
    async fn test_pdf_model_failure_propagates_not_empty_success() {
        let provider = StaticProvider::failing("model unavailable");
        let err = extract_from_bytes(&provider, b"%PDF-1.4 ...", "resume.pdf")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ExtractionFailed(_)));
    }

    #[tokio::test]
    async fn test_pdf_empty_model_output_is_failure() {
        let provider = StaticProvider::ok("   \n");
        let err = extract_from_bytes(&provider, b"%PDF-1.4 ...", "resume.pdf")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ExtractionFailed(_)));
    }

    #[tokio::test]
    async fn test_unknown_extension_decodes_when_utf8() {
        let provider = StaticProvider::failing("should not be called");
        let text = extract_from_bytes(&provider, b"plain enough", "resume.doc")
            .await
            .unwrap();
        assert_eq!(text, "plain enough");
    }

    #[tokio::test]
    async fn test_unknown_extension_falls_back_to_sentinel() {
        let provider = StaticProvider::failing("should not be called");
        let text = extract_from_bytes(&provider, &[0xff, 0xd8, 0xff], "resume.doc")
            .await
            .unwrap();
        assert_eq!(text, UNSUPPORTED_TYPE_SENTINEL);
    }

    #[test]
    fn test_file_extension_is_case_insensitive() {
        assert_eq!(file_extension("Resume.PDF").as_deref(), Some("pdf"));
        assert_eq!(file_extension("notes.txt").as_deref(), Some("txt"));
        assert_eq!(file_extension("no_extension"), None);
    }
}
