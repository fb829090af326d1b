//! Resume upload — server-side validation plus S3 storage.
//!
//! Validation mirrors what the upload widget enforces client-side, but is
//! re-checked here: extension allow-list and size cap, with per-file error
//! messages. Invalid files never block valid ones in the same batch.

use aws_sdk_s3::primitives::ByteStream;
use axum::extract::{Multipart, State};
use axum::Json;
use bytes::Bytes;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::resume::ResumeRow;
use crate::state::AppState;

/// Extensions the pipeline knows how to handle.
pub const ACCEPTED_EXTENSIONS: &[&str] = &["pdf", "doc", "docx", "txt", "zip"];

/// Checks one file against the size cap and extension allow-list.
pub fn validate_file(file_name: &str, size_bytes: u64, max_mb: u64) -> Result<(), String> {
    if size_bytes > max_mb * 1024 * 1024 {
        return Err(format!("File {file_name} is too large (max {max_mb}MB)"));
    }

    let extension = file_name
        .rsplit('.')
        .next()
        .filter(|ext| *ext != file_name)
        .map(|ext| ext.to_lowercase());

    match extension {
        Some(ext) if ACCEPTED_EXTENSIONS.contains(&ext.as_str()) => Ok(()),
        Some(ext) => Err(format!("File type .{ext} is not supported")),
        None => Err(format!("File {file_name} has no extension")),
    }
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub success: bool,
    pub accepted: Vec<ResumeRow>,
    /// One message per rejected file; rejection never blocks other files.
    pub rejected: Vec<String>,
}

/// POST /api/v1/resumes/upload
///
/// Multipart form: a `user_id` text field plus one or more file fields.
pub async fn handle_upload_resumes(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let mut user_id: Option<Uuid> = None;
    let mut files: Vec<(String, Bytes)> = Vec::new();
    let mut rejected: Vec<String> = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Malformed multipart body: {e}")))?
    {
        if field.name() == Some("user_id") {
            let value = field
                .text()
                .await
                .map_err(|e| AppError::Validation(format!("Invalid user_id field: {e}")))?;
            user_id = Some(
                value
                    .parse()
                    .map_err(|_| AppError::Validation("user_id must be a UUID".to_string()))?,
            );
            continue;
        }

        let Some(file_name) = field.file_name().map(String::from) else {
            continue;
        };
        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::Validation(format!("Failed to read {file_name}: {e}")))?;

        match validate_file(&file_name, data.len() as u64, state.config.max_upload_mb) {
            Ok(()) => files.push((file_name, data)),
            Err(message) => rejected.push(message),
        }
    }

    let user_id =
        user_id.ok_or_else(|| AppError::Validation("Missing user_id field".to_string()))?;

    let mut accepted = Vec::with_capacity(files.len());
    for (file_name, data) in files {
        let row = store_resume(&state, user_id, &file_name, data).await?;
        accepted.push(row);
    }

    info!(
        "Upload for user {user_id}: {} accepted, {} rejected",
        accepted.len(),
        rejected.len()
    );

    Ok(Json(UploadResponse {
        success: true,
        accepted,
        rejected,
    }))
}

/// Uploads one accepted file to S3 and creates its resume row.
async fn store_resume(
    state: &AppState,
    user_id: Uuid,
    file_name: &str,
    data: Bytes,
) -> Result<ResumeRow, AppError> {
    let key = format!("resumes/{user_id}/{}/{file_name}", Uuid::new_v4());

    state
        .s3
        .put_object()
        .bucket(&state.config.s3_bucket)
        .key(&key)
        .body(ByteStream::from(data.to_vec()))
        .send()
        .await
        .map_err(|e| AppError::S3(format!("Upload of {file_name} failed: {e}")))?;

    let file_url = format!(
        "{}/{}/{key}",
        state.config.s3_endpoint.trim_end_matches('/'),
        state.config.s3_bucket
    );

    let row = sqlx::query_as::<_, ResumeRow>(
        r#"
        INSERT INTO resumes (id, user_id, file_name, file_url)
        VALUES ($1, $2, $3, $4)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(file_name)
    .bind(&file_url)
    .fetch_one(&state.db)
    .await?;

    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MB: u64 = 1024 * 1024;

    #[test]
    fn test_oversize_file_rejected_with_size_message() {
        let err = validate_file("resume.pdf", 11 * MB, 10).unwrap_err();
        assert!(err.contains("too large"));
        assert!(err.contains("10MB"));
        assert!(err.contains("resume.pdf"));
    }

    #[test]
    fn test_file_at_cap_is_accepted() {
        assert!(validate_file("resume.pdf", 10 * MB, 10).is_ok());
    }

    #[test]
    fn test_unsupported_extension_rejected_with_type_message() {
        let err = validate_file("resume.exe", MB, 10).unwrap_err();
        assert!(err.contains(".exe"));
        assert!(err.contains("not supported"));
    }

    #[test]
    fn test_extension_check_is_case_insensitive() {
        assert!(validate_file("Resume.PDF", MB, 10).is_ok());
        assert!(validate_file("resume.Docx", MB, 10).is_ok());
    }

    #[test]
    fn test_missing_extension_is_rejected() {
        assert!(validate_file("resume", MB, 10).is_err());
    }

    #[test]
    fn test_invalid_files_do_not_block_valid_ones() {
        // Mirrors the batch behavior: each file is judged independently.
        let batch = [
            ("good.pdf", MB),
            ("huge.pdf", 50 * MB),
            ("notes.txt", MB),
            ("virus.exe", MB),
        ];
        let (accepted, rejected): (Vec<_>, Vec<_>) = batch
            .iter()
            .partition(|(name, size)| validate_file(name, *size, 10).is_ok());
        assert_eq!(accepted.len(), 2);
        assert_eq!(rejected.len(), 2);
        assert!(accepted.iter().any(|(n, _)| *n == "good.pdf"));
        assert!(accepted.iter().any(|(n, _)| *n == "notes.txt"));
    }
}
