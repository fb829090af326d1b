use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A stored job description. Valid rows carry either the full manual field
/// set or an uploaded file reference, never both (enforced at create).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct JobDescriptionRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub company: Option<String>,
    pub location: Option<String>,
    pub experience_level: Option<String>,
    pub salary_range: Option<String>,
    pub description: String,
    pub requirements: String,
    pub required_skills: Vec<String>,
    pub preferred_skills: Option<Vec<String>>,
    pub file_url: Option<String>,
    pub created_at: DateTime<Utc>,
}
