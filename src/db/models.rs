use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: i32,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub role: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ReviewerWorkload {
    pub id: i32,
    pub name: String,
    pub email: String,
    pub pending_reviews: i64,
}

/// Article metadata. The stored bytes for the database backend are never
/// part of this row.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Article {
    pub id: i32,
    pub title: String,
    pub summary: String,
    pub keywords: String,
    pub author_id: i32,
    pub author_name: String,
    pub state: String,
    pub file_name: Option<String>,
    #[serde(skip_serializing)]
    pub file_path: Option<String>,
    pub file_mimetype: Option<String>,
    pub file_size: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Review {
    pub id: i32,
    pub article_id: i32,
    pub article_title: String,
    pub reviewer_id: i32,
    pub reviewer_name: String,
    pub assigned_by: Option<i32>,
    pub state: String,
    pub recommendation: Option<String>,
    pub rating: Option<i32>,
    pub observations: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// What an article's author gets to see of a completed review.
#[derive(Debug, Clone, Serialize)]
pub struct BlindReview {
    pub id: i32,
    pub article_id: i32,
    pub recommendation: Option<String>,
    pub rating: Option<i32>,
    pub observations: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<Review> for BlindReview {
    fn from(r: Review) -> Self {
        Self {
            id: r.id,
            article_id: r.article_id,
            recommendation: r.recommendation,
            rating: r.rating,
            observations: r.observations,
            completed_at: r.completed_at,
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Comment {
    pub id: i32,
    pub review_id: i32,
    /// Always set in the database; cleared when the reader may not know it.
    pub author_id: Option<i32>,
    pub author_name: String,
    pub content: String,
    pub visibility: String,
    pub reply_to: Option<i32>,
    pub state: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Notification {
    pub id: i32,
    pub user_id: i32,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub article_id: Option<i32>,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

/// Participants of one review, used for access checks on its comments.
#[derive(Debug, Clone, FromRow)]
pub struct ReviewParticipants {
    pub review_state: String,
    pub article_id: i32,
    pub article_author_id: i32,
    pub reviewer_id: i32,
    pub assigned_by: Option<i32>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct CountByKey {
    pub key: String,
    pub count: i64,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ReviewerStats {
    pub reviewer_id: i32,
    pub name: String,
    pub pending: i64,
    pub completed: i64,
    pub cancelled: i64,
    pub average_rating: Option<f64>,
}
