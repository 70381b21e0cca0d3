use sqlx::PgPool;

use super::Comment;
use crate::workflow::{CommentState, Visibility};

const COMMENT_COLUMNS: &str = r#"
    c.id, c.review_id, c.author_id, u.name AS author_name, c.content, c.visibility,
    c.reply_to, c.state, c.created_at, c.updated_at
"#;

pub async fn insert_comment(
    pool: &PgPool,
    review_id: i32,
    author_id: i32,
    content: &str,
    visibility: Visibility,
    reply_to: Option<i32>,
) -> Result<Comment, sqlx::Error> {
    sqlx::query_as::<_, Comment>(&format!(
        r#"
        WITH c AS (
            INSERT INTO comments (review_id, author_id, content, visibility, reply_to, state)
            VALUES ($1, $2, $3, $4, $5, 'active')
            RETURNING *
        )
        SELECT {} FROM c JOIN users u ON u.id = c.author_id
        "#,
        COMMENT_COLUMNS
    ))
    .bind(review_id)
    .bind(author_id)
    .bind(content)
    .bind(visibility.as_str())
    .bind(reply_to)
    .fetch_one(pool)
    .await
}

pub async fn get_comment(pool: &PgPool, id: i32) -> Result<Option<Comment>, sqlx::Error> {
    sqlx::query_as::<_, Comment>(&format!(
        "SELECT {} FROM comments c JOIN users u ON u.id = c.author_id WHERE c.id = $1",
        COMMENT_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
}

/// Every comment of a review in the given tiers, deleted ones included so
/// threads can keep their shape.
pub async fn list_for_review(
    pool: &PgPool,
    review_id: i32,
    tiers: &[Visibility],
) -> Result<Vec<Comment>, sqlx::Error> {
    let tiers: Vec<String> = tiers.iter().map(|t| t.as_str().to_string()).collect();
    sqlx::query_as::<_, Comment>(&format!(
        r#"
        SELECT {} FROM comments c JOIN users u ON u.id = c.author_id
        WHERE c.review_id = $1 AND c.visibility = ANY($2)
        ORDER BY c.created_at, c.id
        "#,
        COMMENT_COLUMNS
    ))
    .bind(review_id)
    .bind(tiers)
    .fetch_all(pool)
    .await
}

pub async fn update_content(
    pool: &PgPool,
    id: i32,
    content: &str,
) -> Result<Option<Comment>, sqlx::Error> {
    sqlx::query_as::<_, Comment>(&format!(
        r#"
        WITH c AS (
            UPDATE comments SET content = $2, updated_at = NOW()
            WHERE id = $1 AND state = 'active'
            RETURNING *
        )
        SELECT {} FROM c JOIN users u ON u.id = c.author_id
        "#,
        COMMENT_COLUMNS
    ))
    .bind(id)
    .bind(content)
    .fetch_optional(pool)
    .await
}

pub async fn set_state(
    pool: &PgPool,
    id: i32,
    state: CommentState,
) -> Result<Option<Comment>, sqlx::Error> {
    sqlx::query_as::<_, Comment>(&format!(
        r#"
        WITH c AS (
            UPDATE comments SET state = $2, updated_at = NOW()
            WHERE id = $1 AND state <> 'deleted'
            RETURNING *
        )
        SELECT {} FROM c JOIN users u ON u.id = c.author_id
        "#,
        COMMENT_COLUMNS
    ))
    .bind(id)
    .bind(state.as_str())
    .fetch_optional(pool)
    .await
}
