use chrono::NaiveDate;
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};

use super::{Review, ReviewParticipants};
use crate::workflow::{Recommendation, ReviewState};

const REVIEW_SELECT: &str = r#"
    SELECT r.id, r.article_id, a.title AS article_title, r.reviewer_id,
           u.name AS reviewer_name, r.assigned_by, r.state, r.recommendation, r.rating,
           r.observations, r.due_date, r.created_at, r.updated_at, r.completed_at
    FROM reviews r
    JOIN articles a ON a.id = r.article_id
    JOIN users u ON u.id = r.reviewer_id
"#;

#[derive(Debug, Default, Clone)]
pub struct ReviewFilter {
    pub reviewer_id: Option<i32>,
    pub article_id: Option<i32>,
    pub state: Option<ReviewState>,
}

pub async fn insert_review(
    conn: &mut PgConnection,
    article_id: i32,
    reviewer_id: i32,
    assigned_by: i32,
    due_date: Option<NaiveDate>,
) -> Result<i32, sqlx::Error> {
    sqlx::query_scalar::<_, i32>(
        r#"
        INSERT INTO reviews (article_id, reviewer_id, assigned_by, state, due_date)
        VALUES ($1, $2, $3, 'pending', $4)
        RETURNING id
        "#,
    )
    .bind(article_id)
    .bind(reviewer_id)
    .bind(assigned_by)
    .bind(due_date)
    .fetch_one(conn)
    .await
}

/// Reviewer already holds a non-cancelled assignment for the article.
pub async fn has_active_assignment(
    conn: &mut PgConnection,
    article_id: i32,
    reviewer_id: i32,
) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar::<_, bool>(
        r#"
        SELECT EXISTS (
            SELECT 1 FROM reviews
            WHERE article_id = $1 AND reviewer_id = $2 AND state <> 'cancelled'
        )
        "#,
    )
    .bind(article_id)
    .bind(reviewer_id)
    .fetch_one(conn)
    .await
}

pub async fn get_review(pool: &PgPool, id: i32) -> Result<Option<Review>, sqlx::Error> {
    sqlx::query_as::<_, Review>(&format!("{} WHERE r.id = $1", REVIEW_SELECT))
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn fetch_review(conn: &mut PgConnection, id: i32) -> Result<Option<Review>, sqlx::Error> {
    sqlx::query_as::<_, Review>(&format!("{} WHERE r.id = $1", REVIEW_SELECT))
        .bind(id)
        .fetch_optional(conn)
        .await
}

pub async fn lock_review(conn: &mut PgConnection, id: i32) -> Result<Option<Review>, sqlx::Error> {
    sqlx::query_as::<_, Review>(&format!("{} WHERE r.id = $1 FOR UPDATE OF r", REVIEW_SELECT))
        .bind(id)
        .fetch_optional(conn)
        .await
}

pub async fn list_reviews(
    pool: &PgPool,
    filter: &ReviewFilter,
    limit: i64,
    offset: i64,
) -> Result<Vec<Review>, sqlx::Error> {
    let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(REVIEW_SELECT);
    qb.push(" WHERE 1 = 1");
    if let Some(reviewer_id) = filter.reviewer_id {
        qb.push(" AND r.reviewer_id = ").push_bind(reviewer_id);
    }
    if let Some(article_id) = filter.article_id {
        qb.push(" AND r.article_id = ").push_bind(article_id);
    }
    if let Some(state) = filter.state {
        qb.push(" AND r.state = ").push_bind(state.as_str());
    }
    qb.push(" ORDER BY r.created_at DESC, r.id DESC LIMIT ")
        .push_bind(limit)
        .push(" OFFSET ")
        .push_bind(offset);

    let reviews = qb.build_query_as::<Review>().fetch_all(pool).await?;
    Ok(reviews)
}

pub async fn reviews_for_article(
    pool: &PgPool,
    article_id: i32,
    completed_only: bool,
) -> Result<Vec<Review>, sqlx::Error> {
    sqlx::query_as::<_, Review>(&format!(
        "{} WHERE r.article_id = $1 AND ($2 = false OR r.state = 'completed') ORDER BY r.id",
        REVIEW_SELECT
    ))
    .bind(article_id)
    .bind(completed_only)
    .fetch_all(pool)
    .await
}

/// Saves draft fields on a pending review; `None` leaves a field unchanged.
pub async fn save_draft(
    pool: &PgPool,
    id: i32,
    rating: Option<i32>,
    recommendation: Option<Recommendation>,
    observations: Option<&str>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE reviews
        SET rating = COALESCE($2, rating),
            recommendation = COALESCE($3, recommendation),
            observations = COALESCE($4, observations),
            updated_at = NOW()
        WHERE id = $1 AND state = 'pending'
        "#,
    )
    .bind(id)
    .bind(rating)
    .bind(recommendation.map(|r| r.as_str()))
    .bind(observations)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn complete_review(
    conn: &mut PgConnection,
    id: i32,
    rating: i32,
    recommendation: Recommendation,
    observations: Option<&str>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE reviews
        SET state = 'completed',
            rating = $2,
            recommendation = $3,
            observations = COALESCE($4, observations),
            completed_at = NOW(),
            updated_at = NOW()
        WHERE id = $1 AND state = 'pending'
        "#,
    )
    .bind(id)
    .bind(rating)
    .bind(recommendation.as_str())
    .bind(observations)
    .execute(conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn completed_recommendations(
    conn: &mut PgConnection,
    article_id: i32,
) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar::<_, String>(
        r#"
        SELECT recommendation FROM reviews
        WHERE article_id = $1 AND state = 'completed' AND recommendation IS NOT NULL
        ORDER BY id
        "#,
    )
    .bind(article_id)
    .fetch_all(conn)
    .await
}

pub async fn count_in_state(
    conn: &mut PgConnection,
    article_id: i32,
    state: ReviewState,
) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM reviews WHERE article_id = $1 AND state = $2")
        .bind(article_id)
        .bind(state.as_str())
        .fetch_one(conn)
        .await
}

pub async fn cancel_review(conn: &mut PgConnection, id: i32) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE reviews SET state = 'cancelled', updated_at = NOW() WHERE id = $1 AND state = 'pending'",
    )
    .bind(id)
    .execute(conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Cancels every pending review of an article and returns the affected reviewers.
pub async fn cancel_pending_for_article(
    conn: &mut PgConnection,
    article_id: i32,
) -> Result<Vec<i32>, sqlx::Error> {
    sqlx::query_scalar::<_, i32>(
        r#"
        UPDATE reviews SET state = 'cancelled', updated_at = NOW()
        WHERE article_id = $1 AND state = 'pending'
        RETURNING reviewer_id
        "#,
    )
    .bind(article_id)
    .fetch_all(conn)
    .await
}

pub async fn participants(
    pool: &PgPool,
    review_id: i32,
) -> Result<Option<ReviewParticipants>, sqlx::Error> {
    sqlx::query_as::<_, ReviewParticipants>(
        r#"
        SELECT r.state AS review_state, r.article_id,
               a.author_id AS article_author_id, r.reviewer_id, r.assigned_by
        FROM reviews r
        JOIN articles a ON a.id = r.article_id
        WHERE r.id = $1
        "#,
    )
    .bind(review_id)
    .fetch_optional(pool)
    .await
}
