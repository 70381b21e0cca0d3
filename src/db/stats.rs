use serde::Serialize;
use sqlx::PgPool;

use super::{CountByKey, ReviewerStats};

#[derive(Debug, Serialize)]
pub struct Overview {
    pub total_articles: i64,
    pub total_reviews: i64,
    pub total_users: i64,
    pub articles_by_state: Vec<CountByKey>,
    pub reviews_by_state: Vec<CountByKey>,
    pub recommendations: Vec<CountByKey>,
    pub users_by_role: Vec<CountByKey>,
    pub average_rating: Option<f64>,
}

async fn grouped(pool: &PgPool, sql: &str) -> Result<Vec<CountByKey>, sqlx::Error> {
    sqlx::query_as::<_, CountByKey>(sql).fetch_all(pool).await
}

pub async fn overview(pool: &PgPool) -> Result<Overview, sqlx::Error> {
    let articles_by_state = grouped(
        pool,
        "SELECT state AS key, COUNT(*) AS count FROM articles GROUP BY state ORDER BY state",
    )
    .await?;
    let reviews_by_state = grouped(
        pool,
        "SELECT state AS key, COUNT(*) AS count FROM reviews GROUP BY state ORDER BY state",
    )
    .await?;
    let recommendations = grouped(
        pool,
        r#"
        SELECT recommendation AS key, COUNT(*) AS count FROM reviews
        WHERE state = 'completed' AND recommendation IS NOT NULL
        GROUP BY recommendation ORDER BY recommendation
        "#,
    )
    .await?;
    let users_by_role = grouped(
        pool,
        "SELECT role AS key, COUNT(*) AS count FROM users GROUP BY role ORDER BY role",
    )
    .await?;

    let average_rating: Option<f64> = sqlx::query_scalar(
        "SELECT AVG(rating)::float8 FROM reviews WHERE state = 'completed' AND rating IS NOT NULL",
    )
    .fetch_one(pool)
    .await?;

    Ok(Overview {
        total_articles: articles_by_state.iter().map(|c| c.count).sum(),
        total_reviews: reviews_by_state.iter().map(|c| c.count).sum(),
        total_users: users_by_role.iter().map(|c| c.count).sum(),
        articles_by_state,
        reviews_by_state,
        recommendations,
        users_by_role,
        average_rating,
    })
}

pub async fn reviewer_stats(pool: &PgPool) -> Result<Vec<ReviewerStats>, sqlx::Error> {
    sqlx::query_as::<_, ReviewerStats>(
        r#"
        SELECT u.id AS reviewer_id, u.name,
               COUNT(r.id) FILTER (WHERE r.state = 'pending') AS pending,
               COUNT(r.id) FILTER (WHERE r.state = 'completed') AS completed,
               COUNT(r.id) FILTER (WHERE r.state = 'cancelled') AS cancelled,
               (AVG(r.rating) FILTER (WHERE r.state = 'completed'))::float8 AS average_rating
        FROM users u
        LEFT JOIN reviews r ON r.reviewer_id = u.id
        WHERE u.role = 'reviewer'
        GROUP BY u.id, u.name
        ORDER BY u.name
        "#,
    )
    .fetch_all(pool)
    .await
}
