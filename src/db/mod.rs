mod models;

pub mod articles;
pub mod comments;
pub mod notifications;
pub mod reviews;
pub mod stats;
pub mod users;

pub use models::*;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;

pub type DbPool = Arc<PgPool>;

pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<DbPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;

    Ok(Arc::new(pool))
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

pub async fn ping(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Postgres unique-violation, used to turn duplicate inserts into 409s.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some("23505"),
        _ => false,
    }
}

/// Clamps caller-supplied paging to sane bounds.
pub fn page_bounds(limit: Option<i64>, offset: Option<i64>) -> (i64, i64) {
    let limit = limit.unwrap_or(50).clamp(1, 200);
    let offset = offset.unwrap_or(0).max(0);
    (limit, offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(None, None, (50, 0))]
    #[case(Some(0), Some(-5), (1, 0))]
    #[case(Some(10_000), Some(20), (200, 20))]
    #[case(Some(25), Some(50), (25, 50))]
    fn clamps_paging(
        #[case] limit: Option<i64>,
        #[case] offset: Option<i64>,
        #[case] expected: (i64, i64),
    ) {
        assert_eq!(page_bounds(limit, offset), expected);
    }
}
