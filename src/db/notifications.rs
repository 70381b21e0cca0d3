use sqlx::{PgConnection, PgPool};

use super::Notification;
use crate::workflow::NotificationKind;

const NOTIFICATION_COLUMNS: &str = "id, user_id, message, kind, article_id, read, created_at";

pub async fn create_notification(
    conn: &mut PgConnection,
    user_id: i32,
    kind: NotificationKind,
    message: &str,
    article_id: Option<i32>,
) -> Result<Notification, sqlx::Error> {
    sqlx::query_as::<_, Notification>(&format!(
        r#"
        INSERT INTO notifications (user_id, kind, message, article_id)
        VALUES ($1, $2, $3, $4)
        RETURNING {}
        "#,
        NOTIFICATION_COLUMNS
    ))
    .bind(user_id)
    .bind(kind.as_str())
    .bind(message)
    .bind(article_id)
    .fetch_one(conn)
    .await
}

/// Sends the same message to several users, skipping `except`.
pub async fn notify_many(
    conn: &mut PgConnection,
    user_ids: &[i32],
    except: Option<i32>,
    kind: NotificationKind,
    message: &str,
    article_id: Option<i32>,
) -> Result<u64, sqlx::Error> {
    let targets: Vec<i32> = user_ids
        .iter()
        .copied()
        .filter(|id| Some(*id) != except)
        .collect();
    if targets.is_empty() {
        return Ok(0);
    }

    let result = sqlx::query(
        r#"
        INSERT INTO notifications (user_id, kind, message, article_id)
        SELECT uid, $2, $3, $4 FROM UNNEST($1::int4[]) AS uid
        "#,
    )
    .bind(targets)
    .bind(kind.as_str())
    .bind(message)
    .bind(article_id)
    .execute(conn)
    .await?;
    Ok(result.rows_affected())
}

pub async fn list_notifications(
    pool: &PgPool,
    user_id: i32,
    unread_only: bool,
    limit: i64,
    offset: i64,
) -> Result<Vec<Notification>, sqlx::Error> {
    sqlx::query_as::<_, Notification>(&format!(
        r#"
        SELECT {}
        FROM notifications
        WHERE user_id = $1 AND ($2 = false OR read = false)
        ORDER BY created_at DESC, id DESC
        LIMIT $3 OFFSET $4
        "#,
        NOTIFICATION_COLUMNS
    ))
    .bind(user_id)
    .bind(unread_only)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
}

pub async fn unread_count(pool: &PgPool, user_id: i32) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM notifications WHERE user_id = $1 AND read = false",
    )
    .bind(user_id)
    .fetch_one(pool)
    .await
}

pub async fn mark_read(
    pool: &PgPool,
    user_id: i32,
    id: i32,
) -> Result<Option<Notification>, sqlx::Error> {
    sqlx::query_as::<_, Notification>(&format!(
        "UPDATE notifications SET read = true WHERE id = $1 AND user_id = $2 RETURNING {}",
        NOTIFICATION_COLUMNS
    ))
    .bind(id)
    .bind(user_id)
    .fetch_optional(pool)
    .await
}

pub async fn mark_all_read(pool: &PgPool, user_id: i32) -> Result<u64, sqlx::Error> {
    let result =
        sqlx::query("UPDATE notifications SET read = true WHERE user_id = $1 AND read = false")
            .bind(user_id)
            .execute(pool)
            .await?;
    Ok(result.rows_affected())
}

pub async fn delete_notification(pool: &PgPool, user_id: i32, id: i32) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM notifications WHERE id = $1 AND user_id = $2")
        .bind(id)
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}
