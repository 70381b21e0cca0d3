use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use super::{created, message, ok, ok_with_message, ApiJson, ApiPath, ApiQuery};
use crate::auth::AuthUser;
use crate::db;
use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::workflow::NotificationKind;

/// Best-effort fan-out used outside transactions: a failure is logged and
/// does not fail the request that triggered it.
pub async fn notify(
    state: &AppState,
    user_ids: &[i32],
    except: Option<i32>,
    kind: NotificationKind,
    text: &str,
    article_id: Option<i32>,
) {
    let result = async {
        let mut conn = state.pool.acquire().await?;
        db::notifications::notify_many(&mut conn, user_ids, except, kind, text, article_id).await
    }
    .await;
    if let Err(e) = result {
        tracing::warn!(kind = kind.as_str(), "Failed to create notifications: {}", e);
    }
}

#[derive(Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    unread_only: bool,
    limit: Option<i64>,
    offset: Option<i64>,
}

pub async fn list_notifications(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    ApiQuery(query): ApiQuery<ListQuery>,
) -> AppResult<Json<Value>> {
    let (limit, offset) = db::page_bounds(query.limit, query.offset);
    let items = db::notifications::list_notifications(
        state.pool.as_ref(),
        auth.id,
        query.unread_only,
        limit,
        offset,
    )
    .await?;
    Ok(ok(items))
}

pub async fn unread_count(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> AppResult<Json<Value>> {
    let count = db::notifications::unread_count(state.pool.as_ref(), auth.id).await?;
    Ok(ok(json!({ "unread": count })))
}

pub async fn mark_read(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    ApiPath(id): ApiPath<i32>,
) -> AppResult<Json<Value>> {
    let notification = db::notifications::mark_read(state.pool.as_ref(), auth.id, id)
        .await?
        .ok_or_else(|| AppError::not_found("Notification not found"))?;
    Ok(ok(notification))
}

pub async fn mark_all_read(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> AppResult<Json<Value>> {
    let updated = db::notifications::mark_all_read(state.pool.as_ref(), auth.id).await?;
    Ok(ok_with_message(
        "Notifications marked as read",
        json!({ "updated": updated }),
    ))
}

pub async fn delete_notification(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    ApiPath(id): ApiPath<i32>,
) -> AppResult<Json<Value>> {
    if !db::notifications::delete_notification(state.pool.as_ref(), auth.id, id).await? {
        return Err(AppError::not_found("Notification not found"));
    }
    Ok(message("Notification deleted"))
}

#[derive(Deserialize)]
pub struct SendRequest {
    user_id: i32,
    message: String,
    article_id: Option<i32>,
}

pub async fn send_notification(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    ApiJson(req): ApiJson<SendRequest>,
) -> AppResult<(StatusCode, Json<Value>)> {
    auth.require_staff()?;
    let text = req.message.trim();
    if text.is_empty() {
        return Err(AppError::bad_request("Message is required"));
    }
    if db::users::get_user(state.pool.as_ref(), req.user_id)
        .await?
        .is_none()
    {
        return Err(AppError::not_found("User not found"));
    }

    let mut conn = state.pool.acquire().await?;
    let notification = db::notifications::create_notification(
        &mut conn,
        req.user_id,
        NotificationKind::System,
        text,
        req.article_id,
    )
    .await?;
    Ok(created("Notification sent", notification))
}

#[cfg(test)]
mod tests {
    use crate::auth::Role;
    use crate::routes::test_support::*;

    #[tokio::test]
    async fn authors_cannot_send_notifications() {
        let token = token_for(4, Role::Author);
        let (status, _) = send(
            test_app(),
            json(
                "POST",
                "/api/notifications",
                Some(&token),
                r#"{"user_id":1,"message":"hi"}"#,
            ),
        )
        .await;
        assert_eq!(status, 403);
    }

    #[tokio::test]
    async fn blank_message_is_rejected() {
        let token = token_for(4, Role::Editor);
        let (status, body) = send(
            test_app(),
            json(
                "POST",
                "/api/notifications",
                Some(&token),
                r#"{"user_id":1,"message":"   "}"#,
            ),
        )
        .await;
        assert_eq!(status, 400);
        assert_eq!(body["mensaje"], "Message is required");
    }

    #[tokio::test]
    async fn listing_requires_token() {
        let (status, _) = send(test_app(), get("/api/notifications/unread-count", None)).await;
        assert_eq!(status, 401);
    }
}
