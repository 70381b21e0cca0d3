use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use super::auth::{insert_user, normalize_email, validate_name};
use super::{created, message, ok, ok_with_message, ApiJson, ApiPath, ApiQuery};
use crate::auth::{AuthUser, Role};
use crate::db;
use crate::error::{AppError, AppResult};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct UserListQuery {
    role: Option<Role>,
    active: Option<bool>,
    limit: Option<i64>,
    offset: Option<i64>,
}

pub async fn list_users(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    ApiQuery(query): ApiQuery<UserListQuery>,
) -> AppResult<Json<Value>> {
    auth.require(&[Role::Admin])?;
    let (limit, offset) = db::page_bounds(query.limit, query.offset);
    let users = db::users::list_users(
        state.pool.as_ref(),
        query.role.map(|r| r.as_str()),
        query.active,
        limit,
        offset,
    )
    .await?;
    Ok(ok(users))
}

pub async fn get_user(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    ApiPath(id): ApiPath<i32>,
) -> AppResult<Json<Value>> {
    if auth.id != id {
        auth.require(&[Role::Admin])?;
    }
    let user = db::users::get_user(state.pool.as_ref(), id)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;
    Ok(ok(user))
}

#[derive(Deserialize)]
pub struct CreateUserRequest {
    name: String,
    email: String,
    password: String,
    role: Role,
}

pub async fn create_user(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    ApiJson(req): ApiJson<CreateUserRequest>,
) -> AppResult<(StatusCode, Json<Value>)> {
    auth.require(&[Role::Admin])?;
    let user = insert_user(&state, &req.name, &req.email, &req.password, req.role).await?;
    Ok(created("User created", user))
}

#[derive(Deserialize)]
pub struct UpdateUserRequest {
    name: Option<String>,
    email: Option<String>,
    role: Option<Role>,
}

pub async fn update_user(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    ApiPath(id): ApiPath<i32>,
    ApiJson(req): ApiJson<UpdateUserRequest>,
) -> AppResult<Json<Value>> {
    auth.require(&[Role::Admin])?;
    if id == auth.id && req.role.is_some_and(|r| r != Role::Admin) {
        return Err(AppError::bad_request("Admins cannot demote themselves"));
    }

    let name = req.name.as_deref().map(validate_name).transpose()?;
    let email = req.email.as_deref().map(normalize_email).transpose()?;

    let user = match db::users::update_user(
        state.pool.as_ref(),
        id,
        name.as_deref(),
        email.as_deref(),
        req.role.map(|r| r.as_str()),
    )
    .await
    {
        Ok(Some(user)) => user,
        Ok(None) => return Err(AppError::not_found("User not found")),
        Err(e) if db::is_unique_violation(&e) => {
            return Err(AppError::Conflict("Email is already registered".into()))
        }
        Err(e) => return Err(e.into()),
    };

    Ok(ok_with_message("User updated", user))
}

#[derive(Deserialize)]
pub struct StatusRequest {
    active: bool,
}

pub async fn set_status(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    ApiPath(id): ApiPath<i32>,
    ApiJson(req): ApiJson<StatusRequest>,
) -> AppResult<Json<Value>> {
    auth.require(&[Role::Admin])?;
    if id == auth.id && !req.active {
        return Err(AppError::bad_request("Admins cannot deactivate themselves"));
    }

    let user = db::users::set_active(state.pool.as_ref(), id, req.active)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;
    tracing::info!(user_id = id, active = req.active, "Changed user status");

    let msg = if req.active {
        "User activated"
    } else {
        "User deactivated"
    };
    Ok(ok_with_message(msg, user))
}

pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    ApiPath(id): ApiPath<i32>,
) -> AppResult<Json<Value>> {
    auth.require(&[Role::Admin])?;
    if id == auth.id {
        return Err(AppError::bad_request("Admins cannot delete themselves"));
    }
    if !db::users::delete_user(state.pool.as_ref(), id).await? {
        return Err(AppError::not_found("User not found"));
    }
    tracing::info!(user_id = id, "Deleted user");
    Ok(message("User deleted"))
}

pub async fn list_reviewers(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> AppResult<Json<Value>> {
    auth.require_staff()?;
    let reviewers = db::users::list_reviewers(state.pool.as_ref()).await?;
    Ok(ok(reviewers))
}

#[cfg(test)]
mod tests {
    use crate::auth::Role;
    use crate::routes::test_support::*;
    use rstest::rstest;

    #[rstest]
    #[case(Role::Author)]
    #[case(Role::Reviewer)]
    #[case(Role::Editor)]
    #[tokio::test]
    async fn only_admins_list_users(#[case] role: Role) {
        let token = token_for(7, role);
        let (status, body) = send(test_app(), get("/api/users", Some(&token))).await;
        assert_eq!(status, 403);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn authors_cannot_list_reviewers() {
        let token = token_for(3, Role::Author);
        let (status, _) = send(test_app(), get("/api/users/reviewers", Some(&token))).await;
        assert_eq!(status, 403);
    }

    #[tokio::test]
    async fn admin_cannot_deactivate_self() {
        let token = token_for(1, Role::Admin);
        let (status, body) = send(
            test_app(),
            json("PATCH", "/api/users/1/status", Some(&token), r#"{"active":false}"#),
        )
        .await;
        assert_eq!(status, 400);
        assert_eq!(body["mensaje"], "Admins cannot deactivate themselves");
    }

    #[tokio::test]
    async fn admin_cannot_delete_self() {
        let token = token_for(1, Role::Admin);
        let request = axum::http::Request::builder()
            .method("DELETE")
            .uri("/api/users/1")
            .header("Authorization", format!("Bearer {}", token))
            .body(axum::body::Body::empty())
            .unwrap();
        let (status, _) = send(test_app(), request).await;
        assert_eq!(status, 400);
    }

    #[tokio::test]
    async fn unknown_role_in_query_is_bad_request() {
        let token = token_for(1, Role::Admin);
        let (status, _) = send(test_app(), get("/api/users?role=wizard", Some(&token))).await;
        assert_eq!(status, 400);
    }
}
