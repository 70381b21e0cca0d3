use axum::{extract::State, http::StatusCode, Json};
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::{Arc, OnceLock};

use super::{created, message, ok, ApiJson};
use crate::auth::{hash_password, verify_login, verify_password, AuthUser, Role};
use crate::db::{self, User};
use crate::error::{AppError, AppResult};
use crate::state::AppState;

pub const MIN_PASSWORD_LEN: usize = 8;

fn email_regex() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| {
        Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern compiles")
    })
}

/// Lower-cases and checks an email address.
pub fn normalize_email(email: &str) -> AppResult<String> {
    let email = email.trim().to_lowercase();
    if !email_regex().is_match(&email) {
        return Err(AppError::bad_request("Invalid email address"));
    }
    Ok(email)
}

pub fn validate_password(password: &str) -> AppResult<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::bad_request(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

pub fn validate_name(name: &str) -> AppResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::bad_request("Name is required"));
    }
    Ok(name.to_string())
}

/// Inserts a user, turning a duplicate email into a 409.
pub async fn insert_user(
    state: &AppState,
    name: &str,
    email: &str,
    password: &str,
    role: Role,
) -> AppResult<User> {
    let name = validate_name(name)?;
    let email = normalize_email(email)?;
    validate_password(password)?;
    let hash = hash_password(password)?;

    match db::users::create_user(state.pool.as_ref(), &name, &email, &hash, role.as_str()).await {
        Ok(user) => {
            tracing::info!(user_id = user.id, role = %role, "Created user");
            Ok(user)
        }
        Err(e) if db::is_unique_violation(&e) => {
            Err(AppError::Conflict("Email is already registered".into()))
        }
        Err(e) => Err(e.into()),
    }
}

fn session(state: &AppState, user: &User) -> AppResult<Value> {
    let role: Role = user.role.parse()?;
    let token = state.jwt.issue(user.id, &user.email, role)?;
    Ok(json!({
        "user": user,
        "token": token,
        "expires_in": state.jwt.expires_in_seconds(),
    }))
}

#[derive(Deserialize)]
pub struct RegisterRequest {
    name: String,
    email: String,
    password: String,
}

pub async fn register(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<RegisterRequest>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let user = insert_user(&state, &req.name, &req.email, &req.password, Role::Author).await?;
    Ok(created("User registered", session(&state, &user)?))
}

#[derive(Deserialize)]
pub struct LoginRequest {
    email: String,
    password: String,
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<LoginRequest>,
) -> AppResult<Json<Value>> {
    let email = req.email.trim().to_lowercase();
    let user = db::users::get_user_by_email(state.pool.as_ref(), &email).await?;
    let verified = verify_login(user.as_ref().map(|u| u.password_hash.as_str()), &req.password);
    let user = user
        .filter(|_| verified)
        .ok_or_else(|| AppError::Unauthorized("Invalid email or password".into()))?;

    if !user.active {
        return Err(AppError::forbidden("Account is inactive"));
    }

    tracing::info!(user_id = user.id, "User logged in");
    Ok(ok(session(&state, &user)?))
}

pub async fn me(State(state): State<Arc<AppState>>, auth: AuthUser) -> AppResult<Json<Value>> {
    let user = db::users::get_user(state.pool.as_ref(), auth.id)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;
    Ok(ok(user))
}

#[derive(Deserialize)]
pub struct ChangePasswordRequest {
    current_password: String,
    new_password: String,
}

pub async fn change_password(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    ApiJson(req): ApiJson<ChangePasswordRequest>,
) -> AppResult<Json<Value>> {
    validate_password(&req.new_password)?;

    let user = db::users::get_user(state.pool.as_ref(), auth.id)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;
    if !verify_password(&user.password_hash, &req.current_password) {
        return Err(AppError::bad_request("Current password is incorrect"));
    }

    let hash = hash_password(&req.new_password)?;
    db::users::set_password(state.pool.as_ref(), auth.id, &hash).await?;
    Ok(message("Password updated"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::test_support::*;
    use rstest::rstest;

    #[rstest]
    #[case("Ana@Example.COM ", Some("ana@example.com"))]
    #[case("first.last+tag@uni.edu.ar", Some("first.last+tag@uni.edu.ar"))]
    #[case("no-at-sign", None)]
    #[case("two words@example.com", None)]
    #[case("user@nodot", None)]
    fn normalizes_emails(#[case] input: &str, #[case] expected: Option<&str>) {
        assert_eq!(normalize_email(input).ok().as_deref(), expected);
    }

    #[rstest]
    #[case("short", false)]
    #[case("exactly8", true)]
    #[case("a much longer passphrase", true)]
    fn password_length(#[case] password: &str, #[case] valid: bool) {
        assert_eq!(validate_password(password).is_ok(), valid);
    }

    #[test]
    fn blank_names_are_rejected() {
        assert!(validate_name("   ").is_err());
        assert_eq!(validate_name(" Ana ").unwrap(), "Ana");
    }

    #[tokio::test]
    async fn register_with_malformed_json_is_bad_request() {
        let (status, body) = send(
            test_app(),
            json("POST", "/api/auth/register", None, "{not json"),
        )
        .await;
        assert_eq!(status, 400);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn register_validates_before_touching_the_database() {
        let (status, body) = send(
            test_app(),
            json(
                "POST",
                "/api/auth/register",
                None,
                r#"{"name":"Ana","email":"bad","password":"longenough"}"#,
            ),
        )
        .await;
        assert_eq!(status, 400);
        assert_eq!(body["mensaje"], "Invalid email address");
    }

    #[tokio::test]
    async fn change_password_requires_token() {
        let (status, _) = send(
            test_app(),
            json(
                "PUT",
                "/api/auth/password",
                None,
                r#"{"current_password":"a","new_password":"b"}"#,
            ),
        )
        .await;
        assert_eq!(status, 401);
    }
}
