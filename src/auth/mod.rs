mod password;
mod token;

pub use password::{hash_password, verify_login, verify_password};
pub use token::{Claims, JwtKeys};

use axum::{extract::FromRequestParts, http::request::Parts};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::db;
use crate::error::AppError;
use crate::state::AppState;
use crate::workflow::UnknownValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Author,
    Reviewer,
    Editor,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Author => "author",
            Role::Reviewer => "reviewer",
            Role::Editor => "editor",
            Role::Admin => "admin",
        }
    }

    pub fn is_staff(&self) -> bool {
        matches!(self, Role::Editor | Role::Admin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "author" => Ok(Role::Author),
            "reviewer" => Ok(Role::Reviewer),
            "editor" => Ok(Role::Editor),
            "admin" => Ok(Role::Admin),
            other => Err(UnknownValue {
                kind: "role",
                value: other.to_string(),
            }),
        }
    }
}

/// Caller identity: the token names the user, the stored account decides
/// the role.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: i32,
    pub role: Role,
}

/// Current standing of the account behind a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Account {
    pub role: Role,
    pub active: bool,
}

/// Where the extractor looks accounts up. Postgres in the server.
#[axum::async_trait]
pub trait AccountSource: Send + Sync {
    async fn account(&self, user_id: i32, claims: &Claims) -> Result<Option<Account>, AppError>;
}

#[axum::async_trait]
impl AccountSource for PgPool {
    async fn account(&self, user_id: i32, _claims: &Claims) -> Result<Option<Account>, AppError> {
        match db::users::account_standing(self, user_id).await? {
            Some((role, active)) => Ok(Some(Account {
                role: role.parse()?,
                active,
            })),
            None => Ok(None),
        }
    }
}

/// Turns a token's user id and the stored account into a caller.
pub fn admit(user_id: i32, account: Option<Account>) -> Result<AuthUser, AppError> {
    let account =
        account.ok_or_else(|| AppError::Unauthorized("Account no longer exists".into()))?;
    if !account.active {
        return Err(AppError::forbidden("Account is inactive"));
    }
    Ok(AuthUser {
        id: user_id,
        role: account.role,
    })
}

impl AuthUser {
    pub fn require(&self, allowed: &[Role]) -> Result<(), AppError> {
        if allowed.contains(&self.role) {
            Ok(())
        } else {
            Err(AppError::forbidden(format!(
                "Role '{}' is not allowed to perform this action",
                self.role
            )))
        }
    }

    pub fn require_staff(&self) -> Result<(), AppError> {
        self.require(&[Role::Editor, Role::Admin])
    }

    pub fn is_staff(&self) -> bool {
        self.role.is_staff()
    }
}

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::Unauthorized("Missing authorization token".into()))?;

        let token = header
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AppError::Unauthorized("Malformed authorization header".into()))?;

        let claims = state.jwt.decode(token)?;
        let id = claims
            .sub
            .parse::<i32>()
            .map_err(|_| AppError::Unauthorized("Invalid token subject".into()))?;

        let account = state.accounts.account(id, &claims).await?;
        admit(id, account)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("author", Role::Author)]
    #[case("reviewer", Role::Reviewer)]
    #[case("editor", Role::Editor)]
    #[case("admin", Role::Admin)]
    fn parses_roles(#[case] text: &str, #[case] role: Role) {
        assert_eq!(text.parse::<Role>().unwrap(), role);
        assert_eq!(role.as_str(), text);
    }

    #[test]
    fn rejects_unknown_role() {
        assert!("superuser".parse::<Role>().is_err());
    }

    #[test]
    fn require_checks_membership() {
        let user = AuthUser {
            id: 1,
            role: Role::Reviewer,
        };
        assert!(user.require(&[Role::Reviewer]).is_ok());
        assert!(matches!(
            user.require_staff(),
            Err(AppError::Forbidden(_))
        ));
    }

    #[test]
    fn stored_role_wins_over_token() {
        let account = Account {
            role: Role::Author,
            active: true,
        };
        let user = admit(5, Some(account)).unwrap();
        assert_eq!(user.id, 5);
        assert_eq!(user.role, Role::Author);
    }

    #[test]
    fn deleted_account_is_unauthorized() {
        assert!(matches!(admit(5, None), Err(AppError::Unauthorized(_))));
    }

    #[test]
    fn inactive_account_is_forbidden() {
        let account = Account {
            role: Role::Editor,
            active: false,
        };
        assert!(matches!(
            admit(5, Some(account)),
            Err(AppError::Forbidden(_))
        ));
    }
}
