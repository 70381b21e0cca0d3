use axum::{extract::State, Json};
use serde_json::Value;
use std::sync::Arc;

use super::ok;
use crate::auth::AuthUser;
use crate::db;
use crate::error::AppResult;
use crate::state::AppState;

pub async fn overview(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> AppResult<Json<Value>> {
    auth.require_staff()?;
    let overview = db::stats::overview(state.pool.as_ref()).await?;
    Ok(ok(overview))
}

pub async fn reviewers(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> AppResult<Json<Value>> {
    auth.require_staff()?;
    let stats = db::stats::reviewer_stats(state.pool.as_ref()).await?;
    Ok(ok(stats))
}

#[cfg(test)]
mod tests {
    use crate::auth::Role;
    use crate::routes::test_support::*;
    use rstest::rstest;

    #[rstest]
    #[case("/api/stats", Role::Author)]
    #[case("/api/stats", Role::Reviewer)]
    #[case("/api/stats/reviewers", Role::Author)]
    #[case("/api/stats/reviewers", Role::Reviewer)]
    #[tokio::test]
    async fn stats_are_staff_only(#[case] uri: &str, #[case] role: Role) {
        let token = token_for(7, role);
        let (status, body) = send(test_app(), get(uri, Some(&token))).await;
        assert_eq!(status, 403);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn stats_need_a_token() {
        let (status, _) = send(test_app(), get("/api/stats", None)).await;
        assert_eq!(status, 401);
    }
}
