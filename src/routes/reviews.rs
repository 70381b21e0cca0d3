use axum::{extract::State, http::StatusCode, Json};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::PgConnection;
use std::sync::Arc;

use super::articles::load_visible_article;
use super::{created, ok, ok_with_message, ApiJson, ApiPath, ApiQuery};
use crate::auth::{AuthUser, Role};
use crate::db::{self, reviews::ReviewFilter, Article, BlindReview, Review};
use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::workflow::{
    aggregate_recommendations, ArticleState, NotificationKind, Recommendation, ReviewState,
};

fn validate_rating(rating: i32) -> AppResult<i32> {
    if (1..=5).contains(&rating) {
        Ok(rating)
    } else {
        Err(AppError::bad_request("Rating must be between 1 and 5"))
    }
}

/// Decides where an in-review article goes once its reviews change.
///
/// Returns `None` while reviews are still pending or when the article is no
/// longer in review. With every assignment cancelled the article goes back
/// to `submitted`.
pub fn settle(
    current: ArticleState,
    pending: i64,
    completed: &[Recommendation],
) -> Option<ArticleState> {
    if current != ArticleState::InReview || pending > 0 {
        return None;
    }
    if completed.is_empty() {
        return Some(ArticleState::Submitted);
    }
    Some(aggregate_recommendations(completed))
}

/// Applies [`settle`] inside the caller's transaction and notifies the author.
async fn settle_article(conn: &mut PgConnection, article: &Article) -> AppResult<Option<ArticleState>> {
    let current: ArticleState = article.state.parse()?;
    let pending = db::reviews::count_in_state(&mut *conn, article.id, ReviewState::Pending).await?;
    let completed = db::reviews::completed_recommendations(&mut *conn, article.id)
        .await?
        .iter()
        .map(|r| r.parse::<Recommendation>())
        .collect::<Result<Vec<_>, _>>()?;

    let Some(next) = settle(current, pending, &completed) else {
        return Ok(None);
    };

    db::articles::set_state(&mut *conn, article.id, next).await?;
    db::notifications::create_notification(
        &mut *conn,
        article.author_id,
        NotificationKind::ArticleState,
        &format!(
            "Review of \"{}\" finished: {}",
            article.title,
            next.as_str().replace('_', " ")
        ),
        Some(article.id),
    )
    .await?;
    tracing::info!(
        article_id = article.id,
        reviews = completed.len(),
        outcome = %next,
        "Article review settled"
    );
    Ok(Some(next))
}

#[derive(Deserialize)]
pub struct AssignRequest {
    article_id: i32,
    reviewer_id: i32,
    due_date: Option<NaiveDate>,
}

pub async fn assign_reviewer(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    ApiJson(req): ApiJson<AssignRequest>,
) -> AppResult<(StatusCode, Json<Value>)> {
    auth.require_staff()?;

    let reviewer = db::users::get_user(state.pool.as_ref(), req.reviewer_id)
        .await?
        .ok_or_else(|| AppError::not_found("Reviewer not found"))?;
    if reviewer.role != Role::Reviewer.as_str() || !reviewer.active {
        return Err(AppError::bad_request("User is not an active reviewer"));
    }

    let mut tx = state.pool.begin().await?;
    let article = db::articles::lock_article(&mut tx, req.article_id)
        .await?
        .ok_or_else(|| AppError::not_found("Article not found"))?;
    let current: ArticleState = article.state.parse()?;
    if current.is_closed() {
        return Err(AppError::bad_request(format!(
            "Cannot assign reviewers to an article in state '{}'",
            current
        )));
    }
    if article.author_id == reviewer.id {
        return Err(AppError::bad_request("Authors cannot review their own article"));
    }
    if db::reviews::has_active_assignment(&mut tx, article.id, reviewer.id).await? {
        return Err(AppError::Conflict(
            "Reviewer is already assigned to this article".into(),
        ));
    }

    let review_id = match db::reviews::insert_review(
        &mut tx,
        article.id,
        reviewer.id,
        auth.id,
        req.due_date,
    )
    .await
    {
        Ok(id) => id,
        Err(e) if db::is_unique_violation(&e) => {
            return Err(AppError::Conflict(
                "Reviewer is already assigned to this article".into(),
            ))
        }
        Err(e) => return Err(e.into()),
    };

    if current != ArticleState::InReview {
        db::articles::set_state(&mut tx, article.id, ArticleState::InReview).await?;
    }

    let mut text = format!("You have been assigned to review \"{}\"", article.title);
    if let Some(due) = req.due_date {
        text.push_str(&format!(" (due {})", due));
    }
    db::notifications::create_notification(
        &mut tx,
        reviewer.id,
        NotificationKind::Assignment,
        &text,
        Some(article.id),
    )
    .await?;

    let review = db::reviews::fetch_review(&mut tx, review_id)
        .await?
        .ok_or_else(|| AppError::Internal("assigned review vanished".into()))?;
    tx.commit().await?;

    tracing::info!(
        review_id,
        article_id = article.id,
        reviewer_id = reviewer.id,
        editor_id = auth.id,
        "Reviewer assigned"
    );
    Ok(created("Reviewer assigned", review))
}

#[derive(Deserialize)]
pub struct ListQuery {
    state: Option<ReviewState>,
    article_id: Option<i32>,
    reviewer_id: Option<i32>,
    limit: Option<i64>,
    offset: Option<i64>,
}

pub async fn list_reviews(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    ApiQuery(query): ApiQuery<ListQuery>,
) -> AppResult<Json<Value>> {
    let reviewer_id = match auth.role {
        Role::Reviewer => Some(auth.id),
        Role::Editor | Role::Admin => query.reviewer_id,
        Role::Author => {
            return Err(AppError::forbidden(
                "Authors see reviews through their articles",
            ))
        }
    };
    let filter = ReviewFilter {
        reviewer_id,
        article_id: query.article_id,
        state: query.state,
    };
    let (limit, offset) = db::page_bounds(query.limit, query.offset);
    let reviews = db::reviews::list_reviews(state.pool.as_ref(), &filter, limit, offset).await?;
    Ok(ok(reviews))
}

async fn load_review_for(state: &AppState, auth: &AuthUser, id: i32) -> AppResult<Review> {
    let review = db::reviews::get_review(state.pool.as_ref(), id)
        .await?
        .ok_or_else(|| AppError::not_found("Review not found"))?;
    if !auth.is_staff() && review.reviewer_id != auth.id {
        return Err(AppError::forbidden("You do not have access to this review"));
    }
    Ok(review)
}

pub async fn get_review(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    ApiPath(id): ApiPath<i32>,
) -> AppResult<Json<Value>> {
    let review = load_review_for(&state, &auth, id).await?;
    Ok(ok(review))
}

pub async fn article_reviews(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    ApiPath(article_id): ApiPath<i32>,
) -> AppResult<Json<Value>> {
    load_visible_article(&state, &auth, article_id).await?;

    match auth.role {
        Role::Editor | Role::Admin => {
            let reviews =
                db::reviews::reviews_for_article(state.pool.as_ref(), article_id, false).await?;
            Ok(ok(reviews))
        }
        Role::Reviewer => {
            let reviews: Vec<Review> =
                db::reviews::reviews_for_article(state.pool.as_ref(), article_id, false)
                    .await?
                    .into_iter()
                    .filter(|r| r.reviewer_id == auth.id)
                    .collect();
            Ok(ok(reviews))
        }
        Role::Author => {
            let reviews: Vec<BlindReview> =
                db::reviews::reviews_for_article(state.pool.as_ref(), article_id, true)
                    .await?
                    .into_iter()
                    .map(BlindReview::from)
                    .collect();
            Ok(ok(reviews))
        }
    }
}

#[derive(Deserialize)]
pub struct ReviewBody {
    recommendation: Option<Recommendation>,
    rating: Option<i32>,
    observations: Option<String>,
}

pub async fn save_draft(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    ApiPath(id): ApiPath<i32>,
    ApiJson(req): ApiJson<ReviewBody>,
) -> AppResult<Json<Value>> {
    auth.require(&[Role::Reviewer])?;
    let rating = req.rating.map(validate_rating).transpose()?;

    let review = load_review_for(&state, &auth, id).await?;
    if review.state != ReviewState::Pending.as_str() {
        return Err(AppError::bad_request("Only pending reviews can be edited"));
    }

    if !db::reviews::save_draft(
        state.pool.as_ref(),
        id,
        rating,
        req.recommendation,
        req.observations.as_deref(),
    )
    .await?
    {
        return Err(AppError::bad_request("Only pending reviews can be edited"));
    }

    let review = db::reviews::get_review(state.pool.as_ref(), id)
        .await?
        .ok_or_else(|| AppError::not_found("Review not found"))?;
    Ok(ok_with_message("Draft saved", review))
}

pub async fn complete_review(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    ApiPath(id): ApiPath<i32>,
    ApiJson(req): ApiJson<ReviewBody>,
) -> AppResult<Json<Value>> {
    auth.require(&[Role::Reviewer])?;

    let draft = load_review_for(&state, &auth, id).await?;

    let mut tx = state.pool.begin().await?;
    let article = db::articles::lock_article(&mut tx, draft.article_id)
        .await?
        .ok_or_else(|| AppError::not_found("Article not found"))?;
    let review = db::reviews::lock_review(&mut tx, id)
        .await?
        .ok_or_else(|| AppError::not_found("Review not found"))?;
    if review.state != ReviewState::Pending.as_str() {
        return Err(AppError::bad_request("Review is not pending"));
    }

    let recommendation = match req.recommendation {
        Some(r) => r,
        None => review
            .recommendation
            .as_deref()
            .ok_or_else(|| AppError::bad_request("A recommendation is required"))?
            .parse::<Recommendation>()?,
    };
    let rating = req
        .rating
        .or(review.rating)
        .ok_or_else(|| AppError::bad_request("A rating is required"))
        .and_then(validate_rating)?;

    db::reviews::complete_review(
        &mut tx,
        id,
        rating,
        recommendation,
        req.observations.as_deref(),
    )
    .await?;

    db::notifications::create_notification(
        &mut tx,
        article.author_id,
        NotificationKind::ReviewCompleted,
        &format!("A review of \"{}\" has been completed", article.title),
        Some(article.id),
    )
    .await?;
    if let Some(editor_id) = review.assigned_by {
        db::notifications::create_notification(
            &mut tx,
            editor_id,
            NotificationKind::ReviewCompleted,
            &format!(
                "{} completed the review of \"{}\" ({})",
                review.reviewer_name,
                article.title,
                recommendation.as_str().replace('_', " ")
            ),
            Some(article.id),
        )
        .await?;
    }

    let outcome = settle_article(&mut tx, &article).await?;
    let review = db::reviews::fetch_review(&mut tx, id)
        .await?
        .ok_or_else(|| AppError::not_found("Review not found"))?;
    tx.commit().await?;

    tracing::info!(
        review_id = id,
        article_id = article.id,
        recommendation = recommendation.as_str(),
        "Review completed"
    );
    Ok(ok_with_message(
        "Review completed",
        json!({ "review": review, "article_state": outcome }),
    ))
}

pub async fn cancel_review(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    ApiPath(id): ApiPath<i32>,
) -> AppResult<Json<Value>> {
    auth.require_staff()?;

    let existing = db::reviews::get_review(state.pool.as_ref(), id)
        .await?
        .ok_or_else(|| AppError::not_found("Review not found"))?;

    let mut tx = state.pool.begin().await?;
    let article = db::articles::lock_article(&mut tx, existing.article_id)
        .await?
        .ok_or_else(|| AppError::not_found("Article not found"))?;
    if !db::reviews::cancel_review(&mut tx, id).await? {
        return Err(AppError::bad_request("Only pending reviews can be cancelled"));
    }

    db::notifications::create_notification(
        &mut tx,
        existing.reviewer_id,
        NotificationKind::Assignment,
        &format!("Your review of \"{}\" was cancelled", article.title),
        Some(article.id),
    )
    .await?;
    let outcome = settle_article(&mut tx, &article).await?;
    tx.commit().await?;

    tracing::info!(review_id = id, article_id = article.id, "Review cancelled");
    Ok(ok_with_message(
        "Review cancelled",
        json!({ "review_id": id, "article_state": outcome }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::test_support::*;
    use rstest::rstest;
    use Recommendation::*;

    #[rstest]
    #[case(ArticleState::InReview, 1, &[Accept], None)]
    #[case(ArticleState::InReview, 0, &[Accept, Accept], Some(ArticleState::Approved))]
    #[case(ArticleState::InReview, 0, &[Accept, Reject], Some(ArticleState::Rejected))]
    #[case(ArticleState::InReview, 0, &[Accept], Some(ArticleState::MinorRevision))]
    #[case(ArticleState::InReview, 0, &[], Some(ArticleState::Submitted))]
    #[case(ArticleState::Approved, 0, &[Accept, Accept], None)]
    #[case(ArticleState::Rejected, 0, &[Reject], None)]
    fn settles_articles(
        #[case] current: ArticleState,
        #[case] pending: i64,
        #[case] completed: &[Recommendation],
        #[case] expected: Option<ArticleState>,
    ) {
        assert_eq!(settle(current, pending, completed), expected);
    }

    #[rstest]
    #[case(0, false)]
    #[case(1, true)]
    #[case(5, true)]
    #[case(6, false)]
    fn ratings_are_bounded(#[case] rating: i32, #[case] valid: bool) {
        assert_eq!(validate_rating(rating).is_ok(), valid);
    }

    #[tokio::test]
    async fn reviewers_cannot_assign() {
        let token = token_for(3, Role::Reviewer);
        let (status, _) = send(
            test_app(),
            json(
                "POST",
                "/api/reviews",
                Some(&token),
                r#"{"article_id":1,"reviewer_id":3}"#,
            ),
        )
        .await;
        assert_eq!(status, 403);
    }

    #[tokio::test]
    async fn authors_cannot_list_reviews() {
        let token = token_for(3, Role::Author);
        let (status, _) = send(test_app(), get("/api/reviews", Some(&token))).await;
        assert_eq!(status, 403);
    }

    #[tokio::test]
    async fn editors_cannot_complete_reviews() {
        let token = token_for(3, Role::Editor);
        let (status, _) = send(
            test_app(),
            json(
                "POST",
                "/api/reviews/1/complete",
                Some(&token),
                r#"{"recommendation":"accept","rating":4}"#,
            ),
        )
        .await;
        assert_eq!(status, 403);
    }

    #[tokio::test]
    async fn out_of_range_rating_is_rejected_before_lookup() {
        let token = token_for(3, Role::Reviewer);
        let (status, body) = send(
            test_app(),
            json("PUT", "/api/reviews/1", Some(&token), r#"{"rating":9}"#),
        )
        .await;
        assert_eq!(status, 400);
        assert_eq!(body["mensaje"], "Rating must be between 1 and 5");
    }

    #[tokio::test]
    async fn unknown_recommendation_is_bad_request() {
        let token = token_for(3, Role::Reviewer);
        let (status, _) = send(
            test_app(),
            json(
                "PUT",
                "/api/reviews/1",
                Some(&token),
                r#"{"recommendation":"maybe"}"#,
            ),
        )
        .await;
        assert_eq!(status, 400);
    }
}
