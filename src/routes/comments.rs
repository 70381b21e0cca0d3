use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use super::notifications::notify;
use super::{created, ok, ok_with_message, ApiJson, ApiPath, ApiQuery};
use crate::auth::{AuthUser, Role};
use crate::db::{self, Comment, ReviewParticipants};
use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::workflow::{CommentState, NotificationKind, ReviewState, Visibility};

const MAX_COMMENT_LEN: usize = 10_000;

#[derive(Debug, Clone, Serialize)]
pub struct CommentNode {
    #[serde(flatten)]
    pub comment: Comment,
    pub replies: Vec<CommentNode>,
}

/// Replies nested deeper than this are shown as siblings of their parent.
pub const MAX_THREAD_DEPTH: usize = 8;

/// Nests comments under the comment they reply to.
///
/// Deleted comments (and resolved ones when `include_resolved` is false)
/// disappear unless a visible reply hangs under them, in which case they stay
/// as an empty placeholder. A reply whose parent is not in `comments` becomes
/// a root. Works without recursion so reply chains of any length are safe.
pub fn build_threads(comments: Vec<Comment>, include_resolved: bool) -> Vec<CommentNode> {
    let count = comments.len();
    let index: HashMap<i32, usize> = comments.iter().enumerate().map(|(i, c)| (c.id, i)).collect();
    let parent_of: Vec<Option<usize>> = comments
        .iter()
        .map(|c| c.reply_to.and_then(|p| index.get(&p).copied()))
        .collect();

    // (parent slot, depth) per comment; depth 0 is a root.
    let mut placement: Vec<Option<(Option<usize>, usize)>> = vec![None; count];
    let mut on_path = vec![false; count];
    for start in 0..count {
        let mut path = Vec::new();
        let mut cursor = Some(start);
        while let Some(i) = cursor {
            if placement[i].is_some() || on_path[i] {
                break;
            }
            on_path[i] = true;
            path.push(i);
            cursor = parent_of[i];
        }
        for &i in path.iter().rev() {
            on_path[i] = false;
            placement[i] = Some(match parent_of[i].and_then(|p| placement[p].map(|pl| (p, pl))) {
                Some((p, (_, depth))) if depth < MAX_THREAD_DEPTH => (Some(p), depth + 1),
                Some((_, (grandparent, depth))) => (grandparent, depth),
                // Unplaced parent means a reply cycle; cut it here.
                None => (None, 0),
            });
        }
    }

    let mut order: Vec<usize> = (0..count).collect();
    order.sort_by_key(|&i| std::cmp::Reverse(placement[i].map_or(0, |(_, depth)| depth)));

    let mut slots: Vec<Option<Comment>> = comments.into_iter().map(Some).collect();
    let mut pending: Vec<Vec<(usize, CommentNode)>> = (0..count).map(|_| Vec::new()).collect();
    let mut roots: Vec<(usize, CommentNode)> = Vec::new();

    for i in order {
        let Some(mut comment) = slots[i].take() else {
            continue;
        };
        let mut children = std::mem::take(&mut pending[i]);
        children.sort_by_key(|(pos, _)| *pos);
        let replies: Vec<CommentNode> = children.into_iter().map(|(_, node)| node).collect();

        let hidden = comment.state == CommentState::Deleted.as_str()
            || (!include_resolved && comment.state == CommentState::Resolved.as_str());
        if hidden {
            if replies.is_empty() {
                continue;
            }
            comment.content = String::new();
        }

        let node = CommentNode { comment, replies };
        match placement[i].and_then(|(parent, _)| parent) {
            Some(parent) => pending[parent].push((i, node)),
            None => roots.push((i, node)),
        }
    }

    roots.sort_by_key(|(pos, _)| *pos);
    roots.into_iter().map(|(_, node)| node).collect()
}

/// Authors read reviewer comments without learning who the reviewer is.
pub fn redact_reviewer(comments: &mut [Comment], reviewer_id: i32) {
    for comment in comments.iter_mut().filter(|c| c.author_id == Some(reviewer_id)) {
        comment.author_id = None;
        comment.author_name = "Reviewer".to_string();
    }
}

/// Confirms the caller takes part in the review.
fn check_participant(auth: &AuthUser, review: &ReviewParticipants) -> AppResult<()> {
    let allowed = match auth.role {
        Role::Editor | Role::Admin => true,
        Role::Author => review.article_author_id == auth.id,
        Role::Reviewer => review.reviewer_id == auth.id,
    };
    if allowed {
        Ok(())
    } else {
        Err(AppError::forbidden("You are not a participant of this review"))
    }
}

/// Everyone who should hear about a new comment in `tier`, poster excluded.
pub fn comment_audience(review: &ReviewParticipants, tier: Visibility, poster: i32) -> Vec<i32> {
    let mut audience = Vec::new();
    if tier.is_readable_by(Role::Author) {
        audience.push(review.article_author_id);
    }
    if tier.is_readable_by(Role::Reviewer) {
        audience.push(review.reviewer_id);
    }
    if let Some(editor) = review.assigned_by {
        audience.push(editor);
    }
    audience.retain(|id| *id != poster);
    audience.dedup();
    audience
}

async fn load_participants(state: &AppState, auth: &AuthUser, review_id: i32) -> AppResult<ReviewParticipants> {
    let review = db::reviews::participants(state.pool.as_ref(), review_id)
        .await?
        .ok_or_else(|| AppError::not_found("Review not found"))?;
    check_participant(auth, &review)?;
    Ok(review)
}

fn validate_content(content: &str) -> AppResult<&str> {
    let content = content.trim();
    if content.is_empty() {
        return Err(AppError::bad_request("Comment content is required"));
    }
    if content.chars().count() > MAX_COMMENT_LEN {
        return Err(AppError::bad_request("Comment is too long"));
    }
    Ok(content)
}

#[derive(Deserialize)]
pub struct CreateCommentRequest {
    content: String,
    #[serde(default = "default_visibility")]
    visibility: Visibility,
    reply_to: Option<i32>,
}

fn default_visibility() -> Visibility {
    Visibility::Public
}

pub async fn create_comment(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    ApiPath(review_id): ApiPath<i32>,
    ApiJson(req): ApiJson<CreateCommentRequest>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let content = validate_content(&req.content)?;
    if !req.visibility.is_readable_by(auth.role) {
        return Err(AppError::forbidden(format!(
            "Role '{}' cannot post {} comments",
            auth.role,
            req.visibility.as_str()
        )));
    }

    let review = load_participants(&state, &auth, review_id).await?;
    if review.review_state == ReviewState::Cancelled.as_str() {
        return Err(AppError::bad_request("Cannot comment on a cancelled review"));
    }

    if let Some(parent_id) = req.reply_to {
        let parent = db::comments::get_comment(state.pool.as_ref(), parent_id)
            .await?
            .filter(|p| p.review_id == review_id)
            .ok_or_else(|| AppError::bad_request("Reply target is not a comment on this review"))?;
        let parent_tier: Visibility = parent.visibility.parse()?;
        if parent.state == CommentState::Deleted.as_str() || !parent_tier.is_readable_by(auth.role) {
            return Err(AppError::bad_request("Cannot reply to this comment"));
        }
        if req.visibility < parent_tier {
            return Err(AppError::bad_request(format!(
                "A reply to a {} comment cannot be {}",
                parent_tier.as_str(),
                req.visibility.as_str()
            )));
        }
    }

    let comment = db::comments::insert_comment(
        state.pool.as_ref(),
        review_id,
        auth.id,
        content,
        req.visibility,
        req.reply_to,
    )
    .await?;

    let audience = comment_audience(&review, req.visibility, auth.id);
    notify(
        &state,
        &audience,
        Some(auth.id),
        NotificationKind::Comment,
        &format!(
            "New {} comment on review #{}",
            req.visibility.as_str(),
            review_id
        ),
        Some(review.article_id),
    )
    .await;

    Ok(created("Comment added", comment))
}

#[derive(Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_true")]
    include_resolved: bool,
}

fn default_true() -> bool {
    true
}

pub async fn list_comments(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    ApiPath(review_id): ApiPath<i32>,
    ApiQuery(query): ApiQuery<ListQuery>,
) -> AppResult<Json<Value>> {
    let review = load_participants(&state, &auth, review_id).await?;
    let tiers = Visibility::readable_by(auth.role);
    let mut comments = db::comments::list_for_review(state.pool.as_ref(), review_id, tiers).await?;
    if auth.role == Role::Author {
        redact_reviewer(&mut comments, review.reviewer_id);
    }
    Ok(ok(build_threads(comments, query.include_resolved)))
}

/// Loads a comment the caller may moderate: its author, or an editor/admin.
async fn load_own_comment(
    state: &AppState,
    auth: &AuthUser,
    id: i32,
    staff_allowed: bool,
) -> AppResult<Comment> {
    let comment = db::comments::get_comment(state.pool.as_ref(), id)
        .await?
        .filter(|c| c.state != CommentState::Deleted.as_str())
        .ok_or_else(|| AppError::not_found("Comment not found"))?;
    if comment.author_id != Some(auth.id) && !(staff_allowed && auth.is_staff()) {
        return Err(AppError::forbidden("You cannot modify this comment"));
    }
    Ok(comment)
}

#[derive(Deserialize)]
pub struct EditCommentRequest {
    content: String,
}

pub async fn edit_comment(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    ApiPath(id): ApiPath<i32>,
    ApiJson(req): ApiJson<EditCommentRequest>,
) -> AppResult<Json<Value>> {
    let content = validate_content(&req.content)?;
    load_own_comment(&state, &auth, id, false).await?;
    let comment = db::comments::update_content(state.pool.as_ref(), id, content)
        .await?
        .ok_or_else(|| AppError::bad_request("Only active comments can be edited"))?;
    Ok(ok_with_message("Comment updated", comment))
}

pub async fn resolve_comment(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    ApiPath(id): ApiPath<i32>,
) -> AppResult<Json<Value>> {
    load_own_comment(&state, &auth, id, true).await?;
    let comment = db::comments::set_state(state.pool.as_ref(), id, CommentState::Resolved)
        .await?
        .ok_or_else(|| AppError::not_found("Comment not found"))?;
    Ok(ok_with_message("Comment resolved", comment))
}

pub async fn delete_comment(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    ApiPath(id): ApiPath<i32>,
) -> AppResult<Json<Value>> {
    load_own_comment(&state, &auth, id, true).await?;
    db::comments::set_state(state.pool.as_ref(), id, CommentState::Deleted)
        .await?
        .ok_or_else(|| AppError::not_found("Comment not found"))?;
    tracing::info!(comment_id = id, by = auth.id, "Comment deleted");
    Ok(super::message("Comment deleted"))
}
