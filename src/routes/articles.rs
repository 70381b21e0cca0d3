use axum::{
    body::Body,
    extract::{Multipart, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use super::notifications::notify;
use super::{created, message, ok, ok_with_message, ApiJson, ApiPath, ApiQuery};
use crate::auth::{AuthUser, Role};
use crate::db::{
    self,
    articles::{ArticleFilter, Scope, StoredFile},
    Article,
};
use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::storage::Upload;
use crate::workflow::{ArticleState, NotificationKind};

const MAX_TITLE_LEN: usize = 300;

pub fn scope_for(auth: &AuthUser) -> Scope {
    match auth.role {
        Role::Author => Scope::OwnedBy(auth.id),
        Role::Reviewer => Scope::AssignedTo(auth.id),
        Role::Editor | Role::Admin => Scope::All,
    }
}

fn validate_title(title: &str) -> AppResult<String> {
    let title = title.trim();
    if title.is_empty() {
        return Err(AppError::bad_request("Title is required"));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(AppError::bad_request(format!(
            "Title must be at most {} characters",
            MAX_TITLE_LEN
        )));
    }
    Ok(title.to_string())
}

/// Trims keywords and joins them with ", ", dropping empties and duplicates.
pub fn normalize_keywords(raw: &str) -> String {
    let mut seen: Vec<String> = Vec::new();
    for keyword in raw.split([',', ';']).map(str::trim).filter(|k| !k.is_empty()) {
        if !seen.iter().any(|s| s.eq_ignore_ascii_case(keyword)) {
            seen.push(keyword.to_string());
        }
    }
    seen.join(", ")
}

/// Loads an article the caller is allowed to read.
pub async fn load_visible_article(state: &AppState, auth: &AuthUser, id: i32) -> AppResult<Article> {
    let article = db::articles::get_article(state.pool.as_ref(), id)
        .await?
        .ok_or_else(|| AppError::not_found("Article not found"))?;

    let allowed = match auth.role {
        Role::Editor | Role::Admin => true,
        Role::Author => article.author_id == auth.id,
        Role::Reviewer => {
            db::articles::is_assigned_reviewer(state.pool.as_ref(), id, auth.id).await?
        }
    };
    if !allowed {
        return Err(AppError::forbidden("You do not have access to this article"));
    }
    Ok(article)
}

/// Loads an article owned by the caller in a state that allows author edits.
async fn load_editable_article(state: &AppState, auth: &AuthUser, id: i32) -> AppResult<Article> {
    auth.require(&[Role::Author])?;
    let article = db::articles::get_article(state.pool.as_ref(), id)
        .await?
        .ok_or_else(|| AppError::not_found("Article not found"))?;
    if article.author_id != auth.id {
        return Err(AppError::forbidden("Only the author can modify this article"));
    }
    let current: ArticleState = article.state.parse()?;
    if !current.is_editable() {
        return Err(AppError::bad_request(format!(
            "Articles in state '{}' cannot be modified",
            current
        )));
    }
    Ok(article)
}

/// The article left the state it was read in before the write landed.
fn changed_underneath() -> AppError {
    AppError::Conflict("Article changed state while being edited; reload and try again".into())
}

/// Editing a revision-requested article sends it back to the editors.
fn state_after_author_edit(current: ArticleState) -> ArticleState {
    match current {
        ArticleState::MinorRevision | ArticleState::MajorRevision => ArticleState::Submitted,
        other => other,
    }
}

async fn store_upload(state: &AppState, upload: Upload) -> AppResult<StoredFile> {
    let path = state.store.save(&upload).await?;
    let size = upload.size();
    let data = state.store.stores_in_database().then_some(upload.data);
    Ok(StoredFile {
        name: upload.original_name,
        path,
        mimetype: upload.mimetype,
        size,
        data,
    })
}

async fn discard_stored(state: &AppState, path: Option<&str>) {
    if let Some(path) = path {
        if let Err(e) = state.store.delete(path).await {
            tracing::warn!("Could not remove stored file {}: {}", path, e);
        }
    }
}

#[derive(Default)]
struct ArticleForm {
    title: Option<String>,
    summary: Option<String>,
    keywords: Option<String>,
    file: Option<Upload>,
}

async fn read_form(mut multipart: Multipart, max_bytes: usize) -> AppResult<ArticleForm> {
    let mut form = ArticleForm::default();
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "title" => form.title = Some(field.text().await?),
            "summary" => form.summary = Some(field.text().await?),
            "keywords" => form.keywords = Some(field.text().await?),
            "file" => {
                let filename = field.file_name().unwrap_or("article").to_string();
                let content_type = field.content_type().map(str::to_string);
                let data = field.bytes().await?;
                if !data.is_empty() {
                    form.file = Some(Upload::new(
                        &filename,
                        content_type.as_deref(),
                        data.to_vec(),
                        max_bytes,
                    )?);
                }
            }
            _ => {}
        }
    }
    Ok(form)
}

pub async fn create_article(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    multipart: Multipart,
) -> AppResult<(StatusCode, Json<Value>)> {
    auth.require(&[Role::Author])?;
    let form = read_form(multipart, state.config.max_upload_bytes).await?;

    let title = validate_title(form.title.as_deref().unwrap_or(""))?;
    let summary = form.summary.unwrap_or_default().trim().to_string();
    let keywords = normalize_keywords(form.keywords.as_deref().unwrap_or(""));

    let stored = match form.file {
        Some(upload) => Some(store_upload(&state, upload).await?),
        None => None,
    };

    let article = match db::articles::create_article(
        state.pool.as_ref(),
        &title,
        &summary,
        &keywords,
        auth.id,
        stored.as_ref(),
    )
    .await
    {
        Ok(article) => article,
        Err(e) => {
            discard_stored(&state, stored.as_ref().map(|f| f.path.as_str())).await;
            return Err(e.into());
        }
    };
    tracing::info!(article_id = article.id, author_id = auth.id, "Article submitted");

    let editors = staff_ids(&state).await;
    notify(
        &state,
        &editors,
        None,
        NotificationKind::System,
        &format!("New article submitted: \"{}\"", article.title),
        Some(article.id),
    )
    .await;

    Ok(created("Article submitted", article))
}

async fn staff_ids(state: &AppState) -> Vec<i32> {
    let result = async {
        let mut conn = state.pool.acquire().await?;
        db::users::active_ids_with_roles(&mut conn, &["editor"]).await
    }
    .await;
    result.unwrap_or_else(|e| {
        tracing::warn!("Could not load editors for notification: {}", e);
        Vec::new()
    })
}

#[derive(Deserialize)]
pub struct ListQuery {
    state: Option<ArticleState>,
    limit: Option<i64>,
    offset: Option<i64>,
}

pub async fn list_articles(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    ApiQuery(query): ApiQuery<ListQuery>,
) -> AppResult<Json<Value>> {
    let (limit, offset) = db::page_bounds(query.limit, query.offset);
    let filter = ArticleFilter {
        state: query.state,
        ..Default::default()
    };
    let articles =
        db::articles::search_articles(state.pool.as_ref(), scope_for(&auth), &filter, limit, offset)
            .await?;
    Ok(ok(articles))
}

#[derive(Deserialize)]
pub struct SearchQuery {
    q: Option<String>,
    state: Option<ArticleState>,
    author_id: Option<i32>,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
    limit: Option<i64>,
    offset: Option<i64>,
}

pub async fn search_articles(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    ApiQuery(query): ApiQuery<SearchQuery>,
) -> AppResult<Json<Value>> {
    if let (Some(from), Some(to)) = (query.from, query.to) {
        if from > to {
            return Err(AppError::bad_request("'from' must not be after 'to'"));
        }
    }
    let (limit, offset) = db::page_bounds(query.limit, query.offset);
    let filter = ArticleFilter {
        q: query.q,
        state: query.state,
        author_id: query.author_id,
        from: query.from,
        to: query.to,
    };
    let articles =
        db::articles::search_articles(state.pool.as_ref(), scope_for(&auth), &filter, limit, offset)
            .await?;
    Ok(ok(articles))
}

#[derive(Deserialize)]
pub struct PublicQuery {
    q: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

pub async fn published_articles(
    State(state): State<Arc<AppState>>,
    ApiQuery(query): ApiQuery<PublicQuery>,
) -> AppResult<Json<Value>> {
    let (limit, offset) = db::page_bounds(query.limit, query.offset);
    let filter = ArticleFilter {
        q: query.q,
        ..Default::default()
    };
    let articles =
        db::articles::search_articles(state.pool.as_ref(), Scope::Published, &filter, limit, offset)
            .await?;
    Ok(ok(articles))
}

pub async fn get_article(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    ApiPath(id): ApiPath<i32>,
) -> AppResult<Json<Value>> {
    let article = load_visible_article(&state, &auth, id).await?;
    Ok(ok(article))
}

#[derive(Deserialize)]
pub struct UpdateArticleRequest {
    title: Option<String>,
    summary: Option<String>,
    keywords: Option<String>,
}

pub async fn update_article(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    ApiPath(id): ApiPath<i32>,
    ApiJson(req): ApiJson<UpdateArticleRequest>,
) -> AppResult<Json<Value>> {
    let title = req.title.as_deref().map(validate_title).transpose()?;
    let article = load_editable_article(&state, &auth, id).await?;
    let current: ArticleState = article.state.parse()?;
    let next = state_after_author_edit(current);

    let summary = req.summary.as_deref().map(str::trim);
    let keywords = req.keywords.as_deref().map(normalize_keywords);

    let updated = db::articles::update_article(
        state.pool.as_ref(),
        id,
        title.as_deref(),
        summary,
        keywords.as_deref(),
        current,
        next,
    )
    .await?
    .ok_or_else(changed_underneath)?;

    if next.as_str() != article.state {
        tracing::info!(article_id = id, "Revised article resubmitted");
    }
    Ok(ok_with_message("Article updated", updated))
}

pub async fn upload_file(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    ApiPath(id): ApiPath<i32>,
    multipart: Multipart,
) -> AppResult<Json<Value>> {
    let article = load_editable_article(&state, &auth, id).await?;
    let form = read_form(multipart, state.config.max_upload_bytes).await?;
    let upload = form
        .file
        .ok_or_else(|| AppError::bad_request("A 'file' field is required"))?;

    let stored = store_upload(&state, upload).await?;
    let current: ArticleState = article.state.parse()?;
    let next = state_after_author_edit(current);
    let updated = match db::articles::set_file(state.pool.as_ref(), id, &stored, current, next).await {
        Ok(Some(updated)) => updated,
        Ok(None) => {
            discard_stored(&state, Some(&stored.path)).await;
            return Err(changed_underneath());
        }
        Err(e) => {
            discard_stored(&state, Some(&stored.path)).await;
            return Err(e.into());
        }
    };

    discard_stored(&state, article.file_path.as_deref()).await;
    Ok(ok_with_message("File uploaded", updated))
}

pub async fn download_file(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    ApiPath(id): ApiPath<i32>,
) -> AppResult<Response> {
    let article = load_visible_article(&state, &auth, id).await?;
    let path = article
        .file_path
        .as_deref()
        .ok_or_else(|| AppError::not_found("Article has no file"))?;

    let bytes = match state.store.read(path).await? {
        Some(bytes) => bytes,
        None => db::articles::get_file_data(state.pool.as_ref(), id)
            .await?
            .ok_or_else(|| AppError::not_found("Article has no file"))?,
    };

    let mime = article
        .file_mimetype
        .clone()
        .unwrap_or_else(|| "application/octet-stream".to_string());
    let filename = article.file_name.clone().unwrap_or_else(|| "article".to_string());

    Response::builder()
        .header(header::CONTENT_TYPE, mime)
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", filename),
        )
        .body(Body::from(bytes))
        .map(IntoResponse::into_response)
        .map_err(|e| AppError::Internal(e.to_string()))
}

#[derive(Deserialize)]
pub struct ChangeStateRequest {
    state: ArticleState,
    note: Option<String>,
}

pub async fn change_state(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    ApiPath(id): ApiPath<i32>,
    ApiJson(req): ApiJson<ChangeStateRequest>,
) -> AppResult<Json<Value>> {
    auth.require_staff()?;

    let mut tx = state.pool.begin().await?;
    let article = db::articles::lock_article(&mut tx, id)
        .await?
        .ok_or_else(|| AppError::not_found("Article not found"))?;
    let current: ArticleState = article.state.parse()?;
    if !current.can_transition_to(req.state) {
        return Err(AppError::bad_request(format!(
            "Cannot move an article from '{}' to '{}'",
            current, req.state
        )));
    }

    db::articles::set_state(&mut tx, id, req.state).await?;
    let cancelled = if req.state.is_closed() {
        db::reviews::cancel_pending_for_article(&mut tx, id).await?
    } else {
        Vec::new()
    };

    let mut text = format!(
        "Your article \"{}\" is now {}",
        article.title,
        req.state.as_str().replace('_', " ")
    );
    if let Some(note) = req.note.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
        text.push_str(": ");
        text.push_str(note);
    }
    db::notifications::create_notification(
        &mut tx,
        article.author_id,
        NotificationKind::ArticleState,
        &text,
        Some(id),
    )
    .await?;
    db::notifications::notify_many(
        &mut tx,
        &cancelled,
        None,
        NotificationKind::Assignment,
        &format!("Your review of \"{}\" was cancelled", article.title),
        Some(id),
    )
    .await?;
    tx.commit().await?;

    tracing::info!(article_id = id, from = %current, to = %req.state, "Article state changed");
    let updated = db::articles::get_article(state.pool.as_ref(), id)
        .await?
        .ok_or_else(|| AppError::not_found("Article not found"))?;
    Ok(ok_with_message("Article state updated", updated))
}

pub async fn withdraw_article(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    ApiPath(id): ApiPath<i32>,
) -> AppResult<Json<Value>> {
    auth.require(&[Role::Author])?;

    let mut tx = state.pool.begin().await?;
    let article = db::articles::lock_article(&mut tx, id)
        .await?
        .ok_or_else(|| AppError::not_found("Article not found"))?;
    if article.author_id != auth.id {
        return Err(AppError::forbidden("Only the author can withdraw this article"));
    }
    let current: ArticleState = article.state.parse()?;
    if current.is_closed() {
        return Err(AppError::bad_request(format!(
            "Articles in state '{}' cannot be withdrawn",
            current
        )));
    }

    db::articles::set_state(&mut tx, id, ArticleState::Withdrawn).await?;
    let cancelled = db::reviews::cancel_pending_for_article(&mut tx, id).await?;
    db::notifications::notify_many(
        &mut tx,
        &cancelled,
        None,
        NotificationKind::Assignment,
        &format!("\"{}\" was withdrawn by its author; your review was cancelled", article.title),
        Some(id),
    )
    .await?;
    tx.commit().await?;

    tracing::info!(article_id = id, cancelled = cancelled.len(), "Article withdrawn");
    Ok(message("Article withdrawn"))
}

pub async fn delete_article(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    ApiPath(id): ApiPath<i32>,
) -> AppResult<Json<Value>> {
    let article = db::articles::get_article(state.pool.as_ref(), id)
        .await?
        .ok_or_else(|| AppError::not_found("Article not found"))?;

    match auth.role {
        Role::Admin => {}
        Role::Author if article.author_id == auth.id => {
            if article.state != ArticleState::Submitted.as_str()
                || db::articles::review_count(state.pool.as_ref(), id).await? > 0
            {
                return Err(AppError::bad_request(
                    "Only submitted articles without reviews can be deleted",
                ));
            }
        }
        _ => return Err(AppError::forbidden("You cannot delete this article")),
    }

    if !db::articles::delete_article(state.pool.as_ref(), id).await? {
        return Err(AppError::not_found("Article not found"));
    }
    discard_stored(&state, article.file_path.as_deref()).await;

    tracing::info!(article_id = id, by = auth.id, "Article deleted");
    Ok(message("Article deleted"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::test_support::*;
    use rstest::rstest;

    #[rstest]
    #[case("rust, Systems ,rust;  ; sql", "rust, Systems, sql")]
    #[case("", "")]
    #[case("one", "one")]
    fn keywords_are_normalized(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(normalize_keywords(raw), expected);
    }

    #[test]
    fn titles_are_checked() {
        assert!(validate_title("  ").is_err());
        assert!(validate_title(&"x".repeat(MAX_TITLE_LEN + 1)).is_err());
        assert_eq!(validate_title("  A study ").unwrap(), "A study");
    }

    #[rstest]
    #[case(ArticleState::Submitted, ArticleState::Submitted)]
    #[case(ArticleState::MinorRevision, ArticleState::Submitted)]
    #[case(ArticleState::MajorRevision, ArticleState::Submitted)]
    fn author_edits_resubmit(#[case] from: ArticleState, #[case] to: ArticleState) {
        assert_eq!(state_after_author_edit(from), to);
    }

    #[test]
    fn scope_follows_role() {
        let user = |role| AuthUser {
            id: 9,
            role,
        };
        assert_eq!(scope_for(&user(Role::Author)), Scope::OwnedBy(9));
        assert_eq!(scope_for(&user(Role::Reviewer)), Scope::AssignedTo(9));
        assert_eq!(scope_for(&user(Role::Editor)), Scope::All);
        assert_eq!(scope_for(&user(Role::Admin)), Scope::All);
    }

    #[tokio::test]
    async fn reviewers_cannot_submit_articles() {
        let token = token_for(2, Role::Reviewer);
        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/api/articles")
            .header("Authorization", format!("Bearer {}", token))
            .header("Content-Type", "multipart/form-data; boundary=X")
            .body(axum::body::Body::from("--X--\r\n"))
            .unwrap();
        let (status, _) = send(test_app(), request).await;
        assert_eq!(status, 403);
    }

    #[tokio::test]
    async fn authors_cannot_change_state() {
        let token = token_for(2, Role::Author);
        let (status, _) = send(
            test_app(),
            json(
                "PATCH",
                "/api/articles/5/state",
                Some(&token),
                r#"{"state":"published"}"#,
            ),
        )
        .await;
        assert_eq!(status, 403);
    }

    #[tokio::test]
    async fn unknown_state_value_is_bad_request() {
        let token = token_for(2, Role::Editor);
        let (status, _) = send(
            test_app(),
            json(
                "PATCH",
                "/api/articles/5/state",
                Some(&token),
                r#"{"state":"draft"}"#,
            ),
        )
        .await;
        assert_eq!(status, 400);
    }

    #[tokio::test]
    async fn search_rejects_inverted_dates() {
        let token = token_for(2, Role::Editor);
        let (status, body) = send(
            test_app(),
            get(
                "/api/articles/search?from=2024-05-01&to=2024-01-01",
                Some(&token),
            ),
        )
        .await;
        assert_eq!(status, 400);
        assert_eq!(body["mensaje"], "'from' must not be after 'to'");
    }

    #[tokio::test]
    async fn search_rejects_unknown_state_filter() {
        let token = token_for(2, Role::Author);
        let (status, _) = send(
            test_app(),
            get("/api/articles/search?state=lost", Some(&token)),
        )
        .await;
        assert_eq!(status, 400);
    }
}
