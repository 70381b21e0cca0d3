use chrono::NaiveDate;
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};

use super::Article;
use crate::workflow::ArticleState;

const ARTICLE_COLUMNS: &str = r#"
    a.id, a.title, a.summary, a.keywords, a.author_id, u.name AS author_name, a.state,
    a.file_name, a.file_path, a.file_mimetype, a.file_size,
    a.created_at, a.updated_at, a.published_at
"#;

/// Which articles a caller may see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    All,
    OwnedBy(i32),
    AssignedTo(i32),
    Published,
}

#[derive(Debug, Default, Clone)]
pub struct ArticleFilter {
    pub q: Option<String>,
    pub state: Option<ArticleState>,
    pub author_id: Option<i32>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

/// File metadata (and, for the database backend, bytes) to attach to a row.
#[derive(Debug, Clone)]
pub struct StoredFile {
    pub name: String,
    pub path: String,
    pub mimetype: String,
    pub size: i64,
    pub data: Option<Vec<u8>>,
}

pub async fn create_article(
    pool: &PgPool,
    title: &str,
    summary: &str,
    keywords: &str,
    author_id: i32,
    file: Option<&StoredFile>,
) -> Result<Article, sqlx::Error> {
    sqlx::query_as::<_, Article>(&format!(
        r#"
        WITH a AS (
            INSERT INTO articles (title, summary, keywords, author_id, state,
                                  file_name, file_path, file_mimetype, file_size, file_data)
            VALUES ($1, $2, $3, $4, 'submitted', $5, $6, $7, $8, $9)
            RETURNING *
        )
        SELECT {} FROM a JOIN users u ON u.id = a.author_id
        "#,
        ARTICLE_COLUMNS
    ))
    .bind(title)
    .bind(summary)
    .bind(keywords)
    .bind(author_id)
    .bind(file.map(|f| f.name.as_str()))
    .bind(file.map(|f| f.path.as_str()))
    .bind(file.map(|f| f.mimetype.as_str()))
    .bind(file.map(|f| f.size))
    .bind(file.and_then(|f| f.data.as_deref()))
    .fetch_one(pool)
    .await
}

pub async fn get_article(pool: &PgPool, id: i32) -> Result<Option<Article>, sqlx::Error> {
    sqlx::query_as::<_, Article>(&format!(
        "SELECT {} FROM articles a JOIN users u ON u.id = a.author_id WHERE a.id = $1",
        ARTICLE_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
}

/// Loads and row-locks an article inside a transaction.
pub async fn lock_article(conn: &mut PgConnection, id: i32) -> Result<Option<Article>, sqlx::Error> {
    sqlx::query_as::<_, Article>(&format!(
        "SELECT {} FROM articles a JOIN users u ON u.id = a.author_id WHERE a.id = $1 FOR UPDATE OF a",
        ARTICLE_COLUMNS
    ))
    .bind(id)
    .fetch_optional(conn)
    .await
}

/// Listing and search share one query; an empty filter is a plain listing.
pub async fn search_articles(
    pool: &PgPool,
    scope: Scope,
    filter: &ArticleFilter,
    limit: i64,
    offset: i64,
) -> Result<Vec<Article>, sqlx::Error> {
    let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(format!(
        "SELECT {} FROM articles a JOIN users u ON u.id = a.author_id WHERE 1 = 1",
        ARTICLE_COLUMNS
    ));

    match scope {
        Scope::All => {}
        Scope::OwnedBy(user_id) => {
            qb.push(" AND a.author_id = ").push_bind(user_id);
        }
        Scope::AssignedTo(user_id) => {
            qb.push(
                " AND EXISTS (SELECT 1 FROM reviews r WHERE r.article_id = a.id \
                 AND r.state <> 'cancelled' AND r.reviewer_id = ",
            )
            .push_bind(user_id)
            .push(")");
        }
        Scope::Published => {
            qb.push(" AND a.state = 'published'");
        }
    }

    if let Some(q) = filter.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
        let pattern = format!("%{}%", escape_like(q));
        qb.push(" AND (a.title ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR a.summary ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR a.keywords ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if let Some(state) = filter.state {
        qb.push(" AND a.state = ").push_bind(state.as_str());
    }
    if let Some(author_id) = filter.author_id {
        qb.push(" AND a.author_id = ").push_bind(author_id);
    }
    if let Some(from) = filter.from {
        qb.push(" AND a.created_at >= ").push_bind(from);
    }
    if let Some(to) = filter.to {
        // Inclusive of the whole `to` day.
        qb.push(" AND a.created_at < ")
            .push_bind(to)
            .push(" + INTERVAL '1 day'");
    }

    qb.push(" ORDER BY a.created_at DESC, a.id DESC LIMIT ")
        .push_bind(limit)
        .push(" OFFSET ")
        .push_bind(offset);

    let articles = qb.build_query_as::<Article>().fetch_all(pool).await?;
    Ok(articles)
}

/// `%` and `_` in user input match literally.
pub fn escape_like(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

pub async fn update_article(
    pool: &PgPool,
    id: i32,
    title: Option<&str>,
    summary: Option<&str>,
    keywords: Option<&str>,
    from: ArticleState,
    to: ArticleState,
) -> Result<Option<Article>, sqlx::Error> {
    sqlx::query_as::<_, Article>(&format!(
        r#"
        WITH a AS (
            UPDATE articles
            SET title = COALESCE($2, title),
                summary = COALESCE($3, summary),
                keywords = COALESCE($4, keywords),
                state = $5,
                updated_at = NOW()
            WHERE id = $1 AND state = $6
            RETURNING *
        )
        SELECT {} FROM a JOIN users u ON u.id = a.author_id
        "#,
        ARTICLE_COLUMNS
    ))
    .bind(id)
    .bind(title)
    .bind(summary)
    .bind(keywords)
    .bind(to.as_str())
    .bind(from.as_str())
    .fetch_optional(pool)
    .await
}

pub async fn set_file(
    pool: &PgPool,
    id: i32,
    file: &StoredFile,
    from: ArticleState,
    to: ArticleState,
) -> Result<Option<Article>, sqlx::Error> {
    sqlx::query_as::<_, Article>(&format!(
        r#"
        WITH a AS (
            UPDATE articles
            SET file_name = $2, file_path = $3, file_mimetype = $4, file_size = $5,
                file_data = $6, state = $7, updated_at = NOW()
            WHERE id = $1 AND state = $8
            RETURNING *
        )
        SELECT {} FROM a JOIN users u ON u.id = a.author_id
        "#,
        ARTICLE_COLUMNS
    ))
    .bind(id)
    .bind(&file.name)
    .bind(&file.path)
    .bind(&file.mimetype)
    .bind(file.size)
    .bind(file.data.as_deref())
    .bind(to.as_str())
    .bind(from.as_str())
    .fetch_optional(pool)
    .await
}

pub async fn get_file_data(pool: &PgPool, id: i32) -> Result<Option<Vec<u8>>, sqlx::Error> {
    let data: Option<Option<Vec<u8>>> =
        sqlx::query_scalar("SELECT file_data FROM articles WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?;
    Ok(data.flatten())
}

pub async fn set_state(
    conn: &mut PgConnection,
    id: i32,
    state: ArticleState,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE articles
        SET state = $2,
            updated_at = NOW(),
            published_at = CASE WHEN $2 = 'published' THEN NOW() ELSE published_at END
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(state.as_str())
    .execute(conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn delete_article(pool: &PgPool, id: i32) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM articles WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Reviewer has a non-cancelled assignment on the article.
pub async fn is_assigned_reviewer(
    pool: &PgPool,
    article_id: i32,
    reviewer_id: i32,
) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar::<_, bool>(
        r#"
        SELECT EXISTS (
            SELECT 1 FROM reviews
            WHERE article_id = $1 AND reviewer_id = $2 AND state <> 'cancelled'
        )
        "#,
    )
    .bind(article_id)
    .bind(reviewer_id)
    .fetch_one(pool)
    .await
}

pub async fn review_count(pool: &PgPool, article_id: i32) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM reviews WHERE article_id = $1")
        .bind(article_id)
        .fetch_one(pool)
        .await
}

#[cfg(test)]
mod tests {
    use super::escape_like;

    #[test]
    fn escapes_like_wildcards() {
        assert_eq!(escape_like("100%_done"), "100\\%\\_done");
        assert_eq!(escape_like("a\\b"), "a\\\\b");
        assert_eq!(escape_like("plain words"), "plain words");
    }
}
