use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};

use super::{ReviewerWorkload, User};

const USER_COLUMNS: &str = "id, name, email, password_hash, role, active, created_at, updated_at";

pub async fn create_user(
    pool: &PgPool,
    name: &str,
    email: &str,
    password_hash: &str,
    role: &str,
) -> Result<User, sqlx::Error> {
    sqlx::query_as::<_, User>(&format!(
        r#"
        INSERT INTO users (name, email, password_hash, role, active)
        VALUES ($1, $2, $3, $4, true)
        RETURNING {}
        "#,
        USER_COLUMNS
    ))
    .bind(name)
    .bind(email)
    .bind(password_hash)
    .bind(role)
    .fetch_one(pool)
    .await
}

pub async fn get_user(pool: &PgPool, id: i32) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>(&format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS))
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Role and active flag, read on every authenticated request.
pub async fn account_standing(pool: &PgPool, id: i32) -> Result<Option<(String, bool)>, sqlx::Error> {
    sqlx::query_as::<_, (String, bool)>("SELECT role, active FROM users WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn get_user_by_email(pool: &PgPool, email: &str) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>(&format!(
        "SELECT {} FROM users WHERE email = $1",
        USER_COLUMNS
    ))
    .bind(email)
    .fetch_optional(pool)
    .await
}

pub async fn list_users(
    pool: &PgPool,
    role: Option<&str>,
    active: Option<bool>,
    limit: i64,
    offset: i64,
) -> Result<Vec<User>, sqlx::Error> {
    let mut qb: QueryBuilder<Postgres> =
        QueryBuilder::new(format!("SELECT {} FROM users WHERE 1 = 1", USER_COLUMNS));
    if let Some(role) = role {
        qb.push(" AND role = ").push_bind(role.to_string());
    }
    if let Some(active) = active {
        qb.push(" AND active = ").push_bind(active);
    }
    qb.push(" ORDER BY id LIMIT ")
        .push_bind(limit)
        .push(" OFFSET ")
        .push_bind(offset);

    let users = qb.build_query_as::<User>().fetch_all(pool).await?;
    Ok(users)
}

pub async fn update_user(
    pool: &PgPool,
    id: i32,
    name: Option<&str>,
    email: Option<&str>,
    role: Option<&str>,
) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>(&format!(
        r#"
        UPDATE users
        SET name = COALESCE($2, name),
            email = COALESCE($3, email),
            role = COALESCE($4, role),
            updated_at = NOW()
        WHERE id = $1
        RETURNING {}
        "#,
        USER_COLUMNS
    ))
    .bind(id)
    .bind(name)
    .bind(email)
    .bind(role)
    .fetch_optional(pool)
    .await
}

pub async fn set_active(pool: &PgPool, id: i32, active: bool) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>(&format!(
        "UPDATE users SET active = $2, updated_at = NOW() WHERE id = $1 RETURNING {}",
        USER_COLUMNS
    ))
    .bind(id)
    .bind(active)
    .fetch_optional(pool)
    .await
}

pub async fn set_password(pool: &PgPool, id: i32, password_hash: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("UPDATE users SET password_hash = $2, updated_at = NOW() WHERE id = $1")
        .bind(id)
        .bind(password_hash)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn delete_user(pool: &PgPool, id: i32) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM users WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn active_ids_with_roles(
    conn: &mut PgConnection,
    roles: &[&str],
) -> Result<Vec<i32>, sqlx::Error> {
    let roles: Vec<String> = roles.iter().map(|r| r.to_string()).collect();
    sqlx::query_scalar::<_, i32>("SELECT id FROM users WHERE active AND role = ANY($1) ORDER BY id")
        .bind(roles)
        .fetch_all(conn)
        .await
}

pub async fn list_reviewers(pool: &PgPool) -> Result<Vec<ReviewerWorkload>, sqlx::Error> {
    sqlx::query_as::<_, ReviewerWorkload>(
        r#"
        SELECT u.id, u.name, u.email,
               COUNT(r.id) FILTER (WHERE r.state = 'pending') AS pending_reviews
        FROM users u
        LEFT JOIN reviews r ON r.reviewer_id = u.id
        WHERE u.role = 'reviewer' AND u.active
        GROUP BY u.id, u.name, u.email
        ORDER BY pending_reviews ASC, u.name ASC
        "#,
    )
    .fetch_all(pool)
    .await
}
