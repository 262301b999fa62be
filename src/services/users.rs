use chrono::{DateTime, Duration, Utc};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::directory::{role_for_groups, DirectoryUser};
use crate::error::{AppError, AppResult, OptionExt};
use crate::types::{Page, Role, SyncReport, UserDto, UserSummary};
use crate::util::{clean_text, escape_like_pattern, time::format_ts};

const USER_COLUMNS: &str =
    "id, username, display_name, email, department, role, is_active, last_login_at, created_at";

pub async fn get(db: &SqlitePool, id: i64) -> AppResult<UserDto> {
    let sql = format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS);
    sqlx::query_as::<_, UserDto>(&sql).bind(id).fetch_optional(db).await?.ok_or_not_found("User")
}

/// Loads a user that may borrow or reserve. Disabled accounts are refused.
pub async fn get_active(conn: &mut SqliteConnection, id: i64) -> AppResult<UserDto> {
    let sql = format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS);
    let user = sqlx::query_as::<_, UserDto>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_not_found("User")?;
    if !user.is_active {
        return Err(AppError::Forbidden(format!("User account '{}' is disabled", user.username)));
    }
    Ok(user)
}

/// Creates or refreshes the local copy of a directory account.
///
/// The role follows the account's AD groups on every call, so a group removed
/// in the directory takes the privilege away. A role set by an admin through
/// [`update`] is kept in `role_override` and wins over the groups. Returns the
/// user and whether it was created.
pub async fn upsert_from_directory(
    conn: &mut SqliteConnection,
    dir_user: &DirectoryUser,
    role_groups: &std::collections::HashMap<String, String>,
    now: DateTime<Utc>,
) -> AppResult<(UserDto, bool)> {
    let ts = format_ts(now);
    let role = role_for_groups(&dir_user.groups, role_groups);
    let existing: Option<i64> = sqlx::query_scalar("SELECT id FROM users WHERE username = ?1")
        .bind(&dir_user.username)
        .fetch_optional(&mut *conn)
        .await?;

    let (id, created) = match existing {
        Some(id) => {
            sqlx::query(
                r#"UPDATE users SET display_name = ?1, email = ?2, department = ?3,
                       role = COALESCE(role_override, ?4), updated_at = ?5
                   WHERE id = ?6"#,
            )
            .bind(&dir_user.display_name)
            .bind(&dir_user.email)
            .bind(&dir_user.department)
            .bind(role.as_str())
            .bind(&ts)
            .bind(id)
            .execute(&mut *conn)
            .await?;
            (id, false)
        }
        None => {
            let res = sqlx::query(
                r#"INSERT INTO users (username, display_name, email, department, role, is_active, created_at, updated_at)
                   VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?6)"#,
            )
            .bind(&dir_user.username)
            .bind(&dir_user.display_name)
            .bind(&dir_user.email)
            .bind(&dir_user.department)
            .bind(role.as_str())
            .bind(&ts)
            .execute(&mut *conn)
            .await?;
            (res.last_insert_rowid(), true)
        }
    };

    let sql = format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS);
    let user = sqlx::query_as::<_, UserDto>(&sql).bind(id).fetch_one(&mut *conn).await?;
    Ok((user, created))
}

/// Mirrors every directory account into the local user table.
pub async fn sync_from_directory(
    db: &SqlitePool,
    accounts: &[DirectoryUser],
    role_groups: &std::collections::HashMap<String, String>,
    now: DateTime<Utc>,
) -> AppResult<SyncReport> {
    let mut tx = db.begin().await?;
    let mut created = 0;
    for account in accounts {
        if account.username.trim().is_empty() {
            continue;
        }
        let (_, was_created) = upsert_from_directory(&mut *tx, account, role_groups, now).await?;
        if was_created {
            created += 1;
        }
    }
    tx.commit().await?;

    let total = accounts.iter().filter(|a| !a.username.trim().is_empty()).count();
    let report = SyncReport { created, updated: total - created, total };
    tracing::info!(created = report.created, updated = report.updated, "Directory synchronised");
    Ok(report)
}

#[derive(Debug, Default, Clone)]
pub struct UserFilter {
    pub q: Option<String>,
    pub role: Option<Role>,
    pub active: Option<bool>,
}

fn push_user_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &UserFilter) {
    qb.push(" WHERE 1 = 1");
    if let Some(q) = clean_text(filter.q.as_deref()) {
        let pattern = format!("%{}%", escape_like_pattern(&q));
        qb.push(" AND (username LIKE ")
            .push_bind(pattern.clone())
            .push(" ESCAPE '!' OR display_name LIKE ")
            .push_bind(pattern.clone())
            .push(" ESCAPE '!' OR email LIKE ")
            .push_bind(pattern)
            .push(" ESCAPE '!')");
    }
    if let Some(role) = filter.role {
        qb.push(" AND role = ").push_bind(role.as_str());
    }
    if let Some(active) = filter.active {
        qb.push(" AND is_active = ").push_bind(active);
    }
}

pub async fn list(db: &SqlitePool, filter: &UserFilter, limit: i64, offset: i64) -> AppResult<Page<UserDto>> {
    let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM users");
    push_user_filter(&mut count, filter);
    let total_count: i64 = count.build_query_scalar::<i64>().fetch_one(db).await?;

    let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM users", USER_COLUMNS));
    push_user_filter(&mut qb, filter);
    qb.push(" ORDER BY display_name COLLATE NOCASE, id LIMIT ")
        .push_bind(limit)
        .push(" OFFSET ")
        .push_bind(offset);
    let items = qb.build_query_as::<UserDto>().fetch_all(db).await?;

    Ok(Page { items, total_count, limit, offset })
}

/// Admin changes. An explicit role is stored as an override that directory
/// logins do not reset.
pub async fn update(db: &SqlitePool, id: i64, role: Option<Role>, is_active: Option<bool>) -> AppResult<UserDto> {
    let res = sqlx::query(
        r#"UPDATE users SET role = COALESCE(?1, role), role_override = COALESCE(?1, role_override),
               is_active = COALESCE(?2, is_active), updated_at = ?3
           WHERE id = ?4"#,
    )
    .bind(role.map(|r| r.as_str()))
    .bind(is_active)
    .bind(format_ts(Utc::now()))
    .bind(id)
    .execute(db)
    .await?;
    if res.rows_affected() == 0 {
        return Err(AppError::NotFound("User not found".to_string()));
    }
    if is_active == Some(false) {
        // Un compte désactivé perd ses sessions
        sqlx::query("DELETE FROM sessions WHERE user_id = ?1").bind(id).execute(db).await?;
    }
    get(db, id).await
}

pub async fn summary(db: &SqlitePool, id: i64) -> AppResult<UserSummary> {
    let user = get(db, id).await?;
    let now = format_ts(Utc::now());
    let (active_loans, overdue_loans): (i64, i64) = sqlx::query_as(
        r#"SELECT
             COUNT(*),
             COALESCE(SUM(CASE WHEN status = 'overdue' OR due_date < ?2 THEN 1 ELSE 0 END), 0)
           FROM loans WHERE user_id = ?1 AND status IN ('active','overdue')"#,
    )
    .bind(id)
    .bind(&now)
    .fetch_one(db)
    .await?;
    let active_reservations: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM reservations WHERE user_id = ?1 AND status IN ('pending','ready')",
    )
    .bind(id)
    .fetch_one(db)
    .await?;
    let unpaid_penalties: i64 = sqlx::query_scalar(
        "SELECT COALESCE(SUM(amount), 0) FROM penalties WHERE user_id = ?1 AND status = 'unpaid'",
    )
    .bind(id)
    .fetch_one(db)
    .await?;
    Ok(UserSummary { user, active_loans, overdue_loans, active_reservations, unpaid_penalties })
}

// ---------------- Sessions ----------------

pub async fn create_session(
    conn: &mut SqliteConnection,
    user_id: i64,
    ttl_hours: i64,
    now: DateTime<Utc>,
) -> AppResult<(String, String)> {
    let token = Uuid::new_v4().simple().to_string();
    let expires_at = format_ts(now + Duration::hours(ttl_hours));
    sqlx::query("INSERT INTO sessions (token, user_id, created_at, expires_at) VALUES (?1, ?2, ?3, ?4)")
        .bind(&token)
        .bind(user_id)
        .bind(format_ts(now))
        .bind(&expires_at)
        .execute(&mut *conn)
        .await?;
    sqlx::query("UPDATE users SET last_login_at = ?1 WHERE id = ?2")
        .bind(format_ts(now))
        .bind(user_id)
        .execute(&mut *conn)
        .await?;
    Ok((token, expires_at))
}

/// Resolves a bearer token to an active user, ignoring expired sessions.
pub async fn user_for_token(db: &SqlitePool, token: &str, now: DateTime<Utc>) -> AppResult<Option<UserDto>> {
    let sql = format!(
        "SELECT {} FROM users WHERE is_active = 1 AND id = (SELECT user_id FROM sessions WHERE token = ?1 AND expires_at > ?2)",
        USER_COLUMNS
    );
    Ok(sqlx::query_as::<_, UserDto>(&sql).bind(token).bind(format_ts(now)).fetch_optional(db).await?)
}

pub async fn delete_session(db: &SqlitePool, token: &str) -> AppResult<bool> {
    let res = sqlx::query("DELETE FROM sessions WHERE token = ?1").bind(token).execute(db).await?;
    Ok(res.rows_affected() > 0)
}

pub async fn purge_expired_sessions(db: &SqlitePool, now: DateTime<Utc>) -> AppResult<u64> {
    let res = sqlx::query("DELETE FROM sessions WHERE expires_at <= ?1").bind(format_ts(now)).execute(db).await?;
    Ok(res.rows_affected())
}
