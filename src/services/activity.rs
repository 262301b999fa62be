use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::error::AppResult;
use crate::types::ActivityItem;
use crate::util::time::{format_ts, parse_ts, time_ago};

/// Appends an entry to the activity feed.
///
/// Failures are logged and swallowed: the feed must never fail the request
/// that produced it.
pub async fn record(
    db: &SqlitePool,
    user_id: Option<i64>,
    action: &str,
    entity_type: &str,
    entity_id: Option<i64>,
    details: Option<String>,
) {
    let res = sqlx::query(
        r#"INSERT INTO activity_log (user_id, action, entity_type, entity_id, details, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
    )
    .bind(user_id)
    .bind(action)
    .bind(entity_type)
    .bind(entity_id)
    .bind(details)
    .bind(format_ts(Utc::now()))
    .execute(db)
    .await;
    if let Err(e) = res {
        tracing::warn!(action, entity_type, "Failed to record activity: {}", e);
    }
}

pub async fn recent(db: &SqlitePool, limit: i64, now: DateTime<Utc>) -> AppResult<Vec<ActivityItem>> {
    let rows = sqlx::query(
        r#"SELECT a.id, a.user_id, u.username, a.action, a.entity_type, a.entity_id, a.details, a.created_at
           FROM activity_log a LEFT JOIN users u ON u.id = a.user_id
           ORDER BY a.created_at DESC, a.id DESC LIMIT ?1"#,
    )
    .bind(limit)
    .fetch_all(db)
    .await?;

    let mut items = Vec::with_capacity(rows.len());
    for row in rows {
        let created_at: String = row.try_get("created_at")?;
        let label = parse_ts(&created_at).map(|t| time_ago(t, now)).unwrap_or_default();
        items.push(ActivityItem {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            username: row.try_get("username")?,
            action: row.try_get("action")?,
            entity_type: row.try_get("entity_type")?,
            entity_id: row.try_get("entity_id")?,
            details: row.try_get("details")?,
            created_at,
            time_ago: label,
        });
    }
    Ok(items)
}
