//! Overdue fees and penalty bookkeeping.

use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};

use crate::config::PenaltiesConfig;
use crate::error::{AppError, AppResult, OptionExt};
use crate::types::{PenaltyDto, PenaltyKind, PenaltyStatus};
use crate::util::time::format_ts;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LateFee {
    /// Calendar days between the due date and the return date.
    pub days_late: i64,
    /// Days left after the grace period.
    pub chargeable_days: i64,
    pub amount: i64,
}

/// Late fee for a loan due at `due` and returned at `returned`.
///
/// Days are counted on UTC calendar dates: a book due on the 10th and returned
/// any time on the 11th is one day late.
pub fn compute_late_fee(due: DateTime<Utc>, returned: DateTime<Utc>, policy: &PenaltiesConfig) -> LateFee {
    let days_late = (returned.date_naive() - due.date_naive()).num_days().max(0);
    let chargeable_days = (days_late - policy.grace_days).max(0);
    let mut amount = chargeable_days.saturating_mul(policy.daily_rate);
    if policy.max_amount > 0 {
        amount = amount.min(policy.max_amount);
    }
    LateFee { days_late, chargeable_days, amount }
}

const PENALTY_COLUMNS: &str = "id, user_id, loan_id, kind, amount, status, description, created_at, paid_at";

pub async fn insert(
    conn: &mut SqliteConnection,
    user_id: i64,
    loan_id: Option<i64>,
    kind: PenaltyKind,
    amount: i64,
    description: Option<String>,
    now: DateTime<Utc>,
) -> AppResult<PenaltyDto> {
    if amount < 0 {
        return Err(AppError::ValidationError {
            field: "amount".to_string(),
            message: "Amount must not be negative".to_string(),
        });
    }
    let res = sqlx::query(
        r#"INSERT INTO penalties (user_id, loan_id, kind, amount, status, description, created_at)
           VALUES (?1, ?2, ?3, ?4, 'unpaid', ?5, ?6)"#,
    )
    .bind(user_id)
    .bind(loan_id)
    .bind(kind.as_str())
    .bind(amount)
    .bind(description)
    .bind(format_ts(now))
    .execute(&mut *conn)
    .await?;
    tracing::info!(user_id, ?loan_id, kind = kind.as_str(), amount, "Penalty issued");
    fetch(conn, res.last_insert_rowid()).await
}

pub async fn fetch(conn: &mut SqliteConnection, id: i64) -> AppResult<PenaltyDto> {
    let sql = format!("SELECT {} FROM penalties WHERE id = ?1", PENALTY_COLUMNS);
    sqlx::query_as::<_, PenaltyDto>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_not_found("Penalty")
}

/// Moves an unpaid penalty to `target` (paid or waived).
async fn settle(
    db: &SqlitePool,
    id: i64,
    target: PenaltyStatus,
    note: Option<String>,
    now: DateTime<Utc>,
) -> AppResult<PenaltyDto> {
    let mut conn = db.acquire().await?;
    let res = sqlx::query(
        r#"UPDATE penalties
           SET status = ?1, paid_at = ?2,
               description = CASE WHEN ?3 IS NULL THEN description
                                  ELSE COALESCE(description || ' | ', '') || ?3 END
           WHERE id = ?4 AND status = 'unpaid'"#,
    )
    .bind(target.as_str())
    .bind(format_ts(now))
    .bind(note)
    .bind(id)
    .execute(&mut *conn)
    .await?;
    let penalty = fetch(&mut conn, id).await?;
    if res.rows_affected() == 0 {
        return Err(AppError::Conflict(format!("Penalty {} is already {}", id, penalty.status)));
    }
    Ok(penalty)
}

pub async fn pay(db: &SqlitePool, id: i64, now: DateTime<Utc>) -> AppResult<PenaltyDto> {
    settle(db, id, PenaltyStatus::Paid, None, now).await
}

pub async fn waive(db: &SqlitePool, id: i64, reason: &str, now: DateTime<Utc>) -> AppResult<PenaltyDto> {
    settle(db, id, PenaltyStatus::Waived, Some(format!("Exonération : {}", reason.trim())), now).await
}

pub async fn unpaid_total(conn: &mut SqliteConnection, user_id: i64) -> AppResult<i64> {
    let total: i64 = sqlx::query_scalar(
        "SELECT COALESCE(SUM(amount), 0) FROM penalties WHERE user_id = ?1 AND status = 'unpaid'",
    )
    .bind(user_id)
    .fetch_one(&mut *conn)
    .await?;
    Ok(total)
}

#[derive(Debug, Default, Clone)]
pub struct PenaltyFilter {
    pub user_id: Option<i64>,
    pub status: Option<PenaltyStatus>,
}

pub async fn list(db: &SqlitePool, filter: &PenaltyFilter, limit: i64, offset: i64) -> AppResult<Vec<PenaltyDto>> {
    let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM penalties WHERE 1 = 1", PENALTY_COLUMNS));
    if let Some(user_id) = filter.user_id {
        qb.push(" AND user_id = ").push_bind(user_id);
    }
    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status.as_str());
    }
    qb.push(" ORDER BY created_at DESC, id DESC LIMIT ").push_bind(limit).push(" OFFSET ").push_bind(offset);
    Ok(qb.build_query_as::<PenaltyDto>().fetch_all(db).await?)
}
