//! Circulation desk: lending, returns, renewals and lost books.

use chrono::{DateTime, Duration, Utc};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};

use crate::config::AppConfig;
use crate::error::{AppError, AppResult, OptionExt};
use crate::services::{penalties, reservations, users};
use crate::types::{LoanDto, LoanStatus, Page, PenaltyKind, ReturnResponse};
use crate::util::time::{format_ts, parse_ts};

const LOAN_SELECT: &str = r#"SELECT l.id, l.user_id, l.book_id, b.title AS book_title, u.username,
       l.loan_date, l.due_date, l.return_date, l.status, l.renewal_count
FROM loans l
JOIN books b ON b.id = l.book_id
JOIN users u ON u.id = l.user_id"#;

pub async fn fetch(conn: &mut SqliteConnection, id: i64) -> AppResult<LoanDto> {
    let sql = format!("{} WHERE l.id = ?1", LOAN_SELECT);
    sqlx::query_as::<_, LoanDto>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_not_found("Loan")
}

pub async fn get(db: &SqlitePool, id: i64) -> AppResult<LoanDto> {
    let mut conn = db.acquire().await?;
    fetch(&mut conn, id).await
}

fn due_of(loan: &LoanDto) -> AppResult<DateTime<Utc>> {
    parse_ts(&loan.due_date).ok_or_else(|| AppError::Internal(anyhow::anyhow!("loan {} has an invalid due date", loan.id)))
}

/// Lends `book_id` to `user_id`.
///
/// Checks run in a fixed order so the caller always gets the most relevant
/// refusal: account state first, then quotas, then copy availability.
pub async fn create_loan(
    db: &SqlitePool,
    cfg: &AppConfig,
    user_id: i64,
    book_id: i64,
    now: DateTime<Utc>,
) -> AppResult<LoanDto> {
    let mut tx = db.begin().await?;
    let ts = format_ts(now);

    // Verrou d'écriture d'abord ; le lecteur est contrôlé avant le livre
    let touched = sqlx::query("UPDATE books SET updated_at = updated_at WHERE id = ?1")
        .bind(book_id)
        .execute(&mut *tx)
        .await?;
    let user = users::get_active(&mut *tx, user_id).await?;
    if touched.rows_affected() == 0 {
        return Err(AppError::NotFound("Book not found".to_string()));
    }

    let overdue: i64 = sqlx::query_scalar(
        r#"SELECT COUNT(*) FROM loans
           WHERE user_id = ?1 AND (status = 'overdue' OR (status = 'active' AND due_date < ?2))"#,
    )
    .bind(user_id)
    .bind(&ts)
    .fetch_one(&mut *tx)
    .await?;
    if overdue > 0 {
        return Err(AppError::Forbidden(format!(
            "User has {} overdue loan(s); return them before borrowing",
            overdue
        )));
    }

    let unpaid = penalties::unpaid_total(&mut *tx, user_id).await?;
    if unpaid > cfg.penalties.block_threshold {
        return Err(AppError::Forbidden(format!(
            "Unpaid penalties of {} {} exceed the limit of {}",
            unpaid, cfg.penalties.currency, cfg.penalties.block_threshold
        )));
    }

    let policy = cfg.loans.policy_for(user.role());
    let active: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM loans WHERE user_id = ?1 AND status IN ('active','overdue')",
    )
    .bind(user_id)
    .fetch_one(&mut *tx)
    .await?;
    if active >= policy.max_active_loans {
        return Err(AppError::Conflict(format!(
            "Loan limit reached ({} of {} for role {})",
            active,
            policy.max_active_loans,
            user.role()
        )));
    }

    let holding: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM loans WHERE user_id = ?1 AND book_id = ?2 AND status IN ('active','overdue')",
    )
    .bind(user_id)
    .bind(book_id)
    .fetch_one(&mut *tx)
    .await?;
    if holding > 0 {
        return Err(AppError::Conflict("User already borrows a copy of this book".to_string()));
    }

    // Un exemplaire réservé passe avant la file d'attente
    if !reservations::fulfill_for_loan(&mut *tx, user_id, book_id).await? {
        if reservations::free_copies(&mut *tx, book_id).await? <= 0 {
            return Err(AppError::Conflict("No copy available".to_string()));
        }
        let pending: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM reservations WHERE book_id = ?1 AND status = 'pending'",
        )
        .bind(book_id)
        .fetch_one(&mut *tx)
        .await?;
        if pending > 0 {
            return Err(AppError::Conflict("Copies are reserved for other readers".to_string()));
        }
    }

    sqlx::query("UPDATE books SET available_copies = available_copies - 1, updated_at = ?1 WHERE id = ?2")
        .bind(&ts)
        .bind(book_id)
        .execute(&mut *tx)
        .await?;

    let due = now + Duration::days(policy.loan_days);
    let res = sqlx::query(
        r#"INSERT INTO loans (user_id, book_id, loan_date, due_date, status, renewal_count)
           VALUES (?1, ?2, ?3, ?4, 'active', 0)"#,
    )
    .bind(user_id)
    .bind(book_id)
    .bind(&ts)
    .bind(format_ts(due))
    .execute(&mut *tx)
    .await?;
    let loan = fetch(&mut *tx, res.last_insert_rowid()).await?;
    tx.commit().await?;

    tracing::info!(loan_id = loan.id, user_id, book_id, due_date = %loan.due_date, "Loan created");
    Ok(loan)
}

pub async fn return_loan(db: &SqlitePool, cfg: &AppConfig, id: i64, now: DateTime<Utc>) -> AppResult<ReturnResponse> {
    let mut tx = db.begin().await?;
    let ts = format_ts(now);

    let res = sqlx::query(
        "UPDATE loans SET status = 'returned', return_date = ?1 WHERE id = ?2 AND status IN ('active','overdue')",
    )
    .bind(&ts)
    .bind(id)
    .execute(&mut *tx)
    .await?;
    let loan = fetch(&mut *tx, id).await?;
    if res.rows_affected() == 0 {
        return Err(AppError::Conflict(format!("Loan is already {}", loan.status)));
    }

    sqlx::query("UPDATE books SET available_copies = available_copies + 1, updated_at = ?1 WHERE id = ?2")
        .bind(&ts)
        .bind(loan.book_id)
        .execute(&mut *tx)
        .await?;

    let fee = penalties::compute_late_fee(due_of(&loan)?, now, &cfg.penalties);
    let penalty = if fee.amount > 0 {
        let description = format!(
            "Retard de {} jour(s) sur « {} »",
            fee.days_late, loan.book_title
        );
        Some(
            penalties::insert(
                &mut *tx,
                loan.user_id,
                Some(loan.id),
                PenaltyKind::LateReturn,
                fee.amount,
                Some(description),
                now,
            )
            .await?,
        )
    } else {
        None
    };

    reservations::promote_next(&mut *tx, loan.book_id, cfg.reservations.hold_days, now).await?;
    tx.commit().await?;

    tracing::info!(
        loan_id = id,
        book_id = loan.book_id,
        days_late = fee.days_late,
        fee = fee.amount,
        "Loan returned"
    );
    Ok(ReturnResponse { loan, days_late: fee.days_late, penalty })
}

pub async fn renew(db: &SqlitePool, cfg: &AppConfig, id: i64, now: DateTime<Utc>) -> AppResult<LoanDto> {
    let mut tx = db.begin().await?;

    let touched = sqlx::query("UPDATE loans SET renewal_count = renewal_count WHERE id = ?1")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    if touched.rows_affected() == 0 {
        return Err(AppError::NotFound("Loan not found".to_string()));
    }
    let loan = fetch(&mut *tx, id).await?;
    let due = due_of(&loan)?;

    match loan.status.parse::<LoanStatus>() {
        Ok(LoanStatus::Active) if due >= now => {}
        Ok(LoanStatus::Active) | Ok(LoanStatus::Overdue) => {
            return Err(AppError::Conflict("Overdue loans cannot be renewed".to_string()));
        }
        _ => return Err(AppError::Conflict(format!("Loan is already {}", loan.status))),
    }
    if loan.renewal_count >= cfg.loans.max_renewals {
        return Err(AppError::Conflict(format!(
            "Renewal limit reached ({})",
            cfg.loans.max_renewals
        )));
    }
    let queued: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM reservations WHERE book_id = ?1 AND status IN ('pending','ready')",
    )
    .bind(loan.book_id)
    .fetch_one(&mut *tx)
    .await?;
    if queued > 0 {
        return Err(AppError::Conflict("Book is reserved by other readers".to_string()));
    }

    let new_due = due + Duration::days(cfg.loans.renewal_days);
    sqlx::query("UPDATE loans SET due_date = ?1, renewal_count = renewal_count + 1 WHERE id = ?2")
        .bind(format_ts(new_due))
        .bind(id)
        .execute(&mut *tx)
        .await?;
    let loan = fetch(&mut *tx, id).await?;
    tx.commit().await?;

    tracing::info!(loan_id = id, due_date = %loan.due_date, renewals = loan.renewal_count, "Loan renewed");
    Ok(loan)
}

/// Writes off a borrowed copy. The copy was already out of `available_copies`,
/// so only the total shrinks.
pub async fn declare_lost(db: &SqlitePool, cfg: &AppConfig, id: i64, now: DateTime<Utc>) -> AppResult<ReturnResponse> {
    let mut tx = db.begin().await?;
    let ts = format_ts(now);

    let res = sqlx::query(
        "UPDATE loans SET status = 'lost', return_date = ?1 WHERE id = ?2 AND status IN ('active','overdue')",
    )
    .bind(&ts)
    .bind(id)
    .execute(&mut *tx)
    .await?;
    let loan = fetch(&mut *tx, id).await?;
    if res.rows_affected() == 0 {
        return Err(AppError::Conflict(format!("Loan is already {}", loan.status)));
    }

    sqlx::query("UPDATE books SET total_copies = total_copies - 1, updated_at = ?1 WHERE id = ?2")
        .bind(&ts)
        .bind(loan.book_id)
        .execute(&mut *tx)
        .await?;

    let penalty = penalties::insert(
        &mut *tx,
        loan.user_id,
        Some(loan.id),
        PenaltyKind::Lost,
        cfg.penalties.lost_book_fee,
        Some(format!("Perte de « {} »", loan.book_title)),
        now,
    )
    .await?;
    tx.commit().await?;

    let days_late = penalties::compute_late_fee(due_of(&loan)?, now, &cfg.penalties).days_late;
    tracing::warn!(loan_id = id, book_id = loan.book_id, user_id = loan.user_id, "Book declared lost");
    Ok(ReturnResponse { loan, days_late, penalty: Some(penalty) })
}

/// Flags active loans past their due date. Returns the number of loans flagged.
pub async fn refresh_overdue(db: &SqlitePool, now: DateTime<Utc>) -> AppResult<u64> {
    let res = sqlx::query("UPDATE loans SET status = 'overdue' WHERE status = 'active' AND due_date < ?1")
        .bind(format_ts(now))
        .execute(db)
        .await?;
    let flagged = res.rows_affected();
    if flagged > 0 {
        tracing::info!(flagged, "Loans marked overdue");
    }
    Ok(flagged)
}

#[derive(Debug, Default, Clone)]
pub struct LoanFilter {
    pub user_id: Option<i64>,
    pub book_id: Option<i64>,
    pub status: Option<LoanStatus>,
    pub overdue_only: bool,
}

fn push_loan_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &LoanFilter, now: &str) {
    qb.push(" WHERE 1 = 1");
    if let Some(user_id) = filter.user_id {
        qb.push(" AND l.user_id = ").push_bind(user_id);
    }
    if let Some(book_id) = filter.book_id {
        qb.push(" AND l.book_id = ").push_bind(book_id);
    }
    if let Some(status) = filter.status {
        qb.push(" AND l.status = ").push_bind(status.as_str());
    }
    if filter.overdue_only {
        qb.push(" AND (l.status = 'overdue' OR (l.status = 'active' AND l.due_date < ")
            .push_bind(now.to_string())
            .push("))");
    }
}

pub async fn list(db: &SqlitePool, filter: &LoanFilter, limit: i64, offset: i64) -> AppResult<Page<LoanDto>> {
    let now = format_ts(Utc::now());

    let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM loans l");
    push_loan_filter(&mut count, filter, &now);
    let total_count: i64 = count.build_query_scalar::<i64>().fetch_one(db).await?;

    let mut qb = QueryBuilder::<Sqlite>::new(LOAN_SELECT);
    push_loan_filter(&mut qb, filter, &now);
    qb.push(" ORDER BY l.loan_date DESC, l.id DESC LIMIT ")
        .push_bind(limit)
        .push(" OFFSET ")
        .push_bind(offset);
    let items = qb.build_query_as::<LoanDto>().fetch_all(db).await?;

    Ok(Page { items, total_count, limit, offset })
}
