//! Reservation queue bookkeeping.
//!
//! Active reservations (`pending`, `ready`) of a book always carry priorities
//! 1..n in reservation order. Every operation that removes an entry from the
//! active set renumbers the queue before returning.

use chrono::{DateTime, Duration, Utc};
use sqlx::{SqliteConnection, SqlitePool};

use crate::config::ReservationsConfig;
use crate::error::{AppError, AppResult, OptionExt};
use crate::services::users;
use crate::types::ReservationDto;
use crate::util::time::format_ts;

const RESERVATION_SELECT: &str = r#"SELECT r.id, r.user_id, r.book_id, b.title AS book_title, u.username,
       r.reservation_date, r.priority_order, r.status, r.ready_at, r.expires_at
FROM reservations r
JOIN books b ON b.id = r.book_id
JOIN users u ON u.id = r.user_id"#;

pub async fn fetch(conn: &mut SqliteConnection, id: i64) -> AppResult<ReservationDto> {
    let sql = format!("{} WHERE r.id = ?1", RESERVATION_SELECT);
    sqlx::query_as::<_, ReservationDto>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_not_found("Reservation")
}

/// Rewrites the priorities of the active entries of `book_id` to 1..n,
/// keeping their relative order.
pub async fn renumber_queue(conn: &mut SqliteConnection, book_id: i64) -> AppResult<()> {
    let ids: Vec<i64> = sqlx::query_scalar(
        r#"SELECT id FROM reservations
           WHERE book_id = ?1 AND status IN ('pending','ready')
           ORDER BY priority_order, reservation_date, id"#,
    )
    .bind(book_id)
    .fetch_all(&mut *conn)
    .await?;

    for (idx, id) in ids.iter().enumerate() {
        sqlx::query("UPDATE reservations SET priority_order = ?1 WHERE id = ?2 AND priority_order <> ?1")
            .bind(idx as i64 + 1)
            .bind(id)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

/// Number of copies set aside for `ready` reservations of `book_id`.
pub async fn held_copies(conn: &mut SqliteConnection, book_id: i64) -> AppResult<i64> {
    Ok(sqlx::query_scalar("SELECT COUNT(*) FROM reservations WHERE book_id = ?1 AND status = 'ready'")
        .bind(book_id)
        .fetch_one(&mut *conn)
        .await?)
}

/// Copies on the shelf that are not held for a `ready` reservation.
pub async fn free_copies(conn: &mut SqliteConnection, book_id: i64) -> AppResult<i64> {
    let free: Option<i64> = sqlx::query_scalar(
        r#"SELECT b.available_copies -
                  (SELECT COUNT(*) FROM reservations r WHERE r.book_id = b.id AND r.status = 'ready')
           FROM books b WHERE b.id = ?1"#,
    )
    .bind(book_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(free.ok_or_not_found("Book")?.max(0))
}

/// Turns pending reservations into holds while free copies remain.
/// Returns the reservations that became `ready`.
pub async fn promote_next(
    conn: &mut SqliteConnection,
    book_id: i64,
    hold_days: i64,
    now: DateTime<Utc>,
) -> AppResult<Vec<i64>> {
    let mut promoted = Vec::new();
    let mut free = free_copies(conn, book_id).await?;
    while free > 0 {
        let next: Option<i64> = sqlx::query_scalar(
            r#"SELECT id FROM reservations WHERE book_id = ?1 AND status = 'pending'
               ORDER BY priority_order, id LIMIT 1"#,
        )
        .bind(book_id)
        .fetch_optional(&mut *conn)
        .await?;
        let Some(id) = next else { break };

        sqlx::query("UPDATE reservations SET status = 'ready', ready_at = ?1, expires_at = ?2 WHERE id = ?3")
            .bind(format_ts(now))
            .bind(format_ts(now + Duration::days(hold_days)))
            .bind(id)
            .execute(&mut *conn)
            .await?;
        tracing::info!(reservation_id = id, book_id, "Reservation ready for pickup");
        promoted.push(id);
        free -= 1;
    }
    Ok(promoted)
}

pub async fn create(
    db: &SqlitePool,
    cfg: &ReservationsConfig,
    user_id: i64,
    book_id: i64,
    now: DateTime<Utc>,
) -> AppResult<ReservationDto> {
    let mut tx = db.begin().await?;

    // Prend le verrou d'écriture dès la première instruction
    let touched = sqlx::query("UPDATE books SET updated_at = updated_at WHERE id = ?1")
        .bind(book_id)
        .execute(&mut *tx)
        .await?;
    if touched.rows_affected() == 0 {
        return Err(AppError::NotFound("Book not found".to_string()));
    }

    users::get_active(&mut *tx, user_id).await?;

    let duplicate: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM reservations WHERE user_id = ?1 AND book_id = ?2 AND status IN ('pending','ready')",
    )
    .bind(user_id)
    .bind(book_id)
    .fetch_one(&mut *tx)
    .await?;
    if duplicate > 0 {
        return Err(AppError::Conflict("You already have an active reservation for this book".to_string()));
    }

    let borrowing: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM loans WHERE user_id = ?1 AND book_id = ?2 AND status IN ('active','overdue')",
    )
    .bind(user_id)
    .bind(book_id)
    .fetch_one(&mut *tx)
    .await?;
    if borrowing > 0 {
        return Err(AppError::Conflict("You are currently borrowing this book".to_string()));
    }

    let active: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM reservations WHERE user_id = ?1 AND status IN ('pending','ready')",
    )
    .bind(user_id)
    .fetch_one(&mut *tx)
    .await?;
    if active >= cfg.max_active_per_user {
        return Err(AppError::Conflict(format!(
            "Reservation limit reached ({} active)",
            cfg.max_active_per_user
        )));
    }

    if free_copies(&mut *tx, book_id).await? > 0 {
        return Err(AppError::Conflict("Book is available, borrow it directly".to_string()));
    }

    let queued: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM reservations WHERE book_id = ?1 AND status IN ('pending','ready')",
    )
    .bind(book_id)
    .fetch_one(&mut *tx)
    .await?;

    let res = sqlx::query(
        r#"INSERT INTO reservations (user_id, book_id, reservation_date, priority_order, status)
           VALUES (?1, ?2, ?3, ?4, 'pending')"#,
    )
    .bind(user_id)
    .bind(book_id)
    .bind(format_ts(now))
    .bind(queued + 1)
    .execute(&mut *tx)
    .await?;
    let reservation = fetch(&mut *tx, res.last_insert_rowid()).await?;
    tx.commit().await?;

    tracing::info!(
        reservation_id = reservation.id,
        user_id,
        book_id,
        priority = reservation.priority_order,
        "Reservation created"
    );
    Ok(reservation)
}

pub async fn cancel(db: &SqlitePool, cfg: &ReservationsConfig, id: i64, now: DateTime<Utc>) -> AppResult<ReservationDto> {
    let mut tx = db.begin().await?;
    let res = sqlx::query(
        "UPDATE reservations SET status = 'cancelled', expires_at = NULL WHERE id = ?1 AND status IN ('pending','ready')",
    )
    .bind(id)
    .execute(&mut *tx)
    .await?;
    let reservation = fetch(&mut *tx, id).await?;
    if res.rows_affected() == 0 {
        return Err(AppError::Conflict(format!("Reservation is already {}", reservation.status)));
    }
    renumber_queue(&mut *tx, reservation.book_id).await?;
    promote_next(&mut *tx, reservation.book_id, cfg.hold_days, now).await?;
    tx.commit().await?;

    tracing::info!(reservation_id = id, book_id = reservation.book_id, "Reservation cancelled");
    Ok(reservation)
}

/// Expires holds that were not picked up in time and hands the copies on.
/// Returns the number of expired reservations.
pub async fn expire_holds(db: &SqlitePool, cfg: &ReservationsConfig, now: DateTime<Utc>) -> AppResult<u64> {
    let mut tx = db.begin().await?;
    let mut books: Vec<i64> = sqlx::query_scalar(
        "UPDATE reservations SET status = 'expired' WHERE status = 'ready' AND expires_at <= ?1 RETURNING book_id",
    )
    .bind(format_ts(now))
    .fetch_all(&mut *tx)
    .await?;
    if books.is_empty() {
        return Ok(0);
    }
    let expired = books.len() as u64;
    books.sort_unstable();
    books.dedup();

    for book_id in &books {
        renumber_queue(&mut *tx, *book_id).await?;
        promote_next(&mut *tx, *book_id, cfg.hold_days, now).await?;
    }
    tx.commit().await?;

    tracing::info!(expired, books = books.len(), "Expired reservation holds");
    Ok(expired)
}

/// Marks the borrower's `ready` hold on `book_id` as fulfilled.
/// Returns false when the user had no hold for the book.
pub async fn fulfill_for_loan(conn: &mut SqliteConnection, user_id: i64, book_id: i64) -> AppResult<bool> {
    let res = sqlx::query(
        "UPDATE reservations SET status = 'fulfilled' WHERE user_id = ?1 AND book_id = ?2 AND status = 'ready'",
    )
    .bind(user_id)
    .bind(book_id)
    .execute(&mut *conn)
    .await?;
    if res.rows_affected() == 0 {
        return Ok(false);
    }
    renumber_queue(conn, book_id).await?;
    Ok(true)
}

pub async fn queue(db: &SqlitePool, book_id: i64) -> AppResult<Vec<ReservationDto>> {
    let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM books WHERE id = ?1")
        .bind(book_id)
        .fetch_optional(db)
        .await?;
    exists.ok_or_not_found("Book")?;

    let sql = format!(
        "{} WHERE r.book_id = ?1 AND r.status IN ('pending','ready') ORDER BY r.priority_order",
        RESERVATION_SELECT
    );
    Ok(sqlx::query_as::<_, ReservationDto>(&sql).bind(book_id).fetch_all(db).await?)
}

pub async fn list_for_user(db: &SqlitePool, user_id: i64) -> AppResult<Vec<ReservationDto>> {
    let sql = format!(
        "{} WHERE r.user_id = ?1 ORDER BY r.reservation_date DESC, r.id DESC",
        RESERVATION_SELECT
    );
    Ok(sqlx::query_as::<_, ReservationDto>(&sql).bind(user_id).fetch_all(db).await?)
}

pub async fn get(db: &SqlitePool, id: i64) -> AppResult<ReservationDto> {
    let mut conn = db.acquire().await?;
    fetch(&mut conn, id).await
}
