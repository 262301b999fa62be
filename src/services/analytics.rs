//! Dashboard figures and data exports.

use chrono::{DateTime, Datelike, Utc};
use sqlx::{sqlite::SqliteRow, FromRow, Row, SqlitePool};

use crate::error::{AppError, AppResult};
use crate::types::{BookDto, DashboardStats, LoanDto, MonthlyCount, PenaltyDto, TopBook};
use crate::util::time::format_ts;

pub const MAX_EXPORT_ROWS: i64 = 25_000;
const EXPORT_CHUNK_SIZE: i64 = 800;

pub async fn dashboard(db: &SqlitePool, now: DateTime<Utc>) -> AppResult<DashboardStats> {
    let row = sqlx::query(
        r#"SELECT
             (SELECT COUNT(*) FROM books) AS total_books,
             (SELECT COALESCE(SUM(total_copies), 0) FROM books) AS total_copies,
             (SELECT COALESCE(SUM(available_copies), 0) FROM books) AS available_copies,
             (SELECT COUNT(*) FROM academic_documents WHERE kind = 'thesis') AS theses,
             (SELECT COUNT(*) FROM academic_documents WHERE kind = 'memoir') AS memoirs,
             (SELECT COUNT(*) FROM academic_documents WHERE kind = 'internship_report') AS internship_reports,
             (SELECT COUNT(*) FROM users) AS total_users,
             (SELECT COUNT(*) FROM users WHERE is_active = 1) AS active_users,
             (SELECT COUNT(*) FROM loans WHERE status IN ('active','overdue')) AS active_loans,
             (SELECT COUNT(*) FROM loans
                WHERE status = 'overdue' OR (status = 'active' AND due_date < ?1)) AS overdue_loans,
             (SELECT COUNT(*) FROM reservations WHERE status = 'pending') AS pending_reservations,
             (SELECT COALESCE(SUM(amount), 0) FROM penalties WHERE status = 'unpaid') AS unpaid_penalties"#,
    )
    .bind(format_ts(now))
    .fetch_one(db)
    .await?;

    Ok(DashboardStats {
        total_books: row.try_get("total_books")?,
        total_copies: row.try_get("total_copies")?,
        available_copies: row.try_get("available_copies")?,
        theses: row.try_get("theses")?,
        memoirs: row.try_get("memoirs")?,
        internship_reports: row.try_get("internship_reports")?,
        total_users: row.try_get("total_users")?,
        active_users: row.try_get("active_users")?,
        active_loans: row.try_get("active_loans")?,
        overdue_loans: row.try_get("overdue_loans")?,
        pending_reservations: row.try_get("pending_reservations")?,
        unpaid_penalties: row.try_get("unpaid_penalties")?,
    })
}

/// `YYYY-MM` keys of the last `months` months, oldest first, ending with the
/// month of `now`.
pub fn month_keys(now: DateTime<Utc>, months: u32) -> Vec<String> {
    let current = now.year() * 12 + now.month0() as i32;
    (0..months as i32)
        .rev()
        .map(|back| {
            let m = current - back;
            format!("{:04}-{:02}", m.div_euclid(12), m.rem_euclid(12) + 1)
        })
        .collect()
}

pub async fn monthly_loans(db: &SqlitePool, months: u32, now: DateTime<Utc>) -> AppResult<Vec<MonthlyCount>> {
    let keys = month_keys(now, months);
    let Some(first) = keys.first() else {
        return Ok(Vec::new());
    };
    let rows = sqlx::query(
        r#"SELECT substr(loan_date, 1, 7) AS month, COUNT(*) AS cnt
           FROM loans WHERE loan_date >= ?1
           GROUP BY month"#,
    )
    .bind(format!("{}-01", first))
    .fetch_all(db)
    .await?;

    let mut counts = std::collections::HashMap::with_capacity(rows.len());
    for row in rows {
        let month: String = row.try_get("month")?;
        let cnt: i64 = row.try_get("cnt")?;
        counts.insert(month, cnt);
    }
    Ok(keys
        .into_iter()
        .map(|month| {
            let count = counts.get(&month).copied().unwrap_or(0);
            MonthlyCount { month, count }
        })
        .collect())
}

pub async fn top_books(db: &SqlitePool, limit: i64) -> AppResult<Vec<TopBook>> {
    Ok(sqlx::query_as::<_, TopBook>(
        r#"SELECT b.id AS book_id, b.title, b.author, COUNT(l.id) AS loan_count
           FROM loans l JOIN books b ON b.id = l.book_id
           GROUP BY b.id
           ORDER BY loan_count DESC, b.title COLLATE NOCASE
           LIMIT ?1"#,
    )
    .bind(limit)
    .fetch_all(db)
    .await?)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dataset {
    Loans,
    Books,
    Penalties,
}

impl std::str::FromStr for Dataset {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "loans" => Ok(Dataset::Loans),
            "books" => Ok(Dataset::Books),
            "penalties" => Ok(Dataset::Penalties),
            _ => Err(AppError::BadRequest("Invalid dataset. Use 'loans', 'books' or 'penalties'".to_string())),
        }
    }
}

impl Dataset {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dataset::Loans => "loans",
            Dataset::Books => "books",
            Dataset::Penalties => "penalties",
        }
    }
}

pub enum ExportRows {
    Loans(Vec<LoanDto>),
    Books(Vec<BookDto>),
    Penalties(Vec<PenaltyDto>),
}

impl ExportRows {
    pub fn len(&self) -> usize {
        match self {
            ExportRows::Loans(v) => v.len(),
            ExportRows::Books(v) => v.len(),
            ExportRows::Penalties(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Pages through `sql` (which must end with `LIMIT ?1 OFFSET ?2`) until
/// `limit` rows were read.
async fn fetch_chunked<T>(db: &SqlitePool, sql: &str, limit: i64) -> AppResult<Vec<T>>
where
    T: for<'r> FromRow<'r, SqliteRow> + Send + Unpin,
{
    let mut results = Vec::new();
    let mut offset: i64 = 0;
    while offset < limit {
        let batch = (limit - offset).min(EXPORT_CHUNK_SIZE);
        let rows = sqlx::query_as::<_, T>(sql).bind(batch).bind(offset).fetch_all(db).await?;
        let fetched = rows.len() as i64;
        results.extend(rows);
        offset += fetched;
        if fetched < batch {
            break;
        }
    }
    Ok(results)
}

pub async fn export(db: &SqlitePool, dataset: Dataset, limit: i64) -> AppResult<ExportRows> {
    let limit = limit.clamp(1, MAX_EXPORT_ROWS);
    let rows = match dataset {
        Dataset::Loans => ExportRows::Loans(
            fetch_chunked(
                db,
                r#"SELECT l.id, l.user_id, l.book_id, b.title AS book_title, u.username,
                          l.loan_date, l.due_date, l.return_date, l.status, l.renewal_count
                   FROM loans l JOIN books b ON b.id = l.book_id JOIN users u ON u.id = l.user_id
                   ORDER BY l.id LIMIT ?1 OFFSET ?2"#,
                limit,
            )
            .await?,
        ),
        Dataset::Books => ExportRows::Books(
            fetch_chunked(
                db,
                r#"SELECT id, isbn, title, author, publisher, publication_year, category, keywords, language,
                          location, total_copies, available_copies, created_at, updated_at
                   FROM books ORDER BY id LIMIT ?1 OFFSET ?2"#,
                limit,
            )
            .await?,
        ),
        Dataset::Penalties => ExportRows::Penalties(
            fetch_chunked(
                db,
                r#"SELECT id, user_id, loan_id, kind, amount, status, description, created_at, paid_at
                   FROM penalties ORDER BY id LIMIT ?1 OFFSET ?2"#,
                limit,
            )
            .await?,
        ),
    };
    tracing::info!(dataset = dataset.as_str(), rows = rows.len(), "Export generated");
    Ok(rows)
}
