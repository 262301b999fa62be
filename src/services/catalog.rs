//! Books, academic documents and the unified catalog search.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use crate::error::{validation, AppError, AppResult, OptionExt};
use crate::metrics::Metrics;
use crate::services::cache::CatalogCache;
use crate::services::reservations;
use crate::storage::DocumentStore;
use crate::types::{
    AcademicDocumentDto, AcademicDocumentInput, BookDto, BookInput, CatalogItem, DocumentKind, Page,
    SearchResponse,
};
use crate::util::{clean_text, escape_like_pattern, time::format_ts};

const BOOK_COLUMNS: &str = "id, isbn, title, author, publisher, publication_year, category, keywords, language, location, total_copies, available_copies, created_at, updated_at";
const DOC_COLUMNS: &str = "id, kind, title, author, supervisor, institution, department, degree, year, abstract_text, keywords, file_key, file_name, file_size, mime_type, download_count, created_at, updated_at";

pub const MAX_QUERY_LEN: usize = 200;
pub const DEFAULT_LIMIT: i64 = 20;
pub const MAX_LIMIT: i64 = 100;
pub const MAX_OFFSET: i64 = 10_000;

fn opt_text(value: &Option<String>, field: &str, max_len: usize) -> AppResult<Option<String>> {
    let cleaned = clean_text(value.as_deref());
    if let Some(v) = &cleaned {
        validation::require_text(v, field, max_len)?;
    }
    Ok(cleaned)
}

// ---------------- Books ----------------

struct CleanBook {
    isbn: Option<String>,
    title: String,
    author: String,
    publisher: Option<String>,
    publication_year: Option<i64>,
    category: Option<String>,
    keywords: Option<String>,
    language: String,
    location: Option<String>,
    total_copies: i64,
}

fn clean_book(input: &BookInput) -> AppResult<CleanBook> {
    validation::require_text(&input.title, "title", 500)?;
    validation::require_text(&input.author, "author", 300)?;
    validation::validate_year(input.publication_year, "publication_year")?;
    let total_copies = input.total_copies.unwrap_or(1);
    validation::validate_positive_number(Some(total_copies), "total_copies")?;

    let isbn = opt_text(&input.isbn, "isbn", 20)?.map(|s| s.replace([' ', '-'], ""));
    if let Some(isbn) = &isbn {
        let valid = (isbn.len() == 10 || isbn.len() == 13)
            && isbn.chars().enumerate().all(|(i, c)| c.is_ascii_digit() || (i == 9 && isbn.len() == 10 && (c == 'X' || c == 'x')));
        if !valid {
            return Err(AppError::ValidationError {
                field: "isbn".to_string(),
                message: "ISBN must have 10 or 13 digits".to_string(),
            });
        }
    }

    Ok(CleanBook {
        isbn,
        title: input.title.trim().to_string(),
        author: input.author.trim().to_string(),
        publisher: opt_text(&input.publisher, "publisher", 300)?,
        publication_year: input.publication_year,
        category: opt_text(&input.category, "category", 100)?,
        keywords: opt_text(&input.keywords, "keywords", 1000)?,
        language: opt_text(&input.language, "language", 10)?.unwrap_or_else(|| "fr".to_string()),
        location: opt_text(&input.location, "location", 100)?,
        total_copies,
    })
}

pub async fn get_book(db: &SqlitePool, id: i64) -> AppResult<BookDto> {
    let sql = format!("SELECT {} FROM books WHERE id = ?1", BOOK_COLUMNS);
    sqlx::query_as::<_, BookDto>(&sql).bind(id).fetch_optional(db).await?.ok_or_not_found("Book")
}

pub async fn create_book(db: &SqlitePool, input: &BookInput, now: DateTime<Utc>) -> AppResult<BookDto> {
    let b = clean_book(input)?;
    let ts = format_ts(now);
    let res = sqlx::query(
        r#"INSERT INTO books (isbn, title, author, publisher, publication_year, category, keywords, language,
                              location, total_copies, available_copies, created_at, updated_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10, ?11, ?11)"#,
    )
    .bind(&b.isbn)
    .bind(&b.title)
    .bind(&b.author)
    .bind(&b.publisher)
    .bind(b.publication_year)
    .bind(&b.category)
    .bind(&b.keywords)
    .bind(&b.language)
    .bind(&b.location)
    .bind(b.total_copies)
    .bind(&ts)
    .execute(db)
    .await?;
    let book = get_book(db, res.last_insert_rowid()).await?;
    tracing::info!(book_id = book.id, title = %book.title, copies = book.total_copies, "Book created");
    Ok(book)
}

/// Updates a book. A change of `total_copies` moves `available_copies` by the
/// same amount; copies out on loan or held for a ready reservation cannot be
/// removed. Added copies go to the
/// reservation queue first.
pub async fn update_book(
    db: &SqlitePool,
    hold_days: i64,
    id: i64,
    input: &BookInput,
    now: DateTime<Utc>,
) -> AppResult<BookDto> {
    let b = clean_book(input)?;
    let mut tx = db.begin().await?;

    let touched = sqlx::query("UPDATE books SET updated_at = ?1 WHERE id = ?2")
        .bind(format_ts(now))
        .bind(id)
        .execute(&mut *tx)
        .await?;
    if touched.rows_affected() == 0 {
        return Err(AppError::NotFound("Book not found".to_string()));
    }
    let (total, available): (i64, i64) =
        sqlx::query_as("SELECT total_copies, available_copies FROM books WHERE id = ?1")
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;

    let new_total = input.total_copies.unwrap_or(total);
    let new_available = available + (new_total - total);
    if new_available < 0 {
        return Err(AppError::Conflict(format!(
            "Cannot reduce copies to {}: {} copies are on loan",
            new_total,
            total - available
        )));
    }
    let held = reservations::held_copies(&mut *tx, id).await?;
    if new_available < held {
        return Err(AppError::Conflict(format!(
            "Cannot reduce copies to {}: {} copies are held for ready reservations",
            new_total, held
        )));
    }

    sqlx::query(
        r#"UPDATE books SET isbn = ?1, title = ?2, author = ?3, publisher = ?4, publication_year = ?5,
               category = ?6, keywords = ?7, language = ?8, location = ?9,
               total_copies = ?10, available_copies = ?11
           WHERE id = ?12"#,
    )
    .bind(&b.isbn)
    .bind(&b.title)
    .bind(&b.author)
    .bind(&b.publisher)
    .bind(b.publication_year)
    .bind(&b.category)
    .bind(&b.keywords)
    .bind(&b.language)
    .bind(&b.location)
    .bind(new_total)
    .bind(new_available)
    .bind(id)
    .execute(&mut *tx)
    .await?;
    if new_available > available {
        reservations::promote_next(&mut *tx, id, hold_days, now).await?;
    }
    tx.commit().await?;

    get_book(db, id).await
}

pub async fn delete_book(db: &SqlitePool, id: i64) -> AppResult<()> {
    let mut tx = db.begin().await?;
    let touched = sqlx::query("UPDATE books SET updated_at = updated_at WHERE id = ?1")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    if touched.rows_affected() == 0 {
        return Err(AppError::NotFound("Book not found".to_string()));
    }
    let on_loan: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM loans WHERE book_id = ?1 AND status IN ('active','overdue')",
    )
    .bind(id)
    .fetch_one(&mut *tx)
    .await?;
    if on_loan > 0 {
        return Err(AppError::Conflict(format!("Book has {} active loan(s)", on_loan)));
    }
    // L'historique des prêts garde une référence vers le livre
    let history: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM loans WHERE book_id = ?1")
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;
    if history > 0 {
        return Err(AppError::Conflict("Book has loan history and cannot be deleted".to_string()));
    }
    sqlx::query("DELETE FROM books WHERE id = ?1").bind(id).execute(&mut *tx).await?;
    tx.commit().await?;
    tracing::info!(book_id = id, "Book deleted");
    Ok(())
}

pub async fn list_books(db: &SqlitePool, category: Option<&str>, limit: i64, offset: i64) -> AppResult<Page<BookDto>> {
    let category = clean_text(category);

    let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM books");
    let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM books", BOOK_COLUMNS));
    if let Some(c) = &category {
        count.push(" WHERE category = ").push_bind(c.clone()).push(" COLLATE NOCASE");
        qb.push(" WHERE category = ").push_bind(c.clone()).push(" COLLATE NOCASE");
    }
    let total_count: i64 = count.build_query_scalar::<i64>().fetch_one(db).await?;
    qb.push(" ORDER BY title COLLATE NOCASE, id LIMIT ").push_bind(limit).push(" OFFSET ").push_bind(offset);
    let items = qb.build_query_as::<BookDto>().fetch_all(db).await?;
    Ok(Page { items, total_count, limit, offset })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryCount {
    pub category: String,
    pub count: i64,
}

pub async fn categories(db: &SqlitePool) -> AppResult<Vec<CategoryCount>> {
    let rows = sqlx::query(
        r#"SELECT category, COUNT(*) AS cnt FROM books
           WHERE category IS NOT NULL AND category <> ''
           GROUP BY category COLLATE NOCASE ORDER BY category COLLATE NOCASE"#,
    )
    .fetch_all(db)
    .await?;
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(CategoryCount { category: row.try_get("category")?, count: row.try_get("cnt")? });
    }
    Ok(out)
}

// ---------------- Academic documents ----------------

pub async fn get_document(db: &SqlitePool, id: i64) -> AppResult<AcademicDocumentDto> {
    let sql = format!("SELECT {} FROM academic_documents WHERE id = ?1", DOC_COLUMNS);
    sqlx::query_as::<_, AcademicDocumentDto>(&sql)
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or_not_found("Document")
}

fn validate_document(input: &AcademicDocumentInput) -> AppResult<()> {
    validation::require_text(&input.title, "title", 500)?;
    validation::require_text(&input.author, "author", 300)?;
    validation::validate_year(input.year, "year")?;
    Ok(())
}

pub async fn create_document(
    db: &SqlitePool,
    input: &AcademicDocumentInput,
    now: DateTime<Utc>,
) -> AppResult<AcademicDocumentDto> {
    validate_document(input)?;
    let ts = format_ts(now);
    let res = sqlx::query(
        r#"INSERT INTO academic_documents (kind, title, author, supervisor, institution, department, degree, year,
                                           abstract_text, keywords, download_count, created_at, updated_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 0, ?11, ?11)"#,
    )
    .bind(input.kind.as_str())
    .bind(input.title.trim())
    .bind(input.author.trim())
    .bind(opt_text(&input.supervisor, "supervisor", 300)?)
    .bind(opt_text(&input.institution, "institution", 300)?)
    .bind(opt_text(&input.department, "department", 200)?)
    .bind(opt_text(&input.degree, "degree", 100)?)
    .bind(input.year)
    .bind(clean_abstract(input.abstract_text.as_deref()))
    .bind(opt_text(&input.keywords, "keywords", 1000)?)
    .bind(&ts)
    .execute(db)
    .await?;
    let doc = get_document(db, res.last_insert_rowid()).await?;
    tracing::info!(document_id = doc.id, kind = %doc.kind, title = %doc.title, "Academic document created");
    Ok(doc)
}

/// Abstracts keep their line breaks.
fn clean_abstract(raw: Option<&str>) -> Option<String> {
    let s: String = raw?.chars().filter(|c| !c.is_control() || *c == '\n').collect();
    let s = s.trim();
    (!s.is_empty()).then(|| s.chars().take(10_000).collect())
}

pub async fn update_document(
    db: &SqlitePool,
    id: i64,
    input: &AcademicDocumentInput,
    now: DateTime<Utc>,
) -> AppResult<AcademicDocumentDto> {
    validate_document(input)?;
    let res = sqlx::query(
        r#"UPDATE academic_documents SET kind = ?1, title = ?2, author = ?3, supervisor = ?4, institution = ?5,
               department = ?6, degree = ?7, year = ?8, abstract_text = ?9, keywords = ?10, updated_at = ?11
           WHERE id = ?12"#,
    )
    .bind(input.kind.as_str())
    .bind(input.title.trim())
    .bind(input.author.trim())
    .bind(opt_text(&input.supervisor, "supervisor", 300)?)
    .bind(opt_text(&input.institution, "institution", 300)?)
    .bind(opt_text(&input.department, "department", 200)?)
    .bind(opt_text(&input.degree, "degree", 100)?)
    .bind(input.year)
    .bind(clean_abstract(input.abstract_text.as_deref()))
    .bind(opt_text(&input.keywords, "keywords", 1000)?)
    .bind(format_ts(now))
    .bind(id)
    .execute(db)
    .await?;
    if res.rows_affected() == 0 {
        return Err(AppError::NotFound("Document not found".to_string()));
    }
    get_document(db, id).await
}

/// Deletes the record, then its file. A file that cannot be removed is logged
/// and left behind.
pub async fn delete_document(db: &SqlitePool, store: &dyn DocumentStore, id: i64) -> AppResult<()> {
    let doc = get_document(db, id).await?;
    sqlx::query("DELETE FROM academic_documents WHERE id = ?1").bind(id).execute(db).await?;
    if let Some(key) = &doc.file_key {
        if let Err(e) = store.delete(key).await {
            tracing::warn!(document_id = id, key = %key, "Failed to delete stored file: {}", e);
        }
    }
    tracing::info!(document_id = id, "Academic document deleted");
    Ok(())
}

#[derive(Debug, Clone, Default)]
pub struct DocumentFilter {
    pub kind: Option<DocumentKind>,
    pub department: Option<String>,
    pub year: Option<i64>,
}

pub async fn list_documents(
    db: &SqlitePool,
    filter: &DocumentFilter,
    limit: i64,
    offset: i64,
) -> AppResult<Page<AcademicDocumentDto>> {
    fn push_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &DocumentFilter) {
        qb.push(" WHERE 1 = 1");
        if let Some(kind) = filter.kind {
            qb.push(" AND kind = ").push_bind(kind.as_str());
        }
        if let Some(dep) = clean_text(filter.department.as_deref()) {
            qb.push(" AND department = ").push_bind(dep).push(" COLLATE NOCASE");
        }
        if let Some(year) = filter.year {
            qb.push(" AND year = ").push_bind(year);
        }
    }

    let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM academic_documents");
    push_filter(&mut count, filter);
    let total_count: i64 = count.build_query_scalar::<i64>().fetch_one(db).await?;

    let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM academic_documents", DOC_COLUMNS));
    push_filter(&mut qb, filter);
    qb.push(" ORDER BY year DESC, title COLLATE NOCASE, id LIMIT ")
        .push_bind(limit)
        .push(" OFFSET ")
        .push_bind(offset);
    let items = qb.build_query_as::<AcademicDocumentDto>().fetch_all(db).await?;
    Ok(Page { items, total_count, limit, offset })
}

/// Points the document at a newly stored file. Returns the key of the file it
/// replaced, if any.
pub async fn attach_file(
    db: &SqlitePool,
    id: i64,
    key: &str,
    file_name: &str,
    size: i64,
    mime: &str,
    now: DateTime<Utc>,
) -> AppResult<Option<String>> {
    let mut tx = db.begin().await?;
    let touched = sqlx::query("UPDATE academic_documents SET updated_at = ?1 WHERE id = ?2")
        .bind(format_ts(now))
        .bind(id)
        .execute(&mut *tx)
        .await?;
    if touched.rows_affected() == 0 {
        return Err(AppError::NotFound("Document not found".to_string()));
    }
    let previous: Option<String> = sqlx::query_scalar("SELECT file_key FROM academic_documents WHERE id = ?1")
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;
    sqlx::query(
        "UPDATE academic_documents SET file_key = ?1, file_name = ?2, file_size = ?3, mime_type = ?4 WHERE id = ?5",
    )
    .bind(key)
    .bind(file_name)
    .bind(size)
    .bind(mime)
    .bind(id)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;
    Ok(previous.filter(|p| p != key))
}

pub async fn count_download(db: &SqlitePool, id: i64) -> AppResult<()> {
    sqlx::query("UPDATE academic_documents SET download_count = download_count + 1 WHERE id = ?1")
        .bind(id)
        .execute(db)
        .await?;
    Ok(())
}

// ---------------- Search ----------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchKind {
    All,
    Book,
    Document(DocumentKind),
}

impl SearchKind {
    fn parse(raw: Option<&str>) -> AppResult<Self> {
        match raw.map(str::trim).filter(|s| !s.is_empty()) {
            None | Some("all") => Ok(SearchKind::All),
            Some("book") => Ok(SearchKind::Book),
            Some(other) => other
                .parse::<DocumentKind>()
                .map(SearchKind::Document)
                .map_err(|_| AppError::InvalidInput(format!("Unknown kind: {}", other))),
        }
    }

    fn books(&self) -> bool {
        matches!(self, SearchKind::All | SearchKind::Book)
    }

    fn documents(&self) -> bool {
        !matches!(self, SearchKind::Book)
    }
}

/// Raw query string of `GET /catalog/search`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
    pub kind: Option<String>,
    pub category: Option<String>,
    pub department: Option<String>,
    pub year_from: Option<i64>,
    pub year_to: Option<i64>,
    pub available_only: Option<bool>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Validated search parameters. Their JSON form is the cache key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchParams {
    pub q: Option<String>,
    pub kind: SearchKind,
    pub category: Option<String>,
    pub department: Option<String>,
    pub year_from: Option<i64>,
    pub year_to: Option<i64>,
    pub available_only: bool,
    pub limit: i64,
    pub offset: i64,
}

impl SearchParams {
    pub fn from_query(query: &SearchQuery) -> AppResult<Self> {
        let q = clean_text(query.q.as_deref());
        if let Some(q) = &q {
            if q.chars().count() > MAX_QUERY_LEN {
                return Err(AppError::InvalidInput(format!(
                    "Search query exceeds {} characters",
                    MAX_QUERY_LEN
                )));
            }
        }
        validation::validate_year(query.year_from, "year_from")?;
        validation::validate_year(query.year_to, "year_to")?;
        if let (Some(from), Some(to)) = (query.year_from, query.year_to) {
            if from > to {
                return Err(AppError::InvalidInput("year_from must not be after year_to".to_string()));
            }
        }
        Ok(Self {
            q,
            kind: SearchKind::parse(query.kind.as_deref())?,
            category: clean_text(query.category.as_deref()),
            department: clean_text(query.department.as_deref()),
            year_from: query.year_from,
            year_to: query.year_to,
            available_only: query.available_only.unwrap_or(false),
            limit: query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT),
            offset: query.offset.unwrap_or(0).clamp(0, MAX_OFFSET),
        })
    }

    pub fn cache_key(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    // Les filtres catégorie/département ne s'appliquent qu'à un seul côté
    fn include_books(&self) -> bool {
        self.kind.books() && self.department.is_none()
    }

    fn include_documents(&self) -> bool {
        self.kind.documents() && self.category.is_none()
    }
}

fn push_book_part(qb: &mut QueryBuilder<'_, Sqlite>, p: &SearchParams) {
    qb.push(
        "SELECT 'book' AS item_type, id, title, author, isbn, category, publication_year AS year, \
         available_copies, total_copies, NULL AS kind, NULL AS supervisor, NULL AS department, 0 AS has_file \
         FROM books WHERE 1 = 1",
    );
    if let Some(q) = &p.q {
        let pattern = format!("%{}%", escape_like_pattern(q));
        qb.push(" AND (");
        for (i, col) in ["title", "author", "keywords", "isbn"].iter().enumerate() {
            if i > 0 {
                qb.push(" OR ");
            }
            qb.push(*col).push(" LIKE ").push_bind(pattern.clone()).push(" ESCAPE '!'");
        }
        qb.push(")");
    }
    if let Some(c) = &p.category {
        qb.push(" AND category = ").push_bind(c.clone()).push(" COLLATE NOCASE");
    }
    if let Some(y) = p.year_from {
        qb.push(" AND publication_year >= ").push_bind(y);
    }
    if let Some(y) = p.year_to {
        qb.push(" AND publication_year <= ").push_bind(y);
    }
    if p.available_only {
        qb.push(" AND available_copies > 0");
    }
}

fn push_document_part(qb: &mut QueryBuilder<'_, Sqlite>, p: &SearchParams) {
    qb.push(
        "SELECT 'document' AS item_type, id, title, author, NULL AS isbn, NULL AS category, year, \
         0 AS available_copies, 0 AS total_copies, kind, supervisor, department, \
         CASE WHEN file_key IS NULL THEN 0 ELSE 1 END AS has_file \
         FROM academic_documents WHERE 1 = 1",
    );
    if let SearchKind::Document(kind) = p.kind {
        qb.push(" AND kind = ").push_bind(kind.as_str());
    }
    if let Some(q) = &p.q {
        let pattern = format!("%{}%", escape_like_pattern(q));
        qb.push(" AND (");
        for (i, col) in ["title", "author", "keywords", "supervisor", "department"].iter().enumerate() {
            if i > 0 {
                qb.push(" OR ");
            }
            qb.push(*col).push(" LIKE ").push_bind(pattern.clone()).push(" ESCAPE '!'");
        }
        qb.push(")");
    }
    if let Some(d) = &p.department {
        qb.push(" AND department = ").push_bind(d.clone()).push(" COLLATE NOCASE");
    }
    if let Some(y) = p.year_from {
        qb.push(" AND year >= ").push_bind(y);
    }
    if let Some(y) = p.year_to {
        qb.push(" AND year <= ").push_bind(y);
    }
    if p.available_only {
        qb.push(" AND file_key IS NOT NULL");
    }
}

fn push_union(qb: &mut QueryBuilder<'_, Sqlite>, p: &SearchParams) {
    let mut first = true;
    if p.include_books() {
        push_book_part(qb, p);
        first = false;
    }
    if p.include_documents() {
        if !first {
            qb.push(" UNION ALL ");
        }
        push_document_part(qb, p);
    }
}

fn item_from_row(row: &sqlx::sqlite::SqliteRow) -> AppResult<CatalogItem> {
    let item_type: String = row.try_get("item_type")?;
    let item = if item_type == "book" {
        CatalogItem::Book {
            id: row.try_get("id")?,
            title: row.try_get("title")?,
            author: row.try_get("author")?,
            isbn: row.try_get("isbn")?,
            category: row.try_get("category")?,
            year: row.try_get("year")?,
            available_copies: row.try_get("available_copies")?,
            total_copies: row.try_get("total_copies")?,
        }
    } else {
        CatalogItem::Document {
            id: row.try_get("id")?,
            kind: row.try_get("kind")?,
            title: row.try_get("title")?,
            author: row.try_get("author")?,
            supervisor: row.try_get("supervisor")?,
            department: row.try_get("department")?,
            year: row.try_get("year")?,
            has_file: row.try_get::<i64, _>("has_file")? != 0,
        }
    };
    Ok(item)
}

/// Runs a catalog search, answering from the cache when possible.
pub async fn search(
    db: &SqlitePool,
    cache: &CatalogCache,
    metrics: &Metrics,
    params: &SearchParams,
) -> AppResult<SearchResponse> {
    let key = params.cache_key();
    if let Some(mut hit) = cache.get(&key) {
        Metrics::inc(&metrics.cache_hits);
        hit.cached = true;
        return Ok(hit);
    }
    Metrics::inc(&metrics.cache_misses);

    let response = if !params.include_books() && !params.include_documents() {
        SearchResponse { items: Vec::new(), total_count: 0, limit: params.limit, offset: params.offset, cached: false }
    } else {
        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM (");
        push_union(&mut count, params);
        count.push(")");
        let total_count: i64 = count.build_query_scalar::<i64>().fetch_one(db).await?;

        let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM (");
        push_union(&mut qb, params);
        qb.push(") ORDER BY title COLLATE NOCASE, item_type, id LIMIT ")
            .push_bind(params.limit)
            .push(" OFFSET ")
            .push_bind(params.offset);
        let rows = qb.build().fetch_all(db).await?;
        let items = rows.iter().map(item_from_row).collect::<AppResult<Vec<_>>>()?;

        SearchResponse { items, total_count, limit: params.limit, offset: params.offset, cached: false }
    };

    tracing::debug!(total = response.total_count, returned = response.items.len(), "Catalog search");
    cache.put(key, response.clone());
    Ok(response)
}
