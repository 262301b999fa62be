use sqlx::SqlitePool;

const SCHEMA: &[(&str, &str)] = &[
    (
        "users",
        r#"CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT NOT NULL UNIQUE COLLATE NOCASE,
            display_name TEXT NOT NULL,
            email TEXT NULL,
            department TEXT NULL,
            role TEXT NOT NULL DEFAULT 'student',
            role_override TEXT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            last_login_at TEXT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )"#,
    ),
    (
        "sessions",
        r#"CREATE TABLE IF NOT EXISTS sessions (
            token TEXT PRIMARY KEY,
            user_id INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            expires_at TEXT NOT NULL,
            FOREIGN KEY(user_id) REFERENCES users(id) ON DELETE CASCADE
        )"#,
    ),
    (
        "books",
        r#"CREATE TABLE IF NOT EXISTS books (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            isbn TEXT NULL UNIQUE,
            title TEXT NOT NULL,
            author TEXT NOT NULL,
            publisher TEXT NULL,
            publication_year INTEGER NULL,
            category TEXT NULL,
            keywords TEXT NULL,
            language TEXT NOT NULL DEFAULT 'fr',
            location TEXT NULL,
            total_copies INTEGER NOT NULL CHECK (total_copies >= 0),
            available_copies INTEGER NOT NULL CHECK (available_copies >= 0 AND available_copies <= total_copies),
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )"#,
    ),
    (
        "academic_documents",
        r#"CREATE TABLE IF NOT EXISTS academic_documents (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            kind TEXT NOT NULL CHECK (kind IN ('thesis','memoir','internship_report')),
            title TEXT NOT NULL,
            author TEXT NOT NULL,
            supervisor TEXT NULL,
            institution TEXT NULL,
            department TEXT NULL,
            degree TEXT NULL,
            year INTEGER NULL,
            abstract_text TEXT NULL,
            keywords TEXT NULL,
            file_key TEXT NULL,
            file_name TEXT NULL,
            file_size INTEGER NULL,
            mime_type TEXT NULL,
            download_count INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )"#,
    ),
    (
        "loans",
        r#"CREATE TABLE IF NOT EXISTS loans (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            book_id INTEGER NOT NULL,
            loan_date TEXT NOT NULL,
            due_date TEXT NOT NULL,
            return_date TEXT NULL,
            status TEXT NOT NULL DEFAULT 'active',
            renewal_count INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(user_id) REFERENCES users(id),
            FOREIGN KEY(book_id) REFERENCES books(id)
        )"#,
    ),
    (
        "reservations",
        r#"CREATE TABLE IF NOT EXISTS reservations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            book_id INTEGER NOT NULL,
            reservation_date TEXT NOT NULL,
            priority_order INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            ready_at TEXT NULL,
            expires_at TEXT NULL,
            FOREIGN KEY(user_id) REFERENCES users(id),
            FOREIGN KEY(book_id) REFERENCES books(id) ON DELETE CASCADE
        )"#,
    ),
    (
        "penalties",
        r#"CREATE TABLE IF NOT EXISTS penalties (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            loan_id INTEGER NULL,
            kind TEXT NOT NULL,
            amount INTEGER NOT NULL CHECK (amount >= 0),
            status TEXT NOT NULL DEFAULT 'unpaid',
            description TEXT NULL,
            created_at TEXT NOT NULL,
            paid_at TEXT NULL,
            FOREIGN KEY(user_id) REFERENCES users(id),
            FOREIGN KEY(loan_id) REFERENCES loans(id)
        )"#,
    ),
    (
        "activity_log",
        r#"CREATE TABLE IF NOT EXISTS activity_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NULL,
            action TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id INTEGER NULL,
            details TEXT NULL,
            created_at TEXT NOT NULL
        )"#,
    ),
];

const INDEXES: &[(&str, &str)] = &[
    ("idx_sessions_expires", "CREATE INDEX IF NOT EXISTS idx_sessions_expires ON sessions(expires_at)"),
    ("idx_books_title", "CREATE INDEX IF NOT EXISTS idx_books_title ON books(title)"),
    ("idx_books_category", "CREATE INDEX IF NOT EXISTS idx_books_category ON books(category)"),
    ("idx_docs_kind_year", "CREATE INDEX IF NOT EXISTS idx_docs_kind_year ON academic_documents(kind, year)"),
    ("idx_loans_user_status", "CREATE INDEX IF NOT EXISTS idx_loans_user_status ON loans(user_id, status)"),
    ("idx_loans_book_status", "CREATE INDEX IF NOT EXISTS idx_loans_book_status ON loans(book_id, status)"),
    ("idx_loans_status_due", "CREATE INDEX IF NOT EXISTS idx_loans_status_due ON loans(status, due_date)"),
    ("idx_loans_loan_date", "CREATE INDEX IF NOT EXISTS idx_loans_loan_date ON loans(loan_date)"),
    (
        "idx_reservations_book_queue",
        "CREATE INDEX IF NOT EXISTS idx_reservations_book_queue ON reservations(book_id, status, priority_order)",
    ),
    ("idx_reservations_user", "CREATE INDEX IF NOT EXISTS idx_reservations_user ON reservations(user_id, status)"),
    ("idx_penalties_user_status", "CREATE INDEX IF NOT EXISTS idx_penalties_user_status ON penalties(user_id, status)"),
    ("idx_activity_created", "CREATE INDEX IF NOT EXISTS idx_activity_created ON activity_log(created_at DESC)"),
];

pub async fn init_db(pool: &SqlitePool) -> anyhow::Result<()> {
    // Pragmas for better durability/performance
    if let Err(e) = sqlx::query("PRAGMA journal_mode=WAL;").execute(pool).await {
        tracing::warn!("Failed to set WAL journal mode: {}", e);
    }
    if let Err(e) = sqlx::query("PRAGMA synchronous=NORMAL;").execute(pool).await {
        tracing::warn!("Failed to set synchronous mode: {}", e);
    }
    // Foreign keys are critical - fail if this doesn't work
    sqlx::query("PRAGMA foreign_keys=ON;").execute(pool).await?;
    if let Err(e) = sqlx::query("PRAGMA busy_timeout=10000;").execute(pool).await {
        tracing::warn!("Failed to set busy_timeout: {}", e);
    }

    for (table, ddl) in SCHEMA {
        sqlx::query(ddl)
            .execute(pool)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to create table {}: {}", table, e))?;
    }

    for (name, query) in INDEXES {
        if let Err(e) = sqlx::query(query).execute(pool).await {
            match &e {
                sqlx::Error::Database(db_err) => {
                    let msg = db_err.message().to_lowercase();
                    if msg.contains("already exists") || msg.contains("duplicate") {
                        tracing::debug!("Index {} already exists, skipping", name);
                    } else {
                        tracing::warn!("Failed to create index {}: {}", name, e);
                    }
                }
                _ => {
                    tracing::warn!("Failed to create index {}: {}", name, e);
                }
            }
        }
    }

    Ok(())
}
