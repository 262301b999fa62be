#[cfg(test)]
mod tests {
    use crate::db;
    use crate::tests::support::test_pool;
    use tempfile::TempDir;

    const NOW: &str = "2024-03-01T08:00:00Z";

    async fn insert_book(pool: &sqlx::SqlitePool, isbn: Option<&str>, total: i64, available: i64) -> Result<i64, sqlx::Error> {
        let res = sqlx::query(
            "INSERT INTO books (isbn, title, author, total_copies, available_copies, created_at, updated_at)
             VALUES (?1, 'Une vie de boy', 'Ferdinand Oyono', ?2, ?3, ?4, ?4)",
        )
        .bind(isbn)
        .bind(total)
        .bind(available)
        .bind(NOW)
        .execute(pool)
        .await?;
        Ok(res.last_insert_rowid())
    }

    #[tokio::test]
    async fn test_init_db_creates_tables() {
        let dir = TempDir::new().unwrap();
        let pool = test_pool(&dir).await;

        let tables: Vec<String> =
            sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name")
                .fetch_all(&pool)
                .await
                .unwrap();
        assert_eq!(
            tables,
            vec!["academic_documents", "activity_log", "books", "loans", "penalties", "reservations", "sessions", "users"]
        );

        let indexes: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name LIKE 'idx_%'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert!(indexes >= 10);
    }

    #[tokio::test]
    async fn test_init_db_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let pool = test_pool(&dir).await;
        insert_book(&pool, None, 1, 1).await.unwrap();

        db::init_db(&pool).await.unwrap();

        let books: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM books").fetch_one(&pool).await.unwrap();
        assert_eq!(books, 1);
    }

    #[tokio::test]
    async fn test_copy_counts_are_checked() {
        let dir = TempDir::new().unwrap();
        let pool = test_pool(&dir).await;

        assert!(insert_book(&pool, None, 2, 3).await.is_err());
        assert!(insert_book(&pool, None, 2, -1).await.is_err());
        let id = insert_book(&pool, None, 2, 2).await.unwrap();

        let res = sqlx::query("UPDATE books SET available_copies = available_copies + 1 WHERE id = ?1")
            .bind(id)
            .execute(&pool)
            .await;
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn test_unique_isbn_and_username() {
        let dir = TempDir::new().unwrap();
        let pool = test_pool(&dir).await;

        insert_book(&pool, Some("9782266124560"), 1, 1).await.unwrap();
        assert!(insert_book(&pool, Some("9782266124560"), 1, 1).await.is_err());
        // Plusieurs livres sans ISBN
        insert_book(&pool, None, 1, 1).await.unwrap();
        insert_book(&pool, None, 1, 1).await.unwrap();

        let insert_user = |name: &'static str| {
            sqlx::query(
                "INSERT INTO users (username, display_name, created_at, updated_at) VALUES (?1, ?1, ?2, ?2)",
            )
            .bind(name)
            .bind(NOW)
            .execute(&pool)
        };
        insert_user("nkeng").await.unwrap();
        assert!(insert_user("NKENG").await.is_err());
    }

    #[tokio::test]
    async fn test_document_kind_checked() {
        let dir = TempDir::new().unwrap();
        let pool = test_pool(&dir).await;

        let res = sqlx::query(
            "INSERT INTO academic_documents (kind, title, author, created_at, updated_at) VALUES ('poster', 'x', 'y', ?1, ?1)",
        )
        .bind(NOW)
        .execute(&pool)
        .await;
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn test_sessions_cascade_with_user() {
        let dir = TempDir::new().unwrap();
        let pool = test_pool(&dir).await;

        let user_id = sqlx::query(
            "INSERT INTO users (username, display_name, created_at, updated_at) VALUES ('tchana', 'Tchana', ?1, ?1)",
        )
        .bind(NOW)
        .execute(&pool)
        .await
        .unwrap()
        .last_insert_rowid();
        sqlx::query("INSERT INTO sessions (token, user_id, created_at, expires_at) VALUES ('t1', ?1, ?2, ?2)")
            .bind(user_id)
            .bind(NOW)
            .execute(&pool)
            .await
            .unwrap();

        sqlx::query("DELETE FROM users WHERE id = ?1").bind(user_id).execute(&pool).await.unwrap();
        let sessions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sessions").fetch_one(&pool).await.unwrap();
        assert_eq!(sessions, 0);

        // Un prêt doit référencer un lecteur existant
        let res = sqlx::query(
            "INSERT INTO loans (user_id, book_id, loan_date, due_date) VALUES (9999, 9999, ?1, ?1)",
        )
        .bind(NOW)
        .execute(&pool)
        .await;
        assert!(res.is_err());
    }
}
