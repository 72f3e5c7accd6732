use crate::db::*;
use crate::error::{AppError, Result};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::Arc;

const BOOK_COLUMNS: &str = "id, title, authors_json, description, language, genres_json, format,
                            file_size, created_at, updated_at";

/// Database wrapper for thread-safe access.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        // Create parent directories if needed
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| AppError::Internal(format!("Failed to open database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_schema()?;
        Ok(db)
    }

    /// Open in-memory database (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| AppError::Internal(format!("Failed to open database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_schema()?;
        Ok(db)
    }

    /// Initialize database schema.
    fn initialize_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS books (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                authors_json TEXT,
                description TEXT,
                language TEXT,
                genres_json TEXT,
                format TEXT NOT NULL,
                file_size INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_books_title ON books(title);
            CREATE INDEX IF NOT EXISTS idx_books_language ON books(language);
            CREATE INDEX IF NOT EXISTS idx_books_updated ON books(updated_at);

            CREATE TABLE IF NOT EXISTS catalog_meta (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                revision INTEGER NOT NULL
            );

            INSERT OR IGNORE INTO catalog_meta (id, revision) VALUES (1, 0);
            "#,
        )
        .map_err(|e| AppError::Internal(format!("Failed to initialize schema: {}", e)))?;

        Ok(())
    }

    /// Save or update a book.
    pub fn save_book(&self, book: &StoredBook) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| AppError::Upstream(format!("Failed to save book: {}", e)))?;
        tx.execute(
            "INSERT INTO books
             (id, title, authors_json, description, language, genres_json, format,
              file_size, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT (id) DO UPDATE SET
                title = excluded.title,
                authors_json = excluded.authors_json,
                description = excluded.description,
                language = excluded.language,
                genres_json = excluded.genres_json,
                format = excluded.format,
                file_size = excluded.file_size,
                updated_at = excluded.updated_at",
            params![
                book.id,
                book.title,
                book.authors_json,
                book.description,
                book.language,
                book.genres_json,
                book.format,
                book.file_size,
                book.created_at,
                book.updated_at,
            ],
        )
        .map_err(|e| AppError::Upstream(format!("Failed to save book: {}", e)))?;
        bump_revision(&tx)?;
        tx.commit()
            .map_err(|e| AppError::Upstream(format!("Failed to save book: {}", e)))
    }

    /// Get book by ID.
    pub fn get_book(&self, id: &str) -> Result<Option<StoredBook>> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("SELECT {} FROM books WHERE id = ?1", BOOK_COLUMNS),
            params![id],
            Self::row_to_stored_book,
        )
        .optional()
        .map_err(|e| AppError::Upstream(format!("Failed to get book: {}", e)))
    }

    /// Delete a single book by ID.
    pub fn delete_book(&self, id: &str) -> Result<bool> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| AppError::Upstream(format!("Failed to delete book: {}", e)))?;
        let rows = tx
            .execute("DELETE FROM books WHERE id = ?1", params![id])
            .map_err(|e| AppError::Upstream(format!("Failed to delete book: {}", e)))?;
        if rows > 0 {
            bump_revision(&tx)?;
        }
        tx.commit()
            .map_err(|e| AppError::Upstream(format!("Failed to delete book: {}", e)))?;
        Ok(rows > 0)
    }

    /// Count books, optionally in one language.
    pub fn count_books(&self, language: Option<&str>) -> Result<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM books WHERE ?1 IS NULL OR language = ?1",
                params![language],
                |row| row.get(0),
            )
            .map_err(|e| AppError::Upstream(format!("Failed to count books: {}", e)))?;
        Ok(count as u64)
    }

    /// One page of books, optionally in one language.
    pub fn list_books(
        &self,
        language: Option<&str>,
        order: BookOrder,
        offset: u64,
        limit: u32,
    ) -> Result<Vec<StoredBook>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM books WHERE ?1 IS NULL OR language = ?1
                 ORDER BY {} LIMIT ?2 OFFSET ?3",
                BOOK_COLUMNS,
                order.sql()
            ))
            .map_err(|e| AppError::Upstream(format!("Failed to prepare query: {}", e)))?;

        let books = stmt
            .query_map(
                params![language, limit, offset as i64],
                Self::row_to_stored_book,
            )
            .map_err(|e| AppError::Upstream(format!("Failed to list books: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Upstream(format!("Failed to collect books: {}", e)))?;

        Ok(books)
    }

    /// Count books whose title or authors contain `query`.
    pub fn count_search(&self, query: &str) -> Result<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM books
                 WHERE title LIKE ?1 ESCAPE '\\' OR authors_json LIKE ?1 ESCAPE '\\'",
                params![like_pattern(query)],
                |row| row.get(0),
            )
            .map_err(|e| AppError::Upstream(format!("Failed to count search: {}", e)))?;
        Ok(count as u64)
    }

    /// One page of books whose title or authors contain `query`.
    pub fn search_books(&self, query: &str, offset: u64, limit: u32) -> Result<Vec<StoredBook>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM books
                 WHERE title LIKE ?1 ESCAPE '\\' OR authors_json LIKE ?1 ESCAPE '\\'
                 ORDER BY title COLLATE NOCASE, id LIMIT ?2 OFFSET ?3",
                BOOK_COLUMNS
            ))
            .map_err(|e| AppError::Upstream(format!("Failed to prepare query: {}", e)))?;

        let books = stmt
            .query_map(
                params![like_pattern(query), limit, offset as i64],
                Self::row_to_stored_book,
            )
            .map_err(|e| AppError::Upstream(format!("Failed to search books: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Upstream(format!("Failed to collect books: {}", e)))?;

        Ok(books)
    }

    /// Languages present in the catalog with their book counts.
    pub fn language_counts(&self) -> Result<Vec<(String, u64)>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT language, COUNT(*) FROM books
                 WHERE language IS NOT NULL AND language != ''
                 GROUP BY language ORDER BY language",
            )
            .map_err(|e| AppError::Upstream(format!("Failed to prepare query: {}", e)))?;

        let counts = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
            })
            .map_err(|e| AppError::Upstream(format!("Failed to count languages: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Upstream(format!("Failed to collect languages: {}", e)))?;

        Ok(counts)
    }

    /// Catalog revision, used as the feed cache freshness token.
    ///
    /// A counter that every successful save and every delete that removed a
    /// row advance in the same transaction, so it never repeats a value.
    pub fn watermark(&self) -> Result<String> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT revision FROM catalog_meta WHERE id = 1",
            [],
            |row| row.get::<_, i64>(0),
        )
        .map(|revision| revision.to_string())
        .map_err(|e| AppError::Upstream(format!("Failed to read watermark: {}", e)))
    }

    /// Helper to convert a row to StoredBook.
    fn row_to_stored_book(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredBook> {
        Ok(StoredBook {
            id: row.get(0)?,
            title: row.get(1)?,
            authors_json: row.get(2)?,
            description: row.get(3)?,
            language: row.get(4)?,
            genres_json: row.get(5)?,
            format: row.get(6)?,
            file_size: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }
}

/// Advance the catalog revision inside the writer's transaction.
fn bump_revision(tx: &rusqlite::Transaction<'_>) -> Result<()> {
    tx.execute("UPDATE catalog_meta SET revision = revision + 1 WHERE id = 1", [])
        .map_err(|e| AppError::Upstream(format!("Failed to bump revision: {}", e)))?;
    Ok(())
}

/// `%query%` with LIKE wildcards in the query escaped.
fn like_pattern(query: &str) -> String {
    let escaped = query
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}
