//! Persistent catalog store for book records.
//!
//! This module provides `SQLite`-backed storage for [`BookRecord`]s keyed by
//! their stable external identifier. Both phases run against it: the sync
//! phase inserts and updates catalog metadata, the download pipeline scans
//! for candidates and records completion.
//!
//! Every write is a single-statement, single-record transaction; concurrent
//! callers never observe a partially written record.
//!
//! # Example
//!
//! ```ignore
//! use booksync::store::{BookStore, NewBook, BookStatus};
//! use booksync::Database;
//!
//! let db = Database::new(Path::new("library.db")).await?;
//! let store = BookStore::new(db);
//!
//! store.insert(&book).await?;
//! for candidate in store.download_candidates().await? {
//!     // ... fetch and convert ...
//!     store.mark_downloaded(&candidate.key).await?;
//! }
//! ```

mod error;
mod record;

pub use error::{StoreDbErrorKind, StoreError};
pub use record::{
    BookPatch, BookRecord, BookStatus, DownloadCandidate, NewBook, NO_DESCRIPTION, UNKNOWN_AUTHOR,
    UNKNOWN_LENGTH, is_known_author, is_known_cover, is_known_description, is_known_length,
};

use tracing::instrument;

use crate::db::Database;

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Returns `Ok(())` if at least one row was affected; otherwise
/// [`StoreError::RecordNotFound`].
fn check_affected(key: &str, rows_affected: u64) -> Result<()> {
    if rows_affected == 0 {
        Err(StoreError::RecordNotFound(key.to_string()))
    } else {
        Ok(())
    }
}

/// Catalog store for book records.
///
/// Provides atomic per-record operations backed by `SQLite` with WAL mode
/// for concurrent access.
#[derive(Debug, Clone)]
pub struct BookStore {
    db: Database,
}

impl BookStore {
    /// Creates a new store over the given database connection.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Gets a book by key.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn get(&self, key: &str) -> Result<Option<BookRecord>> {
        let record = sqlx::query_as::<_, BookRecord>(r"SELECT * FROM books WHERE key = ?")
            .bind(key)
            .fetch_optional(self.db.pool())
            .await?;

        Ok(record)
    }

    /// Inserts a new book row.
    ///
    /// `downloaded` is always written as false: only the download pipeline
    /// may set it, via [`mark_downloaded`](Self::mark_downloaded).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the insert fails (including
    /// a unique-key violation when the key already exists).
    #[instrument(skip(self, book), fields(key = %book.key, title = %book.title))]
    pub async fn insert(&self, book: &NewBook) -> Result<()> {
        sqlx::query(
            r"INSERT INTO books (
                key, title, author, description, length, cover_url,
                status, downloaded, finished
              )
              VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?)",
        )
        .bind(&book.key)
        .bind(&book.title)
        .bind(&book.author)
        .bind(&book.description)
        .bind(&book.length)
        .bind(book.cover_url.as_deref())
        .bind(book.status.as_str())
        .bind(book.finished)
        .execute(self.db.pool())
        .await?;

        Ok(())
    }

    /// Replaces the metadata fields of an existing row with the given record.
    ///
    /// Used by reconciliation after it has computed the merged record.
    /// `downloaded` is reset to false; `finished` and `status` come from
    /// the record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::RecordNotFound`] if no row exists for the key.
    /// Returns [`StoreError::Database`] if the update fails.
    #[instrument(skip(self, book), fields(key = %book.key))]
    pub async fn update_from(&self, book: &NewBook) -> Result<()> {
        let result = sqlx::query(
            r"UPDATE books
              SET title = ?,
                  author = ?,
                  description = ?,
                  length = ?,
                  cover_url = ?,
                  status = ?,
                  downloaded = 0,
                  finished = ?,
                  updated_at = datetime('now')
              WHERE key = ?",
        )
        .bind(&book.title)
        .bind(&book.author)
        .bind(&book.description)
        .bind(&book.length)
        .bind(book.cover_url.as_deref())
        .bind(book.status.as_str())
        .bind(book.finished)
        .bind(&book.key)
        .execute(self.db.pool())
        .await?;

        check_affected(&book.key, result.rows_affected())
    }

    /// Applies a partial update to an existing row.
    ///
    /// `None` fields in the patch are left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::RecordNotFound`] if no row exists for the key.
    /// Returns [`StoreError::Database`] if the update fails.
    #[instrument(skip(self, patch), fields(key = %key))]
    pub async fn update_fields(&self, key: &str, patch: &BookPatch) -> Result<()> {
        let result = sqlx::query(
            r"UPDATE books
              SET author = COALESCE(?, author),
                  description = COALESCE(?, description),
                  length = COALESCE(?, length),
                  cover_url = COALESCE(?, cover_url),
                  status = COALESCE(?, status),
                  downloaded = COALESCE(?, downloaded),
                  finished = COALESCE(?, finished),
                  updated_at = datetime('now')
              WHERE key = ?",
        )
        .bind(patch.author.as_deref())
        .bind(patch.description.as_deref())
        .bind(patch.length.as_deref())
        .bind(patch.cover_url.as_deref())
        .bind(patch.status.map(|status| status.as_str()))
        .bind(patch.downloaded)
        .bind(patch.finished)
        .bind(key)
        .execute(self.db.pool())
        .await?;

        check_affected(key, result.rows_affected())
    }

    /// Records that a final artifact exists locally for the key.
    ///
    /// Called by the download pipeline only after a verified successful
    /// conversion.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::RecordNotFound`] if no row exists for the key.
    /// Returns [`StoreError::Database`] if the update fails.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn mark_downloaded(&self, key: &str) -> Result<()> {
        let result = sqlx::query(
            r"UPDATE books
              SET downloaded = 1, updated_at = datetime('now')
              WHERE key = ?",
        )
        .bind(key)
        .execute(self.db.pool())
        .await?;

        check_affected(key, result.rows_affected())
    }

    /// Returns all books eligible for the download pipeline.
    ///
    /// Predicate: in the library, not downloaded, not finished. Ordering is
    /// stable (title, then key) so repeated runs scan candidates in the
    /// same order.
    ///
    /// Returns an empty vector, never an error, when no candidates exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn download_candidates(&self) -> Result<Vec<DownloadCandidate>> {
        let candidates = sqlx::query_as::<_, DownloadCandidate>(
            r"SELECT key, title, author FROM books
              WHERE status = ? AND downloaded = 0 AND finished = 0
              ORDER BY title ASC, key ASC",
        )
        .bind(BookStatus::Library.as_str())
        .fetch_all(self.db.pool())
        .await?;

        Ok(candidates)
    }

    /// Lists books filtered by status, ordered by title.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn list_by_status(&self, status: BookStatus) -> Result<Vec<BookRecord>> {
        let records = sqlx::query_as::<_, BookRecord>(
            r"SELECT * FROM books WHERE status = ? ORDER BY title ASC, key ASC",
        )
        .bind(status.as_str())
        .fetch_all(self.db.pool())
        .await?;

        Ok(records)
    }

    /// Lists all books, ordered by title.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn list_all(&self) -> Result<Vec<BookRecord>> {
        let records =
            sqlx::query_as::<_, BookRecord>(r"SELECT * FROM books ORDER BY title ASC, key ASC")
                .fetch_all(self.db.pool())
                .await?;

        Ok(records)
    }

    /// Counts books by status.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn count_by_status(&self, status: BookStatus) -> Result<i64> {
        let count =
            sqlx::query_scalar::<_, i64>(r"SELECT COUNT(*) FROM books WHERE status = ?")
                .bind(status.as_str())
                .fetch_one(self.db.pool())
                .await?;

        Ok(count)
    }

    /// Counts books with a final artifact present locally.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn count_downloaded(&self) -> Result<i64> {
        let count =
            sqlx::query_scalar::<_, i64>(r"SELECT COUNT(*) FROM books WHERE downloaded = 1")
                .fetch_one(self.db.pool())
                .await?;

        Ok(count)
    }
}
