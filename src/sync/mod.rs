//! Catalog reconciliation: merging fetched catalog entries into the store.
//!
//! The sync phase fetches a [`CatalogSnapshot`](crate::catalog::CatalogSnapshot),
//! normalizes each raw entry, and reconciles it against the persisted store
//! under the field-level conflict-resolution policy:
//!
//! - A field holding real information is never overwritten with a
//!   placeholder; a placeholder is only replaced by a real value.
//! - Status moves one way: wishlist → library, never back.
//! - `downloaded` is reset to false whenever reconciliation writes an
//!   update; only the download pipeline sets it.
//!
//! The library batch is fully applied before the wishlist batch, and a key
//! present in both feeds is attributed to the library only. Within a batch,
//! records are reconciled by a bounded worker pool with per-key
//! serialization, so the decision for a given (existing, incoming) pair
//! never depends on scheduling order.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures_util::stream::{self, TryStreamExt};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::catalog::{CatalogError, CatalogFetcher, RawCatalogEntry, normalize_entry};
use crate::keylock::KeyLocks;
use crate::store::{
    BookRecord, BookStatus, BookStore, NewBook, StoreError, is_known_author, is_known_cover,
    is_known_description, is_known_length,
};

/// Minimum allowed sync worker count.
const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed sync worker count.
const MAX_CONCURRENCY: usize = 64;

/// Default sync worker count.
pub const DEFAULT_SYNC_CONCURRENCY: usize = 8;

/// Outcome of reconciling one record against the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// No record existed for the key; the record was inserted.
    Inserted,
    /// At least one field qualified for update; the merged record was written.
    Updated,
    /// The existing record already carried everything the incoming one does.
    Unchanged,
}

/// Errors that abort a whole sync run.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Catalog retrieval failed entirely; no partial catalog is applied.
    #[error("catalog fetch failed: {0}")]
    Catalog(#[from] CatalogError),

    /// The store is unavailable.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The catalog came back entirely empty and the run is configured to
    /// treat that as fatal.
    #[error("catalog returned no entries")]
    EmptyCatalog,

    /// Invalid worker count.
    #[error(
        "invalid sync concurrency {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency {
        /// The invalid value that was provided.
        value: usize,
    },
}

/// Options for a sync run.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Bounded worker count per batch.
    pub concurrency: usize,
    /// Treat an entirely empty catalog as a phase failure.
    pub fail_on_empty: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_SYNC_CONCURRENCY,
            fail_on_empty: false,
        }
    }
}

/// Counters from one sync run.
///
/// Uses atomic counters for thread-safe updates from concurrent
/// reconciliation workers.
#[derive(Debug, Default)]
pub struct SyncStats {
    inserted: AtomicUsize,
    updated: AtomicUsize,
    unchanged: AtomicUsize,
    skipped: AtomicUsize,
    wishlist_added: AtomicUsize,
    wishlist_suppressed: AtomicUsize,
}

impl SyncStats {
    /// Creates a new stats tracker with zero counts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records inserted this run.
    #[must_use]
    pub fn inserted(&self) -> usize {
        self.inserted.load(Ordering::SeqCst)
    }

    /// Records updated this run.
    #[must_use]
    pub fn updated(&self) -> usize {
        self.updated.load(Ordering::SeqCst)
    }

    /// Records that required no write.
    #[must_use]
    pub fn unchanged(&self) -> usize {
        self.unchanged.load(Ordering::SeqCst)
    }

    /// Malformed entries skipped.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.skipped.load(Ordering::SeqCst)
    }

    /// Wishlist records inserted this run.
    #[must_use]
    pub fn wishlist_added(&self) -> usize {
        self.wishlist_added.load(Ordering::SeqCst)
    }

    /// Wishlist entries suppressed because their key was in the library feed.
    #[must_use]
    pub fn wishlist_suppressed(&self) -> usize {
        self.wishlist_suppressed.load(Ordering::SeqCst)
    }

    /// Total records that reached reconciliation.
    #[must_use]
    pub fn total(&self) -> usize {
        self.inserted() + self.updated() + self.unchanged()
    }

    fn increment_inserted(&self) {
        self.inserted.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_updated(&self) {
        self.updated.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_unchanged(&self) {
        self.unchanged.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_wishlist_added(&self) {
        self.wishlist_added.fetch_add(1, Ordering::SeqCst);
    }

    fn add_wishlist_suppressed(&self, count: usize) {
        self.wishlist_suppressed.fetch_add(count, Ordering::SeqCst);
    }
}

/// Computes the merged record for an (existing, incoming) pair.
///
/// Returns `None` when no field qualifies for update. The merge is a pure
/// function of its inputs: given the same pair it always produces the same
/// decision and the same merged record.
fn merge_incoming(existing: &BookRecord, incoming: &NewBook) -> Option<NewBook> {
    let mut changed = false;

    // Status only ever moves wishlist -> library.
    let status = if existing.status() == BookStatus::Wishlist
        && incoming.status == BookStatus::Library
    {
        changed = true;
        BookStatus::Library
    } else {
        existing.status()
    };

    let author = if !is_known_author(&existing.author) && is_known_author(&incoming.author) {
        changed = true;
        incoming.author.clone()
    } else {
        existing.author.clone()
    };

    let description = if !is_known_description(&existing.description)
        && is_known_description(&incoming.description)
    {
        changed = true;
        incoming.description.clone()
    } else {
        existing.description.clone()
    };

    let length = if !is_known_length(&existing.length) && is_known_length(&incoming.length) {
        changed = true;
        incoming.length.clone()
    } else {
        existing.length.clone()
    };

    let cover_url = if !is_known_cover(existing.cover_url.as_deref())
        && is_known_cover(incoming.cover_url.as_deref())
    {
        changed = true;
        incoming.cover_url.clone()
    } else {
        existing.cover_url.clone()
    };

    if !changed {
        return None;
    }

    Some(NewBook {
        key: existing.key.clone(),
        // Title is required and real on both sides; the stored one stands.
        title: existing.title.clone(),
        author,
        description,
        length,
        cover_url,
        status,
        // Finished is re-evaluated from the incoming record on every update.
        finished: incoming.finished,
    })
}

/// Reconciles one normalized record against the store.
///
/// Looks the record up by key, inserts it when absent, and otherwise writes
/// the merged record when any field qualifies for update (resetting
/// `downloaded`). Callers serialize invocations per key.
///
/// # Errors
///
/// Returns [`StoreError`] when the store is unavailable; the caller treats
/// that as fatal for the run.
#[instrument(skip(store, incoming), fields(key = %incoming.key, title = %incoming.title))]
pub async fn reconcile(
    store: &BookStore,
    incoming: &NewBook,
) -> Result<ReconcileOutcome, StoreError> {
    match store.get(&incoming.key).await? {
        None => {
            store.insert(incoming).await?;
            info!("book added");
            Ok(ReconcileOutcome::Inserted)
        }
        Some(existing) => match merge_incoming(&existing, incoming) {
            Some(merged) => {
                store.update_from(&merged).await?;
                info!("book updated");
                Ok(ReconcileOutcome::Updated)
            }
            None => {
                debug!("book unchanged");
                Ok(ReconcileOutcome::Unchanged)
            }
        },
    }
}

/// Normalizes one feed's entries, skipping and counting malformed ones.
fn normalize_batch(
    entries: &[RawCatalogEntry],
    status: BookStatus,
    stats: &SyncStats,
) -> Vec<NewBook> {
    let mut books = Vec::with_capacity(entries.len());
    for entry in entries {
        match normalize_entry(entry, status) {
            Ok(book) => books.push(book),
            Err(error) => {
                warn!(%status, error = %error, "skipping malformed catalog entry");
                stats.increment_skipped();
            }
        }
    }
    books
}

/// Applies one batch of normalized records with a bounded worker pool.
async fn apply_batch(
    store: &BookStore,
    books: Vec<NewBook>,
    stats: &SyncStats,
    locks: &KeyLocks,
    concurrency: usize,
    count_wishlist_inserts: bool,
) -> Result<(), StoreError> {
    stream::iter(books.into_iter().map(Ok::<_, StoreError>))
        .try_for_each_concurrent(concurrency, |book| async move {
            // Duplicate keys within a feed funnel through one ordered path.
            let lock = locks.lock_for(&book.key);
            let _guard = lock.lock().await;

            match reconcile(store, &book).await? {
                ReconcileOutcome::Inserted => {
                    stats.increment_inserted();
                    if count_wishlist_inserts {
                        stats.increment_wishlist_added();
                    }
                }
                ReconcileOutcome::Updated => stats.increment_updated(),
                ReconcileOutcome::Unchanged => stats.increment_unchanged(),
            }
            Ok(())
        })
        .await
}

/// Runs the sync phase: fetch, normalize, reconcile.
///
/// The library batch is fully applied before the wishlist batch; wishlist
/// entries whose key appeared in the library feed are suppressed for the
/// run. Malformed entries are skipped and counted, never fatal.
///
/// # Errors
///
/// Returns [`SyncError::Catalog`] when the fetch fails entirely,
/// [`SyncError::Store`] when the store is unavailable, and
/// [`SyncError::EmptyCatalog`] for an empty snapshot when
/// [`SyncOptions::fail_on_empty`] is set.
#[instrument(skip(store, fetcher, options))]
pub async fn run_sync(
    store: &BookStore,
    fetcher: &dyn CatalogFetcher,
    options: &SyncOptions,
) -> Result<SyncStats, SyncError> {
    if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&options.concurrency) {
        return Err(SyncError::InvalidConcurrency {
            value: options.concurrency,
        });
    }

    let snapshot = fetcher.fetch_catalog().await?;

    if snapshot.is_empty() {
        if options.fail_on_empty {
            return Err(SyncError::EmptyCatalog);
        }
        info!("catalog returned no entries; nothing to reconcile");
        return Ok(SyncStats::new());
    }

    let stats = SyncStats::new();
    let locks = KeyLocks::new();

    // Library first: records classified library must win over wishlist
    // copies seen in the same run.
    let library_books = normalize_batch(&snapshot.library, BookStatus::Library, &stats);
    let library_keys: HashSet<String> = library_books
        .iter()
        .map(|book| book.key.clone())
        .collect();
    apply_batch(
        store,
        library_books,
        &stats,
        &locks,
        options.concurrency,
        false,
    )
    .await?;

    let mut wishlist_books = normalize_batch(&snapshot.wishlist, BookStatus::Wishlist, &stats);
    let before = wishlist_books.len();
    wishlist_books.retain(|book| !library_keys.contains(&book.key));
    stats.add_wishlist_suppressed(before - wishlist_books.len());
    apply_batch(
        store,
        wishlist_books,
        &stats,
        &locks,
        options.concurrency,
        true,
    )
    .await?;

    info!(
        inserted = stats.inserted(),
        updated = stats.updated(),
        unchanged = stats.unchanged(),
        skipped = stats.skipped(),
        wishlist_added = stats.wishlist_added(),
        wishlist_suppressed = stats.wishlist_suppressed(),
        "sync complete"
    );

    Ok(stats)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::Database;
    use crate::store::{NO_DESCRIPTION, UNKNOWN_AUTHOR, UNKNOWN_LENGTH};

    fn stored(author: &str, status: BookStatus) -> BookRecord {
        BookRecord {
            key: "B001".to_string(),
            title: "Dune".to_string(),
            author: author.to_string(),
            description: NO_DESCRIPTION.to_string(),
            length: UNKNOWN_LENGTH.to_string(),
            cover_url: None,
            status_str: status.as_str().to_string(),
            downloaded: false,
            finished: false,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    fn incoming(author: &str, status: BookStatus) -> NewBook {
        NewBook {
            key: "B001".to_string(),
            title: "Dune".to_string(),
            author: author.to_string(),
            description: NO_DESCRIPTION.to_string(),
            length: UNKNOWN_LENGTH.to_string(),
            cover_url: None,
            status,
            finished: false,
        }
    }

    #[test]
    fn test_merge_placeholder_author_filled() {
        let existing = stored(UNKNOWN_AUTHOR, BookStatus::Library);
        let merged =
            merge_incoming(&existing, &incoming("Frank Herbert", BookStatus::Library)).unwrap();
        assert_eq!(merged.author, "Frank Herbert");
    }

    #[test]
    fn test_merge_real_author_never_overwritten_by_placeholder() {
        let existing = stored("Jane Doe", BookStatus::Library);
        let result = merge_incoming(&existing, &incoming(UNKNOWN_AUTHOR, BookStatus::Library));
        assert!(result.is_none(), "placeholder must not displace real value");
    }

    #[test]
    fn test_merge_placeholder_to_placeholder_is_unchanged() {
        let existing = stored(UNKNOWN_AUTHOR, BookStatus::Library);
        let result = merge_incoming(&existing, &incoming(UNKNOWN_AUTHOR, BookStatus::Library));
        assert!(result.is_none());
    }

    #[test]
    fn test_merge_status_promotion_wishlist_to_library() {
        let existing = stored(UNKNOWN_AUTHOR, BookStatus::Wishlist);
        let merged =
            merge_incoming(&existing, &incoming(UNKNOWN_AUTHOR, BookStatus::Library)).unwrap();
        assert_eq!(merged.status, BookStatus::Library);
    }

    #[test]
    fn test_merge_status_never_demoted() {
        let existing = stored("Jane Doe", BookStatus::Library);
        let result = merge_incoming(&existing, &incoming("Jane Doe", BookStatus::Wishlist));
        assert!(result.is_none(), "library must never demote to wishlist");
    }

    #[test]
    fn test_merge_keeps_existing_fields_on_partial_fill() {
        let mut existing = stored("Jane Doe", BookStatus::Library);
        existing.description = "Real description.".to_string();
        let mut update = incoming(UNKNOWN_AUTHOR, BookStatus::Library);
        update.length = "726".to_string();
        update.cover_url = Some("https://img.example/dune.jpg".to_string());

        let merged = merge_incoming(&existing, &update).unwrap();
        assert_eq!(merged.author, "Jane Doe");
        assert_eq!(merged.description, "Real description.");
        assert_eq!(merged.length, "726");
        assert_eq!(
            merged.cover_url.as_deref(),
            Some("https://img.example/dune.jpg")
        );
    }

    #[test]
    fn test_merge_finished_change_alone_is_not_a_delta() {
        let existing = stored("Jane Doe", BookStatus::Library);
        let mut update = incoming("Jane Doe", BookStatus::Library);
        update.finished = true;
        assert!(merge_incoming(&existing, &update).is_none());
    }

    #[test]
    fn test_merge_finished_taken_from_incoming_on_update() {
        let existing = stored(UNKNOWN_AUTHOR, BookStatus::Library);
        let mut update = incoming("Frank Herbert", BookStatus::Library);
        update.finished = true;
        let merged = merge_incoming(&existing, &update).unwrap();
        assert!(merged.finished);
    }

    #[test]
    fn test_merge_is_deterministic() {
        let existing = stored(UNKNOWN_AUTHOR, BookStatus::Wishlist);
        let update = incoming("Frank Herbert", BookStatus::Library);
        let first = merge_incoming(&existing, &update);
        let second = merge_incoming(&existing, &update);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_reconcile_inserts_when_absent() {
        let db = Database::new_in_memory().await.unwrap();
        let store = BookStore::new(db);

        let outcome = reconcile(&store, &incoming("Frank Herbert", BookStatus::Library))
            .await
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::Inserted);
        assert!(store.get("B001").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_reconcile_twice_is_unchanged() {
        let db = Database::new_in_memory().await.unwrap();
        let store = BookStore::new(db);

        let book = incoming("Frank Herbert", BookStatus::Library);
        assert_eq!(
            reconcile(&store, &book).await.unwrap(),
            ReconcileOutcome::Inserted
        );
        assert_eq!(
            reconcile(&store, &book).await.unwrap(),
            ReconcileOutcome::Unchanged
        );
    }

    #[tokio::test]
    async fn test_reconcile_update_resets_downloaded() {
        let db = Database::new_in_memory().await.unwrap();
        let store = BookStore::new(db);

        reconcile(&store, &incoming(UNKNOWN_AUTHOR, BookStatus::Library))
            .await
            .unwrap();
        store.mark_downloaded("B001").await.unwrap();

        let outcome = reconcile(&store, &incoming("Frank Herbert", BookStatus::Library))
            .await
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::Updated);

        let record = store.get("B001").await.unwrap().unwrap();
        assert!(!record.downloaded, "update must reset downloaded");
        assert_eq!(record.author, "Frank Herbert");
    }

    #[test]
    fn test_sync_options_default() {
        let options = SyncOptions::default();
        assert_eq!(options.concurrency, DEFAULT_SYNC_CONCURRENCY);
        assert!(!options.fail_on_empty);
    }

    #[test]
    fn test_sync_stats_counters() {
        let stats = SyncStats::new();
        stats.increment_inserted();
        stats.increment_inserted();
        stats.increment_updated();
        stats.increment_unchanged();
        stats.increment_skipped();
        stats.increment_wishlist_added();
        stats.add_wishlist_suppressed(3);

        assert_eq!(stats.inserted(), 2);
        assert_eq!(stats.updated(), 1);
        assert_eq!(stats.unchanged(), 1);
        assert_eq!(stats.skipped(), 1);
        assert_eq!(stats.wishlist_added(), 1);
        assert_eq!(stats.wishlist_suppressed(), 3);
        assert_eq!(stats.total(), 4);
    }
}
