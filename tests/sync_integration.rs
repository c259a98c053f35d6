//! Integration tests for catalog reconciliation against a real store.

#![allow(clippy::unwrap_used)]

use std::collections::HashMap;

use async_trait::async_trait;
use booksync::{
    BookStatus, BookStore, CatalogError, CatalogFetcher, CatalogSnapshot, Contributor, Database,
    ListeningStatus, RawCatalogEntry, SyncError, SyncOptions, run_sync,
};

/// Fetcher double returning a canned snapshot.
struct FixedFetcher {
    snapshot: CatalogSnapshot,
}

impl FixedFetcher {
    fn new(library: Vec<RawCatalogEntry>, wishlist: Vec<RawCatalogEntry>) -> Self {
        Self {
            snapshot: CatalogSnapshot { library, wishlist },
        }
    }
}

#[async_trait]
impl CatalogFetcher for FixedFetcher {
    async fn fetch_catalog(&self) -> Result<CatalogSnapshot, CatalogError> {
        Ok(self.snapshot.clone())
    }
}

async fn test_store() -> BookStore {
    let db = Database::new_in_memory().await.unwrap();
    BookStore::new(db)
}

fn entry(asin: &str, title: &str) -> RawCatalogEntry {
    RawCatalogEntry {
        asin: Some(asin.to_string()),
        title: Some(title.to_string()),
        ..RawCatalogEntry::default()
    }
}

fn rich_entry(asin: &str, title: &str, author: &str, summary: &str) -> RawCatalogEntry {
    let mut raw = entry(asin, title);
    raw.contributors = vec![Contributor {
        name: author.to_string(),
        role: Some("Author".to_string()),
    }];
    raw.summary = Some(summary.to_string());
    raw.runtime_length_min = Some(720);
    raw.product_images = HashMap::from([(
        "500".to_string(),
        format!("https://img.example/{asin}.jpg"),
    )]);
    raw
}

#[tokio::test]
async fn test_first_sync_inserts_both_feeds() {
    let store = test_store().await;
    let fetcher = FixedFetcher::new(
        vec![rich_entry("B001", "Dune", "Frank Herbert", "Spice.")],
        vec![entry("B002", "Hyperion")],
    );

    let stats = run_sync(&store, &fetcher, &SyncOptions::default())
        .await
        .unwrap();
    assert_eq!(stats.inserted(), 2);
    assert_eq!(stats.updated(), 0);
    assert_eq!(stats.wishlist_added(), 1);

    let library = store.get("B001").await.unwrap().unwrap();
    assert_eq!(library.status(), BookStatus::Library);
    assert_eq!(library.author, "Frank Herbert");
    assert!(!library.downloaded);

    let wishlist = store.get("B002").await.unwrap().unwrap();
    assert_eq!(wishlist.status(), BookStatus::Wishlist);
}

#[tokio::test]
async fn test_second_sync_is_idempotent() {
    let store = test_store().await;
    let fetcher = FixedFetcher::new(
        vec![rich_entry("B001", "Dune", "Frank Herbert", "Spice.")],
        vec![entry("B002", "Hyperion")],
    );

    run_sync(&store, &fetcher, &SyncOptions::default())
        .await
        .unwrap();
    let first = store.get("B001").await.unwrap().unwrap();

    let stats = run_sync(&store, &fetcher, &SyncOptions::default())
        .await
        .unwrap();
    assert_eq!(stats.inserted(), 0);
    assert_eq!(stats.updated(), 0);
    assert_eq!(stats.unchanged(), 2);

    let second = store.get("B001").await.unwrap().unwrap();
    assert_eq!(second.author, first.author);
    assert_eq!(second.description, first.description);
    assert_eq!(second.length, first.length);
}

#[tokio::test]
async fn test_wishlist_record_promoted_to_library() {
    let store = test_store().await;

    let wishlist_only = FixedFetcher::new(vec![], vec![entry("B001", "Dune")]);
    run_sync(&store, &wishlist_only, &SyncOptions::default())
        .await
        .unwrap();
    assert_eq!(
        store.get("B001").await.unwrap().unwrap().status(),
        BookStatus::Wishlist
    );

    let now_owned = FixedFetcher::new(vec![entry("B001", "Dune")], vec![]);
    let stats = run_sync(&store, &now_owned, &SyncOptions::default())
        .await
        .unwrap();
    assert_eq!(stats.updated(), 1);
    assert_eq!(
        store.get("B001").await.unwrap().unwrap().status(),
        BookStatus::Library
    );
}

#[tokio::test]
async fn test_library_never_demoted_to_wishlist() {
    let store = test_store().await;

    let owned = FixedFetcher::new(vec![entry("B001", "Dune")], vec![]);
    run_sync(&store, &owned, &SyncOptions::default())
        .await
        .unwrap();

    // Next run sees the title only in the wishlist feed
    let wishlist_only = FixedFetcher::new(vec![], vec![entry("B001", "Dune")]);
    run_sync(&store, &wishlist_only, &SyncOptions::default())
        .await
        .unwrap();

    assert_eq!(
        store.get("B001").await.unwrap().unwrap().status(),
        BookStatus::Library
    );
}

#[tokio::test]
async fn test_same_run_library_wins_over_wishlist_copy() {
    let store = test_store().await;
    let fetcher = FixedFetcher::new(
        vec![entry("B001", "Dune")],
        vec![entry("B001", "Dune"), entry("B002", "Hyperion")],
    );

    let stats = run_sync(&store, &fetcher, &SyncOptions::default())
        .await
        .unwrap();
    assert_eq!(stats.inserted(), 2);
    assert_eq!(stats.wishlist_suppressed(), 1);
    assert_eq!(stats.wishlist_added(), 1);

    let record = store.get("B001").await.unwrap().unwrap();
    assert_eq!(record.status(), BookStatus::Library);
}

#[tokio::test]
async fn test_placeholder_fields_filled_by_later_run() {
    let store = test_store().await;

    // First sight of the title carries no metadata
    let bare = FixedFetcher::new(vec![entry("B001", "Dune")], vec![]);
    run_sync(&store, &bare, &SyncOptions::default())
        .await
        .unwrap();
    let record = store.get("B001").await.unwrap().unwrap();
    assert_eq!(record.author, "Unknown");
    assert_eq!(record.description, "No description available");

    let enriched = FixedFetcher::new(
        vec![rich_entry("B001", "Dune", "Frank Herbert", "Spice.")],
        vec![],
    );
    let stats = run_sync(&store, &enriched, &SyncOptions::default())
        .await
        .unwrap();
    assert_eq!(stats.updated(), 1);

    let record = store.get("B001").await.unwrap().unwrap();
    assert_eq!(record.author, "Frank Herbert");
    assert_eq!(record.description, "Spice.");
    assert_eq!(record.length, "720");
    assert_eq!(
        record.cover_url.as_deref(),
        Some("https://img.example/B001.jpg")
    );
}

#[tokio::test]
async fn test_real_fields_not_overwritten_by_placeholders() {
    let store = test_store().await;

    let enriched = FixedFetcher::new(
        vec![rich_entry("B001", "Dune", "Frank Herbert", "Spice.")],
        vec![],
    );
    run_sync(&store, &enriched, &SyncOptions::default())
        .await
        .unwrap();

    // Later feed degrades to placeholders; stored metadata must survive
    let bare = FixedFetcher::new(vec![entry("B001", "Dune")], vec![]);
    let stats = run_sync(&store, &bare, &SyncOptions::default())
        .await
        .unwrap();
    assert_eq!(stats.unchanged(), 1);

    let record = store.get("B001").await.unwrap().unwrap();
    assert_eq!(record.author, "Frank Herbert");
    assert_eq!(record.description, "Spice.");
}

#[tokio::test]
async fn test_metadata_update_resets_downloaded() {
    let store = test_store().await;

    let bare = FixedFetcher::new(vec![entry("B001", "Dune")], vec![]);
    run_sync(&store, &bare, &SyncOptions::default())
        .await
        .unwrap();
    store.mark_downloaded("B001").await.unwrap();

    let enriched = FixedFetcher::new(
        vec![rich_entry("B001", "Dune", "Frank Herbert", "Spice.")],
        vec![],
    );
    run_sync(&store, &enriched, &SyncOptions::default())
        .await
        .unwrap();

    let record = store.get("B001").await.unwrap().unwrap();
    assert!(!record.downloaded, "update must reset the downloaded flag");
}

#[tokio::test]
async fn test_unchanged_record_keeps_downloaded_flag() {
    let store = test_store().await;
    let fetcher = FixedFetcher::new(
        vec![rich_entry("B001", "Dune", "Frank Herbert", "Spice.")],
        vec![],
    );

    run_sync(&store, &fetcher, &SyncOptions::default())
        .await
        .unwrap();
    store.mark_downloaded("B001").await.unwrap();

    run_sync(&store, &fetcher, &SyncOptions::default())
        .await
        .unwrap();
    assert!(store.get("B001").await.unwrap().unwrap().downloaded);
}

#[tokio::test]
async fn test_finished_flag_rides_along_with_updates() {
    let store = test_store().await;

    let mut in_progress = entry("B001", "Dune");
    in_progress.listening_status = Some(ListeningStatus {
        status: Some("Started".to_string()),
    });
    run_sync(
        &store,
        &FixedFetcher::new(vec![in_progress], vec![]),
        &SyncOptions::default(),
    )
    .await
    .unwrap();
    assert!(!store.get("B001").await.unwrap().unwrap().finished);

    // A metadata update carries the latest listening progress with it
    let mut finished = rich_entry("B001", "Dune", "Frank Herbert", "Spice.");
    finished.listening_status = Some(ListeningStatus {
        status: Some("Finished".to_string()),
    });
    run_sync(
        &store,
        &FixedFetcher::new(vec![finished], vec![]),
        &SyncOptions::default(),
    )
    .await
    .unwrap();
    assert!(store.get("B001").await.unwrap().unwrap().finished);
}

#[tokio::test]
async fn test_malformed_entries_skipped_not_fatal() {
    let store = test_store().await;
    let no_key = RawCatalogEntry {
        title: Some("Orphan".to_string()),
        ..RawCatalogEntry::default()
    };
    let no_title = RawCatalogEntry {
        asin: Some("B003".to_string()),
        ..RawCatalogEntry::default()
    };
    let fetcher = FixedFetcher::new(vec![no_key, entry("B001", "Dune"), no_title], vec![]);

    let stats = run_sync(&store, &fetcher, &SyncOptions::default())
        .await
        .unwrap();
    assert_eq!(stats.inserted(), 1);
    assert_eq!(stats.skipped(), 2);
    assert!(store.get("B001").await.unwrap().unwrap().title == "Dune");
}

#[tokio::test]
async fn test_empty_catalog_is_noop_by_default() {
    let store = test_store().await;
    let fetcher = FixedFetcher::new(vec![], vec![]);

    let stats = run_sync(&store, &fetcher, &SyncOptions::default())
        .await
        .unwrap();
    assert_eq!(stats.total(), 0);
    assert!(store.list_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_empty_catalog_fatal_when_requested() {
    let store = test_store().await;
    let fetcher = FixedFetcher::new(vec![], vec![]);
    let options = SyncOptions {
        fail_on_empty: true,
        ..SyncOptions::default()
    };

    let result = run_sync(&store, &fetcher, &options).await;
    assert!(matches!(result, Err(SyncError::EmptyCatalog)));
}

#[tokio::test]
async fn test_invalid_concurrency_rejected() {
    let store = test_store().await;
    let fetcher = FixedFetcher::new(vec![entry("B001", "Dune")], vec![]);
    let options = SyncOptions {
        concurrency: 0,
        ..SyncOptions::default()
    };

    let result = run_sync(&store, &fetcher, &options).await;
    assert!(matches!(
        result,
        Err(SyncError::InvalidConcurrency { value: 0 })
    ));
}

#[tokio::test]
async fn test_large_batch_with_concurrency() {
    let store = test_store().await;
    let library: Vec<RawCatalogEntry> = (0..50)
        .map(|i| entry(&format!("B{i:03}"), &format!("Book {i}")))
        .collect();
    let fetcher = FixedFetcher::new(library, vec![]);
    let options = SyncOptions {
        concurrency: 8,
        ..SyncOptions::default()
    };

    let stats = run_sync(&store, &fetcher, &options).await.unwrap();
    assert_eq!(stats.inserted(), 50);
    assert_eq!(store.list_all().await.unwrap().len(), 50);
}
