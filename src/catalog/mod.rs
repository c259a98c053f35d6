//! Catalog fetching boundary.
//!
//! The catalog service is an external collaborator: this module defines the
//! [`CatalogFetcher`] seam the sync phase consumes, the raw entry shapes the
//! service reports, and a production implementation that shells out to an
//! external catalog CLI emitting JSON.
//!
//! # Architecture
//!
//! - [`CatalogFetcher`] - Async trait the sync phase depends on
//! - [`CatalogSnapshot`] - One fetch: library entries plus wishlist entries
//! - [`RawCatalogEntry`] - A title as reported by the service, pre-normalization
//! - [`CliCatalogFetcher`] - Subprocess-backed production fetcher
//! - [`normalize_entry`](normalize::normalize_entry) - Raw entry → [`NewBook`](crate::store::NewBook)

pub mod normalize;

pub use normalize::{NormalizeError, normalize_entry, strip_markup};

use std::collections::HashMap;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, instrument};

/// Errors produced while fetching the catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The catalog command could not be spawned or its output read.
    #[error("failed to run catalog command '{program}': {source}")]
    Io {
        /// Program that was invoked.
        program: String,
        /// Underlying IO failure.
        #[source]
        source: std::io::Error,
    },

    /// The catalog command exited with a failure status.
    #[error("catalog command '{program}' exited with status {status}: {stderr}")]
    CommandFailed {
        /// Program that was invoked.
        program: String,
        /// Exit status description.
        status: String,
        /// Captured standard error, trimmed.
        stderr: String,
    },

    /// The catalog payload was not valid JSON.
    #[error("invalid catalog payload: {0}")]
    Json(#[from] serde_json::Error),

    /// The payload parsed but carried neither an `items` nor a `products` array.
    #[error("catalog payload missing 'items' or 'products' array")]
    MissingEntries,
}

/// A contributor entry from the catalog service.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Contributor {
    /// Contributor display name.
    pub name: String,
    /// Contributor role when reported (e.g. `Author`, `Narrator`).
    #[serde(default)]
    pub role: Option<String>,
}

/// Listening progress as reported by the catalog service.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct ListeningStatus {
    /// Progress label; `"Finished"` marks a fully consumed title.
    #[serde(default)]
    pub status: Option<String>,
}

/// A raw record of a title as reported by the external service,
/// before normalization.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawCatalogEntry {
    /// Stable external identifier.
    #[serde(default)]
    pub asin: Option<String>,
    /// Title text.
    #[serde(default)]
    pub title: Option<String>,
    /// Contributor list; preferred source of author names.
    #[serde(default)]
    pub contributors: Vec<Contributor>,
    /// Fallback author list used when `contributors` is absent.
    #[serde(default)]
    pub authors: Vec<Contributor>,
    /// Primary summary text; may contain markup.
    #[serde(default)]
    pub summary: Option<String>,
    /// Marketing summary used when `summary` is absent; may contain markup.
    #[serde(default)]
    pub merchandising_summary: Option<String>,
    /// Runtime length in minutes.
    #[serde(default)]
    pub runtime_length_min: Option<i64>,
    /// Cover images keyed by pixel size (the `"500"` variant is preferred).
    #[serde(default)]
    pub product_images: HashMap<String, String>,
    /// Listening progress.
    #[serde(default)]
    pub listening_status: Option<ListeningStatus>,
}

/// One catalog fetch: the user's library plus their wishlist.
#[derive(Debug, Clone, Default)]
pub struct CatalogSnapshot {
    /// Purchased titles.
    pub library: Vec<RawCatalogEntry>,
    /// Wish-listed titles.
    pub wishlist: Vec<RawCatalogEntry>,
}

impl CatalogSnapshot {
    /// Returns true when neither list contains any entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.library.is_empty() && self.wishlist.is_empty()
    }
}

/// Source of catalog snapshots.
///
/// Implementations run outside the core (HTTP client, external CLI); tests
/// substitute programmable doubles.
#[async_trait]
pub trait CatalogFetcher: Send + Sync {
    /// Fetches the library and wishlist entry lists.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] when the whole fetch fails; callers treat
    /// that as a phase-fatal condition (no partial catalog is applied).
    async fn fetch_catalog(&self) -> Result<CatalogSnapshot, CatalogError>;
}

/// Top-level catalog payload shape. The service reports library pages under
/// `items` and wishlist pages under `products`.
#[derive(Debug, Deserialize)]
struct CatalogPayload {
    #[serde(default)]
    items: Option<Vec<RawCatalogEntry>>,
    #[serde(default)]
    products: Option<Vec<RawCatalogEntry>>,
}

/// Parses one catalog page payload into its entry list.
///
/// # Errors
///
/// Returns [`CatalogError::Json`] for malformed JSON and
/// [`CatalogError::MissingEntries`] when neither known array key is present.
pub fn parse_catalog_payload(payload: &[u8]) -> Result<Vec<RawCatalogEntry>, CatalogError> {
    let parsed: CatalogPayload = serde_json::from_slice(payload)?;
    parsed
        .items
        .or(parsed.products)
        .ok_or(CatalogError::MissingEntries)
}

/// Production fetcher that shells out to an external catalog CLI.
///
/// Runs one subprocess per list (library, then wishlist) and parses the JSON
/// each writes to standard output.
#[derive(Debug, Clone)]
pub struct CliCatalogFetcher {
    program: String,
    library_args: Vec<String>,
    wishlist_args: Vec<String>,
}

impl CliCatalogFetcher {
    /// Creates a fetcher invoking `program` with the given argument lists.
    #[must_use]
    pub fn new(program: &str, library_args: Vec<String>, wishlist_args: Vec<String>) -> Self {
        Self {
            program: program.to_string(),
            library_args,
            wishlist_args,
        }
    }

    #[instrument(skip(self, args), fields(program = %self.program))]
    async fn run_catalog_command(
        &self,
        args: &[String],
    ) -> Result<Vec<RawCatalogEntry>, CatalogError> {
        debug!(?args, "running catalog command");

        let output = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|source| CatalogError::Io {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(CatalogError::CommandFailed {
                program: self.program.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        parse_catalog_payload(&output.stdout)
    }
}

#[async_trait]
impl CatalogFetcher for CliCatalogFetcher {
    async fn fetch_catalog(&self) -> Result<CatalogSnapshot, CatalogError> {
        let library = self.run_catalog_command(&self.library_args).await?;
        info!(entries = library.len(), "fetched library data");

        let wishlist = self.run_catalog_command(&self.wishlist_args).await?;
        info!(entries = wishlist.len(), "fetched wishlist data");

        Ok(CatalogSnapshot { library, wishlist })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_catalog_payload_items_key() {
        let payload = br#"{"items": [{"asin": "B001", "title": "Dune"}]}"#;
        let entries = parse_catalog_payload(payload).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].asin.as_deref(), Some("B001"));
        assert_eq!(entries[0].title.as_deref(), Some("Dune"));
    }

    #[test]
    fn test_parse_catalog_payload_products_key() {
        let payload = br#"{"products": [{"asin": "B002", "title": "Hyperion"}]}"#;
        let entries = parse_catalog_payload(payload).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].asin.as_deref(), Some("B002"));
    }

    #[test]
    fn test_parse_catalog_payload_missing_both_keys() {
        let payload = br#"{"total_results": 0}"#;
        let result = parse_catalog_payload(payload);
        assert!(matches!(result, Err(CatalogError::MissingEntries)));
    }

    #[test]
    fn test_parse_catalog_payload_invalid_json() {
        let result = parse_catalog_payload(b"not json");
        assert!(matches!(result, Err(CatalogError::Json(_))));
    }

    #[test]
    fn test_parse_catalog_payload_tolerates_unknown_fields() {
        let payload = br#"{"items": [{"asin": "B001", "title": "Dune", "sku": "x", "price": 9}]}"#;
        let entries = parse_catalog_payload(payload).unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_parse_catalog_payload_full_entry() {
        let payload = br#"{
            "items": [{
                "asin": "B001",
                "title": "Dune",
                "contributors": [{"name": "Frank Herbert", "role": "Author"}],
                "summary": "<p>Spice.</p>",
                "runtime_length_min": 1266,
                "product_images": {"500": "https://img.example/dune.jpg"},
                "listening_status": {"status": "Finished"}
            }]
        }"#;
        let entries = parse_catalog_payload(payload).unwrap();
        let entry = &entries[0];
        assert_eq!(entry.contributors[0].name, "Frank Herbert");
        assert_eq!(entry.runtime_length_min, Some(1266));
        assert_eq!(
            entry.product_images.get("500").map(String::as_str),
            Some("https://img.example/dune.jpg")
        );
        assert_eq!(
            entry.listening_status.as_ref().unwrap().status.as_deref(),
            Some("Finished")
        );
    }

    #[test]
    fn test_snapshot_is_empty() {
        assert!(CatalogSnapshot::default().is_empty());

        let snapshot = CatalogSnapshot {
            library: vec![RawCatalogEntry::default()],
            wishlist: Vec::new(),
        };
        assert!(!snapshot.is_empty());
    }

    #[tokio::test]
    async fn test_cli_fetcher_missing_program_is_io_error() {
        let fetcher = CliCatalogFetcher::new(
            "booksync-test-no-such-binary",
            vec!["library".to_string()],
            vec!["wishlist".to_string()],
        );
        let result = fetcher.fetch_catalog().await;
        assert!(matches!(result, Err(CatalogError::Io { .. })));
    }
}
