//! Booksync Core Library
//!
//! This library keeps an audiobook catalog in sync with its owning service
//! and downloads the titles the catalog owns. A sync run reconciles the
//! service's library and wishlist feeds into a local SQLite database; a
//! download run fetches raw audio for eligible titles through an external
//! agent, converts it, and marks the records downloaded.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`db`] - Database connection and schema management
//! - [`store`] - Book record persistence and candidate selection
//! - [`catalog`] - Catalog feed retrieval and entry normalization
//! - [`sync`] - Reconciliation of catalog feeds into the store
//! - [`pipeline`] - Download pipeline (fetch, transcode, persist)
//! - [`cli`] - Command-line argument definitions
//! - [`app`] - Application-level glue (progress UI)

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod app;
pub mod catalog;
pub mod cli;
pub mod db;
pub(crate) mod keylock;
pub mod pipeline;
pub mod store;
pub mod sync;

// Re-export commonly used types
pub use catalog::{
    CatalogError, CatalogFetcher, CatalogSnapshot, CliCatalogFetcher, Contributor,
    ListeningStatus, NormalizeError, RawCatalogEntry, normalize_entry, parse_catalog_payload,
};
pub use db::{Database, DbError};
pub use pipeline::{
    AgentError, CliFetchAgent, CliTranscodeAgent, DEFAULT_PIPELINE_CONCURRENCY, DownloadPipeline,
    FailureStage, FetchAgent, PipelineError, PipelineOptions, PipelineStats, ResumeState,
    TranscodeAgent, Workdir, WorkdirError, final_artifact_name,
};
pub use store::{
    BookPatch, BookRecord, BookStatus, BookStore, DownloadCandidate, NewBook, StoreError,
};
pub use sync::{
    DEFAULT_SYNC_CONCURRENCY, ReconcileOutcome, SyncError, SyncOptions, SyncStats, reconcile,
    run_sync,
};
