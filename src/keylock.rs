//! Per-key asynchronous mutual exclusion.
//!
//! Both phases serialize work on the same book key: the sync phase funnels
//! duplicate catalog entries for one key through a single ordered path, and
//! the download pipeline guarantees a title is never fetched or transcoded
//! twice concurrently.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

/// Table of per-key async mutexes.
///
/// Locks are created lazily on first use and retained for the lifetime of
/// the table (one phase run), which bounds the table size by the number of
/// distinct keys seen.
#[derive(Debug, Default)]
pub(crate) struct KeyLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl KeyLocks {
    /// Creates an empty lock table.
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Returns the mutex guarding the given key, creating it when absent.
    ///
    /// Callers hold the key's critical section by awaiting `.lock()` on the
    /// returned handle.
    pub(crate) fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
