//! Normalization of raw catalog entries into the canonical book shape.
//!
//! Fills placeholder sentinels for fields the service did not report, joins
//! contributor names into a single author string, and strips markup from
//! description text.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use super::RawCatalogEntry;
use crate::store::{BookStatus, NO_DESCRIPTION, NewBook, UNKNOWN_AUTHOR, UNKNOWN_LENGTH};

/// Matches markup tags in summary text.
static MARKUP_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^<]+?>").expect("markup regex is valid")); // Static pattern, safe to panic

/// Errors for catalog entries that cannot be normalized.
///
/// These are per-record failures: the sync phase skips the entry, reports
/// it, and continues with the rest of the feed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NormalizeError {
    /// Entry carried no usable identifier.
    #[error("catalog entry missing identifier (title: '{title}')")]
    MissingKey {
        /// Title of the offending entry, for reporting.
        title: String,
    },

    /// Entry carried no usable title.
    #[error("catalog entry missing title (key: '{key}')")]
    MissingTitle {
        /// Identifier of the offending entry, for reporting.
        key: String,
    },
}

/// Removes markup tags from description text.
#[must_use]
pub fn strip_markup(text: &str) -> String {
    MARKUP_TAG.replace_all(text, "").into_owned()
}

/// Joins contributor names into the canonical author string.
///
/// Contributors come from the `contributors` list, falling back to `authors`
/// when it is empty. Entries with an explicit non-author role (narrators,
/// translators) are excluded; entries with no role are kept.
fn join_authors(entry: &RawCatalogEntry) -> String {
    let contributors = if entry.contributors.is_empty() {
        &entry.authors
    } else {
        &entry.contributors
    };

    let names: Vec<&str> = contributors
        .iter()
        .filter(|contributor| {
            contributor
                .role
                .as_deref()
                .is_none_or(|role| role == "Author")
        })
        .map(|contributor| contributor.name.as_str())
        .collect();

    names.join(", ")
}

/// Maps a raw catalog entry into the canonical [`NewBook`] shape.
///
/// Missing fields are filled with their placeholder sentinels; `status` is
/// assigned from the feed the entry arrived in (library or wishlist).
///
/// # Errors
///
/// Returns [`NormalizeError`] when the entry carries no identifier or no
/// title; such entries are skipped by the sync phase.
pub fn normalize_entry(
    entry: &RawCatalogEntry,
    status: BookStatus,
) -> Result<NewBook, NormalizeError> {
    let title = entry
        .title
        .as_deref()
        .map(str::trim)
        .filter(|title| !title.is_empty());
    let key = entry
        .asin
        .as_deref()
        .map(str::trim)
        .filter(|key| !key.is_empty());

    let (key, title) = match (key, title) {
        (Some(key), Some(title)) => (key, title),
        (None, title) => {
            return Err(NormalizeError::MissingKey {
                title: title.unwrap_or_default().to_string(),
            });
        }
        (Some(key), None) => {
            return Err(NormalizeError::MissingTitle {
                key: key.to_string(),
            });
        }
    };

    let author = join_authors(entry);
    let author = if author.is_empty() {
        UNKNOWN_AUTHOR.to_string()
    } else {
        author
    };

    let description = entry
        .summary
        .as_deref()
        .or(entry.merchandising_summary.as_deref())
        .map(strip_markup)
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
        .unwrap_or_else(|| NO_DESCRIPTION.to_string());

    let length = entry
        .runtime_length_min
        .map_or_else(|| UNKNOWN_LENGTH.to_string(), |minutes| minutes.to_string());

    let cover_url = entry
        .product_images
        .get("500")
        .filter(|url| !url.is_empty())
        .cloned();

    let finished = entry
        .listening_status
        .as_ref()
        .and_then(|listening| listening.status.as_deref())
        .is_some_and(|progress| progress == "Finished");

    Ok(NewBook {
        key: key.to_string(),
        title: title.to_string(),
        author,
        description,
        length,
        cover_url,
        status,
        finished,
    })
}
