//! Book record types, status definitions, and placeholder sentinels.

use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Placeholder author value meaning "not yet known".
pub const UNKNOWN_AUTHOR: &str = "Unknown";

/// Placeholder description value meaning "not yet known".
pub const NO_DESCRIPTION: &str = "No description available";

/// Placeholder length value meaning "not yet known".
pub const UNKNOWN_LENGTH: &str = "Unknown";

/// Returns true when an author value carries real information
/// (non-empty and not the placeholder).
#[must_use]
pub fn is_known_author(value: &str) -> bool {
    !value.is_empty() && value != UNKNOWN_AUTHOR
}

/// Returns true when a description value carries real information.
#[must_use]
pub fn is_known_description(value: &str) -> bool {
    !value.is_empty() && value != NO_DESCRIPTION
}

/// Returns true when a length value carries real information.
#[must_use]
pub fn is_known_length(value: &str) -> bool {
    !value.is_empty() && value != UNKNOWN_LENGTH
}

/// Returns true when a cover URL is present and non-empty.
#[must_use]
pub fn is_known_cover(value: Option<&str>) -> bool {
    value.is_some_and(|url| !url.is_empty())
}

/// Catalog membership status of a book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookStatus {
    /// On the wishlist, not purchased.
    Wishlist,
    /// Purchased and part of the library.
    Library,
}

impl BookStatus {
    /// Returns the database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Wishlist => "wishlist",
            Self::Library => "library",
        }
    }
}

impl fmt::Display for BookStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for BookStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "wishlist" => Ok(Self::Wishlist),
            "library" => Ok(Self::Library),
            _ => Err(format!("invalid book status: {s}")),
        }
    }
}

/// A normalized catalog record before persistence.
///
/// Produced by the normalizer from a raw catalog entry and consumed by
/// reconciliation. Carries no timestamps or download state: reconciliation
/// always proposes `downloaded = false`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBook {
    /// Stable external identifier (primary key).
    pub key: String,
    /// Title, required and non-empty.
    pub title: String,
    /// Author names, [`UNKNOWN_AUTHOR`] when not known.
    pub author: String,
    /// Description text, [`NO_DESCRIPTION`] when not known.
    pub description: String,
    /// String-encoded runtime length, [`UNKNOWN_LENGTH`] when not known.
    pub length: String,
    /// Cover image URL when known.
    pub cover_url: Option<String>,
    /// Catalog membership status.
    pub status: BookStatus,
    /// Whether the external service reports the title fully consumed.
    pub finished: bool,
}

/// A persisted book row.
#[derive(Debug, Clone, FromRow)]
pub struct BookRecord {
    /// Stable external identifier (primary key).
    pub key: String,
    /// Title, required and non-empty.
    pub title: String,
    /// Author names, [`UNKNOWN_AUTHOR`] when not known.
    pub author: String,
    /// Description text, [`NO_DESCRIPTION`] when not known.
    pub description: String,
    /// String-encoded runtime length, [`UNKNOWN_LENGTH`] when not known.
    pub length: String,
    /// Cover image URL when known.
    pub cover_url: Option<String>,
    /// Catalog membership status (stored as text, parsed via `status()`).
    #[sqlx(rename = "status")]
    pub status_str: String,
    /// True once a final artifact exists locally.
    pub downloaded: bool,
    /// True once the external service reports the title fully consumed.
    pub finished: bool,
    /// When the row was created.
    pub created_at: String,
    /// When the row was last updated.
    pub updated_at: String,
}

impl BookRecord {
    /// Parses `status_str` into a typed status; unknown values map to
    /// `Wishlist` (the weaker state, which reconciliation may still promote).
    #[must_use]
    pub fn status(&self) -> BookStatus {
        self.status_str.parse().unwrap_or(BookStatus::Wishlist)
    }
}

/// Partial update payload for [`update_fields`](crate::store::BookStore::update_fields).
///
/// `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct BookPatch {
    /// New author value.
    pub author: Option<String>,
    /// New description value.
    pub description: Option<String>,
    /// New length value.
    pub length: Option<String>,
    /// New cover URL value.
    pub cover_url: Option<String>,
    /// New status value.
    pub status: Option<BookStatus>,
    /// New downloaded flag.
    pub downloaded: Option<bool>,
    /// New finished flag.
    pub finished: Option<bool>,
}

/// A download candidate row returned by the selector.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct DownloadCandidate {
    /// Stable external identifier.
    pub key: String,
    /// Title for reporting.
    pub title: String,
    /// Author names for reporting.
    pub author: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_book_status_as_str() {
        assert_eq!(BookStatus::Wishlist.as_str(), "wishlist");
        assert_eq!(BookStatus::Library.as_str(), "library");
    }

    #[test]
    fn test_book_status_from_str() {
        assert_eq!("wishlist".parse::<BookStatus>().ok(), Some(BookStatus::Wishlist));
        assert_eq!("library".parse::<BookStatus>().ok(), Some(BookStatus::Library));
        assert!("borrowed".parse::<BookStatus>().is_err());
    }

    #[test]
    fn test_is_known_author() {
        assert!(is_known_author("Frank Herbert"));
        assert!(!is_known_author("Unknown"));
        assert!(!is_known_author(""));
    }

    #[test]
    fn test_is_known_description() {
        assert!(is_known_description("A sweeping epic."));
        assert!(!is_known_description("No description available"));
        assert!(!is_known_description(""));
    }

    #[test]
    fn test_is_known_length() {
        assert!(is_known_length("726"));
        assert!(!is_known_length("Unknown"));
        assert!(!is_known_length(""));
    }

    #[test]
    fn test_is_known_cover() {
        assert!(is_known_cover(Some("https://img.example/cover.jpg")));
        assert!(!is_known_cover(Some("")));
        assert!(!is_known_cover(None));
    }

    #[test]
    fn test_record_status_falls_back_to_wishlist() {
        let record = BookRecord {
            key: "B001".to_string(),
            title: "Dune".to_string(),
            author: UNKNOWN_AUTHOR.to_string(),
            description: NO_DESCRIPTION.to_string(),
            length: UNKNOWN_LENGTH.to_string(),
            cover_url: None,
            status_str: "garbage".to_string(),
            downloaded: false,
            finished: false,
            created_at: String::new(),
            updated_at: String::new(),
        };
        assert_eq!(record.status(), BookStatus::Wishlist);
    }
}
