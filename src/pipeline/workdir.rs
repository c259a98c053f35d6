//! Working-directory layout and artifact sidecar bookkeeping.
//!
//! Each candidate gets a raw directory keyed by its identifier plus a JSON
//! sidecar recording which artifacts exist for it. The resume probe reads
//! the sidecar, so detecting an already-fetched or already-converted title
//! is a deterministic key lookup, never substring matching against
//! human-readable titles.

use std::fs;
use std::io::{BufWriter, ErrorKind};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Errors from working-directory operations.
#[derive(Debug, Error)]
pub enum WorkdirError {
    /// Filesystem failure under the working directory.
    #[error("workdir I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Sidecar serialization failure.
    #[error("sidecar serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Persisted association between a key and its on-disk artifacts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactSidecar {
    /// Book key the artifacts belong to.
    pub key: String,
    /// Title at the time of recording, for human inspection of the workdir.
    pub title: String,
    /// Raw (as-fetched) artifact path, present until conversion succeeds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_path: Option<PathBuf>,
    /// Final (converted) artifact path, present once conversion succeeds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_path: Option<PathBuf>,
}

/// What the resume probe found for a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeState {
    /// Nothing usable on disk; the candidate starts from the fetch step.
    NotStarted,
    /// A raw artifact from a prior run exists; skip fetch, go to transcode.
    RawFetched(PathBuf),
    /// A converted artifact exists but the store was never updated; only
    /// the persist step remains.
    Converted(PathBuf),
}

/// Working directory for pipeline runs.
///
/// Layout: `<root>/raw/<key>/` holds per-key fetch output,
/// `<root>/sidecars/<key>.json` holds the artifact sidecar.
#[derive(Debug, Clone)]
pub struct Workdir {
    root: PathBuf,
}

impl Workdir {
    /// Opens (creating if needed) a working directory at `root`.
    ///
    /// # Errors
    ///
    /// Returns [`WorkdirError::Io`] if the directories cannot be created.
    #[instrument(skip(root), fields(root = %root.display()))]
    pub fn open(root: &Path) -> Result<Self, WorkdirError> {
        fs::create_dir_all(root.join("raw"))?;
        fs::create_dir_all(root.join("sidecars"))?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    /// Returns the per-key raw directory, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`WorkdirError::Io`] if the directory cannot be created.
    pub fn ensure_raw_dir(&self, key: &str) -> Result<PathBuf, WorkdirError> {
        let dir = self.root.join("raw").join(key);
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    fn sidecar_path(&self, key: &str) -> PathBuf {
        self.root.join("sidecars").join(format!("{key}.json"))
    }

    fn write_sidecar(&self, sidecar: &ArtifactSidecar) -> Result<(), WorkdirError> {
        let path = self.sidecar_path(&sidecar.key);
        let file = fs::File::create(&path)?;
        serde_json::to_writer_pretty(BufWriter::new(file), sidecar)?;
        debug!(path = %path.display(), "sidecar written");
        Ok(())
    }

    /// Records a freshly fetched raw artifact for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`WorkdirError`] on I/O or serialization failure.
    pub fn record_raw(&self, key: &str, title: &str, raw_path: &Path) -> Result<(), WorkdirError> {
        self.write_sidecar(&ArtifactSidecar {
            key: key.to_string(),
            title: title.to_string(),
            raw_path: Some(raw_path.to_path_buf()),
            final_path: None,
        })
    }

    /// Records a successfully converted artifact for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`WorkdirError`] on I/O or serialization failure.
    pub fn record_converted(
        &self,
        key: &str,
        title: &str,
        final_path: &Path,
    ) -> Result<(), WorkdirError> {
        self.write_sidecar(&ArtifactSidecar {
            key: key.to_string(),
            title: title.to_string(),
            raw_path: None,
            final_path: Some(final_path.to_path_buf()),
        })
    }

    /// Probes for artifacts from a prior run.
    ///
    /// A corrupt sidecar or one whose recorded paths no longer exist is
    /// treated as [`ResumeState::NotStarted`]; fetch is safe to repeat.
    ///
    /// # Errors
    ///
    /// Returns [`WorkdirError::Io`] for filesystem failures other than the
    /// sidecar simply not existing.
    #[instrument(skip(self), fields(key = %key))]
    pub fn probe(&self, key: &str) -> Result<ResumeState, WorkdirError> {
        let path = self.sidecar_path(key);
        let payload = match fs::read(&path) {
            Ok(payload) => payload,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                return Ok(ResumeState::NotStarted);
            }
            Err(error) => return Err(error.into()),
        };

        let sidecar: ArtifactSidecar = match serde_json::from_slice(&payload) {
            Ok(sidecar) => sidecar,
            Err(error) => {
                warn!(path = %path.display(), error = %error, "corrupt sidecar ignored");
                return Ok(ResumeState::NotStarted);
            }
        };

        if let Some(final_path) = sidecar.final_path
            && final_path.is_file()
        {
            return Ok(ResumeState::Converted(final_path));
        }

        if let Some(raw_path) = sidecar.raw_path
            && raw_path.is_file()
        {
            return Ok(ResumeState::RawFetched(raw_path));
        }

        Ok(ResumeState::NotStarted)
    }

    /// Removes all bookkeeping for `key` after its record is persisted.
    ///
    /// Best-effort on the raw directory: a missing directory is fine.
    ///
    /// # Errors
    ///
    /// Returns [`WorkdirError::Io`] when removal fails for a reason other
    /// than the paths already being gone.
    pub fn clear(&self, key: &str) -> Result<(), WorkdirError> {
        remove_ignoring_missing(fs::remove_file(self.sidecar_path(key)))?;
        remove_ignoring_missing(fs::remove_dir_all(self.root.join("raw").join(key)))?;
        Ok(())
    }
}

fn remove_ignoring_missing(result: std::io::Result<()>) -> Result<(), WorkdirError> {
    match result {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
        Err(error) => Err(error.into()),
    }
}

/// Builds the final artifact filename for a title.
///
/// The sanitized title keeps the library browsable; the key suffix keeps
/// the name unique and deterministic across similarly named titles.
#[must_use]
pub fn final_artifact_name(title: &str, key: &str, extension: &str) -> String {
    let sanitized: String = title
        .chars()
        .map(|ch| {
            if ch.is_alphanumeric() || matches!(ch, ' ' | '-' | '_' | '.' | '\'') {
                ch
            } else {
                '_'
            }
        })
        .collect();
    let sanitized = sanitized.trim();
    if sanitized.is_empty() {
        format!("{key}.{extension}")
    } else {
        format!("{sanitized} [{key}].{extension}")
    }
}
