//! Download pipeline for eligible library titles.
//!
//! The pipeline selects candidates from the store, fetches their raw audio
//! through a [`FetchAgent`], converts it through a [`TranscodeAgent`], and
//! marks the record downloaded. Each candidate moves through the stages
//! independently: one title failing never aborts the batch.
//!
//! # Concurrency Model
//!
//! - Each candidate runs in its own Tokio task
//! - A semaphore permit is acquired before starting each candidate
//! - Permits are released automatically when tasks complete (RAII)
//! - A per-key mutex guarantees one in-flight attempt per title
//! - Cancellation is honored at candidate boundaries: in-flight work
//!   finishes, no new work starts
//!
//! # Resumability
//!
//! Every fetched or converted artifact is recorded in a per-key sidecar
//! (see [`workdir`]). A rerun probes the sidecar first and skips the
//! stages whose output already exists, so interrupted runs never re-fetch
//! what is already on disk.

pub mod agents;
pub mod workdir;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

pub use agents::{AgentError, CliFetchAgent, CliTranscodeAgent, FetchAgent, TranscodeAgent};
pub use workdir::{ResumeState, Workdir, WorkdirError, final_artifact_name};

use crate::keylock::KeyLocks;
use crate::store::{BookStore, DownloadCandidate, StoreError};

/// Minimum allowed concurrency value.
const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed concurrency value.
const MAX_CONCURRENCY: usize = 16;

/// Default concurrency if not specified.
pub const DEFAULT_PIPELINE_CONCURRENCY: usize = 3;

/// Default per-candidate fetch timeout.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(1800);

/// Default per-candidate transcode timeout.
pub const DEFAULT_TRANSCODE_TIMEOUT: Duration = Duration::from_secs(900);

/// Error type for pipeline operations.
///
/// These are batch-fatal conditions only; per-candidate failures are
/// counted in [`PipelineStats`] and never surface here.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Invalid concurrency value provided.
    #[error(
        "invalid concurrency value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency {
        /// The invalid value that was provided.
        value: usize,
    },

    /// Store operation failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Working directory could not be prepared.
    #[error("workdir error: {0}")]
    Workdir(#[from] WorkdirError),

    /// Output directory could not be prepared.
    #[error("output directory error: {0}")]
    Io(#[from] std::io::Error),

    /// Semaphore was closed unexpectedly.
    #[error("semaphore closed unexpectedly")]
    SemaphoreClosed,
}

/// Stage at which a candidate failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    /// Raw audio retrieval failed or timed out.
    Fetch,
    /// Format conversion failed or timed out.
    Transcode,
    /// The store update after a successful conversion failed.
    Persist,
}

impl std::fmt::Display for FailureStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fetch => write!(f, "fetch"),
            Self::Transcode => write!(f, "transcode"),
            Self::Persist => write!(f, "persist"),
        }
    }
}

/// A per-candidate failure, counted and logged but never batch-fatal.
struct StageFailure {
    stage: FailureStage,
    message: String,
}

impl StageFailure {
    fn new(stage: FailureStage, error: &dyn std::fmt::Display) -> Self {
        Self {
            stage,
            message: error.to_string(),
        }
    }

    fn timed_out(stage: FailureStage, limit: Duration) -> Self {
        Self {
            stage,
            message: format!("timed out after {}s", limit.as_secs()),
        }
    }
}

/// Statistics from a pipeline batch run.
///
/// Uses atomic counters for thread-safe updates from concurrent candidate
/// tasks; a shared handle is also what the progress display polls.
#[derive(Debug, Default)]
pub struct PipelineStats {
    downloaded: AtomicUsize,
    resumed: AtomicUsize,
    failed_fetch: AtomicUsize,
    failed_transcode: AtomicUsize,
    failed_persist: AtomicUsize,
}

impl PipelineStats {
    /// Creates a new stats tracker with zero counts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of candidates fully downloaded and persisted.
    #[must_use]
    pub fn downloaded(&self) -> usize {
        self.downloaded.load(Ordering::SeqCst)
    }

    /// Returns the number of candidates that skipped at least one stage
    /// because a prior run left a usable artifact.
    #[must_use]
    pub fn resumed(&self) -> usize {
        self.resumed.load(Ordering::SeqCst)
    }

    /// Returns the number of candidates that failed during fetch.
    #[must_use]
    pub fn failed_fetch(&self) -> usize {
        self.failed_fetch.load(Ordering::SeqCst)
    }

    /// Returns the number of candidates that failed during transcode.
    #[must_use]
    pub fn failed_transcode(&self) -> usize {
        self.failed_transcode.load(Ordering::SeqCst)
    }

    /// Returns the number of candidates that failed during persist.
    #[must_use]
    pub fn failed_persist(&self) -> usize {
        self.failed_persist.load(Ordering::SeqCst)
    }

    /// Returns the total number of failed candidates across all stages.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.failed_fetch() + self.failed_transcode() + self.failed_persist()
    }

    /// Returns the total number of candidates processed.
    #[must_use]
    pub fn total(&self) -> usize {
        self.downloaded() + self.failed()
    }

    fn increment_downloaded(&self) {
        self.downloaded.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_resumed(&self) {
        self.resumed.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_failure(&self, stage: FailureStage) {
        let counter = match stage {
            FailureStage::Fetch => &self.failed_fetch,
            FailureStage::Transcode => &self.failed_transcode,
            FailureStage::Persist => &self.failed_persist,
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }

    fn snapshot(&self) -> Self {
        let snapshot = Self::new();
        snapshot
            .downloaded
            .store(self.downloaded(), Ordering::SeqCst);
        snapshot.resumed.store(self.resumed(), Ordering::SeqCst);
        snapshot
            .failed_fetch
            .store(self.failed_fetch(), Ordering::SeqCst);
        snapshot
            .failed_transcode
            .store(self.failed_transcode(), Ordering::SeqCst);
        snapshot
            .failed_persist
            .store(self.failed_persist(), Ordering::SeqCst);
        snapshot
    }
}

/// Configuration for a pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Maximum number of candidates processed concurrently.
    pub concurrency: usize,
    /// Wall-clock limit for one candidate's fetch stage.
    pub fetch_timeout: Duration,
    /// Wall-clock limit for one candidate's transcode stage.
    pub transcode_timeout: Duration,
    /// Optional cap on the number of candidates taken this run.
    pub limit: Option<usize>,
    /// File extension for final artifacts.
    pub output_extension: String,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_PIPELINE_CONCURRENCY,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            transcode_timeout: DEFAULT_TRANSCODE_TIMEOUT,
            limit: None,
            output_extension: "m4b".to_string(),
        }
    }
}

/// Download pipeline for eligible titles.
#[derive(Debug)]
pub struct DownloadPipeline {
    /// Semaphore for concurrency control.
    semaphore: Arc<Semaphore>,
    /// Working directory for raw artifacts and sidecars.
    workdir: Workdir,
    /// Directory final artifacts are written into.
    output_dir: PathBuf,
    /// Run configuration.
    options: PipelineOptions,
    /// Per-key mutual exclusion table.
    key_locks: Arc<KeyLocks>,
    /// Live counters for this pipeline's runs.
    stats: Arc<PipelineStats>,
}

impl DownloadPipeline {
    /// Creates a pipeline writing into `output_dir`, with artifacts staged
    /// under `workdir`. Both directories are created if absent.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConcurrency`] if the configured
    /// concurrency is outside 1-16, or [`PipelineError::Io`] if the output
    /// directory cannot be created.
    #[instrument(skip(workdir, output_dir, options), fields(output_dir = %output_dir.display()))]
    pub fn new(
        workdir: Workdir,
        output_dir: &Path,
        options: PipelineOptions,
    ) -> Result<Self, PipelineError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&options.concurrency) {
            return Err(PipelineError::InvalidConcurrency {
                value: options.concurrency,
            });
        }

        std::fs::create_dir_all(output_dir)?;

        debug!(
            concurrency = options.concurrency,
            fetch_timeout_s = options.fetch_timeout.as_secs(),
            transcode_timeout_s = options.transcode_timeout.as_secs(),
            "creating download pipeline"
        );

        Ok(Self {
            semaphore: Arc::new(Semaphore::new(options.concurrency)),
            workdir,
            output_dir: output_dir.to_path_buf(),
            options,
            key_locks: Arc::new(KeyLocks::new()),
            stats: Arc::new(PipelineStats::new()),
        })
    }

    /// Returns the configured concurrency limit.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.options.concurrency
    }

    /// Returns a live handle to this pipeline's counters, suitable for
    /// polling from a progress display while a run is in flight.
    #[must_use]
    pub fn stats(&self) -> Arc<PipelineStats> {
        Arc::clone(&self.stats)
    }

    /// Processes all currently eligible candidates.
    ///
    /// Candidates are library titles not yet downloaded and not finished,
    /// in stable title order. Setting `cancel` stops the run at the next
    /// candidate boundary; tasks already started run to completion.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Store`] if the candidate query fails and
    /// [`PipelineError::SemaphoreClosed`] if the semaphore is closed.
    ///
    /// Note: individual candidate failures do NOT cause this method to
    /// error. They are logged, counted in the returned stats, and the rest
    /// of the batch proceeds.
    #[instrument(skip_all)]
    pub async fn run(
        &self,
        store: &BookStore,
        fetch_agent: &Arc<dyn FetchAgent>,
        transcode_agent: &Arc<dyn TranscodeAgent>,
        cancel: &AtomicBool,
    ) -> Result<PipelineStats, PipelineError> {
        let mut candidates = store.download_candidates().await?;
        if let Some(limit) = self.options.limit {
            candidates.truncate(limit);
        }

        info!(candidates = candidates.len(), "starting download pipeline");

        let mut handles = Vec::new();
        for candidate in candidates {
            // Cancellation is honored between candidates only
            if cancel.load(Ordering::SeqCst) {
                info!("cancellation requested, not starting further candidates");
                break;
            }

            // Acquire semaphore permit (blocks if at concurrency limit)
            let permit = self
                .semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| PipelineError::SemaphoreClosed)?;

            let store = store.clone();
            let fetch_agent = Arc::clone(fetch_agent);
            let transcode_agent = Arc::clone(transcode_agent);
            let workdir = self.workdir.clone();
            let output_dir = self.output_dir.clone();
            let options = self.options.clone();
            let stats = Arc::clone(&self.stats);
            let lock = self.key_locks.lock_for(&candidate.key);

            handles.push(tokio::spawn(async move {
                // Permit is dropped when this block exits (RAII)
                let _permit = permit;
                // One in-flight attempt per key
                let _guard = lock.lock().await;

                let result = process_candidate(
                    &store,
                    fetch_agent.as_ref(),
                    transcode_agent.as_ref(),
                    &workdir,
                    &output_dir,
                    &options,
                    &stats,
                    &candidate,
                )
                .await;

                match result {
                    Ok(final_path) => {
                        info!(
                            key = %candidate.key,
                            title = %candidate.title,
                            path = %final_path.display(),
                            "candidate downloaded"
                        );
                        stats.increment_downloaded();
                    }
                    Err(failure) => {
                        warn!(
                            key = %candidate.key,
                            title = %candidate.title,
                            stage = %failure.stage,
                            error = %failure.message,
                            "candidate failed"
                        );
                        stats.increment_failure(failure.stage);
                    }
                }
            }));
        }

        debug!(task_count = handles.len(), "waiting for candidates");

        for handle in handles {
            // Task panics are logged but don't fail the batch
            if let Err(e) = handle.await {
                warn!(error = %e, "candidate task panicked");
            }
        }

        let stats = self.stats.snapshot();
        info!(
            downloaded = stats.downloaded(),
            failed = stats.failed(),
            resumed = stats.resumed(),
            total = stats.total(),
            "download pipeline complete"
        );

        Ok(stats)
    }
}

/// Moves one candidate through fetch, transcode, and persist.
///
/// Returns the final artifact path on success or the failing stage on
/// error. Every transition is recorded in the candidate's sidecar so an
/// interrupted attempt resumes at the first incomplete stage.
#[allow(clippy::too_many_arguments)]
#[instrument(skip_all, fields(key = %candidate.key, title = %candidate.title))]
async fn process_candidate(
    store: &BookStore,
    fetch_agent: &dyn FetchAgent,
    transcode_agent: &dyn TranscodeAgent,
    workdir: &Workdir,
    output_dir: &Path,
    options: &PipelineOptions,
    stats: &PipelineStats,
    candidate: &DownloadCandidate,
) -> Result<PathBuf, StageFailure> {
    let key = candidate.key.as_str();
    let title = candidate.title.as_str();

    let resume = workdir
        .probe(key)
        .map_err(|e| StageFailure::new(FailureStage::Fetch, &e))?;

    let final_path = match resume {
        ResumeState::Converted(final_path) => {
            debug!(path = %final_path.display(), "resuming at persist");
            stats.increment_resumed();
            final_path
        }
        ResumeState::RawFetched(raw_path) => {
            debug!(path = %raw_path.display(), "resuming at transcode");
            stats.increment_resumed();
            transcode_stage(
                transcode_agent,
                workdir,
                output_dir,
                options,
                key,
                title,
                &raw_path,
            )
            .await?
        }
        ResumeState::NotStarted => {
            let raw_path = fetch_stage(fetch_agent, workdir, options, key, title).await?;
            transcode_stage(
                transcode_agent,
                workdir,
                output_dir,
                options,
                key,
                title,
                &raw_path,
            )
            .await?
        }
    };

    store
        .mark_downloaded(key)
        .await
        .map_err(|e| StageFailure::new(FailureStage::Persist, &e))?;

    // Record is durable; staging state is no longer needed
    if let Err(e) = workdir.clear(key) {
        warn!(key, error = %e, "failed to clear staging state");
    }

    Ok(final_path)
}

/// Fetches the raw artifact for a candidate and records it in the sidecar.
async fn fetch_stage(
    fetch_agent: &dyn FetchAgent,
    workdir: &Workdir,
    options: &PipelineOptions,
    key: &str,
    title: &str,
) -> Result<PathBuf, StageFailure> {
    let raw_dir = workdir
        .ensure_raw_dir(key)
        .map_err(|e| StageFailure::new(FailureStage::Fetch, &e))?;

    let raw_path = match timeout(options.fetch_timeout, fetch_agent.fetch(key, &raw_dir)).await {
        Ok(Ok(raw_path)) => raw_path,
        Ok(Err(e)) => return Err(StageFailure::new(FailureStage::Fetch, &e)),
        Err(_) => {
            return Err(StageFailure::timed_out(
                FailureStage::Fetch,
                options.fetch_timeout,
            ));
        }
    };

    workdir
        .record_raw(key, title, &raw_path)
        .map_err(|e| StageFailure::new(FailureStage::Fetch, &e))?;

    Ok(raw_path)
}

/// Converts a raw artifact into the final output and records the result.
///
/// The raw artifact is removed only after conversion succeeds, so a
/// transcode failure leaves the fetch result available for the next run.
async fn transcode_stage(
    transcode_agent: &dyn TranscodeAgent,
    workdir: &Workdir,
    output_dir: &Path,
    options: &PipelineOptions,
    key: &str,
    title: &str,
    raw_path: &Path,
) -> Result<PathBuf, StageFailure> {
    let final_path = output_dir.join(final_artifact_name(title, key, &options.output_extension));

    match timeout(
        options.transcode_timeout,
        transcode_agent.transcode(raw_path, &final_path),
    )
    .await
    {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(StageFailure::new(FailureStage::Transcode, &e)),
        Err(_) => {
            return Err(StageFailure::timed_out(
                FailureStage::Transcode,
                options.transcode_timeout,
            ));
        }
    }

    workdir
        .record_converted(key, title, &final_path)
        .map_err(|e| StageFailure::new(FailureStage::Transcode, &e))?;

    if let Err(e) = std::fs::remove_file(raw_path) {
        warn!(raw = %raw_path.display(), error = %e, "failed to remove raw artifact");
    }

    Ok(final_path)
}
