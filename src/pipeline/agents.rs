//! External agent seams for the download pipeline.
//!
//! Raw audio retrieval and format conversion are performed by external
//! programs. The pipeline depends only on the [`FetchAgent`] and
//! [`TranscodeAgent`] traits; tests substitute programmable doubles, and the
//! CLI wires in the subprocess-backed implementations below.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, instrument};

/// Errors produced by fetch/transcode agents.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The agent program could not be spawned or its output read.
    #[error("failed to run '{program}': {source}")]
    Io {
        /// Program that was invoked.
        program: String,
        /// Underlying IO failure.
        #[source]
        source: std::io::Error,
    },

    /// The agent program exited with a failure status.
    #[error("'{program}' exited with status {status}: {stderr}")]
    CommandFailed {
        /// Program that was invoked.
        program: String,
        /// Exit status description.
        status: String,
        /// Captured standard error, trimmed.
        stderr: String,
    },

    /// The agent reported success but produced no artifact.
    #[error("no artifact produced in '{}'", .0.display())]
    ArtifactMissing(PathBuf),
}

/// Retrieves the raw audio artifact for a key into a destination directory.
#[async_trait]
pub trait FetchAgent: Send + Sync {
    /// Fetches the raw artifact for `key` into `dest_dir` and returns its
    /// path. Must be safely re-invokable: a prior partial or complete fetch
    /// into the same directory is the implementation's concern.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError`] when the fetch fails; the pipeline isolates
    /// the failure to this candidate.
    async fn fetch(&self, key: &str, dest_dir: &Path) -> Result<PathBuf, AgentError>;
}

/// Converts a raw artifact into the final distributable format.
#[async_trait]
pub trait TranscodeAgent: Send + Sync {
    /// Converts `raw` into `output`. Deleting the raw artifact is the
    /// pipeline's responsibility, only after this returns success.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError`] when conversion fails or produces no output.
    async fn transcode(&self, raw: &Path, output: &Path) -> Result<(), AgentError>;
}

/// Runs one agent subprocess to completion, capturing stderr for reporting.
async fn run_agent_command(program: &str, command: &mut Command) -> Result<(), AgentError> {
    let output = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|source| AgentError::Io {
            program: program.to_string(),
            source,
        })?;

    if !output.status.success() {
        return Err(AgentError::CommandFailed {
            program: program.to_string(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(())
}

/// Production fetch agent that shells out to the external downloader CLI.
///
/// Invokes `program [base_args..] --asin <key> --output-dir <dest_dir>` and
/// then locates the artifact the program wrote into the (per-key)
/// destination directory.
#[derive(Debug, Clone)]
pub struct CliFetchAgent {
    program: String,
    base_args: Vec<String>,
}

impl CliFetchAgent {
    /// Creates a fetch agent invoking `program` with the given base
    /// arguments before the per-call `--asin`/`--output-dir` pair.
    #[must_use]
    pub fn new(program: &str, base_args: Vec<String>) -> Self {
        Self {
            program: program.to_string(),
            base_args,
        }
    }

    /// Picks the fetched artifact out of the destination directory.
    ///
    /// The directory is keyed by the book's identifier and starts empty, so
    /// any regular file in it belongs to this fetch; with several, the
    /// lexicographically first is chosen so repeated runs agree.
    fn locate_artifact(dest_dir: &Path) -> Result<PathBuf, AgentError> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(dest_dir)
            .map_err(|source| AgentError::Io {
                program: "read_dir".to_string(),
                source,
            })?
            .filter_map(std::result::Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .collect();

        files.sort();
        files
            .into_iter()
            .next()
            .ok_or_else(|| AgentError::ArtifactMissing(dest_dir.to_path_buf()))
    }
}

#[async_trait]
impl FetchAgent for CliFetchAgent {
    #[instrument(skip(self, dest_dir), fields(program = %self.program, key = %key))]
    async fn fetch(&self, key: &str, dest_dir: &Path) -> Result<PathBuf, AgentError> {
        debug!(dest_dir = %dest_dir.display(), "running fetch agent");

        let mut command = Command::new(&self.program);
        command
            .args(&self.base_args)
            .arg("--asin")
            .arg(key)
            .arg("--output-dir")
            .arg(dest_dir);

        run_agent_command(&self.program, &mut command).await?;
        Self::locate_artifact(dest_dir)
    }
}

/// Production transcode agent that shells out to a converter program.
///
/// Argument templates substitute `{input}` with the raw artifact path and
/// `{output}` with the final artifact path.
#[derive(Debug, Clone)]
pub struct CliTranscodeAgent {
    program: String,
    args_template: Vec<String>,
}

impl CliTranscodeAgent {
    /// Creates a transcode agent invoking `program` with the given argument
    /// template.
    #[must_use]
    pub fn new(program: &str, args_template: Vec<String>) -> Self {
        Self {
            program: program.to_string(),
            args_template,
        }
    }

    fn substituted_args(&self, raw: &Path, output: &Path) -> Vec<String> {
        self.args_template
            .iter()
            .map(|arg| {
                arg.replace("{input}", &raw.display().to_string())
                    .replace("{output}", &output.display().to_string())
            })
            .collect()
    }
}

#[async_trait]
impl TranscodeAgent for CliTranscodeAgent {
    #[instrument(skip(self, raw, output), fields(program = %self.program, raw = %raw.display()))]
    async fn transcode(&self, raw: &Path, output: &Path) -> Result<(), AgentError> {
        let args = self.substituted_args(raw, output);
        debug!(?args, "running transcode agent");

        let mut command = Command::new(&self.program);
        command.args(&args);
        run_agent_command(&self.program, &mut command).await?;

        // Success is only believed when the output actually exists.
        if !output.is_file() {
            return Err(AgentError::ArtifactMissing(output.to_path_buf()));
        }

        Ok(())
    }
}
