//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::pipeline::DEFAULT_PIPELINE_CONCURRENCY;
use crate::sync::DEFAULT_SYNC_CONCURRENCY;

/// Keep an audiobook catalog in sync and download what it owns.
///
/// Booksync reconciles a catalog service's library and wishlist feeds into
/// a local database, then fetches and converts the titles that are owned
/// but not yet downloaded.
#[derive(Parser, Debug)]
#[command(name = "booksync")]
#[command(author, version, about)]
pub struct Args {
    /// Path to the catalog database
    #[arg(long, global = true, default_value = "library.db")]
    pub db: PathBuf,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Reconcile the catalog service's library and wishlist into the database
    Sync(SyncArgs),
    /// Fetch and convert owned titles that are not yet downloaded
    Download(DownloadArgs),
}

#[derive(clap::Args, Debug)]
pub struct SyncArgs {
    /// Catalog agent program to invoke for feed exports
    #[arg(long, default_value = "audible")]
    pub catalog_program: String,

    /// Arguments producing the library feed as JSON on stdout
    #[arg(
        long,
        default_value = "library export --format json",
        value_delimiter = ' ',
        allow_hyphen_values = true
    )]
    pub library_args: Vec<String>,

    /// Arguments producing the wishlist feed as JSON on stdout
    #[arg(
        long,
        default_value = "wishlist export --format json",
        value_delimiter = ' ',
        allow_hyphen_values = true
    )]
    pub wishlist_args: Vec<String>,

    /// Maximum concurrent database reconciliations (1-64)
    #[arg(short = 'c', long, default_value_t = DEFAULT_SYNC_CONCURRENCY as u8, value_parser = clap::value_parser!(u8).range(1..=64))]
    pub concurrency: u8,

    /// Treat a completely empty catalog response as an error
    #[arg(long)]
    pub fail_on_empty: bool,
}

#[derive(clap::Args, Debug)]
pub struct DownloadArgs {
    /// Staging directory for raw artifacts and resume bookkeeping
    #[arg(long, default_value = "booksync-work")]
    pub workdir: PathBuf,

    /// Directory final audio files are written into
    #[arg(short = 'o', long, default_value = "audiobooks")]
    pub output_dir: PathBuf,

    /// Fetch agent program for raw audio retrieval
    #[arg(long, default_value = "audible")]
    pub fetch_program: String,

    /// Arguments placed before the per-title --asin/--output-dir pair
    #[arg(
        long,
        default_value = "download --aax",
        value_delimiter = ' ',
        allow_hyphen_values = true
    )]
    pub fetch_args: Vec<String>,

    /// Transcode agent program for format conversion
    #[arg(long, default_value = "ffmpeg")]
    pub transcode_program: String,

    /// Transcode argument template; {input} and {output} are substituted
    #[arg(
        long,
        default_value = "-y -i {input} -codec copy {output}",
        value_delimiter = ' ',
        allow_hyphen_values = true
    )]
    pub transcode_args: Vec<String>,

    /// Maximum concurrent downloads (1-16)
    #[arg(short = 'c', long, default_value_t = DEFAULT_PIPELINE_CONCURRENCY as u8, value_parser = clap::value_parser!(u8).range(1..=16))]
    pub concurrency: u8,

    /// Per-title fetch timeout in seconds (max 4 hours)
    #[arg(long, default_value_t = 1800, value_parser = clap::value_parser!(u64).range(1..=14400))]
    pub fetch_timeout_secs: u64,

    /// Per-title transcode timeout in seconds (max 4 hours)
    #[arg(long, default_value_t = 900, value_parser = clap::value_parser!(u64).range(1..=14400))]
    pub transcode_timeout_secs: u64,

    /// Process at most this many titles this run
    #[arg(short = 'n', long)]
    pub limit: Option<usize>,

    /// File extension for final artifacts
    #[arg(long, default_value = "m4b")]
    pub output_extension: String,

    /// Disable the live progress display
    #[arg(long)]
    pub no_progress: bool,
}
