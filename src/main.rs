//! CLI entry point for the booksync tool.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Result;
use booksync::app::progress::spawn_progress_ui;
use booksync::cli::{Args, Command, DownloadArgs, SyncArgs};
use booksync::{
    BookStore, CliCatalogFetcher, CliFetchAgent, CliTranscodeAgent, Database, DownloadPipeline,
    FetchAgent, PipelineOptions, SyncOptions, TranscodeAgent, Workdir, run_sync,
};
use clap::Parser;
use tracing::{debug, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Determine log level based on verbose/quiet flags
    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");
    info!("Booksync starting");

    let db = Database::new(&args.db).await?;
    let store = BookStore::new(db);

    match args.command {
        Command::Sync(sync_args) => run_sync_command(&store, &sync_args).await,
        Command::Download(download_args) => run_download_command(&store, &download_args).await,
    }
}

/// Reconciles the catalog service's feeds into the database.
async fn run_sync_command(store: &BookStore, args: &SyncArgs) -> Result<()> {
    let fetcher = CliCatalogFetcher::new(
        &args.catalog_program,
        args.library_args.clone(),
        args.wishlist_args.clone(),
    );

    let options = SyncOptions {
        concurrency: usize::from(args.concurrency),
        fail_on_empty: args.fail_on_empty,
    };

    let stats = run_sync(store, &fetcher, &options).await?;

    info!(
        inserted = stats.inserted(),
        updated = stats.updated(),
        unchanged = stats.unchanged(),
        skipped = stats.skipped(),
        wishlist_suppressed = stats.wishlist_suppressed(),
        "Sync complete"
    );

    Ok(())
}

/// Fetches and converts owned titles that are not yet downloaded.
async fn run_download_command(store: &BookStore, args: &DownloadArgs) -> Result<()> {
    let workdir = Workdir::open(&args.workdir)?;

    let options = PipelineOptions {
        concurrency: usize::from(args.concurrency),
        fetch_timeout: Duration::from_secs(args.fetch_timeout_secs),
        transcode_timeout: Duration::from_secs(args.transcode_timeout_secs),
        limit: args.limit,
        output_extension: args.output_extension.clone(),
    };

    let pipeline = DownloadPipeline::new(workdir, &args.output_dir, options)?;

    let fetch_agent: Arc<dyn FetchAgent> =
        Arc::new(CliFetchAgent::new(&args.fetch_program, args.fetch_args.clone()));
    let transcode_agent: Arc<dyn TranscodeAgent> = Arc::new(CliTranscodeAgent::new(
        &args.transcode_program,
        args.transcode_args.clone(),
    ));

    // Ctrl-C stops the run at the next title boundary; in-flight titles finish
    let cancel = Arc::new(AtomicBool::new(false));
    let ctrl_c_cancel = Arc::clone(&cancel);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, finishing in-flight titles");
            ctrl_c_cancel.store(true, Ordering::SeqCst);
        }
    });

    let candidate_count = store.download_candidates().await?.len();
    let total = args
        .limit
        .map_or(candidate_count, |limit| candidate_count.min(limit));
    let (progress_handle, progress_stop) =
        spawn_progress_ui(!args.no_progress, pipeline.stats(), total);

    let result = pipeline
        .run(store, &fetch_agent, &transcode_agent, &cancel)
        .await;

    progress_stop.store(true, Ordering::SeqCst);
    if let Some(handle) = progress_handle
        && let Err(e) = handle.await
    {
        warn!(error = %e, "progress task panicked");
    }

    let stats = result?;
    info!(
        downloaded = stats.downloaded(),
        failed_fetch = stats.failed_fetch(),
        failed_transcode = stats.failed_transcode(),
        failed_persist = stats.failed_persist(),
        resumed = stats.resumed(),
        total = stats.total(),
        "Download complete"
    );

    Ok(())
}
