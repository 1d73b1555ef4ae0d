//! `caa-mirror` command-line entry point.

mod cli;

use std::io::IsTerminal;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use caa_mirror::monitor::{self, MonitorState};
use caa_mirror::{
    CacheLayout, Config, Database, Downloader, Event, Importer, PostgresSource, RecordSource,
    Verifier, shutdown_token,
};

use cli::{Cli, Command};

const BAR_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec}, {eta}) {msg}";

#[tokio::main]
async fn main() -> std::process::ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "caa_mirror=debug,info"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(code) => std::process::ExitCode::from(code),
        Err(e) => {
            tracing::error!("caa-mirror failed: {:#}", e);
            std::process::ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<u8> {
    let config = cli.load_config().await?;

    match &cli.command {
        Command::Import(args) => import(config, args.incremental).await,
        Command::Download(args) => download(config, !args.no_progress).await,
        Command::Verify => verify(config).await,
        Command::Status => status(config).await,
        Command::Requeue(args) => {
            let db = open_index(&config).await?;
            let requeued = db.requeue_failed(args.scope()).await?;
            println!("Re-queued {} failed records", requeued);
            Ok(0)
        }
        Command::Monitor(_) => {
            let db = open_index(&config).await?;
            monitor::serve(
                config.monitor.bind_address,
                MonitorState::new(db),
                shutdown_token(),
            )
            .await?;
            Ok(0)
        }
    }
}

async fn open_index(config: &Config) -> anyhow::Result<Arc<Database>> {
    let path = &config.persistence.database_path;
    let db = Database::open_existing(path)
        .await
        .with_context(|| format!("cannot open index {}", path.display()))?;
    Ok(Arc::new(db))
}

async fn import(config: Config, incremental: bool) -> anyhow::Result<u8> {
    let url = config.require_source_url()?;
    let db = Arc::new(Database::new(&config.persistence.database_path).await?);
    let importer = Importer::new(db, config.source.batch_size);

    let since = if incremental {
        let watermark = importer.watermark().await?;
        if watermark.is_none() {
            tracing::warn!("No finished import recorded, running a full import");
        }
        watermark
    } else {
        None
    };

    let mut source = PostgresSource::connect(url, since).await?;
    let bar = progress_bar(source.total().await?, true);
    bar.set_message("importing");

    let summary = importer
        .run(&mut source, since.is_some(), |s| bar.set_position(s.fetched))
        .await;
    bar.finish_and_clear();
    let summary = summary?;

    println!(
        "Imported {} records ({} new, {} updated)",
        summary.fetched, summary.inserted, summary.updated
    );
    Ok(0)
}

async fn download(config: Config, show_progress: bool) -> anyhow::Result<u8> {
    let db = open_index(&config).await?;
    let monitor_config = config.monitor.clone();
    let downloader = Downloader::new(config, Arc::clone(&db)).await?;

    let monitor_shutdown = CancellationToken::new();
    let monitor_task = if monitor_config.enabled {
        let state = MonitorState::new(db).with_stats(downloader.stats());
        let shutdown = monitor_shutdown.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = monitor::serve(monitor_config.bind_address, state, shutdown).await {
                tracing::error!(error = %e, "Status monitor stopped");
            }
        }))
    } else {
        None
    };

    let bar = progress_bar(None, show_progress);
    let progress_task = tokio::spawn(track_progress(downloader.subscribe(), bar.clone()));

    let result = downloader.run(shutdown_token()).await;

    progress_task.abort();
    bar.finish_and_clear();
    monitor_shutdown.cancel();
    if let Some(task) = monitor_task {
        task.await.ok();
    }

    let summary = result?;
    println!(
        "Downloaded {}, failed {} ({} not found, {} transient), abandoned {}, already cached {}{}",
        summary.downloaded,
        summary.failed(),
        summary.failed_permanent,
        summary.failed_transient,
        summary.abandoned,
        summary.skipped,
        if summary.interrupted { " (interrupted)" } else { "" }
    );

    // exit_code is 0 or 2
    Ok(u8::try_from(summary.exit_code()).unwrap_or(1))
}

async fn verify(config: Config) -> anyhow::Result<u8> {
    let db = open_index(&config).await?;
    let layout = CacheLayout::new(config.require_cache_dir()?);

    let bar = progress_bar(None, true);
    bar.set_message("verifying");
    let summary = Verifier::new(db, layout)
        .run(|s| bar.set_position(s.checked))
        .await;
    bar.finish_and_clear();
    let summary = summary?;

    println!(
        "Checked {} downloaded records, re-queued {} with missing files",
        summary.checked, summary.missing
    );
    Ok(0)
}

async fn status(config: Config) -> anyhow::Result<u8> {
    let db = open_index(&config).await?;
    let counts = db.status_counts().await?;

    println!("Index:       {}", config.persistence.database_path.display());
    println!("Total:       {}", counts.total());
    println!("Pending:     {}", counts.pending);
    println!("Downloaded:  {}", counts.downloaded);
    println!(
        "Failed:      {} ({} not found, {} transient)",
        counts.failed(),
        counts.failed_permanent,
        counts.failed_transient
    );

    match db.last_import().await? {
        Some(run) => {
            let finished = run
                .finished_at
                .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0))
                .map(|dt| dt.to_rfc3339())
                .unwrap_or_default();
            println!(
                "Last import: {} ({}, {} fetched, {} new)",
                finished,
                if run.incremental { "incremental" } else { "full" },
                run.fetched,
                run.inserted
            );
        }
        None => println!("Last import: never"),
    }

    Ok(0)
}

/// Progress bar on stderr, hidden when disabled or not attached to a terminal
fn progress_bar(total: Option<u64>, enabled: bool) -> ProgressBar {
    if !enabled || !std::io::stderr().is_terminal() {
        return ProgressBar::hidden();
    }

    let bar = match total {
        Some(len) => ProgressBar::new(len),
        None => ProgressBar::new_spinner(),
    };
    bar.set_style(
        ProgressStyle::default_bar()
            .template(BAR_TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    bar.enable_steady_tick(Duration::from_millis(200));
    bar
}

async fn track_progress(mut events: tokio::sync::broadcast::Receiver<Event>, bar: ProgressBar) {
    loop {
        match events.recv().await {
            Ok(Event::RunStarted { pending, .. }) => bar.set_length(pending),
            Ok(Event::Downloaded { .. }) | Ok(Event::Failed { .. }) => bar.inc(1),
            Ok(Event::Drained { .. }) | Err(RecvError::Closed) => break,
            // Skipped events are almost all per-record outcomes
            Err(RecvError::Lagged(skipped)) => bar.inc(skipped),
        }
    }
}
