//! Command-line interface definition.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use caa_mirror::{Config, FailedRecordPolicy, RequeueScope};

/// Resumable mirror of the Cover Art Archive
#[derive(Debug, Parser)]
#[command(name = "caa-mirror", version, about)]
pub struct Cli {
    /// Path of the SQLite index
    #[arg(long, global = true, env = "DB_PATH", value_name = "PATH")]
    pub database: Option<PathBuf>,

    /// Root directory of the image cache
    #[arg(long, global = true, env = "CACHE_DIR", value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// JSON configuration file; flags and environment override its values
    #[arg(long, global = true, env = "CAA_MIRROR_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log debug output from caa-mirror (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Command to run
    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Load cover art records from a MusicBrainz database into the index
    Import(ImportArgs),
    /// Download every pending record into the cache
    Download(DownloadArgs),
    /// Re-queue downloaded records whose cache file is missing or empty
    Verify,
    /// Show index counts and the last import
    Status,
    /// Reset failed records to pending
    Requeue(RequeueArgs),
    /// Serve the status endpoint without downloading
    Monitor(MonitorArgs),
}

/// Options for `import`
#[derive(Debug, Args)]
pub struct ImportArgs {
    /// PostgreSQL connection string of the MusicBrainz database
    #[arg(long, env = "PG_CONN_STRING", value_name = "URL")]
    pub source: Option<String>,

    /// Records per batch
    #[arg(long, value_name = "N")]
    pub batch_size: Option<usize>,

    /// Only import artifacts uploaded since the last finished import
    #[arg(long)]
    pub incremental: bool,
}

/// Options for `download`
#[derive(Debug, Args)]
pub struct DownloadArgs {
    /// Worker pool size
    #[arg(long, env = "DOWNLOAD_THREADS", value_name = "N")]
    pub workers: Option<usize>,

    /// Pending records read from the index per batch
    #[arg(long, value_name = "N")]
    pub batch_size: Option<usize>,

    /// What to do with records that failed on an earlier run
    /// (manual, retry-transient, retry-all)
    #[arg(long, value_name = "POLICY")]
    pub failed_policy: Option<FailedRecordPolicy>,

    /// Serve the status endpoint on this address while downloading
    #[arg(long, value_name = "ADDR")]
    pub monitor: Option<SocketAddr>,

    /// Disable the progress bar
    #[arg(long)]
    pub no_progress: bool,
}

/// Options for `requeue`
#[derive(Debug, Args)]
pub struct RequeueArgs {
    /// Also re-queue permanent failures (404s)
    #[arg(long)]
    pub all: bool,
}

impl RequeueArgs {
    /// Which failures to reset
    pub fn scope(&self) -> RequeueScope {
        if self.all {
            RequeueScope::All
        } else {
            RequeueScope::Transient
        }
    }
}

/// Options for `monitor`
#[derive(Debug, Args)]
pub struct MonitorArgs {
    /// Address to bind
    #[arg(long, value_name = "ADDR")]
    pub bind: Option<SocketAddr>,
}

impl Cli {
    /// Load the config file (if any), apply flag overrides and validate
    pub async fn load_config(&self) -> anyhow::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path).await?,
            None => Config::default(),
        };
        self.apply_overrides(&mut config);
        config.validate()?;
        Ok(config)
    }

    /// Overlay command-line and environment values onto `config`
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(path) = &self.database {
            config.persistence.database_path = path.clone();
        }
        if let Some(dir) = &self.cache_dir {
            config.cache_dir = Some(dir.clone());
        }

        match &self.command {
            Command::Import(args) => {
                if let Some(url) = &args.source {
                    config.source.url = Some(url.clone());
                }
                if let Some(n) = args.batch_size {
                    config.source.batch_size = n;
                }
            }
            Command::Download(args) => {
                if let Some(n) = args.workers {
                    config.download.workers = n;
                }
                if let Some(n) = args.batch_size {
                    config.download.batch_size = n;
                }
                if let Some(policy) = args.failed_policy {
                    config.download.failed_policy = policy;
                }
                if let Some(addr) = args.monitor {
                    config.monitor.enabled = true;
                    config.monitor.bind_address = addr;
                }
            }
            Command::Monitor(args) => {
                if let Some(addr) = args.bind {
                    config.monitor.bind_address = addr;
                }
            }
            Command::Verify | Command::Status | Command::Requeue(_) => {}
        }
    }
}
