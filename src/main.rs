mod commands;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;

use journal_sync::config::Config;
use journal_sync::logging;
use journal_sync::store::DataDir;

#[derive(Parser, Debug)]
#[command(name = "journal-sync")]
#[command(about = "Inspect and drive the offline sync state of the journal client")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/journal-sync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Also log to stderr
  #[arg(short, long)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
  /// Session, pending writes and stuck writes at a glance
  Status,
  /// List queued writes in replay order
  Pending,
  /// Push queued writes to the server now
  Replay,
  /// Drop cached days older than the retention period
  Prune {
    /// Override cache.retention_days
    #[arg(long)]
    days: Option<i64>,
  },
  /// Read one day's entry through the cache (YYYY-MM-DD)
  Entry { date: String },
  /// Give up on a queued write by id
  Discard { id: String },
  /// Sign in with email and password (password from JOURNAL_SYNC_PASSWORD)
  SignIn { email: String },
  /// Forget the stored session
  SignOut,
  /// Show local flags, or set one
  Flag {
    name: Option<String>,
    value: Option<bool>,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let data_dir = DataDir::open(config.data_dir.as_deref())?;

  let _log_guard = logging::init(&data_dir, args.verbose)?;
  tracing::debug!(data_dir = %data_dir.root().display(), "starting");

  commands::run(args.command, &config, &data_dir).await
}
