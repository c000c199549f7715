//! Handlers for each CLI subcommand.

use chrono::{Duration, NaiveDate};
use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use uuid::Uuid;

use journal_sync::clock::SystemClock;
use journal_sync::config::Config;
use journal_sync::flags::LocalFlags;
use journal_sync::journal::{CachedJournalClient, Stores};
use journal_sync::queue::PendingOperation;
use journal_sync::store::{DataDir, Store};
use journal_sync::transport::ReqwestTransport;

use crate::Command;

pub async fn run(command: Command, config: &Config, dir: &DataDir) -> Result<()> {
  match command {
    Command::Status => status(config, dir).await,
    Command::Pending => pending(config, dir).await,
    Command::Replay => replay(config, dir).await,
    Command::Prune { days } => {
      let max_age = days.map(Duration::days).unwrap_or_else(|| config.retention());
      prune(config, dir, max_age).await
    }
    Command::Entry { date } => entry(config, dir, &date).await,
    Command::Discard { id } => discard(config, dir, &id).await,
    Command::SignIn { email } => sign_in(config, dir, &email).await,
    Command::SignOut => {
      open_client(config, dir).await?.sign_out().await?;
      println!("Signed out");
      Ok(())
    }
    Command::Flag { name, value } => flag(dir, name, value).await,
  }
}

async fn open_client(config: &Config, dir: &DataDir) -> Result<CachedJournalClient> {
  let transport = ReqwestTransport::new(&config.api.base_url, config.timeout(), &config.api.user_agent)
    .map_err(|e| eyre!("Failed to create HTTP client for {}: {}", config.api.base_url, e))?;

  Ok(
    CachedJournalClient::open(
      Stores::on_disk(dir),
      Arc::new(transport),
      Arc::new(SystemClock),
      config.sync_settings(),
    )
    .await,
  )
}

async fn status(config: &Config, dir: &DataDir) -> Result<()> {
  let client = open_client(config, dir).await?;

  let session = match client.sessions().current().await {
    Some(s) => format!("signed in ({})", s.identity()),
    None => "signed out".to_string(),
  };
  println!("Session:  {}", session);
  println!("Pending:  {}", client.pending_count().await);

  let stuck = client.stuck(config.replay.conflict_threshold).await;
  if !stuck.is_empty() {
    println!(
      "Stuck:    {} (failed {}+ times, see `journal-sync pending`)",
      stuck.len(),
      config.replay.conflict_threshold
    );
  }
  println!("Data dir: {}", dir.root().display());
  Ok(())
}

async fn pending(config: &Config, dir: &DataDir) -> Result<()> {
  let client = open_client(config, dir).await?;
  let ops = client.pending().await;
  if ops.is_empty() {
    println!("No pending writes");
    return Ok(());
  }

  for op in &ops {
    println!("{}", describe(op));
  }
  Ok(())
}

fn describe(op: &PendingOperation) -> String {
  let last = op
    .last_attempt_at
    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
    .unwrap_or_else(|| "never".to_string());
  format!(
    "{}  {:<26} {}  attempts={} last={}",
    op.id, op.kind, op.target, op.attempt_count, last
  )
}

async fn replay(config: &Config, dir: &DataDir) -> Result<()> {
  let client = open_client(config, dir).await?;
  let report = client.replay().await;

  if report.unauthenticated {
    return Err(eyre!(
      "Session expired; {} writes are still queued. Run `journal-sync sign-in`.",
      client.pending_count().await
    ));
  }
  println!(
    "Replayed {} of {} attempted ({} failed, {} deferred, {} still pending)",
    report.succeeded,
    report.attempted,
    report.failed,
    report.deferred,
    client.pending_count().await
  );
  Ok(())
}

async fn prune(config: &Config, dir: &DataDir, max_age: Duration) -> Result<()> {
  let client = open_client(config, dir).await?;
  let removed = client.prune(max_age).await;
  println!("Pruned {} cached entries older than {} days", removed, max_age.num_days());
  Ok(())
}

async fn entry(config: &Config, dir: &DataDir, date: &str) -> Result<()> {
  let date = NaiveDate::parse_from_str(date, "%Y-%m-%d")
    .map_err(|e| eyre!("Invalid date {} (expected YYYY-MM-DD): {}", date, e))?;
  let client = open_client(config, dir).await?;

  let result = client.entry(date).await?;
  println!("Source: {:?}", result.source);
  match result.data {
    Some(entry) => println!("{}", serde_json::to_string_pretty(&entry)?),
    None => println!("No entry for {}", date),
  }
  Ok(())
}

async fn discard(config: &Config, dir: &DataDir, id: &str) -> Result<()> {
  let id = Uuid::parse_str(id).map_err(|e| eyre!("Invalid operation id {}: {}", id, e))?;
  let client = open_client(config, dir).await?;

  match client.discard(id).await {
    Some(op) => {
      println!("Discarded {}", describe(&op));
      Ok(())
    }
    None => Err(eyre!("No pending write with id {}", id)),
  }
}

async fn sign_in(config: &Config, dir: &DataDir, email: &str) -> Result<()> {
  let password = Config::get_password()?;
  let client = open_client(config, dir).await?;
  let session = client.sign_in(email, &password).await?;
  println!("Signed in ({})", session.identity());
  Ok(())
}

async fn flag(dir: &DataDir, name: Option<String>, value: Option<bool>) -> Result<()> {
  let flags = LocalFlags::open(Store::file(dir.flags_file())).await;

  match (name, value) {
    (Some(name), Some(on)) => {
      flags.set(&name, on).await?;
      println!("{} = {}", name, on);
    }
    (Some(name), None) => println!("{} = {}", name, flags.get(&name).await),
    (None, _) => {
      for (name, on) in flags.all().await {
        println!("{} = {}", name, on);
      }
    }
  }
  Ok(())
}
