mod cache;
mod config;
mod net;
#[cfg(test)]
mod testing;
mod worker;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cache::{
  CacheStorage, MemoryStorage, OfflineCache, Request, RequestKey, Resolution, SqliteStorage,
};
use config::Config;
use net::{HttpNetwork, Network, OfflineNetwork};
use worker::Registration;

#[derive(Parser, Debug)]
#[command(name = "pulse-cache")]
#[command(about = "Offline resource cache for the Crypto Pulse dashboard")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/pulse-cache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Keep the cache in memory for this run only
  #[arg(long)]
  ephemeral: bool,

  /// Reject every network request
  #[arg(long)]
  offline: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Precache every resource in the manifest
  Install,
  /// Resolve a resource through the cache
  Fetch {
    /// Path on the dashboard origin or absolute URL
    target: String,
    /// HTTP method
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,
    /// Write the body here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Precache the manifest before fetching
    #[arg(long)]
    install: bool,
  },
  /// List stored request identities
  Entries,
}

/// Initialize the tracing subscriber.
///
/// Logs go to stderr and to a daily rolling file. Use RUST_LOG to control
/// the level (default: warn).
fn init_tracing(log_dir: &Path) -> WorkerGuard {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

  let file_appender = tracing_appender::rolling::daily(log_dir, "pulse-cache.log");
  let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

  tracing_subscriber::registry()
    .with(fmt::layer().with_writer(std::io::stderr))
    .with(fmt::layer().with_ansi(false).with_writer(file_writer))
    .with(filter)
    .init();

  guard
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;

  let database = config.database_path()?;
  let log_dir = database
    .parent()
    .map(Path::to_path_buf)
    .unwrap_or_else(|| PathBuf::from("."));
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;
  let _guard = init_tracing(&log_dir);
  info!(cache = %config.cache_name, "pulse-cache starting");

  match (args.ephemeral, args.offline) {
    (true, true) => run(args.command, &config, MemoryStorage::new(), OfflineNetwork).await,
    (true, false) => {
      let network = HttpNetwork::new(&config)?;
      run(args.command, &config, MemoryStorage::new(), network).await
    }
    (false, true) => {
      let storage = SqliteStorage::open(&database, &config.cache_name)?;
      run(args.command, &config, storage, OfflineNetwork).await
    }
    (false, false) => {
      let storage = SqliteStorage::open(&database, &config.cache_name)?;
      let network = HttpNetwork::new(&config)?;
      run(args.command, &config, storage, network).await
    }
  }
}

async fn run<S, N>(command: Command, config: &Config, storage: S, network: N) -> Result<()>
where
  S: CacheStorage + 'static,
  N: Network,
{
  let storage = Arc::new(storage);
  let network = Arc::new(network);
  let cache = OfflineCache::from_shared(
    Arc::clone(&storage),
    Arc::clone(&network),
    config.fallback_key()?,
  );

  match command {
    Command::Install => {
      let mut registration = Registration::new(network);
      let count = registration.register(cache, &config.manifest_keys()?).await?;
      info!(state = ?registration.state(), "Registration updated");
      println!("Precached {} resources into {}", count, config.cache_name);
    }
    Command::Fetch {
      target,
      method,
      output,
      install,
    } => {
      let key = config.resolve(&target)?;
      let key = RequestKey::new(&method, key.url);

      let mut registration = if storage.keys()?.is_empty() {
        Registration::new(Arc::clone(&network))
      } else {
        Registration::activated(Arc::clone(&network), cache.clone())
      };
      if install {
        // A failed install leaves the previous worker, if any, serving
        if let Err(e) = registration.register(cache, &config.manifest_keys()?).await {
          warn!(error = %e, "Install failed");
          eprintln!("warning: install failed: {}", e);
        }
      }
      if !registration.is_controlled() {
        eprintln!("warning: cache not installed, request is uncontrolled");
      }

      let resolution = registration
        .handle(&Request::new(key.clone()))
        .await
        .ok_or_else(|| eyre!("Request unresolved: {}", key))?;

      eprintln!("{}", status_line(&key, &resolution));

      match output {
        Some(path) => std::fs::write(&path, &resolution.response.body)
          .map_err(|e| eyre!("Failed to write {}: {}", path.display(), e))?,
        None => {
          let mut stdout = std::io::stdout().lock();
          stdout.write_all(&resolution.response.body)?;
          stdout.flush()?;
        }
      }
    }
    Command::Entries => {
      let keys = storage.keys()?;
      if keys.is_empty() {
        println!("{} is empty", config.cache_name);
      }
      for key in keys {
        println!("{}", key);
      }
    }
  }

  Ok(())
}

/// One-line summary of a resolved request for stderr.
fn status_line(key: &RequestKey, resolution: &Resolution) -> String {
  let content_type = resolution
    .response
    .header("content-type")
    .unwrap_or("unknown type");

  match resolution.cached_at {
    Some(cached_at) => format!(
      "{} {} ({}, stored {}, {})",
      resolution.response.status,
      key,
      resolution.source,
      cached_at.format("%Y-%m-%d %H:%M:%S UTC"),
      content_type
    ),
    None => format!(
      "{} {} ({}, {})",
      resolution.response.status, key, resolution.source, content_type
    ),
  }
}
