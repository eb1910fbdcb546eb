mod cache;
mod commands;
mod config;
mod logging;
mod net;
mod worker;

use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;

use crate::cache::{Caches, SqliteStorage};
use crate::net::HttpClient;

#[derive(Parser, Debug)]
#[command(name = "tmdb-sw")]
#[command(about = "Network-first request interceptor with an offline response cache")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/tmdb-sw/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Path to the cache database (overrides cache_path from the config)
  #[arg(long)]
  cache_db: Option<PathBuf>,

  #[command(subcommand)]
  command: commands::Command,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;

  // Override cache location if specified on command line
  let config = if let Some(cache_path) = args.cache_db {
    config::Config {
      cache_path: Some(cache_path),
      ..config
    }
  } else {
    config
  };

  let _log_guard = logging::init(&config.log)?;

  let storage = SqliteStorage::open(&config.cache_path()?)?;
  let network = Arc::new(HttpClient::new(&config)?);

  commands::run(args.command, Caches::new(storage), network).await
}
