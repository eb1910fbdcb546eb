//! Subcommands of the `tmdb-sw` binary. Each one plays the host for a single
//! origin backed by the on-disk cache database.

use clap::Subcommand;
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::cache::{CacheResult, CacheStorage, Caches};
use crate::net::{Fetcher, Request, Response};
use crate::worker::{HostHandle, Interceptor, WorkerState, CACHE_NAME};

#[derive(Subcommand, Debug)]
pub enum Command {
  /// Install and activate a new worker version (deletes every cache)
  Deploy,

  /// Fetch a URL through the active worker
  Fetch {
    url: String,

    /// HTTP method
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,

    /// Extra request header, e.g. -H 'Accept-Language: en-US'
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,

    /// Write the body here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
  },

  /// Look up a URL in the caches without touching the network
  Match {
    url: String,

    /// Only search this cache
    #[arg(long)]
    cache: Option<String>,
  },

  /// List caches and their entry counts
  Stores,
}

pub async fn run<S, F>(command: Command, caches: Caches<S>, network: Arc<F>) -> Result<()>
where
  S: CacheStorage + 'static,
  F: Fetcher + 'static,
{
  match command {
    Command::Deploy => deploy(caches, network).await,
    Command::Fetch {
      url,
      method,
      headers,
      output,
    } => {
      let request = build_request(&url, &method, &headers)?;
      fetch(caches, network, request, output).await
    }
    Command::Match { url, cache } => match_url(&caches, &url, cache.as_deref()),
    Command::Stores => stores(&caches),
  }
}

async fn deploy<S, F>(caches: Caches<S>, network: Arc<F>) -> Result<()>
where
  S: CacheStorage + 'static,
  F: Fetcher + 'static,
{
  let before = caches.keys()?;
  let interceptor = Arc::new(Interceptor::new(caches.clone(), Arc::clone(&network)));
  let host = HostHandle::spawn(interceptor, network);

  let mut state = host.register().await?;
  if state == WorkerState::Installed {
    // Nothing else is controlled by this process, so a waiting worker can
    // take over right away
    host.activate().await?;
    state = host.state();
  }

  let deleted = before.len().saturating_sub(caches.keys()?.len());
  info!(?state, deleted, "deployed");
  eprintln!("worker {:?}; deleted {} cache(s)", state, deleted);

  Ok(())
}

async fn fetch<S, F>(
  caches: Caches<S>,
  network: Arc<F>,
  request: Request,
  output: Option<PathBuf>,
) -> Result<()>
where
  S: CacheStorage + 'static,
  F: Fetcher + 'static,
{
  let interceptor = Arc::new(Interceptor::new(caches, Arc::clone(&network)));
  let host = HostHandle::resume(Arc::clone(&interceptor), network);

  let result = host.fetch(request).await;
  // The process is about to exit; give write-through a chance to land
  interceptor.settle().await;

  let served = result?;
  eprintln!("{}", describe(&served));
  write_body(&served.data, output)
}

fn match_url<S: CacheStorage>(caches: &Caches<S>, url: &str, cache: Option<&str>) -> Result<()> {
  let request = Request::get(url)?;
  let hit = match cache {
    Some(name) => {
      if !caches.has(name)? {
        return Err(eyre!("No cache named '{}'", name));
      }
      caches.open(name)?.match_request(&request)?
    }
    None => caches.match_any(&request)?,
  };
  let hit = hit.ok_or_else(|| eyre!("Not cached: {}", url))?;

  eprintln!(
    "{}",
    describe(&CacheResult::offline(hit.response.clone(), hit.cached_at))
  );
  write_body(&hit.response, None)
}

fn stores<S: CacheStorage>(caches: &Caches<S>) -> Result<()> {
  let names = caches.keys()?;
  if names.is_empty() {
    eprintln!("no caches");
  }

  for name in names {
    let cache = caches.open(&name)?;
    let marker = if cache.name() == CACHE_NAME { " (current)" } else { "" };
    println!("{}\t{}{}", cache.name(), cache.entry_count()?, marker);
  }

  Ok(())
}

fn build_request(url: &str, method: &str, headers: &[String]) -> Result<Request> {
  let method = Method::from_bytes(method.to_uppercase().as_bytes())
    .map_err(|e| eyre!("Invalid method '{}': {}", method, e))?;

  let mut request = Request::new(method, url)?;
  for header in headers {
    let (name, value) = parse_header(header)?;
    request = request.with_header(name, value);
  }

  Ok(request)
}

/// Split `Name: value`.
fn parse_header(header: &str) -> Result<(&str, &str)> {
  let (name, value) = header
    .split_once(':')
    .ok_or_else(|| eyre!("Invalid header '{}': expected 'Name: value'", header))?;

  let name = name.trim();
  if name.is_empty() {
    return Err(eyre!("Invalid header '{}': empty name", header));
  }

  Ok((name, value.trim()))
}

fn describe(served: &CacheResult<Response>) -> String {
  let response = &served.data;
  match served.cached_at {
    Some(at) => format!(
      "{} {} (from {}, cached {})",
      response.status,
      response.status_text,
      served.source,
      at.format("%Y-%m-%d %H:%M:%S UTC")
    ),
    None => format!(
      "{} {} (from {})",
      response.status, response.status_text, served.source
    ),
  }
}

fn write_body(response: &Response, output: Option<PathBuf>) -> Result<()> {
  match output {
    Some(path) => std::fs::write(&path, &response.body)
      .map_err(|e| eyre!("Failed to write {}: {}", path.display(), e)),
    None => {
      let mut stdout = std::io::stdout().lock();
      stdout
        .write_all(&response.body)
        .and_then(|_| stdout.flush())
        .map_err(|e| eyre!("Failed to write response body: {}", e))
    }
  }
}
