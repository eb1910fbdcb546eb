//! Network-first request interception with write-through to the named store.

use color_eyre::{eyre::eyre, Result};
use futures::future::BoxFuture;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::cache::{CacheResult, CacheStorage, Caches};
use crate::net::{Fetcher, Request, Response};

use super::{InstallEvent, WorkerHandler, CACHE_NAME};

/// Stateless handler for the install, activate and fetch events.
///
/// The only things it holds are handles to the stores and the network, plus
/// the set of detached write-through tasks so a host about to exit can settle
/// them.
pub struct Interceptor<S: CacheStorage, F: Fetcher> {
  caches: Caches<S>,
  network: Arc<F>,
  writes: Mutex<JoinSet<()>>,
}

impl<S, F> Interceptor<S, F>
where
  S: CacheStorage + 'static,
  F: Fetcher + 'static,
{
  pub fn new(caches: Caches<S>, network: Arc<F>) -> Self {
    Self {
      caches,
      network,
      writes: Mutex::new(JoinSet::new()),
    }
  }

  /// Run a store operation on the blocking pool so other requests keep
  /// being serviced while SQLite works.
  async fn with_caches<T, Op>(&self, op: Op) -> Result<T>
  where
    T: Send + 'static,
    Op: FnOnce(Caches<S>) -> Result<T> + Send + 'static,
  {
    let caches = self.caches.clone();
    tokio::task::spawn_blocking(move || op(caches))
      .await
      .map_err(|e| eyre!("Cache task failed: {}", e))?
  }

  /// Delete every store this origin owns, the current one included.
  /// Returns how many were deleted.
  async fn sweep(&self) -> Result<usize> {
    let deleted = self
      .with_caches(|caches| {
        let names = caches.keys()?;
        for name in &names {
          caches.delete(name)?;
          info!(cache = %name, "deleted cache");
        }
        Ok(names.len())
      })
      .await?;

    info!(deleted, "activation sweep complete");
    Ok(deleted)
  }

  /// Try the network once; on rejection, serve whatever the stores hold.
  async fn network_first(&self, request: Request) -> Result<Option<CacheResult<Response>>> {
    match self.network.fetch(&request).await {
      Ok(response) => {
        debug!(url = %request.url, status = response.status, "served from network");
        self.write_through(request, response.clone());
        Ok(Some(CacheResult::from_network(response)))
      }
      Err(err) => {
        debug!(url = %request.url, error = %err, "network fetch failed, trying cache");

        let lookup = request.clone();
        let cached = self
          .with_caches(move |caches| caches.match_any(&lookup))
          .await?;
        match &cached {
          Some(hit) => info!(url = %request.url, cached_at = %hit.cached_at, "served from cache"),
          None => warn!(url = %request.url, "offline and not cached"),
        }

        Ok(cached.map(|hit| CacheResult::offline(hit.response, hit.cached_at)))
      }
    }
  }

  /// Store a copy of `response` without holding up the caller.
  fn write_through(&self, request: Request, response: Response) {
    let caches = self.caches.clone();
    let mut writes = self.writes.lock().unwrap_or_else(PoisonError::into_inner);

    // Reap finished writes so the set does not grow with every request
    while writes.try_join_next().is_some() {}

    writes.spawn_blocking(move || {
      let stored = caches
        .open(CACHE_NAME)
        .and_then(|cache| cache.put(&request, &response));

      match stored {
        Ok(()) => debug!(url = %request.url, cache = CACHE_NAME, "cached response"),
        Err(err) => warn!(url = %request.url, error = %err, "write-through failed"),
      }
    });
  }

  /// Wait for every write-through spawned so far.
  pub async fn settle(&self) {
    let mut writes = {
      let mut guard = self.writes.lock().unwrap_or_else(PoisonError::into_inner);
      std::mem::take(&mut *guard)
    };

    while let Some(joined) = writes.join_next().await {
      if let Err(err) = joined {
        warn!(error = %err, "write-through task did not finish");
      }
    }
  }
}

impl<S, F> WorkerHandler for Interceptor<S, F>
where
  S: CacheStorage + 'static,
  F: Fetcher + 'static,
{
  fn on_install(&self, event: &mut InstallEvent) {
    event.skip_waiting();
  }

  fn on_activate(&self) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
      self.sweep().await?;
      Ok(())
    })
  }

  fn on_fetch(&self, request: Request) -> BoxFuture<'_, Result<Option<CacheResult<Response>>>> {
    Box::pin(self.network_first(request))
  }
}
