//! The request interceptor and the host that dispatches lifecycle and fetch
//! events to it.

mod host;
mod interceptor;

use color_eyre::Result;
use futures::future::BoxFuture;

use crate::cache::CacheResult;
use crate::net::{Request, Response};

pub use host::{HostHandle, WorkerState};
pub use interceptor::Interceptor;

/// Name of the store successful responses are written to.
///
/// Changing it is the only versioning mechanism: the next activation sweeps
/// the old store away.
pub const CACHE_NAME: &str = "tmdb-cache-v1";

/// Passed to the install handler.
#[derive(Debug, Default)]
pub struct InstallEvent {
  skip_waiting: bool,
}

impl InstallEvent {
  /// Ask the host to activate right away instead of waiting for existing
  /// clients to go away.
  pub fn skip_waiting(&mut self) {
    self.skip_waiting = true;
  }

  pub fn skips_waiting(&self) -> bool {
    self.skip_waiting
  }
}

/// Entry points the host invokes. One handler object lives for the whole
/// worker lifetime.
pub trait WorkerHandler: Send + Sync + 'static {
  fn on_install(&self, event: &mut InstallEvent);

  /// Activation stays pending until the returned future resolves.
  fn on_activate(&self) -> BoxFuture<'_, Result<()>>;

  /// `Ok(None)` means nothing could be produced; the host reports a failed load.
  fn on_fetch(&self, request: Request) -> BoxFuture<'_, Result<Option<CacheResult<Response>>>>;
}
