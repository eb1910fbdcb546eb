//! Request/response values and the network fetch primitive.

mod client;
#[cfg(test)]
pub mod mock;
mod types;

use color_eyre::Result;
use futures::future::BoxFuture;

pub use client::HttpClient;
pub use types::{Request, Response};

/// A fetch primitive.
///
/// `Ok` means the network produced a response, whatever its status. `Err`
/// means the fetch was rejected (offline, DNS failure, connection refused).
pub trait Fetcher: Send + Sync {
  fn fetch<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<Response>>;
}
