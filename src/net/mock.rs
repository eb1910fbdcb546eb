//! Scripted in-process network for tests.

use color_eyre::{eyre::eyre, Result};
use futures::future::BoxFuture;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use super::{Fetcher, Request, Response};

/// Answers from a route table keyed by URL; unknown URLs get a 404.
pub struct ScriptedNetwork {
  online: AtomicBool,
  routes: Mutex<HashMap<String, Response>>,
  unreachable: Mutex<HashSet<String>>,
  calls: AtomicUsize,
}

impl ScriptedNetwork {
  pub fn new() -> Self {
    Self {
      online: AtomicBool::new(true),
      routes: Mutex::new(HashMap::new()),
      unreachable: Mutex::new(HashSet::new()),
      calls: AtomicUsize::new(0),
    }
  }

  pub fn route(&self, url: &str, response: Response) {
    self
      .routes
      .lock()
      .unwrap()
      .insert(url.to_string(), response);
  }

  /// Reject every request for `url`, even while online.
  pub fn unreachable(&self, url: &str) {
    self.unreachable.lock().unwrap().insert(url.to_string());
  }

  pub fn set_online(&self, online: bool) {
    self.online.store(online, Ordering::SeqCst);
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

impl Fetcher for ScriptedNetwork {
  fn fetch<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<Response>> {
    Box::pin(async move {
      self.calls.fetch_add(1, Ordering::SeqCst);
      let blocked = self.unreachable.lock().unwrap().contains(request.url.as_str());
      if blocked || !self.online.load(Ordering::SeqCst) {
        return Err(eyre!("Failed to fetch {}: network unreachable", request.url));
      }

      let routes = self.routes.lock().unwrap();
      Ok(
        routes
          .get(request.url.as_str())
          .cloned()
          .unwrap_or_else(|| Response::new(404, "")),
      )
    })
  }
}
