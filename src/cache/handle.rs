//! Handles over a storage backend: `Caches` for the whole origin, `Cache` for
//! one named store.

use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use std::sync::Arc;

use crate::net::{Request, Response};

use super::storage::{CacheStorage, CachedResponse};

/// All named stores of one origin.
pub struct Caches<S: CacheStorage> {
  storage: Arc<S>,
}

impl<S: CacheStorage> Caches<S> {
  pub fn new(storage: S) -> Self {
    Self {
      storage: Arc::new(storage),
    }
  }

  /// Open the named store, creating it on first use.
  pub fn open(&self, name: &str) -> Result<Cache<S>> {
    self.storage.open(name)?;
    Ok(Cache {
      storage: Arc::clone(&self.storage),
      name: name.to_string(),
    })
  }

  /// Store names, in creation order.
  pub fn keys(&self) -> Result<Vec<String>> {
    self.storage.names()
  }

  pub fn has(&self, name: &str) -> Result<bool> {
    self.storage.has(name)
  }

  pub fn delete(&self, name: &str) -> Result<bool> {
    self.storage.delete(name)
  }

  /// Look `request` up in every store, oldest first.
  pub fn match_any(&self, request: &Request) -> Result<Option<CachedResponse>> {
    if request.method != Method::GET {
      return Ok(None);
    }
    self.storage.lookup_any(request)
  }
}

impl<S: CacheStorage> Clone for Caches<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
    }
  }
}

/// One named store.
pub struct Cache<S: CacheStorage> {
  storage: Arc<S>,
  name: String,
}

impl<S: CacheStorage> Cache<S> {
  pub fn name(&self) -> &str {
    &self.name
  }

  /// Write `response` under the identity of `request`.
  ///
  /// Only GET requests over http(s) are storable. Partial responses and
  /// `Vary: *` are refused.
  pub fn put(&self, request: &Request, response: &Response) -> Result<()> {
    check_storable(request, response)?;
    self.storage.put(&self.name, request, response)
  }

  pub fn match_request(&self, request: &Request) -> Result<Option<CachedResponse>> {
    if request.method != Method::GET {
      return Ok(None);
    }
    self.storage.lookup(&self.name, request)
  }

  pub fn entry_count(&self) -> Result<usize> {
    self.storage.entry_count(&self.name)
  }
}

fn check_storable(request: &Request, response: &Response) -> Result<()> {
  if request.method != Method::GET {
    return Err(eyre!(
      "Refusing to cache {} {}: only GET requests can be stored",
      request.method,
      request.url
    ));
  }

  if !matches!(request.url.scheme(), "http" | "https") {
    return Err(eyre!(
      "Refusing to cache {}: unsupported scheme '{}'",
      request.url,
      request.url.scheme()
    ));
  }

  if response.status == 206 {
    return Err(eyre!(
      "Refusing to cache {}: partial content",
      request.url
    ));
  }

  if response.vary().iter().any(|name| name == "*") {
    return Err(eyre!("Refusing to cache {}: Vary: *", request.url));
  }

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteStorage;

  fn caches() -> Caches<SqliteStorage> {
    Caches::new(SqliteStorage::open_in_memory().unwrap())
  }

  #[test]
  fn test_open_creates_store() {
    let caches = caches();
    assert!(!caches.has("tmdb-cache-v1").unwrap());

    let cache = caches.open("tmdb-cache-v1").unwrap();
    assert_eq!(cache.name(), "tmdb-cache-v1");
    assert!(caches.has("tmdb-cache-v1").unwrap());
    assert_eq!(cache.entry_count().unwrap(), 0);
  }

  #[test]
  fn test_put_and_match() {
    let caches = caches();
    let cache = caches.open("tmdb-cache-v1").unwrap();
    let request = Request::get("https://tmdb.test/movie/1").unwrap();
    cache.put(&request, &Response::new(200, "{\"id\":1}")).unwrap();

    let hit = cache.match_request(&request).unwrap().unwrap();
    assert_eq!(hit.response.body_text(), "{\"id\":1}");
    assert!(caches.match_any(&request).unwrap().is_some());
  }

  #[test]
  fn test_non_get_is_refused_and_never_matches() {
    let caches = caches();
    let cache = caches.open("c").unwrap();
    let post = Request::new(Method::POST, "https://tmdb.test/rating").unwrap();

    assert!(cache.put(&post, &Response::new(201, "")).is_err());
    assert!(cache.match_request(&post).unwrap().is_none());
    assert!(caches.match_any(&post).unwrap().is_none());
    assert_eq!(cache.entry_count().unwrap(), 0);
  }

  #[test]
  fn test_unstorable_responses_are_refused() {
    let cache = caches().open("c").unwrap();
    let request = Request::get("https://tmdb.test/poster.jpg").unwrap();

    assert!(cache.put(&request, &Response::new(206, "part")).is_err());
    assert!(cache
      .put(&request, &Response::new(200, "").with_header("Vary", "*"))
      .is_err());

    let file = Request::get("file:///tmp/poster.jpg").unwrap();
    assert!(cache.put(&file, &Response::new(200, "")).is_err());
  }

  #[test]
  fn test_error_statuses_are_storable() {
    let cache = caches().open("c").unwrap();
    let request = Request::get("https://tmdb.test/movie/404").unwrap();
    cache.put(&request, &Response::new(404, "missing")).unwrap();

    let hit = cache.match_request(&request).unwrap().unwrap();
    assert_eq!(hit.response.status, 404);
  }
}
