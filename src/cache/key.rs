//! Request identity used to address store entries.

use sha2::{Digest, Sha256};

use crate::net::Request;

/// Method plus URL, fragment removed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestKey {
  pub method: String,
  pub url: String,
}

impl RequestKey {
  pub fn of(request: &Request) -> Self {
    let mut url = request.url.clone();
    url.set_fragment(None);

    Self {
      method: request.method.as_str().to_string(),
      url: url.into(),
    }
  }

  /// SHA256 of `method url`, for stable, fixed-length keys.
  pub fn cache_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.as_bytes());
    hex::encode(hasher.finalize())
  }

  pub fn description(&self) -> String {
    format!("{} {}", self.method, self.url)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use reqwest::Method;

  #[test]
  fn test_fragment_is_ignored() {
    let a = RequestKey::of(&Request::get("https://tmdb.test/movie/1#cast").unwrap());
    let b = RequestKey::of(&Request::get("https://tmdb.test/movie/1").unwrap());
    assert_eq!(a, b);
    assert_eq!(a.cache_hash(), b.cache_hash());
  }

  #[test]
  fn test_method_and_query_are_part_of_identity() {
    let get = RequestKey::of(&Request::get("https://tmdb.test/movie/1").unwrap());
    let head = RequestKey::of(&Request::new(Method::HEAD, "https://tmdb.test/movie/1").unwrap());
    let query = RequestKey::of(&Request::get("https://tmdb.test/movie/1?lang=en").unwrap());

    assert_ne!(get.cache_hash(), head.cache_hash());
    assert_ne!(get.cache_hash(), query.cache_hash());
    assert_eq!(get.description(), "GET https://tmdb.test/movie/1");
  }
}
