use color_eyre::{eyre::eyre, Result};
use reqwest::{Method, StatusCode};
use url::Url;

/// An outgoing request as seen by the interceptor.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub headers: Vec<(String, String)>,
}

impl Request {
  pub fn new(method: Method, url: &str) -> Result<Self> {
    let url = Url::parse(url).map_err(|e| eyre!("Invalid request URL '{}': {}", url, e))?;
    Ok(Self {
      method,
      url,
      headers: Vec::new(),
    })
  }

  pub fn get(url: &str) -> Result<Self> {
    Self::new(Method::GET, url)
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_string(), value.to_string()));
    self
  }

  /// Value of the first header called `name` (case-insensitive).
  pub fn header(&self, name: &str) -> Option<&str> {
    find_header(&self.headers, name)
  }
}

/// A fully buffered response.
///
/// The body is read off the wire once; `clone()` is how a copy is made for the
/// store while the original goes back to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub status_text: String,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
  /// Final URL after redirects, when known
  pub url: Option<String>,
}

impl Response {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    let status_text = StatusCode::from_u16(status)
      .ok()
      .and_then(|s| s.canonical_reason())
      .unwrap_or_default()
      .to_string();

    Self {
      status,
      status_text,
      headers: Vec::new(),
      body: body.into(),
      url: None,
    }
  }

  #[cfg(test)]
  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_string(), value.to_string()));
    self
  }

  #[cfg(test)]
  pub fn header(&self, name: &str) -> Option<&str> {
    find_header(&self.headers, name)
  }

  /// Lowercased header names listed in `Vary`.
  pub fn vary(&self) -> Vec<String> {
    self
      .headers
      .iter()
      .filter(|(k, _)| k.eq_ignore_ascii_case("vary"))
      .flat_map(|(_, v)| v.split(','))
      .map(|name| name.trim().to_lowercase())
      .filter(|name| !name.is_empty())
      .collect()
  }

  #[cfg(test)]
  pub fn body_text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
  headers
    .iter()
    .find(|(k, _)| k.eq_ignore_ascii_case(name))
    .map(|(_, v)| v.as_str())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_header_lookup_is_case_insensitive() {
    let response = Response::new(200, "{}").with_header("Content-Type", "application/json");
    assert_eq!(response.header("content-type"), Some("application/json"));
    assert_eq!(response.header("etag"), None);
  }

  #[test]
  fn test_status_text_from_status() {
    assert_eq!(Response::new(404, "").status_text, "Not Found");
    assert_eq!(Response::new(599, "").status_text, "");
  }

  #[test]
  fn test_vary_splits_and_lowercases() {
    let response = Response::new(200, "")
      .with_header("Vary", "Accept-Language, Accept-Encoding")
      .with_header("vary", "Origin");
    assert_eq!(
      response.vary(),
      vec!["accept-language", "accept-encoding", "origin"]
    );
  }

  #[test]
  fn test_invalid_url_is_rejected() {
    assert!(Request::get("not a url").is_err());
    assert!(Request::get("https://api.themoviedb.org/3/movie/1").is_ok());
  }
}
