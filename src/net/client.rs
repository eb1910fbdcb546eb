use color_eyre::{eyre::eyre, Result};
use futures::future::BoxFuture;
use tracing::debug;

use crate::config::Config;

use super::types::{Request, Response};
use super::Fetcher;

/// The real network, backed by reqwest.
///
/// No timeout and no retry: a request either resolves to a response (any
/// status) or is rejected.
#[derive(Clone)]
pub struct HttpClient {
  client: reqwest::Client,
}

impl HttpClient {
  pub fn new(config: &Config) -> Result<Self> {
    let mut builder = reqwest::Client::builder();
    if let Some(agent) = &config.user_agent {
      builder = builder.user_agent(agent.clone());
    }

    let client = builder
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }

  async fn send(&self, request: &Request) -> Result<Response> {
    let mut builder = self
      .client
      .request(request.method.clone(), request.url.clone());
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }

    let response = builder
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch {}: {}", request.url, e))?;

    let status = response.status();
    let final_url = response.url().to_string();
    let headers: Vec<(String, String)> = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();

    // A body that dies mid-stream is a rejected fetch, same as a refused connection
    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read response body from {}: {}", request.url, e))?;

    debug!(url = %request.url, status = status.as_u16(), bytes = body.len(), "network response");

    Ok(Response {
      status: status.as_u16(),
      status_text: status.canonical_reason().unwrap_or_default().to_string(),
      headers,
      body: body.to_vec(),
      url: Some(final_url),
    })
  }
}

impl Fetcher for HttpClient {
  fn fetch<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<Response>> {
    Box::pin(self.send(request))
  }
}
