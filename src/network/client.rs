use color_eyre::{eyre::eyre, Result};
use std::future::Future;
use std::time::Duration;

use super::error::FetchError;
use super::types::{Request, Response};

/// Sends requests to the network.
///
/// Every non-2xx status is still a `Response`; only transport-level failures
/// become a `FetchError`.
pub trait Transport: Send + Sync + 'static {
  fn send(&self, request: &Request) -> impl Future<Output = Result<Response, FetchError>> + Send;
}

/// HTTP transport backed by reqwest.
#[derive(Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
  timeout: Duration,
}

impl HttpTransport {
  pub fn new(timeout: Duration) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client, timeout })
  }
}

impl Transport for HttpTransport {
  async fn send(&self, request: &Request) -> Result<Response, FetchError> {
    let method = reqwest::Method::from_bytes(request.method.as_bytes())
      .map_err(|e| FetchError::InvalidRequest(format!("{}: {}", request.method, e)))?;

    let mut builder = self.client.request(method, request.url.clone());
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let response = builder.send().await.map_err(|e| {
      if e.is_timeout() {
        FetchError::NetworkTimeout(self.timeout)
      } else {
        FetchError::from(e)
      }
    })?;

    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();

    // A body cut off mid-stream is treated like any other dropped connection
    let body = response.bytes().await.map_err(FetchError::from)?;

    Ok(Response {
      status,
      headers,
      body: body.to_vec(),
    })
  }
}
