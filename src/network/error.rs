use std::time::Duration;
use thiserror::Error;

/// Failures on the request path.
///
/// A cache miss is not an error; lookups return `None` instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
  #[error("Network unavailable: {0}")]
  NetworkUnavailable(String),

  #[error("Network did not respond within {0:?}")]
  NetworkTimeout(Duration),

  #[error("Invalid request: {0}")]
  InvalidRequest(String),
}

impl FetchError {
  /// Failures caused by lost connectivity, as opposed to a malformed request.
  pub fn is_connectivity(&self) -> bool {
    matches!(self, Self::NetworkUnavailable(_) | Self::NetworkTimeout(_))
  }
}

impl From<reqwest::Error> for FetchError {
  fn from(err: reqwest::Error) -> Self {
    if err.is_builder() {
      FetchError::InvalidRequest(err.to_string())
    } else {
      FetchError::NetworkUnavailable(err.to_string())
    }
  }
}
