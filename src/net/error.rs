use thiserror::Error;

/// Failure to obtain any response from the network.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
  /// Offline, DNS failure, connection refused or reset
  #[error("Network error: {0}")]
  Network(String),

  #[error("Request timed out")]
  Timeout,

  #[error("Invalid request: {0}")]
  InvalidRequest(String),
}

impl From<reqwest::Error> for FetchError {
  fn from(err: reqwest::Error) -> Self {
    if err.is_timeout() {
      FetchError::Timeout
    } else if err.is_builder() {
      FetchError::InvalidRequest(err.to_string())
    } else {
      FetchError::Network(err.to_string())
    }
  }
}
