//! Cache layer that orchestrates caching strategies with network fetching.

use color_eyre::Result;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use super::storage::CacheStorage;
use super::types::{CacheResult, RequestKey};
use crate::net::{FetchError, Response};

/// Cache layer that applies a strategy to a single request identity.
///
/// Runtime-populated entries go into the dynamic namespace; lookups may hit
/// any namespace.
#[derive(Clone)]
pub struct CacheLayer {
  storage: Arc<dyn CacheStorage>,
  dynamic: String,
}

impl CacheLayer {
  pub fn new(storage: Arc<dyn CacheStorage>, dynamic: impl Into<String>) -> Self {
    Self {
      storage,
      dynamic: dynamic.into(),
    }
  }

  /// Cache-first.
  ///
  /// 1. Look the identity up in every namespace; a hit returns without the network
  /// 2. On a miss, fetch
  /// 3. Store a copy only for 200 same-origin responses
  ///
  /// Network failure on a miss is returned as the error.
  pub async fn cache_first<F, Fut>(
    &self,
    key: &RequestKey,
    fetcher: F,
  ) -> Result<CacheResult<Response>>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Response, FetchError>>,
  {
    match self.storage.match_any(key) {
      Ok(Some(cached)) => {
        debug!(url = key.url(), "Cache hit");
        return Ok(CacheResult::from_cache(cached.response, cached.cached_at));
      }
      Ok(None) => {}
      Err(e) => warn!(url = key.url(), error = %e, "Cache lookup failed, treating as miss"),
    }

    let response = fetcher().await?;
    if response.is_cacheable_asset() {
      self.store(key, &response);
    } else {
      debug!(
        url = key.url(),
        status = response.status,
        response_type = response.response_type.as_str(),
        "Response not cacheable"
      );
    }

    Ok(CacheResult::from_network(response))
  }

  /// Network-first.
  ///
  /// 1. Fetch; a received response always wins and successful ones are stored
  /// 2. On network failure, serve the dynamic namespace copy
  /// 3. Without a copy, the network failure is returned
  pub async fn network_first<F, Fut>(
    &self,
    key: &RequestKey,
    fetcher: F,
  ) -> Result<CacheResult<Response>>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Response, FetchError>>,
  {
    match fetcher().await {
      Ok(response) => {
        if response.is_ok() {
          self.store(key, &response);
        }
        Ok(CacheResult::from_network(response))
      }
      Err(err) => match self.storage.get(&self.dynamic, key) {
        Ok(Some(cached)) => {
          debug!(url = key.url(), error = %err, "Network failed, serving cached copy");
          Ok(CacheResult::offline(cached.response, cached.cached_at))
        }
        Ok(None) => Err(err.into()),
        Err(e) => {
          warn!(url = key.url(), error = %e, "Cache fallback lookup failed");
          Err(err.into())
        }
      },
    }
  }

  /// Write into the dynamic namespace. The response is returned to the
  /// caller regardless, so failures are only logged.
  fn store(&self, key: &RequestKey, response: &Response) {
    if let Err(e) = self.storage.put(&self.dynamic, key, response) {
      warn!(url = key.url(), namespace = %self.dynamic, error = %e, "Failed to store response");
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheSource, MemoryStorage};
  use crate::net::ResponseType;
  use url::Url;

  fn key(path: &str) -> RequestKey {
    RequestKey::get(&Url::parse("http://localhost:1420").unwrap().join(path).unwrap())
  }

  fn layer() -> (Arc<MemoryStorage>, CacheLayer) {
    let storage = Arc::new(MemoryStorage::new());
    let layer = CacheLayer::new(storage.clone(), "dynamic");
    (storage, layer)
  }

  #[tokio::test]
  async fn test_cache_first_miss_stores_200() {
    let (storage, layer) = layer();

    let result = layer
      .cache_first(&key("/logo.svg"), || async { Ok(Response::new(200, "<svg/>")) })
      .await
      .unwrap();

    assert_eq!(result.source, CacheSource::Network);
    assert!(storage.get("dynamic", &key("/logo.svg")).unwrap().is_some());
  }

  #[tokio::test]
  async fn test_cache_first_skips_cross_origin() {
    let (storage, layer) = layer();

    let result = layer
      .cache_first(&key("/font.woff2"), || async {
        Ok(Response::new(200, "font").with_type(ResponseType::Opaque))
      })
      .await
      .unwrap();

    assert_eq!(result.data.status, 200);
    assert!(storage.keys("dynamic").unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_cache_first_miss_propagates_network_error() {
    let (_storage, layer) = layer();

    let err = layer
      .cache_first(&key("/missing.js"), || async {
        Err(FetchError::Network("offline".to_string()))
      })
      .await
      .unwrap_err();

    assert_eq!(
      err.downcast_ref::<FetchError>(),
      Some(&FetchError::Network("offline".to_string()))
    );
  }

  #[tokio::test]
  async fn test_network_first_does_not_store_server_errors() {
    let (storage, layer) = layer();
    storage
      .put("dynamic", &key("/api/documents"), &Response::new(200, "good"))
      .unwrap();

    let result = layer
      .network_first(&key("/api/documents"), || async { Ok(Response::new(500, "boom")) })
      .await
      .unwrap();

    assert_eq!(result.data.status, 500);
    assert_eq!(result.source, CacheSource::Network);
    let cached = storage.get("dynamic", &key("/api/documents")).unwrap().unwrap();
    assert_eq!(cached.response.body, b"good");
  }

  #[tokio::test]
  async fn test_network_first_ignores_other_namespaces_on_fallback() {
    let (storage, layer) = layer();
    storage
      .put("static", &key("/api/stats"), &Response::new(200, "static copy"))
      .unwrap();

    let result = layer
      .network_first(&key("/api/stats"), || async { Err(FetchError::Timeout) })
      .await;

    assert!(result.is_err());
  }
}
