//! Scripted collaborators for worker tests.

use color_eyre::Result;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{OfflineWorker, WorkerContext, WorkerSettings};
use crate::cache::{CacheStorage, CachedResponse, MemoryStorage, RequestKey};
use crate::config::Config;
use crate::net::{FetchError, Fetcher, Request, Response};
use crate::notify::{Notification, Notifier};
use crate::queue::MemoryQueue;

pub const ORIGIN: &str = "http://localhost:1420";

pub fn url(path: &str) -> url::Url {
  url::Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

/// Fetcher answering from a per-URL script; unknown URLs get a 404.
#[derive(Default)]
pub struct ScriptedFetcher {
  routes: Mutex<HashMap<String, Result<Response, FetchError>>>,
  delays: Mutex<HashMap<String, Duration>>,
  requests: Mutex<Vec<Request>>,
  completed: Mutex<Vec<String>>,
  offline: bool,
}

impl ScriptedFetcher {
  pub fn new() -> Self {
    Self::default()
  }

  /// Every call rejects with a network error.
  pub fn offline() -> Self {
    Self {
      offline: true,
      ..Self::default()
    }
  }

  pub fn respond(self, path: &str, response: Response) -> Self {
    self
      .routes
      .lock()
      .unwrap()
      .insert(url(path).to_string(), Ok(response));
    self
  }

  pub fn fail(self, path: &str, error: FetchError) -> Self {
    self
      .routes
      .lock()
      .unwrap()
      .insert(url(path).to_string(), Err(error));
    self
  }

  /// Hold the answer to `method` on this path before returning it.
  pub fn delay(self, method: &str, path: &str, delay: Duration) -> Self {
    self
      .delays
      .lock()
      .unwrap()
      .insert(format!("{} {}", method, url(path)), delay);
    self
  }

  /// "METHOD url" for every call made so far
  pub fn calls(&self) -> Vec<String> {
    self
      .requests
      .lock()
      .unwrap()
      .iter()
      .map(|r| format!("{} {}", r.method, r.url))
      .collect()
  }

  /// "METHOD url" in the order the answers were produced
  pub fn completed(&self) -> Vec<String> {
    self.completed.lock().unwrap().clone()
  }

  pub fn requests(&self) -> Vec<Request> {
    self.requests.lock().unwrap().clone()
  }
}

impl Fetcher for ScriptedFetcher {
  fn fetch<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<Response, FetchError>> {
    Box::pin(async move {
      self.requests.lock().unwrap().push(request.clone());

      if self.offline {
        return Err(FetchError::Network("offline".to_string()));
      }

      let call = format!("{} {}", request.method, request.url);
      let delay = self.delays.lock().unwrap().get(&call).copied();
      if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
      }

      self.completed.lock().unwrap().push(call);
      self
        .routes
        .lock()
        .unwrap()
        .get(request.url.as_str())
        .cloned()
        .unwrap_or_else(|| Ok(Response::new(404, "not found")))
    })
  }
}

/// Memory storage that counts lookups and writes.
#[derive(Default)]
pub struct SpyStorage {
  inner: MemoryStorage,
  pub lookups: AtomicUsize,
  pub writes: AtomicUsize,
}

impl SpyStorage {
  pub fn lookups(&self) -> usize {
    self.lookups.load(Ordering::SeqCst)
  }

  pub fn writes(&self) -> usize {
    self.writes.load(Ordering::SeqCst)
  }
}

impl CacheStorage for SpyStorage {
  fn namespaces(&self) -> Result<Vec<String>> {
    self.inner.namespaces()
  }

  fn delete(&self, namespace: &str) -> Result<bool> {
    self.writes.fetch_add(1, Ordering::SeqCst);
    self.inner.delete(namespace)
  }

  fn put(&self, namespace: &str, key: &RequestKey, response: &Response) -> Result<()> {
    self.writes.fetch_add(1, Ordering::SeqCst);
    self.inner.put(namespace, key, response)
  }

  fn put_all(&self, namespace: &str, entries: &[(RequestKey, Response)]) -> Result<()> {
    self.writes.fetch_add(1, Ordering::SeqCst);
    self.inner.put_all(namespace, entries)
  }

  fn get(&self, namespace: &str, key: &RequestKey) -> Result<Option<CachedResponse>> {
    self.lookups.fetch_add(1, Ordering::SeqCst);
    self.inner.get(namespace, key)
  }

  fn match_any(&self, key: &RequestKey) -> Result<Option<CachedResponse>> {
    self.lookups.fetch_add(1, Ordering::SeqCst);
    self.inner.match_any(key)
  }

  fn keys(&self, namespace: &str) -> Result<Vec<RequestKey>> {
    self.inner.keys(namespace)
  }
}

/// Notifier that keeps everything it was asked to show.
#[derive(Default)]
pub struct RecordingNotifier {
  pub shown: Mutex<Vec<Notification>>,
}

impl Notifier for RecordingNotifier {
  fn show(&self, notification: &Notification) -> Result<()> {
    self.shown.lock().unwrap().push(notification.clone());
    Ok(())
  }
}

/// A worker wired to in-memory collaborators, with handles to each.
pub struct Harness {
  pub worker: OfflineWorker,
  pub storage: Arc<SpyStorage>,
  pub fetcher: Arc<ScriptedFetcher>,
  pub queue: Arc<MemoryQueue>,
  pub notifier: Arc<RecordingNotifier>,
}

impl Harness {
  pub fn new(fetcher: ScriptedFetcher) -> Self {
    Self::with_storage(fetcher, Arc::new(SpyStorage::default()))
  }

  /// Share a storage between harnesses to model successive worker versions.
  pub fn with_storage(fetcher: ScriptedFetcher, storage: Arc<SpyStorage>) -> Self {
    Self::with_config(fetcher, storage, test_config())
  }

  pub fn with_config(fetcher: ScriptedFetcher, storage: Arc<SpyStorage>, config: Config) -> Self {
    let fetcher = Arc::new(fetcher);
    let queue = Arc::new(MemoryQueue::new());
    let notifier = Arc::new(RecordingNotifier::default());

    let ctx = WorkerContext {
      caches: storage.clone(),
      fetcher: fetcher.clone(),
      queue: queue.clone(),
      notifier: notifier.clone(),
    };
    let worker = OfflineWorker::new(ctx, WorkerSettings::from_config(&config));

    Self {
      worker,
      storage,
      fetcher,
      queue,
      notifier,
    }
  }
}

pub fn test_config() -> Config {
  Config {
    origin: url::Url::parse(ORIGIN).unwrap(),
    ..Config::default()
  }
}

/// Fetcher that serves every default static asset.
pub fn static_site() -> ScriptedFetcher {
  Config::default()
    .cache
    .static_assets
    .iter()
    .fold(ScriptedFetcher::new(), |fetcher, path| {
      fetcher.respond(path, Response::new(200, format!("asset {}", path)))
    })
}
