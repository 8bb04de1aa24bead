//! The offline cache worker.
//!
//! Each lifecycle and functional event has its own async handler on
//! [`OfflineWorker`]. Collaborators (cache storage, network, mutation queue,
//! notifier) are injected through [`WorkerContext`], so handlers never touch
//! ambient state.

mod lifecycle;
mod strategy;
mod sync;
#[cfg(test)]
pub(crate) mod testing;

pub use lifecycle::WorkerState;
pub use strategy::RequestClass;
pub use sync::SyncReport;

use color_eyre::{
  eyre::{eyre, WrapErr},
  Result,
};
use futures::future::try_join_all;
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

use crate::cache::{CacheLayer, CacheResult, CacheStorage, RequestKey};
use crate::config::{Config, NotificationConfig};
use crate::event::{ClickOutcome, EventOutcome, WorkerEvent};
use crate::net::{Fetcher, Request, Response};
use crate::notify::{Notification, Notifier, ACTION_EXPLORE};
use crate::queue::MutationQueue;

/// Collaborators the worker depends on
#[derive(Clone)]
pub struct WorkerContext {
  pub caches: Arc<dyn CacheStorage>,
  pub fetcher: Arc<dyn Fetcher>,
  pub queue: Arc<dyn MutationQueue>,
  pub notifier: Arc<dyn Notifier>,
}

/// Per-version settings, fixed when the worker is built
#[derive(Debug, Clone)]
pub struct WorkerSettings {
  pub version: String,
  pub origin: Url,
  pub static_name: String,
  pub dynamic_name: String,
  pub static_assets: Vec<String>,
  pub api_prefixes: Vec<String>,
  pub sync_tag: String,
  pub notifications: NotificationConfig,
}

impl WorkerSettings {
  pub fn from_config(config: &Config) -> Self {
    Self {
      version: config.cache.version.clone(),
      origin: config.origin.clone(),
      static_name: config.cache.static_name(),
      dynamic_name: config.cache.dynamic_name(),
      static_assets: config.cache.static_assets.clone(),
      api_prefixes: config.cache.api_prefixes.clone(),
      sync_tag: config.sync.tag.clone(),
      notifications: config.notifications.clone(),
    }
  }

  /// Namespaces that survive activation
  pub fn allow_list(&self) -> [&str; 2] {
    [self.static_name.as_str(), self.dynamic_name.as_str()]
  }
}

/// One version of the offline cache worker.
#[derive(Clone)]
pub struct OfflineWorker {
  ctx: WorkerContext,
  settings: Arc<WorkerSettings>,
  layer: CacheLayer,
}

impl OfflineWorker {
  pub fn new(ctx: WorkerContext, settings: WorkerSettings) -> Self {
    let layer = CacheLayer::new(ctx.caches.clone(), settings.dynamic_name.clone());
    Self {
      ctx,
      settings: Arc::new(settings),
      layer,
    }
  }

  pub fn version(&self) -> &str {
    &self.settings.version
  }

  pub fn settings(&self) -> &WorkerSettings {
    &self.settings
  }

  /// Route one event to its handler.
  pub async fn dispatch(&self, event: WorkerEvent) -> Result<EventOutcome> {
    match event {
      WorkerEvent::Install => Ok(EventOutcome::Installed {
        assets: self.install().await?,
      }),
      WorkerEvent::Activate => Ok(EventOutcome::Activated {
        purged: self.activate().await?,
      }),
      WorkerEvent::Fetch(request) => Ok(EventOutcome::Fetched(self.fetch(request).await?)),
      WorkerEvent::Sync { tag } => Ok(EventOutcome::Synced(self.sync(&tag).await?)),
      WorkerEvent::Push { payload } => Ok(EventOutcome::Notified(
        self.push(payload.as_deref()).await?,
      )),
      WorkerEvent::NotificationClick { action } => Ok(EventOutcome::Clicked(
        self.notification_click(&action)?,
      )),
    }
  }

  /// Precache every static asset.
  ///
  /// All assets are fetched before anything is stored; a single failed fetch
  /// or non-2xx answer aborts the install and stores nothing. Returns the
  /// number of assets cached.
  pub async fn install(&self) -> Result<usize> {
    let namespace = &self.settings.static_name;
    info!(
      version = %self.settings.version,
      namespace = %namespace,
      count = self.settings.static_assets.len(),
      "Installing"
    );

    let urls = self
      .settings
      .static_assets
      .iter()
      .map(|path| {
        self
          .settings
          .origin
          .join(path)
          .map_err(|e| eyre!("Invalid static asset path '{}': {}", path, e))
      })
      .collect::<Result<Vec<Url>>>()?;

    let entries = try_join_all(urls.iter().map(|url| self.precache(url))).await?;

    self
      .ctx
      .caches
      .put_all(namespace, &entries)
      .wrap_err_with(|| format!("Failed to populate {}", namespace))?;

    info!(namespace = %namespace, count = entries.len(), "Installed");
    Ok(entries.len())
  }

  async fn precache(&self, url: &Url) -> Result<(RequestKey, Response)> {
    let request = Request::get(url.clone());
    let response = self
      .ctx
      .fetcher
      .fetch(&request)
      .await
      .wrap_err_with(|| format!("Failed to precache {}", url))?;

    if !response.is_ok() {
      return Err(eyre!("Failed to precache {}: HTTP {}", url, response.status));
    }
    Ok((RequestKey::get(url), response))
  }

  /// Delete every namespace outside the allow-list. Returns the purged names.
  pub async fn activate(&self) -> Result<Vec<String>> {
    let keep = self.settings.allow_list();
    let mut purged = Vec::new();

    for name in self.ctx.caches.namespaces()? {
      if keep.contains(&name.as_str()) {
        continue;
      }
      self
        .ctx
        .caches
        .delete(&name)
        .wrap_err_with(|| format!("Failed to delete stale namespace {}", name))?;
      info!(namespace = %name, "Purged stale namespace");
      purged.push(name);
    }

    info!(version = %self.settings.version, purged = purged.len(), "Activated");
    Ok(purged)
  }

  /// Serve an intercepted request.
  ///
  /// Non-GET requests go straight to the network without touching the cache.
  /// API paths are network-first, everything else cache-first.
  pub async fn fetch(&self, request: Request) -> Result<CacheResult<Response>> {
    let Some(key) = RequestKey::for_request(&request) else {
      debug!(method = %request.method, url = %request.url, "Passing through");
      let response = self.ctx.fetcher.fetch(&request).await?;
      return Ok(CacheResult::passthrough(response));
    };

    let result = match RequestClass::classify(&request.url, &self.settings.api_prefixes) {
      RequestClass::Api => {
        self
          .layer
          .network_first(&key, || self.ctx.fetcher.fetch(&request))
          .await
      }
      RequestClass::Asset => {
        self
          .layer
          .cache_first(&key, || self.ctx.fetcher.fetch(&request))
          .await
      }
    }?;

    debug!(url = %request.url, source = %result.source, status = result.data.status, "Served");
    Ok(result)
  }

  /// Show the push notification.
  pub async fn push(&self, payload: Option<&str>) -> Result<Notification> {
    let notification = Notification::for_push(&self.settings.notifications, payload);
    self.ctx.notifier.show(&notification)?;
    Ok(notification)
  }

  /// React to a notification action.
  pub fn notification_click(&self, action: &str) -> Result<ClickOutcome> {
    if action == ACTION_EXPLORE {
      let url = self
        .settings
        .origin
        .join("/")
        .map_err(|e| eyre!("Invalid origin {}: {}", self.settings.origin, e))?;
      return Ok(ClickOutcome::OpenWindow(url));
    }
    Ok(ClickOutcome::Closed)
  }
}
