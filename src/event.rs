use url::Url;

use crate::cache::CacheResult;
use crate::net::{Request, Response};
use crate::notify::Notification;
use crate::worker::SyncReport;

/// Events delivered to a worker
#[derive(Debug)]
pub enum WorkerEvent {
  /// New version detected, precache static assets
  Install,
  /// Version taking control, purge stale namespaces
  Activate,
  /// Intercepted page request
  Fetch(Request),
  /// Connectivity restored for a registered sync tag
  Sync { tag: String },
  /// Push message with optional text
  Push { payload: Option<String> },
  /// User picked a notification action
  NotificationClick { action: String },
}

impl WorkerEvent {
  pub fn name(&self) -> &'static str {
    match self {
      WorkerEvent::Install => "install",
      WorkerEvent::Activate => "activate",
      WorkerEvent::Fetch(_) => "fetch",
      WorkerEvent::Sync { .. } => "sync",
      WorkerEvent::Push { .. } => "push",
      WorkerEvent::NotificationClick { .. } => "notificationclick",
    }
  }
}

/// What a handler produced
#[derive(Debug)]
pub enum EventOutcome {
  Installed { assets: usize },
  Activated { purged: Vec<String> },
  Fetched(CacheResult<Response>),
  /// `None` when the tag is not ours
  Synced(Option<SyncReport>),
  Notified(Notification),
  Clicked(ClickOutcome),
}

/// Result of a notification click
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
  /// Focus or open an application window at this URL
  OpenWindow(Url),
  /// Notification dismissed
  Closed,
}
