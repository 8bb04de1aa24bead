//! Registration and event delivery for worker versions.
//!
//! The host owns at most one active and one waiting worker. Registering a new
//! version installs it; once installed it either takes over immediately
//! (skip-waiting, or nothing active yet) or waits until `skip_waiting()` or
//! `clients_closed()` lets it activate. Functional events only ever reach the
//! active worker, each as its own [`EventTask`].
//!
//! Slot changes are written to a [`RegistrationStore`], so a host rebuilt with
//! [`WorkerHost::restore`] picks up where the previous process left off.

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::event::{EventOutcome, WorkerEvent};
use crate::registry::{RegistrationStore, Slot, StoredVersion};
use crate::task::EventTask;
use crate::worker::{OfflineWorker, SyncReport, WorkerState};

struct Registration {
  worker: OfflineWorker,
  state: WorkerState,
}

impl Registration {
  fn transition(&mut self, state: WorkerState) {
    debug!(
      version = %self.worker.version(),
      from = %self.state,
      to = %state,
      "Worker state changed"
    );
    self.state = state;
  }
}

pub struct WorkerHost {
  registry: Arc<dyn RegistrationStore>,
  active: Option<Registration>,
  waiting: Option<Registration>,
  skip_waiting: bool,
  clients_claimed: bool,
  /// Versions that failed to install or were superseded
  redundant: Vec<String>,
  /// Sync tags registered and not yet flushed
  sync_tags: Vec<String>,
}

impl WorkerHost {
  pub fn new(skip_waiting: bool, registry: Arc<dyn RegistrationStore>) -> Self {
    Self {
      registry,
      active: None,
      waiting: None,
      skip_waiting,
      clients_claimed: false,
      redundant: Vec::new(),
      sync_tags: Vec::new(),
    }
  }

  /// Rebuild the active and waiting slots recorded by an earlier host.
  ///
  /// `build` turns a stored version back into a worker. A restored active
  /// worker controls clients without being installed again.
  pub fn restore<F>(
    skip_waiting: bool,
    registry: Arc<dyn RegistrationStore>,
    build: F,
  ) -> Result<Self>
  where
    F: Fn(&StoredVersion) -> OfflineWorker,
  {
    let mut host = Self::new(skip_waiting, registry);

    if let Some(stored) = host.registry.load(Slot::Active)? {
      info!(version = %stored.version, "Restored active worker");
      host.active = Some(Registration {
        worker: build(&stored),
        state: WorkerState::Active,
      });
      host.clients_claimed = true;
    }
    if let Some(stored) = host.registry.load(Slot::Waiting)? {
      info!(version = %stored.version, "Restored waiting worker");
      host.waiting = Some(Registration {
        worker: build(&stored),
        state: WorkerState::Waiting,
      });
    }

    Ok(host)
  }

  pub fn active(&self) -> Option<&OfflineWorker> {
    self.active.as_ref().map(|r| &r.worker)
  }

  pub fn active_version(&self) -> Option<&str> {
    self.active().map(|w| w.version())
  }

  pub fn waiting_version(&self) -> Option<&str> {
    self.waiting.as_ref().map(|r| r.worker.version())
  }

  pub fn redundant_versions(&self) -> &[String] {
    &self.redundant
  }

  /// Whether the active worker has claimed open pages
  pub fn controls_clients(&self) -> bool {
    self.clients_claimed
  }

  pub fn pending_sync_tags(&self) -> &[String] {
    &self.sync_tags
  }

  /// Install a new worker version.
  ///
  /// A failed install marks the version redundant and leaves the current
  /// active worker untouched. Returns the state the new version ends in.
  pub async fn register(&mut self, worker: OfflineWorker) -> Result<WorkerState> {
    let version = worker.version().to_string();
    let mut registration = Registration {
      worker: worker.clone(),
      state: WorkerState::Installing,
    };
    info!(version = %version, "Registering worker");

    let task = EventTask::spawn("install", async move {
      worker.dispatch(WorkerEvent::Install).await
    });
    let assets = match task.wait().await {
      Ok(EventOutcome::Installed { assets }) => assets,
      Ok(other) => return Err(eyre!("Unexpected outcome for install: {:?}", other)),
      Err(e) => {
        registration.transition(WorkerState::Redundant);
        self.redundant.push(version.clone());
        warn!(version = %version, error = %e, "Install failed, keeping current worker");
        return Err(e.wrap_err(format!("Installing worker {} failed", version)));
      }
    };
    debug!(version = %version, assets, "Install handler finished");

    registration.transition(WorkerState::Waiting);
    self
      .registry
      .save(Slot::Waiting, &StoredVersion::of(&registration.worker))?;
    if let Some(previous) = self.waiting.replace(registration) {
      if previous.worker.version() != version {
        info!(version = %previous.worker.version(), "Waiting worker superseded");
        self.redundant.push(previous.worker.version().to_string());
      }
    }

    // Reinstalling the active version refreshes it in place
    let refresh = self.active_version() == Some(version.as_str());
    if self.skip_waiting || self.active.is_none() || refresh {
      self.activate_waiting().await?;
      return Ok(WorkerState::Active);
    }

    info!(version = %version, "Installed, waiting for clients to close");
    Ok(WorkerState::Waiting)
  }

  /// Let the waiting worker take over now. Returns false if nothing was waiting.
  pub async fn skip_waiting(&mut self) -> Result<bool> {
    if self.waiting.is_none() {
      return Ok(false);
    }
    self.activate_waiting().await?;
    Ok(true)
  }

  /// Every page controlled by the old worker has closed.
  pub async fn clients_closed(&mut self) -> Result<bool> {
    self.clients_claimed = false;
    self.skip_waiting().await
  }

  async fn activate_waiting(&mut self) -> Result<Vec<String>> {
    let mut registration = self
      .waiting
      .take()
      .ok_or_else(|| eyre!("No worker is waiting to activate"))?;
    registration.transition(WorkerState::Activating);

    let worker = registration.worker.clone();
    let task = EventTask::spawn("activate", async move {
      worker.dispatch(WorkerEvent::Activate).await
    });
    // Activation proceeds even if the purge fails
    let purged = match task.wait().await {
      Ok(EventOutcome::Activated { purged }) => purged,
      Ok(other) => {
        warn!(outcome = ?other, "Unexpected outcome for activate");
        Vec::new()
      }
      Err(e) => {
        warn!(
          version = %registration.worker.version(),
          error = %e,
          "Activate handler failed"
        );
        Vec::new()
      }
    };

    self
      .registry
      .save(Slot::Active, &StoredVersion::of(&registration.worker))?;
    self.registry.clear(Slot::Waiting)?;

    registration.transition(WorkerState::Active);
    let version = registration.worker.version().to_string();
    if let Some(mut previous) = self.active.replace(registration) {
      if previous.worker.version() != version {
        previous.transition(WorkerState::Redundant);
        self.redundant.push(previous.worker.version().to_string());
      }
    }
    self.clients_claimed = true;

    info!(version = %version, purged = purged.len(), "Worker active, clients claimed");
    Ok(purged)
  }

  /// Deliver a functional event to the active worker.
  pub fn dispatch(&self, event: WorkerEvent) -> Result<EventTask<EventOutcome>> {
    if matches!(event, WorkerEvent::Install | WorkerEvent::Activate) {
      return Err(eyre!("{} is driven by registration, not dispatch", event.name()));
    }

    let registration = self
      .active
      .as_ref()
      .ok_or_else(|| eyre!("No active worker to handle {}", event.name()))?;
    if !registration.state.handles_events() {
      return Err(eyre!(
        "Worker {} is {}, not handling events",
        registration.worker.version(),
        registration.state
      ));
    }

    let worker = registration.worker.clone();
    let name = event.name();
    debug!(event = name, version = %worker.version(), "Dispatching");
    Ok(EventTask::spawn(name, async move { worker.dispatch(event).await }))
  }

  /// Ask for a sync once connectivity returns.
  pub fn register_sync(&mut self, tag: &str) {
    if !self.sync_tags.iter().any(|t| t == tag) {
      debug!(tag, "Sync registered");
      self.sync_tags.push(tag.to_string());
    }
  }

  /// Fire one sync event per registered tag.
  ///
  /// Tags whose handler completed are cleared; a failed handler keeps its tag
  /// for the next restore. Without an active worker nothing fires.
  pub async fn connectivity_restored(&mut self) -> Result<Vec<(String, Option<SyncReport>)>> {
    if self.active.is_none() {
      debug!(pending = self.sync_tags.len(), "No active worker, sync deferred");
      return Ok(Vec::new());
    }

    let tags = std::mem::take(&mut self.sync_tags);
    let mut tasks = Vec::with_capacity(tags.len());
    for tag in tags {
      let task = self.dispatch(WorkerEvent::Sync { tag: tag.clone() })?;
      tasks.push((tag, task));
    }

    let mut reports = Vec::new();
    for (tag, task) in tasks {
      match task.wait().await {
        Ok(EventOutcome::Synced(report)) => reports.push((tag, report)),
        Ok(other) => return Err(eyre!("Unexpected outcome for sync: {:?}", other)),
        Err(e) => {
          warn!(tag = %tag, error = %e, "Sync handler failed, keeping tag registered");
          self.sync_tags.push(tag);
        }
      }
    }

    Ok(reports)
  }
}
