/// Lifecycle of one worker version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  /// Precaching the static namespace
  Installing,
  /// Installed while an older version still controls pages
  Waiting,
  /// Purging stale namespaces before taking control
  Activating,
  /// Controlling pages and handling fetch, sync and push
  Active,
  /// Failed to install, or superseded by a newer version
  Redundant,
}

impl WorkerState {
  /// Only an active worker receives functional events.
  pub fn handles_events(&self) -> bool {
    matches!(self, WorkerState::Active)
  }
}

impl std::fmt::Display for WorkerState {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      WorkerState::Installing => write!(f, "installing"),
      WorkerState::Waiting => write!(f, "waiting"),
      WorkerState::Activating => write!(f, "activating"),
      WorkerState::Active => write!(f, "active"),
      WorkerState::Redundant => write!(f, "redundant"),
    }
  }
}
