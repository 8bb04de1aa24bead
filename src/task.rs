//! Lifetime handles for event handlers.
//!
//! Every handler the host starts runs as its own tokio task and is
//! represented by an `EventTask<T>`. The host keeps the handle until the
//! handler settles, either by polling it from a loop tick or by awaiting
//! `wait()`. Dropping the handle does not stop the handler; `abandon()` does.
//!
//! ```ignore
//! let mut task = EventTask::spawn("sync", async move { worker.sync("sync-documents").await });
//!
//! // In event loop tick
//! if task.poll() {
//!     // handler settled
//! }
//! ```

use color_eyre::{eyre::eyre, Result};
use std::future::Future;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Settlement state of a handler
#[derive(Debug, Clone)]
pub enum TaskState<T> {
  /// Handler still running
  Running,
  /// Handler resolved
  Completed(T),
  /// Handler rejected or was abandoned
  Failed(String),
}

impl<T> TaskState<T> {
  #[cfg(test)]
  pub fn is_running(&self) -> bool {
    matches!(self, TaskState::Running)
  }

  #[cfg(test)]
  pub fn is_completed(&self) -> bool {
    matches!(self, TaskState::Completed(_))
  }

  #[cfg(test)]
  pub fn is_failed(&self) -> bool {
    matches!(self, TaskState::Failed(_))
  }

  pub fn error(&self) -> Option<&str> {
    match self {
      TaskState::Failed(e) => Some(e),
      _ => None,
    }
  }
}

/// Handle on a running event handler.
pub struct EventTask<T> {
  event: &'static str,
  state: TaskState<T>,
  receiver: Option<mpsc::UnboundedReceiver<Result<T>>>,
  handle: JoinHandle<()>,
}

impl<T: Send + 'static> EventTask<T> {
  /// Start a handler on the runtime.
  pub fn spawn<Fut>(event: &'static str, future: Fut) -> Self
  where
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(async move {
      let result = future.await;
      // Ignore send errors - receiver may have been dropped
      let _ = tx.send(result);
    });

    Self {
      event,
      state: TaskState::Running,
      receiver: Some(rx),
      handle,
    }
  }

  pub fn event(&self) -> &'static str {
    self.event
  }

  pub fn state(&self) -> &TaskState<T> {
    &self.state
  }

  /// Check for settlement without blocking.
  ///
  /// Returns `true` if the state changed.
  pub fn poll(&mut self) -> bool {
    let receiver = match &mut self.receiver {
      Some(rx) => rx,
      None => return false,
    };

    match receiver.try_recv() {
      Ok(Ok(value)) => {
        self.state = TaskState::Completed(value);
        self.receiver = None;
        true
      }
      Ok(Err(error)) => {
        self.state = TaskState::Failed(format!("{:#}", error));
        self.receiver = None;
        true
      }
      Err(mpsc::error::TryRecvError::Empty) => false,
      Err(mpsc::error::TryRecvError::Disconnected) => {
        self.state = TaskState::Failed(format!("{} handler was abandoned", self.event));
        self.receiver = None;
        true
      }
    }
  }

  /// Wait for the handler to settle.
  pub async fn wait(mut self) -> Result<T> {
    match std::mem::replace(&mut self.state, TaskState::Running) {
      TaskState::Completed(value) => return Ok(value),
      TaskState::Failed(error) => return Err(eyre!(error)),
      TaskState::Running => {}
    }

    let receiver = self
      .receiver
      .as_mut()
      .ok_or_else(|| eyre!("{} handler already settled", self.event))?;

    match receiver.recv().await {
      Some(result) => result,
      None => Err(eyre!("{} handler was abandoned", self.event)),
    }
  }

  /// Stop the handler. Work it had not finished, such as a pending cache
  /// write, is dropped.
  pub fn abandon(mut self) {
    self.handle.abort();
    self.receiver = None;
  }
}

impl<T: std::fmt::Debug> std::fmt::Debug for EventTask<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("EventTask")
      .field("event", &self.event)
      .field("state", &self.state)
      .finish_non_exhaustive()
  }
}
