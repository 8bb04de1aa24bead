//! Durable queue of writes made while offline.
//!
//! Mutations are appended when a write cannot reach the backend and removed
//! once a sync replay succeeds. Failed replays stay queued with their attempt
//! count and last error; there is no retry limit.

mod storage;

pub use storage::{MemoryQueue, MutationQueue, SqliteQueue};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A write waiting to be replayed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingMutation {
  pub id: i64,
  pub method: String,
  /// Resource the write targets (absolute URL or origin-relative path)
  pub target: String,
  pub content_type: Option<String>,
  pub payload: Vec<u8>,
  /// Failed replay attempts so far
  pub attempts: u32,
  pub last_error: Option<String>,
  pub created_at: DateTime<Utc>,
}

/// A write to append to the queue.
#[derive(Debug, Clone)]
pub struct NewMutation {
  pub method: String,
  pub target: String,
  pub content_type: Option<String>,
  pub payload: Vec<u8>,
}

#[cfg(test)]
impl NewMutation {
  pub fn json(
    method: impl Into<String>,
    target: impl Into<String>,
    payload: impl Into<Vec<u8>>,
  ) -> Self {
    Self {
      method: method.into(),
      target: target.into(),
      content_type: Some("application/json".to_string()),
      payload: payload.into(),
    }
  }
}
