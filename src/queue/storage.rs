use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use rusqlite::params;
use std::sync::{Arc, Mutex};

use super::{NewMutation, PendingMutation};
use crate::db::{parse_datetime, Database};

/// Durable queue access used by the sync handler.
pub trait MutationQueue: Send + Sync {
  /// Append a write; returns it with its assigned id.
  fn enqueue(&self, mutation: NewMutation) -> Result<PendingMutation>;

  /// All writes awaiting replay, oldest first.
  fn pending(&self) -> Result<Vec<PendingMutation>>;

  /// Remove a successfully replayed write.
  fn mark_synced(&self, id: i64) -> Result<()>;

  /// Keep a write queued, recording the failed attempt.
  fn record_failure(&self, id: i64, error: &str) -> Result<()>;
}

/// SQLite-backed queue sharing the worker database.
pub struct SqliteQueue {
  db: Arc<Database>,
}

impl SqliteQueue {
  pub fn new(db: Arc<Database>) -> Self {
    Self { db }
  }
}

impl MutationQueue for SqliteQueue {
  fn enqueue(&self, mutation: NewMutation) -> Result<PendingMutation> {
    let conn = self.db.conn()?;
    conn
      .execute(
        "INSERT INTO pending_mutations (method, target, content_type, payload, created_at)
         VALUES (?, ?, ?, ?, datetime('now'))",
        params![
          mutation.method,
          mutation.target,
          mutation.content_type,
          mutation.payload
        ],
      )
      .map_err(|e| eyre!("Failed to enqueue mutation: {}", e))?;

    let id = conn.last_insert_rowid();
    Ok(PendingMutation {
      id,
      method: mutation.method,
      target: mutation.target,
      content_type: mutation.content_type,
      payload: mutation.payload,
      attempts: 0,
      last_error: None,
      created_at: Utc::now(),
    })
  }

  fn pending(&self) -> Result<Vec<PendingMutation>> {
    let conn = self.db.conn()?;
    let mut stmt = conn
      .prepare(
        "SELECT id, method, target, content_type, payload, attempts, last_error, created_at
         FROM pending_mutations ORDER BY id",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows = stmt
      .query_map([], |row| {
        Ok((
          row.get::<_, i64>(0)?,
          row.get::<_, String>(1)?,
          row.get::<_, String>(2)?,
          row.get::<_, Option<String>>(3)?,
          row.get::<_, Vec<u8>>(4)?,
          row.get::<_, u32>(5)?,
          row.get::<_, Option<String>>(6)?,
          row.get::<_, String>(7)?,
        ))
      })
      .map_err(|e| eyre!("Failed to query pending mutations: {}", e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read pending mutation row: {}", e))?;

    rows
      .into_iter()
      .map(
        |(id, method, target, content_type, payload, attempts, last_error, created_at)| {
          Ok(PendingMutation {
            id,
            method,
            target,
            content_type,
            payload,
            attempts,
            last_error,
            created_at: parse_datetime(&created_at)?,
          })
        },
      )
      .collect()
  }

  fn mark_synced(&self, id: i64) -> Result<()> {
    self
      .db
      .conn()?
      .execute("DELETE FROM pending_mutations WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to remove mutation {}: {}", id, e))?;
    Ok(())
  }

  fn record_failure(&self, id: i64, error: &str) -> Result<()> {
    self
      .db
      .conn()?
      .execute(
        "UPDATE pending_mutations SET attempts = attempts + 1, last_error = ? WHERE id = ?",
        params![error, id],
      )
      .map_err(|e| eyre!("Failed to record failure for mutation {}: {}", id, e))?;
    Ok(())
  }
}

/// Process-local queue; nothing survives a restart.
#[derive(Default)]
pub struct MemoryQueue {
  inner: Mutex<(i64, Vec<PendingMutation>)>,
}

impl MemoryQueue {
  pub fn new() -> Self {
    Self::default()
  }
}

impl MutationQueue for MemoryQueue {
  fn enqueue(&self, mutation: NewMutation) -> Result<PendingMutation> {
    let mut inner = self.inner.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    inner.0 += 1;
    let pending = PendingMutation {
      id: inner.0,
      method: mutation.method,
      target: mutation.target,
      content_type: mutation.content_type,
      payload: mutation.payload,
      attempts: 0,
      last_error: None,
      created_at: Utc::now(),
    };
    inner.1.push(pending.clone());
    Ok(pending)
  }

  fn pending(&self) -> Result<Vec<PendingMutation>> {
    let inner = self.inner.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(inner.1.clone())
  }

  fn mark_synced(&self, id: i64) -> Result<()> {
    let mut inner = self.inner.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    inner.1.retain(|m| m.id != id);
    Ok(())
  }

  fn record_failure(&self, id: i64, error: &str) -> Result<()> {
    let mut inner = self.inner.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    if let Some(m) = inner.1.iter_mut().find(|m| m.id == id) {
      m.attempts += 1;
      m.last_error = Some(error.to_string());
    }
    Ok(())
  }
}
