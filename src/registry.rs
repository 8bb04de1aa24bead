//! Persistent record of which worker version is active and which is waiting.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::db::Database;
use crate::worker::OfflineWorker;

/// Registration slot a version occupies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
  Active,
  Waiting,
}

impl Slot {
  fn as_str(&self) -> &'static str {
    match self {
      Slot::Active => "active",
      Slot::Waiting => "waiting",
    }
  }
}

/// What is needed to rebuild a registered version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredVersion {
  pub version: String,
  pub static_name: String,
  pub dynamic_name: String,
}

impl StoredVersion {
  pub fn of(worker: &OfflineWorker) -> Self {
    let settings = worker.settings();
    Self {
      version: settings.version.clone(),
      static_name: settings.static_name.clone(),
      dynamic_name: settings.dynamic_name.clone(),
    }
  }
}

pub trait RegistrationStore: Send + Sync {
  fn load(&self, slot: Slot) -> Result<Option<StoredVersion>>;

  /// Put a version in a slot, replacing whatever was there.
  fn save(&self, slot: Slot, version: &StoredVersion) -> Result<()>;

  fn clear(&self, slot: Slot) -> Result<()>;
}

/// Registration slots kept in the worker database.
pub struct SqliteRegistry {
  db: Arc<Database>,
}

impl SqliteRegistry {
  pub fn new(db: Arc<Database>) -> Self {
    Self { db }
  }
}

impl RegistrationStore for SqliteRegistry {
  fn load(&self, slot: Slot) -> Result<Option<StoredVersion>> {
    self
      .db
      .conn()?
      .query_row(
        "SELECT version, static_name, dynamic_name FROM worker_registrations WHERE slot = ?",
        params![slot.as_str()],
        |row| {
          Ok(StoredVersion {
            version: row.get(0)?,
            static_name: row.get(1)?,
            dynamic_name: row.get(2)?,
          })
        },
      )
      .optional()
      .map_err(|e| eyre!("Failed to load {} registration: {}", slot.as_str(), e))
  }

  fn save(&self, slot: Slot, version: &StoredVersion) -> Result<()> {
    self
      .db
      .conn()?
      .execute(
        "INSERT OR REPLACE INTO worker_registrations
           (slot, version, static_name, dynamic_name, updated_at)
         VALUES (?, ?, ?, ?, datetime('now'))",
        params![
          slot.as_str(),
          version.version,
          version.static_name,
          version.dynamic_name
        ],
      )
      .map_err(|e| eyre!("Failed to save {} registration: {}", slot.as_str(), e))?;
    Ok(())
  }

  fn clear(&self, slot: Slot) -> Result<()> {
    self
      .db
      .conn()?
      .execute(
        "DELETE FROM worker_registrations WHERE slot = ?",
        params![slot.as_str()],
      )
      .map_err(|e| eyre!("Failed to clear {} registration: {}", slot.as_str(), e))?;
    Ok(())
  }
}

/// Process-local slots; nothing survives a restart.
#[derive(Default)]
pub struct MemoryRegistry {
  slots: Mutex<HashMap<Slot, StoredVersion>>,
}

impl MemoryRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<Slot, StoredVersion>>> {
    self.slots.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

impl RegistrationStore for MemoryRegistry {
  fn load(&self, slot: Slot) -> Result<Option<StoredVersion>> {
    Ok(self.lock()?.get(&slot).cloned())
  }

  fn save(&self, slot: Slot, version: &StoredVersion) -> Result<()> {
    self.lock()?.insert(slot, version.clone());
    Ok(())
  }

  fn clear(&self, slot: Slot) -> Result<()> {
    self.lock()?.remove(&slot);
    Ok(())
  }
}
