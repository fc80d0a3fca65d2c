//! Engine persistence adapter.

use std::path::Path;

use parking_lot::Mutex;

use lobby_core::{DeliveredMessage, Persistence, PersistenceError, SavedItem};

use crate::database::Database;
use crate::error::{Result, StoreError};

/// [`Persistence`] over a SQLite [`Database`].
///
/// The connection is not `Sync`, so it sits behind a mutex shared by the
/// engine's saves and the host's history writes.
pub struct SqlitePersistence {
    db: Mutex<Database>,
}

impl SqlitePersistence {
    pub fn new(db: Database) -> Self {
        Self { db: Mutex::new(db) }
    }

    pub fn open_at(path: &Path) -> Result<Self> {
        Ok(Self::new(Database::open_at(path)?))
    }

    /// Append a delivered message to the history log.
    pub fn record_message(&self, message: &DeliveredMessage) -> Result<bool> {
        self.db.lock().insert_lobby_message(message)
    }

    pub fn with_db<R>(&self, f: impl FnOnce(&Database) -> R) -> R {
        f(&self.db.lock())
    }
}

impl From<StoreError> for PersistenceError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Payload(e) => PersistenceError::Serialization(e.to_string()),
            other => PersistenceError::Storage(other.to_string()),
        }
    }
}

impl Persistence for SqlitePersistence {
    fn load_items(&self) -> std::result::Result<Vec<SavedItem>, PersistenceError> {
        Ok(self.db.lock().load_config()?)
    }

    fn save_items(&self, items: &[SavedItem]) -> std::result::Result<(), PersistenceError> {
        Ok(self.db.lock().save_config(items)?)
    }
}
