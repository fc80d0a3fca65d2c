//! Collaborator interfaces consumed by the engine.
//!
//! The engine never performs I/O itself. Adapters for these traits live in
//! the host: `lobby-net` provides a directory and a channel transport,
//! `lobby-store` a SQLite persistence.

use std::sync::atomic::{AtomicI64, Ordering};

use lobby_shared::{LobbyItem, PeerId};

use crate::error::PersistenceError;
use crate::events::{DeliveredMessage, LobbyNotification, SavedItem};

/// Friend connectivity and identity.
pub trait Directory: Send + Sync {
    /// Our own peer id.
    fn own_id(&self) -> PeerId;

    /// Friends reachable right now.
    fn connected_peers(&self) -> Vec<PeerId>;

    /// Whether `peer` runs the given service.
    fn peer_offers_service(&self, peer: &PeerId, service_type: u32) -> bool;
}

/// Outbound item delivery.
///
/// Fire-and-forget: implementations hand the item over and return
/// immediately, without waiting for any acknowledgement.
pub trait Transport: Send + Sync {
    fn send_item(&self, to: PeerId, item: LobbyItem);
}

/// Save/load of configuration items.
pub trait Persistence: Send + Sync {
    fn load_items(&self) -> Result<Vec<SavedItem>, PersistenceError>;

    fn save_items(&self, items: &[SavedItem]) -> Result<(), PersistenceError>;
}

/// Receiver of local deliveries and notifications.
pub trait LobbySink: Send + Sync {
    fn deliver(&self, message: DeliveredMessage);

    fn notify(&self, _note: LobbyNotification) {}
}

/// Wall clock in Unix seconds.
pub trait Clock: Send + Sync {
    fn now(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Clock moved by hand, for tests and simulations.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start: i64) -> Self {
        Self {
            now: AtomicI64::new(start),
        }
    }

    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: i64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Persistence that keeps nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPersistence;

impl Persistence for NoPersistence {
    fn load_items(&self) -> Result<Vec<SavedItem>, PersistenceError> {
        Ok(Vec::new())
    }

    fn save_items(&self, _items: &[SavedItem]) -> Result<(), PersistenceError> {
        Ok(())
    }
}
