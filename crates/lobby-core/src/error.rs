use lobby_shared::{LobbyId, PeerId};
use thiserror::Error;

/// Errors surfaced to local callers of the engine.
///
/// Protocol irregularities coming from peers are never reported through
/// this type; they are logged and dropped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LobbyError {
    #[error("Not subscribed to lobby {0}")]
    NotSubscribed(LobbyId),

    #[error("No pending invite for lobby {0}")]
    UnknownInvite(LobbyId),

    #[error("Lobby {0} is not visible")]
    NotVisible(LobbyId),

    #[error("Invalid nickname: {0}")]
    InvalidNickname(String),

    #[error("Flood budget exhausted for lobby {0}")]
    FloodLimited(LobbyId),

    #[error("Message needs {0} fragments, more than allowed")]
    MessageTooLong(usize),

    #[error("Not a lobby virtual peer id: {0}")]
    NotALobby(PeerId),
}

/// Errors reported by a [`crate::ports::Persistence`] implementation.
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}
