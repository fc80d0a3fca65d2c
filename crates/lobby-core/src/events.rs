//! Values the engine hands to its collaborators: delivered messages,
//! notifications and the persisted configuration items.

use serde::{Deserialize, Serialize};

use lobby_shared::{LobbyFlags, LobbyId, PeerId};

/// A complete chat message ready for local display or history logging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveredMessage {
    pub lobby_id: LobbyId,
    /// Source address of lobby traffic in the transport layer
    pub virtual_peer_id: PeerId,
    /// Message id (the parent id for reassembled messages)
    pub msg_id: u64,
    pub origin: PeerId,
    pub nick: String,
    pub text: String,
    pub send_time: i64,
    pub recv_time: i64,
    /// `true` for messages written by the local node
    pub outgoing: bool,
}

/// Lobby activity the host may want to surface.
#[derive(Debug, Clone, PartialEq)]
pub enum LobbyNotification {
    InviteReceived {
        lobby_id: LobbyId,
        from: PeerId,
        name: String,
    },
    PeerJoined {
        lobby_id: LobbyId,
        nick: String,
    },
    PeerLeft {
        lobby_id: LobbyId,
        nick: String,
    },
    NicknameChanged {
        lobby_id: LobbyId,
        old: String,
        new: String,
    },
    Status {
        lobby_id: LobbyId,
        nick: String,
        text: String,
    },
    /// Average clock shift of received traffic crossed the warning threshold
    TimeShift { average_secs: f64 },
}

/// Configuration items surviving restarts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SavedItem {
    DefaultNickname(String),
    LobbyNickname {
        lobby_id: LobbyId,
        nick: String,
    },
    LobbyFlags {
        lobby_id: LobbyId,
        flags: LobbyFlags,
    },
    SubscribedLobby {
        lobby_id: LobbyId,
        name: String,
        topic: String,
        flags: LobbyFlags,
        known_peers: Vec<PeerId>,
    },
}

impl SavedItem {
    /// Lobby the item belongs to, if any.
    pub fn lobby_id(&self) -> Option<LobbyId> {
        match self {
            SavedItem::DefaultNickname(_) => None,
            SavedItem::LobbyNickname { lobby_id, .. }
            | SavedItem::LobbyFlags { lobby_id, .. }
            | SavedItem::SubscribedLobby { lobby_id, .. } => Some(*lobby_id),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SavedItem::DefaultNickname(_) => "default_nickname",
            SavedItem::LobbyNickname { .. } => "lobby_nickname",
            SavedItem::LobbyFlags { .. } => "lobby_flags",
            SavedItem::SubscribedLobby { .. } => "subscribed_lobby",
        }
    }
}
