use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::types::{LobbyFlags, LobbyId, ObjectKey, PeerId};

/// All lobby items exchanged between friends.
///
/// `Msg` and `Event` are bounced through the lobby graph and carry a
/// [`BounceHeader`]. The remaining variants travel a single hop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum LobbyItem {
    /// Chat message, possibly one fragment of a larger message
    Msg(LobbyMsg),

    /// Status event (join, leave, keepalive, ...)
    Event(LobbyEvent),

    /// Invitation to join a lobby
    Invite(LobbyInvite),

    /// Ask a friend for the lobbies it can advertise
    ListRequest,

    /// Answer to a `ListRequest`
    List(Vec<VisibleLobbyInfo>),

    /// Proof that the sender recently saw traffic of a lobby we share
    ConnectChallenge { challenge_code: u64 },

    /// Sender is leaving the lobby
    Unsubscribe { lobby_id: LobbyId },
}

/// Fields shared by every bounced object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BounceHeader {
    pub lobby_id: LobbyId,
    /// Per-origin sequence number
    pub msg_id: u64,
    pub origin: PeerId,
    pub nick: String,
    /// Unix seconds as announced by the origin
    pub send_time: i64,
}

impl BounceHeader {
    pub fn key(&self) -> ObjectKey {
        ObjectKey {
            origin: self.origin,
            msg_id: self.msg_id,
        }
    }
}

/// Position of a chat fragment inside its parent message
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Fragment {
    pub parent_msg_id: u64,
    pub index: u16,
    pub total: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LobbyMsg {
    pub header: BounceHeader,
    pub text: String,
    pub fragment: Option<Fragment>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum LobbyEventKind {
    PeerLeft,
    Status(String),
    PeerJoined,
    NicknameChanged(String),
    KeepAlive,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LobbyEvent {
    pub header: BounceHeader,
    pub kind: LobbyEventKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LobbyInvite {
    pub lobby_id: LobbyId,
    pub lobby_name: String,
    pub lobby_topic: String,
    pub flags: LobbyFlags,
    /// Set when the invite answers a connection challenge; only honoured
    /// by peers already subscribed to the lobby.
    pub connection_challenge: bool,
}

/// One advertised lobby inside a `List` item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VisibleLobbyInfo {
    pub lobby_id: LobbyId,
    pub name: String,
    pub topic: String,
    pub member_count: u32,
    pub flags: LobbyFlags,
}

impl LobbyItem {
    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            LobbyItem::Msg(_) => "msg",
            LobbyItem::Event(_) => "event",
            LobbyItem::Invite(_) => "invite",
            LobbyItem::ListRequest => "list-request",
            LobbyItem::List(_) => "list",
            LobbyItem::ConnectChallenge { .. } => "connect-challenge",
            LobbyItem::Unsubscribe { .. } => "unsubscribe",
        }
    }

    /// Header of bounced items, `None` for single-hop items
    pub fn bounce_header(&self) -> Option<&BounceHeader> {
        match self {
            LobbyItem::Msg(msg) => Some(&msg.header),
            LobbyItem::Event(event) => Some(&event.header),
            _ => None,
        }
    }

    /// Serialize to binary (bincode)
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserialize from binary
    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        Ok(bincode::deserialize(data)?)
    }
}
