// Types, wire items and pure derivations shared by every lobby crate.

pub mod constants;
pub mod crypto;
pub mod error;
pub mod protocol;
pub mod types;

pub use error::ProtocolError;
pub use protocol::{
    BounceHeader, Fragment, LobbyEvent, LobbyEventKind, LobbyInvite, LobbyItem, LobbyMsg,
    VisibleLobbyInfo,
};
pub use types::{LobbyFlags, LobbyId, LobbyPrivacy, ObjectKey, PeerId};
