//! # lobby-core
//!
//! Engine for distributed chat lobbies: group chats with no server, whose
//! messages bounce from friend to friend until every member has them.
//!
//! The engine is synchronous and I/O free. Hosts plug in the friend
//! directory, the transport, persistence and a clock through the traits in
//! [`ports`], and drive it with [`DistributedChat::handle_recv_item`] and a
//! periodic [`DistributedChat::tick`].

pub mod cache;
pub mod config;
pub mod discovery;
pub mod error;
pub mod events;
pub mod flood;
pub mod partial;
pub mod ports;
pub mod service;
pub mod stats;

mod bounce;
mod challenge;
mod housekeeping;
mod lifecycle;
mod state;

pub use cache::{LobbyInfo, MemberInfo};
pub use config::{FloodBudget, LobbyConfig};
pub use discovery::{PendingInvite, VisibleLobbyRecord};
pub use error::{LobbyError, PersistenceError};
pub use events::{DeliveredMessage, LobbyNotification, SavedItem};
pub use ports::{Clock, Directory, LobbySink, ManualClock, NoPersistence, Persistence, SystemClock, Transport};
pub use service::{Collaborators, DistributedChat};
