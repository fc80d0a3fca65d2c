//! # lobby-net
//!
//! Host-side glue between the lobby engine and a friend-to-friend
//! transport: connection tracking, a channel-backed transport with the
//! binary item codec, and tokio tasks driving the engine.

pub mod outbox;
pub mod peers;
pub mod runtime;

pub use outbox::{ChannelTransport, InboundFrame, OutboundFrame};
pub use peers::{PeerDirectory, PeerTracker};
pub use runtime::{spawn_housekeeping, spawn_inbound_loop, LinkEvent};
