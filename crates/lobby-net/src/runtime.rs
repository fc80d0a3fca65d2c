//! Tokio tasks driving the engine.
//!
//! The link layer feeds [`LinkEvent`]s into one channel; a dedicated task
//! keeps the [`PeerDirectory`] current and hands decoded items to the
//! engine. A second task runs the engine's periodic housekeeping.

use std::sync::Arc;
use std::time::Duration;

use lobby_core::DistributedChat;
use lobby_shared::PeerId;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::outbox::InboundFrame;
use crate::peers::PeerDirectory;

/// Events sent *into* the link task.
#[derive(Debug)]
pub enum LinkEvent {
    /// A friend connected and announced its services.
    Connected { peer: PeerId, services: Vec<u32> },
    Disconnected { peer: PeerId },
    Frame(InboundFrame),
    /// Stop the task.
    Shutdown,
}

/// Spawn the task consuming link events.
pub fn spawn_inbound_loop(
    engine: Arc<DistributedChat>,
    directory: Arc<PeerDirectory>,
    mut rx: mpsc::Receiver<LinkEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                LinkEvent::Connected { peer, services } => {
                    directory.on_connected(peer, services);
                }
                LinkEvent::Disconnected { peer } => {
                    directory.on_disconnected(&peer);
                }
                LinkEvent::Frame(frame) => {
                    if let Some(item) = frame.decode() {
                        engine.handle_recv_item(item, frame.from);
                    }
                }
                LinkEvent::Shutdown => {
                    info!("Link loop shutdown requested");
                    return;
                }
            }
        }
        debug!("Link channel closed, stopping link loop");
    })
}

/// Spawn the periodic housekeeping task. Abort the handle to stop it.
pub fn spawn_housekeeping(engine: Arc<DistributedChat>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            engine.tick();
        }
    })
}
