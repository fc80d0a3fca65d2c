//! # lobby-node
//!
//! A chat-lobby node for a small friend-to-friend network.
//!
//! This binary provides:
//! - the distributed lobby engine, with lobby settings kept in SQLite
//! - plain TCP links to the friends listed in `LOBBY_FRIENDS`
//! - a history log of every delivered message
//! - a command console on stdin (`/help` lists the commands)

mod config;
mod console;
mod link;
mod sink;

use std::sync::Arc;

use lobby_core::{Collaborators, DistributedChat, LobbyConfig, SystemClock};
use lobby_net::{spawn_housekeeping, spawn_inbound_loop, ChannelTransport, LinkEvent, PeerDirectory};
use lobby_store::{Database, SqlitePersistence};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::NodeConfig;
use crate::link::Links;
use crate::sink::HistorySink;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,lobby_node=debug")),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("Starting lobby node v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = NodeConfig::from_env();
    let lobby_config = LobbyConfig::from_env();
    info!(?config, "Loaded configuration");
    info!(peer_id = %config.peer_id, "Node identity");

    // -----------------------------------------------------------------------
    // 3. Open storage and build the engine
    // -----------------------------------------------------------------------
    let db_path = match config.db_path.clone() {
        Some(path) => path,
        None => Database::default_path()?,
    };
    let store = Arc::new(SqlitePersistence::open_at(&db_path)?);

    let directory = Arc::new(PeerDirectory::new(config.peer_id));
    let (transport, outbound_rx) = ChannelTransport::channel(1024);

    let engine = Arc::new(DistributedChat::new(
        lobby_config,
        Collaborators {
            directory: directory.clone(),
            transport: Arc::new(transport),
            persistence: store.clone(),
            sink: Arc::new(HistorySink::new(store.clone())),
            clock: Arc::new(SystemClock),
        },
    ));

    if let Some(nick) = &config.nickname {
        if let Err(e) = engine.set_default_nickname(nick) {
            warn!(error = %e, "Ignoring LOBBY_NICKNAME");
        }
    }
    info!(
        lobbies = engine.get_chat_lobby_list().len(),
        nickname = %engine.get_default_nickname(),
        "Engine ready"
    );

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------
    let (link_tx, link_rx) = mpsc::channel::<LinkEvent>(1024);
    let inbound = spawn_inbound_loop(engine.clone(), directory.clone(), link_rx);
    let housekeeping = spawn_housekeeping(engine.clone(), config.tick);

    let links = Links::new(config.peer_id, link_tx.clone());
    let router = links.spawn_router(outbound_rx);
    let listener = links.listen(config.listen_addr).await?;
    let dialers: Vec<_> = config
        .friends
        .iter()
        .map(|(peer, addr)| links.dial(*peer, *addr))
        .collect();
    info!(friends = dialers.len(), "Dialing friends");

    // -----------------------------------------------------------------------
    // 5. Run until /quit or Ctrl-C
    // -----------------------------------------------------------------------
    let console = tokio::spawn(console::run(engine.clone(), store.clone()));
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Received Ctrl-C"),
        _ = console => info!("Console closed"),
    }

    // -----------------------------------------------------------------------
    // 6. Shut down
    // -----------------------------------------------------------------------
    listener.abort();
    for dialer in dialers {
        dialer.abort();
    }
    housekeeping.abort();
    router.abort();
    let _ = link_tx.send(LinkEvent::Shutdown).await;
    let _ = inbound.await;

    engine.shutdown();
    info!(links = links.connected_count(), "Lobby node stopped");
    Ok(())
}
