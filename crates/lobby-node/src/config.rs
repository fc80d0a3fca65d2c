//! Node configuration loaded from environment variables.
//!
//! All settings have defaults so a node can start with zero configuration
//! for local experiments. Engine tunables are read separately by
//! [`lobby_core::LobbyConfig::from_env`].

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use lobby_shared::PeerId;

#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// SQLite database file.
    /// Env: `LOBBY_DB_PATH`
    /// Default: platform data directory
    pub db_path: Option<PathBuf>,

    /// Housekeeping period.
    /// Env: `LOBBY_TICK_SECS`
    /// Default: 1
    pub tick: Duration,

    /// Our identity on the friend network, 32 hex chars.
    /// Env: `LOBBY_PEER_ID`
    /// Default: random, new on every start
    pub peer_id: PeerId,

    /// Address friends connect to.
    /// Env: `LOBBY_LISTEN_ADDR`
    /// Default: `0.0.0.0:7812`
    pub listen_addr: SocketAddr,

    /// Friends to dial, as `peerhex@host:port`, comma separated.
    /// Env: `LOBBY_FRIENDS`
    pub friends: Vec<(PeerId, SocketAddr)>,

    /// Default nickname applied at startup.
    /// Env: `LOBBY_NICKNAME`
    pub nickname: Option<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            tick: Duration::from_secs(1),
            peer_id: PeerId::random(),
            listen_addr: ([0, 0, 0, 0], 7812).into(),
            friends: Vec::new(),
            nickname: None,
        }
    }
}

impl NodeConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source, falling back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(path) = lookup("LOBBY_DB_PATH") {
            config.db_path = Some(PathBuf::from(path));
        }

        if let Some(secs) = lookup("LOBBY_TICK_SECS") {
            match secs.parse::<u64>() {
                Ok(secs) if secs > 0 => config.tick = Duration::from_secs(secs),
                _ => tracing::warn!(value = %secs, "Invalid LOBBY_TICK_SECS, using default"),
            }
        }

        if let Some(hex_id) = lookup("LOBBY_PEER_ID") {
            match PeerId::from_hex(&hex_id) {
                Ok(id) => config.peer_id = id,
                Err(e) => tracing::warn!(
                    error = %e,
                    "Invalid LOBBY_PEER_ID, using a random identity"
                ),
            }
        }

        if let Some(addr) = lookup("LOBBY_LISTEN_ADDR") {
            match addr.parse::<SocketAddr>() {
                Ok(parsed) => config.listen_addr = parsed,
                Err(_) => tracing::warn!(value = %addr, "Invalid LOBBY_LISTEN_ADDR, using default"),
            }
        }

        if let Some(list) = lookup("LOBBY_FRIENDS") {
            config.friends = list
                .split(',')
                .map(str::trim)
                .filter(|entry| !entry.is_empty())
                .filter_map(|entry| {
                    let parsed = parse_friend(entry);
                    if parsed.is_none() {
                        tracing::warn!(entry, "Ignoring malformed LOBBY_FRIENDS entry");
                    }
                    parsed
                })
                .collect();
        }

        if let Some(nick) = lookup("LOBBY_NICKNAME") {
            config.nickname = Some(nick);
        }

        config
    }
}

fn parse_friend(entry: &str) -> Option<(PeerId, SocketAddr)> {
    let (id, addr) = entry.split_once('@')?;
    Some((PeerId::from_hex(id).ok()?, addr.parse().ok()?))
}
