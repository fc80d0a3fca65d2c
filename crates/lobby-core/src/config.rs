//! Engine tunables.
//!
//! Every setting has a default taken from [`lobby_shared::constants`], so an
//! engine can be built with `LobbyConfig::default()`. Hosts may override
//! individual values through `LOBBY_*` environment variables.

use std::str::FromStr;

use lobby_shared::constants::*;

/// Flood budget applied per (forwarding peer, lobby).
///
/// A peer may introduce at most `budget(N)` distinct objects into a lobby
/// within `window_secs`, where `N` is the lobby's estimated member count:
/// `budget(N) = max(min_budget, per_member * N)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FloodBudget {
    /// Sliding window length in seconds.
    /// Env: `LOBBY_FLOOD_WINDOW_SECS`
    pub window_secs: i64,

    /// Objects allowed per estimated member and window.
    /// Env: `LOBBY_FLOOD_PER_MEMBER`
    pub per_member: u32,

    /// Floor of the budget, whatever the member estimate.
    /// Env: `LOBBY_FLOOD_MIN_BUDGET`
    pub min_budget: u32,
}

impl FloodBudget {
    pub fn budget(&self, members: usize) -> u32 {
        let members = u32::try_from(members.max(1)).unwrap_or(u32::MAX);
        self.per_member.saturating_mul(members).max(self.min_budget)
    }
}

impl Default for FloodBudget {
    fn default() -> Self {
        Self {
            window_secs: FLOOD_WINDOW_SECS,
            per_member: FLOOD_OBJECTS_PER_MEMBER,
            min_budget: FLOOD_OBJECTS_PER_MEMBER,
        }
    }
}

/// Lobby engine configuration.
#[derive(Debug, Clone)]
pub struct LobbyConfig {
    /// Service a friend must offer to receive lobby traffic.
    pub service_type: u32,

    /// Retention of message cache entries.
    /// Env: `LOBBY_MSG_RETENTION_SECS`
    pub msg_cache_retention_secs: i64,

    /// Objects older than `retention - replay_margin` are refused.
    pub replay_margin_secs: i64,

    /// Env: `LOBBY_KEEPALIVE_SECS`
    pub keep_alive_interval_secs: i64,

    pub member_inactivity_secs: i64,

    /// Env: `LOBBY_VISIBLE_TIMEOUT_SECS`
    pub visible_lobby_timeout_secs: i64,

    pub list_request_min_interval_secs: i64,

    pub max_invites_per_peer: usize,

    pub max_pending_invites: usize,

    /// Env: `LOBBY_INVITE_TIMEOUT_SECS`
    pub invite_timeout_secs: i64,

    pub fragment_timeout_secs: i64,

    /// Env: `LOBBY_MAX_FRAGMENT_SIZE`
    pub max_fragment_size: usize,

    pub flood: FloodBudget,

    /// Global delay between two outgoing challenges.
    /// Env: `LOBBY_CHALLENGE_MIN_INTERVAL_SECS`
    pub challenge_min_interval_secs: i64,

    pub challenge_max_msg_age_secs: i64,

    pub challenge_trigger_count: u32,

    pub challenge_backoff_max_secs: i64,

    /// Env: `LOBBY_TIME_SHIFT_WARN_SECS`
    pub time_shift_warn_secs: f64,
}

impl Default for LobbyConfig {
    fn default() -> Self {
        Self {
            service_type: LOBBY_SERVICE_TYPE,
            msg_cache_retention_secs: MSG_CACHE_RETENTION_SECS,
            replay_margin_secs: REPLAY_MARGIN_SECS,
            keep_alive_interval_secs: KEEP_ALIVE_INTERVAL_SECS,
            member_inactivity_secs: MEMBER_INACTIVITY_SECS,
            visible_lobby_timeout_secs: VISIBLE_LOBBY_TIMEOUT_SECS,
            list_request_min_interval_secs: LIST_REQUEST_MIN_INTERVAL_SECS,
            max_invites_per_peer: MAX_INVITES_PER_PEER,
            max_pending_invites: MAX_PENDING_INVITES,
            invite_timeout_secs: INVITE_TIMEOUT_SECS,
            fragment_timeout_secs: FRAGMENT_TIMEOUT_SECS,
            max_fragment_size: MAX_FRAGMENT_SIZE,
            flood: FloodBudget::default(),
            challenge_min_interval_secs: CHALLENGE_MIN_INTERVAL_SECS,
            challenge_max_msg_age_secs: CHALLENGE_MAX_MSG_AGE_SECS,
            challenge_trigger_count: CHALLENGE_TRIGGER_COUNT,
            challenge_backoff_max_secs: CHALLENGE_BACKOFF_MAX_SECS,
            time_shift_warn_secs: TIME_SHIFT_WARN_SECS,
        }
    }
}

impl LobbyConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`LobbyConfig::from_env`] with an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        override_from(&lookup, "LOBBY_MSG_RETENTION_SECS", &mut config.msg_cache_retention_secs);
        override_from(&lookup, "LOBBY_KEEPALIVE_SECS", &mut config.keep_alive_interval_secs);
        override_from(&lookup, "LOBBY_VISIBLE_TIMEOUT_SECS", &mut config.visible_lobby_timeout_secs);
        override_from(&lookup, "LOBBY_INVITE_TIMEOUT_SECS", &mut config.invite_timeout_secs);
        override_from(&lookup, "LOBBY_MAX_FRAGMENT_SIZE", &mut config.max_fragment_size);
        override_from(&lookup, "LOBBY_FLOOD_WINDOW_SECS", &mut config.flood.window_secs);
        override_from(&lookup, "LOBBY_FLOOD_PER_MEMBER", &mut config.flood.per_member);
        override_from(&lookup, "LOBBY_FLOOD_MIN_BUDGET", &mut config.flood.min_budget);
        override_from(
            &lookup,
            "LOBBY_CHALLENGE_MIN_INTERVAL_SECS",
            &mut config.challenge_min_interval_secs,
        );
        override_from(&lookup, "LOBBY_TIME_SHIFT_WARN_SECS", &mut config.time_shift_warn_secs);

        if config.max_fragment_size == 0 {
            tracing::warn!("LOBBY_MAX_FRAGMENT_SIZE must be positive, using default");
            config.max_fragment_size = MAX_FRAGMENT_SIZE;
        }

        config
    }

    /// Announced times older than this many seconds are refused.
    pub fn replay_horizon_secs(&self) -> i64 {
        self.msg_cache_retention_secs - self.replay_margin_secs
    }
}

fn override_from<F, T>(lookup: &F, key: &str, field: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    if let Some(raw) = lookup(key) {
        match raw.trim().parse::<T>() {
            Ok(value) => *field = value,
            Err(_) => {
                tracing::warn!(key, value = %raw, "Invalid lobby setting, using default");
            }
        }
    }
}
