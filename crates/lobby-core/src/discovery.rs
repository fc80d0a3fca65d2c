//! Visible-lobby table and pending invites.
//!
//! Friends answer list requests with the lobbies they can advertise. The
//! table keeps the freshest advertisement per lobby id and forgets lobbies
//! no one advertised for a while.

use std::collections::{HashMap, HashSet};

use lobby_shared::constants::MAX_LOBBIES_IN_LIST;
use lobby_shared::{LobbyFlags, LobbyId, PeerId, VisibleLobbyInfo};
use tracing::{debug, warn};

/// A lobby discovered through advertisements but not joined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisibleLobbyRecord {
    pub lobby_id: LobbyId,
    pub name: String,
    pub topic: String,
    pub member_count: u32,
    pub flags: LobbyFlags,
    /// Friends that advertised the lobby
    pub advertised_by: HashSet<PeerId>,
    pub last_report_time: i64,
}

/// An invitation waiting for the user's decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingInvite {
    pub lobby_id: LobbyId,
    pub inviter: PeerId,
    pub name: String,
    pub topic: String,
    pub flags: LobbyFlags,
    pub received_at: i64,
}

/// Invitations waiting for the user's decision, one per lobby.
///
/// Bounded per inviter and overall so a friend cannot grow the table at
/// will.
#[derive(Debug, Default)]
pub struct PendingInvites {
    invites: HashMap<LobbyId, PendingInvite>,
}

impl PendingInvites {
    /// Store `invite`, replacing any earlier one for the same lobby.
    ///
    /// Returns `false` when the inviter already has `per_inviter` other
    /// invites pending, or when a new lobby would exceed `total`.
    pub fn insert(&mut self, invite: PendingInvite, per_inviter: usize, total: usize) -> bool {
        let from_inviter = self
            .invites
            .values()
            .filter(|i| i.inviter == invite.inviter && i.lobby_id != invite.lobby_id)
            .count();
        if from_inviter >= per_inviter {
            return false;
        }
        if !self.invites.contains_key(&invite.lobby_id) && self.invites.len() >= total {
            return false;
        }
        self.invites.insert(invite.lobby_id, invite);
        true
    }

    pub fn remove(&mut self, lobby_id: &LobbyId) -> Option<PendingInvite> {
        self.invites.remove(lobby_id)
    }

    /// Drop invites older than `timeout`. Returns how many were dropped.
    pub fn expire(&mut self, now: i64, timeout: i64) -> usize {
        let before = self.invites.len();
        self.invites.retain(|_, i| i.received_at.saturating_add(timeout) > now);
        before - self.invites.len()
    }

    pub fn values(&self) -> impl Iterator<Item = &PendingInvite> {
        self.invites.values()
    }

    pub fn len(&self) -> usize {
        self.invites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.invites.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct VisibleLobbies {
    records: HashMap<LobbyId, VisibleLobbyRecord>,
    should_reset_counts: bool,
    last_request_time: Option<i64>,
}

impl VisibleLobbies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a new list request may go out, recording it if so.
    ///
    /// Counts are reset by the first answer to the new request, so stale
    /// maxima do not linger.
    pub fn start_request(&mut self, now: i64, min_interval: i64) -> bool {
        if self
            .last_request_time
            .is_some_and(|last| last + min_interval > now)
        {
            return false;
        }
        self.last_request_time = Some(now);
        self.should_reset_counts = true;
        true
    }

    /// Merge an advertisement list received from `from`.
    ///
    /// Returns the ids of the lobbies present in the (truncated) list.
    pub fn merge(&mut self, from: PeerId, infos: Vec<VisibleLobbyInfo>, now: i64) -> Vec<LobbyId> {
        if infos.len() > MAX_LOBBIES_IN_LIST {
            warn!(
                peer = %from,
                count = infos.len(),
                max = MAX_LOBBIES_IN_LIST,
                "Oversized lobby list, truncating"
            );
        }

        if self.should_reset_counts {
            for record in self.records.values_mut() {
                record.member_count = 0;
            }
            self.should_reset_counts = false;
        }

        let mut merged = Vec::new();
        for info in infos.into_iter().take(MAX_LOBBIES_IN_LIST) {
            let record = self
                .records
                .entry(info.lobby_id)
                .or_insert_with(|| VisibleLobbyRecord {
                    lobby_id: info.lobby_id,
                    name: String::new(),
                    topic: String::new(),
                    member_count: 0,
                    flags: info.flags,
                    advertised_by: HashSet::new(),
                    last_report_time: now,
                });

            record.name = info.name;
            record.topic = info.topic;
            record.flags = info.flags;
            record.member_count = record.member_count.max(info.member_count);
            record.advertised_by.insert(from);
            record.last_report_time = now;

            debug!(
                lobby = %record.lobby_id,
                peer = %from,
                count = record.member_count,
                "Visible lobby refreshed"
            );
            merged.push(record.lobby_id);
        }
        merged
    }

    /// Drop records not refreshed within `timeout`.
    pub fn prune(&mut self, now: i64, timeout: i64) -> usize {
        let before = self.records.len();
        self.records.retain(|_, r| r.last_report_time + timeout > now);
        before - self.records.len()
    }

    /// `peer` left `lobby_id` and no longer advertises it. A record with
    /// no advertiser left is dropped; returns `true` in that case.
    pub fn forget_advertiser(&mut self, lobby_id: &LobbyId, peer: &PeerId) -> bool {
        let Some(record) = self.records.get_mut(lobby_id) else {
            return false;
        };
        record.advertised_by.remove(peer);
        if record.advertised_by.is_empty() {
            self.records.remove(lobby_id);
            return true;
        }
        false
    }

    pub fn get(&self, lobby_id: &LobbyId) -> Option<&VisibleLobbyRecord> {
        self.records.get(lobby_id)
    }

    pub fn member_count(&self, lobby_id: &LobbyId) -> Option<u32> {
        self.records.get(lobby_id).map(|r| r.member_count)
    }

    pub fn list(&self) -> Vec<VisibleLobbyRecord> {
        let mut out: Vec<VisibleLobbyRecord> = self.records.values().cloned().collect();
        out.sort_by(|a, b| a.name.cmp(&b.name).then(a.lobby_id.cmp(&b.lobby_id)));
        out
    }
}
