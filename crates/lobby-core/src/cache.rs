//! Per-lobby state of subscribed lobbies.
//!
//! A [`LobbyEntry`] exists only while the local node is subscribed. It owns
//! the dedup cache, the friends participating in the bounce graph and the
//! member list learnt from bounced traffic.

use std::collections::{HashMap, HashSet};

use lobby_shared::crypto::virtual_peer_id;
use lobby_shared::{LobbyFlags, LobbyId, ObjectKey, PeerId};

/// A member seen through bounced traffic, keyed by origin peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberInfo {
    pub nick: String,
    pub last_seen: i64,
}

/// Snapshot of a subscribed lobby handed to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LobbyInfo {
    pub lobby_id: LobbyId,
    pub name: String,
    pub topic: String,
    pub flags: LobbyFlags,
    pub virtual_peer_id: PeerId,
    pub participating_peers: Vec<PeerId>,
    pub members: Vec<String>,
    pub last_activity: i64,
}

#[derive(Debug, Clone)]
pub struct LobbyEntry {
    pub lobby_id: LobbyId,
    pub name: String,
    pub topic: String,
    pub flags: LobbyFlags,
    pub virtual_peer_id: PeerId,
    /// Object key -> time the object was first seen
    pub msg_cache: HashMap<ObjectKey, i64>,
    /// Friends we exchange bounced traffic with for this lobby
    pub participating_peers: HashSet<PeerId>,
    /// Every friend that ever participated, kept across sessions
    pub previously_known_peers: HashSet<PeerId>,
    pub members: HashMap<PeerId, MemberInfo>,
    pub connection_challenge_count: u32,
    pub last_connection_challenge_time: i64,
    pub challenge_backoff_secs: i64,
    pub last_keep_alive_time: i64,
    pub last_activity: i64,
}

impl LobbyEntry {
    pub fn new(lobby_id: LobbyId, name: String, topic: String, flags: LobbyFlags, now: i64) -> Self {
        Self {
            lobby_id,
            name,
            topic,
            flags,
            virtual_peer_id: virtual_peer_id(lobby_id),
            msg_cache: HashMap::new(),
            participating_peers: HashSet::new(),
            previously_known_peers: HashSet::new(),
            members: HashMap::new(),
            connection_challenge_count: 0,
            last_connection_challenge_time: 0,
            challenge_backoff_secs: 0,
            last_keep_alive_time: now,
            last_activity: now,
        }
    }

    pub fn has_seen(&self, key: &ObjectKey) -> bool {
        self.msg_cache.contains_key(key)
    }

    pub fn record(&mut self, key: ObjectKey, now: i64) {
        self.msg_cache.insert(key, now);
        self.last_activity = now;
    }

    /// Drop cache entries older than `retention`. Returns how many went away.
    pub fn expire_cache(&mut self, now: i64, retention: i64) -> usize {
        let before = self.msg_cache.len();
        self.msg_cache.retain(|_, seen| *seen + retention > now);
        before - self.msg_cache.len()
    }

    /// Message ids seen within `max_age`, newest first.
    pub fn recent_msg_ids(&self, now: i64, max_age: i64) -> Vec<u64> {
        let mut recent: Vec<(i64, u64)> = self
            .msg_cache
            .iter()
            .filter(|(_, seen)| **seen + max_age > now)
            .map(|(key, seen)| (*seen, key.msg_id))
            .collect();
        recent.sort_unstable_by(|a, b| b.cmp(a));
        recent.into_iter().map(|(_, id)| id).collect()
    }

    /// Add a participating friend. Returns `true` if it was not participating.
    pub fn add_participant(&mut self, peer: PeerId) -> bool {
        self.previously_known_peers.insert(peer);
        self.participating_peers.insert(peer)
    }

    pub fn remove_participant(&mut self, peer: &PeerId) {
        self.participating_peers.remove(peer);
        self.previously_known_peers.remove(peer);
    }

    /// Refresh a member, returning its previous nick if it changed.
    pub fn touch_member(&mut self, origin: PeerId, nick: &str, now: i64) -> Option<String> {
        match self.members.get_mut(&origin) {
            Some(member) => {
                member.last_seen = now;
                if member.nick != nick {
                    Some(std::mem::replace(&mut member.nick, nick.to_string()))
                } else {
                    None
                }
            }
            None => {
                self.members.insert(
                    origin,
                    MemberInfo {
                        nick: nick.to_string(),
                        last_seen: now,
                    },
                );
                None
            }
        }
    }

    pub fn remove_member(&mut self, origin: &PeerId) -> Option<MemberInfo> {
        self.members.remove(origin)
    }

    pub fn prune_members(&mut self, now: i64, inactivity: i64) {
        self.members.retain(|_, m| m.last_seen + inactivity > now);
    }

    /// Estimated lobby size: known members plus ourselves, never below
    /// the number of participating friends.
    pub fn member_estimate(&self) -> usize {
        (self.members.len() + 1).max(self.participating_peers.len())
    }

    pub fn info(&self) -> LobbyInfo {
        let mut participating_peers: Vec<PeerId> =
            self.participating_peers.iter().copied().collect();
        participating_peers.sort();
        let mut members: Vec<String> = self.members.values().map(|m| m.nick.clone()).collect();
        members.sort();

        LobbyInfo {
            lobby_id: self.lobby_id,
            name: self.name.clone(),
            topic: self.topic.clone(),
            flags: self.flags,
            virtual_peer_id: self.virtual_peer_id,
            participating_peers,
            members,
            last_activity: self.last_activity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> LobbyEntry {
        LobbyEntry::new(
            LobbyId(1),
            "Team".to_string(),
            "topic".to_string(),
            LobbyFlags::default(),
            1_000,
        )
    }

    fn key(msg_id: u64) -> ObjectKey {
        ObjectKey {
            origin: PeerId([1u8; 16]),
            msg_id,
        }
    }

    #[test]
    fn test_cache_expiry_bound() {
        let mut lobby = entry();
        lobby.record(key(1), 1_000);
        lobby.record(key(2), 1_500);

        assert_eq!(lobby.expire_cache(2_200, 1_200), 1);
        assert!(!lobby.has_seen(&key(1)));
        assert!(lobby.has_seen(&key(2)));
    }

    #[test]
    fn test_recent_ids_newest_first() {
        let mut lobby = entry();
        lobby.record(key(1), 1_000);
        lobby.record(key(2), 1_020);
        lobby.record(key(3), 1_025);

        assert_eq!(lobby.recent_msg_ids(1_030, 30), vec![3, 2]);
    }

    #[test]
    fn test_participants_and_previously_known() {
        let mut lobby = entry();
        let peer = PeerId([9u8; 16]);

        assert!(lobby.add_participant(peer));
        assert!(!lobby.add_participant(peer));
        assert!(lobby.previously_known_peers.contains(&peer));

        lobby.remove_participant(&peer);
        assert!(lobby.participating_peers.is_empty());
        assert!(lobby.previously_known_peers.is_empty());
    }

    #[test]
    fn test_member_rename_and_prune() {
        let mut lobby = entry();
        let origin = PeerId([4u8; 16]);

        assert_eq!(lobby.touch_member(origin, "bob", 1_000), None);
        assert_eq!(
            lobby.touch_member(origin, "robert", 1_010),
            Some("bob".to_string())
        );
        assert_eq!(lobby.member_estimate(), 2);

        lobby.prune_members(2_000, 360);
        assert!(lobby.members.is_empty());
    }
}
