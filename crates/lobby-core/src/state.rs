//! Lock-protected engine state.
//!
//! [`LobbyState`] is only reachable through the engine mutex guard, so
//! every method taking `&mut self` runs with the lock held. None of them
//! locks anything or performs I/O: outbound items, deliveries and save
//! requests are queued in an [`Outbox`] and flushed once the guard is gone.

use std::collections::{HashMap, HashSet};

use lobby_shared::constants::{DEFAULT_NICKNAME, MAX_NICKNAME_LEN};
use lobby_shared::{BounceHeader, LobbyFlags, LobbyId, LobbyItem, PeerId};
use tracing::debug;

use crate::cache::LobbyEntry;
use crate::config::LobbyConfig;
use crate::discovery::{PendingInvites, VisibleLobbies};
use crate::error::LobbyError;
use crate::events::{DeliveredMessage, LobbyNotification, SavedItem};
use crate::flood::FloodGuard;
use crate::partial::PartialMessages;
use crate::stats::TimeShiftStats;

/// Values captured before taking the lock.
pub(crate) struct Ctx<'a> {
    pub config: &'a LobbyConfig,
    pub own_id: PeerId,
    pub now: i64,
    /// Connected friends offering the lobby service
    pub online: &'a HashSet<PeerId>,
}

/// Side effects collected while the lock is held.
#[derive(Debug, Default)]
pub(crate) struct Outbox {
    pub sends: Vec<(PeerId, LobbyItem)>,
    pub delivered: Vec<DeliveredMessage>,
    pub notes: Vec<LobbyNotification>,
    pub save: bool,
}

impl Outbox {
    pub fn send(&mut self, to: PeerId, item: LobbyItem) {
        self.sends.push((to, item));
    }
}

pub(crate) struct LobbyState {
    pub lobbies: HashMap<LobbyId, LobbyEntry>,
    pub invites: PendingInvites,
    pub visible: VisibleLobbies,
    /// Virtual peer id -> lobby, for subscribed lobbies
    pub lobby_ids: HashMap<PeerId, LobbyId>,
    /// Flags of every lobby we ever cared about, subscribed or not
    pub known_flags: HashMap<LobbyId, LobbyFlags>,
    pub nicknames: HashMap<LobbyId, String>,
    pub default_nick: String,
    pub partial: PartialMessages,
    pub flood: FloodGuard,
    pub time_shift: TimeShiftStats,
    pub last_lobby_challenge_time: Option<i64>,
    next_msg_id: u64,
}

impl LobbyState {
    pub fn new() -> Self {
        Self {
            lobbies: HashMap::new(),
            invites: PendingInvites::default(),
            visible: VisibleLobbies::new(),
            lobby_ids: HashMap::new(),
            known_flags: HashMap::new(),
            nicknames: HashMap::new(),
            default_nick: DEFAULT_NICKNAME.to_string(),
            partial: PartialMessages::new(),
            flood: FloodGuard::new(),
            time_shift: TimeShiftStats::default(),
            last_lobby_challenge_time: None,
            // random start so a restart does not reuse recent sequence numbers
            next_msg_id: u64::from(rand::random::<u32>()) << 16,
        }
    }

    pub fn next_msg_id(&mut self) -> u64 {
        let id = self.next_msg_id;
        self.next_msg_id = self.next_msg_id.wrapping_add(1);
        id
    }

    pub fn nick_for(&self, lobby_id: &LobbyId) -> String {
        self.nicknames
            .get(lobby_id)
            .cloned()
            .unwrap_or_else(|| self.default_nick.clone())
    }

    pub fn flags_for(&self, lobby_id: &LobbyId) -> LobbyFlags {
        self.lobbies
            .get(lobby_id)
            .map(|l| l.flags)
            .or_else(|| self.known_flags.get(lobby_id).copied())
            .unwrap_or_default()
    }

    /// Header for a new object originating here, `None` if not subscribed.
    pub fn locked_init_bounce_header(
        &mut self,
        lobby_id: LobbyId,
        ctx: &Ctx<'_>,
    ) -> Option<BounceHeader> {
        if !self.lobbies.contains_key(&lobby_id) {
            return None;
        }
        Some(BounceHeader {
            lobby_id,
            msg_id: self.next_msg_id(),
            origin: ctx.own_id,
            nick: self.nick_for(&lobby_id),
            send_time: ctx.now,
        })
    }

    pub fn insert_lobby(&mut self, entry: LobbyEntry) {
        let lobby_id = entry.lobby_id;
        self.lobby_ids.insert(entry.virtual_peer_id, lobby_id);
        self.known_flags.insert(lobby_id, entry.flags);
        self.lobbies.insert(lobby_id, entry);
    }

    /// Tear down a subscribed lobby. Flags and nickname stay.
    pub fn remove_lobby(&mut self, lobby_id: LobbyId) -> Option<LobbyEntry> {
        let entry = self.lobbies.remove(&lobby_id)?;
        self.lobby_ids.remove(&entry.virtual_peer_id);
        self.partial.forget_lobby(lobby_id);
        self.flood.forget_lobby(lobby_id);
        Some(entry)
    }

    /// Everything that must survive a restart.
    pub fn save_list(&self) -> Vec<SavedItem> {
        let mut items = vec![SavedItem::DefaultNickname(self.default_nick.clone())];

        let mut nicknames: Vec<_> = self.nicknames.iter().collect();
        nicknames.sort();
        items.extend(nicknames.into_iter().map(|(id, nick)| SavedItem::LobbyNickname {
            lobby_id: *id,
            nick: nick.clone(),
        }));

        let mut flags: Vec<_> = self.known_flags.iter().collect();
        flags.sort_by_key(|(id, _)| **id);
        items.extend(flags.into_iter().map(|(id, flags)| SavedItem::LobbyFlags {
            lobby_id: *id,
            flags: *flags,
        }));

        let mut lobbies: Vec<&LobbyEntry> = self.lobbies.values().collect();
        lobbies.sort_by_key(|l| l.lobby_id);
        items.extend(lobbies.into_iter().map(|l| {
            let mut known_peers: Vec<PeerId> = l.previously_known_peers.iter().copied().collect();
            known_peers.sort();
            SavedItem::SubscribedLobby {
                lobby_id: l.lobby_id,
                name: l.name.clone(),
                topic: l.topic.clone(),
                flags: l.flags,
                known_peers,
            }
        }));

        items
    }

    pub fn load_item(&mut self, item: SavedItem, now: i64) {
        debug!(kind = item.kind(), "Restoring saved lobby item");
        match item {
            SavedItem::DefaultNickname(nick) => self.default_nick = nick,
            SavedItem::LobbyNickname { lobby_id, nick } => {
                self.nicknames.insert(lobby_id, nick);
            }
            SavedItem::LobbyFlags { lobby_id, flags } => {
                self.known_flags.insert(lobby_id, flags);
                if let Some(lobby) = self.lobbies.get_mut(&lobby_id) {
                    lobby.flags = flags;
                }
            }
            SavedItem::SubscribedLobby {
                lobby_id,
                name,
                topic,
                flags,
                known_peers,
            } => {
                let mut entry = LobbyEntry::new(lobby_id, name, topic, flags, now);
                for peer in known_peers {
                    entry.add_participant(peer);
                }
                self.insert_lobby(entry);
            }
        }
    }
}

pub(crate) fn validate_nickname(nick: &str) -> Result<String, LobbyError> {
    let nick = nick.trim();
    if nick.is_empty() || nick.chars().count() > MAX_NICKNAME_LEN {
        return Err(LobbyError::InvalidNickname(nick.to_string()));
    }
    Ok(nick.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_and_load_roundtrip() {
        let mut state = LobbyState::new();
        state.default_nick = "alice".to_string();
        state.nicknames.insert(LobbyId(3), "ally".to_string());
        let mut entry = LobbyEntry::new(
            LobbyId(3),
            "Team".to_string(),
            "work".to_string(),
            LobbyFlags::from_bits(LobbyFlags::PUBLIC),
            0,
        );
        entry.add_participant(PeerId([8u8; 16]));
        state.insert_lobby(entry);
        state
            .known_flags
            .insert(LobbyId(9), LobbyFlags::from_bits(LobbyFlags::AUTO_SUBSCRIBE));

        let saved = state.save_list();

        let mut restored = LobbyState::new();
        for item in saved.clone() {
            restored.load_item(item, 100);
        }

        assert_eq!(restored.save_list(), saved);
        assert_eq!(restored.nick_for(&LobbyId(3)), "ally");
        assert_eq!(restored.nick_for(&LobbyId(4)), "alice");
        assert!(restored.flags_for(&LobbyId(9)).auto_subscribe());
        assert!(restored.lobbies[&LobbyId(3)]
            .participating_peers
            .contains(&PeerId([8u8; 16])));
    }

    #[test]
    fn test_remove_lobby_keeps_flags_and_nick() {
        let mut state = LobbyState::new();
        state.nicknames.insert(LobbyId(1), "n".to_string());
        state.insert_lobby(LobbyEntry::new(
            LobbyId(1),
            String::new(),
            String::new(),
            LobbyFlags::from_bits(LobbyFlags::AUTO_SUBSCRIBE),
            0,
        ));

        assert!(state.remove_lobby(LobbyId(1)).is_some());
        assert!(state.lobby_ids.is_empty());
        assert!(state.flags_for(&LobbyId(1)).auto_subscribe());
        assert_eq!(state.nick_for(&LobbyId(1)), "n");
    }

    #[test]
    fn test_nickname_validation() {
        assert_eq!(validate_nickname("  bob ").unwrap(), "bob");
        assert!(validate_nickname("   ").is_err());
        assert!(validate_nickname(&"x".repeat(MAX_NICKNAME_LEN + 1)).is_err());
    }
}
