//! The distributed chat engine.
//!
//! [`DistributedChat`] owns all lobby state behind one mutex. Every entry
//! point snapshots the friend directory and the clock, runs the state
//! transition under the lock, then flushes outbound items, deliveries,
//! notifications and saves with the lock released. Collaborators are
//! therefore free to call back into the engine.

use std::collections::HashSet;
use std::sync::Arc;

use lobby_shared::crypto::is_virtual_peer_id;
use lobby_shared::{LobbyEventKind, LobbyId, LobbyItem, LobbyPrivacy, PeerId};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::cache::LobbyInfo;
use crate::config::LobbyConfig;
use crate::discovery::{PendingInvite, VisibleLobbyRecord};
use crate::error::LobbyError;
use crate::events::SavedItem;
use crate::ports::{Clock, Directory, LobbySink, Persistence, Transport};
use crate::state::{Ctx, LobbyState, Outbox};

/// Collaborators handed to [`DistributedChat::new`].
pub struct Collaborators {
    pub directory: Arc<dyn Directory>,
    pub transport: Arc<dyn Transport>,
    pub persistence: Arc<dyn Persistence>,
    pub sink: Arc<dyn LobbySink>,
    pub clock: Arc<dyn Clock>,
}

pub struct DistributedChat {
    config: LobbyConfig,
    state: Mutex<LobbyState>,
    directory: Arc<dyn Directory>,
    transport: Arc<dyn Transport>,
    persistence: Arc<dyn Persistence>,
    sink: Arc<dyn LobbySink>,
    clock: Arc<dyn Clock>,
}

impl DistributedChat {
    /// Build the engine and restore saved configuration.
    ///
    /// A failing load is logged and the engine starts empty.
    pub fn new(config: LobbyConfig, collaborators: Collaborators) -> Self {
        let Collaborators {
            directory,
            transport,
            persistence,
            sink,
            clock,
        } = collaborators;

        let mut state = LobbyState::new();
        match persistence.load_items() {
            Ok(items) => {
                let now = clock.now();
                let count = items.len();
                for item in items {
                    state.load_item(item, now);
                }
                info!(items = count, lobbies = state.lobbies.len(), "Lobby configuration restored");
            }
            Err(e) => warn!(error = %e, "Failed to load lobby configuration, starting empty"),
        }

        Self {
            config,
            state: Mutex::new(state),
            directory,
            transport,
            persistence,
            sink,
            clock,
        }
    }

    pub fn config(&self) -> &LobbyConfig {
        &self.config
    }

    fn online_peers(&self) -> HashSet<PeerId> {
        self.directory
            .connected_peers()
            .into_iter()
            .filter(|p| {
                self.directory
                    .peer_offers_service(p, self.config.service_type)
            })
            .collect()
    }

    /// Run `f` under the lock, then flush its side effects.
    fn with_state<R>(&self, f: impl FnOnce(&mut LobbyState, &Ctx<'_>, &mut Outbox) -> R) -> R {
        let online = self.online_peers();
        let ctx = Ctx {
            config: &self.config,
            own_id: self.directory.own_id(),
            now: self.clock.now(),
            online: &online,
        };
        let mut out = Outbox::default();

        let (result, saved) = {
            let mut state = self.state.lock();
            let result = f(&mut *state, &ctx, &mut out);
            let saved = out.save.then(|| state.save_list());
            (result, saved)
        };

        self.flush(out, saved);
        result
    }

    fn flush(&self, out: Outbox, saved: Option<Vec<SavedItem>>) {
        for (to, item) in out.sends {
            self.transport.send_item(to, item);
        }
        for message in out.delivered {
            self.sink.deliver(message);
        }
        for note in out.notes {
            self.sink.notify(note);
        }
        if let Some(items) = saved {
            self.save(&items);
        }
    }

    fn save(&self, items: &[SavedItem]) {
        if let Err(e) = self.persistence.save_items(items) {
            warn!(error = %e, "Failed to save lobby configuration");
        }
    }

    /// Entry point for every item received from friend `from`.
    pub fn handle_recv_item(&self, item: LobbyItem, from: PeerId) {
        if is_virtual_peer_id(&from) || from == self.directory.own_id() {
            warn!(peer = %from.short(), kind = item.kind(), "Item from invalid source, dropping");
            return;
        }
        debug!(peer = %from.short(), kind = item.kind(), "Lobby item received");

        self.with_state(|state, ctx, out| match item {
            LobbyItem::Msg(_) | LobbyItem::Event(_) => state.recv_bounced(item, from, ctx, out),
            LobbyItem::Invite(invite) => state.handle_recv_lobby_invite(invite, from, ctx, out),
            LobbyItem::ListRequest => state.handle_list_request(from, out),
            LobbyItem::List(infos) => state.handle_list(infos, from, ctx, out),
            LobbyItem::ConnectChallenge { challenge_code } => {
                state.handle_connection_challenge(challenge_code, from, ctx, out)
            }
            LobbyItem::Unsubscribe { lobby_id } => {
                state.handle_friend_unsubscribe(lobby_id, from, out)
            }
        });
    }

    /// Periodic maintenance, meant to run about once per second.
    pub fn tick(&self) {
        self.with_state(|state, ctx, out| state.locked_housekeeping(ctx, out));
    }

    /// Send a chat message to a subscribed lobby. Returns its message id.
    pub fn send_lobby_chat(&self, lobby_id: LobbyId, text: &str) -> Result<u64, LobbyError> {
        self.with_state(|state, ctx, out| state.send_lobby_chat(lobby_id, text, ctx, out))
    }

    /// Private message addressed to a lobby's virtual peer id.
    pub fn send_to_virtual_peer(&self, peer: &PeerId, text: &str) -> Result<u64, LobbyError> {
        let lobby_id = self
            .is_lobby_id(peer)
            .ok_or(LobbyError::NotALobby(*peer))?;
        self.send_lobby_chat(lobby_id, text)
    }

    pub fn send_lobby_status_string(&self, lobby_id: LobbyId, text: &str) -> Result<(), LobbyError> {
        self.with_state(|state, ctx, out| {
            state.send_lobby_event(lobby_id, LobbyEventKind::Status(text.to_string()), ctx, out)
        })
    }

    pub fn get_virtual_peer_id(&self, lobby_id: LobbyId) -> Option<PeerId> {
        self.state
            .lock()
            .lobbies
            .get(&lobby_id)
            .map(|l| l.virtual_peer_id)
    }

    /// Lobby behind a virtual peer id, if it is one of ours.
    pub fn is_lobby_id(&self, peer: &PeerId) -> Option<LobbyId> {
        self.state.lock().lobby_ids.get(peer).copied()
    }

    pub fn get_chat_lobby_list(&self) -> Vec<LobbyInfo> {
        let state = self.state.lock();
        let mut list: Vec<LobbyInfo> = state.lobbies.values().map(|l| l.info()).collect();
        list.sort_by(|a, b| a.name.cmp(&b.name).then(a.lobby_id.cmp(&b.lobby_id)));
        list
    }

    pub fn get_pending_chat_lobby_invites(&self) -> Vec<PendingInvite> {
        let state = self.state.lock();
        let mut invites: Vec<PendingInvite> = state.invites.values().cloned().collect();
        invites.sort_by_key(|i| i.lobby_id);
        invites
    }

    pub fn accept_lobby_invite(&self, lobby_id: LobbyId) -> Result<(), LobbyError> {
        self.with_state(|state, ctx, out| state.accept_invite(lobby_id, ctx, out))
    }

    pub fn deny_lobby_invite(&self, lobby_id: LobbyId) -> bool {
        self.state.lock().deny_invite(lobby_id)
    }

    pub fn invite_peer_to_lobby(
        &self,
        lobby_id: LobbyId,
        peer: PeerId,
        connection_challenge: bool,
    ) -> Result<(), LobbyError> {
        self.with_state(|state, _, out| {
            if state.locked_invite_peer(lobby_id, peer, connection_challenge, out) {
                Ok(())
            } else {
                Err(LobbyError::NotSubscribed(lobby_id))
            }
        })
    }

    pub fn create_chat_lobby(
        &self,
        name: &str,
        topic: &str,
        invited: &[PeerId],
        privacy: LobbyPrivacy,
    ) -> LobbyId {
        self.with_state(|state, ctx, out| state.create_lobby(name, topic, invited, privacy, ctx, out))
    }

    pub fn unsubscribe_chat_lobby(&self, lobby_id: LobbyId) -> Result<(), LobbyError> {
        self.with_state(|state, ctx, out| state.unsubscribe(lobby_id, ctx, out))
    }

    pub fn set_nickname_for_chat_lobby(&self, lobby_id: LobbyId, nick: &str) -> Result<(), LobbyError> {
        self.with_state(|state, ctx, out| state.set_lobby_nickname(lobby_id, nick, ctx, out))
    }

    pub fn get_nickname_for_chat_lobby(&self, lobby_id: LobbyId) -> String {
        self.state.lock().nick_for(&lobby_id)
    }

    pub fn set_default_nickname(&self, nick: &str) -> Result<(), LobbyError> {
        self.with_state(|state, _, out| state.set_default_nickname(nick, out))
    }

    pub fn get_default_nickname(&self) -> String {
        self.state.lock().default_nick.clone()
    }

    pub fn set_lobby_auto_subscribe(&self, lobby_id: LobbyId, on: bool) {
        self.with_state(|state, _, out| state.set_auto_subscribe(lobby_id, on, out));
    }

    pub fn get_lobby_auto_subscribe(&self, lobby_id: LobbyId) -> bool {
        self.state.lock().flags_for(&lobby_id).auto_subscribe()
    }

    /// Lobbies advertised by friends. Also asks connected friends for a
    /// fresh list, unless one was requested recently.
    pub fn get_list_of_nearby_chat_lobbies(&self) -> Vec<VisibleLobbyRecord> {
        self.with_state(|state, ctx, out| {
            state.request_visible_lobbies(ctx, out);
            state.visible.list()
        })
    }

    pub fn join_visible_chat_lobby(&self, lobby_id: LobbyId) -> Result<(), LobbyError> {
        self.with_state(|state, ctx, out| state.join_visible(lobby_id, ctx, out))
    }

    /// Challenge non-participating friends for `lobby_id` right away.
    pub fn send_connection_challenge(&self, lobby_id: LobbyId) -> bool {
        self.with_state(|state, ctx, out| state.send_connection_challenge(lobby_id, ctx, out))
    }

    pub fn time_shift_average(&self) -> f64 {
        self.state.lock().time_shift.average()
    }

    /// Persist the current configuration.
    pub fn shutdown(&self) {
        let items = self.state.lock().save_list();
        self.save(&items);
        info!(items = items.len(), "Lobby configuration saved");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PersistenceError;
    use crate::events::{DeliveredMessage, LobbyNotification};
    use crate::ports::ManualClock;
    use lobby_shared::crypto::challenge_code;
    use lobby_shared::{BounceHeader, Fragment, LobbyEvent, LobbyInvite, LobbyMsg};

    const T0: i64 = 1_700_000_000;

    struct FakeDirectory {
        own: PeerId,
        peers: Mutex<Vec<PeerId>>,
    }

    impl Directory for FakeDirectory {
        fn own_id(&self) -> PeerId {
            self.own
        }

        fn connected_peers(&self) -> Vec<PeerId> {
            self.peers.lock().clone()
        }

        fn peer_offers_service(&self, _peer: &PeerId, _service_type: u32) -> bool {
            true
        }
    }

    #[derive(Default)]
    struct FakeTransport {
        sent: Mutex<Vec<(PeerId, LobbyItem)>>,
    }

    impl FakeTransport {
        fn take(&self) -> Vec<(PeerId, LobbyItem)> {
            std::mem::take(&mut *self.sent.lock())
        }
    }

    impl Transport for FakeTransport {
        fn send_item(&self, to: PeerId, item: LobbyItem) {
            self.sent.lock().push((to, item));
        }
    }

    #[derive(Default)]
    struct FakeSink {
        delivered: Mutex<Vec<DeliveredMessage>>,
        notes: Mutex<Vec<LobbyNotification>>,
    }

    impl LobbySink for FakeSink {
        fn deliver(&self, message: DeliveredMessage) {
            self.delivered.lock().push(message);
        }

        fn notify(&self, note: LobbyNotification) {
            self.notes.lock().push(note);
        }
    }

    #[derive(Default)]
    struct MemoryPersistence {
        items: Mutex<Vec<SavedItem>>,
        fail: bool,
    }

    impl Persistence for MemoryPersistence {
        fn load_items(&self) -> Result<Vec<SavedItem>, PersistenceError> {
            Ok(self.items.lock().clone())
        }

        fn save_items(&self, items: &[SavedItem]) -> Result<(), PersistenceError> {
            if self.fail {
                return Err(PersistenceError::Storage("disk full".to_string()));
            }
            *self.items.lock() = items.to_vec();
            Ok(())
        }
    }

    struct Harness {
        chat: DistributedChat,
        directory: Arc<FakeDirectory>,
        transport: Arc<FakeTransport>,
        sink: Arc<FakeSink>,
        persistence: Arc<MemoryPersistence>,
        clock: Arc<ManualClock>,
    }

    fn peer(n: u8) -> PeerId {
        PeerId([n; 16])
    }

    fn harness_with(persistence: Arc<MemoryPersistence>, friends: &[PeerId]) -> Harness {
        let directory = Arc::new(FakeDirectory {
            own: peer(1),
            peers: Mutex::new(friends.to_vec()),
        });
        let transport = Arc::new(FakeTransport::default());
        let sink = Arc::new(FakeSink::default());
        let clock = Arc::new(ManualClock::new(T0));
        let chat = DistributedChat::new(
            LobbyConfig::default(),
            Collaborators {
                directory: directory.clone(),
                transport: transport.clone(),
                persistence: persistence.clone(),
                sink: sink.clone(),
                clock: clock.clone(),
            },
        );
        Harness {
            chat,
            directory,
            transport,
            sink,
            persistence,
            clock,
        }
    }

    fn harness(friends: &[PeerId]) -> Harness {
        harness_with(Arc::new(MemoryPersistence::default()), friends)
    }

    fn header(lobby_id: LobbyId, origin: PeerId, msg_id: u64, send_time: i64) -> BounceHeader {
        BounceHeader {
            lobby_id,
            msg_id,
            origin,
            nick: format!("nick-{}", origin.0[0]),
            send_time,
        }
    }

    fn chat_msg(lobby_id: LobbyId, origin: PeerId, msg_id: u64, text: &str) -> LobbyItem {
        LobbyItem::Msg(LobbyMsg {
            header: header(lobby_id, origin, msg_id, T0),
            text: text.to_string(),
            fragment: None,
        })
    }

    /// A lobby where peers 2 and 3 participate.
    fn joined_lobby(h: &Harness) -> LobbyId {
        let lobby = h
            .chat
            .create_chat_lobby("Team", "work", &[], LobbyPrivacy::Public);
        h.chat
            .handle_recv_item(LobbyItem::Invite(invite(lobby, true)), peer(2));
        h.chat
            .handle_recv_item(LobbyItem::Invite(invite(lobby, true)), peer(3));
        h.transport.take();
        lobby
    }

    fn invite(lobby_id: LobbyId, connection_challenge: bool) -> LobbyInvite {
        LobbyInvite {
            lobby_id,
            lobby_name: "Team".to_string(),
            lobby_topic: "work".to_string(),
            flags: lobby_shared::LobbyFlags::for_privacy(LobbyPrivacy::Public),
            connection_challenge,
        }
    }

    #[test]
    fn test_new_message_delivered_once_and_forwarded_except_sender() {
        let h = harness(&[peer(2), peer(3), peer(4)]);
        let lobby = joined_lobby(&h);

        h.chat
            .handle_recv_item(chat_msg(lobby, peer(9), 5, "hello"), peer(2));
        h.chat
            .handle_recv_item(chat_msg(lobby, peer(9), 5, "hello"), peer(3));

        let delivered = h.sink.delivered.lock().clone();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].text, "hello");
        assert!(!delivered[0].outgoing);

        let sent = h.transport.take();
        let targets: Vec<PeerId> = sent.iter().map(|(to, _)| *to).collect();
        // peer 4 is connected but outside the lobby graph
        assert_eq!(targets, vec![peer(3)]);
    }

    #[test]
    fn test_unknown_lobby_dropped_without_state() {
        let h = harness(&[peer(2)]);

        h.chat
            .handle_recv_item(chat_msg(LobbyId(404), peer(9), 1, "x"), peer(2));

        assert!(h.sink.delivered.lock().is_empty());
        assert!(h.transport.take().is_empty());
        assert!(h.chat.get_chat_lobby_list().is_empty());
    }

    #[test]
    fn test_flood_budget_drops_excess() {
        let h = harness(&[peer(2)]);
        let lobby = joined_lobby(&h);
        // estimate is the two participating friends
        let budget = h.chat.config().flood.budget(2) as u64;

        for msg_id in 0..=budget {
            h.chat
                .handle_recv_item(chat_msg(lobby, peer(9), 100 + msg_id, "spam"), peer(2));
        }

        assert_eq!(h.sink.delivered.lock().len() as u64, budget);

        h.clock.advance(h.chat.config().flood.window_secs);
        h.chat
            .handle_recv_item(chat_msg(lobby, peer(9), 999, "later"), peer(2));
        assert_eq!(h.sink.delivered.lock().len() as u64, budget + 1);
    }

    #[test]
    fn test_outdated_object_refused() {
        let h = harness(&[peer(2)]);
        let lobby = joined_lobby(&h);
        let horizon = h.chat.config().replay_horizon_secs();

        let old = LobbyItem::Msg(LobbyMsg {
            header: header(lobby, peer(9), 1, T0 - horizon - 1),
            text: "replayed".to_string(),
            fragment: None,
        });
        h.chat.handle_recv_item(old, peer(2));

        assert!(h.sink.delivered.lock().is_empty());
        assert!(h.transport.take().is_empty());
    }

    #[test]
    fn test_seen_object_dropped_until_cache_expiry() {
        let h = harness(&[peer(2)]);
        let lobby = joined_lobby(&h);
        let retention = h.chat.config().msg_cache_retention_secs;

        let item = LobbyItem::Msg(LobbyMsg {
            header: header(lobby, peer(9), 1, T0 + retention),
            text: "again".to_string(),
            fragment: None,
        });
        h.chat.handle_recv_item(item.clone(), peer(2));
        h.clock.advance(retention - 1);
        h.chat.tick();
        h.chat.handle_recv_item(item.clone(), peer(2));
        assert_eq!(h.sink.delivered.lock().len(), 1);

        h.clock.advance(2);
        h.chat.tick();
        h.chat.handle_recv_item(item, peer(2));
        assert_eq!(h.sink.delivered.lock().len(), 2);
    }

    #[test]
    fn test_fragments_reassembled_into_one_delivery() {
        let h = harness(&[peer(2)]);
        let lobby = joined_lobby(&h);

        for (index, text) in [(1u16, "world"), (0, "hello ")] {
            let item = LobbyItem::Msg(LobbyMsg {
                header: header(lobby, peer(9), 50 + u64::from(index), T0),
                text: text.to_string(),
                fragment: Some(Fragment {
                    parent_msg_id: 40,
                    index,
                    total: 2,
                }),
            });
            h.chat.handle_recv_item(item, peer(2));
        }

        let delivered = h.sink.delivered.lock().clone();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].text, "hello world");
        assert_eq!(delivered[0].msg_id, 40);
    }

    #[test]
    fn test_large_outgoing_message_fragmented() {
        let h = harness(&[peer(2)]);
        let lobby = joined_lobby(&h);
        let size = h.chat.config().max_fragment_size;
        let text = "a".repeat(size * 2 + 10);

        h.chat.send_lobby_chat(lobby, &text).unwrap();

        let sent = h.transport.take();
        assert_eq!(sent.len(), 3);
        assert!(sent.iter().all(|(_, item)| matches!(
            item,
            LobbyItem::Msg(LobbyMsg { fragment: Some(f), .. }) if f.total == 3
        )));

        let delivered = h.sink.delivered.lock().clone();
        assert_eq!(delivered.len(), 1);
        assert!(delivered[0].outgoing);
        assert_eq!(delivered[0].text.len(), text.len());
    }

    #[test]
    fn test_message_larger_than_flood_budget_sent_whole() {
        let h = harness(&[peer(2)]);
        let lobby = joined_lobby(&h);
        let size = h.chat.config().max_fragment_size;
        let budget = h.chat.config().flood.budget(2);
        let text = "b".repeat(size * 12);
        assert!(12 > budget);

        h.chat.send_lobby_chat(lobby, &text).unwrap();

        let sent = h.transport.take();
        assert_eq!(sent.len(), 12);
        assert!(sent.iter().all(|(to, _)| *to == peer(2)));
        let delivered = h.sink.delivered.lock().clone();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].text, text);

        // the whole message used one admission
        assert!(h.chat.send_lobby_chat(lobby, "after").is_ok());
    }

    #[test]
    fn test_received_fragments_beyond_flood_budget_reassembled() {
        let h = harness(&[peer(2), peer(3)]);
        let lobby = joined_lobby(&h);
        let total = 12u16;
        assert!(u32::from(total) > h.chat.config().flood.budget(2));

        for index in 0..total {
            let item = LobbyItem::Msg(LobbyMsg {
                header: header(lobby, peer(9), 200 + u64::from(index), T0),
                text: index.to_string(),
                fragment: Some(Fragment {
                    parent_msg_id: 199,
                    index,
                    total,
                }),
            });
            h.chat.handle_recv_item(item, peer(2));
        }

        let delivered = h.sink.delivered.lock().clone();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].msg_id, 199);
        assert_eq!(delivered[0].text, "01234567891011");
        assert_eq!(h.transport.take().len(), usize::from(total));
    }

    #[test]
    fn test_repeated_fragment_index_charged_to_budget() {
        let h = harness(&[peer(2)]);
        let lobby = joined_lobby(&h);
        let budget = h.chat.config().flood.budget(2) as u64;

        // index 0 again and again under fresh ids never completes the message
        for msg_id in 0..=budget {
            let item = LobbyItem::Msg(LobbyMsg {
                header: header(lobby, peer(9), 300 + msg_id, T0),
                text: "x".to_string(),
                fragment: Some(Fragment {
                    parent_msg_id: 299,
                    index: 0,
                    total: 2,
                }),
            });
            h.chat.handle_recv_item(item, peer(2));
        }

        let last = LobbyItem::Msg(LobbyMsg {
            header: header(lobby, peer(9), 400, T0),
            text: "y".to_string(),
            fragment: Some(Fragment {
                parent_msg_id: 299,
                index: 1,
                total: 2,
            }),
        });
        h.chat.handle_recv_item(last, peer(2));
        assert_eq!(h.sink.delivered.lock().len(), 1);

        h.chat
            .handle_recv_item(chat_msg(lobby, peer(9), 500, "over"), peer(2));
        assert_eq!(h.sink.delivered.lock().len(), 1);
    }

    #[test]
    fn test_extreme_send_times_do_not_overflow() {
        let h = harness(&[peer(2)]);
        let lobby = joined_lobby(&h);

        for (msg_id, send_time) in [(1, i64::MIN), (2, i64::MAX)] {
            let item = LobbyItem::Msg(LobbyMsg {
                header: header(lobby, peer(9), msg_id, send_time),
                text: format!("at {send_time}"),
                fragment: None,
            });
            h.chat.handle_recv_item(item, peer(2));
        }
        h.chat.tick();

        let delivered = h.sink.delivered.lock().clone();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].send_time, i64::MAX);
    }

    #[test]
    fn test_local_send_errors() {
        let h = harness(&[peer(2)]);
        assert_eq!(
            h.chat.send_lobby_chat(LobbyId(7), "hi"),
            Err(LobbyError::NotSubscribed(LobbyId(7)))
        );
        assert_eq!(
            h.chat.send_to_virtual_peer(&peer(2), "hi"),
            Err(LobbyError::NotALobby(peer(2)))
        );

        let lobby = joined_lobby(&h);
        let budget = h.chat.config().flood.budget(2);
        let results: Vec<_> = (0..=budget)
            .map(|_| h.chat.send_lobby_chat(lobby, "x"))
            .collect();
        assert_eq!(
            results.last().cloned(),
            Some(Err(LobbyError::FloodLimited(lobby)))
        );
    }

    #[test]
    fn test_virtual_peer_redirect() {
        let h = harness(&[peer(2)]);
        let lobby = joined_lobby(&h);
        let vpid = h.chat.get_virtual_peer_id(lobby).unwrap();

        assert_eq!(h.chat.is_lobby_id(&vpid), Some(lobby));
        h.chat.send_to_virtual_peer(&vpid, "via virtual").unwrap();

        let sent = h.transport.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, peer(2));
    }

    #[test]
    fn test_invite_accept_and_unsubscribe_round_trip() {
        let h = harness(&[peer(2)]);
        let lobby = LobbyId(77);

        h.chat
            .handle_recv_item(LobbyItem::Invite(invite(lobby, false)), peer(2));
        assert_eq!(h.chat.get_pending_chat_lobby_invites().len(), 1);
        assert!(matches!(
            h.sink.notes.lock().first(),
            Some(LobbyNotification::InviteReceived { .. })
        ));

        h.chat.accept_lobby_invite(lobby).unwrap();
        assert!(h.chat.get_pending_chat_lobby_invites().is_empty());
        let sent = h.transport.take();
        assert!(matches!(
            &sent[..],
            [(to, LobbyItem::Event(LobbyEvent { kind: LobbyEventKind::PeerJoined, .. }))] if *to == peer(2)
        ));
        let vpid = h.chat.get_virtual_peer_id(lobby).unwrap();

        h.chat.unsubscribe_chat_lobby(lobby).unwrap();
        let sent = h.transport.take();
        assert!(sent.iter().any(|(_, item)| matches!(
            item,
            LobbyItem::Event(LobbyEvent { kind: LobbyEventKind::PeerLeft, .. })
        )));
        assert!(sent
            .iter()
            .any(|(_, item)| *item == LobbyItem::Unsubscribe { lobby_id: lobby }));
        assert!(h.chat.get_chat_lobby_list().is_empty());
        assert_eq!(h.chat.is_lobby_id(&vpid), None);

        // traffic for the lobby is now dropped
        h.chat
            .handle_recv_item(chat_msg(lobby, peer(9), 1, "late"), peer(2));
        assert!(h.sink.delivered.lock().is_empty());
    }

    #[test]
    fn test_accept_unknown_invite_fails() {
        let h = harness(&[]);
        assert_eq!(
            h.chat.accept_lobby_invite(LobbyId(5)),
            Err(LobbyError::UnknownInvite(LobbyId(5)))
        );
        assert!(!h.chat.deny_lobby_invite(LobbyId(5)));
    }

    #[test]
    fn test_challenge_invite_for_unknown_lobby_ignored() {
        let h = harness(&[peer(2)]);
        h.chat
            .handle_recv_item(LobbyItem::Invite(invite(LobbyId(3), true)), peer(2));
        assert!(h.chat.get_pending_chat_lobby_invites().is_empty());
    }

    #[test]
    fn test_offline_participant_not_targeted() {
        let h = harness(&[peer(2), peer(3)]);
        let lobby = joined_lobby(&h);

        h.directory.peers.lock().retain(|p| *p != peer(3));
        h.chat.send_lobby_chat(lobby, "hi").unwrap();

        let targets: Vec<PeerId> = h.transport.take().into_iter().map(|(to, _)| to).collect();
        assert_eq!(targets, vec![peer(2)]);
    }

    #[test]
    fn test_friend_unsubscribe_removes_participant() {
        let h = harness(&[peer(2), peer(3)]);
        let lobby = joined_lobby(&h);

        h.chat
            .handle_recv_item(LobbyItem::Unsubscribe { lobby_id: lobby }, peer(3));
        h.chat.send_lobby_chat(lobby, "hi").unwrap();

        let targets: Vec<PeerId> = h.transport.take().into_iter().map(|(to, _)| to).collect();
        assert_eq!(targets, vec![peer(2)]);
    }

    #[test]
    fn test_unsubscribe_drops_visible_lobby_without_advertiser() {
        let h = harness(&[peer(2)]);
        let info = lobby_shared::VisibleLobbyInfo {
            lobby_id: LobbyId(10),
            name: "L10".to_string(),
            topic: String::new(),
            member_count: 3,
            flags: lobby_shared::LobbyFlags::for_privacy(LobbyPrivacy::Public),
        };
        h.chat.get_list_of_nearby_chat_lobbies();
        h.chat.handle_recv_item(LobbyItem::List(vec![info]), peer(2));
        assert_eq!(h.chat.get_list_of_nearby_chat_lobbies().len(), 1);

        h.chat
            .handle_recv_item(LobbyItem::Unsubscribe { lobby_id: LobbyId(10) }, peer(2));
        assert!(h.chat.get_list_of_nearby_chat_lobbies().is_empty());
    }

    #[test]
    fn test_pending_invites_capped_and_expired() {
        let h = harness(&[peer(2), peer(3)]);
        let per_peer = h.chat.config().max_invites_per_peer as u64;

        for n in 0..=per_peer {
            h.chat
                .handle_recv_item(LobbyItem::Invite(invite(LobbyId(100 + n), false)), peer(2));
        }
        assert_eq!(
            h.chat.get_pending_chat_lobby_invites().len() as u64,
            per_peer
        );
        let notes = h
            .sink
            .notes
            .lock()
            .iter()
            .filter(|n| matches!(n, LobbyNotification::InviteReceived { .. }))
            .count() as u64;
        assert_eq!(notes, per_peer);

        // other friends keep their own share
        h.chat
            .handle_recv_item(LobbyItem::Invite(invite(LobbyId(200), false)), peer(3));
        assert_eq!(
            h.chat.get_pending_chat_lobby_invites().len() as u64,
            per_peer + 1
        );

        h.clock.advance(h.chat.config().invite_timeout_secs);
        h.chat.tick();
        assert!(h.chat.get_pending_chat_lobby_invites().is_empty());
    }

    #[test]
    fn test_connection_challenge_handshake() {
        let h = harness(&[peer(2), peer(5)]);
        let lobby = joined_lobby(&h);
        h.chat
            .handle_recv_item(chat_msg(lobby, peer(9), 31, "recent"), peer(2));
        h.transport.take();

        // peer 5 proves it saw message 31 in this lobby
        let code = challenge_code(&peer(5), lobby, 31);
        h.chat
            .handle_recv_item(LobbyItem::ConnectChallenge { challenge_code: code }, peer(5));

        let sent = h.transport.take();
        assert!(matches!(
            &sent[..],
            [(to, LobbyItem::Invite(LobbyInvite { connection_challenge: true, .. }))] if *to == peer(5)
        ));
        let info = h.chat.get_chat_lobby_list().remove(0);
        assert!(info.participating_peers.contains(&peer(5)));

        // a wrong code changes nothing
        h.chat
            .handle_recv_item(LobbyItem::ConnectChallenge { challenge_code: code ^ 1 }, peer(6));
        assert!(h.transport.take().is_empty());
    }

    #[test]
    fn test_challenge_sent_to_non_participants_and_rate_limited() {
        let h = harness(&[peer(2), peer(5)]);
        let lobby = joined_lobby(&h);
        h.chat
            .handle_recv_item(chat_msg(lobby, peer(9), 31, "recent"), peer(2));
        h.transport.take();

        assert!(h.chat.send_connection_challenge(lobby));
        let sent = h.transport.take();
        let expected = challenge_code(&peer(1), lobby, 31);
        assert_eq!(
            sent,
            vec![(peer(5), LobbyItem::ConnectChallenge { challenge_code: expected })]
        );

        assert!(!h.chat.send_connection_challenge(lobby));
        h.clock
            .advance(h.chat.config().challenge_min_interval_secs);
        assert!(h.chat.send_connection_challenge(lobby));
    }

    #[test]
    fn test_refused_challenge_keeps_lobby_due() {
        let h = harness(&[peer(2), peer(3), peer(5)]);
        let first = joined_lobby(&h);
        let second = joined_lobby(&h);
        let trigger = u64::from(h.chat.config().challenge_trigger_count);

        // peer 5 is online but outside both graphs
        for n in 0..=trigger {
            for lobby in [first, second] {
                h.chat
                    .handle_recv_item(chat_msg(lobby, peer(9), 1000 + n, "hint"), peer(2));
            }
            h.clock.advance(2);
        }
        h.transport.take();

        let challenges = |sent: Vec<(PeerId, LobbyItem)>| -> Vec<u64> {
            sent.into_iter()
                .filter_map(|(_, item)| match item {
                    LobbyItem::ConnectChallenge { challenge_code } => Some(challenge_code),
                    _ => None,
                })
                .collect()
        };

        // the global rate limit lets only one lobby through per interval
        h.chat.tick();
        let tick_one = challenges(h.transport.take());
        assert_eq!(tick_one.len(), 1);

        h.clock
            .advance(h.chat.config().challenge_min_interval_secs);
        h.chat.tick();
        let tick_two = challenges(h.transport.take());
        assert_eq!(tick_two.len(), 1);
        assert_ne!(tick_one, tick_two);

        h.clock
            .advance(h.chat.config().challenge_min_interval_secs);
        h.chat.tick();
        assert!(challenges(h.transport.take()).is_empty());
    }

    #[test]
    fn test_list_request_answers_public_and_participated_private() {
        let h = harness(&[peer(2), peer(3)]);
        let public = h
            .chat
            .create_chat_lobby("Open", "", &[], LobbyPrivacy::Public);
        let private = h
            .chat
            .create_chat_lobby("Closed", "", &[], LobbyPrivacy::Private);
        h.chat
            .handle_recv_item(LobbyItem::Invite(invite(private, true)), peer(3));
        h.transport.take();

        h.chat.handle_recv_item(LobbyItem::ListRequest, peer(2));
        h.chat.handle_recv_item(LobbyItem::ListRequest, peer(3));
        let sent = h.transport.take();

        let ids_for = |who: PeerId| -> Vec<LobbyId> {
            sent.iter()
                .filter(|(to, _)| *to == who)
                .flat_map(|(_, item)| match item {
                    LobbyItem::List(infos) => infos.iter().map(|i| i.lobby_id).collect(),
                    _ => Vec::new(),
                })
                .collect()
        };
        assert_eq!(ids_for(peer(2)), vec![public]);
        let mut seen_by_3 = ids_for(peer(3));
        seen_by_3.sort();
        let mut expected = vec![public, private];
        expected.sort();
        assert_eq!(seen_by_3, expected);
    }

    #[test]
    fn test_visible_lobby_join_and_auto_subscribe() {
        let h = harness(&[peer(2), peer(3)]);
        let info = |id: u64| lobby_shared::VisibleLobbyInfo {
            lobby_id: LobbyId(id),
            name: format!("L{id}"),
            topic: String::new(),
            member_count: 4,
            flags: lobby_shared::LobbyFlags::for_privacy(LobbyPrivacy::Public),
        };

        assert!(h.chat.get_list_of_nearby_chat_lobbies().is_empty());
        assert_eq!(h.transport.take().len(), 2);
        h.chat.get_list_of_nearby_chat_lobbies();
        assert!(h.transport.take().is_empty());

        h.chat.set_lobby_auto_subscribe(LobbyId(20), true);
        h.chat
            .handle_recv_item(LobbyItem::List(vec![info(10), info(20)]), peer(2));

        let nearby = h.chat.get_list_of_nearby_chat_lobbies();
        assert_eq!(nearby.len(), 2);
        assert!(h.chat.get_virtual_peer_id(LobbyId(20)).is_some());
        assert!(h.chat.get_virtual_peer_id(LobbyId(10)).is_none());

        h.transport.take();
        h.chat.join_visible_chat_lobby(LobbyId(10)).unwrap();
        let sent = h.transport.take();
        assert!(sent.iter().any(|(to, item)| *to == peer(2)
            && matches!(item, LobbyItem::Invite(LobbyInvite { connection_challenge: true, .. }))));

        assert_eq!(
            h.chat.join_visible_chat_lobby(LobbyId(30)),
            Err(LobbyError::NotVisible(LobbyId(30)))
        );
    }

    #[test]
    fn test_events_update_members() {
        let h = harness(&[peer(2)]);
        let lobby = joined_lobby(&h);
        let event = |msg_id: u64, kind: LobbyEventKind| {
            LobbyItem::Event(LobbyEvent {
                header: header(lobby, peer(9), msg_id, T0),
                kind,
            })
        };

        h.chat
            .handle_recv_item(event(1, LobbyEventKind::PeerJoined), peer(2));
        assert_eq!(h.chat.get_chat_lobby_list()[0].members, vec!["nick-9"]);

        h.chat.handle_recv_item(
            event(2, LobbyEventKind::NicknameChanged("ninth".to_string())),
            peer(2),
        );
        assert_eq!(h.chat.get_chat_lobby_list()[0].members, vec!["ninth"]);

        h.chat
            .handle_recv_item(event(3, LobbyEventKind::PeerLeft), peer(2));
        assert!(h.chat.get_chat_lobby_list()[0].members.is_empty());

        let notes = h.sink.notes.lock().clone();
        assert!(notes
            .iter()
            .any(|n| matches!(n, LobbyNotification::PeerJoined { nick, .. } if nick == "nick-9")));
        assert!(notes.iter().any(|n| matches!(
            n,
            LobbyNotification::NicknameChanged { new, .. } if new == "ninth"
        )));
    }

    #[test]
    fn test_keep_alive_sent_on_tick() {
        let h = harness(&[peer(2)]);
        joined_lobby(&h);

        h.chat.tick();
        assert!(h.transport.take().is_empty());

        h.clock.advance(h.chat.config().keep_alive_interval_secs);
        h.chat.tick();
        let sent = h.transport.take();
        assert!(matches!(
            &sent[..],
            [(_, LobbyItem::Event(LobbyEvent { kind: LobbyEventKind::KeepAlive, .. }))]
        ));
    }

    #[test]
    fn test_nickname_change_bounced_and_validated() {
        let h = harness(&[peer(2)]);
        let lobby = joined_lobby(&h);

        assert!(matches!(
            h.chat.set_nickname_for_chat_lobby(lobby, "  "),
            Err(LobbyError::InvalidNickname(_))
        ));
        h.chat.set_nickname_for_chat_lobby(lobby, "zed").unwrap();

        let sent = h.transport.take();
        assert!(matches!(
            &sent[..],
            [(_, LobbyItem::Event(LobbyEvent {
                header,
                kind: LobbyEventKind::NicknameChanged(new),
            }))] if header.nick == "guest" && new == "zed"
        ));
        assert_eq!(h.chat.get_nickname_for_chat_lobby(lobby), "zed");
        assert_eq!(h.chat.get_nickname_for_chat_lobby(LobbyId(1)), "guest");
    }

    #[test]
    fn test_time_shift_published_on_tick() {
        let h = harness(&[peer(2)]);
        let lobby = joined_lobby(&h);

        let item = LobbyItem::Msg(LobbyMsg {
            header: header(lobby, peer(9), 1, T0 - 600),
            text: "slow clock".to_string(),
            fragment: None,
        });
        h.chat.handle_recv_item(item, peer(2));
        assert_eq!(h.chat.time_shift_average(), 0.0);

        h.chat.tick();
        assert_eq!(h.chat.time_shift_average(), 600.0);
    }

    #[test]
    fn test_configuration_survives_restart() {
        let persistence = Arc::new(MemoryPersistence::default());
        let lobby = {
            let h = harness_with(persistence.clone(), &[peer(2)]);
            h.chat.set_default_nickname("alice").unwrap();
            let lobby = joined_lobby(&h);
            h.chat.set_lobby_auto_subscribe(lobby, true);
            h.chat.shutdown();
            lobby
        };

        let h = harness_with(persistence, &[peer(2)]);
        assert_eq!(h.chat.get_default_nickname(), "alice");
        assert!(h.chat.get_lobby_auto_subscribe(lobby));
        let info = h.chat.get_chat_lobby_list().remove(0);
        assert_eq!(info.lobby_id, lobby);
        assert!(info.participating_peers.contains(&peer(2)));
        assert!(!h.persistence.items.lock().is_empty());
    }

    #[test]
    fn test_save_failure_does_not_break_engine() {
        let persistence = Arc::new(MemoryPersistence {
            items: Mutex::new(Vec::new()),
            fail: true,
        });
        let h = harness_with(persistence, &[peer(2)]);

        let lobby = h
            .chat
            .create_chat_lobby("Team", "", &[], LobbyPrivacy::Public);
        assert!(h.chat.get_virtual_peer_id(lobby).is_some());
        h.chat.shutdown();
    }

    #[test]
    fn test_items_from_virtual_source_dropped() {
        let h = harness(&[peer(2)]);
        let lobby = joined_lobby(&h);
        let vpid = h.chat.get_virtual_peer_id(lobby).unwrap();

        h.chat
            .handle_recv_item(chat_msg(lobby, peer(9), 1, "spoof"), vpid);
        assert!(h.sink.delivered.lock().is_empty());
    }
}
