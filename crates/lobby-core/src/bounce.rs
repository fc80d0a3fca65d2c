//! Bounced objects: dedup, flood control, forwarding and local delivery.
//!
//! Chat messages and lobby events are flooded through the friend graph.
//! Each node forwards a new object to every participating friend except
//! the one it came from, and keeps its key long enough to drop the copies
//! that come back.

use lobby_shared::constants::MAX_FRAGMENTS;
use lobby_shared::{
    BounceHeader, Fragment, LobbyEvent, LobbyEventKind, LobbyId, LobbyItem, LobbyMsg, ObjectKey,
    PeerId,
};
use tracing::{debug, trace, warn};

use crate::error::LobbyError;
use crate::events::{DeliveredMessage, LobbyNotification};
use crate::partial::split_text;
use crate::state::{Ctx, LobbyState, Outbox};

impl LobbyState {
    /// Flood check for one message forwarded by `from`.
    ///
    /// The member count from a visible-lobby record is preferred over the
    /// local estimate when one is known.
    pub(crate) fn locked_bouncing_object_check(
        &mut self,
        lobby_id: LobbyId,
        from: PeerId,
        local_estimate: usize,
        ctx: &Ctx<'_>,
    ) -> bool {
        let members = self
            .visible
            .member_count(&lobby_id)
            .filter(|c| *c > 0)
            .map(|c| c as usize)
            .unwrap_or(local_estimate);

        if self
            .flood
            .try_admit(from, lobby_id, ctx.now, &ctx.config.flood, members)
        {
            return true;
        }

        debug!(
            lobby = %lobby_id,
            peer = %from.short(),
            members,
            "Flood budget exhausted, dropping object"
        );
        false
    }

    /// Dedup, flood-check and forward an object received from `from`.
    ///
    /// Returns `true` only for an object that is new and within budget.
    /// A fragment is charged to the budget only when it opens its parent
    /// message; the rest of that message is admitted with it.
    pub(crate) fn bounce_lobby_object(
        &mut self,
        item: &LobbyItem,
        from: PeerId,
        ctx: &Ctx<'_>,
        out: &mut Outbox,
    ) -> bool {
        let Some(header) = item.bounce_header() else {
            return false;
        };
        let lobby_id = header.lobby_id;
        let key = header.key();

        let local_estimate = match self.lobbies.get_mut(&lobby_id) {
            Some(lobby) => {
                if from != ctx.own_id && lobby.add_participant(from) {
                    debug!(lobby = %lobby_id, peer = %from.short(), "New participating friend");
                    lobby.challenge_backoff_secs = 0;
                    out.save = true;
                }
                if lobby.has_seen(&key) {
                    trace!(lobby = %lobby_id, msg_id = key.msg_id, "Duplicate object");
                    return false;
                }
                lobby.member_estimate()
            }
            None => {
                debug!(lobby = %lobby_id, peer = %from.short(), "Object for unknown lobby, dropping");
                return false;
            }
        };

        if !self.continues_admitted_message(item)
            && !self.locked_bouncing_object_check(lobby_id, from, local_estimate, ctx)
        {
            return false;
        }

        self.locked_record_and_forward(item, from, ctx, out)
    }

    fn continues_admitted_message(&self, item: &LobbyItem) -> bool {
        let LobbyItem::Msg(LobbyMsg {
            header,
            fragment: Some(fragment),
            ..
        }) = item
        else {
            return false;
        };
        let parent = ObjectKey {
            origin: header.origin,
            msg_id: fragment.parent_msg_id,
        };
        self.partial.awaits_fragment(header.lobby_id, &parent, fragment)
    }

    /// Remember `item` and send it to every online participating friend
    /// except `from`.
    fn locked_record_and_forward(
        &mut self,
        item: &LobbyItem,
        from: PeerId,
        ctx: &Ctx<'_>,
        out: &mut Outbox,
    ) -> bool {
        let Some(header) = item.bounce_header() else {
            return false;
        };
        let lobby_id = header.lobby_id;
        let key = header.key();
        let Some(lobby) = self.lobbies.get_mut(&lobby_id) else {
            return false;
        };
        lobby.record(key, ctx.now);

        // connected lobby-capable friends outside the graph may be members too
        if from != ctx.own_id
            && ctx
                .online
                .iter()
                .any(|p| !lobby.participating_peers.contains(p))
        {
            lobby.connection_challenge_count += 1;
        }

        let mut forwarded = 0usize;
        for peer in &lobby.participating_peers {
            if *peer != from && ctx.online.contains(peer) {
                out.send(*peer, item.clone());
                forwarded += 1;
            }
        }
        trace!(lobby = %lobby_id, msg_id = key.msg_id, forwarded, "Bounced object");
        true
    }

    /// Incoming chat message or lobby event from a friend.
    pub(crate) fn recv_bounced(
        &mut self,
        item: LobbyItem,
        from: PeerId,
        ctx: &Ctx<'_>,
        out: &mut Outbox,
    ) {
        let Some(header) = item.bounce_header() else {
            return;
        };
        if !self.locked_check_announced_time(header, from, ctx) {
            return;
        }
        if !self.bounce_lobby_object(&item, from, ctx, out) {
            return;
        }

        match item {
            LobbyItem::Msg(msg) => self.locked_store_incoming_msg(msg, ctx, out),
            LobbyItem::Event(event) => self.locked_apply_event(event, ctx, out),
            _ => {}
        }
    }

    /// Feed the clock statistics and refuse objects older than the dedup
    /// cache can remember.
    fn locked_check_announced_time(
        &mut self,
        header: &BounceHeader,
        from: PeerId,
        ctx: &Ctx<'_>,
    ) -> bool {
        let shift = ctx.now.saturating_sub(header.send_time);
        self.time_shift.add(shift);
        if shift.unsigned_abs() as f64 > ctx.config.time_shift_warn_secs {
            debug!(
                lobby = %header.lobby_id,
                peer = %from.short(),
                shift,
                "Announced time far from local clock"
            );
        }

        if header
            .send_time
            .saturating_add(ctx.config.replay_horizon_secs())
            < ctx.now
        {
            warn!(
                lobby = %header.lobby_id,
                peer = %from.short(),
                age = shift,
                "Outdated lobby object, possible replay"
            );
            return false;
        }
        true
    }

    fn locked_store_incoming_msg(&mut self, msg: LobbyMsg, ctx: &Ctx<'_>, out: &mut Outbox) {
        let LobbyMsg {
            header,
            text,
            fragment,
        } = msg;

        let Some(lobby) = self.lobbies.get_mut(&header.lobby_id) else {
            return;
        };
        let virtual_peer_id = lobby.virtual_peer_id;
        if let Some(old) = lobby.touch_member(header.origin, &header.nick, ctx.now) {
            out.notes.push(LobbyNotification::NicknameChanged {
                lobby_id: header.lobby_id,
                old,
                new: header.nick.clone(),
            });
        }

        let (msg_id, text) = match fragment {
            Some(fragment) => {
                match self.locked_check_and_rebuild_partial(&header, &fragment, text, ctx) {
                    Some(full) => (fragment.parent_msg_id, full),
                    None => return,
                }
            }
            None => (header.msg_id, text),
        };

        debug!(lobby = %header.lobby_id, nick = %header.nick, msg_id, "Lobby message delivered");
        out.delivered.push(DeliveredMessage {
            lobby_id: header.lobby_id,
            virtual_peer_id,
            msg_id,
            origin: header.origin,
            nick: header.nick,
            text,
            send_time: header.send_time,
            recv_time: ctx.now,
            outgoing: false,
        });
    }

    fn locked_check_and_rebuild_partial(
        &mut self,
        header: &BounceHeader,
        fragment: &Fragment,
        text: String,
        ctx: &Ctx<'_>,
    ) -> Option<String> {
        let parent = ObjectKey {
            origin: header.origin,
            msg_id: fragment.parent_msg_id,
        };
        self.partial
            .add_fragment(header.lobby_id, parent, fragment, text, ctx.now)
    }

    fn locked_apply_event(&mut self, event: LobbyEvent, ctx: &Ctx<'_>, out: &mut Outbox) {
        let LobbyEvent { header, kind } = event;
        let lobby_id = header.lobby_id;
        let Some(lobby) = self.lobbies.get_mut(&lobby_id) else {
            return;
        };

        match kind {
            LobbyEventKind::PeerJoined => {
                lobby.touch_member(header.origin, &header.nick, ctx.now);
                // let the newcomer learn about us soon
                lobby.last_keep_alive_time = ctx.now - ctx.config.keep_alive_interval_secs;
                out.notes.push(LobbyNotification::PeerJoined {
                    lobby_id,
                    nick: header.nick,
                });
            }
            LobbyEventKind::PeerLeft => {
                lobby.remove_member(&header.origin);
                out.notes.push(LobbyNotification::PeerLeft {
                    lobby_id,
                    nick: header.nick,
                });
            }
            LobbyEventKind::Status(text) => {
                lobby.touch_member(header.origin, &header.nick, ctx.now);
                out.notes.push(LobbyNotification::Status {
                    lobby_id,
                    nick: header.nick,
                    text,
                });
            }
            LobbyEventKind::NicknameChanged(new) => {
                lobby.touch_member(header.origin, &header.nick, ctx.now);
                lobby.touch_member(header.origin, &new, ctx.now);
                out.notes.push(LobbyNotification::NicknameChanged {
                    lobby_id,
                    old: header.nick,
                    new,
                });
            }
            LobbyEventKind::KeepAlive => {
                if let Some(old) = lobby.touch_member(header.origin, &header.nick, ctx.now) {
                    out.notes.push(LobbyNotification::NicknameChanged {
                        lobby_id,
                        old,
                        new: header.nick,
                    });
                }
            }
        }
    }

    /// Originate a lobby event and flood it.
    pub(crate) fn send_lobby_event(
        &mut self,
        lobby_id: LobbyId,
        kind: LobbyEventKind,
        ctx: &Ctx<'_>,
        out: &mut Outbox,
    ) -> Result<(), LobbyError> {
        let header = self
            .locked_init_bounce_header(lobby_id, ctx)
            .ok_or(LobbyError::NotSubscribed(lobby_id))?;
        let item = LobbyItem::Event(LobbyEvent { header, kind });
        self.send_own_objects(lobby_id, std::slice::from_ref(&item), ctx, out)
    }

    /// Originate a chat message, fragmenting it when too large.
    ///
    /// Returns the message id handed to the local sink.
    pub(crate) fn send_lobby_chat(
        &mut self,
        lobby_id: LobbyId,
        text: &str,
        ctx: &Ctx<'_>,
        out: &mut Outbox,
    ) -> Result<u64, LobbyError> {
        let Some(virtual_peer_id) = self.lobbies.get(&lobby_id).map(|l| l.virtual_peer_id) else {
            return Err(LobbyError::NotSubscribed(lobby_id));
        };

        let chunks = split_text(text, ctx.config.max_fragment_size);
        if chunks.len() > usize::from(MAX_FRAGMENTS) {
            return Err(LobbyError::MessageTooLong(chunks.len()));
        }

        let (msg_id, items) = if chunks.len() == 1 {
            let header = self
                .locked_init_bounce_header(lobby_id, ctx)
                .ok_or(LobbyError::NotSubscribed(lobby_id))?;
            let msg_id = header.msg_id;
            let item = LobbyItem::Msg(LobbyMsg {
                header,
                text: text.to_string(),
                fragment: None,
            });
            (msg_id, vec![item])
        } else {
            let parent_msg_id = self.next_msg_id();
            let total = chunks.len() as u16;
            let mut items = Vec::with_capacity(chunks.len());
            for (index, chunk) in chunks.into_iter().enumerate() {
                let header = self
                    .locked_init_bounce_header(lobby_id, ctx)
                    .ok_or(LobbyError::NotSubscribed(lobby_id))?;
                items.push(LobbyItem::Msg(LobbyMsg {
                    header,
                    text: chunk,
                    fragment: Some(Fragment {
                        parent_msg_id,
                        index: index as u16,
                        total,
                    }),
                }));
            }
            (parent_msg_id, items)
        };

        self.send_own_objects(lobby_id, &items, ctx, out)?;
        if items.len() > 1 {
            debug!(lobby = %lobby_id, fragments = items.len(), "Sent fragmented message");
        }

        out.delivered.push(DeliveredMessage {
            lobby_id,
            virtual_peer_id,
            msg_id,
            origin: ctx.own_id,
            nick: self.nick_for(&lobby_id),
            text: text.to_string(),
            send_time: ctx.now,
            recv_time: ctx.now,
            outgoing: true,
        });
        Ok(msg_id)
    }

    /// Flood one locally created message, all fragments of it or nothing.
    ///
    /// The whole message takes a single flood admission.
    fn send_own_objects(
        &mut self,
        lobby_id: LobbyId,
        items: &[LobbyItem],
        ctx: &Ctx<'_>,
        out: &mut Outbox,
    ) -> Result<(), LobbyError> {
        let local_estimate = self
            .lobbies
            .get(&lobby_id)
            .map(|l| l.member_estimate())
            .ok_or(LobbyError::NotSubscribed(lobby_id))?;
        if !self.locked_bouncing_object_check(lobby_id, ctx.own_id, local_estimate, ctx) {
            return Err(LobbyError::FloodLimited(lobby_id));
        }
        for item in items {
            self.locked_record_and_forward(item, ctx.own_id, ctx, out);
        }
        Ok(())
    }
}
