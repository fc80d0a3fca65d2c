//! Lobby membership: creation, invites, discovery, join and leave.

use lobby_shared::constants::MAX_LOBBIES_IN_LIST;
use lobby_shared::{
    LobbyEventKind, LobbyFlags, LobbyId, LobbyInvite, LobbyItem, LobbyPrivacy, PeerId,
    VisibleLobbyInfo,
};
use tracing::{debug, info, warn};

use crate::cache::LobbyEntry;
use crate::discovery::PendingInvite;
use crate::error::LobbyError;
use crate::events::LobbyNotification;
use crate::state::{validate_nickname, Ctx, LobbyState, Outbox};

impl LobbyState {
    /// Queue an invitation for `peer`. Returns `false` if not subscribed.
    pub(crate) fn locked_invite_peer(
        &mut self,
        lobby_id: LobbyId,
        peer: PeerId,
        connection_challenge: bool,
        out: &mut Outbox,
    ) -> bool {
        let Some(lobby) = self.lobbies.get(&lobby_id) else {
            return false;
        };
        out.send(
            peer,
            LobbyItem::Invite(LobbyInvite {
                lobby_id,
                lobby_name: lobby.name.clone(),
                lobby_topic: lobby.topic.clone(),
                flags: lobby.flags,
                connection_challenge,
            }),
        );
        true
    }

    pub(crate) fn handle_recv_lobby_invite(
        &mut self,
        invite: LobbyInvite,
        from: PeerId,
        ctx: &Ctx<'_>,
        out: &mut Outbox,
    ) {
        if let Some(lobby) = self.lobbies.get_mut(&invite.lobby_id) {
            if lobby.add_participant(from) {
                info!(lobby = %invite.lobby_id, peer = %from.short(), "Friend joined lobby graph");
                lobby.challenge_backoff_secs = 0;
                out.save = true;
            }
            return;
        }

        if invite.connection_challenge {
            debug!(lobby = %invite.lobby_id, "Challenge invite for a lobby we left, ignoring");
            return;
        }

        let pending = PendingInvite {
            lobby_id: invite.lobby_id,
            inviter: from,
            name: invite.lobby_name.clone(),
            topic: invite.lobby_topic,
            flags: invite.flags,
            received_at: ctx.now,
        };
        if !self.invites.insert(
            pending,
            ctx.config.max_invites_per_peer,
            ctx.config.max_pending_invites,
        ) {
            warn!(
                lobby = %invite.lobby_id,
                peer = %from.short(),
                pending = self.invites.len(),
                "Too many pending invites, dropping"
            );
            return;
        }

        info!(lobby = %invite.lobby_id, peer = %from.short(), name = %invite.lobby_name, "Lobby invite received");
        out.notes.push(LobbyNotification::InviteReceived {
            lobby_id: invite.lobby_id,
            from,
            name: invite.lobby_name,
        });
    }

    pub(crate) fn create_lobby(
        &mut self,
        name: &str,
        topic: &str,
        invited: &[PeerId],
        privacy: LobbyPrivacy,
        ctx: &Ctx<'_>,
        out: &mut Outbox,
    ) -> LobbyId {
        let mut lobby_id = LobbyId::random();
        while self.lobbies.contains_key(&lobby_id) || self.known_flags.contains_key(&lobby_id) {
            lobby_id = LobbyId::random();
        }

        let entry = LobbyEntry::new(
            lobby_id,
            name.to_string(),
            topic.to_string(),
            LobbyFlags::for_privacy(privacy),
            ctx.now,
        );
        self.insert_lobby(entry);
        info!(lobby = %lobby_id, name, ?privacy, "Lobby created");

        for peer in invited {
            self.locked_invite_peer(lobby_id, *peer, false, out);
        }
        out.save = true;
        lobby_id
    }

    /// Install a freshly joined lobby and announce ourselves in it.
    fn subscribe(&mut self, mut entry: LobbyEntry, ctx: &Ctx<'_>, out: &mut Outbox) {
        let lobby_id = entry.lobby_id;
        if self.flags_for(&lobby_id).auto_subscribe() {
            entry.flags.set(LobbyFlags::AUTO_SUBSCRIBE, true);
        }
        self.insert_lobby(entry);
        self.invites.remove(&lobby_id);

        if let Err(e) = self.send_lobby_event(lobby_id, LobbyEventKind::PeerJoined, ctx, out) {
            warn!(lobby = %lobby_id, error = %e, "Could not announce join");
        }
        out.save = true;
    }

    pub(crate) fn accept_invite(
        &mut self,
        lobby_id: LobbyId,
        ctx: &Ctx<'_>,
        out: &mut Outbox,
    ) -> Result<(), LobbyError> {
        if self.lobbies.contains_key(&lobby_id) {
            self.invites.remove(&lobby_id);
            return Ok(());
        }
        let invite = self
            .invites
            .remove(&lobby_id)
            .ok_or(LobbyError::UnknownInvite(lobby_id))?;

        let mut entry = LobbyEntry::new(lobby_id, invite.name, invite.topic, invite.flags, ctx.now);
        entry.add_participant(invite.inviter);
        info!(lobby = %lobby_id, inviter = %invite.inviter.short(), "Invite accepted");
        self.subscribe(entry, ctx, out);
        Ok(())
    }

    pub(crate) fn deny_invite(&mut self, lobby_id: LobbyId) -> bool {
        self.invites.remove(&lobby_id).is_some()
    }

    pub(crate) fn join_visible(
        &mut self,
        lobby_id: LobbyId,
        ctx: &Ctx<'_>,
        out: &mut Outbox,
    ) -> Result<(), LobbyError> {
        if self.lobbies.contains_key(&lobby_id) {
            return Ok(());
        }
        let record = self
            .visible
            .get(&lobby_id)
            .cloned()
            .ok_or(LobbyError::NotVisible(lobby_id))?;

        let mut entry =
            LobbyEntry::new(lobby_id, record.name, record.topic, record.flags, ctx.now);
        for peer in &record.advertised_by {
            entry.add_participant(*peer);
        }
        self.subscribe(entry, ctx, out);

        // advertisers learn that we are now part of their graph
        for peer in &record.advertised_by {
            self.locked_invite_peer(lobby_id, *peer, true, out);
        }
        info!(lobby = %lobby_id, advertisers = record.advertised_by.len(), "Joined visible lobby");
        Ok(())
    }

    pub(crate) fn unsubscribe(
        &mut self,
        lobby_id: LobbyId,
        ctx: &Ctx<'_>,
        out: &mut Outbox,
    ) -> Result<(), LobbyError> {
        if !self.lobbies.contains_key(&lobby_id) {
            return Err(LobbyError::NotSubscribed(lobby_id));
        }

        if let Err(e) = self.send_lobby_event(lobby_id, LobbyEventKind::PeerLeft, ctx, out) {
            warn!(lobby = %lobby_id, error = %e, "Could not announce departure");
        }

        let Some(entry) = self.remove_lobby(lobby_id) else {
            return Err(LobbyError::NotSubscribed(lobby_id));
        };
        for peer in &entry.participating_peers {
            if ctx.online.contains(peer) {
                out.send(*peer, LobbyItem::Unsubscribe { lobby_id });
            }
        }
        info!(lobby = %lobby_id, "Left lobby");
        out.save = true;
        Ok(())
    }

    pub(crate) fn handle_friend_unsubscribe(
        &mut self,
        lobby_id: LobbyId,
        from: PeerId,
        out: &mut Outbox,
    ) {
        if let Some(lobby) = self.lobbies.get_mut(&lobby_id) {
            debug!(lobby = %lobby_id, peer = %from.short(), "Friend left lobby");
            lobby.remove_participant(&from);
            out.save = true;
        }
        if self.visible.forget_advertiser(&lobby_id, &from) {
            debug!(lobby = %lobby_id, "Visible lobby lost its last advertiser");
        }
    }

    pub(crate) fn request_visible_lobbies(&mut self, ctx: &Ctx<'_>, out: &mut Outbox) -> bool {
        if !self
            .visible
            .start_request(ctx.now, ctx.config.list_request_min_interval_secs)
        {
            return false;
        }
        for peer in ctx.online {
            out.send(*peer, LobbyItem::ListRequest);
        }
        true
    }

    /// Advertise public lobbies, plus private ones `from` already takes
    /// part in.
    pub(crate) fn handle_list_request(&mut self, from: PeerId, out: &mut Outbox) {
        let mut infos: Vec<VisibleLobbyInfo> = self
            .lobbies
            .values()
            .filter(|l| {
                l.flags.privacy() == LobbyPrivacy::Public || l.participating_peers.contains(&from)
            })
            .map(|l| VisibleLobbyInfo {
                lobby_id: l.lobby_id,
                name: l.name.clone(),
                topic: l.topic.clone(),
                member_count: l.member_estimate() as u32,
                flags: l.flags,
            })
            .collect();
        infos.sort_by_key(|i| i.lobby_id);
        infos.truncate(MAX_LOBBIES_IN_LIST);

        debug!(peer = %from.short(), count = infos.len(), "Answering lobby list request");
        out.send(from, LobbyItem::List(infos));
    }

    pub(crate) fn handle_list(
        &mut self,
        infos: Vec<VisibleLobbyInfo>,
        from: PeerId,
        ctx: &Ctx<'_>,
        out: &mut Outbox,
    ) {
        let merged = self.visible.merge(from, infos, ctx.now);
        for lobby_id in merged {
            if self.lobbies.contains_key(&lobby_id) || !self.flags_for(&lobby_id).auto_subscribe() {
                continue;
            }
            info!(lobby = %lobby_id, "Auto-subscribing to advertised lobby");
            if let Err(e) = self.join_visible(lobby_id, ctx, out) {
                warn!(lobby = %lobby_id, error = %e, "Auto-subscribe failed");
            }
        }
    }

    pub(crate) fn set_lobby_nickname(
        &mut self,
        lobby_id: LobbyId,
        nick: &str,
        ctx: &Ctx<'_>,
        out: &mut Outbox,
    ) -> Result<(), LobbyError> {
        let nick = validate_nickname(nick)?;
        if self.nick_for(&lobby_id) != nick && self.lobbies.contains_key(&lobby_id) {
            // the header still carries the old nick
            let event = LobbyEventKind::NicknameChanged(nick.clone());
            if let Err(e) = self.send_lobby_event(lobby_id, event, ctx, out) {
                warn!(lobby = %lobby_id, error = %e, "Could not announce nickname change");
            }
        }
        self.nicknames.insert(lobby_id, nick);
        out.save = true;
        Ok(())
    }

    pub(crate) fn set_default_nickname(
        &mut self,
        nick: &str,
        out: &mut Outbox,
    ) -> Result<(), LobbyError> {
        self.default_nick = validate_nickname(nick)?;
        out.save = true;
        Ok(())
    }

    pub(crate) fn set_auto_subscribe(&mut self, lobby_id: LobbyId, on: bool, out: &mut Outbox) {
        let mut flags = self.flags_for(&lobby_id);
        flags.set(LobbyFlags::AUTO_SUBSCRIBE, on);
        self.known_flags.insert(lobby_id, flags);
        if let Some(lobby) = self.lobbies.get_mut(&lobby_id) {
            lobby.flags = flags;
        }
        out.save = true;
    }
}
