//! Connection challenges.
//!
//! Two friends subscribed to the same lobby may not know about each other.
//! A challenge proves membership without naming the lobby: the code is
//! derived from a message recently seen in it, which only members hold.

use lobby_shared::crypto::challenge_code;
use lobby_shared::{LobbyId, LobbyItem, PeerId};
use tracing::{debug, info, trace};

use crate::state::{Ctx, LobbyState, Outbox};

impl LobbyState {
    /// Send a challenge for `lobby_id` to connected friends that are not
    /// participating in it. Rate limited across all lobbies.
    pub(crate) fn send_connection_challenge(
        &mut self,
        lobby_id: LobbyId,
        ctx: &Ctx<'_>,
        out: &mut Outbox,
    ) -> bool {
        if self
            .last_lobby_challenge_time
            .is_some_and(|last| last + ctx.config.challenge_min_interval_secs > ctx.now)
        {
            trace!(lobby = %lobby_id, "Challenge rate limited");
            return false;
        }

        let Some(lobby) = self.lobbies.get(&lobby_id) else {
            return false;
        };
        let Some(msg_id) = lobby
            .recent_msg_ids(ctx.now, ctx.config.challenge_max_msg_age_secs)
            .first()
            .copied()
        else {
            debug!(lobby = %lobby_id, "No recent message to build a challenge from");
            return false;
        };

        let targets: Vec<PeerId> = ctx
            .online
            .iter()
            .filter(|p| !lobby.participating_peers.contains(p))
            .copied()
            .collect();
        if targets.is_empty() {
            return false;
        }

        let code = challenge_code(&ctx.own_id, lobby_id, msg_id);
        debug!(lobby = %lobby_id, targets = targets.len(), "Sending connection challenge");
        for peer in targets {
            out.send(
                peer,
                LobbyItem::ConnectChallenge {
                    challenge_code: code,
                },
            );
        }
        self.last_lobby_challenge_time = Some(ctx.now);
        true
    }

    /// Answer a challenge from `from` if it matches one of our lobbies.
    /// Unmatched codes are ignored.
    pub(crate) fn handle_connection_challenge(
        &mut self,
        code: u64,
        from: PeerId,
        ctx: &Ctx<'_>,
        out: &mut Outbox,
    ) {
        // the challenger may have seen the message a little before us
        let max_age = ctx.config.challenge_max_msg_age_secs * 2;

        let matched = self.lobbies.values().find_map(|lobby| {
            lobby
                .recent_msg_ids(ctx.now, max_age)
                .into_iter()
                .any(|msg_id| challenge_code(&from, lobby.lobby_id, msg_id) == code)
                .then_some(lobby.lobby_id)
        });

        let Some(lobby_id) = matched else {
            trace!(peer = %from.short(), "Challenge matched no lobby");
            return;
        };

        info!(lobby = %lobby_id, peer = %from.short(), "Connection challenge accepted");
        if let Some(lobby) = self.lobbies.get_mut(&lobby_id) {
            lobby.add_participant(from);
            lobby.challenge_backoff_secs = 0;
        }
        self.locked_invite_peer(lobby_id, from, true, out);
        out.save = true;
    }

    /// Lobbies whose challenge counter crossed the trigger and whose
    /// backoff elapsed.
    pub(crate) fn due_challenges(&self, ctx: &Ctx<'_>) -> Vec<LobbyId> {
        self.lobbies
            .values()
            .filter(|l| l.connection_challenge_count > ctx.config.challenge_trigger_count)
            .filter(|l| l.last_connection_challenge_time + l.challenge_backoff_secs <= ctx.now)
            .map(|l| l.lobby_id)
            .collect()
    }

    /// A challenge went out for `lobby_id`: restart the counter and double
    /// the backoff.
    pub(crate) fn commit_challenge_backoff(&mut self, lobby_id: LobbyId, ctx: &Ctx<'_>) {
        let config = ctx.config;
        if let Some(lobby) = self.lobbies.get_mut(&lobby_id) {
            lobby.connection_challenge_count = 0;
            lobby.last_connection_challenge_time = ctx.now;
            lobby.challenge_backoff_secs = (lobby.challenge_backoff_secs * 2)
                .max(config.challenge_min_interval_secs)
                .min(config.challenge_backoff_max_secs);
        }
    }
}
