use lobby_shared::{LobbyEventKind, LobbyId};
use tracing::{debug, warn};

use crate::events::LobbyNotification;
use crate::state::{Ctx, LobbyState, Outbox};

impl LobbyState {
    /// Periodic maintenance: expiry, keep-alives, challenges and the
    /// clock-shift check.
    pub(crate) fn locked_housekeeping(&mut self, ctx: &Ctx<'_>, out: &mut Outbox) {
        let config = ctx.config;

        let mut expired = 0usize;
        for lobby in self.lobbies.values_mut() {
            expired += lobby.expire_cache(ctx.now, config.msg_cache_retention_secs);
            lobby.prune_members(ctx.now, config.member_inactivity_secs);
        }
        let stale_partials = self.partial.expire(ctx.now, config.fragment_timeout_secs);
        let stale_visible = self.visible.prune(ctx.now, config.visible_lobby_timeout_secs);
        let stale_invites = self.invites.expire(ctx.now, config.invite_timeout_secs);
        self.flood.prune(ctx.now, config.flood.window_secs);
        if expired + stale_partials + stale_visible + stale_invites > 0 {
            debug!(expired, stale_partials, stale_visible, stale_invites, "Lobby housekeeping");
        }

        let keep_alive_due: Vec<LobbyId> = self
            .lobbies
            .values_mut()
            .filter(|l| l.last_keep_alive_time + config.keep_alive_interval_secs <= ctx.now)
            .map(|l| {
                l.last_keep_alive_time = ctx.now;
                l.lobby_id
            })
            .collect();
        for lobby_id in keep_alive_due {
            if let Err(e) = self.send_lobby_event(lobby_id, LobbyEventKind::KeepAlive, ctx, out) {
                debug!(lobby = %lobby_id, error = %e, "Keep-alive not sent");
            }
        }

        for lobby_id in self.due_challenges(ctx) {
            if self.send_connection_challenge(lobby_id, ctx, out) {
                self.commit_challenge_backoff(lobby_id, ctx);
            }
        }

        if self.time_shift.samples() > 0 {
            let average = self.time_shift.recompute();
            if self.time_shift.is_anomalous(config.time_shift_warn_secs) {
                warn!(average_secs = average, "Lobby traffic shows a large clock shift, check the system clock");
                out.notes.push(LobbyNotification::TimeShift {
                    average_secs: average,
                });
            }
        }
    }
}
