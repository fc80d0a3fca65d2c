//! Sliding-window flood budget.
//!
//! Counts, per forwarding peer and lobby, the distinct objects accepted
//! during the last window. Rejections are silent towards the peer.

use std::collections::{HashMap, VecDeque};

use lobby_shared::{LobbyId, PeerId};

use crate::config::FloodBudget;

#[derive(Debug, Default)]
pub struct FloodGuard {
    windows: HashMap<(PeerId, LobbyId), VecDeque<i64>>,
}

impl FloodGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit one more object from `peer` into `lobby`, or refuse it when
    /// the budget for `members` estimated members is used up.
    pub fn try_admit(
        &mut self,
        peer: PeerId,
        lobby: LobbyId,
        now: i64,
        budget: &FloodBudget,
        members: usize,
    ) -> bool {
        let stamps = self.windows.entry((peer, lobby)).or_default();

        while stamps
            .front()
            .is_some_and(|t| *t + budget.window_secs <= now)
        {
            stamps.pop_front();
        }

        if stamps.len() as u64 >= u64::from(budget.budget(members)) {
            return false;
        }

        stamps.push_back(now);
        true
    }

    /// Forget windows with no stamp younger than `window_secs`.
    pub fn prune(&mut self, now: i64, window_secs: i64) {
        self.windows
            .retain(|_, stamps| stamps.back().is_some_and(|t| *t + window_secs > now));
    }

    pub fn forget_lobby(&mut self, lobby: LobbyId) {
        self.windows.retain(|(_, l), _| *l != lobby);
    }

    pub fn tracked(&self) -> usize {
        self.windows.len()
    }
}
