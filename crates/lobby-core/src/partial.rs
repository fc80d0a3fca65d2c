//! Partial message reassembly.
//!
//! Large chat messages travel as several fragments, each bounced as its
//! own object. Fragments are buffered under their parent message until
//! every index is present. Buffers left incomplete past the timeout are
//! dropped without notice.

use std::collections::{BTreeMap, HashMap};

use lobby_shared::constants::MAX_FRAGMENTS;
use lobby_shared::{Fragment, LobbyId, ObjectKey, ProtocolError};
use tracing::{debug, warn};

#[derive(Debug)]
struct PendingFragments {
    lobby_id: LobbyId,
    total: u16,
    parts: BTreeMap<u16, String>,
    first_seen: i64,
}

#[derive(Debug, Default)]
pub struct PartialMessages {
    pending: HashMap<ObjectKey, PendingFragments>,
}

impl PartialMessages {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer one fragment of the message identified by `parent`.
    ///
    /// Returns the assembled text once all fragments are present.
    pub fn add_fragment(
        &mut self,
        lobby_id: LobbyId,
        parent: ObjectKey,
        fragment: &Fragment,
        text: String,
        now: i64,
    ) -> Option<String> {
        if let Err(e) = validate_fragment(fragment) {
            warn!(lobby = %lobby_id, error = %e, "Dropping fragment");
            return None;
        }

        let buffer = self.pending.entry(parent).or_insert_with(|| PendingFragments {
            lobby_id,
            total: fragment.total,
            parts: BTreeMap::new(),
            first_seen: now,
        });

        if buffer.total != fragment.total || buffer.lobby_id != lobby_id {
            warn!(
                lobby = %lobby_id,
                parent = parent.msg_id,
                "Inconsistent fragment metadata, discarding partial message"
            );
            self.pending.remove(&parent);
            return None;
        }

        buffer.parts.insert(fragment.index, text);

        if buffer.parts.len() < usize::from(buffer.total) {
            debug!(
                lobby = %lobby_id,
                parent = parent.msg_id,
                have = buffer.parts.len(),
                total = buffer.total,
                "Buffered fragment"
            );
            return None;
        }

        self.pending
            .remove(&parent)
            .map(|complete| complete.parts.into_values().collect())
    }

    /// Drop buffers older than `timeout`. Returns how many were dropped.
    pub fn expire(&mut self, now: i64, timeout: i64) -> usize {
        let before = self.pending.len();
        self.pending.retain(|_, p| p.first_seen + timeout > now);
        before - self.pending.len()
    }

    pub fn forget_lobby(&mut self, lobby_id: LobbyId) {
        self.pending.retain(|_, p| p.lobby_id != lobby_id);
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// True when a buffer for `parent` in `lobby_id` is open and still
    /// misses `fragment`. Such fragments ride on the admission of the
    /// first one.
    pub fn awaits_fragment(
        &self,
        lobby_id: LobbyId,
        parent: &ObjectKey,
        fragment: &Fragment,
    ) -> bool {
        self.pending.get(parent).is_some_and(|p| {
            p.lobby_id == lobby_id
                && p.total == fragment.total
                && fragment.index < p.total
                && !p.parts.contains_key(&fragment.index)
        })
    }
}

fn validate_fragment(fragment: &Fragment) -> Result<(), ProtocolError> {
    if fragment.total == 0 || fragment.total > MAX_FRAGMENTS {
        return Err(ProtocolError::MalformedFragment(format!(
            "total {} out of range",
            fragment.total
        )));
    }
    if fragment.index >= fragment.total {
        return Err(ProtocolError::MalformedFragment(format!(
            "index {} >= total {}",
            fragment.index, fragment.total
        )));
    }
    Ok(())
}

/// Split `text` into chunks of at most `max_bytes`, on char boundaries.
pub fn split_text(text: &str, max_bytes: usize) -> Vec<String> {
    let max_bytes = max_bytes.max(4);
    let mut chunks = Vec::new();
    let mut rest = text;

    while rest.len() > max_bytes {
        let mut cut = max_bytes;
        while !rest.is_char_boundary(cut) {
            cut -= 1;
        }
        let (head, tail) = rest.split_at(cut);
        chunks.push(head.to_string());
        rest = tail;
    }
    chunks.push(rest.to_string());
    chunks
}
