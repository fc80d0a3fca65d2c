//! Pure derivations shared by every lobby member: virtual peer ids and
//! connection challenge codes. Neither touches engine state.

use crate::constants::{KDF_CONTEXT_CHALLENGE, VIRTUAL_PEER_MARKER};
use crate::types::{LobbyId, PeerId};

/// Synthetic peer id standing for a lobby in the transport layer.
///
/// Layout: lobby id (8 bytes, little endian) followed by
/// [`VIRTUAL_PEER_MARKER`].
pub fn virtual_peer_id(lobby_id: LobbyId) -> PeerId {
    let mut bytes = [0u8; PeerId::SIZE];
    bytes[..8].copy_from_slice(&lobby_id.0.to_le_bytes());
    bytes[8..].copy_from_slice(&VIRTUAL_PEER_MARKER);
    PeerId(bytes)
}

/// Inverse of [`virtual_peer_id`]. Returns `None` for real peer ids.
pub fn lobby_id_from_virtual(peer_id: &PeerId) -> Option<LobbyId> {
    if peer_id.0[8..] != VIRTUAL_PEER_MARKER {
        return None;
    }
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&peer_id.0[..8]);
    Some(LobbyId(u64::from_le_bytes(raw)))
}

pub fn is_virtual_peer_id(peer_id: &PeerId) -> bool {
    lobby_id_from_virtual(peer_id).is_some()
}

/// Connection challenge code for `(peer, lobby, msg)`.
///
/// Both sides compute it independently: the challenger with its own id,
/// the receiver with the id of the friend the challenge came from.
pub fn challenge_code(peer_id: &PeerId, lobby_id: LobbyId, msg_id: u64) -> u64 {
    let mut hasher = blake3::Hasher::new_derive_key(KDF_CONTEXT_CHALLENGE);
    hasher.update(&peer_id.0);
    hasher.update(&lobby_id.0.to_le_bytes());
    hasher.update(&msg_id.to_le_bytes());
    let hash = hasher.finalize();
    let mut out = [0u8; 8];
    out.copy_from_slice(&hash.as_bytes()[..8]);
    u64::from_le_bytes(out)
}
