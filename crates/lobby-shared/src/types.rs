use rand::RngCore;
use serde::{Deserialize, Serialize};

// Peer identity as handed out by the friend layer (16 bytes)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub [u8; 16]);

impl PeerId {
    pub const SIZE: usize = 16;

    pub fn random() -> Self {
        let mut bytes = [0u8; Self::SIZE];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let mut arr = [0u8; Self::SIZE];
        hex::decode_to_slice(s.trim(), &mut arr)?;
        Ok(Self(arr))
    }

    pub fn short(&self) -> String {
        self.to_hex()[..8].to_string()
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LobbyId(pub u64);

impl LobbyId {
    /// Draw a fresh, non-zero lobby id.
    pub fn random() -> Self {
        loop {
            let id = rand::rngs::OsRng.next_u64();
            if id != 0 {
                return Self(id);
            }
        }
    }
}

impl std::fmt::Display for LobbyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Network-wide identity of a bounced object: origin peer plus that
/// peer's own sequence number. Every relay sees the same key, so copies
/// arriving through different friends collapse into one cache entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    pub origin: PeerId,
    pub msg_id: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LobbyPrivacy {
    Public,
    Private,
}

/// Per-lobby flag bits, persisted across sessions.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct LobbyFlags(u32);

impl LobbyFlags {
    pub const AUTO_SUBSCRIBE: u32 = 0x01;
    pub const PUBLIC: u32 = 0x04;

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    pub fn for_privacy(privacy: LobbyPrivacy) -> Self {
        let mut flags = Self::default();
        flags.set(Self::PUBLIC, privacy == LobbyPrivacy::Public);
        flags
    }

    pub fn contains(&self, bit: u32) -> bool {
        self.0 & bit == bit
    }

    pub fn set(&mut self, bit: u32, on: bool) {
        if on {
            self.0 |= bit;
        } else {
            self.0 &= !bit;
        }
    }

    pub fn privacy(&self) -> LobbyPrivacy {
        if self.contains(Self::PUBLIC) {
            LobbyPrivacy::Public
        } else {
            LobbyPrivacy::Private
        }
    }

    pub fn auto_subscribe(&self) -> bool {
        self.contains(Self::AUTO_SUBSCRIBE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_id_hex_roundtrip() {
        let peer = PeerId::random();
        let restored = PeerId::from_hex(&peer.to_hex()).unwrap();
        assert_eq!(peer, restored);
        assert_eq!(peer.short().len(), 8);
    }

    #[test]
    fn test_peer_id_rejects_bad_length() {
        assert!(PeerId::from_hex("abcd").is_err());
    }

    #[test]
    fn test_flags_privacy_and_auto_subscribe() {
        let mut flags = LobbyFlags::for_privacy(LobbyPrivacy::Public);
        assert_eq!(flags.privacy(), LobbyPrivacy::Public);
        assert!(!flags.auto_subscribe());

        flags.set(LobbyFlags::AUTO_SUBSCRIBE, true);
        assert!(flags.auto_subscribe());
        assert_eq!(flags.privacy(), LobbyPrivacy::Public);

        flags.set(LobbyFlags::PUBLIC, false);
        assert_eq!(flags.privacy(), LobbyPrivacy::Private);
        assert_eq!(flags.bits(), LobbyFlags::AUTO_SUBSCRIBE);
    }

    #[test]
    fn test_random_lobby_id_nonzero() {
        for _ in 0..32 {
            assert_ne!(LobbyId::random().0, 0);
        }
    }
}
