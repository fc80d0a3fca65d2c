/// Service type a peer must offer before we bounce lobby traffic to it
pub const LOBBY_SERVICE_TYPE: u32 = 0x0012;

/// How long a bounced object id stays in a lobby's message cache (20 minutes)
pub const MSG_CACHE_RETENTION_SECS: i64 = 1200;

/// Objects announced earlier than `retention - margin` are refused as replays
pub const REPLAY_MARGIN_SECS: i64 = 100;

/// Delay between two keepalive events sent to the same lobby
pub const KEEP_ALIVE_INTERVAL_SECS: i64 = 120;

/// Members silent for this long are dropped from the member list
pub const MEMBER_INACTIVITY_SECS: i64 = 3 * KEEP_ALIVE_INTERVAL_SECS;

/// Visible (advertised, unjoined) lobbies not refreshed within this delay are pruned
pub const VISIBLE_LOBBY_TIMEOUT_SECS: i64 = 600;

/// Minimum delay between two visible-lobby list requests
pub const LIST_REQUEST_MIN_INTERVAL_SECS: i64 = 20;

/// Maximum number of lobbies accepted from or sent in a single list
pub const MAX_LOBBIES_IN_LIST: usize = 50;

/// Invitations a single friend may have pending at once
pub const MAX_INVITES_PER_PEER: usize = 5;

/// Upper bound on pending invitations from all friends
pub const MAX_PENDING_INVITES: usize = 50;

/// Pending invitations not answered within this delay are dropped (one day)
pub const INVITE_TIMEOUT_SECS: i64 = 86_400;

/// Incomplete partial messages are dropped after this delay
pub const FRAGMENT_TIMEOUT_SECS: i64 = 120;

/// Maximum text size carried by a single chat fragment, in bytes
pub const MAX_FRAGMENT_SIZE: usize = 15_000;

/// Upper bound on the number of fragments of one message
pub const MAX_FRAGMENTS: u16 = 64;

/// Sliding window used by the flood budget
pub const FLOOD_WINDOW_SECS: i64 = 10;

/// Objects a forwarding peer may introduce per lobby member and window
pub const FLOOD_OBJECTS_PER_MEMBER: u32 = 5;

/// Global minimum delay between two outgoing connection challenges
pub const CHALLENGE_MIN_INTERVAL_SECS: i64 = 15;

/// Only messages seen within this delay can back a connection challenge
pub const CHALLENGE_MAX_MSG_AGE_SECS: i64 = 30;

/// Number of hints about non-participating peers before a challenge is attempted
pub const CHALLENGE_TRIGGER_COUNT: u32 = 20;

/// Cap of the per-lobby challenge backoff
pub const CHALLENGE_BACKOFF_MAX_SECS: i64 = 3600;

/// Average clock shift above which peers are flagged (about one hour)
pub const TIME_SHIFT_WARN_SECS: f64 = 3600.0;

/// Maximum nickname length in characters
pub const MAX_NICKNAME_LEN: usize = 64;

/// Nickname used when none was configured
pub const DEFAULT_NICKNAME: &str = "guest";

/// Marker occupying the trailing bytes of every virtual peer id
pub const VIRTUAL_PEER_MARKER: [u8; 8] = *b"LOBBYVID";

/// Key derivation context for connection challenge codes (BLAKE3)
pub const KDF_CONTEXT_CHALLENGE: &str = "lobby-connection-challenge-v1";
