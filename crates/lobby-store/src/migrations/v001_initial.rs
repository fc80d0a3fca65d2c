//! v001 -- Initial schema creation.
//!
//! Creates `lobby_config` for the engine's saved items and
//! `lobby_messages` for the delivered-message log.

use rusqlite::Connection;

const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Saved engine configuration, rewritten as a whole on every save
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS lobby_config (
    position   INTEGER PRIMARY KEY NOT NULL,  -- order of the saved list
    kind       TEXT NOT NULL,                 -- default_nickname, lobby_flags, ...
    lobby_id   TEXT,                          -- hex lobby id, NULL for global items
    payload    TEXT NOT NULL,                 -- JSON-encoded item
    updated_at TEXT NOT NULL                  -- RFC-3339
);

CREATE INDEX IF NOT EXISTS idx_lobby_config_lobby_id ON lobby_config(lobby_id);

-- ----------------------------------------------------------------
-- Delivered lobby messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS lobby_messages (
    lobby_id   TEXT NOT NULL,                 -- hex lobby id
    origin     TEXT NOT NULL,                 -- hex peer id of the author
    msg_id     INTEGER NOT NULL,              -- u64 stored bit-for-bit
    nick       TEXT NOT NULL,
    text       TEXT NOT NULL,
    send_time  INTEGER NOT NULL,              -- Unix seconds, author clock
    recv_time  INTEGER NOT NULL,              -- Unix seconds, local clock
    outgoing   INTEGER NOT NULL DEFAULT 0,

    PRIMARY KEY (lobby_id, origin, msg_id)
);

CREATE INDEX IF NOT EXISTS idx_lobby_messages_recv ON lobby_messages(lobby_id, recv_time);
"#;

pub fn up(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(UP_SQL)
}
