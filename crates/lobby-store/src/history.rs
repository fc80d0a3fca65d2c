use rusqlite::params;

use lobby_core::DeliveredMessage;
use lobby_shared::{LobbyId, PeerId};

use crate::database::Database;
use crate::error::Result;

impl Database {
    /// Append a delivered message. Returns `false` if it was already logged.
    pub fn insert_lobby_message(&self, message: &DeliveredMessage) -> Result<bool> {
        let inserted = self.conn().execute(
            "INSERT OR IGNORE INTO lobby_messages
                (lobby_id, origin, msg_id, nick, text, send_time, recv_time, outgoing)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                message.lobby_id.to_string(),
                message.origin.to_hex(),
                message.msg_id as i64,
                message.nick,
                message.text,
                message.send_time,
                message.recv_time,
                message.outgoing,
            ],
        )?;
        Ok(inserted > 0)
    }

    /// Most recent messages of a lobby, newest first.
    pub fn get_lobby_messages(
        &self,
        lobby_id: LobbyId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<DeliveredMessage>> {
        let mut stmt = self.conn().prepare(
            "SELECT lobby_id, origin, msg_id, nick, text, send_time, recv_time, outgoing
             FROM lobby_messages
             WHERE lobby_id = ?1
             ORDER BY recv_time DESC, rowid DESC
             LIMIT ?2 OFFSET ?3",
        )?;

        let rows = stmt.query_map(
            params![lobby_id.to_string(), limit, offset],
            row_to_message,
        )?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Forget the history of a lobby. Returns the number of rows removed.
    pub fn delete_lobby_history(&self, lobby_id: LobbyId) -> Result<usize> {
        let affected = self.conn().execute(
            "DELETE FROM lobby_messages WHERE lobby_id = ?1",
            params![lobby_id.to_string()],
        )?;
        Ok(affected)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<DeliveredMessage> {
    let lobby_hex: String = row.get(0)?;
    let origin_hex: String = row.get(1)?;
    let msg_id: i64 = row.get(2)?;

    let lobby_id = u64::from_str_radix(&lobby_hex, 16).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let origin = PeerId::from_hex(&origin_hex).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let lobby_id = LobbyId(lobby_id);

    Ok(DeliveredMessage {
        lobby_id,
        virtual_peer_id: lobby_shared::crypto::virtual_peer_id(lobby_id),
        msg_id: msg_id as u64,
        origin,
        nick: row.get(3)?,
        text: row.get(4)?,
        send_time: row.get(5)?,
        recv_time: row.get(6)?,
        outgoing: row.get(7)?,
    })
}
