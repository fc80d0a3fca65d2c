use chrono::Utc;
use rusqlite::params;

use lobby_core::SavedItem;

use crate::database::Database;
use crate::error::Result;

impl Database {
    /// Replace the stored configuration with `items`, atomically.
    pub fn save_config(&mut self, items: &[SavedItem]) -> Result<()> {
        let updated_at = Utc::now().to_rfc3339();
        let tx = self.conn_mut().transaction()?;
        tx.execute("DELETE FROM lobby_config", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO lobby_config (position, kind, lobby_id, payload, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for (position, item) in items.iter().enumerate() {
                stmt.execute(params![
                    position as i64,
                    item.kind(),
                    item.lobby_id().map(|id| id.to_string()),
                    serde_json::to_string(item)?,
                    updated_at,
                ])?;
            }
        }
        tx.commit()?;

        tracing::debug!(items = items.len(), "lobby configuration stored");
        Ok(())
    }

    /// Stored configuration in saved order.
    pub fn load_config(&self) -> Result<Vec<SavedItem>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT payload FROM lobby_config ORDER BY position")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut items = Vec::new();
        for row in rows {
            let payload = row?;
            items.push(serde_json::from_str(&payload)?);
        }
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lobby_shared::{LobbyFlags, LobbyId, PeerId};

    fn sample() -> Vec<SavedItem> {
        vec![
            SavedItem::DefaultNickname("alice".to_string()),
            SavedItem::LobbyNickname {
                lobby_id: LobbyId(0xabcdef),
                nick: "ally".to_string(),
            },
            SavedItem::LobbyFlags {
                lobby_id: LobbyId(0xabcdef),
                flags: LobbyFlags::from_bits(LobbyFlags::AUTO_SUBSCRIBE | LobbyFlags::PUBLIC),
            },
            SavedItem::SubscribedLobby {
                lobby_id: LobbyId(0xabcdef),
                name: "Team".to_string(),
                topic: "work".to_string(),
                flags: LobbyFlags::from_bits(LobbyFlags::PUBLIC),
                known_peers: vec![PeerId([7u8; 16])],
            },
        ]
    }

    #[test]
    fn config_round_trip_keeps_order() {
        let mut db = Database::open_in_memory().unwrap();
        db.save_config(&sample()).unwrap();
        assert_eq!(db.load_config().unwrap(), sample());
    }

    #[test]
    fn save_replaces_previous_config() {
        let mut db = Database::open_in_memory().unwrap();
        db.save_config(&sample()).unwrap();
        db.save_config(&[SavedItem::DefaultNickname("bob".to_string())])
            .unwrap();

        assert_eq!(
            db.load_config().unwrap(),
            vec![SavedItem::DefaultNickname("bob".to_string())]
        );
    }

    #[test]
    fn corrupt_payload_is_an_error() {
        let db = Database::open_in_memory().unwrap();
        db.conn()
            .execute(
                "INSERT INTO lobby_config (position, kind, lobby_id, payload, updated_at)
                 VALUES (0, 'default_nickname', NULL, 'not json', '')",
                [],
            )
            .unwrap();

        assert!(db.load_config().is_err());
    }
}
