//! Local delivery: history log plus console output.

use std::sync::Arc;

use lobby_core::{DeliveredMessage, LobbyNotification, LobbySink};
use lobby_store::SqlitePersistence;
use tracing::{info, warn};

pub struct HistorySink {
    store: Arc<SqlitePersistence>,
}

impl HistorySink {
    pub fn new(store: Arc<SqlitePersistence>) -> Self {
        Self { store }
    }
}

impl LobbySink for HistorySink {
    fn deliver(&self, message: DeliveredMessage) {
        if let Err(e) = self.store.record_message(&message) {
            warn!(lobby = %message.lobby_id, error = %e, "Failed to log message");
        }
        if !message.outgoing {
            println!("[{}] <{}> {}", message.lobby_id, message.nick, message.text);
        }
    }

    fn notify(&self, note: LobbyNotification) {
        match note {
            LobbyNotification::InviteReceived { lobby_id, from, name } => {
                println!("* {} invites you to \"{name}\" ({lobby_id}), /accept {lobby_id}", from.short());
            }
            LobbyNotification::PeerJoined { lobby_id, nick } => {
                println!("[{lobby_id}] * {nick} joined");
            }
            LobbyNotification::PeerLeft { lobby_id, nick } => {
                println!("[{lobby_id}] * {nick} left");
            }
            LobbyNotification::NicknameChanged { lobby_id, old, new } => {
                println!("[{lobby_id}] * {old} is now {new}");
            }
            LobbyNotification::Status { lobby_id, nick, text } => {
                println!("[{lobby_id}] * {nick} {text}");
            }
            LobbyNotification::TimeShift { average_secs } => {
                info!(average_secs, "Friends' clocks disagree with ours");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lobby_shared::{LobbyId, PeerId};
    use lobby_store::Database;

    #[test]
    fn deliveries_are_logged() {
        let store = Arc::new(SqlitePersistence::new(Database::open_in_memory().unwrap()));
        let sink = HistorySink::new(store.clone());
        let message = DeliveredMessage {
            lobby_id: LobbyId(9),
            virtual_peer_id: PeerId([9; 16]),
            msg_id: 1,
            origin: PeerId([1; 16]),
            nick: "ana".into(),
            text: "hi".into(),
            send_time: 100,
            recv_time: 101,
            outgoing: false,
        };

        sink.deliver(message.clone());
        sink.deliver(message);

        let logged = store.with_db(|db| db.get_lobby_messages(LobbyId(9), 10, 0)).unwrap();
        assert_eq!(logged.len(), 1);
        assert_eq!(logged[0].text, "hi");
    }
}
