//! Line-oriented command console on stdin.

use std::sync::Arc;

use lobby_core::DistributedChat;
use lobby_shared::{LobbyId, LobbyPrivacy, PeerId};
use lobby_store::SqlitePersistence;
use tokio::io::{AsyncBufReadExt, BufReader};

const HELP: &str = "\
/create <name> [public|private]  create a lobby
/lobbies                         subscribed lobbies
/nearby                          lobbies advertised by friends
/join <lobby>                    join an advertised lobby
/invites                         pending invitations
/accept <lobby> | /deny <lobby>  answer an invitation
/invite <lobby> <peer>           invite a friend
/leave <lobby>                   unsubscribe
/nick [<lobby>] <nick>           set a nickname
/autosub <lobby> on|off          auto-subscribe when advertised
/say <lobby> <text>              send a message
/status <lobby> <text>           send a status string
/history <lobby>                 recent messages
/quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Create { name: String, privacy: LobbyPrivacy },
    Lobbies,
    Nearby,
    Join(LobbyId),
    Invites,
    Accept(LobbyId),
    Deny(LobbyId),
    Invite { lobby: LobbyId, peer: PeerId },
    Leave(LobbyId),
    DefaultNick(String),
    LobbyNick { lobby: LobbyId, nick: String },
    AutoSubscribe { lobby: LobbyId, on: bool },
    Say { lobby: LobbyId, text: String },
    Status { lobby: LobbyId, text: String },
    History(LobbyId),
    Help,
    Quit,
}

impl Command {
    pub fn parse(line: &str) -> Result<Self, String> {
        let line = line.trim();
        let (cmd, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();

        match cmd {
            "/create" => {
                let (name, privacy) = match rest.rsplit_once(' ') {
                    Some((name, "public")) => (name, LobbyPrivacy::Public),
                    Some((name, "private")) => (name, LobbyPrivacy::Private),
                    _ => (rest, LobbyPrivacy::Private),
                };
                if name.is_empty() {
                    return Err("usage: /create <name> [public|private]".into());
                }
                Ok(Command::Create {
                    name: name.to_string(),
                    privacy,
                })
            }
            "/lobbies" => Ok(Command::Lobbies),
            "/nearby" => Ok(Command::Nearby),
            "/invites" => Ok(Command::Invites),
            "/join" => parse_lobby(rest).map(Command::Join),
            "/accept" => parse_lobby(rest).map(Command::Accept),
            "/deny" => parse_lobby(rest).map(Command::Deny),
            "/leave" => parse_lobby(rest).map(Command::Leave),
            "/history" => parse_lobby(rest).map(Command::History),
            "/invite" => {
                let (lobby, peer) = rest.split_once(' ').ok_or("usage: /invite <lobby> <peer>")?;
                let peer = PeerId::from_hex(peer.trim()).map_err(|e| format!("bad peer id: {e}"))?;
                Ok(Command::Invite {
                    lobby: parse_lobby(lobby)?,
                    peer,
                })
            }
            "/nick" => match rest.split_once(' ') {
                Some((lobby, nick)) => Ok(Command::LobbyNick {
                    lobby: parse_lobby(lobby)?,
                    nick: nick.trim().to_string(),
                }),
                None if !rest.is_empty() => Ok(Command::DefaultNick(rest.to_string())),
                None => Err("usage: /nick [<lobby>] <nick>".into()),
            },
            "/autosub" => {
                let (lobby, flag) = rest.split_once(' ').ok_or("usage: /autosub <lobby> on|off")?;
                let on = match flag.trim() {
                    "on" => true,
                    "off" => false,
                    _ => return Err("usage: /autosub <lobby> on|off".into()),
                };
                Ok(Command::AutoSubscribe {
                    lobby: parse_lobby(lobby)?,
                    on,
                })
            }
            "/say" | "/status" => {
                let (lobby, text) = rest
                    .split_once(' ')
                    .ok_or_else(|| format!("usage: {cmd} <lobby> <text>"))?;
                let lobby = parse_lobby(lobby)?;
                let text = text.to_string();
                Ok(if cmd == "/say" {
                    Command::Say { lobby, text }
                } else {
                    Command::Status { lobby, text }
                })
            }
            "/help" => Ok(Command::Help),
            "/quit" => Ok(Command::Quit),
            other => Err(format!("unknown command {other}, try /help")),
        }
    }
}

fn parse_lobby(s: &str) -> Result<LobbyId, String> {
    u64::from_str_radix(s.trim(), 16)
        .map(LobbyId)
        .map_err(|_| format!("bad lobby id: {s}"))
}

/// Execute one command. Returns `false` when the user asked to quit.
pub fn execute(engine: &DistributedChat, store: &SqlitePersistence, command: Command) -> bool {
    match command {
        Command::Create { name, privacy } => {
            let id = engine.create_chat_lobby(&name, "", &[], privacy);
            println!("created {name} ({id})");
        }
        Command::Lobbies => {
            for lobby in engine.get_chat_lobby_list() {
                println!(
                    "{} {} [{:?}] friends={} members={}",
                    lobby.lobby_id,
                    lobby.name,
                    lobby.flags.privacy(),
                    lobby.participating_peers.len(),
                    lobby.members.join(","),
                );
            }
        }
        Command::Nearby => {
            for record in engine.get_list_of_nearby_chat_lobbies() {
                println!(
                    "{} {} ({} members) {}",
                    record.lobby_id, record.name, record.member_count, record.topic
                );
            }
        }
        Command::Join(lobby) => report(engine.join_visible_chat_lobby(lobby)),
        Command::Invites => {
            for invite in engine.get_pending_chat_lobby_invites() {
                println!("{} {} from {}", invite.lobby_id, invite.name, invite.inviter.short());
            }
        }
        Command::Accept(lobby) => report(engine.accept_lobby_invite(lobby)),
        Command::Deny(lobby) => {
            if !engine.deny_lobby_invite(lobby) {
                println!("no invite for {lobby}");
            }
        }
        Command::Invite { lobby, peer } => report(engine.invite_peer_to_lobby(lobby, peer, false)),
        Command::Leave(lobby) => report(engine.unsubscribe_chat_lobby(lobby)),
        Command::DefaultNick(nick) => report(engine.set_default_nickname(&nick)),
        Command::LobbyNick { lobby, nick } => report(engine.set_nickname_for_chat_lobby(lobby, &nick)),
        Command::AutoSubscribe { lobby, on } => engine.set_lobby_auto_subscribe(lobby, on),
        Command::Say { lobby, text } => report(engine.send_lobby_chat(lobby, &text).map(|_| ())),
        Command::Status { lobby, text } => report(engine.send_lobby_status_string(lobby, &text)),
        Command::History(lobby) => match store.with_db(|db| db.get_lobby_messages(lobby, 20, 0)) {
            Ok(messages) => {
                for m in messages.iter().rev() {
                    let at = chrono::DateTime::from_timestamp(m.send_time, 0)
                        .map(|t| t.format("%H:%M").to_string())
                        .unwrap_or_default();
                    println!("{at} <{}> {}", m.nick, m.text);
                }
            }
            Err(e) => println!("history unavailable: {e}"),
        },
        Command::Help => println!("{HELP}"),
        Command::Quit => return false,
    }
    true
}

fn report(result: Result<(), lobby_core::LobbyError>) {
    if let Err(e) = result {
        println!("error: {e}");
    }
}

/// Read commands from stdin until `/quit` or end of input.
pub async fn run(engine: Arc<DistributedChat>, store: Arc<SqlitePersistence>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        match Command::parse(&line) {
            Ok(command) => {
                if !execute(&engine, &store, command) {
                    return;
                }
            }
            Err(message) => println!("{message}"),
        }
    }
}
