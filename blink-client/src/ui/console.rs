//! Line-oriented front end: reads commands from stdin, prints runtime events.

use std::path::PathBuf;

use chrono::{Local, TimeZone};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use super::state::AppState;
use crate::common::{ClientCommand, ClientEvent, CloseReason, Direction};

pub const HELP: &str = "\
Commands:
  /peers              list nearby peers
  /connect <id|name>  ask a peer for a session
  /accept             accept the oldest pending request
  /reject             reject the oldest pending request
  /send <path>        send a file over the session
  /close              end the current session
  /quit               exit
Anything else is sent as a chat message.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Peers,
    Connect(String),
    Accept,
    Reject,
    SendFile(PathBuf),
    Close,
    Help,
    Quit,
    Text(String),
    Empty,
    Invalid(String),
}

pub fn parse_input(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    let Some(command) = line.strip_prefix('/') else {
        return Input::Text(line.to_string());
    };

    let (name, arg) = match command.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (command, ""),
    };

    match (name, arg.is_empty()) {
        ("peers", _) => Input::Peers,
        ("connect", false) => Input::Connect(arg.to_string()),
        ("accept", _) => Input::Accept,
        ("reject", _) => Input::Reject,
        ("send", false) => Input::SendFile(PathBuf::from(arg)),
        ("close", _) => Input::Close,
        ("help", _) => Input::Help,
        ("quit", _) | ("exit", _) => Input::Quit,
        ("connect", true) => Input::Invalid("usage: /connect <id|name>".to_string()),
        ("send", true) => Input::Invalid("usage: /send <path>".to_string()),
        _ => Input::Invalid(format!("unknown command /{name}, try /help")),
    }
}

/// One printable line for `event`, or `None` if nothing new to show.
/// Call before [`AppState::apply`] so progress can be compared with the last
/// shown value.
pub fn render_event(state: &AppState, event: &ClientEvent) -> Option<String> {
    let line = match event {
        ClientEvent::PeerList(peers) => format!("{} peer(s) nearby", peers.len()),
        ClientEvent::PeerJoined(peer) => format!("+ {} ({}) is nearby", peer.display_name, peer.id),
        ClientEvent::PeerLeft(peer) => format!("- {} left", peer.display_name),
        ClientEvent::RequestReceived(peer) => format!(
            "{} wants to chat. /accept or /reject",
            peer.display_name
        ),
        ClientEvent::RequestAccepted { peer_id } => {
            format!("{} accepted your request", state.display_name(peer_id))
        }
        ClientEvent::RequestRejected { peer_id } => {
            format!("{} rejected your request", state.display_name(peer_id))
        }
        ClientEvent::SessionNegotiating { remote_id, .. } => {
            format!("Connecting to {}...", state.display_name(remote_id))
        }
        ClientEvent::SessionReady { remote_id } => {
            format!("Connected to {}. Type to chat.", state.display_name(remote_id))
        }
        ClientEvent::SessionClosed { remote_id, reason } => match reason {
            CloseReason::Local => format!("Session with {} closed", state.display_name(remote_id)),
            CloseReason::Remote => format!("{} ended the session", state.display_name(remote_id)),
            CloseReason::Failed(why) => format!(
                "Session with {} failed: {why}",
                state.display_name(remote_id)
            ),
        },
        ClientEvent::MessageReceived(message) | ClientEvent::MessageSent(message) => format!(
            "[{}] {}: {}",
            format_time(message.timestamp),
            state.display_name(&message.sender),
            message.content
        ),
        ClientEvent::TransferStarted {
            file_name,
            total_size,
            direction,
            ..
        } => match direction {
            Direction::Outgoing => format!("Sending {file_name} ({total_size} bytes)"),
            Direction::Incoming => format!("Receiving {file_name} ({total_size} bytes)"),
        },
        ClientEvent::TransferProgress {
            file_id, percent, ..
        } => {
            if !state.is_new_progress(file_id, *percent) {
                return None;
            }
            format!("  {percent}%")
        }
        ClientEvent::TransferCompleted { file_name, .. } => format!("Sent {file_name}"),
        ClientEvent::FileReceived(file) => match &file.saved_to {
            Some(path) => format!(
                "Received {} ({}, {} bytes) -> {}",
                file.file_name,
                file.mime_type,
                file.bytes.len(),
                path.display()
            ),
            None => format!(
                "Received {} ({}, {} bytes)",
                file.file_name,
                file.mime_type,
                file.bytes.len()
            ),
        },
        ClientEvent::TransferAborted { file_name, .. } => format!("Transfer of {file_name} aborted"),
        ClientEvent::Alert(message) => format!("! {message}"),
    };
    Some(line)
}

fn format_time(timestamp_millis: i64) -> String {
    match Local.timestamp_millis_opt(timestamp_millis).single() {
        Some(time) => time.format("%H:%M:%S").to_string(),
        None => "--:--:--".to_string(),
    }
}

pub struct ConsoleApp {
    state: AppState,
    command_sender: mpsc::Sender<ClientCommand>,
    event_receiver: mpsc::Receiver<ClientEvent>,
}

impl ConsoleApp {
    pub fn new(
        command_sender: mpsc::Sender<ClientCommand>,
        event_receiver: mpsc::Receiver<ClientEvent>,
    ) -> Self {
        Self {
            state: AppState::new(),
            command_sender,
            event_receiver,
        }
    }

    /// Runs until `/quit`, stdin EOF, or the runtime going away.
    pub async fn run(mut self) -> std::io::Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        println!("{HELP}");

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else {
                        break;
                    };
                    if !self.handle_input(parse_input(&line)).await {
                        break;
                    }
                }
                event = self.event_receiver.recv() => {
                    let Some(event) = event else {
                        println!("Disconnected.");
                        break;
                    };
                    if let Some(line) = render_event(&self.state, &event) {
                        println!("{line}");
                    }
                    self.state.apply(&event);
                }
            }
        }
        Ok(())
    }

    /// Returns `false` when the user asked to quit.
    async fn handle_input(&mut self, input: Input) -> bool {
        let command = match input {
            Input::Empty => return true,
            Input::Quit => return false,
            Input::Help => {
                println!("{HELP}");
                return true;
            }
            Input::Invalid(message) => {
                println!("! {message}");
                return true;
            }
            Input::Peers => {
                if self.state.peers.is_empty() {
                    println!("No peers nearby.");
                }
                for (id, name) in &self.state.peers {
                    println!("  {name} ({id})");
                }
                return true;
            }
            Input::Connect(query) => match self.state.resolve_peer(&query) {
                Some(peer_id) => {
                    self.state.outgoing_request = Some(peer_id.clone());
                    ClientCommand::SendRequest { peer_id }
                }
                None => {
                    println!("! No single peer matches '{query}'");
                    return true;
                }
            },
            Input::Accept => match self.state.take_request() {
                Some(peer) => ClientCommand::Accept { peer_id: peer.id },
                None => {
                    println!("! No pending request");
                    return true;
                }
            },
            Input::Reject => match self.state.take_request() {
                Some(peer) => ClientCommand::Reject { peer_id: peer.id },
                None => {
                    println!("! No pending request");
                    return true;
                }
            },
            Input::SendFile(path) => ClientCommand::SendFile { path },
            Input::Close => ClientCommand::CloseSession,
            Input::Text(text) => ClientCommand::SendText(text),
        };

        if let Err(err) = self.command_sender.send(command).await {
            log::warn!("Failed to send command to network: {err}");
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blink_common::PeerSummary;
    use uuid::Uuid;

    #[test]
    fn parses_commands_and_text() {
        assert_eq!(parse_input("  "), Input::Empty);
        assert_eq!(parse_input("hello there"), Input::Text("hello there".into()));
        assert_eq!(parse_input("/peers"), Input::Peers);
        assert_eq!(parse_input("/connect  Lan "), Input::Connect("Lan".into()));
        assert_eq!(
            parse_input("/send ~/My Files/a.pdf"),
            Input::SendFile(PathBuf::from("~/My Files/a.pdf"))
        );
        assert_eq!(parse_input("/accept"), Input::Accept);
        assert_eq!(parse_input("/quit"), Input::Quit);
        assert!(matches!(parse_input("/connect"), Input::Invalid(_)));
        assert!(matches!(parse_input("/dance"), Input::Invalid(_)));
    }

    #[test]
    fn renders_names_from_peer_table() {
        let mut state = AppState::new();
        state.apply(&ClientEvent::PeerList(vec![PeerSummary {
            id: "b".into(),
            display_name: "Bình".into(),
        }]));

        let line = render_event(&state, &ClientEvent::RequestAccepted { peer_id: "b".into() });
        assert_eq!(line.as_deref(), Some("Bình accepted your request"));
    }

    #[test]
    fn repeated_progress_is_not_rendered() {
        let mut state = AppState::new();
        let file_id = Uuid::new_v4();
        let progress = ClientEvent::TransferProgress {
            file_id,
            percent: 50,
            direction: Direction::Incoming,
        };

        assert!(render_event(&state, &progress).is_some());
        state.apply(&progress);
        assert!(render_event(&state, &progress).is_none());
    }
}
