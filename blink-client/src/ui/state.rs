use std::collections::{BTreeMap, HashMap};

use blink_common::PeerSummary;
use uuid::Uuid;

use crate::common::{ChatMessage, ClientEvent};

/// Trạng thái cục bộ của UI.
#[derive(Debug, Default)]
pub struct AppState {
    /// Nearby peers by id.
    pub peers: BTreeMap<String, String>,
    pub messages: Vec<ChatMessage>,
    /// Requests waiting for our answer, oldest first.
    pub incoming_requests: Vec<PeerSummary>,
    pub outgoing_request: Option<String>,
    pub session_peer: Option<String>,
    pub session_ready: bool,
    /// Last reported percent per transfer, used to skip repeated progress lines.
    pub transfers: HashMap<Uuid, u8>,
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one runtime event into the state.
    pub fn apply(&mut self, event: &ClientEvent) {
        match event {
            ClientEvent::PeerList(peers) => {
                self.peers = peers
                    .iter()
                    .map(|peer| (peer.id.clone(), peer.display_name.clone()))
                    .collect();
            }
            ClientEvent::PeerJoined(peer) => {
                self.peers.insert(peer.id.clone(), peer.display_name.clone());
            }
            ClientEvent::PeerLeft(peer) => {
                self.peers.remove(&peer.id);
                self.incoming_requests.retain(|req| req.id != peer.id);
                if self.outgoing_request.as_deref() == Some(peer.id.as_str()) {
                    self.outgoing_request = None;
                }
            }
            ClientEvent::RequestReceived(peer) => {
                if !self.incoming_requests.iter().any(|req| req.id == peer.id) {
                    self.incoming_requests.push(peer.clone());
                }
            }
            ClientEvent::RequestAccepted { .. } | ClientEvent::RequestRejected { .. } => {
                self.outgoing_request = None;
            }
            ClientEvent::SessionNegotiating { remote_id, .. } => {
                self.session_peer = Some(remote_id.clone());
                self.session_ready = false;
            }
            ClientEvent::SessionReady { remote_id } => {
                self.session_peer = Some(remote_id.clone());
                self.session_ready = true;
            }
            ClientEvent::SessionClosed { .. } => {
                self.session_peer = None;
                self.session_ready = false;
                self.transfers.clear();
            }
            ClientEvent::MessageReceived(message) | ClientEvent::MessageSent(message) => {
                self.messages.push(message.clone());
            }
            ClientEvent::TransferStarted { file_id, .. } => {
                self.transfers.insert(*file_id, 0);
            }
            ClientEvent::TransferProgress { file_id, percent, .. } => {
                self.transfers.insert(*file_id, *percent);
            }
            ClientEvent::TransferCompleted { file_id, .. }
            | ClientEvent::TransferAborted { file_id, .. } => {
                self.transfers.remove(file_id);
            }
            ClientEvent::FileReceived(file) => {
                self.transfers.remove(&file.file_id);
            }
            ClientEvent::Alert(_) => {}
        }
    }

    /// Whether a progress event adds anything over what was last shown.
    pub fn is_new_progress(&self, file_id: &Uuid, percent: u8) -> bool {
        self.transfers.get(file_id) != Some(&percent)
    }

    pub fn display_name<'a>(&'a self, id: &'a str) -> &'a str {
        self.peers.get(id).map(String::as_str).unwrap_or(id)
    }

    /// Resolves `/connect` arguments: exact id first, then a unique
    /// case-insensitive display name.
    pub fn resolve_peer(&self, query: &str) -> Option<String> {
        if self.peers.contains_key(query) {
            return Some(query.to_string());
        }
        let mut matches = self
            .peers
            .iter()
            .filter(|(_, name)| name.eq_ignore_ascii_case(query))
            .map(|(id, _)| id.clone());
        let first = matches.next()?;
        if matches.next().is_some() {
            return None;
        }
        Some(first)
    }

    /// Oldest request waiting for an answer.
    pub fn take_request(&mut self) -> Option<PeerSummary> {
        if self.incoming_requests.is_empty() {
            None
        } else {
            Some(self.incoming_requests.remove(0))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(id: &str, name: &str) -> PeerSummary {
        PeerSummary {
            id: id.into(),
            display_name: name.into(),
        }
    }

    #[test]
    fn peer_table_follows_presence_events() {
        let mut state = AppState::new();
        state.apply(&ClientEvent::PeerList(vec![peer("a", "An"), peer("b", "Bình")]));
        state.apply(&ClientEvent::PeerJoined(peer("c", "Chi")));
        state.apply(&ClientEvent::PeerLeft(peer("a", "An")));

        assert_eq!(state.peers.keys().collect::<Vec<_>>(), vec!["b", "c"]);
        assert_eq!(state.display_name("c"), "Chi");
        assert_eq!(state.display_name("zzz"), "zzz");
    }

    #[test]
    fn resolve_peer_by_id_or_unique_name() {
        let mut state = AppState::new();
        state.apply(&ClientEvent::PeerList(vec![
            peer("a", "Lan"),
            peer("b", "lan"),
            peer("c", "Minh"),
        ]));

        assert_eq!(state.resolve_peer("a"), Some("a".into()));
        assert_eq!(state.resolve_peer("minh"), Some("c".into()));
        assert_eq!(state.resolve_peer("LAN"), None);
        assert_eq!(state.resolve_peer("ghost"), None);
    }

    #[test]
    fn requests_are_answered_oldest_first_and_dropped_on_leave() {
        let mut state = AppState::new();
        state.apply(&ClientEvent::RequestReceived(peer("a", "An")));
        state.apply(&ClientEvent::RequestReceived(peer("b", "Bình")));
        state.apply(&ClientEvent::RequestReceived(peer("a", "An")));
        assert_eq!(state.incoming_requests.len(), 2);

        state.apply(&ClientEvent::PeerLeft(peer("a", "An")));
        assert_eq!(state.take_request().map(|p| p.id), Some("b".into()));
        assert!(state.take_request().is_none());
    }

    #[test]
    fn progress_is_deduplicated() {
        let mut state = AppState::new();
        let file_id = Uuid::new_v4();
        state.apply(&ClientEvent::TransferStarted {
            file_id,
            file_name: "a".into(),
            total_size: 10,
            direction: crate::common::Direction::Incoming,
        });
        assert!(state.is_new_progress(&file_id, 33));
        state.apply(&ClientEvent::TransferProgress {
            file_id,
            percent: 33,
            direction: crate::common::Direction::Incoming,
        });
        assert!(!state.is_new_progress(&file_id, 33));
    }
}
