use blink_common::PeerSummary;
use uuid::Uuid;

use super::types::{ChatMessage, Direction, ReceivedFile};
use crate::session::Role;

/// Sự kiện từ tầng mạng gửi lên UI.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    PeerList(Vec<PeerSummary>),
    PeerJoined(PeerSummary),
    PeerLeft(PeerSummary),
    RequestReceived(PeerSummary),
    RequestAccepted { peer_id: String },
    RequestRejected { peer_id: String },
    SessionNegotiating { remote_id: String, role: Role },
    SessionReady { remote_id: String },
    SessionClosed { remote_id: String, reason: CloseReason },
    MessageReceived(ChatMessage),
    MessageSent(ChatMessage),
    TransferStarted {
        file_id: Uuid,
        file_name: String,
        total_size: u64,
        direction: Direction,
    },
    TransferProgress {
        file_id: Uuid,
        percent: u8,
        direction: Direction,
    },
    /// Sender side: every chunk has been handed to the channel.
    TransferCompleted { file_id: Uuid, file_name: String },
    FileReceived(ReceivedFile),
    TransferAborted {
        file_id: Uuid,
        file_name: String,
        direction: Direction,
    },
    /// Recoverable problem worth showing to the user.
    Alert(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    Local,
    Remote,
    Failed(String),
}
