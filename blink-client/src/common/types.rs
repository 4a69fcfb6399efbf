use std::path::PathBuf;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Domain model đại diện một tin nhắn chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub sender: String,
    pub content: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outgoing,
    Incoming,
}

/// A fully reassembled file from the remote peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFile {
    pub file_id: Uuid,
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Bytes,
    /// Where the file was written, if a download directory is configured.
    pub saved_to: Option<PathBuf>,
}
