use std::path::PathBuf;

/// Lệnh UI gửi xuống tầng mạng.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    /// Ask a nearby peer for a chat session.
    SendRequest { peer_id: String },
    /// Accept an incoming request; this is what authorizes the requester to
    /// open a direct session with us.
    Accept { peer_id: String },
    Reject { peer_id: String },
    SendText(String),
    SendFile { path: PathBuf },
    CloseSession,
}
