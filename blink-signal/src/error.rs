//! Errors surfaced by the signaling hub.

use blink_common::{ErrorCode, ServerMessage};
use thiserror::Error;

/// Recoverable conditions reported back to the connection that caused them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignalError {
    /// Target peer is not connected.
    #[error("peer not found: {0}")]
    PeerNotFound(String),

    /// Another connection already holds this identity.
    #[error("identity already connected: {0}")]
    DuplicateIdentity(String),

    #[error("a chat request from {from} to {to} is already pending")]
    RequestAlreadyPending { from: String, to: String },

    #[error("no pending chat request from {from} to {to}")]
    NoPendingRequest { from: String, to: String },

    /// The hub task is gone (server shutting down).
    #[error("signaling hub unavailable")]
    HubClosed,
}

pub type SignalResult<T> = Result<T, SignalError>;

impl SignalError {
    pub fn code(&self) -> ErrorCode {
        match self {
            SignalError::PeerNotFound(_) => ErrorCode::PeerNotFound,
            SignalError::DuplicateIdentity(_) => ErrorCode::DuplicateIdentity,
            SignalError::RequestAlreadyPending { .. } => ErrorCode::RequestAlreadyPending,
            SignalError::NoPendingRequest { .. } => ErrorCode::NoPendingRequest,
            SignalError::HubClosed => ErrorCode::Unavailable,
        }
    }

    pub fn to_message(&self) -> ServerMessage {
        ServerMessage::Error {
            code: self.code(),
            message: self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_message_carries_code_and_text() {
        let err = SignalError::NoPendingRequest {
            from: "alice".into(),
            to: "bob".into(),
        };
        match err.to_message() {
            ServerMessage::Error { code, message } => {
                assert_eq!(code, ErrorCode::NoPendingRequest);
                assert_eq!(message, "no pending chat request from alice to bob");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }
}
