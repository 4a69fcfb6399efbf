use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A peer as other peers see it in discovery lists.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerSummary {
    pub id: String,
    pub display_name: String,
}

/// Messages a client sends to the signaling server.
///
/// `Hello` must be the first line on a connection. Disconnecting is implicit
/// (the socket closes).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Hello { id: String, display_name: String },
    SendRequest { to_id: String },
    Accept { to_id: String },
    Reject { to_id: String },
    /// Opaque negotiation payload for the direct channel; the server never
    /// looks inside it.
    Signal { to_id: String, payload: Value },
}

/// Messages the signaling server pushes to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Snapshot of nearby peers, sent once after a successful hello.
    PeerList { peers: Vec<PeerSummary> },
    PeerJoined { id: String, display_name: String },
    PeerLeft { id: String, display_name: String },
    RequestReceived { from_id: String, display_name: String },
    RequestAccepted { from_id: String },
    RequestRejected { from_id: String },
    Signal { from_id: String, payload: Value },
    Error { code: ErrorCode, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidHello,
    MalformedMessage,
    PeerNotFound,
    DuplicateIdentity,
    RequestAlreadyPending,
    NoPendingRequest,
    Unavailable,
}

impl ErrorCode {
    /// Whether the server closes the connection after sending this error.
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            ErrorCode::InvalidHello | ErrorCode::DuplicateIdentity | ErrorCode::Unavailable
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn client_message_uses_snake_case_tag() {
        let msg = ClientMessage::SendRequest {
            to_id: "bob".into(),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value, json!({"type": "send_request", "to_id": "bob"}));
    }

    #[test]
    fn signal_payload_is_kept_verbatim() {
        let line = r#"{"type":"signal","to_id":"b","payload":{"sdp":"v=0","nested":[1,2,3]}}"#;
        let msg: ClientMessage = serde_json::from_str(line).unwrap();
        match msg {
            ClientMessage::Signal { to_id, payload } => {
                assert_eq!(to_id, "b");
                assert_eq!(payload, json!({"sdp": "v=0", "nested": [1, 2, 3]}));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn error_code_serializes_as_snake_case() {
        let msg = ServerMessage::Error {
            code: ErrorCode::RequestAlreadyPending,
            message: "pending".into(),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["code"], "request_already_pending");
        assert!(!ErrorCode::RequestAlreadyPending.is_fatal());
        assert!(ErrorCode::DuplicateIdentity.is_fatal());
    }
}
