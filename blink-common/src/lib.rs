//! Wire types shared by the signaling server and the client.

pub mod codec;
pub mod messages;

pub use codec::{LineFramed, decode_line, encode_line, line_framed};
pub use messages::{ClientMessage, ErrorCode, PeerSummary, ServerMessage};
