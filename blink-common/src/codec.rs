//! Newline-delimited JSON framing for the signaling connection.

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, LinesCodec};

/// Upper bound for a single signaling line. Negotiation payloads are small;
/// anything larger is treated as a protocol error by the codec.
pub const MAX_LINE_LENGTH: usize = 256 * 1024;

pub type LineFramed<T> = Framed<T, LinesCodec>;

pub fn line_framed<T>(io: T) -> LineFramed<T>
where
    T: AsyncRead + AsyncWrite,
{
    Framed::new(io, LinesCodec::new_with_max_length(MAX_LINE_LENGTH))
}

pub fn encode_line<M: Serialize>(message: &M) -> Result<String, serde_json::Error> {
    serde_json::to_string(message)
}

pub fn decode_line<M: DeserializeOwned>(line: &str) -> Result<M, serde_json::Error> {
    serde_json::from_str(line.trim())
}
