use std::io;

use blink_common::ErrorCode;
use thiserror::Error;

/// Errors that stop the client runtime.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("signaling connection error: {0}")]
    Signaling(String),

    /// The server refused us (bad hello, identity already in use).
    #[error("rejected by signaling server ({code:?}): {message}")]
    Rejected { code: ErrorCode, message: String },
}
