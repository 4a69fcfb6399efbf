//! Blink client: signaling connection, direct-session lifecycle and the
//! chunked file transfer protocol carried over the direct channel.

pub mod common;
pub mod config;
pub mod error;
pub mod network;
pub mod runtime;
pub mod session;
pub mod transfer;
pub mod ui;

pub use error::ClientError;
pub use runtime::{ClientRuntime, RuntimeSettings};
pub use session::{
    Role, SessionConnection, SessionError, SessionManager, SessionSettings, SessionState,
};
