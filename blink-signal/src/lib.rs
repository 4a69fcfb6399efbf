//! Signaling server: presence registry, chat-request handshake and the
//! negotiation relay, all owned by a single hub task.

pub mod config;
pub mod error;
pub mod handshake;
pub mod hub;
pub mod network;
pub mod registry;
pub mod relay;

pub use config::ServerConfig;
pub use error::{SignalError, SignalResult};
pub use hub::{HubHandle, HubStats, SignalHub};
pub use network::server::{ServerHandle, start};
pub use registry::{Locality, PeerHandle, PeerRegistry};
