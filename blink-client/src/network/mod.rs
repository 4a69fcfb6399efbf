pub mod link;
pub mod signaling;

pub use link::{Connector, LinkEvent, LinkEvents, LinkHandle, TcpConnector};
pub use signaling::SignalingClient;
