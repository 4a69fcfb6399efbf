//! Best-effort forwarding of negotiation payloads between two peers.

use blink_common::ServerMessage;
use serde_json::Value;

use crate::registry::PeerRegistry;

/// Forwards `payload` unchanged to `to_id`. A missing target is not an error:
/// presence is inherently racy, so the sender simply never hears back.
pub fn relay(registry: &PeerRegistry, from_id: &str, to_id: &str, payload: Value) -> bool {
    let delivered = registry.deliver(
        to_id,
        ServerMessage::Signal {
            from_id: from_id.to_string(),
            payload,
        },
    );
    if !delivered {
        log::debug!("Dropped signal from {from_id}: {to_id} is not connected");
    }
    delivered
}
