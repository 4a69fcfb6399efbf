//! Presence registry: who is connected, and who is nearby.
//!
//! Peers are grouped by [`Locality`], a key the caller derives from the
//! observed network origin of the connection. Join and leave notifications
//! only ever go to peers sharing the same locality.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::net::IpAddr;

use blink_common::{PeerSummary, ServerMessage};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::{SignalError, SignalResult};

/// Grouping key for discovery. Two peers are "nearby" iff their keys are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Locality(String);

impl Locality {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Locality from an observed socket address. IPv4-mapped IPv6 addresses
    /// are folded to their IPv4 form so dual-stack listeners group correctly.
    pub fn from_ip(ip: IpAddr) -> Self {
        let ip = match ip {
            IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(ip),
            IpAddr::V4(_) => ip,
        };
        Self(ip.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Locality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Messages a connection may have waiting for its writer.
pub const OUTBOUND_QUEUE: usize = 256;

/// Outbound queue of one client connection.
#[derive(Debug, Clone)]
pub struct PeerHandle {
    connection_id: u64,
    outbound: mpsc::Sender<ServerMessage>,
}

impl PeerHandle {
    pub fn new(connection_id: u64, outbound: mpsc::Sender<ServerMessage>) -> Self {
        Self {
            connection_id,
            outbound,
        }
    }

    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    /// Queues a message for the connection's writer. Returns false if the
    /// connection is already gone. A client that stops reading loses
    /// messages once its queue is full.
    pub fn deliver(&self, message: ServerMessage) -> bool {
        match self.outbound.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(message)) => {
                log::warn!(
                    "Outbound queue full for connection {}, dropping {message:?}",
                    self.connection_id
                );
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

#[derive(Debug)]
pub struct PeerRecord {
    pub id: String,
    pub display_name: String,
    pub locality: Locality,
    handle: PeerHandle,
}

impl PeerRecord {
    pub fn summary(&self) -> PeerSummary {
        PeerSummary {
            id: self.id.clone(),
            display_name: self.display_name.clone(),
        }
    }

    pub fn handle(&self) -> &PeerHandle {
        &self.handle
    }
}

#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: HashMap<String, PeerRecord>,
    by_locality: HashMap<Locality, HashSet<String>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a peer and announces it to its locality mates.
    ///
    /// Returns the peers that were already present in the same locality.
    pub fn register(
        &mut self,
        id: &str,
        display_name: &str,
        locality: Locality,
        handle: PeerHandle,
    ) -> SignalResult<Vec<PeerSummary>> {
        if self.peers.contains_key(id) {
            return Err(SignalError::DuplicateIdentity(id.to_string()));
        }

        let mates = self.list_peers(&locality, id);

        self.by_locality
            .entry(locality.clone())
            .or_default()
            .insert(id.to_string());
        self.peers.insert(
            id.to_string(),
            PeerRecord {
                id: id.to_string(),
                display_name: display_name.to_string(),
                locality,
                handle,
            },
        );

        for mate in &mates {
            self.deliver(
                &mate.id,
                ServerMessage::PeerJoined {
                    id: id.to_string(),
                    display_name: display_name.to_string(),
                },
            );
        }

        Ok(mates)
    }

    /// Removes a peer and tells its remaining locality mates. Unknown ids are
    /// ignored.
    pub fn unregister(&mut self, id: &str) -> Option<PeerRecord> {
        let record = self.peers.remove(id)?;

        if let Some(members) = self.by_locality.get_mut(&record.locality) {
            members.remove(id);
            if members.is_empty() {
                self.by_locality.remove(&record.locality);
            }
        }

        for mate in self.list_peers(&record.locality, id) {
            self.deliver(
                &mate.id,
                ServerMessage::PeerLeft {
                    id: record.id.clone(),
                    display_name: record.display_name.clone(),
                },
            );
        }

        Some(record)
    }

    /// Peers in `locality`, minus `excluding_id`. Sorted by display name for
    /// stable listings; callers must not rely on the order.
    pub fn list_peers(&self, locality: &Locality, excluding_id: &str) -> Vec<PeerSummary> {
        let mut peers: Vec<PeerSummary> = self
            .by_locality
            .get(locality)
            .into_iter()
            .flatten()
            .filter(|id| id.as_str() != excluding_id)
            .filter_map(|id| self.peers.get(id))
            .map(PeerRecord::summary)
            .collect();
        peers.sort_by(|a, b| {
            a.display_name
                .cmp(&b.display_name)
                .then_with(|| a.id.cmp(&b.id))
        });
        peers
    }

    pub fn get(&self, id: &str) -> Option<&PeerRecord> {
        self.peers.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.peers.contains_key(id)
    }

    /// Sends a message to a registered peer. Returns false if the peer is
    /// unknown or its connection is closed.
    pub fn deliver(&self, id: &str, message: ServerMessage) -> bool {
        match self.peers.get(id) {
            Some(record) => record.handle.deliver(message),
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn locality_count(&self) -> usize {
        self.by_locality.len()
    }
}
