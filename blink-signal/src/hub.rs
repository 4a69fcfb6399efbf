//! The hub task owns the registry and the handshake coordinator.
//!
//! Every connection talks to it through [`HubHandle`], so registry and
//! request mutations are applied one at a time, and notifications are queued
//! only after the mutation that caused them.

use std::time::Duration;

use blink_common::{ClientMessage, ErrorCode, ServerMessage};
use tokio::sync::{mpsc, oneshot};
use tokio::time::interval;

use crate::error::{SignalError, SignalResult};
use crate::handshake::HandshakeCoordinator;
use crate::registry::{Locality, PeerHandle, PeerRegistry};
use crate::relay::relay;

const HUB_QUEUE_DEPTH: usize = 1024;

#[derive(Debug)]
pub enum HubCommand {
    Join {
        id: String,
        display_name: String,
        locality: Locality,
        handle: PeerHandle,
        reply: oneshot::Sender<SignalResult<()>>,
    },
    Leave {
        id: String,
        connection_id: u64,
    },
    Message {
        id: String,
        message: ClientMessage,
    },
    Stats {
        reply: oneshot::Sender<HubStats>,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubStats {
    pub peers: usize,
    pub localities: usize,
    pub pending_requests: usize,
}

/// Cheap cloneable sender side of the hub.
#[derive(Debug, Clone)]
pub struct HubHandle {
    commands: mpsc::Sender<HubCommand>,
}

impl HubHandle {
    /// Registers a connection. On success the peer list is already queued on
    /// `handle` when this returns.
    pub async fn join(
        &self,
        id: String,
        display_name: String,
        locality: Locality,
        handle: PeerHandle,
    ) -> SignalResult<()> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(HubCommand::Join {
                id,
                display_name,
                locality,
                handle,
                reply,
            })
            .await
            .map_err(|_| SignalError::HubClosed)?;
        response.await.map_err(|_| SignalError::HubClosed)?
    }

    pub async fn leave(&self, id: String, connection_id: u64) {
        if self
            .commands
            .send(HubCommand::Leave { id, connection_id })
            .await
            .is_err()
        {
            log::debug!("Hub closed before leave was processed");
        }
    }

    pub async fn dispatch(&self, id: String, message: ClientMessage) -> SignalResult<()> {
        self.commands
            .send(HubCommand::Message { id, message })
            .await
            .map_err(|_| SignalError::HubClosed)
    }

    pub async fn stats(&self) -> Option<HubStats> {
        let (reply, response) = oneshot::channel();
        self.commands.send(HubCommand::Stats { reply }).await.ok()?;
        response.await.ok()
    }
}

pub struct SignalHub {
    registry: PeerRegistry,
    handshakes: HandshakeCoordinator,
    commands: mpsc::Receiver<HubCommand>,
    stats_interval: Duration,
}

impl SignalHub {
    pub fn new(stats_interval: Duration) -> (Self, HubHandle) {
        let (tx, rx) = mpsc::channel(HUB_QUEUE_DEPTH);
        let hub = Self {
            registry: PeerRegistry::new(),
            handshakes: HandshakeCoordinator::new(),
            commands: rx,
            stats_interval,
        };
        (hub, HubHandle { commands: tx })
    }

    /// Runs until every [`HubHandle`] has been dropped.
    pub async fn run(mut self) {
        let mut stats_interval = interval(self.stats_interval);
        // First tick fires immediately.
        stats_interval.tick().await;

        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    match command {
                        Some(command) => self.handle_command(command),
                        None => break,
                    }
                }
                _ = stats_interval.tick() => {
                    let stats = self.stats();
                    log::info!(
                        "Statistics: {} connected peers in {} localities, {} pending requests",
                        stats.peers,
                        stats.localities,
                        stats.pending_requests
                    );
                }
            }
        }

        log::info!("Signaling hub stopped");
    }

    fn handle_command(&mut self, command: HubCommand) {
        match command {
            HubCommand::Join {
                id,
                display_name,
                locality,
                handle,
                reply,
            } => {
                let result = self.handle_join(&id, &display_name, locality, handle);
                let _ = reply.send(result);
            }
            HubCommand::Leave { id, connection_id } => {
                self.handle_leave(&id, connection_id);
            }
            HubCommand::Message { id, message } => {
                if let Err(err) = self.handle_message(&id, message) {
                    log::debug!("Request from {id} failed: {err}");
                    self.registry.deliver(&id, err.to_message());
                }
            }
            HubCommand::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
        }
    }

    fn handle_join(
        &mut self,
        id: &str,
        display_name: &str,
        locality: Locality,
        handle: PeerHandle,
    ) -> SignalResult<()> {
        let peers = self
            .registry
            .register(id, display_name, locality.clone(), handle)?;
        log::info!(
            "Peer joined: {display_name} ({id}) @ {locality}, {} nearby",
            peers.len()
        );
        self.registry.deliver(id, ServerMessage::PeerList { peers });
        Ok(())
    }

    fn handle_leave(&mut self, id: &str, connection_id: u64) {
        // A rejected duplicate must not evict the live connection.
        let owns_identity = self
            .registry
            .get(id)
            .is_some_and(|peer| peer.handle().connection_id() == connection_id);
        if !owns_identity {
            return;
        }

        let discarded = self.handshakes.discard_involving(id);
        if let Some(record) = self.registry.unregister(id) {
            log::info!(
                "Peer left: {} ({id}), {discarded} pending requests discarded",
                record.display_name
            );
        }
    }

    fn handle_message(&mut self, id: &str, message: ClientMessage) -> SignalResult<()> {
        match message {
            ClientMessage::Hello { .. } => {
                self.registry.deliver(
                    id,
                    ServerMessage::Error {
                        code: ErrorCode::MalformedMessage,
                        message: "already identified".to_string(),
                    },
                );
                Ok(())
            }
            ClientMessage::SendRequest { to_id } => {
                self.handshakes.send_request(&self.registry, id, &to_id)
            }
            ClientMessage::Accept { to_id } => self
                .handshakes
                .accept(&self.registry, id, &to_id)
                .map(|_| ()),
            ClientMessage::Reject { to_id } => self
                .handshakes
                .reject(&self.registry, id, &to_id)
                .map(|_| ()),
            ClientMessage::Signal { to_id, payload } => {
                relay(&self.registry, id, &to_id, payload);
                Ok(())
            }
        }
    }

    fn stats(&self) -> HubStats {
        HubStats {
            peers: self.registry.len(),
            localities: self.registry.locality_count(),
            pending_requests: self.handshakes.pending_count(),
        }
    }
}
