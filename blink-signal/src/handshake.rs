//! Chat-request handshake between two registered peers.
//!
//! A request lives only while it is pending. Accepting or rejecting it
//! notifies the requester and discards the record.

use std::collections::HashMap;

use blink_common::ServerMessage;

use crate::error::{SignalError, SignalResult};
use crate::registry::PeerRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Pending,
    Accepted,
    Rejected,
    /// Not produced by the coordinator; requests never time out.
    Expired,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRequest {
    pub from_id: String,
    pub to_id: String,
    pub state: RequestState,
}

type RequestKey = (String, String);

#[derive(Debug, Default)]
pub struct HandshakeCoordinator {
    pending: HashMap<RequestKey, ChatRequest>,
}

impl HandshakeCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a pending request from `from` to `to` and notifies `to`.
    pub fn send_request(
        &mut self,
        registry: &PeerRegistry,
        from: &str,
        to: &str,
    ) -> SignalResult<()> {
        if from == to || !registry.contains(to) {
            return Err(SignalError::PeerNotFound(to.to_string()));
        }

        let key = (from.to_string(), to.to_string());
        if self.pending.contains_key(&key) {
            return Err(SignalError::RequestAlreadyPending {
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        let display_name = registry
            .get(from)
            .map(|peer| peer.display_name.clone())
            .unwrap_or_else(|| from.to_string());

        self.pending.insert(
            key,
            ChatRequest {
                from_id: from.to_string(),
                to_id: to.to_string(),
                state: RequestState::Pending,
            },
        );

        registry.deliver(
            to,
            ServerMessage::RequestReceived {
                from_id: from.to_string(),
                display_name,
            },
        );
        Ok(())
    }

    /// `acceptor` accepts the pending request `requester` sent to it.
    pub fn accept(
        &mut self,
        registry: &PeerRegistry,
        acceptor: &str,
        requester: &str,
    ) -> SignalResult<ChatRequest> {
        self.resolve(registry, acceptor, requester, RequestState::Accepted)
    }

    pub fn reject(
        &mut self,
        registry: &PeerRegistry,
        acceptor: &str,
        requester: &str,
    ) -> SignalResult<ChatRequest> {
        self.resolve(registry, acceptor, requester, RequestState::Rejected)
    }

    fn resolve(
        &mut self,
        registry: &PeerRegistry,
        acceptor: &str,
        requester: &str,
        outcome: RequestState,
    ) -> SignalResult<ChatRequest> {
        let key = (requester.to_string(), acceptor.to_string());
        let mut request = self
            .pending
            .remove(&key)
            .ok_or_else(|| SignalError::NoPendingRequest {
                from: requester.to_string(),
                to: acceptor.to_string(),
            })?;
        request.state = outcome;

        let notification = match outcome {
            RequestState::Accepted => ServerMessage::RequestAccepted {
                from_id: acceptor.to_string(),
            },
            _ => ServerMessage::RequestRejected {
                from_id: acceptor.to_string(),
            },
        };
        registry.deliver(requester, notification);

        Ok(request)
    }

    /// Drops every pending request `id` sent or received. Returns how many
    /// were discarded.
    pub fn discard_involving(&mut self, id: &str) -> usize {
        let before = self.pending.len();
        self.pending
            .retain(|(from, to), _| from.as_str() != id && to.as_str() != id);
        before - self.pending.len()
    }

    pub fn is_pending(&self, from: &str, to: &str) -> bool {
        self.pending
            .contains_key(&(from.to_string(), to.to_string()))
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
