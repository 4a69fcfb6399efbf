//! Lifecycle of the single direct session a client may hold.
//!
//! ```text
//! New -> Negotiating -> Connected -> Closed
//!             |             |
//!             +--> Failed <-+
//! ```

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Local;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::common::{ChatMessage, ClientEvent, CloseReason, Direction, ReceivedFile};
use crate::network::link::{Connector, LinkEvents, LinkHandle};
use crate::transfer::{
    self, FileTransfer, Frame, FrameError, IncomingOutcome, IncomingTransfers, OutgoingUpdate,
    TransferMeta,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    New,
    Negotiating,
    Connected,
    Closed,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConnection {
    pub local_id: String,
    pub remote_id: String,
    pub role: Role,
    state: SessionState,
}

impl SessionConnection {
    pub fn new(local_id: &str, remote_id: &str, role: Role) -> Self {
        Self {
            local_id: local_id.to_string(),
            remote_id: remote_id.to_string(),
            role,
            state: SessionState::New,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Moves to `next` if the edge exists. `Closed` is reachable from every
    /// live state.
    pub fn transition(&mut self, next: SessionState) -> bool {
        use SessionState::*;

        let allowed = matches!(
            (self.state, next),
            (New, Negotiating)
                | (New, Closed)
                | (Negotiating, Connected)
                | (Negotiating, Closed)
                | (Negotiating, Failed)
                | (Connected, Closed)
                | (Connected, Failed)
        );
        if allowed {
            log::debug!(
                "Session with {}: {:?} -> {:?}",
                self.remote_id,
                self.state,
                next
            );
            self.state = next;
        }
        allowed
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no connected session")]
    NotConnected,

    #[error("already in a session with {0}")]
    SessionBusy(String),

    #[error("file is {size} bytes, limit is {limit}")]
    FileTooLarge { size: u64, limit: u64 },

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Gap between outgoing chunks on top of queue backpressure.
    pub pacing: Duration,
    /// Where completed incoming files are written. `None` keeps them in memory only.
    pub download_dir: Option<PathBuf>,
    /// Largest file sent or accepted, in bytes.
    pub max_file_size: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            pacing: Duration::from_millis(5),
            download_dir: None,
            max_file_size: transfer::DEFAULT_MAX_FILE_SIZE,
        }
    }
}

struct ActiveSession {
    connection: SessionConnection,
    link: LinkHandle,
    outgoing: HashMap<Uuid, FileTransfer>,
    senders: HashMap<Uuid, JoinHandle<()>>,
}

pub struct SessionManager {
    local_id: String,
    connector: Arc<dyn Connector>,
    events: mpsc::Sender<ClientEvent>,
    settings: SessionSettings,
    updates: mpsc::UnboundedSender<OutgoingUpdate>,
    /// Peers we accepted a request from and have not yet heard from.
    authorized: HashSet<String>,
    active: Option<ActiveSession>,
    incoming: IncomingTransfers,
}

impl SessionManager {
    /// The returned receiver carries file-sender reports; feed them back
    /// through [`SessionManager::on_outgoing_update`].
    pub fn new(
        local_id: String,
        connector: Arc<dyn Connector>,
        events: mpsc::Sender<ClientEvent>,
        settings: SessionSettings,
    ) -> (Self, mpsc::UnboundedReceiver<OutgoingUpdate>) {
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        let incoming = IncomingTransfers::with_max_file_size(settings.max_file_size);
        let manager = Self {
            local_id,
            connector,
            events,
            settings,
            updates: updates_tx,
            authorized: HashSet::new(),
            active: None,
            incoming,
        };
        (manager, updates_rx)
    }

    pub fn connection(&self) -> Option<&SessionConnection> {
        self.active.as_ref().map(|active| &active.connection)
    }

    pub fn remote_id(&self) -> Option<&str> {
        self.connection().map(|c| c.remote_id.as_str())
    }

    pub fn authorize(&mut self, remote_id: &str) {
        self.authorized.insert(remote_id.to_string());
    }

    pub fn revoke(&mut self, remote_id: &str) {
        self.authorized.remove(remote_id);
    }

    pub fn is_authorized(&self, remote_id: &str) -> bool {
        self.authorized.contains(remote_id)
    }

    /// Opens a link towards `remote_id` after they accepted our request.
    pub async fn initiate(&mut self, remote_id: &str) -> Result<LinkEvents, SessionError> {
        if let Some(active) = &self.active {
            return Err(SessionError::SessionBusy(active.connection.remote_id.clone()));
        }
        Ok(self.open(remote_id, Role::Initiator).await)
    }

    /// Negotiation payload relayed from `remote_id`. Returns the event stream
    /// of a newly created responder session.
    pub async fn accept_incoming(&mut self, remote_id: &str, payload: Value) -> Option<LinkEvents> {
        if let Some(active) = &self.active {
            if active.connection.remote_id != remote_id {
                log::warn!(
                    "Dropping negotiation from {remote_id}: session with {} is active",
                    active.connection.remote_id
                );
                return None;
            }
            if active.link.signal(payload).is_err() {
                log::debug!("Link to {remote_id} already gone; payload dropped");
            }
            return None;
        }

        if !self.authorized.remove(remote_id) {
            log::warn!("Dropping negotiation from {remote_id}: no accepted request");
            return None;
        }

        let events = self.open(remote_id, Role::Responder).await;
        if let Some(active) = &self.active {
            let _ = active.link.signal(payload);
        }
        Some(events)
    }

    async fn open(&mut self, remote_id: &str, role: Role) -> LinkEvents {
        let (link, events) = self.connector.open(role);
        let mut connection = SessionConnection::new(&self.local_id, remote_id, role);
        connection.transition(SessionState::Negotiating);
        log::info!("Negotiating direct session with {remote_id} as {role:?}");

        self.active = Some(ActiveSession {
            connection,
            link,
            outgoing: HashMap::new(),
            senders: HashMap::new(),
        });
        self.emit(ClientEvent::SessionNegotiating {
            remote_id: remote_id.to_string(),
            role,
        })
        .await;
        events
    }

    /// Where a payload produced by our link has to be relayed.
    pub fn on_negotiation_payload(&self, payload: Value) -> Option<(String, Value)> {
        self.remote_id().map(|remote| (remote.to_string(), payload))
    }

    pub async fn on_established(&mut self) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        if !active.connection.transition(SessionState::Connected) {
            return;
        }
        let remote_id = active.connection.remote_id.clone();
        log::info!("Direct session with {remote_id} is ready");
        self.emit(ClientEvent::SessionReady { remote_id }).await;
    }

    pub async fn on_data(&mut self, frame: Bytes) {
        let Some(remote_id) = self.connected_remote() else {
            log::debug!("Dropping frame received outside a connected session");
            return;
        };

        let frame = match Frame::decode(&frame) {
            Ok(frame) => frame,
            Err(err) => {
                log::warn!("Dropping malformed frame from {remote_id}: {err}");
                return;
            }
        };

        match frame {
            Frame::Text { content } => {
                self.emit(ClientEvent::MessageReceived(ChatMessage {
                    sender: remote_id,
                    content,
                    timestamp: Local::now().timestamp_millis(),
                }))
                .await;
            }
            Frame::FileStart {
                file_id,
                file_name,
                mime_type,
                total_size,
                total_chunks,
            } => {
                let meta =
                    TransferMeta::announced(file_id, file_name, mime_type, total_size, total_chunks);
                let outcome = self.incoming.on_start(meta);
                self.apply_incoming(outcome).await;
            }
            Frame::FileChunk {
                file_id,
                chunk_index,
                content,
            } => {
                let outcome = self.incoming.on_chunk(file_id, chunk_index, content);
                self.apply_incoming(outcome).await;
            }
        }
    }

    async fn apply_incoming(&mut self, outcome: IncomingOutcome) {
        match outcome {
            IncomingOutcome::Started(meta) => {
                self.emit(ClientEvent::TransferStarted {
                    file_id: meta.file_id,
                    file_name: meta.file_name,
                    total_size: meta.total_size,
                    direction: Direction::Incoming,
                })
                .await;
            }
            IncomingOutcome::Progress { file_id, percent } => {
                self.emit(ClientEvent::TransferProgress {
                    file_id,
                    percent,
                    direction: Direction::Incoming,
                })
                .await;
            }
            IncomingOutcome::Completed(file) => {
                let file = self.store_received(file).await;
                self.emit(ClientEvent::FileReceived(file)).await;
            }
            IncomingOutcome::Ignored => {}
        }
    }

    async fn store_received(&self, mut file: ReceivedFile) -> ReceivedFile {
        let Some(dir) = self.settings.download_dir.as_deref() else {
            return file;
        };
        match transfer::save_received(dir, &file.file_name, &file.bytes).await {
            Ok(path) => {
                log::info!("Saved '{}' to {}", file.file_name, path.display());
                file.saved_to = Some(path);
            }
            Err(err) => log::error!("Failed to save '{}': {err}", file.file_name),
        }
        file
    }

    pub async fn send_text(&mut self, content: String) -> Result<(), SessionError> {
        let link = self.connected_link("text message")?;
        let frame = Frame::Text {
            content: content.clone(),
        }
        .encode()?;
        link.send(frame).await.map_err(|_| SessionError::NotConnected)?;

        self.emit(ClientEvent::MessageSent(ChatMessage {
            sender: self.local_id.clone(),
            content,
            timestamp: Local::now().timestamp_millis(),
        }))
        .await;
        Ok(())
    }

    /// Reads `path` and starts streaming it in the background.
    pub async fn send_file(&mut self, path: &Path) -> Result<Uuid, SessionError> {
        let link = self.connected_link("file")?;
        let size = tokio::fs::metadata(path).await?.len();
        if size > self.settings.max_file_size {
            return Err(SessionError::FileTooLarge {
                size,
                limit: self.settings.max_file_size,
            });
        }
        let payload = Bytes::from(tokio::fs::read(path).await?);
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("file")
            .to_string();
        let mime_type = transfer::guess_mime_type(&file_name).to_string();
        let meta = TransferMeta::new(file_name, mime_type, payload.len() as u64);
        let file_id = meta.file_id;

        log::info!(
            "Sending '{}' ({} bytes, {} chunks)",
            meta.file_name,
            meta.total_size,
            meta.total_chunks
        );
        self.emit(ClientEvent::TransferStarted {
            file_id,
            file_name: meta.file_name.clone(),
            total_size: meta.total_size,
            direction: Direction::Outgoing,
        })
        .await;

        let task = tokio::spawn(transfer::send_chunked(
            link,
            meta.clone(),
            payload,
            self.settings.pacing,
            self.updates.clone(),
        ));
        if let Some(active) = self.active.as_mut() {
            active.outgoing.insert(file_id, FileTransfer::outgoing(meta));
            active.senders.insert(file_id, task);
        }
        Ok(file_id)
    }

    pub async fn on_outgoing_update(&mut self, update: OutgoingUpdate) {
        let Some(active) = self.active.as_mut() else {
            return;
        };

        match update {
            OutgoingUpdate::Progress {
                file_id,
                sent,
                percent,
            } => {
                let Some(transfer) = active.outgoing.get_mut(&file_id) else {
                    return;
                };
                transfer.record_sent(sent);
                self.emit(ClientEvent::TransferProgress {
                    file_id,
                    percent,
                    direction: Direction::Outgoing,
                })
                .await;
            }
            OutgoingUpdate::Finished { file_id } => {
                active.senders.remove(&file_id);
                let Some(mut transfer) = active.outgoing.remove(&file_id) else {
                    return;
                };
                transfer.mark_completed();
                log::info!("Finished sending '{}'", transfer.meta.file_name);
                self.emit(ClientEvent::TransferCompleted {
                    file_id,
                    file_name: transfer.meta.file_name,
                })
                .await;
            }
            OutgoingUpdate::Failed { file_id, reason } => {
                active.senders.remove(&file_id);
                let Some(mut transfer) = active.outgoing.remove(&file_id) else {
                    return;
                };
                transfer.abort();
                log::warn!("Sending '{}' failed: {reason}", transfer.meta.file_name);
                self.emit(ClientEvent::TransferAborted {
                    file_id,
                    file_name: transfer.meta.file_name,
                    direction: Direction::Outgoing,
                })
                .await;
            }
        }
    }

    /// Local hang-up. A no-op without a session.
    pub async fn close(&mut self) {
        self.teardown(SessionState::Closed, CloseReason::Local).await;
    }

    pub async fn on_remote_closed(&mut self) {
        self.teardown(SessionState::Closed, CloseReason::Remote).await;
    }

    pub async fn on_error(&mut self, reason: String) {
        log::warn!("Direct session failed: {reason}");
        self.teardown(SessionState::Failed, CloseReason::Failed(reason))
            .await;
    }

    async fn teardown(&mut self, state: SessionState, reason: CloseReason) {
        let Some(mut active) = self.active.take() else {
            return;
        };
        active.connection.transition(state);
        active.link.close();
        for (_, task) in active.senders.drain() {
            task.abort();
        }

        for (file_id, mut transfer) in active.outgoing.drain() {
            transfer.abort();
            self.emit(ClientEvent::TransferAborted {
                file_id,
                file_name: transfer.meta.file_name,
                direction: Direction::Outgoing,
            })
            .await;
        }
        for transfer in self.incoming.abort_all() {
            self.emit(ClientEvent::TransferAborted {
                file_id: transfer.meta.file_id,
                file_name: transfer.meta.file_name,
                direction: Direction::Incoming,
            })
            .await;
        }

        let remote_id = active.connection.remote_id;
        log::info!("Session with {remote_id} ended ({reason:?})");
        self.emit(ClientEvent::SessionClosed { remote_id, reason })
            .await;
    }

    fn connected_remote(&self) -> Option<String> {
        self.active
            .as_ref()
            .filter(|active| active.connection.state() == SessionState::Connected)
            .map(|active| active.connection.remote_id.clone())
    }

    fn connected_link(&self, what: &str) -> Result<LinkHandle, SessionError> {
        match &self.active {
            Some(active) if active.connection.state() == SessionState::Connected => {
                Ok(active.link.clone())
            }
            _ => {
                log::warn!("Cannot send {what}: no connected session");
                Err(SessionError::NotConnected)
            }
        }
    }

    async fn emit(&self, event: ClientEvent) {
        if self.events.send(event).await.is_err() {
            log::debug!("Event receiver dropped");
        }
    }
}
