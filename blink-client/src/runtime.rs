use std::sync::Arc;
use std::time::Duration;

use blink_common::{ClientMessage, PeerSummary, ServerMessage};
use tokio::sync::mpsc;

use crate::common::{ClientCommand, ClientEvent};
use crate::error::ClientError;
use crate::network::link::{LinkEvent, LinkEvents, TcpConnector};
use crate::network::SignalingClient;
use crate::session::{SessionManager, SessionSettings};

/// Everything the runtime needs to join the signaling server.
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub server_addr: String,
    pub local_id: String,
    pub display_name: String,
    pub negotiation_timeout: Duration,
    pub session: SessionSettings,
}

/// Background task driving signaling, the direct session and transfers.
/// The front end talks to it only through the two channels.
pub struct ClientRuntime {
    event_sender: mpsc::Sender<ClientEvent>,
    command_receiver: mpsc::Receiver<ClientCommand>,
    settings: RuntimeSettings,
}

impl ClientRuntime {
    pub fn new(
        event_sender: mpsc::Sender<ClientEvent>,
        command_receiver: mpsc::Receiver<ClientCommand>,
        settings: RuntimeSettings,
    ) -> Self {
        Self {
            event_sender,
            command_receiver,
            settings,
        }
    }

    pub async fn run(mut self) -> Result<(), ClientError> {
        let signaling = SignalingClient::connect(
            &self.settings.server_addr,
            &self.settings.local_id,
            &self.settings.display_name,
        )
        .await?;

        // Peers on the same network reach us on the address we reach the server from.
        let advertise_ip = signaling.local_addr().ip();
        let connector = Arc::new(TcpConnector::new(
            advertise_ip,
            self.settings.negotiation_timeout,
        ));
        let (session, mut updates) = SessionManager::new(
            self.settings.local_id.clone(),
            connector,
            self.event_sender.clone(),
            self.settings.session.clone(),
        );

        let mut state = RuntimeState {
            events: self.event_sender.clone(),
            signaling,
            session,
            link_events: None,
        };

        log::info!("Client event loop started (advertising {advertise_ip})");
        let result = loop {
            tokio::select! {
                command = self.command_receiver.recv() => {
                    match command {
                        Some(command) => {
                            if let Err(err) = state.handle_command(command).await {
                                break Err(err);
                            }
                        }
                        None => {
                            log::info!("Front end closed, shutting down client");
                            break Ok(());
                        }
                    }
                }
                message = state.signaling.next_message() => {
                    match message {
                        Ok(Some(message)) => {
                            if let Err(err) = state.handle_server_message(message).await {
                                break Err(err);
                            }
                        }
                        Ok(None) => {
                            break Err(ClientError::Signaling(
                                "server closed the connection".to_string(),
                            ));
                        }
                        Err(err) => break Err(err),
                    }
                }
                event = next_link_event(&mut state.link_events) => {
                    if let Err(err) = state.handle_link_event(event).await {
                        break Err(err);
                    }
                }
                Some(update) = updates.recv() => {
                    state.session.on_outgoing_update(update).await;
                }
            }
        };

        state.session.close().await;
        result
    }
}

struct RuntimeState {
    events: mpsc::Sender<ClientEvent>,
    signaling: SignalingClient,
    session: SessionManager,
    link_events: Option<LinkEvents>,
}

impl RuntimeState {
    async fn handle_command(&mut self, command: ClientCommand) -> Result<(), ClientError> {
        match command {
            ClientCommand::SendRequest { peer_id } => {
                log::info!("Requesting a session with {peer_id}");
                self.signaling
                    .send(&ClientMessage::SendRequest { to_id: peer_id })
                    .await?;
            }
            ClientCommand::Accept { peer_id } => {
                self.session.authorize(&peer_id);
                self.signaling
                    .send(&ClientMessage::Accept { to_id: peer_id })
                    .await?;
            }
            ClientCommand::Reject { peer_id } => {
                self.signaling
                    .send(&ClientMessage::Reject { to_id: peer_id })
                    .await?;
            }
            ClientCommand::SendText(content) => {
                if let Err(err) = self.session.send_text(content).await {
                    self.emit(ClientEvent::Alert(format!("Message not sent: {err}")))
                        .await;
                }
            }
            ClientCommand::SendFile { path } => {
                if let Err(err) = self.session.send_file(&path).await {
                    self.emit(ClientEvent::Alert(format!(
                        "Cannot send {}: {err}",
                        path.display()
                    )))
                    .await;
                }
            }
            ClientCommand::CloseSession => {
                self.session.close().await;
                self.link_events = None;
            }
        }
        Ok(())
    }

    async fn handle_server_message(&mut self, message: ServerMessage) -> Result<(), ClientError> {
        match message {
            ServerMessage::PeerList { peers } => {
                log::info!("{} nearby peers", peers.len());
                self.emit(ClientEvent::PeerList(peers)).await;
            }
            ServerMessage::PeerJoined { id, display_name } => {
                log::info!("Peer joined: {display_name} ({id})");
                self.emit(ClientEvent::PeerJoined(PeerSummary { id, display_name }))
                    .await;
            }
            ServerMessage::PeerLeft { id, display_name } => {
                log::info!("Peer left: {display_name} ({id})");
                self.session.revoke(&id);
                self.emit(ClientEvent::PeerLeft(PeerSummary { id, display_name }))
                    .await;
            }
            ServerMessage::RequestReceived {
                from_id,
                display_name,
            } => {
                self.emit(ClientEvent::RequestReceived(PeerSummary {
                    id: from_id,
                    display_name,
                }))
                .await;
            }
            ServerMessage::RequestAccepted { from_id } => {
                self.emit(ClientEvent::RequestAccepted {
                    peer_id: from_id.clone(),
                })
                .await;
                match self.session.initiate(&from_id).await {
                    Ok(events) => self.link_events = Some(events),
                    Err(err) => {
                        log::warn!("Cannot start session with {from_id}: {err}");
                        self.emit(ClientEvent::Alert(err.to_string())).await;
                    }
                }
            }
            ServerMessage::RequestRejected { from_id } => {
                self.emit(ClientEvent::RequestRejected { peer_id: from_id })
                    .await;
            }
            ServerMessage::Signal { from_id, payload } => {
                if let Some(events) = self.session.accept_incoming(&from_id, payload).await {
                    self.link_events = Some(events);
                }
            }
            ServerMessage::Error { code, message } => {
                if code.is_fatal() {
                    log::error!("Signaling server refused us ({code:?}): {message}");
                    return Err(ClientError::Rejected { code, message });
                }
                log::warn!("Signaling error ({code:?}): {message}");
                self.emit(ClientEvent::Alert(message)).await;
            }
        }
        Ok(())
    }

    async fn handle_link_event(&mut self, event: Option<LinkEvent>) -> Result<(), ClientError> {
        match event {
            Some(LinkEvent::Negotiation(payload)) => {
                if let Some((to_id, payload)) = self.session.on_negotiation_payload(payload) {
                    self.signaling
                        .send(&ClientMessage::Signal { to_id, payload })
                        .await?;
                }
            }
            Some(LinkEvent::Established) => self.session.on_established().await,
            Some(LinkEvent::Data(frame)) => self.session.on_data(frame).await,
            Some(LinkEvent::Closed) | None => {
                self.session.on_remote_closed().await;
                self.link_events = None;
            }
            Some(LinkEvent::Error(reason)) => {
                self.session.on_error(reason).await;
                self.link_events = None;
            }
        }
        Ok(())
    }

    async fn emit(&self, event: ClientEvent) {
        if let Err(err) = self.events.send(event).await {
            log::warn!("Failed to notify front end: {err:?}");
        }
    }
}

/// Pends forever while there is no link so the select loop ignores it.
async fn next_link_event(link_events: &mut Option<LinkEvents>) -> Option<LinkEvent> {
    match link_events {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}
