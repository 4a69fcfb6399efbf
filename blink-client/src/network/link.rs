//! Direct connection primitive.
//!
//! A link is a capability object: the session feeds it negotiation payloads
//! received through the relay (`signal`), pushes frames (`send`) and
//! eventually `close`s it. Everything the link has to say comes back on its
//! event stream.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use bytes::Bytes;
use futures::stream::FuturesUnordered;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use uuid::Uuid;

use crate::session::Role;

/// Frames waiting to be written before `send` starts to wait.
pub const SEND_QUEUE_FRAMES: usize = 16;
pub const MAX_FRAME_LENGTH: usize = 1024 * 1024;
/// How long an accepted socket has to present the offer token.
pub const TOKEN_READ_TIMEOUT: Duration = Duration::from_secs(3);

pub type LinkEvents = mpsc::UnboundedReceiver<LinkEvent>;

#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// Negotiation payload to relay to the remote peer.
    Negotiation(Value),
    Established,
    Data(Bytes),
    /// Remote side went away.
    Closed,
    Error(String),
}

#[derive(Debug)]
pub enum LinkCommand {
    Signal(Value),
    Close,
}

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("link closed")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("negotiation failed: {0}")]
    Negotiation(String),

    #[error("no offered address was reachable")]
    Unreachable,
}

/// Sending half handed to the session (and cloned into file senders).
#[derive(Debug, Clone)]
pub struct LinkHandle {
    control: mpsc::UnboundedSender<LinkCommand>,
    outbound: mpsc::Sender<Bytes>,
}

/// Receiving half owned by whatever drives the link.
#[derive(Debug)]
pub struct LinkEndpoint {
    pub control: mpsc::UnboundedReceiver<LinkCommand>,
    pub outbound: mpsc::Receiver<Bytes>,
}

impl LinkHandle {
    pub fn channel(capacity: usize) -> (LinkHandle, LinkEndpoint) {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity);
        (
            LinkHandle {
                control: control_tx,
                outbound: outbound_tx,
            },
            LinkEndpoint {
                control: control_rx,
                outbound: outbound_rx,
            },
        )
    }

    pub fn signal(&self, payload: Value) -> Result<(), LinkError> {
        self.control
            .send(LinkCommand::Signal(payload))
            .map_err(|_| LinkError::Closed)
    }

    /// Waits for room in the send queue.
    pub async fn send(&self, frame: Bytes) -> Result<(), LinkError> {
        self.outbound.send(frame).await.map_err(|_| LinkError::Closed)
    }

    pub fn close(&self) {
        let _ = self.control.send(LinkCommand::Close);
    }
}

/// Factory for links; the session owns one and never looks inside.
pub trait Connector: Send + Sync {
    fn open(&self, role: Role) -> (LinkHandle, LinkEvents);
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Negotiation {
    Offer { addrs: Vec<SocketAddr>, token: String },
    Answer { token: String },
}

type LinkFramed = Framed<TcpStream, LengthDelimitedCodec>;

fn link_framed(stream: TcpStream) -> LinkFramed {
    let codec = LengthDelimitedCodec::builder()
        .length_field_length(4)
        .max_frame_length(MAX_FRAME_LENGTH)
        .new_codec();
    Framed::new(stream, codec)
}

/// Plain TCP links for peers on the same network. The initiator listens on
/// `advertise_ip`, the responder dials in and proves itself with the offer
/// token.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    advertise_ip: IpAddr,
    negotiation_timeout: Duration,
}

impl TcpConnector {
    pub fn new(advertise_ip: IpAddr, negotiation_timeout: Duration) -> Self {
        Self {
            advertise_ip,
            negotiation_timeout,
        }
    }
}

impl Connector for TcpConnector {
    fn open(&self, role: Role) -> (LinkHandle, LinkEvents) {
        let (handle, endpoint) = LinkHandle::channel(SEND_QUEUE_FRAMES);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_link(self.clone(), role, endpoint, events_tx));
        (handle, events_rx)
    }
}

async fn run_link(
    connector: TcpConnector,
    role: Role,
    mut endpoint: LinkEndpoint,
    events: mpsc::UnboundedSender<LinkEvent>,
) {
    let negotiation = async {
        match role {
            Role::Initiator => listen_for_responder(connector.advertise_ip, &mut endpoint, &events).await,
            Role::Responder => dial_initiator(&mut endpoint, &events).await,
        }
    };

    let framed = match timeout(connector.negotiation_timeout, negotiation).await {
        Ok(Ok(framed)) => framed,
        Ok(Err(LinkError::Closed)) => {
            log::debug!("Link closed during negotiation");
            return;
        }
        Ok(Err(err)) => {
            log::warn!("Link negotiation failed: {err}");
            let _ = events.send(LinkEvent::Error(err.to_string()));
            return;
        }
        Err(_) => {
            log::warn!(
                "Link negotiation timed out after {:?}",
                connector.negotiation_timeout
            );
            let _ = events.send(LinkEvent::Error("negotiation timed out".to_string()));
            return;
        }
    };

    if events.send(LinkEvent::Established).is_err() {
        return;
    }
    pump(framed, endpoint, events).await;
}

async fn listen_for_responder(
    ip: IpAddr,
    endpoint: &mut LinkEndpoint,
    events: &mpsc::UnboundedSender<LinkEvent>,
) -> Result<LinkFramed, LinkError> {
    let listener = TcpListener::bind(SocketAddr::new(ip, 0)).await?;
    let local_addr = listener.local_addr()?;
    let token = Uuid::new_v4().to_string();
    log::info!("Waiting for direct link on {local_addr}");

    let offer = Negotiation::Offer {
        addrs: vec![local_addr],
        token: token.clone(),
    };
    let offer = serde_json::to_value(&offer).map_err(|e| LinkError::Negotiation(e.to_string()))?;
    events
        .send(LinkEvent::Negotiation(offer))
        .map_err(|_| LinkError::Closed)?;

    let mut pending = FuturesUnordered::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, remote) = accepted?;
                stream.set_nodelay(true)?;
                pending.push(check_token(link_framed(stream), remote, token.clone()));
            }
            Some(checked) = pending.next(), if !pending.is_empty() => {
                if let Some((framed, remote)) = checked {
                    log::info!("Direct link established with {remote}");
                    return Ok(framed);
                }
            }
            command = endpoint.control.recv() => match command {
                Some(LinkCommand::Signal(payload)) => {
                    match serde_json::from_value::<Negotiation>(payload) {
                        Ok(Negotiation::Answer { token: answered }) if answered == token => {
                            log::debug!("Responder answered, waiting for its connection");
                        }
                        Ok(other) => log::warn!("Unexpected negotiation payload: {other:?}"),
                        Err(err) => log::warn!("Malformed negotiation payload: {err}"),
                    }
                }
                Some(LinkCommand::Close) | None => return Err(LinkError::Closed),
            },
        }
    }
}

/// Reads the first frame of an accepted socket and keeps the socket only if
/// it carries `token`.
async fn check_token(
    mut framed: LinkFramed,
    remote: SocketAddr,
    token: String,
) -> Option<(LinkFramed, SocketAddr)> {
    match timeout(TOKEN_READ_TIMEOUT, framed.next()).await {
        Ok(Some(Ok(frame))) if frame.as_ref() == token.as_bytes() => Some((framed, remote)),
        Ok(_) => {
            log::warn!("Dropping link attempt from {remote}: bad token");
            None
        }
        Err(_) => {
            log::warn!("Dropping link attempt from {remote}: no token within {TOKEN_READ_TIMEOUT:?}");
            None
        }
    }
}

async fn dial_initiator(
    endpoint: &mut LinkEndpoint,
    events: &mpsc::UnboundedSender<LinkEvent>,
) -> Result<LinkFramed, LinkError> {
    let (addrs, token) = loop {
        match endpoint.control.recv().await {
            Some(LinkCommand::Signal(payload)) => match serde_json::from_value::<Negotiation>(payload) {
                Ok(Negotiation::Offer { addrs, token }) => break (addrs, token),
                Ok(other) => log::warn!("Expected an offer, got {other:?}"),
                Err(err) => return Err(LinkError::Negotiation(format!("malformed offer: {err}"))),
            },
            Some(LinkCommand::Close) | None => return Err(LinkError::Closed),
        }
    };

    for addr in addrs {
        let stream = match TcpStream::connect(addr).await {
            Ok(stream) => stream,
            Err(err) => {
                log::debug!("Offered address {addr} unreachable: {err}");
                continue;
            }
        };
        stream.set_nodelay(true)?;
        let mut framed = link_framed(stream);
        framed.send(Bytes::from(token.clone().into_bytes())).await?;

        let answer = serde_json::to_value(&Negotiation::Answer { token })
            .map_err(|e| LinkError::Negotiation(e.to_string()))?;
        events
            .send(LinkEvent::Negotiation(answer))
            .map_err(|_| LinkError::Closed)?;
        log::info!("Direct link established with {addr}");
        return Ok(framed);
    }

    Err(LinkError::Unreachable)
}

async fn pump(
    mut framed: LinkFramed,
    mut endpoint: LinkEndpoint,
    events: mpsc::UnboundedSender<LinkEvent>,
) {
    loop {
        tokio::select! {
            frame = endpoint.outbound.recv() => match frame {
                Some(frame) => {
                    if let Err(err) = framed.send(frame).await {
                        let _ = events.send(LinkEvent::Error(err.to_string()));
                        return;
                    }
                }
                None => break,
            },
            incoming = framed.next() => match incoming {
                Some(Ok(frame)) => {
                    if events.send(LinkEvent::Data(frame.freeze())).is_err() {
                        break;
                    }
                }
                Some(Err(err)) => {
                    let _ = events.send(LinkEvent::Error(err.to_string()));
                    return;
                }
                None => {
                    let _ = events.send(LinkEvent::Closed);
                    return;
                }
            },
            command = endpoint.control.recv() => match command {
                Some(LinkCommand::Signal(_)) => log::debug!("Ignoring negotiation payload on an established link"),
                Some(LinkCommand::Close) | None => break,
            },
        }
    }

    // Flush whatever the session already queued before hanging up.
    while let Ok(frame) = endpoint.outbound.try_recv() {
        if framed.send(frame).await.is_err() {
            break;
        }
    }
    let _ = SinkExt::<Bytes>::close(&mut framed).await;
}

/// In-process links for driving a session without sockets.
#[cfg(test)]
pub(crate) mod memory {
    use std::sync::{Arc, Mutex};

    use super::*;

    pub struct MemoryLink {
        pub role: Role,
        pub endpoint: LinkEndpoint,
        pub events: mpsc::UnboundedSender<LinkEvent>,
    }

    #[derive(Clone, Default)]
    pub struct MemoryConnector {
        opened: Arc<Mutex<Vec<MemoryLink>>>,
    }

    impl MemoryConnector {
        pub fn take(&self) -> Option<MemoryLink> {
            let mut opened = self.opened.lock().unwrap();
            if opened.is_empty() {
                None
            } else {
                Some(opened.remove(0))
            }
        }
    }

    impl Connector for MemoryConnector {
        fn open(&self, role: Role) -> (LinkHandle, LinkEvents) {
            let (handle, endpoint) = LinkHandle::channel(SEND_QUEUE_FRAMES);
            let (events_tx, events_rx) = mpsc::unbounded_channel();
            self.opened.lock().unwrap().push(MemoryLink {
                role,
                endpoint,
                events: events_tx,
            });
            (handle, events_rx)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;

    const WAIT: Duration = Duration::from_secs(5);

    async fn next_event(events: &mut LinkEvents) -> LinkEvent {
        timeout(WAIT, events.recv())
            .await
            .expect("timed out waiting for link event")
            .expect("link event stream ended")
    }

    fn connector() -> TcpConnector {
        TcpConnector::new(IpAddr::V4(Ipv4Addr::LOCALHOST), WAIT)
    }

    #[tokio::test]
    async fn loopback_link_carries_frames_both_ways() {
        let connector = connector();
        let (initiator, mut initiator_events) = connector.open(Role::Initiator);
        let (responder, mut responder_events) = connector.open(Role::Responder);

        let offer = match next_event(&mut initiator_events).await {
            LinkEvent::Negotiation(offer) => offer,
            other => panic!("expected offer, got {other:?}"),
        };
        assert_eq!(offer["type"], "offer");
        responder.signal(offer).unwrap();

        let answer = match next_event(&mut responder_events).await {
            LinkEvent::Negotiation(answer) => answer,
            other => panic!("expected answer, got {other:?}"),
        };
        assert_eq!(answer["type"], "answer");
        assert_eq!(next_event(&mut responder_events).await, LinkEvent::Established);
        initiator.signal(answer).unwrap();
        assert_eq!(next_event(&mut initiator_events).await, LinkEvent::Established);

        initiator.send(Bytes::from_static(b"ping")).await.unwrap();
        assert_eq!(
            next_event(&mut responder_events).await,
            LinkEvent::Data(Bytes::from_static(b"ping"))
        );
        responder.send(Bytes::from_static(b"pong")).await.unwrap();
        assert_eq!(
            next_event(&mut initiator_events).await,
            LinkEvent::Data(Bytes::from_static(b"pong"))
        );

        initiator.close();
        assert_eq!(next_event(&mut responder_events).await, LinkEvent::Closed);
    }

    #[tokio::test]
    async fn wrong_token_never_establishes() {
        let connector = TcpConnector::new(IpAddr::V4(Ipv4Addr::LOCALHOST), Duration::from_millis(500));
        let (_initiator, mut initiator_events) = connector.open(Role::Initiator);
        let offer = match next_event(&mut initiator_events).await {
            LinkEvent::Negotiation(offer) => offer,
            other => panic!("expected offer, got {other:?}"),
        };

        let mut forged = offer.clone();
        forged["token"] = Value::String("forged".into());
        let (responder, mut responder_events) = connector.open(Role::Responder);
        responder.signal(forged).unwrap();

        match next_event(&mut initiator_events).await {
            LinkEvent::Error(reason) => assert!(reason.contains("timed out")),
            other => panic!("expected timeout, got {other:?}"),
        }
        // The responder thinks it connected; the initiator hung up on it.
        let _answer = next_event(&mut responder_events).await;
        assert_eq!(next_event(&mut responder_events).await, LinkEvent::Established);
    }

    #[tokio::test]
    async fn silent_connection_does_not_block_the_real_responder() {
        let connector = TcpConnector::new(IpAddr::V4(Ipv4Addr::LOCALHOST), Duration::from_secs(2));
        let (initiator, mut initiator_events) = connector.open(Role::Initiator);
        let offer = match next_event(&mut initiator_events).await {
            LinkEvent::Negotiation(offer) => offer,
            other => panic!("expected offer, got {other:?}"),
        };
        let addr: SocketAddr = offer["addrs"][0].as_str().unwrap().parse().unwrap();
        let _silent = TcpStream::connect(addr).await.unwrap();

        let (responder, mut responder_events) = connector.open(Role::Responder);
        responder.signal(offer).unwrap();
        let answer = match next_event(&mut responder_events).await {
            LinkEvent::Negotiation(answer) => answer,
            other => panic!("expected answer, got {other:?}"),
        };
        initiator.signal(answer).unwrap();

        assert_eq!(next_event(&mut initiator_events).await, LinkEvent::Established);
        assert_eq!(next_event(&mut responder_events).await, LinkEvent::Established);
    }

    #[tokio::test]
    async fn malformed_offer_is_an_error() {
        let (responder, mut events) = connector().open(Role::Responder);
        responder.signal(serde_json::json!({"type": "offer"})).unwrap();
        assert!(matches!(next_event(&mut events).await, LinkEvent::Error(_)));
    }
}
