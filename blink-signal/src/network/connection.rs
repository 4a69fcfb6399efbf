//! One client connection: hello gate, reader loop into the hub, and a writer
//! task draining the connection's outbound queue.

use std::net::SocketAddr;

use blink_common::{
    ClientMessage, ErrorCode, LineFramed, ServerMessage, decode_line, encode_line, line_framed,
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::hub::HubHandle;
use crate::registry::{Locality, OUTBOUND_QUEUE, PeerHandle};

type LineSink = SplitSink<LineFramed<TcpStream>, String>;

pub(crate) async fn serve_connection(
    stream: TcpStream,
    remote: SocketAddr,
    connection_id: u64,
    hub: HubHandle,
) {
    let locality = Locality::from_ip(remote.ip());
    let (mut sink, mut lines) = line_framed(stream).split();

    let (id, display_name) = match lines.next().await {
        Some(Ok(line)) => match decode_line::<ClientMessage>(&line) {
            Ok(ClientMessage::Hello { id, display_name })
                if !id.trim().is_empty() && !display_name.trim().is_empty() =>
            {
                (id.trim().to_string(), display_name.trim().to_string())
            }
            _ => {
                log::warn!("Rejecting {remote}: first message was not a valid hello");
                send_direct(
                    &mut sink,
                    ServerMessage::Error {
                        code: ErrorCode::InvalidHello,
                        message: "expected hello with id and display_name".to_string(),
                    },
                )
                .await;
                return;
            }
        },
        Some(Err(err)) => {
            log::warn!("Failed to read hello from {remote}: {err}");
            return;
        }
        None => return,
    };

    let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);
    let handle = PeerHandle::new(connection_id, outbound_tx.clone());

    if let Err(err) = hub
        .join(id.clone(), display_name.clone(), locality.clone(), handle)
        .await
    {
        log::warn!("Rejecting {display_name} ({id}) from {remote}: {err}");
        send_direct(&mut sink, err.to_message()).await;
        return;
    }

    log::info!("Client connected: {display_name} ({id}) from {remote}");
    let writer = tokio::spawn(write_outbound(sink, outbound_rx));

    while let Some(line) = lines.next().await {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                log::warn!("Read error from {id}: {err}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        match decode_line::<ClientMessage>(&line) {
            Ok(message) => {
                if hub.dispatch(id.clone(), message).await.is_err() {
                    break;
                }
            }
            Err(err) => {
                log::warn!("Malformed message from {id}: {err}");
                let _ = outbound_tx.try_send(ServerMessage::Error {
                    code: ErrorCode::MalformedMessage,
                    message: err.to_string(),
                });
            }
        }
    }

    hub.leave(id.clone(), connection_id).await;
    drop(outbound_tx);
    // The writer ends once the registry drops its copy of the sender.
    let _ = writer.await;
    log::info!("Client disconnected: {display_name} ({id})");
}

async fn write_outbound(mut sink: LineSink, mut outbound: mpsc::Receiver<ServerMessage>) {
    while let Some(message) = outbound.recv().await {
        let line = match encode_line(&message) {
            Ok(line) => line,
            Err(err) => {
                log::error!("Failed to encode outbound message: {err}");
                continue;
            }
        };
        if let Err(err) = sink.send(line).await {
            log::debug!("Connection writer stopped: {err}");
            break;
        }
    }
}

async fn send_direct(sink: &mut LineSink, message: ServerMessage) {
    match encode_line(&message) {
        Ok(line) => {
            if let Err(err) = sink.send(line).await {
                log::debug!("Failed to send error line: {err}");
            }
        }
        Err(err) => log::error!("Failed to encode error line: {err}"),
    }
}
