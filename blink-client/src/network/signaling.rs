use std::net::SocketAddr;

use blink_common::{ClientMessage, LineFramed, ServerMessage, decode_line, encode_line, line_framed};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;

use crate::error::ClientError;

/// Line-oriented connection to the signaling server.
pub struct SignalingClient {
    framed: LineFramed<TcpStream>,
    local_addr: SocketAddr,
}

impl SignalingClient {
    /// Connects and introduces ourselves with `hello`.
    pub async fn connect(addr: &str, id: &str, display_name: &str) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let local_addr = stream.local_addr()?;

        let mut client = Self {
            framed: line_framed(stream),
            local_addr,
        };
        client
            .send(&ClientMessage::Hello {
                id: id.to_string(),
                display_name: display_name.to_string(),
            })
            .await?;

        log::info!("Connected to signaling server {addr} as {display_name} ({id})");
        Ok(client)
    }

    /// Our side of the signaling socket; its IP is the one peers on the same
    /// network can reach us at.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn send(&mut self, message: &ClientMessage) -> Result<(), ClientError> {
        let line = encode_line(message).map_err(|e| ClientError::Signaling(e.to_string()))?;
        self.framed
            .send(line)
            .await
            .map_err(|e| ClientError::Signaling(e.to_string()))
    }

    /// Next well-formed server message; `None` once the server hangs up.
    pub async fn next_message(&mut self) -> Result<Option<ServerMessage>, ClientError> {
        loop {
            let line = match self.framed.next().await {
                Some(Ok(line)) => line,
                Some(Err(err)) => return Err(ClientError::Signaling(err.to_string())),
                None => return Ok(None),
            };

            match decode_line::<ServerMessage>(&line) {
                Ok(message) => return Ok(Some(message)),
                Err(err) => log::warn!("Dropping malformed server message: {err}"),
            }
        }
    }
}
