use std::io;
use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::config::ServerConfig;
use crate::hub::{HubHandle, HubStats, SignalHub};

use super::connection::serve_connection;

/// A running signaling server: the hub task plus the accept loop.
pub struct ServerHandle {
    local_addr: SocketAddr,
    hub: HubHandle,
    accept_task: JoinHandle<()>,
    hub_task: JoinHandle<()>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn stats(&self) -> Option<HubStats> {
        self.hub.stats().await
    }

    pub fn shutdown(self) {
        self.accept_task.abort();
        self.hub_task.abort();
    }
}

/// Binds the listener and spawns the hub and the accept loop.
pub async fn start(config: &ServerConfig) -> io::Result<ServerHandle> {
    let listener = TcpListener::bind(&config.listen_addr).await?;
    let local_addr = listener.local_addr()?;

    let (hub, handle) = SignalHub::new(config.stats_interval());
    let hub_task = tokio::spawn(hub.run());
    let accept_task = tokio::spawn(accept_loop(listener, handle.clone()));

    log::info!("Signaling server listening on {local_addr}");

    Ok(ServerHandle {
        local_addr,
        hub: handle,
        accept_task,
        hub_task,
    })
}

async fn accept_loop(listener: TcpListener, hub: HubHandle) {
    let mut next_connection_id: u64 = 0;

    loop {
        match listener.accept().await {
            Ok((stream, remote)) => {
                next_connection_id += 1;
                if let Err(err) = stream.set_nodelay(true) {
                    log::debug!("Failed to set TCP_NODELAY for {remote}: {err}");
                }
                log::debug!("Accepted connection #{next_connection_id} from {remote}");
                tokio::spawn(serve_connection(
                    stream,
                    remote,
                    next_connection_id,
                    hub.clone(),
                ));
            }
            Err(err) => {
                // Usually fd exhaustion; back off instead of spinning.
                log::warn!("Failed to accept connection: {err}");
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
        }
    }
}
