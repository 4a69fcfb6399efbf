//! Two clients on loopback: discovery, request/accept, direct link, chat and
//! a file transfer.

use std::path::Path;
use std::time::Duration;

use blink_client::common::{ClientCommand, ClientEvent, CloseReason};
use blink_client::{ClientRuntime, Role, RuntimeSettings, SessionSettings};
use blink_signal::{ServerConfig, ServerHandle};
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(10);

struct TestClient {
    commands: mpsc::Sender<ClientCommand>,
    events: mpsc::Receiver<ClientEvent>,
}

impl TestClient {
    async fn send(&self, command: ClientCommand) {
        self.commands.send(command).await.unwrap();
    }

    /// Skips events until one matches.
    async fn wait_for<T>(&mut self, mut pick: impl FnMut(ClientEvent) -> Option<T>) -> T {
        timeout(WAIT, async {
            loop {
                let event = self.events.recv().await.expect("client runtime stopped");
                if let Some(found) = pick(event) {
                    return found;
                }
            }
        })
        .await
        .expect("timed out waiting for client event")
    }
}

async fn start_server() -> ServerHandle {
    let config = ServerConfig {
        listen_addr: "127.0.0.1:0".to_string(),
        stats_interval_secs: 60,
    };
    blink_signal::start(&config).await.expect("bind server")
}

fn spawn_client(server: &ServerHandle, id: &str, name: &str, download_dir: &Path) -> TestClient {
    let (cmd_tx, cmd_rx) = mpsc::channel(100);
    let (event_tx, event_rx) = mpsc::channel(1024);
    let settings = RuntimeSettings {
        server_addr: server.local_addr().to_string(),
        local_id: id.to_string(),
        display_name: name.to_string(),
        negotiation_timeout: WAIT,
        session: SessionSettings {
            pacing: Duration::ZERO,
            download_dir: Some(download_dir.to_path_buf()),
            ..SessionSettings::default()
        },
    };
    tokio::spawn(async move {
        let _ = ClientRuntime::new(event_tx, cmd_rx, settings).run().await;
    });
    TestClient {
        commands: cmd_tx,
        events: event_rx,
    }
}

#[tokio::test]
async fn request_accept_chat_and_file() {
    let server = start_server().await;
    let downloads = tempfile::tempdir().unwrap();

    let mut alice = spawn_client(&server, "alice", "Alice", downloads.path());
    let peers = alice
        .wait_for(|e| match e {
            ClientEvent::PeerList(peers) => Some(peers),
            _ => None,
        })
        .await;
    assert!(peers.is_empty());

    let mut bob = spawn_client(&server, "bob", "Bob", downloads.path());
    let peers = bob
        .wait_for(|e| match e {
            ClientEvent::PeerList(peers) => Some(peers),
            _ => None,
        })
        .await;
    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0].id, "alice");
    alice
        .wait_for(|e| matches!(e, ClientEvent::PeerJoined(p) if p.id == "bob").then_some(()))
        .await;

    alice
        .send(ClientCommand::SendRequest {
            peer_id: "bob".into(),
        })
        .await;
    let requester = bob
        .wait_for(|e| match e {
            ClientEvent::RequestReceived(peer) => Some(peer),
            _ => None,
        })
        .await;
    assert_eq!(requester.display_name, "Alice");

    bob.send(ClientCommand::Accept {
        peer_id: requester.id,
    })
    .await;

    let role = alice
        .wait_for(|e| match e {
            ClientEvent::SessionNegotiating { role, .. } => Some(role),
            _ => None,
        })
        .await;
    assert_eq!(role, Role::Initiator);
    let role = bob
        .wait_for(|e| match e {
            ClientEvent::SessionNegotiating { role, .. } => Some(role),
            _ => None,
        })
        .await;
    assert_eq!(role, Role::Responder);

    alice
        .wait_for(|e| matches!(e, ClientEvent::SessionReady { .. }).then_some(()))
        .await;
    bob.wait_for(|e| matches!(e, ClientEvent::SessionReady { .. }).then_some(()))
        .await;

    alice.send(ClientCommand::SendText("chào Bob".into())).await;
    let message = bob
        .wait_for(|e| match e {
            ClientEvent::MessageReceived(message) => Some(message),
            _ => None,
        })
        .await;
    assert_eq!(message.sender, "alice");
    assert_eq!(message.content, "chào Bob");

    let outbox = tempfile::tempdir().unwrap();
    let path = outbox.path().join("photo.jpg");
    let payload: Vec<u8> = (0..40 * 1024).map(|i| (i % 253) as u8).collect();
    tokio::fs::write(&path, &payload).await.unwrap();
    alice.send(ClientCommand::SendFile { path }).await;

    let received = bob
        .wait_for(|e| match e {
            ClientEvent::FileReceived(file) => Some(file),
            _ => None,
        })
        .await;
    assert_eq!(received.file_name, "photo.jpg");
    assert_eq!(received.mime_type, "image/jpeg");
    assert_eq!(received.bytes.as_ref(), payload.as_slice());
    let saved = received.saved_to.expect("file should be saved");
    assert_eq!(tokio::fs::read(saved).await.unwrap(), payload);

    alice
        .wait_for(|e| matches!(e, ClientEvent::TransferCompleted { .. }).then_some(()))
        .await;

    bob.send(ClientCommand::CloseSession).await;
    let reason = alice
        .wait_for(|e| match e {
            ClientEvent::SessionClosed { reason, .. } => Some(reason),
            _ => None,
        })
        .await;
    assert_eq!(reason, CloseReason::Remote);

    server.shutdown();
}

#[tokio::test]
async fn rejected_request_opens_no_session() {
    let server = start_server().await;
    let downloads = tempfile::tempdir().unwrap();
    let mut alice = spawn_client(&server, "alice", "Alice", downloads.path());
    alice
        .wait_for(|e| matches!(e, ClientEvent::PeerList(_)).then_some(()))
        .await;
    let mut bob = spawn_client(&server, "bob", "Bob", downloads.path());
    bob.wait_for(|e| matches!(e, ClientEvent::PeerList(_)).then_some(()))
        .await;

    alice
        .send(ClientCommand::SendRequest {
            peer_id: "bob".into(),
        })
        .await;
    bob.wait_for(|e| matches!(e, ClientEvent::RequestReceived(_)).then_some(()))
        .await;
    bob.send(ClientCommand::Reject {
        peer_id: "alice".into(),
    })
    .await;

    let event = alice
        .wait_for(|e| match e {
            ClientEvent::RequestRejected { .. } | ClientEvent::SessionNegotiating { .. } => Some(e),
            _ => None,
        })
        .await;
    assert_eq!(
        event,
        ClientEvent::RequestRejected {
            peer_id: "bob".into()
        }
    );

    // Sending without a session surfaces an alert instead of failing.
    alice.send(ClientCommand::SendText("anyone?".into())).await;
    let alert = alice
        .wait_for(|e| match e {
            ClientEvent::Alert(message) => Some(message),
            _ => None,
        })
        .await;
    assert!(alert.contains("no connected session"));

    server.shutdown();
}

#[tokio::test]
async fn request_to_unknown_peer_alerts() {
    let server = start_server().await;
    let downloads = tempfile::tempdir().unwrap();
    let mut alice = spawn_client(&server, "alice", "Alice", downloads.path());
    alice
        .wait_for(|e| matches!(e, ClientEvent::PeerList(_)).then_some(()))
        .await;

    alice
        .send(ClientCommand::SendRequest {
            peer_id: "ghost".into(),
        })
        .await;
    alice
        .wait_for(|e| matches!(e, ClientEvent::Alert(_)).then_some(()))
        .await;

    server.shutdown();
}

