// Shared harness: an in-memory connector whose sockets are driven by the
// test through `ServerEnd`s.
#![allow(dead_code, clippy::unwrap_used)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use stationlink_api::{Connector, Error, SocketEvent, SocketFuture, SocketLink};
use stationlink_core::{ClientConfig, ConnectionManager, ConnectionState};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

/// How the next connection attempt behaves.
pub enum Plan {
    Accept,
    Refuse,
    /// Stay opening until the sender fires; refuse if it is dropped.
    Gate(oneshot::Receiver<()>),
}

/// The server side of one accepted socket.
pub struct ServerEnd {
    pub from_client: mpsc::UnboundedReceiver<String>,
    pub to_client: mpsc::UnboundedSender<SocketEvent>,
    pub socket_cancel: CancellationToken,
}

impl ServerEnd {
    pub fn push(&self, frame: Value) {
        self.to_client.send(SocketEvent::Text(frame.to_string())).unwrap();
    }

    pub fn close(&self) {
        self.to_client
            .send(SocketEvent::Closed {
                code: Some(1006),
                reason: String::new(),
            })
            .unwrap();
    }

    /// Next frame the client wrote, decoded.
    pub async fn next_frame(&mut self) -> Value {
        let text = tokio::time::timeout(Duration::from_secs(5), self.from_client.recv())
            .await
            .expect("no frame from client")
            .expect("client closed the socket");
        serde_json::from_str(&text).unwrap()
    }

    /// Frames already written, without waiting.
    pub fn drain_frames(&mut self) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(text) = self.from_client.try_recv() {
            frames.push(serde_json::from_str(&text).unwrap());
        }
        frames
    }
}

pub struct MockConnector {
    plans: Mutex<VecDeque<Plan>>,
    servers: mpsc::UnboundedSender<ServerEnd>,
    attempts: watch::Sender<Vec<Instant>>,
}

impl MockConnector {
    pub fn new(plans: impl IntoIterator<Item = Plan>) -> (Arc<Self>, mpsc::UnboundedReceiver<ServerEnd>) {
        let (servers, accepted) = mpsc::unbounded_channel();
        let (attempts, _) = watch::channel(Vec::new());
        let connector = Arc::new(Self {
            plans: Mutex::new(plans.into_iter().collect()),
            servers,
            attempts,
        });
        (connector, accepted)
    }

    pub fn attempts(&self) -> usize {
        self.attempts.borrow().len()
    }

    /// When each attempt was made, in order.
    pub fn attempt_times(&self) -> Vec<Instant> {
        self.attempts.borrow().clone()
    }

    pub async fn wait_attempts(&self, n: usize) {
        let mut rx = self.attempts.subscribe();
        tokio::time::timeout(Duration::from_secs(3600), rx.wait_for(|a| a.len() >= n))
            .await
            .expect("connection attempts never happened")
            .unwrap();
    }

    fn accept(&self) -> SocketLink {
        let (outbound, from_client) = mpsc::unbounded_channel();
        let (to_client, inbound) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let _ = self.servers.send(ServerEnd {
            from_client,
            to_client,
            socket_cancel: cancel.clone(),
        });
        SocketLink {
            outbound,
            inbound,
            cancel,
        }
    }
}

impl Connector for MockConnector {
    fn connect(&self, _url: &Url) -> SocketFuture {
        self.attempts.send_modify(|a| a.push(Instant::now()));
        let plan = self.plans.lock().unwrap().pop_front().unwrap_or(Plan::Refuse);

        match plan {
            Plan::Accept => {
                let link = self.accept();
                Box::pin(async move { Ok(link) })
            }
            Plan::Refuse => {
                Box::pin(async { Err(Error::WebSocketConnect("connection refused".into())) })
            }
            Plan::Gate(gate) => {
                // Channels are created up front; the link is handed out only
                // once the gate opens.
                let link = self.accept();
                Box::pin(async move {
                    gate.await
                        .map_err(|_| Error::WebSocketConnect("gate dropped".into()))?;
                    Ok(link)
                })
            }
        }
    }
}

pub fn test_config() -> ClientConfig {
    ClientConfig::new(Url::parse("ws://mock.invalid:8765").unwrap())
}

pub fn manager(
    config: ClientConfig,
    plans: impl IntoIterator<Item = Plan>,
) -> (ConnectionManager, Arc<MockConnector>, mpsc::UnboundedReceiver<ServerEnd>) {
    let (connector, servers) = MockConnector::new(plans);
    let manager = ConnectionManager::new(config, connector.clone());
    (manager, connector, servers)
}

pub async fn wait_state(manager: &ConnectionManager, target: ConnectionState) {
    let mut rx = manager.watch_state();
    tokio::time::timeout(Duration::from_secs(3600), rx.wait_for(|s| *s == target))
        .await
        .unwrap_or_else(|_| panic!("never reached {target:?}"))
        .unwrap();
}

/// Connect and return the accepted server end once the manager is connected.
pub async fn connected(
    manager: &ConnectionManager,
    servers: &mut mpsc::UnboundedReceiver<ServerEnd>,
) -> ServerEnd {
    manager.connect(true);
    let server = servers.recv().await.unwrap();
    wait_state(manager, ConnectionState::Connected).await;
    server
}

/// Let spawned tasks run until they block.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}
