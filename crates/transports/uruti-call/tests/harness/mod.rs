//! In-process signaling relay for integration tests
//!
//! Accepts WebSocket connections on `<base>/<peer_id>`, answers `register`
//! and `get-peers`, announces joins and departures, and forwards `offer`,
//! `answer` and `ice-candidate` frames to their recipient wrapped in `data`.

#![allow(dead_code)]

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

pub const RELAY_PATH: &str = "/api/v1/ws/signal";

#[derive(Default)]
struct RelayState {
    clients: HashMap<String, mpsc::UnboundedSender<Message>>,
    user_ids: HashMap<String, String>,
    received: Vec<(String, Value)>,
}

impl RelayState {
    fn descriptor(&self, peer_id: &str) -> Value {
        json!({
            "peer_id": peer_id,
            "user_id": self.user_ids.get(peer_id).cloned().unwrap_or_default(),
            "connected_at": "2026-01-01T00:00:00+00:00",
        })
    }

    fn send(&self, peer_id: &str, frame: &Value) {
        if let Some(tx) = self.clients.get(peer_id) {
            let _ = tx.send(Message::Text(frame.to_string()));
        }
    }

    fn broadcast_except(&self, except: &str, frame: &Value) {
        for (peer_id, tx) in &self.clients {
            if peer_id != except {
                let _ = tx.send(Message::Text(frame.to_string()));
            }
        }
    }
}

/// Relay bound to an ephemeral localhost port
pub struct TestRelay {
    addr: SocketAddr,
    state: Arc<Mutex<RelayState>>,
    accept_task: JoinHandle<()>,
}

impl TestRelay {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(Mutex::new(RelayState::default()));

        let accept_state = Arc::clone(&state);
        let accept_task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(handle_connection(stream, Arc::clone(&accept_state)));
            }
        });

        Self {
            addr,
            state,
            accept_task,
        }
    }

    /// Base URL for `SignalingConfig::url_override`
    pub fn base_url(&self) -> String {
        format!("ws://{}{}", self.addr, RELAY_PATH)
    }

    pub fn connected_peers(&self) -> Vec<String> {
        let mut peers: Vec<_> = self.state.lock().clients.keys().cloned().collect();
        peers.sort();
        peers
    }

    /// Frames of `kind` received from any peer, as `(sender, frame)`
    pub fn received_of(&self, kind: &str) -> Vec<(String, Value)> {
        self.state
            .lock()
            .received
            .iter()
            .filter(|(_, frame)| frame["type"] == kind)
            .cloned()
            .collect()
    }

    /// Push a raw frame to one connected peer
    pub fn send_to(&self, peer_id: &str, frame: Value) {
        self.state.lock().send(peer_id, &frame);
    }

    /// Push a raw text frame, bypassing JSON encoding
    pub fn send_text_to(&self, peer_id: &str, text: &str) {
        if let Some(tx) = self.state.lock().clients.get(peer_id) {
            let _ = tx.send(Message::Text(text.to_string()));
        }
    }

    /// Drop the socket of one peer as if the relay lost it
    pub fn kick(&self, peer_id: &str) {
        if let Some(tx) = self.state.lock().clients.get(peer_id) {
            let _ = tx.send(Message::Close(None));
        }
    }

    pub async fn wait_for_peers(&self, count: usize) {
        wait_until(Duration::from_secs(5), || self.connected_peers().len() == count).await;
    }
}

impl Drop for TestRelay {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn handle_connection(stream: TcpStream, state: Arc<Mutex<RelayState>>) {
    let mut path = String::new();
    let capture_path = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        path = req.uri().path().to_string();
        Ok(resp)
    };
    let ws_stream = match tokio_tungstenite::accept_hdr_async(stream, capture_path).await {
        Ok(ws_stream) => ws_stream,
        Err(e) => {
            debug!("Relay handshake failed: {}", e);
            return;
        }
    };

    let peer_id = path.rsplit('/').next().unwrap_or_default().to_string();
    let (mut write, mut read) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if write.send(msg).await.is_err() || closing {
                break;
            }
        }
        let _ = write.close().await;
    });

    {
        let mut state = state.lock();
        state.clients.insert(peer_id.clone(), tx);
        state.send(
            &peer_id,
            &json!({"type": "connection-ack", "peer_id": peer_id}),
        );
    }

    while let Some(Ok(frame)) = read.next().await {
        let text = match frame {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let Ok(frame) = serde_json::from_str::<Value>(&text) else {
            continue;
        };

        let mut relay = state.lock();
        relay.received.push((peer_id.clone(), frame.clone()));

        match frame["type"].as_str().unwrap_or_default() {
            "register" => {
                let user_id = frame["user_id"].as_str().unwrap_or_default().to_string();
                relay.user_ids.insert(peer_id.clone(), user_id);
                relay.send(&peer_id, &json!({"type": "register", "success": true}));
                let joined = json!({
                    "type": "peer-joined",
                    "peer": relay.descriptor(&peer_id),
                    "total_peers": relay.clients.len(),
                });
                relay.broadcast_except(&peer_id, &joined);
            }
            "get-peers" => {
                let peers: Vec<Value> = relay
                    .clients
                    .keys()
                    .filter(|id| **id != peer_id)
                    .map(|id| relay.descriptor(id))
                    .collect();
                let count = peers.len();
                relay.send(
                    &peer_id,
                    &json!({"type": "peers-list", "peers": peers, "count": count}),
                );
            }
            kind @ ("offer" | "answer" | "ice-candidate") => {
                let Some(to) = frame["to"].as_str().map(str::to_owned) else {
                    continue;
                };
                let mut data = json!({"session_id": frame["session_id"].clone()});
                if kind == "ice-candidate" {
                    data["candidate"] = frame["candidate"].clone();
                } else {
                    data["sdp"] = frame["sdp"].clone();
                }
                let forwarded = json!({
                    "type": kind,
                    "from": peer_id,
                    "to": to,
                    "timestamp": "2026-01-01T00:00:00+00:00",
                    "data": data,
                });
                relay.send(&to, &forwarded);
            }
            _ => {}
        }
    }

    let mut state = state.lock();
    state.clients.remove(&peer_id);
    state.user_ids.remove(&peer_id);
    let left = json!({
        "type": "peer-left",
        "peer_id": peer_id,
        "total_peers": state.clients.len(),
    });
    state.broadcast_except(&peer_id, &left);
    drop(state);
    writer.abort();
}

/// Poll `condition` every 10ms until it holds or `timeout` elapses
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Initialize tracing for tests
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info,webrtc=warn")
        .with_test_writer()
        .try_init();
}
