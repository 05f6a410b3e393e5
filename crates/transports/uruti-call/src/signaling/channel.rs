//! WebSocket signaling channel
//!
//! A fire-and-forget duplex connection to the relay. Outbound frames are only
//! written while the socket is open; there is no queue, no retry and no
//! automatic reconnect. Every inbound frame is forwarded to the message sink
//! supplied by the caller, after the peer list has been updated from it.

use super::endpoint::generate_peer_id;
use super::protocol::{
    IceCandidate, MessageType, OutboundMessage, PeerDescriptor, SignalMessage, UserInfo,
};
use super::SignalSender;
use crate::config::SignalingConfig;
use crate::{Error, Result};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Callback for peers announced by the relay
pub type PeerJoinedCallback = Arc<dyn Fn(&PeerDescriptor) + Send + Sync>;

/// Callback for peers that left the relay
pub type PeerLeftCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Callback for channel errors
pub type ChannelErrorCallback = Arc<dyn Fn(&Error) + Send + Sync>;

/// Observable connection state of the channel
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelStatus {
    /// Socket is open
    pub connected: bool,

    /// A connection attempt is in flight
    pub connecting: bool,

    /// Last error, cleared on the next connection attempt
    pub error: Option<String>,
}

#[derive(Default)]
struct ChannelCallbacks {
    on_peer_joined: Mutex<Option<PeerJoinedCallback>>,
    on_peer_left: Mutex<Option<PeerLeftCallback>>,
    on_error: Mutex<Option<ChannelErrorCallback>>,
}

/// State shared between the channel handle and its socket tasks
struct ChannelShared {
    status: watch::Sender<ChannelStatus>,
    peers: watch::Sender<Vec<PeerDescriptor>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    /// Bumped by every connect/disconnect so events from an old socket are ignored
    generation: AtomicU64,
    sink: mpsc::UnboundedSender<SignalMessage>,
    callbacks: ChannelCallbacks,
}

/// Duplex connection to the signaling relay for one local participant
pub struct SignalingChannel {
    peer_id: String,
    user_id: String,
    endpoint: String,
    shared: Arc<ChannelShared>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl SignalingChannel {
    /// Create a channel without connecting
    ///
    /// # Arguments
    ///
    /// * `config` - Relay location
    /// * `user_id` - Identity sent in the `register` frame
    /// * `sink` - Receives every inbound frame
    pub fn new(
        config: &SignalingConfig,
        user_id: impl Into<String>,
        sink: mpsc::UnboundedSender<SignalMessage>,
    ) -> Result<Self> {
        let peer_id = generate_peer_id();
        let endpoint = config.endpoint(&peer_id)?;
        let (status, _) = watch::channel(ChannelStatus::default());
        let (peers, _) = watch::channel(Vec::new());

        Ok(Self {
            peer_id,
            user_id: user_id.into(),
            endpoint,
            shared: Arc::new(ChannelShared {
                status,
                peers,
                outbound: Mutex::new(None),
                generation: AtomicU64::new(0),
                sink,
                callbacks: ChannelCallbacks::default(),
            }),
            reader: Mutex::new(None),
        })
    }

    /// Create a channel and connect it unless `auto_connect` is off
    ///
    /// A failed connection is not an error here; it is reported through the
    /// status and the error callback like any other connection failure.
    pub async fn open(
        config: &SignalingConfig,
        user_id: impl Into<String>,
        sink: mpsc::UnboundedSender<SignalMessage>,
    ) -> Result<Self> {
        let channel = Self::new(config, user_id, sink)?;
        if config.auto_connect {
            if let Err(e) = channel.connect().await {
                warn!("Initial signaling connection failed: {}", e);
            }
        }
        Ok(channel)
    }

    /// Connect to the relay
    ///
    /// Returns immediately when already connected or connecting. On success
    /// sends `register` and `get-peers`. Never retries.
    pub async fn connect(&self) -> Result<()> {
        let mut claimed = false;
        self.shared.status.send_if_modified(|status| {
            if status.connected || status.connecting {
                return false;
            }
            status.connecting = true;
            status.error = None;
            claimed = true;
            true
        });

        if !claimed {
            debug!("Signaling connection already open or in flight");
            return Ok(());
        }

        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        info!("Connecting to signaling server: {}", self.endpoint);

        let ws_stream = match connect_async(self.endpoint.as_str()).await {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                let err = Error::WebSocketError(format!(
                    "Failed to connect to signaling server: {}",
                    e
                ));
                if self.shared.is_current(generation) {
                    self.shared.status.send_modify(|status| {
                        status.connecting = false;
                        status.error = Some(err.to_string());
                    });
                    self.shared.notify_error(&err);
                }
                return Err(err);
            }
        };

        if !self.shared.is_current(generation) {
            debug!("Signaling connection attempt superseded by disconnect");
            return Err(Error::SignalingError(
                "Connection attempt cancelled".to_string(),
            ));
        }

        let (write, read) = ws_stream.split();
        let (tx, rx) = mpsc::unbounded_channel();
        *self.shared.outbound.lock() = Some(tx);
        self.shared.status.send_modify(|status| {
            status.connected = true;
            status.connecting = false;
            status.error = None;
        });

        tokio::spawn(Self::sender_task(write, rx));
        let reader = tokio::spawn(Self::receiver_task(
            read,
            Arc::clone(&self.shared),
            generation,
        ));
        if let Some(old) = self.reader.lock().replace(reader) {
            old.abort();
        }

        info!("Connected to signaling server as {}", self.peer_id);

        self.send_message(&OutboundMessage::Register {
            user_id: self.user_id.clone(),
            user_info: UserInfo {
                name: self.user_id.clone(),
                connected_at: chrono::Utc::now().to_rfc3339(),
            },
        })?;
        self.send_message(&OutboundMessage::GetPeers)?;

        Ok(())
    }

    /// Close the socket and clear the peer list
    ///
    /// Safe to call at any time, including when never connected.
    pub fn disconnect(&self) {
        self.shared.generation.fetch_add(1, Ordering::SeqCst);

        if let Some(tx) = self.shared.outbound.lock().take() {
            info!("Disconnecting from signaling server");
            let _ = tx.send(Message::Close(None));
        }

        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }

        self.shared.status.send_modify(|status| {
            status.connected = false;
            status.connecting = false;
        });
        self.shared.peers.send_replace(Vec::new());
    }

    /// Serialize and transmit a frame
    ///
    /// Only writes while the socket is open. Otherwise records
    /// "WebSocket not connected" in the status and returns
    /// [`Error::NotConnected`] without touching the network.
    pub fn send_message(&self, message: &OutboundMessage) -> Result<()> {
        let json = serde_json::to_string(message)?;

        let tx = if self.shared.status.borrow().connected {
            self.shared.outbound.lock().clone()
        } else {
            None
        };

        let Some(tx) = tx else {
            warn!("WebSocket not connected");
            self.shared.status.send_modify(|status| {
                status.error = Some(Error::NotConnected.to_string());
            });
            return Err(Error::NotConnected);
        };

        debug!("Sending signaling message: {}", json);
        tx.send(Message::Text(json)).map_err(|e| {
            let err = Error::SignalingError(format!("Failed to send message: {}", e));
            self.shared.status.send_modify(|status| {
                status.error = Some(err.to_string());
            });
            self.shared.notify_error(&err);
            err
        })
    }

    /// Send an SDP offer to `to`
    pub fn send_offer(&self, to: &str, sdp: &str, session_id: &str) -> Result<()> {
        self.send_message(&OutboundMessage::Offer {
            to: to.to_string(),
            session_id: session_id.to_string(),
            sdp: sdp.to_string(),
        })
    }

    /// Send an SDP answer to `to`
    pub fn send_answer(&self, to: &str, sdp: &str, session_id: &str) -> Result<()> {
        self.send_message(&OutboundMessage::Answer {
            to: to.to_string(),
            session_id: session_id.to_string(),
            sdp: sdp.to_string(),
        })
    }

    /// Send an ICE candidate to `to`
    pub fn send_ice_candidate(
        &self,
        to: &str,
        candidate: &IceCandidate,
        session_id: &str,
    ) -> Result<()> {
        self.send_message(&OutboundMessage::IceCandidate {
            to: to.to_string(),
            session_id: session_id.to_string(),
            candidate: candidate.clone(),
        })
    }

    /// Ask the relay for a fresh peer list
    pub fn request_peers(&self) -> Result<()> {
        self.send_message(&OutboundMessage::GetPeers)
    }

    /// Locally generated peer id
    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// User identity sent on registration
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Relay URL including the peer id
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Current connection state
    pub fn status(&self) -> ChannelStatus {
        self.shared.status.borrow().clone()
    }

    /// Whether the socket is open
    pub fn is_connected(&self) -> bool {
        self.shared.status.borrow().connected
    }

    /// Watch connection state changes
    pub fn subscribe_status(&self) -> watch::Receiver<ChannelStatus> {
        self.shared.status.subscribe()
    }

    /// Peers currently advertised by the relay
    pub fn peers(&self) -> Vec<PeerDescriptor> {
        self.shared.peers.borrow().clone()
    }

    /// Watch peer list changes
    pub fn subscribe_peers(&self) -> watch::Receiver<Vec<PeerDescriptor>> {
        self.shared.peers.subscribe()
    }

    /// Set callback for peer-joined frames
    pub fn on_peer_joined<F>(&self, callback: F)
    where
        F: Fn(&PeerDescriptor) + Send + Sync + 'static,
    {
        *self.shared.callbacks.on_peer_joined.lock() = Some(Arc::new(callback));
    }

    /// Set callback for peer-left frames
    pub fn on_peer_left<F>(&self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        *self.shared.callbacks.on_peer_left.lock() = Some(Arc::new(callback));
    }

    /// Set callback for connection and send errors
    pub fn on_error<F>(&self, callback: F)
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        *self.shared.callbacks.on_error.lock() = Some(Arc::new(callback));
    }

    /// Sender task: writes queued frames to the socket
    async fn sender_task(
        mut write: futures::stream::SplitSink<WsStream, Message>,
        mut rx: mpsc::UnboundedReceiver<Message>,
    ) {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if let Err(e) = write.send(msg).await {
                error!("Failed to send WebSocket message: {}", e);
                break;
            }
            if closing {
                break;
            }
        }

        let _ = write.close().await;
        debug!("Sender task terminated");
    }

    /// Receiver task: reads frames until the socket closes
    async fn receiver_task(
        mut read: futures::stream::SplitStream<WsStream>,
        shared: Arc<ChannelShared>,
        generation: u64,
    ) {
        while let Some(frame) = read.next().await {
            match frame {
                Ok(Message::Text(text)) => shared.handle_inbound(&text),
                Ok(Message::Close(_)) => {
                    info!("Signaling server closed the connection");
                    break;
                }
                Err(e) => {
                    error!("WebSocket error: {}", e);
                    if shared.is_current(generation) {
                        let err =
                            Error::WebSocketError(format!("WebSocket connection error: {}", e));
                        shared.status.send_modify(|status| {
                            status.error = Some(err.to_string());
                        });
                        shared.notify_error(&err);
                    }
                    break;
                }
                _ => {}
            }
        }

        shared.connection_closed(generation);
        debug!("Receiver task terminated");
    }
}

impl ChannelShared {
    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn notify_error(&self, err: &Error) {
        let callback = self.callbacks.on_error.lock().clone();
        if let Some(callback) = callback {
            callback(err);
        }
    }

    fn connection_closed(&self, generation: u64) {
        if !self.is_current(generation) {
            return;
        }

        info!("Disconnected from signaling server");
        self.outbound.lock().take();
        self.status.send_modify(|status| {
            status.connected = false;
            status.connecting = false;
        });
        self.peers.send_replace(Vec::new());
    }

    /// Update the peer list from a frame, then forward the frame verbatim
    fn handle_inbound(&self, text: &str) {
        let message = match SignalMessage::from_json(text) {
            Ok(message) => message,
            Err(e) => {
                warn!("Error processing signaling message: {}", e);
                return;
            }
        };

        debug!("Received signaling message: {}", message.kind);

        match message.message_type() {
            MessageType::PeersList | MessageType::AvailablePeers => {
                self.peers.send_replace(message.peers());
            }
            MessageType::PeerJoined => {
                if let Some(peer) = message.joined_peer() {
                    self.peers.send_if_modified(|peers| {
                        if peers.iter().any(|p| p.peer_id == peer.peer_id) {
                            false
                        } else {
                            peers.push(peer.clone());
                            true
                        }
                    });

                    let callback = self.callbacks.on_peer_joined.lock().clone();
                    if let Some(callback) = callback {
                        callback(&peer);
                    }
                }
            }
            MessageType::PeerLeft => {
                if let Some(peer_id) = message.left_peer_id().map(str::to_owned) {
                    self.peers.send_if_modified(|peers| {
                        let before = peers.len();
                        peers.retain(|p| p.peer_id != peer_id);
                        peers.len() != before
                    });

                    let callback = self.callbacks.on_peer_left.lock().clone();
                    if let Some(callback) = callback {
                        callback(&peer_id);
                    }
                }
            }
            _ => {}
        }

        if self.sink.send(message).is_err() {
            debug!("Signaling message sink closed, dropping frame");
        }
    }
}

impl SignalSender for SignalingChannel {
    fn is_connected(&self) -> bool {
        SignalingChannel::is_connected(self)
    }

    fn send_offer(&self, to: &str, sdp: &str, session_id: &str) -> Result<()> {
        SignalingChannel::send_offer(self, to, sdp, session_id)
    }

    fn send_answer(&self, to: &str, sdp: &str, session_id: &str) -> Result<()> {
        SignalingChannel::send_answer(self, to, sdp, session_id)
    }

    fn send_ice_candidate(
        &self,
        to: &str,
        candidate: &IceCandidate,
        session_id: &str,
    ) -> Result<()> {
        SignalingChannel::send_ice_candidate(self, to, candidate, session_id)
    }
}

impl Drop for SignalingChannel {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn channel() -> (SignalingChannel, mpsc::UnboundedReceiver<SignalMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let config = SignalingConfig {
            auto_connect: false,
            ..Default::default()
        };
        (SignalingChannel::new(&config, "user-1", tx).unwrap(), rx)
    }

    #[tokio::test]
    async fn test_channel_creation() {
        let (channel, _rx) = channel();
        assert!(channel.peer_id().starts_with("peer-"));
        assert!(channel
            .endpoint()
            .starts_with("ws://localhost:8000/api/v1/ws/signal/peer-"));
        assert_eq!(channel.status(), ChannelStatus::default());
        assert!(channel.peers().is_empty());
    }

    #[tokio::test]
    async fn test_send_while_disconnected() {
        let (channel, _rx) = channel();

        let err = channel.send_offer("peer-b", "v=0", "s1").unwrap_err();
        assert!(matches!(err, Error::NotConnected));
        assert_eq!(
            channel.status().error.as_deref(),
            Some("WebSocket not connected")
        );
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let (channel, _rx) = channel();
        channel.disconnect();
        channel.disconnect();
        assert!(!channel.is_connected());
    }

    #[tokio::test]
    async fn test_peer_joined_merge_is_idempotent() {
        let (channel, mut rx) = channel();
        let joined = Arc::new(AtomicUsize::new(0));
        let joined_clone = Arc::clone(&joined);
        channel.on_peer_joined(move |_| {
            joined_clone.fetch_add(1, Ordering::SeqCst);
        });

        let frame = r#"{"type":"peer-joined","peer":{"peer_id":"p1","user_id":"u1"}}"#;
        channel.shared.handle_inbound(frame);
        channel.shared.handle_inbound(frame);

        let peers = channel.peers();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].peer_id, "p1");
        assert_eq!(joined.load(Ordering::SeqCst), 2);

        assert_eq!(rx.recv().await.unwrap().kind, "peer-joined");
        assert_eq!(rx.recv().await.unwrap().kind, "peer-joined");
    }

    #[tokio::test]
    async fn test_peer_list_replace_and_leave() {
        let (channel, mut rx) = channel();
        let left = Arc::new(Mutex::new(Vec::<String>::new()));
        let left_clone = Arc::clone(&left);
        channel.on_peer_left(move |peer_id| left_clone.lock().push(peer_id.to_string()));

        channel.shared.handle_inbound(
            r#"{"type":"peers-list","peers":[{"peer_id":"p1"},{"peer_id":"p2"}],"count":2}"#,
        );
        assert_eq!(channel.peers().len(), 2);

        channel
            .shared
            .handle_inbound(r#"{"type":"available-peers","peers":[{"peer_id":"p3"}]}"#);
        let peers = channel.peers();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].peer_id, "p3");

        channel
            .shared
            .handle_inbound(r#"{"type":"peer-left","peer_id":"p3"}"#);
        assert!(channel.peers().is_empty());
        assert_eq!(left.lock().as_slice(), ["p3".to_string()]);

        for expected in ["peers-list", "available-peers", "peer-left"] {
            assert_eq!(rx.recv().await.unwrap().kind, expected);
        }
    }

    #[tokio::test]
    async fn test_every_frame_is_forwarded() {
        let (channel, mut rx) = channel();

        channel
            .shared
            .handle_inbound(r#"{"type":"offer","from":"p1","data":{"sdp":"v=0"}}"#);
        channel
            .shared
            .handle_inbound(r#"{"type":"something-new","value":1}"#);
        channel.shared.handle_inbound("not json");

        assert_eq!(rx.recv().await.unwrap().kind, "offer");
        assert_eq!(rx.recv().await.unwrap().kind, "something-new");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_connect_failure_sets_error() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let config = SignalingConfig {
            auto_connect: false,
            // Port 1 on loopback refuses connections
            url_override: Some("ws://127.0.0.1:1/api/v1/ws/signal".to_string()),
            ..Default::default()
        };
        let channel = SignalingChannel::new(&config, "user-1", tx).unwrap();
        let errors = Arc::new(AtomicUsize::new(0));
        let errors_clone = Arc::clone(&errors);
        channel.on_error(move |_| {
            errors_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert!(channel.connect().await.is_err());

        let status = channel.status();
        assert!(!status.connected);
        assert!(!status.connecting);
        assert!(status.error.is_some());
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }
}
