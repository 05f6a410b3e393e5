//! Real-time transport seam
//!
//! The coordinator never encodes media or traverses NATs itself. It asks an
//! [`RtcBackend`] for one [`PeerLink`] per remote participant and drives the
//! offer/answer exchange through it. Asynchronous link activity (gathered
//! candidates, remote tracks, state changes) comes back as [`LinkEvent`]s.

use crate::config::IceServer;
use crate::media::{LocalMediaStream, TrackKind};
use crate::quality::LinkStats;
use crate::signaling::IceCandidate;
use crate::Result;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use webrtc::track::track_remote::TrackRemote;

/// Offer or answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpKind {
    Offer,
    Answer,
}

/// A session description received from the remote side
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Transport-level connection state reported by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LinkState::New => "new",
            LinkState::Connecting => "connecting",
            LinkState::Connected => "connected",
            LinkState::Disconnected => "disconnected",
            LinkState::Failed => "failed",
            LinkState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// A track received from a remote participant
#[derive(Clone)]
pub struct RemoteTrack {
    pub id: String,
    pub kind: TrackKind,
    pub stream_id: String,

    /// Backend handle for reading RTP, absent for scripted backends
    pub handle: Option<Arc<TrackRemote>>,
}

impl fmt::Debug for RemoteTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("stream_id", &self.stream_id)
            .finish()
    }
}

/// Tracks a remote participant publishes under one stream id
#[derive(Debug, Clone)]
pub struct RemoteStream {
    pub id: String,
    pub tracks: Vec<RemoteTrack>,
}

impl RemoteStream {
    pub fn new(track: RemoteTrack) -> Self {
        Self {
            id: track.stream_id.clone(),
            tracks: vec![track],
        }
    }

    /// Add a track, ignoring one already present
    pub fn add_track(&mut self, track: RemoteTrack) -> bool {
        if self.tracks.iter().any(|t| t.id == track.id) {
            return false;
        }
        self.tracks.push(track);
        true
    }
}

/// Asynchronous link activity
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// A local candidate was gathered and must be relayed
    LocalCandidate(IceCandidate),

    /// The remote side started sending a track
    RemoteTrack(RemoteTrack),

    /// Transport state changed
    StateChanged(LinkState),
}

/// Factory for peer links
#[async_trait]
pub trait RtcBackend: Send + Sync {
    /// Create a link to `peer_id` using the given NAT traversal helpers
    ///
    /// Link activity is delivered on `events` until the link is closed.
    async fn create_link(
        &self,
        peer_id: &str,
        ice_servers: &[IceServer],
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> Result<Arc<dyn PeerLink>>;
}

/// One real-time connection to a remote participant
#[async_trait]
pub trait PeerLink: Send + Sync {
    /// Publish every track of the local stream
    async fn add_local_stream(&self, stream: &Arc<LocalMediaStream>) -> Result<()>;

    /// Create an offer, apply it locally and return its SDP
    async fn create_offer(&self) -> Result<String>;

    /// Create an answer, apply it locally and return its SDP
    async fn create_answer(&self) -> Result<String>;

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    /// Live connection statistics
    async fn stats(&self) -> Result<LinkStats>;

    /// Enable or disable every outbound sender of one kind
    async fn set_outbound_enabled(&self, kind: TrackKind, enabled: bool) -> Result<()>;

    async fn close(&self) -> Result<()>;
}
