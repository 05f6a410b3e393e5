//! Peer session coordination for Uruti video calls
//!
//! This crate manages the peer-to-peer side of a multi-party video call: it
//! talks to the signaling relay, negotiates one WebRTC connection per remote
//! participant, owns the local camera/microphone handle and classifies link
//! quality for the call view.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │  Call view (snapshot + events, actions)              │
//! │  ↓                                                   │
//! │  PeerSessionCoordinator                              │
//! │  ├─ SignalingChannel (JSON over WebSocket)           │
//! │  ├─ SessionNegotiator                                │
//! │  │   ├─ ConnectionRecord per participant             │
//! │  │   ├─ LocalMediaManager (shared local stream)      │
//! │  │   └─ CallState (participants, flags, error)       │
//! │  └─ QualityMonitor (periodic stats polling)          │
//! │     ↓                                                │
//! │  RtcBackend / PeerLink (webrtc crate)                │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use uruti_call::CoordinatorConfig;
//!
//! let mut config = CoordinatorConfig::default();
//! config.signaling.page_origin = "https://app.uruti.example".to_string();
//!
//! assert!(config.validate().is_ok());
//! assert_eq!(config.ice.stun_servers.len(), 5);
//! ```
//!
//! ## Async Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use uruti_call::{CoordinatorConfig, PeerSessionCoordinator, SampleCaptureDevice, WebRtcBackend};
//!
//! # async fn example() -> uruti_call::Result<()> {
//! let coordinator = PeerSessionCoordinator::start(
//!     CoordinatorConfig::default(),
//!     "user-42",
//!     Arc::new(WebRtcBackend::new()?),
//!     Arc::new(SampleCaptureDevice::new()),
//! )
//! .await?;
//!
//! coordinator.initialize_local_stream().await?;
//! coordinator.start_call("peer-1700000000000-abc123xyz", "Bob").await?;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod coordinator;
pub mod error;
pub mod media;
pub mod peer;
pub mod quality;
pub mod session;
pub mod signaling;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::{
    CoordinatorConfig, IceConfig, IceServer, QualityConfig, SignalingConfig, TurnServerConfig,
};
pub use coordinator::PeerSessionCoordinator;
pub use error::{Error, Result};
pub use media::{
    LocalMediaManager, LocalMediaStream, MediaConstraints, MediaDevices, MediaTrack,
    SampleCaptureDevice, TrackKind,
};
pub use peer::{PeerLink, RtcBackend, WebRtcBackend};
pub use quality::{classify, LinkStats, QualityClass, QualityMonitor};
pub use session::{CallEvent, CallSnapshot, NegotiationState, Participant, SessionNegotiator};
pub use signaling::{ChannelStatus, PeerDescriptor, SignalMessage, SignalSender, SignalingChannel};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
