//! Peer links to remote participants

pub mod backend;
pub mod rtc;

pub use backend::{
    LinkEvent, LinkState, PeerLink, RemoteStream, RemoteTrack, RtcBackend, SdpKind,
    SessionDescription,
};
pub use rtc::{RtcLink, WebRtcBackend};
