//! Signaling relay client
//!
//! The relay is a WebSocket server that forwards offer/answer/candidate frames
//! between participants and advertises who is online.

pub mod channel;
pub mod endpoint;
pub mod protocol;

pub use channel::{ChannelStatus, SignalingChannel};
pub use endpoint::{endpoint_from_origin, generate_peer_id};
pub use protocol::{
    IceCandidate, MessageType, OutboundMessage, PeerDescriptor, SignalMessage, UserInfo,
};

use crate::Result;

/// Outbound half of signaling, as seen by session negotiation
pub trait SignalSender: Send + Sync {
    /// Whether frames can currently be written
    fn is_connected(&self) -> bool;

    /// Send an SDP offer
    fn send_offer(&self, to: &str, sdp: &str, session_id: &str) -> Result<()>;

    /// Send an SDP answer
    fn send_answer(&self, to: &str, sdp: &str, session_id: &str) -> Result<()>;

    /// Send a trickled ICE candidate
    fn send_ice_candidate(&self, to: &str, candidate: &IceCandidate, session_id: &str)
        -> Result<()>;
}
