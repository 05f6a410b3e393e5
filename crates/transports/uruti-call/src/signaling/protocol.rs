//! Signaling wire messages
//!
//! Every frame is a JSON object with a `type` discriminator. Outbound frames
//! are built from [`OutboundMessage`]; inbound frames are kept as a loosely
//! typed [`SignalMessage`] so they can be forwarded verbatim and inspected
//! through accessors.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Frames this participant sends to the relay
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum OutboundMessage {
    /// Bind this socket to a user identity
    Register {
        /// Caller-supplied user identifier
        user_id: String,
        /// Descriptive data shown to other peers
        user_info: UserInfo,
    },

    /// Ask the relay for the current peer list
    GetPeers,

    /// SDP offer for a remote peer
    Offer {
        /// Recipient peer id
        to: String,
        /// Negotiation attempt this offer belongs to
        session_id: String,
        /// Session description
        sdp: String,
    },

    /// SDP answer for a remote peer
    Answer {
        /// Recipient peer id
        to: String,
        /// Negotiation attempt this answer belongs to
        session_id: String,
        /// Session description
        sdp: String,
    },

    /// Trickled ICE candidate for a remote peer
    IceCandidate {
        /// Recipient peer id
        to: String,
        /// Negotiation attempt this candidate belongs to
        session_id: String,
        /// Candidate descriptor
        candidate: IceCandidate,
    },
}

/// User metadata sent with `register`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserInfo {
    /// Display name
    pub name: String,
    /// RFC 3339 timestamp of the connection
    pub connected_at: String,
}

/// ICE candidate descriptor, in the browser's field naming
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IceCandidate {
    /// Candidate line
    pub candidate: String,

    /// Media line index the candidate applies to
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_m_line_index: Option<u16>,

    /// Media stream identification tag
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
}

/// A peer as advertised by the relay
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PeerDescriptor {
    /// Relay-assigned peer id
    pub peer_id: String,

    /// Application user id
    #[serde(default)]
    pub user_id: String,

    /// When the peer connected to the relay
    #[serde(default)]
    pub connected_at: String,

    /// Free-form user metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_info: Option<Map<String, Value>>,
}

/// Known values of the `type` discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// Registration acknowledgement
    Register,
    /// Peer list request
    GetPeers,
    /// Full peer list
    PeersList,
    /// Full peer list (alternate name)
    AvailablePeers,
    /// A peer connected to the relay
    PeerJoined,
    /// A peer disconnected from the relay
    PeerLeft,
    /// SDP offer
    Offer,
    /// SDP answer
    Answer,
    /// ICE candidate
    IceCandidate,
    /// Socket accepted by the relay
    ConnectionAck,
    /// Relay-side error report
    Error,
    /// Keepalive request
    Ping,
    /// Keepalive response
    Pong,
    /// Anything else
    Unknown,
}

impl MessageType {
    /// Map a wire discriminator to a message type
    pub fn parse(kind: &str) -> Self {
        match kind {
            "register" => MessageType::Register,
            "get-peers" => MessageType::GetPeers,
            "peers-list" => MessageType::PeersList,
            "available-peers" => MessageType::AvailablePeers,
            "peer-joined" => MessageType::PeerJoined,
            "peer-left" => MessageType::PeerLeft,
            "offer" => MessageType::Offer,
            "answer" => MessageType::Answer,
            "ice-candidate" => MessageType::IceCandidate,
            "connection-ack" => MessageType::ConnectionAck,
            "error" => MessageType::Error,
            "ping" => MessageType::Ping,
            "pong" => MessageType::Pong,
            _ => MessageType::Unknown,
        }
    }
}

/// An inbound frame: `{type, from?, to?, data?, ...extra}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignalMessage {
    /// Wire discriminator
    #[serde(rename = "type")]
    pub kind: String,

    /// Sender peer id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,

    /// Recipient peer id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,

    /// Type-dependent payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    /// Every other top-level field
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SignalMessage {
    /// Parse a frame from JSON text
    pub fn from_json(text: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Typed view of the discriminator
    pub fn message_type(&self) -> MessageType {
        MessageType::parse(&self.kind)
    }

    /// Look a field up in `data` first, then at the top level
    ///
    /// The relay wraps forwarded payloads in `data`; peers that talk to each
    /// other directly send them at the top level.
    fn field(&self, name: &str) -> Option<&Value> {
        self.data
            .as_ref()
            .and_then(|data| data.get(name))
            .or_else(|| self.extra.get(name))
    }

    /// Session description of an offer or answer
    pub fn sdp(&self) -> Option<&str> {
        self.field("sdp").and_then(Value::as_str)
    }

    /// Negotiation attempt this message belongs to
    pub fn session_id(&self) -> Option<&str> {
        self.field("session_id").and_then(Value::as_str)
    }

    /// Display name the sender attached to an offer
    pub fn sender_name(&self) -> Option<&str> {
        self.field("name").and_then(Value::as_str)
    }

    /// Candidate descriptor of an ice-candidate message
    pub fn candidate(&self) -> Option<IceCandidate> {
        let value = self.field("candidate")?;
        serde_json::from_value(value.clone()).ok()
    }

    /// Peer list of a peers-list/available-peers message
    pub fn peers(&self) -> Vec<PeerDescriptor> {
        self.extra
            .get("peers")
            .and_then(|peers| peers.as_array())
            .map(|peers| {
                peers
                    .iter()
                    .filter_map(|peer| serde_json::from_value(peer.clone()).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Peer announced by a peer-joined message
    pub fn joined_peer(&self) -> Option<PeerDescriptor> {
        self.field("peer")
            .and_then(|peer| serde_json::from_value(peer.clone()).ok())
    }

    /// Peer id carried by a peer-left message
    pub fn left_peer_id(&self) -> Option<&str> {
        self.field("peer_id").and_then(Value::as_str)
    }

    /// Human-readable text of a relay error
    pub fn error_message(&self) -> Option<&str> {
        self.field("message").and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_register_shape() {
        let msg = OutboundMessage::Register {
            user_id: "user-42".to_string(),
            user_info: UserInfo {
                name: "user-42".to_string(),
                connected_at: "2026-01-01T00:00:00Z".to_string(),
            },
        };

        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "register",
                "user_id": "user-42",
                "user_info": {"name": "user-42", "connected_at": "2026-01-01T00:00:00Z"}
            })
        );
    }

    #[test]
    fn test_get_peers_shape() {
        let value = serde_json::to_value(&OutboundMessage::GetPeers).unwrap();
        assert_eq!(value, json!({"type": "get-peers"}));
    }

    #[test]
    fn test_ice_candidate_shape() {
        let msg = OutboundMessage::IceCandidate {
            to: "peer-b".to_string(),
            session_id: "s1".to_string(),
            candidate: IceCandidate {
                candidate: "candidate:1 1 udp 2122260223 10.0.0.2 54321 typ host".to_string(),
                sdp_m_line_index: Some(0),
                sdp_mid: Some("0".to_string()),
            },
        };

        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "ice-candidate");
        assert_eq!(value["to"], "peer-b");
        assert_eq!(value["session_id"], "s1");
        assert_eq!(value["candidate"]["sdpMLineIndex"], 0);
        assert_eq!(value["candidate"]["sdpMid"], "0");
    }

    #[test]
    fn test_relayed_offer_accessors() {
        let msg = SignalMessage::from_json(
            r#"{"type":"offer","from":"peer-a","to":"peer-b","timestamp":"t",
                "data":{"sdp":"v=0","session_id":"s1","name":"Alice"}}"#,
        )
        .unwrap();

        assert_eq!(msg.message_type(), MessageType::Offer);
        assert_eq!(msg.from.as_deref(), Some("peer-a"));
        assert_eq!(msg.sdp(), Some("v=0"));
        assert_eq!(msg.session_id(), Some("s1"));
        assert_eq!(msg.sender_name(), Some("Alice"));
        assert_eq!(msg.extra.get("timestamp"), Some(&json!("t")));
    }

    #[test]
    fn test_top_level_fields_are_accepted() {
        let msg = SignalMessage::from_json(
            r#"{"type":"answer","from":"peer-a","session_id":"s2","sdp":"v=0"}"#,
        )
        .unwrap();

        assert_eq!(msg.sdp(), Some("v=0"));
        assert_eq!(msg.session_id(), Some("s2"));
    }

    #[test]
    fn test_candidate_accessor() {
        let msg = SignalMessage::from_json(
            r#"{"type":"ice-candidate","from":"peer-a",
                "data":{"candidate":{"candidate":"candidate:1","sdpMLineIndex":1,"sdpMid":"1"},
                        "session_id":"s1"}}"#,
        )
        .unwrap();

        let candidate = msg.candidate().unwrap();
        assert_eq!(candidate.candidate, "candidate:1");
        assert_eq!(candidate.sdp_m_line_index, Some(1));
        assert_eq!(candidate.sdp_mid.as_deref(), Some("1"));
    }

    #[test]
    fn test_peer_list_accessors() {
        let msg = SignalMessage::from_json(
            r#"{"type":"peers-list","count":2,"peers":[
                {"peer_id":"p1","user_id":"u1","connected_at":"t1","active_sessions":[]},
                {"peer_id":"p2","user_id":"u2","connected_at":"t2","user_info":{"name":"Bob"}}
            ]}"#,
        )
        .unwrap();

        let peers = msg.peers();
        assert_eq!(peers.len(), 2);
        assert_eq!(peers[1].user_info.as_ref().unwrap()["name"], "Bob");

        let joined = SignalMessage::from_json(
            r#"{"type":"peer-joined","peer":{"peer_id":"p3"},"total_peers":3}"#,
        )
        .unwrap();
        assert_eq!(joined.joined_peer().unwrap().peer_id, "p3");

        let left =
            SignalMessage::from_json(r#"{"type":"peer-left","peer_id":"p3","total_peers":2}"#)
                .unwrap();
        assert_eq!(left.left_peer_id(), Some("p3"));
    }

    #[test]
    fn test_unknown_type_round_trips_extra_fields() {
        let msg = SignalMessage::from_json(r#"{"type":"whiteboard","stroke":[1,2]}"#).unwrap();
        assert_eq!(msg.message_type(), MessageType::Unknown);
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value, json!({"type": "whiteboard", "stroke": [1, 2]}));
    }
}
