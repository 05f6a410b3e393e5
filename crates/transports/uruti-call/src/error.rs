//! Error types for the peer session coordinator

/// Result type alias using the coordinator Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while coordinating peer sessions
///
/// None of these are fatal to the coordinator: every failing operation
/// surfaces its error and leaves the coordinator usable for later calls.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The user refused camera/microphone access
    #[error("Camera/microphone access denied")]
    PermissionDenied,

    /// Local capture could not be started for any other reason
    #[error("Failed to initialize media: {0}")]
    MediaInit(String),

    /// A call was attempted before local media was acquired
    #[error("Local stream not initialized")]
    LocalStreamNotInitialized,

    /// A call was attempted while the signaling channel was down
    #[error("Signaling server not connected")]
    SignalingNotConnected,

    /// A signaling send was attempted while the socket was not open
    #[error("WebSocket not connected")]
    NotConnected,

    /// WebSocket transport error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Signaling channel error
    #[error("Signaling error: {0}")]
    SignalingError(String),

    /// SDP negotiation error
    #[error("SDP negotiation error: {0}")]
    SdpError(String),

    /// ICE candidate error
    #[error("ICE candidate error: {0}")]
    IceCandidateError(String),

    /// Real-time connection error
    #[error("Peer connection error: {0}")]
    PeerConnectionError(String),

    /// Connection statistics could not be retrieved
    #[error("Statistics error: {0}")]
    StatsError(String),

    /// Media track error
    #[error("Media track error: {0}")]
    MediaTrackError(String),

    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

impl Error {
    /// Check if this error is a user-actionable permission error
    pub fn is_permission_error(&self) -> bool {
        matches!(self, Error::PermissionDenied)
    }

    /// Check if this error means an operation was refused before any side effect
    pub fn is_precondition_error(&self) -> bool {
        matches!(
            self,
            Error::LocalStreamNotInitialized | Error::SignalingNotConnected
        )
    }

    /// Check if this error came from the signaling transport
    pub fn is_transport_error(&self) -> bool {
        matches!(
            self,
            Error::NotConnected | Error::WebSocketError(_) | Error::SignalingError(_)
        )
    }

    /// Check if this error came from an offer/answer/candidate step
    pub fn is_negotiation_error(&self) -> bool {
        matches!(
            self,
            Error::SdpError(_) | Error::IceCandidateError(_) | Error::PeerConnectionError(_)
        )
    }

    /// Check if this error is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::InvalidConfig(_))
    }
}
