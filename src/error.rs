//! Error types for the remote presentation connection client

/// Result type alias using the crate Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while pairing and connecting peers
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Signaling server rejected a request or returned a non-success status
    #[error("Signaling error: {0}")]
    Signaling(String),

    /// HTTP transport failure while talking to the signaling server
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// WebRTC peer connection error
    #[error("Peer connection error: {0}")]
    Peer(String),

    /// SDP negotiation error (offer/answer parse or apply)
    #[error("SDP negotiation error: {0}")]
    Sdp(String),

    /// ICE candidate error
    #[error("ICE candidate error: {0}")]
    IceCandidate(String),

    /// Data channel error
    #[error("Data channel error: {0}")]
    DataChannel(String),

    /// Connection-establishment or inactivity timeout
    #[error("Connection timeout: {0}")]
    Timeout(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is retryable by starting a fresh connection attempt
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Signaling(_) | Error::Http(_) | Error::Timeout(_) | Error::Io(_)
        )
    }

    /// Check if this error is a timeout (connection establishment, inactivity,
    /// or repeated polling failures)
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }

    /// Check if this error originated in the peer connection itself
    pub fn is_peer_error(&self) -> bool {
        matches!(
            self,
            Error::Peer(_) | Error::Sdp(_) | Error::IceCandidate(_) | Error::DataChannel(_)
        )
    }
}
