//! Peer connection seam
//!
//! The connection manager drives the peer through [`PeerFactory`] and
//! [`PeerHandle`] and receives everything the peer produces as [`PeerEvent`]s
//! over a channel. The production implementation wraps webrtc-rs; tests
//! substitute a scripted fake.

pub mod rtc;

pub use rtc::RtcPeerFactory;

use crate::signaling::SignalPayload;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Events produced by a peer, consumed by the connection manager
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// Local signaling data (offer/answer/candidate) that must be published
    /// to the remote side
    Signal(SignalPayload),

    /// The data channel opened; the connection is usable
    Connected,

    /// Raw bytes arrived on the data channel
    Data(Vec<u8>),

    /// A remote media track was added
    Track {
        /// Remote track identifier
        id: String,
    },

    /// The peer connection closed (remote hangup or transport teardown)
    Closed,

    /// An unrecoverable peer failure (ICE failure, library-internal error)
    Error(String),
}

/// Handle to one live peer connection
#[async_trait]
pub trait PeerHandle: Send + Sync {
    /// Apply one remote signaling payload. Payloads must be applied in the
    /// order they were received from the signaling server.
    async fn apply_signal(&self, payload: SignalPayload) -> Result<()>;

    /// Send raw bytes over the data channel
    async fn send_data(&self, data: Vec<u8>) -> Result<()>;

    /// Tear the peer down. Idempotent.
    async fn close(&self);
}

/// Factory for peer connections
#[async_trait]
pub trait PeerFactory: Send + Sync {
    /// Create a peer. The initiator creates the data channel and produces the
    /// offer; the receiving side answers when the offer arrives. Peer output
    /// flows through `events`.
    async fn create(
        &self,
        initiator: bool,
        with_microphone: bool,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Arc<dyn PeerHandle>>;
}
