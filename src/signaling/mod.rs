//! Out-of-band signaling: wire protocol and transport
//!
//! The connection manager talks to the signaling server only through the
//! [`SignalingTransport`] trait so the HTTP plumbing can be swapped out in
//! tests.

pub mod http;
pub mod protocol;

pub use http::HttpSignaling;
pub use protocol::{
    CandidateInit, IncomingSignal, PollResponse, SignalEnvelope, SignalPayload,
    SIGNAL_MESSAGE_TYPE,
};

use crate::session::Session;
use crate::Result;
use async_trait::async_trait;

/// Transport for exchanging signaling messages with the pairing server
///
/// All calls must be cancel-safe: the connection manager aborts in-flight
/// requests on disconnect and never lets a late completion mutate state.
#[async_trait]
pub trait SignalingTransport: Send + Sync {
    /// Publish one signaling envelope for the remote side to drain
    async fn publish(&self, envelope: &SignalEnvelope) -> Result<()>;

    /// Drain outstanding messages addressed to this session, oldest first
    async fn poll(&self, session: &Session) -> Result<Vec<IncomingSignal>>;

    /// Best-effort release of server-side state for this session
    async fn release(&self, session: &Session) -> Result<()>;

    /// Best-effort garbage collection of stale sessions left behind by
    /// clients that crashed without disconnecting
    async fn cleanup(&self) -> Result<()>;
}
