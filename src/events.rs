//! Typed events emitted by the connection manager
//!
//! The source of truth for the UI layer: instead of an event-emitter, the
//! connection hands out one receiver at construction and pushes tagged
//! outcomes through it.

use crate::Error;
use serde::{Deserialize, Serialize};

/// Application-level message exchanged over the established data channel
///
/// Arbitrary JSON payload with a `type` tag, e.g. `{"type": "next-slide"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RtcMessage {
    /// Message discriminator understood by the application
    #[serde(rename = "type")]
    pub message_type: String,

    /// Optional structured payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl RtcMessage {
    /// Create a message with no payload
    pub fn new(message_type: impl Into<String>) -> Self {
        Self {
            message_type: message_type.into(),
            data: None,
        }
    }

    /// Create a message with a JSON payload
    pub fn with_data(message_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            message_type: message_type.into(),
            data: Some(data),
        }
    }
}

/// Events delivered to the consumer of a [`RemoteConnection`](crate::RemoteConnection)
#[derive(Debug)]
pub enum ConnectionEvent {
    /// The peer connection is established; messages can flow
    Connected,

    /// The peer connection ended (explicit disconnect, remote close, or a
    /// forced disconnect after repeated failures)
    Disconnected,

    /// An application message arrived over the data channel
    Message(RtcMessage),

    /// A remote media stream (e.g. the controller's microphone) was added
    Stream {
        /// Remote track identifier
        id: String,
    },

    /// A failure surfaced; no automatic retry is attempted. After a terminal
    /// error the caller is expected to call `disconnect()` and, if desired,
    /// start over with a fresh connection.
    Error(Error),
}

impl ConnectionEvent {
    /// True for events that terminate the connection lifecycle
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionEvent::Disconnected)
    }
}
