//! Wire types for the HTTP signaling protocol
//!
//! The signaling server is a dumb mailbox: peers POST envelopes addressed by
//! pairing code and drain the other side's envelopes by polling. Field names
//! are camelCase to stay compatible with browser clients on the other end of
//! the pairing.

use crate::session::{Role, Session};
use serde::{Deserialize, Serialize};

/// Envelope discriminator expected by the signaling server
pub const SIGNAL_MESSAGE_TYPE: &str = "webrtc-signal";

/// ICE candidate in browser `RTCIceCandidateInit` shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateInit {
    /// The candidate-attribute line
    pub candidate: String,

    /// Media stream identification tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,

    /// Index of the media description the candidate belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u16>,
}

/// One signaling payload: the tagged union carried in an envelope's `data`
///
/// Offer before candidates is guaranteed by the sender; the receiver applies
/// payloads strictly in arrival order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SignalPayload {
    /// SDP offer from the initiating (controller) side
    Offer {
        /// Session description
        sdp: String,
    },
    /// SDP answer from the receiving (screen) side
    Answer {
        /// Session description
        sdp: String,
    },
    /// Trickled ICE candidate
    Candidate {
        /// Candidate description
        candidate: CandidateInit,
    },
}

impl SignalPayload {
    /// Short tag for logging
    pub fn kind(&self) -> &'static str {
        match self {
            SignalPayload::Offer { .. } => "offer",
            SignalPayload::Answer { .. } => "answer",
            SignalPayload::Candidate { .. } => "candidate",
        }
    }
}

/// Envelope published to the signaling server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalEnvelope {
    /// Always [`SIGNAL_MESSAGE_TYPE`]
    #[serde(rename = "type")]
    pub message_type: String,

    /// Session this envelope belongs to
    pub session_id: String,

    /// Pairing code correlating the two sides
    pub pairing_code: String,

    /// Role of the publishing side
    pub role: Role,

    /// Sender role (same as `role`; kept as a separate field for the server)
    pub sender: Role,

    /// The signaling payload
    pub data: SignalPayload,
}

impl SignalEnvelope {
    /// Build an envelope for this session's outgoing payload
    pub fn new(session: &Session, data: SignalPayload) -> Self {
        Self {
            message_type: SIGNAL_MESSAGE_TYPE.to_string(),
            session_id: session.session_id.clone(),
            pairing_code: session.pairing_code.clone(),
            role: session.role,
            sender: session.role,
            data,
        }
    }
}

/// One message drained from the poll endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingSignal {
    /// The signaling payload
    pub data: SignalPayload,

    /// Role string of the publishing side, when the server reports it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
}

/// Response body of `GET {signaling_url}/poll`
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct PollResponse {
    /// Outstanding messages for this session, oldest first. The server
    /// removes them on delivery; re-delivery is still tolerated client-side.
    #[serde(default)]
    pub messages: Vec<IncomingSignal>,
}
