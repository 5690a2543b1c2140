//! Session identity: session id, pairing code, and peer role

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Alphabet for generated pairing codes. Ambiguous characters (0/O, 1/I)
/// are excluded because users type these codes by hand.
const PAIRING_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Length of generated pairing codes
const PAIRING_CODE_LEN: usize = 6;

/// Which side of the pairing this instance plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The device driving the presentation (phone); initiates the offer
    Controller,
    /// The device rendering the presentation; waits for the offer
    Screen,
}

impl Role {
    /// Wire representation used in signaling query parameters and envelopes
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Controller => "controller",
            Role::Screen => "screen",
        }
    }

    /// The controller is the offering side of the peer connection
    pub fn is_initiator(&self) -> bool {
        matches!(self, Role::Controller)
    }

    /// The remote counterpart of this role
    pub fn counterpart(&self) -> Role {
        match self {
            Role::Controller => Role::Screen,
            Role::Screen => Role::Controller,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One pairing attempt between a controller and a screen
///
/// Created client-side when the user starts a remote-presentation session;
/// destroyed on explicit disconnect or inactivity timeout. One
/// [`RemoteConnection`](crate::RemoteConnection) instance owns exactly one
/// session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Opaque unique id for this pairing attempt
    pub session_id: String,

    /// Short human-enterable code correlating controller and screen
    pub pairing_code: String,

    /// Which side of the pairing this instance plays
    pub role: Role,
}

impl Session {
    /// Create a session from existing identifiers (e.g. a pairing code the
    /// user typed in)
    pub fn new(
        session_id: impl Into<String>,
        pairing_code: impl Into<String>,
        role: Role,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            pairing_code: pairing_code.into(),
            role,
        }
    }

    /// Generate a fresh session with a random id and pairing code
    pub fn generate(role: Role) -> Self {
        let mut rng = rand::thread_rng();
        let pairing_code: String = (0..PAIRING_CODE_LEN)
            .map(|_| {
                let idx = rng.gen_range(0..PAIRING_CODE_ALPHABET.len());
                PAIRING_CODE_ALPHABET[idx] as char
            })
            .collect();

        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            pairing_code,
            role,
        }
    }
}
