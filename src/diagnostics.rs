//! Negotiation diagnostics
//!
//! Simple counters accumulated during connection establishment. They drive
//! no behavior beyond timeout error synthesis and logging.

use crate::session::Role;
use std::time::Duration;

/// Snapshot of negotiation progress for one connection attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostics {
    /// Which side of the pairing this instance plays
    pub role: Role,

    /// A remote offer was received (meaningful for the screen role)
    pub received_offer: bool,

    /// A remote answer was received (meaningful for the controller role)
    pub received_answer: bool,

    /// ICE candidates published to the signaling server
    pub ice_candidates_sent: u32,

    /// ICE candidates received from the remote peer (every delivery counts,
    /// including duplicates)
    pub ice_candidates_received: u32,

    /// Time since `connect()` was called
    pub elapsed: Duration,
}

impl Diagnostics {
    /// Synthesize a human-readable timeout cause from the negotiation state
    ///
    /// Mirrors what an operator would check by hand: did the handshake stall
    /// before the offer, before the answer, or during ICE.
    pub fn timeout_cause(&self) -> String {
        let mut message = format!(
            "connection timed out after {}s",
            self.elapsed.as_secs()
        );

        if self.role == Role::Screen && !self.received_offer {
            message.push_str(": no offer received from controller");
        } else if self.role == Role::Controller && !self.received_answer {
            message.push_str(": no answer received from screen");
        } else if self.ice_candidates_received == 0 {
            message.push_str(": no ICE candidates received, possible network issue or firewall");
        }

        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base(role: Role) -> Diagnostics {
        Diagnostics {
            role,
            received_offer: false,
            received_answer: false,
            ice_candidates_sent: 0,
            ice_candidates_received: 0,
            elapsed: Duration::from_secs(30),
        }
    }

    #[test]
    fn test_screen_without_offer() {
        let diag = base(Role::Screen);
        assert!(diag
            .timeout_cause()
            .contains("no offer received from controller"));
    }

    #[test]
    fn test_controller_without_answer() {
        let diag = base(Role::Controller);
        assert!(diag
            .timeout_cause()
            .contains("no answer received from screen"));
    }

    #[test]
    fn test_handshake_done_but_no_candidates() {
        let mut diag = base(Role::Controller);
        diag.received_answer = true;
        assert!(diag.timeout_cause().contains("no ICE candidates received"));
    }

    #[test]
    fn test_candidates_present_gives_bare_timeout() {
        let mut diag = base(Role::Screen);
        diag.received_offer = true;
        diag.ice_candidates_received = 3;
        assert_eq!(diag.timeout_cause(), "connection timed out after 30s");
    }
}
