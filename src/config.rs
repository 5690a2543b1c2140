//! Configuration for the remote presentation connection client

use crate::session::Role;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration for a [`RemoteConnection`](crate::RemoteConnection)
///
/// One config describes both roles; the role-specific values (connect
/// timeouts, inactivity window) are selected at runtime from the session role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Signaling endpoint base URL (http:// or https://)
    pub signaling_url: String,

    /// STUN server URLs (at least one required)
    pub stun_servers: Vec<String>,

    /// TURN server configurations (optional)
    pub turn_servers: Vec<TurnServerConfig>,

    /// Interval between signaling polls in milliseconds (default: 1000ms)
    pub poll_interval_ms: u64,

    /// Per-request timeout for signaling HTTP calls in milliseconds
    /// (default: 5000ms)
    pub poll_request_timeout_ms: u64,

    /// Consecutive failed polls tolerated before the connection is declared
    /// dead (default: 15)
    pub max_failed_polls: u32,

    /// Connection-establishment timeout for the controller role in seconds
    /// (default: 25)
    pub controller_connect_timeout_secs: u64,

    /// Connection-establishment timeout for the screen role in seconds
    /// (default: 30)
    pub screen_connect_timeout_secs: u64,

    /// Screen-side inactivity window in seconds; if no peer connects within
    /// it the session force-disconnects (default: 60)
    pub screen_inactivity_timeout_secs: u64,

    /// ICE candidate pool size passed to the peer connection (default: 10)
    pub ice_candidate_pool_size: u8,
}

/// TURN server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnServerConfig {
    /// TURN server URL (turn: or turns:)
    pub url: String,

    /// Username for TURN authentication
    pub username: String,

    /// Credential for TURN authentication
    pub credential: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            signaling_url: "http://localhost:3000/api/remote-presentation/signaling".to_string(),
            stun_servers: vec![
                "stun:stun.l.google.com:19302".to_string(),
                "stun:stun1.l.google.com:19302".to_string(),
            ],
            turn_servers: Vec::new(),
            poll_interval_ms: 1000,
            poll_request_timeout_ms: 5000,
            max_failed_polls: 15,
            controller_connect_timeout_secs: 25,
            screen_connect_timeout_secs: 30,
            screen_inactivity_timeout_secs: 60,
            ice_candidate_pool_size: 10,
        }
    }
}

impl ConnectionConfig {
    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `signaling_url` is not an http:// or https:// URL
    /// - `stun_servers` is empty
    /// - `poll_interval_ms` is zero
    /// - `max_failed_polls` is zero
    /// - any timeout is zero
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        if !self.signaling_url.starts_with("http://")
            && !self.signaling_url.starts_with("https://")
        {
            return Err(Error::InvalidConfig(format!(
                "signaling_url must start with http:// or https://, got {}",
                self.signaling_url
            )));
        }

        if self.stun_servers.is_empty() {
            return Err(Error::InvalidConfig(
                "At least one STUN server is required".to_string(),
            ));
        }

        if self.poll_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "poll_interval_ms must be greater than zero".to_string(),
            ));
        }

        if self.max_failed_polls == 0 {
            return Err(Error::InvalidConfig(
                "max_failed_polls must be greater than zero".to_string(),
            ));
        }

        if self.controller_connect_timeout_secs == 0
            || self.screen_connect_timeout_secs == 0
            || self.screen_inactivity_timeout_secs == 0
        {
            return Err(Error::InvalidConfig(
                "connect and inactivity timeouts must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Poll loop interval
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Per-request timeout for signaling HTTP calls
    pub fn poll_request_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_request_timeout_ms)
    }

    /// Connection-establishment timeout for the given role
    pub fn connect_timeout(&self, role: Role) -> Duration {
        match role {
            Role::Controller => Duration::from_secs(self.controller_connect_timeout_secs),
            Role::Screen => Duration::from_secs(self.screen_connect_timeout_secs),
        }
    }

    /// Screen-side inactivity window
    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_secs(self.screen_inactivity_timeout_secs)
    }
}
