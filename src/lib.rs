//! WebRTC client for remote presentation control
//!
//! This crate pairs a *controller* device (the presenter's phone) with a
//! *screen* device (the machine rendering the slides) over a WebRTC data
//! channel, bootstrapped through an HTTP long-polling signaling server.
//!
//! # Features
//!
//! - **Pairing by code**: short human-enterable codes correlate the two sides
//! - **HTTP polling signaling**: offer/answer/ICE exchange with failure
//!   counting, no WebSocket dependency
//! - **Role-aware lifecycle**: controller initiates, screen answers;
//!   role-specific connect and inactivity timeouts
//! - **Typed event stream**: connection outcomes arrive over a channel
//!   instead of callback registration
//! - **Data channel messaging**: JSON application messages (slide control,
//!   pointer positions) once connected
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │  RemoteConnection                                    │
//! │  ├─ SignalingTransport (HTTP polling, reqwest)       │
//! │  ├─ PeerFactory / PeerHandle (webrtc-rs)             │
//! │  ├─ timers: connect timeout, screen inactivity       │
//! │  └─ event stream → ConnectionEvent                   │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use remotecast_webrtc::{ConnectionConfig, RemoteConnection, Role, Session};
//!
//! let config = ConnectionConfig::default();
//! let session = Session::generate(Role::Screen);
//! let (connection, mut events) = RemoteConnection::new(config, session)?;
//!
//! connection.connect(false).await?;
//! while let Some(event) = events.recv().await {
//!     println!("{:?}", event);
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

// Public modules
pub mod config;
pub mod connection;
pub mod diagnostics;
pub mod error;
pub mod events;
pub mod peer;
pub mod session;
pub mod signaling;

// Internal modules
mod util;

// Re-exports for public API
pub use config::{ConnectionConfig, TurnServerConfig};
pub use connection::{ConnectionState, RemoteConnection};
pub use diagnostics::Diagnostics;
pub use error::{Error, Result};
pub use events::{ConnectionEvent, RtcMessage};
pub use session::{Role, Session};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        let ver = version();
        assert!(!ver.is_empty());
    }
}
