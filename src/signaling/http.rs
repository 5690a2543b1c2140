//! HTTP implementation of the signaling transport
//!
//! Endpoint contract:
//!
//! - `POST {base}` — publish a signaling envelope
//! - `GET {base}/poll?pairingCode&role&sessionId` — drain outstanding
//!   messages: `{ "messages": [{ "data", "sender" }, ...] }`
//! - `DELETE {base}?sessionId=...` — release one session's state
//! - `POST {base}/cleanup` — garbage-collect stale sessions
//!
//! Every request carries a client-level timeout and is cancelled when its
//! future is dropped, so an aborted poll can never outlive a disconnect.

use crate::config::ConnectionConfig;
use crate::session::Session;
use crate::signaling::protocol::{IncomingSignal, PollResponse, SignalEnvelope};
use crate::signaling::SignalingTransport;
use crate::{Error, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Default per-request timeout when no config is available (orphan cleanup)
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Signaling transport over plain HTTP polling
pub struct HttpSignaling {
    /// Signaling endpoint base URL
    base_url: String,

    /// Reqwest HTTP client with per-request timeout
    client: reqwest::Client,
}

impl HttpSignaling {
    /// Create a transport from a connection config
    pub fn new(config: &ConnectionConfig) -> Result<Self> {
        Self::with_timeout(&config.signaling_url, config.poll_request_timeout())
    }

    /// Create a transport for a bare URL with the default request timeout
    ///
    /// Used by orphan cleanup, which runs without a full connection config.
    pub fn for_url(base_url: &str) -> Result<Self> {
        Self::with_timeout(base_url, DEFAULT_REQUEST_TIMEOUT)
    }

    fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self> {
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(Error::InvalidConfig(format!(
                "signaling URL must start with http:// or https://, got {}",
                base_url
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Signaling(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Endpoint base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn ensure_success(response: &reqwest::Response, what: &str) -> Result<()> {
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Signaling(format!(
                "{} failed with status {}",
                what, status
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl SignalingTransport for HttpSignaling {
    async fn publish(&self, envelope: &SignalEnvelope) -> Result<()> {
        debug!(
            kind = envelope.data.kind(),
            session_id = %envelope.session_id,
            "publishing signaling envelope"
        );

        let response = self
            .client
            .post(&self.base_url)
            .json(envelope)
            .send()
            .await?;

        Self::ensure_success(&response, "signaling publish")
    }

    async fn poll(&self, session: &Session) -> Result<Vec<IncomingSignal>> {
        let url = format!("{}/poll", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("pairingCode", session.pairing_code.as_str()),
                ("role", session.role.as_str()),
                ("sessionId", session.session_id.as_str()),
            ])
            .send()
            .await?;

        Self::ensure_success(&response, "signaling poll")?;

        let body: PollResponse = response.json().await?;
        if !body.messages.is_empty() {
            debug!(
                count = body.messages.len(),
                session_id = %session.session_id,
                "drained signaling messages"
            );
        }
        Ok(body.messages)
    }

    async fn release(&self, session: &Session) -> Result<()> {
        debug!(session_id = %session.session_id, "releasing signaling session");

        let response = self
            .client
            .delete(&self.base_url)
            .query(&[("sessionId", session.session_id.as_str())])
            .send()
            .await?;

        Self::ensure_success(&response, "signaling release")
    }

    async fn cleanup(&self) -> Result<()> {
        debug!("requesting orphaned-session cleanup");

        let url = format!("{}/cleanup", self.base_url);
        let response = self.client.post(&url).send().await?;

        Self::ensure_success(&response, "signaling cleanup")
    }
}
