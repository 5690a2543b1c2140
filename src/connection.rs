//! Connection lifecycle management
//!
//! [`RemoteConnection`] owns one pairing session end to end: it runs the
//! signaling poll loop, creates and supervises the peer, arms the
//! role-specific timers, and pushes typed [`ConnectionEvent`]s to the
//! consumer. `disconnect` is the sole cancellation primitive; every spawned
//! task captures the session epoch at spawn time and re-checks it after each
//! suspension point, so nothing mutates state once a disconnect has started.

use crate::config::ConnectionConfig;
use crate::diagnostics::Diagnostics;
use crate::events::{ConnectionEvent, RtcMessage};
use crate::peer::{PeerEvent, PeerFactory, PeerHandle, RtcPeerFactory};
use crate::session::Session;
use crate::signaling::{HttpSignaling, SignalEnvelope, SignalPayload, SignalingTransport};
use crate::util::RateLimiter;
use crate::{Error, Result};
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Minimum interval between repeated failure warnings for one log key
const LOG_THROTTLE_INTERVAL: Duration = Duration::from_secs(30);

/// Lifecycle state of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Created, `connect` not yet called
    New,
    /// Negotiating: signaling is running, the data channel is not open yet
    Connecting,
    /// Data channel open, messages can flow
    Connected,
    /// Torn down, explicitly or after a forced disconnect
    Disconnected,
    /// A failure surfaced and no automatic retry is attempted
    Error,
}

impl ConnectionState {
    /// Short name for logging
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::New => "new",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Error => "error",
        }
    }
}

/// Negotiation progress counters, updated by the poll loop and event pump
#[derive(Default)]
struct NegotiationStats {
    received_offer: AtomicBool,
    received_answer: AtomicBool,
    candidates_sent: AtomicU32,
    candidates_received: AtomicU32,
}

impl NegotiationStats {
    fn reset(&self) {
        self.received_offer.store(false, Ordering::SeqCst);
        self.received_answer.store(false, Ordering::SeqCst);
        self.candidates_sent.store(0, Ordering::SeqCst);
        self.candidates_received.store(0, Ordering::SeqCst);
    }
}

/// Signals already handed to the peer. The poll endpoint removes messages on
/// delivery but re-delivery is still tolerated: an offer or answer is applied
/// at most once, candidates are deduplicated by their candidate string.
#[derive(Default)]
struct SeenSignals {
    offer_applied: bool,
    answer_applied: bool,
    candidates: HashSet<String>,
}

impl SeenSignals {
    /// Returns false when `payload` is a duplicate that must not reach the
    /// peer again. Records first sightings.
    fn first_sighting(&mut self, payload: &SignalPayload) -> bool {
        match payload {
            SignalPayload::Offer { .. } => !std::mem::replace(&mut self.offer_applied, true),
            SignalPayload::Answer { .. } => !std::mem::replace(&mut self.answer_applied, true),
            SignalPayload::Candidate { candidate } => {
                self.candidates.insert(candidate.candidate.clone())
            }
        }
    }

    fn clear(&mut self) {
        self.offer_applied = false;
        self.answer_applied = false;
        self.candidates.clear();
    }
}

/// Peer slot and signal queue under one lock, so an arriving signal can
/// never race the peer installation or an in-progress flush. Signals are
/// appended in arrival order and only ever reach the peer through the single
/// active drainer (`drain_inbox`), which pops them in queue order.
#[derive(Default)]
struct Inbox {
    peer: Option<Arc<dyn PeerHandle>>,
    queue: VecDeque<SignalPayload>,
    /// True while some task is draining the queue; set under the lock by
    /// whoever starts the drain, cleared by the drainer when it runs dry
    draining: bool,
}

struct Inner {
    config: ConnectionConfig,
    session: Session,
    transport: Arc<dyn SignalingTransport>,
    peer_factory: Arc<dyn PeerFactory>,
    events: mpsc::UnboundedSender<ConnectionEvent>,

    state: Mutex<ConnectionState>,

    /// Peer slot plus the queue of signals awaiting application
    inbox: Mutex<Inbox>,

    /// Background tasks owned by the current connection attempt
    tasks: Mutex<Vec<JoinHandle<()>>>,

    /// Bumped by every disconnect; tasks compare against their snapshot
    epoch: AtomicU64,
    connected: AtomicBool,
    failed_polls: AtomicU32,

    stats: NegotiationStats,
    seen: Mutex<SeenSignals>,
    started_at: Mutex<Option<tokio::time::Instant>>,
    log_limiter: RateLimiter,
}

// Lock discipline: no `.await` is ever held across these parking_lot locks.
impl Inner {
    fn epoch_ok(&self, snapshot: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) == snapshot
    }

    fn emit(&self, event: ConnectionEvent) {
        let _ = self.events.send(event);
    }

    fn set_state(&self, next: ConnectionState) {
        let mut state = self.state.lock();
        if *state != next {
            debug!(
                session_id = %self.session.session_id,
                from = state.as_str(),
                to = next.as_str(),
                "connection state changed"
            );
            *state = next;
        }
    }

    fn spawn(&self, handle: JoinHandle<()>) {
        self.tasks.lock().push(handle);
    }

    fn diagnostics(&self) -> Diagnostics {
        Diagnostics {
            role: self.session.role,
            received_offer: self.stats.received_offer.load(Ordering::SeqCst),
            received_answer: self.stats.received_answer.load(Ordering::SeqCst),
            ice_candidates_sent: self.stats.candidates_sent.load(Ordering::SeqCst),
            ice_candidates_received: self.stats.candidates_received.load(Ordering::SeqCst),
            elapsed: self
                .started_at
                .lock()
                .map(|t| t.elapsed())
                .unwrap_or_default(),
        }
    }

    /// One arrived signaling payload: count it, drop duplicates, then append
    /// it to the inbox. The append and the peer check happen under one lock,
    /// so a signal can neither overtake an earlier one mid-flush nor strand
    /// in the queue when the peer lands concurrently.
    async fn handle_incoming(&self, payload: SignalPayload) {
        match &payload {
            SignalPayload::Offer { .. } => {
                self.stats.received_offer.store(true, Ordering::SeqCst);
            }
            SignalPayload::Answer { .. } => {
                self.stats.received_answer.store(true, Ordering::SeqCst);
            }
            SignalPayload::Candidate { .. } => {
                self.stats.candidates_received.fetch_add(1, Ordering::SeqCst);
            }
        }

        if !self.seen.lock().first_sighting(&payload) {
            debug!(kind = payload.kind(), "dropping re-delivered signal");
            return;
        }

        let start_drain = {
            let mut inbox = self.inbox.lock();
            if inbox.peer.is_none() {
                debug!(kind = payload.kind(), "queueing signal until peer exists");
            }
            inbox.queue.push_back(payload);
            if inbox.peer.is_some() && !inbox.draining {
                inbox.draining = true;
                true
            } else {
                false
            }
        };

        if start_drain {
            self.drain_inbox().await;
        }
    }

    /// Apply queued signals to the peer, oldest first, until the queue is
    /// empty or the peer is gone. At most one drainer runs at a time.
    async fn drain_inbox(&self) {
        loop {
            let next = {
                let mut inbox = self.inbox.lock();
                let peer = inbox.peer.clone();
                match peer {
                    Some(peer) => match inbox.queue.pop_front() {
                        Some(payload) => Some((peer, payload)),
                        None => {
                            inbox.draining = false;
                            None
                        }
                    },
                    None => {
                        inbox.draining = false;
                        None
                    }
                }
            };

            let Some((peer, payload)) = next else { return };
            if let Err(e) = peer.apply_signal(payload).await {
                warn!("failed to apply remote signal: {}", e);
            }
        }
    }

    /// Signaling poll loop. Counts consecutive failures; at the configured
    /// threshold it emits exactly one timeout error and forces a disconnect.
    async fn poll_loop(self: Arc<Self>, epoch: u64) {
        let interval = self.config.poll_interval();
        let threshold = self.config.max_failed_polls;

        loop {
            tokio::time::sleep(interval).await;
            if !self.epoch_ok(epoch) {
                return;
            }

            match self.transport.poll(&self.session).await {
                Ok(messages) => {
                    self.failed_polls.store(0, Ordering::SeqCst);
                    for message in messages {
                        if !self.epoch_ok(epoch) {
                            return;
                        }
                        self.handle_incoming(message.data).await;
                    }
                }
                Err(e) => {
                    if !self.epoch_ok(epoch) {
                        return;
                    }

                    let failures = self.failed_polls.fetch_add(1, Ordering::SeqCst) + 1;
                    if self.log_limiter.allow("poll-failure") {
                        warn!(
                            session_id = %self.session.session_id,
                            failures,
                            "signaling poll failed: {}", e
                        );
                    }

                    if failures >= threshold {
                        self.emit(ConnectionEvent::Error(Error::Timeout(format!(
                            "signaling timed out after {} consecutive polling failures",
                            failures
                        ))));
                        // Tear down on a fresh task: shutdown aborts the
                        // registered handles, this one included.
                        let inner = Arc::clone(&self);
                        tokio::spawn(async move { inner.shutdown().await });
                        return;
                    }
                }
            }
        }
    }

    /// Connection-establishment timer. Fires once; emits a diagnostic error
    /// and moves to the error state, never retries and never disconnects.
    async fn connect_timeout(self: Arc<Self>, epoch: u64) {
        let timeout = self.config.connect_timeout(self.session.role);
        tokio::time::sleep(timeout).await;

        if !self.epoch_ok(epoch) || self.connected.load(Ordering::SeqCst) {
            return;
        }

        let cause = self.diagnostics().timeout_cause();
        warn!(
            session_id = %self.session.session_id,
            role = %self.session.role,
            "connection establishment timed out: {}", cause
        );
        self.set_state(ConnectionState::Error);
        self.emit(ConnectionEvent::Error(Error::Timeout(cause)));
    }

    /// Screen-only inactivity timer: if no peer connected inside the window,
    /// force-disconnect so the session does not linger on the server.
    async fn inactivity_timeout(self: Arc<Self>, epoch: u64) {
        let window = self.config.inactivity_timeout();
        tokio::time::sleep(window).await;

        if !self.epoch_ok(epoch) || self.connected.load(Ordering::SeqCst) {
            return;
        }

        info!(
            session_id = %self.session.session_id,
            "inactivity timeout: no peer connected within {}s, disconnecting",
            window.as_secs()
        );
        self.emit(ConnectionEvent::Error(Error::Timeout(format!(
            "inactivity timeout: no peer connected within {}s",
            window.as_secs()
        ))));

        let inner = Arc::clone(&self);
        tokio::spawn(async move { inner.shutdown().await });
    }

    /// Pump peer output: publish local signals, surface data and lifecycle
    /// transitions as connection events.
    async fn peer_event_pump(
        self: Arc<Self>,
        epoch: u64,
        mut rx: mpsc::UnboundedReceiver<PeerEvent>,
    ) {
        while let Some(event) = rx.recv().await {
            if !self.epoch_ok(epoch) {
                return;
            }

            match event {
                PeerEvent::Signal(payload) => {
                    if matches!(payload, SignalPayload::Candidate { .. }) {
                        self.stats.candidates_sent.fetch_add(1, Ordering::SeqCst);
                    }

                    let envelope = SignalEnvelope::new(&self.session, payload);
                    if let Err(e) = self.transport.publish(&envelope).await {
                        // Not fatal on its own; the poll failure counter is
                        // the arbiter of a dead signaling channel.
                        if self.log_limiter.allow("publish-failure") {
                            warn!("failed to publish local signal: {}", e);
                        }
                    }
                }
                PeerEvent::Connected => {
                    self.connected.store(true, Ordering::SeqCst);
                    self.set_state(ConnectionState::Connected);
                    info!(
                        session_id = %self.session.session_id,
                        role = %self.session.role,
                        "peer connected"
                    );
                    self.emit(ConnectionEvent::Connected);
                }
                PeerEvent::Data(bytes) => match serde_json::from_slice::<RtcMessage>(&bytes) {
                    Ok(message) => self.emit(ConnectionEvent::Message(message)),
                    Err(e) => warn!("dropping unparseable data channel message: {}", e),
                },
                PeerEvent::Track { id } => {
                    self.emit(ConnectionEvent::Stream { id });
                }
                PeerEvent::Closed => {
                    debug!(
                        session_id = %self.session.session_id,
                        "peer reported closed"
                    );
                    let inner = Arc::clone(&self);
                    tokio::spawn(async move { inner.shutdown().await });
                    return;
                }
                PeerEvent::Error(message) => {
                    let diag = self.diagnostics();
                    warn!(
                        session_id = %self.session.session_id,
                        candidates_received = diag.ice_candidates_received,
                        "peer error: {}", message
                    );
                    self.set_state(ConnectionState::Error);
                    self.emit(ConnectionEvent::Error(Error::Peer(message)));
                }
            }
        }
    }

    /// Tear everything down. Idempotent; safe from any state including
    /// mid-connect. Emits `Disconnected` once per started lifecycle.
    async fn shutdown(&self) {
        let prior = {
            let mut state = self.state.lock();
            std::mem::replace(&mut *state, ConnectionState::Disconnected)
        };

        // Invalidate epoch snapshots before aborting so a task that is past
        // its abort point still refuses to touch state.
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            task.abort();
        }

        let peer = {
            let mut inbox = self.inbox.lock();
            inbox.queue.clear();
            inbox.draining = false;
            inbox.peer.take()
        };
        if let Some(peer) = peer {
            peer.close().await;
        }

        self.seen.lock().clear();

        if prior != ConnectionState::Disconnected && prior != ConnectionState::New {
            info!(session_id = %self.session.session_id, "disconnected");
            self.emit(ConnectionEvent::Disconnected);
        }

        if prior != ConnectionState::Disconnected {
            if let Err(e) = self.transport.release(&self.session).await {
                debug!("failed to release signaling session: {}", e);
            }
        }
    }
}

/// Stops the background tasks once the last [`RemoteConnection`] handle is
/// gone. The spawned tasks hold `Arc<Inner>` themselves, so `Inner` cannot
/// observe its own abandonment; this guard lives only in the public handles.
struct TaskAbortGuard {
    inner: Arc<Inner>,
}

impl Drop for TaskAbortGuard {
    fn drop(&mut self) {
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        for task in self.inner.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

/// One remote presentation connection: a controller or screen side of a
/// pairing session.
///
/// Cheap to clone; all clones share one session. An instance must not be
/// reused across logical sessions: create a fresh one per pairing attempt.
///
/// Dropping the last clone aborts the poll loop and timers, but only an
/// explicit [`disconnect`](Self::disconnect) closes the peer, releases the
/// server-side session, and emits the final `Disconnected` event.
#[derive(Clone)]
pub struct RemoteConnection {
    inner: Arc<Inner>,
    _tasks: Arc<TaskAbortGuard>,
}

impl RemoteConnection {
    /// Create a connection with the production HTTP signaling transport and
    /// webrtc-rs peer factory. Returns the connection and the event stream.
    pub fn new(
        config: ConnectionConfig,
        session: Session,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ConnectionEvent>)> {
        config.validate()?;
        let transport: Arc<dyn SignalingTransport> = Arc::new(HttpSignaling::new(&config)?);
        let peer_factory: Arc<dyn PeerFactory> = Arc::new(RtcPeerFactory::new(&config));
        Ok(Self::with_parts(config, session, transport, peer_factory))
    }

    /// Create a connection with explicit transport and peer factory
    ///
    /// The seam for tests; `new` is a thin wrapper over this.
    pub fn with_parts(
        config: ConnectionConfig,
        session: Session,
        transport: Arc<dyn SignalingTransport>,
        peer_factory: Arc<dyn PeerFactory>,
    ) -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            config,
            session,
            transport,
            peer_factory,
            events,
            state: Mutex::new(ConnectionState::New),
            inbox: Mutex::new(Inbox::default()),
            tasks: Mutex::new(Vec::new()),
            epoch: AtomicU64::new(0),
            connected: AtomicBool::new(false),
            failed_polls: AtomicU32::new(0),
            stats: NegotiationStats::default(),
            seen: Mutex::new(SeenSignals::default()),
            started_at: Mutex::new(None),
            log_limiter: RateLimiter::new(LOG_THROTTLE_INTERVAL),
        });

        let guard = Arc::new(TaskAbortGuard {
            inner: Arc::clone(&inner),
        });
        (
            Self {
                inner,
                _tasks: guard,
            },
            receiver,
        )
    }

    /// Session this connection serves
    pub fn session(&self) -> &Session {
        &self.inner.session
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.lock()
    }

    /// True while the data channel is open
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Snapshot of negotiation progress
    pub fn diagnostics(&self) -> Diagnostics {
        self.inner.diagnostics()
    }

    /// Start (or resume) the connection attempt
    ///
    /// Idempotent: a second call while an attempt is in flight or a peer is
    /// live is a no-op returning Ok. The controller creates the data channel
    /// and the offer; the screen waits for them. `with_microphone` attaches a
    /// local audio track on the controller side; failure to do so never
    /// blocks the connection.
    pub async fn connect(&self, with_microphone: bool) -> Result<()> {
        let inner = &self.inner;

        // Claim the lifecycle before the first await so a concurrent connect
        // cannot slip past while the peer is still being created.
        {
            let mut state = inner.state.lock();
            if matches!(
                *state,
                ConnectionState::Connecting | ConnectionState::Connected
            ) {
                debug!(
                    session_id = %inner.session.session_id,
                    state = state.as_str(),
                    "connect called on live attempt, reusing it"
                );
                return Ok(());
            }
            if inner.inbox.lock().peer.is_some() {
                debug!(
                    session_id = %inner.session.session_id,
                    "connect called with live peer, reusing it"
                );
                return Ok(());
            }
            *state = ConnectionState::Connecting;
        }

        let epoch = inner.epoch.load(Ordering::SeqCst);
        let initiator = inner.session.role.is_initiator();

        info!(
            session_id = %inner.session.session_id,
            pairing_code = %inner.session.pairing_code,
            role = %inner.session.role,
            "connecting"
        );

        inner.connected.store(false, Ordering::SeqCst);
        inner.failed_polls.store(0, Ordering::SeqCst);
        inner.stats.reset();
        inner.seen.lock().clear();
        {
            let mut inbox = inner.inbox.lock();
            inbox.queue.clear();
            inbox.draining = false;
        }
        inner.log_limiter.reset();
        *inner.started_at.lock() = Some(tokio::time::Instant::now());

        // Poll before the peer exists so early remote signals queue up
        // instead of getting lost.
        inner.spawn(tokio::spawn(Arc::clone(inner).poll_loop(epoch)));
        inner.spawn(tokio::spawn(Arc::clone(inner).connect_timeout(epoch)));
        if !initiator {
            inner.spawn(tokio::spawn(Arc::clone(inner).inactivity_timeout(epoch)));
        }

        let (peer_events, peer_events_rx) = mpsc::unbounded_channel();
        inner.spawn(tokio::spawn(
            Arc::clone(inner).peer_event_pump(epoch, peer_events_rx),
        ));

        let peer = match inner
            .peer_factory
            .create(initiator, with_microphone && initiator, peer_events)
            .await
        {
            Ok(peer) => peer,
            Err(e) => {
                inner.epoch.fetch_add(1, Ordering::SeqCst);
                for task in inner.tasks.lock().drain(..) {
                    task.abort();
                }
                inner.set_state(ConnectionState::Error);
                return Err(e);
            }
        };

        if !inner.epoch_ok(epoch) {
            // Disconnected while the peer was being created
            peer.close().await;
            return Ok(());
        }

        // Install the peer and, if signals queued up while it was being
        // created, become the drainer that flushes them oldest first.
        let start_drain = {
            let mut inbox = inner.inbox.lock();
            inbox.peer = Some(Arc::clone(&peer));
            if !inbox.queue.is_empty() && !inbox.draining {
                inbox.draining = true;
                true
            } else {
                false
            }
        };

        if start_drain {
            debug!(
                session_id = %inner.session.session_id,
                "flushing signals queued before peer creation"
            );
            inner.drain_inbox().await;
        }

        Ok(())
    }

    /// Tear the connection down
    ///
    /// Idempotent and always safe, including before `connect` or while a
    /// connection attempt is in flight. Cancels all timers and the poll loop,
    /// closes the peer, clears queued signals, and best-effort releases the
    /// server-side session state.
    pub async fn disconnect(&self) -> Result<()> {
        self.inner.shutdown().await;
        Ok(())
    }

    /// Send an application message over the data channel
    ///
    /// Returns false when the connection is not established or the send
    /// fails; it never errors. Surfacing that to the user is the caller's
    /// responsibility.
    pub async fn send_message(&self, message: &RtcMessage) -> bool {
        if !self.is_connected() {
            debug!("send_message while not connected");
            return false;
        }

        let peer = self.inner.inbox.lock().peer.clone();
        let Some(peer) = peer else {
            return false;
        };

        let bytes = match serde_json::to_vec(message) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("failed to serialize message: {}", e);
                return false;
            }
        };

        match peer.send_data(bytes).await {
            Ok(()) => true,
            Err(e) => {
                warn!("failed to send message: {}", e);
                false
            }
        }
    }

    /// Best-effort cleanup of orphaned sessions left behind by clients that
    /// crashed without disconnecting. Errors are logged and swallowed.
    pub async fn cleanup_orphaned(signaling_url: &str) {
        let transport = match HttpSignaling::for_url(signaling_url) {
            Ok(transport) => transport,
            Err(e) => {
                warn!("orphan cleanup skipped: {}", e);
                return;
            }
        };

        if let Err(e) = transport.cleanup().await {
            warn!("orphan cleanup failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_names() {
        assert_eq!(ConnectionState::New.as_str(), "new");
        assert_eq!(ConnectionState::Connecting.as_str(), "connecting");
        assert_eq!(ConnectionState::Connected.as_str(), "connected");
        assert_eq!(ConnectionState::Disconnected.as_str(), "disconnected");
        assert_eq!(ConnectionState::Error.as_str(), "error");
    }

    #[test]
    fn test_seen_signals_dedup() {
        let mut seen = SeenSignals::default();
        let offer = SignalPayload::Offer {
            sdp: "v=0".to_string(),
        };
        assert!(seen.first_sighting(&offer));
        assert!(!seen.first_sighting(&offer));

        let candidate = SignalPayload::Candidate {
            candidate: crate::signaling::CandidateInit {
                candidate: "candidate:1".to_string(),
                sdp_mid: None,
                sdp_m_line_index: None,
            },
        };
        assert!(seen.first_sighting(&candidate));
        assert!(!seen.first_sighting(&candidate));

        seen.clear();
        assert!(seen.first_sighting(&offer));
        assert!(seen.first_sighting(&candidate));
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let mut config = ConnectionConfig::default();
        config.stun_servers.clear();
        let session = Session::generate(crate::session::Role::Controller);
        assert!(RemoteConnection::new(config, session).is_err());
    }
}
