//! webrtc-rs backed peer implementation
//!
//! Wraps an `RTCPeerConnection` behind the [`PeerHandle`] seam. The initiator
//! (controller) creates the data channel and the offer; the receiver (screen)
//! waits for the remote data channel and answers when the offer arrives.
//! Remote ICE candidates that arrive before the remote description are
//! buffered inside the peer and flushed once the description is set.

use crate::config::ConnectionConfig;
use crate::peer::{PeerEvent, PeerFactory, PeerHandle};
use crate::signaling::{CandidateInit, SignalPayload};
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS};
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

/// Label of the control data channel
const DATA_CHANNEL_LABEL: &str = "remotecast-data";

/// Shared slot for the data channel. The receiving side only learns its
/// channel from the `on_data_channel` callback, so the slot is shared between
/// the peer handle and that callback without creating a reference cycle
/// through the peer connection's handler storage.
type DataChannelSlot = Arc<Mutex<Option<Arc<RTCDataChannel>>>>;

/// Factory producing webrtc-rs peers from the connection config
pub struct RtcPeerFactory {
    ice_servers: Vec<RTCIceServer>,
    ice_candidate_pool_size: u8,
}

impl RtcPeerFactory {
    /// Build a factory with the config's STUN/TURN servers
    pub fn new(config: &ConnectionConfig) -> Self {
        let ice_servers = config
            .stun_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .chain(config.turn_servers.iter().map(|turn| {
                #[allow(clippy::needless_update)]
                RTCIceServer {
                    urls: vec![turn.url.clone()],
                    username: turn.username.clone(),
                    credential: turn.credential.clone(),
                    ..Default::default()
                }
            }))
            .collect();

        Self {
            ice_servers,
            ice_candidate_pool_size: config.ice_candidate_pool_size,
        }
    }
}

#[async_trait]
impl PeerFactory for RtcPeerFactory {
    async fn create(
        &self,
        initiator: bool,
        with_microphone: bool,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Arc<dyn PeerHandle>> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::Peer(format!("failed to register codecs: {}", e)))?;

        let interceptor_registry =
            register_default_interceptors(Default::default(), &mut media_engine)
                .map_err(|e| Error::Peer(format!("failed to register interceptors: {}", e)))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptor_registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: self.ice_servers.clone(),
            ice_candidate_pool_size: self.ice_candidate_pool_size,
            ..Default::default()
        };

        let pc = Arc::new(
            api.new_peer_connection(rtc_config)
                .await
                .map_err(|e| Error::Peer(format!("failed to create peer connection: {}", e)))?,
        );

        let data_channel: DataChannelSlot = Arc::new(Mutex::new(None));

        register_connection_handlers(&pc, &events);

        if with_microphone {
            // Audio is a soft feature: never block connection establishment.
            add_microphone_track(&pc).await;
        }

        if initiator {
            let dc = pc
                .create_data_channel(DATA_CHANNEL_LABEL, Some(RTCDataChannelInit::default()))
                .await
                .map_err(|e| Error::DataChannel(format!("failed to create data channel: {}", e)))?;
            attach_data_channel(&dc, &events);
            *data_channel.lock() = Some(dc);
        } else {
            let slot = Arc::clone(&data_channel);
            let dc_events = events.clone();
            pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
                debug!(label = %dc.label(), "remote data channel received");
                attach_data_channel(&dc, &dc_events);
                *slot.lock() = Some(dc);
                Box::pin(async {})
            }));
        }

        let peer = Arc::new(RtcPeer {
            pc,
            data_channel,
            pending_candidates: Mutex::new(Vec::new()),
            remote_description_set: AtomicBool::new(false),
            events,
            initiator,
        });

        if initiator {
            peer.create_and_publish_offer().await?;
        }

        Ok(peer)
    }
}

/// One live webrtc-rs peer connection
struct RtcPeer {
    pc: Arc<RTCPeerConnection>,
    data_channel: DataChannelSlot,

    /// Remote candidates received before the remote description was set
    pending_candidates: Mutex<Vec<CandidateInit>>,
    remote_description_set: AtomicBool,

    events: mpsc::UnboundedSender<PeerEvent>,
    initiator: bool,
}

impl RtcPeer {
    /// Initiator path: create the offer, set it locally, hand it to the
    /// manager for publication. Trickled candidates follow via
    /// `on_ice_candidate`.
    async fn create_and_publish_offer(&self) -> Result<()> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| Error::Sdp(format!("failed to create offer: {}", e)))?;
        let sdp = offer.sdp.clone();

        self.pc
            .set_local_description(offer)
            .await
            .map_err(|e| Error::Sdp(format!("failed to set local offer: {}", e)))?;

        debug!("local offer created");
        let _ = self.events.send(PeerEvent::Signal(SignalPayload::Offer { sdp }));
        Ok(())
    }

    async fn apply_offer(&self, sdp: String) -> Result<()> {
        if self.initiator {
            warn!("ignoring unexpected offer on the initiating side");
            return Ok(());
        }

        let offer = RTCSessionDescription::offer(sdp)
            .map_err(|e| Error::Sdp(format!("failed to parse offer: {}", e)))?;
        self.pc
            .set_remote_description(offer)
            .await
            .map_err(|e| Error::Sdp(format!("failed to set remote offer: {}", e)))?;
        self.remote_description_set.store(true, Ordering::SeqCst);
        self.flush_pending_candidates().await;

        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| Error::Sdp(format!("failed to create answer: {}", e)))?;
        let sdp = answer.sdp.clone();
        self.pc
            .set_local_description(answer)
            .await
            .map_err(|e| Error::Sdp(format!("failed to set local answer: {}", e)))?;

        debug!("local answer created");
        let _ = self
            .events
            .send(PeerEvent::Signal(SignalPayload::Answer { sdp }));
        Ok(())
    }

    async fn apply_answer(&self, sdp: String) -> Result<()> {
        if !self.initiator {
            warn!("ignoring unexpected answer on the receiving side");
            return Ok(());
        }

        let answer = RTCSessionDescription::answer(sdp)
            .map_err(|e| Error::Sdp(format!("failed to parse answer: {}", e)))?;
        self.pc
            .set_remote_description(answer)
            .await
            .map_err(|e| Error::Sdp(format!("failed to set remote answer: {}", e)))?;
        self.remote_description_set.store(true, Ordering::SeqCst);
        self.flush_pending_candidates().await;
        Ok(())
    }

    async fn add_candidate(&self, candidate: CandidateInit) -> Result<()> {
        self.pc
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_m_line_index,
                username_fragment: None,
            })
            .await
            .map_err(|e| Error::IceCandidate(format!("failed to add ICE candidate: {}", e)))
    }

    async fn flush_pending_candidates(&self) {
        let buffered: Vec<CandidateInit> = std::mem::take(&mut *self.pending_candidates.lock());
        if buffered.is_empty() {
            return;
        }

        debug!(count = buffered.len(), "flushing buffered remote candidates");
        for candidate in buffered {
            if let Err(e) = self.add_candidate(candidate).await {
                warn!("failed to apply buffered candidate: {}", e);
            }
        }
    }
}

#[async_trait]
impl PeerHandle for RtcPeer {
    async fn apply_signal(&self, payload: SignalPayload) -> Result<()> {
        match payload {
            SignalPayload::Offer { sdp } => self.apply_offer(sdp).await,
            SignalPayload::Answer { sdp } => self.apply_answer(sdp).await,
            SignalPayload::Candidate { candidate } => {
                if self.remote_description_set.load(Ordering::SeqCst) {
                    self.add_candidate(candidate).await
                } else {
                    // Candidates cannot be applied before the description;
                    // buffer them in arrival order.
                    self.pending_candidates.lock().push(candidate);
                    Ok(())
                }
            }
        }
    }

    async fn send_data(&self, data: Vec<u8>) -> Result<()> {
        let dc = self
            .data_channel
            .lock()
            .clone()
            .ok_or_else(|| Error::DataChannel("data channel not open".to_string()))?;

        dc.send(&Bytes::from(data))
            .await
            .map_err(|e| Error::DataChannel(format!("failed to send: {}", e)))?;
        Ok(())
    }

    async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            warn!("error closing peer connection: {}", e);
        }
    }
}

/// Register peer-connection-level handlers: trickle ICE out, map connection
/// state to peer events, surface remote tracks.
fn register_connection_handlers(
    pc: &Arc<RTCPeerConnection>,
    events: &mpsc::UnboundedSender<PeerEvent>,
) {
    let ice_events = events.clone();
    pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        let events = ice_events.clone();
        Box::pin(async move {
            let Some(candidate) = candidate else {
                debug!("ICE candidate gathering complete");
                return;
            };

            match candidate.to_json() {
                Ok(init) => {
                    let _ = events.send(PeerEvent::Signal(SignalPayload::Candidate {
                        candidate: CandidateInit {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid,
                            sdp_m_line_index: init.sdp_mline_index,
                        },
                    }));
                }
                Err(e) => warn!("failed to serialize local candidate: {}", e),
            }
        })
    }));

    let state_events = events.clone();
    pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        let events = state_events.clone();
        Box::pin(async move {
            debug!(?state, "peer connection state changed");
            match state {
                RTCPeerConnectionState::Failed => {
                    let _ = events.send(PeerEvent::Error(
                        "peer connection failed (ICE failure or NAT traversal problem)"
                            .to_string(),
                    ));
                }
                RTCPeerConnectionState::Closed => {
                    let _ = events.send(PeerEvent::Closed);
                }
                // Disconnected can be transient while ICE probes; the data
                // channel close handler reports the definitive teardown.
                _ => {}
            }
        })
    }));

    let track_events = events.clone();
    pc.on_track(Box::new(move |track, _receiver, _transceiver| {
        let events = track_events.clone();
        Box::pin(async move {
            let _ = events.send(PeerEvent::Track { id: track.id() });
        })
    }));
}

/// Wire data channel callbacks to peer events
fn attach_data_channel(dc: &Arc<RTCDataChannel>, events: &mpsc::UnboundedSender<PeerEvent>) {
    let open_events = events.clone();
    dc.on_open(Box::new(move || {
        let events = open_events.clone();
        Box::pin(async move {
            let _ = events.send(PeerEvent::Connected);
        })
    }));

    let message_events = events.clone();
    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        let events = message_events.clone();
        Box::pin(async move {
            let _ = events.send(PeerEvent::Data(msg.data.to_vec()));
        })
    }));

    let close_events = events.clone();
    dc.on_close(Box::new(move || {
        let events = close_events.clone();
        Box::pin(async move {
            let _ = events.send(PeerEvent::Closed);
        })
    }));
}

/// Attach an Opus audio track for the controller's microphone. Failure is
/// logged and swallowed: audio never blocks connection establishment.
async fn add_microphone_track(pc: &Arc<RTCPeerConnection>) {
    let track = Arc::new(TrackLocalStaticSample::new(
        RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_string(),
            clock_rate: 48000,
            channels: 2,
            sdp_fmtp_line: String::new(),
            rtcp_feedback: vec![],
        },
        "audio".to_string(),
        "remotecast-mic".to_string(),
    ));

    match pc
        .add_track(track as Arc<dyn TrackLocal + Send + Sync>)
        .await
    {
        Ok(_) => debug!("microphone audio track attached"),
        Err(e) => warn!("microphone unavailable, continuing without audio: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Role;
    use crate::Session;

    fn factory() -> RtcPeerFactory {
        RtcPeerFactory::new(&ConnectionConfig::default())
    }

    #[tokio::test]
    async fn test_initiator_emits_offer_on_create() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _peer = factory().create(true, false, tx).await.unwrap();

        // First event out of an initiating peer is the local offer.
        let event = rx.recv().await.unwrap();
        match event {
            PeerEvent::Signal(SignalPayload::Offer { sdp }) => {
                assert!(sdp.contains("application"));
            }
            other => panic!("expected offer, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_receiver_is_passive_until_offer_arrives() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _peer = factory().create(false, false, tx).await.unwrap();

        // A receiving peer produces nothing until it gets the remote offer.
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_receiver_answers_offer() {
        let (offer_tx, mut offer_rx) = mpsc::unbounded_channel();
        let controller = factory().create(true, false, offer_tx).await.unwrap();

        let offer_sdp = loop {
            match offer_rx.recv().await.unwrap() {
                PeerEvent::Signal(SignalPayload::Offer { sdp }) => break sdp,
                _ => continue,
            }
        };

        let (answer_tx, mut answer_rx) = mpsc::unbounded_channel();
        let screen = factory().create(false, false, answer_tx).await.unwrap();
        screen
            .apply_signal(SignalPayload::Offer { sdp: offer_sdp })
            .await
            .unwrap();

        let answer_sdp = loop {
            match answer_rx.recv().await.unwrap() {
                PeerEvent::Signal(SignalPayload::Answer { sdp }) => break sdp,
                _ => continue,
            }
        };
        assert!(!answer_sdp.is_empty());

        controller
            .apply_signal(SignalPayload::Answer { sdp: answer_sdp })
            .await
            .unwrap();

        controller.close().await;
        screen.close().await;
    }

    #[tokio::test]
    async fn test_candidate_before_description_is_buffered() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let peer = factory().create(false, false, tx).await.unwrap();

        // Applying a candidate before any offer must not fail.
        peer.apply_signal(SignalPayload::Candidate {
            candidate: CandidateInit {
                candidate: "candidate:1 1 udp 2130706431 192.0.2.1 54321 typ host".to_string(),
                sdp_mid: Some("0".to_string()),
                sdp_m_line_index: Some(0),
            },
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_send_before_channel_open_fails() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let peer = factory().create(false, false, tx).await.unwrap();

        let result = peer.send_data(b"hello".to_vec()).await;
        assert!(matches!(result, Err(Error::DataChannel(_))));
    }

    #[test]
    fn test_factory_collects_turn_servers() {
        let mut config = ConnectionConfig::default();
        config.turn_servers.push(crate::config::TurnServerConfig {
            url: "turn:turn.example.com:3478".to_string(),
            username: "user".to_string(),
            credential: "secret".to_string(),
        });

        let factory = RtcPeerFactory::new(&config);
        assert_eq!(
            factory.ice_servers.len(),
            config.stun_servers.len() + 1
        );
        assert_eq!(factory.ice_servers.last().unwrap().username, "user");
    }

    #[test]
    fn test_session_role_drives_initiator() {
        // connect() decides initiator-ship from the session role.
        let controller = Session::generate(Role::Controller);
        let screen = Session::generate(Role::Screen);
        assert!(controller.role.is_initiator());
        assert!(!screen.role.is_initiator());
    }
}
