//! Per-viewer media session
//!
//! One [`MediaSession`] per remote viewer: an RTCPeerConnection wrapped
//! in the `Negotiating → Connected → {Failed, Closed}` state machine.
//! Track set and state change only through transport events routed
//! here; nothing outside this module mutates them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{watch, Mutex};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use crate::error::{AppError, Result};
use crate::events::{EventBus, SystemEvent};

use super::config::BrokerConfig;
use super::datachannel;
use super::relay::MediaRelay;
use super::signaling::{SdpAnswer, SdpOffer, SessionDescriptor, SessionState};
use super::sink::RecordingSink;
use super::source::AudioSource;

/// One remote viewer's connection.
pub struct MediaSession {
    session_id: String,
    pc: Arc<RTCPeerConnection>,
    state_tx: Arc<watch::Sender<SessionState>>,
    state_rx: watch::Receiver<SessionState>,
    relay: Arc<MediaRelay>,
    sink: Arc<Mutex<RecordingSink>>,
    events: Arc<EventBus>,
    created_at: Instant,
    released: AtomicBool,
}

impl MediaSession {
    /// Create a session for an incoming offer and produce the answer.
    ///
    /// The session comes back in `Negotiating` with its local media
    /// attached: one audio source track and the shared relay video
    /// track. A malformed or incompatible offer fails without leaving
    /// anything live.
    pub async fn negotiate(
        config: &BrokerConfig,
        relay: Arc<MediaRelay>,
        events: Arc<EventBus>,
        offer: SdpOffer,
    ) -> Result<(Arc<Self>, SdpAnswer)> {
        let remote = RTCSessionDescription::offer(offer.sdp)
            .map_err(|e| AppError::Negotiation(format!("invalid SDP offer: {e}")))?;

        let session_id = uuid::Uuid::new_v4().to_string();
        let pc = Arc::new(build_peer(config).await?);

        let sink = Arc::new(Mutex::new(RecordingSink::open(
            config.record_to.as_deref(),
        )?));

        let (state_tx, state_rx) = watch::channel(SessionState::Negotiating);
        let state_tx = Arc::new(state_tx);

        let session = Arc::new(Self {
            session_id: session_id.clone(),
            pc: pc.clone(),
            state_tx: state_tx.clone(),
            state_rx,
            relay: relay.clone(),
            sink: sink.clone(),
            events: events.clone(),
            created_at: Instant::now(),
            released: AtomicBool::new(false),
        });

        // Local media the answer will reference: pre-recorded audio plus
        // the shared relay video output
        let audio_source = AudioSource::new(config.audio_source.clone());
        let audio_track = audio_source.create_track(&session_id);
        pc.add_track(audio_track.clone() as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| AppError::WebRtc(format!("failed to add audio track: {e}")))?;

        let relay_track = relay.subscribe(&session_id).await;
        pc.add_track(relay_track as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| AppError::WebRtc(format!("failed to add relay track: {e}")))?;

        session.install_handlers();

        // Playback starts once the transport is up
        {
            let mut state_rx = session.state_watch();
            let source = audio_source.clone();
            let id = session_id.clone();
            tokio::spawn(async move {
                loop {
                    let state = *state_rx.borrow_and_update();
                    if state == SessionState::Connected {
                        source.start_playback(&id, audio_track);
                        break;
                    }
                    if state.is_terminal() || state_rx.changed().await.is_err() {
                        break;
                    }
                }
            });
        }

        // Offer/answer exchange; the answer carries the gathered
        // candidates (non-trickle)
        let answer = match session.apply_offer(remote).await {
            Ok(answer) => answer,
            Err(e) => {
                session.release().await;
                return Err(e);
            }
        };

        Ok((session, answer))
    }

    async fn apply_offer(&self, remote: RTCSessionDescription) -> Result<SdpAnswer> {
        self.pc
            .set_remote_description(remote)
            .await
            .map_err(|e| AppError::Negotiation(format!("failed to apply offer: {e}")))?;

        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| AppError::Negotiation(format!("failed to create answer: {e}")))?;

        let mut gather_complete = self.pc.gathering_complete_promise().await;
        self.pc
            .set_local_description(answer)
            .await
            .map_err(|e| AppError::Negotiation(format!("failed to set answer: {e}")))?;
        let _ = gather_complete.recv().await;

        let local = self
            .pc
            .local_description()
            .await
            .ok_or_else(|| AppError::Negotiation("no local description produced".to_string()))?;

        Ok(SdpAnswer::new(local.sdp, self.session_id.clone()))
    }

    /// Wire transport events to state transitions and side effects.
    fn install_handlers(self: &Arc<Self>) {
        // Connection state drives the session state machine
        let state_tx = self.state_tx.clone();
        let events = self.events.clone();
        let session_id = self.session_id.clone();
        self.pc
            .on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
                let state_tx = state_tx.clone();
                let events = events.clone();
                let session_id = session_id.clone();

                Box::pin(async move {
                    tracing::info!("{} transport state: {}", session_id, s);
                    if let Some(next) = map_transport_state(s) {
                        if apply_transition(&state_tx, next) {
                            events.publish(SystemEvent::SessionStateChanged {
                                session_id,
                                state: next,
                            });
                        }
                    }
                })
            }));

        // Inbound tracks: audio -> recording sink, video -> shared relay
        let session = self.clone();
        self.pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let session = session.clone();
            Box::pin(async move {
                session.handle_track(track).await;
            })
        }));

        // Data channel: echo protocol
        let session_id = self.session_id.clone();
        self.pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
            let session_id = session_id.clone();
            Box::pin(async move {
                datachannel::attach_echo(&session_id, dc);
            })
        }));
    }

    async fn handle_track(&self, track: Arc<TrackRemote>) {
        let kind = track.kind();
        tracing::info!("{} track received: {}", self.session_id, kind);
        self.events.publish(SystemEvent::TrackStarted {
            session_id: self.session_id.clone(),
            kind: kind.to_string(),
        });

        match kind {
            RTPCodecType::Audio => self.drain_audio(track),
            RTPCodecType::Video => self.relay.publish_track(&self.session_id, track),
            _ => {}
        }
    }

    /// Pump inbound audio into the recording sink until the track ends.
    fn drain_audio(&self, track: Arc<TrackRemote>) {
        let sink = self.sink.clone();
        let events = self.events.clone();
        let session_id = self.session_id.clone();

        tokio::spawn(async move {
            loop {
                match track.read_rtp().await {
                    Ok((packet, _)) => {
                        let mut sink = sink.lock().await;
                        if let Err(e) = sink.write_rtp(&packet) {
                            tracing::warn!("{} recording write failed: {}", session_id, e);
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::debug!("{} audio track ended: {}", session_id, e);
                        break;
                    }
                }
            }

            // Track ended: the sink stops with it
            if let Err(e) = sink.lock().await.close() {
                tracing::warn!("{} recording close failed: {}", session_id, e);
            }
            events.publish(SystemEvent::TrackEnded {
                session_id,
                kind: "audio".to_string(),
            });
        });
    }

    /// Explicit shutdown: transition to `Closed` and release.
    pub async fn close(&self) {
        apply_transition(&self.state_tx, SessionState::Closed);
        self.release().await;
    }

    /// Release every resource the session owns: recording sink, relay
    /// subscription, peer connection. Idempotent; the state is terminal
    /// before anything is torn down.
    pub async fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }

        // Whatever got us here, the state must reflect the teardown
        apply_transition(&self.state_tx, SessionState::Closed);

        if let Err(e) = self.sink.lock().await.close() {
            tracing::warn!("{} recording close failed: {}", self.session_id, e);
        }
        self.relay.unsubscribe(&self.session_id).await;
        if let Err(e) = self.pc.close().await {
            tracing::debug!("{} peer close failed: {}", self.session_id, e);
        }

        tracing::info!("{} released", self.session_id);
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn state(&self) -> SessionState {
        *self.state_rx.borrow()
    }

    /// Subscribe to state changes
    pub fn state_watch(&self) -> watch::Receiver<SessionState> {
        self.state_rx.clone()
    }

    pub fn descriptor(&self) -> SessionDescriptor {
        SessionDescriptor {
            session_id: self.session_id.clone(),
            state: self.state(),
            age_secs: self.created_at.elapsed().as_secs(),
        }
    }
}

/// Map transport connection states onto the session state machine.
fn map_transport_state(state: RTCPeerConnectionState) -> Option<SessionState> {
    match state {
        RTCPeerConnectionState::Connected => Some(SessionState::Connected),
        // A dropped transport is a failure: no reconnection supported
        RTCPeerConnectionState::Failed | RTCPeerConnectionState::Disconnected => {
            Some(SessionState::Failed)
        }
        RTCPeerConnectionState::Closed => Some(SessionState::Closed),
        _ => None,
    }
}

/// Apply a state transition, refusing to leave a terminal state.
/// Returns whether the state actually changed.
fn apply_transition(tx: &watch::Sender<SessionState>, next: SessionState) -> bool {
    tx.send_if_modified(|current| {
        if current.is_terminal() || *current == next {
            return false;
        }
        *current = next;
        true
    })
}

/// Build the peer connection the way every session does: default codec
/// set, default interceptors, ICE servers from config.
async fn build_peer(config: &BrokerConfig) -> Result<RTCPeerConnection> {
    let mut media_engine = MediaEngine::default();
    media_engine
        .register_default_codecs()
        .map_err(|e| AppError::Negotiation(format!("failed to register codecs: {e}")))?;

    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media_engine)
        .map_err(|e| AppError::Negotiation(format!("failed to register interceptors: {e}")))?;

    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build();

    let mut ice_servers = vec![];
    for stun_url in &config.stun_servers {
        ice_servers.push(RTCIceServer {
            urls: vec![stun_url.clone()],
            ..Default::default()
        });
    }
    for turn in &config.turn_servers {
        ice_servers.push(RTCIceServer {
            urls: turn.urls.clone(),
            username: turn.username.clone(),
            credential: turn.credential.clone(),
            ..Default::default()
        });
    }

    let rtc_config = RTCConfiguration {
        ice_servers,
        ..Default::default()
    };

    api.new_peer_connection(rtc_config)
        .await
        .map_err(|e| AppError::WebRtc(format!("failed to create peer connection: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_state_mapping() {
        assert_eq!(
            map_transport_state(RTCPeerConnectionState::Connected),
            Some(SessionState::Connected)
        );
        assert_eq!(
            map_transport_state(RTCPeerConnectionState::Failed),
            Some(SessionState::Failed)
        );
        assert_eq!(
            map_transport_state(RTCPeerConnectionState::Disconnected),
            Some(SessionState::Failed)
        );
        assert_eq!(
            map_transport_state(RTCPeerConnectionState::Closed),
            Some(SessionState::Closed)
        );
        assert_eq!(map_transport_state(RTCPeerConnectionState::Connecting), None);
        assert_eq!(map_transport_state(RTCPeerConnectionState::New), None);
    }

    #[test]
    fn test_no_transition_out_of_terminal() {
        let (tx, rx) = watch::channel(SessionState::Negotiating);

        assert!(apply_transition(&tx, SessionState::Connected));
        assert!(apply_transition(&tx, SessionState::Failed));
        assert_eq!(*rx.borrow(), SessionState::Failed);

        // Terminal states are sticky
        assert!(!apply_transition(&tx, SessionState::Connected));
        assert!(!apply_transition(&tx, SessionState::Closed));
        assert_eq!(*rx.borrow(), SessionState::Failed);
    }

    #[test]
    fn test_same_state_is_not_a_transition() {
        let (tx, _rx) = watch::channel(SessionState::Negotiating);
        assert!(!apply_transition(&tx, SessionState::Negotiating));
    }
}
