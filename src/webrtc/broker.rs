//! Media session broker
//!
//! Accepts negotiation requests, owns the live-session table, and
//! removes each session once it reaches a terminal state. Sessions
//! never touch the table themselves; a per-session monitor task
//! observes the state machine and performs removal-by-id after the
//! session has fully released its resources.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::error::{AppError, Result};
use crate::events::{EventBus, SystemEvent};

use super::config::BrokerConfig;
use super::relay::MediaRelay;
use super::session::MediaSession;
use super::signaling::{SdpAnswer, SdpOffer, SessionDescriptor};

/// Broker for concurrent remote-viewer sessions.
pub struct SessionBroker {
    config: BrokerConfig,
    relay: Arc<MediaRelay>,
    events: Arc<EventBus>,
    sessions: Arc<RwLock<HashMap<String, Arc<MediaSession>>>>,
    shutting_down: AtomicBool,
}

impl SessionBroker {
    pub fn new(config: BrokerConfig, events: Arc<EventBus>) -> Self {
        let relay = Arc::new(MediaRelay::new(config.video_codec, events.clone()));
        Self {
            config,
            relay,
            events,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Handle one offer: create a session, attach local media, answer.
    pub async fn negotiate(&self, offer: SdpOffer) -> Result<SdpAnswer> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(AppError::Negotiation("broker is shutting down".to_string()));
        }
        {
            let sessions = self.sessions.read().await;
            if sessions.len() >= self.config.max_sessions {
                return Err(AppError::Negotiation(format!(
                    "maximum sessions ({}) reached",
                    self.config.max_sessions
                )));
            }
        }

        let (session, answer) = MediaSession::negotiate(
            &self.config,
            self.relay.clone(),
            self.events.clone(),
            offer,
        )
        .await?;

        let session_id = session.session_id().to_string();
        self.sessions
            .write()
            .await
            .insert(session_id.clone(), session.clone());

        // A shutdown that raced this negotiation closes the session
        // instead of leaving it dangling
        if self.shutting_down.load(Ordering::SeqCst) {
            self.sessions.write().await.remove(&session_id);
            session.close().await;
            return Err(AppError::Negotiation("broker is shutting down".to_string()));
        }

        self.events.publish(SystemEvent::SessionCreated {
            session_id: session_id.clone(),
        });
        tracing::info!("Session created: {}", session_id);

        self.spawn_monitor(session);

        Ok(answer)
    }

    /// Watch one session; on a terminal state release it and remove it
    /// from the live set. Removal happens only after the session has
    /// fully transitioned, so no reader observes a half-removed session.
    fn spawn_monitor(&self, session: Arc<MediaSession>) {
        let sessions = self.sessions.clone();
        let events = self.events.clone();

        tokio::spawn(async move {
            let mut state_rx = session.state_watch();
            loop {
                let state = *state_rx.borrow_and_update();
                if state.is_terminal() {
                    session.release().await;
                    let removed = sessions
                        .write()
                        .await
                        .remove(session.session_id())
                        .is_some();
                    if removed {
                        events.publish(SystemEvent::SessionRemoved {
                            session_id: session.session_id().to_string(),
                        });
                        tracing::info!("Session removed: {} ({})", session.session_id(), state);
                    }
                    break;
                }
                if state_rx.changed().await.is_err() {
                    break;
                }
            }
        });
    }

    /// Close every live session and clear the table. Safe to call while
    /// negotiations are in flight; sessions mid-negotiation are closed
    /// rather than left dangling.
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        let drained: Vec<Arc<MediaSession>> = {
            let mut sessions = self.sessions.write().await;
            sessions.drain().map(|(_, session)| session).collect()
        };

        if drained.is_empty() {
            return;
        }
        tracing::info!("Shutting down {} live session(s)", drained.len());
        futures::future::join_all(drained.iter().map(|session| session.close())).await;
    }

    /// Shared relay (for wiring additional publishers)
    pub fn relay(&self) -> Arc<MediaRelay> {
        self.relay.clone()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn get(&self, session_id: &str) -> Option<Arc<MediaSession>> {
        self.sessions.read().await.get(session_id).cloned()
    }

    /// Descriptors of all live sessions
    pub async fn list_sessions(&self) -> Vec<SessionDescriptor> {
        let sessions = self.sessions.read().await;
        sessions.values().map(|s| s.descriptor()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use webrtc::api::interceptor_registry::register_default_interceptors;
    use webrtc::api::media_engine::MediaEngine;
    use webrtc::api::APIBuilder;
    use webrtc::interceptor::registry::Registry;
    use webrtc::peer_connection::configuration::RTCConfiguration;
    use webrtc::peer_connection::RTCPeerConnection;
    use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;

    fn broker() -> SessionBroker {
        SessionBroker::new(
            BrokerConfig {
                max_sessions: 64,
                ..BrokerConfig::default()
            },
            Arc::new(EventBus::new()),
        )
    }

    /// Build a viewer-side peer and its offer, the way a browser would:
    /// audio and video transceivers plus a data channel.
    async fn viewer_offer() -> (Arc<RTCPeerConnection>, SdpOffer) {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs().unwrap();
        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine).unwrap();
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let pc = Arc::new(
            api.new_peer_connection(RTCConfiguration::default())
                .await
                .unwrap(),
        );
        pc.add_transceiver_from_kind(RTPCodecType::Audio, None)
            .await
            .unwrap();
        pc.add_transceiver_from_kind(RTPCodecType::Video, None)
            .await
            .unwrap();
        let _dc = pc.create_data_channel("control", None).await.unwrap();

        let offer = pc.create_offer(None).await.unwrap();
        pc.set_local_description(offer.clone()).await.unwrap();

        (pc, SdpOffer::new(offer.sdp))
    }

    #[tokio::test]
    async fn test_malformed_offer_creates_no_session() {
        let broker = broker();

        let err = broker
            .negotiate(SdpOffer::new("this is not sdp"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Negotiation(_)));
        assert_eq!(broker.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_answer_carries_local_audio_capability() {
        let broker = broker();
        let (_pc, offer) = viewer_offer().await;

        let answer = broker.negotiate(offer).await.unwrap();
        assert!(!answer.session_id.is_empty());
        // The attached local audio source shows up as opus in the answer
        assert!(answer.sdp.to_lowercase().contains("opus"));
        assert_eq!(broker.session_count().await, 1);

        let session = broker.get(&answer.session_id).await.unwrap();
        assert_eq!(
            session.state(),
            super::super::signaling::SessionState::Negotiating
        );

        broker.shutdown().await;
    }

    #[tokio::test]
    async fn test_terminal_session_leaves_live_set() {
        let broker = broker();
        let (_pc, offer) = viewer_offer().await;

        let answer = broker.negotiate(offer).await.unwrap();
        let session = broker.get(&answer.session_id).await.unwrap();

        session.close().await;

        // The monitor removes the session shortly after the terminal
        // transition
        let mut removed = false;
        for _ in 0..50 {
            if broker.session_count().await == 0 {
                removed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(removed, "terminal session was not removed");
        assert!(broker.get(&answer.session_id).await.is_none());
    }

    #[tokio::test]
    async fn test_shutdown_empties_live_set() {
        let broker = broker();

        for _ in 0..3 {
            let (_pc, offer) = viewer_offer().await;
            broker.negotiate(offer).await.unwrap();
        }
        assert_eq!(broker.session_count().await, 3);

        broker.shutdown().await;
        assert_eq!(broker.session_count().await, 0);

        // Safe to call again
        broker.shutdown().await;
        assert_eq!(broker.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_session_limit() {
        let broker = SessionBroker::new(
            BrokerConfig {
                max_sessions: 1,
                ..BrokerConfig::default()
            },
            Arc::new(EventBus::new()),
        );

        let (_pc1, offer1) = viewer_offer().await;
        broker.negotiate(offer1).await.unwrap();

        let (_pc2, offer2) = viewer_offer().await;
        let err = broker.negotiate(offer2).await.unwrap_err();
        assert!(matches!(err, AppError::Negotiation(_)));

        broker.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_negotiations_get_distinct_sessions() {
        let broker = Arc::new(broker());

        let mut handles = Vec::new();
        for _ in 0..50 {
            let broker = broker.clone();
            handles.push(tokio::spawn(async move {
                let (_pc, offer) = viewer_offer().await;
                broker.negotiate(offer).await.unwrap().session_id
            }));
        }

        let mut ids = std::collections::HashSet::new();
        for handle in handles {
            ids.insert(handle.await.unwrap());
        }

        assert_eq!(ids.len(), 50);
        assert_eq!(broker.session_count().await, 50);

        broker.shutdown().await;
        assert_eq!(broker.session_count().await, 0);
    }
}
