//! Shared video relay
//!
//! Fans one inbound video source out to every live session without a
//! per-subscriber decode. Each subscriber owns an output RTP track
//! created at subscribe time; the forward loop copies RTP packets from
//! the single upstream source into all current output tracks. The relay
//! lives as long as the broker.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocalWriter;
use webrtc::track::track_remote::TrackRemote;

use crate::events::{EventBus, SystemEvent};

use super::config::VideoCodec;

/// Relay notifications delivered to subscribers
#[derive(Debug, Clone)]
pub enum RelayEvent {
    /// A session started publishing video into the relay
    SourceStarted { session_id: String },
    /// The upstream video track ended
    SourceEnded { session_id: String },
}

/// Upstream RTP packet source feeding the relay.
///
/// Abstracted so the forward loop is drivable from tests; production
/// sources are remote WebRTC tracks.
#[async_trait::async_trait]
pub trait RtpSource: Send {
    async fn next_rtp(&mut self) -> Option<rtp::packet::Packet>;
}

struct RemoteTrackSource(Arc<TrackRemote>);

#[async_trait::async_trait]
impl RtpSource for RemoteTrackSource {
    async fn next_rtp(&mut self) -> Option<rtp::packet::Packet> {
        match self.0.read_rtp().await {
            Ok((packet, _)) => Some(packet),
            Err(e) => {
                tracing::debug!("Relay source read ended: {}", e);
                None
            }
        }
    }
}

/// Broker-wide video fan-out registry.
pub struct MediaRelay {
    codec: VideoCodec,
    subscribers: RwLock<HashMap<String, Arc<TrackLocalStaticRTP>>>,
    /// Session currently publishing into the relay, if any
    source: RwLock<Option<String>>,
    notify_tx: broadcast::Sender<RelayEvent>,
    events: Arc<EventBus>,
}

impl MediaRelay {
    pub fn new(codec: VideoCodec, events: Arc<EventBus>) -> Self {
        let (notify_tx, _) = broadcast::channel(16);
        Self {
            codec,
            subscribers: RwLock::new(HashMap::new()),
            source: RwLock::new(None),
            notify_tx,
            events,
        }
    }

    /// Create (or return) the output track for a session.
    pub async fn subscribe(&self, session_id: &str) -> Arc<TrackLocalStaticRTP> {
        let mut subscribers = self.subscribers.write().await;
        if let Some(track) = subscribers.get(session_id) {
            return track.clone();
        }

        let capability = RTCRtpCodecCapability {
            mime_type: self.codec.mime_type().to_string(),
            clock_rate: 90000,
            channels: 0,
            sdp_fmtp_line: self.codec.sdp_fmtp().to_string(),
            rtcp_feedback: vec![],
        };
        let track = Arc::new(TrackLocalStaticRTP::new(
            capability,
            "relay-video".to_string(),
            format!("xcast-{session_id}"),
        ));
        subscribers.insert(session_id.to_string(), track.clone());
        tracing::debug!("Relay subscriber added: {}", session_id);
        track
    }

    /// Drop a session's output track. Other subscriptions are untouched.
    pub async fn unsubscribe(&self, session_id: &str) {
        if self.subscribers.write().await.remove(session_id).is_some() {
            tracing::debug!("Relay subscriber removed: {}", session_id);
        }
    }

    /// Receive relay lifecycle notifications.
    pub fn notifications(&self) -> broadcast::Receiver<RelayEvent> {
        self.notify_tx.subscribe()
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    /// Whether a session is currently publishing.
    pub async fn has_source(&self) -> bool {
        self.source.read().await.is_some()
    }

    /// Republish an inbound remote video track to all subscribers.
    pub fn publish_track(self: &Arc<Self>, session_id: &str, track: Arc<TrackRemote>) {
        self.publish(session_id, RemoteTrackSource(track));
    }

    /// Start the forward loop for an upstream source.
    ///
    /// A single source is active at a time; a second publisher is
    /// rejected until the first one's track ends.
    pub fn publish<S: RtpSource + 'static>(self: &Arc<Self>, session_id: &str, mut source: S) {
        let relay = self.clone();
        let publisher = session_id.to_string();

        tokio::spawn(async move {
            {
                let mut slot = relay.source.write().await;
                if let Some(active) = slot.as_deref() {
                    tracing::warn!(
                        "Relay already fed by {}, ignoring video from {}",
                        active,
                        publisher
                    );
                    return;
                }
                *slot = Some(publisher.clone());
            }
            let _ = relay.notify_tx.send(RelayEvent::SourceStarted {
                session_id: publisher.clone(),
            });
            tracing::info!("Relay source started: {}", publisher);

            while let Some(packet) = source.next_rtp().await {
                let subscribers = relay.subscribers.read().await;
                for (id, out) in subscribers.iter() {
                    if let Err(e) = out.write_rtp(&packet).await {
                        tracing::trace!("Relay write to {} failed: {}", id, e);
                    }
                }
            }

            *relay.source.write().await = None;
            let _ = relay.notify_tx.send(RelayEvent::SourceEnded {
                session_id: publisher.clone(),
            });
            relay.events.publish(SystemEvent::TrackEnded {
                session_id: publisher.clone(),
                kind: "video".to_string(),
            });
            tracing::info!("Relay source ended: {}", publisher);
        });
    }
}
