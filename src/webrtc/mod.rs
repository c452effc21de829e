//! Media session broker
//!
//! WebRTC-based real-time viewing of the supervised application:
//! - per-viewer sessions negotiated from SDP offers
//! - one shared relay fanning inbound video out to every session
//! - inbound audio drained into a recording (or discard) sink
//! - a pre-recorded audio source offered back to each peer
//! - DataChannel echo protocol for connectivity checks
//!
//! Architecture:
//! ```text
//! Viewer ---- SDP offer ----> SessionBroker::negotiate
//!                                  |
//!                                  v
//!                             MediaSession  (Negotiating -> Connected -> {Failed, Closed})
//!                               |      |
//!                    inbound audio    inbound video
//!                          |                |
//!                    RecordingSink     MediaRelay ----> all sessions' output tracks
//! ```

pub mod broker;
pub mod config;
pub mod datachannel;
pub mod relay;
pub mod session;
pub mod signaling;
pub mod sink;
pub mod source;

pub use broker::SessionBroker;
pub use config::{BrokerConfig, TurnServer, VideoCodec};
pub use relay::{MediaRelay, RelayEvent};
pub use session::MediaSession;
pub use signaling::{
    AnswerResponse, OfferRequest, SdpAnswer, SdpOffer, SessionDescriptor, SessionState,
};
pub use sink::RecordingSink;
pub use source::AudioSource;
