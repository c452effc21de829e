//! Media session broker configuration

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Broker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// STUN server URLs
    pub stun_servers: Vec<String>,
    /// TURN server configuration
    pub turn_servers: Vec<TurnServer>,
    /// Codec used for the shared relay output tracks
    pub video_codec: VideoCodec,
    /// Ogg/Opus file offered to each peer as the local audio source
    /// (skipped when absent)
    pub audio_source: Option<PathBuf>,
    /// Record inbound audio here; `None` means a discard sink
    pub record_to: Option<PathBuf>,
    /// Maximum concurrent sessions
    pub max_sessions: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            // Empty STUN servers for local connections - host candidates work directly
            // For remote access, configure STUN/TURN servers
            stun_servers: vec![],
            turn_servers: vec![],
            video_codec: VideoCodec::Vp8,
            audio_source: None,
            record_to: None,
            max_sessions: 16,
        }
    }
}

/// TURN server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnServer {
    /// TURN server URLs; multiple URLs allow fallback between UDP and
    /// TCP transports
    pub urls: Vec<String>,
    /// Username for TURN authentication
    pub username: String,
    /// Credential for TURN authentication
    pub credential: String,
}

/// Video codec preference for relay output tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    H264,
    Vp8,
    Vp9,
}

impl VideoCodec {
    pub fn mime_type(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "video/H264",
            VideoCodec::Vp8 => "video/VP8",
            VideoCodec::Vp9 => "video/VP9",
        }
    }

    pub fn sdp_fmtp(&self) -> &'static str {
        match self {
            VideoCodec::H264 => {
                "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f"
            }
            VideoCodec::Vp8 => "",
            VideoCodec::Vp9 => "profile-id=0",
        }
    }
}

impl std::fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VideoCodec::H264 => write!(f, "H.264"),
            VideoCodec::Vp8 => write!(f, "VP8"),
            VideoCodec::Vp9 => write!(f, "VP9"),
        }
    }
}
