//! System event types

use serde::{Deserialize, Serialize};

use crate::webrtc::signaling::SessionState;

/// System event enumeration
///
/// All events are tagged with their event name for serialization:
/// ```json
/// {
///   "event": "session.state_changed",
///   "data": { "session_id": "…", "state": "connected" }
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum SystemEvent {
    // ============================================================================
    // Supervisor Events
    // ============================================================================
    /// A supervised run came up: display, guest and encoder are live
    #[serde(rename = "supervisor.started")]
    SupervisorStarted {
        /// Display number the run is bound to
        display: u32,
        /// Guest application pid
        guest_pid: Option<u32>,
        /// Capture encoder pid
        encoder_pid: Option<u32>,
    },

    /// The supervised run was torn down
    #[serde(rename = "supervisor.stopped")]
    SupervisorStopped,

    /// A subprocess ignored SIGTERM and had to be killed
    #[serde(rename = "supervisor.termination_timeout")]
    TerminationTimeout {
        /// Process name as reported in logs
        process: String,
    },

    // ============================================================================
    // Media Session Events
    // ============================================================================
    /// A new session entered negotiation
    #[serde(rename = "session.created")]
    SessionCreated {
        /// Session ID
        session_id: String,
    },

    /// Session connection state changed
    #[serde(rename = "session.state_changed")]
    SessionStateChanged {
        /// Session ID
        session_id: String,
        /// New state
        state: SessionState,
    },

    /// An inbound track started flowing
    #[serde(rename = "session.track_started")]
    TrackStarted {
        /// Session ID
        session_id: String,
        /// Track kind: "audio" or "video"
        kind: String,
    },

    /// An inbound track ended
    #[serde(rename = "session.track_ended")]
    TrackEnded {
        /// Session ID
        session_id: String,
        /// Track kind: "audio" or "video"
        kind: String,
    },

    /// A terminal session was removed from the live set
    #[serde(rename = "session.removed")]
    SessionRemoved {
        /// Session ID
        session_id: String,
    },

    // ============================================================================
    // System Events
    // ============================================================================
    /// System error or warning
    #[serde(rename = "system.error")]
    SystemError {
        /// Module that generated the error: "supervisor", "broker"
        module: String,
        /// Severity: "warning", "error"
        severity: String,
        /// Error message
        message: String,
    },
}

impl SystemEvent {
    /// Get the event name (for filtering/routing)
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::SupervisorStarted { .. } => "supervisor.started",
            Self::SupervisorStopped => "supervisor.stopped",
            Self::TerminationTimeout { .. } => "supervisor.termination_timeout",
            Self::SessionCreated { .. } => "session.created",
            Self::SessionStateChanged { .. } => "session.state_changed",
            Self::TrackStarted { .. } => "session.track_started",
            Self::TrackEnded { .. } => "session.track_ended",
            Self::SessionRemoved { .. } => "session.removed",
            Self::SystemError { .. } => "system.error",
        }
    }

    /// Check if event name matches a topic pattern
    ///
    /// Supports wildcards:
    /// - `*` matches all events
    /// - `session.*` matches all session events
    /// - `session.state_changed` matches the exact event
    pub fn matches_topic(&self, topic: &str) -> bool {
        if topic == "*" {
            return true;
        }

        let event_name = self.event_name();

        if topic.ends_with(".*") {
            let prefix = topic.trim_end_matches(".*");
            event_name.starts_with(prefix)
        } else {
            event_name == topic
        }
    }
}
