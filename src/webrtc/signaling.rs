//! Session negotiation types and messages

use serde::{Deserialize, Serialize};

/// SDP Offer from a remote viewer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SdpOffer {
    /// SDP content
    pub sdp: String,
}

impl SdpOffer {
    pub fn new(sdp: impl Into<String>) -> Self {
        Self { sdp: sdp.into() }
    }
}

/// SDP Answer produced by the broker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SdpAnswer {
    /// SDP content
    pub sdp: String,
    /// Session ID assigned to this viewer
    pub session_id: String,
}

impl SdpAnswer {
    pub fn new(sdp: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            sdp: sdp.into(),
            session_id: session_id.into(),
        }
    }
}

/// Offer request (from the signaling transport)
///
/// Matches the browser's `RTCSessionDescription` JSON shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferRequest {
    /// SDP offer
    pub sdp: String,
    /// Description type; must be "offer"
    #[serde(rename = "type")]
    pub kind: String,
}

/// Answer response (to the signaling transport)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerResponse {
    /// SDP answer
    pub sdp: String,
    /// Description type; always "answer"
    #[serde(rename = "type")]
    pub kind: String,
    /// Session ID for this connection
    pub session_id: String,
}

impl AnswerResponse {
    pub fn new(answer: SdpAnswer) -> Self {
        Self {
            sdp: answer.sdp,
            kind: "answer".to_string(),
            session_id: answer.session_id,
        }
    }
}

/// Media session connection state
///
/// `Negotiating` is entered on creation; `Connected` once the transport
/// reports a usable connection; `Failed` and `Closed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Negotiating,
    Connected,
    Failed,
    Closed,
}

impl SessionState {
    /// Terminal states release the session's resources and remove it
    /// from the live set.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Failed | SessionState::Closed)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Negotiating => write!(f, "negotiating"),
            SessionState::Connected => write!(f, "connected"),
            SessionState::Failed => write!(f, "failed"),
            SessionState::Closed => write!(f, "closed"),
        }
    }
}

/// Live session descriptor (for listing)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDescriptor {
    /// Session ID
    pub session_id: String,
    /// Current connection state
    pub state: SessionState,
    /// Seconds since the session was created
    pub age_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!SessionState::Negotiating.is_terminal());
        assert!(!SessionState::Connected.is_terminal());
        assert!(SessionState::Failed.is_terminal());
        assert!(SessionState::Closed.is_terminal());
    }

    #[test]
    fn test_offer_request_json_shape() {
        let request: OfferRequest =
            serde_json::from_str(r#"{"sdp":"v=0","type":"offer"}"#).unwrap();
        assert_eq!(request.kind, "offer");
        assert_eq!(request.sdp, "v=0");
    }

    #[test]
    fn test_answer_response_json_shape() {
        let response = AnswerResponse::new(SdpAnswer::new("v=0", "abc"));
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains(r#""type":"answer""#));
        assert!(json.contains(r#""session_id":"abc""#));
    }
}
