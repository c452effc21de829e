//! Data-channel message handling
//!
//! The one protocol the broker speaks on a session's data channel is
//! echo-with-transform: a text message starting with `ping` is answered
//! with `pong` plus the unchanged remainder. Anything else is ignored.

use std::sync::Arc;

use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;

/// Reply for an incoming text message, if one is owed.
pub fn reply_for(message: &str) -> Option<String> {
    message.strip_prefix("ping").map(|rest| format!("pong{rest}"))
}

/// Wire the echo protocol onto an incoming data channel.
pub fn attach_echo(session_id: &str, channel: Arc<RTCDataChannel>) {
    let session_id = session_id.to_string();
    let label = channel.label().to_string();
    tracing::info!("{} data channel opened: {}", session_id, label);

    let dc = channel.clone();
    channel.on_message(Box::new(move |msg: DataChannelMessage| {
        let dc = dc.clone();
        let session_id = session_id.clone();

        Box::pin(async move {
            if !msg.is_string {
                tracing::debug!("{} binary data channel message ignored", session_id);
                return;
            }
            let Ok(text) = String::from_utf8(msg.data.to_vec()) else {
                return;
            };
            if let Some(reply) = reply_for(&text) {
                if let Err(e) = dc.send_text(reply).await {
                    tracing::debug!("{} data channel send failed: {}", session_id, e);
                }
            }
        })
    }));
}
