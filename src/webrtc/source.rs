//! Local audio source
//!
//! Each peer is offered a locally generated audio track played from a
//! pre-recorded Ogg/Opus file, paced in real time. A missing file just
//! leaves the track silent.

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use webrtc::api::media_engine::MIME_TYPE_OPUS;
use webrtc::media::io::ogg_reader::OggReader;
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// Opus page pacing interval
const PAGE_INTERVAL: Duration = Duration::from_millis(20);
/// Opus clock rate
const OPUS_CLOCK_RATE: u32 = 48000;

/// Pre-recorded audio offered back to every peer.
#[derive(Clone)]
pub struct AudioSource {
    path: Option<PathBuf>,
}

impl AudioSource {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    /// Create the outbound audio track for one session.
    pub fn create_track(&self, session_id: &str) -> Arc<TrackLocalStaticSample> {
        Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: OPUS_CLOCK_RATE,
                channels: 2,
                sdp_fmtp_line: "minptime=10;useinbandfec=1".to_string(),
                rtcp_feedback: vec![],
            },
            "audio0".to_string(),
            format!("xcast-{session_id}"),
        ))
    }

    /// Start feeding the track once the session is connected.
    ///
    /// Plays the configured file to the end, then stops; the playback
    /// task also stops as soon as the track is no longer writable.
    pub fn start_playback(&self, session_id: &str, track: Arc<TrackLocalStaticSample>) {
        let Some(path) = self.path.clone() else {
            tracing::debug!("{} no audio source configured, track stays silent", session_id);
            return;
        };

        let session_id = session_id.to_string();
        tokio::spawn(async move {
            let (mut ogg, _header) = match File::open(&path)
                .map_err(|e| e.to_string())
                .and_then(|f| {
                    OggReader::new(BufReader::new(f), true).map_err(|e| e.to_string())
                }) {
                Ok(reader) => reader,
                Err(e) => {
                    tracing::warn!(
                        "{} cannot play audio source {}: {}",
                        session_id,
                        path.display(),
                        e
                    );
                    return;
                }
            };

            tracing::info!("{} playing audio source {}", session_id, path.display());

            let mut ticker = tokio::time::interval(PAGE_INTERVAL);
            let mut last_granule: u64 = 0;

            while let Ok((page_data, page_header)) = ogg.parse_next_page() {
                let sample_count = page_header.granule_position.saturating_sub(last_granule);
                last_granule = page_header.granule_position;
                let duration =
                    Duration::from_millis(sample_count * 1000 / u64::from(OPUS_CLOCK_RATE));

                let sample = Sample {
                    data: page_data.freeze(),
                    duration,
                    ..Default::default()
                };
                if let Err(e) = track.write_sample(&sample).await {
                    tracing::debug!("{} audio playback stopped: {}", session_id, e);
                    return;
                }

                ticker.tick().await;
            }

            tracing::debug!("{} audio source finished", session_id);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_uses_opus() {
        let source = AudioSource::new(None);
        let track = source.create_track("abc");
        assert_eq!(track.codec().mime_type, MIME_TYPE_OPUS);
    }

    #[tokio::test]
    async fn test_missing_file_is_not_fatal() {
        let source = AudioSource::new(Some(PathBuf::from("/nonexistent/audio.ogg")));
        let track = source.create_track("abc");
        // Spawns, logs and returns without panicking
        source.start_playback("abc", track);
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
