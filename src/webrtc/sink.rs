//! Recording sinks for inbound audio
//!
//! Every inbound audio track is drained into a sink: an Ogg/Opus writer
//! when a record destination is configured, a discard sink otherwise.
//! Sinks are closed when their track ends or the session is released.

use std::fs::File;
use std::path::Path;

use webrtc::media::io::ogg_writer::OggWriter;
use webrtc::media::io::Writer;

use crate::error::{AppError, Result};

/// Opus sample rate used for recordings
const OPUS_SAMPLE_RATE: u32 = 48000;
/// Opus channel count used for recordings
const OPUS_CHANNELS: u8 = 2;

enum SinkBackend {
    Ogg(OggWriter<File>),
    Blackhole,
}

/// Consumes one audio track's RTP packets.
pub struct RecordingSink {
    backend: SinkBackend,
    packets: u64,
    closed: bool,
}

impl RecordingSink {
    /// Open a sink for the given destination; `None` discards.
    pub fn open(record_to: Option<&Path>) -> Result<Self> {
        let backend = match record_to {
            Some(path) => {
                let writer = OggWriter::new(File::create(path)?, OPUS_SAMPLE_RATE, OPUS_CHANNELS)
                    .map_err(|e| AppError::Media(format!("failed to open ogg writer: {e}")))?;
                tracing::info!("Recording inbound audio to {}", path.display());
                SinkBackend::Ogg(writer)
            }
            None => SinkBackend::Blackhole,
        };
        Ok(Self {
            backend,
            packets: 0,
            closed: false,
        })
    }

    /// Write one RTP packet. Writes after close are dropped.
    pub fn write_rtp(&mut self, packet: &rtp::packet::Packet) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        if let SinkBackend::Ogg(writer) = &mut self.backend {
            writer
                .write_rtp(packet)
                .map_err(|e| AppError::Media(format!("recording write failed: {e}")))?;
        }
        self.packets += 1;
        Ok(())
    }

    /// Flush and close. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if let SinkBackend::Ogg(writer) = &mut self.backend {
            writer
                .close()
                .map_err(|e| AppError::Media(format!("recording close failed: {e}")))?;
        }
        tracing::debug!("Recording sink closed after {} packets", self.packets);
        Ok(())
    }

    /// Packets accepted so far
    pub fn packets_written(&self) -> u64 {
        self.packets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use bytes::Bytes;
    use rtp::packet::Packet;

    fn opus_packet(seq: u16, timestamp: u32) -> Packet {
        Packet {
            header: rtp::header::Header {
                sequence_number: seq,
                timestamp,
                ..Default::default()
            },
            payload: Bytes::from_static(&[0xfc, 0xff, 0xfe]),
        }
    }

    #[test]
    fn test_blackhole_counts_packets() {
        let mut sink = RecordingSink::open(None).unwrap();
        sink.write_rtp(&opus_packet(1, 0)).unwrap();
        sink.write_rtp(&opus_packet(2, 960)).unwrap();
        assert_eq!(sink.packets_written(), 2);
        sink.close().unwrap();
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut sink = RecordingSink::open(None).unwrap();
        sink.close().unwrap();
        sink.close().unwrap();

        // Writes after close are silently dropped
        sink.write_rtp(&opus_packet(1, 0)).unwrap();
        assert_eq!(sink.packets_written(), 0);
    }

    #[test]
    fn test_ogg_sink_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recording.ogg");

        let mut sink = RecordingSink::open(Some(&path)).unwrap();
        sink.write_rtp(&opus_packet(1, 0)).unwrap();
        sink.write_rtp(&opus_packet(2, 960)).unwrap();
        sink.close().unwrap();

        let size = std::fs::metadata(&path).unwrap().len();
        assert!(size > 0, "ogg file should contain header pages");
    }
}
