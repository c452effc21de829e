//! Screen-capture encoder invocation
//!
//! The encoder is an external ffmpeg process grabbing the virtual
//! display with x11grab and writing to the configured stream
//! destination. The destination is opaque to us: it is passed straight
//! through to the encoder.

use serde::{Deserialize, Serialize};

use crate::display::DisplayHandle;
use crate::error::Result;
use crate::process::ManagedProcess;

/// Where the encoder writes when no destination is given on the CLI
pub const DEFAULT_STREAM_DESTINATION: &str = "/var/lib/xcast/streams/app.m3u8";

/// Capture encoder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderConfig {
    /// Encoder binary
    pub binary: String,
    /// Capture width in pixels
    pub width: u32,
    /// Capture height in pixels
    pub height: u32,
    /// Capture framerate
    pub framerate: u32,
    /// GOP size (keyframe interval in frames)
    pub gop: u32,
    /// Stream destination (file path or sink identifier)
    pub destination: String,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            binary: "ffmpeg".to_string(),
            width: 1280,
            height: 720,
            framerate: 24,
            gop: 30,
            destination: DEFAULT_STREAM_DESTINATION.to_string(),
        }
    }
}

impl EncoderConfig {
    /// ffmpeg argument list for grabbing the given display
    pub fn build_args(&self, display: DisplayHandle) -> Vec<String> {
        vec![
            "-f".to_string(),
            "x11grab".to_string(),
            "-s".to_string(),
            format!("{}x{}", self.width, self.height),
            "-r".to_string(),
            self.framerate.to_string(),
            "-i".to_string(),
            display.display_string(),
            "-c:v".to_string(),
            "h264".to_string(),
            "-preset".to_string(),
            "superfast".to_string(),
            "-flags".to_string(),
            "+cgop".to_string(),
            "-g".to_string(),
            self.gop.to_string(),
            self.destination.clone(),
        ]
    }
}

/// Launch the encoder against a live display.
pub fn launch(config: &EncoderConfig, display: DisplayHandle) -> Result<ManagedProcess> {
    let args = config.build_args(display);
    ManagedProcess::spawn("encoder", &config.binary, &args, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_args_shape() {
        let config = EncoderConfig {
            destination: "/tmp/out.m3u8".to_string(),
            ..EncoderConfig::default()
        };
        let args = config.build_args(DisplayHandle(42));

        assert_eq!(args[0], "-f");
        assert_eq!(args[1], "x11grab");
        assert!(args.contains(&"1280x720".to_string()));
        assert!(args.contains(&":42".to_string()));
        // Destination is the final argument
        assert_eq!(args.last().unwrap(), "/tmp/out.m3u8");
    }

    #[tokio::test]
    async fn test_launch_missing_binary() {
        let config = EncoderConfig {
            binary: "/nonexistent/ffmpeg".to_string(),
            ..EncoderConfig::default()
        };
        assert!(launch(&config, DisplayHandle(1)).is_err());
    }
}
