//! Capture configuration.

use std::path::PathBuf;

use crate::traits::{CaptureFormat, FieldOrder, FourCC};

/// Default V4L2 device node.
pub const DEFAULT_DEVICE: &str = "/dev/video0";
/// Default raw frame output, relative to the working directory.
pub const DEFAULT_OUTPUT: &str = "frame.raw";
/// Default capture width in pixels.
pub const DEFAULT_WIDTH: u32 = 640;
/// Default capture height in pixels.
pub const DEFAULT_HEIGHT: u32 = 480;

/// Settings for one capture session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConfig {
    /// V4L2 device path.
    pub device_path: PathBuf,
    /// Requested width in pixels.
    pub width: u32,
    /// Requested height in pixels.
    pub height: u32,
    /// Requested pixel format.
    pub fourcc: FourCC,
    /// Requested field order.
    pub field: FieldOrder,
    /// Where the raw frame is written.
    pub output_path: PathBuf,
    /// Print capabilities and controls before capturing.
    pub list_controls: bool,
    /// Compute the black pixel ratio of the captured frame.
    pub black_ratio: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device_path: PathBuf::from(DEFAULT_DEVICE),
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            fourcc: FourCC::YUYV,
            field: FieldOrder::Interlaced,
            output_path: PathBuf::from(DEFAULT_OUTPUT),
            list_controls: false,
            black_ratio: false,
        }
    }
}

impl CaptureConfig {
    /// Load configuration from `FRAME_GRAB_*` environment variables with defaults.
    ///
    /// Missing or unparsable values fall back to the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            device_path: std::env::var_os("FRAME_GRAB_DEVICE")
                .map_or(defaults.device_path, PathBuf::from),
            width: env_u32("FRAME_GRAB_WIDTH", defaults.width),
            height: env_u32("FRAME_GRAB_HEIGHT", defaults.height),
            output_path: std::env::var_os("FRAME_GRAB_OUTPUT")
                .map_or(defaults.output_path, PathBuf::from),
            ..defaults
        }
    }

    /// The format submitted to the device during negotiation.
    #[must_use]
    pub const fn requested_format(&self) -> CaptureFormat {
        CaptureFormat::new(self.width, self.height, self.fourcc, self.field)
    }
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
