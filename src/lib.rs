//! Frame-grab: single-shot V4L2 frame capture
//!
//! This library walks a V4L2 capture device through one complete capture
//! transaction and hands back the raw frame. The protocol runs behind the
//! [`VideoDevice`] trait, so the session logic is exercised against a mock
//! device in tests and against real hardware in production.

pub mod analysis;
pub mod config;
pub mod device;
pub mod retry;
pub mod session;
pub mod sink;
pub mod traits;

#[cfg(test)]
pub mod mock;

pub use config::CaptureConfig;
pub use device::{MappedBuffer, V4L2Device};
pub use session::{CaptureReport, FrameCapture};
pub use traits::{
    BufferInfo, CaptureError, CaptureFormat, CapturedFrame, ControlInfo, DeviceCapabilities,
    FieldOrder, FourCC, FrameMetadata, Stage, VideoDevice,
};
