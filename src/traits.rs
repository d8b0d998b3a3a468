//! Core traits and types for the single-frame V4L2 capture protocol.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Pixel format representation (e.g., YUYV, MJPG, GREY).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    /// Create a new `FourCC` from a 4-byte array.
    #[must_use]
    pub const fn new(code: &[u8; 4]) -> Self {
        Self(*code)
    }

    /// YUYV pixel format (4:2:2 packed).
    pub const YUYV: Self = Self::new(b"YUYV");
    /// MJPEG pixel format (Motion JPEG).
    pub const MJPG: Self = Self::new(b"MJPG");
    /// 8-bit greyscale.
    pub const GREY: Self = Self::new(b"GREY");

    /// Little-endian integer form used by `v4l2_pix_format.pixelformat`.
    #[must_use]
    pub const fn to_u32(self) -> u32 {
        u32::from_le_bytes(self.0)
    }

    /// Inverse of [`FourCC::to_u32`].
    #[must_use]
    pub const fn from_u32(code: u32) -> Self {
        Self(code.to_le_bytes())
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            let ch = if byte.is_ascii_graphic() || byte == b' ' {
                char::from(byte)
            } else {
                '.'
            };
            write!(f, "{ch}")?;
        }
        Ok(())
    }
}

/// Field order of the captured image (`enum v4l2_field`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOrder {
    /// Driver picks.
    Any,
    /// Progressive scan, no fields.
    Progressive,
    /// Top field only.
    Top,
    /// Bottom field only.
    Bottom,
    /// Both fields interleaved line by line.
    Interlaced,
    /// Any other value reported by the driver.
    Other(u32),
}

impl FieldOrder {
    /// Kernel ABI value.
    #[must_use]
    pub const fn as_raw(self) -> u32 {
        match self {
            Self::Any => 0,
            Self::Progressive => 1,
            Self::Top => 2,
            Self::Bottom => 3,
            Self::Interlaced => 4,
            Self::Other(raw) => raw,
        }
    }

    /// Decode a kernel ABI value.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        match raw {
            0 => Self::Any,
            1 => Self::Progressive,
            2 => Self::Top,
            3 => Self::Bottom,
            4 => Self::Interlaced,
            other => Self::Other(other),
        }
    }
}

/// Video format specification.
///
/// The value submitted for negotiation is a request; the value the device
/// returns is what the rest of the session must size against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureFormat {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel format.
    pub fourcc: FourCC,
    /// Field order.
    pub field: FieldOrder,
    /// Bytes per line (stride).
    pub stride: u32,
    /// Total frame size in bytes.
    pub size: u32,
}

impl CaptureFormat {
    /// Create a new format request.
    ///
    /// Stride and size are estimated for a 2 byte/pixel packed format; the
    /// driver overwrites both during negotiation.
    #[must_use]
    pub const fn new(width: u32, height: u32, fourcc: FourCC, field: FieldOrder) -> Self {
        let stride = width.saturating_mul(2);
        let size = stride.saturating_mul(height);
        Self {
            width,
            height,
            fourcc,
            field,
            stride,
            size,
        }
    }

    /// Whether `self` carries the same geometry and pixel format as `other`.
    #[must_use]
    pub fn same_geometry(&self, other: &Self) -> bool {
        self.width == other.width && self.height == other.height && self.fourcc == other.fourcc
    }
}

impl fmt::Display for CaptureFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{} {} ({:?}, stride {}, size {})",
            self.width, self.height, self.fourcc, self.field, self.stride, self.size
        )
    }
}

/// Result of a capability query.
#[derive(Debug, Clone, Default)]
pub struct DeviceCapabilities {
    /// Driver name.
    pub driver: String,
    /// Card/device name.
    pub card: String,
    /// Bus information.
    pub bus_info: String,
    /// Driver version as (major, minor, patch).
    pub version: (u8, u8, u8),
    /// Raw `V4L2_CAP_*` bitmask.
    pub capabilities: u32,
    /// Whether the device can capture video.
    pub can_capture: bool,
    /// Whether the device supports streaming.
    pub can_stream: bool,
}

/// One entry of the device's control list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlInfo {
    /// Control id (`V4L2_CID_*`).
    pub id: u32,
    /// Human-readable name reported by the driver.
    pub name: String,
    /// Control type, as reported by the driver.
    pub kind: String,
    /// Minimum value.
    pub minimum: i64,
    /// Maximum value.
    pub maximum: i64,
    /// Step between valid values.
    pub step: u64,
    /// Default value.
    pub default: i64,
}

/// Placement of a driver buffer, as reported by `VIDIOC_QUERYBUF`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferInfo {
    /// Buffer index.
    pub index: u32,
    /// Buffer length in bytes.
    pub length: u32,
    /// Offset to pass to `mmap`.
    pub offset: u32,
}

impl BufferInfo {
    /// A zero offset is legal but unusual enough to surface.
    #[must_use]
    pub const fn has_zero_offset(&self) -> bool {
        self.offset == 0
    }
}

/// Metadata for a dequeued frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameMetadata {
    /// Index of the buffer that was filled.
    pub index: u32,
    /// Frame sequence number.
    pub sequence: u32,
    /// Capture timestamp.
    pub timestamp: Duration,
    /// Bytes written by the driver, as reported.
    pub bytes_used: u32,
}

/// A captured frame, borrowed from the mapped buffer.
#[derive(Debug, Clone, Copy)]
pub struct CapturedFrame<'a> {
    /// Valid frame bytes.
    pub data: &'a [u8],
    /// Frame metadata.
    pub metadata: FrameMetadata,
}

/// Progress of a capture session through the streaming I/O protocol.
///
/// Each stage can only be entered from the one before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    /// Device open, nothing negotiated.
    Opened,
    /// Pixel format confirmed by the device.
    FormatSet,
    /// Driver buffers allocated.
    BuffersRequested,
    /// Buffer length and offset known.
    BufferQueried,
    /// Buffer mapped into the process.
    Mapped,
    /// Buffer handed to the driver.
    Queued,
    /// Stream running.
    Streaming,
    /// Frame retrieved.
    Dequeued,
}

impl Stage {
    /// Stage the session must be in before entering this one.
    pub const fn predecessor(self) -> Option<Self> {
        match self {
            Self::Opened => None,
            Self::FormatSet => Some(Self::Opened),
            Self::BuffersRequested => Some(Self::FormatSet),
            Self::BufferQueried => Some(Self::BuffersRequested),
            Self::Mapped => Some(Self::BufferQueried),
            Self::Queued => Some(Self::Mapped),
            Self::Streaming => Some(Self::Queued),
            Self::Dequeued => Some(Self::Streaming),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Opened => "opened",
            Self::FormatSet => "format set",
            Self::BuffersRequested => "buffers requested",
            Self::BufferQueried => "buffer queried",
            Self::Mapped => "mapped",
            Self::Queued => "queued",
            Self::Streaming => "streaming",
            Self::Dequeued => "dequeued",
        };
        f.write_str(name)
    }
}

/// Error type for capture operations. One variant per protocol stage.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The device node could not be opened for read/write.
    #[error("failed to open video device {}", .path.display())]
    OpenFailed {
        /// Device path.
        path: PathBuf,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// `VIDIOC_QUERYCAP` failed.
    #[error("failed to query device capabilities")]
    QueryCapsFailed(#[source] io::Error),
    /// Control enumeration failed.
    #[error("failed to query device controls")]
    QueryControlsFailed(#[source] io::Error),
    /// `VIDIOC_S_FMT` failed.
    #[error("failed to set pixel format")]
    FormatNegotiationFailed(#[source] io::Error),
    /// `VIDIOC_REQBUFS` failed.
    #[error("failed to request buffers")]
    BufferRequestFailed(#[source] io::Error),
    /// `VIDIOC_REQBUFS` succeeded but granted nothing.
    #[error("device granted no buffers (requested {requested})")]
    NoBuffersGranted {
        /// Number of buffers asked for.
        requested: u32,
    },
    /// `VIDIOC_QUERYBUF` failed.
    #[error("failed to query buffer")]
    BufferQueryFailed(#[source] io::Error),
    /// The device reported a buffer that cannot be mapped.
    #[error("buffer {index} has length 0")]
    ZeroLengthBuffer {
        /// Buffer index.
        index: u32,
    },
    /// `mmap` failed.
    #[error("failed to memory map buffer")]
    MemoryMapFailed(#[source] io::Error),
    /// A buffer is already mapped for this session.
    #[error("a buffer is already mapped")]
    AlreadyMapped,
    /// `VIDIOC_QBUF` failed.
    #[error("failed to queue buffer")]
    EnqueueFailed(#[source] io::Error),
    /// `VIDIOC_STREAMON` failed.
    #[error("failed to start capture")]
    StreamOnFailed(#[source] io::Error),
    /// `VIDIOC_DQBUF` failed.
    #[error("failed to retrieve frame")]
    DequeueFailed(#[source] io::Error),
    /// A frame was requested before any buffer was mapped.
    #[error("no buffer is mapped")]
    NotMapped,
    /// The session has already released its device.
    #[error("capture session already released")]
    Released,
    /// A stage was attempted before the one it depends on.
    #[error("cannot enter '{attempted}' stage: session is at '{current}', expected '{expected}'")]
    OutOfOrder {
        /// Stage the session had to be in.
        expected: Stage,
        /// Stage the session is in.
        current: Stage,
        /// Stage that was attempted.
        attempted: Stage,
    },
    /// Writing the raw frame failed.
    #[error("failed to write frame to {}", .path.display())]
    OutputWriteFailed {
        /// Output path.
        path: PathBuf,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
}

/// Result type for capture operations.
pub type Result<T> = std::result::Result<T, CaptureError>;

/// Stage-level operations of a V4L2 capture device.
///
/// Each method is a single device call. Retrying, ordering and release are
/// the session's job, so implementations must not retry on their own.
pub trait VideoDevice {
    /// Memory shared with the driver for one buffer.
    type Buffer: AsRef<[u8]>;

    /// `VIDIOC_QUERYCAP`.
    fn query_capabilities(&mut self) -> io::Result<DeviceCapabilities>;

    /// Enumerate the device's controls.
    ///
    /// May open a separate short-lived handle to the same node, so the
    /// device is not exclusively held while controls are listed.
    fn query_controls(&mut self) -> io::Result<Vec<ControlInfo>>;

    /// `VIDIOC_S_FMT`. Returns the format the driver actually applied.
    fn set_format(&mut self, requested: &CaptureFormat) -> io::Result<CaptureFormat>;

    /// `VIDIOC_REQBUFS` for mmap buffers. Returns the granted count.
    fn request_buffers(&mut self, count: u32) -> io::Result<u32>;

    /// `VIDIOC_QUERYBUF`.
    fn query_buffer(&mut self, index: u32) -> io::Result<BufferInfo>;

    /// Map the buffer described by `info` into the process.
    fn map_buffer(&mut self, info: &BufferInfo) -> io::Result<Self::Buffer>;

    /// `VIDIOC_QBUF` with a freshly zeroed descriptor.
    fn queue_buffer(&mut self, index: u32) -> io::Result<()>;

    /// `VIDIOC_STREAMON`.
    fn stream_on(&mut self) -> io::Result<()>;

    /// `VIDIOC_DQBUF`. Blocks until a frame is ready.
    fn dequeue_buffer(&mut self) -> io::Result<FrameMetadata>;

    /// `VIDIOC_STREAMOFF`.
    fn stream_off(&mut self) -> io::Result<()>;

    /// Release a mapping obtained from [`VideoDevice::map_buffer`].
    fn unmap_buffer(&mut self, buffer: Self::Buffer) -> io::Result<()>;

    /// Close the device handle. Calling it on a closed device is a no-op.
    fn close(&mut self) -> io::Result<()>;
}
