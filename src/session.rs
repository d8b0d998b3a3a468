//! Single-frame capture session.
//!
//! [`FrameCapture`] drives one capture transaction in a fixed order:
//! negotiate format, request a buffer, query it, map it, queue it, start
//! streaming, dequeue one frame. A stage is only entered once the one before
//! it succeeded. Every device call goes through [`retry_interrupted`].
//! Whatever was acquired is released exactly once, on success, on failure,
//! or on drop.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::analysis;
use crate::config::CaptureConfig;
use crate::device::V4L2Device;
use crate::retry::retry_interrupted;
use crate::sink;
use crate::traits::{
    BufferInfo, CaptureError, CaptureFormat, CapturedFrame, ControlInfo, DeviceCapabilities,
    FrameMetadata, Result, Stage, VideoDevice,
};

/// Number of driver buffers requested. A single buffer, no ring.
pub const BUFFER_COUNT: u32 = 1;

/// Index of the one buffer the session maps.
pub const BUFFER_INDEX: u32 = 0;

/// Outcome of a completed capture.
#[derive(Debug, Clone)]
pub struct CaptureReport {
    /// Format confirmed by the device.
    pub format: CaptureFormat,
    /// Buffer placement reported by the device.
    pub buffer: BufferInfo,
    /// Metadata of the dequeued frame.
    pub metadata: FrameMetadata,
    /// Bytes written to the output.
    pub bytes_written: usize,
    /// Output path.
    pub output_path: PathBuf,
    /// Black pixel ratio, if requested in the config.
    pub black_pixel_ratio: Option<f64>,
}

/// One capture transaction against one device.
pub struct FrameCapture<D: VideoDevice> {
    config: CaptureConfig,
    device: Option<D>,
    buffer: Option<D::Buffer>,
    stage: Stage,
}

impl FrameCapture<V4L2Device> {
    /// Open `config.device_path` and start a session on it.
    pub fn open(config: CaptureConfig) -> Result<Self> {
        let path = config.device_path.clone();
        info!(device = %path.display(), "opening video device");

        let device = V4L2Device::open(&path)
            .map_err(|source| CaptureError::OpenFailed { path, source })?;

        info!("video device opened");
        Ok(Self::with_device(device, config))
    }
}

impl<D: VideoDevice> FrameCapture<D> {
    /// Start a session on an already open device.
    pub fn with_device(device: D, config: CaptureConfig) -> Self {
        Self {
            config,
            device: Some(device),
            buffer: None,
            stage: Stage::Opened,
        }
    }

    /// Session configuration.
    pub const fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Protocol stage reached so far.
    pub const fn stage(&self) -> Stage {
        self.stage
    }

    fn device(&mut self) -> Result<&mut D> {
        self.device.as_mut().ok_or(CaptureError::Released)
    }

    /// Check that `attempted` may be entered from the current stage.
    fn enter(&self, attempted: Stage) -> Result<()> {
        if self.device.is_none() {
            return Err(CaptureError::Released);
        }
        match attempted.predecessor() {
            Some(expected) if expected == self.stage => {
                debug!(stage = %attempted, "entering stage");
                Ok(())
            }
            Some(expected) => Err(CaptureError::OutOfOrder {
                expected,
                current: self.stage,
                attempted,
            }),
            None => Err(CaptureError::OutOfOrder {
                expected: self.stage,
                current: self.stage,
                attempted,
            }),
        }
    }

    /// Query driver, card, bus and capability flags.
    pub fn query_capabilities(&mut self) -> Result<DeviceCapabilities> {
        let device = self.device()?;
        debug!("querying capabilities");
        let caps = retry_interrupted(|| device.query_capabilities())
            .map_err(CaptureError::QueryCapsFailed)?;

        info!(
            driver = %caps.driver,
            card = %caps.card,
            bus = %caps.bus_info,
            capture = caps.can_capture,
            streaming = caps.can_stream,
            "queried capabilities"
        );
        Ok(caps)
    }

    /// List the device's controls.
    pub fn query_controls(&mut self) -> Result<Vec<ControlInfo>> {
        let device = self.device()?;
        debug!("querying controls");
        let controls = retry_interrupted(|| device.query_controls())
            .map_err(CaptureError::QueryControlsFailed)?;

        info!(count = controls.len(), "queried controls");
        Ok(controls)
    }

    /// Submit the configured format and return what the device confirmed.
    ///
    /// The confirmed format may differ from the request; callers must size
    /// everything after this point from the returned value.
    pub fn negotiate_format(&mut self) -> Result<CaptureFormat> {
        self.enter(Stage::FormatSet)?;
        let requested = self.config.requested_format();
        let device = self.device()?;
        let confirmed = retry_interrupted(|| device.set_format(&requested))
            .map_err(CaptureError::FormatNegotiationFailed)?;

        if !confirmed.same_geometry(&requested) {
            warn!(
                requested = %requested,
                confirmed = %confirmed,
                "device adjusted the requested format"
            );
        }
        info!(format = %confirmed, "pixel format set");
        self.stage = Stage::FormatSet;
        Ok(confirmed)
    }

    /// Ask for `count` mmap buffers. Any non-zero grant is accepted.
    pub fn request_buffers(&mut self, count: u32) -> Result<u32> {
        self.enter(Stage::BuffersRequested)?;
        let device = self.device()?;
        let granted = retry_interrupted(|| device.request_buffers(count))
            .map_err(CaptureError::BufferRequestFailed)?;

        if granted == 0 {
            return Err(CaptureError::NoBuffersGranted { requested: count });
        }
        info!(requested = count, granted, "buffers requested");
        self.stage = Stage::BuffersRequested;
        Ok(granted)
    }

    /// Look up length and offset of buffer `index`.
    pub fn query_buffer(&mut self, index: u32) -> Result<BufferInfo> {
        self.enter(Stage::BufferQueried)?;
        let device = self.device()?;
        let info = retry_interrupted(|| device.query_buffer(index))
            .map_err(CaptureError::BufferQueryFailed)?;

        info!(index, length = info.length, offset = info.offset, "buffer queried");
        if info.length == 0 {
            return Err(CaptureError::ZeroLengthBuffer { index });
        }
        if info.has_zero_offset() {
            warn!(index, length = info.length, "buffer offset is 0, mapping anyway");
        }
        self.stage = Stage::BufferQueried;
        Ok(info)
    }

    /// Map the buffer described by `info` into the process.
    pub fn map_buffer(&mut self, info: &BufferInfo) -> Result<()> {
        if self.buffer.is_some() {
            return Err(CaptureError::AlreadyMapped);
        }
        self.enter(Stage::Mapped)?;
        if info.length == 0 {
            return Err(CaptureError::ZeroLengthBuffer { index: info.index });
        }

        let device = self.device()?;
        let buffer = retry_interrupted(|| device.map_buffer(info))
            .map_err(CaptureError::MemoryMapFailed)?;

        let mapped = buffer.as_ref();
        info!(start = ?mapped.as_ptr(), length = mapped.len(), "buffer mapped");
        self.buffer = Some(buffer);
        self.stage = Stage::Mapped;
        Ok(())
    }

    /// Hand buffer `index` to the driver for filling.
    pub fn enqueue_buffer(&mut self, index: u32) -> Result<()> {
        self.enter(Stage::Queued)?;
        let device = self.device()?;
        retry_interrupted(|| device.queue_buffer(index)).map_err(CaptureError::EnqueueFailed)?;

        info!(index, "buffer queued");
        self.stage = Stage::Queued;
        Ok(())
    }

    /// Turn the capture stream on.
    pub fn start_streaming(&mut self) -> Result<()> {
        self.enter(Stage::Streaming)?;
        let device = self.device()?;
        retry_interrupted(|| device.stream_on()).map_err(CaptureError::StreamOnFailed)?;

        self.stage = Stage::Streaming;
        info!("stream started");
        Ok(())
    }

    /// Block until the driver has filled the queued buffer.
    ///
    /// The frame spans the driver-reported `bytes_used`, or the whole buffer
    /// when the driver reports 0. It never exceeds the mapping.
    pub fn dequeue_buffer(&mut self) -> Result<CapturedFrame<'_>> {
        if self.buffer.is_none() {
            return Err(CaptureError::NotMapped);
        }
        self.enter(Stage::Dequeued)?;
        let device = self.device.as_mut().ok_or(CaptureError::Released)?;
        let metadata =
            retry_interrupted(|| device.dequeue_buffer()).map_err(CaptureError::DequeueFailed)?;
        self.stage = Stage::Dequeued;

        let mapped: &[u8] = self
            .buffer
            .as_ref()
            .ok_or(CaptureError::NotMapped)?
            .as_ref();
        let len = frame_len(metadata.bytes_used, mapped.len());
        let data = mapped.get(..len).unwrap_or(mapped);

        info!(
            sequence = metadata.sequence,
            bytes_used = metadata.bytes_used,
            frame_bytes = data.len(),
            "frame dequeued"
        );
        Ok(CapturedFrame { data, metadata })
    }

    /// Stream off, unmap and close, skipping whatever was never acquired.
    ///
    /// Safe to call any number of times. Failures are logged, not returned,
    /// so they never mask the error that triggered the release.
    pub fn release(&mut self) {
        let Some(mut device) = self.device.take() else {
            return;
        };

        if self.stage >= Stage::Streaming {
            match retry_interrupted(|| device.stream_off()) {
                Ok(()) => debug!("stream stopped"),
                Err(err) => warn!(error = %err, "failed to stop stream"),
            }
        }
        if let Some(buffer) = self.buffer.take() {
            match device.unmap_buffer(buffer) {
                Ok(()) => debug!("buffer unmapped"),
                Err(err) => warn!(error = %err, "failed to unmap buffer"),
            }
        }
        match device.close() {
            Ok(()) => debug!("device closed"),
            Err(err) => warn!(error = %err, "failed to close device"),
        }
    }

    /// Capture one frame to the configured output path, then release.
    pub fn run(&mut self) -> Result<CaptureReport> {
        let output = self.config.output_path.clone();
        self.capture_to(&output)
    }

    /// Capture one frame to `output`, then release.
    pub fn capture_to(&mut self, output: &Path) -> Result<CaptureReport> {
        let result = self.capture_once(output);
        self.release();
        result
    }

    fn capture_once(&mut self, output: &Path) -> Result<CaptureReport> {
        let format = self.negotiate_format()?;
        self.request_buffers(BUFFER_COUNT)?;
        let buffer = self.query_buffer(BUFFER_INDEX)?;
        self.map_buffer(&buffer)?;
        self.enqueue_buffer(BUFFER_INDEX)?;
        self.start_streaming()?;

        let want_black_ratio = self.config.black_ratio;
        let frame = self.dequeue_buffer()?;

        sink::write_raw_frame(output, frame.data).map_err(|source| {
            CaptureError::OutputWriteFailed {
                path: output.to_path_buf(),
                source,
            }
        })?;
        info!(path = %output.display(), bytes = frame.data.len(), "frame saved");

        let black_pixel_ratio = if want_black_ratio {
            analysis::black_pixel_ratio(frame.data)
        } else {
            None
        };

        Ok(CaptureReport {
            format,
            buffer,
            metadata: frame.metadata,
            bytes_written: frame.data.len(),
            output_path: output.to_path_buf(),
            black_pixel_ratio,
        })
    }
}

impl<D: VideoDevice> Drop for FrameCapture<D> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Number of valid frame bytes in a mapping of `mapped` bytes.
fn frame_len(bytes_used: u32, mapped: usize) -> usize {
    let reported = bytes_used as usize;
    if reported == 0 {
        warn!(mapped, "driver reported bytesused=0, using full buffer length");
        mapped
    } else if reported > mapped {
        warn!(reported, mapped, "driver reported more bytes than mapped, truncating");
        mapped
    } else {
        reported
    }
}
