//! Mock device implementation for testing without hardware.
//!
//! Every call is recorded in a shared [`CallLog`] so tests can check the
//! protocol order after the session has consumed the device. Faults and
//! `EINTR` interruptions can be injected per operation.

use std::cell::RefCell;
use std::io;
use std::rc::Rc;
use std::time::Duration;

use crate::traits::{
    BufferInfo, CaptureFormat, ControlInfo, DeviceCapabilities, FieldOrder, FourCC,
    FrameMetadata, VideoDevice,
};

/// Device operation, used to target injected faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    QueryCapabilities,
    QueryControls,
    SetFormat,
    RequestBuffers,
    QueryBuffer,
    MapBuffer,
    QueueBuffer,
    StreamOn,
    DequeueBuffer,
    StreamOff,
    UnmapBuffer,
    Close,
}

/// A recorded device call with its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    QueryCapabilities,
    QueryControls,
    SetFormat(CaptureFormat),
    RequestBuffers(u32),
    QueryBuffer(u32),
    MapBuffer { length: u32, offset: u32 },
    QueueBuffer(u32),
    StreamOn,
    DequeueBuffer,
    StreamOff,
    UnmapBuffer { length: usize },
    Close,
}

impl Call {
    /// Operation this call belongs to.
    pub const fn op(&self) -> Op {
        match self {
            Self::QueryCapabilities => Op::QueryCapabilities,
            Self::QueryControls => Op::QueryControls,
            Self::SetFormat(_) => Op::SetFormat,
            Self::RequestBuffers(_) => Op::RequestBuffers,
            Self::QueryBuffer(_) => Op::QueryBuffer,
            Self::MapBuffer { .. } => Op::MapBuffer,
            Self::QueueBuffer(_) => Op::QueueBuffer,
            Self::StreamOn => Op::StreamOn,
            Self::DequeueBuffer => Op::DequeueBuffer,
            Self::StreamOff => Op::StreamOff,
            Self::UnmapBuffer { .. } => Op::UnmapBuffer,
            Self::Close => Op::Close,
        }
    }
}

/// Shared record of device calls.
#[derive(Debug, Clone, Default)]
pub struct CallLog(Rc<RefCell<Vec<Call>>>);

impl CallLog {
    fn push(&self, call: Call) {
        self.0.borrow_mut().push(call);
    }

    /// Snapshot of all calls so far.
    pub fn calls(&self) -> Vec<Call> {
        self.0.borrow().clone()
    }

    /// Operations in call order.
    pub fn ops(&self) -> Vec<Op> {
        self.0.borrow().iter().map(Call::op).collect()
    }

    /// Number of calls of `op`.
    pub fn count(&self, op: Op) -> usize {
        self.0.borrow().iter().filter(|call| call.op() == op).count()
    }
}

/// Test pattern types for mock frame generation.
#[derive(Debug, Clone, Copy)]
pub enum TestPattern {
    /// SMPTE color bars pattern.
    ColorBars,
    /// Horizontal gradient from dark to light.
    Gradient,
    /// Solid color with specified Y, U, V values.
    Solid(u8, u8, u8),
}

/// Mapped memory of the mock device.
#[derive(Debug)]
pub struct MockBuffer(Vec<u8>);

impl AsRef<[u8]> for MockBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Mock device for testing without hardware.
pub struct MockDevice {
    capabilities: DeviceCapabilities,
    controls: Vec<ControlInfo>,
    format: CaptureFormat,
    confirmed_format: Option<CaptureFormat>,
    granted_buffers: Option<u32>,
    buffer_length: Option<u32>,
    buffer_offset: u32,
    bytes_used: Option<u32>,
    pattern: TestPattern,
    frame_count: u32,
    failures: Vec<(Op, io::ErrorKind)>,
    interrupts: Vec<Op>,
    log: CallLog,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDevice {
    /// Create a new mock device with default settings.
    ///
    /// Accepts any format as requested, grants every buffer asked for and
    /// reports buffers at offset 4096 sized to the negotiated image.
    #[must_use]
    pub fn new() -> Self {
        Self {
            capabilities: DeviceCapabilities {
                driver: "mock".to_owned(),
                card: "Mock Camera".to_owned(),
                bus_info: "mock:0".to_owned(),
                version: (6, 1, 0),
                capabilities: 0x0400_0001,
                can_capture: true,
                can_stream: true,
            },
            controls: vec![ControlInfo {
                id: 0x0098_0900,
                name: "Brightness".to_owned(),
                kind: "Integer".to_owned(),
                minimum: 0,
                maximum: 255,
                step: 1,
                default: 128,
            }],
            format: CaptureFormat::new(640, 480, FourCC::YUYV, FieldOrder::Interlaced),
            confirmed_format: None,
            granted_buffers: None,
            buffer_length: None,
            buffer_offset: 4096,
            bytes_used: None,
            pattern: TestPattern::ColorBars,
            frame_count: 0,
            failures: Vec::new(),
            interrupts: Vec::new(),
            log: CallLog::default(),
        }
    }

    /// Answer every format request with `format` instead of echoing it.
    #[must_use]
    pub fn with_confirmed_format(mut self, format: CaptureFormat) -> Self {
        self.confirmed_format = Some(format);
        self
    }

    /// Report this length and offset from `query_buffer`.
    #[must_use]
    pub fn with_buffer_layout(mut self, length: u32, offset: u32) -> Self {
        self.buffer_length = Some(length);
        self.buffer_offset = offset;
        self
    }

    /// Report this `bytes_used` on dequeue instead of the full length.
    #[must_use]
    pub fn with_bytes_used(mut self, bytes_used: u32) -> Self {
        self.bytes_used = Some(bytes_used);
        self
    }

    /// Grant this many buffers regardless of the request.
    #[must_use]
    pub fn with_granted_buffers(mut self, count: u32) -> Self {
        self.granted_buffers = Some(count);
        self
    }

    /// Set the test pattern for frame generation.
    #[must_use]
    pub fn with_pattern(mut self, pattern: TestPattern) -> Self {
        self.pattern = pattern;
        self
    }

    /// Fail every call of `op` with `kind`.
    #[must_use]
    pub fn failing_on(mut self, op: Op, kind: io::ErrorKind) -> Self {
        self.failures.push((op, kind));
        self
    }

    /// Fail the next call of `op` with `EINTR`.
    #[must_use]
    pub fn interrupting(mut self, op: Op) -> Self {
        self.interrupts.push(op);
        self
    }

    /// Handle to the call log that stays valid after the device is moved.
    pub fn call_log(&self) -> CallLog {
        self.log.clone()
    }

    fn enter(&mut self, call: Call) -> io::Result<()> {
        let op = call.op();
        self.log.push(call);

        if let Some(pos) = self.interrupts.iter().position(|&o| o == op) {
            self.interrupts.remove(pos);
            return Err(io::Error::from_raw_os_error(libc::EINTR));
        }
        if let Some((_, kind)) = self.failures.iter().find(|(o, _)| *o == op) {
            return Err(io::Error::new(*kind, format!("injected {op:?} failure")));
        }
        Ok(())
    }

    fn buffer_length(&self) -> u32 {
        self.buffer_length.unwrap_or(self.format.size)
    }
}

impl VideoDevice for MockDevice {
    type Buffer = MockBuffer;

    fn query_capabilities(&mut self) -> io::Result<DeviceCapabilities> {
        self.enter(Call::QueryCapabilities)?;
        Ok(self.capabilities.clone())
    }

    fn query_controls(&mut self) -> io::Result<Vec<ControlInfo>> {
        self.enter(Call::QueryControls)?;
        Ok(self.controls.clone())
    }

    fn set_format(&mut self, requested: &CaptureFormat) -> io::Result<CaptureFormat> {
        self.enter(Call::SetFormat(requested.clone()))?;
        self.format = self
            .confirmed_format
            .clone()
            .unwrap_or_else(|| requested.clone());
        Ok(self.format.clone())
    }

    fn request_buffers(&mut self, count: u32) -> io::Result<u32> {
        self.enter(Call::RequestBuffers(count))?;
        Ok(self.granted_buffers.unwrap_or(count))
    }

    fn query_buffer(&mut self, index: u32) -> io::Result<BufferInfo> {
        self.enter(Call::QueryBuffer(index))?;
        Ok(BufferInfo {
            index,
            length: self.buffer_length(),
            offset: self.buffer_offset,
        })
    }

    fn map_buffer(&mut self, info: &BufferInfo) -> io::Result<MockBuffer> {
        self.enter(Call::MapBuffer {
            length: info.length,
            offset: info.offset,
        })?;
        let mut data = generate_test_frame(&self.format, self.pattern);
        data.resize(info.length as usize, 0);
        Ok(MockBuffer(data))
    }

    fn queue_buffer(&mut self, index: u32) -> io::Result<()> {
        self.enter(Call::QueueBuffer(index))
    }

    fn stream_on(&mut self) -> io::Result<()> {
        self.enter(Call::StreamOn)
    }

    fn dequeue_buffer(&mut self) -> io::Result<FrameMetadata> {
        self.enter(Call::DequeueBuffer)?;

        let seq = self.frame_count;
        self.frame_count += 1;

        Ok(FrameMetadata {
            index: 0,
            sequence: seq,
            timestamp: Duration::from_millis(u64::from(seq) * 33), // ~30fps
            bytes_used: self.bytes_used.unwrap_or_else(|| self.buffer_length()),
        })
    }

    fn stream_off(&mut self) -> io::Result<()> {
        self.enter(Call::StreamOff)
    }

    fn unmap_buffer(&mut self, buffer: MockBuffer) -> io::Result<()> {
        self.enter(Call::UnmapBuffer {
            length: buffer.0.len(),
        })
    }

    fn close(&mut self) -> io::Result<()> {
        self.enter(Call::Close)
    }
}

/// Generate test frame data based on pattern.
fn generate_test_frame(format: &CaptureFormat, pattern: TestPattern) -> Vec<u8> {
    let size = (format.width * format.height * 2) as usize; // YUYV = 2 bytes/pixel
    let mut data = vec![0u8; size];

    match pattern {
        TestPattern::ColorBars => {
            generate_color_bars(&mut data, format.width, format.height);
        }
        TestPattern::Gradient => {
            generate_gradient(&mut data, format.width, format.height);
        }
        TestPattern::Solid(y, u, v) => {
            generate_solid(&mut data, y, u, v);
        }
    }

    data
}

/// Generate YUYV color bars pattern.
fn generate_color_bars(data: &mut [u8], width: u32, height: u32) {
    // 8 color bars: White, Yellow, Cyan, Green, Magenta, Red, Blue, Black
    let bars: [(u8, u8, u8); 8] = [
        (235, 128, 128), // White
        (210, 16, 146),  // Yellow
        (170, 166, 16),  // Cyan
        (145, 54, 34),   // Green
        (106, 202, 222), // Magenta
        (81, 90, 240),   // Red
        (41, 240, 110),  // Blue
        (16, 128, 128),  // Black
    ];

    let bar_width = (width / 8).max(1);

    for y in 0..height {
        for x in (0..width).step_by(2) {
            let bar_idx = (x / bar_width).min(7) as usize;
            let (y_val, u_val, v_val) = bars[bar_idx];
            write_pair(data, ((y * width + x) * 2) as usize, y_val, u_val, v_val);
        }
    }
}

/// Generate YUYV horizontal gradient pattern.
fn generate_gradient(data: &mut [u8], width: u32, height: u32) {
    for y in 0..height {
        for x in (0..width).step_by(2) {
            #[allow(clippy::cast_possible_truncation)]
            let y_val = ((x * 255) / width) as u8;
            write_pair(data, ((y * width + x) * 2) as usize, y_val, 128, 128);
        }
    }
}

/// Generate solid color YUYV frame.
fn generate_solid(data: &mut [u8], y: u8, u: u8, v: u8) {
    for offset in (0..data.len()).step_by(4) {
        write_pair(data, offset, y, u, v);
    }
}

/// Write one `[Y0 U Y1 V]` macropixel if it fits.
fn write_pair(data: &mut [u8], offset: usize, y: u8, u: u8, v: u8) {
    if let Some(pair) = data.get_mut(offset..offset + 4) {
        pair.copy_from_slice(&[y, u, y, v]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_device_creation() {
        let mut device = MockDevice::new();
        let caps = device
            .query_capabilities()
            .expect("query_capabilities should succeed");
        assert_eq!(caps.driver, "mock");
        assert!(caps.can_capture);
        assert!(caps.can_stream);
    }

    #[test]
    fn test_mock_device_format() {
        let mut device = MockDevice::new();
        let requested = CaptureFormat::new(1280, 720, FourCC::YUYV, FieldOrder::Interlaced);
        let actual = device
            .set_format(&requested)
            .expect("set_format should succeed");
        assert_eq!(actual, requested);

        let confirmed = CaptureFormat::new(320, 240, FourCC::YUYV, FieldOrder::Progressive);
        let mut device = MockDevice::new().with_confirmed_format(confirmed.clone());
        let actual = device
            .set_format(&requested)
            .expect("set_format should succeed");
        assert_eq!(actual, confirmed);
    }

    #[test]
    fn test_mock_frame_sequence() {
        let mut device = MockDevice::new();
        let first = device.dequeue_buffer().expect("dequeue should succeed");
        let second = device.dequeue_buffer().expect("dequeue should succeed");
        assert_eq!(first.sequence, 0);
        assert_eq!(second.sequence, 1);
        assert_eq!(first.bytes_used, 614_400);
    }

    #[test]
    fn test_injected_interrupt_fires_once() {
        let mut device = MockDevice::new().interrupting(Op::StreamOn);
        let err = device.stream_on().expect_err("first call is interrupted");
        assert_eq!(err.kind(), io::ErrorKind::Interrupted);
        device.stream_on().expect("second call succeeds");
        assert_eq!(device.call_log().count(Op::StreamOn), 2);
    }

    #[test]
    fn test_injected_failure_is_sticky() {
        let mut device = MockDevice::new().failing_on(Op::QueueBuffer, io::ErrorKind::InvalidInput);
        assert!(device.queue_buffer(0).is_err());
        assert!(device.queue_buffer(0).is_err());
    }

    #[test]
    fn test_color_bars_pattern() {
        let format = CaptureFormat::new(640, 480, FourCC::YUYV, FieldOrder::Interlaced);
        let data = generate_test_frame(&format, TestPattern::ColorBars);

        assert_eq!(data.len(), (640 * 480 * 2) as usize);

        // First bar should be white (Y=235)
        assert_eq!(data[0], 235);
    }

    #[test]
    fn test_gradient_pattern() {
        let format = CaptureFormat::new(640, 480, FourCC::YUYV, FieldOrder::Interlaced);
        let data = generate_test_frame(&format, TestPattern::Gradient);

        // Left edge should be dark
        assert!(data[0] < 10);

        // Right edge should be bright (check last row, last pixel)
        let last_row_start = (479 * 640 * 2) as usize;
        let last_pixel_y = data[last_row_start + 638 * 2];
        assert!(last_pixel_y > 200);
    }

    #[test]
    fn test_solid_pattern() {
        let format = CaptureFormat::new(64, 64, FourCC::YUYV, FieldOrder::Interlaced);
        let data = generate_test_frame(&format, TestPattern::Solid(128, 64, 192));

        assert_eq!(data[0], 128);
        assert_eq!(data[2], 128);
        assert_eq!(data[1], 64);
        assert_eq!(data[3], 192);
    }

    #[test]
    fn test_mapped_buffer_matches_reported_length() {
        let mut device = MockDevice::new();
        let info = BufferInfo {
            index: 0,
            length: 1000,
            offset: 4096,
        };
        let buffer = device.map_buffer(&info).expect("map should succeed");
        assert_eq!(buffer.as_ref().len(), 1000);
    }
}
