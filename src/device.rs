//! V4L2 device implementation over raw ioctls and `mmap`.
//!
//! Uses the `v4l` crate's `v4l2` layer and its kernel struct bindings
//! directly, so every protocol stage stays a separate call the session can
//! wrap, retry and log.

#![allow(unsafe_code)]

use std::ffi::c_void;
use std::fs::{File, OpenOptions};
use std::io;
use std::mem;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::ptr::{self, NonNull};
use std::time::Duration;

use v4l::buffer::Type as BufType;
use v4l::capability::Flags;
use v4l::memory::Memory;
use v4l::v4l2;
use v4l::v4l2::vidioc;
use v4l::v4l_sys::{v4l2_buffer, v4l2_capability, v4l2_format, v4l2_requestbuffers};

use crate::traits::{
    BufferInfo, CaptureFormat, ControlInfo, DeviceCapabilities, FieldOrder, FourCC,
    FrameMetadata, VideoDevice,
};

/// `V4L2_CAP_DEVICE_CAPS`: `device_caps` is filled in.
const CAP_DEVICE_CAPS: u32 = 0x8000_0000;

/// V4L2 capture device opened for blocking read/write.
pub struct V4L2Device {
    path: PathBuf,
    file: Option<File>,
}

impl V4L2Device {
    /// Open a device node (e.g., `/dev/video0`) for read/write.
    ///
    /// The handle is blocking, so `VIDIOC_DQBUF` waits for a frame instead
    /// of returning `EAGAIN`.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Some(file),
        })
    }

    /// Device node this handle was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn fd(&self) -> io::Result<RawFd> {
        self.file
            .as_ref()
            .map(AsRawFd::as_raw_fd)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "device is closed"))
    }

    fn ioctl<T>(&self, request: vidioc::_IOC_TYPE, arg: &mut T) -> io::Result<()> {
        let fd = self.fd()?;
        // SAFETY:
        // - fd is valid for as long as `self.file` is `Some`
        // - `arg` is the kernel struct `request` expects and outlives the call
        unsafe { v4l2::ioctl(fd, request, (arg as *mut T).cast::<c_void>()) }
    }

    /// A zeroed mmap capture descriptor carrying only type, memory and index.
    fn buffer_descriptor(index: u32) -> v4l2_buffer {
        // SAFETY: v4l2_buffer is plain old data; all-zero is a valid value.
        let mut buf: v4l2_buffer = unsafe { mem::zeroed() };
        buf.type_ = BufType::VideoCapture as u32;
        buf.memory = Memory::Mmap as u32;
        buf.index = index;
        buf
    }
}

impl VideoDevice for V4L2Device {
    type Buffer = MappedBuffer;

    fn query_capabilities(&mut self) -> io::Result<DeviceCapabilities> {
        // SAFETY: v4l2_capability is plain old data; all-zero is a valid value.
        let mut raw: v4l2_capability = unsafe { mem::zeroed() };
        self.ioctl(vidioc::VIDIOC_QUERYCAP, &mut raw)?;

        let bits = if raw.capabilities & CAP_DEVICE_CAPS == 0 {
            raw.capabilities
        } else {
            raw.device_caps
        };
        let flags = Flags::from_bits_truncate(bits);

        #[allow(clippy::cast_possible_truncation)]
        let version = (
            (raw.version >> 16) as u8,
            (raw.version >> 8) as u8,
            raw.version as u8,
        );

        Ok(DeviceCapabilities {
            driver: c_string(&raw.driver),
            card: c_string(&raw.card),
            bus_info: c_string(&raw.bus_info),
            version,
            capabilities: bits,
            can_capture: flags.contains(Flags::VIDEO_CAPTURE),
            can_stream: flags.contains(Flags::STREAMING),
        })
    }

    fn query_controls(&mut self) -> io::Result<Vec<ControlInfo>> {
        // Control enumeration is diagnostic only, so it uses the v4l crate's
        // walker on a second, short-lived handle.
        let device = v4l::Device::with_path(&self.path)?;
        let controls = device
            .query_controls()?
            .into_iter()
            .map(|desc| ControlInfo {
                id: desc.id,
                name: desc.name,
                kind: format!("{:?}", desc.typ),
                minimum: i64::from(desc.minimum),
                maximum: i64::from(desc.maximum),
                step: u64::from(desc.step),
                default: i64::from(desc.default),
            })
            .collect();
        Ok(controls)
    }

    fn set_format(&mut self, requested: &CaptureFormat) -> io::Result<CaptureFormat> {
        // SAFETY: v4l2_format is plain old data; all-zero is a valid value.
        let mut raw: v4l2_format = unsafe { mem::zeroed() };
        raw.type_ = BufType::VideoCapture as u32;
        // SAFETY: `pix` is the active union member for single-planar capture.
        unsafe {
            raw.fmt.pix.width = requested.width;
            raw.fmt.pix.height = requested.height;
            raw.fmt.pix.pixelformat = requested.fourcc.to_u32();
            raw.fmt.pix.field = requested.field.as_raw();
        }

        self.ioctl(vidioc::VIDIOC_S_FMT, &mut raw)?;

        // SAFETY: the driver filled in `pix` for the capture buffer type.
        let pix = unsafe { raw.fmt.pix };
        Ok(CaptureFormat {
            width: pix.width,
            height: pix.height,
            fourcc: FourCC::from_u32(pix.pixelformat),
            field: FieldOrder::from_raw(pix.field),
            stride: pix.bytesperline,
            size: pix.sizeimage,
        })
    }

    fn request_buffers(&mut self, count: u32) -> io::Result<u32> {
        // SAFETY: v4l2_requestbuffers is plain old data; all-zero is a valid value.
        let mut req: v4l2_requestbuffers = unsafe { mem::zeroed() };
        req.count = count;
        req.type_ = BufType::VideoCapture as u32;
        req.memory = Memory::Mmap as u32;

        self.ioctl(vidioc::VIDIOC_REQBUFS, &mut req)?;
        Ok(req.count)
    }

    fn query_buffer(&mut self, index: u32) -> io::Result<BufferInfo> {
        let mut buf = Self::buffer_descriptor(index);
        self.ioctl(vidioc::VIDIOC_QUERYBUF, &mut buf)?;

        // SAFETY: for V4L2_MEMORY_MMAP buffers the driver sets `m.offset`.
        let offset = unsafe { buf.m.offset };
        Ok(BufferInfo {
            index: buf.index,
            length: buf.length,
            offset,
        })
    }

    fn map_buffer(&mut self, info: &BufferInfo) -> io::Result<MappedBuffer> {
        let fd = self.fd()?;
        let len = info.length as usize;

        // SAFETY:
        // - fd refers to the open device
        // - length and offset come straight from VIDIOC_QUERYBUF
        #[allow(clippy::cast_possible_wrap)]
        let addr = unsafe {
            v4l2::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                info.offset as libc::off_t,
            )?
        };

        let base = NonNull::new(addr.cast::<u8>())
            .ok_or_else(|| io::Error::other("mmap returned null"))?;
        Ok(MappedBuffer { base, len })
    }

    fn queue_buffer(&mut self, index: u32) -> io::Result<()> {
        let mut buf = Self::buffer_descriptor(index);
        self.ioctl(vidioc::VIDIOC_QBUF, &mut buf)
    }

    fn stream_on(&mut self) -> io::Result<()> {
        let mut typ = BufType::VideoCapture as u32;
        self.ioctl(vidioc::VIDIOC_STREAMON, &mut typ)
    }

    fn dequeue_buffer(&mut self) -> io::Result<FrameMetadata> {
        let mut buf = Self::buffer_descriptor(0);
        self.ioctl(vidioc::VIDIOC_DQBUF, &mut buf)?;

        let secs = u64::try_from(buf.timestamp.tv_sec).unwrap_or(0);
        let nanos = u32::try_from(buf.timestamp.tv_usec)
            .unwrap_or(0)
            .saturating_mul(1000);

        Ok(FrameMetadata {
            index: buf.index,
            sequence: buf.sequence,
            timestamp: Duration::new(secs, nanos),
            bytes_used: buf.bytesused,
        })
    }

    fn stream_off(&mut self) -> io::Result<()> {
        let mut typ = BufType::VideoCapture as u32;
        self.ioctl(vidioc::VIDIOC_STREAMOFF, &mut typ)
    }

    fn unmap_buffer(&mut self, buffer: MappedBuffer) -> io::Result<()> {
        // SAFETY: `buffer` came from `map_buffer` and is consumed here, so
        // no slice into it can outlive the unmap.
        unsafe { v4l2::munmap(buffer.base.as_ptr().cast::<c_void>(), buffer.len) }
    }

    fn close(&mut self) -> io::Result<()> {
        // Dropping the file closes the descriptor.
        drop(self.file.take());
        Ok(())
    }
}

/// A driver buffer mapped shared read/write into the process.
///
/// Release it with [`VideoDevice::unmap_buffer`]; dropping it without doing
/// so leaves the mapping in place until the process exits.
#[derive(Debug)]
pub struct MappedBuffer {
    base: NonNull<u8>,
    len: usize,
}

impl MappedBuffer {
    /// Start of the mapping.
    pub const fn as_ptr(&self) -> *const u8 {
        self.base.as_ptr()
    }

    /// Mapping length in bytes.
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether the mapping is empty.
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl AsRef<[u8]> for MappedBuffer {
    fn as_ref(&self) -> &[u8] {
        // SAFETY: `base..base + len` is a live mapping owned by `self`.
        unsafe { std::slice::from_raw_parts(self.base.as_ptr(), self.len) }
    }
}

/// Decode a NUL-padded fixed-size kernel string.
fn c_string(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(raw.get(..end).unwrap_or(raw)).into_owned()
}
