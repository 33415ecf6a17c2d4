//! V4L2 device implementation using the v4l crate.
//!
//! Format negotiation goes through `v4l::video::Capture`. Enumeration and
//! buffer management talk to the driver directly: every request is retried on
//! EINTR, the kernel's size and interval types are kept, and the engine gets
//! the granted buffer count and a non-blocking dequeue.
#![allow(unsafe_code)]

use std::fs;
use std::io;
use std::os::raw::{c_int, c_void};
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use std::ptr::{self, NonNull};
use std::time::Duration;
use std::{mem, slice};

use log::{debug, trace, warn};
use v4l::buffer::Type;
use v4l::capability::Flags;
use v4l::frameinterval::FrameIntervalEnum;
use v4l::framesize::FrameSizeEnum;
use v4l::memory::Memory;
use v4l::v4l2::vidioc;
use v4l::v4l_sys::{
    v4l2_buffer, v4l2_fmtdesc, v4l2_frmivalenum, v4l2_frmivaltypes_V4L2_FRMIVAL_TYPE_CONTINUOUS,
    v4l2_frmsizeenum, v4l2_frmsizetypes_V4L2_FRMSIZE_TYPE_CONTINUOUS, v4l2_requestbuffers,
};
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::Device;

use crate::traits::{
    CaptureError, DequeuedBuffer, DeviceCapabilities, DeviceControl, Format, FormatDescription,
    FourCC, Fraction, FrameInterval, FrameSize, MappedSlot, Result, SizeRange,
};

/// V4L2 capture device opened in non-blocking mode.
pub struct V4L2Device {
    path: PathBuf,
    device: Device,
    fd: c_int,
}

impl V4L2Device {
    /// Open the device node at `path` (e.g. `/dev/video0`).
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let open_failed = |source| CaptureError::DeviceOpenFailed {
            path: path.to_path_buf(),
            source,
        };

        let metadata = fs::metadata(path).map_err(open_failed)?;
        if !metadata.file_type().is_char_device() {
            return Err(CaptureError::NotCharDevice(path.to_path_buf()));
        }

        let device = Device::with_path(path).map_err(open_failed)?;
        let fd = device.handle().fd();
        set_nonblocking(fd).map_err(open_failed)?;
        debug!("{}: opened as fd {fd}", path.display());

        Ok(Self {
            path: path.to_path_buf(),
            device,
            fd,
        })
    }

    /// Device node path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn buffer(index: u32) -> v4l2_buffer {
        // SAFETY: v4l2_buffer is plain old data; all-zero is a valid value.
        let mut buffer: v4l2_buffer = unsafe { mem::zeroed() };
        buffer.type_ = Type::VideoCapture as u32;
        buffer.memory = Memory::Mmap as u32;
        buffer.index = index;
        buffer
    }

    fn stream_ioctl(&self, request: vidioc::_IOC_TYPE, name: &'static str) -> Result<()> {
        let mut kind = Type::VideoCapture as u32;
        xioctl(self.fd, request, &mut kind).map_err(|err| CaptureError::ioctl(name, err))?;
        debug!("{}: {name}", self.path.display());
        Ok(())
    }
}

impl DeviceControl for V4L2Device {
    type Slot = MmapSlot;

    fn capabilities(&self) -> Result<DeviceCapabilities> {
        let caps = retry(|| self.device.query_caps())
            .map_err(|err| CaptureError::ioctl("VIDIOC_QUERYCAP", err))?;

        Ok(DeviceCapabilities {
            driver: caps.driver,
            card: caps.card,
            bus_info: caps.bus,
            can_capture: caps.capabilities.contains(Flags::VIDEO_CAPTURE),
            can_stream: caps.capabilities.contains(Flags::STREAMING),
        })
    }

    fn enum_formats(&self) -> Result<Vec<FormatDescription>> {
        // SAFETY: v4l2_fmtdesc is plain old data; all-zero is a valid value.
        let mut query: v4l2_fmtdesc = unsafe { mem::zeroed() };
        query.type_ = Type::VideoCapture as u32;

        walk(|index| {
            query.index = index;
            xioctl(self.fd, vidioc::VIDIOC_ENUM_FMT, &mut query)?;
            Ok(Some(format_description_from(&query)))
        })
        .map_err(|err| CaptureError::ioctl("VIDIOC_ENUM_FMT", err))
    }

    fn enum_frame_sizes(&self, fourcc: FourCC) -> Result<Vec<FrameSize>> {
        // SAFETY: v4l2_frmsizeenum is plain old data; all-zero is a valid value.
        let mut query: v4l2_frmsizeenum = unsafe { mem::zeroed() };
        query.pixel_format = fourcc.code();

        walk(|index| {
            query.index = index;
            xioctl(self.fd, vidioc::VIDIOC_ENUM_FRAMESIZES, &mut query)?;
            Ok(v4l::framesize::FrameSize::try_from(query)
                .ok()
                .map(frame_size_from))
        })
        .map_err(|err| CaptureError::ioctl("VIDIOC_ENUM_FRAMESIZES", err))
    }

    fn enum_frame_intervals(&self, fourcc: FourCC, width: u32, height: u32) -> Result<Vec<FrameInterval>> {
        // SAFETY: v4l2_frmivalenum is plain old data; all-zero is a valid value.
        let mut query: v4l2_frmivalenum = unsafe { mem::zeroed() };
        query.pixel_format = fourcc.code();
        query.width = width;
        query.height = height;

        walk(|index| {
            query.index = index;
            xioctl(self.fd, vidioc::VIDIOC_ENUM_FRAMEINTERVALS, &mut query)?;
            Ok(v4l::frameinterval::FrameInterval::try_from(query)
                .ok()
                .map(frame_interval_from))
        })
        .map_err(|err| CaptureError::ioctl("VIDIOC_ENUM_FRAMEINTERVALS", err))
    }

    fn format(&self) -> Result<Format> {
        let fmt = retry(|| self.device.format())
            .map_err(|err| CaptureError::ioctl("VIDIOC_G_FMT", err))?;

        Ok(Format {
            width: fmt.width,
            height: fmt.height,
            fourcc: FourCC::from(fmt.fourcc),
            stride: fmt.stride,
            size: fmt.size,
        })
    }

    fn set_format(&mut self, format: &Format) -> Result<()> {
        let requested = v4l::Format::new(format.width, format.height, format.fourcc.into());
        retry(|| self.device.set_format(&requested))
            .map_err(|err| CaptureError::ioctl("VIDIOC_S_FMT", err))?;
        debug!("{}: requested format {format}", self.path.display());
        Ok(())
    }

    fn frame_interval(&self) -> Result<Fraction> {
        let params = retry(|| self.device.params())
            .map_err(|err| CaptureError::ioctl("VIDIOC_G_PARM", err))?;
        Ok(fraction_from(params.interval))
    }

    fn set_frame_interval(&mut self, interval: Fraction) -> Result<()> {
        let params = Parameters::new(v4l::Fraction::new(interval.numerator, interval.denominator));
        retry(|| self.device.set_params(&params))
            .map_err(|err| CaptureError::ioctl("VIDIOC_S_PARM", err))?;
        debug!("{}: requested frame interval {interval}", self.path.display());
        Ok(())
    }

    fn request_buffers(&mut self, count: u32) -> Result<u32> {
        // SAFETY: v4l2_requestbuffers is plain old data; all-zero is a valid value.
        let mut request: v4l2_requestbuffers = unsafe { mem::zeroed() };
        request.count = count;
        request.type_ = Type::VideoCapture as u32;
        request.memory = Memory::Mmap as u32;

        xioctl(self.fd, vidioc::VIDIOC_REQBUFS, &mut request)
            .map_err(|err| CaptureError::ioctl("VIDIOC_REQBUFS", err))?;
        debug!(
            "{}: requested {count} buffers, granted {}",
            self.path.display(),
            request.count
        );
        Ok(request.count)
    }

    fn map_buffer(&mut self, index: u32) -> Result<MmapSlot> {
        let mut buffer = Self::buffer(index);
        xioctl(self.fd, vidioc::VIDIOC_QUERYBUF, &mut buffer)
            .map_err(|err| CaptureError::ioctl("VIDIOC_QUERYBUF", err))?;

        let len = buffer.length as usize;
        // SAFETY: QUERYBUF on an mmap buffer fills the `offset` member.
        let offset = unsafe { buffer.m.offset };
        let offset = libc::off_t::try_from(offset).map_err(|_| CaptureError::MapFailed {
            index,
            source: io::Error::from(io::ErrorKind::InvalidInput),
        })?;

        // SAFETY: maps a driver-owned region the driver just described; the
        // result is checked before use and released in `MmapSlot::drop`.
        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                self.fd,
                offset,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(CaptureError::MapFailed {
                index,
                source: io::Error::last_os_error(),
            });
        }
        let ptr = NonNull::new(base.cast::<u8>()).ok_or_else(|| CaptureError::MapFailed {
            index,
            source: io::Error::from(io::ErrorKind::InvalidData),
        })?;

        trace!("{}: mapped buffer {index}, {len} bytes", self.path.display());
        Ok(MmapSlot { ptr, len })
    }

    fn queue_buffer(&mut self, index: u32) -> Result<()> {
        let mut buffer = Self::buffer(index);
        xioctl(self.fd, vidioc::VIDIOC_QBUF, &mut buffer)
            .map_err(|err| CaptureError::ioctl("VIDIOC_QBUF", err))
    }

    fn dequeue_buffer(&mut self) -> Result<Option<DequeuedBuffer>> {
        let mut buffer = Self::buffer(0);
        match xioctl(self.fd, vidioc::VIDIOC_DQBUF, &mut buffer) {
            Ok(()) => Ok(Some(DequeuedBuffer {
                index: buffer.index,
                bytes_used: buffer.bytesused,
                timestamp: timestamp_from(&buffer),
            })),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(err) => Err(CaptureError::ioctl("VIDIOC_DQBUF", err)),
        }
    }

    fn stream_on(&mut self) -> Result<()> {
        self.stream_ioctl(vidioc::VIDIOC_STREAMON, "VIDIOC_STREAMON")
    }

    fn stream_off(&mut self) -> Result<()> {
        self.stream_ioctl(vidioc::VIDIOC_STREAMOFF, "VIDIOC_STREAMOFF")
    }
}

/// One driver buffer mapped into this process. Unmapped on drop.
pub struct MmapSlot {
    ptr: NonNull<u8>,
    len: usize,
}

impl MappedSlot for MmapSlot {
    fn len(&self) -> usize {
        self.len
    }

    fn with_bytes<R, F>(&self, f: F) -> R
    where
        F: FnOnce(&[u8]) -> R,
    {
        // SAFETY: the mapping is `len` bytes and stays valid until drop.
        let bytes = unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) };
        f(bytes)
    }
}

impl Drop for MmapSlot {
    fn drop(&mut self) {
        // SAFETY: `ptr`/`len` came from a successful mmap and are unmapped once.
        let result = unsafe { libc::munmap(self.ptr.as_ptr().cast::<c_void>(), self.len) };
        if result != 0 {
            warn!("failed to unmap buffer: {}", io::Error::last_os_error());
        }
    }
}

/// Run `op` again for as long as it is interrupted by a signal.
fn retry<T, F>(mut op: F) -> io::Result<T>
where
    F: FnMut() -> io::Result<T>,
{
    loop {
        match op() {
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            result => return result,
        }
    }
}

fn xioctl<T>(fd: c_int, request: vidioc::_IOC_TYPE, arg: &mut T) -> io::Result<()> {
    let arg = ptr::from_mut(arg).cast::<c_void>();
    // SAFETY: `arg` points at the struct `request` expects, live for the call.
    retry(|| unsafe { v4l::v4l2::ioctl(fd, request, arg) })
}

/// Walk a `VIDIOC_ENUM_*` request from index 0.
///
/// EINVAL past the first entry ends the list. Any other error, or any error
/// on the first entry, is returned. Entries `query` maps to `None` are skipped.
fn walk<T, F>(mut query: F) -> io::Result<Vec<T>>
where
    F: FnMut(u32) -> io::Result<Option<T>>,
{
    let mut items = Vec::new();
    for index in 0..=u32::MAX {
        match query(index) {
            Ok(Some(item)) => items.push(item),
            Ok(None) => {}
            Err(err) if index > 0 && err.raw_os_error() == Some(libc::EINVAL) => break,
            Err(err) => return Err(err),
        }
    }
    Ok(items)
}

fn format_description_from(desc: &v4l2_fmtdesc) -> FormatDescription {
    let name = desc.description.split(|&byte| byte == 0).next().unwrap_or_default();
    FormatDescription {
        fourcc: FourCC::from(v4l::FourCC::from(desc.pixelformat)),
        description: String::from_utf8_lossy(name).into_owned(),
    }
}

fn frame_size_from(size: v4l::framesize::FrameSize) -> FrameSize {
    match size.size {
        FrameSizeEnum::Discrete(discrete) => FrameSize::Discrete {
            width: discrete.width,
            height: discrete.height,
        },
        FrameSizeEnum::Stepwise(stepwise) => {
            let range = SizeRange {
                min_width: stepwise.min_width,
                max_width: stepwise.max_width,
                step_width: stepwise.step_width,
                min_height: stepwise.min_height,
                max_height: stepwise.max_height,
                step_height: stepwise.step_height,
            };
            // v4l folds continuous ranges into Stepwise; the kernel type tells them apart.
            if size.typ == v4l2_frmsizetypes_V4L2_FRMSIZE_TYPE_CONTINUOUS {
                FrameSize::Continuous(range)
            } else {
                FrameSize::Stepwise(range)
            }
        }
    }
}

fn frame_interval_from(interval: v4l::frameinterval::FrameInterval) -> FrameInterval {
    match interval.interval {
        FrameIntervalEnum::Discrete(fraction) => FrameInterval::Discrete(fraction_from(fraction)),
        FrameIntervalEnum::Stepwise(stepwise) => {
            let min = fraction_from(stepwise.min);
            let max = fraction_from(stepwise.max);
            if interval.typ == v4l2_frmivaltypes_V4L2_FRMIVAL_TYPE_CONTINUOUS {
                FrameInterval::Continuous { min, max }
            } else {
                FrameInterval::Stepwise {
                    min,
                    max,
                    step: fraction_from(stepwise.step),
                }
            }
        }
    }
}

fn set_nonblocking(fd: c_int) -> io::Result<()> {
    // SAFETY: fcntl on a descriptor owned by an open `Device`.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: as above.
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

const fn fraction_from(fraction: v4l::Fraction) -> Fraction {
    Fraction::new(fraction.numerator, fraction.denominator)
}

fn timestamp_from(buffer: &v4l2_buffer) -> Duration {
    let secs = u64::try_from(buffer.timestamp.tv_sec).unwrap_or(0);
    let micros = u64::try_from(buffer.timestamp.tv_usec).unwrap_or(0);
    Duration::from_secs(secs) + Duration::from_micros(micros)
}
