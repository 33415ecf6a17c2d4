//! Mock device implementation for testing without hardware.
//!
//! `MockDevice` is handed to the engine; the test keeps a `MockHandle` onto the
//! same state to script enumeration results, driver substitutions, injected
//! failures and completed frames.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::rc::Rc;
use std::time::Duration;

use crate::traits::{
    CaptureError, DequeuedBuffer, DeviceCapabilities, DeviceControl, Format, FormatDescription,
    FourCC, Fraction, FrameInterval, FrameSize, MappedSlot, Result,
};
use crate::validation::SMPTE_COLOR_BARS_YUV;

/// Device requests that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    /// `capabilities`.
    Capabilities,
    /// `enum_formats`.
    EnumFormats,
    /// `set_format`.
    SetFormat,
    /// `format`.
    GetFormat,
    /// `set_frame_interval`.
    SetInterval,
    /// `frame_interval`.
    GetInterval,
    /// `request_buffers` with a nonzero count.
    RequestBuffers,
    /// `map_buffer` for the given slot.
    Map(u32),
    /// `queue_buffer` for the given slot.
    Queue(u32),
    /// `stream_on`.
    StreamOn,
    /// `stream_off`.
    StreamOff,
}

/// One advertised pixel format and what enumerating it yields.
#[derive(Debug, Clone)]
pub struct MockFormat {
    description: FormatDescription,
    sizes: Option<Vec<FrameSize>>,
    intervals: HashMap<(u32, u32), Vec<FrameInterval>>,
}

impl MockFormat {
    /// A format with no frame sizes yet.
    #[must_use]
    pub fn new(fourcc: FourCC, description: &str) -> Self {
        Self {
            description: FormatDescription {
                fourcc,
                description: description.to_owned(),
            },
            sizes: Some(Vec::new()),
            intervals: HashMap::new(),
        }
    }

    /// Add a discrete size with the given discrete intervals.
    #[must_use]
    pub fn with_discrete(mut self, width: u32, height: u32, intervals: &[Fraction]) -> Self {
        self = self.with_size(FrameSize::Discrete { width, height });
        self.with_intervals(
            width,
            height,
            intervals.iter().copied().map(FrameInterval::Discrete).collect(),
        )
    }

    /// Add a frame size entry.
    #[must_use]
    pub fn with_size(mut self, size: FrameSize) -> Self {
        self.sizes.get_or_insert_with(Vec::new).push(size);
        self
    }

    /// Set the intervals reported for a size.
    #[must_use]
    pub fn with_intervals(mut self, width: u32, height: u32, intervals: Vec<FrameInterval>) -> Self {
        self.intervals.insert((width, height), intervals);
        self
    }

    /// Make frame-size enumeration fail for this format.
    #[must_use]
    pub fn failing_sizes(mut self) -> Self {
        self.sizes = None;
        self
    }
}

#[derive(Debug)]
struct MockState {
    capabilities: DeviceCapabilities,
    formats: Vec<MockFormat>,
    format: Format,
    interval: Fraction,
    substitute_format: Option<Format>,
    size_override: Option<u32>,
    substitute_interval: Option<Fraction>,
    max_granted: Option<u32>,
    failures: Vec<MockFailure>,
    fail_next_dequeue: bool,
    storage: Vec<Rc<RefCell<Vec<u8>>>>,
    queued: VecDeque<u32>,
    completed: VecDeque<DequeuedBuffer>,
    streaming: bool,
    calls: Vec<&'static str>,
}

impl MockState {
    fn check(&self, failure: MockFailure, request: &'static str) -> Result<()> {
        if self.failures.contains(&failure) {
            return Err(CaptureError::ioctl(request, io::Error::from_raw_os_error(libc::EIO)));
        }
        Ok(())
    }
}

/// Mock device for testing without hardware.
pub struct MockDevice {
    state: Rc<RefCell<MockState>>,
    live_mappings: Rc<Cell<usize>>,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDevice {
    /// A capture device advertising YUYV 640x480 at 1/30s.
    #[must_use]
    pub fn new() -> Self {
        Self::empty().with_formats(vec![MockFormat::new(FourCC::YUYV, "YUYV 4:2:2")
            .with_discrete(640, 480, &[Fraction::new(1, 30)])])
    }

    /// A capture device advertising no formats.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            state: Rc::new(RefCell::new(MockState {
                capabilities: DeviceCapabilities {
                    driver: "mock".to_owned(),
                    card: "Mock Camera".to_owned(),
                    bus_info: "mock:0".to_owned(),
                    can_capture: true,
                    can_stream: true,
                },
                formats: Vec::new(),
                format: Format::new(0, 0, FourCC::YUYV),
                interval: Fraction::UNSET,
                substitute_format: None,
                size_override: None,
                substitute_interval: None,
                max_granted: None,
                failures: Vec::new(),
                fail_next_dequeue: false,
                storage: Vec::new(),
                queued: VecDeque::new(),
                completed: VecDeque::new(),
                streaming: false,
                calls: Vec::new(),
            })),
            live_mappings: Rc::new(Cell::new(0)),
        }
    }

    /// Set the advertised formats.
    #[must_use]
    pub fn with_formats(self, formats: Vec<MockFormat>) -> Self {
        self.state.borrow_mut().formats = formats;
        self
    }

    /// Set the capabilities for this mock device.
    #[must_use]
    pub fn with_capabilities(self, capabilities: DeviceCapabilities) -> Self {
        self.state.borrow_mut().capabilities = capabilities;
        self
    }

    /// A handle onto this device's state.
    #[must_use]
    pub fn handle(&self) -> MockHandle {
        MockHandle {
            state: Rc::clone(&self.state),
            live_mappings: Rc::clone(&self.live_mappings),
        }
    }
}

fn bytes_per_pixel(fourcc: FourCC) -> u32 {
    match fourcc {
        FourCC::SBGGR8 | FourCC::SGBRG8 | FourCC::SGRBG8 | FourCC::SRGGB8 => 1,
        _ => 2,
    }
}

fn einval(request: &'static str) -> CaptureError {
    CaptureError::ioctl(request, io::Error::from_raw_os_error(libc::EINVAL))
}

impl DeviceControl for MockDevice {
    type Slot = MockSlot;

    fn capabilities(&self) -> Result<DeviceCapabilities> {
        let mut state = self.state.borrow_mut();
        state.calls.push("capabilities");
        state.check(MockFailure::Capabilities, "VIDIOC_QUERYCAP")?;
        Ok(state.capabilities.clone())
    }

    fn enum_formats(&self) -> Result<Vec<FormatDescription>> {
        let state = self.state.borrow();
        state.check(MockFailure::EnumFormats, "VIDIOC_ENUM_FMT")?;
        Ok(state
            .formats
            .iter()
            .map(|format| format.description.clone())
            .collect())
    }

    fn enum_frame_sizes(&self, fourcc: FourCC) -> Result<Vec<FrameSize>> {
        let state = self.state.borrow();
        state
            .formats
            .iter()
            .find(|format| format.description.fourcc == fourcc)
            .and_then(|format| format.sizes.clone())
            .filter(|sizes| !sizes.is_empty())
            .ok_or_else(|| einval("VIDIOC_ENUM_FRAMESIZES"))
    }

    fn enum_frame_intervals(
        &self,
        fourcc: FourCC,
        width: u32,
        height: u32,
    ) -> Result<Vec<FrameInterval>> {
        let state = self.state.borrow();
        state
            .formats
            .iter()
            .find(|format| format.description.fourcc == fourcc)
            .and_then(|format| format.intervals.get(&(width, height)).cloned())
            .filter(|intervals| !intervals.is_empty())
            .ok_or_else(|| einval("VIDIOC_ENUM_FRAMEINTERVALS"))
    }

    fn format(&self) -> Result<Format> {
        let mut state = self.state.borrow_mut();
        state.calls.push("format");
        state.check(MockFailure::GetFormat, "VIDIOC_G_FMT")?;
        Ok(state.format.clone())
    }

    fn set_format(&mut self, format: &Format) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.calls.push("set_format");
        state.check(MockFailure::SetFormat, "VIDIOC_S_FMT")?;

        let applied = state
            .substitute_format
            .clone()
            .unwrap_or_else(|| format.clone());
        let stride = applied.width * bytes_per_pixel(applied.fourcc);
        let size = state.size_override.unwrap_or(stride * applied.height);
        state.format = Format {
            stride,
            size,
            ..applied
        };
        Ok(())
    }

    fn frame_interval(&self) -> Result<Fraction> {
        let mut state = self.state.borrow_mut();
        state.calls.push("frame_interval");
        state.check(MockFailure::GetInterval, "VIDIOC_G_PARM")?;
        Ok(state.interval)
    }

    fn set_frame_interval(&mut self, interval: Fraction) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.calls.push("set_frame_interval");
        state.check(MockFailure::SetInterval, "VIDIOC_S_PARM")?;
        state.interval = state.substitute_interval.unwrap_or(interval);
        Ok(())
    }

    fn request_buffers(&mut self, count: u32) -> Result<u32> {
        let mut state = self.state.borrow_mut();
        state.calls.push("request_buffers");

        if count == 0 {
            if self.live_mappings.get() > 0 {
                return Err(CaptureError::ioctl(
                    "VIDIOC_REQBUFS",
                    io::Error::from_raw_os_error(libc::EBUSY),
                ));
            }
            state.storage.clear();
            state.queued.clear();
            state.completed.clear();
            return Ok(0);
        }

        state.check(MockFailure::RequestBuffers, "VIDIOC_REQBUFS")?;
        let granted = state.max_granted.map_or(count, |max| count.min(max));
        let size = state.format.size as usize;
        state.storage = (0..granted)
            .map(|_| Rc::new(RefCell::new(vec![0; size])))
            .collect();
        Ok(granted)
    }

    fn map_buffer(&mut self, index: u32) -> Result<MockSlot> {
        let mut state = self.state.borrow_mut();
        state.calls.push("map_buffer");
        if state.failures.contains(&MockFailure::Map(index)) {
            return Err(CaptureError::MapFailed {
                index,
                source: io::Error::from_raw_os_error(libc::ENOMEM),
            });
        }
        let data = state
            .storage
            .get(index as usize)
            .cloned()
            .ok_or_else(|| einval("VIDIOC_QUERYBUF"))?;
        self.live_mappings.set(self.live_mappings.get() + 1);
        Ok(MockSlot {
            data,
            live_mappings: Rc::clone(&self.live_mappings),
        })
    }

    fn queue_buffer(&mut self, index: u32) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.calls.push("queue_buffer");
        state.check(MockFailure::Queue(index), "VIDIOC_QBUF")?;
        if index as usize >= state.storage.len() || state.queued.contains(&index) {
            return Err(einval("VIDIOC_QBUF"));
        }
        state.queued.push_back(index);
        Ok(())
    }

    fn dequeue_buffer(&mut self) -> Result<Option<DequeuedBuffer>> {
        let mut state = self.state.borrow_mut();
        if state.fail_next_dequeue {
            state.fail_next_dequeue = false;
            return Err(CaptureError::ioctl(
                "VIDIOC_DQBUF",
                io::Error::from_raw_os_error(libc::EIO),
            ));
        }
        if !state.streaming {
            return Err(einval("VIDIOC_DQBUF"));
        }
        Ok(state.completed.pop_front())
    }

    fn stream_on(&mut self) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.calls.push("stream_on");
        state.check(MockFailure::StreamOn, "VIDIOC_STREAMON")?;
        state.streaming = true;
        Ok(())
    }

    fn stream_off(&mut self) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.calls.push("stream_off");
        state.check(MockFailure::StreamOff, "VIDIOC_STREAMOFF")?;
        state.streaming = false;
        state.queued.clear();
        state.completed.clear();
        Ok(())
    }
}

/// Mapped view of one mock buffer.
pub struct MockSlot {
    data: Rc<RefCell<Vec<u8>>>,
    live_mappings: Rc<Cell<usize>>,
}

impl MappedSlot for MockSlot {
    fn len(&self) -> usize {
        self.data.borrow().len()
    }

    fn with_bytes<R, F>(&self, f: F) -> R
    where
        F: FnOnce(&[u8]) -> R,
    {
        f(&self.data.borrow())
    }
}

impl Drop for MockSlot {
    fn drop(&mut self) {
        self.live_mappings.set(self.live_mappings.get() - 1);
    }
}

/// Test-side view of a `MockDevice`.
#[derive(Clone)]
pub struct MockHandle {
    state: Rc<RefCell<MockState>>,
    live_mappings: Rc<Cell<usize>>,
}

impl MockHandle {
    /// Make a request fail until `clear_failures`.
    pub fn fail(&self, failure: MockFailure) {
        self.state.borrow_mut().failures.push(failure);
    }

    /// Stop injecting failures.
    pub fn clear_failures(&self) {
        self.state.borrow_mut().failures.clear();
    }

    /// Fail the next dequeue with an I/O error.
    pub fn fail_next_dequeue(&self) {
        self.state.borrow_mut().fail_next_dequeue = true;
    }

    /// Have the driver apply `format` whatever is requested.
    pub fn substitute_format(&self, format: Format) {
        self.state.borrow_mut().substitute_format = Some(format);
    }

    /// Have the driver report `size` as the image size.
    pub fn override_size(&self, size: u32) {
        self.state.borrow_mut().size_override = Some(size);
    }

    /// Have the driver apply `interval` whatever is requested.
    pub fn substitute_interval(&self, interval: Fraction) {
        self.state.borrow_mut().substitute_interval = Some(interval);
    }

    /// Grant at most `max` buffers.
    pub fn limit_buffers(&self, max: u32) {
        self.state.borrow_mut().max_granted = Some(max);
    }

    /// Fill the oldest queued buffer with `data` and mark it complete.
    ///
    /// Returns `false` when no buffer is queued.
    pub fn complete_frame(&self, data: &[u8], timestamp: Duration) -> bool {
        let mut state = self.state.borrow_mut();
        let Some(index) = state.queued.pop_front() else {
            return false;
        };
        if let Some(storage) = state.storage.get(index as usize) {
            let mut storage = storage.borrow_mut();
            let len = data.len().min(storage.len());
            storage[..len].copy_from_slice(&data[..len]);
        }
        state.completed.push_back(DequeuedBuffer {
            index,
            bytes_used: u32::try_from(data.len()).unwrap_or(u32::MAX),
            timestamp,
        });
        true
    }

    /// Complete a frame of the active format filled with `pattern`.
    pub fn complete_pattern(&self, pattern: TestPattern, timestamp: Duration) -> bool {
        let format = self.active_format();
        let data = generate_test_frame(format.width, format.height, pattern);
        self.complete_frame(&data, timestamp)
    }

    /// Format the driver currently applies.
    pub fn active_format(&self) -> Format {
        self.state.borrow().format.clone()
    }

    /// Interval the driver currently applies.
    pub fn active_interval(&self) -> Fraction {
        self.state.borrow().interval
    }

    /// Requests made so far, in order.
    pub fn calls(&self) -> Vec<&'static str> {
        self.state.borrow().calls.clone()
    }

    /// Forget recorded requests.
    pub fn clear_calls(&self) {
        self.state.borrow_mut().calls.clear();
    }

    /// Mappings not yet released.
    pub fn live_mappings(&self) -> usize {
        self.live_mappings.get()
    }

    /// Buffers currently allocated on the device.
    pub fn allocated_buffers(&self) -> usize {
        self.state.borrow().storage.len()
    }

    /// Buffers currently queued to the device.
    pub fn queued_buffers(&self) -> usize {
        self.state.borrow().queued.len()
    }

    /// Whether streaming is armed.
    pub fn is_streaming(&self) -> bool {
        self.state.borrow().streaming
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

/// Generate a YUYV frame filled with `pattern`.
pub fn generate_test_frame(width: u32, height: u32, pattern: TestPattern) -> Vec<u8> {
    let size = (width * height * 2) as usize;
    let mut data = vec![0u8; size];

    match pattern {
        TestPattern::ColorBars => generate_color_bars(&mut data, width, height),
        TestPattern::Gradient => generate_gradient(&mut data, width, height),
        TestPattern::Solid(y, u, v) => generate_solid(&mut data, y, u, v),
    }

    data
}

fn generate_color_bars(data: &mut [u8], width: u32, height: u32) {
    let bar_width = (width / 8).max(1);

    for y in 0..height {
        for x in (0..width).step_by(2) {
            let bar_idx = (x / bar_width).min(7) as usize;
            let (y_val, u_val, v_val) = SMPTE_COLOR_BARS_YUV[bar_idx];

            let offset = ((y * width + x) * 2) as usize;
            if offset + 3 < data.len() {
                data[offset] = y_val;
                data[offset + 1] = u_val;
                data[offset + 2] = y_val;
                data[offset + 3] = v_val;
            }
        }
    }
}

fn generate_gradient(data: &mut [u8], width: u32, height: u32) {
    for y in 0..height {
        for x in (0..width).step_by(2) {
            #[allow(clippy::cast_possible_truncation)]
            let y_val = ((x * 255) / width) as u8;
            let offset = ((y * width + x) * 2) as usize;

            if offset + 3 < data.len() {
                data[offset] = y_val;
                data[offset + 1] = 128;
                data[offset + 2] = y_val;
                data[offset + 3] = 128;
            }
        }
    }
}

fn generate_solid(data: &mut [u8], y: u8, u: u8, v: u8) {
    for chunk in data.chunks_exact_mut(4) {
        chunk.copy_from_slice(&[y, u, y, v]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_device_creation() {
        let device = MockDevice::new();
        let caps = device.capabilities().expect("capabilities should succeed");
        assert_eq!(caps.driver, "mock");
        assert!(caps.can_capture);
        assert!(caps.can_stream);
    }

    #[test]
    fn test_mock_set_format_fills_layout() {
        let mut device = MockDevice::new();
        device
            .set_format(&Format::new(640, 480, FourCC::YUYV))
            .expect("set_format should succeed");
        let format = device.format().expect("format should succeed");
        assert_eq!(format.stride, 1280);
        assert_eq!(format.size, 614_400);
    }

    #[test]
    fn test_mock_complete_and_dequeue() {
        let mut device = MockDevice::new();
        let handle = device.handle();
        device
            .set_format(&Format::new(4, 2, FourCC::YUYV))
            .expect("set_format should succeed");
        assert_eq!(device.request_buffers(2).expect("request should succeed"), 2);
        device.queue_buffer(0).expect("queue should succeed");
        device.stream_on().expect("stream_on should succeed");

        assert!(device.dequeue_buffer().expect("dequeue").is_none());
        assert!(handle.complete_frame(&[1; 16], Duration::from_millis(5)));
        assert!(!handle.complete_frame(&[1; 16], Duration::from_millis(6)));

        let buffer = device.dequeue_buffer().expect("dequeue").expect("frame ready");
        assert_eq!(buffer.index, 0);
        assert_eq!(buffer.bytes_used, 16);
    }

    #[test]
    fn test_mock_slot_tracks_mappings() {
        let mut device = MockDevice::new();
        let handle = device.handle();
        device
            .set_format(&Format::new(4, 2, FourCC::YUYV))
            .expect("set_format should succeed");
        device.request_buffers(1).expect("request should succeed");
        let slot = device.map_buffer(0).expect("map should succeed");
        assert_eq!(slot.len(), 16);
        assert_eq!(handle.live_mappings(), 1);
        assert!(device.request_buffers(0).is_err());
        drop(slot);
        assert_eq!(handle.live_mappings(), 0);
        assert_eq!(device.request_buffers(0).expect("release should succeed"), 0);
    }

    #[test]
    fn test_color_bars_pattern() {
        let data = generate_test_frame(640, 480, TestPattern::ColorBars);
        assert_eq!(data.len(), 640 * 480 * 2);
        // First bar should be white (Y=235)
        assert_eq!(data[0], 235);
    }

    #[test]
    fn test_gradient_pattern() {
        let data = generate_test_frame(640, 480, TestPattern::Gradient);
        assert!(data[0] < 10);

        let last_row_start = 479 * 640 * 2;
        let last_pixel_y = data[last_row_start + 638 * 2];
        assert!(last_pixel_y > 200);
    }

    #[test]
    fn test_solid_pattern() {
        let data = generate_test_frame(64, 64, TestPattern::Solid(128, 64, 192));
        assert_eq!(&data[..4], &[128, 64, 128, 192]);
    }
}
