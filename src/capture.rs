//! The capture engine.
//!
//! A [`CaptureDevice`] probes a device once at construction and publishes the
//! capture settings it understands. After that it moves between two states:
//! idle, and capturing with a mapped buffer pool. `start_capture` negotiates
//! one published setting and arms streaming. `update` drains completed buffers
//! without blocking. `stop_capture` tears the pool down again.

use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use log::{debug, error, info, warn};

use crate::config::CaptureConfig;
use crate::device::V4L2Device;
use crate::image::CapturedImage;
use crate::listener::{self, Event, Listener, ListenerId, ListenerRegistry};
use crate::settings::{CaptureSettings, CaptureSettingsList, InternalCaptureSettings};
use crate::traits::{
    CaptureError, DeviceCapabilities, DeviceControl, Format, Fraction, FrameInterval, FrameSize,
    MappedSlot, Result,
};

/// State that exists only while capturing.
struct Session<S> {
    settings_index: usize,
    slots: Vec<S>,
    captured: CapturedImage,
}

/// Outcome of taking one completed buffer off the device.
enum Drained {
    /// Copied into the captured image.
    Frame(u32),
    /// Dropped; the buffer still goes back to the device.
    Skipped(u32),
}

/// A video capture device.
///
/// Single-threaded: the thread that calls `update` also drives start and stop,
/// and listeners are notified synchronously on it.
pub struct CaptureDevice<C: DeviceControl = V4L2Device> {
    name: String,
    config: CaptureConfig,
    capabilities: DeviceCapabilities,
    internal_settings: Vec<InternalCaptureSettings>,
    settings: CaptureSettingsList,
    settings_to_internal: Vec<usize>,
    // Declared before `control` so mappings are released before the handle closes.
    session: Option<Session<C::Slot>>,
    control: Option<C>,
    listeners: ListenerRegistry<C>,
}

impl CaptureDevice<V4L2Device> {
    /// Open the device at `path` with default configuration.
    ///
    /// Never fails: if the device is unusable the result reports
    /// `is_valid() == false` and the reason is logged.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self::new_with_config(path, CaptureConfig::default())
    }

    /// Like [`CaptureDevice::new`] with an explicit configuration.
    pub fn new_with_config<P: AsRef<Path>>(path: P, config: CaptureConfig) -> Self {
        let name = path.as_ref().display().to_string();
        match Self::open_with_config(path, config.clone()) {
            Ok(device) => device,
            Err(err) => {
                error!("{err}");
                Self::invalid(name, config)
            }
        }
    }

    /// Open the device at `path`, returning why it is unusable on failure.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_config(path, CaptureConfig::default())
    }

    /// Like [`CaptureDevice::open`] with an explicit configuration.
    pub fn open_with_config<P: AsRef<Path>>(path: P, config: CaptureConfig) -> Result<Self> {
        let path = path.as_ref();
        let control = V4L2Device::open(path)?;
        Self::from_control(path.display().to_string(), control, config)
    }
}

impl<C: DeviceControl> CaptureDevice<C> {
    /// Probe `control` and enumerate the capture settings it supports.
    ///
    /// Fails unless the device reports both video capture and streaming I/O.
    pub fn from_control<S: Into<String>>(name: S, control: C, config: CaptureConfig) -> Result<Self> {
        let name = name.into();

        let capabilities = control.capabilities()?;
        if !capabilities.can_capture {
            return Err(CaptureError::MissingCapability {
                device: name,
                capability: "video capture",
            });
        }
        if !capabilities.can_stream {
            return Err(CaptureError::MissingCapability {
                device: name,
                capability: "streaming I/O",
            });
        }

        let internal_settings = enumerate_internal_settings(&name, &control, &config);
        let (settings, settings_to_internal) = publish_settings(&name, &internal_settings);
        info!(
            "{name}: {} ({}) opened, {} capture settings supported out of {} reported",
            capabilities.card,
            capabilities.driver,
            settings.len(),
            internal_settings.len()
        );

        Ok(Self {
            name,
            config,
            capabilities,
            internal_settings,
            settings,
            settings_to_internal,
            session: None,
            control: Some(control),
            listeners: ListenerRegistry::default(),
        })
    }

    fn invalid(name: String, config: CaptureConfig) -> Self {
        Self {
            name,
            config,
            capabilities: DeviceCapabilities::default(),
            internal_settings: Vec::new(),
            settings: Vec::new(),
            settings_to_internal: Vec::new(),
            session: None,
            control: None,
            listeners: ListenerRegistry::default(),
        }
    }

    /// Device name (its path for hardware devices).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether probing succeeded. An invalid device has no settings and cannot capture.
    pub const fn is_valid(&self) -> bool {
        self.control.is_some()
    }

    /// Capabilities reported at probe time.
    pub const fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    /// Configuration in use.
    pub const fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// The capture settings this device supports, in enumeration order.
    pub fn supported_capture_settings(&self) -> &[CaptureSettings] {
        &self.settings
    }

    /// Index of the first supported setting equal to `settings`.
    pub fn supported_capture_settings_index(&self, settings: &CaptureSettings) -> Option<usize> {
        self.settings.iter().position(|candidate| candidate == settings)
    }

    /// Whether capture is running.
    pub const fn is_capturing(&self) -> bool {
        self.session.is_some()
    }

    /// The latest captured frame, while capturing.
    pub fn captured_image(&self) -> Option<&CapturedImage> {
        self.session.as_ref().map(|session| &session.captured)
    }

    /// The settings capture was started with.
    pub fn active_capture_settings(&self) -> Option<&CaptureSettings> {
        self.session
            .as_ref()
            .and_then(|session| self.settings.get(session.settings_index))
    }

    /// Number of buffers in the pool; zero when idle.
    pub fn buffer_count(&self) -> usize {
        self.session.as_ref().map_or(0, |session| session.slots.len())
    }

    /// Register a listener. The device only keeps a weak reference to it.
    pub fn add_listener<L: Listener<C> + 'static>(&mut self, listener: &Rc<RefCell<L>>) -> ListenerId {
        self.listeners.add(listener::downgrade(listener))
    }

    /// Unregister a listener. Returns `false` if `id` is not registered.
    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    /// Number of registered listeners still alive.
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Negotiate `supported_capture_settings()[index]` with the device and start streaming.
    ///
    /// On failure nothing changes: the device stays idle and start can be retried.
    pub fn start_capture(&mut self, index: usize) -> Result<()> {
        let Some(control) = self.control.as_mut() else {
            return Err(CaptureError::InvalidDevice(self.name.clone()));
        };
        if self.session.is_some() {
            return Err(CaptureError::AlreadyCapturing(self.name.clone()));
        }

        let out_of_range = CaptureError::IndexOutOfRange {
            index,
            len: self.settings.len(),
        };
        let Some(settings) = self.settings.get(index) else {
            return Err(out_of_range);
        };
        let Some(internal) = self
            .settings_to_internal
            .get(index)
            .and_then(|&internal_index| self.internal_settings.get(internal_index))
        else {
            return Err(out_of_range);
        };

        negotiate(&self.name, control, internal, settings)?;
        let captured = CapturedImage::new(*settings.image_format());
        let slots = allocate_pool(&self.name, control, &self.config)?;

        if let Err(err) = control.stream_on() {
            drop(slots);
            release_buffers(&self.name, control);
            return Err(err);
        }

        info!(
            "{}: capture started with {settings} and {} buffers",
            self.name,
            slots.len()
        );
        self.session = Some(Session {
            settings_index: index,
            slots,
            captured,
        });
        self.notify(Event::Started);
        Ok(())
    }

    /// Stop streaming and release the buffer pool. Stopping an idle device does nothing.
    ///
    /// If the device refuses to stop streaming, the buffers stay mapped and the
    /// device stays capturing so stop can be retried.
    pub fn stop_capture(&mut self) -> Result<()> {
        let Some(control) = self.control.as_mut() else {
            return Ok(());
        };
        if self.session.is_none() {
            return Ok(());
        }

        if let Err(err) = control.stream_off() {
            error!("{}: cannot stop streaming, keeping buffers mapped: {err}", self.name);
            return Err(err);
        }

        // Unmaps every slot and frees the captured image.
        self.session = None;
        release_buffers(&self.name, control);

        info!("{}: capture stopped", self.name);
        self.notify(Event::Stopped);
        Ok(())
    }

    /// Drain every buffer the device has completed, without blocking.
    ///
    /// Each frame is copied into the captured image and announced to listeners,
    /// then its buffer goes back to the device. Returns how many frames were
    /// delivered. Does nothing while idle.
    pub fn update(&mut self) -> usize {
        let mut delivered = 0;
        while let Some(drained) = self.drain_one() {
            let index = match drained {
                Drained::Frame(index) => {
                    delivered += 1;
                    self.notify(Event::FrameCaptured);
                    index
                }
                Drained::Skipped(index) => index,
            };

            let requeued = self
                .control
                .as_mut()
                .map_or(Ok(()), |control| control.queue_buffer(index));
            if let Err(err) = requeued {
                warn!("{}: failed to requeue buffer {index}: {err}", self.name);
                break;
            }
        }
        delivered
    }

    fn drain_one(&mut self) -> Option<Drained> {
        let control = self.control.as_mut()?;
        let session = self.session.as_mut()?;

        let buffer = match control.dequeue_buffer() {
            Ok(Some(buffer)) => buffer,
            Ok(None) => return None,
            Err(err) => {
                warn!("{}: {err}", self.name);
                return None;
            }
        };

        let target = session.captured.image_mut().buffer_mut();
        let copied = match session.slots.get(buffer.index as usize) {
            Some(slot) => slot.with_bytes(|bytes| match bytes.get(..buffer.bytes_used as usize) {
                Some(frame) => target.copy_from(frame),
                None => Err(CaptureError::BufferSizeMismatch {
                    expected: target.len(),
                    actual: buffer.bytes_used as usize,
                }),
            }),
            None => {
                warn!(
                    "{}: device returned unknown buffer {}",
                    self.name, buffer.index
                );
                return Some(Drained::Skipped(buffer.index));
            }
        };

        match copied {
            Ok(()) => {
                session.captured.advance(buffer.timestamp);
                Some(Drained::Frame(buffer.index))
            }
            Err(err) => {
                warn!(
                    "{}: failed to copy buffer {} into the captured image: {err}",
                    self.name, buffer.index
                );
                Some(Drained::Skipped(buffer.index))
            }
        }
    }

    fn notify(&self, event: Event) {
        self.listeners.notify(self, event);
    }
}

impl<C: DeviceControl> Drop for CaptureDevice<C> {
    fn drop(&mut self) {
        if let Err(err) = self.stop_capture() {
            error!("{}: failed to stop capture on close: {err}", self.name);
        }
    }
}

/// Walk every (pixel format, frame size, frame interval) the device reports.
fn enumerate_internal_settings<C: DeviceControl>(
    name: &str,
    control: &C,
    config: &CaptureConfig,
) -> Vec<InternalCaptureSettings> {
    let formats = match control.enum_formats() {
        Ok(formats) => formats,
        Err(err) => {
            warn!("{name}: cannot enumerate pixel formats: {err}");
            return Vec::new();
        }
    };

    let mut list = Vec::new();
    for format in &formats {
        let entry = |width, height, interval| InternalCaptureSettings {
            pixel_format_name: format.description.clone(),
            fourcc: format.fourcc,
            width,
            height,
            interval,
        };

        let sizes = match control.enum_frame_sizes(format.fourcc) {
            Ok(sizes) if !sizes.is_empty() => sizes,
            Ok(_) | Err(_) => {
                debug!(
                    "{name}: no frame sizes for '{}', using fallback sizes",
                    format.description
                );
                list.extend(
                    config
                        .fallback_frame_sizes()
                        .iter()
                        .map(|&(width, height)| entry(width, height, Fraction::UNSET)),
                );
                continue;
            }
        };

        for size in sizes {
            match size {
                FrameSize::Discrete { width, height } => {
                    let intervals = control
                        .enum_frame_intervals(format.fourcc, width, height)
                        .unwrap_or_else(|err| {
                            debug!(
                                "{name}: no frame intervals for '{}' {width}x{height}: {err}",
                                format.description
                            );
                            Vec::new()
                        });
                    for interval in intervals {
                        match interval {
                            FrameInterval::Discrete(fraction) => {
                                list.push(entry(width, height, fraction));
                            }
                            FrameInterval::Stepwise { .. } | FrameInterval::Continuous { .. } => {
                                warn!(
                                    "{name} supports a non-discrete frame interval for '{}' \
                                     {width}x{height}, which is unsupported",
                                    format.description
                                );
                            }
                        }
                    }
                }
                FrameSize::Stepwise(range) => {
                    list.push(entry(range.max_width, range.max_height, Fraction::UNSET));
                }
                FrameSize::Continuous(range) => {
                    warn!(
                        "{name} supports a continuous frame size range for '{}' \
                         ({}x{} to {}x{}), which is unsupported",
                        format.description,
                        range.min_width,
                        range.min_height,
                        range.max_width,
                        range.max_height
                    );
                }
            }
        }
    }

    debug!("{name}: internal capture settings list: {}", list.len());
    for settings in &list {
        debug!("{name}: {settings}");
    }
    list
}

/// Keep the entries whose pixel format maps to an encoding, remembering where each came from.
fn publish_settings(
    name: &str,
    internal_settings: &[InternalCaptureSettings],
) -> (CaptureSettingsList, Vec<usize>) {
    let mut settings = Vec::new();
    let mut settings_to_internal = Vec::new();

    for (index, internal) in internal_settings.iter().enumerate() {
        if let Some(published) = internal.to_capture_settings() {
            settings_to_internal.push(index);
            settings.push(published);
        } else {
            warn!(
                "{name} supports pixel format '{}' ({}) which is unsupported by the implementation",
                internal.pixel_format_name, internal.fourcc
            );
        }
    }

    debug_assert_eq!(settings.len(), settings_to_internal.len());
    (settings, settings_to_internal)
}

/// Configure the device for `internal` and check it applied exactly that.
fn negotiate<C: DeviceControl>(
    name: &str,
    control: &mut C,
    internal: &InternalCaptureSettings,
    settings: &CaptureSettings,
) -> Result<()> {
    let requested = Format::new(internal.width, internal.height, internal.fourcc);
    control.set_format(&requested)?;
    let actual = control.format()?;
    if !requested.same_geometry(&actual) {
        return Err(CaptureError::FormatMismatch { requested, actual });
    }

    let expected = settings.image_format().data_size_in_bytes();
    if actual.size != expected {
        return Err(CaptureError::FrameSizeMismatch {
            expected,
            actual: actual.size,
        });
    }

    if internal.interval.is_set() {
        control.set_frame_interval(internal.interval)?;
        let actual = control.frame_interval()?;
        if actual != internal.interval {
            return Err(CaptureError::IntervalMismatch {
                requested: internal.interval,
                actual,
            });
        }
    } else {
        info!("{name}: no frame interval known for {settings}, keeping the device's");
    }
    Ok(())
}

/// Request, map and queue the buffer pool. On error nothing stays mapped or allocated.
fn allocate_pool<C: DeviceControl>(
    name: &str,
    control: &mut C,
    config: &CaptureConfig,
) -> Result<Vec<C::Slot>> {
    let granted = control.request_buffers(config.buffer_count())?;
    if granted < config.min_buffer_count() {
        release_buffers(name, control);
        return Err(CaptureError::InsufficientBuffers {
            granted,
            required: config.min_buffer_count(),
        });
    }

    match map_and_queue(control, granted) {
        Ok(slots) => Ok(slots),
        Err(err) => {
            release_buffers(name, control);
            Err(err)
        }
    }
}

fn map_and_queue<C: DeviceControl>(control: &mut C, count: u32) -> Result<Vec<C::Slot>> {
    // Slots mapped before a failure are unmapped as the partial Vec drops.
    let slots = (0..count)
        .map(|index| control.map_buffer(index))
        .collect::<Result<Vec<_>>>()?;
    for index in 0..count {
        control.queue_buffer(index)?;
    }
    Ok(slots)
}

fn release_buffers<C: DeviceControl>(name: &str, control: &mut C) {
    if let Err(err) = control.request_buffers(0) {
        warn!("{name}: failed to release device buffers: {err}");
    }
}
