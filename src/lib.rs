//! v4l2-grab: poll-driven frame capture from V4L2 devices.
//!
//! A [`CaptureDevice`] probes a device, publishes the capture settings it
//! supports, and on request streams frames through memory-mapped driver
//! buffers into a single [`CapturedImage`]. The caller drains completed frames
//! with [`CaptureDevice::update`] and is told about each one through
//! [`Listener`] hooks.
//!
//! The engine runs against the [`DeviceControl`] trait, so tests can drive it
//! with a mock instead of hardware.

pub mod buffer;
pub mod capture;
pub mod config;
pub mod convert;
pub mod device;
pub mod format;
pub mod image;
pub mod listener;
pub mod pnm;
pub mod settings;
pub mod traits;
pub mod validation;

#[cfg(test)]
pub mod mock;

pub use buffer::MemoryBuffer;
pub use capture::CaptureDevice;
pub use config::CaptureConfig;
pub use device::V4L2Device;
pub use format::{Encoding, ImageFormat};
pub use image::{CapturedImage, Image};
pub use listener::{Listener, ListenerId};
pub use settings::{CaptureSettings, CaptureSettingsList};
pub use traits::{CaptureError, DeviceCapabilities, DeviceControl, Format, FourCC, Fraction, Result};
