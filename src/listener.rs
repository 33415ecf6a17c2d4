//! Capture event listeners.
//!
//! The device keeps only weak handles to its listeners: registering one does
//! not extend its lifetime, and a dropped listener is skipped and pruned.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use log::warn;

use crate::capture::CaptureDevice;
use crate::device::V4L2Device;
use crate::traits::DeviceControl;

/// Observer of a device's capture lifecycle.
///
/// Hooks run synchronously on the thread driving the device and must not block.
pub trait Listener<C: DeviceControl = V4L2Device> {
    /// Capture started.
    fn on_started(&mut self, _device: &CaptureDevice<C>) {}

    /// A new frame is available through `device.captured_image()`.
    fn on_frame_captured(&mut self, _device: &CaptureDevice<C>) {}

    /// Capture stopped.
    fn on_stopped(&mut self, _device: &CaptureDevice<C>) {}
}

/// Stable handle identifying a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Debug, Clone, Copy)]
pub(crate) enum Event {
    Started,
    FrameCaptured,
    Stopped,
}

struct Entry<C: DeviceControl> {
    id: ListenerId,
    listener: Weak<RefCell<dyn Listener<C>>>,
}

/// Listeners in registration order.
pub(crate) struct ListenerRegistry<C: DeviceControl> {
    entries: Vec<Entry<C>>,
    next_id: u64,
}

impl<C: DeviceControl> Default for ListenerRegistry<C> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            next_id: 0,
        }
    }
}

impl<C: DeviceControl> ListenerRegistry<C> {
    pub fn add(&mut self, listener: Weak<RefCell<dyn Listener<C>>>) -> ListenerId {
        self.prune();
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.entries.push(Entry { id, listener });
        id
    }

    pub fn remove(&mut self, id: ListenerId) -> bool {
        self.prune();
        let Some(position) = self.entries.iter().position(|entry| entry.id == id) else {
            return false;
        };
        self.entries.remove(position);
        true
    }

    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.listener.strong_count() > 0)
            .count()
    }

    pub fn notify(&self, device: &CaptureDevice<C>, event: Event) {
        for entry in &self.entries {
            let Some(listener) = entry.listener.upgrade() else {
                continue;
            };
            let Ok(mut listener) = listener.try_borrow_mut() else {
                warn!(
                    "{}: listener {:?} is busy, skipping {event:?}",
                    device.name(),
                    entry.id
                );
                continue;
            };
            match event {
                Event::Started => listener.on_started(device),
                Event::FrameCaptured => listener.on_frame_captured(device),
                Event::Stopped => listener.on_stopped(device),
            }
        }
    }

    fn prune(&mut self) {
        self.entries
            .retain(|entry| entry.listener.strong_count() > 0);
    }
}

/// Downgrade a concrete listener handle for the registry.
pub(crate) fn downgrade<C, L>(listener: &Rc<RefCell<L>>) -> Weak<RefCell<dyn Listener<C>>>
where
    C: DeviceControl,
    L: Listener<C> + 'static,
{
    let listener: Rc<RefCell<dyn Listener<C>>> = Rc::clone(listener) as Rc<RefCell<dyn Listener<C>>>;
    Rc::downgrade(&listener)
}
