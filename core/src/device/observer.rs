//! Subscriber traits for device events and the weak fan-out hub.
//!
//! Subscribers are owned by the application. The hub and the devices only
//! keep `Weak` handles, so a dropped subscriber simply stops receiving
//! events: `upgrade()` either yields a live `Arc` for the whole call or
//! nothing at all.

use super::radio_device::RadioDevice;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

/// Property-change observer registered with a [`DeviceObserverHub`]
pub trait DeviceObserver: Send + Sync {
    fn device_added(&self, _device: &RadioDevice) {}

    fn device_removed(&self, _device: &RadioDevice) {}

    fn device_address_changed(&self, _device: &RadioDevice, _old_address: &str) {}

    fn device_paired_changed(&self, _device: &RadioDevice, _paired: bool) {}

    fn device_connected_state_changed(&self, _device: &RadioDevice, _connected: bool) {}
}

/// Discovery subscriber installed by `start_discovery`
pub trait DiscoveryCallback: Send + Sync {
    fn device_discovered(&self, _device: &RadioDevice) {}

    fn device_name_changed(&self, _device: &RadioDevice) {}

    fn device_lost(&self, _device: &RadioDevice) {}
}

/// Token returned by [`DeviceObserverHub::add_observer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Fan-out registry for device observers
#[derive(Default)]
pub struct DeviceObserverHub {
    next_id: AtomicU64,
    observers: Mutex<Vec<(ObserverId, Weak<dyn DeviceObserver>)>>,
}

impl DeviceObserverHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_observer<O: DeviceObserver + 'static>(&self, observer: &Arc<O>) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let weak = Arc::downgrade(observer) as Weak<dyn DeviceObserver>;
        self.observers.lock().push((id, weak));
        id
    }

    /// Returns false if `id` was not registered
    pub fn remove_observer(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.lock();
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() != before
    }

    /// Live observers; dead entries are pruned on the way
    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn notify_device_added(&self, device: &RadioDevice) {
        self.for_each(|o| o.device_added(device));
    }

    pub fn notify_device_removed(&self, device: &RadioDevice) {
        self.for_each(|o| o.device_removed(device));
    }

    pub fn notify_address_changed(&self, device: &RadioDevice, old_address: &str) {
        self.for_each(|o| o.device_address_changed(device, old_address));
    }

    pub fn notify_paired_changed(&self, device: &RadioDevice, paired: bool) {
        self.for_each(|o| o.device_paired_changed(device, paired));
    }

    pub fn notify_connected_changed(&self, device: &RadioDevice, connected: bool) {
        self.for_each(|o| o.device_connected_state_changed(device, connected));
    }

    fn snapshot(&self) -> Vec<Arc<dyn DeviceObserver>> {
        let mut observers = self.observers.lock();
        let before = observers.len();
        let mut live = Vec::with_capacity(before);
        observers.retain(|(_, weak)| match weak.upgrade() {
            Some(observer) => {
                live.push(observer);
                true
            }
            None => false,
        });
        if observers.len() != before {
            debug!("Pruned {} dropped observers", before - observers.len());
        }
        live
    }

    fn for_each(&self, f: impl Fn(&dyn DeviceObserver)) {
        // Lock is released before any observer runs
        for observer in self.snapshot() {
            f(observer.as_ref());
        }
    }
}
