//! Device registry for one Bluetooth Classic adapter.
//!
//! Consumes the driver's [`DeviceEvent`] stream, creates a [`RadioDevice`]
//! the first time an object path shows up and keeps it until the driver
//! reports the object removed. Lost devices stay in the registry.

use super::observer::{DeviceObserverHub, DiscoveryCallback};
use super::radio_device::RadioDevice;
use crate::error::NearbyError;
use crate::platform::{DeviceEvent, PropertyMap, RadioDriver};
use futures::{Stream, StreamExt};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info};

pub struct ClassicMedium {
    driver: Arc<dyn RadioDriver>,
    observers: Arc<DeviceObserverHub>,
    devices: RwLock<HashMap<String, Arc<RadioDevice>>>,
    discovery_callback: RwLock<Option<Weak<dyn DiscoveryCallback>>>,
    next_unique_id: AtomicU64,
    discovering: AtomicBool,
}

impl ClassicMedium {
    pub fn new(driver: Arc<dyn RadioDriver>) -> Self {
        Self {
            driver,
            observers: Arc::new(DeviceObserverHub::new()),
            devices: RwLock::new(HashMap::new()),
            discovery_callback: RwLock::new(None),
            next_unique_id: AtomicU64::new(1),
            discovering: AtomicBool::new(false),
        }
    }

    pub fn observers(&self) -> &Arc<DeviceObserverHub> {
        &self.observers
    }

    pub fn is_discovering(&self) -> bool {
        self.discovering.load(Ordering::SeqCst)
    }

    /// Begin discovery; `callback` is held weakly by the medium and every device
    pub fn start_discovery<C: DiscoveryCallback + 'static>(
        &self,
        callback: &Arc<C>,
    ) -> Result<(), NearbyError> {
        let weak = Arc::downgrade(callback) as Weak<dyn DiscoveryCallback>;
        self.install_callback(Some(weak));
        self.driver.start_discovery()?;
        self.discovering.store(true, Ordering::SeqCst);
        info!("Classic discovery started");
        Ok(())
    }

    pub fn stop_discovery(&self) -> Result<(), NearbyError> {
        self.install_callback(None);
        self.discovering.store(false, Ordering::SeqCst);
        self.driver.stop_discovery()?;
        info!("Classic discovery stopped");
        Ok(())
    }

    /// All known devices, lost ones included, ordered by unique id
    pub fn devices(&self) -> Vec<Arc<RadioDevice>> {
        let mut devices: Vec<Arc<RadioDevice>> = self.devices.read().values().cloned().collect();
        devices.sort_by_key(|d| d.unique_id());
        devices
    }

    /// Devices the driver currently sees
    pub fn visible_devices(&self) -> Vec<Arc<RadioDevice>> {
        self.devices().into_iter().filter(|d| !d.lost()).collect()
    }

    pub fn device(&self, object_path: &str) -> Option<Arc<RadioDevice>> {
        self.devices.read().get(object_path).cloned()
    }

    pub fn device_by_mac(&self, mac_address: &str) -> Option<Arc<RadioDevice>> {
        self.devices
            .read()
            .values()
            .find(|d| d.mac_address().eq_ignore_ascii_case(mac_address))
            .cloned()
    }

    pub fn handle_event(&self, event: DeviceEvent) {
        match event {
            DeviceEvent::Discovered {
                object_path,
                properties,
            } => self.on_discovered(&object_path, &properties),
            DeviceEvent::Lost { object_path } => {
                if let Some(device) = self.known(&object_path) {
                    device.mark_lost();
                    debug!("Device {} lost", device.unique_id());
                    if let Some(callback) = device.discovery_callback() {
                        callback.device_lost(&device);
                    }
                }
            }
            DeviceEvent::PropertiesChanged {
                object_path,
                changed,
            } => {
                if let Some(device) = self.known(&object_path) {
                    device.on_properties_changed(&changed);
                }
            }
            DeviceEvent::PairReply {
                object_path,
                result,
            } => {
                if let Some(device) = self.known(&object_path) {
                    device.on_pair_reply(result);
                }
            }
            DeviceEvent::Removed { object_path } => {
                let removed = self.devices.write().remove(&object_path);
                if let Some(device) = removed {
                    device.mark_removed();
                    info!("Device {} removed", device.unique_id());
                    self.observers.notify_device_removed(&device);
                }
            }
        }
    }

    /// Consume driver device events until the stream ends
    pub async fn run<S>(&self, events: S)
    where
        S: Stream<Item = DeviceEvent>,
    {
        futures::pin_mut!(events);
        while let Some(event) = events.next().await {
            self.handle_event(event);
        }
        debug!("Device event stream ended");
    }

    fn on_discovered(&self, object_path: &str, properties: &PropertyMap) {
        let (device, is_new) = {
            let mut devices = self.devices.write();
            match devices.get(object_path) {
                Some(existing) => (existing.clone(), false),
                None => {
                    let unique_id = self.next_unique_id.fetch_add(1, Ordering::Relaxed);
                    let device = Arc::new(RadioDevice::new(
                        unique_id,
                        object_path,
                        self.driver.clone(),
                        self.observers.clone(),
                    ));
                    device.set_discovery_callback(self.discovery_callback.read().clone());
                    devices.insert(object_path.to_string(), device.clone());
                    (device, true)
                }
            }
        };

        if is_new {
            device.refresh_properties(properties);
            info!(
                "Device {} discovered at {}",
                device.unique_id(),
                object_path
            );
            self.observers.notify_device_added(&device);
        } else {
            device.unmark_lost();
            device.on_properties_changed(properties);
            debug!("Device {} rediscovered", device.unique_id());
        }

        if let Some(callback) = device.discovery_callback() {
            callback.device_discovered(&device);
        }
    }

    fn known(&self, object_path: &str) -> Option<Arc<RadioDevice>> {
        let device = self.device(object_path);
        if device.is_none() {
            debug!("Event for unknown device {}", object_path);
        }
        device
    }

    fn install_callback(&self, callback: Option<Weak<dyn DiscoveryCallback>>) {
        *self.discovery_callback.write() = callback.clone();
        for device in self.devices() {
            device.set_discovery_callback(callback.clone());
        }
    }
}
