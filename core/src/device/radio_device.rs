//! One discovered remote radio endpoint.
//!
//! Identity attributes are cached and refreshed only by driver property
//! changes, so reads never touch the radio. The pairing callback slot has
//! its own lock so a pairing round-trip never blocks identity reads.

use super::observer::{DeviceObserverHub, DiscoveryCallback};
use crate::error::{DriverError, NearbyError};
use crate::platform::{PropertyMap, RadioDriver};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// Driver property keys the device understands
pub mod property {
    pub const NAME: &str = "Name";
    pub const ALIAS: &str = "Alias";
    pub const ADDRESS: &str = "Address";
    pub const PAIRED: &str = "Paired";
    pub const CONNECTED: &str = "Connected";
    pub const RSSI: &str = "RSSI";
}

/// Fired once with the driver's answer to a pairing request
pub type PairReplyCallback = Box<dyn FnOnce(Result<(), DriverError>) + Send>;

/// Lifecycle position of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceState {
    Discovered,
    PairingInProgress,
    Lost,
    Removed,
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceState::Discovered => write!(f, "Discovered"),
            DeviceState::PairingInProgress => write!(f, "PairingInProgress"),
            DeviceState::Lost => write!(f, "Lost"),
            DeviceState::Removed => write!(f, "Removed"),
        }
    }
}

/// Cached identity attributes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub name: String,
    pub alias: String,
    pub address: String,
    pub paired: bool,
    pub connected: bool,
    pub rssi: Option<i16>,
}

#[derive(Default)]
struct ChangeSet {
    name_changed: bool,
    old_address: Option<String>,
    paired: Option<bool>,
    connected: Option<bool>,
}

pub struct RadioDevice {
    unique_id: u64,
    object_path: String,
    driver: Arc<dyn RadioDriver>,
    observers: Arc<DeviceObserverHub>,

    identity: RwLock<DeviceIdentity>,
    lost: AtomicBool,
    removed: AtomicBool,

    pair_reply: Mutex<Option<PairReplyCallback>>,
    discovery_callback: RwLock<Option<Weak<dyn DiscoveryCallback>>>,
}

impl RadioDevice {
    pub fn new(
        unique_id: u64,
        object_path: impl Into<String>,
        driver: Arc<dyn RadioDriver>,
        observers: Arc<DeviceObserverHub>,
    ) -> Self {
        Self {
            unique_id,
            object_path: object_path.into(),
            driver,
            observers,
            identity: RwLock::new(DeviceIdentity::default()),
            lost: AtomicBool::new(false),
            removed: AtomicBool::new(false),
            pair_reply: Mutex::new(None),
            discovery_callback: RwLock::new(None),
        }
    }

    #[cfg(test)]
    pub(crate) fn detached(unique_id: u64, object_path: &str) -> Self {
        Self::new(
            unique_id,
            object_path,
            Arc::new(crate::platform::LoopbackRadio::new()),
            Arc::new(DeviceObserverHub::new()),
        )
    }

    pub fn unique_id(&self) -> u64 {
        self.unique_id
    }

    pub fn object_path(&self) -> &str {
        &self.object_path
    }

    /// Last known display name; the alias wins when the driver reports one
    pub fn name(&self) -> String {
        let identity = self.identity.read();
        if identity.alias.is_empty() {
            identity.name.clone()
        } else {
            identity.alias.clone()
        }
    }

    pub fn mac_address(&self) -> String {
        self.identity.read().address.clone()
    }

    /// Same as [`mac_address`](Self::mac_address); BLE peripherals call it the address
    pub fn address(&self) -> String {
        self.mac_address()
    }

    pub fn is_paired(&self) -> bool {
        self.identity.read().paired
    }

    pub fn is_connected(&self) -> bool {
        self.identity.read().connected
    }

    pub fn rssi(&self) -> Option<i16> {
        self.identity.read().rssi
    }

    pub fn identity(&self) -> DeviceIdentity {
        self.identity.read().clone()
    }

    pub fn mark_lost(&self) {
        self.lost.store(true, Ordering::SeqCst);
    }

    pub fn unmark_lost(&self) {
        self.lost.store(false, Ordering::SeqCst);
    }

    pub fn lost(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_removed(&self) {
        self.removed.store(true, Ordering::SeqCst);
        self.reset_pair_reply_callback();
    }

    pub fn state(&self) -> DeviceState {
        if self.removed.load(Ordering::SeqCst) {
            DeviceState::Removed
        } else if self.lost() {
            DeviceState::Lost
        } else if self.pair_reply.lock().is_some() {
            DeviceState::PairingInProgress
        } else {
            DeviceState::Discovered
        }
    }

    /// Start pairing with `service_id`.
    ///
    /// Only valid while `Discovered`. The driver answers asynchronously via
    /// [`on_pair_reply`](Self::on_pair_reply); a synchronous driver failure
    /// is returned here and `callback` is dropped unfired.
    pub fn request_pairing(
        &self,
        service_id: &str,
        callback: PairReplyCallback,
    ) -> Result<(), NearbyError> {
        match self.state() {
            DeviceState::Discovered => {}
            other => {
                return Err(NearbyError::InvalidState(format!(
                    "cannot pair device {} while {}",
                    self.unique_id, other
                )))
            }
        }

        {
            let mut slot = self.pair_reply.lock();
            if slot.is_some() {
                return Err(NearbyError::InvalidState(format!(
                    "pairing already in progress for device {}",
                    self.unique_id
                )));
            }
            *slot = Some(callback);
        }

        if let Err(e) = self.driver.pair(&self.object_path, service_id) {
            self.reset_pair_reply_callback();
            warn!("Pair request for {} failed: {}", self.object_path, e);
            return Err(e.into());
        }
        info!(
            "Pairing requested: device {} service {}",
            self.unique_id, service_id
        );
        Ok(())
    }

    pub fn reset_pair_reply_callback(&self) {
        self.pair_reply.lock().take();
    }

    /// Driver answer to an earlier pairing request
    pub fn on_pair_reply(&self, result: Result<(), DriverError>) {
        let callback = self.pair_reply.lock().take();
        match callback {
            Some(callback) => {
                if let Err(e) = &result {
                    info!("Pairing with {} failed: {}", self.object_path, e);
                }
                callback(result);
            }
            None => debug!("Unsolicited pair reply for {}", self.object_path),
        }
    }

    pub(crate) fn set_discovery_callback(&self, callback: Option<Weak<dyn DiscoveryCallback>>) {
        *self.discovery_callback.write() = callback;
    }

    /// The discovery subscriber, if it is still alive
    pub fn discovery_callback(&self) -> Option<Arc<dyn DiscoveryCallback>> {
        self.discovery_callback
            .read()
            .as_ref()
            .and_then(|weak| weak.upgrade())
    }

    /// Apply driver property changes and notify subscribers.
    pub fn on_properties_changed(&self, changed: &PropertyMap) {
        let changes = self.apply_properties(changed);

        if changes.name_changed {
            match self.discovery_callback() {
                Some(callback) => callback.device_name_changed(self),
                None => debug!("No live discovery callback for {}", self.object_path),
            }
        }
        if let Some(old_address) = changes.old_address {
            self.observers.notify_address_changed(self, &old_address);
        }
        if let Some(paired) = changes.paired {
            self.observers.notify_paired_changed(self, paired);
        }
        if let Some(connected) = changes.connected {
            self.observers.notify_connected_changed(self, connected);
        }
    }

    /// Update cached fields silently, used when (re)discovered
    pub(crate) fn refresh_properties(&self, properties: &PropertyMap) {
        self.apply_properties(properties);
    }

    fn apply_properties(&self, changed: &PropertyMap) -> ChangeSet {
        let mut identity = self.identity.write();
        let mut changes = ChangeSet::default();

        for (key, value) in changed {
            match key.as_str() {
                property::NAME => {
                    if let Some(name) = value.as_str() {
                        changes.name_changed |= identity.name != name;
                        identity.name = name.to_string();
                    }
                }
                property::ALIAS => {
                    if let Some(alias) = value.as_str() {
                        changes.name_changed |= identity.alias != alias;
                        identity.alias = alias.to_string();
                    }
                }
                property::ADDRESS => {
                    if let Some(address) = value.as_str() {
                        if identity.address != address {
                            let old = std::mem::replace(&mut identity.address, address.to_string());
                            changes.old_address = Some(old);
                        }
                    }
                }
                property::PAIRED => {
                    if let Some(paired) = value.as_bool() {
                        if identity.paired != paired {
                            identity.paired = paired;
                            changes.paired = Some(paired);
                        }
                    }
                }
                property::CONNECTED => {
                    if let Some(connected) = value.as_bool() {
                        if identity.connected != connected {
                            identity.connected = connected;
                            changes.connected = Some(connected);
                        }
                    }
                }
                property::RSSI => identity.rssi = value.as_i16(),
                _ => {}
            }
        }
        changes
    }
}

impl fmt::Debug for RadioDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RadioDevice")
            .field("unique_id", &self.unique_id)
            .field("object_path", &self.object_path)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::observer::DeviceObserver;
    use crate::platform::{LoopbackRadio, PropertyValue};
    use std::sync::atomic::AtomicUsize;

    fn props(entries: &[(&str, PropertyValue)]) -> PropertyMap {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn device_with(radio: Arc<LoopbackRadio>, hub: Arc<DeviceObserverHub>) -> RadioDevice {
        let device = RadioDevice::new(42, "/org/bluez/hci0/dev_42", radio, hub);
        device.refresh_properties(&props(&[
            (property::NAME, PropertyValue::Str("Pixel".into())),
            (property::ADDRESS, PropertyValue::Str("AA:BB:CC:00:00:42".into())),
        ]));
        device
    }

    #[derive(Default)]
    struct NameWatcher {
        renamed: AtomicUsize,
    }

    impl DiscoveryCallback for NameWatcher {
        fn device_name_changed(&self, _device: &RadioDevice) {
            self.renamed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_rename_then_lost_keeps_name() {
        let device = RadioDevice::detached(42, "/dev/42");
        device.refresh_properties(&props(&[(property::NAME, PropertyValue::Str("Pixel".into()))]));
        assert_eq!(device.name(), "Pixel");

        device.on_properties_changed(&props(&[(
            property::NAME,
            PropertyValue::Str("Pixel-7".into()),
        )]));
        assert_eq!(device.name(), "Pixel-7");

        device.mark_lost();
        assert!(device.lost());
        assert_eq!(device.state(), DeviceState::Lost);
        assert_eq!(device.name(), "Pixel-7");

        device.unmark_lost();
        assert_eq!(device.state(), DeviceState::Discovered);
    }

    #[test]
    fn test_alias_preferred_over_name() {
        let device = RadioDevice::detached(1, "/dev/1");
        device.on_properties_changed(&props(&[
            (property::NAME, PropertyValue::Str("raw".into())),
            (property::ALIAS, PropertyValue::Str("Kitchen Speaker".into())),
        ]));
        assert_eq!(device.name(), "Kitchen Speaker");
    }

    #[test]
    fn test_name_change_reaches_live_callback() {
        let device = RadioDevice::detached(1, "/dev/1");
        let watcher = Arc::new(NameWatcher::default());
        let weak = Arc::downgrade(&watcher) as Weak<dyn DiscoveryCallback>;
        device.set_discovery_callback(Some(weak));

        device.on_properties_changed(&props(&[(property::NAME, PropertyValue::Str("A".into()))]));
        // Unchanged value is not a change
        device.on_properties_changed(&props(&[(property::NAME, PropertyValue::Str("A".into()))]));
        assert_eq!(watcher.renamed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dropped_callback_is_skipped() {
        let device = RadioDevice::detached(1, "/dev/1");
        {
            let watcher = Arc::new(NameWatcher::default());
            let weak = Arc::downgrade(&watcher) as Weak<dyn DiscoveryCallback>;
            device.set_discovery_callback(Some(weak));
        }
        assert!(device.discovery_callback().is_none());
        device.on_properties_changed(&props(&[(property::NAME, PropertyValue::Str("B".into()))]));
        assert_eq!(device.name(), "B");
    }

    #[test]
    fn test_observers_see_address_and_pairing_changes() {
        #[derive(Default)]
        struct Recorder {
            events: Mutex<Vec<String>>,
        }
        impl DeviceObserver for Recorder {
            fn device_address_changed(&self, device: &RadioDevice, old: &str) {
                self.events
                    .lock()
                    .push(format!("addr {} -> {}", old, device.mac_address()));
            }
            fn device_paired_changed(&self, _device: &RadioDevice, paired: bool) {
                self.events.lock().push(format!("paired {}", paired));
            }
            fn device_connected_state_changed(&self, _device: &RadioDevice, connected: bool) {
                self.events.lock().push(format!("connected {}", connected));
            }
        }

        let hub = Arc::new(DeviceObserverHub::new());
        let recorder = Arc::new(Recorder::default());
        hub.add_observer(&recorder);
        let device = device_with(Arc::new(LoopbackRadio::new()), hub);

        device.on_properties_changed(&props(&[
            (property::ADDRESS, PropertyValue::Str("11:22:33:44:55:66".into())),
            (property::CONNECTED, PropertyValue::Bool(true)),
            (property::PAIRED, PropertyValue::Bool(true)),
            (property::RSSI, PropertyValue::I16(-48)),
            ("Unknown", PropertyValue::Bool(true)),
        ]));

        assert_eq!(
            *recorder.events.lock(),
            vec![
                "addr AA:BB:CC:00:00:42 -> 11:22:33:44:55:66".to_string(),
                "paired true".to_string(),
                "connected true".to_string(),
            ]
        );
        assert_eq!(device.rssi(), Some(-48));
        assert!(device.is_paired() && device.is_connected());
    }

    #[test]
    fn test_pairing_success_round_trip() {
        let radio = Arc::new(LoopbackRadio::new());
        let device = device_with(radio.clone(), Arc::new(DeviceObserverHub::new()));
        let outcome = Arc::new(Mutex::new(Vec::new()));
        let sink = outcome.clone();

        device
            .request_pairing("a2dp", Box::new(move |r: Result<(), DriverError>| sink.lock().push(r)))
            .expect("pair request");
        assert_eq!(device.state(), DeviceState::PairingInProgress);
        assert_eq!(
            radio.pair_requests(),
            vec![("/org/bluez/hci0/dev_42".to_string(), "a2dp".to_string())]
        );

        // Second request while in flight is refused
        assert!(matches!(
            device.request_pairing("a2dp", Box::new(|_| {})),
            Err(NearbyError::InvalidState(_))
        ));

        device.on_pair_reply(Ok(()));
        device.on_pair_reply(Ok(()));
        assert_eq!(*outcome.lock(), vec![Ok(())]);
        assert_eq!(device.state(), DeviceState::Discovered);
    }

    #[test]
    fn test_pairing_failure_reported_once() {
        let radio = Arc::new(LoopbackRadio::new());
        let device = device_with(radio, Arc::new(DeviceObserverHub::new()));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        device
            .request_pairing(
                "hfp",
                Box::new(move |r: Result<(), DriverError>| {
                    assert!(r.is_err());
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .expect("pair request");
        device.on_pair_reply(Err(DriverError::Rejected("auth failed".into())));
        device.on_pair_reply(Err(DriverError::Rejected("auth failed".into())));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // Caller may retry
        assert!(device.request_pairing("hfp", Box::new(|_| {})).is_ok());
    }

    #[test]
    fn test_sync_driver_failure_clears_slot() {
        let radio = Arc::new(LoopbackRadio::new());
        radio.fail_pairing(true);
        let device = device_with(radio, Arc::new(DeviceObserverHub::new()));

        let result = device.request_pairing("hfp", Box::new(|_| panic!("must not fire")));
        assert!(matches!(result, Err(NearbyError::Driver(_))));
        assert_eq!(device.state(), DeviceState::Discovered);
        device.on_pair_reply(Ok(()));
    }

    #[test]
    fn test_pairing_refused_while_lost_or_removed() {
        let device = RadioDevice::detached(7, "/dev/7");
        device.mark_lost();
        assert!(matches!(
            device.request_pairing("x", Box::new(|_| {})),
            Err(NearbyError::InvalidState(_))
        ));

        device.unmark_lost();
        device.mark_removed();
        assert_eq!(device.state(), DeviceState::Removed);
        assert!(device.request_pairing("x", Box::new(|_| {})).is_err());
    }
}
