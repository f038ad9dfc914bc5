// Integration test: device discovery, observers and pairing
//
// Drives a ClassicMedium from the loopback radio's device event stream and
// checks what discovery subscribers and observers see.

use futures::StreamExt;
use nearcast_core::device::{
    property, ClassicMedium, DeviceObserver, DeviceObserverHub, DeviceState, DiscoveryCallback,
    RadioDevice,
};
use nearcast_core::platform::{DeviceEvent, LoopbackRadio, PropertyMap, PropertyValue};
use nearcast_core::{DriverError, NearbyError};
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
}

impl Recorder {
    fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }
}

impl DiscoveryCallback for Recorder {
    fn device_discovered(&self, device: &RadioDevice) {
        self.events.lock().push(format!("discovered {}", device.name()));
    }

    fn device_name_changed(&self, device: &RadioDevice) {
        self.events.lock().push(format!("renamed {}", device.name()));
    }

    fn device_lost(&self, device: &RadioDevice) {
        self.events.lock().push(format!("lost {}", device.name()));
    }
}

impl DeviceObserver for Recorder {
    fn device_added(&self, device: &RadioDevice) {
        self.events.lock().push(format!("added {}", device.unique_id()));
    }

    fn device_removed(&self, device: &RadioDevice) {
        self.events.lock().push(format!("removed {}", device.unique_id()));
    }

    fn device_paired_changed(&self, _device: &RadioDevice, paired: bool) {
        self.events.lock().push(format!("paired {}", paired));
    }
}

fn props(entries: &[(&str, PropertyValue)]) -> PropertyMap {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn discovered(path: &str, name: &str, address: &str) -> DeviceEvent {
    DeviceEvent::Discovered {
        object_path: path.to_string(),
        properties: props(&[
            (property::NAME, PropertyValue::Str(name.to_string())),
            (property::ADDRESS, PropertyValue::Str(address.to_string())),
        ]),
    }
}

#[test]
fn test_rename_then_lost_keeps_name() {
    let radio = Arc::new(LoopbackRadio::new());
    let device = RadioDevice::new(
        42,
        "/org/bluez/hci0/dev_42",
        radio.clone(),
        Arc::new(DeviceObserverHub::new()),
    );
    device.on_properties_changed(&props(&[(
        property::NAME,
        PropertyValue::Str("Pixel".to_string()),
    )]));
    device.on_properties_changed(&props(&[(
        property::NAME,
        PropertyValue::Str("Pixel-7".to_string()),
    )]));
    assert_eq!(device.name(), "Pixel-7");

    device.mark_lost();
    assert!(device.lost());
    assert_eq!(device.name(), "Pixel-7");
    assert_eq!(device.unique_id(), 42);
    println!("✓ Lost device 42 still answers name queries");
}

#[tokio::test]
async fn test_discovery_stream_end_to_end() {
    tracing_subscriber::fmt()
        .with_env_filter("debug")
        .try_init()
        .ok();

    let radio = Arc::new(LoopbackRadio::new());
    let medium = ClassicMedium::new(radio.clone());
    let subscriber = Arc::new(Recorder::default());
    let observer = Arc::new(Recorder::default());
    medium.observers().add_observer(&observer);
    medium.start_discovery(&subscriber).expect("discovery");
    assert!(radio.is_discovering());

    let events = radio.device_events();
    radio.emit_device_event(discovered("/dev/a", "Pixel", "AA:AA:AA:AA:AA:01"));
    radio.emit_device_event(DeviceEvent::PropertiesChanged {
        object_path: "/dev/a".to_string(),
        changed: props(&[(property::ALIAS, PropertyValue::Str("Pixel-7".to_string()))]),
    });
    radio.emit_device_event(DeviceEvent::Lost {
        object_path: "/dev/a".to_string(),
    });
    medium.run(events.take(3)).await;

    assert_eq!(
        subscriber.events(),
        vec!["discovered Pixel", "renamed Pixel-7", "lost Pixel-7"]
    );
    assert_eq!(observer.events(), vec!["added 1"]);

    let device = medium.device_by_mac("aa:aa:aa:aa:aa:01").expect("device");
    assert_eq!(device.state(), DeviceState::Lost);
    assert!(medium.visible_devices().is_empty());
    assert_eq!(medium.devices().len(), 1);
}

#[test]
fn test_dropped_subscriber_is_skipped() {
    let radio = Arc::new(LoopbackRadio::new());
    let medium = ClassicMedium::new(radio.clone());
    let subscriber = Arc::new(Recorder::default());
    medium.start_discovery(&subscriber).expect("discovery");
    medium.handle_event(discovered("/dev/a", "Pixel", "AA:AA:AA:AA:AA:01"));
    drop(subscriber);

    let device = medium.device("/dev/a").expect("device");
    device.on_properties_changed(&props(&[(
        property::NAME,
        PropertyValue::Str("Pixel-7".to_string()),
    )]));
    assert!(device.discovery_callback().is_none());
    assert_eq!(device.name(), "Pixel-7");
}

#[test]
fn test_pairing_round_trip() {
    let radio = Arc::new(LoopbackRadio::new());
    let medium = ClassicMedium::new(radio.clone());
    let observer = Arc::new(Recorder::default());
    medium.observers().add_observer(&observer);
    medium.handle_event(discovered("/dev/b", "Headset", "BB:BB:BB:BB:BB:02"));
    let device = medium.device("/dev/b").expect("device");

    let replies = Arc::new(Mutex::new(Vec::new()));
    let sink = replies.clone();
    device
        .request_pairing(
            "audio",
            Box::new(move |result: Result<(), DriverError>| sink.lock().push(result)),
        )
        .expect("pair");
    assert_eq!(device.state(), DeviceState::PairingInProgress);
    assert_eq!(
        radio.pair_requests(),
        vec![("/dev/b".to_string(), "audio".to_string())]
    );

    // a second request while one is in flight is refused
    let second = device.request_pairing("audio", Box::new(|_: Result<(), DriverError>| {}));
    assert!(matches!(second, Err(NearbyError::InvalidState(_))));

    medium.handle_event(DeviceEvent::PairReply {
        object_path: "/dev/b".to_string(),
        result: Err(DriverError::Rejected("user declined".to_string())),
    });
    medium.handle_event(DeviceEvent::PairReply {
        object_path: "/dev/b".to_string(),
        result: Ok(()),
    });

    assert_eq!(
        *replies.lock(),
        vec![Err(DriverError::Rejected("user declined".to_string()))]
    );
    assert_eq!(device.state(), DeviceState::Discovered);

    medium.handle_event(DeviceEvent::PropertiesChanged {
        object_path: "/dev/b".to_string(),
        changed: props(&[(property::PAIRED, PropertyValue::Bool(true))]),
    });
    assert!(device.is_paired());
    assert_eq!(observer.events(), vec!["added 1", "paired true"]);
}

#[test]
fn test_removed_device_leaves_registry() {
    let radio = Arc::new(LoopbackRadio::new());
    let medium = ClassicMedium::new(radio.clone());
    let observer = Arc::new(Recorder::default());
    medium.observers().add_observer(&observer);
    medium.handle_event(discovered("/dev/c", "Watch", "CC:CC:CC:CC:CC:03"));
    let held = medium.device("/dev/c").expect("device");

    medium.handle_event(DeviceEvent::Removed {
        object_path: "/dev/c".to_string(),
    });

    assert!(medium.device("/dev/c").is_none());
    assert_eq!(held.state(), DeviceState::Removed);
    assert_eq!(held.name(), "Watch");
    assert_eq!(observer.events(), vec!["added 1", "removed 1"]);
}
