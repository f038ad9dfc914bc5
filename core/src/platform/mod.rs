//! Platform collaborators: radio driver traits, host metadata and the
//! in-memory loopback radio.

pub mod device_info;
pub mod driver;
pub mod loopback;

pub use device_info::{DeviceInfo, DeviceType, HostDeviceInfo, ScreenLockMonitor, ScreenStatus};
pub use driver::{
    AdvertisingParams, AdvertisingSession, BroadcastStatus, ChannelTransport, ConnectionEvent,
    DeviceEvent, MediumKind, PropertyMap, PropertyValue, RadioDriver, RadioMedium, ScanEvent,
    ScanFilter, ScanResult, ScanningSession, StatusSink,
};
pub use loopback::LoopbackRadio;
