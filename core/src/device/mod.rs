//! Discovered radio devices, their observers and the per-adapter registry.

pub mod medium;
pub mod observer;
pub mod radio_device;

pub use medium::ClassicMedium;
pub use observer::{DeviceObserver, DeviceObserverHub, DiscoveryCallback, ObserverId};
pub use radio_device::{
    property, DeviceIdentity, DeviceState, PairReplyCallback, RadioDevice,
};
