//! Radio driver interfaces consumed by the core.
//!
//! The core never talks to an adapter directly. A platform binding (BlueZ,
//! WinRT, Android, or the in-memory [`LoopbackRadio`](super::LoopbackRadio))
//! implements these traits and feeds events back as plain values.

use crate::error::DriverError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Radio technology a session or device lives on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediumKind {
    /// Bluetooth Low Energy
    Ble,
    /// Bluetooth Classic (BR/EDR)
    BluetoothClassic,
}

impl fmt::Display for MediumKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediumKind::Ble => write!(f, "BLE"),
            MediumKind::BluetoothClassic => write!(f, "BluetoothClassic"),
        }
    }
}

/// Value of a single device property as reported by the driver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    Str(String),
    Bool(bool),
    I16(i16),
}

impl PropertyValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i16(&self) -> Option<i16> {
        match self {
            PropertyValue::I16(v) => Some(*v),
            _ => None,
        }
    }
}

/// Changed properties keyed by driver property name (`Name`, `Address`, ...)
pub type PropertyMap = BTreeMap<String, PropertyValue>;

/// Events delivered by the discovery side of a driver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DeviceEvent {
    /// A device became visible (first time or again after being lost)
    Discovered {
        object_path: String,
        properties: PropertyMap,
    },
    /// The device is no longer visible but the driver still tracks it
    Lost { object_path: String },
    /// Cached attributes changed
    PropertiesChanged {
        object_path: String,
        changed: PropertyMap,
    },
    /// Reply to an earlier [`RadioDriver::pair`] request
    PairReply {
        object_path: String,
        result: Result<(), DriverError>,
    },
    /// The underlying radio object is gone for good
    Removed { object_path: String },
}

impl DeviceEvent {
    pub fn object_path(&self) -> &str {
        match self {
            DeviceEvent::Discovered { object_path, .. }
            | DeviceEvent::Lost { object_path }
            | DeviceEvent::PropertiesChanged { object_path, .. }
            | DeviceEvent::PairReply { object_path, .. }
            | DeviceEvent::Removed { object_path } => object_path,
        }
    }
}

/// Events delivered by the connection side of a driver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConnectionEvent {
    BytesReceived { endpoint_id: String, bytes: Vec<u8> },
    Disconnected { endpoint_id: String },
}

/// Discovery and pairing against one adapter
pub trait RadioDriver: Send + Sync {
    fn start_discovery(&self) -> Result<(), DriverError>;

    fn stop_discovery(&self) -> Result<(), DriverError>;

    /// Issue a pair/connect request. Must not block on the round-trip; the
    /// outcome arrives later as [`DeviceEvent::PairReply`].
    fn pair(&self, object_path: &str, service_id: &str) -> Result<(), DriverError>;
}

/// Outbound half of a logical connection
pub trait ChannelTransport: Send + Sync {
    /// Hand bytes to the radio. Returns once queued, not once acknowledged.
    fn send_bytes(&self, endpoint_id: &str, bytes: &[u8]) -> Result<(), DriverError>;

    fn disconnect(&self, endpoint_id: &str) -> Result<(), DriverError>;
}

/// Status updates for an advertising session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BroadcastStatus {
    Started,
    Failed(DriverError),
    Stopped,
}

/// A peer seen by a scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanResult {
    pub medium: MediumKind,
    pub address: String,
    pub rssi: i16,
    pub service_id: String,
    pub payload: Vec<u8>,
}

/// Events for a scanning session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanEvent {
    Started,
    Found(ScanResult),
    Lost(ScanResult),
    Failed(DriverError),
}

/// Parameters handed to the medium when advertising
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvertisingParams {
    pub tx_power: i8,
    pub payload: Vec<u8>,
}

/// Which advertisements a scan reports
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanFilter {
    /// Service ids to report; empty reports everything
    pub service_ids: Vec<String>,
    pub low_power: bool,
}

impl ScanFilter {
    pub fn matches(&self, result: &ScanResult) -> bool {
        self.service_ids.is_empty() || self.service_ids.iter().any(|s| *s == result.service_id)
    }
}

/// Callback a medium uses to report session status. May be invoked from any
/// thread, including after the session has been stopped.
pub type StatusSink<T> = Arc<dyn Fn(T) + Send + Sync>;

/// Live driver-side advertising state; stopping releases the radio slot
pub trait AdvertisingSession: Send {
    fn stop(&mut self) -> Result<(), DriverError>;
}

/// Live driver-side scanning state
pub trait ScanningSession: Send {
    fn stop(&mut self) -> Result<(), DriverError>;
}

/// Uniform controller-facing capability interface of a radio medium
pub trait RadioMedium: Send + Sync {
    fn kind(&self) -> MediumKind;

    fn start_advertising(
        &self,
        params: &AdvertisingParams,
        status: StatusSink<BroadcastStatus>,
    ) -> Result<Box<dyn AdvertisingSession>, DriverError>;

    fn start_scanning(
        &self,
        filter: &ScanFilter,
        events: StatusSink<ScanEvent>,
    ) -> Result<Box<dyn ScanningSession>, DriverError>;
}
