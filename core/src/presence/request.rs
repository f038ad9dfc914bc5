//! Broadcast and scan requests issued by the application.

use crate::platform::{AdvertisingParams, BroadcastStatus, MediumKind, ScanEvent, ScanFilter};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Receives status updates for one broadcast session
pub type BroadcastCallback = Arc<dyn Fn(BroadcastStatus) + Send + Sync>;

/// Receives events for one scan session
pub type ScanCallback = Arc<dyn Fn(ScanEvent) + Send + Sync>;

/// Which identity a broadcast is made under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdentityKind {
    /// Visible to the user's own devices only
    Private,
    /// Visible to contacts
    Trusted,
    /// Visible to everyone
    Public,
    /// Pre-shared with a specific peer
    Provisioned,
}

/// Default advertising power, in dBm
pub const DEFAULT_TX_POWER: i8 = -10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastRequest {
    pub identity: IdentityKind,
    /// Opaque advertisement content (actions, data elements)
    pub payload: Vec<u8>,
    pub tx_power: i8,
    pub medium: MediumKind,
    pub account_name: Option<String>,
}

impl BroadcastRequest {
    /// BLE broadcast at default power
    pub fn new(identity: IdentityKind, payload: Vec<u8>) -> Self {
        Self {
            identity,
            payload,
            tx_power: DEFAULT_TX_POWER,
            medium: MediumKind::Ble,
            account_name: None,
        }
    }

    pub fn with_medium(mut self, medium: MediumKind) -> Self {
        self.medium = medium;
        self
    }

    pub fn with_tx_power(mut self, tx_power: i8) -> Self {
        self.tx_power = tx_power;
        self
    }

    pub fn with_account(mut self, account_name: impl Into<String>) -> Self {
        self.account_name = Some(account_name.into());
        self
    }

    pub(crate) fn advertising_params(&self) -> AdvertisingParams {
        AdvertisingParams {
            tx_power: self.tx_power,
            payload: self.payload.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PowerMode {
    LowPower,
    #[default]
    Balanced,
    LowLatency,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRequest {
    pub identities: Vec<IdentityKind>,
    /// Service ids to report; empty reports everything
    pub service_ids: Vec<String>,
    pub power_mode: PowerMode,
    /// Specific medium, or `None` to pick BLE first then Classic
    pub medium: Option<MediumKind>,
}

impl ScanRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_service_id(mut self, service_id: impl Into<String>) -> Self {
        self.service_ids.push(service_id.into());
        self
    }

    pub fn with_medium(mut self, medium: MediumKind) -> Self {
        self.medium = Some(medium);
        self
    }

    pub fn with_power_mode(mut self, power_mode: PowerMode) -> Self {
        self.power_mode = power_mode;
        self
    }

    pub(crate) fn filter(&self) -> ScanFilter {
        ScanFilter {
            service_ids: self.service_ids.clone(),
            low_power: self.power_mode == PowerMode::LowPower,
        }
    }

    /// Mediums to try, in order
    pub(crate) fn candidate_mediums(&self) -> Vec<MediumKind> {
        match self.medium {
            Some(medium) => vec![medium],
            None => vec![MediumKind::Ble, MediumKind::BluetoothClassic],
        }
    }
}
