//! Shared registry of radio medium accessors.

use crate::platform::{MediumKind, RadioMedium};
use std::sync::Arc;
use tracing::info;

/// Long-lived medium handles, built once and shared by every session
#[derive(Default, Clone)]
pub struct Mediums {
    ble: Option<Arc<dyn RadioMedium>>,
    classic: Option<Arc<dyn RadioMedium>>,
}

impl Mediums {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `medium` in the slot matching its kind, replacing any previous one
    pub fn with(mut self, medium: Arc<dyn RadioMedium>) -> Self {
        let kind = medium.kind();
        match kind {
            MediumKind::Ble => self.ble = Some(medium),
            MediumKind::BluetoothClassic => self.classic = Some(medium),
        }
        info!("Medium registered: {}", kind);
        self
    }

    pub fn get(&self, kind: MediumKind) -> Option<Arc<dyn RadioMedium>> {
        match kind {
            MediumKind::Ble => self.ble.clone(),
            MediumKind::BluetoothClassic => self.classic.clone(),
        }
    }

    pub fn is_available(&self, kind: MediumKind) -> bool {
        self.get(kind).is_some()
    }

    pub fn available(&self) -> Vec<MediumKind> {
        [MediumKind::Ble, MediumKind::BluetoothClassic]
            .into_iter()
            .filter(|k| self.is_available(*k))
            .collect()
    }
}
