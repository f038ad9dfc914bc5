// Nearcast Core: nearby presence and connection plumbing
//
// Byte channels per remote endpoint, discovered radio devices with weak
// observers, and a session controller for broadcasts and scans. Radio
// drivers, credentials and host metadata are injected.

pub mod config;
pub mod connection;
pub mod device;
pub mod error;
pub mod platform;
pub mod presence;

use parking_lot::RwLock;
use std::sync::Arc;

pub use config::{ChannelConfig, ConfigError, NearcastConfig, PresenceConfig};
pub use connection::{ByteChannel, ConnectionRegistry};
pub use device::{ClassicMedium, DeviceObserver, DeviceObserverHub, DiscoveryCallback, RadioDevice};
pub use error::{DriverError, NearbyError};
pub use platform::{
    BroadcastStatus, ChannelTransport, DeviceInfo, HostDeviceInfo, LoopbackRadio, MediumKind,
    RadioDriver, RadioMedium, ScanEvent,
};
pub use presence::{
    BroadcastRequest, BroadcastSessionId, CredentialManager, CredentialProvider, IdentityKind,
    Mediums, ScanRequest, ScanSession, SessionController,
};

// ============================================================================
// DRIVERS
// ============================================================================

/// Platform collaborators handed to [`NearbyCore`]
#[derive(Clone)]
pub struct Drivers {
    pub radio: Arc<dyn RadioDriver>,
    pub transport: Arc<dyn ChannelTransport>,
    pub mediums: Mediums,
    pub credentials: Arc<dyn CredentialProvider>,
}

impl Drivers {
    /// Every collaborator backed by one in-memory radio, with both mediums
    pub fn loopback(radio: &LoopbackRadio) -> Self {
        let shared = Arc::new(radio.clone());
        Self {
            radio: shared.clone(),
            transport: shared,
            mediums: Mediums::new()
                .with(radio.medium(MediumKind::Ble))
                .with(radio.medium(MediumKind::BluetoothClassic)),
            credentials: Arc::new(CredentialManager::new()),
        }
    }
}

// ============================================================================
// NEARBY CORE
// ============================================================================

/// Wires the components together and owns their lifecycle
#[derive(Clone)]
pub struct NearbyCore {
    config: NearcastConfig,
    channels: Arc<ConnectionRegistry>,
    devices: Arc<ClassicMedium>,
    sessions: Arc<SessionController>,
    running: Arc<RwLock<bool>>,
}

impl NearbyCore {
    pub fn new(config: NearcastConfig, drivers: Drivers) -> Self {
        Self {
            channels: Arc::new(ConnectionRegistry::new(
                drivers.transport,
                config.channel.clone(),
            )),
            devices: Arc::new(ClassicMedium::new(drivers.radio)),
            sessions: Arc::new(SessionController::new(
                Arc::new(drivers.mediums),
                drivers.credentials,
                config.presence.clone(),
            )),
            config,
            running: Arc::new(RwLock::new(false)),
        }
    }

    pub fn config(&self) -> &NearcastConfig {
        &self.config
    }

    pub fn channels(&self) -> &Arc<ConnectionRegistry> {
        &self.channels
    }

    pub fn devices(&self) -> &Arc<ClassicMedium> {
        &self.devices
    }

    pub fn sessions(&self) -> &Arc<SessionController> {
        &self.sessions
    }

    pub fn start(&self) -> Result<(), NearbyError> {
        let mut running = self.running.write();
        if *running {
            return Err(NearbyError::InvalidState("already running".to_string()));
        }
        *running = true;
        tracing::info!("{} core started", self.config.app_name);
        Ok(())
    }

    /// Stop broadcasts and discovery, then close every channel. The running
    /// flag is cleared first and no lock is held while callbacks run.
    pub fn stop(&self) {
        {
            let mut running = self.running.write();
            if !*running {
                return;
            }
            *running = false;
        }

        tracing::info!("{} core stopping...", self.config.app_name);
        self.sessions.shutdown();
        if self.devices.is_discovering() {
            if let Err(e) = self.devices.stop_discovery() {
                tracing::warn!("Stopping discovery failed: {}", e);
            }
        }
        self.channels.close_all();
        tracing::info!("{} core stopped", self.config.app_name);
    }

    pub fn is_running(&self) -> bool {
        *self.running.read()
    }
}
