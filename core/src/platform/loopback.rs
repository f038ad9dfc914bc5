//! In-memory radio implementing every driver trait.
//!
//! Nothing leaves the process: writes are recorded (and optionally echoed
//! back as inbound bytes), advertising and scanning sessions are tracked in
//! tables, and device/connection events are pushed by the host through
//! [`LoopbackRadio::emit_device_event`] and friends. Used by the CLI demo
//! and throughout the tests.
//!
//! Advertiser and scanner records are never pruned: stopped sessions stay
//! in the tables (marked inactive) so late status can still be reported by
//! index. Memory grows with every session started, so a radio should not
//! outlive a short-lived demo or test.

use super::driver::{
    AdvertisingParams, AdvertisingSession, BroadcastStatus, ChannelTransport, ConnectionEvent,
    DeviceEvent, MediumKind, RadioDriver, RadioMedium, ScanEvent, ScanFilter, ScanResult,
    ScanningSession, StatusSink,
};
use crate::error::DriverError;
use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

struct Advertiser {
    medium: MediumKind,
    params: AdvertisingParams,
    sink: StatusSink<BroadcastStatus>,
    active: Arc<AtomicBool>,
}

struct Scanner {
    medium: MediumKind,
    filter: ScanFilter,
    sink: StatusSink<ScanEvent>,
    active: Arc<AtomicBool>,
}

#[derive(Default)]
struct Shared {
    sent: Mutex<Vec<(String, Vec<u8>)>>,
    disconnected: Mutex<Vec<String>>,
    pair_requests: Mutex<Vec<(String, String)>>,

    fail_sends: AtomicBool,
    fail_pairing: AtomicBool,
    fail_advertising: AtomicBool,
    fail_scanning: AtomicBool,
    echo: AtomicBool,
    discovering: AtomicBool,

    // Append-only; indexed by start order
    advertisers: Mutex<Vec<Advertiser>>,
    scanners: Mutex<Vec<Scanner>>,

    device_subscribers: Mutex<Vec<UnboundedSender<DeviceEvent>>>,
    connection_subscribers: Mutex<Vec<UnboundedSender<ConnectionEvent>>>,
}

impl Shared {
    fn publish_connection(&self, event: ConnectionEvent) {
        self.connection_subscribers
            .lock()
            .retain(|tx| tx.unbounded_send(event.clone()).is_ok());
    }
}

/// Loopback radio adapter
#[derive(Clone, Default)]
pub struct LoopbackRadio {
    shared: Arc<Shared>,
}

impl LoopbackRadio {
    pub fn new() -> Self {
        Self::default()
    }

    /// Medium accessor for the presence layer
    pub fn medium(&self, kind: MediumKind) -> Arc<dyn RadioMedium> {
        Arc::new(LoopbackMedium {
            kind,
            shared: self.shared.clone(),
        })
    }

    /// Stream of device events pushed with [`emit_device_event`](Self::emit_device_event)
    pub fn device_events(&self) -> UnboundedReceiver<DeviceEvent> {
        let (tx, rx) = unbounded();
        self.shared.device_subscribers.lock().push(tx);
        rx
    }

    /// Stream of inbound bytes and disconnects
    pub fn connection_events(&self) -> UnboundedReceiver<ConnectionEvent> {
        let (tx, rx) = unbounded();
        self.shared.connection_subscribers.lock().push(tx);
        rx
    }

    pub fn emit_device_event(&self, event: DeviceEvent) {
        self.shared
            .device_subscribers
            .lock()
            .retain(|tx| tx.unbounded_send(event.clone()).is_ok());
    }

    /// Answer the pending pairing request for `object_path`
    pub fn complete_pairing(&self, object_path: &str, result: Result<(), DriverError>) {
        self.emit_device_event(DeviceEvent::PairReply {
            object_path: object_path.to_string(),
            result,
        });
    }

    pub fn deliver_bytes(&self, endpoint_id: &str, bytes: Vec<u8>) {
        self.shared.publish_connection(ConnectionEvent::BytesReceived {
            endpoint_id: endpoint_id.to_string(),
            bytes,
        });
    }

    pub fn drop_endpoint(&self, endpoint_id: &str) {
        self.shared.publish_connection(ConnectionEvent::Disconnected {
            endpoint_id: endpoint_id.to_string(),
        });
    }

    /// Echo every write back to the same endpoint as inbound bytes
    pub fn set_echo(&self, echo: bool) {
        self.shared.echo.store(echo, Ordering::SeqCst);
    }

    pub fn fail_sends(&self, fail: bool) {
        self.shared.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn fail_pairing(&self, fail: bool) {
        self.shared.fail_pairing.store(fail, Ordering::SeqCst);
    }

    pub fn fail_advertising(&self, fail: bool) {
        self.shared.fail_advertising.store(fail, Ordering::SeqCst);
    }

    pub fn fail_scanning(&self, fail: bool) {
        self.shared.fail_scanning.store(fail, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<(String, Vec<u8>)> {
        self.shared.sent.lock().clone()
    }

    pub fn disconnected(&self) -> Vec<String> {
        self.shared.disconnected.lock().clone()
    }

    pub fn pair_requests(&self) -> Vec<(String, String)> {
        self.shared.pair_requests.lock().clone()
    }

    pub fn is_discovering(&self) -> bool {
        self.shared.discovering.load(Ordering::SeqCst)
    }

    /// Advertisements the driver still runs
    pub fn active_advertisements(&self) -> usize {
        self.shared
            .advertisers
            .lock()
            .iter()
            .filter(|a| a.active.load(Ordering::SeqCst))
            .count()
    }

    /// Payloads of running advertisements on `medium`
    pub fn advertised_payloads(&self, medium: MediumKind) -> Vec<Vec<u8>> {
        self.shared
            .advertisers
            .lock()
            .iter()
            .filter(|a| a.medium == medium && a.active.load(Ordering::SeqCst))
            .map(|a| a.params.payload.clone())
            .collect()
    }

    pub fn active_scans(&self) -> usize {
        self.shared
            .scanners
            .lock()
            .iter()
            .filter(|s| s.active.load(Ordering::SeqCst))
            .count()
    }

    /// Report `status` for the `index`-th advertisement ever started, whether
    /// or not it has been stopped. Models a driver reporting late.
    pub fn report_advertising_status(&self, index: usize, status: BroadcastStatus) {
        let sink = self.shared.advertisers.lock().get(index).map(|a| a.sink.clone());
        if let Some(sink) = sink {
            sink(status);
        }
    }

    /// Same as [`report_advertising_status`](Self::report_advertising_status) for scans
    pub fn report_scan_event(&self, index: usize, event: ScanEvent) {
        let sink = self.shared.scanners.lock().get(index).map(|s| s.sink.clone());
        if let Some(sink) = sink {
            sink(event);
        }
    }

    /// Deliver `result` to every running scan on its medium whose filter matches
    pub fn emit_scan_result(&self, result: ScanResult) {
        let sinks: Vec<StatusSink<ScanEvent>> = self
            .shared
            .scanners
            .lock()
            .iter()
            .filter(|s| {
                s.active.load(Ordering::SeqCst)
                    && s.medium == result.medium
                    && s.filter.matches(&result)
            })
            .map(|s| s.sink.clone())
            .collect();
        for sink in sinks {
            sink(ScanEvent::Found(result.clone()));
        }
    }
}

impl RadioDriver for LoopbackRadio {
    fn start_discovery(&self) -> Result<(), DriverError> {
        self.shared.discovering.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop_discovery(&self) -> Result<(), DriverError> {
        self.shared.discovering.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn pair(&self, object_path: &str, service_id: &str) -> Result<(), DriverError> {
        if self.shared.fail_pairing.load(Ordering::SeqCst) {
            return Err(DriverError::Rejected(format!(
                "pairing with {} refused",
                object_path
            )));
        }
        self.shared
            .pair_requests
            .lock()
            .push((object_path.to_string(), service_id.to_string()));
        Ok(())
    }
}

impl ChannelTransport for LoopbackRadio {
    fn send_bytes(&self, endpoint_id: &str, bytes: &[u8]) -> Result<(), DriverError> {
        if self.shared.fail_sends.load(Ordering::SeqCst) {
            return Err(DriverError::System("loopback send failure".to_string()));
        }
        self.shared
            .sent
            .lock()
            .push((endpoint_id.to_string(), bytes.to_vec()));
        if self.shared.echo.load(Ordering::SeqCst) {
            self.deliver_bytes(endpoint_id, bytes.to_vec());
        }
        Ok(())
    }

    fn disconnect(&self, endpoint_id: &str) -> Result<(), DriverError> {
        self.shared
            .disconnected
            .lock()
            .push(endpoint_id.to_string());
        Ok(())
    }
}

struct LoopbackMedium {
    kind: MediumKind,
    shared: Arc<Shared>,
}

struct LoopbackSession {
    active: Arc<AtomicBool>,
}

impl LoopbackSession {
    fn halt(&mut self) -> Result<(), DriverError> {
        if !self.active.swap(false, Ordering::SeqCst) {
            return Err(DriverError::Rejected("session already stopped".to_string()));
        }
        Ok(())
    }
}

impl AdvertisingSession for LoopbackSession {
    fn stop(&mut self) -> Result<(), DriverError> {
        self.halt()
    }
}

impl ScanningSession for LoopbackSession {
    fn stop(&mut self) -> Result<(), DriverError> {
        self.halt()
    }
}

impl RadioMedium for LoopbackMedium {
    fn kind(&self) -> MediumKind {
        self.kind
    }

    fn start_advertising(
        &self,
        params: &AdvertisingParams,
        status: StatusSink<BroadcastStatus>,
    ) -> Result<Box<dyn AdvertisingSession>, DriverError> {
        if self.shared.fail_advertising.load(Ordering::SeqCst) {
            return Err(DriverError::Rejected("no advertising slot".to_string()));
        }
        let active = Arc::new(AtomicBool::new(true));
        self.shared.advertisers.lock().push(Advertiser {
            medium: self.kind,
            params: params.clone(),
            sink: status.clone(),
            active: active.clone(),
        });
        debug!("Loopback advertising on {}", self.kind);
        status(BroadcastStatus::Started);
        Ok(Box::new(LoopbackSession { active }))
    }

    fn start_scanning(
        &self,
        filter: &ScanFilter,
        events: StatusSink<ScanEvent>,
    ) -> Result<Box<dyn ScanningSession>, DriverError> {
        if self.shared.fail_scanning.load(Ordering::SeqCst) {
            return Err(DriverError::NotSupported("scanning disabled".to_string()));
        }
        let active = Arc::new(AtomicBool::new(true));
        self.shared.scanners.lock().push(Scanner {
            medium: self.kind,
            filter: filter.clone(),
            sink: events.clone(),
            active: active.clone(),
        });
        debug!("Loopback scanning on {}", self.kind);
        events(ScanEvent::Started);
        Ok(Box::new(LoopbackSession { active }))
    }
}
