//! Broadcast and scan session controller.

use super::credential::CredentialProvider;
use super::mediums::Mediums;
use super::request::{BroadcastCallback, BroadcastRequest, ScanCallback, ScanRequest};
use super::session::{LiveSession, MediumSession, ScanSession, ScanSessionId, SessionGate};
use crate::config::PresenceConfig;
use crate::error::NearbyError;
use crate::platform::{BroadcastStatus, MediumKind};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Identifier of a broadcast session, unique among live and starting sessions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BroadcastSessionId(pub u64);

impl fmt::Display for BroadcastSessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

enum SessionSlot {
    /// Id reserved while the medium starts advertising
    Pending {
        gate: Arc<SessionGate<BroadcastStatus>>,
        cancelled: bool,
    },
    Live(LiveSession<BroadcastStatus>),
}

impl SessionSlot {
    /// Take the slot for stopping. A starting session stays reserved and is
    /// marked cancelled; its gate is returned so the stop can close it.
    fn take_for_stop(
        sessions: &mut HashMap<BroadcastSessionId, SessionSlot>,
        id: BroadcastSessionId,
    ) -> Option<Stopping> {
        match sessions.remove(&id)? {
            SessionSlot::Live(session) => Some(Stopping::Live(session)),
            SessionSlot::Pending { gate, .. } => {
                sessions.insert(
                    id,
                    SessionSlot::Pending {
                        gate: gate.clone(),
                        cancelled: true,
                    },
                );
                Some(Stopping::Starting(gate))
            }
        }
    }
}

enum Stopping {
    Live(LiveSession<BroadcastStatus>),
    Starting(Arc<SessionGate<BroadcastStatus>>),
}

impl Stopping {
    fn finish(self, id: BroadcastSessionId) {
        match self {
            Stopping::Live(mut session) => {
                if let Err(e) = session.stop(Some(BroadcastStatus::Stopped)) {
                    warn!("Stopping broadcast {} failed: {}", id, e);
                }
            }
            Stopping::Starting(gate) => {
                gate.close_with(BroadcastStatus::Stopped);
                debug!("Broadcast {} cancelled while starting", id);
            }
        }
    }
}

type IdSource = Box<dyn FnMut() -> u64 + Send>;

/// Allocates, tracks and tears down presence sessions.
///
/// Broadcasts are owned by the controller and addressed by id. Scans are
/// owned by the caller through [`ScanSession`].
pub struct SessionController {
    mediums: Arc<Mediums>,
    credentials: Arc<dyn CredentialProvider>,
    config: PresenceConfig,
    sessions: Mutex<HashMap<BroadcastSessionId, SessionSlot>>,
    id_source: Mutex<IdSource>,
    next_scan_id: AtomicU64,
}

impl SessionController {
    pub fn new(
        mediums: Arc<Mediums>,
        credentials: Arc<dyn CredentialProvider>,
        config: PresenceConfig,
    ) -> Self {
        let mut rng = StdRng::from_entropy();
        Self {
            mediums,
            credentials,
            config,
            sessions: Mutex::new(HashMap::new()),
            id_source: Mutex::new(Box::new(move || rng.gen::<u64>())),
            next_scan_id: AtomicU64::new(1),
        }
    }

    /// Replace the random id generator
    pub fn with_id_source(self, source: impl FnMut() -> u64 + Send + 'static) -> Self {
        *self.id_source.lock() = Box::new(source);
        self
    }

    pub fn mediums(&self) -> &Arc<Mediums> {
        &self.mediums
    }

    /// Start advertising `request`. `callback` receives the session's status
    /// until it is stopped.
    pub fn start_broadcast(
        &self,
        request: &BroadcastRequest,
        callback: BroadcastCallback,
    ) -> Result<BroadcastSessionId, NearbyError> {
        if !self.credentials.authorize(request) {
            warn!("Broadcast under {:?} identity not authorized", request.identity);
            return Err(NearbyError::Unauthorized);
        }
        let medium = self
            .mediums
            .get(request.medium)
            .ok_or(NearbyError::MediumUnavailable(request.medium))?;

        let gate = SessionGate::new(callback);
        let id = self.reserve_id(&gate)?;

        let handle = match medium.start_advertising(&request.advertising_params(), gate.sink()) {
            Ok(handle) => handle,
            Err(e) => {
                self.sessions.lock().remove(&id);
                gate.close();
                warn!("Broadcast {} failed to start on {}: {}", id, request.medium, e);
                return Err(NearbyError::Driver(e));
            }
        };
        let mut session = LiveSession::new(request.medium, gate, MediumSession::Advertising(handle));

        {
            let mut sessions = self.sessions.lock();
            let claimed = matches!(
                sessions.get(&id),
                Some(SessionSlot::Pending {
                    cancelled: false,
                    ..
                })
            );
            if claimed {
                sessions.insert(id, SessionSlot::Live(session));
                info!("Broadcast {} started on {}", id, request.medium);
                return Ok(id);
            }
            sessions.remove(&id);
        }

        // The stop already delivered Stopped and closed the gate
        debug!("Broadcast {} stopped while starting", id);
        if let Err(e) = session.stop(None) {
            warn!("Stopping broadcast {} failed: {}", id, e);
        }
        Ok(id)
    }

    /// Stop broadcast `id`. Unknown or already-stopped ids are ignored. Once
    /// this returns no further status for `id` reaches its callback.
    pub fn stop_broadcast(&self, id: BroadcastSessionId) {
        let stopping = SessionSlot::take_for_stop(&mut self.sessions.lock(), id);
        match stopping {
            Some(stopping) => {
                stopping.finish(id);
                info!("Broadcast {} stopped", id);
            }
            None => debug!("Stop for unknown broadcast {}", id),
        }
    }

    /// Start scanning on the requested medium, or BLE then Classic
    pub fn start_scan(
        &self,
        request: &ScanRequest,
        callback: ScanCallback,
    ) -> Result<ScanSession, NearbyError> {
        let filter = request.filter();
        let mut last_error = None;

        for kind in request.candidate_mediums() {
            let Some(medium) = self.mediums.get(kind) else {
                continue;
            };
            let gate = SessionGate::new(callback.clone());
            match medium.start_scanning(&filter, gate.sink()) {
                Ok(handle) => {
                    let id = ScanSessionId(self.next_scan_id.fetch_add(1, Ordering::SeqCst));
                    info!("Scan {} started on {}", id, kind);
                    let inner = LiveSession::new(kind, gate, MediumSession::Scanning(handle));
                    return Ok(ScanSession::new(id, inner));
                }
                Err(e) => {
                    gate.close();
                    warn!("Scan failed to start on {}: {}", kind, e);
                    last_error = Some(e);
                }
            }
        }

        Err(match last_error {
            Some(e) => NearbyError::Driver(e),
            None => NearbyError::MediumUnavailable(request.medium.unwrap_or(MediumKind::Ble)),
        })
    }

    /// Ids of running broadcasts, sorted
    pub fn active_broadcasts(&self) -> Vec<BroadcastSessionId> {
        let mut ids: Vec<BroadcastSessionId> = self
            .sessions
            .lock()
            .iter()
            .filter(|(_, slot)| matches!(slot, SessionSlot::Live(_)))
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        ids
    }

    pub fn is_active(&self, id: BroadcastSessionId) -> bool {
        matches!(self.sessions.lock().get(&id), Some(SessionSlot::Live(_)))
    }

    /// Stop every broadcast. Broadcasts still starting are cancelled and
    /// torn down by their starter.
    pub fn shutdown(&self) {
        let stopping: Vec<(BroadcastSessionId, Stopping)> = {
            let mut sessions = self.sessions.lock();
            let ids: Vec<BroadcastSessionId> = sessions.keys().copied().collect();
            ids.into_iter()
                .filter_map(|id| {
                    SessionSlot::take_for_stop(&mut sessions, id).map(|stopping| (id, stopping))
                })
                .collect()
        };

        if !stopping.is_empty() {
            info!("Shutting down {} broadcast(s)", stopping.len());
        }
        for (id, stopping) in stopping {
            stopping.finish(id);
        }
    }

    fn reserve_id(
        &self,
        gate: &Arc<SessionGate<BroadcastStatus>>,
    ) -> Result<BroadcastSessionId, NearbyError> {
        let attempts = self.config.max_session_id_attempts.max(1);
        let mut sessions = self.sessions.lock();
        let mut next_id = self.id_source.lock();
        for _ in 0..attempts {
            let id = BroadcastSessionId((*next_id)());
            if let Entry::Vacant(slot) = sessions.entry(id) {
                slot.insert(SessionSlot::Pending {
                    gate: gate.clone(),
                    cancelled: false,
                });
                return Ok(id);
            }
            debug!("Broadcast id {} already in use", id);
        }
        warn!("No free broadcast id after {} attempts", attempts);
        Err(NearbyError::IdSpaceExhausted { attempts })
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.shutdown();
    }
}
