//! Live broadcast/scan sessions and status suppression.
//!
//! Every session routes driver status through a [`SessionGate`]. Closing the
//! gate is synchronous: once `close` returns no further status reaches the
//! application callback, even if the driver reports late.

use crate::error::DriverError;
use crate::platform::{AdvertisingSession, MediumKind, ScanEvent, ScanningSession, StatusSink};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::cell::Cell;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use tracing::{debug, info, warn};

thread_local! {
    /// Gate deliveries currently running on this thread, across all gates
    static DELIVERY_DEPTH: Cell<usize> = const { Cell::new(0) };
}

fn delivery_depth() -> usize {
    DELIVERY_DEPTH.with(|depth| depth.get())
}

struct GateState {
    live: bool,
    in_flight: Vec<ThreadId>,
}

/// Forwards status to a callback until closed
pub(crate) struct SessionGate<T> {
    callback: Arc<dyn Fn(T) + Send + Sync>,
    state: Mutex<GateState>,
    idle: Condvar,
}

struct InFlight<'a, T> {
    gate: &'a SessionGate<T>,
    thread: ThreadId,
}

impl<T> Drop for InFlight<'_, T> {
    fn drop(&mut self) {
        DELIVERY_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
        let mut state = self.gate.state.lock();
        if let Some(pos) = state.in_flight.iter().position(|t| *t == self.thread) {
            state.in_flight.swap_remove(pos);
        }
        self.gate.idle.notify_all();
    }
}

impl<T: Send + 'static> SessionGate<T> {
    pub(crate) fn new(callback: Arc<dyn Fn(T) + Send + Sync>) -> Arc<Self> {
        Arc::new(Self {
            callback,
            state: Mutex::new(GateState {
                live: true,
                in_flight: Vec::new(),
            }),
            idle: Condvar::new(),
        })
    }

    /// Sink handed to the medium
    pub(crate) fn sink(self: &Arc<Self>) -> StatusSink<T> {
        let gate = self.clone();
        Arc::new(move |status: T| {
            gate.deliver(status);
        })
    }

    #[cfg(test)]
    pub(crate) fn is_live(&self) -> bool {
        self.state.lock().live
    }

    /// Returns false when the status was suppressed
    pub(crate) fn deliver(&self, status: T) -> bool {
        let in_flight = {
            let mut state = self.state.lock();
            if !state.live {
                return false;
            }
            self.enter(&mut state)
        };
        (self.callback)(status);
        drop(in_flight);
        true
    }

    /// Stop forwarding and wait for deliveries running on other threads.
    /// When called from inside any gate delivery (a callback stopping its
    /// own or a sibling session) the gate is closed without waiting.
    /// Returns true if this call closed the gate.
    pub(crate) fn close(&self) -> bool {
        let mut state = self.state.lock();
        self.shut(&mut state)
    }

    /// Close the gate, then hand `last` to the callback as the final status.
    /// Only the call that closes the gate delivers.
    pub(crate) fn close_with(&self, last: T) {
        let in_flight = {
            let mut state = self.state.lock();
            if !self.shut(&mut state) {
                return;
            }
            self.enter(&mut state)
        };
        (self.callback)(last);
        drop(in_flight);
    }

    fn shut(&self, state: &mut MutexGuard<'_, GateState>) -> bool {
        let was_live = std::mem::replace(&mut state.live, false);
        if delivery_depth() == 0 {
            let me = thread::current().id();
            while state.in_flight.iter().any(|t| *t != me) {
                self.idle.wait(state);
            }
        }
        was_live
    }

    fn enter(&self, state: &mut GateState) -> InFlight<'_, T> {
        let thread = thread::current().id();
        state.in_flight.push(thread);
        DELIVERY_DEPTH.with(|depth| depth.set(depth.get() + 1));
        InFlight { gate: self, thread }
    }
}

/// Driver-side handle of a live session, tagged by what it does
pub enum MediumSession {
    Advertising(Box<dyn AdvertisingSession>),
    Scanning(Box<dyn ScanningSession>),
}

impl MediumSession {
    fn stop(&mut self) -> Result<(), DriverError> {
        match self {
            MediumSession::Advertising(session) => session.stop(),
            MediumSession::Scanning(session) => session.stop(),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            MediumSession::Advertising(_) => "advertising",
            MediumSession::Scanning(_) => "scanning",
        }
    }
}

/// Shared teardown for broadcast and scan sessions
pub(crate) struct LiveSession<T: Send + 'static> {
    medium: MediumKind,
    gate: Arc<SessionGate<T>>,
    handle: Option<MediumSession>,
}

impl<T: Send + 'static> LiveSession<T> {
    pub(crate) fn new(medium: MediumKind, gate: Arc<SessionGate<T>>, handle: MediumSession) -> Self {
        Self {
            medium,
            gate,
            handle: Some(handle),
        }
    }

    pub(crate) fn medium(&self) -> MediumKind {
        self.medium
    }

    pub(crate) fn is_active(&self) -> bool {
        self.handle.is_some()
    }

    /// Close the gate with `last` as the final status (if any), then stop
    /// the driver session. Idempotent.
    pub(crate) fn stop(&mut self, last: Option<T>) -> Result<(), DriverError> {
        let Some(mut handle) = self.handle.take() else {
            return Ok(());
        };
        match last {
            Some(status) => self.gate.close_with(status),
            None => {
                self.gate.close();
            }
        }
        let result = handle.stop();
        debug!("{} session on {} stopped", handle.label(), self.medium);
        result
    }
}

impl<T: Send + 'static> Drop for LiveSession<T> {
    fn drop(&mut self) {
        if let Err(e) = self.stop(None) {
            warn!("Stopping {} session on drop failed: {}", self.medium, e);
        }
    }
}

/// Identifier of a scan session, unique per controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScanSessionId(pub u64);

impl fmt::Display for ScanSessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scan-{}", self.0)
    }
}

/// Caller-owned scan. Stopping or dropping it stops driver-side scanning;
/// no controller lock is involved.
pub struct ScanSession {
    id: ScanSessionId,
    inner: LiveSession<ScanEvent>,
}

impl ScanSession {
    pub(crate) fn new(id: ScanSessionId, inner: LiveSession<ScanEvent>) -> Self {
        Self { id, inner }
    }

    pub fn id(&self) -> ScanSessionId {
        self.id
    }

    pub fn medium(&self) -> MediumKind {
        self.inner.medium()
    }

    pub fn is_active(&self) -> bool {
        self.inner.is_active()
    }

    /// Stop scanning. After this returns no further scan events are
    /// delivered. Calling it again is a no-op.
    pub fn stop(&mut self) -> Result<(), DriverError> {
        let was_active = self.inner.is_active();
        self.inner.stop(None)?;
        if was_active {
            info!("Scan {} stopped", self.id);
        }
        Ok(())
    }
}

impl fmt::Debug for ScanSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanSession")
            .field("id", &self.id)
            .field("medium", &self.medium())
            .field("active", &self.is_active())
            .finish()
    }
}
