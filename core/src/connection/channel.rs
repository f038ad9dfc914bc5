//! Duplex byte channel bound to one remote endpoint.
//!
//! The driver pushes inbound buffers with [`ByteChannel::enqueue_inbound`];
//! the application consumes them through a single read callback or explicit
//! reads. All mutable state sits behind one lock and no callback is ever
//! invoked while that lock is held.

use crate::config::ChannelConfig;
use crate::error::NearbyError;
use crate::platform::ChannelTransport;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Consumer of inbound buffers. Invoked once per buffer.
pub type ReadCallback = Arc<dyn Fn(Vec<u8>) + Send + Sync>;

/// Fired once when the channel closes
pub type DisconnectListener = Box<dyn FnOnce() + Send>;

struct ChannelState {
    inbound: VecDeque<Vec<u8>>,
    read_callback: Option<ReadCallback>,
    disconnect_listener: Option<DisconnectListener>,
    closed: bool,
    /// A thread is currently handing queued buffers to the callback
    draining: bool,
}

/// Thread-safe duplex byte stream for one logical connection
pub struct ByteChannel {
    peer_id: String,
    config: ChannelConfig,
    transport: Arc<dyn ChannelTransport>,
    state: Mutex<ChannelState>,
    readable: Condvar,
}

/// Resets `draining` if a read callback unwinds mid-delivery.
struct DrainGuard<'a> {
    channel: &'a ByteChannel,
    armed: bool,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.channel.state.lock().draining = false;
        }
    }
}

fn same_callback(a: &ReadCallback, b: &ReadCallback) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

impl ByteChannel {
    pub fn new(
        peer_id: impl Into<String>,
        transport: Arc<dyn ChannelTransport>,
        config: ChannelConfig,
    ) -> Self {
        Self {
            peer_id: peer_id.into(),
            config,
            transport,
            state: Mutex::new(ChannelState {
                inbound: VecDeque::new(),
                read_callback: None,
                disconnect_listener: None,
                closed: false,
                draining: false,
            }),
            readable: Condvar::new(),
        }
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Number of buffers waiting for a consumer
    pub fn pending(&self) -> usize {
        self.state.lock().inbound.len()
    }

    /// Install `callback` as the sole consumer.
    ///
    /// Buffers already queued are handed over in order before this returns,
    /// unless another thread is mid-delivery, in which case that thread
    /// delivers them. Registering the same `Arc` again is allowed; a different
    /// callback must wait for [`clear_read_callback`](Self::clear_read_callback).
    pub fn register_read_callback(&self, callback: ReadCallback) -> Result<(), NearbyError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(NearbyError::Closed);
        }
        if let Some(existing) = &state.read_callback {
            if !same_callback(existing, &callback) {
                return Err(NearbyError::AlreadyRegistered);
            }
        }
        state.read_callback = Some(callback);
        self.drain(state);
        Ok(())
    }

    pub fn clear_read_callback(&self) {
        self.state.lock().read_callback = None;
    }

    /// Dequeue one buffer without waiting
    pub fn try_read(&self) -> Option<Vec<u8>> {
        self.state.lock().inbound.pop_front()
    }

    /// Dequeue one buffer, waiting up to `timeout`.
    ///
    /// Returns `Ok(None)` on timeout and `Err(Closed)` once the channel is
    /// closed with nothing left to read.
    pub fn read_timeout(&self, timeout: Duration) -> Result<Option<Vec<u8>>, NearbyError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if let Some(bytes) = state.inbound.pop_front() {
                return Ok(Some(bytes));
            }
            if state.closed {
                return Err(NearbyError::Closed);
            }
            if self.readable.wait_until(&mut state, deadline).timed_out() {
                return Ok(state.inbound.pop_front());
            }
        }
    }

    /// Hand `bytes` to the transport. Fails with `Closed` once
    /// [`close`](Self::close) has returned.
    pub fn write(&self, bytes: &[u8]) -> Result<(), NearbyError> {
        if self.state.lock().closed {
            return Err(NearbyError::Closed);
        }
        self.transport.send_bytes(&self.peer_id, bytes)?;
        Ok(())
    }

    /// Producer side: append a buffer and deliver it to the read callback if
    /// one is registered.
    pub fn enqueue_inbound(&self, bytes: Vec<u8>) {
        let mut state = self.state.lock();
        if state.closed {
            debug!(
                "Dropping {} inbound bytes for closed channel {}",
                bytes.len(),
                self.peer_id
            );
            return;
        }
        state.inbound.push_back(bytes);
        self.readable.notify_one();
        self.drain(state);
    }

    /// Close the channel. Idempotent; the disconnect listener fires on the
    /// first call only.
    pub fn close(&self) {
        self.shutdown(true);
    }

    /// Close after the transport reported the endpoint gone.
    pub(crate) fn close_from_remote(&self) {
        self.shutdown(false);
    }

    /// Replace the disconnect listener. On an already-closed channel the
    /// listener fires immediately when `notify_listener_if_closed` is set.
    pub fn set_disconnect_listener(&self, listener: DisconnectListener) {
        let mut state = self.state.lock();
        if state.closed {
            drop(state);
            if self.config.notify_listener_if_closed {
                listener();
            }
            return;
        }
        state.disconnect_listener = Some(listener);
    }

    fn shutdown(&self, notify_transport: bool) {
        let listener = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.read_callback = None;
            self.readable.notify_all();
            state.disconnect_listener.take()
        };

        debug!("Channel {} closed", self.peer_id);
        if notify_transport {
            if let Err(e) = self.transport.disconnect(&self.peer_id) {
                warn!("Disconnect of {} failed: {}", self.peer_id, e);
            }
        }
        if let Some(listener) = listener {
            listener();
        }
    }

    /// Deliver queued buffers one at a time until the queue is empty or the
    /// callback is gone. Only one thread drains at a time, which keeps
    /// delivery in enqueue order.
    fn drain(&self, mut state: MutexGuard<'_, ChannelState>) {
        if state.draining || state.read_callback.is_none() || state.inbound.is_empty() {
            return;
        }
        state.draining = true;
        drop(state);

        let mut guard = DrainGuard {
            channel: self,
            armed: true,
        };
        loop {
            let (callback, bytes) = {
                let mut state = self.state.lock();
                match (state.read_callback.clone(), state.inbound.is_empty()) {
                    (Some(callback), false) => {
                        let bytes = state.inbound.pop_front().unwrap_or_default();
                        (callback, bytes)
                    }
                    _ => {
                        state.draining = false;
                        guard.armed = false;
                        return;
                    }
                }
            };
            callback(bytes);
        }
    }
}

impl std::fmt::Debug for ByteChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteChannel")
            .field("peer_id", &self.peer_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}
