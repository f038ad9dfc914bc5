//! Connection records keyed by endpoint id.
//!
//! Owns one [`ByteChannel`] per live logical connection and routes inbound
//! driver traffic to it. A record is dropped once its connection goes away.

use super::channel::ByteChannel;
use crate::config::ChannelConfig;
use crate::platform::{ChannelTransport, ConnectionEvent};
use futures::{Stream, StreamExt};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

pub struct ConnectionRegistry {
    transport: Arc<dyn ChannelTransport>,
    config: ChannelConfig,
    channels: RwLock<HashMap<String, Arc<ByteChannel>>>,
}

impl ConnectionRegistry {
    pub fn new(transport: Arc<dyn ChannelTransport>, config: ChannelConfig) -> Self {
        Self {
            transport,
            config,
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Channel for `endpoint_id`, created on first use
    pub fn open(&self, endpoint_id: &str) -> Arc<ByteChannel> {
        if let Some(existing) = self.channels.read().get(endpoint_id) {
            return existing.clone();
        }
        let mut channels = self.channels.write();
        channels
            .entry(endpoint_id.to_string())
            .or_insert_with(|| {
                info!("Connection opened: {}", endpoint_id);
                Arc::new(ByteChannel::new(
                    endpoint_id,
                    self.transport.clone(),
                    self.config.clone(),
                ))
            })
            .clone()
    }

    pub fn get(&self, endpoint_id: &str) -> Option<Arc<ByteChannel>> {
        self.channels.read().get(endpoint_id).cloned()
    }

    pub fn endpoints(&self) -> Vec<String> {
        let mut endpoints: Vec<String> = self.channels.read().keys().cloned().collect();
        endpoints.sort();
        endpoints
    }

    pub fn len(&self) -> usize {
        self.channels.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.read().is_empty()
    }

    pub fn on_bytes_received(&self, endpoint_id: &str, bytes: Vec<u8>) {
        match self.get(endpoint_id) {
            Some(channel) => channel.enqueue_inbound(bytes),
            None => debug!(
                "Dropping {} bytes for unknown endpoint {}",
                bytes.len(),
                endpoint_id
            ),
        }
    }

    /// The transport lost the endpoint: close the channel and drop the record
    pub fn on_disconnected(&self, endpoint_id: &str) {
        let removed = self.channels.write().remove(endpoint_id);
        if let Some(channel) = removed {
            channel.close_from_remote();
            info!("Connection removed: {}", endpoint_id);
        }
    }

    /// Close locally and drop the record
    pub fn close(&self, endpoint_id: &str) {
        let removed = self.channels.write().remove(endpoint_id);
        if let Some(channel) = removed {
            channel.close();
        }
    }

    pub fn close_all(&self) {
        let drained: Vec<Arc<ByteChannel>> =
            self.channels.write().drain().map(|(_, c)| c).collect();
        for channel in drained {
            channel.close();
        }
    }

    pub fn handle_event(&self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::BytesReceived { endpoint_id, bytes } => {
                self.on_bytes_received(&endpoint_id, bytes)
            }
            ConnectionEvent::Disconnected { endpoint_id } => self.on_disconnected(&endpoint_id),
        }
    }

    /// Consume driver connection events until the stream ends
    pub async fn run<S>(&self, events: S)
    where
        S: Stream<Item = ConnectionEvent>,
    {
        futures::pin_mut!(events);
        while let Some(event) = events.next().await {
            self.handle_event(event);
        }
        debug!("Connection event stream ended");
    }
}
