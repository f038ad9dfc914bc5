//! Logical connections: one byte channel per remote endpoint.

pub mod channel;
pub mod registry;

pub use channel::{ByteChannel, DisconnectListener, ReadCallback};
pub use registry::ConnectionRegistry;
