//! Error types shared by channels, devices and the presence controller.

use crate::platform::MediumKind;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Opaque failure surfaced from the radio layer.
///
/// Driver implementations return this across the [`crate::platform::driver`]
/// traits; the core never inspects it beyond logging and forwarding.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum DriverError {
    /// The remote side or the adapter refused the request (pairing rejected,
    /// advertising slot unavailable, ...).
    #[error("rejected by radio: {0}")]
    Rejected(String),

    /// Supported by the OS but not by this adapter.
    #[error("radio operation not supported: {0}")]
    NotSupported(String),

    /// Wrapper around OS-level failures.
    #[error("radio system error: {0}")]
    System(String),

    #[error("radio timeout: {0}")]
    Timeout(String),
}

/// Library error type.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NearbyError {
    /// Operation on a channel that has been torn down.
    #[error("channel is closed")]
    Closed,

    /// A different listener already occupies the slot.
    #[error("a different callback is already registered")]
    AlreadyRegistered,

    /// The credential provider rejected the request.
    #[error("request not authorized by credential provider")]
    Unauthorized,

    /// Session id generation hit its retry bound.
    #[error("no free session id after {attempts} attempts")]
    IdSpaceExhausted { attempts: u32 },

    #[error("driver error: {0}")]
    Driver(#[from] DriverError),

    /// The object is not in a state that allows the operation.
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("medium unavailable: {0}")]
    MediumUnavailable(MediumKind),
}
