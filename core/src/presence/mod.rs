//! Presence sessions: broadcast and scan lifecycle across radio mediums.

pub mod controller;
pub mod credential;
pub mod mediums;
pub mod request;
pub mod session;

pub use controller::{BroadcastSessionId, SessionController};
pub use credential::{CredentialManager, CredentialProvider};
pub use mediums::Mediums;
pub use request::{
    BroadcastCallback, BroadcastRequest, IdentityKind, PowerMode, ScanCallback, ScanRequest,
    DEFAULT_TX_POWER,
};
pub use session::{MediumSession, ScanSession, ScanSessionId};
