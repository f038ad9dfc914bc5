//! Credential checks for broadcast content.

use super::request::{BroadcastRequest, IdentityKind};
use parking_lot::RwLock;
use std::collections::HashSet;
use tracing::debug;

/// Authorizes broadcast requests
#[cfg_attr(test, mockall::automock)]
pub trait CredentialProvider: Send + Sync {
    fn authorize(&self, request: &BroadcastRequest) -> bool;
}

/// Default provider backed by the set of identities that have a local
/// credential. Public broadcasts need none.
#[derive(Default)]
pub struct CredentialManager {
    credentials: RwLock<HashSet<IdentityKind>>,
}

impl CredentialManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_credential(&self, identity: IdentityKind) {
        self.credentials.write().insert(identity);
    }

    pub fn remove_credential(&self, identity: IdentityKind) -> bool {
        self.credentials.write().remove(&identity)
    }

    pub fn has_credential(&self, identity: IdentityKind) -> bool {
        identity == IdentityKind::Public || self.credentials.read().contains(&identity)
    }
}

impl CredentialProvider for CredentialManager {
    fn authorize(&self, request: &BroadcastRequest) -> bool {
        if request.payload.is_empty() {
            debug!("Rejecting broadcast with empty payload");
            return false;
        }
        let allowed = self.has_credential(request.identity);
        if !allowed {
            debug!("No credential for {:?} broadcast", request.identity);
        }
        allowed
    }
}
