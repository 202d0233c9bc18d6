//! In-memory identity store.

use async_trait::async_trait;
use courier_core::{Identity, SessionStore, StoreError};
use parking_lot::RwLock;

/// In-memory store implementation.
///
/// Useful for development and tests. Identities are lost on restart, so
/// every process start pairs again.
#[derive(Default)]
pub struct MemoryStore {
    identities: RwLock<Vec<Identity>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that already holds `identity`.
    #[must_use]
    pub fn with_identity(identity: Identity) -> Self {
        Self {
            identities: RwLock::new(vec![identity]),
        }
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn first_identity(&self) -> Result<Option<Identity>, StoreError> {
        Ok(self
            .identities
            .read()
            .iter()
            .min_by_key(|identity| identity.paired_at)
            .cloned())
    }

    async fn save_identity(&self, identity: &Identity) -> Result<(), StoreError> {
        let mut identities = self.identities.write();
        match identities.iter_mut().find(|existing| existing.id == identity.id) {
            Some(existing) => *existing = identity.clone(),
            None => identities.push(identity.clone()),
        }
        Ok(())
    }

    async fn wipe(&self) -> Result<(), StoreError> {
        self.identities.write().clear();
        Ok(())
    }
}
