//! An in-memory credential store

use parking_lot::RwLock;

use super::{CredentialStore, Generation, Snapshot};
use crate::{AccessToken, SessionRecord};

/// A credential store that lives only as long as the process
#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    snapshot: RwLock<Snapshot>,
}

impl InMemoryCredentialStore {
    /// Constructs a new, empty in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Constructs a store that already holds `credential`
    ///
    /// Useful for resuming with a credential obtained elsewhere.
    pub fn with_credential(credential: AccessToken) -> Self {
        Self {
            snapshot: RwLock::new(Snapshot::holding(credential)),
        }
    }
}

impl CredentialStore for InMemoryCredentialStore {
    fn get(&self) -> Option<AccessToken> {
        self.snapshot.read().credential.clone()
    }

    fn set(&self, credential: AccessToken) {
        self.snapshot.write().credential = Some(credential);
    }

    fn session(&self) -> Option<SessionRecord> {
        self.snapshot.read().session.clone()
    }

    fn establish(&self, credential: AccessToken, session: SessionRecord) {
        self.snapshot.write().establish(credential, session);
    }

    fn clear(&self) {
        self.snapshot.write().reset();
    }

    fn generation(&self) -> Generation {
        self.snapshot.read().generation
    }

    fn set_if(&self, generation: Generation, credential: AccessToken) -> bool {
        let mut snapshot = self.snapshot.write();
        if snapshot.generation != generation {
            return false;
        }
        snapshot.credential = Some(credential);
        true
    }

    fn clear_if(&self, generation: Generation) -> bool {
        let mut snapshot = self.snapshot.write();
        if snapshot.generation != generation {
            return false;
        }
        snapshot.reset();
        true
    }
}
