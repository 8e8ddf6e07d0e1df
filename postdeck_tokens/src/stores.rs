//! Credential stores

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{AccessToken, SessionRecord};

#[cfg(feature = "file")]
pub mod file;
pub mod in_memory;

#[cfg(feature = "file")]
pub use file::FileCredentialStore;
pub use in_memory::InMemoryCredentialStore;

/// Storage for the current credential and the session it belongs to
///
/// Reads never fail: a store that cannot reach its persistence surface simply
/// reports that nothing is stored. Unconditional writes are last-write-wins.
///
/// The credential and the session record are cleared together, so no reader
/// may observe one without the other after [`clear()`][Self::clear()].
///
/// Every [`establish()`][Self::establish()] and [`clear()`][Self::clear()]
/// moves the store to a new [`Generation`]. Work that started under one
/// session writes its result back with [`set_if()`][Self::set_if()] or
/// [`clear_if()`][Self::clear_if()], which do nothing once that session has
/// ended. Read the generation before the credential it guards.
pub trait CredentialStore: fmt::Debug + Send + Sync {
    /// Gets the current credential, if any
    fn get(&self) -> Option<AccessToken>;

    /// Replaces the current credential, keeping the session record
    fn set(&self, credential: AccessToken);

    /// Gets the current session record, if any
    fn session(&self) -> Option<SessionRecord>;

    /// Stores a freshly issued credential together with its session record
    fn establish(&self, credential: AccessToken, session: SessionRecord);

    /// Removes both the credential and the session record
    fn clear(&self);

    /// The generation of the session currently held
    fn generation(&self) -> Generation;

    /// Replaces the current credential if the store is still at `generation`
    ///
    /// Returns whether the credential was replaced.
    fn set_if(&self, generation: Generation, credential: AccessToken) -> bool;

    /// Removes both the credential and the session record if the store is
    /// still at `generation`
    ///
    /// Returns whether the store was cleared.
    fn clear_if(&self, generation: Generation) -> bool;

    /// Whether a credential is currently held
    fn is_authenticated(&self) -> bool {
        self.get().is_some()
    }
}

/// Identifies one session held by a [`CredentialStore`]
///
/// Generations are only meaningful within the process and are never
/// persisted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Generation(u64);

impl Generation {
    fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

/// The contents of a store at a point in time
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Snapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) credential: Option<AccessToken>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) session: Option<SessionRecord>,
    #[serde(skip)]
    pub(crate) generation: Generation,
}

impl Snapshot {
    pub(crate) fn holding(credential: AccessToken) -> Self {
        Self {
            credential: Some(credential),
            ..Self::default()
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.credential.is_none() && self.session.is_none()
    }

    pub(crate) fn establish(&mut self, credential: AccessToken, session: SessionRecord) {
        self.credential = Some(credential);
        self.session = Some(session);
        self.generation = self.generation.next();
    }

    pub(crate) fn reset(&mut self) {
        self.credential = None;
        self.session = None;
        self.generation = self.generation.next();
    }
}
