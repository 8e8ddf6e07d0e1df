//! A credential store persisted to a local file

use std::{
    error,
    fs::{self, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};

use parking_lot::RwLock;

use super::{CredentialStore, Generation, Snapshot};
use crate::{AccessToken, SessionRecord};

/// A credential store that survives restarts by mirroring itself to a file
///
/// The file is read once when the store is opened. Every write replaces the
/// file atomically, and clearing the store deletes it. Failures to persist are
/// logged; the in-memory view stays authoritative for the running process.
#[derive(Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
    snapshot: RwLock<Snapshot>,
}

impl FileCredentialStore {
    /// Opens the store backed by `path`
    ///
    /// A missing or unreadable file yields an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let snapshot = match read_snapshot(&path) {
            Ok(Some(snapshot)) => {
                tracing::debug!(
                    path = %path.display(),
                    has_credential = snapshot.credential.is_some(),
                    "loaded stored session"
                );
                snapshot
            }
            Ok(None) => Snapshot::default(),
            Err(error) => {
                tracing::warn!(
                    path = %path.display(),
                    error = (&error as &dyn error::Error),
                    "unable to read stored session, starting unauthenticated"
                );
                Snapshot::default()
            }
        };

        Self {
            path,
            snapshot: RwLock::new(snapshot),
        }
    }

    /// The file backing this store
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, snapshot: &Snapshot) {
        let result = if snapshot.is_empty() {
            remove_snapshot(&self.path)
        } else {
            write_snapshot(&self.path, snapshot)
        };

        match result {
            Ok(()) => tracing::trace!(path = %self.path.display(), "persisted session"),
            Err(error) => tracing::warn!(
                path = %self.path.display(),
                error = (&error as &dyn error::Error),
                "unable to persist session"
            ),
        }
    }
}

impl CredentialStore for FileCredentialStore {
    fn get(&self) -> Option<AccessToken> {
        self.snapshot.read().credential.clone()
    }

    fn set(&self, credential: AccessToken) {
        let mut snapshot = self.snapshot.write();
        snapshot.credential = Some(credential);
        self.persist(&snapshot);
    }

    fn session(&self) -> Option<SessionRecord> {
        self.snapshot.read().session.clone()
    }

    fn establish(&self, credential: AccessToken, session: SessionRecord) {
        let mut snapshot = self.snapshot.write();
        snapshot.establish(credential, session);
        self.persist(&snapshot);
    }

    fn clear(&self) {
        let mut snapshot = self.snapshot.write();
        snapshot.reset();
        self.persist(&snapshot);
    }

    fn generation(&self) -> Generation {
        self.snapshot.read().generation
    }

    fn set_if(&self, generation: Generation, credential: AccessToken) -> bool {
        let mut snapshot = self.snapshot.write();
        if snapshot.generation != generation {
            tracing::debug!(path = %self.path.display(), "session changed, credential not stored");
            return false;
        }
        snapshot.credential = Some(credential);
        self.persist(&snapshot);
        true
    }

    fn clear_if(&self, generation: Generation) -> bool {
        let mut snapshot = self.snapshot.write();
        if snapshot.generation != generation {
            return false;
        }
        snapshot.reset();
        self.persist(&snapshot);
        true
    }
}

fn read_snapshot(path: &Path) -> Result<Option<Snapshot>, io::Error> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(error) => return Err(error),
    };
    let snapshot = serde_json::from_slice(&data)?;
    Ok(Some(snapshot))
}

fn write_snapshot(path: &Path, snapshot: &Snapshot) -> Result<(), io::Error> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let staging = path.with_extension("tmp");

    let mut file_opts = OpenOptions::new();
    file_opts.create(true).truncate(true).write(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        file_opts.mode(0o600);
    }

    let mut file = file_opts.open(&staging)?;
    let data = serde_json::to_vec_pretty(snapshot)?;
    file.write_all(&data)?;
    file.sync_all()?;
    fs::rename(&staging, path)
}

fn remove_snapshot(path: &Path) -> Result<(), io::Error> {
    match fs::remove_file(path) {
        Err(error) if error.kind() != io::ErrorKind::NotFound => Err(error),
        _ => Ok(()),
    }
}
