//! Single-flight refresh of the access credential
//!
//! When several requests are rejected at once because the credential expired,
//! only one of them triggers a refresh. The others are parked as waiters and
//! all of them are released with the same outcome once the refresh settles.

use std::{
    error, fmt, mem,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::{
    stores::{CredentialStore, Generation},
    AccessToken, AccessTokenRef, SessionError,
};

/// A source of fresh credentials
#[async_trait]
pub trait CredentialRefresher: Send + Sync {
    /// Requests a new credential from the authority
    async fn refresh_credential(&self) -> Result<AccessToken, SessionError>;
}

/// The result of a refresh, shared by every caller that waited on it
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// A new credential is available and has been stored
    Renewed(AccessToken),
    /// No credential could be obtained, or the session ended while refreshing;
    /// no credential of the rejected session remains stored
    Failed,
}

impl RefreshOutcome {
    /// The renewed credential, if the refresh succeeded
    pub fn credential(&self) -> Option<&AccessTokenRef> {
        match self {
            Self::Renewed(credential) => Some(credential),
            Self::Failed => None,
        }
    }
}

/// Whether a refresh is currently in flight
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshState {
    /// No refresh is in flight
    Idle,
    /// A refresh is in flight
    Refreshing,
}

enum Role {
    Wait(oneshot::Receiver<RefreshOutcome>),
    Lead(Generation),
}

enum Phase {
    Idle,
    Refreshing {
        waiters: Vec<oneshot::Sender<RefreshOutcome>>,
    },
}

/// Coordinates credential refreshes so that at most one is in flight
///
/// Cloning the coordinator is cheap; clones share the same state.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    refresher: Arc<dyn CredentialRefresher>,
    store: Arc<dyn CredentialStore>,
    timeout: Duration,
    phase: Mutex<Phase>,
    episodes: AtomicU64,
}

impl fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("state", &self.state())
            .field("waiting", &self.waiting())
            .field("episodes", &self.episodes())
            .field("timeout", &self.inner.timeout)
            .finish()
    }
}

impl RefreshCoordinator {
    /// Constructs a new coordinator
    ///
    /// A refresh that has not completed within `timeout` is treated as failed.
    pub fn new(
        refresher: Arc<dyn CredentialRefresher>,
        store: Arc<dyn CredentialStore>,
        timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                refresher,
                store,
                timeout,
                phase: Mutex::new(Phase::Idle),
                episodes: AtomicU64::new(0),
            }),
        }
    }

    /// Recovers from a rejected credential
    ///
    /// `rejected` is the credential that was attached to the failed request,
    /// if any, and `attached` the store generation observed when it was
    /// attached. If the store already holds a different credential, that one
    /// is returned without refreshing. If the store is empty and the session
    /// has changed since `attached`, the session has ended and the call fails
    /// without refreshing. Otherwise this call either starts a refresh or, if
    /// one is already in flight, waits for it to settle.
    ///
    /// The refresh runs on its own task, so dropping this future does not
    /// strand the other callers waiting on the same refresh.
    pub async fn recover(
        &self,
        rejected: Option<&AccessTokenRef>,
        attached: Generation,
    ) -> RefreshOutcome {
        let role = {
            let mut phase = self.inner.phase.lock();
            match &mut *phase {
                Phase::Refreshing { waiters } => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    tracing::debug!(
                        waiting = waiters.len(),
                        "refresh already in flight, waiting for it to settle"
                    );
                    Role::Wait(rx)
                }
                Phase::Idle => {
                    let generation = self.inner.store.generation();
                    match self.inner.store.get() {
                        Some(current) if Some(&*current) != rejected => {
                            tracing::debug!("credential was rotated since the request was sent");
                            return RefreshOutcome::Renewed(current);
                        }
                        None if generation != attached => {
                            tracing::debug!("session ended since the request was sent");
                            return RefreshOutcome::Failed;
                        }
                        _ => {}
                    }
                    *phase = Phase::Refreshing {
                        waiters: Vec::new(),
                    };
                    Role::Lead(generation)
                }
            }
        };

        match role {
            Role::Wait(rx) => rx.await.unwrap_or(RefreshOutcome::Failed),
            Role::Lead(generation) => self.trigger(generation).await,
        }
    }

    /// The current state of the coordinator
    pub fn state(&self) -> RefreshState {
        match &*self.inner.phase.lock() {
            Phase::Idle => RefreshState::Idle,
            Phase::Refreshing { .. } => RefreshState::Refreshing,
        }
    }

    /// The number of callers parked on the refresh in flight
    pub fn waiting(&self) -> usize {
        match &*self.inner.phase.lock() {
            Phase::Idle => 0,
            Phase::Refreshing { waiters } => waiters.len(),
        }
    }

    /// The number of refreshes started since the coordinator was created
    pub fn episodes(&self) -> u64 {
        self.inner.episodes.load(Ordering::Acquire)
    }

    async fn trigger(&self, generation: Generation) -> RefreshOutcome {
        let episode = self.inner.episodes.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::info!(episode, "access credential rejected, refreshing");

        let inner = self.inner.clone();
        match tokio::spawn(inner.run_episode(episode, generation)).await {
            Ok(outcome) => outcome,
            Err(error) => {
                tracing::error!(
                    episode,
                    error = (&error as &dyn error::Error),
                    "refresh task did not complete"
                );
                RefreshOutcome::Failed
            }
        }
    }
}

impl Inner {
    async fn run_episode(self: Arc<Self>, episode: u64, generation: Generation) -> RefreshOutcome {
        let guard = SettleGuard {
            inner: &self,
            episode,
            generation,
            settled: false,
        };

        let outcome =
            match tokio::time::timeout(self.timeout, self.refresher.refresh_credential()).await {
                Ok(Ok(credential)) => RefreshOutcome::Renewed(credential),
                Ok(Err(error)) => {
                    tracing::warn!(
                        episode,
                        error = (&error as &dyn error::Error),
                        "refresh failed"
                    );
                    RefreshOutcome::Failed
                }
                Err(_) => {
                    tracing::warn!(
                        episode,
                        timeout_ms = self.timeout.as_millis() as u64,
                        "refresh timed out"
                    );
                    RefreshOutcome::Failed
                }
            };

        guard.settle(outcome)
    }

    /// Writes the outcome back to the store unless the session it was started
    /// for has ended, then releases the waiters
    fn settle(
        &self,
        episode: u64,
        generation: Generation,
        outcome: RefreshOutcome,
    ) -> RefreshOutcome {
        let (outcome, waiters) = {
            let mut phase = self.phase.lock();
            let outcome = match outcome {
                RefreshOutcome::Renewed(credential) => {
                    if self.store.set_if(generation, credential.clone()) {
                        RefreshOutcome::Renewed(credential)
                    } else {
                        tracing::info!(
                            episode,
                            "session ended while refreshing, discarding credential"
                        );
                        RefreshOutcome::Failed
                    }
                }
                RefreshOutcome::Failed => {
                    self.store.clear_if(generation);
                    RefreshOutcome::Failed
                }
            };

            let waiters = match mem::replace(&mut *phase, Phase::Idle) {
                Phase::Refreshing { waiters } => waiters,
                Phase::Idle => Vec::new(),
            };
            (outcome, waiters)
        };

        tracing::debug!(
            episode,
            renewed = matches!(outcome, RefreshOutcome::Renewed(_)),
            released = waiters.len(),
            "refresh settled"
        );

        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }
        outcome
    }
}

/// Settles the episode as failed if the refresh unwinds before settling
struct SettleGuard<'a> {
    inner: &'a Inner,
    episode: u64,
    generation: Generation,
    settled: bool,
}

impl SettleGuard<'_> {
    fn settle(mut self, outcome: RefreshOutcome) -> RefreshOutcome {
        self.settled = true;
        self.inner.settle(self.episode, self.generation, outcome)
    }
}

impl Drop for SettleGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            tracing::error!(episode = self.episode, "refresh abandoned, ending session");
            self.inner.settle(self.episode, self.generation, RefreshOutcome::Failed);
        }
    }
}
