//! Session management for clients of the postdeck API
//!
//! This library keeps track of the access credential issued to a postdeck user
//! and recovers from its expiry without involving the caller.
//!
//! The pieces are:
//!
//! * A [`CredentialStore`], which holds the current credential and the
//!   [`SessionRecord`] it belongs to, either in memory or in a file.
//! * A [`SessionService`], which performs the identity calls (login, signup,
//!   logout, password management, verification codes and credential refresh)
//!   and keeps the store up to date.
//! * A [`RefreshCoordinator`], which guarantees that when many requests are
//!   rejected at once, exactly one refresh is performed and all of them observe
//!   its outcome.
//!
//! The HTTP side, which attaches the credential to outgoing requests and
//! retries them after a refresh, lives in the `postdeck_reqwest` crate.
//!
//! ```
//! use std::{sync::Arc, time::Duration};
//! use postdeck_tokens::{
//!     CredentialStore, InMemoryCredentialStore, RefreshCoordinator, SessionConfig, SessionService,
//! };
//!
//! let config = SessionConfig::new("https://api.postdeck.example/".parse().unwrap())
//!     .with_refresh_timeout(Duration::from_secs(5));
//!
//! let store: Arc<dyn CredentialStore> = Arc::new(InMemoryCredentialStore::new());
//! let transport = reqwest_middleware::ClientBuilder::new(reqwest::Client::new()).build();
//! let service = Arc::new(SessionService::new(transport, &config, store.clone()));
//!
//! let coordinator = RefreshCoordinator::new(service, store, config.refresh_timeout());
//! # drop(coordinator);
//! ```
//!
//! # Features
//!
//! * `file` (default): Provides [`FileCredentialStore`], which persists the
//!   credential across restarts.
//! * `test-util`: Provides a scripted stand-in for the backend in the
//!   `testing` module.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

mod braids;
pub mod config;
pub mod coordinator;
mod error;
mod outcome;
pub mod service;
mod session;
pub mod stores;
#[cfg(any(test, feature = "test-util"))]
#[cfg_attr(docsrs, doc(cfg(feature = "test-util")))]
pub mod testing;
pub mod wire;

pub use braids::*;
pub use config::{ConfigError, SessionConfig};
pub use coordinator::{CredentialRefresher, RefreshCoordinator, RefreshOutcome, RefreshState};
pub use error::{ErrorKind, SessionError};
pub use outcome::{Outcome, Reply, SessionResult};
pub use service::SessionService;
pub use session::{Availability, SessionRecord};
#[cfg(feature = "file")]
pub use stores::FileCredentialStore;
pub use stores::{CredentialStore, Generation, InMemoryCredentialStore};
