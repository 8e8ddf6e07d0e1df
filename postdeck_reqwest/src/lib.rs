//! Middleware to attach the postdeck credential and recover from its expiry
//!
//! When using [`ClientWithMiddleware`](reqwest_middleware::ClientWithMiddleware),
//! include the [`RefreshingAuthMiddleware`] in the middleware stack to attach
//! the credential currently held by a [`CredentialStore`] to each outbound
//! request. When the backend rejects a request with `401 Unauthorized`, the
//! middleware asks a [`RefreshCoordinator`] for a fresh credential and sends
//! the request again, exactly once.
//!
//! If a request already has specified an `Authorization` header value by
//! the time that the middleware executes, the existing value will be left
//! in place, allowing overrides to be specified as required. Such requests
//! are never refreshed or retried.
//!
//! Most applications do not assemble the stack themselves; a
//! [`SessionContext`] wires the store, the identity calls, the coordinator and
//! an [`ApiClient`] together.
//!
//! ```
//! use std::{sync::Arc, time::Duration};
//!
//! use postdeck_reqwest::{RefreshingAuthMiddleware, SameOrigin};
//! use postdeck_tokens::{
//!     CredentialStore, InMemoryCredentialStore, RefreshCoordinator, SessionConfig, SessionService,
//! };
//! use reqwest::Client;
//! use reqwest_middleware::ClientBuilder;
//!
//! let config = SessionConfig::new("https://api.postdeck.example".parse().unwrap());
//! let store: Arc<dyn CredentialStore> = Arc::new(InMemoryCredentialStore::new());
//!
//! let identity = ClientBuilder::new(Client::default()).build();
//! let service = Arc::new(SessionService::new(identity, &config, store.clone()));
//! let coordinator = RefreshCoordinator::new(service, store.clone(), Duration::from_secs(10));
//!
//! let client = ClientBuilder::new(Client::default())
//!     .with(
//!         RefreshingAuthMiddleware::new(store, coordinator)
//!             .with_predicate(SameOrigin::new(config.api_base())),
//!     )
//!     .build();
//! # drop(client);
//! ```
//!
//! The predicate decides which requests receive the credential. These
//! predicates can be composed together to evaluate more complex requirements
//! prior to attaching the credential to a request.
//!
//! ```
//! # use std::{sync::Arc, time::Duration};
//! # use postdeck_reqwest::RefreshingAuthMiddleware;
//! # use postdeck_tokens::{CredentialStore, InMemoryCredentialStore, RefreshCoordinator, SessionConfig, SessionService};
//! use postdeck_reqwest::{HttpsOnly, SameOrigin};
//! use predicates::prelude::PredicateBooleanExt;
//! # let config = SessionConfig::new("https://api.postdeck.example".parse().unwrap());
//! # let store: Arc<dyn CredentialStore> = Arc::new(InMemoryCredentialStore::new());
//! # let identity = reqwest_middleware::ClientBuilder::new(reqwest::Client::default()).build();
//! # let service = Arc::new(SessionService::new(identity, &config, store.clone()));
//! # let coordinator = RefreshCoordinator::new(service, store.clone(), Duration::from_secs(10));
//!
//! RefreshingAuthMiddleware::new(store, coordinator)
//!     .with_predicate(HttpsOnly.and(SameOrigin::new(config.api_base())));
//! ```

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    missing_copy_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

use std::{fmt, sync::Arc};

use bytes::{BufMut, BytesMut};
use postdeck_tokens::{AccessToken, AccessTokenRef, CredentialStore, RefreshCoordinator, RefreshOutcome};
use predicates::{prelude::*, reflection};
use reqwest::{header, Request, Response, StatusCode, Url};
use reqwest_middleware::{Middleware, Next, Result};

mod client;
mod context;
mod tags;

pub use client::ApiClient;
pub use context::{SessionContext, SessionContextBuilder};
pub use tags::{Tag, TagApi, TagId};

/// Whether and how a response was affected by a credential refresh
///
/// Attached to the extensions of every response that passes through a
/// [`RefreshingAuthMiddleware`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshVerdict {
    /// The response is the answer to the first attempt
    FirstAttempt,
    /// The credential was renewed and the response answers the retry
    Retried,
    /// The credential could not be renewed; the response is the original rejection
    Failed,
    /// The credential was renewed but the request body could not be replayed
    NotReplayable,
}

/// Marks a request that is being sent for the second time
///
/// A request carrying this marker is never retried again.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Retried;

/// A middleware that attaches the current credential and recovers from its expiry
#[derive(Clone)]
pub struct RefreshingAuthMiddleware<P> {
    store: Arc<dyn CredentialStore>,
    coordinator: RefreshCoordinator,
    predicate: P,
}

impl<P: fmt::Debug> fmt::Debug for RefreshingAuthMiddleware<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshingAuthMiddleware")
            .field("store", &self.store)
            .field("coordinator", &self.coordinator)
            .field("predicate", &self.predicate)
            .finish()
    }
}

impl RefreshingAuthMiddleware<HttpsOnly> {
    /// Construct a new middleware from a credential store and a coordinator
    ///
    /// By default, this middleware will only send the credential if the
    /// request is being sent via HTTPS. To change this behavior, provide a
    /// custom predicate with [`with_predicate()`][Self::with_predicate()].
    pub fn new(store: Arc<dyn CredentialStore>, coordinator: RefreshCoordinator) -> Self {
        Self {
            store,
            coordinator,
            predicate: HttpsOnly,
        }
    }

    /// Replaces the default predicate with a custom predicate
    pub fn with_predicate<P>(self, predicate: P) -> RefreshingAuthMiddleware<P> {
        RefreshingAuthMiddleware {
            store: self.store,
            coordinator: self.coordinator,
            predicate,
        }
    }
}

fn bearer(credential: &AccessTokenRef) -> Option<header::HeaderValue> {
    let mut header_value = BytesMut::with_capacity(credential.as_str().len() + 7);
    header_value.put_slice(b"Bearer ");
    header_value.put_slice(credential.as_str().as_bytes());

    match header::HeaderValue::from_maybe_shared(header_value) {
        Ok(mut value) => {
            value.set_sensitive(true);
            Some(value)
        }
        Err(_) => {
            tracing::warn!("credential is not a valid header value, sending without it");
            None
        }
    }
}

impl<P> RefreshingAuthMiddleware<P> {
    /// Attaches the stored credential, returning the one that was attached
    fn authorize(&self, req: &mut Request) -> Option<AccessToken> {
        let credential = self.store.get()?;
        let value = bearer(&credential)?;
        req.headers_mut().insert(header::AUTHORIZATION, value);
        tracing::trace!(
            credential = format_args!("{:#?}", credential),
            "attached stored credential"
        );
        Some(credential)
    }
}

#[async_trait::async_trait]
impl<P> Middleware for RefreshingAuthMiddleware<P>
where
    P: Predicate<Request> + Send + Sync + 'static,
{
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        let managed = self.predicate.eval(&req)
            && !req.headers().contains_key(header::AUTHORIZATION)
            && extensions.get::<Retried>().is_none();

        if !managed {
            return next.run(req, extensions).await;
        }

        let attached = self.store.generation();
        let sent = self.authorize(&mut req);
        let replay = req.try_clone();

        let mut resp = next.clone().run(req, extensions).await?;
        if resp.status() != StatusCode::UNAUTHORIZED {
            resp.extensions_mut().insert(RefreshVerdict::FirstAttempt);
            return Ok(resp);
        }

        tracing::debug!(
            request.url = %resp.url(),
            "request rejected as unauthorized, recovering credential"
        );

        let credential = match self.coordinator.recover(sent.as_deref(), attached).await {
            RefreshOutcome::Renewed(credential) => credential,
            RefreshOutcome::Failed => {
                resp.extensions_mut().insert(RefreshVerdict::Failed);
                return Ok(resp);
            }
        };

        let Some(mut retry) = replay else {
            tracing::warn!("request body cannot be replayed, returning the rejection");
            resp.extensions_mut().insert(RefreshVerdict::NotReplayable);
            return Ok(resp);
        };

        match bearer(&credential) {
            Some(value) => {
                retry.headers_mut().insert(header::AUTHORIZATION, value);
            }
            None => {
                retry.headers_mut().remove(header::AUTHORIZATION);
            }
        }

        extensions.insert(Retried);
        let mut resp = next.run(retry, extensions).await?;

        tracing::debug!(
            response.status = resp.status().as_u16(),
            "retried request with renewed credential"
        );

        resp.extensions_mut().insert(RefreshVerdict::Retried);
        Ok(resp)
    }
}

/// Only attach the credential if the request is being sent over HTTPS
#[derive(Clone, Copy, Debug)]
pub struct HttpsOnly;

impl Predicate<Request> for HttpsOnly {
    #[inline]
    fn eval(&self, req: &Request) -> bool {
        req.url().scheme() == "https"
    }

    fn find_case(&self, expected: bool, req: &Request) -> Option<reflection::Case> {
        let result = self.eval(req);
        if result != expected {
            Some(
                reflection::Case::new(Some(self), result).add_product(reflection::Product::new(
                    "scheme",
                    req.url().scheme().to_owned(),
                )),
            )
        } else {
            None
        }
    }
}

impl reflection::PredicateReflection for HttpsOnly {}
impl fmt::Display for HttpsOnly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("scheme is https")
    }
}

/// Only attach the credential if the request targets the origin of the API
///
/// The origin is the scheme, host and port of a URL; the path is ignored.
#[derive(Clone, Debug)]
pub struct SameOrigin {
    origin: url::Origin,
}

impl SameOrigin {
    /// Construct a new predicate from the base URL of the API
    pub fn new(api_base: &Url) -> Self {
        Self {
            origin: api_base.origin(),
        }
    }
}

impl Predicate<Request> for SameOrigin {
    #[inline]
    fn eval(&self, req: &Request) -> bool {
        req.url().origin() == self.origin
    }

    fn find_case(&self, expected: bool, req: &Request) -> Option<reflection::Case> {
        let result = self.eval(req);
        if result != expected {
            Some(
                reflection::Case::new(Some(self), result).add_product(reflection::Product::new(
                    "origin",
                    req.url().origin().ascii_serialization(),
                )),
            )
        } else {
            None
        }
    }
}

impl reflection::PredicateReflection for SameOrigin {}
impl fmt::Display for SameOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("origin == ")?;
        f.write_str(&self.origin.ascii_serialization())
    }
}

#[cfg(test)]
mod tests;
