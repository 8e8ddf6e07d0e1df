//! Wiring of the session components for one user session

use std::{fmt, sync::Arc};

use postdeck_tokens::{
    CredentialStore, FileCredentialStore, InMemoryCredentialStore, RefreshCoordinator,
    SessionConfig, SessionError, SessionRecord, SessionService,
};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, Middleware};

use crate::{ApiClient, RefreshingAuthMiddleware, SameOrigin, TagApi};

/// The components of one session, constructed and owned explicitly
///
/// Everything that depends on the current credential shares the same
/// [`CredentialStore`], so a refresh performed on behalf of one request is
/// observed by all of them.
#[derive(Clone)]
pub struct SessionContext {
    config: SessionConfig,
    store: Arc<dyn CredentialStore>,
    service: Arc<SessionService>,
    coordinator: RefreshCoordinator,
    api: ApiClient,
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("api_base", &self.config.api_base().as_str())
            .field("store", &self.store)
            .field("coordinator", &self.coordinator)
            .finish()
    }
}

impl SessionContext {
    /// Starts building a context from `config`
    pub fn builder(config: SessionConfig) -> SessionContextBuilder {
        SessionContextBuilder {
            config,
            client: None,
            store: None,
            layers: Vec::new(),
        }
    }

    /// The identity calls
    pub fn service(&self) -> &SessionService {
        &self.service
    }

    /// The client for application calls
    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    /// Tag management calls
    pub fn tags(&self) -> TagApi<'_> {
        TagApi::new(&self.api)
    }

    /// The store holding the current credential
    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    /// The coordinator for credential refreshes
    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    /// The configuration the context was built from
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Whether a credential is currently held
    pub fn is_authenticated(&self) -> bool {
        self.store.is_authenticated()
    }

    /// The logged-in user, if any
    pub fn session(&self) -> Option<SessionRecord> {
        self.store.session()
    }
}

/// A builder for a [`SessionContext`]
pub struct SessionContextBuilder {
    config: SessionConfig,
    client: Option<reqwest::Client>,
    store: Option<Arc<dyn CredentialStore>>,
    layers: Vec<Arc<dyn Middleware>>,
}

impl fmt::Debug for SessionContextBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContextBuilder")
            .field("config", &self.config)
            .field("store", &self.store)
            .field("layers", &self.layers.len())
            .finish()
    }
}

impl SessionContextBuilder {
    /// Uses `client` instead of a client with its own cookie store
    ///
    /// The refresh cookie issued at login is only sent back if `client`
    /// keeps cookies.
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Uses `store` instead of the store implied by the configuration
    pub fn with_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Appends a middleware to both transports, after the credential layer
    pub fn with<M: Middleware>(self, middleware: M) -> Self {
        self.with_arc(Arc::new(middleware))
    }

    /// Appends a shared middleware to both transports, after the credential layer
    pub fn with_arc(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.layers.push(middleware);
        self
    }

    /// Builds the context
    ///
    /// The store is file-backed when the configuration names a credential
    /// file and in memory otherwise.
    pub fn build(self) -> Result<SessionContext, SessionError> {
        let client = match self.client {
            Some(client) => client,
            None => reqwest::Client::builder().cookie_store(true).build()?,
        };

        let store: Arc<dyn CredentialStore> = match (self.store, self.config.credential_file()) {
            (Some(store), _) => store,
            (None, Some(path)) => Arc::new(FileCredentialStore::open(path)),
            (None, None) => Arc::new(InMemoryCredentialStore::new()),
        };

        let identity = transport(ClientBuilder::new(client.clone()), &self.layers);
        let service = Arc::new(SessionService::new(identity, &self.config, store.clone()));

        let coordinator = RefreshCoordinator::new(
            service.clone(),
            store.clone(),
            self.config.refresh_timeout(),
        );

        let credential_layer = RefreshingAuthMiddleware::new(store.clone(), coordinator.clone())
            .with_predicate(SameOrigin::new(self.config.api_base()));
        let api = ApiClient::new(
            transport(ClientBuilder::new(client).with(credential_layer), &self.layers),
            self.config.api_base().clone(),
        );

        tracing::debug!(
            api_base = %self.config.api_base(),
            authenticated = store.is_authenticated(),
            "session context ready"
        );

        Ok(SessionContext {
            config: self.config,
            store,
            service,
            coordinator,
            api,
        })
    }
}

fn transport(mut builder: ClientBuilder, layers: &[Arc<dyn Middleware>]) -> ClientWithMiddleware {
    for layer in layers {
        builder = builder.with_arc(layer.clone());
    }
    builder.build()
}
