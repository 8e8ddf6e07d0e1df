//! Calls against the identity backend

use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::Url;
use reqwest_middleware::{ClientWithMiddleware, RequestBuilder};
use serde::de::{DeserializeOwned, IgnoredAny};

use crate::{
    config::join_endpoint, coordinator::CredentialRefresher, stores::CredentialStore, wire,
    AccessToken, Availability, Identifier, Password, Reply, SessionConfig, SessionError,
    SessionRecord, SessionResult, VerificationCode,
};

mod dto;

/// Paths of the identity backend's endpoints, relative to the API base
pub mod endpoints {
    /// Logs in with an identifier and password
    pub const LOGIN: &str = "/auth/user/login";
    /// Registers and logs in with an identifier and password
    pub const SIGNUP: &str = "/auth/user/sign-up";
    /// Revokes the refresh cookie
    pub const LOGOUT: &str = "/auth/cookie";
    /// Issues a new access credential from the refresh cookie
    pub const TOKEN_REISSUE: &str = "/auth/user/token-reissue";
    /// Changes the password of the logged-in user
    pub const PASSWORD_CHANGE: &str = "/auth/user/password";
    /// Sends a temporary password to the user
    pub const PASSWORD_RESET: &str = "/auth/user/temporary-password";
    /// Sends a verification code to the user
    pub const REQUEST_CODE: &str = "/auth/user/code";
    /// Checks a verification code
    pub const VERIFY_CODE: &str = "/auth/user/certification";
    /// Looks up whether an identifier is registered
    pub const CHECK_IDENTIFIER: &str = "/public/user";
}

/// The minimum length of a new password
pub const MIN_PASSWORD_LEN: usize = 6;

const LOGGED_OUT: &str = "logged out";

/// Request builders for the identity operations of the postdeck backend
///
/// Every call is a single round trip. Expected failures are returned as
/// [`SessionError`] values; the credential store is only written on success,
/// except for [`logout()`][Self::logout()], which always clears it.
///
/// The service talks to the backend through its own transport, which must
/// not include the refreshing middleware: identity calls are never retried.
pub struct SessionService {
    client: ClientWithMiddleware,
    api_base: Url,
    store: Arc<dyn CredentialStore>,
    timeout: Duration,
}

impl fmt::Debug for SessionService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionService")
            .field("api_base", &self.api_base.as_str())
            .field("store", &self.store)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl SessionService {
    /// Constructs a new session service
    pub fn new(
        client: ClientWithMiddleware,
        config: &SessionConfig,
        store: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            client,
            api_base: config.api_base().clone(),
            store,
            timeout: config.refresh_timeout(),
        }
    }

    /// The store this service writes credentials into
    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    /// Logs in, storing the issued credential and a new session record
    #[tracing::instrument(err, skip(self, password))]
    pub async fn login(&self, identifier: &str, password: &str) -> SessionResult<SessionRecord> {
        self.authenticate(endpoints::LOGIN, identifier, password)
            .await
    }

    /// Registers a new account and logs in to it
    #[tracing::instrument(err, skip(self, password))]
    pub async fn signup(&self, identifier: &str, password: &str) -> SessionResult<SessionRecord> {
        self.authenticate(endpoints::SIGNUP, identifier, password)
            .await
    }

    async fn authenticate(
        &self,
        path: &str,
        identifier: &str,
        password: &str,
    ) -> SessionResult<SessionRecord> {
        let identifier = parse_identifier(identifier)?;
        let password = parse_password(password)?;

        let request = self.client.post(self.endpoint(path)?).json(&dto::CredentialsRequest {
            identifier: &identifier,
            password: &password,
        });

        let reply = self.send::<dto::IssuedCredential>(request).await?;
        let Some(issued) = reply.data else {
            return Err(SessionError::UnexpectedResponse {
                status: reqwest::StatusCode::OK,
                message: "credential missing from response".to_owned(),
            });
        };

        let session = SessionRecord::new(
            &identifier,
            issued.account_type.unwrap_or_default(),
            issued.plan_type.unwrap_or_default(),
        );
        self.store.establish(issued.access_token, session.clone());

        tracing::info!(
            account_type = %session.account_type,
            plan_type = %session.plan_type,
            "session established"
        );

        Ok(Reply::new(reply.message, session))
    }

    /// Logs out
    ///
    /// The local session is cleared before the backend is asked to revoke the
    /// refresh cookie, and the call reports success whatever the backend says.
    #[tracing::instrument(skip(self))]
    pub async fn logout(&self) -> Reply<()> {
        let credential = self.store.get();
        self.store.clear();
        tracing::info!("cleared local session");

        let revoke = async {
            let mut request = self.client.delete(self.endpoint(endpoints::LOGOUT)?);
            if let Some(credential) = &credential {
                request = request.bearer_auth(credential.as_str());
            }
            self.send::<IgnoredAny>(request).await
        };

        match revoke.await {
            Ok(reply) => Reply::new(reply.message, ()),
            Err(error) => {
                tracing::warn!(
                    error = (&error as &dyn std::error::Error),
                    "unable to revoke session on backend"
                );
                Reply::new(LOGGED_OUT, ())
            }
        }
    }

    /// Asks the backend to send a verification code to `identifier`
    ///
    /// Some deployments echo the code back; it is returned when present.
    #[tracing::instrument(err, skip(self))]
    pub async fn request_verification_code(
        &self,
        identifier: &str,
    ) -> SessionResult<Option<VerificationCode>> {
        let identifier = parse_identifier(identifier)?;
        let request = self
            .client
            .post(self.endpoint(endpoints::REQUEST_CODE)?)
            .json(&dto::CodeRequest {
                email: &identifier,
            });

        let reply = self.send::<dto::EchoedCode>(request).await?;
        Ok(reply.map(|code| code.map(|c| VerificationCode::from(c.into_text()))))
    }

    /// Checks a verification code sent to `identifier`
    #[tracing::instrument(err, skip(self, code))]
    pub async fn verify_code(&self, identifier: &str, code: &str) -> SessionResult<()> {
        let identifier = parse_identifier(identifier)?;
        let code = parse_code(code)?;
        let request = self
            .client
            .post(self.endpoint(endpoints::VERIFY_CODE)?)
            .json(&dto::VerificationRequest {
                email: &identifier,
                code: &code,
            });

        Ok(self.send::<IgnoredAny>(request).await?.map(drop))
    }

    /// Asks the backend to send a temporary password to `identifier`
    #[tracing::instrument(err, skip(self))]
    pub async fn request_password_reset(&self, identifier: &str) -> SessionResult<()> {
        let identifier = parse_identifier(identifier)?;
        let request = self
            .client
            .get(self.endpoint(endpoints::PASSWORD_RESET)?)
            .query(&[("email", identifier.as_str())]);

        Ok(self.send::<IgnoredAny>(request).await?.map(drop))
    }

    /// Changes the password of the logged-in user
    ///
    /// Fails without contacting the backend if no credential is stored.
    #[tracing::instrument(err, skip_all)]
    pub async fn change_password(&self, old: &str, new: &str) -> SessionResult<()> {
        let Some(credential) = self.store.get() else {
            return Err(SessionError::unauthorized("authentication required"));
        };
        let old = parse_password(old)?;
        let new = parse_new_password(new)?;

        let request = self
            .client
            .patch(self.endpoint(endpoints::PASSWORD_CHANGE)?)
            .bearer_auth(credential.as_str())
            .json(&dto::PasswordChangeRequest {
                old_password: &old,
                new_password: &new,
            });

        Ok(self.send::<IgnoredAny>(request).await?.map(drop))
    }

    /// Checks whether `identifier` can be used to register a new account
    ///
    /// The backend answers `200 OK` when the identifier is free and
    /// `409 Conflict` when an account already uses it.
    #[tracing::instrument(err, skip(self))]
    pub async fn check_identifier(&self, identifier: &str) -> SessionResult<Availability> {
        let identifier = parse_identifier(identifier)?;
        let request = self
            .client
            .get(self.endpoint(endpoints::CHECK_IDENTIFIER)?)
            .query(&[("identifier", identifier.as_str())]);

        match self.send::<IgnoredAny>(request).await {
            Ok(reply) => Ok(reply.map(|_| Availability::Available)),
            Err(SessionError::Conflict { message }) => Ok(Reply::new(message, Availability::Taken)),
            Err(error) => Err(error),
        }
    }

    /// Exchanges the refresh cookie for a new access credential
    ///
    /// On success the new credential is written to the store, unless the
    /// session was ended or replaced while the request was outstanding. Any
    /// failure, including that one, is reported as
    /// [`SessionError::RefreshFailed`]; the cause is logged.
    #[tracing::instrument(skip(self))]
    pub async fn refresh(&self) -> Result<AccessToken, SessionError> {
        let generation = self.store.generation();
        let reissue = async {
            let request = self
                .client
                .post(self.endpoint(endpoints::TOKEN_REISSUE)?)
                .json(&serde_json::Map::new());
            self.send::<dto::IssuedCredential>(request).await
        };

        match reissue.await {
            Ok(Reply {
                data: Some(issued),
                ..
            }) => {
                if !self.store.set_if(generation, issued.access_token.clone()) {
                    tracing::info!("session ended while reissuing, discarding credential");
                    return Err(SessionError::RefreshFailed);
                }
                tracing::info!("received new access credential");
                Ok(issued.access_token)
            }
            Ok(_) => {
                tracing::warn!("credential missing from reissue response");
                Err(SessionError::RefreshFailed)
            }
            Err(error) => {
                tracing::warn!(
                    error = (&error as &dyn std::error::Error),
                    "unable to reissue credential"
                );
                Err(SessionError::RefreshFailed)
            }
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, SessionError> {
        Ok(join_endpoint(&self.api_base, path)?)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> SessionResult<Option<T>> {
        let resp = request.timeout(self.timeout).send().await?;
        wire::read_reply(resp).await
    }
}

#[async_trait]
impl CredentialRefresher for SessionService {
    async fn refresh_credential(&self) -> Result<AccessToken, SessionError> {
        self.refresh().await
    }
}

fn parse_identifier(raw: &str) -> Result<Identifier, SessionError> {
    let raw = raw.trim();
    let plausible = !raw.chars().any(char::is_whitespace)
        && match raw.split_once('@') {
            Some((local, domain)) => {
                !local.is_empty()
                    && !domain.contains('@')
                    && domain.contains('.')
                    && !domain.starts_with('.')
                    && !domain.ends_with('.')
            }
            None => false,
        };

    if plausible {
        Ok(Identifier::from(raw))
    } else {
        Err(SessionError::validation("identifier must be an email address"))
    }
}

fn parse_password(raw: &str) -> Result<Password, SessionError> {
    if raw.is_empty() {
        Err(SessionError::validation("password must not be empty"))
    } else {
        Ok(Password::from(raw))
    }
}

fn parse_new_password(raw: &str) -> Result<Password, SessionError> {
    if raw.chars().count() < MIN_PASSWORD_LEN {
        Err(SessionError::validation(format!(
            "new password must be at least {MIN_PASSWORD_LEN} characters"
        )))
    } else {
        Ok(Password::from(raw))
    }
}

fn parse_code(raw: &str) -> Result<VerificationCode, SessionError> {
    let raw = raw.trim();
    if !raw.is_empty() && raw.chars().all(|c| c.is_ascii_digit()) {
        Ok(VerificationCode::from(raw))
    } else {
        Err(SessionError::validation("verification code must be numeric"))
    }
}
