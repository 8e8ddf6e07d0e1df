use reqwest::{Method, StatusCode, Url};
use reqwest_middleware::ClientWithMiddleware;
use serde::{de::DeserializeOwned, Serialize};

use postdeck_tokens::{config, wire, SessionError, SessionResult};

use crate::RefreshVerdict;

/// The single entry point for application calls against the postdeck API
///
/// Requests are sent through a transport that is expected to include a
/// [`RefreshingAuthMiddleware`](crate::RefreshingAuthMiddleware), so callers
/// never attach or refresh credentials themselves.
#[derive(Clone, Debug)]
pub struct ApiClient {
    client: ClientWithMiddleware,
    api_base: Url,
}

impl ApiClient {
    /// Constructs a client for the API rooted at `api_base`
    pub fn new(client: ClientWithMiddleware, api_base: Url) -> Self {
        Self { client, api_base }
    }

    /// The base URL requests are resolved against
    pub fn api_base(&self) -> &Url {
        &self.api_base
    }

    /// Sends a request to `path` and decodes the enveloped reply
    ///
    /// A `401 Unauthorized` that could not be recovered by refreshing the
    /// credential is reported as [`SessionError::RefreshFailed`]; the session
    /// has been cleared by then.
    #[tracing::instrument(err, skip(self, body), fields(api.method = %method))]
    pub async fn request<T, B>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> SessionResult<Option<T>>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let url = config::join_endpoint(&self.api_base, path)?;

        let mut request = self.client.request(method, url);
        if let Some(body) = body {
            request = request.json(body);
        }

        let resp = request.send().await?;

        let verdict = resp.extensions().get::<RefreshVerdict>().copied();
        if resp.status() == StatusCode::UNAUTHORIZED && verdict == Some(RefreshVerdict::Failed) {
            return Err(SessionError::RefreshFailed);
        }

        wire::read_reply(resp).await
    }

    /// Sends a `GET` request to `path`
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> SessionResult<Option<T>> {
        self.request::<T, ()>(Method::GET, path, None).await
    }

    /// Sends a `POST` request with a JSON `body` to `path`
    pub async fn post<T, B>(&self, path: &str, body: &B) -> SessionResult<Option<T>>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request(Method::POST, path, Some(body)).await
    }

    /// Sends a `PATCH` request with a JSON `body` to `path`
    pub async fn patch<T, B>(&self, path: &str, body: &B) -> SessionResult<Option<T>>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request(Method::PATCH, path, Some(body)).await
    }

    /// Sends a `DELETE` request to `path`
    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> SessionResult<Option<T>> {
        self.request::<T, ()>(Method::DELETE, path, None).await
    }
}
