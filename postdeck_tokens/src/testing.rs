//! A scripted stand-in for the postdeck backend
//!
//! [`ScriptedBackend`] is a terminal middleware: requests that reach it are
//! recorded and answered by a handler instead of being sent over the network.

use std::{future::Future, io, pin::Pin, sync::Arc};

use parking_lot::Mutex;
use reqwest::{header, Method, Request, Response};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, Middleware, Next};
use serde_json::{json, Value};

/// A request as observed by the scripted backend
#[derive(Clone, Debug, PartialEq)]
pub struct RecordedRequest {
    /// The request method
    pub method: Method,
    /// The request path
    pub path: String,
    /// The raw query string, if any
    pub query: Option<String>,
    /// The `Authorization` header, if any
    pub authorization: Option<String>,
    /// The JSON body, if any
    pub body: Option<Value>,
}

impl RecordedRequest {
    fn capture(req: &Request) -> Self {
        Self {
            method: req.method().clone(),
            path: req.url().path().to_owned(),
            query: req.url().query().map(ToOwned::to_owned),
            authorization: req
                .headers()
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .map(ToOwned::to_owned),
            body: req
                .body()
                .and_then(|b| b.as_bytes())
                .and_then(|b| serde_json::from_slice(b).ok()),
        }
    }

    /// Whether this request targeted `method` and `path`
    pub fn is(&self, method: &Method, path: &str) -> bool {
        &self.method == method && self.path == path
    }
}

/// The answer a scripted backend gives to a request
#[derive(Clone, Debug)]
pub enum Scripted {
    /// Respond with a status and a JSON body
    Respond(u16, Value),
    /// Fail as though the backend could not be reached in time
    TimedOut,
}

impl Scripted {
    /// `200 OK` carrying `data` in the standard envelope
    pub fn ok(data: Value) -> Self {
        Self::Respond(200, json!({ "data": data, "statusCode": 200, "message": "ok" }))
    }

    /// A failure status carrying `message` in the standard error shape
    pub fn error(status: u16, message: &str) -> Self {
        Self::Respond(
            status,
            json!({ "code": status, "message": { "message": message, "statusCode": status } }),
        )
    }

    /// `200 OK` issuing `token` as the new access credential
    pub fn issued(token: &str) -> Self {
        Self::ok(json!({ "accessToken": token, "accountType": "PERSONAL", "planType": "FREE" }))
    }
}

type Handler = dyn Fn(RecordedRequest) -> Pin<Box<dyn Future<Output = Scripted> + Send>>
    + Send
    + Sync;

/// A backend whose answers are produced by a handler
pub struct ScriptedBackend {
    handler: Box<Handler>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl std::fmt::Debug for ScriptedBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedBackend")
            .field("requests", &self.requests.lock().len())
            .finish()
    }
}

impl ScriptedBackend {
    /// Constructs a backend answering every request with `handler`
    pub fn new<F, Fut>(handler: F) -> Arc<Self>
    where
        F: Fn(RecordedRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Scripted> + Send + 'static,
    {
        Arc::new(Self {
            handler: Box::new(
                move |req| -> Pin<Box<dyn Future<Output = Scripted> + Send>> {
                    Box::pin(handler(req))
                },
            ),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// A client whose requests all end at this backend
    pub fn client(self: &Arc<Self>) -> ClientWithMiddleware {
        ClientBuilder::new(reqwest::Client::new())
            .with_arc(self.clone())
            .build()
    }

    /// Every request received so far, in arrival order
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    /// The number of requests received for `method` and `path`
    pub fn count(&self, method: &Method, path: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.is(method, path))
            .count()
    }
}

#[async_trait::async_trait]
impl Middleware for ScriptedBackend {
    async fn handle(
        &self,
        req: Request,
        _: &mut http::Extensions,
        _: Next<'_>,
    ) -> reqwest_middleware::Result<Response> {
        let recorded = RecordedRequest::capture(&req);
        self.requests.lock().push(recorded.clone());

        match (self.handler)(recorded).await {
            Scripted::Respond(status, body) => Ok(http::Response::builder()
                .status(status)
                .header(header::CONTENT_TYPE, "application/json")
                .body(body.to_string())
                .map_err(reqwest_middleware::Error::middleware)?
                .into()),
            Scripted::TimedOut => Err(reqwest_middleware::Error::middleware(io::Error::new(
                io::ErrorKind::TimedOut,
                "backend did not answer in time",
            ))),
        }
    }
}
