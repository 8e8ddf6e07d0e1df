use std::{
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    time::Duration,
};

use postdeck_tokens::{
    service::endpoints,
    testing::{RecordedRequest, Scripted, ScriptedBackend},
    CredentialRefresher, ErrorKind, InMemoryCredentialStore, RefreshState, SessionConfig,
    SessionError,
};
use reqwest::{Client, Method};
use reqwest_middleware::ClientBuilder;
use serde_json::json;
use tokio::sync::Semaphore;

use super::*;
use crate::SessionContext;

const STORED_TOKEN: &str = "this-is-a-stored-token";
const BEARER_STORED_TOKEN: &str = "Bearer this-is-a-stored-token";
const API_BASE: &str = "https://api.postdeck.test";

struct AuthChecker {
    expected_authorization: String,
    checked: AtomicBool,
}

impl AuthChecker {
    pub fn new(expected: impl Into<String>) -> Self {
        Self {
            expected_authorization: expected.into(),
            checked: AtomicBool::new(false),
        }
    }
}

#[async_trait::async_trait]
impl Middleware for AuthChecker {
    async fn handle(
        &self,
        req: Request,
        _: &mut http::Extensions,
        _: Next<'_>,
    ) -> Result<Response> {
        let authorization_header = req
            .headers()
            .get(header::AUTHORIZATION)
            .expect("no authorization header")
            .to_str()
            .expect("authorization header was not valid UTF-8");

        assert_eq!(authorization_header, self.expected_authorization);
        self.checked.store(true, Ordering::Release);

        Ok(http::Response::<&[u8]>::default().into())
    }
}

#[derive(Default)]
struct NoAuthChecker {
    checked: AtomicBool,
}

#[async_trait::async_trait]
impl Middleware for NoAuthChecker {
    async fn handle(
        &self,
        req: Request,
        _: &mut http::Extensions,
        _: Next<'_>,
    ) -> Result<Response> {
        assert_eq!(req.headers().get(header::AUTHORIZATION), None);
        self.checked.store(true, Ordering::Release);

        Ok(http::Response::<&[u8]>::default().into())
    }
}

/// Rejects every request, counting how many it saw
#[derive(Default)]
struct AlwaysUnauthorized {
    seen: AtomicUsize,
}

#[async_trait::async_trait]
impl Middleware for AlwaysUnauthorized {
    async fn handle(
        &self,
        _: Request,
        _: &mut http::Extensions,
        _: Next<'_>,
    ) -> Result<Response> {
        self.seen.fetch_add(1, Ordering::AcqRel);
        Ok(http::Response::builder()
            .status(StatusCode::UNAUTHORIZED)
            .body("")
            .unwrap()
            .into())
    }
}

#[derive(Default)]
struct CountingRefresher {
    calls: AtomicUsize,
}

#[async_trait::async_trait]
impl CredentialRefresher for CountingRefresher {
    async fn refresh_credential(&self) -> std::result::Result<AccessToken, SessionError> {
        self.calls.fetch_add(1, Ordering::AcqRel);
        Err(SessionError::RefreshFailed)
    }
}

fn prepare_middleware() -> (RefreshingAuthMiddleware<HttpsOnly>, Arc<CountingRefresher>) {
    let store: Arc<dyn CredentialStore> = Arc::new(InMemoryCredentialStore::with_credential(
        AccessToken::from_static(STORED_TOKEN),
    ));
    let refresher = Arc::new(CountingRefresher::default());
    let coordinator =
        RefreshCoordinator::new(refresher.clone(), store.clone(), Duration::from_secs(1));

    (RefreshingAuthMiddleware::new(store, coordinator), refresher)
}

fn tags_body() -> serde_json::Value {
    json!([{
        "id": 1,
        "name": "launch",
        "createdAt": "2025-03-01T09:00:00Z",
        "updatedAt": "2025-03-02T09:00:00Z",
    }])
}

fn context_with(
    credential: Option<&'static str>,
    backend: &Arc<ScriptedBackend>,
) -> SessionContext {
    let store = match credential {
        Some(credential) => {
            InMemoryCredentialStore::with_credential(AccessToken::from_static(credential))
        }
        None => InMemoryCredentialStore::new(),
    };

    SessionContext::builder(SessionConfig::new(API_BASE.parse().unwrap()))
        .with_client(Client::new())
        .with_store(Arc::new(store))
        .with_arc(backend.clone())
        .build()
        .unwrap()
}

/// Accepts `T2` on the tag listing, rejects anything else and reissues `T2`
fn rotating_backend(
    reissue: Scripted,
) -> impl Fn(RecordedRequest) -> Scripted + Send + Sync + 'static {
    move |req| {
        if req.is(&Method::POST, endpoints::TOKEN_REISSUE) {
            reissue.clone()
        } else if req.authorization.as_deref() == Some("Bearer T2") {
            Scripted::ok(tags_body())
        } else {
            Scripted::error(401, "jwt expired")
        }
    }
}

/// Like [`rotating_backend`], but holds the reissue until `gate` is opened
fn gated_backend(gate: Arc<Semaphore>, reissue: Scripted) -> Arc<ScriptedBackend> {
    let respond = rotating_backend(reissue);
    ScriptedBackend::new(move |req| {
        let gate = req
            .is(&Method::POST, endpoints::TOKEN_REISSUE)
            .then(|| gate.clone());
        let answer = respond(req);
        async move {
            if let Some(gate) = gate {
                let _permit = gate.acquire().await;
            }
            answer
        }
    })
}

async fn open_when_waiting(context: &SessionContext, gate: &Semaphore, waiting: usize) {
    while context.coordinator().waiting() < waiting {
        tokio::task::yield_now().await;
    }
    gate.add_permits(1);
}

mod when_request_does_not_have_an_authorization_header {
    use super::*;

    #[tokio::test]
    async fn middleware_with_defaults_attaches_stored_credential_on_https_request() {
        let (middleware, _) = prepare_middleware();
        let auth_checker = Arc::new(AuthChecker::new(BEARER_STORED_TOKEN));

        let client = ClientBuilder::new(Client::default())
            .with(middleware)
            .with_arc(auth_checker.clone())
            .build();

        let resp = client.get("https://example.com").send().await.unwrap();

        assert_eq!(resp.status(), http::StatusCode::OK);
        assert_eq!(
            resp.extensions().get::<RefreshVerdict>(),
            Some(&RefreshVerdict::FirstAttempt)
        );
        assert!(auth_checker.checked.load(Ordering::Acquire));
    }

    #[tokio::test]
    async fn middleware_sends_nothing_when_no_credential_is_stored() {
        let (middleware, _) = prepare_middleware();
        middleware.store.clear();
        let auth_checker = Arc::new(NoAuthChecker::default());

        let client = ClientBuilder::new(Client::default())
            .with(middleware)
            .with_arc(auth_checker.clone())
            .build();

        client.get("https://example.com").send().await.unwrap();

        assert!(auth_checker.checked.load(Ordering::Acquire));
    }

    mod and_predicate_evaluates_to_attach {
        use super::*;

        #[tokio::test]
        async fn middleware_attaches_stored_credential() {
            let (middleware, _) = prepare_middleware();
            let middleware = middleware.with_predicate(predicate::always());
            let auth_checker = Arc::new(AuthChecker::new(BEARER_STORED_TOKEN));

            let client = ClientBuilder::new(Client::default())
                .with(middleware)
                .with_arc(auth_checker.clone())
                .build();

            let resp = client.get("http://example.com").send().await.unwrap();

            assert_eq!(resp.status(), http::StatusCode::OK);
            assert!(auth_checker.checked.load(Ordering::Acquire));
        }
    }

    mod and_predicate_evaluates_to_ignore {
        use super::*;

        #[tokio::test]
        async fn middleware_does_not_attach_stored_credential() {
            let (middleware, _) = prepare_middleware();
            let middleware = middleware.with_predicate(SameOrigin::new(&API_BASE.parse().unwrap()));
            let auth_checker = Arc::new(NoAuthChecker::default());

            let client = ClientBuilder::new(Client::default())
                .with(middleware)
                .with_arc(auth_checker.clone())
                .build();

            let resp = client.get("https://example.com").send().await.unwrap();

            assert_eq!(resp.status(), http::StatusCode::OK);
            assert_eq!(resp.extensions().get::<RefreshVerdict>(), None);
            assert!(auth_checker.checked.load(Ordering::Acquire));
        }

        #[tokio::test]
        async fn rejection_is_not_refreshed() {
            let (middleware, refresher) = prepare_middleware();
            let middleware = middleware.with_predicate(predicate::never());
            let backend = Arc::new(AlwaysUnauthorized::default());

            let client = ClientBuilder::new(Client::default())
                .with(middleware)
                .with_arc(backend.clone())
                .build();

            let resp = client.get("https://example.com").send().await.unwrap();

            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
            assert_eq!(backend.seen.load(Ordering::Acquire), 1);
            assert_eq!(refresher.calls.load(Ordering::Acquire), 0);
        }
    }
}

mod when_request_already_contains_an_authorization_header {
    use super::*;

    #[tokio::test]
    async fn middleware_does_not_attach_stored_credential() {
        const OVERRIDE_TOKEN: &str = "overridden!";
        // Reqwest uses a capital `B` bearer
        const BEARER_OVERRIDE_TOKEN: &str = "Bearer overridden!";

        let (middleware, _) = prepare_middleware();
        let auth_checker = Arc::new(AuthChecker::new(BEARER_OVERRIDE_TOKEN));

        let client = ClientBuilder::new(Client::default())
            .with(middleware)
            .with_arc(auth_checker.clone())
            .build();

        let resp = client
            .get("https://example.com")
            .bearer_auth(OVERRIDE_TOKEN)
            .send()
            .await
            .unwrap();

        assert_eq!(resp.status(), http::StatusCode::OK);
        assert!(auth_checker.checked.load(Ordering::Acquire));
    }

    #[tokio::test]
    async fn rejection_is_not_refreshed() {
        let (middleware, refresher) = prepare_middleware();
        let backend = Arc::new(AlwaysUnauthorized::default());

        let client = ClientBuilder::new(Client::default())
            .with(middleware)
            .with_arc(backend.clone())
            .build();

        let resp = client
            .get("https://example.com")
            .bearer_auth("overridden!")
            .send()
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(backend.seen.load(Ordering::Acquire), 1);
        assert_eq!(refresher.calls.load(Ordering::Acquire), 0);
        assert_eq!(resp.extensions().get::<RefreshVerdict>(), None);
    }
}

mod when_the_credential_is_rejected {
    use super::*;

    #[tokio::test]
    async fn request_is_retried_once_with_the_renewed_credential() {
        let backend = ScriptedBackend::new({
            let respond = rotating_backend(Scripted::issued("T2"));
            move |req| std::future::ready(respond(req))
        });
        let context = context_with(Some("T1"), &backend);

        let tags = context.tags().list().await.unwrap();

        assert_eq!(tags.data.len(), 1);
        assert_eq!(tags.data[0].name, "launch");
        assert_eq!(context.store().get(), Some(AccessToken::from_static("T2")));

        let listing: Vec<_> = backend
            .requests()
            .into_iter()
            .filter(|r| r.is(&Method::GET, "/user/tags"))
            .map(|r| r.authorization)
            .collect();
        assert_eq!(
            listing,
            [Some("Bearer T1".to_owned()), Some("Bearer T2".to_owned())]
        );
        assert_eq!(backend.count(&Method::POST, endpoints::TOKEN_REISSUE), 1);
    }

    #[tokio::test]
    async fn concurrent_rejections_share_one_refresh() {
        let gate = Arc::new(Semaphore::new(0));
        let backend = gated_backend(gate.clone(), Scripted::issued("T2"));
        let context = context_with(Some("T1"), &backend);

        let tags = context.tags();
        let (a, b, c, ()) = tokio::join!(
            tags.list(),
            tags.list(),
            tags.list(),
            open_when_waiting(&context, &gate, 2),
        );

        for result in [a, b, c] {
            assert_eq!(result.unwrap().data.len(), 1);
        }

        assert_eq!(backend.count(&Method::POST, endpoints::TOKEN_REISSUE), 1);
        assert_eq!(context.coordinator().episodes(), 1);
        assert_eq!(context.store().get(), Some(AccessToken::from_static("T2")));

        let authorizations: Vec<_> = backend
            .requests()
            .into_iter()
            .filter(|r| r.is(&Method::GET, "/user/tags"))
            .map(|r| r.authorization)
            .collect();
        let sent_with = |token: &str| {
            authorizations
                .iter()
                .filter(|a| a.as_deref() == Some(token))
                .count()
        };
        assert_eq!(sent_with("Bearer T1"), 3);
        assert_eq!(sent_with("Bearer T2"), 3);
    }

    #[tokio::test]
    async fn failed_refresh_ends_the_session_for_every_caller() {
        let gate = Arc::new(Semaphore::new(0));
        let backend = gated_backend(gate.clone(), Scripted::error(401, "refresh cookie expired"));
        let context = context_with(Some("T1"), &backend);

        let tags = context.tags();
        let (a, b, ()) = tokio::join!(
            tags.list(),
            tags.list(),
            open_when_waiting(&context, &gate, 1),
        );

        for result in [a, b] {
            let error = result.unwrap_err();
            assert!(matches!(error, SessionError::RefreshFailed));
            assert!(error.requires_login());
        }

        assert_eq!(backend.count(&Method::POST, endpoints::TOKEN_REISSUE), 1);
        assert_eq!(backend.count(&Method::GET, "/user/tags"), 2);
        assert!(!context.is_authenticated());
        assert!(context.session().is_none());
    }

    #[tokio::test]
    async fn second_rejection_is_terminal() {
        let backend = ScriptedBackend::new(|req: RecordedRequest| {
            std::future::ready(if req.is(&Method::POST, endpoints::TOKEN_REISSUE) {
                Scripted::issued("T2")
            } else {
                Scripted::error(401, "forbidden for this account")
            })
        });
        let context = context_with(Some("T1"), &backend);

        let error = context.tags().list().await.unwrap_err();

        assert_eq!(error.kind(), ErrorKind::Unauthorized);
        assert_eq!(backend.count(&Method::GET, "/user/tags"), 2);
        assert_eq!(backend.count(&Method::POST, endpoints::TOKEN_REISSUE), 1);
        assert_eq!(context.store().get(), Some(AccessToken::from_static("T2")));
    }

    #[tokio::test]
    async fn missing_credential_is_recovered_from_the_refresh_cookie() {
        let backend = ScriptedBackend::new({
            let respond = rotating_backend(Scripted::issued("T2"));
            move |req| std::future::ready(respond(req))
        });
        let context = context_with(None, &backend);

        let tags = context.tags().list().await.unwrap();

        assert_eq!(tags.data.len(), 1);
        assert!(context.is_authenticated());
    }

    #[tokio::test]
    async fn unreachable_refresh_is_a_failed_refresh() {
        let backend = ScriptedBackend::new({
            let respond = rotating_backend(Scripted::TimedOut);
            move |req| std::future::ready(respond(req))
        });
        let context = context_with(Some("T1"), &backend);

        let error = context.tags().list().await.unwrap_err();

        assert!(matches!(error, SessionError::RefreshFailed));
        assert!(!context.is_authenticated());
    }
}

mod when_the_session_ends_during_a_refresh {
    use super::*;

    #[tokio::test]
    async fn logout_is_not_undone_by_the_refresh_in_flight() {
        let gate = Arc::new(Semaphore::new(0));
        let backend = gated_backend(gate.clone(), Scripted::issued("T2"));
        let context = context_with(Some("T1"), &backend);

        let tags = context.tags();
        let (listing, ()) = tokio::join!(tags.list(), async {
            while context.coordinator().state() != RefreshState::Refreshing {
                tokio::task::yield_now().await;
            }
            context.service().logout().await;
            assert!(!context.is_authenticated());
            gate.add_permits(1);
        });

        assert!(matches!(listing.unwrap_err(), SessionError::RefreshFailed));
        assert!(!context.is_authenticated());
        assert!(context.store().get().is_none());
        assert!(context.session().is_none());
        assert_eq!(context.coordinator().state(), RefreshState::Idle);
        assert_eq!(backend.count(&Method::POST, endpoints::TOKEN_REISSUE), 1);
        assert_eq!(backend.count(&Method::GET, "/user/tags"), 1);
    }
}

mod same_origin_predicate {
    use super::*;

    #[test]
    fn matches_when_request_targets_the_api_origin() {
        let request = Request::new(
            reqwest::Method::GET,
            "https://api.postdeck.test/user/tags".parse().unwrap(),
        );
        let predicate = SameOrigin::new(&"https://api.postdeck.test/v1/".parse().unwrap());
        let result = dbg!(predicate.find_case(true, &request));
        assert!(result.is_none())
    }

    #[test]
    fn does_not_match_when_request_has_different_scheme() {
        let request = Request::new(
            reqwest::Method::GET,
            "http://api.postdeck.test/user/tags".parse().unwrap(),
        );
        let predicate = SameOrigin::new(&API_BASE.parse().unwrap());
        let result = dbg!(predicate.find_case(false, &request));
        assert!(result.is_none())
    }

    #[test]
    fn does_not_match_when_request_has_different_host() {
        let request = Request::new(
            reqwest::Method::GET,
            "https://does-not-match.com".parse().unwrap(),
        );
        let predicate = SameOrigin::new(&API_BASE.parse().unwrap());
        let result = dbg!(predicate.find_case(false, &request));
        assert!(result.is_none())
    }
}

mod https_only_predicate {
    use super::*;

    #[test]
    fn matches_when_request_has_https_scheme() {
        let request = Request::new(reqwest::Method::GET, "https://example.com".parse().unwrap());
        let predicate = HttpsOnly;
        let result = dbg!(predicate.find_case(true, &request));
        assert!(result.is_none())
    }

    #[test]
    fn does_not_match_when_request_has_http_scheme() {
        let request = Request::new(reqwest::Method::GET, "http://example.com".parse().unwrap());
        let predicate = HttpsOnly;
        let result = dbg!(predicate.find_case(false, &request));
        assert!(result.is_none())
    }
}
