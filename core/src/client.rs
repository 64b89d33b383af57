//! The shared request pipeline every console API call goes through.
//!
//! # Design
//! A call runs in two phases around one dispatch:
//! - `prepare` turns a `Draft` into an `HttpRequest`: enters the loading
//!   counter (unless the call opts out), attaches the auth header and picks
//!   the real or mock base address.
//! - `dispatch` asks the mock router first and falls back to the
//!   `Transport`, both under the fixed timeout.
//! - `finalize` exits the loading counter, then turns the response or
//!   transport error into a payload or an `ApiError`.
//!
//! Every failure goes through `report`, which emits exactly one user-visible
//! notification. The loading ticket exits on every path, including a timeout
//! or a caller dropping the future.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::{Config, Environment};
use crate::envelope::Classified;
use crate::error::ApiError;
use crate::http::{CallOptions, HttpMethod, HttpRequest, HttpResponse, ResponseType};
use crate::loading::{LoadingCounter, LoadingTicket};
use crate::mock::MockRouter;
use crate::notify::{LogNotifier, Notifier};
use crate::session::{Session, TokenStore};
use crate::transport::{ReqwestTransport, Transport};

/// A call as the caller described it, before any pipeline decisions.
#[derive(Debug, Clone, PartialEq)]
pub struct Draft {
    pub method: HttpMethod,
    pub path: String,
    /// Query parameters for `GET`, body for `POST`.
    pub payload: Value,
    pub options: CallOptions,
}

impl Draft {
    pub fn new<P: Serialize + ?Sized>(
        method: HttpMethod,
        path: &str,
        payload: &P,
        options: CallOptions,
    ) -> Result<Self, ApiError> {
        let payload = serde_json::to_value(payload).map_err(|e| ApiError::Config(e.to_string()))?;
        Ok(Self {
            method,
            path: path.to_string(),
            payload,
            options,
        })
    }
}

/// Output of the outbound phase, consumed by `finalize`.
#[derive(Debug)]
pub struct Prepared {
    pub request: HttpRequest,
    payload: Value,
    sent_token: Option<String>,
    ticket: Option<LoadingTicket>,
}

impl Prepared {
    /// The token the request was sent with, if any.
    pub fn sent_token(&self) -> Option<&str> {
        self.sent_token.as_deref()
    }
}

/// A successful call: the unwrapped payload, or the untouched response for
/// binary calls.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Payload(Value),
    Raw(HttpResponse),
}

pub struct ApiClient {
    config: Config,
    use_mock_backend: AtomicBool,
    loading: Arc<LoadingCounter>,
    mock: Arc<MockRouter>,
    tokens: Arc<dyn TokenStore>,
    notifier: Arc<dyn Notifier>,
    transport: Arc<dyn Transport>,
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient")
            .field("config", &self.config)
            .field("use_mock_backend", &self.use_mock_backend())
            .field("loading", &self.loading)
            .field("mock", &self.mock)
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    pub fn builder(config: Config) -> ApiClientBuilder {
        ApiClientBuilder::new(config)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn loading(&self) -> &Arc<LoadingCounter> {
        &self.loading
    }

    pub fn mock_router(&self) -> &Arc<MockRouter> {
        &self.mock
    }

    pub fn tokens(&self) -> &Arc<dyn TokenStore> {
        &self.tokens
    }

    pub fn use_mock_backend(&self) -> bool {
        self.use_mock_backend.load(Ordering::Acquire)
    }

    pub fn set_use_mock_backend(&self, enabled: bool) {
        self.use_mock_backend.store(enabled, Ordering::Release);
    }

    pub async fn get<T, Q>(&self, path: &str, query: &Q) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized,
    {
        self.get_with(path, query, CallOptions::default()).await
    }

    pub async fn get_with<T, Q>(&self, path: &str, query: &Q, options: CallOptions) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized,
    {
        let outcome = self.request(HttpMethod::Get, path, query, options).await?;
        self.decode(outcome)
    }

    pub async fn post<T, B>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.post_with(path, body, CallOptions::default()).await
    }

    pub async fn post_with<T, B>(&self, path: &str, body: &B, options: CallOptions) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let outcome = self.request(HttpMethod::Post, path, body, options).await?;
        self.decode(outcome)
    }

    /// `GET` a file-style endpoint. The response is returned whole, without
    /// envelope parsing.
    pub async fn download<Q>(&self, path: &str, query: &Q) -> Result<HttpResponse, ApiError>
    where
        Q: Serialize + ?Sized,
    {
        match self.request(HttpMethod::Get, path, query, CallOptions::binary()).await? {
            Outcome::Raw(response) => Ok(response),
            Outcome::Payload(_) => Err(self.report(ApiError::Decode("expected a binary response".to_string()))),
        }
    }

    pub async fn request<P>(
        &self,
        method: HttpMethod,
        path: &str,
        payload: &P,
        options: CallOptions,
    ) -> Result<Outcome, ApiError>
    where
        P: Serialize + ?Sized,
    {
        match Draft::new(method, path, payload, options) {
            Ok(draft) => self.call(draft).await,
            Err(e) => Err(self.report(e)),
        }
    }

    /// Run one draft through prepare, dispatch and finalize.
    pub async fn call(&self, draft: Draft) -> Result<Outcome, ApiError> {
        let span = tracing::debug_span!(
            "api_call",
            request_id = %Uuid::new_v4(),
            method = %draft.method,
            path = %draft.path
        );
        async move {
            let prepared = match self.prepare(draft) {
                Ok(prepared) => prepared,
                Err(e) => return Err(self.report(e)),
            };
            let result = self.dispatch(&prepared).await;
            self.finalize(prepared, result)
        }
        .instrument(span)
        .await
    }

    /// Outbound phase. Fails before touching the loading counter when the
    /// draft cannot be turned into a request.
    pub fn prepare(&self, draft: Draft) -> Result<Prepared, ApiError> {
        let Draft {
            method,
            path,
            payload,
            options,
        } = draft;

        let mut headers = Vec::new();
        let (query, body) = match method {
            HttpMethod::Get => (query_pairs(&payload)?, None),
            HttpMethod::Post if payload.is_null() => (Vec::new(), None),
            HttpMethod::Post => {
                let body = serde_json::to_string(&payload).map_err(|e| ApiError::Config(e.to_string()))?;
                headers.push(("content-type".to_string(), "application/json".to_string()));
                (Vec::new(), Some(body))
            }
        };

        let ticket = options.loading.then(|| self.loading.ticket());

        let sent_token = self.tokens.token();
        if let Some(token) = &sent_token {
            headers.push((
                "authorization".to_string(),
                format!("{}{token}", self.config.token_prefix),
            ));
        }

        let base_url = if self.use_mock_backend() {
            self.config.mock_api.clone()
        } else {
            self.config.base_api.clone()
        };

        Ok(Prepared {
            request: HttpRequest {
                method,
                base_url,
                path,
                query,
                headers,
                body,
                response_type: options.response_type,
            },
            payload,
            sent_token,
            ticket,
        })
    }

    async fn dispatch(&self, prepared: &Prepared) -> Result<HttpResponse, ApiError> {
        let request = &prepared.request;
        let exchange = async {
            if let Some(envelope) = self.mock.route(request.method, &request.path, &prepared.payload).await {
                let body = serde_json::to_string(&envelope).map_err(|e| ApiError::MalformedEnvelope(e.to_string()))?;
                return Ok(HttpResponse::json(body));
            }
            self.transport.send(request).await
        };
        match tokio::time::timeout(self.config.timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(ApiError::Timeout),
        }
    }

    /// Inbound phase for both a response and a transport error.
    pub fn finalize(&self, prepared: Prepared, result: Result<HttpResponse, ApiError>) -> Result<Outcome, ApiError> {
        let Prepared {
            request,
            sent_token,
            ticket,
            ..
        } = prepared;
        if let Some(ticket) = ticket {
            ticket.finish();
        }

        let response = match result {
            Ok(response) if response.is_success() => response,
            Ok(response) => {
                let err = ApiError::Http {
                    status: response.status,
                    body: response.text(),
                };
                return Err(self.transport_failure(err, sent_token.as_deref()));
            }
            Err(err) => return Err(self.transport_failure(err, sent_token.as_deref())),
        };

        if request.response_type == ResponseType::Binary {
            return Ok(Outcome::Raw(response));
        }

        let envelope = match self.config.envelope.parse(&response.body) {
            Ok(envelope) => envelope,
            Err(e) => return Err(self.report(e)),
        };

        match self.config.envelope.classify(envelope) {
            Classified::Success(data) => Ok(Outcome::Payload(data)),
            Classified::BusinessFailure(envelope) => Err(self.report(ApiError::Business(envelope))),
            Classified::SessionInvalid(envelope) => {
                let err = ApiError::SessionInvalid(envelope);
                if self.evict(sent_token.as_deref()) {
                    Err(self.report(err))
                } else {
                    tracing::debug!("session already evicted by a concurrent call");
                    Err(err)
                }
            }
        }
    }

    fn transport_failure(&self, err: ApiError, sent_token: Option<&str>) -> ApiError {
        if let ApiError::Http { status: 401, .. } = err {
            self.evict(sent_token);
        }
        self.report(err)
    }

    /// Evict the token this call was sent with. Returns whether this call is
    /// the one that should tell the user.
    fn evict(&self, sent_token: Option<&str>) -> bool {
        match sent_token {
            Some(token) => self.tokens.evict_if(token),
            None => true,
        }
    }

    fn decode<T: DeserializeOwned>(&self, outcome: Outcome) -> Result<T, ApiError> {
        match outcome {
            Outcome::Payload(data) => {
                serde_json::from_value(data).map_err(|e| self.report(ApiError::Decode(e.to_string())))
            }
            Outcome::Raw(_) => Err(self.report(ApiError::Decode("binary response, use download".to_string()))),
        }
    }

    pub(crate) fn report(&self, err: ApiError) -> ApiError {
        tracing::debug!(error = %err, "api call failed");
        self.notifier.error(&err.user_message());
        err
    }
}

/// Flatten a JSON object into query pairs. Nulls are dropped and arrays
/// repeat the key.
fn query_pairs(payload: &Value) -> Result<Vec<(String, String)>, ApiError> {
    let fields = match payload {
        Value::Null => return Ok(Vec::new()),
        Value::Object(fields) => fields,
        other => {
            return Err(ApiError::Config(format!(
                "query parameters must be an object, got {other}"
            )));
        }
    };

    let mut pairs = Vec::with_capacity(fields.len());
    for (key, value) in fields {
        match value {
            Value::Null => {}
            Value::Array(items) => {
                for item in items {
                    pairs.push((key.clone(), scalar(item)));
                }
            }
            other => pairs.push((key.clone(), scalar(other))),
        }
    }
    Ok(pairs)
}

fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub struct ApiClientBuilder {
    config: Config,
    loading: Option<Arc<LoadingCounter>>,
    mock: Option<Arc<MockRouter>>,
    tokens: Option<Arc<dyn TokenStore>>,
    notifier: Option<Arc<dyn Notifier>>,
    transport: Option<Arc<dyn Transport>>,
}

impl ApiClientBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            loading: None,
            mock: None,
            tokens: None,
            notifier: None,
            transport: None,
        }
    }

    pub fn loading(mut self, loading: Arc<LoadingCounter>) -> Self {
        self.loading = Some(loading);
        self
    }

    pub fn mock_router(mut self, mock: Arc<MockRouter>) -> Self {
        self.mock = Some(mock);
        self
    }

    pub fn token_store(mut self, tokens: Arc<dyn TokenStore>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Unset collaborators default to: a logging loading counter, the
    /// fixture mock router (enabled in `dev` only), an in-memory session, a
    /// logging notifier and the `reqwest` transport.
    pub fn build(self) -> ApiClient {
        let mock = self.mock.unwrap_or_else(|| {
            Arc::new(
                MockRouter::fixture_builder(self.config.mock_delay)
                    .enabled(self.config.environment == Environment::Dev)
                    .build(),
            )
        });
        ApiClient {
            use_mock_backend: AtomicBool::new(self.config.use_mock_backend),
            config: self.config,
            loading: self.loading.unwrap_or_default(),
            mock,
            tokens: self.tokens.unwrap_or_else(|| Arc::new(Session::new())),
            notifier: self.notifier.unwrap_or_else(|| Arc::new(LogNotifier)),
            transport: self.transport.unwrap_or_else(|| Arc::new(ReqwestTransport::new())),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::envelope::{Code, SESSION_INVALID_CODE};
    use crate::error::{MSG_CONFIG, MSG_FORBIDDEN, MSG_NETWORK, MSG_NOT_FOUND, MSG_SERVER_ERROR, MSG_TIMEOUT, MSG_UNAUTHORIZED};
    use crate::fixtures;
    use crate::loading::tests::CountingIndicator;
    use crate::notify::RecordingNotifier;
    use crate::session::TOKEN_KEY;
    use crate::storage::{MemoryBackend, PersistentStore};
    use crate::types::LoginParams;

    /// Replays canned results in order and records what it was asked to send.
    #[derive(Default)]
    struct ScriptedTransport {
        replies: Mutex<VecDeque<Result<HttpResponse, ApiError>>>,
        delay: Duration,
        sent: Mutex<Vec<HttpRequest>>,
    }

    impl ScriptedTransport {
        fn replying(replies: Vec<Result<HttpResponse, ApiError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                ..Self::default()
            })
        }

        fn slow(delay: Duration, replies: Vec<Result<HttpResponse, ApiError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                delay,
                ..Self::default()
            })
        }

        fn sent(&self) -> Vec<HttpRequest> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, ApiError> {
            self.sent.lock().unwrap().push(request.clone());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ApiError::Network("connection refused".to_string())))
        }
    }

    fn envelope(value: Value) -> Result<HttpResponse, ApiError> {
        Ok(HttpResponse::json(value.to_string()))
    }

    fn status(code: u16) -> Result<HttpResponse, ApiError> {
        Ok(HttpResponse {
            status: code,
            headers: Vec::new(),
            body: b"error page".to_vec(),
        })
    }

    struct Harness {
        client: ApiClient,
        transport: Arc<ScriptedTransport>,
        notifier: Arc<RecordingNotifier>,
        indicator: Arc<CountingIndicator>,
        session: Arc<Session>,
    }

    impl Harness {
        fn new(transport: Arc<ScriptedTransport>, mock: MockRouter) -> Self {
            let notifier = Arc::new(RecordingNotifier::default());
            let indicator = Arc::new(CountingIndicator::default());
            let session = Arc::new(Session::new());
            let client = ApiClient::builder(Config::for_backend("http://backend.test/api"))
                .loading(Arc::new(LoadingCounter::new(indicator.clone())))
                .mock_router(Arc::new(mock))
                .token_store(session.clone())
                .notifier(notifier.clone())
                .transport(transport.clone())
                .build();
            Self {
                client,
                transport,
                notifier,
                indicator,
                session,
            }
        }

        fn network(replies: Vec<Result<HttpResponse, ApiError>>) -> Self {
            Self::new(ScriptedTransport::replying(replies), MockRouter::default())
        }

        fn mounts(&self) -> usize {
            self.indicator.mounts.load(Ordering::SeqCst)
        }

        fn unmounts(&self) -> usize {
            self.indicator.unmounts.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn mocked_login_resolves_nested_data() {
        let h = Harness::new(ScriptedTransport::replying(vec![]), MockRouter::with_fixtures(Duration::ZERO));

        let data: Value = h
            .client
            .post("/auth/login", &json!({"username": "admin", "password": "123456"}))
            .await
            .unwrap();

        assert_eq!(data, fixtures::login_success()["data"]);
        assert!(h.transport.sent().is_empty(), "mock hit must not reach the network");
        assert!(h.notifier.messages().is_empty());
        assert_eq!(h.client.loading().count(), 0);
        assert_eq!((h.mounts(), h.unmounts()), (1, 1));
    }

    #[tokio::test]
    async fn mocked_login_failure_rejects_with_envelope() {
        let h = Harness::new(ScriptedTransport::replying(vec![]), MockRouter::with_fixtures(Duration::ZERO));

        let err = h
            .client
            .post::<Value, _>("/auth/login", &json!({"username": "admin", "password": "wrong"}))
            .await
            .unwrap_err();

        let ApiError::Business(env) = &err else {
            panic!("expected business failure, got {err:?}");
        };
        assert_eq!(env.code, Code::Number(401));
        assert_eq!(env.message, "Incorrect username or password");
        assert_eq!(h.notifier.messages(), vec!["Incorrect username or password"]);
        assert_eq!(h.client.loading().count(), 0);
    }

    #[tokio::test]
    async fn unmatched_mock_route_falls_through_to_network() {
        let h = Harness::new(
            ScriptedTransport::replying(vec![envelope(json!({"code": 200, "message": "", "data": 7}))]),
            MockRouter::with_fixtures(Duration::ZERO),
        );
        let n: i64 = h.client.get("/stats", &()).await.unwrap();
        assert_eq!(n, 7);
        assert_eq!(h.transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn success_returns_data_not_envelope() {
        let h = Harness::network(vec![envelope(json!({
            "code": 200,
            "message": "OK",
            "data": {"list": [], "total": 0}
        }))]);
        let data: Value = h.client.get("/users/list", &()).await.unwrap();
        assert_eq!(data, json!({"list": [], "total": 0}));
    }

    #[tokio::test]
    async fn auth_header_uses_prefix_and_current_token() {
        let h = Harness::network(vec![
            envelope(json!({"code": 200, "message": "", "data": null})),
            envelope(json!({"code": 200, "message": "", "data": null})),
        ]);

        let _: Value = h.client.get("/a", &()).await.unwrap();
        h.session.set_token("abc").unwrap();
        let _: Value = h.client.get("/b", &()).await.unwrap();

        let sent = h.transport.sent();
        assert_eq!(sent[0].header("authorization"), None);
        assert_eq!(sent[1].header("authorization"), Some("Token abc"));
    }

    #[tokio::test]
    async fn base_address_follows_mock_backend_flag() {
        let h = Harness::network(vec![]);
        let draft = Draft::new(HttpMethod::Get, "/x", &(), CallOptions::silent()).unwrap();

        let prepared = h.client.prepare(draft.clone()).unwrap();
        assert_eq!(prepared.request.base_url, "http://backend.test/api");

        h.client.set_use_mock_backend(true);
        let prepared = h.client.prepare(draft).unwrap();
        assert_eq!(prepared.request.base_url, h.client.config().mock_api);
    }

    #[tokio::test]
    async fn query_and_body_are_encoded() {
        let h = Harness::network(vec![
            envelope(json!({"code": 200, "message": "", "data": null})),
            envelope(json!({"code": 200, "message": "", "data": null})),
        ]);

        let _: Value = h
            .client
            .get("/users/list", &json!({"state": 1, "userName": "ad", "skip": null, "ids": [1, 2]}))
            .await
            .unwrap();
        let _: Value = h.client.post("/users/create", &json!({"userName": "x"})).await.unwrap();

        let sent = h.transport.sent();
        let mut query = sent[0].query.clone();
        query.sort();
        assert_eq!(
            query,
            vec![
                ("ids".to_string(), "1".to_string()),
                ("ids".to_string(), "2".to_string()),
                ("state".to_string(), "1".to_string()),
                ("userName".to_string(), "ad".to_string()),
            ]
        );
        assert!(sent[0].body.is_none());
        assert_eq!(sent[1].body.as_deref(), Some(r#"{"userName":"x"}"#));
        assert_eq!(sent[1].header("content-type"), Some("application/json"));
    }

    #[tokio::test]
    async fn bad_query_is_config_error_without_network_or_loading() {
        let h = Harness::network(vec![]);
        let err = h.client.get::<Value, _>("/x", &vec![1, 2]).await.unwrap_err();
        assert!(matches!(err, ApiError::Config(_)));
        assert!(h.transport.sent().is_empty());
        assert_eq!(h.mounts(), 0);
        assert_eq!(h.notifier.messages(), vec![MSG_CONFIG]);
    }

    #[tokio::test]
    async fn session_invalid_evicts_token_and_rejects() {
        let h = Harness::network(vec![envelope(fixtures::session_expired())]);
        h.session.set_token("stale").unwrap();

        let err = h.client.get::<Value, _>("/users/list", &()).await.unwrap_err();

        let ApiError::SessionInvalid(env) = &err else {
            panic!("expected session invalid, got {err:?}");
        };
        assert_eq!(env.code, Code::Number(SESSION_INVALID_CODE));
        assert_eq!(h.session.token(), None);
        assert_eq!(h.notifier.messages().len(), 1);
        assert_eq!(h.client.loading().count(), 0);
    }

    #[tokio::test]
    async fn concurrent_session_invalid_notifies_once() {
        let h = Harness::new(
            ScriptedTransport::slow(
                Duration::from_millis(5),
                vec![
                    envelope(fixtures::session_expired()),
                    envelope(fixtures::session_expired()),
                    envelope(fixtures::session_expired()),
                ],
            ),
            MockRouter::default(),
        );
        h.session.set_token("stale").unwrap();

        let (a, b, c) = tokio::join!(
            h.client.get::<Value, _>("/a", &()),
            h.client.get::<Value, _>("/b", &()),
            h.client.get::<Value, _>("/c", &()),
        );
        for result in [a, b, c] {
            assert!(matches!(result, Err(ApiError::SessionInvalid(_))));
        }
        assert_eq!(h.session.token(), None);
        assert_eq!(h.notifier.messages().len(), 1);
        assert_eq!(h.client.loading().count(), 0);
        assert_eq!((h.mounts(), h.unmounts()), (1, 1));
    }

    #[tokio::test]
    async fn stale_session_reply_keeps_fresh_token() {
        let h = Harness::network(vec![envelope(fixtures::session_expired())]);
        h.session.set_token("old").unwrap();

        let draft = Draft::new(HttpMethod::Get, "/x", &(), CallOptions::default()).unwrap();
        let prepared = h.client.prepare(draft).unwrap();
        assert_eq!(prepared.sent_token(), Some("old"));

        // user signs in again while the old request is in flight
        h.session.set_token("new").unwrap();
        let reply = envelope(fixtures::session_expired());
        let err = h.client.finalize(prepared, reply).unwrap_err();

        assert!(matches!(err, ApiError::SessionInvalid(_)));
        assert_eq!(h.session.token().as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn business_failure_carries_full_envelope() {
        let h = Harness::network(vec![envelope(json!({
            "code": 40010,
            "message": "Name already taken",
            "data": {"field": "userName"}
        }))]);
        let err = h.client.post::<Value, _>("/users/create", &json!({})).await.unwrap_err();
        let env = err.envelope().unwrap();
        assert_eq!(env.code, Code::Number(40010));
        assert_eq!(env.data, json!({"field": "userName"}));
        assert_eq!(h.notifier.messages(), vec!["Name already taken"]);
    }

    #[tokio::test]
    async fn binary_response_is_returned_untouched() {
        let file = HttpResponse {
            status: 200,
            headers: vec![("content-type".to_string(), "application/octet-stream".to_string())],
            body: vec![0, 159, 146, 150],
        };
        let h = Harness::network(vec![Ok(file.clone())]);
        let response = h.client.download("/users/export", &()).await.unwrap();
        assert_eq!(response, file);
        assert!(h.notifier.messages().is_empty());
        assert_eq!(h.client.loading().count(), 0);
    }

    #[tokio::test]
    async fn http_statuses_map_to_messages() {
        let h = Harness::network(vec![status(401), status(403), status(404), status(500)]);
        h.session.set_token("t").unwrap();

        for _ in 0..4 {
            let err = h.client.get::<Value, _>("/x", &()).await.unwrap_err();
            assert!(matches!(err, ApiError::Http { .. }));
        }

        assert_eq!(
            h.notifier.messages(),
            vec![MSG_UNAUTHORIZED, MSG_FORBIDDEN, MSG_NOT_FOUND, MSG_SERVER_ERROR]
        );
        assert_eq!(h.session.token(), None, "401 evicts the token");
        assert_eq!(h.client.loading().count(), 0);
    }

    #[tokio::test]
    async fn network_failure_restores_counter() {
        let h = Harness::network(vec![]);
        h.client.loading().enter();
        let before = h.client.loading().count();

        let err = h.client.get::<Value, _>("/x", &()).await.unwrap_err();

        assert!(matches!(err, ApiError::Network(_)));
        assert_eq!(h.notifier.messages(), vec![MSG_NETWORK]);
        assert_eq!(h.client.loading().count(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_fires_transport_failure_once() {
        let h = Harness::new(
            ScriptedTransport::slow(Duration::from_secs(30), vec![envelope(json!({"code": 200, "message": ""}))]),
            MockRouter::default(),
        );
        let err = h.client.get::<Value, _>("/slow", &()).await.unwrap_err();
        assert!(matches!(err, ApiError::Timeout));
        assert_eq!(h.notifier.messages(), vec![MSG_TIMEOUT]);
        assert_eq!(h.client.loading().count(), 0);
        assert_eq!(h.unmounts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_call_releases_loading() {
        let h = Harness::new(ScriptedTransport::slow(Duration::from_secs(5), vec![]), MockRouter::default());
        let call = h.client.get::<Value, _>("/slow", &());
        let abandoned = tokio::time::timeout(Duration::from_millis(100), call).await;
        assert!(abandoned.is_err());
        assert_eq!(h.client.loading().count(), 0);
        assert_eq!((h.mounts(), h.unmounts()), (1, 1));
    }

    #[tokio::test]
    async fn silent_calls_skip_indicator() {
        let h = Harness::network(vec![envelope(json!({"code": 200, "message": "", "data": 1}))]);
        let n: i64 = h.client.get_with("/poll", &(), CallOptions::silent()).await.unwrap();
        assert_eq!(n, 1);
        assert_eq!(h.mounts(), 0);
    }

    #[tokio::test]
    async fn malformed_body_is_rejected_once() {
        let h = Harness::network(vec![Ok(HttpResponse::json("<html>oops</html>".to_string()))]);
        let err = h.client.get::<Value, _>("/x", &()).await.unwrap_err();
        assert!(matches!(err, ApiError::MalformedEnvelope(_)));
        assert_eq!(h.notifier.messages().len(), 1);
    }

    #[tokio::test]
    async fn payload_type_mismatch_is_decode_error() {
        let h = Harness::network(vec![envelope(json!({"code": 200, "message": "", "data": "text"}))]);
        let err = h.client.get::<i64, _>("/x", &()).await.unwrap_err();
        assert!(matches!(err, ApiError::Decode(_)));
        assert_eq!(h.notifier.messages().len(), 1);
    }

    #[tokio::test]
    async fn persistent_token_store_drives_auth_and_eviction() {
        let store = Arc::new(PersistentStore::new(MemoryBackend::default()));
        store.set_token("abc").unwrap();
        let transport = ScriptedTransport::replying(vec![envelope(fixtures::session_expired())]);
        let notifier = Arc::new(RecordingNotifier::default());
        let client = ApiClient::builder(Config::for_backend("http://backend.test/api"))
            .token_store(store.clone())
            .notifier(notifier.clone())
            .transport(transport.clone())
            .build();

        let err = client.get::<Value, _>("/users/list", &()).await.unwrap_err();

        assert!(matches!(err, ApiError::SessionInvalid(_)));
        assert_eq!(transport.sent()[0].header("authorization"), Some("Token abc"));
        assert_eq!(store.token(), None);
        assert_eq!(store.get(TOKEN_KEY), json!(""));
        assert_eq!(notifier.messages().len(), 1);
    }

    /// Accepts reads but refuses to persist.
    struct ReadOnlyStore;

    impl TokenStore for ReadOnlyStore {
        fn token(&self) -> Option<String> {
            None
        }

        fn set_token(&self, _token: &str) -> Result<(), ApiError> {
            Err(ApiError::Storage("disk full".to_string()))
        }

        fn evict(&self) -> bool {
            false
        }

        fn evict_if(&self, _expected: &str) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn login_storage_failure_is_notified_once() {
        let notifier = Arc::new(RecordingNotifier::default());
        let client = ApiClient::builder(Config::for_backend("http://backend.test/api"))
            .mock_router(Arc::new(MockRouter::with_fixtures(Duration::ZERO)))
            .token_store(Arc::new(ReadOnlyStore))
            .notifier(notifier.clone())
            .transport(ScriptedTransport::replying(vec![]))
            .build();

        let err = client
            .login(&LoginParams::new(fixtures::MOCK_USERNAME, fixtures::MOCK_PASSWORD))
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::Storage(_)));
        assert_eq!(notifier.messages(), vec!["disk full"]);
        assert_eq!(client.loading().count(), 0);
    }

    #[tokio::test]
    async fn default_mock_router_follows_environment() {
        let dev = ApiClient::builder(Config::preset(Environment::Dev)).build();
        assert!(dev.mock_router().is_enabled());
        assert_eq!(dev.mock_router().routes(), vec!["GET:/users/list", "POST:/auth/login"]);

        let stg = ApiClient::builder(Config::preset(Environment::Stg)).build();
        assert!(!stg.mock_router().is_enabled());
    }

    #[tokio::test]
    async fn overlapping_calls_share_one_indicator() {
        let h = Harness::new(
            ScriptedTransport::slow(
                Duration::from_millis(5),
                (0..4)
                    .map(|i| envelope(json!({"code": 200, "message": "", "data": i})))
                    .collect(),
            ),
            MockRouter::default(),
        );
        let (a, b, c, d) = tokio::join!(
            h.client.get::<i64, _>("/1", &()),
            h.client.get::<i64, _>("/2", &()),
            h.client.get::<i64, _>("/3", &()),
            h.client.get::<i64, _>("/4", &()),
        );
        assert!(a.is_ok() && b.is_ok() && c.is_ok() && d.is_ok());
        assert_eq!(h.client.loading().count(), 0);
        assert_eq!((h.mounts(), h.unmounts()), (1, 1));
    }
}
