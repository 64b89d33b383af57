//! Development-time interception of selected `METHOD:PATH` pairs.
//!
//! # Design
//! The route table is built once and never mutated; only the `enabled` flag
//! changes at runtime. A hit runs the handler synchronously, then waits the
//! configured latency so mocked calls take the same asynchronous path as
//! network calls. The handler returns an envelope as raw JSON, which the
//! pipeline parses exactly like a response body.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::Value;

use crate::error::ApiError;
use crate::fixtures;
use crate::http::HttpMethod;

pub const DEFAULT_MOCK_DELAY: Duration = Duration::from_millis(10);

pub type MockHandler = Box<dyn Fn(&Value) -> Value + Send + Sync>;

/// `"POST:/auth/login"` style lookup key.
pub fn route_key(method: &str, path: &str) -> String {
    format!("{}:{path}", method.to_ascii_uppercase())
}

pub struct MockRouter {
    routes: HashMap<String, MockHandler>,
    enabled: AtomicBool,
    delay: Duration,
}

impl fmt::Debug for MockRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockRouter")
            .field("routes", &self.routes())
            .field("enabled", &self.is_enabled())
            .field("delay", &self.delay)
            .finish()
    }
}

impl Default for MockRouter {
    /// An empty, disabled router.
    fn default() -> Self {
        Self {
            routes: HashMap::new(),
            enabled: AtomicBool::new(false),
            delay: DEFAULT_MOCK_DELAY,
        }
    }
}

impl MockRouter {
    pub fn builder() -> MockRouterBuilder {
        MockRouterBuilder::default()
    }

    /// Enabled router serving the built-in login and user-list scenarios.
    pub fn with_fixtures(delay: Duration) -> Self {
        Self::fixture_builder(delay).build()
    }

    /// Builder preloaded with the built-in scenarios, for adding more routes.
    pub fn fixture_builder(delay: Duration) -> MockRouterBuilder {
        Self::builder()
            .delay(delay)
            .insert(route_key("POST", "/auth/login"), fixtures::login)
            .insert(route_key("GET", "/users/list"), |_| fixtures::user_list())
    }

    /// Answer a call from the table, or `None` to let it reach the network.
    pub async fn route(&self, method: HttpMethod, path: &str, payload: &Value) -> Option<Value> {
        if !self.is_enabled() {
            return None;
        }
        let key = route_key(method.as_str(), path);
        let Some(handler) = self.routes.get(&key) else {
            tracing::debug!(%key, "no mock route, passing through");
            return None;
        };
        let envelope = handler(payload);
        tracing::debug!(%key, "mock route hit");
        tokio::time::sleep(self.delay).await;
        Some(envelope)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
        tracing::info!(enabled, "mock routing toggled");
    }

    /// Flip the flag and return the new state.
    pub fn toggle(&self) -> bool {
        let enabled = !self.enabled.fetch_xor(true, Ordering::AcqRel);
        tracing::info!(enabled, "mock routing toggled");
        enabled
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Registered keys, sorted.
    pub fn routes(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.routes.keys().cloned().collect();
        keys.sort();
        keys
    }
}

pub struct MockRouterBuilder {
    routes: HashMap<String, MockHandler>,
    enabled: bool,
    delay: Duration,
}

impl fmt::Debug for MockRouterBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&String> = self.routes.keys().collect();
        keys.sort();
        f.debug_struct("MockRouterBuilder")
            .field("routes", &keys)
            .field("enabled", &self.enabled)
            .field("delay", &self.delay)
            .finish()
    }
}

impl Default for MockRouterBuilder {
    fn default() -> Self {
        Self {
            routes: HashMap::new(),
            enabled: true,
            delay: DEFAULT_MOCK_DELAY,
        }
    }
}

impl MockRouterBuilder {
    /// Register a handler. Each `METHOD:PATH` may be registered once.
    pub fn route<F>(self, method: &str, path: &str, handler: F) -> Result<Self, ApiError>
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        let key = route_key(method, path);
        if self.routes.contains_key(&key) {
            return Err(ApiError::DuplicateMockRoute(key));
        }
        Ok(self.insert(key, handler))
    }

    fn insert<F>(mut self, key: String, handler: F) -> Self
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        self.routes.insert(key, Box::new(handler));
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn build(self) -> MockRouter {
        MockRouter {
            routes: self.routes,
            enabled: AtomicBool::new(self.enabled),
            delay: self.delay,
        }
    }
}
