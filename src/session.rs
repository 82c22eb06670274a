//! Collaborators the pipeline talks to at its edges: persisted credentials,
//! the bearer-token request stage, the 401 side channel, and a loading
//! indicator.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures_util::future::BoxFuture;
use http::header::AUTHORIZATION;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::Result;
use crate::envelope::UnauthorizedHandler;
use crate::error::Error;
use crate::interceptor::RequestInterceptor;
use crate::request::RequestConfig;
use crate::util::{lock_unpoisoned, parse_header_value};

pub const TOKEN_KEY: &str = "jwtToken";
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";
pub const USER_INFO_KEY: &str = "userInfo";
pub const LOGIN_ROUTE: &str = "/login";

/// String key-value persistence for tokens and user info.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: String);
    fn remove(&self, key: &str);
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        lock_unpoisoned(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        lock_unpoisoned(&self.entries).get(key).cloned()
    }

    fn set(&self, key: &str, value: String) {
        lock_unpoisoned(&self.entries).insert(key.to_owned(), value);
    }

    fn remove(&self, key: &str) {
        lock_unpoisoned(&self.entries).remove(key);
    }
}

/// Reads a JSON value stored under `key`. Missing or unreadable entries
/// yield `None`.
pub fn load_json<T>(store: &dyn KeyValueStore, key: &str) -> Option<T>
where
    T: DeserializeOwned,
{
    let raw = store.get(key)?;
    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(error) => {
            warn!(key, error = %error, "discarding unreadable stored value");
            None
        }
    }
}

pub fn store_json<T>(store: &dyn KeyValueStore, key: &str, value: &T) -> Result<()>
where
    T: Serialize + ?Sized,
{
    let encoded = serde_json::to_string(value).map_err(|source| Error::SerializeJson {
        source: Arc::new(source),
    })?;
    store.set(key, encoded);
    Ok(())
}

/// Adds `Authorization: Bearer <token>` when the store holds a token.
#[derive(Clone)]
pub struct BearerAuth {
    store: Arc<dyn KeyValueStore>,
}

impl BearerAuth {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }
}

impl RequestInterceptor for BearerAuth {
    fn intercept(&self, mut config: RequestConfig) -> BoxFuture<'_, Result<RequestConfig>> {
        Box::pin(async move {
            if let Some(token) = self.store.get(TOKEN_KEY).filter(|token| !token.is_empty()) {
                let value = parse_header_value(AUTHORIZATION.as_str(), &format!("Bearer {token}"))?;
                config.headers_mut().insert(AUTHORIZATION, value);
            }
            Ok(config)
        })
    }
}

/// Client-side navigation, e.g. back to the login entry point.
pub trait Navigator: Send + Sync {
    fn navigate(&self, path: &str);
}

impl<F> Navigator for F
where
    F: Fn(&str) + Send + Sync,
{
    fn navigate(&self, path: &str) {
        self(path)
    }
}

/// Drops the stored token and sends the user to the login page.
#[derive(Clone)]
pub struct ClearSessionOnUnauthorized {
    store: Arc<dyn KeyValueStore>,
    navigator: Arc<dyn Navigator>,
    login_path: String,
}

impl ClearSessionOnUnauthorized {
    pub fn new(store: Arc<dyn KeyValueStore>, navigator: Arc<dyn Navigator>) -> Self {
        Self {
            store,
            navigator,
            login_path: LOGIN_ROUTE.to_owned(),
        }
    }

    pub fn login_path(mut self, login_path: impl Into<String>) -> Self {
        self.login_path = login_path.into();
        self
    }
}

impl UnauthorizedHandler for ClearSessionOnUnauthorized {
    fn on_unauthorized(&self) {
        warn!(login_path = %self.login_path, "session rejected, clearing stored token");
        self.store.remove(TOKEN_KEY);
        self.navigator.navigate(&self.login_path);
    }
}

pub trait LoadingSignal: Send + Sync {
    fn show(&self);
    fn hide(&self);
}

/// Counts outstanding loads; loading while the count is above zero.
#[derive(Debug, Default)]
pub struct LoadingFlag {
    depth: AtomicUsize,
}

impl LoadingFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_loading(&self) -> bool {
        self.depth.load(Ordering::SeqCst) > 0
    }
}

impl LoadingSignal for LoadingFlag {
    fn show(&self) {
        self.depth.fetch_add(1, Ordering::SeqCst);
    }

    fn hide(&self) {
        let _ = self
            .depth
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |depth| {
                Some(depth.saturating_sub(1))
            });
    }
}

struct LoadingGuard<'a> {
    signal: &'a dyn LoadingSignal,
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.signal.hide();
    }
}

/// Shows `signal` while `future` runs and hides it once it settles, whether
/// it succeeded, failed or was dropped.
pub async fn with_loading<F>(signal: &dyn LoadingSignal, future: F) -> F::Output
where
    F: Future,
{
    signal.show();
    let _guard = LoadingGuard { signal };
    debug!("loading shown");
    future.await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bearer_auth_injects_stored_token() {
        let store = Arc::new(MemoryStore::new());
        let auth = BearerAuth::new(store.clone());

        let config = auth
            .intercept(RequestConfig::new())
            .await
            .expect("no token is fine");
        assert!(config.headers().get(AUTHORIZATION).is_none());

        store.set(TOKEN_KEY, "abc123".to_owned());
        let config = auth
            .intercept(RequestConfig::new())
            .await
            .expect("token should be injected");
        assert_eq!(
            config.headers().get(AUTHORIZATION).and_then(|value| value.to_str().ok()),
            Some("Bearer abc123")
        );
    }

    #[test]
    fn unauthorized_handler_clears_token_and_navigates() {
        let store = Arc::new(MemoryStore::new());
        store.set(TOKEN_KEY, "stale".to_owned());
        store.set(USER_INFO_KEY, "{}".to_owned());
        let visited = Arc::new(Mutex::new(Vec::<String>::new()));
        let visited_clone = Arc::clone(&visited);
        let handler = ClearSessionOnUnauthorized::new(
            store.clone(),
            Arc::new(move |path: &str| {
                visited_clone.lock().expect("lock visited").push(path.to_owned());
            }),
        );

        handler.on_unauthorized();

        assert_eq!(store.get(TOKEN_KEY), None);
        assert_eq!(store.get(USER_INFO_KEY).as_deref(), Some("{}"));
        assert_eq!(*visited.lock().expect("lock visited"), vec!["/login".to_owned()]);
    }

    #[tokio::test]
    async fn loading_hides_on_failure() {
        let flag = LoadingFlag::new();
        let result: std::result::Result<(), &str> = with_loading(&flag, async {
            assert!(flag.is_loading());
            Err("boom")
        })
        .await;
        assert!(result.is_err());
        assert!(!flag.is_loading());
    }

    #[test]
    fn unreadable_json_is_discarded() {
        let store = MemoryStore::new();
        store.set(USER_INFO_KEY, "{not json".to_owned());
        assert_eq!(load_json::<serde_json::Value>(&store, USER_INFO_KEY), None);

        store_json(&store, USER_INFO_KEY, &serde_json::json!({ "id": 7 })).expect("store json");
        assert_eq!(
            load_json::<serde_json::Value>(&store, USER_INFO_KEY),
            Some(serde_json::json!({ "id": 7 }))
        );
    }
}
