//! `fetchx` is an async HTTP client for JSON admin backends, built around
//! three ordered interceptor chains and a set of call-site resilience
//! helpers.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use fetchx::prelude::{
//!     BearerAuth, Client, LoggingErrorInterceptor, MemoryStore, RequestConfig, UnwrapEnvelope,
//! };
//! use serde::Deserialize;
//!
//! #[derive(Debug, Deserialize)]
//! #[serde(rename_all = "camelCase")]
//! struct User {
//!     id: u64,
//!     user_name: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(MemoryStore::new());
//!     let client = Client::builder("https://admin.example.com/api")
//!         .request_timeout(Duration::from_secs(5))
//!         .add_request_interceptor(BearerAuth::new(store.clone()))
//!         .add_error_interceptor(LoggingErrorInterceptor)
//!         .unwrap_envelopes(UnwrapEnvelope::new())
//!         .try_build()?;
//!
//!     let user: User = client
//!         .get_as("/user/7", RequestConfig::new().with_param("fields", "basic"))
//!         .await?;
//!     println!("loaded {} ({})", user.user_name, user.id);
//!     Ok(())
//! }
//! ```
//!
//! # Pipeline
//!
//! - Request interceptors run in registration order before the network call.
//! - Response interceptors run in registration order after a 2xx response;
//!   each may change the value's type, so `Client<T>` resolves to whatever
//!   the last one returns.
//! - Error interceptors see every failure, in registration order, before it
//!   reaches the caller.
//!
//! Retry, deduplication, caching and concurrency limiting are separate
//! wrappers ([`Retrier`], [`Deduplicator`], [`ResponseCache`],
//! [`ConcurrencyLimiter`]) layered over any call.

mod auth;
mod cache;
mod client;
mod config;
mod dedup;
mod envelope;
mod error;
mod interceptor;
mod limiters;
mod metrics;
mod request;
mod response;
mod retry;
mod session;
mod strategy;
mod transport;
mod util;

pub use crate::auth::{
    AuthAction, AuthService, AuthState, Dispatcher, LoginRequest, LoginResponse, RegisterRequest,
    RegisterResponse, SharedAuthState, UserInfo,
};
pub use crate::cache::ResponseCache;
pub use crate::client::{
    Client, ClientBuilder, DEFAULT_CLIENT_NAME, DEFAULT_MAX_RESPONSE_BODY_BYTES,
    DEFAULT_POOL_IDLE_TIMEOUT, DEFAULT_REQUEST_TIMEOUT,
};
pub use crate::config::{BASE_URL_ENV, ClientConfig, DEFAULT_BASE_URL, TIMEOUT_MS_ENV};
pub use crate::dedup::Deduplicator;
pub use crate::envelope::{
    DecodeBody, Envelope, ParseEnvelope, UnauthorizedHandler, UnwrapEnvelope,
};
pub use crate::error::{ApiError, ApiErrorKind, Error, ErrorCode, TransportErrorKind};
pub use crate::interceptor::{
    ErrorInterceptor, LoggingErrorInterceptor, RequestContext, RequestInterceptor,
    ResponseInterceptor,
};
pub use crate::limiters::{ConcurrencyLimiter, ConcurrencyPermit};
pub use crate::metrics::ClientMetricsSnapshot;
pub use crate::request::{RequestConfig, ResponseType};
pub use crate::response::{DecodedBody, RawResponse};
pub use crate::retry::{Retrier, RetryClassifier, RetryDecision, RetryPolicy};
pub use crate::session::{
    BearerAuth, ClearSessionOnUnauthorized, KeyValueStore, LOGIN_ROUTE, LoadingFlag,
    LoadingSignal, MemoryStore, Navigator, REFRESH_TOKEN_KEY, TOKEN_KEY, USER_INFO_KEY, load_json,
    store_json, with_loading,
};
pub use crate::strategy::{Operands, StrategyRegistry, arithmetic};
pub use crate::transport::{BoxError, HyperTransport, Transport, TransportFailure};

pub type Result<T> = std::result::Result<T, Error>;

pub mod prelude {
    pub use crate::{
        ApiError, ApiErrorKind, AuthService, BearerAuth, ClearSessionOnUnauthorized, Client,
        ClientBuilder, ClientConfig, ClientMetricsSnapshot, ConcurrencyLimiter, DecodeBody,
        DecodedBody, Deduplicator, Envelope, Error, ErrorCode, ErrorInterceptor, KeyValueStore,
        LoadingFlag, LoadingSignal, LoggingErrorInterceptor, MemoryStore, Navigator,
        ParseEnvelope, RawResponse, RequestConfig, RequestContext, RequestInterceptor,
        ResponseCache, ResponseInterceptor, ResponseType, Result, Retrier, RetryPolicy,
        SharedAuthState, StrategyRegistry, Transport, TransportErrorKind, TransportFailure,
        UnwrapEnvelope, with_loading,
    };
}

#[cfg(test)]
mod tests;
