//! Interceptor traits and the three ordered chains a [`Client`](crate::Client)
//! runs around every call.
//!
//! Request interceptors map a [`RequestConfig`] to the config the next stage
//! sees. Response interceptors form a typed pipeline: the first one receives
//! the [`RawResponse`], every later one receives exactly what its predecessor
//! returned, and the output type may change at each stage. Error interceptors
//! see every failure of the call in registration order and return the error
//! handed to the next one.
//!
//! Closures implement all three traits:
//!
//! ```
//! use std::sync::Arc;
//! use fetchx::prelude::{Client, Error, RawResponse, RequestConfig, RequestContext};
//!
//! let client = Client::builder("http://127.0.0.1:8080/api")
//!     .add_request_interceptor(|config: RequestConfig| async move {
//!         config.try_with_header("x-console", "admin")
//!     })
//!     .add_response_interceptor(|response: RawResponse, _context: Arc<RequestContext>| async move {
//!         Ok::<_, Error>(response.text_lossy())
//!     })
//!     .add_error_interceptor(|error: Error, _context: Arc<RequestContext>| async move { error })
//!     .build();
//! # let _: Client<String> = client;
//! ```

use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use http::Method;
use tracing::{error, warn};

use crate::Result;
use crate::error::Error;
use crate::request::RequestConfig;
use crate::response::RawResponse;

#[derive(Clone, Debug)]
pub struct RequestContext {
    method: Method,
    url: String,
    config: RequestConfig,
}

impl RequestContext {
    pub(crate) fn new(url: String, config: RequestConfig) -> Self {
        Self {
            method: config.method().clone(),
            url,
            config,
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Final request URL, query included.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The config in effect for the stage: the one that was sent for
    /// response interceptors, the caller's original one for error
    /// interceptors.
    pub fn config(&self) -> &RequestConfig {
        &self.config
    }
}

pub trait RequestInterceptor: Send + Sync {
    fn intercept(&self, config: RequestConfig) -> BoxFuture<'_, Result<RequestConfig>>;
}

impl<F, Fut> RequestInterceptor for F
where
    F: Fn(RequestConfig) -> Fut + Send + Sync,
    Fut: Future<Output = Result<RequestConfig>> + Send + 'static,
{
    fn intercept(&self, config: RequestConfig) -> BoxFuture<'_, Result<RequestConfig>> {
        Box::pin(self(config))
    }
}

pub trait ResponseInterceptor<In, Out>: Send + Sync {
    fn intercept(&self, value: In, context: Arc<RequestContext>) -> BoxFuture<'_, Result<Out>>;
}

impl<F, Fut, In, Out> ResponseInterceptor<In, Out> for F
where
    F: Fn(In, Arc<RequestContext>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Out>> + Send + 'static,
{
    fn intercept(&self, value: In, context: Arc<RequestContext>) -> BoxFuture<'_, Result<Out>> {
        Box::pin(self(value, context))
    }
}

pub trait ErrorInterceptor: Send + Sync {
    fn intercept(&self, error: Error, context: Arc<RequestContext>) -> BoxFuture<'_, Error>;
}

impl<F, Fut> ErrorInterceptor for F
where
    F: Fn(Error, Arc<RequestContext>) -> Fut + Send + Sync,
    Fut: Future<Output = Error> + Send + 'static,
{
    fn intercept(&self, error: Error, context: Arc<RequestContext>) -> BoxFuture<'_, Error> {
        Box::pin(self(error, context))
    }
}

#[derive(Clone, Default)]
pub(crate) struct RequestChain {
    interceptors: Vec<Arc<dyn RequestInterceptor>>,
}

impl RequestChain {
    pub(crate) fn push(&mut self, interceptor: Arc<dyn RequestInterceptor>) {
        self.interceptors.push(interceptor);
    }

    pub(crate) fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub(crate) async fn run(&self, mut config: RequestConfig) -> Result<RequestConfig> {
        for interceptor in &self.interceptors {
            config = interceptor.intercept(config).await?;
        }
        Ok(config)
    }
}

#[derive(Clone, Default)]
pub(crate) struct ErrorChain {
    interceptors: Vec<Arc<dyn ErrorInterceptor>>,
}

impl ErrorChain {
    pub(crate) fn push(&mut self, interceptor: Arc<dyn ErrorInterceptor>) {
        self.interceptors.push(interceptor);
    }

    pub(crate) fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    pub(crate) async fn run(&self, mut error: Error, context: Arc<RequestContext>) -> Error {
        for interceptor in &self.interceptors {
            error = interceptor.intercept(error, Arc::clone(&context)).await;
        }
        error
    }
}

type Stage<T> =
    dyn Fn(RawResponse, Arc<RequestContext>) -> BoxFuture<'static, Result<T>> + Send + Sync;

/// Response interceptors folded into one function from the raw response to
/// the client's output type.
pub(crate) struct ResponseChain<T> {
    run: Arc<Stage<T>>,
    stages: usize,
}

impl<T> Clone for ResponseChain<T> {
    fn clone(&self) -> Self {
        Self {
            run: Arc::clone(&self.run),
            stages: self.stages,
        }
    }
}

impl ResponseChain<RawResponse> {
    pub(crate) fn new() -> Self {
        let identity = |response: RawResponse,
                        _context: Arc<RequestContext>|
         -> BoxFuture<'static, Result<RawResponse>> {
            Box::pin(async move { Ok(response) })
        };
        Self {
            run: Arc::new(identity),
            stages: 0,
        }
    }
}

impl<T> ResponseChain<T>
where
    T: Send + 'static,
{
    pub(crate) fn then<U, I>(self, interceptor: I) -> ResponseChain<U>
    where
        I: ResponseInterceptor<T, U> + 'static,
        U: Send + 'static,
    {
        let previous = self.run;
        let interceptor = Arc::new(interceptor);
        let run = move |response: RawResponse,
                        context: Arc<RequestContext>|
              -> BoxFuture<'static, Result<U>> {
            let previous = Arc::clone(&previous);
            let interceptor = Arc::clone(&interceptor);
            Box::pin(async move {
                let value = previous(response, Arc::clone(&context)).await?;
                interceptor.intercept(value, context).await
            })
        };
        ResponseChain {
            run: Arc::new(run),
            stages: self.stages + 1,
        }
    }

    pub(crate) fn stages(&self) -> usize {
        self.stages
    }

    pub(crate) async fn run(&self, response: RawResponse, context: Arc<RequestContext>) -> Result<T> {
        (self.run)(response, context).await
    }
}

/// Logs each failure by kind and passes it on unchanged.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingErrorInterceptor;

impl ErrorInterceptor for LoggingErrorInterceptor {
    fn intercept(&self, error: Error, context: Arc<RequestContext>) -> BoxFuture<'_, Error> {
        Box::pin(async move {
            match &error {
                Error::Timeout { timeout_ms, .. } => {
                    warn!(method = %context.method(), timeout_ms = *timeout_ms as u64, "request timed out");
                }
                Error::Api(api) => {
                    warn!(
                        method = %context.method(),
                        code = api.code(),
                        kind = %api.kind(),
                        message = api.message(),
                        "api business error"
                    );
                }
                other => {
                    error!(method = %context.method(), code = other.code().as_str(), error = %other, "request failed");
                }
            }
            error
        })
    }
}
