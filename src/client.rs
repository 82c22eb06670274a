use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method, Request, Response, Uri};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{Instrument, debug, field, info_span, warn};

use crate::Result;
use crate::config::ClientConfig;
use crate::error::Error;
use crate::interceptor::{
    ErrorChain, ErrorInterceptor, RequestChain, RequestContext, RequestInterceptor,
    ResponseChain, ResponseInterceptor,
};
use crate::metrics::{ClientMetrics, ClientMetricsSnapshot};
use crate::request::{RequestConfig, encode_json};
use crate::response::RawResponse;
use crate::transport::{HyperTransport, Transport, TransportFailure};
use crate::util::{
    merge_headers, parse_header_name, parse_header_value, redact_uri_for_logs, resolve_url,
    truncate_body, validate_base_url,
};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_RESPONSE_BODY_BYTES: usize = 8 * 1024 * 1024;
pub const DEFAULT_CLIENT_NAME: &str = "fetchx";
pub const DEFAULT_POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

const SIGNAL_CANCELLED: &str = "request cancelled by signal";

/// Builder for a [`Client`].
///
/// `T` is the output type of the response pipeline registered so far. It
/// starts at [`RawResponse`]; every
/// [`add_response_interceptor`](Self::add_response_interceptor) call moves it
/// to that interceptor's output type.
pub struct ClientBuilder<T = RawResponse> {
    base_url: String,
    default_headers: HeaderMap,
    request_timeout: Duration,
    max_response_body_bytes: usize,
    pool_idle_timeout: Duration,
    client_name: String,
    metrics_enabled: bool,
    transport: Option<Arc<dyn Transport>>,
    request_chain: RequestChain,
    response_chain: ResponseChain<T>,
    error_chain: ErrorChain,
}

impl ClientBuilder<RawResponse> {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            default_headers: HeaderMap::new(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_response_body_bytes: DEFAULT_MAX_RESPONSE_BODY_BYTES,
            pool_idle_timeout: DEFAULT_POOL_IDLE_TIMEOUT,
            client_name: DEFAULT_CLIENT_NAME.to_owned(),
            metrics_enabled: false,
            transport: None,
            request_chain: RequestChain::default(),
            response_chain: ResponseChain::new(),
            error_chain: ErrorChain::default(),
        }
    }

    pub fn from_config(config: ClientConfig) -> Self {
        Self::new(config.base_url)
            .request_timeout(config.request_timeout)
            .max_response_body_bytes(config.max_response_body_bytes)
    }
}

impl<T> ClientBuilder<T>
where
    T: Send + 'static,
{
    /// Instance default for calls that set no timeout of their own. Zero
    /// disables the timer.
    pub fn request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub fn max_response_body_bytes(mut self, max_response_body_bytes: usize) -> Self {
        self.max_response_body_bytes = max_response_body_bytes.max(1);
        self
    }

    pub fn pool_idle_timeout(mut self, pool_idle_timeout: Duration) -> Self {
        self.pool_idle_timeout = pool_idle_timeout.max(Duration::from_millis(1));
        self
    }

    pub fn client_name(mut self, client_name: impl Into<String>) -> Self {
        self.client_name = client_name.into();
        self
    }

    pub fn metrics_enabled(mut self, enabled: bool) -> Self {
        self.metrics_enabled = enabled;
        self
    }

    pub fn default_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.default_headers.insert(name, value);
        self
    }

    pub fn try_default_header(self, name: &str, value: &str) -> Result<Self> {
        let header_name = parse_header_name(name)?;
        let header_value = parse_header_value(name, value)?;
        Ok(self.default_header(header_name, header_value))
    }

    /// Replaces the default hyper transport.
    pub fn transport(mut self, transport: impl Transport) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    pub fn transport_arc(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn add_request_interceptor(mut self, interceptor: impl RequestInterceptor + 'static) -> Self {
        self.request_chain.push(Arc::new(interceptor));
        self
    }

    pub fn add_error_interceptor(mut self, interceptor: impl ErrorInterceptor + 'static) -> Self {
        self.error_chain.push(Arc::new(interceptor));
        self
    }

    /// Appends a response stage consuming the current output type `T` and
    /// producing `U`.
    pub fn add_response_interceptor<U, I>(self, interceptor: I) -> ClientBuilder<U>
    where
        I: ResponseInterceptor<T, U> + 'static,
        U: Send + 'static,
    {
        ClientBuilder {
            base_url: self.base_url,
            default_headers: self.default_headers,
            request_timeout: self.request_timeout,
            max_response_body_bytes: self.max_response_body_bytes,
            pool_idle_timeout: self.pool_idle_timeout,
            client_name: self.client_name,
            metrics_enabled: self.metrics_enabled,
            transport: self.transport,
            request_chain: self.request_chain,
            response_chain: self.response_chain.then(interceptor),
            error_chain: self.error_chain,
        }
    }

    pub fn try_build(self) -> Result<Client<T>> {
        validate_base_url(&self.base_url)?;
        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HyperTransport::new(
                self.pool_idle_timeout,
                self.max_response_body_bytes,
            )?),
        };
        debug!(
            client = %self.client_name,
            request_interceptors = self.request_chain.len(),
            response_interceptors = self.response_chain.stages(),
            error_interceptors = self.error_chain.len(),
            "client built"
        );

        Ok(Client {
            inner: Arc::new(ClientInner {
                base_url: self.base_url,
                default_headers: self.default_headers,
                request_timeout: self.request_timeout,
                client_name: self.client_name,
                transport,
                request_chain: self.request_chain,
                response_chain: self.response_chain,
                error_chain: self.error_chain,
                metrics: ClientMetrics::new(self.metrics_enabled),
            }),
        })
    }

    pub fn build(self) -> Client<T> {
        self.try_build().unwrap_or_else(|error| {
            panic!("failed to build fetchx client: {error}; use try_build() to handle configuration errors")
        })
    }
}

struct ClientInner<T> {
    base_url: String,
    default_headers: HeaderMap,
    request_timeout: Duration,
    client_name: String,
    transport: Arc<dyn Transport>,
    request_chain: RequestChain,
    response_chain: ResponseChain<T>,
    error_chain: ErrorChain,
    metrics: ClientMetrics,
}

/// A configured HTTP client whose calls resolve to the response pipeline's
/// output type `T`.
///
/// Interceptors are fixed at build time; clones share one connection pool
/// and one set of chains.
pub struct Client<T = RawResponse> {
    inner: Arc<ClientInner<T>>,
}

impl<T> Clone for Client<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Client<RawResponse> {
    pub fn builder(base_url: impl Into<String>) -> ClientBuilder<RawResponse> {
        ClientBuilder::new(base_url)
    }
}

impl<T> Client<T>
where
    T: Send + 'static,
{
    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    pub fn request_timeout(&self) -> Duration {
        self.inner.request_timeout
    }

    pub fn client_name(&self) -> &str {
        &self.inner.client_name
    }

    pub fn metrics_snapshot(&self) -> ClientMetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    pub async fn get(&self, path: &str, config: RequestConfig) -> Result<T> {
        self.request(path, config.with_method(Method::GET)).await
    }

    pub async fn delete(&self, path: &str, config: RequestConfig) -> Result<T> {
        self.request(path, config.with_method(Method::DELETE)).await
    }

    pub async fn post<B>(&self, path: &str, payload: &B, config: RequestConfig) -> Result<T>
    where
        B: Serialize + ?Sized,
    {
        self.send_json(Method::POST, path, payload, config).await
    }

    pub async fn put<B>(&self, path: &str, payload: &B, config: RequestConfig) -> Result<T>
    where
        B: Serialize + ?Sized,
    {
        self.send_json(Method::PUT, path, payload, config).await
    }

    pub async fn patch<B>(&self, path: &str, payload: &B, config: RequestConfig) -> Result<T>
    where
        B: Serialize + ?Sized,
    {
        self.send_json(Method::PATCH, path, payload, config).await
    }

    async fn send_json<B>(
        &self,
        method: Method,
        path: &str,
        payload: &B,
        config: RequestConfig,
    ) -> Result<T>
    where
        B: Serialize + ?Sized,
    {
        let config = config.with_method(method);
        match encode_json(payload) {
            Ok(body) => self.request(path, config.with_json_body(body)).await,
            Err(error) => Err(self.reject(error, path.to_owned(), config).await),
        }
    }

    /// Runs one call through the request chain, the transport and the
    /// response chain. Any failure passes through the error chain before it
    /// is returned.
    pub async fn request(&self, path: &str, config: RequestConfig) -> Result<T> {
        let span = info_span!(
            "fetchx.request",
            client = %self.inner.client_name,
            method = %config.method(),
            uri = field::Empty
        );
        let started_at = Instant::now();
        let _in_flight = self.inner.metrics.record_request_started();
        let result = self.execute(path, config).instrument(span).await;
        self.record_outcome(&result, started_at);
        result
    }

    /// Sends one call without running any interceptor chain.
    pub async fn request_raw(&self, path: &str, mut config: RequestConfig) -> Result<RawResponse> {
        let span = info_span!(
            "fetchx.request",
            client = %self.inner.client_name,
            method = %config.method(),
            uri = field::Empty
        );
        let started_at = Instant::now();
        let _in_flight = self.inner.metrics.record_request_started();
        let result = async {
            let (url, uri) = self.final_url(path, &mut config)?;
            self.exchange(url, uri, &config).await
        }
        .instrument(span)
        .await;
        self.record_outcome(&result, started_at);
        result
    }

    async fn execute(&self, path: &str, mut config: RequestConfig) -> Result<T> {
        let (url, uri) = match self.final_url(path, &mut config) {
            Ok(resolved) => resolved,
            Err(error) => return Err(self.reject(error, path.to_owned(), config).await),
        };
        let original = self.wants_error_chain(&config).then(|| config.clone());

        match self.dispatch(url.clone(), uri, config).await {
            Ok(value) => Ok(value),
            Err(error) => match original {
                Some(original) => Err(self
                    .inner
                    .error_chain
                    .run(error, Arc::new(RequestContext::new(url, original)))
                    .await),
                None => Err(error),
            },
        }
    }

    async fn dispatch(&self, url: String, uri: Uri, config: RequestConfig) -> Result<T> {
        let config = if config.skips_interceptors() {
            config
        } else {
            self.inner.request_chain.run(config).await?
        };
        let response = self.exchange(url.clone(), uri, &config).await?;
        let context = Arc::new(RequestContext::new(url, config));
        self.inner.response_chain.run(response, context).await
    }

    /// Fixes the final URL from the base (or the per-call override), the
    /// path and the query pairs, which are consumed from `config`.
    fn final_url(&self, path: &str, config: &mut RequestConfig) -> Result<(String, Uri)> {
        let params = config.take_params();
        let base_url = config.base_url().unwrap_or(self.inner.base_url.as_str());
        let resolved = resolve_url(base_url, path, &params)?;
        tracing::Span::current().record("uri", redact_uri_for_logs(&resolved.0).as_str());
        Ok(resolved)
    }

    async fn exchange(&self, url: String, uri: Uri, config: &RequestConfig) -> Result<RawResponse> {
        let method = config.method().clone();
        let redacted_uri = redact_uri_for_logs(&url);
        let request = self.build_request(&method, uri, config)?;
        let timeout = config.timeout().unwrap_or(self.inner.request_timeout);

        debug!("sending request");
        let sent = self.inner.transport.send(request);
        let outcome = match config.signal() {
            Some(signal) => {
                tokio::select! {
                    biased;
                    _ = signal.cancelled() => {
                        debug!("request cancelled by external signal");
                        return Err(Error::Cancelled { reason: SIGNAL_CANCELLED });
                    }
                    outcome = sent => outcome,
                }
            }
            None if timeout.is_zero() => sent.await,
            None => match tokio::time::timeout(timeout, sent).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(timeout_ms = timeout.as_millis() as u64, "request timed out");
                    return Err(Error::Timeout {
                        timeout_ms: timeout.as_millis(),
                        method,
                        uri: redacted_uri,
                    });
                }
            },
        };
        let response = outcome.map_err(|failure| map_transport_failure(failure, &method, &redacted_uri))?;
        self.finish_response(response, method, url, redacted_uri, config)
    }

    fn build_request(&self, method: &Method, uri: Uri, config: &RequestConfig) -> Result<Request<Bytes>> {
        let mut request_builder = Request::builder().method(method.clone()).uri(uri);
        for (name, value) in &merge_headers(&self.inner.default_headers, config.headers()) {
            request_builder = request_builder.header(name, value);
        }
        request_builder
            .body(config.body().cloned().unwrap_or_default())
            .map_err(|source| Error::RequestBuild {
                source: Arc::new(source),
            })
    }

    fn finish_response(
        &self,
        response: Response<Bytes>,
        method: Method,
        url: String,
        redacted_uri: String,
        config: &RequestConfig,
    ) -> Result<RawResponse> {
        let (parts, body) = response.into_parts();
        let status = parts.status;
        self.inner.metrics.record_response_status(status.as_u16());
        debug!(status = status.as_u16(), body_bytes = body.len(), "response received");

        if !status.is_success() {
            return Err(Error::HttpStatus {
                status: status.as_u16(),
                method,
                uri: redacted_uri,
                body: truncate_body(&body),
            });
        }
        Ok(RawResponse::new(status, parts.headers, body)
            .with_request_details(url, config.response_type()))
    }

    fn wants_error_chain(&self, config: &RequestConfig) -> bool {
        !config.skips_interceptors() && !self.inner.error_chain.is_empty()
    }

    /// Error path for failures raised before the final URL is known.
    async fn reject(&self, error: Error, url: String, config: RequestConfig) -> Error {
        if !self.wants_error_chain(&config) {
            return error;
        }
        self.inner
            .error_chain
            .run(error, Arc::new(RequestContext::new(url, config)))
            .await
    }

    fn record_outcome<R>(&self, result: &Result<R>, started_at: Instant) {
        let latency = started_at.elapsed();
        match result {
            Ok(_) => self.inner.metrics.record_success(latency),
            Err(error) => self.inner.metrics.record_failure(error, latency),
        }
    }
}

/// Typed unwrapping for clients whose pipeline ends in a JSON value, such as
/// one built with [`UnwrapEnvelope`](crate::envelope::UnwrapEnvelope) last.
impl Client<serde_json::Value> {
    pub async fn fetch<R>(&self, path: &str, config: RequestConfig) -> Result<R>
    where
        R: DeserializeOwned,
    {
        let value = self.request(path, config).await?;
        decode_value(value)
    }

    pub async fn get_as<R>(&self, path: &str, config: RequestConfig) -> Result<R>
    where
        R: DeserializeOwned,
    {
        decode_value(self.get(path, config).await?)
    }

    pub async fn delete_as<R>(&self, path: &str, config: RequestConfig) -> Result<R>
    where
        R: DeserializeOwned,
    {
        decode_value(self.delete(path, config).await?)
    }

    pub async fn post_as<B, R>(&self, path: &str, payload: &B, config: RequestConfig) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        decode_value(self.post(path, payload, config).await?)
    }

    pub async fn put_as<B, R>(&self, path: &str, payload: &B, config: RequestConfig) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        decode_value(self.put(path, payload, config).await?)
    }

    pub async fn patch_as<B, R>(&self, path: &str, payload: &B, config: RequestConfig) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        decode_value(self.patch(path, payload, config).await?)
    }
}

fn decode_value<R>(value: serde_json::Value) -> Result<R>
where
    R: DeserializeOwned,
{
    <R as serde::Deserialize>::deserialize(&value)
        .map_err(|source| Error::deserialize(source, truncate_body(value.to_string().as_bytes())))
}

fn map_transport_failure(failure: TransportFailure, method: &Method, uri: &str) -> Error {
    match failure {
        TransportFailure::Send { kind, source } => Error::Transport {
            kind,
            method: method.clone(),
            uri: uri.to_owned(),
            source: Arc::from(source),
        },
        TransportFailure::ReadBody { source } => Error::ReadBody {
            method: method.clone(),
            uri: uri.to_owned(),
            source: Arc::from(source),
        },
        TransportFailure::BodyTooLarge { limit_bytes } => Error::ResponseBodyTooLarge {
            limit_bytes,
            method: method.clone(),
            uri: uri.to_owned(),
        },
    }
}
