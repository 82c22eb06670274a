use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use http::{HeaderMap, Method};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::error::Error;
use crate::util::{parse_header_name, parse_header_value};

/// How the caller expects the response body to be interpreted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ResponseType {
    #[default]
    Json,
    Text,
    Bytes,
}

/// Per-call request options.
///
/// A fresh value is built for every call. Interceptors receive it by value
/// and hand back the config the next stage sees, so no stage can observe a
/// later stage's edits.
#[derive(Clone, Debug, Default)]
pub struct RequestConfig {
    method: Method,
    headers: HeaderMap,
    body: Option<Bytes>,
    params: Vec<(String, String)>,
    timeout: Option<Duration>,
    signal: Option<CancellationToken>,
    response_type: ResponseType,
    base_url: Option<String>,
    skip_interceptors: bool,
}

impl RequestConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn try_with_header(self, name: &str, value: &str) -> Result<Self> {
        let name = parse_header_name(name)?;
        let value = parse_header_value(name.as_str(), value)?;
        Ok(self.with_header(name, value))
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        for (name, value) in &headers {
            self.headers.insert(name.clone(), value.clone());
        }
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serializes `payload` as the body. A content type the caller already
    /// set is left untouched.
    pub fn with_json<T>(self, payload: &T) -> Result<Self>
    where
        T: Serialize + ?Sized,
    {
        Ok(self.with_json_body(encode_json(payload)?))
    }

    pub(crate) fn with_json_body(mut self, body: Bytes) -> Self {
        self.body = Some(body);
        if !self.headers.contains_key(CONTENT_TYPE) {
            self.headers
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Display) -> Self {
        self.params.push((name.into(), value.to_string()));
        self
    }

    /// Adds the pair only when `value` is present.
    pub fn with_param_opt<V>(self, name: impl Into<String>, value: Option<V>) -> Self
    where
        V: Display,
    {
        match value {
            Some(value) => self.with_param(name, value),
            None => self,
        }
    }

    /// Adds every field of `params` as a query pair; fields serializing to
    /// `None` are left out.
    pub fn with_params<T>(mut self, params: &T) -> Result<Self>
    where
        T: Serialize + ?Sized,
    {
        let encoded = serde_urlencoded::to_string(params).map_err(|source| {
            Error::SerializeQuery {
                source: Arc::new(source),
            }
        })?;
        self.params.extend(
            url::form_urlencoded::parse(encoded.as_bytes())
                .map(|(name, value)| (name.into_owned(), value.into_owned())),
        );
        Ok(self)
    }

    /// Zero disables the timer for this call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Supplies an external cancellation signal. The client does not arm its
    /// own timer for calls that carry one.
    pub fn with_signal(mut self, signal: CancellationToken) -> Self {
        self.signal = Some(signal);
        self
    }

    pub fn with_response_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = response_type;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_skip_interceptors(mut self, skip: bool) -> Self {
        self.skip_interceptors = skip;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn signal(&self) -> Option<&CancellationToken> {
        self.signal.as_ref()
    }

    pub fn response_type(&self) -> ResponseType {
        self.response_type
    }

    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    pub fn skips_interceptors(&self) -> bool {
        self.skip_interceptors
    }

    pub(crate) fn take_params(&mut self) -> Vec<(String, String)> {
        std::mem::take(&mut self.params)
    }
}

pub(crate) fn encode_json<T>(payload: &T) -> Result<Bytes>
where
    T: Serialize + ?Sized,
{
    serde_json::to_vec(payload)
        .map(Bytes::from)
        .map_err(|source| Error::SerializeJson {
            source: Arc::new(source),
        })
}
