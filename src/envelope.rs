//! The backend's uniform JSON wrapper and the stock response stages that
//! parse and unwrap it.
//!
//! Every endpoint answers with
//! `{ "success": bool, "data"?: any, "message"?: string, "error"?: string, "status"?: number }`.
//! [`ParseEnvelope`] turns the raw response into an [`Envelope`];
//! [`UnwrapEnvelope`] returns `data` on success and raises an
//! [`ApiError`] otherwise.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::Result;
use crate::client::ClientBuilder;
use crate::error::{ApiError, ApiErrorKind, Error};
use crate::interceptor::{RequestContext, ResponseInterceptor};
use crate::response::{DecodedBody, RawResponse};

pub const DEFAULT_FAILURE_STATUS: u16 = 400;
pub const DEFAULT_FAILURE_MESSAGE: &str = "request failed";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl Envelope {
    pub fn success(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            ..Self::default()
        }
    }

    pub fn failure(status: u16, message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            status: Some(status),
            ..Self::default()
        }
    }

    /// `error`, then `message`, then a generic fallback.
    pub fn failure_message(&self) -> &str {
        self.error
            .as_deref()
            .or(self.message.as_deref())
            .unwrap_or(DEFAULT_FAILURE_MESSAGE)
    }

    /// A missing or zero `status` falls back to 400.
    pub fn failure_status(&self) -> u16 {
        self.status
            .filter(|status| *status != 0)
            .unwrap_or(DEFAULT_FAILURE_STATUS)
    }

    /// `data` (or `null`) on success; the dispatched [`ApiError`] otherwise.
    pub fn into_result(self) -> std::result::Result<Value, ApiError> {
        if self.success {
            return Ok(self.data.unwrap_or(Value::Null));
        }
        let code = self.failure_status();
        let message = self.failure_message().to_owned();
        let body = serde_json::to_value(&self).ok();
        Err(ApiError::from_status(code, message, body))
    }
}

/// Side channel fired before a 401 failure is raised.
pub trait UnauthorizedHandler: Send + Sync {
    fn on_unauthorized(&self);
}

impl<F> UnauthorizedHandler for F
where
    F: Fn() + Send + Sync,
{
    fn on_unauthorized(&self) {
        self()
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ParseEnvelope;

impl ResponseInterceptor<RawResponse, Envelope> for ParseEnvelope {
    fn intercept(
        &self,
        response: RawResponse,
        _context: Arc<RequestContext>,
    ) -> BoxFuture<'_, Result<Envelope>> {
        Box::pin(async move { response.json::<Envelope>() })
    }
}

#[derive(Clone, Default)]
pub struct UnwrapEnvelope {
    on_unauthorized: Option<Arc<dyn UnauthorizedHandler>>,
}

impl UnwrapEnvelope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_unauthorized(mut self, handler: impl UnauthorizedHandler + 'static) -> Self {
        self.on_unauthorized = Some(Arc::new(handler));
        self
    }
}

impl ResponseInterceptor<Envelope, Value> for UnwrapEnvelope {
    fn intercept(
        &self,
        envelope: Envelope,
        context: Arc<RequestContext>,
    ) -> BoxFuture<'_, Result<Value>> {
        Box::pin(async move {
            let result = envelope.into_result();
            if let Err(api) = &result {
                debug!(method = %context.method(), code = api.code(), "envelope reported failure");
                if api.kind() == ApiErrorKind::Unauthorized
                    && let Some(handler) = &self.on_unauthorized
                {
                    handler.on_unauthorized();
                }
            }
            result.map_err(Error::from)
        })
    }
}

/// Interprets the body by the request's response-type hint, for endpoints
/// that do not wrap their payload.
#[derive(Clone, Copy, Debug, Default)]
pub struct DecodeBody;

impl ResponseInterceptor<RawResponse, DecodedBody> for DecodeBody {
    fn intercept(
        &self,
        response: RawResponse,
        _context: Arc<RequestContext>,
    ) -> BoxFuture<'_, Result<DecodedBody>> {
        Box::pin(async move { response.decode() })
    }
}

impl ClientBuilder<RawResponse> {
    /// Appends [`ParseEnvelope`] then `unwrap`, so calls resolve to the
    /// envelope's `data`.
    pub fn unwrap_envelopes(self, unwrap: UnwrapEnvelope) -> ClientBuilder<Value> {
        self.add_response_interceptor(ParseEnvelope)
            .add_response_interceptor(unwrap)
    }
}
