use std::sync::Arc;

use http::Method;
use thiserror::Error;

pub(crate) type SharedError = Arc<dyn std::error::Error + Send + Sync>;

pub(crate) const UNAUTHORIZED_MESSAGE: &str = "unauthorized, please log in again";
pub(crate) const FORBIDDEN_MESSAGE: &str = "access forbidden";
pub(crate) const NOT_FOUND_MESSAGE: &str = "requested resource not found";
pub(crate) const SERVER_ERROR_MESSAGE: &str = "server error";

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TransportErrorKind {
    Dns,
    Connect,
    Tls,
    Read,
    Other,
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Dns => "dns",
            Self::Connect => "connect",
            Self::Tls => "tls",
            Self::Read => "read",
            Self::Other => "other",
        };
        formatter.write_str(text)
    }
}

/// Recognized business failures reported inside a `success: false` envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ApiErrorKind {
    Unauthorized,
    Forbidden,
    NotFound,
    ServerError,
    Business,
}

impl ApiErrorKind {
    pub const fn from_code(code: u16) -> Self {
        match code {
            401 => Self::Unauthorized,
            403 => Self::Forbidden,
            404 => Self::NotFound,
            500 => Self::ServerError,
            _ => Self::Business,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::NotFound => "not_found",
            Self::ServerError => "server_error",
            Self::Business => "business",
        }
    }
}

impl std::fmt::Display for ApiErrorKind {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// A failure the backend reported through its envelope rather than through
/// the HTTP status line.
#[derive(Clone, Debug, Error)]
#[error("api error {code} ({kind}): {message}")]
pub struct ApiError {
    kind: ApiErrorKind,
    code: u16,
    message: String,
    body: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(
        code: u16,
        message: impl Into<String>,
        body: Option<serde_json::Value>,
    ) -> Self {
        Self {
            kind: ApiErrorKind::from_code(code),
            code,
            message: message.into(),
            body,
        }
    }

    /// Builds the error for `code`, replacing the server message with the fixed
    /// text of the recognized codes (401, 403, 404, 500).
    pub fn from_status(
        code: u16,
        server_message: impl Into<String>,
        body: Option<serde_json::Value>,
    ) -> Self {
        let message = match ApiErrorKind::from_code(code) {
            ApiErrorKind::Unauthorized => UNAUTHORIZED_MESSAGE.to_owned(),
            ApiErrorKind::Forbidden => FORBIDDEN_MESSAGE.to_owned(),
            ApiErrorKind::NotFound => NOT_FOUND_MESSAGE.to_owned(),
            ApiErrorKind::ServerError => SERVER_ERROR_MESSAGE.to_owned(),
            ApiErrorKind::Business => server_message.into(),
        };
        Self::new(code, message, body)
    }

    pub fn kind(&self) -> ApiErrorKind {
        self.kind
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn body(&self) -> Option<&serde_json::Value> {
        self.body.as_ref()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorCode {
    InvalidUri,
    SerializeJson,
    SerializeQuery,
    InvalidHeaderName,
    InvalidHeaderValue,
    RequestBuild,
    TlsBackendInit,
    Transport,
    Timeout,
    Cancelled,
    ReadBody,
    ResponseBodyTooLarge,
    HttpStatus,
    Deserialize,
    Api,
    Interceptor,
    ConcurrencyLimitClosed,
    StrategyNotFound,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidUri => "invalid_uri",
            Self::SerializeJson => "serialize_json",
            Self::SerializeQuery => "serialize_query",
            Self::InvalidHeaderName => "invalid_header_name",
            Self::InvalidHeaderValue => "invalid_header_value",
            Self::RequestBuild => "request_build",
            Self::TlsBackendInit => "tls_backend_init",
            Self::Transport => "transport",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::ReadBody => "read_body",
            Self::ResponseBodyTooLarge => "response_body_too_large",
            Self::HttpStatus => "http_status",
            Self::Deserialize => "deserialize",
            Self::Api => "api",
            Self::Interceptor => "interceptor",
            Self::ConcurrencyLimitClosed => "concurrency_limit_closed",
            Self::StrategyNotFound => "strategy_not_found",
        }
    }
}

#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid request uri: {uri}")]
    InvalidUri { uri: String },
    #[error("failed to serialize request json: {source}")]
    SerializeJson {
        #[source]
        source: Arc<serde_json::Error>,
    },
    #[error("failed to serialize request query: {source}")]
    SerializeQuery {
        #[source]
        source: Arc<serde_urlencoded::ser::Error>,
    },
    #[error("invalid header name {name}: {source}")]
    InvalidHeaderName {
        name: String,
        #[source]
        source: Arc<http::header::InvalidHeaderName>,
    },
    #[error("invalid header value for {name}: {source}")]
    InvalidHeaderValue {
        name: String,
        #[source]
        source: Arc<http::header::InvalidHeaderValue>,
    },
    #[error("failed to build http request: {source}")]
    RequestBuild {
        #[source]
        source: Arc<http::Error>,
    },
    #[error("failed to initialize tls backend: {message}")]
    TlsBackendInit { message: String },
    #[error("http transport error ({kind}) for {method} {uri}: {source}")]
    Transport {
        kind: TransportErrorKind,
        method: Method,
        uri: String,
        #[source]
        source: SharedError,
    },
    #[error("http request timed out after {timeout_ms}ms for {method} {uri}")]
    Timeout {
        timeout_ms: u128,
        method: Method,
        uri: String,
    },
    #[error("{reason}")]
    Cancelled { reason: &'static str },
    #[error("failed to read response body for {method} {uri}: {source}")]
    ReadBody {
        method: Method,
        uri: String,
        #[source]
        source: SharedError,
    },
    #[error("response body exceeds {limit_bytes} bytes for {method} {uri}")]
    ResponseBodyTooLarge {
        limit_bytes: usize,
        method: Method,
        uri: String,
    },
    #[error("http status error {status} for {method} {uri}: {body}")]
    HttpStatus {
        status: u16,
        method: Method,
        uri: String,
        body: String,
    },
    #[error("failed to decode response json: {source}; body={body}")]
    Deserialize {
        #[source]
        source: Arc<serde_json::Error>,
        body: String,
    },
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("interceptor failed: {message}")]
    Interceptor {
        message: String,
        #[source]
        source: Option<SharedError>,
    },
    #[error("request concurrency limiter is closed")]
    ConcurrencyLimitClosed,
    #[error("strategy '{name}' not found")]
    StrategyNotFound { name: String },
}

impl Error {
    /// Failure raised from inside a custom interceptor.
    pub fn interceptor(message: impl Into<String>) -> Self {
        Self::Interceptor {
            message: message.into(),
            source: None,
        }
    }

    pub fn interceptor_with_source<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Interceptor {
            message: message.into(),
            source: Some(Arc::new(source)),
        }
    }

    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidUri { .. } => ErrorCode::InvalidUri,
            Self::SerializeJson { .. } => ErrorCode::SerializeJson,
            Self::SerializeQuery { .. } => ErrorCode::SerializeQuery,
            Self::InvalidHeaderName { .. } => ErrorCode::InvalidHeaderName,
            Self::InvalidHeaderValue { .. } => ErrorCode::InvalidHeaderValue,
            Self::RequestBuild { .. } => ErrorCode::RequestBuild,
            Self::TlsBackendInit { .. } => ErrorCode::TlsBackendInit,
            Self::Transport { .. } => ErrorCode::Transport,
            Self::Timeout { .. } => ErrorCode::Timeout,
            Self::Cancelled { .. } => ErrorCode::Cancelled,
            Self::ReadBody { .. } => ErrorCode::ReadBody,
            Self::ResponseBodyTooLarge { .. } => ErrorCode::ResponseBodyTooLarge,
            Self::HttpStatus { .. } => ErrorCode::HttpStatus,
            Self::Deserialize { .. } => ErrorCode::Deserialize,
            Self::Api(_) => ErrorCode::Api,
            Self::Interceptor { .. } => ErrorCode::Interceptor,
            Self::ConcurrencyLimitClosed => ErrorCode::ConcurrencyLimitClosed,
            Self::StrategyNotFound { .. } => ErrorCode::StrategyNotFound,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// HTTP status for `HttpStatus`, envelope code for `Api`.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            Self::Api(api) => Some(api.code()),
            _ => None,
        }
    }

    pub fn as_api(&self) -> Option<&ApiError> {
        match self {
            Self::Api(api) => Some(api),
            _ => None,
        }
    }

    pub(crate) fn deserialize(source: serde_json::Error, body: String) -> Self {
        Self::Deserialize {
            source: Arc::new(source),
            body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognized_codes_replace_server_message() {
        let error = ApiError::from_status(404, "missing row", None);
        assert_eq!(error.kind(), ApiErrorKind::NotFound);
        assert_eq!(error.code(), 404);
        assert_eq!(error.message(), NOT_FOUND_MESSAGE);

        let error = ApiError::from_status(409, "name already taken", None);
        assert_eq!(error.kind(), ApiErrorKind::Business);
        assert_eq!(error.message(), "name already taken");
    }

    #[test]
    fn status_projects_http_and_api_codes() {
        let http = Error::HttpStatus {
            status: 502,
            method: Method::GET,
            uri: "http://api.example.com/x".to_owned(),
            body: String::new(),
        };
        assert_eq!(http.status(), Some(502));
        assert_eq!(http.code().as_str(), "http_status");

        let api = Error::from(ApiError::from_status(403, "", None));
        assert_eq!(api.status(), Some(403));
        assert_eq!(api.code(), ErrorCode::Api);
        assert!(api.to_string().contains(FORBIDDEN_MESSAGE));
    }
}
