use std::time::Duration;

use tracing::warn;

use crate::client::{DEFAULT_MAX_RESPONSE_BODY_BYTES, DEFAULT_REQUEST_TIMEOUT};

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1/api";
pub const BASE_URL_ENV: &str = "FETCHX_BASE_URL";
pub const TIMEOUT_MS_ENV: &str = "FETCHX_TIMEOUT_MS";

/// Deployment settings for a [`ClientBuilder`](crate::ClientBuilder), usually
/// read once at startup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    pub base_url: String,
    pub request_timeout: Duration,
    pub max_response_body_bytes: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_owned(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_response_body_bytes: DEFAULT_MAX_RESPONSE_BODY_BYTES,
        }
    }
}

impl ClientConfig {
    /// Reads `FETCHX_BASE_URL` and `FETCHX_TIMEOUT_MS` from the process
    /// environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a caller-supplied lookup.
    /// Unparseable or empty values fall back to the defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(base_url) = lookup(BASE_URL_ENV)
            && !base_url.trim().is_empty()
        {
            config.base_url = base_url.trim().to_owned();
        }

        if let Some(raw) = lookup(TIMEOUT_MS_ENV) {
            match raw.trim().parse::<u64>() {
                Ok(timeout_ms) => config.request_timeout = Duration::from_millis(timeout_ms),
                Err(_) => warn!(
                    variable = TIMEOUT_MS_ENV,
                    value = %raw,
                    "ignoring invalid timeout"
                ),
            }
        }

        config
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub fn with_max_response_body_bytes(mut self, max_response_body_bytes: usize) -> Self {
        self.max_response_body_bytes = max_response_body_bytes;
        self
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let values: HashMap<String, String> = pairs
            .iter()
            .map(|(name, value)| ((*name).to_owned(), (*value).to_owned()))
            .collect();
        move |name| values.get(name).cloned()
    }

    #[test]
    fn missing_variables_use_defaults() {
        let config = ClientConfig::from_lookup(lookup_from(&[]));
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.base_url, "http://127.0.0.1/api");
        assert_eq!(config.request_timeout, Duration::from_secs(10));
    }

    #[test]
    fn variables_override_defaults() {
        let config = ClientConfig::from_lookup(lookup_from(&[
            (BASE_URL_ENV, " https://admin.example.com/api "),
            (TIMEOUT_MS_ENV, "2500"),
        ]));
        assert_eq!(config.base_url, "https://admin.example.com/api");
        assert_eq!(config.request_timeout, Duration::from_millis(2500));
    }

    #[test]
    fn invalid_timeout_is_ignored() {
        let config = ClientConfig::from_lookup(lookup_from(&[(TIMEOUT_MS_ENV, "soon")]));
        assert_eq!(config.request_timeout, DEFAULT_REQUEST_TIMEOUT);
    }
}
