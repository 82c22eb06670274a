use std::sync::{Arc, Mutex};

use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Uri};

use crate::error::{Error, TransportErrorKind};

const MAX_ERROR_BODY_LEN: usize = 2048;

pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Later maps win: defaults first, then the caller's headers.
pub(crate) fn merge_headers(default_headers: &HeaderMap, request_headers: &HeaderMap) -> HeaderMap {
    let mut merged = default_headers.clone();
    for (name, value) in request_headers {
        merged.insert(name.clone(), value.clone());
    }
    merged
}

fn invalid_base_url_error(base_url: &str) -> Error {
    Error::InvalidUri {
        uri: base_url.to_owned(),
    }
}

pub(crate) fn validate_base_url(base_url: &str) -> Result<(), Error> {
    let normalized = base_url.trim();
    if normalized.len() != base_url.len() || normalized.is_empty() {
        return Err(invalid_base_url_error(base_url));
    }

    let parsed = url::Url::parse(normalized).map_err(|_| invalid_base_url_error(base_url))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(invalid_base_url_error(base_url));
    }
    if parsed.host_str().is_none() {
        return Err(invalid_base_url_error(base_url));
    }
    if !parsed.username().is_empty() || parsed.password().is_some() {
        return Err(invalid_base_url_error(base_url));
    }
    if parsed.query().is_some() || parsed.fragment().is_some() {
        return Err(invalid_base_url_error(base_url));
    }
    Ok(())
}

pub(crate) fn join_base_path(base_url: &str, path: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let relative = path.trim_start_matches('/');
    match (base.is_empty(), relative.is_empty()) {
        (true, true) => String::new(),
        (true, false) => relative.to_owned(),
        (false, true) => base.to_owned(),
        (false, false) => format!("{base}/{relative}"),
    }
}

fn is_absolute_http(path: &str) -> bool {
    let lowered = path.get(..8).unwrap_or(path).to_ascii_lowercase();
    lowered.starts_with("http://") || lowered.starts_with("https://")
}

/// Joins `path` onto `base_url` unless `path` is already an absolute http(s)
/// URL, then appends `query_pairs`.
pub(crate) fn resolve_url(
    base_url: &str,
    path: &str,
    query_pairs: &[(String, String)],
) -> Result<(String, Uri), Error> {
    let joined = if is_absolute_http(path) {
        path.to_owned()
    } else {
        join_base_path(base_url, path)
    };
    let url_text = append_query_pairs(&joined, query_pairs);
    let uri = url_text.parse::<Uri>().map_err(|_| Error::InvalidUri {
        uri: url_text.clone(),
    })?;
    if uri.host().is_none() {
        return Err(Error::InvalidUri { uri: url_text });
    }
    Ok((url_text, uri))
}

/// Appends encoded pairs after any query already present, choosing `?` or `&`
/// for the seam and keeping a trailing fragment in place.
pub(crate) fn append_query_pairs(url: &str, query_pairs: &[(String, String)]) -> String {
    if query_pairs.is_empty() {
        return url.to_owned();
    }

    let (without_fragment, fragment) = match url.split_once('#') {
        Some((left, right)) => (left, Some(right)),
        None => (url, None),
    };

    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (name, value) in query_pairs {
        serializer.append_pair(name, value);
    }
    let appended = serializer.finish();

    let mut merged = String::with_capacity(without_fragment.len() + appended.len() + 1);
    merged.push_str(without_fragment);
    if without_fragment.contains('?') {
        if !without_fragment.ends_with('?') && !without_fragment.ends_with('&') {
            merged.push('&');
        }
    } else {
        merged.push('?');
    }
    merged.push_str(&appended);

    if let Some(fragment) = fragment {
        merged.push('#');
        merged.push_str(fragment);
    }
    merged
}

pub(crate) fn redact_uri_for_logs(uri_text: &str) -> String {
    let Ok(mut parsed) = url::Url::parse(uri_text) else {
        return uri_text.split('?').next().unwrap_or(uri_text).to_owned();
    };

    let _ = parsed.set_username("");
    let _ = parsed.set_password(None);
    parsed.set_query(None);
    parsed.set_fragment(None);
    parsed.to_string()
}

pub(crate) fn parse_header_name(name: &str) -> Result<HeaderName, Error> {
    name.parse().map_err(|source| Error::InvalidHeaderName {
        name: name.to_owned(),
        source: Arc::new(source),
    })
}

pub(crate) fn parse_header_value(name: &str, value: &str) -> Result<HeaderValue, Error> {
    value.parse().map_err(|source| Error::InvalidHeaderValue {
        name: name.to_owned(),
        source: Arc::new(source),
    })
}

pub(crate) fn classify_transport_error(
    error: &hyper_util::client::legacy::Error,
) -> TransportErrorKind {
    if error.is_connect() {
        let text = error.to_string().to_ascii_lowercase();
        if text.contains("dns")
            || text.contains("name or service not known")
            || text.contains("failed to lookup address")
        {
            return TransportErrorKind::Dns;
        }
        if text.contains("tls") || text.contains("certificate") || text.contains("handshake") {
            return TransportErrorKind::Tls;
        }
        return TransportErrorKind::Connect;
    }

    let text = error.to_string().to_ascii_lowercase();
    if text.contains("read")
        || text.contains("connection reset")
        || text.contains("broken pipe")
        || text.contains("unexpected eof")
    {
        return TransportErrorKind::Read;
    }

    TransportErrorKind::Other
}

pub(crate) fn truncate_body(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    if text.chars().count() <= MAX_ERROR_BODY_LEN {
        return text.into_owned();
    }

    let truncated: String = text.chars().take(MAX_ERROR_BODY_LEN).collect();
    format!("{truncated}...(truncated)")
}
