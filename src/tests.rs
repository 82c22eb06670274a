use crate::error::Error;
use crate::util::{
    append_query_pairs, join_base_path, merge_headers, redact_uri_for_logs, resolve_url,
    truncate_body, validate_base_url,
};

fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
    items
        .iter()
        .map(|(name, value)| ((*name).to_owned(), (*value).to_owned()))
        .collect()
}

#[test]
fn join_base_path_handles_slashes() {
    assert_eq!(
        join_base_path("https://api.example.com/v1/", "/users"),
        "https://api.example.com/v1/users"
    );
    assert_eq!(
        join_base_path("https://api.example.com/v1", "users"),
        "https://api.example.com/v1/users"
    );
    assert_eq!(
        join_base_path("https://api.example.com/v1/", ""),
        "https://api.example.com/v1"
    );
}

#[test]
fn resolve_url_keeps_absolute_url() {
    let (url_text, uri) = resolve_url("https://api.example.com/v1", "https://x.test/a", &[])
        .expect("absolute url should parse");
    assert_eq!(url_text, "https://x.test/a");
    assert_eq!(uri.host(), Some("x.test"));
}

#[test]
fn resolve_url_keeps_absolute_url_with_uppercase_scheme() {
    let (url_text, uri) = resolve_url("https://api.example.com/v1", "HTTPS://x.test/a", &[])
        .expect("uppercase scheme should parse");
    assert_eq!(url_text, "HTTPS://x.test/a");
    assert_eq!(uri.host(), Some("x.test"));
}

#[test]
fn resolve_url_appends_params_to_joined_path() {
    let (url_text, _) = resolve_url(
        "http://127.0.0.1/api",
        "/user/list",
        &pairs(&[("page", "1"), ("q", "a b")]),
    )
    .expect("joined url should parse");
    assert_eq!(url_text, "http://127.0.0.1/api/user/list?page=1&q=a+b");
}

#[test]
fn resolve_url_rejects_url_without_host() {
    let error = resolve_url("", "/relative/only", &[]).expect_err("no host");
    assert!(matches!(error, Error::InvalidUri { .. }));
}

#[test]
fn append_query_pairs_picks_separator() {
    let query = pairs(&[("a", "1")]);
    assert_eq!(append_query_pairs("http://h/p", &query), "http://h/p?a=1");
    assert_eq!(append_query_pairs("http://h/p?x=2", &query), "http://h/p?x=2&a=1");
    assert_eq!(append_query_pairs("http://h/p?", &query), "http://h/p?a=1");
    assert_eq!(append_query_pairs("http://h/p", &[]), "http://h/p");
}

#[test]
fn append_query_pairs_keeps_fragment_last() {
    assert_eq!(
        append_query_pairs("http://h/p#top", &pairs(&[("a", "1")])),
        "http://h/p?a=1#top"
    );
}

#[test]
fn validate_base_url_rejects_bad_inputs() {
    assert!(validate_base_url("https://api.example.com/v1").is_ok());
    assert!(validate_base_url("http://127.0.0.1/api").is_ok());

    for bad in [
        "",
        " https://api.example.com",
        "ftp://api.example.com",
        "https://user:pw@api.example.com",
        "https://api.example.com?x=1",
        "not a url",
    ] {
        let error = validate_base_url(bad).expect_err(bad);
        assert!(matches!(error, Error::InvalidUri { .. }), "{bad}");
    }
}

#[test]
fn redact_uri_for_logs_strips_credentials_and_query() {
    assert_eq!(
        redact_uri_for_logs("https://user:pw@api.example.com/login?token=abc#frag"),
        "https://api.example.com/login"
    );
    assert_eq!(redact_uri_for_logs("/relative?token=abc"), "/relative");
}

#[test]
fn merge_headers_lets_request_headers_win() {
    let mut defaults = http::HeaderMap::new();
    defaults.insert("x-client", "fetchx".parse().expect("header"));
    defaults.insert("accept", "application/json".parse().expect("header"));
    let mut request = http::HeaderMap::new();
    request.insert("accept", "text/plain".parse().expect("header"));

    let merged = merge_headers(&defaults, &request);
    assert_eq!(merged.get("x-client").expect("kept"), "fetchx");
    assert_eq!(merged.get("accept").expect("overridden"), "text/plain");
}

#[test]
fn truncate_body_caps_long_bodies() {
    assert_eq!(truncate_body(b"short"), "short");

    let long = "x".repeat(3000);
    let truncated = truncate_body(long.as_bytes());
    assert!(truncated.ends_with("...(truncated)"));
    assert_eq!(truncated.chars().count(), 2048 + "...(truncated)".len());
}
