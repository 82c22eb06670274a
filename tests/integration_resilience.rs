use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use http::{Request, Response};
use fetchx::prelude::{
    Client, ConcurrencyLimiter, Deduplicator, Error, RequestConfig, ResponseCache, Retrier,
    RetryPolicy, Transport, TransportErrorKind, TransportFailure, UnwrapEnvelope,
};
use fetchx::{RequestContext, RetryDecision};
use serde_json::{Value, json};
use tokio::time::Instant;

/// Refuses the first `failures` calls, then answers every call with an
/// envelope carrying the call number after `latency`.
#[derive(Clone, Default)]
struct CountingTransport {
    failures: usize,
    latency: Duration,
    calls: Arc<AtomicUsize>,
    running: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl CountingTransport {
    fn new(failures: usize, latency: Duration) -> Self {
        Self {
            failures,
            latency,
            ..Self::default()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl Transport for CountingTransport {
    fn send(
        &self,
        request: Request<Bytes>,
    ) -> BoxFuture<'_, Result<Response<Bytes>, TransportFailure>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let path = request.uri().path().to_owned();
        Box::pin(async move {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            self.running.fetch_sub(1, Ordering::SeqCst);

            if call <= self.failures {
                return Err(TransportFailure::send(
                    TransportErrorKind::Connect,
                    "connection refused",
                ));
            }
            let body = json!({ "success": true, "data": { "call": call, "path": path } });
            Ok(Response::builder()
                .status(200)
                .body(Bytes::from(body.to_string()))
                .expect("build response"))
        })
    }
}

fn client(transport: &CountingTransport) -> Client<Value> {
    Client::builder("http://api.test/api")
        .transport(transport.clone())
        .unwrap_envelopes(UnwrapEnvelope::new())
        .build()
}

#[tokio::test(start_paused = true)]
async fn retrier_recovers_from_transient_transport_failures() {
    let transport = CountingTransport::new(2, Duration::ZERO);
    let client = client(&transport);
    let retrier = Retrier::new(RetryPolicy::standard());
    let started = Instant::now();

    let data = retrier
        .run(|| client.get("/user/list", RequestConfig::new()))
        .await
        .expect("third attempt should succeed");

    assert_eq!(data["call"], 3);
    assert_eq!(transport.calls(), 3);
    let waited = started.elapsed();
    assert!(waited >= Duration::from_secs(3), "waited {waited:?}");
    assert!(waited <= Duration::from_millis(3300), "waited {waited:?}");
}

#[tokio::test(start_paused = true)]
async fn retrier_classifier_leaves_business_errors_alone() {
    let transport = CountingTransport::new(0, Duration::ZERO);
    let client = Client::builder("http://api.test/api")
        .transport(transport.clone())
        .unwrap_envelopes(UnwrapEnvelope::new())
        .add_response_interceptor(|_data: Value, _context: Arc<RequestContext>| async move {
            Err::<Value, _>(Error::interceptor("validation failed"))
        })
        .build();
    let retrier = Retrier::new(RetryPolicy::standard()).with_classifier(
        |decision: &RetryDecision<'_>| {
            matches!(decision.error, Error::Transport { .. }) || decision.error.is_timeout()
        },
    );

    let error = retrier
        .run(|| client.get("/user/list", RequestConfig::new()))
        .await
        .expect_err("business failure is final");
    assert!(matches!(error, Error::Interceptor { .. }));
    assert_eq!(transport.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn cancelling_the_retrier_stops_a_failing_call() {
    let transport = CountingTransport::new(usize::MAX, Duration::ZERO);
    let client = client(&transport);
    let retrier = Retrier::new(RetryPolicy::standard());
    let token = retrier.cancel_token();

    let (result, ()) = tokio::join!(
        retrier.run(|| client.get("/user/list", RequestConfig::new())),
        async move {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            token.cancel();
        }
    );

    assert!(result.expect_err("cancel should win").is_cancelled());
    assert_eq!(transport.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn deduplicator_shares_one_network_call() {
    let transport = CountingTransport::new(0, Duration::from_millis(50));
    let client = client(&transport);
    let dedup = Deduplicator::<Value>::new();

    let fetch = |client: Client<Value>| {
        move || async move { client.get("/user/1", RequestConfig::new()).await }
    };
    let (first, second) = tokio::join!(
        dedup.run("GET /user/1", fetch(client.clone())),
        dedup.run("GET /user/1", fetch(client.clone())),
    );

    assert_eq!(first.expect("first caller"), second.expect("second caller"));
    assert_eq!(transport.calls(), 1);
    assert!(dedup.is_empty());

    dedup
        .run("GET /user/1", fetch(client.clone()))
        .await
        .expect("fresh call after settlement");
    assert_eq!(transport.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn cache_serves_until_ttl_then_refetches() {
    let transport = CountingTransport::new(0, Duration::ZERO);
    let client = client(&transport);
    let cache = ResponseCache::<Value>::new();
    let ttl = Duration::from_secs(5);

    let first = cache
        .get_or_fetch("dict", ttl, || client.get("/dict", RequestConfig::new()))
        .await
        .expect("first fetch");
    let second = cache
        .get_or_fetch("dict", ttl, || client.get("/dict", RequestConfig::new()))
        .await
        .expect("cached fetch");
    assert_eq!(first, second);
    assert_eq!(transport.calls(), 1);

    tokio::time::advance(ttl).await;
    let third = cache
        .get_or_fetch("dict", ttl, || client.get("/dict", RequestConfig::new()))
        .await
        .expect("refetch after ttl");
    assert_eq!(third["call"], 2);
    assert_eq!(transport.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn limiter_caps_concurrent_calls_and_keeps_order() {
    let transport = CountingTransport::new(0, Duration::from_millis(100));
    let client = client(&transport);
    let limiter = ConcurrencyLimiter::new(2);

    let fetchers = (0..6).map(|index| {
        let client = client.clone();
        move || async move { client.get(&format!("/item/{index}"), RequestConfig::new()).await }
    });
    let results = limiter.run_all(fetchers).await;

    assert_eq!(transport.peak(), 2);
    assert_eq!(limiter.in_flight(), 0);
    let paths: Vec<String> = results
        .into_iter()
        .map(|result| {
            result.expect("limited call")["path"]
                .as_str()
                .expect("path")
                .to_owned()
        })
        .collect();
    assert_eq!(
        paths,
        (0..6)
            .map(|index| format!("/api/item/{index}"))
            .collect::<Vec<_>>()
    );
}
