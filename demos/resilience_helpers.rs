use std::time::Duration;

use fetchx::prelude::{
    Client, ConcurrencyLimiter, Deduplicator, Error, RequestConfig, ResponseCache, Retrier,
    RetryPolicy, UnwrapEnvelope,
};
use fetchx::{Operands, RetryDecision, arithmetic};
use serde_json::Value;
use tokio::time::Instant;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let client = Client::builder("http://127.0.0.1:8080/api")
        .client_name("fetchx-example-resilience")
        .request_timeout(Duration::from_secs(3))
        .metrics_enabled(true)
        .unwrap_envelopes(UnwrapEnvelope::new())
        .try_build()?;

    let retrier = Retrier::new(
        RetryPolicy::standard()
            .max_attempts(3)
            .base_backoff(Duration::from_millis(200)),
    )
    .with_classifier(|decision: &RetryDecision<'_>| {
        matches!(decision.error, Error::Transport { .. }) || decision.error.is_timeout()
    });
    match retrier
        .run(|| client.get("/health", RequestConfig::new()))
        .await
    {
        Ok(health) => println!("health => {health}"),
        Err(error) => println!("health failed after retries: {error}"),
    }

    let dedup = Deduplicator::<Value>::new();
    let shared = |client: Client<Value>| {
        move || async move { client.get("/dict/roles", RequestConfig::new()).await }
    };
    let (first, second) = tokio::join!(
        dedup.run("roles", shared(client.clone())),
        dedup.run("roles", shared(client.clone())),
    );
    println!(
        "dedup => same_outcome={}",
        first.is_ok() == second.is_ok()
    );

    let cache = ResponseCache::<Value>::new();
    for round in 0..2 {
        let result = cache
            .get_or_fetch("menus", Duration::from_secs(30), || {
                client.get("/menu/tree", RequestConfig::new())
            })
            .await;
        println!("cache round={round} ok={} entries={}", result.is_ok(), cache.len());
    }

    let limiter = ConcurrencyLimiter::new(2);
    let started = Instant::now();
    let fetchers = (1..=5).map(|id| {
        let client = client.clone();
        move || async move { client.get(&format!("/user/{id}"), RequestConfig::new()).await }
    });
    let results = limiter.run_all(fetchers).await;
    println!(
        "limited fan-out => ok={} elapsed_ms={}",
        results.iter().filter(|result| result.is_ok()).count(),
        started.elapsed().as_millis()
    );

    let calculator = arithmetic();
    println!(
        "strategies={:?} 6/3={:?}",
        calculator.available(),
        calculator.execute("divide", Operands { a: 6.0, b: 3.0 })?
    );

    let metrics = client.metrics_snapshot();
    println!(
        "metrics => started={} failed={} in_flight={}",
        metrics.requests_started, metrics.requests_failed, metrics.in_flight
    );
    Ok(())
}
