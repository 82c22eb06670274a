use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use tracing::debug;

use crate::Result;
use crate::error::Error;
use crate::util::lock_unpoisoned;

type SharedCall<T> = Shared<BoxFuture<'static, Result<T>>>;
type PendingMap<T> = Arc<Mutex<HashMap<String, PendingCall<T>>>>;

struct PendingCall<T> {
    generation: u64,
    call: SharedCall<T>,
}

/// Releases a key when its call settles, panics, or is aborted.
struct ReleaseOnDrop<T> {
    pending: PendingMap<T>,
    key: String,
    generation: u64,
}

impl<T> Drop for ReleaseOnDrop<T> {
    fn drop(&mut self) {
        let mut pending = lock_unpoisoned(&self.pending);
        if pending
            .get(&self.key)
            .is_some_and(|entry| entry.generation == self.generation)
        {
            pending.remove(&self.key);
        }
    }
}

/// Collapses concurrent calls with the same key into one invocation.
///
/// Every caller that arrives while a key is in flight awaits the same
/// underlying future and observes the same outcome. The key is released as
/// soon as that future settles, successfully or not, so the next call starts
/// a fresh invocation.
///
/// The invocation runs on its own task, so it settles and releases its key
/// even when every caller stops waiting for it.
pub struct Deduplicator<T> {
    pending: PendingMap<T>,
    next_generation: AtomicU64,
}

impl<T> Default for Deduplicator<T> {
    fn default() -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(0),
        }
    }
}

impl<T> Deduplicator<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn run<F, Fut>(&self, key: impl Into<String>, fetcher: F) -> Result<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let key = key.into();
        let call = {
            let mut pending = lock_unpoisoned(&self.pending);
            match pending.get(&key) {
                Some(existing) => {
                    debug!(key = %key, "joining in-flight call");
                    existing.call.clone()
                }
                None => {
                    let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                    let call = self.start(key.clone(), generation, fetcher);
                    pending.insert(
                        key,
                        PendingCall {
                            generation,
                            call: call.clone(),
                        },
                    );
                    call
                }
            }
        };
        call.await
    }

    fn start<F, Fut>(&self, key: String, generation: u64, fetcher: F) -> SharedCall<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let release = ReleaseOnDrop {
            pending: Arc::clone(&self.pending),
            key,
            generation,
        };
        let task = tokio::spawn(async move {
            let _release = release;
            fetcher().await
        });
        async move {
            task.await.unwrap_or_else(|join_error| {
                Err(Error::interceptor_with_source(
                    "deduplicated call did not complete",
                    join_error,
                ))
            })
        }
        .boxed()
        .shared()
    }

    pub fn in_flight(&self, key: &str) -> bool {
        lock_unpoisoned(&self.pending).contains_key(key)
    }

    pub fn len(&self) -> usize {
        lock_unpoisoned(&self.pending).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
