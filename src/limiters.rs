use std::future::Future;
use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::Result;
use crate::error::Error;

/// Caps how many fetchers run at once; excess callers wait in FIFO order.
#[derive(Clone, Debug)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    max_in_flight: usize,
}

/// Slot held for the duration of one call; released on drop.
#[derive(Debug)]
pub struct ConcurrencyPermit {
    _permit: OwnedSemaphorePermit,
}

impl ConcurrencyLimiter {
    pub fn new(max_in_flight: usize) -> Self {
        let max_in_flight = max_in_flight.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_in_flight)),
            max_in_flight,
        }
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn in_flight(&self) -> usize {
        self.max_in_flight.saturating_sub(self.available())
    }

    pub async fn acquire(&self) -> Result<ConcurrencyPermit> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::ConcurrencyLimitClosed)?;
        Ok(ConcurrencyPermit { _permit: permit })
    }

    /// Waits for a slot, then runs `fetcher`. The slot is released when the
    /// call settles, whatever the outcome.
    pub async fn run<F, Fut, T>(&self, fetcher: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let _permit = self.acquire().await?;
        debug!(in_flight = self.in_flight(), "concurrency slot acquired");
        fetcher().await
    }

    /// Runs every fetcher under the limit; results keep the input order.
    pub async fn run_all<I, F, Fut, T>(&self, fetchers: I) -> Vec<Result<T>>
    where
        I: IntoIterator<Item = F>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        join_all(fetchers.into_iter().map(|fetcher| self.run(fetcher))).await
    }

    /// Fails every waiting and future acquisition with
    /// [`Error::ConcurrencyLimitClosed`].
    pub fn close(&self) {
        self.semaphore.close();
    }
}
