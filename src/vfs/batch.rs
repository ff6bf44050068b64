//! Bounded-concurrency runner for per-object work.

use std::future::Future;

use futures::stream::{FuturesUnordered, StreamExt};
use tracing::error;

use crate::{BlobTreeError, Result};

/// Progress of one multi-object operation.
///
/// Work is issued with at most `limit` objects in flight. After the first
/// failure no new work is issued, in-flight work is drained, and the
/// failure is reported as [`BlobTreeError::Incomplete`] with the number of
/// objects that did complete.
#[derive(Debug)]
pub(crate) struct Batch {
    operation: &'static str,
    total: usize,
    completed: usize,
    limit: usize,
}

impl Batch {
    pub(crate) fn new(operation: &'static str, total: usize, limit: usize) -> Self {
        Self {
            operation,
            total,
            completed: 0,
            limit: limit.max(1),
        }
    }

    pub(crate) fn completed(&self) -> usize {
        self.completed
    }

    /// Run `f` over every item.
    pub(crate) async fn run<T, F, Fut>(&mut self, items: Vec<T>, mut f: F) -> Result<()>
    where
        F: FnMut(T) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let mut pending = items.into_iter();
        let mut in_flight = FuturesUnordered::new();
        let mut failure = None;

        loop {
            while failure.is_none() && in_flight.len() < self.limit {
                match pending.next() {
                    Some(item) => in_flight.push(f(item)),
                    None => break,
                }
            }
            match in_flight.next().await {
                Some(Ok(())) => self.completed += 1,
                Some(Err(e)) => {
                    if failure.is_none() {
                        failure = Some(e);
                    }
                }
                None => break,
            }
        }

        match failure {
            Some(source) => Err(self.incomplete(source)),
            None => Ok(()),
        }
    }

    /// Run a single unit of work after everything else.
    pub(crate) async fn step<Fut>(&mut self, work: Fut) -> Result<()>
    where
        Fut: Future<Output = Result<()>>,
    {
        match work.await {
            Ok(()) => {
                self.completed += 1;
                Ok(())
            }
            Err(source) => Err(self.incomplete(source)),
        }
    }

    fn incomplete(&self, source: BlobTreeError) -> BlobTreeError {
        error!(
            operation = self.operation,
            completed = self.completed,
            total = self.total,
            error = %source,
            "bulk operation stopped"
        );
        BlobTreeError::Incomplete {
            operation: self.operation,
            completed: self.completed,
            total: self.total,
            source: Box::new(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_runs_everything() {
        let seen = Arc::new(AtomicUsize::new(0));
        let mut batch = Batch::new("delete", 10, 3);
        batch
            .run((0..10).collect::<Vec<u32>>(), |_| {
                let seen = seen.clone();
                async move {
                    seen.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await
            .unwrap();
        assert_eq!(batch.completed(), 10);
        assert_eq!(seen.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn test_respects_concurrency_limit() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut batch = Batch::new("move", 20, 4);
        batch
            .run((0..20).collect::<Vec<_>>(), |_| {
                let active = active.clone();
                let peak = peak.clone();
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::task::yield_now().await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await
            .unwrap();
        assert!(peak.load(Ordering::SeqCst) <= 4);
        assert_eq!(batch.completed(), 20);
    }

    #[tokio::test]
    async fn test_stops_issuing_after_failure() {
        let started = Arc::new(AtomicUsize::new(0));
        let mut batch = Batch::new("delete", 10, 1);
        let result = batch
            .run((0..10).collect::<Vec<usize>>(), |i| {
                let started = started.clone();
                async move {
                    started.fetch_add(1, Ordering::SeqCst);
                    if i == 3 {
                        Err(BlobTreeError::store("throttled"))
                    } else {
                        Ok(())
                    }
                }
            })
            .await;

        match result {
            Err(BlobTreeError::Incomplete {
                operation,
                completed,
                total,
                ..
            }) => {
                assert_eq!(operation, "delete");
                assert_eq!(completed, 3);
                assert_eq!(total, 10);
            }
            other => panic!("expected Incomplete, got {other:?}"),
        }
        assert_eq!(started.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_step_counts_toward_total() {
        let mut batch = Batch::new("move", 2, 4);
        batch.run(vec![()], |_| async { Ok(()) }).await.unwrap();
        let err = batch
            .step(async { Err(BlobTreeError::store("gone")) })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BlobTreeError::Incomplete {
                completed: 1,
                total: 2,
                ..
            }
        ));
    }
}
