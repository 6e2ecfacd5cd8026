//! Concurrency helpers with a deterministic synchronous mode.
//!
//! Phases of an operation fan work out across PR sets (and across PRs within
//! a phase) where ordering allows it. Tests run with `synchronous = true`,
//! which drains every batch in enqueue order instead, making forge-call
//! ordering deterministic.

use std::future::Future;

use futures::stream::{FuturesOrdered, TryStreamExt};

/// Runs a batch of fallible futures.
///
/// In synchronous mode the futures run one at a time, in order. Otherwise
/// they run concurrently; results come back in enqueue order either way. The
/// first error aborts the batch.
pub async fn run_all<T, F>(synchronous: bool, futures: Vec<F>) -> crate::error::Result<Vec<T>>
where
    F: Future<Output = crate::error::Result<T>>,
{
    if synchronous {
        let mut results = Vec::with_capacity(futures.len());
        for fut in futures {
            results.push(fut.await?);
        }
        return Ok(results);
    }

    let mut ordered = FuturesOrdered::new();
    for fut in futures {
        ordered.push_back(fut);
    }
    ordered.try_collect().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn synchronous_mode_preserves_enqueue_order() {
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let futures: Vec<_> = (0..5)
            .map(|i| {
                let log = log.clone();
                async move {
                    log.lock().unwrap().push(i);
                    Ok(i)
                }
            })
            .collect();

        let results = run_all(true, futures).await.unwrap();
        assert_eq!(results, vec![0, 1, 2, 3, 4]);
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn concurrent_mode_returns_results_in_enqueue_order() {
        let futures: Vec<_> = (0..5)
            .map(|i| async move {
                // Later futures finish first.
                tokio::time::sleep(std::time::Duration::from_millis(5 * (5 - i))).await;
                Ok(i)
            })
            .collect();

        let results = run_all(false, futures).await.unwrap();
        assert_eq!(results, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn first_error_aborts() {
        let count = Arc::new(AtomicUsize::new(0));
        let futures: Vec<_> = (0..3)
            .map(|i| {
                let count = count.clone();
                async move {
                    if i == 1 {
                        Err(crate::error::Error::Transport("boom".into()))
                    } else {
                        count.fetch_add(1, Ordering::SeqCst);
                        Ok(i)
                    }
                }
            })
            .collect();

        let err = run_all(true, futures).await.unwrap_err();
        assert!(matches!(err, crate::error::Error::Transport(_)));
        // Synchronous mode stops at the failure.
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
