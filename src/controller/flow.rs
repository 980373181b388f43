//! Fan-out of independent lifecycle tasks
//!
//! Tasks run concurrently on the current task (no spawning), each receiving a
//! child cancellation token of the caller's. Two join policies are available:
//!
//! - [`JoinPolicy::CollectAll`] runs every task to completion and aggregates
//!   all failures
//! - [`JoinPolicy::FailFast`] cancels the remaining tasks on the first
//!   failure, waits for them to observe the cancellation and returns that
//!   first failure

use std::future::Future;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoinPolicy {
    CollectAll,
    FailFast,
}

/// Run `tasks` concurrently under `policy`
pub async fn parallel<F, Fut>(
    policy: JoinPolicy,
    cancel: &CancellationToken,
    tasks: impl IntoIterator<Item = F>,
) -> Result<()>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let scope = cancel.child_token();
    let mut running: FuturesUnordered<Fut> =
        tasks.into_iter().map(|task| task(scope.child_token())).collect();

    let mut errors = Vec::new();
    while let Some(result) = running.next().await {
        let Err(err) = result else {
            continue;
        };

        match policy {
            JoinPolicy::FailFast if errors.is_empty() => {
                debug!(error = %err, "Task failed, cancelling remaining tasks");
                scope.cancel();
                errors.push(err);
            }
            // remaining failures are fallout of the cancellation
            JoinPolicy::FailFast => {}
            JoinPolicy::CollectAll => errors.push(err),
        }
    }

    match policy {
        JoinPolicy::FailFast => errors.into_iter().next().map_or(Ok(()), Err),
        JoinPolicy::CollectAll => Error::aggregate(errors).map_or(Ok(()), Err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use crate::controller::poll::cancellable;

    #[tokio::test]
    async fn test_collect_all_aggregates_every_failure() {
        let cancel = CancellationToken::new();
        let completed = Arc::new(AtomicU32::new(0));

        let tasks = (0..4).map(|i| {
            let completed = completed.clone();
            move |_token: CancellationToken| async move {
                tokio::time::sleep(Duration::from_millis(i * 5)).await;
                completed.fetch_add(1, Ordering::SeqCst);
                if i % 2 == 0 {
                    Err(Error::StoreError(format!("task {i}")))
                } else {
                    Ok(())
                }
            }
        });

        let err = parallel(JoinPolicy::CollectAll, &cancel, tasks)
            .await
            .unwrap_err();

        assert_eq!(completed.load(Ordering::SeqCst), 4);
        match err {
            Error::Multiple(errors) => assert_eq!(errors.len(), 2),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_collect_all_single_failure_is_not_wrapped() {
        let cancel = CancellationToken::new();
        let tasks = (0..3).map(|i| move |_token: CancellationToken| async move {
            if i == 1 {
                Err(Error::StoreError("only one".to_string()))
            } else {
                Ok(())
            }
        });

        let err = parallel(JoinPolicy::CollectAll, &cancel, tasks)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StoreError(_)));
    }

    #[tokio::test]
    async fn test_fail_fast_cancels_siblings_before_returning() {
        let cancel = CancellationToken::new();
        let observed_cancel = Arc::new(AtomicU32::new(0));

        let tasks = (0..4).map(|i| {
            let observed_cancel = observed_cancel.clone();
            move |token: CancellationToken| async move {
                if i == 0 {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    return Err(Error::StoreError("broken extension".to_string()));
                }
                let res = cancellable(&token, async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(())
                })
                .await;
                if res.as_ref().is_err_and(Error::is_cancelled) {
                    observed_cancel.fetch_add(1, Ordering::SeqCst);
                }
                res
            }
        });

        let started = std::time::Instant::now();
        let err = parallel(JoinPolicy::FailFast, &cancel, tasks)
            .await
            .unwrap_err();

        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(err.to_string(), "Store error: broken extension");
        assert_eq!(observed_cancel.load(Ordering::SeqCst), 3);
        // the caller's token is left alone
        assert!(!cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_caller_cancellation_reaches_tasks() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let tasks = (0..2).map(|_| {
            |token: CancellationToken| async move {
                cancellable(&token, std::future::pending::<Result<()>>()).await
            }
        });

        let err = parallel(JoinPolicy::CollectAll, &cancel, tasks)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_no_tasks_is_success() {
        let cancel = CancellationToken::new();
        let tasks: Vec<fn(CancellationToken) -> std::future::Ready<Result<()>>> = Vec::new();
        parallel(JoinPolicy::FailFast, &cancel, tasks).await.unwrap();
    }
}
