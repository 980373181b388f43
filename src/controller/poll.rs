//! Bounded-time polling with cancellation
//!
//! Polls run at a fixed interval with no backoff. The first poll happens
//! immediately. A poll in flight is abandoned when the deadline passes or
//! the caller cancels.

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep_until, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Error, Result};

/// Outcome of a single poll
#[derive(Debug)]
pub enum Attempt<T> {
    /// Terminal success
    Done(T),
    /// Not terminal yet; the reason is reported if the deadline passes
    Retry(String),
    /// Terminal failure, returned immediately
    Fail(Error),
}

/// Run `condition` every `interval` until it is terminal, `timeout` elapses
/// or `cancel` fires
pub async fn until_timeout<T, F, Fut>(
    cancel: &CancellationToken,
    interval: Duration,
    timeout: Duration,
    mut condition: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Attempt<T>>,
{
    let deadline = Instant::now() + timeout;
    let mut last_reason = String::from("condition was never checked");
    let mut polls = 0u32;

    loop {
        polls += 1;
        let attempt = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            res = timeout_at(deadline, condition()) => match res {
                Ok(attempt) => attempt,
                Err(_) => return Err(Error::Timeout { after: timeout, reason: last_reason }),
            },
        };

        match attempt {
            Attempt::Done(value) => return Ok(value),
            Attempt::Fail(err) => return Err(err),
            Attempt::Retry(reason) => {
                debug!(polls, reason = %reason, "condition not met yet");
                last_reason = reason;
            }
        }

        if Instant::now() >= deadline {
            return Err(Error::Timeout {
                after: timeout,
                reason: last_reason,
            });
        }

        let wake = (Instant::now() + interval).min(deadline);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            _ = sleep_until(wake) => {}
        }
    }
}

/// Run a single future, abandoning it when `cancel` fires
pub async fn cancellable<T, Fut>(cancel: &CancellationToken, fut: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        res = fut => res,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_first_poll_is_immediate() {
        let cancel = CancellationToken::new();
        let started = Instant::now();
        let value = until_timeout(
            &cancel,
            Duration::from_secs(60),
            Duration::from_secs(120),
            || async { Attempt::Done(7) },
        )
        .await
        .unwrap();

        assert_eq!(value, 7);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_retries_until_done() {
        let cancel = CancellationToken::new();
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        until_timeout(
            &cancel,
            Duration::from_millis(1),
            Duration::from_secs(5),
            move || {
                let c = c.clone();
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) < 3 {
                        Attempt::Retry("not yet".to_string())
                    } else {
                        Attempt::Done(())
                    }
                }
            },
        )
        .await
        .unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_timeout_reports_last_reason() {
        let cancel = CancellationToken::new();
        let err = until_timeout(
            &cancel,
            Duration::from_millis(1),
            Duration::from_millis(20),
            || async { Attempt::<()>::Retry("still processing".to_string()) },
        )
        .await
        .unwrap_err();

        match err {
            Error::Timeout { reason, .. } => assert_eq!(reason, "still processing"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fail_is_returned_immediately() {
        let cancel = CancellationToken::new();
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let err = until_timeout(
            &cancel,
            Duration::from_millis(1),
            Duration::from_secs(5),
            move || {
                c.fetch_add(1, Ordering::SeqCst);
                async { Attempt::<()>::Fail(Error::StoreError("boom".to_string())) }
            },
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::StoreError(_)));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancellation_is_not_a_timeout() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let err = until_timeout(
            &cancel,
            Duration::from_millis(1),
            Duration::from_secs(30),
            || async { Attempt::<()>::Retry("waiting".to_string()) },
        )
        .await
        .unwrap_err();

        assert!(err.is_cancelled());
        assert!(!err.is_timeout());
    }

    #[tokio::test]
    async fn test_hung_poll_is_bounded_by_deadline() {
        let cancel = CancellationToken::new();
        let err = until_timeout(
            &cancel,
            Duration::from_millis(1),
            Duration::from_millis(20),
            || async {
                std::future::pending::<()>().await;
                Attempt::<()>::Done(())
            },
        )
        .await
        .unwrap_err();

        assert!(err.is_timeout());
    }
}
