//! Wait engine: polling extension objects until the actuator converged
//!
//! Readiness is only ever judged against the stamp written by the trigger
//! step, so a success recorded for an earlier operation is never mistaken for
//! the outcome of the current one. Actuator errors are tolerated for the
//! severe threshold, measured from the stamp, and fatal afterwards.

use std::time::Duration;

use chrono::{DateTime, Utc};
use kube::ResourceExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::annotations::{Operation, OperationTag, Trigger};
use super::clock::Clock;
use super::poll::{until_timeout, Attempt};
use crate::crd::{ErrorCode, ExtensionObject, LastOperationState, LastOperationType};
use crate::error::{Error, Result};
use crate::store::ObjectStore;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_SEVERE_THRESHOLD: Duration = Duration::from_secs(30);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(180);

/// Polling parameters of a wait
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WaitConfig {
    pub interval: Duration,
    /// How long an actuator error is tolerated before the wait fails
    pub severe_threshold: Duration,
    pub timeout: Duration,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            severe_threshold: DEFAULT_SEVERE_THRESHOLD,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl WaitConfig {
    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self { timeout, ..self }
    }
}

/// Classification of an object's status against the expected stamp
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    NotReady(String),
    /// The actuator reported an error for the current operation
    Failed {
        description: String,
        codes: Vec<ErrorCode>,
    },
}

fn expected_types(operation: Option<Operation>) -> &'static [LastOperationType] {
    match operation {
        Some(Operation::Reconcile) => &[LastOperationType::Create, LastOperationType::Reconcile],
        Some(Operation::Restore) => &[LastOperationType::Restore],
        Some(Operation::Migrate) => &[LastOperationType::Migrate],
        Some(Operation::WaitForState) => &[],
        None => &[
            LastOperationType::Create,
            LastOperationType::Reconcile,
            LastOperationType::Restore,
        ],
    }
}

/// Classify `obj` as ready, still in progress or failed
///
/// `expected` is the stamp written by the trigger step. Without it the
/// object's own timestamp annotation is the reference for freshness.
pub fn check_ready<K: ExtensionObject>(obj: &K, expected: Option<&Trigger>) -> Result<Readiness> {
    let tag = OperationTag::from_meta(obj.meta())?;
    let reference: Option<DateTime<Utc>> = expected.map(|t| t.timestamp).or(tag.timestamp);
    let status = obj.extension_status();

    if let Some(last_error) = status.and_then(|s| s.last_error.as_ref()) {
        let stale = matches!(
            (reference, last_error.last_update_time),
            (Some(stamp), Some(reported)) if reported < stamp
        );
        if !stale {
            return Ok(Readiness::Failed {
                description: last_error.description.clone(),
                codes: last_error.codes.clone(),
            });
        }
    }

    if let (Some(expected), Some(stamped)) = (expected, tag.timestamp) {
        if stamped < expected.timestamp {
            return Ok(Readiness::NotReady(
                "operation stamp has not been persisted yet".to_string(),
            ));
        }
    }

    let generation = obj.meta().generation.unwrap_or(0);
    let observed = status.map(|s| s.observed_generation).unwrap_or(0);
    if observed != generation {
        return Ok(Readiness::NotReady(format!(
            "observed generation outdated ({observed}/{generation})"
        )));
    }

    if let Some(operation) = tag.operation {
        return Ok(Readiness::NotReady(format!(
            "operation {operation} has not been picked up yet"
        )));
    }

    let Some(last_operation) = status.and_then(|s| s.last_operation.as_ref()) else {
        return Ok(Readiness::NotReady("extension did not record a last operation yet".to_string()));
    };

    if let Some(stamp) = reference {
        if last_operation.last_update_time < stamp {
            return Ok(Readiness::NotReady(
                "last operation predates the current trigger".to_string(),
            ));
        }
    }

    let wanted = expected_types(expected.map(|t| t.operation));
    if !wanted.contains(&last_operation.type_) {
        return Ok(Readiness::NotReady(format!(
            "last operation is of type {}",
            last_operation.type_
        )));
    }

    if last_operation.state != LastOperationState::Succeeded {
        return Ok(Readiness::NotReady(format!(
            "last operation {} is {}",
            last_operation.type_, last_operation.state
        )));
    }

    Ok(Readiness::Ready)
}

/// Poll until the object reports success for `expected`
///
/// Absence of the object is fatal. Actuator errors are retried until the
/// severe threshold has elapsed since the stamp (or since the start of the
/// wait when there is none), then returned as [`Error::Severe`].
#[instrument(skip(store, clock, cancel, config, expected), fields(kind = %K::kind_name()))]
pub async fn wait_until_ready<K, S>(
    store: &S,
    clock: &dyn Clock,
    cancel: &CancellationToken,
    config: &WaitConfig,
    namespace: &str,
    name: &str,
    expected: Option<Trigger>,
) -> Result<K>
where
    K: ExtensionObject,
    S: ObjectStore,
{
    let started = expected.map(|t| t.timestamp).unwrap_or_else(|| clock.now());
    let threshold = chrono::Duration::from_std(config.severe_threshold)
        .unwrap_or_else(|_| chrono::Duration::weeks(52 * 100));

    until_timeout(cancel, config.interval, config.timeout, || async {
        let obj = match store.get::<K>(namespace, name).await {
            Ok(obj) => obj,
            Err(e) => return Attempt::Fail(e),
        };

        match check_ready(&obj, expected.as_ref()) {
            Err(e) => Attempt::Fail(e),
            Ok(Readiness::Ready) => Attempt::Done(obj),
            Ok(Readiness::NotReady(reason)) => Attempt::Retry(reason),
            Ok(Readiness::Failed { description, codes }) => {
                let elapsed = clock.now() - started;
                if elapsed >= threshold {
                    #[cfg(feature = "metrics")]
                    super::metrics::inc_severe_error(&K::kind_name());
                    Attempt::Fail(Error::Severe { description, codes })
                } else {
                    warn!(
                        namespace,
                        name,
                        elapsed_seconds = elapsed.num_seconds(),
                        "Extension reported an error, still within severe threshold: {}",
                        description
                    );
                    Attempt::Retry(format!("error during reconciliation: {description}"))
                }
            }
        }
    })
    .await
}

/// Poll until the object is gone
///
/// Actuator errors never fail the wait; they only enrich the timeout reason.
#[instrument(skip(store, cancel), fields(kind = %K::kind_name()))]
pub async fn wait_until_deleted<K, S>(
    store: &S,
    cancel: &CancellationToken,
    interval: Duration,
    timeout: Duration,
    namespace: &str,
    name: &str,
) -> Result<()>
where
    K: ExtensionObject,
    S: ObjectStore,
{
    until_timeout(cancel, interval, timeout, || async {
        match store.get::<K>(namespace, name).await {
            Err(e) if e.is_not_found() => Attempt::Done(()),
            Err(e) => Attempt::Fail(e),
            Ok(obj) => Attempt::Retry(pending_deletion_reason(&obj)),
        }
    })
    .await
}

/// Poll until no object of kind `K` in `namespace` satisfies `predicate`
pub async fn wait_until_all_deleted<K, S, P>(
    store: &S,
    cancel: &CancellationToken,
    interval: Duration,
    timeout: Duration,
    namespace: &str,
    predicate: P,
) -> Result<()>
where
    K: ExtensionObject,
    S: ObjectStore,
    P: Fn(&K) -> bool + Send + Sync,
{
    until_timeout(cancel, interval, timeout, || async {
        match store.list::<K>(namespace, None).await {
            Err(e) => Attempt::Fail(e),
            Ok(items) => {
                let remaining: Vec<String> = items
                    .iter()
                    .filter(|obj| predicate(obj))
                    .map(pending_deletion_reason)
                    .collect();
                if remaining.is_empty() {
                    Attempt::Done(())
                } else {
                    debug!(namespace, remaining = remaining.len(), "Waiting for deletion");
                    Attempt::Retry(remaining.join("; "))
                }
            }
        }
    })
    .await
}

fn pending_deletion_reason<K: ExtensionObject>(obj: &K) -> String {
    let mut reason = format!("{} {} is still present", K::kind_name(), obj.name_any());
    if let Some(last_error) = obj.extension_status().and_then(|s| s.last_error.as_ref()) {
        reason.push_str(&format!(": {}", last_error.description));
    }
    reason
}

/// Poll until the actuator acknowledged a migration
///
/// Absence of the object counts as migrated.
#[instrument(skip(store, cancel, expected), fields(kind = %K::kind_name()))]
pub async fn wait_until_migrated<K, S>(
    store: &S,
    cancel: &CancellationToken,
    interval: Duration,
    timeout: Duration,
    namespace: &str,
    name: &str,
    expected: Option<Trigger>,
) -> Result<()>
where
    K: ExtensionObject,
    S: ObjectStore,
{
    until_timeout(cancel, interval, timeout, || async {
        let obj = match store.get::<K>(namespace, name).await {
            Ok(obj) => obj,
            Err(e) if e.is_not_found() => return Attempt::Done(()),
            Err(e) => return Attempt::Fail(e),
        };
        match migration_state(&obj, expected.as_ref()) {
            None => Attempt::Done(()),
            Some(reason) => Attempt::Retry(reason),
        }
    })
    .await
}

/// `None` when the migration is acknowledged, otherwise why it is not
fn migration_state<K: ExtensionObject>(obj: &K, expected: Option<&Trigger>) -> Option<String> {
    let status = obj.extension_status();
    let Some(last_operation) = status.and_then(|s| s.last_operation.as_ref()) else {
        return Some("extension did not record a last operation yet".to_string());
    };

    let fresh = expected.map_or(true, |t| last_operation.last_update_time >= t.timestamp);
    if fresh
        && last_operation.type_ == LastOperationType::Migrate
        && last_operation.state == LastOperationState::Succeeded
    {
        return None;
    }

    let mut reason = format!(
        "last operation {} is {}",
        last_operation.type_, last_operation.state
    );
    if let Some(last_error) = status.and_then(|s| s.last_error.as_ref()) {
        reason.push_str(&format!(": {}", last_error.description));
    }
    Some(reason)
}
