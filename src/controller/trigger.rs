//! Trigger step: stamping operations onto extension objects
//!
//! Every write is a read-modify-write against the latest stored version,
//! expressed as a JSON merge patch so that fields owned by other writers
//! (the actuator's status, foreign annotations) are left untouched.

use serde_json::json;
use tracing::{debug, info, instrument};

use super::annotations::{format_timestamp, Operation, Trigger, OPERATION_ANNOTATION, TIMESTAMP_ANNOTATION};
use super::clock::Clock;
use super::merge_patch;
use crate::crd::ExtensionObject;
use crate::error::{Error, Result};
use crate::store::ObjectStore;

/// Fetch the object and merge-patch the changes made by `mutate`, or create
/// it from `K::empty` when it does not exist yet
///
/// No request is sent when `mutate` leaves an existing object unchanged.
/// A create that loses a race against a concurrent creator is retried once as
/// a patch.
pub async fn get_and_create_or_merge_patch<K, S, F>(
    store: &S,
    namespace: &str,
    name: &str,
    mutate: F,
) -> Result<K>
where
    K: ExtensionObject,
    S: ObjectStore,
    F: Fn(&mut K) -> Result<()> + Send + Sync,
{
    let mut attempts = 0;
    loop {
        attempts += 1;
        match store.get::<K>(namespace, name).await {
            Ok(current) => {
                let mut desired = current.clone();
                mutate(&mut desired)?;
                let patch = merge_patch::diff(
                    &serde_json::to_value(&current)?,
                    &serde_json::to_value(&desired)?,
                );
                if merge_patch::is_empty(&patch) {
                    debug!(kind = %K::kind_name(), namespace, name, "Object already up to date");
                    return Ok(current);
                }
                return store.merge_patch::<K>(namespace, name, &patch).await;
            }
            Err(e) if e.is_not_found() => {
                let mut obj = K::empty(namespace, name);
                mutate(&mut obj)?;
                match store.create(&obj).await {
                    Err(Error::Conflict { .. }) if attempts < 2 => continue,
                    res => return res,
                }
            }
            Err(e) => return Err(e),
        }
    }
}

/// Write the desired spec and stamp `operation` with the current time
///
/// Returns the stored object and the stamp that a subsequent wait must see
/// acknowledged.
#[instrument(skip(store, clock, desired), fields(kind = %K::kind_name(), operation = %operation))]
pub async fn deploy<K, S, F>(
    store: &S,
    clock: &dyn Clock,
    namespace: &str,
    name: &str,
    operation: Operation,
    desired: F,
) -> Result<(K, Trigger)>
where
    K: ExtensionObject,
    S: ObjectStore,
    F: Fn(&mut K) + Send + Sync,
{
    let trigger = Trigger::new(operation, clock.now());
    let obj = get_and_create_or_merge_patch(store, namespace, name, |obj: &mut K| {
        desired(obj);
        trigger.apply(obj.meta_mut());
        Ok(())
    })
    .await?;

    info!(
        "Triggered {} for {} {}/{}",
        operation,
        K::kind_name(),
        namespace,
        name
    );
    Ok((obj, trigger))
}

/// Stamp `operation` on an existing object without touching its spec
pub async fn annotate<K, S>(
    store: &S,
    clock: &dyn Clock,
    namespace: &str,
    name: &str,
    operation: Operation,
) -> Result<(K, Trigger)>
where
    K: ExtensionObject,
    S: ObjectStore,
{
    let trigger = Trigger::new(operation, clock.now());
    let patch = json!({
        "metadata": {
            "annotations": {
                OPERATION_ANNOTATION: operation.as_str(),
                TIMESTAMP_ANNOTATION: format_timestamp(&trigger.timestamp),
            }
        }
    });
    let obj = store.merge_patch::<K>(namespace, name, &patch).await?;
    Ok((obj, trigger))
}

/// Mark an object for migration away from the current actuator
///
/// Returns `None` when the object does not exist, which counts as migrated.
#[instrument(skip(store, clock), fields(kind = %K::kind_name()))]
pub async fn migrate<K, S>(
    store: &S,
    clock: &dyn Clock,
    namespace: &str,
    name: &str,
) -> Result<Option<Trigger>>
where
    K: ExtensionObject,
    S: ObjectStore,
{
    match annotate::<K, S>(store, clock, namespace, name, Operation::Migrate).await {
        Ok((_, trigger)) => {
            info!("Triggered migrate for {} {}/{}", K::kind_name(), namespace, name);
            Ok(Some(trigger))
        }
        Err(e) if e.is_not_found() => {
            debug!(namespace, name, "Nothing to migrate");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}
