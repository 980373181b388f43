//! Destroy: confirmed deletion of extension objects
//!
//! Deletion is a two-step write: the object is first annotated with a
//! deletion confirmation (and a fresh timestamp so that the actuator sees a
//! new event), then deleted. Not-found at either step counts as success.

use kube::ResourceExt;
use serde_json::json;
use tracing::{debug, info, instrument};

use super::annotations::{format_timestamp, CONFIRM_DELETION_ANNOTATION, TIMESTAMP_ANNOTATION};
use super::clock::Clock;
use crate::crd::ExtensionObject;
use crate::error::{Error, Phase, Result};
use crate::store::ObjectStore;

/// Confirm and request the deletion of one object
#[instrument(skip(store, clock), fields(kind = %K::kind_name()))]
pub async fn delete_object<K, S>(
    store: &S,
    clock: &dyn Clock,
    namespace: &str,
    name: &str,
) -> Result<()>
where
    K: ExtensionObject,
    S: ObjectStore,
{
    let patch = json!({
        "metadata": {
            "annotations": {
                CONFIRM_DELETION_ANNOTATION: "true",
                TIMESTAMP_ANNOTATION: format_timestamp(&clock.now()),
            }
        }
    });

    match store.merge_patch::<K>(namespace, name, &patch).await {
        Ok(_) => {}
        Err(e) if e.is_not_found() => {
            debug!(namespace, name, "Already deleted");
            return Ok(());
        }
        Err(e) => return Err(e),
    }

    match store.delete::<K>(namespace, name).await {
        Ok(()) => {
            info!("Requested deletion of {} {}/{}", K::kind_name(), namespace, name);
            Ok(())
        }
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(e),
    }
}

/// Delete every object of kind `K` in `namespace` matching `predicate`
///
/// Each candidate is re-read right before deletion and skipped if it no
/// longer matches. All failures are collected and tagged with `phase`.
/// Returns the names of the objects whose deletion was requested.
pub async fn delete_objects<K, S, P>(
    store: &S,
    clock: &dyn Clock,
    namespace: &str,
    phase: Phase,
    predicate: P,
) -> Result<Vec<String>>
where
    K: ExtensionObject,
    S: ObjectStore,
    P: Fn(&K) -> bool + Send + Sync,
{
    let candidates: Vec<String> = store
        .list::<K>(namespace, None)
        .await?
        .iter()
        .filter(|obj| predicate(obj))
        .map(|obj| obj.name_any())
        .collect();

    let predicate = &predicate;
    let results = futures::future::join_all(candidates.iter().map(|name| async move {
        match store.get::<K>(namespace, name).await {
            Ok(current) if predicate(&current) => {
                delete_object::<K, S>(store, clock, namespace, name)
                    .await
                    .map(|()| Some(name.clone()))
            }
            Ok(_) => {
                debug!(namespace, name = %name, "Object became wanted, skipping deletion");
                Ok(None)
            }
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }))
    .await;

    let mut deleted = Vec::new();
    let mut errors = Vec::new();
    for (name, result) in candidates.iter().zip(results) {
        match result {
            Ok(Some(name)) => deleted.push(name),
            Ok(None) => {}
            Err(e) => errors.push(e.in_operation(phase, &K::kind_name(), namespace, name)),
        }
    }

    match Error::aggregate(errors) {
        Some(err) => Err(err),
        None => Ok(deleted),
    }
}
