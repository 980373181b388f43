//! Restore protocol for extension objects after a control plane migration
//!
//! When the snapshot holds a persisted state for the object, restore runs in
//! three writes:
//!
//! 1. create or update the object with the desired spec and the
//!    `wait-for-state` operation, which actuators ignore
//! 2. inject the persisted state into `status.state`
//! 3. stamp the `restore` operation, handing the object to the actuator
//!
//! Without a snapshot entry restore is a plain deploy.

use serde_json::json;
use tracing::{info, instrument};

use super::annotations::{Operation, Trigger};
use super::clock::Clock;
use super::trigger::{annotate, deploy};
use crate::crd::{ExtensionObject, Purpose, ShootStateSpec};
use crate::error::Result;
use crate::store::ObjectStore;

/// Phase 1: write the desired spec, marked as waiting for its state
pub async fn create_placeholder<K, S, F>(
    store: &S,
    clock: &dyn Clock,
    namespace: &str,
    name: &str,
    desired: F,
) -> Result<K>
where
    K: ExtensionObject,
    S: ObjectStore,
    F: Fn(&mut K) + Send + Sync,
{
    let (obj, _) = deploy(store, clock, namespace, name, Operation::WaitForState, desired).await?;
    Ok(obj)
}

/// Phase 2: write the persisted state into the status subresource
pub async fn inject_state<K, S>(
    store: &S,
    namespace: &str,
    name: &str,
    state: &serde_json::Value,
) -> Result<K>
where
    K: ExtensionObject,
    S: ObjectStore,
{
    let patch = json!({ "status": { "state": state } });
    store.merge_patch_status::<K>(namespace, name, &patch).await
}

/// Phase 3: hand the object over to the actuator
pub async fn trigger_restore<K, S>(
    store: &S,
    clock: &dyn Clock,
    namespace: &str,
    name: &str,
) -> Result<(K, Trigger)>
where
    K: ExtensionObject,
    S: ObjectStore,
{
    annotate(store, clock, namespace, name, Operation::Restore).await
}

/// Restore an object from `snapshot`, or deploy it when the snapshot has no
/// state for it
///
/// Returns the stamp the following wait has to observe.
#[instrument(skip(store, clock, snapshot, desired), fields(kind = %K::kind_name()))]
pub async fn restore<K, S, F>(
    store: &S,
    clock: &dyn Clock,
    snapshot: &ShootStateSpec,
    namespace: &str,
    name: &str,
    purpose: Option<Purpose>,
    desired: F,
) -> Result<(K, Trigger)>
where
    K: ExtensionObject,
    S: ObjectStore,
    F: Fn(&mut K) + Send + Sync,
{
    let entry = snapshot
        .find(&K::kind_name(), name, purpose.as_ref())
        .and_then(|entry| entry.state.as_ref());

    let Some(state) = entry else {
        info!(
            "No persisted state for {} {}/{}, deploying instead",
            K::kind_name(),
            namespace,
            name
        );
        return deploy(store, clock, namespace, name, Operation::Reconcile, desired).await;
    };

    create_placeholder::<K, S, F>(store, clock, namespace, name, desired).await?;
    inject_state::<K, S>(store, namespace, name, &state.0).await?;
    let restored = trigger_restore::<K, S>(store, clock, namespace, name).await?;

    info!("Triggered restore for {} {}/{}", K::kind_name(), namespace, name);
    Ok(restored)
}
