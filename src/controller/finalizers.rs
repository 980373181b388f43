//! Finalizer handling for extension objects
//!
//! The actuator controller protects every object it reconciled with a
//! finalizer so that a deletion request is only completed after the actuator
//! cleaned up whatever it provisioned.

use kube::ResourceExt;
use serde_json::json;
use tracing::info;

use crate::crd::ExtensionObject;
use crate::error::Result;
use crate::store::ObjectStore;

/// Finalizer name used by actuators driven through [`crate::actuator::ActuatorController`]
pub const EXTENSION_FINALIZER: &str = "extensions.fleetplane.io/finalizer";

/// Add `finalizer` to an object if not present
///
/// The patch is pinned to the object's resource version; a concurrent write
/// fails it with a conflict.
pub async fn add_finalizer<K, S>(store: &S, obj: &K, finalizer: &str) -> Result<()>
where
    K: ExtensionObject,
    S: ObjectStore,
{
    if has_finalizer(obj, finalizer) {
        return Ok(());
    }

    let mut finalizers: Vec<String> = obj.finalizers().to_vec();
    finalizers.push(finalizer.to_string());
    let patch = json!({
        "metadata": {
            "resourceVersion": obj.resource_version(),
            "finalizers": finalizers
        }
    });
    store
        .merge_patch::<K>(&obj.namespace().unwrap_or_default(), &obj.name_any(), &patch)
        .await?;
    info!("Added finalizer to {}: {}", K::kind_name(), obj.name_any());
    Ok(())
}

/// Remove `finalizer` after cleanup is complete
///
/// Once the last finalizer is gone the store completes the deletion. A
/// missing object counts as success.
pub async fn remove_finalizer<K, S>(store: &S, obj: &K, finalizer: &str) -> Result<()>
where
    K: ExtensionObject,
    S: ObjectStore,
{
    if !has_finalizer(obj, finalizer) {
        return Ok(());
    }

    let finalizers: Vec<&String> = obj
        .finalizers()
        .iter()
        .filter(|f| f.as_str() != finalizer)
        .collect();
    let patch = json!({
        "metadata": {
            "resourceVersion": obj.resource_version(),
            "finalizers": finalizers
        }
    });

    match store
        .merge_patch::<K>(&obj.namespace().unwrap_or_default(), &obj.name_any(), &patch)
        .await
    {
        Ok(_) => {
            info!("Removed finalizer from {}: {}", K::kind_name(), obj.name_any());
            Ok(())
        }
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(e),
    }
}

/// Check if the object is being deleted
pub fn is_being_deleted<K: ExtensionObject>(obj: &K) -> bool {
    obj.meta().deletion_timestamp.is_some()
}

pub fn has_finalizer<K: ExtensionObject>(obj: &K, finalizer: &str) -> bool {
    obj.finalizers().iter().any(|f| f == finalizer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{DefaultSpec, Extension};
    use crate::store::MemoryStore;

    const NS: &str = "shoot--foo--bar";

    async fn stored(store: &MemoryStore) -> Extension {
        let mut ext = Extension::empty(NS, "dns");
        ext.spec.default_spec = DefaultSpec::new("dns", None);
        store.create(&ext).await.unwrap()
    }

    #[tokio::test]
    async fn test_finalizer_blocks_deletion_until_removed() {
        let store = MemoryStore::new();
        let ext = stored(&store).await;

        add_finalizer(&store, &ext, EXTENSION_FINALIZER).await.unwrap();
        store.delete::<Extension>(NS, "dns").await.unwrap();

        let pending: Extension = store.get(NS, "dns").await.unwrap();
        assert!(is_being_deleted(&pending));
        assert!(has_finalizer(&pending, EXTENSION_FINALIZER));

        remove_finalizer(&store, &pending, EXTENSION_FINALIZER)
            .await
            .unwrap();
        let err = store.get::<Extension>(NS, "dns").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_stale_finalizer_patch_conflicts() {
        let store = MemoryStore::new();
        let ext = stored(&store).await;
        store
            .merge_patch::<Extension>(NS, "dns", &json!({"metadata": {"labels": {"a": "b"}}}))
            .await
            .unwrap();

        let err = add_finalizer(&store, &ext, EXTENSION_FINALIZER)
            .await
            .unwrap_err();
        assert!(matches!(err, crate::Error::Conflict { .. }));
    }

    #[test]
    fn test_finalizer_name() {
        assert_eq!(EXTENSION_FINALIZER, "extensions.fleetplane.io/finalizer");
    }
}
