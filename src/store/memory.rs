//! In-process [`ObjectStore`]
//!
//! Keeps objects as JSON documents and applies the API server's bookkeeping:
//! resource versions on every write, generation bumps on spec changes, the
//! status subresource split, finalizer-gated deletion and validation on
//! create and update. One-shot failures can be injected per verb.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::ResourceExt;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::debug;

use super::{LabelSelector, ObjectStore};
use crate::controller::clock::{SharedClock, SystemClock};
use crate::crd::validation::join_errors;
use crate::crd::{validate_object, validate_update, ExtensionObject, ObjectKey};
use crate::error::{Error, Result};

/// Store operation targeted by an injected failure
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verb {
    Get,
    List,
    Create,
    Patch,
    PatchStatus,
    Delete,
}

#[derive(Default)]
struct State {
    objects: BTreeMap<ObjectKey, Value>,
    revision: u64,
    failures: Vec<(Verb, Error)>,
}

impl State {
    fn next_revision(&mut self) -> String {
        self.revision += 1;
        self.revision.to_string()
    }

    fn take_failure(&mut self, verb: Verb) -> Result<()> {
        match self.failures.iter().position(|(v, _)| *v == verb) {
            Some(idx) => {
                let (_, err) = self.failures.remove(idx);
                Err(err)
            }
            None => Ok(()),
        }
    }

    fn current(&self, key: &ObjectKey) -> Result<Value> {
        self.objects
            .get(key)
            .cloned()
            .ok_or_else(|| Error::not_found(key.kind.clone(), &key.namespace, &key.name))
    }
}

pub struct MemoryStore {
    state: RwLock<State>,
    clock: SharedClock,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Store stamping creation and deletion timestamps from `clock`
    pub fn with_clock(clock: SharedClock) -> Self {
        Self {
            state: RwLock::new(State::default()),
            clock,
        }
    }

    /// Make the next call of `verb` fail with a store error
    pub async fn fail_next(&self, verb: Verb, message: impl Into<String>) {
        self.fail_next_with(verb, Error::StoreError(message.into()))
            .await;
    }

    /// Make the next call of `verb` fail with `err`
    ///
    /// Failures queue up per verb, so injecting twice fails the next two calls.
    pub async fn fail_next_with(&self, verb: Verb, err: Error) {
        self.state.write().await.failures.push((verb, err));
    }

    /// Number of objects of kind `K` in `namespace`
    pub async fn count<K: ExtensionObject>(&self, namespace: &str) -> usize {
        let kind = K::kind_name();
        self.state
            .read()
            .await
            .objects
            .keys()
            .filter(|k| k.kind == kind && k.namespace == namespace)
            .count()
    }
}

fn key_for<K: ExtensionObject>(namespace: &str, name: &str) -> ObjectKey {
    ObjectKey::new(K::kind_name(), namespace, name)
}

fn invalid(key: &ObjectKey, message: String) -> Error {
    Error::Invalid {
        kind: key.kind.clone(),
        namespace: key.namespace.clone(),
        name: key.name.clone(),
        message,
    }
}

fn conflict(key: &ObjectKey, message: impl Into<String>) -> Error {
    Error::Conflict {
        kind: key.kind.clone(),
        namespace: key.namespace.clone(),
        name: key.name.clone(),
        message: message.into(),
    }
}

/// Reject patches pinned to a stale resource version
fn check_resource_version(key: &ObjectKey, current: &Value, patch: &Value) -> Result<()> {
    let wanted = patch
        .pointer("/metadata/resourceVersion")
        .and_then(Value::as_str);
    let actual = current
        .pointer("/metadata/resourceVersion")
        .and_then(Value::as_str);
    match (wanted, actual) {
        (Some(wanted), Some(actual)) if wanted != actual => Err(conflict(
            key,
            format!("resource version {wanted} does not match current {actual}"),
        )),
        _ => Ok(()),
    }
}

fn without_status(value: &mut Value) {
    if let Some(map) = value.as_object_mut() {
        map.remove("status");
    }
}

fn decode<K: ExtensionObject>(value: Value) -> Result<K> {
    Ok(serde_json::from_value(value)?)
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get<K: ExtensionObject>(&self, namespace: &str, name: &str) -> Result<K> {
        let mut state = self.state.write().await;
        state.take_failure(Verb::Get)?;
        decode(state.current(&key_for::<K>(namespace, name))?)
    }

    async fn list<K: ExtensionObject>(
        &self,
        namespace: &str,
        label_selector: Option<&str>,
    ) -> Result<Vec<K>> {
        let selector = LabelSelector::parse(label_selector.unwrap_or_default())?;
        let kind = K::kind_name();

        let mut state = self.state.write().await;
        state.take_failure(Verb::List)?;

        let mut items = Vec::new();
        for (key, value) in &state.objects {
            if key.kind != kind || key.namespace != namespace {
                continue;
            }
            let obj: K = decode(value.clone())?;
            if selector.matches(obj.meta().labels.as_ref()) {
                items.push(obj);
            }
        }
        Ok(items)
    }

    async fn create<K: ExtensionObject>(&self, obj: &K) -> Result<K> {
        let key = ObjectKey::of(obj);

        let mut state = self.state.write().await;
        state.take_failure(Verb::Create)?;

        if state.objects.contains_key(&key) {
            return Err(conflict(&key, "already exists"));
        }
        validate_object(obj).map_err(|errors| invalid(&key, join_errors(&errors)))?;

        let revision = state.next_revision();
        let mut created = obj.clone();
        {
            let meta = created.meta_mut();
            meta.uid = Some(format!("{:08x}-{revision}", state.revision));
            meta.resource_version = Some(revision);
            meta.generation = Some(1);
            meta.creation_timestamp = Some(Time(self.clock.now()));
            meta.deletion_timestamp = None;
        }

        let mut value = serde_json::to_value(&created)?;
        without_status(&mut value);
        debug!(object = %key, "Created object");
        state.objects.insert(key, value.clone());
        decode(value)
    }

    async fn merge_patch<K: ExtensionObject>(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<K> {
        let key = key_for::<K>(namespace, name);

        let mut state = self.state.write().await;
        state.take_failure(Verb::Patch)?;

        let current = state.current(&key)?;
        check_resource_version(&key, &current, patch)?;

        let mut patched = current.clone();
        json_patch::merge(&mut patched, patch);
        if let Some(map) = patched.as_object_mut() {
            // status is only writable through the subresource
            match current.get("status") {
                Some(status) => map.insert("status".to_string(), status.clone()),
                None => map.remove("status"),
            };
        }

        let old: K = decode(current.clone())?;
        let mut new: K = decode(patched)?;
        {
            let (old_meta, new_meta) = (old.meta(), new.meta_mut());
            new_meta.name = old_meta.name.clone();
            new_meta.namespace = old_meta.namespace.clone();
            new_meta.uid = old_meta.uid.clone();
            new_meta.generation = old_meta.generation;
            new_meta.resource_version = old_meta.resource_version.clone();
            new_meta.creation_timestamp = old_meta.creation_timestamp.clone();
            new_meta.deletion_timestamp = old_meta.deletion_timestamp.clone();
        }
        validate_update(&new, &old).map_err(|errors| invalid(&key, join_errors(&errors)))?;

        if serde_json::to_value(&new)? == serde_json::to_value(&old)? {
            return Ok(old);
        }

        let spec_changed = current.get("spec") != serde_json::to_value(&new)?.get("spec");
        let revision = state.next_revision();
        {
            let meta = new.meta_mut();
            meta.resource_version = Some(revision);
            if spec_changed {
                meta.generation = Some(meta.generation.unwrap_or(0) + 1);
            }
        }

        if new.meta().deletion_timestamp.is_some() && new.finalizers().is_empty() {
            debug!(object = %key, "Last finalizer removed, object deleted");
            state.objects.remove(&key);
            return Ok(new);
        }

        state.objects.insert(key, serde_json::to_value(&new)?);
        Ok(new)
    }

    async fn merge_patch_status<K: ExtensionObject>(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<K> {
        let key = key_for::<K>(namespace, name);

        let mut state = self.state.write().await;
        state.take_failure(Verb::PatchStatus)?;

        let current = state.current(&key)?;
        check_resource_version(&key, &current, patch)?;

        let Some(status_patch) = patch.get("status") else {
            return decode(current);
        };

        let mut patched = current.clone();
        if let Some(map) = patched.as_object_mut() {
            let status = map
                .entry("status".to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            json_patch::merge(status, status_patch);
        }
        if patched == current {
            return decode(current);
        }

        let revision = state.next_revision();
        let mut updated: K = decode(patched)?;
        updated.meta_mut().resource_version = Some(revision);
        state
            .objects
            .insert(key, serde_json::to_value(&updated)?);
        Ok(updated)
    }

    async fn delete<K: ExtensionObject>(&self, namespace: &str, name: &str) -> Result<()> {
        let key = key_for::<K>(namespace, name);

        let mut state = self.state.write().await;
        state.take_failure(Verb::Delete)?;

        let mut obj: K = decode(state.current(&key)?)?;
        if obj.finalizers().is_empty() {
            debug!(object = %key, "Deleted object");
            state.objects.remove(&key);
            return Ok(());
        }

        if obj.meta().deletion_timestamp.is_none() {
            let revision = state.next_revision();
            let meta = obj.meta_mut();
            meta.deletion_timestamp = Some(Time(self.clock.now()));
            meta.resource_version = Some(revision);
            debug!(object = %key, "Object marked for deletion, waiting for finalizers");
            state.objects.insert(key, serde_json::to_value(&obj)?);
        }
        Ok(())
    }
}
