//! [`ObjectStore`] backed by the Kubernetes API

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use serde_json::Value;
use tracing::debug;

use super::ObjectStore;
use crate::crd::ExtensionObject;
use crate::error::{Error, Result};

/// Field manager recorded on every write
const FIELD_MANAGER: &str = "fleetplane";

#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K: ExtensionObject>(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Translate API status codes into the engine's error taxonomy
fn map_error<K: ExtensionObject>(err: kube::Error, namespace: &str, name: &str) -> Error {
    match err {
        kube::Error::Api(ref response) => match response.code {
            404 => Error::not_found(K::kind_name(), namespace, name),
            422 => Error::Invalid {
                kind: K::kind_name(),
                namespace: namespace.to_string(),
                name: name.to_string(),
                message: response.message.clone(),
            },
            409 => Error::Conflict {
                kind: K::kind_name(),
                namespace: namespace.to_string(),
                name: name.to_string(),
                message: response.message.clone(),
            },
            _ => Error::KubeError(err),
        },
        other => Error::KubeError(other),
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get<K: ExtensionObject>(&self, namespace: &str, name: &str) -> Result<K> {
        self.api::<K>(namespace)
            .get(name)
            .await
            .map_err(|e| map_error::<K>(e, namespace, name))
    }

    async fn list<K: ExtensionObject>(
        &self,
        namespace: &str,
        label_selector: Option<&str>,
    ) -> Result<Vec<K>> {
        let mut params = ListParams::default();
        if let Some(selector) = label_selector {
            params = params.labels(selector);
        }
        let list = self
            .api::<K>(namespace)
            .list(&params)
            .await
            .map_err(|e| map_error::<K>(e, namespace, ""))?;
        Ok(list.items)
    }

    async fn create<K: ExtensionObject>(&self, obj: &K) -> Result<K> {
        let namespace = obj.namespace().unwrap_or_default();
        let name = obj.name_any();
        debug!(kind = %K::kind_name(), %namespace, %name, "Creating object");
        self.api::<K>(&namespace)
            .create(
                &PostParams {
                    field_manager: Some(FIELD_MANAGER.to_string()),
                    ..Default::default()
                },
                obj,
            )
            .await
            .map_err(|e| map_error::<K>(e, &namespace, &name))
    }

    async fn merge_patch<K: ExtensionObject>(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<K> {
        self.api::<K>(namespace)
            .patch(
                name,
                &PatchParams::default(),
                &Patch::Merge(patch),
            )
            .await
            .map_err(|e| map_error::<K>(e, namespace, name))
    }

    async fn merge_patch_status<K: ExtensionObject>(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<K> {
        self.api::<K>(namespace)
            .patch_status(
                name,
                &PatchParams::default(),
                &Patch::Merge(patch),
            )
            .await
            .map_err(|e| map_error::<K>(e, namespace, name))
    }

    async fn delete<K: ExtensionObject>(&self, namespace: &str, name: &str) -> Result<()> {
        self.api::<K>(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| map_error::<K>(e, namespace, name))?;
        Ok(())
    }
}
