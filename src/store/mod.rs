//! Declarative object store boundary
//!
//! The lifecycle engine talks to the store only through [`ObjectStore`]:
//! get, list, create, merge patch (object and status) and delete. Errors
//! distinguish not-found ([`crate::Error::NotFound`]) from every other failure.
//!
//! Two implementations are provided: [`KubeStore`] backed by the Kubernetes
//! API and [`MemoryStore`], an in-process store used by tests and simulations
//! that mimics the API server's bookkeeping (resource versions, generations,
//! finalizers, validation).

mod kubernetes;
mod memory;
mod selector;

pub use kubernetes::KubeStore;
pub use memory::{MemoryStore, Verb};
pub use selector::LabelSelector;

use async_trait::async_trait;
use serde_json::Value;

use crate::crd::ExtensionObject;
use crate::error::Result;

#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    async fn get<K: ExtensionObject>(&self, namespace: &str, name: &str) -> Result<K>;

    /// List objects of kind `K` in `namespace`, optionally filtered by a label selector
    async fn list<K: ExtensionObject>(
        &self,
        namespace: &str,
        label_selector: Option<&str>,
    ) -> Result<Vec<K>>;

    async fn create<K: ExtensionObject>(&self, obj: &K) -> Result<K>;

    /// Apply a JSON merge patch to the object, status excluded
    async fn merge_patch<K: ExtensionObject>(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<K>;

    /// Apply a JSON merge patch to the status subresource
    async fn merge_patch_status<K: ExtensionObject>(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<K>;

    /// Request deletion; objects with finalizers are only marked for deletion
    async fn delete<K: ExtensionObject>(&self, namespace: &str, name: &str) -> Result<()>;
}
