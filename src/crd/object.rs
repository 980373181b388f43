//! Capability set shared by all extension kinds
//!
//! The lifecycle engine is generic over [`ExtensionObject`]; every call site
//! is monomorphised for a concrete kind, so there is no runtime dispatch over
//! an open set of kinds.

use std::fmt::Debug;

use k8s_openapi::NamespaceResourceScope;
use kube::api::ObjectMeta;
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::types::{DefaultSpec, DefaultStatus, Purpose};

pub trait ExtensionObject:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    /// Object carrying only its identity, used as the base for creation
    fn empty(namespace: &str, name: &str) -> Self;

    fn extension_spec(&self) -> &DefaultSpec;

    fn extension_status(&self) -> Option<&DefaultStatus>;

    /// Purpose of the object, only meaningful for kinds that distinguish one
    fn extension_purpose(&self) -> Option<Purpose> {
        None
    }

    fn extension_type(&self) -> &str {
        &self.extension_spec().type_
    }

    fn kind_name() -> String {
        Self::kind(&()).into_owned()
    }
}

/// Identity of an extension object: kind, namespace and name
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(kind: impl Into<String>, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn of<K: ExtensionObject>(obj: &K) -> Self {
        Self::new(
            K::kind_name(),
            obj.namespace().unwrap_or_default(),
            obj.name_any(),
        )
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}

pub(crate) fn identity_meta(namespace: &str, name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        ..Default::default()
    }
}
