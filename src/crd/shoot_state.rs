//! ShootState snapshot consumed by the restore protocol
//!
//! A ShootState bundles the opaque states actuators persisted in
//! `status.state` on the source hosting cluster. It is only ever read by
//! the orchestrator.

use k8s_openapi::apimachinery::pkg::runtime::RawExtension;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{raw_extension_schema, Purpose};

#[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "core.fleetplane.io",
    version = "v1alpha1",
    kind = "ShootState",
    namespaced,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ShootStateSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extensions: Vec<ExtensionResourceState>,
}

/// Persisted state of one extension object
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionResourceState {
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<Purpose>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "raw_extension_schema")]
    pub state: Option<RawExtension>,
}

impl ShootStateSpec {
    /// Look up the persisted state of the object identified by kind, name and purpose.
    ///
    /// A missing purpose on either side matches the `normal` purpose.
    pub fn find(
        &self,
        kind: &str,
        name: &str,
        purpose: Option<&Purpose>,
    ) -> Option<&ExtensionResourceState> {
        let wanted = purpose.cloned().unwrap_or_default();
        self.extensions.iter().find(|entry| {
            entry.kind == kind
                && entry.name.as_deref() == Some(name)
                && entry.purpose.clone().unwrap_or_default() == wanted
        })
    }
}
