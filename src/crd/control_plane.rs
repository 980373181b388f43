//! ControlPlane Custom Resource Definition
//!
//! Provider specific control plane components of a managed cluster. A
//! cluster may have two objects: the `normal` one and an `exposure` one
//! making the control plane reachable from outside the hosting cluster.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::object::{identity_meta, ExtensionObject};
use super::types::{DefaultSpec, DefaultStatus, Purpose};

#[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "extensions.fleetplane.io",
    version = "v1alpha1",
    kind = "ControlPlane",
    namespaced,
    status = "DefaultStatus",
    shortname = "cp",
    printcolumn = r#"{"name":"Type","type":"string","jsonPath":".spec.type"}"#,
    printcolumn = r#"{"name":"Purpose","type":"string","jsonPath":".spec.purpose"}"#,
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.lastOperation.state"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ControlPlaneSpec {
    #[serde(flatten)]
    pub default_spec: DefaultSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<Purpose>,

    /// Region of the infrastructure the control plane serves
    #[serde(default)]
    pub region: String,
}

impl ExtensionObject for ControlPlane {
    fn empty(namespace: &str, name: &str) -> Self {
        ControlPlane {
            metadata: identity_meta(namespace, name),
            spec: ControlPlaneSpec::default(),
            status: None,
        }
    }

    fn extension_spec(&self) -> &DefaultSpec {
        &self.spec.default_spec
    }

    fn extension_status(&self) -> Option<&DefaultStatus> {
        self.status.as_ref()
    }

    fn extension_purpose(&self) -> Option<Purpose> {
        Some(self.spec.purpose.clone().unwrap_or_default())
    }
}
