//! Extension Custom Resource Definition
//!
//! A generic extension delegated to an out-of-process actuator. A managed
//! cluster namespace holds at most one Extension object per type.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::object::{identity_meta, ExtensionObject};
use super::types::{DefaultSpec, DefaultStatus};

#[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "extensions.fleetplane.io",
    version = "v1alpha1",
    kind = "Extension",
    namespaced,
    status = "DefaultStatus",
    shortname = "ext",
    derive = "PartialEq",
    printcolumn = r#"{"name":"Type","type":"string","jsonPath":".spec.type"}"#,
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.lastOperation.state"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionSpec {
    #[serde(flatten)]
    pub default_spec: DefaultSpec,
}

impl ExtensionObject for Extension {
    fn empty(namespace: &str, name: &str) -> Self {
        Extension {
            metadata: identity_meta(namespace, name),
            spec: ExtensionSpec::default(),
            status: None,
        }
    }

    fn extension_spec(&self) -> &DefaultSpec {
        &self.spec.default_spec
    }

    fn extension_status(&self) -> Option<&DefaultStatus> {
        self.status.as_ref()
    }
}
