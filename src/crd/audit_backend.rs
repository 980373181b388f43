//! AuditBackend Custom Resource Definition
//!
//! Delivers the audit log of a managed cluster's API server to a backend
//! provisioned by the actuator of the configured type.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::object::{identity_meta, ExtensionObject};
use super::types::{DefaultSpec, DefaultStatus};

#[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "extensions.fleetplane.io",
    version = "v1alpha1",
    kind = "AuditBackend",
    namespaced,
    status = "DefaultStatus",
    printcolumn = r#"{"name":"Type","type":"string","jsonPath":".spec.type"}"#,
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.lastOperation.state"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AuditBackendSpec {
    #[serde(flatten)]
    pub default_spec: DefaultSpec,
}

impl ExtensionObject for AuditBackend {
    fn empty(namespace: &str, name: &str) -> Self {
        AuditBackend {
            metadata: identity_meta(namespace, name),
            spec: AuditBackendSpec::default(),
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
