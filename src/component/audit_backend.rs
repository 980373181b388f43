//! Deployer for the AuditBackend extension of a managed cluster

use std::sync::Arc;

use k8s_openapi::apimachinery::pkg::runtime::RawExtension;

use super::ResourceDeployer;
use crate::controller::clock::SharedClock;
use crate::controller::wait::WaitConfig;
use crate::crd::{AuditBackend, DefaultSpec};
use crate::store::ObjectStore;

pub type AuditBackendDeployer<S> = ResourceDeployer<AuditBackend, S>;

/// Desired state of the AuditBackend object
#[derive(Clone, Debug, PartialEq)]
pub struct AuditBackendValues {
    pub namespace: String,
    /// Named after the managed cluster
    pub name: String,
    pub type_: String,
    pub provider_config: Option<RawExtension>,
}

pub fn new_audit_backend<S: ObjectStore>(
    store: Arc<S>,
    clock: SharedClock,
    wait_config: WaitConfig,
    values: AuditBackendValues,
) -> AuditBackendDeployer<S> {
    let AuditBackendValues {
        namespace,
        name,
        type_,
        provider_config,
    } = values;

    ResourceDeployer::new(
        store,
        clock,
        wait_config,
        namespace,
        name,
        move |obj: &mut AuditBackend| {
            obj.spec.default_spec = DefaultSpec::new(type_.clone(), provider_config.clone());
        },
    )
}
