//! Deployer for the ControlPlane extensions of a managed cluster
//!
//! A managed cluster has a `normal` control plane object and, when the
//! provider needs one, an `exposure` object named `<name>-exposure`.

use std::sync::Arc;

use k8s_openapi::apimachinery::pkg::runtime::RawExtension;

use super::ResourceDeployer;
use crate::controller::clock::SharedClock;
use crate::controller::wait::WaitConfig;
use crate::crd::{ControlPlane, DefaultSpec, Purpose};
use crate::store::ObjectStore;

pub type ControlPlaneDeployer<S> = ResourceDeployer<ControlPlane, S>;

#[derive(Clone, Debug, PartialEq)]
pub struct ControlPlaneValues {
    pub namespace: String,
    /// Named after the managed cluster
    pub name: String,
    pub type_: String,
    pub region: String,
    pub purpose: Purpose,
    pub provider_config: Option<RawExtension>,
}

/// Name of the exposure control plane object of a managed cluster
pub fn exposure_name(name: &str) -> String {
    format!("{name}-exposure")
}

pub fn new_control_plane<S: ObjectStore>(
    store: Arc<S>,
    clock: SharedClock,
    wait_config: WaitConfig,
    values: ControlPlaneValues,
) -> ControlPlaneDeployer<S> {
    let ControlPlaneValues {
        namespace,
        name,
        type_,
        region,
        purpose,
        provider_config,
    } = values;

    let object_name = match purpose {
        Purpose::Normal => name,
        Purpose::Exposure => exposure_name(&name),
    };
    let desired_purpose = purpose.clone();

    ResourceDeployer::new(
        store,
        clock,
        wait_config,
        namespace,
        object_name,
        move |obj: &mut ControlPlane| {
            obj.spec.default_spec = DefaultSpec::new(type_.clone(), provider_config.clone());
            obj.spec.region = region.clone();
            obj.spec.purpose = Some(desired_purpose.clone());
        },
    )
    .with_purpose(purpose)
}
