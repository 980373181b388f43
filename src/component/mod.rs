//! Component deployers driving extension objects through their lifecycle
//!
//! A component owns one or more extension objects and exposes the lifecycle
//! operations the orchestration pipeline sequences: deploy, wait, destroy,
//! wait-cleanup and, for migratable components, migrate, wait-migrate and
//! restore.

mod audit_backend;
mod control_plane;
mod extension;
#[cfg(test)]
mod extension_test;
mod resource;

pub use audit_backend::{new_audit_backend, AuditBackendDeployer, AuditBackendValues};
pub use control_plane::{exposure_name, new_control_plane, ControlPlaneDeployer, ControlPlaneValues};
pub use extension::{
    ExtensionConfig, ExtensionsDeployer, ExtensionsValues, Lifecycle, LifecycleStage,
};
pub use resource::ResourceDeployer;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::crd::ShootStateSpec;
use crate::error::Result;

/// Component that can be deployed, awaited and destroyed
#[async_trait]
pub trait DeployWaiter: Send + Sync {
    async fn deploy(&self, cancel: &CancellationToken) -> Result<()>;

    async fn destroy(&self, cancel: &CancellationToken) -> Result<()>;

    /// Wait until the last deploy or restore has been acted upon
    async fn wait(&self, cancel: &CancellationToken) -> Result<()>;

    /// Wait until the objects removed by destroy are gone
    async fn wait_cleanup(&self, cancel: &CancellationToken) -> Result<()>;
}

/// Component that can additionally be moved between hosting clusters
#[async_trait]
pub trait DeployMigrateWaiter: DeployWaiter {
    async fn restore(&self, cancel: &CancellationToken, shoot_state: &ShootStateSpec) -> Result<()>;

    async fn migrate(&self, cancel: &CancellationToken) -> Result<()>;

    async fn wait_migrate(&self, cancel: &CancellationToken) -> Result<()>;
}
