//! Caller-side sequencing of the lifecycle phases of a managed cluster
//!
//! The pipeline owns one deployer per component and runs the flows:
//!
//! - reconcile: extensions before the kube-apiserver, then audit backend and
//!   control planes, then the remaining extensions, then garbage collection
//!   of extension types that are no longer wanted
//! - restore: like reconcile, with every deploy replaced by a restore from a
//!   state snapshot
//! - migrate: migrate and wait-migrate, in the same order
//! - delete: extensions deleted before the kube-apiserver, control planes,
//!   audit backend, then every remaining extension
//!
//! Every step is awaited before the next one starts.

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::component::{
    new_audit_backend, new_control_plane, AuditBackendDeployer, ControlPlaneDeployer,
    DeployMigrateWaiter, DeployWaiter, ExtensionsDeployer, LifecycleStage,
};
use crate::config::OrchestratorConfig;
use crate::controller::clock::SharedClock;
use crate::controller::flow::{parallel, JoinPolicy};
use crate::controller::wait::WaitConfig;
use crate::crd::ShootStateSpec;
use crate::error::Result;
use crate::store::ObjectStore;

use LifecycleStage::{AfterKubeAPIServer, BeforeKubeAPIServer};

pub struct Pipeline<S: ObjectStore> {
    namespace: String,
    audit_backend: Option<AuditBackendDeployer<S>>,
    control_planes: Vec<ControlPlaneDeployer<S>>,
    extensions: ExtensionsDeployer<S>,
}

impl<S: ObjectStore> Pipeline<S> {
    pub fn new(store: Arc<S>, clock: SharedClock, config: &OrchestratorConfig) -> Self {
        Self::with_wait_config(store, clock, config, config.wait_config())
    }

    /// Pipeline polling with `wait_config` instead of the configured wait settings
    pub fn with_wait_config(
        store: Arc<S>,
        clock: SharedClock,
        config: &OrchestratorConfig,
        wait_config: WaitConfig,
    ) -> Self {
        let audit_backend = config
            .audit_backend_values()
            .map(|values| new_audit_backend(store.clone(), clock.clone(), wait_config, values));
        let control_planes = config
            .control_plane_values()
            .into_iter()
            .map(|values| new_control_plane(store.clone(), clock.clone(), wait_config, values))
            .collect();
        let extensions =
            ExtensionsDeployer::new(store, clock, wait_config, config.extensions_values());

        Self {
            namespace: config.namespace.clone(),
            audit_backend,
            control_planes,
            extensions,
        }
    }

    pub fn extensions(&self) -> &ExtensionsDeployer<S> {
        &self.extensions
    }

    pub fn control_planes(&self) -> &[ControlPlaneDeployer<S>] {
        &self.control_planes
    }

    pub fn audit_backend(&self) -> Option<&AuditBackendDeployer<S>> {
        self.audit_backend.as_ref()
    }

    /// Audit backend and control planes
    fn components(&self) -> Vec<&dyn DeployMigrateWaiter> {
        let mut components: Vec<&dyn DeployMigrateWaiter> = Vec::new();
        if let Some(audit_backend) = &self.audit_backend {
            components.push(audit_backend);
        }
        for control_plane in &self.control_planes {
            components.push(control_plane);
        }
        components
    }

    #[instrument(skip_all, fields(namespace = %self.namespace))]
    pub async fn reconcile(&self, cancel: &CancellationToken) -> Result<()> {
        info!("Deploying extensions needed before the kube-apiserver");
        self.extensions.deploy_stage(BeforeKubeAPIServer, cancel).await?;
        self.extensions.wait_stage(BeforeKubeAPIServer, cancel).await?;

        info!("Deploying audit backend and control planes");
        self.each(JoinPolicy::CollectAll, cancel, |c, token| async move {
            c.deploy(&token).await
        })
        .await?;
        self.each(JoinPolicy::FailFast, cancel, |c, token| async move {
            c.wait(&token).await
        })
        .await?;

        info!("Deploying remaining extensions");
        self.extensions.deploy(cancel).await?;
        self.extensions.wait(cancel).await?;

        self.collect_garbage(cancel).await?;
        info!("Reconciliation finished");
        Ok(())
    }

    #[instrument(skip_all, fields(namespace = %self.namespace))]
    pub async fn restore(&self, cancel: &CancellationToken, shoot_state: &ShootStateSpec) -> Result<()> {
        info!("Restoring extensions needed before the kube-apiserver");
        self.extensions
            .restore_stage(BeforeKubeAPIServer, cancel, shoot_state)
            .await?;
        self.extensions.wait_stage(BeforeKubeAPIServer, cancel).await?;

        info!("Restoring audit backend and control planes");
        self.each(JoinPolicy::CollectAll, cancel, |c, token| async move {
            c.restore(&token, shoot_state).await
        })
        .await?;
        self.each(JoinPolicy::FailFast, cancel, |c, token| async move {
            c.wait(&token).await
        })
        .await?;

        info!("Restoring remaining extensions");
        DeployMigrateWaiter::restore(&self.extensions, cancel, shoot_state).await?;
        self.extensions.wait(cancel).await?;

        self.collect_garbage(cancel).await?;
        info!("Restoration finished");
        Ok(())
    }

    #[instrument(skip_all, fields(namespace = %self.namespace))]
    pub async fn migrate(&self, cancel: &CancellationToken) -> Result<()> {
        info!("Migrating extensions handled before the kube-apiserver");
        self.extensions
            .migrate_stage(Some(BeforeKubeAPIServer), cancel)
            .await?;
        self.extensions
            .wait_migrate_stage(Some(BeforeKubeAPIServer), cancel)
            .await?;

        info!("Migrating audit backend and control planes");
        self.each(JoinPolicy::CollectAll, cancel, |c, token| async move {
            c.migrate(&token).await
        })
        .await?;
        self.each(JoinPolicy::CollectAll, cancel, |c, token| async move {
            c.wait_migrate(&token).await
        })
        .await?;

        info!("Migrating remaining extensions");
        self.extensions
            .migrate_stage(Some(AfterKubeAPIServer), cancel)
            .await?;
        self.extensions
            .wait_migrate_stage(Some(AfterKubeAPIServer), cancel)
            .await?;

        info!("Migration finished");
        Ok(())
    }

    #[instrument(skip_all, fields(namespace = %self.namespace))]
    pub async fn delete(&self, cancel: &CancellationToken) -> Result<()> {
        info!("Deleting extensions handled before the kube-apiserver");
        self.extensions.destroy_stage(BeforeKubeAPIServer, cancel).await?;
        self.extensions
            .wait_cleanup_stage(BeforeKubeAPIServer, cancel)
            .await?;

        if !self.control_planes.is_empty() {
            info!("Deleting control planes");
            let control_planes: Vec<&dyn DeployMigrateWaiter> = self
                .control_planes
                .iter()
                .map(|c| c as &dyn DeployMigrateWaiter)
                .collect();
            Self::fan_out(&control_planes, JoinPolicy::CollectAll, cancel, |c, token| async move {
                c.destroy(&token).await
            })
            .await?;
            Self::fan_out(&control_planes, JoinPolicy::CollectAll, cancel, |c, token| async move {
                c.wait_cleanup(&token).await
            })
            .await?;
        }

        if let Some(audit_backend) = &self.audit_backend {
            info!("Deleting audit backend");
            audit_backend.destroy(cancel).await?;
            audit_backend.wait_cleanup(cancel).await?;
        }

        // everything left, stale types included
        info!("Deleting remaining extensions");
        DeployWaiter::destroy(&self.extensions, cancel).await?;
        self.extensions.wait_cleanup(cancel).await?;

        info!("Deletion finished");
        Ok(())
    }

    async fn collect_garbage(&self, cancel: &CancellationToken) -> Result<()> {
        info!("Deleting extensions that are no longer wanted");
        self.extensions.delete_stale_resources(cancel).await?;
        self.extensions.wait_cleanup_stale_resources(cancel).await
    }

    async fn each<'a, F, Fut>(&'a self, policy: JoinPolicy, cancel: &CancellationToken, op: F) -> Result<()>
    where
        F: Fn(&'a dyn DeployMigrateWaiter, CancellationToken) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        Self::fan_out(&self.components(), policy, cancel, op).await
    }

    async fn fan_out<'a, F, Fut>(
        components: &[&'a dyn DeployMigrateWaiter],
        policy: JoinPolicy,
        cancel: &CancellationToken,
        op: F,
    ) -> Result<()>
    where
        F: Fn(&'a dyn DeployMigrateWaiter, CancellationToken) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let op = &op;
        let tasks = components
            .iter()
            .map(|component| move |token: CancellationToken| op(*component, token));
        parallel(policy, cancel, tasks).await
    }
}
