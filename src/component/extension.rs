//! Deployer for the generic Extension objects of a managed cluster
//!
//! One Extension object exists per configured type, named after the type.
//! Each extension declares in which stage of the pipeline it is reconciled,
//! deleted and migrated relative to the kube-apiserver of the managed
//! cluster; the deployer exposes per-stage variants of its operations.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::runtime::RawExtension;
use kube::ResourceExt;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use super::{DeployMigrateWaiter, DeployWaiter, ResourceDeployer};
use crate::controller::annotations::Trigger;
use crate::controller::clock::SharedClock;
use crate::controller::delete::delete_objects;
use crate::controller::flow::{parallel, JoinPolicy};
use crate::controller::poll::cancellable;
use crate::controller::trigger;
use crate::controller::wait::{wait_until_all_deleted, wait_until_migrated, WaitConfig};
use crate::crd::{DefaultSpec, Extension, ExtensionObject, ShootStateSpec};
use crate::error::{Error, Phase, Result};
use crate::store::ObjectStore;

/// Stage of the pipeline relative to the kube-apiserver of the managed cluster
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleStage {
    BeforeKubeAPIServer,
    AfterKubeAPIServer,
}

/// When an extension is handled during each operation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lifecycle {
    #[serde(default = "after_kube_api_server")]
    pub reconcile: LifecycleStage,
    #[serde(default = "before_kube_api_server")]
    pub delete: LifecycleStage,
    #[serde(default = "after_kube_api_server")]
    pub migrate: LifecycleStage,
}

fn after_kube_api_server() -> LifecycleStage {
    LifecycleStage::AfterKubeAPIServer
}

fn before_kube_api_server() -> LifecycleStage {
    LifecycleStage::BeforeKubeAPIServer
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self {
            reconcile: LifecycleStage::AfterKubeAPIServer,
            delete: LifecycleStage::BeforeKubeAPIServer,
            migrate: LifecycleStage::AfterKubeAPIServer,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExtensionConfig {
    pub provider_config: Option<RawExtension>,
    /// Overrides the wait timeout for this extension
    pub timeout: Option<Duration>,
    pub lifecycle: Lifecycle,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExtensionsValues {
    pub namespace: String,
    /// Wanted extensions by type
    pub extensions: BTreeMap<String, ExtensionConfig>,
}

pub struct ExtensionsDeployer<S: ObjectStore> {
    store: Arc<S>,
    clock: SharedClock,
    wait_config: WaitConfig,
    values: ExtensionsValues,
    deployers: BTreeMap<String, ResourceDeployer<Extension, S>>,
    migrate_stamps: Mutex<BTreeMap<String, Trigger>>,
}

const KIND: &str = "Extension";

/// Placeholder name for operations spanning all objects of a namespace
const ALL: &str = "*";

impl<S: ObjectStore> ExtensionsDeployer<S> {
    pub fn new(
        store: Arc<S>,
        clock: SharedClock,
        wait_config: WaitConfig,
        values: ExtensionsValues,
    ) -> Self {
        let deployers = values
            .extensions
            .iter()
            .map(|(type_, config)| {
                let wait = match config.timeout {
                    Some(timeout) => wait_config.with_timeout(timeout),
                    None => wait_config,
                };
                let desired_type = type_.clone();
                let provider_config = config.provider_config.clone();
                let deployer = ResourceDeployer::new(
                    store.clone(),
                    clock.clone(),
                    wait,
                    values.namespace.clone(),
                    type_.clone(),
                    move |obj: &mut Extension| {
                        obj.spec.default_spec =
                            DefaultSpec::new(desired_type.clone(), provider_config.clone());
                    },
                );
                (type_.clone(), deployer)
            })
            .collect();

        Self {
            store,
            clock,
            wait_config,
            values,
            deployers,
            migrate_stamps: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn values(&self) -> &ExtensionsValues {
        &self.values
    }

    /// Deployer of the extension of type `type_`, if it is wanted
    pub fn deployer(&self, type_: &str) -> Option<&ResourceDeployer<Extension, S>> {
        self.deployers.get(type_)
    }

    fn types_in(&self, stage: LifecycleStage, select: fn(&Lifecycle) -> LifecycleStage) -> BTreeSet<String> {
        self.values
            .extensions
            .iter()
            .filter(|(_, config)| select(&config.lifecycle) == stage)
            .map(|(type_, _)| type_.clone())
            .collect()
    }

    fn wanted_types(&self) -> BTreeSet<String> {
        self.values.extensions.keys().cloned().collect()
    }

    fn reconciled_in(&self, stage: LifecycleStage) -> impl Iterator<Item = &ResourceDeployer<Extension, S>> {
        self.deployers
            .iter()
            .filter(move |(type_, _)| {
                self.values
                    .extensions
                    .get(type_.as_str())
                    .is_some_and(|config| config.lifecycle.reconcile == stage)
            })
            .map(|(_, deployer)| deployer)
    }

    /// Deploy the extensions reconciled in `stage`, collecting all failures
    #[instrument(skip(self, cancel), fields(namespace = %self.values.namespace))]
    pub async fn deploy_stage(&self, stage: LifecycleStage, cancel: &CancellationToken) -> Result<()> {
        let tasks = self.reconciled_in(stage).map(|deployer| {
            move |token: CancellationToken| async move { deployer.deploy(&token).await }
        });
        parallel(JoinPolicy::CollectAll, cancel, tasks).await
    }

    /// Wait for the extensions reconciled in `stage`, aborting on the first failure
    #[instrument(skip(self, cancel), fields(namespace = %self.values.namespace))]
    pub async fn wait_stage(&self, stage: LifecycleStage, cancel: &CancellationToken) -> Result<()> {
        let tasks = self.reconciled_in(stage).map(|deployer| {
            move |token: CancellationToken| async move { deployer.wait(&token).await }
        });
        parallel(JoinPolicy::FailFast, cancel, tasks).await
    }

    /// Restore the extensions reconciled in `stage`, collecting all failures
    #[instrument(skip(self, cancel, shoot_state), fields(namespace = %self.values.namespace))]
    pub async fn restore_stage(
        &self,
        stage: LifecycleStage,
        cancel: &CancellationToken,
        shoot_state: &ShootStateSpec,
    ) -> Result<()> {
        let tasks = self.reconciled_in(stage).map(|deployer| {
            move |token: CancellationToken| async move {
                deployer.restore(&token, shoot_state).await
            }
        });
        parallel(JoinPolicy::CollectAll, cancel, tasks).await
    }

    /// Delete the extensions whose delete stage is `stage`
    pub async fn destroy_stage(&self, stage: LifecycleStage, cancel: &CancellationToken) -> Result<()> {
        let types = self.types_in(stage, |l| l.delete);
        self.delete_matching(cancel, Phase::Destroy, move |obj| types.contains(obj.extension_type()))
            .await
    }

    /// Wait until the extensions whose delete stage is `stage` are gone
    pub async fn wait_cleanup_stage(
        &self,
        stage: LifecycleStage,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let types = self.types_in(stage, |l| l.delete);
        self.wait_deleted_matching(cancel, Phase::WaitCleanup, move |obj| {
            types.contains(obj.extension_type())
        })
        .await
    }

    /// Delete every Extension object whose type is no longer wanted
    ///
    /// The wanted set is computed once per call; every candidate is re-read
    /// right before its deletion.
    #[instrument(skip(self, cancel), fields(namespace = %self.values.namespace))]
    pub async fn delete_stale_resources(&self, cancel: &CancellationToken) -> Result<()> {
        let wanted = self.wanted_types();
        self.delete_matching(cancel, Phase::DeleteStale, move |obj| {
            !wanted.contains(obj.extension_type())
        })
        .await
    }

    /// Wait until no Extension object of an unwanted type remains
    pub async fn wait_cleanup_stale_resources(&self, cancel: &CancellationToken) -> Result<()> {
        let wanted = self.wanted_types();
        self.wait_deleted_matching(cancel, Phase::WaitCleanupStale, move |obj| {
            !wanted.contains(obj.extension_type())
        })
        .await
    }

    async fn delete_matching<P>(&self, cancel: &CancellationToken, phase: Phase, predicate: P) -> Result<()>
    where
        P: Fn(&Extension) -> bool + Send + Sync,
    {
        let deleted = cancellable(cancel, async {
            delete_objects::<Extension, S, _>(
                self.store.as_ref(),
                self.clock.as_ref(),
                &self.values.namespace,
                phase,
                predicate,
            )
            .await
            .map_err(|e| e.in_operation(phase, KIND, &self.values.namespace, ALL))
        })
        .await?;

        if !deleted.is_empty() {
            info!(
                namespace = %self.values.namespace,
                "Requested deletion of extensions: {}",
                deleted.join(", ")
            );
        }
        Ok(())
    }

    async fn wait_deleted_matching<P>(
        &self,
        cancel: &CancellationToken,
        phase: Phase,
        predicate: P,
    ) -> Result<()>
    where
        P: Fn(&Extension) -> bool + Send + Sync,
    {
        wait_until_all_deleted::<Extension, S, _>(
            self.store.as_ref(),
            cancel,
            self.wait_config.interval,
            self.wait_config.timeout,
            &self.values.namespace,
            predicate,
        )
        .await
        .map_err(|e| e.in_operation(phase, KIND, &self.values.namespace, ALL))
    }

    /// Stage an object of `type_` is migrated in; unknown types go last
    fn migrate_stage_of(&self, type_: &str) -> LifecycleStage {
        self.values
            .extensions
            .get(type_)
            .map_or(LifecycleStage::AfterKubeAPIServer, |config| {
                config.lifecycle.migrate
            })
    }

    /// Names of the present objects, restricted to a migrate stage if given
    async fn existing_names(&self, stage: Option<LifecycleStage>) -> Result<Vec<String>> {
        Ok(self
            .store
            .list::<Extension>(&self.values.namespace, None)
            .await?
            .iter()
            .filter(|obj| stage.map_or(true, |s| self.migrate_stage_of(obj.extension_type()) == s))
            .map(|obj| obj.name_any())
            .collect())
    }

    /// Mark the present objects migrated in `stage` (all when `None`) for migration
    #[instrument(skip(self, cancel), fields(namespace = %self.values.namespace))]
    pub async fn migrate_stage(
        &self,
        stage: Option<LifecycleStage>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let names = self
            .existing_names(stage)
            .await
            .map_err(|e| e.in_operation(Phase::Migrate, KIND, &self.values.namespace, ALL))?;

        let tasks = names.iter().map(|name| {
            move |token: CancellationToken| async move {
                let stamp = cancellable(
                    &token,
                    trigger::migrate::<Extension, S>(
                        self.store.as_ref(),
                        self.clock.as_ref(),
                        &self.values.namespace,
                        name,
                    ),
                )
                .await
                .map_err(|e| e.in_operation(Phase::Migrate, KIND, &self.values.namespace, name))?;
                if let Some(stamp) = stamp {
                    self.migrate_stamps.lock().await.insert(name.clone(), stamp);
                }
                Ok::<(), Error>(())
            }
        });
        parallel(JoinPolicy::CollectAll, cancel, tasks).await
    }

    /// Wait until the present objects migrated in `stage` (all when `None`)
    /// acknowledged their migration
    #[instrument(skip(self, cancel), fields(namespace = %self.values.namespace))]
    pub async fn wait_migrate_stage(
        &self,
        stage: Option<LifecycleStage>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let names = self
            .existing_names(stage)
            .await
            .map_err(|e| e.in_operation(Phase::WaitMigrate, KIND, &self.values.namespace, ALL))?;
        let stamps = self.migrate_stamps.lock().await.clone();

        let tasks = names.iter().map(|name| {
            let expected = stamps.get(name).copied();
            move |token: CancellationToken| async move {
                wait_until_migrated::<Extension, S>(
                    self.store.as_ref(),
                    &token,
                    self.wait_config.interval,
                    self.wait_config.timeout,
                    &self.values.namespace,
                    name,
                    expected,
                )
                .await
                .map_err(|e| e.in_operation(Phase::WaitMigrate, KIND, &self.values.namespace, name))
            }
        });
        parallel(JoinPolicy::CollectAll, cancel, tasks).await
    }
}

#[async_trait]
impl<S: ObjectStore> DeployWaiter for ExtensionsDeployer<S> {
    /// Deploys the extensions reconciled after the kube-apiserver
    async fn deploy(&self, cancel: &CancellationToken) -> Result<()> {
        self.deploy_stage(LifecycleStage::AfterKubeAPIServer, cancel)
            .await
    }

    /// Deletes every Extension object of the namespace
    async fn destroy(&self, cancel: &CancellationToken) -> Result<()> {
        self.delete_matching(cancel, Phase::Destroy, |_| true).await
    }

    async fn wait(&self, cancel: &CancellationToken) -> Result<()> {
        self.wait_stage(LifecycleStage::AfterKubeAPIServer, cancel)
            .await
    }

    async fn wait_cleanup(&self, cancel: &CancellationToken) -> Result<()> {
        self.wait_deleted_matching(cancel, Phase::WaitCleanup, |_| true)
            .await
    }
}

#[async_trait]
impl<S: ObjectStore> DeployMigrateWaiter for ExtensionsDeployer<S> {
    async fn restore(&self, cancel: &CancellationToken, shoot_state: &ShootStateSpec) -> Result<()> {
        self.restore_stage(LifecycleStage::AfterKubeAPIServer, cancel, shoot_state)
            .await
    }

    /// Marks every present Extension object of the namespace for migration
    async fn migrate(&self, cancel: &CancellationToken) -> Result<()> {
        self.migrate_stage(None, cancel).await
    }

    async fn wait_migrate(&self, cancel: &CancellationToken) -> Result<()> {
        self.wait_migrate_stage(None, cancel).await
    }
}

impl<S: ObjectStore> std::fmt::Debug for ExtensionsDeployer<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionsDeployer")
            .field("namespace", &self.values.namespace)
            .field("types", &self.values.extensions.keys().collect::<Vec<_>>())
            .finish()
    }
}
