//! Generic deployer for a single extension object

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{DeployMigrateWaiter, DeployWaiter};
use crate::controller::annotations::{Operation, Trigger};
use crate::controller::clock::SharedClock;
use crate::controller::poll::cancellable;
use crate::controller::wait::{
    wait_until_deleted, wait_until_migrated, wait_until_ready, WaitConfig,
};
use crate::controller::{delete, restore, trigger};
use crate::crd::{ExtensionObject, Purpose, ShootStateSpec};
use crate::error::{Phase, Result};
use crate::store::ObjectStore;

type DesiredFn<K> = Box<dyn Fn(&mut K) + Send + Sync>;

/// Drives one extension object of kind `K` through its lifecycle
///
/// The deployer remembers the stamp of its last deploy, restore and migrate
/// so that the following wait only accepts an outcome for that stamp.
pub struct ResourceDeployer<K: ExtensionObject, S: ObjectStore> {
    store: Arc<S>,
    clock: SharedClock,
    wait_config: WaitConfig,
    namespace: String,
    name: String,
    purpose: Option<Purpose>,
    desired: DesiredFn<K>,
    last_trigger: Mutex<Option<Trigger>>,
    last_migrate: Mutex<Option<Trigger>>,
}

impl<K: ExtensionObject, S: ObjectStore> ResourceDeployer<K, S> {
    /// `desired` writes the desired spec into the object before every deploy
    pub fn new(
        store: Arc<S>,
        clock: SharedClock,
        wait_config: WaitConfig,
        namespace: impl Into<String>,
        name: impl Into<String>,
        desired: impl Fn(&mut K) + Send + Sync + 'static,
    ) -> Self {
        Self {
            store,
            clock,
            wait_config,
            namespace: namespace.into(),
            name: name.into(),
            purpose: None,
            desired: Box::new(desired),
            last_trigger: Mutex::new(None),
            last_migrate: Mutex::new(None),
        }
    }

    /// Purpose used to look the object up in a state snapshot
    pub fn with_purpose(mut self, purpose: Purpose) -> Self {
        self.purpose = Some(purpose);
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stamp of the last deploy or restore issued by this deployer
    pub async fn last_trigger(&self) -> Option<Trigger> {
        *self.last_trigger.lock().await
    }

    /// Fetch the current object from the store
    pub async fn get(&self) -> Result<K> {
        self.store.get::<K>(&self.namespace, &self.name).await
    }

    /// Attach phase and identity to failures and record metrics
    async fn observe<T>(&self, phase: Phase, fut: impl Future<Output = Result<T>>) -> Result<T> {
        #[cfg(feature = "metrics")]
        let started = std::time::Instant::now();

        let kind = K::kind_name();
        let result = fut
            .await
            .map_err(|e| e.in_operation(phase, &kind, &self.namespace, &self.name));

        #[cfg(feature = "metrics")]
        {
            use crate::controller::metrics;
            metrics::observe_operation_duration_seconds(
                &kind,
                phase,
                started.elapsed().as_secs_f64(),
            );
            if let Err(e) = &result {
                metrics::inc_operation_error(&kind, phase, e.reason());
            }
        }

        result
    }
}

#[async_trait]
impl<K: ExtensionObject, S: ObjectStore> DeployWaiter for ResourceDeployer<K, S> {
    async fn deploy(&self, cancel: &CancellationToken) -> Result<()> {
        let (_, stamp) = self
            .observe(
                Phase::Deploy,
                cancellable(
                    cancel,
                    trigger::deploy::<K, S, _>(
                        self.store.as_ref(),
                        self.clock.as_ref(),
                        &self.namespace,
                        &self.name,
                        Operation::Reconcile,
                        |obj: &mut K| (self.desired)(obj),
                    ),
                ),
            )
            .await?;
        *self.last_trigger.lock().await = Some(stamp);
        Ok(())
    }

    async fn destroy(&self, cancel: &CancellationToken) -> Result<()> {
        self.observe(
            Phase::Destroy,
            cancellable(
                cancel,
                delete::delete_object::<K, S>(
                    self.store.as_ref(),
                    self.clock.as_ref(),
                    &self.namespace,
                    &self.name,
                ),
            ),
        )
        .await
    }

    async fn wait(&self, cancel: &CancellationToken) -> Result<()> {
        let expected = *self.last_trigger.lock().await;
        self.observe(
            Phase::Wait,
            wait_until_ready::<K, S>(
                self.store.as_ref(),
                self.clock.as_ref(),
                cancel,
                &self.wait_config,
                &self.namespace,
                &self.name,
                expected,
            ),
        )
        .await?;
        info!("{} {}/{} is ready", K::kind_name(), self.namespace, self.name);
        Ok(())
    }

    async fn wait_cleanup(&self, cancel: &CancellationToken) -> Result<()> {
        self.observe(
            Phase::WaitCleanup,
            wait_until_deleted::<K, S>(
                self.store.as_ref(),
                cancel,
                self.wait_config.interval,
                self.wait_config.timeout,
                &self.namespace,
                &self.name,
            ),
        )
        .await
    }
}

#[async_trait]
impl<K: ExtensionObject, S: ObjectStore> DeployMigrateWaiter for ResourceDeployer<K, S> {
    async fn restore(&self, cancel: &CancellationToken, shoot_state: &ShootStateSpec) -> Result<()> {
        let (_, stamp) = self
            .observe(
                Phase::Restore,
                cancellable(
                    cancel,
                    restore::restore::<K, S, _>(
                        self.store.as_ref(),
                        self.clock.as_ref(),
                        shoot_state,
                        &self.namespace,
                        &self.name,
                        self.purpose.clone(),
                        |obj: &mut K| (self.desired)(obj),
                    ),
                ),
            )
            .await?;
        *self.last_trigger.lock().await = Some(stamp);
        Ok(())
    }

    async fn migrate(&self, cancel: &CancellationToken) -> Result<()> {
        let stamp = self
            .observe(
                Phase::Migrate,
                cancellable(
                    cancel,
                    trigger::migrate::<K, S>(
                        self.store.as_ref(),
                        self.clock.as_ref(),
                        &self.namespace,
                        &self.name,
                    ),
                ),
            )
            .await?;
        *self.last_migrate.lock().await = stamp;
        Ok(())
    }

    async fn wait_migrate(&self, cancel: &CancellationToken) -> Result<()> {
        let expected = *self.last_migrate.lock().await;
        self.observe(
            Phase::WaitMigrate,
            wait_until_migrated::<K, S>(
                self.store.as_ref(),
                cancel,
                self.wait_config.interval,
                self.wait_config.timeout,
                &self.namespace,
                &self.name,
                expected,
            ),
        )
        .await
    }
}
