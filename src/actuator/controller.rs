//! Controller loop running an actuator against an object store
//!
//! For every object the controller decides which operation is pending:
//!
//! - deletion requested: the actuator deletes, then the finalizer is removed
//! - `wait-for-state`: nothing, the object waits for its restore
//! - `migrate` / `restore` / `reconcile` annotation: that operation
//! - generation not observed yet, or no last operation: reconcile (create)
//! - last operation in error: the same operation again
//!
//! Migrated objects stay dormant until a new operation is requested.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use kube::{Resource, ResourceExt};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::{Actuator, ActuatorError, ActuatorResult};
use crate::controller::annotations::{
    deletion_confirmed, Operation, OperationTag, OPERATION_ANNOTATION,
};
use crate::controller::clock::SharedClock;
use crate::controller::finalizers::{
    add_finalizer, has_finalizer, is_being_deleted, remove_finalizer, EXTENSION_FINALIZER,
};
use crate::crd::{
    ExtensionObject, LastError, LastOperation, LastOperationState, LastOperationType,
};
use crate::error::{Error, Result};
use crate::store::ObjectStore;

/// What processing an object amounted to
#[derive(Clone, Debug, PartialEq)]
pub enum Action {
    /// Nothing was pending
    Idle,
    Succeeded(LastOperationType),
    /// The actuator failed; the failure was recorded in the status
    Failed(LastOperationType, ActuatorError),
    /// Cleanup finished and the finalizer was released
    Finalized,
}

pub struct ActuatorController<K, S, A>
where
    K: ExtensionObject,
    S: ObjectStore,
    A: Actuator<K>,
{
    store: Arc<S>,
    clock: SharedClock,
    actuator: A,
    /// Restricts the controller to a labelled shard of the objects
    selector: Option<String>,
    _kind: PhantomData<fn() -> K>,
}

impl<K, S, A> ActuatorController<K, S, A>
where
    K: ExtensionObject,
    S: ObjectStore,
    A: Actuator<K>,
{
    pub fn new(store: Arc<S>, clock: SharedClock, actuator: A) -> Self {
        Self {
            store,
            clock,
            actuator,
            selector: None,
            _kind: PhantomData,
        }
    }

    /// Only handle objects matching the label `selector`
    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = Some(selector.into());
        self
    }

    pub fn actuator(&self) -> &A {
        &self.actuator
    }

    /// Poll `namespace` every `interval` until `cancel` fires
    pub async fn run(
        &self,
        cancel: &CancellationToken,
        namespace: &str,
        interval: Duration,
    ) -> Result<()> {
        info!("Starting {} actuator controller in {}", K::kind_name(), namespace);

        loop {
            if let Err(e) = self.process_all(namespace).await {
                // retried on the next tick
                error!("Processing {} objects failed: {}", K::kind_name(), e);
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Stopping {} actuator controller", K::kind_name());
                    return Ok(());
                }
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    /// Process every object of the namespace (or of the shard) once
    pub async fn process_all(&self, namespace: &str) -> Result<Vec<(String, Action)>> {
        let names: Vec<String> = self
            .store
            .list::<K>(namespace, self.selector.as_deref())
            .await?
            .iter()
            .map(|obj| obj.name_any())
            .collect();

        let mut actions = Vec::with_capacity(names.len());
        let mut errors = Vec::new();
        for name in names {
            match self.process(namespace, &name).await {
                Ok(action) => actions.push((name, action)),
                Err(e) => errors.push(e),
            }
        }

        match Error::aggregate(errors) {
            Some(err) => Err(err),
            None => Ok(actions),
        }
    }

    /// Run whatever operation is pending for one object
    #[instrument(skip(self), fields(kind = %K::kind_name()))]
    pub async fn process(&self, namespace: &str, name: &str) -> Result<Action> {
        let obj = match self.store.get::<K>(namespace, name).await {
            Ok(obj) => obj,
            Err(e) if e.is_not_found() => return Ok(Action::Idle),
            Err(e) => return Err(e),
        };

        if is_being_deleted(&obj) {
            return self.finalize(obj).await;
        }

        let tag = OperationTag::from_meta(obj.meta())?;
        let Some(op_type) = pending_operation(&obj, &tag) else {
            return Ok(Action::Idle);
        };

        debug!(namespace, name, operation = %op_type, "Operation pending");

        if op_type != LastOperationType::Migrate {
            add_finalizer(self.store.as_ref(), &obj, EXTENSION_FINALIZER).await?;
        }
        self.write_status(
            namespace,
            name,
            json!({
                "lastOperation": LastOperation::new(
                    op_type.clone(),
                    LastOperationState::Processing,
                    format!("{op_type} in progress"),
                    self.clock.now(),
                ),
            }),
        )
        .await?;
        if tag.operation.is_some() {
            self.store
                .merge_patch::<K>(
                    namespace,
                    name,
                    &json!({"metadata": {"annotations": {OPERATION_ANNOTATION: null}}}),
                )
                .await?;
        }

        let outcome = match op_type {
            LastOperationType::Migrate => self.actuator.migrate(&obj).await,
            LastOperationType::Restore => self.actuator.restore(&obj).await,
            _ => self.actuator.reconcile(&obj).await,
        };
        let generation = obj.meta().generation.unwrap_or(0);
        let action = self
            .record_outcome(namespace, name, op_type.clone(), generation, outcome)
            .await?;

        if action == Action::Succeeded(LastOperationType::Migrate) {
            // the actuator let go of the object; nothing is left to clean up
            let current = self.store.get::<K>(namespace, name).await?;
            remove_finalizer(self.store.as_ref(), &current, EXTENSION_FINALIZER).await?;
        }
        Ok(action)
    }

    async fn finalize(&self, obj: K) -> Result<Action> {
        if !has_finalizer(&obj, EXTENSION_FINALIZER) {
            return Ok(Action::Idle);
        }
        let namespace = obj.namespace().unwrap_or_default();
        let name = obj.name_any();
        let generation = obj.meta().generation.unwrap_or(0);

        let outcome = if deletion_confirmed(obj.meta()) {
            self.actuator.delete(&obj).await
        } else {
            warn!(namespace = %namespace, name = %name, "Deletion requested without confirmation");
            Err(ActuatorError::new("deletion has not been confirmed"))
        };

        match self
            .record_outcome(&namespace, &name, LastOperationType::Delete, generation, outcome)
            .await
        {
            Ok(Action::Succeeded(_)) => {}
            // the status is gone together with the object
            Err(e) if e.is_not_found() => return Ok(Action::Finalized),
            other => return other,
        }

        let current = match self.store.get::<K>(&namespace, &name).await {
            Ok(current) => current,
            Err(e) if e.is_not_found() => return Ok(Action::Finalized),
            Err(e) => return Err(e),
        };
        remove_finalizer(self.store.as_ref(), &current, EXTENSION_FINALIZER).await?;
        info!("Finalized {} {}/{}", K::kind_name(), namespace, name);
        Ok(Action::Finalized)
    }

    async fn record_outcome(
        &self,
        namespace: &str,
        name: &str,
        op_type: LastOperationType,
        generation: i64,
        outcome: ActuatorResult,
    ) -> Result<Action> {
        let now = self.clock.now();
        match outcome {
            Ok(()) => {
                self.write_status(
                    namespace,
                    name,
                    json!({
                        "lastOperation": LastOperation::new(
                            op_type.clone(),
                            LastOperationState::Succeeded,
                            format!("{op_type} succeeded"),
                            now,
                        ),
                        "lastError": null,
                        "observedGeneration": generation,
                    }),
                )
                .await?;
                info!("{} {}/{}: {} succeeded", K::kind_name(), namespace, name, op_type);
                Ok(Action::Succeeded(op_type))
            }
            Err(failure) => {
                let last_error = LastError {
                    codes: failure.codes.clone(),
                    last_update_time: Some(now),
                    ..LastError::new(failure.description.clone())
                };
                self.write_status(
                    namespace,
                    name,
                    json!({
                        "lastOperation": LastOperation::new(
                            op_type.clone(),
                            LastOperationState::Error,
                            failure.description.clone(),
                            now,
                        ),
                        "lastError": last_error,
                        "observedGeneration": generation,
                    }),
                )
                .await?;
                warn!(
                    "{} {}/{}: {} failed: {}",
                    K::kind_name(),
                    namespace,
                    name,
                    op_type,
                    failure
                );
                Ok(Action::Failed(op_type, failure))
            }
        }
    }

    async fn write_status(&self, namespace: &str, name: &str, status: Value) -> Result<()> {
        self.store
            .merge_patch_status::<K>(namespace, name, &json!({ "status": status }))
            .await?;
        Ok(())
    }
}

/// Operation the actuator owes the object, if any
fn pending_operation<K: ExtensionObject>(obj: &K, tag: &OperationTag) -> Option<LastOperationType> {
    let status = obj.extension_status();
    let last = status.and_then(|s| s.last_operation.as_ref());

    match tag.operation {
        Some(Operation::WaitForState) => None,
        Some(Operation::Migrate) => Some(LastOperationType::Migrate),
        Some(Operation::Restore) => Some(LastOperationType::Restore),
        Some(Operation::Reconcile) if last.is_none() => Some(LastOperationType::Create),
        Some(Operation::Reconcile) => Some(LastOperationType::Reconcile),
        None => {
            let last = match last {
                None => return Some(LastOperationType::Create),
                Some(last) => last,
            };
            if last.type_ == LastOperationType::Migrate && last.succeeded() {
                return None;
            }
            if last.state == LastOperationState::Error {
                return Some(last.type_.clone());
            }
            let observed = status.map(|s| s.observed_generation).unwrap_or(0);
            (observed != obj.meta().generation.unwrap_or(0)).then_some(LastOperationType::Reconcile)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    use crate::controller::annotations::Trigger;
    use crate::controller::clock::{Clock, FakeClock};
    use crate::controller::wait::{check_ready, Readiness};
    use crate::controller::{delete, restore, trigger};
    use crate::crd::{DefaultSpec, ErrorCode, Extension, ExtensionResourceState, ShootStateSpec};
    use crate::store::MemoryStore;

    const NS: &str = "shoot--foo--bar";

    #[derive(Default)]
    struct Recording {
        calls: Mutex<Vec<String>>,
        failure: Mutex<Option<ActuatorError>>,
    }

    impl Recording {
        fn record(&self, call: &str, obj: &Extension) -> ActuatorResult {
            self.calls
                .lock()
                .unwrap()
                .push(format!("{call} {}", obj.name_any()));
            match self.failure.lock().unwrap().clone() {
                Some(failure) => Err(failure),
                None => Ok(()),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Actuator<Extension> for Recording {
        async fn reconcile(&self, obj: &Extension) -> ActuatorResult {
            self.record("reconcile", obj)
        }

        async fn delete(&self, obj: &Extension) -> ActuatorResult {
            self.record("delete", obj)
        }

        async fn restore(&self, obj: &Extension) -> ActuatorResult {
            let state = obj
                .status
                .as_ref()
                .and_then(|s| s.state.as_ref())
                .map(|s| s.0.to_string())
                .unwrap_or_default();
            self.record(&format!("restore {state}"), obj)
        }

        async fn migrate(&self, obj: &Extension) -> ActuatorResult {
            self.record("migrate", obj)
        }
    }

    fn setup() -> (
        Arc<MemoryStore>,
        Arc<FakeClock>,
        ActuatorController<Extension, MemoryStore, Recording>,
    ) {
        let clock = Arc::new(FakeClock::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap(),
        ));
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let controller = ActuatorController::new(store.clone(), clock.clone(), Recording::default());
        (store, clock, controller)
    }

    fn dns(ext: &mut Extension) {
        ext.spec.default_spec = DefaultSpec::new("dns", None);
    }

    async fn deploy(store: &MemoryStore, clock: &FakeClock) -> Trigger {
        let (_, stamp) =
            trigger::deploy::<Extension, _, _>(store, clock, NS, "dns", Operation::Reconcile, dns)
                .await
                .unwrap();
        stamp
    }

    #[tokio::test]
    async fn test_reconcile_records_success_and_adds_finalizer() {
        let (store, clock, controller) = setup();
        let stamp = deploy(&store, &clock).await;
        clock.advance(chrono::Duration::seconds(3));

        let action = controller.process(NS, "dns").await.unwrap();
        assert_eq!(action, Action::Succeeded(LastOperationType::Create));

        let obj = store.get::<Extension>(NS, "dns").await.unwrap();
        assert!(has_finalizer(&obj, EXTENSION_FINALIZER));
        assert!(!obj.annotations().contains_key(OPERATION_ANNOTATION));
        assert_eq!(check_ready(&obj, Some(&stamp)).unwrap(), Readiness::Ready);

        // nothing pending afterwards
        assert_eq!(controller.process(NS, "dns").await.unwrap(), Action::Idle);
        assert_eq!(controller.actuator().calls(), vec!["reconcile dns"]);
    }

    #[tokio::test]
    async fn test_spec_change_triggers_reconcile() {
        let (store, clock, controller) = setup();
        deploy(&store, &clock).await;
        controller.process(NS, "dns").await.unwrap();

        store
            .merge_patch::<Extension>(NS, "dns", &json!({"spec": {"providerConfig": {"zone": "b"}}}))
            .await
            .unwrap();
        assert_eq!(
            controller.process(NS, "dns").await.unwrap(),
            Action::Succeeded(LastOperationType::Reconcile)
        );
    }

    #[tokio::test]
    async fn test_failure_is_recorded_as_last_error() {
        let (store, clock, controller) = setup();
        let stamp = deploy(&store, &clock).await;
        *controller.actuator().failure.lock().unwrap() =
            Some(ActuatorError::new("zone not found").with_codes([ErrorCode::ConfigurationProblem]));

        let action = controller.process(NS, "dns").await.unwrap();
        assert!(matches!(action, Action::Failed(LastOperationType::Create, _)));

        let obj = store.get::<Extension>(NS, "dns").await.unwrap();
        let status = obj.status.as_ref().unwrap();
        assert_eq!(
            status.last_operation.as_ref().unwrap().state,
            LastOperationState::Error
        );
        assert_eq!(
            check_ready(&obj, Some(&stamp)).unwrap(),
            Readiness::Failed {
                description: "zone not found".to_string(),
                codes: vec![ErrorCode::ConfigurationProblem],
            }
        );

        // retried on the next pass and cleared on success
        *controller.actuator().failure.lock().unwrap() = None;
        assert_eq!(
            controller.process(NS, "dns").await.unwrap(),
            Action::Succeeded(LastOperationType::Create)
        );
        let obj = store.get::<Extension>(NS, "dns").await.unwrap();
        assert!(obj.status.unwrap().last_error.is_none());
    }

    #[tokio::test]
    async fn test_wait_for_state_is_ignored() {
        let (store, clock, controller) = setup();
        restore::create_placeholder::<Extension, _, _>(store.as_ref(), clock.as_ref(), NS, "dns", dns)
            .await
            .unwrap();

        assert_eq!(controller.process(NS, "dns").await.unwrap(), Action::Idle);
        assert!(controller.actuator().calls().is_empty());
    }

    #[tokio::test]
    async fn test_restore_sees_injected_state() {
        let (store, clock, controller) = setup();
        let snapshot = ShootStateSpec {
            extensions: vec![ExtensionResourceState {
                kind: "Extension".to_string(),
                name: Some("dns".to_string()),
                purpose: None,
                state: Some(k8s_openapi::apimachinery::pkg::runtime::RawExtension(
                    json!({"records": 3}),
                )),
            }],
        };
        let (_, stamp) = restore::restore::<Extension, _, _>(
            store.as_ref(),
            clock.as_ref(),
            &snapshot,
            NS,
            "dns",
            None,
            dns,
        )
        .await
        .unwrap();

        assert_eq!(
            controller.process(NS, "dns").await.unwrap(),
            Action::Succeeded(LastOperationType::Restore)
        );
        assert_eq!(
            controller.actuator().calls(),
            vec![r#"restore {"records":3} dns"#]
        );
        let obj = store.get::<Extension>(NS, "dns").await.unwrap();
        assert_eq!(check_ready(&obj, Some(&stamp)).unwrap(), Readiness::Ready);
    }

    #[tokio::test]
    async fn test_confirmed_deletion_finalizes_object() {
        let (store, clock, controller) = setup();
        deploy(&store, &clock).await;
        controller.process(NS, "dns").await.unwrap();

        delete::delete_object::<Extension, _>(store.as_ref(), clock.as_ref(), NS, "dns")
            .await
            .unwrap();
        assert_eq!(store.count::<Extension>(NS).await, 1);

        assert_eq!(controller.process(NS, "dns").await.unwrap(), Action::Finalized);
        assert_eq!(store.count::<Extension>(NS).await, 0);
        assert_eq!(controller.actuator().calls(), vec!["reconcile dns", "delete dns"]);
    }

    #[tokio::test]
    async fn test_unconfirmed_deletion_is_refused() {
        let (store, clock, controller) = setup();
        deploy(&store, &clock).await;
        controller.process(NS, "dns").await.unwrap();

        store.delete::<Extension>(NS, "dns").await.unwrap();
        let action = controller.process(NS, "dns").await.unwrap();
        assert_eq!(
            action,
            Action::Failed(
                LastOperationType::Delete,
                ActuatorError::new("deletion has not been confirmed")
            )
        );
        assert_eq!(store.count::<Extension>(NS).await, 1);
    }

    #[tokio::test]
    async fn test_migrate_releases_finalizer_and_goes_dormant() {
        let (store, clock, controller) = setup();
        deploy(&store, &clock).await;
        controller.process(NS, "dns").await.unwrap();

        clock.advance(chrono::Duration::seconds(10));
        trigger::migrate::<Extension, _>(store.as_ref(), clock.as_ref(), NS, "dns")
            .await
            .unwrap();
        assert_eq!(
            controller.process(NS, "dns").await.unwrap(),
            Action::Succeeded(LastOperationType::Migrate)
        );

        let obj = store.get::<Extension>(NS, "dns").await.unwrap();
        assert!(!has_finalizer(&obj, EXTENSION_FINALIZER));
        assert_eq!(controller.process(NS, "dns").await.unwrap(), Action::Idle);

        // without a finalizer the deletion completes immediately
        store.delete::<Extension>(NS, "dns").await.unwrap();
        assert_eq!(store.count::<Extension>(NS).await, 0);
    }

    #[tokio::test]
    async fn test_selector_restricts_controller_to_its_shard() {
        let (store, clock, controller) = setup();
        let controller = controller.with_selector("shard=a");
        for (name, shard) in [("dns", "a"), ("networking", "b")] {
            trigger::deploy::<Extension, _, _>(
                store.as_ref(),
                clock.as_ref(),
                NS,
                name,
                Operation::Reconcile,
                |ext: &mut Extension| {
                    dns(ext);
                    ext.labels_mut().insert("shard".to_string(), shard.to_string());
                },
            )
            .await
            .unwrap();
        }

        let actions = controller.process_all(NS).await.unwrap();
        assert_eq!(
            actions,
            vec![("dns".to_string(), Action::Succeeded(LastOperationType::Create))]
        );
        assert_eq!(controller.actuator().calls(), vec!["reconcile dns"]);

        let other: Extension = store.get(NS, "networking").await.unwrap();
        assert!(other.status.is_none());
    }

    #[tokio::test]
    async fn test_invalid_selector_is_reported() {
        let (store, clock, controller) = setup();
        deploy(&store, &clock).await;
        let controller = controller.with_selector("shard in (a)");

        let err = controller.process_all(NS).await.unwrap_err();
        assert!(matches!(err, Error::ValidationError(_)));
        assert!(controller.actuator().calls().is_empty());
    }

    #[tokio::test]
    async fn test_process_all_and_run() {
        let (store, clock, controller) = setup();
        deploy(&store, &clock).await;

        let actions = controller.process_all(NS).await.unwrap();
        assert_eq!(
            actions,
            vec![("dns".to_string(), Action::Succeeded(LastOperationType::Create))]
        );

        let cancel = CancellationToken::new();
        cancel.cancel();
        controller
            .run(&cancel, NS, Duration::from_millis(1))
            .await
            .unwrap();
        assert_eq!(controller.actuator().calls(), vec!["reconcile dns"]);
    }
}
