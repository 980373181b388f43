//! Tests for the Extension deployer: lifecycle stages, fan-out policies,
//! migration of every present object and garbage collection of stale types

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::{DateTime, TimeZone, Utc};
    use kube::{Resource, ResourceExt};
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    use crate::component::{
        DeployMigrateWaiter, DeployWaiter, ExtensionConfig, ExtensionsDeployer, ExtensionsValues,
        Lifecycle, LifecycleStage,
    };
    use crate::controller::annotations::{format_timestamp, OPERATION_ANNOTATION};
    use crate::controller::clock::{Clock, FakeClock};
    use crate::controller::delete::delete_objects;
    use crate::controller::trigger::deploy;
    use crate::controller::wait::WaitConfig;
    use crate::controller::annotations::Operation;
    use crate::crd::{DefaultSpec, Extension, ExtensionObject};
    use crate::error::{Error, Phase};
    use crate::store::{MemoryStore, ObjectStore};

    const NS: &str = "shoot--foo--bar";

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, 1, 10, 0, 0).unwrap()
    }

    fn config() -> WaitConfig {
        WaitConfig {
            interval: Duration::from_millis(2),
            severe_threshold: Duration::from_secs(30),
            timeout: Duration::from_secs(5),
        }
    }

    fn extension(reconcile: LifecycleStage, delete: LifecycleStage) -> ExtensionConfig {
        ExtensionConfig {
            lifecycle: Lifecycle {
                reconcile,
                delete,
                ..Lifecycle::default()
            },
            ..ExtensionConfig::default()
        }
    }

    fn deployer(
        store: &Arc<MemoryStore>,
        clock: &Arc<FakeClock>,
        extensions: &[(&str, ExtensionConfig)],
    ) -> ExtensionsDeployer<MemoryStore> {
        let extensions: BTreeMap<String, ExtensionConfig> = extensions
            .iter()
            .map(|(type_, config)| (type_.to_string(), config.clone()))
            .collect();
        ExtensionsDeployer::new(
            store.clone(),
            clock.clone(),
            config(),
            ExtensionsValues {
                namespace: NS.to_string(),
                extensions,
            },
        )
    }

    async fn seed(store: &MemoryStore, clock: &FakeClock, type_: &str) {
        let type_owned = type_.to_string();
        deploy::<Extension, _, _>(store, clock, NS, type_, Operation::Reconcile, move |ext| {
            ext.spec.default_spec = DefaultSpec::new(type_owned.clone(), None);
        })
        .await
        .unwrap();
    }

    async fn names(store: &MemoryStore) -> Vec<String> {
        store
            .list::<Extension>(NS, None)
            .await
            .unwrap()
            .iter()
            .map(|e| e.name_any())
            .collect()
    }

    async fn report(store: &MemoryStore, name: &str, op_type: &str, at: DateTime<Utc>) {
        let obj: Extension = store
            .merge_patch(
                NS,
                name,
                &json!({"metadata": {"annotations": {OPERATION_ANNOTATION: null}}}),
            )
            .await
            .unwrap();
        store
            .merge_patch_status::<Extension>(
                NS,
                name,
                &json!({
                    "status": {
                        "observedGeneration": obj.meta().generation,
                        "lastOperation": {
                            "type": op_type,
                            "state": "Succeeded",
                            "progress": 100,
                            "lastUpdateTime": format_timestamp(&at),
                        }
                    }
                }),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_deploy_stage_only_touches_its_extensions() {
        use LifecycleStage::*;
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(FakeClock::new(start()));
        let exts = deployer(
            &store,
            &clock,
            &[
                ("dns", extension(BeforeKubeAPIServer, BeforeKubeAPIServer)),
                ("networking", extension(AfterKubeAPIServer, BeforeKubeAPIServer)),
                ("logging", extension(AfterKubeAPIServer, AfterKubeAPIServer)),
            ],
        );
        let cancel = CancellationToken::new();

        exts.deploy_stage(BeforeKubeAPIServer, &cancel).await.unwrap();
        assert_eq!(names(&store).await, vec!["dns"]);

        exts.deploy(&cancel).await.unwrap();
        assert_eq!(names(&store).await, vec!["dns", "logging", "networking"]);

        let logging = store.get::<Extension>(NS, "logging").await.unwrap();
        assert_eq!(logging.extension_type(), "logging");
        assert!(exts.deployer("logging").unwrap().last_trigger().await.is_some());
    }

    #[tokio::test]
    async fn test_wait_fails_fast_on_severe_error() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(FakeClock::new(start()));
        let exts = deployer(
            &store,
            &clock,
            &[
                ("broken", ExtensionConfig::default()),
                ("slow", ExtensionConfig::default()),
            ],
        );
        let cancel = CancellationToken::new();
        exts.deploy(&cancel).await.unwrap();

        clock.advance(chrono::Duration::seconds(45));
        store
            .merge_patch_status::<Extension>(
                NS,
                "broken",
                &json!({
                    "status": {
                        "lastError": {
                            "description": "quota exceeded",
                            "codes": ["ERR_INFRA_QUOTA_EXCEEDED"],
                            "lastUpdateTime": format_timestamp(&clock.now()),
                        }
                    }
                }),
            )
            .await
            .unwrap();

        let started = std::time::Instant::now();
        let err = exts.wait(&cancel).await.unwrap_err();

        // "slow" never converges; fail-fast must not wait for its timeout
        assert!(started.elapsed() < Duration::from_secs(4));
        assert!(err.is_severe());
        assert_eq!(
            err.to_string(),
            "wait Extension shoot--foo--bar/broken: error during reconciliation: quota exceeded (codes: ERR_INFRA_QUOTA_EXCEEDED)"
        );
    }

    #[tokio::test]
    async fn test_wait_succeeds_once_every_extension_reported() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(FakeClock::new(start()));
        let exts = deployer(
            &store,
            &clock,
            &[("a", ExtensionConfig::default()), ("b", ExtensionConfig::default())],
        );
        let cancel = CancellationToken::new();
        exts.deploy(&cancel).await.unwrap();

        clock.advance(chrono::Duration::seconds(1));
        report(&store, "a", "Reconcile", clock.now()).await;
        report(&store, "b", "Create", clock.now()).await;

        exts.wait(&cancel).await.unwrap();
    }

    #[tokio::test]
    async fn test_timeout_override_per_extension() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(FakeClock::new(start()));
        let exts = deployer(
            &store,
            &clock,
            &[(
                "quick",
                ExtensionConfig {
                    timeout: Some(Duration::from_millis(20)),
                    ..ExtensionConfig::default()
                },
            )],
        );
        let cancel = CancellationToken::new();
        exts.deploy(&cancel).await.unwrap();

        let err = exts.wait(&cancel).await.unwrap_err();
        assert!(err.is_timeout());
        assert!(err.to_string().contains("observed generation outdated (0/1)"));
    }

    #[tokio::test]
    async fn test_delete_stale_resources_removes_only_unwanted_types() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(FakeClock::new(start()));
        for type_ in ["dns", "networking", "legacy-logging", "old-backup"] {
            seed(&store, &clock, type_).await;
        }
        let exts = deployer(
            &store,
            &clock,
            &[
                ("dns", ExtensionConfig::default()),
                ("networking", ExtensionConfig::default()),
            ],
        );
        let cancel = CancellationToken::new();

        exts.delete_stale_resources(&cancel).await.unwrap();
        exts.wait_cleanup_stale_resources(&cancel).await.unwrap();

        assert_eq!(names(&store).await, vec!["dns", "networking"]);
    }

    #[tokio::test]
    async fn test_delete_stale_resources_collects_all_failures() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(FakeClock::new(start()));
        seed(&store, &clock, "stale").await;
        let exts = deployer(&store, &clock, &[]);

        store
            .fail_next(crate::store::Verb::Patch, "connection reset")
            .await;
        let err = exts
            .delete_stale_resources(&CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "delete-stale Extension shoot--foo--bar/stale: Store error: connection reset"
        );
        assert_eq!(names(&store).await, vec!["stale"]);
    }

    #[tokio::test]
    async fn test_delete_objects_skips_objects_that_became_wanted() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(FakeClock::new(start()));
        for type_ in ["dns", "legacy", "pending"] {
            seed(&store, &clock, type_).await;
        }

        // "pending" is wanted by the time its deletion comes up
        let wanted = std::sync::Mutex::new(vec!["dns".to_string()]);
        let deleted = delete_objects::<Extension, _, _>(
            store.as_ref(),
            clock.as_ref(),
            NS,
            Phase::DeleteStale,
            |ext: &Extension| {
                let mut wanted = wanted.lock().unwrap();
                let stale = !wanted.iter().any(|t| t == ext.extension_type());
                if ext.extension_type() == "pending" {
                    wanted.push("pending".to_string());
                }
                stale
            },
        )
        .await
        .unwrap();

        assert_eq!(deleted, vec!["legacy"]);
        assert_eq!(names(&store).await, vec!["dns", "pending"]);
        let pending: Extension = store.get(NS, "pending").await.unwrap();
        assert!(pending.meta().deletion_timestamp.is_none());
        assert!(!pending
            .annotations()
            .contains_key(crate::controller::annotations::CONFIRM_DELETION_ANNOTATION));
    }

    #[tokio::test]
    async fn test_destroy_stage_honours_delete_lifecycle() {
        use LifecycleStage::*;
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(FakeClock::new(start()));
        let exts = deployer(
            &store,
            &clock,
            &[
                ("early", extension(AfterKubeAPIServer, BeforeKubeAPIServer)),
                ("late", extension(AfterKubeAPIServer, AfterKubeAPIServer)),
            ],
        );
        let cancel = CancellationToken::new();
        exts.deploy(&cancel).await.unwrap();

        exts.destroy_stage(BeforeKubeAPIServer, &cancel).await.unwrap();
        exts.wait_cleanup_stage(BeforeKubeAPIServer, &cancel)
            .await
            .unwrap();
        assert_eq!(names(&store).await, vec!["late"]);

        exts.destroy_stage(AfterKubeAPIServer, &cancel).await.unwrap();
        exts.wait_cleanup(&cancel).await.unwrap();
        assert!(names(&store).await.is_empty());
    }

    #[tokio::test]
    async fn test_migrate_covers_every_present_object() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(FakeClock::new(start()));
        seed(&store, &clock, "unlisted").await;
        let exts = deployer(&store, &clock, &[("dns", ExtensionConfig::default())]);
        let cancel = CancellationToken::new();
        exts.deploy(&cancel).await.unwrap();

        clock.advance(chrono::Duration::seconds(5));
        exts.migrate(&cancel).await.unwrap();

        for name in ["dns", "unlisted"] {
            let obj = store.get::<Extension>(NS, name).await.unwrap();
            assert_eq!(
                obj.annotations().get(OPERATION_ANNOTATION).map(String::as_str),
                Some("migrate"),
                "{name} was not marked for migration"
            );
        }

        // only one object acknowledged the migration
        clock.advance(chrono::Duration::seconds(1));
        report(&store, "dns", "Migrate", clock.now()).await;
        let quick = CancellationToken::new();
        let waiting = tokio::time::timeout(Duration::from_millis(100), exts.wait_migrate(&quick)).await;
        assert!(waiting.is_err(), "wait-migrate finished before every object migrated");

        report(&store, "unlisted", "Migrate", clock.now()).await;
        exts.wait_migrate(&cancel).await.unwrap();
    }

    #[tokio::test]
    async fn test_cancellation_aborts_wait() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(FakeClock::new(start()));
        let exts = deployer(&store, &clock, &[("dns", ExtensionConfig::default())]);
        let cancel = CancellationToken::new();
        exts.deploy(&cancel).await.unwrap();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let err = exts.wait(&cancel).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled), "unexpected error {err:?}");
    }
}
