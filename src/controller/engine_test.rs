//! Tests for the reconciliation engine
//!
//! These drive whole passes against the in-memory collaborators:
//! - the forward pipeline from a fresh object to `Running`
//! - redeploys on spec changes and rolling updates on config changes
//! - optimistic-concurrency conflicts
//! - parked failure phases, timeouts and deletion

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

    use super::super::actions::builds::DDL_PATH;
    use super::super::collaborators::{BuildKind, BuildPhase, RolloutState};
    use super::super::conditions::{find_condition, CONDITION_TYPE_READY};
    use super::super::context::OperatorConfig;
    use super::super::engine::Outcome;
    use super::super::finalizers::has_finalizer;
    use super::super::store::ResourceStore;
    use super::super::testing::{spec, Harness};
    use crate::crd::{CacheStoreConfig, EnvVar, EnvVarSource, KeyRef, Phase, VirtualDatabaseSpec};
    use crate::error::Error;

    fn spec_with_secret() -> VirtualDatabaseSpec {
        let mut s = spec();
        s.env.push(EnvVar {
            name: "DB_PASSWORD".to_string(),
            value: None,
            value_from: Some(EnvVarSource {
                secret_key_ref: Some(KeyRef {
                    name: "portfolio-db".to_string(),
                    key: "password".to_string(),
                }),
                config_map_key_ref: None,
            }),
        });
        s
    }

    async fn running(h: &Harness) {
        h.builds.complete_on_poll();
        h.run_until_quiet(20).await;
        assert_eq!(h.phase(), Phase::Running);
    }

    #[tokio::test]
    async fn test_first_pass_initializes() {
        let h = Harness::new();
        h.create(spec());

        // The finalizer goes on alone, before any status work.
        assert_eq!(h.pass().await.unwrap(), Outcome::Done);
        let vdb = h.current();
        assert!(has_finalizer(&vdb));
        assert!(vdb.status.is_none());

        assert_eq!(h.pass().await.unwrap(), Outcome::Done);

        let vdb = h.current();
        let status = vdb.status.clone().unwrap();
        assert_eq!(status.phase, Phase::CreateCacheStore);
        assert!(!status.digest.is_empty());
        assert!(status.failure.is_empty());
        assert_eq!(status.version, "1");
        assert!(status.phase_entered_at.is_some());
        assert!(has_finalizer(&vdb));
    }

    #[tokio::test]
    async fn test_pipeline_moves_one_phase_per_pass() {
        let h = Harness::new();
        h.builds.complete_on_poll();
        h.create(spec());
        assert_eq!(h.pass().await.unwrap(), Outcome::Done);
        assert_eq!(h.phase(), Phase::Initial);

        for expected in Phase::PIPELINE.iter().skip(1) {
            assert_eq!(h.pass().await.unwrap(), Outcome::Done);
            assert_eq!(h.phase(), *expected);
        }

        // Running and nothing to do: no write, poll again later.
        let writes = h.store.status_writes.load(Ordering::SeqCst);
        assert_eq!(
            h.pass().await.unwrap(),
            Outcome::RequeueAfter(Duration::from_secs(5))
        );
        assert_eq!(h.store.status_writes.load(Ordering::SeqCst), writes);

        assert_eq!(h.builds.triggered(BuildKind::Base), 1);
        assert_eq!(h.builds.triggered(BuildKind::Service), 1);
        assert_eq!(h.workloads.keystores.load(Ordering::SeqCst), 1);
        assert!(h.workloads.metrics.load(Ordering::SeqCst) >= 1);
        assert_eq!(h.status().ready_replicas, 1);
    }

    #[tokio::test]
    async fn test_service_build_receives_packaged_sources() {
        let h = Harness::new();
        h.builds.complete_on_poll();
        h.create(spec());
        h.run_until_quiet(20).await;

        let packaged = h.packager.packaged.lock().unwrap();
        assert_eq!(packaged.len(), 1);
        assert!(packaged[0].contains_key(DDL_PATH));

        let builds = h.builds.builds.lock().unwrap();
        let service = builds
            .iter()
            .find(|b| b.kind == BuildKind::Service)
            .unwrap();
        assert!(service.archive.is_some());
        let base = builds.iter().find(|b| b.kind == BuildKind::Base).unwrap();
        assert!(base.archive.is_none());
    }

    #[tokio::test]
    async fn test_spec_change_redeploys_with_next_version() {
        let h = Harness::new();
        h.create(spec());
        running(&h).await;

        h.store.edit(&Harness::key(), |vdb| {
            vdb.status_mut().version = "3".to_string();
        });
        let old_digest = h.status().digest;

        h.store.edit(&Harness::key(), |vdb| {
            vdb.spec.build.source.ddl = Some("CREATE DATABASE portfolio2;".to_string());
        });
        assert_eq!(h.pass().await.unwrap(), Outcome::Done);

        let status = h.status();
        assert_eq!(status.phase, Phase::Initial);
        assert_eq!(status.version, "4");
        assert_ne!(status.digest, old_digest);
        assert!(status.failure.is_empty());

        // The reset pass runs no action; the next one initializes again.
        h.pass().await.unwrap();
        assert_eq!(h.phase(), Phase::CreateCacheStore);
        assert_eq!(h.status().version, "4");
    }

    #[tokio::test]
    async fn test_redeploy_keeps_non_numeric_version() {
        let h = Harness::new();
        h.create(spec());
        running(&h).await;

        h.store.edit(&Harness::key(), |vdb| {
            vdb.status_mut().version = "release-a".to_string();
            vdb.spec.build.source.dependencies = vec!["org.h2:h2:2.2.224".to_string()];
        });
        h.pass().await.unwrap();

        assert_eq!(h.phase(), Phase::Initial);
        assert_eq!(h.status().version, "release-a");
    }

    #[tokio::test]
    async fn test_replica_change_is_not_a_redeploy() {
        let h = Harness::new();
        h.create(spec());
        running(&h).await;

        h.store.edit(&Harness::key(), |vdb| vdb.spec.replicas = 3);
        assert_eq!(h.pass().await.unwrap(), Outcome::Done);

        let status = h.status();
        assert_eq!(status.phase, Phase::Running);
        assert_eq!(status.replicas, 3);
    }

    #[tokio::test]
    async fn test_secret_change_rolls_pods_without_phase_change() {
        let h = Harness::new();
        h.resolver
            .set_secret("demo", "portfolio-db", "password", "hunter2");
        h.create(spec_with_secret());
        running(&h).await;

        let before = h.status();
        let deployed_before = h.workloads.deployed_digest().unwrap();
        assert_eq!(deployed_before, before.config_digest);

        h.resolver
            .set_secret("demo", "portfolio-db", "password", "correct-horse");
        assert_eq!(h.pass().await.unwrap(), Outcome::Done);

        let after = h.status();
        assert_eq!(after.phase, Phase::Running);
        assert_eq!(after.version, before.version);
        assert_eq!(after.digest, before.digest);
        assert_ne!(after.config_digest, before.config_digest);
        assert_eq!(h.workloads.deployed_digest().unwrap(), after.config_digest);
    }

    #[tokio::test]
    async fn test_conflict_commits_nothing() {
        let h = Harness::new();
        h.create(spec());
        h.pass().await.unwrap();
        h.pass().await.unwrap();
        let before = h.current();

        h.store.conflict_next_write();
        let err = h.pass().await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        assert!(err.is_retriable());
        assert_eq!(h.current(), before);

        // A fresh read gets through.
        h.pass().await.unwrap();
        assert_eq!(h.phase(), Phase::S2IReady);
    }

    #[tokio::test]
    async fn test_conflicting_status_write_leaves_object_untouched() {
        let h = Harness::new();
        h.create(spec());
        let fresh = h.current();

        h.store.conflict_next_write();
        assert!(matches!(h.pass().await.unwrap_err(), Error::Conflict(_)));
        assert_eq!(h.current(), fresh);
        assert!(!has_finalizer(&h.current()));

        h.store.conflict_status_writes();
        assert_eq!(h.pass().await.unwrap(), Outcome::Done);
        let finalized = h.current();
        assert!(has_finalizer(&finalized));

        let err = h.pass().await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        assert_eq!(h.current(), finalized);
        assert_eq!(h.store.updates.load(Ordering::SeqCst), 1);
        assert_eq!(h.store.status_writes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stale_write_conflicts() {
        let h = Harness::new();
        h.create(spec());
        h.pass().await.unwrap();
        h.pass().await.unwrap();
        let stale = h.current();

        h.store
            .edit(&Harness::key(), |vdb| vdb.spec.replicas = 2);

        let err = h.store.update_status(&stale).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn test_missing_secret_parks_until_resolved() {
        let h = Harness::new();
        h.create(spec_with_secret());
        h.pass().await.unwrap();

        assert_eq!(h.pass().await.unwrap(), Outcome::Done);
        let status = h.status();
        assert_eq!(status.phase, Phase::Initial);
        assert!(status.failure.contains("portfolio-db"));

        // Same failure again: nothing to write.
        assert!(matches!(
            h.pass().await.unwrap(),
            Outcome::RequeueAfter(_)
        ));

        h.resolver
            .set_secret("demo", "portfolio-db", "password", "hunter2");
        h.pass().await.unwrap();
        let status = h.status();
        assert_eq!(status.phase, Phase::CreateCacheStore);
        assert!(status.failure.is_empty());
        assert!(status.config_digest.starts_with("c-"));
    }

    #[tokio::test]
    async fn test_failure_without_phase_change_refreshes_conditions() {
        let h = Harness::new();
        h.resolver
            .set_secret("demo", "portfolio-db", "password", "hunter2");
        h.create(spec_with_secret());
        running(&h).await;

        h.resolver.remove_secret("demo", "portfolio-db", "password");
        assert_eq!(h.pass().await.unwrap(), Outcome::Done);
        let status = h.status();
        assert_eq!(status.phase, Phase::Running);
        assert!(status.failure.contains("portfolio-db"));
        let ready = find_condition(&status.conditions, CONDITION_TYPE_READY).unwrap();
        assert_eq!(ready.message, status.failure);

        h.resolver
            .set_secret("demo", "portfolio-db", "password", "hunter2");
        assert_eq!(h.pass().await.unwrap(), Outcome::Done);
        let status = h.status();
        assert!(status.failure.is_empty());
        let ready = find_condition(&status.conditions, CONDITION_TYPE_READY).unwrap();
        assert_eq!(ready.message, "Phase Running");
    }

    #[tokio::test]
    async fn test_invalid_spec_is_parked_in_error() {
        let h = Harness::new();
        let mut s = spec();
        s.build.source.ddl = None;
        h.create(s);
        h.pass().await.unwrap();

        h.pass().await.unwrap();
        let status = h.status();
        assert_eq!(status.phase, Phase::Error);
        assert!(status.failure.contains("spec.build"));

        assert!(matches!(
            h.pass().await.unwrap(),
            Outcome::RequeueAfter(_)
        ));
        assert_eq!(h.phase(), Phase::Error);
    }

    #[tokio::test]
    async fn test_failed_build_parks_until_spec_changes() {
        let h = Harness::new();
        h.create(spec());
        h.run_until_quiet(10).await;
        assert_eq!(h.phase(), Phase::BuilderImage);

        h.builds.set_latest_phase(BuildKind::Base, BuildPhase::Failed);
        h.pass().await.unwrap();
        let status = h.status();
        assert_eq!(status.phase, Phase::BuilderImageFailed);
        assert!(status.failure.contains("Failed"));

        assert!(matches!(
            h.pass().await.unwrap(),
            Outcome::RequeueAfter(_)
        ));
        assert_eq!(h.phase(), Phase::BuilderImageFailed);

        h.store.edit(&Harness::key(), |vdb| {
            vdb.spec.build.source.ddl = Some("CREATE DATABASE fixed;".to_string());
        });
        h.pass().await.unwrap();
        assert_eq!(h.phase(), Phase::Initial);
        assert!(h.status().failure.is_empty());
    }

    #[tokio::test]
    async fn test_in_flight_build_is_adopted() {
        let h = Harness::new();
        h.create(spec());
        h.run_until_quiet(10).await;
        assert_eq!(h.phase(), Phase::BuilderImage);

        // Simulate a crash between triggering the build and persisting.
        h.store.edit(&Harness::key(), |vdb| {
            vdb.status_mut().phase = Phase::S2IReady;
        });
        h.builds.set_latest_phase(BuildKind::Base, BuildPhase::Running);
        h.pass().await.unwrap();

        assert_eq!(h.phase(), Phase::BuilderImage);
        assert_eq!(h.builds.triggered(BuildKind::Base), 1);
    }

    #[tokio::test]
    async fn test_cache_store_gates_the_build() {
        let h = Harness::new();
        let mut s = spec();
        s.cache_store = Some(CacheStoreConfig {
            enabled: true,
            name: None,
        });
        h.create(s);
        h.workloads.cache_ready.store(false, Ordering::SeqCst);

        h.pass().await.unwrap();
        h.pass().await.unwrap();
        assert_eq!(h.phase(), Phase::CreateCacheStore);
        assert!(matches!(
            h.pass().await.unwrap(),
            Outcome::RequeueAfter(_)
        ));

        h.workloads.cache_ready.store(true, Ordering::SeqCst);
        h.pass().await.unwrap();
        assert_eq!(h.phase(), Phase::S2IReady);
    }

    #[tokio::test]
    async fn test_route_is_recorded_when_exposed() {
        let h = Harness::new();
        h.builds.complete_on_poll();
        let mut s = spec();
        s.expose_externally = true;
        h.create(s);
        h.run_until_quiet(20).await;

        assert_eq!(h.phase(), Phase::Running);
        assert_eq!(h.status().route, "https://portfolio-demo.apps.example.com");
    }

    #[tokio::test]
    async fn test_route_wait_times_out() {
        let h = Harness::new();
        h.builds.complete_on_poll();
        *h.workloads.route_host.lock().unwrap() = None;
        let mut s = spec();
        s.expose_externally = true;
        h.create(s);
        for _ in 0..7 {
            h.pass().await.unwrap();
        }
        assert_eq!(h.phase(), Phase::ServiceImageFinished);

        let err = h.pass().await.unwrap_err();
        match err {
            Error::Action {
                action,
                phase,
                source,
            } => {
                assert_eq!(action, "CreateService");
                assert_eq!(phase, Phase::ServiceImageFinished);
                assert!(matches!(*source, Error::Timeout(..)));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(h.phase(), Phase::ServiceImageFinished);

        *h.workloads.route_host.lock().unwrap() = Some("late.apps.example.com".to_string());
        h.pass().await.unwrap();
        assert_eq!(h.phase(), Phase::ServiceCreated);
        assert_eq!(h.status().route, "https://late.apps.example.com");
    }

    #[tokio::test]
    async fn test_stalled_rollout_times_out() {
        let h = Harness::with_config(OperatorConfig {
            rollout_timeout: Duration::from_secs(600),
            ..Default::default()
        });
        h.builds.complete_on_poll();
        h.workloads.set_rollout(Some(RolloutState {
            desired: 2,
            updated: 2,
            ready: 0,
            available: 0,
        }));
        let mut s = spec();
        s.replicas = 2;
        h.create(s);
        h.run_until_quiet(20).await;
        assert_eq!(h.phase(), Phase::Deploying);

        h.clock.advance(Duration::from_secs(300));
        assert!(matches!(
            h.pass().await.unwrap(),
            Outcome::RequeueAfter(_)
        ));
        assert_eq!(h.phase(), Phase::Deploying);

        h.clock.advance(Duration::from_secs(301));
        h.pass().await.unwrap();
        let status = h.status();
        assert_eq!(status.phase, Phase::Error);
        assert!(status.failure.contains("600s"));
    }

    #[tokio::test]
    async fn test_missing_object_is_cleaned_up() {
        let h = Harness::new();
        assert_eq!(h.pass().await.unwrap(), Outcome::Done);
        assert_eq!(
            h.workloads.cleanups.lock().unwrap().as_slice(),
            &[Harness::key()]
        );
    }

    #[tokio::test]
    async fn test_deletion_parks_then_releases() {
        let h = Harness::new();
        h.create(spec());
        running(&h).await;
        let deployments = h.workloads.deployments.lock().unwrap().len();

        h.store.edit(&Harness::key(), |vdb| {
            vdb.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        });
        assert_eq!(h.pass().await.unwrap(), Outcome::Done);
        assert_eq!(h.phase(), Phase::Deleting);
        assert!(h.workloads.cleanups.lock().unwrap().is_empty());

        assert_eq!(h.pass().await.unwrap(), Outcome::Done);
        assert_eq!(h.workloads.cleanups.lock().unwrap().len(), 1);
        assert!(h.store.fetch(&Harness::key()).is_none());

        // No action ran while deleting.
        assert_eq!(h.workloads.deployments.lock().unwrap().len(), deployments);
    }
}
