//! In-memory collaborators for exercising the engine without a cluster

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use kube::api::ObjectMeta;
use kube::ResourceExt;

use super::collaborators::{
    ArtifactPackager, BuildKind, BuildPhase, BuildTrigger, RolloutState, Workloads,
};
use super::context::{Clock, Context, OperatorConfig};
use super::engine::{Engine, Outcome};
use super::store::{ConfigResolver, ObjectKey, ResourceStore};
use crate::crd::{
    BuildSpec, Phase, SourceSpec, VirtualDatabase, VirtualDatabaseSpec, VirtualDatabaseStatus,
};
use crate::error::{Error, Result};

pub const NAMESPACE: &str = "demo";
pub const NAME: &str = "portfolio";

pub fn spec() -> VirtualDatabaseSpec {
    VirtualDatabaseSpec {
        replicas: 1,
        expose_externally: false,
        env: vec![],
        runtime: Default::default(),
        resources: Default::default(),
        build: BuildSpec {
            git: None,
            source: SourceSpec {
                ddl: Some("CREATE DATABASE portfolio OPTIONS (ANNOTATION 'demo');".to_string()),
                openapi: None,
                maven: None,
                dependencies: vec![],
            },
            source_file_changes: vec![],
        },
        version: None,
        cache_store: None,
    }
}

/// A VDB with the default inline spec sitting in `phase`
pub fn vdb_in_phase(phase: Phase) -> VirtualDatabase {
    let mut vdb = VirtualDatabase::new(NAME, spec());
    vdb.metadata = ObjectMeta {
        name: Some(NAME.to_string()),
        namespace: Some(NAMESPACE.to_string()),
        uid: Some("0b6f6c3e-1d1e-4c8e-9a57-3f1f9b0a2c11".to_string()),
        resource_version: Some("1".to_string()),
        ..Default::default()
    };
    vdb.status = Some(VirtualDatabaseStatus {
        phase,
        ..Default::default()
    });
    vdb
}

/// Version-checked object store
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<ObjectKey, VirtualDatabase>>,
    next_version: AtomicUsize,
    conflict_next_write: AtomicBool,
    conflict_status_writes: AtomicBool,
    pub status_writes: AtomicUsize,
    pub updates: AtomicUsize,
}

impl MemoryStore {
    pub fn insert(&self, mut vdb: VirtualDatabase) {
        vdb.metadata.resource_version = Some(self.bump());
        self.objects
            .lock()
            .unwrap()
            .insert(ObjectKey::from_resource(&vdb), vdb);
    }

    pub fn remove(&self, key: &ObjectKey) {
        self.objects.lock().unwrap().remove(key);
    }

    pub fn fetch(&self, key: &ObjectKey) -> Option<VirtualDatabase> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    /// Edit the stored object the way a user would, bumping its version
    pub fn edit(&self, key: &ObjectKey, f: impl FnOnce(&mut VirtualDatabase)) {
        let version = self.bump();
        let mut objects = self.objects.lock().unwrap();
        let vdb = objects.get_mut(key).expect("object exists");
        f(vdb);
        vdb.metadata.resource_version = Some(version);
    }

    /// Make the next write fail as if someone else wrote first
    pub fn conflict_next_write(&self) {
        self.conflict_next_write.store(true, Ordering::SeqCst);
    }

    /// Make every status write fail as if someone else wrote first
    pub fn conflict_status_writes(&self) {
        self.conflict_status_writes.store(true, Ordering::SeqCst);
    }

    fn bump(&self) -> String {
        (self.next_version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    fn check_version(&self, stored: &VirtualDatabase, incoming: &VirtualDatabase) -> Result<()> {
        let key = ObjectKey::from_resource(incoming).to_string();
        if self.conflict_next_write.swap(false, Ordering::SeqCst) {
            return Err(Error::Conflict(key));
        }
        if stored.metadata.resource_version != incoming.metadata.resource_version {
            return Err(Error::Conflict(key));
        }
        Ok(())
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn get(&self, key: &ObjectKey) -> Result<Option<VirtualDatabase>> {
        Ok(self.fetch(key))
    }

    async fn update(&self, vdb: &VirtualDatabase) -> Result<VirtualDatabase> {
        let key = ObjectKey::from_resource(vdb);
        let version = self.bump();
        let mut objects = self.objects.lock().unwrap();
        let stored = objects
            .get_mut(&key)
            .ok_or_else(|| Error::ConfigError(format!("{key} not found")))?;
        self.check_version(stored, vdb)?;

        stored.metadata = vdb.metadata.clone();
        stored.spec = vdb.spec.clone();
        stored.metadata.resource_version = Some(version);
        self.updates.fetch_add(1, Ordering::SeqCst);

        let updated = stored.clone();
        if updated.metadata.deletion_timestamp.is_some() && updated.finalizers().is_empty() {
            objects.remove(&key);
        }
        Ok(updated)
    }

    async fn update_status(&self, vdb: &VirtualDatabase) -> Result<VirtualDatabase> {
        let key = ObjectKey::from_resource(vdb);
        let version = self.bump();
        let mut objects = self.objects.lock().unwrap();
        let stored = objects
            .get_mut(&key)
            .ok_or_else(|| Error::ConfigError(format!("{key} not found")))?;
        if self.conflict_status_writes.load(Ordering::SeqCst) {
            return Err(Error::Conflict(key.to_string()));
        }
        self.check_version(stored, vdb)?;

        stored.status = vdb.status.clone();
        stored.metadata.resource_version = Some(version);
        self.status_writes.fetch_add(1, Ordering::SeqCst);
        Ok(stored.clone())
    }

    async fn list(&self, namespace: Option<&str>) -> Result<Vec<VirtualDatabase>> {
        let objects = self.objects.lock().unwrap();
        let mut items: Vec<_> = objects
            .iter()
            .filter(|(k, _)| namespace.map_or(true, |ns| k.namespace == ns))
            .map(|(_, v)| v.clone())
            .collect();
        items.sort_by_key(|v| v.name_any());
        Ok(items)
    }
}

#[derive(Default)]
pub struct MemoryResolver {
    secrets: Mutex<HashMap<(String, String, String), String>>,
    config_maps: Mutex<HashMap<(String, String, String), String>>,
}

fn triple(ns: &str, name: &str, key: &str) -> (String, String, String) {
    (ns.to_string(), name.to_string(), key.to_string())
}

impl MemoryResolver {
    pub fn set_secret(&self, ns: &str, name: &str, key: &str, value: &str) {
        self.secrets
            .lock()
            .unwrap()
            .insert(triple(ns, name, key), value.to_string());
    }

    pub fn remove_secret(&self, ns: &str, name: &str, key: &str) {
        self.secrets.lock().unwrap().remove(&triple(ns, name, key));
    }

    pub fn set_config_map(&self, ns: &str, name: &str, key: &str, value: &str) {
        self.config_maps
            .lock()
            .unwrap()
            .insert(triple(ns, name, key), value.to_string());
    }
}

#[async_trait]
impl ConfigResolver for MemoryResolver {
    async fn resolve_secret_key(&self, namespace: &str, name: &str, key: &str) -> Result<String> {
        self.secrets
            .lock()
            .unwrap()
            .get(&triple(namespace, name, key))
            .cloned()
            .ok_or_else(|| Error::UnresolvedReference {
                reference: format!("secret {namespace}/{name}[{key}]"),
                message: "secret not found".to_string(),
            })
    }

    async fn resolve_config_map_key(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> Result<String> {
        self.config_maps
            .lock()
            .unwrap()
            .get(&triple(namespace, name, key))
            .cloned()
            .ok_or_else(|| Error::UnresolvedReference {
                reference: format!("configmap {namespace}/{name}[{key}]"),
                message: "config map not found".to_string(),
            })
    }
}

#[derive(Clone, Debug)]
pub struct FakeBuild {
    pub name: String,
    pub kind: BuildKind,
    pub digest: String,
    pub phase: BuildPhase,
    pub archive: Option<Vec<u8>>,
}

/// Build backend whose builds finish when told to, or immediately
#[derive(Default)]
pub struct FakeBuilds {
    pub builds: Mutex<Vec<FakeBuild>>,
    pub definitions: AtomicUsize,
    complete_on_poll: AtomicBool,
}

impl FakeBuilds {
    /// Builds report `Complete` the first time they are polled
    pub fn complete_on_poll(&self) {
        self.complete_on_poll.store(true, Ordering::SeqCst);
    }

    pub fn set_latest_phase(&self, kind: BuildKind, phase: BuildPhase) {
        let mut builds = self.builds.lock().unwrap();
        if let Some(build) = builds.iter_mut().rev().find(|b| b.kind == kind) {
            build.phase = phase;
        }
    }

    pub fn triggered(&self, kind: BuildKind) -> usize {
        self.builds
            .lock()
            .unwrap()
            .iter()
            .filter(|b| b.kind == kind)
            .count()
    }
}

fn status_digest(vdb: &VirtualDatabase) -> String {
    vdb.status
        .as_ref()
        .map(|s| s.digest.clone())
        .unwrap_or_default()
}

#[async_trait]
impl BuildTrigger for FakeBuilds {
    async fn ensure_build_definition(&self, _vdb: &VirtualDatabase, _kind: BuildKind) -> Result<()> {
        self.definitions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn trigger_build(
        &self,
        vdb: &VirtualDatabase,
        kind: BuildKind,
        archive: Option<Vec<u8>>,
    ) -> Result<String> {
        let mut builds = self.builds.lock().unwrap();
        let name = format!("{}-{}-{}", vdb.name_any(), kind as u8, builds.len() + 1);
        builds.push(FakeBuild {
            name: name.clone(),
            kind,
            digest: status_digest(vdb),
            phase: BuildPhase::New,
            archive,
        });
        Ok(name)
    }

    async fn poll_build_phase(
        &self,
        vdb: &VirtualDatabase,
        kind: BuildKind,
    ) -> Result<Option<BuildPhase>> {
        let digest = status_digest(vdb);
        let mut builds = self.builds.lock().unwrap();
        let Some(build) = builds
            .iter_mut()
            .rev()
            .find(|b| b.kind == kind && b.digest == digest)
        else {
            return Ok(None);
        };
        if self.complete_on_poll.load(Ordering::SeqCst) && build.phase.is_in_progress() {
            build.phase = BuildPhase::Complete;
        }
        Ok(Some(build.phase))
    }
}

/// Packager that records its input and returns the file names as the archive
#[derive(Default)]
pub struct RecordingPackager {
    pub packaged: Mutex<Vec<BTreeMap<String, String>>>,
}

impl ArtifactPackager for RecordingPackager {
    fn package(&self, files: &BTreeMap<String, String>) -> Result<Vec<u8>> {
        self.packaged.lock().unwrap().push(files.clone());
        Ok(files
            .keys()
            .cloned()
            .collect::<Vec<_>>()
            .join("\n")
            .into_bytes())
    }
}

pub struct FakeWorkloads {
    pub cache_ready: AtomicBool,
    pub route_host: Mutex<Option<String>>,
    pub rollout: Mutex<Option<RolloutState>>,
    /// Config digest of every `ensure_deployment` call, in order
    pub deployments: Mutex<Vec<String>>,
    pub services: AtomicUsize,
    pub keystores: AtomicUsize,
    pub metrics: AtomicUsize,
    pub cleanups: Mutex<Vec<ObjectKey>>,
}

impl Default for FakeWorkloads {
    fn default() -> Self {
        Self {
            cache_ready: AtomicBool::new(true),
            route_host: Mutex::new(Some("portfolio-demo.apps.example.com".to_string())),
            rollout: Mutex::new(Some(RolloutState {
                desired: 1,
                updated: 1,
                ready: 1,
                available: 1,
            })),
            deployments: Mutex::new(vec![]),
            services: AtomicUsize::new(0),
            keystores: AtomicUsize::new(0),
            metrics: AtomicUsize::new(0),
            cleanups: Mutex::new(vec![]),
        }
    }
}

impl FakeWorkloads {
    /// Config digest stamped into the pod template by the last apply
    pub fn deployed_digest(&self) -> Option<String> {
        self.deployments.lock().unwrap().last().cloned()
    }

    pub fn set_rollout(&self, state: Option<RolloutState>) {
        *self.rollout.lock().unwrap() = state;
    }
}

#[async_trait]
impl Workloads for FakeWorkloads {
    async fn ensure_cache_store(&self, _vdb: &VirtualDatabase, _name: &str) -> Result<bool> {
        Ok(self.cache_ready.load(Ordering::SeqCst))
    }

    async fn ensure_services(&self, _vdb: &VirtualDatabase) -> Result<()> {
        self.services.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn route_host(&self, _vdb: &VirtualDatabase) -> Result<Option<String>> {
        Ok(self.route_host.lock().unwrap().clone())
    }

    async fn ensure_keystore(&self, _vdb: &VirtualDatabase) -> Result<()> {
        self.keystores.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn ensure_deployment(&self, _vdb: &VirtualDatabase, config_digest: &str) -> Result<()> {
        self.deployments
            .lock()
            .unwrap()
            .push(config_digest.to_string());
        Ok(())
    }

    async fn rollout_state(&self, _vdb: &VirtualDatabase) -> Result<Option<RolloutState>> {
        Ok(*self.rollout.lock().unwrap())
    }

    async fn ensure_metrics(&self, _vdb: &VirtualDatabase) -> Result<()> {
        self.metrics.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn cleanup(&self, key: &ObjectKey) -> Result<()> {
        self.cleanups.lock().unwrap().push(key.clone());
        Ok(())
    }
}

pub struct FakeClock(Mutex<DateTime<Utc>>);

impl Default for FakeClock {
    fn default() -> Self {
        Self(Mutex::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
        ))
    }
}

impl FakeClock {
    pub fn advance(&self, by: Duration) {
        let mut now = self.0.lock().unwrap();
        *now += chrono::Duration::from_std(by).unwrap();
    }
}

impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

/// An engine wired to in-memory collaborators
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub resolver: Arc<MemoryResolver>,
    pub builds: Arc<FakeBuilds>,
    pub packager: Arc<RecordingPackager>,
    pub workloads: Arc<FakeWorkloads>,
    pub clock: Arc<FakeClock>,
    pub engine: Engine,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(OperatorConfig {
            route_wait_timeout: Duration::from_millis(50),
            route_poll_interval: Duration::from_millis(5),
            ..Default::default()
        })
    }

    pub fn with_config(config: OperatorConfig) -> Self {
        let store = Arc::new(MemoryStore::default());
        let resolver = Arc::new(MemoryResolver::default());
        let builds = Arc::new(FakeBuilds::default());
        let packager = Arc::new(RecordingPackager::default());
        let workloads = Arc::new(FakeWorkloads::default());
        let clock = Arc::new(FakeClock::default());
        let ctx = Context {
            store: store.clone(),
            resolver: resolver.clone(),
            builds: builds.clone(),
            packager: packager.clone(),
            workloads: workloads.clone(),
            clock: clock.clone(),
            config,
        };
        Self {
            store,
            resolver,
            builds,
            packager,
            workloads,
            clock,
            engine: Engine::new(Arc::new(ctx)),
        }
    }

    pub fn key() -> ObjectKey {
        ObjectKey::new(NAMESPACE, NAME)
    }

    /// Store a brand-new VDB with no status
    pub fn create(&self, spec: VirtualDatabaseSpec) {
        let mut vdb = vdb_in_phase(Phase::Initial);
        vdb.spec = spec;
        vdb.status = None;
        self.store.insert(vdb);
    }

    pub async fn pass(&self) -> Result<Outcome> {
        self.engine.reconcile(&Self::key()).await
    }

    /// Run passes until one requeues without writing, returning the phases
    /// persisted along the way
    pub async fn run_until_quiet(&self, max_passes: usize) -> Vec<Phase> {
        let mut phases = vec![self.phase()];
        for _ in 0..max_passes {
            match self.pass().await.unwrap() {
                Outcome::RequeueAfter(_) => break,
                Outcome::Done => {
                    let phase = self.phase();
                    if phases.last() != Some(&phase) {
                        phases.push(phase);
                    }
                }
            }
        }
        phases
    }

    pub fn current(&self) -> VirtualDatabase {
        self.store.fetch(&Self::key()).expect("vdb exists")
    }

    pub fn status(&self) -> VirtualDatabaseStatus {
        self.current().status.unwrap_or_default()
    }

    pub fn phase(&self) -> Phase {
        self.current().phase()
    }
}
