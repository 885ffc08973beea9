//! Contracts for the cluster-side work the phase actions delegate
//!
//! Image builds, artifact packaging and the deployed workload objects are
//! reached only through these traits. The Kubernetes implementations live in
//! `builds`, `packaging` and `resources`.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;

use crate::controller::store::ObjectKey;
use crate::crd::VirtualDatabase;
use crate::error::Result;

/// Which of the two image builds a call refers to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BuildKind {
    /// Shared builder image for the VDB's runtime
    Base,
    /// Service image containing the VDB itself
    Service,
}

impl fmt::Display for BuildKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildKind::Base => f.write_str("base image"),
            BuildKind::Service => f.write_str("service image"),
        }
    }
}

/// Phase reported by a build object
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuildPhase {
    New,
    Pending,
    Running,
    Complete,
    Failed,
    Error,
    Cancelled,
}

impl BuildPhase {
    /// Parse the phase string used by build objects; unknown values map to `None`
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "New" => Some(BuildPhase::New),
            "Pending" => Some(BuildPhase::Pending),
            "Running" => Some(BuildPhase::Running),
            "Complete" => Some(BuildPhase::Complete),
            "Failed" => Some(BuildPhase::Failed),
            "Error" => Some(BuildPhase::Error),
            "Cancelled" => Some(BuildPhase::Cancelled),
            _ => None,
        }
    }

    pub fn is_in_progress(self) -> bool {
        matches!(self, BuildPhase::New | BuildPhase::Pending | BuildPhase::Running)
    }

    pub fn is_failure(self) -> bool {
        matches!(
            self,
            BuildPhase::Failed | BuildPhase::Error | BuildPhase::Cancelled
        )
    }
}

impl fmt::Display for BuildPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Replica counts of the VDB's Deployment
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RolloutState {
    pub desired: i32,
    pub updated: i32,
    pub ready: i32,
    pub available: i32,
}

impl RolloutState {
    pub fn is_complete(&self) -> bool {
        self.updated >= self.desired && self.ready >= self.desired && self.available >= self.desired
    }
}

/// Drives image builds
#[async_trait]
pub trait BuildTrigger: Send + Sync {
    /// Create or update the build definition for `kind`
    async fn ensure_build_definition(&self, vdb: &VirtualDatabase, kind: BuildKind) -> Result<()>;

    /// Start a build; `archive` is the binary build input when there is one.
    /// Returns the name of the started build.
    async fn trigger_build(
        &self,
        vdb: &VirtualDatabase,
        kind: BuildKind,
        archive: Option<Vec<u8>>,
    ) -> Result<String>;

    /// Phase of the most recent build of `kind` for the VDB's current spec
    /// digest, or `None` when no such build exists
    async fn poll_build_phase(
        &self,
        vdb: &VirtualDatabase,
        kind: BuildKind,
    ) -> Result<Option<BuildPhase>>;
}

/// Turns a set of source files into a binary build input
pub trait ArtifactPackager: Send + Sync {
    fn package(&self, files: &BTreeMap<String, String>) -> Result<Vec<u8>>;
}

/// The workload objects a VDB runs as
#[async_trait]
pub trait Workloads: Send + Sync {
    /// Ensure the cache store exists; returns whether it is ready
    async fn ensure_cache_store(&self, vdb: &VirtualDatabase, name: &str) -> Result<bool>;

    /// Ensure the Services, plus the Route when the VDB is exposed externally
    async fn ensure_services(&self, vdb: &VirtualDatabase) -> Result<()>;

    /// Host admitted for the VDB's Route, once there is one
    async fn route_host(&self, vdb: &VirtualDatabase) -> Result<Option<String>>;

    async fn ensure_keystore(&self, vdb: &VirtualDatabase) -> Result<()>;

    /// Apply the Deployment with `config_digest` stamped into its pod template
    async fn ensure_deployment(&self, vdb: &VirtualDatabase, config_digest: &str) -> Result<()>;

    async fn rollout_state(&self, vdb: &VirtualDatabase) -> Result<Option<RolloutState>>;

    /// Metrics scraping and console integration for a running VDB
    async fn ensure_metrics(&self, vdb: &VirtualDatabase) -> Result<()>;

    /// Remove objects that owner references cannot garbage-collect
    async fn cleanup(&self, key: &ObjectKey) -> Result<()>;
}
