//! Shared context handed to the engine and every phase action

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::collaborators::{ArtifactPackager, BuildTrigger, Workloads};
use super::store::{ConfigResolver, ResourceStore};

/// Source of the current time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Tunables for the reconciliation engine
#[derive(Clone, Debug)]
pub struct OperatorConfig {
    /// Poll interval used when a pass persists nothing
    pub requeue_interval: Duration,
    /// How long a rollout may stay in `Deploying` before the VDB is marked failed
    pub rollout_timeout: Duration,
    /// Upper bound on waiting for a Route host within one pass
    pub route_wait_timeout: Duration,
    pub route_poll_interval: Duration,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            requeue_interval: Duration::from_secs(5),
            rollout_timeout: Duration::from_secs(600),
            route_wait_timeout: Duration::from_secs(30),
            route_poll_interval: Duration::from_secs(2),
        }
    }
}

/// Collaborators and configuration for one operator process
pub struct Context {
    pub store: Arc<dyn ResourceStore>,
    pub resolver: Arc<dyn ConfigResolver>,
    pub builds: Arc<dyn BuildTrigger>,
    pub packager: Arc<dyn ArtifactPackager>,
    pub workloads: Arc<dyn Workloads>,
    pub clock: Arc<dyn Clock>,
    pub config: OperatorConfig,
}
