//! Controller module for VirtualDatabase reconciliation
//!
//! This module contains the reconciliation engine, the phase actions it
//! dispatches to, and the Kubernetes-backed collaborators those actions use.

mod actions;
pub mod builds;
pub mod collaborators;
pub mod conditions;
pub mod context;
pub mod digest;
mod engine;
#[cfg(test)]
mod engine_test;
mod finalizers;
pub mod keystore;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod packaging;
mod reconciler;
pub mod resources;
pub mod store;
#[cfg(test)]
pub(crate) mod testing;
mod wait;

pub use builds::KubeBuilds;
pub use collaborators::{
    ArtifactPackager, BuildKind, BuildPhase, BuildTrigger, RolloutState, Workloads,
};
pub use context::{Clock, Context, OperatorConfig, SystemClock};
pub use engine::{next_version, Engine, Outcome};
pub use finalizers::VDB_FINALIZER;
pub use packaging::TarGzPackager;
pub use reconciler::{run_controller, ControllerState, CONTROLLER_NAME};
pub use resources::KubeWorkloads;
pub use store::{ConfigResolver, KubeConfigResolver, KubeStore, ObjectKey, ResourceStore};
pub use wait::wait_for;
