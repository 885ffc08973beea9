//! The reconciliation engine
//!
//! One call to [`Engine::reconcile`] is one pass over one VirtualDatabase:
//!
//! 1. fetch the object; gone means cleanup, deleting means park in `Deleting`,
//!    and a live object without the finalizer only gets the finalizer
//! 2. compare the spec digest against the status; a change resets the
//!    pipeline to `Initial` and ends the pass
//! 3. otherwise resolve the single action owning the phase and run it on a
//!    private copy
//! 4. persist the copy only when it differs from what was fetched
//!
//! A pass makes at most one phase transition and at most one write, and every
//! pass starts from a fresh read, so the loop can be killed at any point and
//! resumed.

use std::sync::Arc;
use std::time::Duration;

use kube::ResourceExt;
use tracing::{debug, error, info, instrument, warn};

use super::actions::{Registry, Resolution};
use super::conditions::sync_phase_conditions;
use super::context::Context;
use super::digest;
use super::finalizers::{add_finalizer, has_finalizer, is_being_deleted, remove_finalizer};
#[cfg(feature = "metrics")]
use super::metrics;
use super::store::ObjectKey;
use crate::crd::{Phase, VirtualDatabase};
use crate::error::Result;

/// What the scheduler should do after a pass
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// A write happened; the resulting watch event schedules the next pass
    Done,
    /// Nothing was written; poll again after the interval
    RequeueAfter(Duration),
}

pub struct Engine {
    ctx: Arc<Context>,
    registry: Registry,
}

impl Engine {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self {
            ctx,
            registry: Registry::default(),
        }
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Run one reconciliation pass for `key`
    #[instrument(skip(self), fields(namespace = %key.namespace, name = %key.name))]
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<Outcome> {
        let Some(observed) = self.ctx.store.get(key).await? else {
            info!("VirtualDatabase {} no longer exists, cleaning up", key);
            self.ctx.workloads.cleanup(key).await?;
            return Ok(Outcome::Done);
        };

        if is_being_deleted(&observed) {
            return self.finalize(key, observed).await;
        }

        if !has_finalizer(&observed) {
            let mut target = observed;
            add_finalizer(&mut target);
            self.ctx.store.update(&target).await?;
            debug!("Added finalizer to {}", key);
            return Ok(Outcome::Done);
        }

        let mut target = observed.clone();

        let spec_digest = digest::spec_digest(&target.spec);
        if needs_redeploy(&observed, &spec_digest) {
            redeploy_reset(&mut target, spec_digest);
            #[cfg(feature = "metrics")]
            metrics::inc_redeploy(&key.namespace, &key.name);
            self.persist(&observed, target).await?;
            return Ok(Outcome::Done);
        }

        let phase = target.phase();
        let action = match self.registry.resolve(&target) {
            Resolution::Matched(action) => action,
            Resolution::Quiescent => {
                if phase.is_failure() {
                    debug!("{} is parked in {}", key, phase);
                } else {
                    error!("No action handles phase {} of {}", phase, key);
                }
                return Ok(self.requeue());
            }
            Resolution::Ambiguous(actions) => {
                error!(
                    "Phase {} of {} is claimed by several actions: {:?}",
                    phase, key, actions
                );
                return Ok(self.requeue());
            }
        };

        debug!("Running {} for {} in phase {}", action.name(), key, phase);
        let handled = action
            .handle(&self.ctx, &mut target)
            .await
            .map_err(|e| e.in_action(action.name(), phase));
        if let Err(e) = &handled {
            warn!("{}", e);
        }

        if has_changes(&observed, &target) {
            self.persist(&observed, target).await?;
            handled?;
            return Ok(Outcome::Done);
        }

        handled?;
        Ok(self.requeue())
    }

    fn requeue(&self) -> Outcome {
        Outcome::RequeueAfter(self.ctx.config.requeue_interval)
    }

    /// Deletion: record `Deleting` once, then clean up and release the object
    async fn finalize(&self, key: &ObjectKey, observed: VirtualDatabase) -> Result<Outcome> {
        if observed.phase() != Phase::Deleting {
            let mut target = observed.clone();
            target.status_mut().phase = Phase::Deleting;
            self.persist(&observed, target).await?;
            return Ok(Outcome::Done);
        }

        if has_finalizer(&observed) {
            self.ctx.workloads.cleanup(key).await?;
            let mut target = observed;
            remove_finalizer(&mut target);
            self.ctx.store.update(&target).await?;
            info!("Released VirtualDatabase {}", key);
        }
        Ok(Outcome::Done)
    }

    /// Write the status of `target`, version-checked against `observed`
    ///
    /// Stamps `phaseEnteredAt` when the phase moved and refreshes the phase
    /// conditions when the phase or the failure message moved. Actions only
    /// touch the status, so this is the single write of the pass.
    async fn persist(&self, observed: &VirtualDatabase, mut target: VirtualDatabase) -> Result<()> {
        let from = observed.phase();
        let to = target.phase();
        let previous_failure = observed
            .status
            .as_ref()
            .map(|s| s.failure.as_str())
            .unwrap_or_default();
        let now = self.ctx.clock.now().to_rfc3339();
        let status = target.status_mut();
        if from != to || observed.status.is_none() {
            status.phase_entered_at = Some(now.clone());
            sync_phase_conditions(status, &now);
        } else if status.failure != previous_failure {
            sync_phase_conditions(status, &now);
        }

        if target.status != observed.status {
            self.ctx.store.update_status(&target).await?;
        }

        if from != to {
            info!("VirtualDatabase {} moved {} -> {}", target.name_any(), from, to);
            #[cfg(feature = "metrics")]
            metrics::inc_phase_transition(
                &target.namespace().unwrap_or_default(),
                &target.name_any(),
                to.as_str(),
            );
        }
        Ok(())
    }
}

/// Structural difference between what was fetched and what a handler produced
pub fn has_changes(observed: &VirtualDatabase, target: &VirtualDatabase) -> bool {
    observed.spec != target.spec || observed.status != target.status
}

/// Whether the build-relevant spec moved away from the recorded digest
///
/// A VDB that has never been initialized has no recorded digest; `Initialize`
/// records it, so that is not a redeploy.
pub fn needs_redeploy(vdb: &VirtualDatabase, spec_digest: &str) -> bool {
    let recorded = vdb
        .status
        .as_ref()
        .map(|s| s.digest.as_str())
        .unwrap_or_default();
    if recorded.is_empty() && vdb.phase() == Phase::Initial {
        return false;
    }
    recorded != spec_digest
}

/// Restart the pipeline for a new spec digest
///
/// Only inline sources without an explicit version get the next version number.
pub fn redeploy_reset(vdb: &mut VirtualDatabase, spec_digest: String) {
    let explicit_version = vdb.spec.version.clone();
    let inline = vdb.spec.build.is_inline();
    let name = vdb.name_any();

    let status = vdb.status_mut();
    let previous = status.version.clone();
    status.phase = Phase::Initial;
    status.digest = spec_digest;
    status.failure.clear();
    match explicit_version {
        Some(version) => status.version = version,
        None if inline => status.version = next_version(&previous),
        None => {}
    }

    info!(
        "Spec of {} changed, redeploying (version {} -> {})",
        name, previous, status.version
    );
}

/// Next automatic version; a value that is not a number is kept as is
pub fn next_version(previous: &str) -> String {
    if previous.is_empty() {
        return "1".to_string();
    }
    match previous.parse::<u64>() {
        Ok(n) => (n + 1).to_string(),
        Err(_) => {
            debug!("Version {:?} is not numeric, leaving it unchanged", previous);
            previous.to_string()
        }
    }
}
