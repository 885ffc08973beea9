//! `KeystoreCreated` → `Deploying` → `Running | Error`

use chrono::DateTime;
use kube::ResourceExt;
use tracing::{debug, info, warn};

use super::{fail, resolve_config_digest, set_phase};
use crate::controller::context::Context;
use crate::crd::{Phase, VirtualDatabase};
use crate::error::Result;

/// Apply the Deployment stamped with the current config digest
pub(super) async fn handle(ctx: &Context, vdb: &mut VirtualDatabase) -> Result<()> {
    let Some(config_digest) = resolve_config_digest(ctx, vdb).await? else {
        return Ok(());
    };

    ctx.workloads.ensure_deployment(vdb, &config_digest).await?;
    info!(
        "Deployment for {} applied with {} replicas",
        vdb.name_any(),
        vdb.spec.replicas
    );

    let replicas = vdb.spec.replicas;
    let status = vdb.status_mut();
    status.config_digest = config_digest;
    status.replicas = replicas;
    status.failure.clear();
    set_phase(vdb, Phase::Deploying);
    Ok(())
}

/// Wait for the rollout, giving up after the configured rollout timeout
pub(super) async fn await_rollout(ctx: &Context, vdb: &mut VirtualDatabase) -> Result<()> {
    if let Some(state) = ctx.workloads.rollout_state(vdb).await? {
        if state.is_complete() {
            info!(
                "VirtualDatabase {} is running ({}/{} ready)",
                vdb.name_any(),
                state.ready,
                state.desired
            );
            let status = vdb.status_mut();
            status.ready_replicas = state.ready;
            status.failure.clear();
            set_phase(vdb, Phase::Running);
            return Ok(());
        }
        debug!(
            "Rollout of {} in progress: {}/{} updated, {}/{} ready",
            vdb.name_any(),
            state.updated,
            state.desired,
            state.ready,
            state.desired
        );
        vdb.status_mut().ready_replicas = state.ready;
    }

    let entered = vdb
        .status
        .as_ref()
        .and_then(|s| s.phase_entered_at.as_deref())
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok());
    let Some(entered) = entered else {
        return Ok(());
    };

    let elapsed = ctx.clock.now().signed_duration_since(entered);
    let Ok(limit) = chrono::Duration::from_std(ctx.config.rollout_timeout) else {
        return Ok(());
    };
    if elapsed > limit {
        warn!(
            "Rollout of {} did not complete within {:?}",
            vdb.name_any(),
            ctx.config.rollout_timeout
        );
        fail(
            vdb,
            Phase::Error,
            format!(
                "deployment did not become ready within {}s",
                ctx.config.rollout_timeout.as_secs()
            ),
        );
    }
    Ok(())
}
