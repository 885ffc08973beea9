//! `Running`, re-entrant
//!
//! Keeps a running VDB in line with everything that does not require a
//! rebuild: replica count, literal env values and, through the config digest,
//! the values behind secret and config map references.

use kube::ResourceExt;
use tracing::{debug, info};

use super::resolve_config_digest;
use crate::controller::context::Context;
#[cfg(feature = "metrics")]
use crate::controller::metrics;
use crate::crd::VirtualDatabase;
use crate::error::Result;

pub(super) async fn handle(ctx: &Context, vdb: &mut VirtualDatabase) -> Result<()> {
    let Some(config_digest) = resolve_config_digest(ctx, vdb).await? else {
        return Ok(());
    };

    let previous = vdb
        .status
        .as_ref()
        .map(|s| s.config_digest.clone())
        .unwrap_or_default();
    if previous != config_digest {
        info!(
            "Configuration of {} changed, rolling pods onto {}",
            vdb.name_any(),
            config_digest
        );
        #[cfg(feature = "metrics")]
        metrics::inc_config_drift(&vdb.namespace().unwrap_or_default(), &vdb.name_any());
    } else {
        debug!("Configuration of {} unchanged", vdb.name_any());
    }

    // Re-applied every pass so replica and literal env edits reach the pods.
    ctx.workloads.ensure_deployment(vdb, &config_digest).await?;
    ctx.workloads.ensure_metrics(vdb).await?;
    let rollout = ctx.workloads.rollout_state(vdb).await?;

    let replicas = vdb.spec.replicas;
    let status = vdb.status_mut();
    status.config_digest = config_digest;
    status.replicas = replicas;
    status.failure.clear();
    if let Some(state) = rollout {
        status.ready_replicas = state.ready;
    }
    Ok(())
}
