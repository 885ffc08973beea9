//! `ServiceImageFinished` → `ServiceCreated`

use kube::ResourceExt;
use tracing::info;

use super::set_phase;
use crate::controller::context::Context;
use crate::controller::wait::wait_for;
use crate::crd::{Phase, VirtualDatabase};
use crate::error::Result;

/// Ensure the Services and, for exposed VDBs, wait for the Route host
///
/// A Route that is not admitted within the configured wait fails the pass
/// with a timeout; the next pass ensures the objects again and resumes waiting.
pub(super) async fn handle(ctx: &Context, vdb: &mut VirtualDatabase) -> Result<()> {
    ctx.workloads.ensure_services(vdb).await?;

    let route = if vdb.spec.expose_externally {
        let current: &VirtualDatabase = vdb;
        let host = wait_for(
            ctx.config.route_wait_timeout,
            ctx.config.route_poll_interval,
            "route host",
            || ctx.workloads.route_host(current),
        )
        .await?;
        info!("Route for {} admitted at {}", vdb.name_any(), host);
        format!("https://{host}")
    } else {
        String::new()
    };

    vdb.status_mut().route = route;
    set_phase(vdb, Phase::ServiceCreated);
    Ok(())
}
