//! `CreateCacheStore` → `S2IReady`

use kube::ResourceExt;
use tracing::{debug, info};

use super::set_phase;
use crate::controller::context::Context;
use crate::crd::{Phase, VirtualDatabase};
use crate::error::Result;

pub(super) async fn handle(ctx: &Context, vdb: &mut VirtualDatabase) -> Result<()> {
    let Some(name) = vdb.spec.cache_store_name(&vdb.name_any()) else {
        set_phase(vdb, Phase::S2IReady);
        return Ok(());
    };

    if ctx.workloads.ensure_cache_store(vdb, &name).await? {
        info!("Cache store {} ready for {}", name, vdb.name_any());
        set_phase(vdb, Phase::S2IReady);
    } else {
        debug!("Waiting for cache store {}", name);
    }
    Ok(())
}
