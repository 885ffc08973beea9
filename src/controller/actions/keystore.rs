//! `ServiceCreated` → `KeystoreCreated`

use super::set_phase;
use crate::controller::context::Context;
use crate::crd::{Phase, VirtualDatabase};
use crate::error::Result;

pub(super) async fn handle(ctx: &Context, vdb: &mut VirtualDatabase) -> Result<()> {
    ctx.workloads.ensure_keystore(vdb).await?;
    set_phase(vdb, Phase::KeystoreCreated);
    Ok(())
}
