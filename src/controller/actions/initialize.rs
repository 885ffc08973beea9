//! `Initial` → `CreateCacheStore`

use kube::ResourceExt;
use tracing::{info, warn};

use super::{fail, resolve_config_digest, set_phase};
use crate::controller::context::Context;
use crate::controller::digest;
use crate::crd::{Phase, VirtualDatabase};
use crate::error::Result;

/// Validate the spec and record the digests the pipeline run starts from
pub(super) async fn handle(ctx: &Context, vdb: &mut VirtualDatabase) -> Result<()> {
    let spec_digest = digest::spec_digest(&vdb.spec);

    if let Err(errors) = vdb.spec.validate() {
        let message = errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        warn!("VirtualDatabase {} is invalid: {}", vdb.name_any(), message);
        // Recording the digest parks the VDB until the spec is edited.
        vdb.status_mut().digest = spec_digest;
        fail(vdb, Phase::Error, message);
        return Ok(());
    }

    let Some(config_digest) = resolve_config_digest(ctx, vdb).await? else {
        return Ok(());
    };

    let explicit_version = vdb.spec.version.clone();

    let status = vdb.status_mut();
    status.digest = spec_digest;
    status.config_digest = config_digest;
    status.failure.clear();
    match explicit_version {
        Some(version) => status.version = version,
        None if status.version.is_empty() => status.version = "1".to_string(),
        None => {}
    }

    let version = status.version.clone();
    info!(
        "Initialized VirtualDatabase {} at version {}",
        vdb.name_any(),
        version
    );
    set_phase(vdb, Phase::CreateCacheStore);
    Ok(())
}
