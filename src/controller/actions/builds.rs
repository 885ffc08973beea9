//! Base and service image builds
//!
//! Both actions are dual-purpose: in their first phase they make sure a build
//! for the current spec is running (adopting one that already is, which is
//! what happens when a pass crashed after triggering), in their second phase
//! they poll it to completion.

use std::collections::BTreeMap;

use kube::ResourceExt;
use tracing::{debug, info, warn};

use super::{fail, set_phase};
use crate::controller::collaborators::{BuildKind, BuildPhase};
use crate::controller::context::Context;
use crate::crd::{Phase, VirtualDatabase, VirtualDatabaseSpec};
use crate::error::Result;

pub(crate) const DDL_PATH: &str = "src/main/resources/vdb.ddl";
pub(crate) const OPENAPI_PATH: &str = "src/main/resources/openapi.json";

/// `S2IReady` → `BuilderImage` → `BuilderImageFinished | BuilderImageFailed`
pub(super) async fn handle_base(ctx: &Context, vdb: &mut VirtualDatabase) -> Result<()> {
    match vdb.phase() {
        Phase::S2IReady => {
            ensure_build(ctx, vdb, BuildKind::Base).await?;
            set_phase(vdb, Phase::BuilderImage);
            Ok(())
        }
        _ => {
            await_build(
                ctx,
                vdb,
                BuildKind::Base,
                Phase::BuilderImageFinished,
                Phase::BuilderImageFailed,
            )
            .await
        }
    }
}

/// `BuilderImageFinished` → `ServiceImage` → `ServiceImageFinished | ServiceImageFailed`
pub(super) async fn handle_service(ctx: &Context, vdb: &mut VirtualDatabase) -> Result<()> {
    match vdb.phase() {
        Phase::BuilderImageFinished => {
            ensure_build(ctx, vdb, BuildKind::Service).await?;
            set_phase(vdb, Phase::ServiceImage);
            Ok(())
        }
        _ => {
            await_build(
                ctx,
                vdb,
                BuildKind::Service,
                Phase::ServiceImageFinished,
                Phase::ServiceImageFailed,
            )
            .await
        }
    }
}

async fn ensure_build(ctx: &Context, vdb: &VirtualDatabase, kind: BuildKind) -> Result<()> {
    ctx.builds.ensure_build_definition(vdb, kind).await?;

    match ctx.builds.poll_build_phase(vdb, kind).await? {
        Some(phase) if phase.is_in_progress() || phase == BuildPhase::Complete => {
            info!(
                "Adopting existing {} build for {} ({})",
                kind,
                vdb.name_any(),
                phase
            );
            Ok(())
        }
        _ => start_build(ctx, vdb, kind).await,
    }
}

async fn start_build(ctx: &Context, vdb: &VirtualDatabase, kind: BuildKind) -> Result<()> {
    let archive = match kind {
        BuildKind::Base => None,
        BuildKind::Service => {
            let files = build_files(&vdb.spec);
            if files.is_empty() {
                None
            } else {
                Some(ctx.packager.package(&files)?)
            }
        }
    };

    let build = ctx.builds.trigger_build(vdb, kind, archive).await?;
    info!("Started {} build {} for {}", kind, build, vdb.name_any());
    Ok(())
}

async fn await_build(
    ctx: &Context,
    vdb: &mut VirtualDatabase,
    kind: BuildKind,
    finished: Phase,
    failed: Phase,
) -> Result<()> {
    match ctx.builds.poll_build_phase(vdb, kind).await? {
        Some(BuildPhase::Complete) => {
            info!("{} build for {} completed", kind, vdb.name_any());
            set_phase(vdb, finished);
        }
        Some(phase) if phase.is_failure() => {
            warn!("{} build for {} ended {}", kind, vdb.name_any(), phase);
            fail(vdb, failed, format!("{kind} build ended with phase {phase}"));
        }
        Some(phase) => {
            debug!("{} build for {} is {}", kind, vdb.name_any(), phase);
        }
        None => {
            warn!(
                "No {} build found for {}, starting a new one",
                kind,
                vdb.name_any()
            );
            start_build(ctx, vdb, kind).await?;
        }
    }
    Ok(())
}

/// Files handed to the service image build
///
/// Inline sources land at fixed paths; `sourceFileChanges` are overlaid last
/// and win on conflicts.
pub(crate) fn build_files(spec: &VirtualDatabaseSpec) -> BTreeMap<String, String> {
    let mut files = BTreeMap::new();
    if let Some(ddl) = &spec.build.source.ddl {
        files.insert(DDL_PATH.to_string(), ddl.clone());
    }
    if let Some(openapi) = &spec.build.source.openapi {
        files.insert(OPENAPI_PATH.to_string(), openapi.clone());
    }
    for change in &spec.build.source_file_changes {
        files.insert(change.relative_path.clone(), change.contents.clone());
    }
    files
}
