//! Phase actions and the registry that dispatches to them
//!
//! Every action is a variant of the closed [`Action`] enum. An action claims
//! one or two phases through [`Action::can_handle`], which looks at nothing but
//! the phase. The [`Registry`] walks a fixed ordered list and returns the first
//! match; the predicates are written so that at most one action ever matches.
//!
//! | Action | Phases |
//! |--------|--------|
//! | `Initialize` | `Initial` |
//! | `CreateCacheStore` | `CreateCacheStore` |
//! | `BuildBaseImage` | `S2IReady`, `BuilderImage` |
//! | `BuildServiceImage` | `BuilderImageFinished`, `ServiceImage` |
//! | `CreateService` | `ServiceImageFinished` |
//! | `CreateKeystore` | `ServiceCreated` |
//! | `Deploy` | `KeystoreCreated` |
//! | `AwaitRollout` | `Deploying` |
//! | `Maintain` | `Running` |

pub(crate) mod builds;
mod cache_store;
mod deploy;
mod initialize;
mod keystore;
mod maintain;
mod service;

use kube::ResourceExt;
use tracing::warn;

use super::context::Context;
use super::digest;
use crate::crd::{Phase, VirtualDatabase};
use crate::error::{Error, Result};

/// A unit of reconciliation work bound to one or two phases
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Action {
    Initialize,
    CreateCacheStore,
    BuildBaseImage,
    BuildServiceImage,
    CreateService,
    CreateKeystore,
    Deploy,
    AwaitRollout,
    Maintain,
}

impl Action {
    pub fn name(self) -> &'static str {
        match self {
            Action::Initialize => "Initialize",
            Action::CreateCacheStore => "CreateCacheStore",
            Action::BuildBaseImage => "BuildBaseImage",
            Action::BuildServiceImage => "BuildServiceImage",
            Action::CreateService => "CreateService",
            Action::CreateKeystore => "CreateKeystore",
            Action::Deploy => "Deploy",
            Action::AwaitRollout => "AwaitRollout",
            Action::Maintain => "Maintain",
        }
    }

    /// Whether this action is responsible for the VDB's current phase
    pub fn can_handle(self, vdb: &VirtualDatabase) -> bool {
        let phase = vdb.phase();
        match self {
            Action::Initialize => phase == Phase::Initial,
            Action::CreateCacheStore => phase == Phase::CreateCacheStore,
            Action::BuildBaseImage => matches!(phase, Phase::S2IReady | Phase::BuilderImage),
            Action::BuildServiceImage => {
                matches!(phase, Phase::BuilderImageFinished | Phase::ServiceImage)
            }
            Action::CreateService => phase == Phase::ServiceImageFinished,
            Action::CreateKeystore => phase == Phase::ServiceCreated,
            Action::Deploy => phase == Phase::KeystoreCreated,
            Action::AwaitRollout => phase == Phase::Deploying,
            Action::Maintain => phase == Phase::Running,
        }
    }

    /// Run the action against `vdb`
    ///
    /// Handlers mutate only `vdb.status` and leave it self-consistent even
    /// when they return an error.
    pub async fn handle(self, ctx: &Context, vdb: &mut VirtualDatabase) -> Result<()> {
        match self {
            Action::Initialize => initialize::handle(ctx, vdb).await,
            Action::CreateCacheStore => cache_store::handle(ctx, vdb).await,
            Action::BuildBaseImage => builds::handle_base(ctx, vdb).await,
            Action::BuildServiceImage => builds::handle_service(ctx, vdb).await,
            Action::CreateService => service::handle(ctx, vdb).await,
            Action::CreateKeystore => keystore::handle(ctx, vdb).await,
            Action::Deploy => deploy::handle(ctx, vdb).await,
            Action::AwaitRollout => deploy::await_rollout(ctx, vdb).await,
            Action::Maintain => maintain::handle(ctx, vdb).await,
        }
    }
}

/// Result of looking up the action for a VDB
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    Matched(Action),
    /// No action claims the phase
    Quiescent,
    /// More than one action claims the phase; never expected
    Ambiguous(Vec<Action>),
}

/// Fixed, ordered list of actions
#[derive(Clone, Debug)]
pub struct Registry {
    actions: &'static [Action],
}

const PIPELINE: [Action; 9] = [
    Action::Initialize,
    Action::CreateCacheStore,
    Action::BuildBaseImage,
    Action::BuildServiceImage,
    Action::CreateService,
    Action::CreateKeystore,
    Action::Deploy,
    Action::AwaitRollout,
    Action::Maintain,
];

impl Default for Registry {
    fn default() -> Self {
        Self { actions: &PIPELINE }
    }
}

impl Registry {
    pub fn actions(&self) -> &'static [Action] {
        self.actions
    }

    /// Every action claiming the VDB's phase, in registry order
    pub fn matching(&self, vdb: &VirtualDatabase) -> Vec<Action> {
        self.actions
            .iter()
            .copied()
            .filter(|a| a.can_handle(vdb))
            .collect()
    }

    pub fn resolve(&self, vdb: &VirtualDatabase) -> Resolution {
        let mut matches = self.matching(vdb);
        match matches.len() {
            0 => Resolution::Quiescent,
            1 => Resolution::Matched(matches.remove(0)),
            _ => Resolution::Ambiguous(matches),
        }
    }
}

pub(crate) fn set_phase(vdb: &mut VirtualDatabase, phase: Phase) {
    vdb.status_mut().phase = phase;
}

/// Park in a failure phase with a message
pub(crate) fn fail(vdb: &mut VirtualDatabase, phase: Phase, message: impl Into<String>) {
    let status = vdb.status_mut();
    status.phase = phase;
    status.failure = message.into();
}

/// Resolve the config digest, recording an unresolvable reference as a failure
///
/// Returns `None` when a reference could not be resolved; the phase is left
/// alone so the VDB resumes once the referenced object appears.
pub(crate) async fn resolve_config_digest(
    ctx: &Context,
    vdb: &mut VirtualDatabase,
) -> Result<Option<String>> {
    let namespace = vdb.namespace().unwrap_or_else(|| "default".to_string());
    match digest::config_digest(&vdb.spec, &namespace, ctx.resolver.as_ref()).await {
        Ok(digest) => Ok(Some(digest)),
        Err(e @ Error::UnresolvedReference { .. }) => {
            warn!(
                "Configuration for {}/{} is not resolvable: {}",
                namespace,
                vdb.name_any(),
                e
            );
            vdb.status_mut().failure = e.to_string();
            Ok(None)
        }
        Err(e) => Err(e),
    }
}
