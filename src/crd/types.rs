//! Shared types for VirtualDatabase specifications
//!
//! These types are used across the CRD definitions and controller logic.
//!
//! # Type Hierarchy
//!
//! - [`Phase`] - Reconciliation progress persisted in the status
//! - [`BuildSpec`] - What to build: inline DDL, a git checkout or a maven artifact
//! - [`EnvVar`] - Container environment, optionally indirecting through secrets/config maps
//! - [`RuntimeSpec`] / [`ResourceRequirements`] - Where and how large the workload runs
//! - [`Condition`] - Kubernetes-style status conditions

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Reconciliation phase of a VirtualDatabase
///
/// The forward pipeline is linear:
/// `Initial → CreateCacheStore → S2IReady → BuilderImage → BuilderImageFinished →
/// ServiceImage → ServiceImageFinished → ServiceCreated → KeystoreCreated →
/// Deploying → Running`.
///
/// `BuilderImageFailed`, `ServiceImageFailed` and `Error` park the resource until
/// the spec changes. `Deleting` is entered from any phase once deletion starts.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
pub enum Phase {
    #[default]
    Initial,
    CreateCacheStore,
    S2IReady,
    BuilderImage,
    BuilderImageFinished,
    BuilderImageFailed,
    ServiceImage,
    ServiceImageFinished,
    ServiceImageFailed,
    ServiceCreated,
    KeystoreCreated,
    Deploying,
    Running,
    Error,
    Deleting,
}

impl Phase {
    /// Every phase, in declaration order
    pub const ALL: [Phase; 15] = [
        Phase::Initial,
        Phase::CreateCacheStore,
        Phase::S2IReady,
        Phase::BuilderImage,
        Phase::BuilderImageFinished,
        Phase::BuilderImageFailed,
        Phase::ServiceImage,
        Phase::ServiceImageFinished,
        Phase::ServiceImageFailed,
        Phase::ServiceCreated,
        Phase::KeystoreCreated,
        Phase::Deploying,
        Phase::Running,
        Phase::Error,
        Phase::Deleting,
    ];

    /// The successful path from `Initial` to `Running`
    pub const PIPELINE: [Phase; 11] = [
        Phase::Initial,
        Phase::CreateCacheStore,
        Phase::S2IReady,
        Phase::BuilderImage,
        Phase::BuilderImageFinished,
        Phase::ServiceImage,
        Phase::ServiceImageFinished,
        Phase::ServiceCreated,
        Phase::KeystoreCreated,
        Phase::Deploying,
        Phase::Running,
    ];

    /// Phases that only a spec change can leave
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            Phase::BuilderImageFailed | Phase::ServiceImageFailed | Phase::Error
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Initial => "Initial",
            Phase::CreateCacheStore => "CreateCacheStore",
            Phase::S2IReady => "S2IReady",
            Phase::BuilderImage => "BuilderImage",
            Phase::BuilderImageFinished => "BuilderImageFinished",
            Phase::BuilderImageFailed => "BuilderImageFailed",
            Phase::ServiceImage => "ServiceImage",
            Phase::ServiceImageFinished => "ServiceImageFinished",
            Phase::ServiceImageFailed => "ServiceImageFailed",
            Phase::ServiceCreated => "ServiceCreated",
            Phase::KeystoreCreated => "KeystoreCreated",
            Phase::Deploying => "Deploying",
            Phase::Running => "Running",
            Phase::Error => "Error",
            Phase::Deleting => "Deleting",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to build the virtual database from
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BuildSpec {
    /// Version-control checkout to build from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git: Option<GitSource>,

    #[serde(default)]
    pub source: SourceSpec,

    /// Raw files overlaid onto the build context
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_file_changes: Vec<FileChange>,
}

impl BuildSpec {
    /// True when the VDB is described inline rather than fetched from git or maven
    pub fn is_inline(&self) -> bool {
        self.source.ddl.is_some() && self.git.is_none() && self.source.maven.is_none()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GitSource {
    pub uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_dir: Option<String>,
}

/// Source of the virtual database definition
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SourceSpec {
    /// Inline DDL defining the virtual database
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ddl: Option<String>,

    /// Inline OpenAPI document exposed alongside the VDB
    #[serde(skip_serializing_if = "Option::is_none")]
    pub openapi: Option<String>,

    /// Pre-built artifact coordinate (`group:artifact:version`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maven: Option<String>,

    /// Extra artifact coordinates, in declaration order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FileChange {
    pub relative_path: String,
    pub contents: String,
}

/// Container environment variable
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EnvVar {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_from: Option<EnvVarSource>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EnvVarSource {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_key_ref: Option<KeyRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_map_key_ref: Option<KeyRef>,
}

/// Reference to one key of a Secret or ConfigMap in the VDB's namespace
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct KeyRef {
    pub name: String,
    pub key: String,
}

/// Runtime the service image is built for
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct RuntimeSpec {
    #[serde(rename = "type")]
    pub type_: String,
    pub version: String,
}

impl Default for RuntimeSpec {
    fn default() -> Self {
        Self {
            type_: "spring-boot".to_string(),
            version: "2.7".to_string(),
        }
    }
}

/// Resource requirements for the VDB container
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequirements {
    pub requests: ResourceSpec,
    pub limits: ResourceSpec,
}

impl Default for ResourceRequirements {
    fn default() -> Self {
        Self {
            requests: ResourceSpec {
                cpu: "500m".to_string(),
                memory: "512Mi".to_string(),
            },
            limits: ResourceSpec {
                cpu: "2".to_string(),
                memory: "2Gi".to_string(),
            },
        }
    }
}

/// Resource specification for CPU and memory
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct ResourceSpec {
    /// CPU cores (e.g., "500m", "2")
    pub cpu: String,
    /// Memory (e.g., "512Mi", "2Gi")
    pub memory: String,
}

/// Cache store provisioned ahead of the build
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CacheStoreConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Name of the cache cluster; defaults to `<vdb>-cache`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Status condition following Kubernetes conventions
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition (e.g., "Ready", "Progressing")
    #[serde(rename = "type")]
    pub type_: String,
    /// Status of the condition: "True", "False", or "Unknown"
    pub status: String,
    /// Last time the condition transitioned
    pub last_transition_time: String,
    /// Machine-readable reason for the condition
    pub reason: String,
    /// Human-readable message
    pub message: String,
}
