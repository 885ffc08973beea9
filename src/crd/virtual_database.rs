//! VirtualDatabase Custom Resource Definition
//!
//! The VirtualDatabase CRD describes a virtual database the operator builds
//! into a service image and deploys. The spec is owned by the user; the
//! status is owned by the operator.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{
    BuildSpec, CacheStoreConfig, Condition, EnvVar, Phase, ResourceRequirements, RuntimeSpec,
};

/// Structured validation error for `VirtualDatabaseSpec`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpecValidationError {
    pub field: String,
    pub message: String,
}

impl SpecValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for SpecValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[derive(CustomResource, Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "teiid.io",
    version = "v1alpha1",
    kind = "VirtualDatabase",
    namespaced,
    status = "VirtualDatabaseStatus",
    shortname = "vdb",
    derive = "PartialEq",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Version","type":"string","jsonPath":".status.version"}"#,
    printcolumn = r#"{"name":"Route","type":"string","jsonPath":".status.route"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct VirtualDatabaseSpec {
    #[serde(default = "default_replicas")]
    pub replicas: i32,

    /// Create a Route so the VDB is reachable from outside the cluster
    #[serde(default)]
    pub expose_externally: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,

    #[serde(default)]
    pub runtime: RuntimeSpec,

    #[serde(default)]
    pub resources: ResourceRequirements,

    pub build: BuildSpec,

    /// Explicit version; disables automatic version increments on redeploy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_store: Option<CacheStoreConfig>,
}

fn default_replicas() -> i32 {
    1
}

impl VirtualDatabaseSpec {
    /// Validate the spec
    ///
    /// Checks that exactly one build source is present, that replica counts
    /// are sane and that every environment entry is well formed.
    pub fn validate(&self) -> Result<(), Vec<SpecValidationError>> {
        let mut errors = Vec::new();

        if self.replicas < 0 {
            errors.push(SpecValidationError::new(
                "spec.replicas",
                "replicas must not be negative",
            ));
        }

        let source = &self.build.source;
        let sources = [
            source.ddl.is_some(),
            source.maven.is_some(),
            self.build.git.is_some(),
        ]
        .iter()
        .filter(|present| **present)
        .count();
        match sources {
            0 => errors.push(SpecValidationError::new(
                "spec.build",
                "one of build.source.ddl, build.source.maven or build.git is required",
            )),
            1 => {}
            _ => errors.push(SpecValidationError::new(
                "spec.build",
                "build.source.ddl, build.source.maven and build.git are mutually exclusive",
            )),
        }

        if let Some(ddl) = &source.ddl {
            if ddl.trim().is_empty() {
                errors.push(SpecValidationError::new(
                    "spec.build.source.ddl",
                    "ddl must not be empty",
                ));
            }
        }

        if let Some(git) = &self.build.git {
            if git.uri.trim().is_empty() {
                errors.push(SpecValidationError::new(
                    "spec.build.git.uri",
                    "git uri must not be empty",
                ));
            }
        }

        for dep in &source.dependencies {
            if dep.split(':').count() < 3 {
                errors.push(SpecValidationError::new(
                    "spec.build.source.dependencies",
                    format!("dependency '{dep}' must be in group:artifact:version form"),
                ));
            }
        }

        for change in &self.build.source_file_changes {
            if change.relative_path.trim().is_empty() || change.relative_path.starts_with('/') {
                errors.push(SpecValidationError::new(
                    "spec.build.sourceFileChanges[].relativePath",
                    format!("'{}' must be a non-empty relative path", change.relative_path),
                ));
            }
        }

        for env in &self.env {
            if env.name.trim().is_empty() {
                errors.push(SpecValidationError::new(
                    "spec.env[].name",
                    "environment variable name must not be empty",
                ));
                continue;
            }
            let from_count = env.value_from.as_ref().map_or(0, |from| {
                usize::from(from.secret_key_ref.is_some())
                    + usize::from(from.config_map_key_ref.is_some())
            });
            if env.value.is_some() && env.value_from.is_some() {
                errors.push(SpecValidationError::new(
                    format!("spec.env[{}]", env.name),
                    "value and valueFrom are mutually exclusive",
                ));
            } else if env.value_from.is_some() && from_count != 1 {
                errors.push(SpecValidationError::new(
                    format!("spec.env[{}].valueFrom", env.name),
                    "valueFrom needs exactly one of secretKeyRef or configMapKeyRef",
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Name of the cache store, when one is requested
    pub fn cache_store_name(&self, vdb_name: &str) -> Option<String> {
        self.cache_store
            .as_ref()
            .filter(|c| c.enabled)
            .map(|c| c.name.clone().unwrap_or_else(|| format!("{vdb_name}-cache")))
    }
}

/// Status subresource of a VirtualDatabase, owned by the operator
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VirtualDatabaseStatus {
    #[serde(default)]
    pub phase: Phase,

    /// Spec digest the current pipeline run was started for
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub digest: String,

    /// Digest over resolved secret and config map values
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub config_digest: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,

    /// Human-readable failure, empty when healthy
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub failure: String,

    /// External URL, set once a route is admitted
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub route: String,

    /// RFC3339 time the current phase was entered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase_entered_at: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    #[serde(default)]
    pub replicas: i32,

    #[serde(default)]
    pub ready_replicas: i32,
}

impl VirtualDatabase {
    /// Current phase, treating a missing status as `Initial`
    pub fn phase(&self) -> Phase {
        self.status.as_ref().map(|s| s.phase).unwrap_or_default()
    }

    /// Mutable status, created on first access
    pub fn status_mut(&mut self) -> &mut VirtualDatabaseStatus {
        self.status.get_or_insert_with(Default::default)
    }
}
