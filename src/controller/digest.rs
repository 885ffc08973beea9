//! Change detection for VirtualDatabase specs
//!
//! Two independent digests are kept in the status:
//!
//! - the **spec digest** covers every build-relevant field. When it changes the
//!   whole pipeline runs again from `Initial`.
//! - the **config digest** covers the resolved values behind secret and config
//!   map references. When it changes while `Running` only the pods are rolled.
//!
//! Both are SHA-256, URL-safe base64 without padding, with a short prefix
//! so they are never mistaken for each other. Each field is length-delimited
//! and fed in a fixed order; changing that order changes every digest.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use sha2::{Digest, Sha256};

use crate::controller::store::ConfigResolver;
use crate::crd::VirtualDatabaseSpec;
use crate::error::Result;

/// Bump to force one redeploy of every VDB after an operator upgrade
pub const ENGINE_VERSION: &str = "vdb-operator/1";

pub const SPEC_DIGEST_PREFIX: &str = "s-";
pub const CONFIG_DIGEST_PREFIX: &str = "c-";

struct DigestWriter(Sha256);

impl DigestWriter {
    fn new() -> Self {
        Self(Sha256::new())
    }

    fn field(&mut self, value: &str) {
        self.0.update((value.len() as u64).to_be_bytes());
        self.0.update(value.as_bytes());
    }

    fn optional(&mut self, value: Option<&str>) {
        match value {
            Some(v) => {
                self.0.update([1u8]);
                self.field(v);
            }
            None => self.0.update([0u8]),
        }
    }

    fn finish(self, prefix: &str) -> String {
        format!("{prefix}{}", URL_SAFE_NO_PAD.encode(self.0.finalize()))
    }
}

/// Digest over the build-relevant parts of `spec`
pub fn spec_digest(spec: &VirtualDatabaseSpec) -> String {
    let mut w = DigestWriter::new();
    let build = &spec.build;

    w.field(ENGINE_VERSION);
    w.optional(build.source.ddl.as_deref());
    w.optional(build.source.openapi.as_deref());
    w.optional(build.source.maven.as_deref());

    w.field(&build.source.dependencies.len().to_string());
    for dep in &build.source.dependencies {
        w.field(dep);
    }

    match &build.git {
        Some(git) => {
            w.field("git");
            w.field(&git.uri);
            w.optional(git.reference.as_deref());
            w.optional(git.context_dir.as_deref());
        }
        None => w.field("no-git"),
    }

    w.field(&build.source_file_changes.len().to_string());
    for change in &build.source_file_changes {
        w.field(&change.relative_path);
        w.field(&change.contents);
    }

    w.optional(spec.version.as_deref());
    w.finish(SPEC_DIGEST_PREFIX)
}

/// Digest over the current values behind every `valueFrom` env entry
///
/// Resolution failures are returned as-is so the caller can record them.
pub async fn config_digest(
    spec: &VirtualDatabaseSpec,
    namespace: &str,
    resolver: &dyn ConfigResolver,
) -> Result<String> {
    let mut w = DigestWriter::new();
    w.field(ENGINE_VERSION);

    for env in &spec.env {
        let Some(from) = &env.value_from else {
            continue;
        };
        let value = if let Some(secret) = &from.secret_key_ref {
            resolver
                .resolve_secret_key(namespace, &secret.name, &secret.key)
                .await?
        } else if let Some(config_map) = &from.config_map_key_ref {
            resolver
                .resolve_config_map_key(namespace, &config_map.name, &config_map.key)
                .await?
        } else {
            continue;
        };
        w.field(&env.name);
        w.field(&value);
    }

    Ok(w.finish(CONFIG_DIGEST_PREFIX))
}
