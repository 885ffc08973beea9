//! OpenShift image builds for VirtualDatabase
//!
//! Two BuildConfigs per VDB: `<name>-builder` layers the runtime onto the
//! configured base image, `<name>` runs a source-to-image build of the VDB
//! itself on top of that. Every started build is annotated with the spec
//! digest it was started for, so polling never picks up a build of an older
//! spec.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{
    Api, ApiResource, DynamicObject, ListParams, Patch, PatchParams, PostParams,
};
use kube::{Client, ResourceExt};
use serde_json::json;
use tracing::{debug, info, instrument};

use super::collaborators::{BuildKind, BuildPhase, BuildTrigger};
use super::resources::{api_resource, owner_reference, standard_labels, FIELD_MANAGER};
use crate::crd::VirtualDatabase;
use crate::error::{Error, Result};

/// Annotation recording the spec digest a build was started for
pub const SPEC_DIGEST_ANNOTATION: &str = "teiid.io/spec-digest";

/// Label OpenShift puts on every build of a BuildConfig
const BUILD_CONFIG_LABEL: &str = "openshift.io/build-config.name";

fn build_config_resource() -> ApiResource {
    api_resource("build.openshift.io", "v1", "BuildConfig")
}

fn build_resource() -> ApiResource {
    api_resource("build.openshift.io", "v1", "Build")
}

fn image_stream_resource() -> ApiResource {
    api_resource("image.openshift.io", "v1", "ImageStream")
}

pub fn build_config_name(vdb: &VirtualDatabase, kind: BuildKind) -> String {
    match kind {
        BuildKind::Base => format!("{}-builder", vdb.name_any()),
        BuildKind::Service => vdb.name_any(),
    }
}

fn spec_digest(vdb: &VirtualDatabase) -> String {
    vdb.status
        .as_ref()
        .map(|s| s.digest.clone())
        .unwrap_or_default()
}

fn meta(vdb: &VirtualDatabase, name: String) -> ObjectMeta {
    ObjectMeta {
        name: Some(name),
        namespace: vdb.namespace(),
        labels: Some(standard_labels(vdb)),
        owner_references: Some(vec![owner_reference(vdb)]),
        ..Default::default()
    }
}

pub fn build_image_stream(vdb: &VirtualDatabase, kind: BuildKind) -> DynamicObject {
    let name = build_config_name(vdb, kind);
    let mut obj = DynamicObject::new(&name, &image_stream_resource());
    obj.metadata = meta(vdb, name);
    obj.data = json!({ "spec": { "lookupPolicy": { "local": true } } });
    obj
}

/// Environment the service build sees; maven coordinates are fetched by the
/// builder rather than packaged
fn service_build_env(vdb: &VirtualDatabase) -> Vec<serde_json::Value> {
    let source = &vdb.spec.build.source;
    let mut env = vec![json!({ "name": "VDB_RUNTIME", "value": vdb.spec.runtime.type_ })];
    if let Some(maven) = &source.maven {
        env.push(json!({ "name": "VDB_MAVEN_ARTIFACT", "value": maven }));
    }
    if !source.dependencies.is_empty() {
        env.push(json!({
            "name": "VDB_MAVEN_DEPENDENCIES",
            "value": source.dependencies.join(","),
        }));
    }
    env
}

pub fn build_build_config(vdb: &VirtualDatabase, kind: BuildKind, base_image: &str) -> DynamicObject {
    let name = build_config_name(vdb, kind);
    let mut obj = DynamicObject::new(&name, &build_config_resource());
    obj.metadata = meta(vdb, name.clone());

    let output = json!({ "to": { "kind": "ImageStreamTag", "name": format!("{name}:latest") } });
    obj.data = match kind {
        BuildKind::Base => json!({
            "spec": {
                "runPolicy": "Serial",
                "source": {
                    "type": "Dockerfile",
                    "dockerfile": format!(
                        "FROM {base_image}\nLABEL io.teiid.runtime={}-{}\n",
                        vdb.spec.runtime.type_, vdb.spec.runtime.version
                    ),
                },
                "strategy": { "type": "Docker", "dockerStrategy": {} },
                "output": output,
            }
        }),
        BuildKind::Service => {
            let source = match &vdb.spec.build.git {
                Some(git) => {
                    let mut source = json!({
                        "type": "Git",
                        "git": { "uri": git.uri },
                    });
                    if let Some(reference) = &git.reference {
                        source["git"]["ref"] = json!(reference);
                    }
                    if let Some(dir) = &git.context_dir {
                        source["contextDir"] = json!(dir);
                    }
                    source
                }
                None => json!({ "type": "Binary", "binary": {} }),
            };
            json!({
                "spec": {
                    "runPolicy": "Serial",
                    "source": source,
                    "strategy": {
                        "type": "Source",
                        "sourceStrategy": {
                            "from": {
                                "kind": "ImageStreamTag",
                                "name": format!("{}:latest", build_config_name(vdb, BuildKind::Base)),
                            },
                            "env": service_build_env(vdb),
                            "incremental": true,
                        },
                    },
                    "output": output,
                }
            })
        }
    };
    obj
}

/// Most recent build started for `digest`
pub fn latest_build_phase(builds: &[DynamicObject], digest: &str) -> Option<BuildPhase> {
    builds
        .iter()
        .filter(|b| b.annotations().get(SPEC_DIGEST_ANNOTATION).map(String::as_str) == Some(digest))
        .max_by(|a, b| {
            a.metadata
                .creation_timestamp
                .as_ref()
                .map(|t| t.0)
                .cmp(&b.metadata.creation_timestamp.as_ref().map(|t| t.0))
        })
        .and_then(|b| b.data.pointer("/status/phase"))
        .and_then(|p| p.as_str())
        .and_then(BuildPhase::parse)
}

/// [`BuildTrigger`] backed by OpenShift BuildConfigs
pub struct KubeBuilds {
    client: Client,
    base_image: String,
}

impl KubeBuilds {
    pub fn new(client: Client, base_image: impl Into<String>) -> Self {
        Self {
            client,
            base_image: base_image.into(),
        }
    }

    fn api(&self, vdb: &VirtualDatabase, ar: &ApiResource) -> Api<DynamicObject> {
        let namespace = vdb.namespace().unwrap_or_else(|| "default".to_string());
        Api::namespaced_with(self.client.clone(), &namespace, ar)
    }

    async fn apply(&self, api: &Api<DynamicObject>, obj: &DynamicObject) -> Result<()> {
        api.patch(
            &obj.name_any(),
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(obj),
        )
        .await
        .map_err(|e| match e {
            kube::Error::Api(ae) if ae.code == 404 => Error::ConfigError(format!(
                "{} is not served by this cluster; OpenShift builds are required",
                obj.types.as_ref().map(|t| t.kind.as_str()).unwrap_or("build kind")
            )),
            e => Error::KubeError(e),
        })?;
        Ok(())
    }
}

#[async_trait]
impl BuildTrigger for KubeBuilds {
    #[instrument(skip(self, vdb), fields(name = %vdb.name_any(), namespace = vdb.namespace()))]
    async fn ensure_build_definition(&self, vdb: &VirtualDatabase, kind: BuildKind) -> Result<()> {
        let streams = self.api(vdb, &image_stream_resource());
        self.apply(&streams, &build_image_stream(vdb, kind)).await?;

        let configs = self.api(vdb, &build_config_resource());
        self.apply(&configs, &build_build_config(vdb, kind, &self.base_image))
            .await?;
        debug!("Build definition {} is up to date", build_config_name(vdb, kind));
        Ok(())
    }

    #[instrument(skip(self, vdb, archive), fields(name = %vdb.name_any(), namespace = vdb.namespace()))]
    async fn trigger_build(
        &self,
        vdb: &VirtualDatabase,
        kind: BuildKind,
        archive: Option<Vec<u8>>,
    ) -> Result<String> {
        let config = build_config_name(vdb, kind);
        let digest = spec_digest(vdb);
        let configs = self.api(vdb, &build_config_resource());

        let mut annotations = BTreeMap::new();
        annotations.insert(SPEC_DIGEST_ANNOTATION.to_string(), digest.clone());

        let build: DynamicObject = match archive {
            Some(bytes) => {
                configs
                    .create_subresource("instantiatebinary", &config, &PostParams::default(), bytes)
                    .await?
            }
            None => {
                let request = json!({
                    "kind": "BuildRequest",
                    "apiVersion": "build.openshift.io/v1",
                    "metadata": { "name": config, "annotations": annotations },
                });
                configs
                    .create_subresource(
                        "instantiate",
                        &config,
                        &PostParams::default(),
                        serde_json::to_vec(&request)?,
                    )
                    .await?
            }
        };

        // Binary instantiation cannot carry annotations, so stamp them afterwards.
        let name = build.name_any();
        let builds = self.api(vdb, &build_resource());
        builds
            .patch(
                &name,
                &PatchParams::default(),
                &Patch::Merge(json!({ "metadata": { "annotations": annotations } })),
            )
            .await?;

        info!("Triggered build {} from {} for digest {}", name, config, digest);
        Ok(name)
    }

    async fn poll_build_phase(
        &self,
        vdb: &VirtualDatabase,
        kind: BuildKind,
    ) -> Result<Option<BuildPhase>> {
        let builds = self.api(vdb, &build_resource());
        let selector = format!("{}={}", BUILD_CONFIG_LABEL, build_config_name(vdb, kind));
        let list = builds.list(&ListParams::default().labels(&selector)).await?;
        Ok(latest_build_phase(&list.items, &spec_digest(vdb)))
    }
}
