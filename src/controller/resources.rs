//! Kubernetes resource builders for VirtualDatabase
//!
//! This module creates and manages the objects a VDB runs as: the cache store,
//! the Service and Route, the Deployment, and the monitoring integration.
//! Typed objects use `k8s-openapi`; OpenShift and third-party kinds go
//! through `DynamicObject`. Everything namespaced carries an owner reference
//! so it is garbage-collected with the VDB; the cluster-scoped console link
//! is removed by [`KubeWorkloads::cleanup`].

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMapKeySelector, Container, ContainerPort, EnvVar as K8sEnvVar,
    EnvVarSource as K8sEnvVarSource, HTTPGetAction, PodSpec, PodTemplateSpec, Probe,
    ResourceRequirements as K8sResources, SecretKeySelector, SecretVolumeSource, Service,
    ServicePort, ServiceSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::{
    Api, ApiResource, DeleteParams, DynamicObject, GroupVersionKind, Patch, PatchParams,
};
use kube::{Client, Resource, ResourceExt};
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use super::collaborators::{RolloutState, Workloads};
use super::keystore::{self, keystore_secret_name};
use super::store::ObjectKey;
use crate::crd::{EnvVar, VirtualDatabase};
use crate::error::{Error, Result};

pub const FIELD_MANAGER: &str = "vdb-operator";

/// Pod-template annotation carrying the config digest; a new value rolls the pods
pub const CONFIG_DIGEST_ANNOTATION: &str = "teiid.io/config-digest";

pub const HTTP_PORT: i32 = 8080;
pub const JDBC_PORT: i32 = 31000;
pub const PG_PORT: i32 = 35432;

const INTERNAL_REGISTRY: &str = "image-registry.openshift-image-registry.svc:5000";
const KEYSTORE_MOUNT_PATH: &str = "/etc/tls/private";

/// Get the standard labels for a VDB's resources
pub fn standard_labels(vdb: &VirtualDatabase) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(
        "app.kubernetes.io/name".to_string(),
        "virtual-database".to_string(),
    );
    labels.insert("app.kubernetes.io/instance".to_string(), vdb.name_any());
    labels.insert(
        "app.kubernetes.io/managed-by".to_string(),
        FIELD_MANAGER.to_string(),
    );
    labels.insert("teiid.io/vdb".to_string(), vdb.name_any());
    labels
}

/// Create an OwnerReference for garbage collection
pub fn owner_reference(vdb: &VirtualDatabase) -> OwnerReference {
    OwnerReference {
        api_version: VirtualDatabase::api_version(&()).to_string(),
        kind: VirtualDatabase::kind(&()).to_string(),
        name: vdb.name_any(),
        uid: vdb.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

fn object_meta(vdb: &VirtualDatabase, name: String) -> ObjectMeta {
    ObjectMeta {
        name: Some(name),
        namespace: vdb.namespace(),
        labels: Some(standard_labels(vdb)),
        owner_references: Some(vec![owner_reference(vdb)]),
        ..Default::default()
    }
}

pub(crate) fn api_resource(group: &str, version: &str, kind: &str) -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind {
        group: group.to_string(),
        version: version.to_string(),
        kind: kind.to_string(),
    })
}

fn route_resource() -> ApiResource {
    api_resource("route.openshift.io", "v1", "Route")
}

fn infinispan_resource() -> ApiResource {
    api_resource("infinispan.org", "v1", "Infinispan")
}

fn service_monitor_resource() -> ApiResource {
    api_resource("monitoring.coreos.com", "v1", "ServiceMonitor")
}

fn console_link_resource() -> ApiResource {
    api_resource("console.openshift.io", "v1", "ConsoleLink")
}

/// 404 on a write to a dynamic kind means its CRD is not installed
pub(crate) fn is_missing_kind(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}

/// Image the service build pushes and the Deployment runs
pub fn service_image(vdb: &VirtualDatabase) -> String {
    let namespace = vdb.namespace().unwrap_or_else(|| "default".to_string());
    format!("{INTERNAL_REGISTRY}/{namespace}/{}:latest", vdb.name_any())
}

// ============================================================================
// Cache store
// ============================================================================

pub fn build_cache_store(vdb: &VirtualDatabase, name: &str) -> DynamicObject {
    let mut obj = DynamicObject::new(name, &infinispan_resource());
    obj.metadata = object_meta(vdb, name.to_string());
    obj.data = json!({
        "spec": {
            "replicas": 1,
            "service": { "type": "DataGrid" },
        }
    });
    obj
}

/// The Infinispan operator reports readiness through a `WellFormed` condition
pub fn cache_store_ready(obj: &DynamicObject) -> bool {
    obj.data
        .pointer("/status/conditions")
        .and_then(|c| c.as_array())
        .map(|conditions| {
            conditions.iter().any(|c| {
                c.get("type").and_then(|t| t.as_str()) == Some("WellFormed")
                    && c.get("status").and_then(|s| s.as_str()) == Some("True")
            })
        })
        .unwrap_or(false)
}

// ============================================================================
// Service and Route
// ============================================================================

pub fn build_service(vdb: &VirtualDatabase) -> Service {
    let port = |name: &str, port: i32| ServicePort {
        name: Some(name.to_string()),
        port,
        target_port: Some(IntOrString::Int(port)),
        ..Default::default()
    };

    Service {
        metadata: object_meta(vdb, vdb.name_any()),
        spec: Some(ServiceSpec {
            selector: Some(standard_labels(vdb)),
            ports: Some(vec![
                port("http", HTTP_PORT),
                port("jdbc", JDBC_PORT),
                port("pg", PG_PORT),
            ]),
            ..Default::default()
        }),
        status: None,
    }
}

pub fn build_route(vdb: &VirtualDatabase) -> DynamicObject {
    let name = vdb.name_any();
    let mut obj = DynamicObject::new(&name, &route_resource());
    obj.metadata = object_meta(vdb, name.clone());
    obj.data = json!({
        "spec": {
            "to": { "kind": "Service", "name": name },
            "port": { "targetPort": "http" },
            "tls": {
                "termination": "edge",
                "insecureEdgeTerminationPolicy": "Redirect",
            },
        }
    });
    obj
}

/// Host of the first router that admitted the Route
pub fn admitted_host(route: &DynamicObject) -> Option<String> {
    route
        .data
        .pointer("/status/ingress")?
        .as_array()?
        .iter()
        .find(|ingress| {
            ingress
                .get("conditions")
                .and_then(|c| c.as_array())
                .map(|conditions| {
                    conditions.iter().any(|c| {
                        c.get("type").and_then(|t| t.as_str()) == Some("Admitted")
                            && c.get("status").and_then(|s| s.as_str()) == Some("True")
                    })
                })
                .unwrap_or(false)
        })
        .and_then(|ingress| ingress.get("host"))
        .and_then(|h| h.as_str())
        .filter(|h| !h.is_empty())
        .map(str::to_string)
}

// ============================================================================
// Deployment
// ============================================================================

fn container_env(env: &[EnvVar]) -> Vec<K8sEnvVar> {
    env.iter()
        .map(|e| K8sEnvVar {
            name: e.name.clone(),
            value: e.value.clone(),
            value_from: e.value_from.as_ref().map(|from| K8sEnvVarSource {
                secret_key_ref: from.secret_key_ref.as_ref().map(|r| SecretKeySelector {
                    name: Some(r.name.clone()),
                    key: r.key.clone(),
                    ..Default::default()
                }),
                config_map_key_ref: from.config_map_key_ref.as_ref().map(|r| {
                    ConfigMapKeySelector {
                        name: Some(r.name.clone()),
                        key: r.key.clone(),
                        ..Default::default()
                    }
                }),
                ..Default::default()
            }),
        })
        .collect()
}

fn build_container(vdb: &VirtualDatabase) -> Container {
    let resources = &vdb.spec.resources;
    let mut requests = BTreeMap::new();
    requests.insert("cpu".to_string(), Quantity(resources.requests.cpu.clone()));
    requests.insert(
        "memory".to_string(),
        Quantity(resources.requests.memory.clone()),
    );
    let mut limits = BTreeMap::new();
    limits.insert("cpu".to_string(), Quantity(resources.limits.cpu.clone()));
    limits.insert(
        "memory".to_string(),
        Quantity(resources.limits.memory.clone()),
    );

    let version = vdb
        .status
        .as_ref()
        .map(|s| s.version.clone())
        .unwrap_or_default();
    let mut env = vec![
        K8sEnvVar {
            name: "VDB_VERSION".to_string(),
            value: Some(version),
            ..Default::default()
        },
        K8sEnvVar {
            name: "KEYSTORE_PATH".to_string(),
            value: Some(KEYSTORE_MOUNT_PATH.to_string()),
            ..Default::default()
        },
    ];
    env.extend(container_env(&vdb.spec.env));

    let port = |name: &str, port: i32| ContainerPort {
        name: Some(name.to_string()),
        container_port: port,
        ..Default::default()
    };

    Container {
        name: "vdb".to_string(),
        image: Some(service_image(vdb)),
        image_pull_policy: Some("Always".to_string()),
        ports: Some(vec![
            port("http", HTTP_PORT),
            port("jdbc", JDBC_PORT),
            port("pg", PG_PORT),
        ]),
        env: Some(env),
        resources: Some(K8sResources {
            requests: Some(requests),
            limits: Some(limits),
            ..Default::default()
        }),
        readiness_probe: Some(Probe {
            http_get: Some(HTTPGetAction {
                path: Some("/actuator/health".to_string()),
                port: IntOrString::Int(HTTP_PORT),
                ..Default::default()
            }),
            initial_delay_seconds: Some(30),
            period_seconds: Some(10),
            ..Default::default()
        }),
        volume_mounts: Some(vec![VolumeMount {
            name: "keystore".to_string(),
            mount_path: KEYSTORE_MOUNT_PATH.to_string(),
            read_only: Some(true),
            ..Default::default()
        }]),
        ..Default::default()
    }
}

pub fn build_deployment(vdb: &VirtualDatabase, config_digest: &str) -> Deployment {
    let labels = standard_labels(vdb);

    let mut annotations = BTreeMap::new();
    annotations.insert(
        CONFIG_DIGEST_ANNOTATION.to_string(),
        config_digest.to_string(),
    );

    Deployment {
        metadata: object_meta(vdb, vdb.name_any()),
        spec: Some(DeploymentSpec {
            replicas: Some(vdb.spec.replicas),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    annotations: Some(annotations),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![build_container(vdb)],
                    volumes: Some(vec![Volume {
                        name: "keystore".to_string(),
                        secret: Some(SecretVolumeSource {
                            secret_name: Some(keystore_secret_name(vdb)),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    }
}

/// Replica counts of a Deployment; nothing counts as updated until the
/// controller has observed the latest generation
pub fn rollout_from(deployment: &Deployment) -> RolloutState {
    let desired = deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1);
    let Some(status) = deployment.status.as_ref() else {
        return RolloutState {
            desired,
            ..Default::default()
        };
    };

    let observed = status.observed_generation.unwrap_or_default();
    let current = deployment.metadata.generation.unwrap_or_default();
    let updated = if observed < current {
        0
    } else {
        status.updated_replicas.unwrap_or_default()
    };

    RolloutState {
        desired,
        updated,
        ready: status.ready_replicas.unwrap_or_default(),
        available: status.available_replicas.unwrap_or_default(),
    }
}

// ============================================================================
// Monitoring
// ============================================================================

pub fn build_service_monitor(vdb: &VirtualDatabase) -> DynamicObject {
    let name = vdb.name_any();
    let mut obj = DynamicObject::new(&name, &service_monitor_resource());
    obj.metadata = object_meta(vdb, name);
    obj.data = json!({
        "spec": {
            "selector": { "matchLabels": standard_labels(vdb) },
            "endpoints": [{
                "port": "http",
                "path": "/actuator/prometheus",
                "interval": "30s",
            }],
        }
    });
    obj
}

pub fn console_link_name(key: &ObjectKey) -> String {
    format!("{}-{}", key.namespace, key.name)
}

/// Namespace-dashboard link to the VDB's external URL
pub fn build_console_link(vdb: &VirtualDatabase, href: &str) -> DynamicObject {
    let key = ObjectKey::from_resource(vdb);
    let name = console_link_name(&key);
    let mut obj = DynamicObject::new(&name, &console_link_resource());
    obj.metadata = ObjectMeta {
        name: Some(name),
        labels: Some(standard_labels(vdb)),
        ..Default::default()
    };
    obj.data = json!({
        "spec": {
            "href": href,
            "location": "NamespaceDashboard",
            "text": format!("{} OpenAPI", key.name),
            "namespaceDashboard": { "namespaces": [key.namespace] },
        }
    });
    obj
}

// ============================================================================
// Workloads backed by the cluster
// ============================================================================

/// [`Workloads`] backed by the Kubernetes API
pub struct KubeWorkloads {
    client: Client,
}

impl KubeWorkloads {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn dynamic(&self, vdb: &VirtualDatabase, ar: &ApiResource) -> Api<DynamicObject> {
        let namespace = vdb.namespace().unwrap_or_else(|| "default".to_string());
        Api::namespaced_with(self.client.clone(), &namespace, ar)
    }

    async fn apply_dynamic(&self, api: &Api<DynamicObject>, obj: &DynamicObject) -> Result<()> {
        api.patch(
            &obj.name_any(),
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(obj),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl Workloads for KubeWorkloads {
    #[instrument(skip(self, vdb), fields(name = %vdb.name_any(), namespace = vdb.namespace()))]
    async fn ensure_cache_store(&self, vdb: &VirtualDatabase, name: &str) -> Result<bool> {
        let api = self.dynamic(vdb, &infinispan_resource());
        let cache = build_cache_store(vdb, name);
        api.patch(
            name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(&cache),
        )
        .await
        .map_err(|e| match e {
            e if is_missing_kind(&e) => Error::ConfigError(
                "Infinispan CRD not installed; install the Infinispan operator or disable cacheStore"
                    .to_string(),
            ),
            e => Error::KubeError(e),
        })?;

        let ready = api
            .get_opt(name)
            .await?
            .map(|obj| cache_store_ready(&obj))
            .unwrap_or(false);
        Ok(ready)
    }

    #[instrument(skip(self, vdb), fields(name = %vdb.name_any(), namespace = vdb.namespace()))]
    async fn ensure_services(&self, vdb: &VirtualDatabase) -> Result<()> {
        let namespace = vdb.namespace().unwrap_or_else(|| "default".to_string());
        let services: Api<Service> = Api::namespaced(self.client.clone(), &namespace);
        services
            .patch(
                &vdb.name_any(),
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(&build_service(vdb)),
            )
            .await?;

        let routes = self.dynamic(vdb, &route_resource());
        if vdb.spec.expose_externally {
            self.apply_dynamic(&routes, &build_route(vdb)).await?;
        } else {
            match routes.delete(&vdb.name_any(), &DeleteParams::default()).await {
                Ok(_) => info!("Removed route for {}/{}", namespace, vdb.name_any()),
                Err(kube::Error::Api(ae)) if ae.code == 404 => {}
                Err(e) => return Err(Error::KubeError(e)),
            }
        }
        Ok(())
    }

    async fn route_host(&self, vdb: &VirtualDatabase) -> Result<Option<String>> {
        let routes = self.dynamic(vdb, &route_resource());
        Ok(routes
            .get_opt(&vdb.name_any())
            .await?
            .and_then(|route| admitted_host(&route)))
    }

    async fn ensure_keystore(&self, vdb: &VirtualDatabase) -> Result<()> {
        keystore::ensure_keystore(&self.client, vdb).await
    }

    #[instrument(skip(self, vdb), fields(name = %vdb.name_any(), namespace = vdb.namespace()))]
    async fn ensure_deployment(&self, vdb: &VirtualDatabase, config_digest: &str) -> Result<()> {
        let namespace = vdb.namespace().unwrap_or_else(|| "default".to_string());
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), &namespace);
        api.patch(
            &vdb.name_any(),
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(&build_deployment(vdb, config_digest)),
        )
        .await?;
        Ok(())
    }

    async fn rollout_state(&self, vdb: &VirtualDatabase) -> Result<Option<RolloutState>> {
        let namespace = vdb.namespace().unwrap_or_else(|| "default".to_string());
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), &namespace);
        Ok(api.get_opt(&vdb.name_any()).await?.as_ref().map(rollout_from))
    }

    /// ServiceMonitor and console link are optional integrations; a cluster
    /// without their CRDs just does not get them.
    async fn ensure_metrics(&self, vdb: &VirtualDatabase) -> Result<()> {
        let monitors = self.dynamic(vdb, &service_monitor_resource());
        match self
            .apply_dynamic(&monitors, &build_service_monitor(vdb))
            .await
        {
            Err(Error::KubeError(e)) if is_missing_kind(&e) => {
                debug!("ServiceMonitor CRD not installed, skipping metrics wiring");
            }
            other => other?,
        }

        let route = vdb
            .status
            .as_ref()
            .map(|s| s.route.as_str())
            .unwrap_or_default();
        if route.is_empty() {
            return Ok(());
        }
        let links: Api<DynamicObject> =
            Api::all_with(self.client.clone(), &console_link_resource());
        let href = format!("{route}/openapi");
        match self
            .apply_dynamic(&links, &build_console_link(vdb, &href))
            .await
        {
            Err(Error::KubeError(e)) if is_missing_kind(&e) => {
                debug!("ConsoleLink CRD not installed, skipping console link");
                Ok(())
            }
            other => other,
        }
    }

    async fn cleanup(&self, key: &ObjectKey) -> Result<()> {
        let links: Api<DynamicObject> =
            Api::all_with(self.client.clone(), &console_link_resource());
        match links
            .delete(&console_link_name(key), &DeleteParams::default())
            .await
        {
            Ok(_) => info!("Deleted console link for {}", key),
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                debug!("No console link for {}", key);
            }
            Err(e) => {
                warn!("Failed to delete console link for {}: {}", key, e);
                return Err(Error::KubeError(e));
            }
        }
        Ok(())
    }
}
