//! Access to the VirtualDatabase objects and the configuration they reference
//!
//! The engine only talks to the cluster through [`ResourceStore`] and
//! [`ConfigResolver`]; the Kubernetes-backed implementations live here too.

use std::fmt;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::{
    api::{Api, ListParams, PostParams},
    Client, ResourceExt,
};
use tracing::debug;

use crate::crd::VirtualDatabase;
use crate::error::{Error, Result};

/// Namespace and name of a VirtualDatabase
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn from_resource(vdb: &VirtualDatabase) -> Self {
        Self::new(
            vdb.namespace().unwrap_or_else(|| "default".to_string()),
            vdb.name_any(),
        )
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Read/write access to VirtualDatabase objects
///
/// Writes must be version-checked: they fail with [`Error::Conflict`] when
/// the stored resourceVersion differs from the one carried by the object
/// being written.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn get(&self, key: &ObjectKey) -> Result<Option<VirtualDatabase>>;

    /// Replace metadata and spec
    async fn update(&self, vdb: &VirtualDatabase) -> Result<VirtualDatabase>;

    async fn update_status(&self, vdb: &VirtualDatabase) -> Result<VirtualDatabase>;

    async fn list(&self, namespace: Option<&str>) -> Result<Vec<VirtualDatabase>>;
}

/// Resolves the current value behind a secret or config map reference
#[async_trait]
pub trait ConfigResolver: Send + Sync {
    async fn resolve_secret_key(&self, namespace: &str, name: &str, key: &str) -> Result<String>;

    async fn resolve_config_map_key(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> Result<String>;
}

/// [`ResourceStore`] backed by the Kubernetes API
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<VirtualDatabase> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ResourceStore for KubeStore {
    async fn get(&self, key: &ObjectKey) -> Result<Option<VirtualDatabase>> {
        self.api(&key.namespace)
            .get_opt(&key.name)
            .await
            .map_err(Error::KubeError)
    }

    async fn update(&self, vdb: &VirtualDatabase) -> Result<VirtualDatabase> {
        let key = ObjectKey::from_resource(vdb);
        self.api(&key.namespace)
            .replace(&key.name, &PostParams::default(), vdb)
            .await
            .map_err(|e| Error::from_write(e, &key.to_string()))
    }

    async fn update_status(&self, vdb: &VirtualDatabase) -> Result<VirtualDatabase> {
        let key = ObjectKey::from_resource(vdb);
        // replace_status carries metadata.resourceVersion, so the API server
        // rejects the write with 409 if anything changed since the fetch.
        let data = serde_json::to_vec(vdb)?;
        self.api(&key.namespace)
            .replace_status(&key.name, &PostParams::default(), data)
            .await
            .map_err(|e| Error::from_write(e, &key.to_string()))
    }

    async fn list(&self, namespace: Option<&str>) -> Result<Vec<VirtualDatabase>> {
        let api: Api<VirtualDatabase> = match namespace {
            Some(ns) => self.api(ns),
            None => Api::all(self.client.clone()),
        };
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(Error::KubeError)?;
        Ok(list.items)
    }
}

/// [`ConfigResolver`] reading Secrets and ConfigMaps from the cluster
pub struct KubeConfigResolver {
    client: Client,
}

impl KubeConfigResolver {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn unresolved(kind: &str, namespace: &str, name: &str, key: &str, message: &str) -> Error {
    Error::UnresolvedReference {
        reference: format!("{kind} {namespace}/{name}[{key}]"),
        message: message.to_string(),
    }
}

#[async_trait]
impl ConfigResolver for KubeConfigResolver {
    async fn resolve_secret_key(&self, namespace: &str, name: &str, key: &str) -> Result<String> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = api
            .get_opt(name)
            .await?
            .ok_or_else(|| unresolved("secret", namespace, name, key, "secret not found"))?;

        if let Some(value) = secret.data.as_ref().and_then(|d| d.get(key)) {
            debug!("Resolved secret key {}/{}[{}]", namespace, name, key);
            return Ok(String::from_utf8_lossy(&value.0).into_owned());
        }
        secret
            .string_data
            .as_ref()
            .and_then(|d| d.get(key))
            .cloned()
            .ok_or_else(|| unresolved("secret", namespace, name, key, "key not present"))
    }

    async fn resolve_config_map_key(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> Result<String> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        let config_map = api
            .get_opt(name)
            .await?
            .ok_or_else(|| unresolved("configmap", namespace, name, key, "config map not found"))?;

        config_map
            .data
            .as_ref()
            .and_then(|d| d.get(key))
            .cloned()
            .ok_or_else(|| unresolved("configmap", namespace, name, key, "key not present"))
    }
}
