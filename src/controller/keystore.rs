//! Keystore material for the VDB's TLS endpoints
//!
//! Each VDB gets a self-signed certificate for its in-cluster service names,
//! stored in the `<name>-keystore` Secret and mounted by the Deployment. The
//! Secret is created once and never rotated by the operator; deleting it
//! makes the next deploy generate a fresh one.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::{
    api::{Api, Patch, PatchParams},
    Client, Resource, ResourceExt,
};
use rcgen::{
    CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, KeyPair,
    KeyUsagePurpose,
};
use tracing::info;

use super::resources::{standard_labels, FIELD_MANAGER};
use crate::crd::VirtualDatabase;
use crate::error::{Error, Result};

pub const TLS_CERT_KEY: &str = "tls.crt";
pub const TLS_KEY_KEY: &str = "tls.key";

pub fn keystore_secret_name(vdb: &VirtualDatabase) -> String {
    format!("{}-keystore", vdb.name_any())
}

/// DNS names the certificate is issued for
pub fn service_dns_names(vdb: &VirtualDatabase) -> Vec<String> {
    let name = vdb.name_any();
    let namespace = vdb.namespace().unwrap_or_else(|| "default".to_string());
    vec![
        name.clone(),
        format!("{name}.{namespace}"),
        format!("{name}.{namespace}.svc"),
        format!("{name}.{namespace}.svc.cluster.local"),
    ]
}

/// Generate a self-signed certificate and key, both PEM encoded
pub fn generate_certificate(common_name: &str, dns_names: Vec<String>) -> Result<(String, String)> {
    let cert_err = |e: rcgen::Error| Error::CertificateError(e.to_string());

    let key_pair = KeyPair::generate().map_err(cert_err)?;
    let mut params = CertificateParams::new(dns_names).map_err(cert_err)?;
    params.distinguished_name = DistinguishedName::new();
    params
        .distinguished_name
        .push(DnType::CommonName, common_name);
    params.key_usages.push(KeyUsagePurpose::DigitalSignature);
    params.key_usages.push(KeyUsagePurpose::KeyEncipherment);
    params
        .extended_key_usages
        .push(ExtendedKeyUsagePurpose::ServerAuth);

    let cert = params.self_signed(&key_pair).map_err(cert_err)?;
    Ok((cert.pem(), key_pair.serialize_pem()))
}

pub fn build_keystore_secret(vdb: &VirtualDatabase) -> Result<Secret> {
    let (cert_pem, key_pem) = generate_certificate(&vdb.name_any(), service_dns_names(vdb))?;

    let mut data = BTreeMap::new();
    data.insert(TLS_CERT_KEY.to_string(), ByteString(cert_pem.into_bytes()));
    data.insert(TLS_KEY_KEY.to_string(), ByteString(key_pem.into_bytes()));

    Ok(Secret {
        metadata: ObjectMeta {
            name: Some(keystore_secret_name(vdb)),
            namespace: vdb.namespace(),
            labels: Some(standard_labels(vdb)),
            owner_references: vdb.controller_owner_ref(&()).map(|r| vec![r]),
            ..Default::default()
        },
        type_: Some("kubernetes.io/tls".to_string()),
        data: Some(data),
        ..Default::default()
    })
}

/// Create the keystore Secret unless it already exists
pub async fn ensure_keystore(client: &Client, vdb: &VirtualDatabase) -> Result<()> {
    let namespace = vdb.namespace().unwrap_or_else(|| "default".to_string());
    let name = keystore_secret_name(vdb);
    let secrets: Api<Secret> = Api::namespaced(client.clone(), &namespace);

    if secrets.get_opt(&name).await?.is_some() {
        return Ok(());
    }

    let secret = build_keystore_secret(vdb)?;
    secrets
        .patch(
            &name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(&secret),
        )
        .await
        .map_err(Error::KubeError)?;

    info!("Created keystore secret {}/{}", namespace, name);
    Ok(())
}
