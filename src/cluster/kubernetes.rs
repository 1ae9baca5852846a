//! [`ResourceClient`] backed by the Kubernetes API.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use base64::Engine;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{ApiResource, DynamicObject, GroupVersionKind, ListParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config};
use tracing::{debug, warn};

use super::{Resource, ResourceClient, ResourceKind};
use crate::error::ExporterError;

/// Data key under which a certificate request's issued certificate is exposed.
pub const CERT_REQUEST_CERTIFICATE_KEY: &str = "certificate";

/// Cluster client talking to the Kubernetes API server.
#[derive(Clone)]
pub struct KubeClient {
    client: Client,
    cert_requests: ApiResource,
}

impl KubeClient {
    /// Builds a client from an explicit kubeconfig, or infers the
    /// configuration (in-cluster service account, `KUBECONFIG`, `~/.kube/config`).
    ///
    /// Failure here is fatal for every checker.
    pub async fn connect(kubeconfig: Option<&Path>) -> Result<Self, ExporterError> {
        let config = match kubeconfig {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                    ExporterError::ClientConstruction {
                        details: format!("failed to read kubeconfig {}: {}", path.display(), e),
                    }
                })?;
                Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await
                    .map_err(|e| ExporterError::ClientConstruction {
                        details: e.to_string(),
                    })?
            }
            None => Config::infer()
                .await
                .map_err(|e| ExporterError::ClientConstruction {
                    details: e.to_string(),
                })?,
        };
        debug!(cluster_url = %config.cluster_url, "building kubernetes client");

        let client = Client::try_from(config).map_err(|e| ExporterError::ClientConstruction {
            details: e.to_string(),
        })?;
        Ok(Self::from_client(client))
    }

    pub fn from_client(client: Client) -> Self {
        KubeClient {
            client,
            cert_requests: ApiResource::from_gvk(&GroupVersionKind::gvk(
                "cert-manager.io",
                "v1",
                "CertificateRequest",
            )),
        }
    }

    fn secrets(&self, namespace: &str) -> Api<Secret> {
        if namespace.is_empty() {
            Api::all(self.client.clone())
        } else {
            Api::namespaced(self.client.clone(), namespace)
        }
    }

    fn config_maps(&self, namespace: &str) -> Api<ConfigMap> {
        if namespace.is_empty() {
            Api::all(self.client.clone())
        } else {
            Api::namespaced(self.client.clone(), namespace)
        }
    }

    fn certificate_requests(&self, namespace: &str) -> Api<DynamicObject> {
        if namespace.is_empty() {
            Api::all_with(self.client.clone(), &self.cert_requests)
        } else {
            Api::namespaced_with(self.client.clone(), namespace, &self.cert_requests)
        }
    }
}

#[async_trait]
impl ResourceClient for KubeClient {
    async fn list(
        &self,
        kind: ResourceKind,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<Resource>, ExporterError> {
        let mut params = ListParams::default();
        if !label_selector.is_empty() {
            params = params.labels(label_selector);
        }
        let listing_error = |e: kube::Error| ExporterError::Listing {
            namespace: namespace.to_string(),
            details: e.to_string(),
        };

        let resources = match kind {
            ResourceKind::Secret => self
                .secrets(namespace)
                .list(&params)
                .await
                .map_err(listing_error)?
                .items
                .into_iter()
                .map(from_secret)
                .collect(),
            ResourceKind::ConfigMap => self
                .config_maps(namespace)
                .list(&params)
                .await
                .map_err(listing_error)?
                .items
                .into_iter()
                .map(from_config_map)
                .collect(),
            ResourceKind::CertificateRequest => self
                .certificate_requests(namespace)
                .list(&params)
                .await
                .map_err(listing_error)?
                .items
                .into_iter()
                .map(from_certificate_request)
                .collect(),
        };
        Ok(resources)
    }

    async fn get(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<Resource, ExporterError> {
        let fetch_error = |e: kube::Error| ExporterError::Fetch {
            namespace: namespace.to_string(),
            name: name.to_string(),
            details: e.to_string(),
        };

        let resource = match kind {
            ResourceKind::Secret => from_secret(
                self.secrets(namespace)
                    .get(name)
                    .await
                    .map_err(fetch_error)?,
            ),
            ResourceKind::ConfigMap => from_config_map(
                self.config_maps(namespace)
                    .get(name)
                    .await
                    .map_err(fetch_error)?,
            ),
            ResourceKind::CertificateRequest => from_certificate_request(
                self.certificate_requests(namespace)
                    .get(name)
                    .await
                    .map_err(fetch_error)?,
            ),
        };
        Ok(resource)
    }
}

fn from_metadata(metadata: ObjectMeta) -> Resource {
    Resource {
        namespace: metadata.namespace.unwrap_or_default(),
        name: metadata.name.unwrap_or_default(),
        labels: metadata.labels.unwrap_or_default(),
        annotations: metadata.annotations.unwrap_or_default(),
        data: BTreeMap::new(),
    }
}

fn from_secret(secret: Secret) -> Resource {
    let mut resource = from_metadata(secret.metadata);
    resource.data = secret
        .data
        .unwrap_or_default()
        .into_iter()
        .map(|(key, value)| (key, value.0))
        .collect();
    resource
}

fn from_config_map(config_map: ConfigMap) -> Resource {
    let mut resource = from_metadata(config_map.metadata);
    resource.data = config_map
        .data
        .unwrap_or_default()
        .into_iter()
        .map(|(key, value)| (key, value.into_bytes()))
        .collect();
    for (key, value) in config_map.binary_data.unwrap_or_default() {
        resource.data.insert(key, value.0);
    }
    resource
}

/// The issued certificate lives base64 encoded in `status.certificate` and is
/// absent until the request has been signed.
fn from_certificate_request(request: DynamicObject) -> Resource {
    let certificate = request
        .data
        .get("status")
        .and_then(|status| status.get("certificate"))
        .and_then(|certificate| certificate.as_str())
        .map(str::to_string);
    let mut resource = from_metadata(request.metadata);

    if let Some(encoded) = certificate {
        match base64::engine::general_purpose::STANDARD.decode(encoded.trim()) {
            Ok(pem) => {
                resource
                    .data
                    .insert(CERT_REQUEST_CERTIFICATE_KEY.to_string(), pem);
            }
            Err(e) => warn!(
                namespace = %resource.namespace,
                name = %resource.name,
                error = %e,
                "certificate request status.certificate is not valid base64"
            ),
        }
    }
    resource
}
