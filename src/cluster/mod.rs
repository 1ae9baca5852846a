//! Cluster resource access.
//!
//! Checkers only see the flattened [`Resource`] shape: metadata plus a
//! string to bytes data map. [`kubernetes::KubeClient`] maps Kubernetes objects onto
//! it; tests use the in-memory client from `test_helpers`.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;

use crate::error::ExporterError;

pub mod kubernetes;

/// Kubernetes object types the exporter reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Secret,
    ConfigMap,
    /// cert-manager.io/v1 `CertificateRequest`
    CertificateRequest,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Secret => f.write_str("Secret"),
            ResourceKind::ConfigMap => f.write_str("ConfigMap"),
            ResourceKind::CertificateRequest => f.write_str("CertificateRequest"),
        }
    }
}

/// A listed cluster object, reduced to what certificate discovery needs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resource {
    pub namespace: String,
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub data: BTreeMap<String, Vec<u8>>,
}

impl Resource {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Resource {
            namespace: namespace.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: Vec<u8>) -> Self {
        self.data.insert(key.into(), value);
        self
    }
}

/// Read access to the cluster API.
///
/// Implementations return [`ExporterError::Listing`] from `list` and
/// [`ExporterError::Fetch`] from `get`. No retries are expected.
#[async_trait]
pub trait ResourceClient: Send + Sync {
    /// Lists objects of `kind` in `namespace` matching `label_selector`.
    /// An empty namespace lists across all namespaces.
    async fn list(
        &self,
        kind: ResourceKind,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<Resource>, ExporterError>;

    /// Fetches a single object by name.
    async fn get(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<Resource, ExporterError>;
}
