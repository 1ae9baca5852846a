//! Source kinds and the per-resource descriptors built from them.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::cluster::{Resource, ResourceKind};
use crate::decode::DecodeFormat;
use crate::error::ExporterError;

/// A category of cluster resource scanned for certificate material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Opaque secrets holding PEM certificates (`tls.crt`, `ca.crt`)
    Secret,
    /// Secrets holding a password-protected Java keystore
    Keystore,
    /// Config maps holding PEM certificates
    ConfigMap,
    /// cert-manager `CertificateRequest` objects
    CertRequest,
}

impl SourceKind {
    pub const ALL: [SourceKind; 4] = [
        SourceKind::Secret,
        SourceKind::Keystore,
        SourceKind::ConfigMap,
        SourceKind::CertRequest,
    ];

    /// Short name used in metric names and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Secret => "secret",
            SourceKind::Keystore => "keystore",
            SourceKind::ConfigMap => "configmap",
            SourceKind::CertRequest => "certrequest",
        }
    }

    /// The cluster object listed for this kind.
    pub fn resource_kind(&self) -> ResourceKind {
        match self {
            SourceKind::Secret | SourceKind::Keystore => ResourceKind::Secret,
            SourceKind::ConfigMap => ResourceKind::ConfigMap,
            SourceKind::CertRequest => ResourceKind::CertificateRequest,
        }
    }

    pub fn format(&self) -> DecodeFormat {
        match self {
            SourceKind::Keystore => DecodeFormat::Jks,
            SourceKind::Secret | SourceKind::ConfigMap | SourceKind::CertRequest => {
                DecodeFormat::Pem
            }
        }
    }

    pub fn default_keys(&self) -> Vec<String> {
        let keys: &[&str] = match self {
            SourceKind::Secret => &["tls.crt", "ca.crt"],
            SourceKind::Keystore => &["keystore.jks"],
            SourceKind::ConfigMap => &["ca.crt"],
            SourceKind::CertRequest => &["certificate"],
        };
        keys.iter().map(|k| k.to_string()).collect()
    }

    /// Whether samples of this kind carry a `key_name` label.
    pub fn has_key_label(&self) -> bool {
        !matches!(self, SourceKind::CertRequest)
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Weak by-name reference to the secret holding a keystore passphrase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassphraseRef {
    /// Secret name, looked up in the primary resource's namespace
    pub secret_name: String,
    /// Data key of the passphrase inside that secret
    pub key: String,
}

/// What to extract from one listed resource during the current poll cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDescriptor {
    pub namespace: String,
    pub resource_name: String,
    /// Data keys present on the resource that match the configured keys
    pub data_keys: Vec<String>,
    pub format: DecodeFormat,
    pub passphrase: Option<PassphraseRef>,
}

impl SourceDescriptor {
    /// Builds the descriptor for `resource`.
    ///
    /// `keys` may contain `*` to match every data key. Keystore resources must
    /// name their passphrase secret through `annotation_key`.
    pub fn describe(
        kind: SourceKind,
        resource: &Resource,
        keys: &[String],
        annotation_key: &str,
        password_key: &str,
    ) -> Result<SourceDescriptor, ExporterError> {
        let data_keys: Vec<String> = if keys.iter().any(|k| k == "*") {
            resource.data.keys().cloned().collect()
        } else {
            keys.iter()
                .filter(|k| resource.data.contains_key(k.as_str()))
                .cloned()
                .collect()
        };
        if data_keys.is_empty() {
            return Err(ExporterError::MissingKey {
                namespace: resource.namespace.clone(),
                name: resource.name.clone(),
                key: keys.join(","),
            });
        }

        let format = kind.format();
        let passphrase = if format.needs_passphrase() {
            match resource.annotations.get(annotation_key) {
                Some(secret_name) if !secret_name.trim().is_empty() => Some(PassphraseRef {
                    secret_name: secret_name.trim().to_string(),
                    key: password_key.to_string(),
                }),
                _ => {
                    return Err(ExporterError::MissingAnnotation {
                        namespace: resource.namespace.clone(),
                        name: resource.name.clone(),
                        annotation: annotation_key.to_string(),
                    })
                }
            }
        } else {
            None
        };

        Ok(SourceDescriptor {
            namespace: resource.namespace.clone(),
            resource_name: resource.name.clone(),
            data_keys,
            format,
            passphrase,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_describe_pem_secret() {
        let resource = Resource::new("prod", "web-tls")
            .with_data("tls.crt", b"pem".to_vec())
            .with_data("tls.key", b"key".to_vec());

        let descriptor = SourceDescriptor::describe(
            SourceKind::Secret,
            &resource,
            &keys(&["tls.crt", "ca.crt"]),
            "password-secret-ref",
            "password",
        )
        .unwrap();

        assert_eq!(descriptor.data_keys, keys(&["tls.crt"]));
        assert_eq!(descriptor.format, DecodeFormat::Pem);
        assert_eq!(descriptor.passphrase, None);
    }

    #[test]
    fn test_describe_wildcard_keys() {
        let resource = Resource::new("prod", "bundle")
            .with_data("a.pem", b"a".to_vec())
            .with_data("b.pem", b"b".to_vec());

        let descriptor = SourceDescriptor::describe(
            SourceKind::ConfigMap,
            &resource,
            &keys(&["*"]),
            "password-secret-ref",
            "password",
        )
        .unwrap();

        assert_eq!(descriptor.data_keys, keys(&["a.pem", "b.pem"]));
    }

    #[test]
    fn test_describe_missing_key() {
        let resource = Resource::new("prod", "other").with_data("foo", b"bar".to_vec());

        let err = SourceDescriptor::describe(
            SourceKind::Secret,
            &resource,
            &keys(&["tls.crt"]),
            "password-secret-ref",
            "password",
        )
        .unwrap_err();

        assert!(matches!(err, ExporterError::MissingKey { ref key, .. } if key == "tls.crt"));
    }

    #[test]
    fn test_describe_keystore_resolves_annotation() {
        let resource = Resource::new("prod", "app-keystore")
            .with_data("keystore.jks", vec![0xfe, 0xed])
            .with_annotation("password-secret-ref", "app-keystore-pw");

        let descriptor = SourceDescriptor::describe(
            SourceKind::Keystore,
            &resource,
            &keys(&["keystore.jks"]),
            "password-secret-ref",
            "password",
        )
        .unwrap();

        assert_eq!(
            descriptor.passphrase,
            Some(PassphraseRef {
                secret_name: "app-keystore-pw".to_string(),
                key: "password".to_string(),
            })
        );
    }

    #[test]
    fn test_describe_keystore_empty_annotation() {
        let resource = Resource::new("prod", "app-keystore")
            .with_data("keystore.jks", vec![0xfe, 0xed])
            .with_annotation("password-secret-ref", "");

        let err = SourceDescriptor::describe(
            SourceKind::Keystore,
            &resource,
            &keys(&["keystore.jks"]),
            "password-secret-ref",
            "password",
        )
        .unwrap_err();

        assert!(matches!(err, ExporterError::MissingAnnotation { .. }));
    }

    #[test]
    fn test_kind_mappings() {
        assert_eq!(SourceKind::Keystore.resource_kind(), ResourceKind::Secret);
        assert_eq!(SourceKind::Keystore.format(), DecodeFormat::Jks);
        assert!(!SourceKind::CertRequest.has_key_label());
        assert_eq!(SourceKind::ConfigMap.to_string(), "configmap");
    }
}
