//! Integration tests for the public API

use cert_exporter::decode::DecodeFormat;
use cert_exporter::test_helpers::{CertificateBuilder, JksBuilder};
use cert_exporter::{CertificateFact, ExporterError, SourceKind};

#[test]
fn test_public_api_compiles() {
    fn decode_facts(raw: &[u8]) -> Result<Vec<CertificateFact>, ExporterError> {
        let decoded = DecodeFormat::Pem.decode(raw, None)?;
        decoded
            .certificates
            .iter()
            .map(|cert| CertificateFact::from_x509(cert))
            .collect()
    }

    let cert = CertificateBuilder::new("api.example.com").build();
    let facts = decode_facts(&cert.to_pem().unwrap()).unwrap();
    assert_eq!(facts.len(), 1);
    assert_eq!(facts[0].common_name, "api.example.com");
}

#[test]
fn test_error_types_are_public() {
    fn handle_error(err: ExporterError) -> String {
        match err {
            ExporterError::Listing { namespace, .. } => {
                format!("Listing failed in {}", namespace)
            }
            ExporterError::MissingKey { name, key, .. } => {
                format!("{} has no key {}", name, key)
            }
            ExporterError::MissingAnnotation {
                name, annotation, ..
            } => format!("{} has no annotation {}", name, annotation),
            ExporterError::Fetch { name, details, .. } => {
                format!("Fetch of {} failed: {}", name, details)
            }
            ExporterError::Decode { reason } => format!("Decode error: {}", reason),
            ExporterError::Parse { reason } => format!("Parse error: {}", reason),
            ExporterError::ClientConstruction { details } => {
                format!("Client error: {}", details)
            }
            ExporterError::Metrics { details } => format!("Metrics error: {}", details),
            ExporterError::OpenSSLError { details } => format!("OpenSSL error: {}", details),
            ExporterError::IoError { source } => format!("I/O error: {}", source),
            ExporterError::Other { message } => format!("Other: {}", message),
        }
    }

    let err = ExporterError::MissingAnnotation {
        namespace: "prod".to_string(),
        name: "app-keystore".to_string(),
        annotation: "cert-exporter.io/password-secret-ref".to_string(),
    };
    assert_eq!(
        handle_error(err),
        "app-keystore has no annotation cert-exporter.io/password-secret-ref"
    );
}

#[test]
fn test_keystore_requires_passphrase() {
    let cert = CertificateBuilder::new("api.example.com").build();
    let raw = JksBuilder::new()
        .private_key("api", &[&cert])
        .trusted_certificate("root", &cert)
        .build("changeit");

    assert!(SourceKind::Keystore.format().needs_passphrase());
    assert!(matches!(
        DecodeFormat::Jks.decode(&raw, None),
        Err(ExporterError::Decode { .. })
    ));
    assert!(matches!(
        DecodeFormat::Jks.decode(&raw, Some("wrong")),
        Err(ExporterError::Decode { .. })
    ));

    let decoded = DecodeFormat::Jks.decode(&raw, Some("changeit")).unwrap();
    assert_eq!(decoded.certificates.len(), 1);
    assert!(decoded.rejected.is_empty());
}
