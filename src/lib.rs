//! Certificate expiry exporter for Kubernetes.
//!
//! Checkers periodically list secrets, config maps and cert-manager
//! certificate requests, decode the certificates stored in them (PEM blocks or
//! password-protected Java keystores) and publish their validity window as
//! Prometheus gauges.

use chrono::{DateTime, Utc};
use openssl::asn1::{Asn1Time, Asn1TimeRef};
use openssl::nid::Nid;
use openssl::x509::{X509NameRef, X509Ref};

pub mod checker;
pub mod cluster;
pub mod config;
pub mod decode;
pub mod error;
pub mod metrics;
pub mod source;
pub mod telemetry;
#[cfg(any(test, feature = "testing"))]
pub mod test_helpers;

pub use checker::{Checker, CheckerSettings, CheckerState};
pub use error::ExporterError;
pub use metrics::prom::Exporter;
pub use source::{SourceDescriptor, SourceKind};

/// Identity and validity facts extracted from a single X.509 certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateFact {
    pub common_name: String,
    pub issuer_common_name: String,
    /// Serial number in decimal notation
    pub serial_number: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    /// DNS subject alternative names, in certificate order
    pub subject_alt_names: Vec<String>,
}

impl CertificateFact {
    /// Extracts the canonical fact tuple from a parsed certificate.
    ///
    /// A missing common name yields an empty string; anything that cannot be
    /// represented (non UTF-8 names, out of range validity dates) is a
    /// [`ExporterError::Parse`].
    pub fn from_x509(cert: &X509Ref) -> Result<CertificateFact, ExporterError> {
        let subject_alt_names = cert
            .subject_alt_names()
            .map(|names| {
                names
                    .iter()
                    .filter_map(|name| name.dnsname().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        let serial_number = cert
            .serial_number()
            .to_bn()
            .and_then(|bn| bn.to_dec_str())
            .map_err(|e| ExporterError::parse(format!("invalid serial number: {}", e)))?
            .to_string();

        Ok(CertificateFact {
            common_name: common_name(cert.subject_name())?,
            issuer_common_name: common_name(cert.issuer_name())?,
            serial_number,
            not_before: to_datetime(cert.not_before())?,
            not_after: to_datetime(cert.not_after())?,
            subject_alt_names,
        })
    }

    /// Whether `not_after` lies before `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.not_after < now
    }
}

fn common_name(name: &X509NameRef) -> Result<String, ExporterError> {
    match name.entries_by_nid(Nid::COMMONNAME).next() {
        Some(entry) => entry
            .data()
            .to_string()
            .map_err(|e| ExporterError::parse(format!("common name cannot be converted to UTF-8: {}", e))),
        None => Ok(String::new()),
    }
}

fn to_datetime(time: &Asn1TimeRef) -> Result<DateTime<Utc>, ExporterError> {
    let epoch = Asn1Time::from_unix(0)?;
    let diff = epoch
        .diff(time)
        .map_err(|e| ExporterError::parse(format!("invalid validity date {}: {}", time, e)))?;
    let seconds = i64::from(diff.days) * 86_400 + i64::from(diff.secs);
    DateTime::from_timestamp(seconds, 0)
        .ok_or_else(|| ExporterError::parse(format!("validity date {} out of range", time)))
}
