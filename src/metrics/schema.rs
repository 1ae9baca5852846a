//! Gauge families and label tuples per source kind.

use chrono::{DateTime, Utc};
use prometheus::{GaugeVec, IntCounter, Opts, Registry};

use crate::source::SourceKind;
use crate::CertificateFact;

const METRIC_PREFIX: &str = "cert_exporter";

/// Label names of the gauge families of `kind`, in label tuple order.
pub fn label_names(kind: SourceKind) -> &'static [&'static str] {
    match kind {
        SourceKind::Secret | SourceKind::Keystore => &[
            "key_name",
            "issuer",
            "cn",
            "secret_name",
            "secret_namespace",
        ],
        SourceKind::ConfigMap => &[
            "key_name",
            "issuer",
            "cn",
            "configmap_name",
            "configmap_namespace",
        ],
        SourceKind::CertRequest => &["issuer", "cn", "cert_request", "cert_request_namespace"],
    }
}

/// Fully qualified metric name, e.g. `cert_exporter_keystore_expires_in_seconds`.
pub fn metric_name(kind: SourceKind, suffix: &str) -> String {
    format!("{}_{}_{}", METRIC_PREFIX, kind.as_str(), suffix)
}

/// Identifies the resource (and data key) a certificate was read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceLabels {
    pub key_name: String,
    pub name: String,
    pub namespace: String,
}

/// Numeric values and label tuple for one certificate.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    pub labels: Vec<String>,
    /// `not_after - now`, negative once expired
    pub expires_in_seconds: f64,
    pub not_after_timestamp: f64,
    pub not_before_timestamp: f64,
}

impl MetricSample {
    pub fn new(
        kind: SourceKind,
        fact: &CertificateFact,
        resource: &ResourceLabels,
        now: DateTime<Utc>,
    ) -> MetricSample {
        let mut labels = Vec::with_capacity(5);
        if kind.has_key_label() {
            labels.push(resource.key_name.clone());
        }
        labels.push(fact.issuer_common_name.clone());
        labels.push(fact.common_name.clone());
        labels.push(resource.name.clone());
        labels.push(resource.namespace.clone());

        let until_expiry = fact.not_after.signed_duration_since(now);
        MetricSample {
            labels,
            expires_in_seconds: until_expiry.num_milliseconds() as f64 / 1000.0,
            not_after_timestamp: fact.not_after.timestamp() as f64,
            not_before_timestamp: fact.not_before.timestamp() as f64,
        }
    }
}

/// The gauge families owned by one source kind.
#[derive(Clone)]
pub struct CertificateGauges {
    pub expires_in_seconds: GaugeVec,
    pub not_after_timestamp: GaugeVec,
    pub not_before_timestamp: GaugeVec,
    /// Failed resources and PEM blocks; never reset
    pub errors: IntCounter,
}

impl CertificateGauges {
    pub fn register(kind: SourceKind, registry: &Registry) -> Result<Self, prometheus::Error> {
        let labels = label_names(kind);

        let expires_in_seconds = GaugeVec::new(
            Opts::new(
                metric_name(kind, "expires_in_seconds"),
                format!("Number of seconds til the {} certificate expires", kind),
            ),
            labels,
        )?;
        registry.register(Box::new(expires_in_seconds.clone()))?;

        let not_after_timestamp = GaugeVec::new(
            Opts::new(
                metric_name(kind, "not_after_timestamp"),
                format!("Expiration timestamp of the {} certificate", kind),
            ),
            labels,
        )?;
        registry.register(Box::new(not_after_timestamp.clone()))?;

        let not_before_timestamp = GaugeVec::new(
            Opts::new(
                metric_name(kind, "not_before_timestamp"),
                format!("Start of validity timestamp of the {} certificate", kind),
            ),
            labels,
        )?;
        registry.register(Box::new(not_before_timestamp.clone()))?;

        let errors = IntCounter::with_opts(Opts::new(
            metric_name(kind, "errors_total"),
            format!("Number of {} certificates or resources that could not be exported", kind),
        ))?;
        registry.register(Box::new(errors.clone()))?;

        Ok(CertificateGauges {
            expires_in_seconds,
            not_after_timestamp,
            not_before_timestamp,
            errors,
        })
    }

    /// Sets all three gauges for the sample's label tuple, replacing any
    /// previous value.
    pub fn set(&self, sample: &MetricSample) -> Result<(), prometheus::Error> {
        let labels: Vec<&str> = sample.labels.iter().map(String::as_str).collect();
        self.expires_in_seconds
            .get_metric_with_label_values(&labels)?
            .set(sample.expires_in_seconds);
        self.not_after_timestamp
            .get_metric_with_label_values(&labels)?
            .set(sample.not_after_timestamp);
        self.not_before_timestamp
            .get_metric_with_label_values(&labels)?
            .set(sample.not_before_timestamp);
        Ok(())
    }

    /// Drops every label combination of the three gauge families.
    pub fn reset(&self) {
        self.expires_in_seconds.reset();
        self.not_after_timestamp.reset();
        self.not_before_timestamp.reset();
    }
}
