use chrono::Utc;
use prometheus::Registry;
use tracing::{debug, warn};

use crate::decode::DecodeFormat;
use crate::error::ExporterError;
use crate::metrics::schema::{CertificateGauges, MetricSample, ResourceLabels};
use crate::source::SourceKind;
use crate::CertificateFact;

/// Publishes certificate facts of one source kind.
///
/// A poll cycle calls [`Exporter::reset_metrics`] once and then
/// [`Exporter::export_metrics`] for every resource, so the exposed samples
/// always describe the resources seen in the latest cycle.
#[derive(Clone)]
pub struct Exporter {
    kind: SourceKind,
    gauges: CertificateGauges,
}

impl Exporter {
    /// Registers the gauge families of `kind` in `registry`.
    pub fn new(kind: SourceKind, registry: &Registry) -> Result<Exporter, ExporterError> {
        Ok(Exporter {
            kind,
            gauges: CertificateGauges::register(kind, registry)?,
        })
    }

    /// Decodes `raw` and sets one sample per certificate found.
    ///
    /// Returns the number of samples set. Malformed PEM blocks and
    /// unparsable PEM certificates are logged and skipped; for keystores any
    /// failure rejects the whole payload before a single sample is set.
    pub fn export_metrics(
        &self,
        raw: &[u8],
        passphrase: Option<&str>,
        labels: &ResourceLabels,
    ) -> Result<usize, ExporterError> {
        let samples = self.collect_samples(self.kind.format(), raw, passphrase, labels)?;
        self.publish(&samples)?;
        Ok(samples.len())
    }

    /// Decodes `raw` with `format` into samples without touching the gauges.
    pub fn collect_samples(
        &self,
        format: DecodeFormat,
        raw: &[u8],
        passphrase: Option<&str>,
        labels: &ResourceLabels,
    ) -> Result<Vec<MetricSample>, ExporterError> {
        let decoded = format.decode(raw, passphrase)?;

        for err in &decoded.rejected {
            self.record_error();
            warn!(
                kind = %self.kind,
                namespace = %labels.namespace,
                name = %labels.name,
                key = %labels.key_name,
                error = %err,
                "skipping certificate block"
            );
        }

        let now = Utc::now();
        let mut samples = Vec::with_capacity(decoded.certificates.len());
        for cert in &decoded.certificates {
            match CertificateFact::from_x509(cert) {
                Ok(fact) => {
                    debug!(
                        kind = %self.kind,
                        namespace = %labels.namespace,
                        name = %labels.name,
                        key = %labels.key_name,
                        cn = %fact.common_name,
                        serial = %fact.serial_number,
                        sans = ?fact.subject_alt_names,
                        not_after = %fact.not_after,
                        expired = fact.is_expired_at(now),
                        "exporting certificate"
                    );
                    samples.push(MetricSample::new(self.kind, &fact, labels, now));
                }
                Err(err) if format == DecodeFormat::Jks => return Err(err),
                Err(err) => {
                    self.record_error();
                    warn!(
                        kind = %self.kind,
                        namespace = %labels.namespace,
                        name = %labels.name,
                        key = %labels.key_name,
                        error = %err,
                        "skipping certificate"
                    );
                }
            }
        }
        Ok(samples)
    }

    /// Sets the gauges for every sample.
    pub fn publish(&self, samples: &[MetricSample]) -> Result<(), ExporterError> {
        for sample in samples {
            self.gauges.set(sample)?;
        }
        Ok(())
    }

    /// Clears every sample previously set by this exporter.
    pub fn reset_metrics(&self) {
        self.gauges.reset();
    }

    /// Counts a failure that prevented a resource or block from being exported.
    pub fn record_error(&self) {
        self.gauges.errors.inc();
    }

    pub fn error_count(&self) -> u64 {
        self.gauges.errors.get()
    }
}
