//! Periodic discovery of certificate-bearing resources.
//!
//! One [`Checker`] runs per source kind. Every tick it resets its exporter,
//! lists the matching resources in each configured namespace and exports the
//! certificates it can decode. Errors never leave a cycle: they are logged
//! with the offending namespace, resource and key, counted, and the checker
//! moves on to the next item.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cluster::{Resource, ResourceClient, ResourceKind};
use crate::error::ExporterError;
use crate::metrics::prom::Exporter;
use crate::metrics::schema::ResourceLabels;
use crate::source::{PassphraseRef, SourceDescriptor, SourceKind};

/// Static configuration of one checker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckerSettings {
    pub polling_period: Duration,
    pub label_selector: String,
    /// Namespaces to scan; empty scans all namespaces
    pub namespaces: Vec<String>,
    /// Data keys to export; `*` matches every key
    pub keys: Vec<String>,
    /// Annotation naming the passphrase secret of a keystore
    pub annotation_key: String,
    /// Data key of the passphrase inside that secret
    pub password_key: String,
}

/// Lifecycle of a checker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckerState {
    Idle,
    Polling,
    Stopped,
}

/// How a poll cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed,
    Cancelled,
}

/// Counters for a single poll cycle, mostly for logging.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub resources: usize,
    pub samples: usize,
    pub errors: usize,
}

pub struct Checker {
    kind: SourceKind,
    settings: CheckerSettings,
    client: Arc<dyn ResourceClient>,
    exporter: Exporter,
    state: watch::Sender<CheckerState>,
}

impl Checker {
    pub fn new(
        kind: SourceKind,
        settings: CheckerSettings,
        client: Arc<dyn ResourceClient>,
        exporter: Exporter,
    ) -> Self {
        let (state, _) = watch::channel(CheckerState::Idle);
        Checker {
            kind,
            settings,
            client,
            exporter,
            state,
        }
    }

    /// Subscribes to state transitions.
    pub fn state(&self) -> watch::Receiver<CheckerState> {
        self.state.subscribe()
    }

    /// Polls on every tick until `cancel` fires.
    ///
    /// The first tick fires immediately. Cancellation is observed while
    /// waiting for the next tick and between resources of a cycle; an
    /// interrupted cycle is not reset again.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.settings.polling_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            kind = %self.kind,
            period = ?self.settings.polling_period,
            namespaces = ?self.settings.namespaces,
            selector = %self.settings.label_selector,
            "starting checker"
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if self.poll(&cancel).await == CycleOutcome::Cancelled {
                        break;
                    }
                }
            }
        }

        self.state.send_replace(CheckerState::Stopped);
        info!(kind = %self.kind, "checker stopped");
    }

    /// Runs one full poll cycle: reset, then export every matching resource.
    pub async fn poll(&self, cancel: &CancellationToken) -> CycleOutcome {
        self.state.send_replace(CheckerState::Polling);
        self.exporter.reset_metrics();

        let mut report = CycleReport::default();
        let outcome = self.scan(cancel, &mut report).await;

        match outcome {
            CycleOutcome::Completed => info!(
                kind = %self.kind,
                resources = report.resources,
                samples = report.samples,
                errors = report.errors,
                "poll cycle complete"
            ),
            CycleOutcome::Cancelled => info!(kind = %self.kind, "poll cycle cancelled"),
        }
        self.state.send_replace(CheckerState::Idle);
        outcome
    }

    async fn scan(&self, cancel: &CancellationToken, report: &mut CycleReport) -> CycleOutcome {
        let all_namespaces = [String::new()];
        let namespaces = if self.settings.namespaces.is_empty() {
            &all_namespaces[..]
        } else {
            &self.settings.namespaces[..]
        };

        for namespace in namespaces {
            if cancel.is_cancelled() {
                return CycleOutcome::Cancelled;
            }
            let resources = match self
                .client
                .list(
                    self.kind.resource_kind(),
                    namespace,
                    &self.settings.label_selector,
                )
                .await
            {
                Ok(resources) => resources,
                Err(e) => {
                    report.errors += 1;
                    self.exporter.record_error();
                    warn!(kind = %self.kind, namespace = %namespace, error = %e, "skipping namespace");
                    continue;
                }
            };
            debug!(kind = %self.kind, namespace = %namespace, count = resources.len(), "listed resources");

            for resource in &resources {
                if cancel.is_cancelled() {
                    return CycleOutcome::Cancelled;
                }
                report.resources += 1;
                match self.export_resource(resource).await {
                    Ok(samples) => report.samples += samples,
                    Err(e) => {
                        report.errors += 1;
                        self.exporter.record_error();
                        warn!(
                            kind = %self.kind,
                            namespace = %resource.namespace,
                            name = %resource.name,
                            error = %e,
                            "skipping resource"
                        );
                    }
                }
            }
        }
        CycleOutcome::Completed
    }

    /// Exports every configured key of one resource.
    ///
    /// For keystores the passphrase is resolved once per resource. Every key
    /// is decoded before a sample is set, so any error drops the whole
    /// resource.
    async fn export_resource(&self, resource: &Resource) -> Result<usize, ExporterError> {
        let descriptor = SourceDescriptor::describe(
            self.kind,
            resource,
            &self.settings.keys,
            &self.settings.annotation_key,
            &self.settings.password_key,
        )?;

        let passphrase = match &descriptor.passphrase {
            Some(reference) => Some(self.passphrase(&descriptor.namespace, reference).await?),
            None => None,
        };

        let mut samples = Vec::new();
        for key in &descriptor.data_keys {
            let Some(raw) = resource.data.get(key) else {
                continue;
            };
            let labels = ResourceLabels {
                key_name: key.clone(),
                name: descriptor.resource_name.clone(),
                namespace: descriptor.namespace.clone(),
            };
            let collected = self
                .exporter
                .collect_samples(descriptor.format, raw, passphrase.as_deref(), &labels)
                .map_err(|e| match e {
                    ExporterError::Decode { reason } => ExporterError::Decode {
                        reason: format!("key '{}': {}", key, reason),
                    },
                    ExporterError::Parse { reason } => ExporterError::Parse {
                        reason: format!("key '{}': {}", key, reason),
                    },
                    other => other,
                })?;
            samples.extend(collected);
        }
        self.exporter.publish(&samples)?;
        Ok(samples.len())
    }

    /// Looks up the passphrase secret by name; never cached between cycles.
    async fn passphrase(
        &self,
        namespace: &str,
        reference: &PassphraseRef,
    ) -> Result<String, ExporterError> {
        let secret = self
            .client
            .get(ResourceKind::Secret, namespace, &reference.secret_name)
            .await?;
        let bytes = secret
            .data
            .get(&reference.key)
            .ok_or_else(|| ExporterError::MissingKey {
                namespace: namespace.to_string(),
                name: reference.secret_name.clone(),
                key: reference.key.clone(),
            })?;
        String::from_utf8(bytes.clone()).map_err(|_| {
            ExporterError::decode(format!(
                "passphrase in {}/{} key '{}' is not valid UTF-8",
                namespace, reference.secret_name, reference.key
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{samples, CertificateBuilder, InMemoryCluster, JksBuilder};
    use prometheus::Registry;

    fn settings(kind: SourceKind) -> CheckerSettings {
        CheckerSettings {
            polling_period: Duration::from_millis(10),
            label_selector: "cert-exporter=true".to_string(),
            namespaces: vec!["prod".to_string()],
            keys: kind.default_keys(),
            annotation_key: "password-secret-ref".to_string(),
            password_key: "password".to_string(),
        }
    }

    fn checker(kind: SourceKind, cluster: &Arc<InMemoryCluster>, registry: &Registry) -> Checker {
        Checker::new(
            kind,
            settings(kind),
            cluster.clone(),
            Exporter::new(kind, registry).unwrap(),
        )
    }

    fn pem_secret(name: &str, cn: &str) -> Resource {
        let cert = CertificateBuilder::new(cn).issuer("Example CA").build();
        Resource::new("prod", name)
            .with_label("cert-exporter", "true")
            .with_data("tls.crt", cert.to_pem().unwrap())
    }

    #[tokio::test]
    async fn test_listing_failure_skips_only_that_namespace() {
        let cluster = Arc::new(InMemoryCluster::new());
        cluster.insert(ResourceKind::Secret, pem_secret("web", "web.example.com"));
        cluster.insert(
            ResourceKind::Secret,
            Resource::new("staging", "web")
                .with_label("cert-exporter", "true")
                .with_data("tls.crt", CertificateBuilder::new("staging.example.com").build().to_pem().unwrap()),
        );
        cluster.fail_listing("staging");
        let registry = Registry::new();
        let mut settings = settings(SourceKind::Secret);
        settings.namespaces = vec!["staging".to_string(), "prod".to_string()];
        let checker = Checker::new(
            SourceKind::Secret,
            settings,
            cluster.clone(),
            Exporter::new(SourceKind::Secret, &registry).unwrap(),
        );

        let outcome = checker.poll(&CancellationToken::new()).await;

        assert_eq!(outcome, CycleOutcome::Completed);
        let found = samples(&registry, "cert_exporter_secret_expires_in_seconds");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].label("secret_namespace"), Some("prod"));
        assert_eq!(checker.exporter.error_count(), 1);
    }

    #[tokio::test]
    async fn test_label_selector_filters_resources() {
        let cluster = Arc::new(InMemoryCluster::new());
        cluster.insert(ResourceKind::Secret, pem_secret("web", "web.example.com"));
        cluster.insert(
            ResourceKind::Secret,
            Resource::new("prod", "unlabelled")
                .with_data("tls.crt", CertificateBuilder::new("x.example.com").build().to_pem().unwrap()),
        );
        let registry = Registry::new();
        let checker = checker(SourceKind::Secret, &cluster, &registry);

        checker.poll(&CancellationToken::new()).await;

        let found = samples(&registry, "cert_exporter_secret_expires_in_seconds");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].label("secret_name"), Some("web"));
    }

    #[tokio::test]
    async fn test_missing_password_key_skips_resource() {
        let cluster = Arc::new(InMemoryCluster::new());
        let cert = CertificateBuilder::new("api.example.com").build();
        cluster.insert(
            ResourceKind::Secret,
            Resource::new("prod", "app-keystore")
                .with_label("cert-exporter", "true")
                .with_annotation("password-secret-ref", "app-keystore-pw")
                .with_data(
                    "keystore.jks",
                    JksBuilder::new().private_key("api", &[&cert]).build("changeit"),
                ),
        );
        cluster.insert(
            ResourceKind::Secret,
            Resource::new("prod", "app-keystore-pw").with_data("pass", b"changeit".to_vec()),
        );
        let registry = Registry::new();
        let checker = checker(SourceKind::Keystore, &cluster, &registry);

        checker.poll(&CancellationToken::new()).await;

        assert!(samples(&registry, "cert_exporter_keystore_expires_in_seconds").is_empty());
        assert_eq!(checker.exporter.error_count(), 1);
    }

    #[tokio::test]
    async fn test_failing_key_drops_every_key_of_the_resource() {
        let cluster = Arc::new(InMemoryCluster::new());
        let cert = CertificateBuilder::new("api.example.com").build();
        let anchor = CertificateBuilder::new("Example CA").build();
        cluster.insert(
            ResourceKind::Secret,
            Resource::new("prod", "app-keystore")
                .with_label("cert-exporter", "true")
                .with_annotation("password-secret-ref", "app-keystore-pw")
                .with_data(
                    "keystore.jks",
                    JksBuilder::new().private_key("api", &[&cert]).build("changeit"),
                )
                .with_data(
                    "truststore.jks",
                    JksBuilder::new().private_key("ca", &[&anchor]).build("different"),
                ),
        );
        cluster.insert(
            ResourceKind::Secret,
            Resource::new("prod", "app-keystore-pw").with_data("password", b"changeit".to_vec()),
        );
        let registry = Registry::new();
        let mut settings = settings(SourceKind::Keystore);
        settings.keys = vec!["keystore.jks".to_string(), "truststore.jks".to_string()];
        let checker = Checker::new(
            SourceKind::Keystore,
            settings,
            cluster.clone(),
            Exporter::new(SourceKind::Keystore, &registry).unwrap(),
        );

        checker.poll(&CancellationToken::new()).await;

        assert!(samples(&registry, "cert_exporter_keystore_expires_in_seconds").is_empty());
        assert_eq!(checker.exporter.error_count(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_cycle_stops_between_resources() {
        let cluster = Arc::new(InMemoryCluster::new());
        cluster.insert(ResourceKind::Secret, pem_secret("web", "web.example.com"));
        let registry = Registry::new();
        let checker = checker(SourceKind::Secret, &cluster, &registry);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = checker.poll(&cancel).await;

        assert_eq!(outcome, CycleOutcome::Cancelled);
        assert!(samples(&registry, "cert_exporter_secret_expires_in_seconds").is_empty());
        assert_eq!(*checker.state().borrow(), CheckerState::Idle);
    }

    #[tokio::test]
    async fn test_cancellation_wins_over_pending_tick() {
        let cluster = Arc::new(InMemoryCluster::new());
        let registry = Registry::new();
        let checker = checker(SourceKind::Secret, &cluster, &registry);
        let cert = CertificateBuilder::new("web.example.com").build();
        checker
            .exporter
            .export_metrics(
                &cert.to_pem().unwrap(),
                None,
                &ResourceLabels {
                    key_name: "tls.crt".to_string(),
                    name: "web".to_string(),
                    namespace: "prod".to_string(),
                },
            )
            .unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        checker.run(cancel).await;

        assert_eq!(*checker.state().borrow(), CheckerState::Stopped);
        assert_eq!(
            samples(&registry, "cert_exporter_secret_expires_in_seconds").len(),
            1
        );
    }

    #[tokio::test]
    async fn test_run_stops_on_cancellation() {
        let cluster = Arc::new(InMemoryCluster::new());
        cluster.insert(ResourceKind::Secret, pem_secret("web", "web.example.com"));
        let registry = Registry::new();
        let checker = Arc::new(checker(SourceKind::Secret, &cluster, &registry));
        let cancel = CancellationToken::new();

        let handle = tokio::spawn({
            let checker = checker.clone();
            let cancel = cancel.clone();
            async move { checker.run(cancel).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(*checker.state().borrow(), CheckerState::Stopped);
        assert_eq!(
            samples(&registry, "cert_exporter_secret_expires_in_seconds").len(),
            1
        );
    }
}
