//! Fixtures shared by unit and integration tests.

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::PKey;
use openssl::x509::extension::SubjectAlternativeName;
use openssl::x509::{X509Builder, X509NameBuilder, X509};
use prometheus::Registry;

use crate::cluster::{Resource, ResourceClient, ResourceKind};
use crate::decode::jks::{integrity_digest, JKS_MAGIC};
use crate::error::ExporterError;
use crate::metrics::server::render;

/// Builds self-contained X.509 certificates signed with a throwaway P-256 key.
pub struct CertificateBuilder {
    common_name: String,
    issuer: Option<String>,
    serial: u32,
    not_before: i64,
    not_after: i64,
    dns_names: Vec<String>,
}

impl CertificateBuilder {
    /// Valid from one day ago for one year.
    pub fn new(common_name: &str) -> Self {
        let now = Utc::now().timestamp();
        CertificateBuilder {
            common_name: common_name.to_string(),
            issuer: None,
            serial: 1,
            not_before: now - 86_400,
            not_after: now + 365 * 86_400,
            dns_names: Vec::new(),
        }
    }

    /// Issuer common name; defaults to the subject common name.
    pub fn issuer(mut self, issuer: &str) -> Self {
        self.issuer = Some(issuer.to_string());
        self
    }

    pub fn serial(mut self, serial: u32) -> Self {
        self.serial = serial;
        self
    }

    /// Validity window as unix timestamps.
    pub fn validity(mut self, not_before: i64, not_after: i64) -> Self {
        self.not_before = not_before;
        self.not_after = not_after;
        self
    }

    pub fn dns_names(mut self, names: &[&str]) -> Self {
        self.dns_names = names.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn build(self) -> X509 {
        let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
        let key = PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap();

        let mut builder = X509Builder::new().unwrap();
        builder.set_version(2).unwrap();
        let serial = BigNum::from_u32(self.serial)
            .unwrap()
            .to_asn1_integer()
            .unwrap();
        builder.set_serial_number(&serial).unwrap();

        let issuer = self.issuer.as_deref().unwrap_or(&self.common_name);
        builder.set_subject_name(&name(&self.common_name)).unwrap();
        builder.set_issuer_name(&name(issuer)).unwrap();
        builder.set_pubkey(&key).unwrap();
        builder
            .set_not_before(&Asn1Time::from_unix(self.not_before).unwrap())
            .unwrap();
        builder
            .set_not_after(&Asn1Time::from_unix(self.not_after).unwrap())
            .unwrap();

        if !self.dns_names.is_empty() {
            let mut san = SubjectAlternativeName::new();
            for dns_name in &self.dns_names {
                san.dns(dns_name);
            }
            let extension = san.build(&builder.x509v3_context(None, None)).unwrap();
            builder.append_extension(extension).unwrap();
        }

        builder.sign(&key, MessageDigest::sha256()).unwrap();
        builder.build()
    }
}

fn name(common_name: &str) -> openssl::x509::X509Name {
    let mut name = X509NameBuilder::new().unwrap();
    if !common_name.is_empty() {
        name.append_entry_by_nid(Nid::COMMONNAME, common_name)
            .unwrap();
    }
    name.build()
}

/// Writes version 2 JKS containers.
pub struct JksBuilder {
    magic: u32,
    entries: Vec<u8>,
    count: u32,
}

impl Default for JksBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl JksBuilder {
    pub fn new() -> Self {
        JksBuilder {
            magic: JKS_MAGIC,
            entries: Vec::new(),
            count: 0,
        }
    }

    pub fn magic(mut self, magic: u32) -> Self {
        self.magic = magic;
        self
    }

    /// Adds a chain-bearing entry; the protected key itself is filler bytes.
    pub fn private_key(self, alias: &str, chain: &[&X509]) -> Self {
        let chain = chain.iter().map(|cert| cert.to_der().unwrap()).collect();
        self.private_key_der(alias, chain)
    }

    pub fn private_key_der(mut self, alias: &str, chain: Vec<Vec<u8>>) -> Self {
        self.entry_header(1, alias);
        let key = [0x42u8; 32];
        self.entries.extend_from_slice(&(key.len() as u32).to_be_bytes());
        self.entries.extend_from_slice(&key);
        self.entries
            .extend_from_slice(&(chain.len() as u32).to_be_bytes());
        for der in &chain {
            self.certificate(der);
        }
        self
    }

    pub fn trusted_certificate(mut self, alias: &str, cert: &X509) -> Self {
        self.entry_header(2, alias);
        self.certificate(&cert.to_der().unwrap());
        self
    }

    pub fn build(self, passphrase: &str) -> Vec<u8> {
        let mut raw = Vec::new();
        raw.extend_from_slice(&self.magic.to_be_bytes());
        raw.extend_from_slice(&2u32.to_be_bytes());
        raw.extend_from_slice(&self.count.to_be_bytes());
        raw.extend_from_slice(&self.entries);
        let digest = integrity_digest(&raw, passphrase);
        raw.extend_from_slice(&digest);
        raw
    }

    fn entry_header(&mut self, tag: u32, alias: &str) {
        self.count += 1;
        self.entries.extend_from_slice(&tag.to_be_bytes());
        self.utf(alias);
        self.entries
            .extend_from_slice(&(Utc::now().timestamp_millis() as u64).to_be_bytes());
    }

    fn utf(&mut self, value: &str) {
        self.entries
            .extend_from_slice(&(value.len() as u16).to_be_bytes());
        self.entries.extend_from_slice(value.as_bytes());
    }

    fn certificate(&mut self, der: &[u8]) {
        self.utf("X.509");
        self.entries
            .extend_from_slice(&(der.len() as u32).to_be_bytes());
        self.entries.extend_from_slice(der);
    }
}

/// [`ResourceClient`] over an in-memory object store.
#[derive(Default)]
pub struct InMemoryCluster {
    resources: Mutex<BTreeMap<ResourceKind, Vec<Resource>>>,
    failing_namespaces: Mutex<HashSet<String>>,
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `resource`, replacing an object with the same namespace and name.
    pub fn insert(&self, kind: ResourceKind, resource: Resource) {
        let mut resources = self.resources.lock().unwrap();
        let objects = resources.entry(kind).or_default();
        objects.retain(|r| !(r.namespace == resource.namespace && r.name == resource.name));
        objects.push(resource);
    }

    pub fn remove(&self, kind: ResourceKind, namespace: &str, name: &str) -> bool {
        let mut resources = self.resources.lock().unwrap();
        let Some(objects) = resources.get_mut(&kind) else {
            return false;
        };
        let before = objects.len();
        objects.retain(|r| !(r.namespace == namespace && r.name == name));
        objects.len() != before
    }

    /// Makes every list call for `namespace` fail.
    pub fn fail_listing(&self, namespace: &str) {
        self.failing_namespaces
            .lock()
            .unwrap()
            .insert(namespace.to_string());
    }
}

#[async_trait]
impl ResourceClient for InMemoryCluster {
    async fn list(
        &self,
        kind: ResourceKind,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<Resource>, ExporterError> {
        if self.failing_namespaces.lock().unwrap().contains(namespace) {
            return Err(ExporterError::Listing {
                namespace: namespace.to_string(),
                details: "injected failure".to_string(),
            });
        }
        let resources = self.resources.lock().unwrap();
        Ok(resources
            .get(&kind)
            .map(|objects| {
                objects
                    .iter()
                    .filter(|r| namespace.is_empty() || r.namespace == namespace)
                    .filter(|r| matches_selector(&r.labels, label_selector))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<Resource, ExporterError> {
        let resources = self.resources.lock().unwrap();
        resources
            .get(&kind)
            .and_then(|objects| {
                objects
                    .iter()
                    .find(|r| r.namespace == namespace && r.name == name)
            })
            .cloned()
            .ok_or_else(|| ExporterError::Fetch {
                namespace: namespace.to_string(),
                name: name.to_string(),
                details: format!("{} not found", kind),
            })
    }
}

/// Equality based label selectors: `a=b`, `a==b`, `a!=b`, `a`, `!a`.
pub fn matches_selector(labels: &BTreeMap<String, String>, selector: &str) -> bool {
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| {
            if let Some((key, value)) = term.split_once("!=") {
                labels.get(key.trim()).map(String::as_str) != Some(value.trim())
            } else if let Some((key, value)) = term
                .split_once("==")
                .or_else(|| term.split_once('='))
            {
                labels.get(key.trim()).map(String::as_str) == Some(value.trim())
            } else if let Some(key) = term.strip_prefix('!') {
                !labels.contains_key(key.trim())
            } else {
                labels.contains_key(term)
            }
        })
}

/// One scraped sample.
pub struct Sample {
    pub labels: prometheus_parse::Labels,
    pub value: f64,
}

impl Sample {
    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels.get(name)
    }
}

/// Scrapes `registry` the way Prometheus would and returns the samples of
/// the metric `name`.
pub fn samples(registry: &Registry, name: &str) -> Vec<Sample> {
    let text = String::from_utf8(render(registry).unwrap()).unwrap();
    let lines = text.lines().map(|line| Ok(line.to_string()));
    let scrape = prometheus_parse::Scrape::parse(lines).unwrap();
    scrape
        .samples
        .into_iter()
        .filter(|sample| sample.metric == name)
        .filter_map(|sample| {
            let value = match sample.value {
                prometheus_parse::Value::Gauge(v)
                | prometheus_parse::Value::Counter(v)
                | prometheus_parse::Value::Untyped(v) => v,
                _ => return None,
            };
            Some(Sample {
                labels: sample.labels,
                value,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_selector() {
        let labels = BTreeMap::from([
            ("cert-exporter".to_string(), "true".to_string()),
            ("tier".to_string(), "web".to_string()),
        ]);

        assert!(matches_selector(&labels, ""));
        assert!(matches_selector(&labels, "cert-exporter=true"));
        assert!(matches_selector(&labels, "cert-exporter==true, tier"));
        assert!(matches_selector(&labels, "tier!=db,!missing"));
        assert!(!matches_selector(&labels, "cert-exporter=false"));
        assert!(!matches_selector(&labels, "missing"));
        assert!(!matches_selector(&labels, "!tier"));
    }
}
