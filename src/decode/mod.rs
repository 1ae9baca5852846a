//! Decoders turning raw resource bytes into parsed X.509 certificates.
//!
//! # Submodules
//!
//! - `pem` - sequential PEM `CERTIFICATE` blocks, failures isolated per block
//! - `jks` - password-protected Java keystores, failures fatal for the payload

use openssl::x509::X509;
use serde::{Deserialize, Serialize};

use crate::error::ExporterError;

pub mod jks;
pub mod pem;

pub use jks::{Keystore, KeystoreEntry};

/// Encoding of the certificate material held by a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecodeFormat {
    Pem,
    Jks,
}

/// Certificates recovered from one payload.
#[derive(Default)]
pub struct Decoded {
    pub certificates: Vec<X509>,
    /// Per-block failures that did not stop decoding of the other blocks
    pub rejected: Vec<ExporterError>,
}

impl DecodeFormat {
    pub fn needs_passphrase(&self) -> bool {
        matches!(self, DecodeFormat::Jks)
    }

    /// Decodes `raw` into certificates.
    ///
    /// PEM input never fails as a whole: malformed blocks end up in
    /// [`Decoded::rejected`]. Keystore input fails as a whole on a wrong
    /// passphrase, a corrupt container or an unparsable chain certificate.
    pub fn decode(&self, raw: &[u8], passphrase: Option<&str>) -> Result<Decoded, ExporterError> {
        match self {
            DecodeFormat::Pem => Ok(pem::decode(raw)),
            DecodeFormat::Jks => {
                let passphrase = passphrase
                    .ok_or_else(|| ExporterError::decode("keystore passphrase is required"))?;
                let keystore = Keystore::load(raw, passphrase)?;
                Ok(Decoded {
                    certificates: chain_certificates(&keystore)?,
                    rejected: Vec::new(),
                })
            }
        }
    }
}

/// Parses the certificate chains of every chain-bearing keystore entry.
pub fn chain_certificates(keystore: &Keystore) -> Result<Vec<X509>, ExporterError> {
    let mut certificates = Vec::new();
    for (alias, entry) in keystore.entries() {
        match entry {
            KeystoreEntry::PrivateKey { chain, .. } => {
                for (index, der) in chain.iter().enumerate() {
                    let cert = X509::from_der(der).map_err(|e| {
                        ExporterError::parse(format!(
                            "certificate {} of alias '{}': {}",
                            index, alias, e
                        ))
                    })?;
                    certificates.push(cert);
                }
            }
            KeystoreEntry::TrustedCertificate { .. } => {}
        }
    }
    Ok(certificates)
}
