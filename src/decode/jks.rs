//! Java keystore (JKS / JCEKS) reader.
//!
//! Layout, all integers big-endian:
//!
//! ```text
//! magic u32 | version u32 | count u32 | entry* | sha1 digest [20]
//! entry   = tag u32 | alias utf | created u64 (ms) | payload
//! tag 1   = key len u32 | key bytes | chain count u32 | certificate*
//! tag 2   = certificate
//! certificate = [type utf, version 2 only] | len u32 | DER bytes
//! ```
//!
//! The digest covers the passphrase as UTF-16BE, the salt `Mighty Aphrodite`
//! and every preceding byte. Protected private keys are kept opaque; only the
//! certificate chains are needed.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use openssl::sha::Sha1;

use crate::error::ExporterError;

pub const JKS_MAGIC: u32 = 0xFEED_FEED;
pub const JCEKS_MAGIC: u32 = 0xCECE_CECE;

const PRIVATE_KEY_TAG: u32 = 1;
const TRUSTED_CERTIFICATE_TAG: u32 = 2;
const SECRET_KEY_TAG: u32 = 3;

const DIGEST_LEN: usize = 20;
const HEADER_LEN: usize = 12;
const INTEGRITY_SALT: &[u8] = b"Mighty Aphrodite";
const X509_TYPE: &str = "X.509";

/// A keystore entry, either carrying a certificate chain or a lone trust anchor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeystoreEntry {
    /// Private key with its certificate chain, leaf first
    PrivateKey {
        /// DER encoded certificates
        chain: Vec<Vec<u8>>,
    },
    /// Trusted certificate without a key
    TrustedCertificate {
        /// DER encoded certificate
        certificate: Vec<u8>,
    },
}

/// A verified keystore, entries keyed by alias.
#[derive(Debug, Clone, Default)]
pub struct Keystore {
    entries: BTreeMap<String, KeystoreEntry>,
}

impl Keystore {
    /// Verifies the integrity digest against `passphrase` and parses all entries.
    ///
    /// A wrong passphrase and a corrupted container are indistinguishable and
    /// both yield [`ExporterError::Decode`].
    pub fn load(raw: &[u8], passphrase: &str) -> Result<Keystore, ExporterError> {
        if raw.len() < HEADER_LEN + DIGEST_LEN {
            return Err(ExporterError::decode(format!(
                "keystore too short ({} bytes)",
                raw.len()
            )));
        }
        let (body, digest) = raw.split_at(raw.len() - DIGEST_LEN);

        let expected = integrity_digest(body, passphrase);
        if !openssl::memcmp::eq(&expected, digest) {
            return Err(ExporterError::decode(
                "keystore integrity check failed: wrong passphrase or corrupted keystore",
            ));
        }

        let mut reader = Reader::new(body);
        let magic = reader.u32()?;
        if magic != JKS_MAGIC && magic != JCEKS_MAGIC {
            return Err(ExporterError::decode(format!(
                "unknown keystore magic {:#010x}",
                magic
            )));
        }
        let version = reader.u32()?;
        if version != 1 && version != 2 {
            return Err(ExporterError::decode(format!(
                "unsupported keystore version {}",
                version
            )));
        }

        let count = reader.u32()?;
        let mut entries = BTreeMap::new();
        for _ in 0..count {
            let tag = reader.u32()?;
            let alias = reader.utf()?;
            // creation date, validated but not kept
            reader.timestamp()?;
            let entry = match tag {
                PRIVATE_KEY_TAG => {
                    let key_len = reader.u32()? as usize;
                    reader.bytes(key_len)?;
                    let chain_len = reader.u32()?;
                    let mut chain = Vec::new();
                    for _ in 0..chain_len {
                        chain.push(reader.certificate(version)?);
                    }
                    KeystoreEntry::PrivateKey { chain }
                }
                TRUSTED_CERTIFICATE_TAG => KeystoreEntry::TrustedCertificate {
                    certificate: reader.certificate(version)?,
                },
                SECRET_KEY_TAG => {
                    return Err(ExporterError::decode(format!(
                        "secret key entry '{}' is not supported",
                        alias
                    )))
                }
                other => {
                    return Err(ExporterError::decode(format!(
                        "unknown entry tag {} for alias '{}'",
                        other, alias
                    )))
                }
            };
            entries.insert(alias, entry);
        }

        if !reader.is_empty() {
            return Err(ExporterError::decode("trailing bytes after keystore entries"));
        }
        Ok(Keystore { entries })
    }

    pub fn entries(&self) -> impl Iterator<Item = (&String, &KeystoreEntry)> {
        self.entries.iter()
    }
}

/// SHA-1 over the UTF-16BE passphrase, the fixed salt and `body`.
pub fn integrity_digest(body: &[u8], passphrase: &str) -> [u8; DIGEST_LEN] {
    let mut hasher = Sha1::new();
    let password: Vec<u8> = passphrase
        .encode_utf16()
        .flat_map(|unit| unit.to_be_bytes())
        .collect();
    hasher.update(&password);
    hasher.update(INTEGRITY_SALT);
    hasher.update(body);
    hasher.finish()
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos == self.buf.len()
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8], ExporterError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| {
                ExporterError::decode(format!("keystore truncated at offset {}", self.pos))
            })?;
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn u16(&mut self) -> Result<u16, ExporterError> {
        let bytes = self.bytes(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn u32(&mut self) -> Result<u32, ExporterError> {
        let bytes = self.bytes(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn u64(&mut self) -> Result<u64, ExporterError> {
        let high = u64::from(self.u32()?);
        let low = u64::from(self.u32()?);
        Ok((high << 32) | low)
    }

    /// Java modified UTF-8 string; plain UTF-8 for everything but NUL and
    /// supplementary characters, which are decoded lossily.
    fn utf(&mut self) -> Result<String, ExporterError> {
        let len = self.u16()? as usize;
        Ok(String::from_utf8_lossy(self.bytes(len)?).into_owned())
    }

    fn timestamp(&mut self) -> Result<DateTime<Utc>, ExporterError> {
        let millis = self.u64()?;
        i64::try_from(millis)
            .ok()
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .ok_or_else(|| ExporterError::decode(format!("invalid entry timestamp {}", millis)))
    }

    fn certificate(&mut self, version: u32) -> Result<Vec<u8>, ExporterError> {
        if version == 2 {
            let cert_type = self.utf()?;
            if cert_type != X509_TYPE {
                return Err(ExporterError::decode(format!(
                    "unsupported certificate type '{}'",
                    cert_type
                )));
            }
        }
        let len = self.u32()? as usize;
        Ok(self.bytes(len)?.to_vec())
    }
}
