//! PEM certificate block scanning.
//!
//! Sections are read one at a time so a single malformed certificate in a
//! bundle does not hide the others.

use std::io::Cursor;

use openssl::x509::X509;
use rustls_pemfile::Item;

use super::Decoded;
use crate::error::ExporterError;

/// Decodes every `CERTIFICATE` section found in `raw`, in order.
///
/// Sections with other labels (private keys, CRLs) are skipped silently.
pub fn decode(raw: &[u8]) -> Decoded {
    let mut reader = Cursor::new(raw);
    let mut decoded = Decoded::default();
    let mut index = 0;

    loop {
        let position = reader.position();
        match rustls_pemfile::read_one(&mut reader) {
            Ok(None) => break,
            Ok(Some(Item::X509Certificate(der))) => {
                match X509::from_der(der.as_ref()) {
                    Ok(cert) => decoded.certificates.push(cert),
                    Err(e) => decoded
                        .rejected
                        .push(rejected(index, format!("invalid certificate: {}", e))),
                }
                index += 1;
            }
            Ok(Some(_)) => {}
            Err(e) => {
                decoded.rejected.push(rejected(index, e.to_string()));
                index += 1;
                // a failed read that consumed nothing would fail forever
                if reader.position() == position {
                    break;
                }
            }
        }
    }
    decoded
}

fn rejected(index: usize, reason: String) -> ExporterError {
    ExporterError::decode(format!("PEM certificate block {}: {}", index, reason))
}
