//! Error types for certificate discovery and export.
//!
//! Every failure the exporter can hit while walking cluster resources is a
//! variant of [`ExporterError`]. Apart from [`ExporterError::ClientConstruction`]
//! all of them are non-fatal: the checker logs them and moves on to the next
//! namespace, resource or PEM block.

use std::fmt;
use std::io;

/// Error type for certificate discovery, decoding and metric export.
#[derive(Debug)]
pub enum ExporterError {
    /// Listing resources in a namespace failed; the namespace is skipped
    Listing {
        /// Namespace that could not be listed (empty for cluster-wide)
        namespace: String,
        /// Error reported by the cluster API
        details: String,
    },

    /// A resource does not carry the expected data key
    MissingKey {
        namespace: String,
        /// Resource name
        name: String,
        /// Data key that was looked up
        key: String,
    },

    /// A keystore resource has no passphrase reference annotation
    MissingAnnotation {
        namespace: String,
        /// Resource name
        name: String,
        /// Annotation key that was looked up
        annotation: String,
    },

    /// Fetching a single resource by name failed
    Fetch {
        namespace: String,
        /// Name of the resource that could not be fetched
        name: String,
        /// Error reported by the cluster API
        details: String,
    },

    /// Raw bytes could not be decoded (bad PEM block, corrupt keystore, wrong passphrase)
    Decode {
        /// Description of what went wrong
        reason: String,
    },

    /// An X.509 certificate could not be parsed
    Parse {
        /// Description of what went wrong
        reason: String,
    },

    /// The cluster client could not be built; checkers cannot run
    ClientConstruction {
        /// Details about why the client could not be built
        details: String,
    },

    /// Metric registration or encoding failed
    Metrics {
        /// The underlying prometheus error
        details: String,
    },

    /// OpenSSL error occurred
    OpenSSLError {
        /// The underlying OpenSSL error
        details: String,
    },

    /// Generic I/O error
    IoError {
        /// The underlying I/O error
        source: io::Error,
    },

    /// A generic error with a custom message
    Other {
        /// Error message
        message: String,
    },
}

impl ExporterError {
    /// Shorthand for a [`ExporterError::Decode`] error.
    pub fn decode(reason: impl Into<String>) -> Self {
        Self::Decode {
            reason: reason.into(),
        }
    }

    /// Shorthand for a [`ExporterError::Parse`] error.
    pub fn parse(reason: impl Into<String>) -> Self {
        Self::Parse {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ExporterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Listing { namespace, details } if namespace.is_empty() => {
                write!(f, "Failed to list resources in all namespaces: {}", details)
            }
            Self::Listing { namespace, details } => {
                write!(
                    f,
                    "Failed to list resources in namespace {}: {}",
                    namespace, details
                )
            }
            Self::MissingKey {
                namespace,
                name,
                key,
            } => {
                write!(f, "Resource {}/{} has no data key '{}'", namespace, name, key)
            }
            Self::MissingAnnotation {
                namespace,
                name,
                annotation,
            } => {
                write!(
                    f,
                    "Resource {}/{} is missing annotation '{}'",
                    namespace, name, annotation
                )
            }
            Self::Fetch {
                namespace,
                name,
                details,
            } => {
                write!(f, "Failed to get {}/{}: {}", namespace, name, details)
            }
            Self::Decode { reason } => {
                write!(f, "Decode error: {}", reason)
            }
            Self::Parse { reason } => {
                write!(f, "Certificate parse error: {}", reason)
            }
            Self::ClientConstruction { details } => {
                write!(f, "Failed to create cluster client: {}", details)
            }
            Self::Metrics { details } => {
                write!(f, "Metrics error: {}", details)
            }
            Self::OpenSSLError { details } => {
                write!(f, "OpenSSL error: {}", details)
            }
            Self::IoError { source } => {
                write!(f, "I/O error: {}", source)
            }
            Self::Other { message } => {
                write!(f, "{}", message)
            }
        }
    }
}

impl std::error::Error for ExporterError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::IoError { source } => Some(source),
            _ => None,
        }
    }
}

impl From<io::Error> for ExporterError {
    fn from(e: io::Error) -> Self {
        Self::IoError { source: e }
    }
}

impl From<&str> for ExporterError {
    fn from(s: &str) -> Self {
        Self::Other {
            message: s.to_string(),
        }
    }
}

impl From<String> for ExporterError {
    fn from(s: String) -> Self {
        Self::Other { message: s }
    }
}

impl From<openssl::error::ErrorStack> for ExporterError {
    fn from(e: openssl::error::ErrorStack) -> Self {
        Self::OpenSSLError {
            details: e.to_string(),
        }
    }
}

impl From<prometheus::Error> for ExporterError {
    fn from(e: prometheus::Error) -> Self {
        Self::Metrics {
            details: e.to_string(),
        }
    }
}
