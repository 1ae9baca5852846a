//! Configuration file management for cert-exporter.
//!
//! This module handles loading, parsing, and merging configuration from TOML files
//! and command-line arguments, and resolves the result into validated
//! [`Settings`].
//!
//! # Configuration Precedence
//!
//! 1. Default values (lowest priority)
//! 2. Configuration file (specified with --config)
//! 3. Command-line arguments (highest priority)
//!
//! # Example Configuration File
//!
//! ```toml
//! polling_period = "1m"
//! label_selector = "cert-exporter=true"
//! namespaces = ["prod"]
//!
//! [keystores]
//! enabled = true
//! keys = ["keystore.jks"]
//! annotation_key = "password-secret-ref"
//! password_key = "password"
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::checker::CheckerSettings;
use crate::source::SourceKind;
use crate::telemetry::LogFormat;

pub const DEFAULT_LISTEN_ADDRESS: &str = "0.0.0.0:8080";
pub const DEFAULT_POLLING_PERIOD: &str = "1m";
pub const DEFAULT_ANNOTATION_KEY: &str = "cert-exporter.io/password-secret-ref";
pub const DEFAULT_PASSWORD_KEY: &str = "password";

/// Main configuration structure for cert-exporter.
///
/// All fields are optional to support partial configuration and merging.
/// Missing values will be filled in by defaults or overridden by CLI arguments.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Config {
    /// Path to a kubeconfig file; in-cluster configuration is inferred when unset
    pub kubeconfig: Option<String>,
    /// Address of the `/metrics` endpoint
    pub listen_address: Option<String>,
    /// Time between poll cycles, e.g. "30s" or "5m"
    pub polling_period: Option<String>,
    /// Label selector applied when listing resources
    pub label_selector: Option<String>,
    /// Namespaces to scan; empty scans all namespaces
    pub namespaces: Option<Vec<String>>,
    /// Log output: text or json
    pub log_format: Option<String>,
    /// PEM certificates in secrets
    pub secrets: Option<SourceConfig>,
    /// Java keystores in secrets
    pub keystores: Option<SourceConfig>,
    /// PEM certificates in config maps
    pub configmaps: Option<SourceConfig>,
    /// cert-manager certificate requests
    pub certrequests: Option<SourceConfig>,
}

/// Per source kind settings.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
pub struct SourceConfig {
    pub enabled: Option<bool>,
    /// Data keys to export; "*" exports every key
    pub keys: Option<Vec<String>>,
    /// Overrides the global label selector for this kind
    pub label_selector: Option<String>,
    /// Annotation naming the passphrase secret (keystores only)
    pub annotation_key: Option<String>,
    /// Data key holding the passphrase (keystores only)
    pub password_key: Option<String>,
}

impl SourceConfig {
    fn defaults(kind: SourceKind) -> Self {
        let keystore = kind == SourceKind::Keystore;
        SourceConfig {
            enabled: Some(matches!(kind, SourceKind::Secret | SourceKind::Keystore)),
            keys: Some(kind.default_keys()),
            label_selector: None,
            annotation_key: keystore.then(|| DEFAULT_ANNOTATION_KEY.to_string()),
            password_key: keystore.then(|| DEFAULT_PASSWORD_KEY.to_string()),
        }
    }

    fn merge_with(mut self, other: SourceConfig) -> Self {
        if other.enabled.is_some() {
            self.enabled = other.enabled;
        }
        if other.keys.is_some() {
            self.keys = other.keys;
        }
        if other.label_selector.is_some() {
            self.label_selector = other.label_selector;
        }
        if other.annotation_key.is_some() {
            self.annotation_key = other.annotation_key;
        }
        if other.password_key.is_some() {
            self.password_key = other.password_key;
        }
        self
    }
}

/// Validated settings the binary runs with.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub kubeconfig: Option<PathBuf>,
    pub listen_address: SocketAddr,
    pub log_format: LogFormat,
    /// One entry per enabled source kind
    pub checkers: Vec<(SourceKind, CheckerSettings)>,
}

impl Default for Config {
    /// Creates a default configuration with sensible defaults.
    ///
    /// # Default Values
    ///
    /// - `listen_address`: "0.0.0.0:8080"
    /// - `polling_period`: "1m"
    /// - `label_selector`: "" (every resource)
    /// - `namespaces`: [] (all namespaces)
    /// - `secrets` and `keystores` enabled, `configmaps` and `certrequests` disabled
    fn default() -> Self {
        Config {
            kubeconfig: None,
            listen_address: Some(DEFAULT_LISTEN_ADDRESS.to_string()),
            polling_period: Some(DEFAULT_POLLING_PERIOD.to_string()),
            label_selector: Some(String::new()),
            namespaces: Some(Vec::new()),
            log_format: Some("text".to_string()),
            secrets: Some(SourceConfig::defaults(SourceKind::Secret)),
            keystores: Some(SourceConfig::defaults(SourceKind::Keystore)),
            configmaps: Some(SourceConfig::defaults(SourceKind::ConfigMap)),
            certrequests: Some(SourceConfig::defaults(SourceKind::CertRequest)),
        }
    }
}

impl Config {
    /// Loads configuration from a TOML file.
    ///
    /// # Returns
    ///
    /// * `Ok(Config)` - Successfully parsed configuration
    /// * `Err(ConfigError::Io)` - File could not be read
    /// * `Err(ConfigError::Parse)` - File contains invalid TOML
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content =
            fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io(e.to_string()))?;

        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;

        Ok(config)
    }

    /// Merges this configuration with another, prioritizing the other's values.
    ///
    /// For each field, if the `other` config has a value (Some), it overrides
    /// this config's value. Source tables are merged field by field.
    pub fn merge_with(mut self, other: Config) -> Self {
        if other.kubeconfig.is_some() {
            self.kubeconfig = other.kubeconfig;
        }
        if other.listen_address.is_some() {
            self.listen_address = other.listen_address;
        }
        if other.polling_period.is_some() {
            self.polling_period = other.polling_period;
        }
        if other.label_selector.is_some() {
            self.label_selector = other.label_selector;
        }
        if other.namespaces.is_some() {
            self.namespaces = other.namespaces;
        }
        if other.log_format.is_some() {
            self.log_format = other.log_format;
        }
        self.secrets = merge_source(self.secrets, other.secrets);
        self.keystores = merge_source(self.keystores, other.keystores);
        self.configmaps = merge_source(self.configmaps, other.configmaps);
        self.certrequests = merge_source(self.certrequests, other.certrequests);
        self
    }

    /// Creates a Config from command-line arguments for merging.
    ///
    /// Only provided arguments (Some values) override other configurations.
    /// When `sources` is given, exactly the listed kinds are enabled.
    pub fn from_cli_args(
        kubeconfig: Option<String>,
        listen_address: Option<String>,
        polling_period: Option<String>,
        label_selector: Option<String>,
        namespaces: Option<Vec<String>>,
        log_format: Option<String>,
        sources: Option<Vec<SourceKind>>,
    ) -> Self {
        let enabled = |kind: SourceKind| {
            sources.as_ref().map(|sources| SourceConfig {
                enabled: Some(sources.contains(&kind)),
                ..Default::default()
            })
        };
        Config {
            kubeconfig,
            listen_address,
            polling_period,
            label_selector,
            namespaces,
            log_format,
            secrets: enabled(SourceKind::Secret),
            keystores: enabled(SourceKind::Keystore),
            configmaps: enabled(SourceKind::ConfigMap),
            certrequests: enabled(SourceKind::CertRequest),
        }
    }

    fn source(&self, kind: SourceKind) -> Option<&SourceConfig> {
        match kind {
            SourceKind::Secret => self.secrets.as_ref(),
            SourceKind::Keystore => self.keystores.as_ref(),
            SourceKind::ConfigMap => self.configmaps.as_ref(),
            SourceKind::CertRequest => self.certrequests.as_ref(),
        }
    }

    /// Validates the merged configuration and fills remaining gaps with
    /// defaults.
    pub fn resolve(&self) -> Result<Settings, ConfigError> {
        let period_text = self
            .polling_period
            .as_deref()
            .unwrap_or(DEFAULT_POLLING_PERIOD);
        let polling_period = duration_str::parse(period_text).map_err(|e| {
            ConfigError::Validation(format!("invalid polling_period '{}': {}", period_text, e))
        })?;
        if polling_period.is_zero() {
            return Err(ConfigError::Validation(
                "polling_period must be greater than zero".to_string(),
            ));
        }

        let address_text = self
            .listen_address
            .as_deref()
            .unwrap_or(DEFAULT_LISTEN_ADDRESS);
        let listen_address = address_text.parse::<SocketAddr>().map_err(|e| {
            ConfigError::Validation(format!("invalid listen_address '{}': {}", address_text, e))
        })?;

        let log_format = match self.log_format.as_deref() {
            Some(format) => format.parse::<LogFormat>().map_err(ConfigError::Validation)?,
            None => LogFormat::default(),
        };

        let label_selector = self.label_selector.clone().unwrap_or_default();
        let namespaces: Vec<String> = self
            .namespaces
            .clone()
            .unwrap_or_default()
            .into_iter()
            .filter(|ns| !ns.trim().is_empty())
            .collect();

        let mut checkers = Vec::new();
        for kind in SourceKind::ALL {
            let source = match self.source(kind) {
                Some(source) => SourceConfig::defaults(kind).merge_with(source.clone()),
                None => SourceConfig::defaults(kind),
            };
            if !source.enabled.unwrap_or(false) {
                continue;
            }
            let keys = source.keys.unwrap_or_else(|| kind.default_keys());
            if keys.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "[{}] keys must not be empty",
                    table_name(kind)
                )));
            }
            let annotation_key = source.annotation_key.unwrap_or_default();
            if kind.format().needs_passphrase() && annotation_key.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "[{}] annotation_key must not be empty",
                    table_name(kind)
                )));
            }
            checkers.push((
                kind,
                CheckerSettings {
                    polling_period,
                    label_selector: source
                        .label_selector
                        .unwrap_or_else(|| label_selector.clone()),
                    namespaces: namespaces.clone(),
                    keys,
                    annotation_key,
                    password_key: source.password_key.unwrap_or_default(),
                },
            ));
        }
        if checkers.is_empty() {
            return Err(ConfigError::Validation(
                "at least one source kind must be enabled".to_string(),
            ));
        }

        Ok(Settings {
            kubeconfig: self.kubeconfig.as_ref().map(PathBuf::from),
            listen_address,
            log_format,
            checkers,
        })
    }

    /// Generates an example configuration file in TOML format.
    pub fn example_toml() -> String {
        let example = Config {
            kubeconfig: None,
            listen_address: Some(DEFAULT_LISTEN_ADDRESS.to_string()),
            polling_period: Some("5m".to_string()),
            label_selector: Some("cert-exporter=true".to_string()),
            namespaces: Some(vec!["prod".to_string(), "staging".to_string()]),
            log_format: Some("json".to_string()),
            secrets: Some(SourceConfig::defaults(SourceKind::Secret)),
            keystores: Some(SourceConfig::defaults(SourceKind::Keystore)),
            configmaps: Some(SourceConfig {
                enabled: Some(true),
                keys: Some(vec!["*".to_string()]),
                label_selector: Some("cert-exporter/bundle=true".to_string()),
                annotation_key: None,
                password_key: None,
            }),
            certrequests: Some(SourceConfig {
                enabled: Some(false),
                ..Default::default()
            }),
        };

        toml::to_string_pretty(&example)
            .unwrap_or_else(|_| "# Error generating example".to_string())
    }
}

fn merge_source(base: Option<SourceConfig>, other: Option<SourceConfig>) -> Option<SourceConfig> {
    match (base, other) {
        (Some(base), Some(other)) => Some(base.merge_with(other)),
        (None, other) => other,
        (base, None) => base,
    }
}

fn table_name(kind: SourceKind) -> &'static str {
    match kind {
        SourceKind::Secret => "secrets",
        SourceKind::Keystore => "keystores",
        SourceKind::ConfigMap => "configmaps",
        SourceKind::CertRequest => "certrequests",
    }
}

/// Errors that can occur during configuration loading and parsing.
#[derive(Debug)]
pub enum ConfigError {
    /// I/O error (file not found, permission denied, etc.)
    Io(String),
    /// TOML parsing error (invalid syntax, type mismatch, etc.)
    Parse(String),
    /// Validation error (missing required fields, invalid values, etc.)
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(msg) => write!(f, "IO Error: {}", msg),
            ConfigError::Parse(msg) => write!(f, "Parse Error: {}", msg),
            ConfigError::Validation(msg) => write!(f, "Validation Error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_config_from_toml() {
        let toml_content = r#"
            polling_period = "30s"
            label_selector = "cert-exporter=true"
            namespaces = ["prod", "staging"]

            [keystores]
            enabled = true
            annotation_key = "password-secret-ref"

            [configmaps]
            enabled = true
            keys = ["*"]
        "#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();

        let config = Config::from_file(temp_file.path()).unwrap();

        assert_eq!(config.polling_period, Some("30s".to_string()));
        assert_eq!(
            config.namespaces,
            Some(vec!["prod".to_string(), "staging".to_string()])
        );
        assert_eq!(config.listen_address, None);

        let keystores = config.keystores.unwrap();
        assert_eq!(keystores.enabled, Some(true));
        assert_eq!(
            keystores.annotation_key,
            Some("password-secret-ref".to_string())
        );
        assert_eq!(keystores.keys, None);
        assert_eq!(config.configmaps.unwrap().keys, Some(vec!["*".to_string()]));
    }

    #[test]
    fn test_config_merge() {
        let file_config = Config {
            kubeconfig: None,
            listen_address: None,
            polling_period: Some("30s".to_string()),
            label_selector: Some("cert-exporter=true".to_string()),
            namespaces: None,
            log_format: None,
            secrets: None,
            keystores: Some(SourceConfig {
                password_key: Some("storepass".to_string()),
                ..Default::default()
            }),
            configmaps: None,
            certrequests: None,
        };

        let merged = Config::default().merge_with(file_config);

        // Override config should take precedence where specified
        assert_eq!(merged.polling_period, Some("30s".to_string()));
        assert_eq!(merged.listen_address, Some(DEFAULT_LISTEN_ADDRESS.to_string())); // From base
        let keystores = merged.keystores.unwrap();
        assert_eq!(keystores.password_key, Some("storepass".to_string())); // Overridden
        assert_eq!(
            keystores.annotation_key,
            Some(DEFAULT_ANNOTATION_KEY.to_string())
        ); // From base
        assert_eq!(keystores.enabled, Some(true)); // From base
    }

    #[test]
    fn test_config_default_resolves() {
        let settings = Config::default().resolve().unwrap();

        assert_eq!(settings.listen_address, DEFAULT_LISTEN_ADDRESS.parse().unwrap());
        assert_eq!(settings.log_format, LogFormat::Text);
        assert_eq!(settings.kubeconfig, None);
        let kinds: Vec<SourceKind> = settings.checkers.iter().map(|(kind, _)| *kind).collect();
        assert_eq!(kinds, vec![SourceKind::Secret, SourceKind::Keystore]);

        let (_, keystore) = &settings.checkers[1];
        assert_eq!(keystore.polling_period, Duration::from_secs(60));
        assert_eq!(keystore.keys, vec!["keystore.jks".to_string()]);
        assert_eq!(keystore.annotation_key, DEFAULT_ANNOTATION_KEY);
        assert_eq!(keystore.password_key, DEFAULT_PASSWORD_KEY);
        assert!(keystore.namespaces.is_empty());
    }

    #[test]
    fn test_config_from_cli_args() {
        let config = Config::from_cli_args(
            Some("/etc/kubeconfig".to_string()),
            None,
            Some("10s".to_string()),
            None,
            Some(vec!["prod".to_string()]),
            Some("json".to_string()),
            Some(vec![SourceKind::CertRequest]),
        );

        let settings = Config::default().merge_with(config).resolve().unwrap();

        assert_eq!(settings.kubeconfig, Some(PathBuf::from("/etc/kubeconfig")));
        assert_eq!(settings.log_format, LogFormat::Json);
        assert_eq!(settings.checkers.len(), 1);
        let (kind, checker) = &settings.checkers[0];
        assert_eq!(*kind, SourceKind::CertRequest);
        assert_eq!(checker.polling_period, Duration::from_secs(10));
        assert_eq!(checker.namespaces, vec!["prod".to_string()]);
        assert_eq!(checker.keys, vec!["certificate".to_string()]);
    }

    #[test]
    fn test_source_label_selector_override() {
        let config = Config {
            configmaps: Some(SourceConfig {
                enabled: Some(true),
                label_selector: Some("bundle=true".to_string()),
                ..Default::default()
            }),
            label_selector: Some("cert-exporter=true".to_string()),
            ..Config::default()
        };

        let settings = config.resolve().unwrap();

        for (kind, checker) in &settings.checkers {
            match kind {
                SourceKind::ConfigMap => assert_eq!(checker.label_selector, "bundle=true"),
                _ => assert_eq!(checker.label_selector, "cert-exporter=true"),
            }
        }
    }

    #[test]
    fn test_invalid_polling_period() {
        let config = Config {
            polling_period: Some("soon".to_string()),
            ..Config::default()
        };

        match config.resolve().unwrap_err() {
            ConfigError::Validation(msg) => assert!(msg.contains("polling_period")),
            other => panic!("Expected ValidationError, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_polling_period() {
        let config = Config {
            polling_period: Some("0s".to_string()),
            ..Config::default()
        };

        assert!(matches!(config.resolve(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_no_source_enabled() {
        let config = Config::default().merge_with(Config::from_cli_args(
            None,
            None,
            None,
            None,
            None,
            None,
            Some(vec![]),
        ));

        assert!(matches!(config.resolve(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_empty_annotation_key_rejected() {
        let config = Config {
            keystores: Some(SourceConfig {
                annotation_key: Some(" ".to_string()),
                ..Default::default()
            }),
            ..Config::default()
        };

        assert!(matches!(config.resolve(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_invalid_toml() {
        let invalid_toml = "namespaces = [invalid toml";

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(invalid_toml.as_bytes()).unwrap();

        let result = Config::from_file(temp_file.path());
        assert!(result.is_err());

        match result.unwrap_err() {
            ConfigError::Parse(_) => {} // Expected
            other => panic!("Expected ParseError, got {:?}", other),
        }
    }

    #[test]
    fn test_example_toml_generation() {
        let example = Config::example_toml();

        // Should be valid TOML and a usable configuration
        let parsed: Config = toml::from_str(&example).unwrap();
        let settings = Config::default().merge_with(parsed).resolve().unwrap();

        assert_eq!(settings.checkers.len(), 3);
        assert_eq!(settings.log_format, LogFormat::Json);
    }
}
