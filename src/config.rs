//! Configuration file management for sslcheck.
//!
//! Settings come from three places, later ones overriding earlier ones:
//!
//! 1. Default values (lowest priority)
//! 2. Configuration file (`sslcheck.toml` or the one given with `--config`)
//! 3. Command-line arguments (highest priority)
//!
//! # Example Configuration File
//!
//! ```toml
//! host = "example.com"
//! timeout = 5
//! verbose = true
//! output = "summary"
//! ca_file = "/etc/ssl/internal-roots.pem"
//! probe_retries = 1
//! exit_code = 2
//!
//! [prometheus]
//! enabled = true
//! address = "http://localhost:9091"
//! ```

use crate::connection::{Target, DEFAULT_PORT};
use crate::report::OutputFormat;
use crate::verify::RootStore;
use crate::{CheckOptions, DEFAULT_TIMEOUT_SECS};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Configuration file looked up in the working directory when `--config` is
/// not given.
pub const DEFAULT_CONFIG_FILE: &str = "sslcheck.toml";

/// All fields are optional so partial configurations can be merged.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Config {
    /// Host to check: `host`, `host:port` or `https://host:port`
    pub host: Option<String>,
    /// Port, overriding any port given with the host
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Per-connection timeout in seconds
    pub timeout: Option<u64>,
    /// Show detailed certificate information
    pub verbose: Option<bool>,
    /// Output format: text, json, summary
    pub output: Option<String>,
    /// PEM bundle of trusted roots used instead of the system store
    pub ca_file: Option<String>,
    /// Extra attempts for a failed protocol probe
    pub probe_retries: Option<u32>,
    /// Exit code when chain verification fails or the leaf is not valid
    pub exit_code: Option<i32>,
    /// Prometheus configuration
    pub prometheus: Option<PrometheusConfig>,
}

/// Prometheus Push Gateway settings.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct PrometheusConfig {
    /// Enable pushing metrics after the report
    pub enabled: Option<bool>,
    /// Push gateway address (e.g., "http://localhost:9091")
    pub address: Option<String>,
}

/// Fully resolved settings for one run.
#[derive(Debug, Clone)]
pub struct Settings {
    pub target: Target,
    pub verbose: bool,
    pub output: OutputFormat,
    pub options: CheckOptions,
    pub exit_code: i32,
    /// Push gateway address when metrics are enabled
    pub prometheus_address: Option<String>,
}

impl Default for Config {
    /// - `host`: None (must be provided)
    /// - `port`: None (443 unless the host carries one)
    /// - `timeout`: 10 seconds
    /// - `verbose`: false
    /// - `output`: "text"
    /// - `probe_retries`: 0
    /// - `exit_code`: 0 (a failed verification is reported, not an error)
    /// - `prometheus.enabled`: false
    /// - `prometheus.address`: "http://localhost:9091"
    fn default() -> Self {
        Config {
            host: None,
            port: None,
            timeout: Some(DEFAULT_TIMEOUT_SECS),
            verbose: Some(false),
            output: Some("text".to_string()),
            ca_file: None,
            probe_retries: Some(0),
            exit_code: Some(0),
            prometheus: Some(PrometheusConfig {
                enabled: Some(false),
                address: Some("http://localhost:9091".to_string()),
            }),
        }
    }
}

impl Config {
    /// Loads configuration from a TOML file.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use sslcheck::config::Config;
    /// let config = Config::from_file("sslcheck.toml")?;
    /// # Ok::<(), sslcheck::config::ConfigError>(())
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content =
            fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io(e.to_string()))?;

        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;

        Ok(config)
    }

    /// Merges this configuration with another, prioritizing the other's values.
    pub fn merge_with(mut self, other: Config) -> Self {
        if other.host.is_some() {
            self.host = other.host;
        }
        if other.port.is_some() {
            self.port = other.port;
        }
        if other.timeout.is_some() {
            self.timeout = other.timeout;
        }
        if other.verbose.is_some() {
            self.verbose = other.verbose;
        }
        if other.output.is_some() {
            self.output = other.output;
        }
        if other.ca_file.is_some() {
            self.ca_file = other.ca_file;
        }
        if other.probe_retries.is_some() {
            self.probe_retries = other.probe_retries;
        }
        if other.exit_code.is_some() {
            self.exit_code = other.exit_code;
        }
        if let Some(other_prom) = other.prometheus {
            if let Some(ref mut self_prom) = self.prometheus {
                if other_prom.enabled.is_some() {
                    self_prom.enabled = other_prom.enabled;
                }
                if other_prom.address.is_some() {
                    self_prom.address = other_prom.address;
                }
            } else {
                self.prometheus = Some(other_prom);
            }
        }
        self
    }

    /// Creates a Config holding only the values given on the command line.
    #[allow(clippy::too_many_arguments)]
    pub fn from_cli_args(
        host: Option<String>,
        port: Option<u16>,
        timeout: Option<u64>,
        verbose: Option<bool>,
        output: Option<String>,
        ca_file: Option<String>,
        probe_retries: Option<u32>,
        prometheus: Option<bool>,
        prometheus_address: Option<String>,
    ) -> Self {
        Config {
            host,
            port,
            timeout,
            verbose,
            output,
            ca_file,
            probe_retries,
            exit_code: None,
            prometheus: Some(PrometheusConfig {
                enabled: prometheus,
                address: prometheus_address,
            }),
        }
    }

    /// Validates the merged configuration and resolves it into [`Settings`].
    ///
    /// This loads the CA bundle, if any, so a bad bundle is reported before
    /// any connection is made.
    pub fn resolve(self) -> Result<Settings, ConfigError> {
        let host = match self.host.as_deref().map(str::trim) {
            Some(host) if !host.is_empty() => host.to_string(),
            _ => return Err(ConfigError::Validation("host is required".to_string())),
        };
        let mut target = Target::parse(&host, DEFAULT_PORT)
            .map_err(|e| ConfigError::Validation(e.to_string()))?;
        if let Some(port) = self.port {
            target.port = port;
        }

        let timeout = self.timeout.unwrap_or(DEFAULT_TIMEOUT_SECS);
        if timeout == 0 {
            return Err(ConfigError::Validation(
                "timeout must be at least one second".to_string(),
            ));
        }

        let output = match self.output.as_deref() {
            Some(output) => OutputFormat::from_str(output).map_err(|_| {
                ConfigError::Validation(format!(
                    "unknown output format '{}', expected text, json or summary",
                    output
                ))
            })?,
            None => OutputFormat::default(),
        };

        let roots = match self.ca_file.as_deref() {
            Some(path) => {
                RootStore::from_pem_file(path).map_err(|e| ConfigError::Validation(e.to_string()))?
            }
            None => RootStore::System,
        };

        let prometheus_address = self
            .prometheus
            .filter(|prom| prom.enabled.unwrap_or(false))
            .map(|prom| {
                prom.address
                    .unwrap_or_else(|| "http://localhost:9091".to_string())
            });

        Ok(Settings {
            target,
            verbose: self.verbose.unwrap_or(false),
            output,
            options: CheckOptions {
                timeout: Duration::from_secs(timeout),
                probe_retries: self.probe_retries.unwrap_or(0),
                roots,
            },
            exit_code: self.exit_code.unwrap_or(0),
            prometheus_address,
        })
    }

    /// Example configuration in TOML format, with every option set.
    ///
    /// ```
    /// # use sslcheck::config::Config;
    /// let example = Config::example_toml();
    /// assert!(example.contains("host"));
    /// ```
    pub fn example_toml() -> String {
        let example = Config {
            host: Some("example.com:443".to_string()),
            port: None,
            timeout: Some(10),
            verbose: Some(true),
            output: Some("summary".to_string()),
            ca_file: Some("/etc/ssl/certs/ca-certificates.crt".to_string()),
            probe_retries: Some(1),
            exit_code: Some(1),
            prometheus: Some(PrometheusConfig {
                enabled: Some(true),
                address: Some("http://localhost:9091".to_string()),
            }),
        };

        toml::to_string_pretty(&example)
            .unwrap_or_else(|_| "# Error generating example".to_string())
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
