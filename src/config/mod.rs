//! Daemon configuration: YAML file model, defaults and validation.

use std::net::IpAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::discovery::HttpDiscoveryConfig;
use crate::exporter::HttpExporterConfig;
use crate::healthcheck::CheckBundle;
use crate::registry::DEFAULT_RESULT_BUFFER;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot parse configuration file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid configuration: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BasicAuthConfig {
    pub username: String,
    pub password: String,
}

/// HTTP front-end configuration. A reload compares only this struct to
/// decide whether the API server must be restarted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct HttpConfig {
    pub host: IpAddr,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<PathBuf>,
    /// Client CA bundle; configuring it turns on mutual TLS.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cacert: Option<PathBuf>,
    /// Accepted client certificate common names. Requires `cacert`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_cn: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basic_auth: Option<BasicAuthConfig>,
    #[serde(default)]
    pub disable_healthcheck_api: bool,
    #[serde(default)]
    pub disable_result_api: bool,
}

impl HttpConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cert.is_some() != self.key.is_some() {
            return Err(ConfigError::Validation(
                "http: key and cert must be configured together".to_string(),
            ));
        }
        if self.cacert.is_some() && self.cert.is_none() {
            return Err(ConfigError::Validation(
                "http: cacert requires cert and key".to_string(),
            ));
        }
        if !self.allowed_cn.is_empty() && self.cacert.is_none() {
            return Err(ConfigError::Validation(
                "http: allowed-cn requires cacert".to_string(),
            ));
        }
        if let Some(auth) = &self.basic_auth {
            if auth.username.is_empty() || auth.password.is_empty() {
                return Err(ConfigError::Validation(
                    "http: basic-auth username and password cannot be empty".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ExportersConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub http: Vec<HttpExporterConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DiscoveryConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub http: Vec<HttpDiscoveryConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    pub http: HttpConfig,
    /// Capacity of the fan-out channel carrying results to the dispatcher.
    #[serde(default = "default_result_buffer")]
    pub result_buffer: usize,
    /// Label keys lifted from check labels to metric labels. Labels outside
    /// this allowlist never widen metric cardinality.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    #[serde(default, skip_serializing_if = "is_default_exporters")]
    pub exporters: ExportersConfig,
    #[serde(default, skip_serializing_if = "is_default_discovery")]
    pub discovery: DiscoveryConfig,
    #[serde(flatten)]
    pub checks: CheckBundle,
}

fn default_result_buffer() -> usize {
    DEFAULT_RESULT_BUFFER
}

fn is_default_exporters(exporters: &ExportersConfig) -> bool {
    exporters.http.is_empty()
}

fn is_default_discovery(discovery: &DiscoveryConfig) -> bool {
    discovery.http.is_empty()
}

impl Config {
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = serde_yaml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.http.validate()?;
        if self.result_buffer == 0 {
            return Err(ConfigError::Validation(
                "result-buffer must be greater than zero".to_string(),
            ));
        }
        // Check payloads are re-validated by the reconciler; failing here
        // keeps a broken file from tearing down the running state later.
        for config in self.checks.clone().into_configs() {
            config
                .validate()
                .map_err(|err| ConfigError::Validation(err.to_string()))?;
        }
        for exporter in &self.exporters.http {
            exporter
                .validate()
                .map_err(|err| ConfigError::Validation(err.to_string()))?;
        }
        for discovery in &self.discovery.http {
            discovery
                .validate()
                .map_err(|err| ConfigError::Validation(err.to_string()))?;
        }
        Ok(())
    }
}
