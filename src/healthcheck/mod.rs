//! Health-check definitions and probe implementations.
//!
//! A check is described by a serializable configuration (its descriptor) and
//! turned into a runtime probe by [`CheckConfig::build`]. Probes expose a
//! uniform capability set: `initialize` prepares reusable materials once at
//! installation (resolved URL, TLS context, HTTP client), `execute` performs
//! a single attempt against the target.

pub mod command;
pub mod dns;
pub mod http;
pub mod result;
pub mod tcp;
pub mod tls;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub use command::{CommandCheck, CommandCheckConfig};
pub use dns::{DnsCheck, DnsCheckConfig};
pub use http::{HttpCheck, HttpCheckConfig, Method, Protocol};
pub use result::CheckResult;
pub use tcp::{TcpCheck, TcpCheckConfig};
pub use tls::{TlsCheck, TlsCheckConfig};

/// Minimum interval for recurring checks.
pub const MIN_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, thiserror::Error)]
pub enum CheckError {
    /// The descriptor was rejected before installation. Never mutates
    /// registry state.
    #[error("invalid healthcheck configuration: {0}")]
    Validation(String),
    /// `initialize` failed (certificate load, invalid source IP). The check
    /// is not installed.
    #[error("healthcheck initialization failed: {0}")]
    Initialization(String),
    /// A single attempt failed. The check stays scheduled.
    #[error("{0}")]
    Execution(String),
}

/// The authority that installed a check. Reconciliation is scoped to a
/// single source: reloading one source never evicts another source's checks.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Source {
    Configuration,
    Api,
    HttpDiscovery(String),
    KubernetesPod,
    KubernetesService,
    KubernetesCrd,
}

impl Default for Source {
    fn default() -> Self {
        Source::Configuration
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Configuration => write!(f, "configuration"),
            Source::Api => write!(f, "api"),
            Source::HttpDiscovery(name) => write!(f, "http-discovery-{}", name),
            Source::KubernetesPod => write!(f, "kubernetes-pod"),
            Source::KubernetesService => write!(f, "kubernetes-service"),
            Source::KubernetesCrd => write!(f, "kubernetes-crd"),
        }
    }
}

impl FromStr for Source {
    type Err = CheckError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "configuration" => Ok(Source::Configuration),
            "api" => Ok(Source::Api),
            "kubernetes-pod" => Ok(Source::KubernetesPod),
            "kubernetes-service" => Ok(Source::KubernetesService),
            "kubernetes-crd" => Ok(Source::KubernetesCrd),
            other => match other.strip_prefix("http-discovery-") {
                Some(name) if !name.is_empty() => Ok(Source::HttpDiscovery(name.to_string())),
                _ => Err(CheckError::Validation(format!(
                    "unknown healthcheck source {:?}",
                    other
                ))),
            },
        }
    }
}

impl Serialize for Source {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Source {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Fields shared by every check kind. The `source` tag is always stamped by
/// the daemon, payload values are overwritten before installation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Base {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(
        default,
        with = "humantime_serde::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub interval: Option<Duration>,
    #[serde(
        default,
        with = "humantime_serde::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout: Option<Duration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
    #[serde(default)]
    pub one_off: bool,
    #[serde(default)]
    pub source: Source,
}

impl Base {
    /// Shared validation: name, interval and timeout constraints.
    /// `timeout_required` is true for every kind except DNS.
    pub fn validate(&self, timeout_required: bool) -> Result<(), CheckError> {
        if self.name.is_empty() {
            return Err(CheckError::Validation(
                "healthcheck name is missing".to_string(),
            ));
        }
        if timeout_required && self.timeout.is_none() {
            return Err(CheckError::Validation(format!(
                "healthcheck {}: timeout is missing",
                self.name
            )));
        }
        if let Some(timeout) = self.timeout {
            if timeout.is_zero() {
                return Err(CheckError::Validation(format!(
                    "healthcheck {}: timeout must be greater than zero",
                    self.name
                )));
            }
        }
        if !self.one_off {
            let interval = self.interval.ok_or_else(|| {
                CheckError::Validation(format!("healthcheck {}: interval is missing", self.name))
            })?;
            if interval < MIN_INTERVAL {
                return Err(CheckError::Validation(format!(
                    "healthcheck {}: interval must be at least 2 seconds",
                    self.name
                )));
            }
            if let Some(timeout) = self.timeout {
                if interval < timeout {
                    return Err(CheckError::Validation(format!(
                        "healthcheck {}: interval must be greater than or equal to the timeout",
                        self.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Merge labels into the descriptor without clobbering keys it already
    /// sets.
    pub fn merge_labels(&mut self, labels: &HashMap<String, String>) {
        if labels.is_empty() {
            return;
        }
        let target = self.labels.get_or_insert_with(HashMap::new);
        for (key, value) in labels {
            target
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
    }
}

/// Serializable descriptor for any check kind. Structural equality over the
/// full descriptor decides whether a replacement is a no-op.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum CheckConfig {
    Dns(DnsCheckConfig),
    Tcp(TcpCheckConfig),
    Tls(TlsCheckConfig),
    Http(HttpCheckConfig),
    Command(CommandCheckConfig),
}

impl CheckConfig {
    pub fn base(&self) -> &Base {
        match self {
            CheckConfig::Dns(c) => &c.base,
            CheckConfig::Tcp(c) => &c.base,
            CheckConfig::Tls(c) => &c.base,
            CheckConfig::Http(c) => &c.base,
            CheckConfig::Command(c) => &c.base,
        }
    }

    pub fn base_mut(&mut self) -> &mut Base {
        match self {
            CheckConfig::Dns(c) => &mut c.base,
            CheckConfig::Tcp(c) => &mut c.base,
            CheckConfig::Tls(c) => &mut c.base,
            CheckConfig::Http(c) => &mut c.base,
            CheckConfig::Command(c) => &mut c.base,
        }
    }

    pub fn name(&self) -> &str {
        &self.base().name
    }

    pub fn validate(&self) -> Result<(), CheckError> {
        match self {
            CheckConfig::Dns(c) => c.validate(),
            CheckConfig::Tcp(c) => c.validate(),
            CheckConfig::Tls(c) => c.validate(),
            CheckConfig::Http(c) => c.validate(),
            CheckConfig::Command(c) => c.validate(),
        }
    }

    /// Turn the descriptor into an uninitialized runtime probe.
    pub fn build(self) -> Check {
        match self {
            CheckConfig::Dns(c) => Check::Dns(DnsCheck::new(c)),
            CheckConfig::Tcp(c) => Check::Tcp(TcpCheck::new(c)),
            CheckConfig::Tls(c) => Check::Tls(TlsCheck::new(c)),
            CheckConfig::Http(c) => Check::Http(HttpCheck::new(c)),
            CheckConfig::Command(c) => Check::Command(CommandCheck::new(c)),
        }
    }
}

/// Runtime probe: a descriptor plus the reusable materials prepared by
/// `initialize`.
#[derive(Debug)]
pub enum Check {
    Dns(DnsCheck),
    Tcp(TcpCheck),
    Tls(TlsCheck),
    Http(HttpCheck),
    Command(CommandCheck),
}

impl Check {
    pub fn base(&self) -> &Base {
        match self {
            Check::Dns(c) => &c.config.base,
            Check::Tcp(c) => &c.config.base,
            Check::Tls(c) => &c.config.base,
            Check::Http(c) => &c.config.base,
            Check::Command(c) => &c.config.base,
        }
    }

    pub fn base_mut(&mut self) -> &mut Base {
        match self {
            Check::Dns(c) => &mut c.config.base,
            Check::Tcp(c) => &mut c.config.base,
            Check::Tls(c) => &mut c.config.base,
            Check::Http(c) => &mut c.config.base,
            Check::Command(c) => &mut c.config.base,
        }
    }

    pub fn name(&self) -> &str {
        &self.base().name
    }

    pub fn set_source(&mut self, source: Source) {
        self.base_mut().source = source;
    }

    /// A copy of the serializable descriptor, used for structural equality
    /// in the registry and for the list/get APIs.
    pub fn config(&self) -> CheckConfig {
        match self {
            Check::Dns(c) => CheckConfig::Dns(c.config.clone()),
            Check::Tcp(c) => CheckConfig::Tcp(c.config.clone()),
            Check::Tls(c) => CheckConfig::Tls(c.config.clone()),
            Check::Http(c) => CheckConfig::Http(c.config.clone()),
            Check::Command(c) => CheckConfig::Command(c.config.clone()),
        }
    }

    /// Human-readable description of what the probe targets.
    pub fn summary(&self) -> String {
        match self {
            Check::Dns(c) => c.summary(),
            Check::Tcp(c) => c.summary(),
            Check::Tls(c) => c.summary(),
            Check::Http(c) => c.summary(),
            Check::Command(c) => c.summary(),
        }
    }

    pub fn validate(&self) -> Result<(), CheckError> {
        match self {
            Check::Dns(c) => c.config.validate(),
            Check::Tcp(c) => c.config.validate(),
            Check::Tls(c) => c.config.validate(),
            Check::Http(c) => c.config.validate(),
            Check::Command(c) => c.config.validate(),
        }
    }

    /// Prepare reusable materials. Called exactly once, at installation.
    pub async fn initialize(&mut self) -> Result<(), CheckError> {
        match self {
            Check::Dns(c) => c.initialize(),
            Check::Tcp(c) => c.initialize(),
            Check::Tls(c) => c.initialize(),
            Check::Http(c) => c.initialize(),
            Check::Command(c) => c.initialize(),
        }
    }

    /// One attempt against the target. The caller wraps the attempt in the
    /// per-attempt deadline.
    pub async fn execute(&self) -> Result<(), CheckError> {
        match self {
            Check::Dns(c) => c.execute().await,
            Check::Tcp(c) => c.execute().await,
            Check::Tls(c) => c.execute().await,
            Check::Http(c) => c.execute().await,
            Check::Command(c) => c.execute().await,
        }
    }
}

/// Grouped check lists, the shape shared by the configuration file, the bulk
/// API payload, and HTTP service-discovery responses.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CheckBundle {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dns_checks: Vec<DnsCheckConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tcp_checks: Vec<TcpCheckConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tls_checks: Vec<TlsCheckConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub http_checks: Vec<HttpCheckConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command_checks: Vec<CommandCheckConfig>,
}

impl CheckBundle {
    /// Flatten the grouped lists into descriptors, in a stable order.
    pub fn into_configs(self) -> Vec<CheckConfig> {
        let mut configs = Vec::with_capacity(self.len());
        configs.extend(self.dns_checks.into_iter().map(CheckConfig::Dns));
        configs.extend(self.tcp_checks.into_iter().map(CheckConfig::Tcp));
        configs.extend(self.tls_checks.into_iter().map(CheckConfig::Tls));
        configs.extend(self.http_checks.into_iter().map(CheckConfig::Http));
        configs.extend(self.command_checks.into_iter().map(CheckConfig::Command));
        configs
    }

    pub fn len(&self) -> usize {
        self.dns_checks.len()
            + self.tcp_checks.len()
            + self.tls_checks.len()
            + self.http_checks.len()
            + self.command_checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True if any descriptor carries the one-off flag. Bulk installation
    /// and reconciliation reject those.
    pub fn has_one_off(&self) -> bool {
        self.dns_checks.iter().any(|c| c.base.one_off)
            || self.tcp_checks.iter().any(|c| c.base.one_off)
            || self.tls_checks.iter().any(|c| c.base.one_off)
            || self.http_checks.iter().any(|c| c.base.one_off)
            || self.command_checks.iter().any(|c| c.base.one_off)
    }
}
