//! DNS health check: resolve A/AAAA records for a domain and optionally
//! verify that every expected IP shows up in the reply.

use std::net::IpAddr;

use hickory_resolver::TokioAsyncResolver;
use serde::{Deserialize, Serialize};

use crate::healthcheck::{Base, CheckError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DnsCheckConfig {
    #[serde(flatten)]
    pub base: Base,
    pub domain: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_ips: Option<Vec<IpAddr>>,
}

impl DnsCheckConfig {
    pub fn validate(&self) -> Result<(), CheckError> {
        // Timeout is optional for DNS, the resolver applies its own request
        // timeouts when unset.
        self.base.validate(false)?;
        if self.domain.is_empty() {
            return Err(CheckError::Validation(format!(
                "healthcheck {}: domain is missing",
                self.base.name
            )));
        }
        Ok(())
    }
}

pub struct DnsCheck {
    pub config: DnsCheckConfig,
    resolver: Option<TokioAsyncResolver>,
}

impl std::fmt::Debug for DnsCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DnsCheck")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl DnsCheck {
    pub fn new(config: DnsCheckConfig) -> Self {
        DnsCheck {
            config,
            resolver: None,
        }
    }

    pub fn summary(&self) -> String {
        format!("dns check on {}", self.config.domain)
    }

    pub fn initialize(&mut self) -> Result<(), CheckError> {
        let resolver = TokioAsyncResolver::tokio_from_system_conf()
            .map_err(|err| CheckError::Initialization(format!("resolver setup failed: {}", err)))?;
        self.resolver = Some(resolver);
        Ok(())
    }

    pub async fn execute(&self) -> Result<(), CheckError> {
        let resolver = self.resolver.as_ref().ok_or_else(|| {
            CheckError::Execution("dns check was not initialized".to_string())
        })?;
        let reply = resolver
            .lookup_ip(self.config.domain.as_str())
            .await
            .map_err(|err| {
                CheckError::Execution(format!(
                    "DNS lookup for {} failed: {}",
                    self.config.domain, err
                ))
            })?;
        let addresses: Vec<IpAddr> = reply.iter().collect();
        if let Some(expected) = &self.config.expected_ips {
            verify_expected_ips(&self.config.domain, expected, &addresses)?;
        }
        Ok(())
    }
}

/// Every expected IP must appear in the resolver reply; the failure message
/// enumerates the absent addresses.
pub fn verify_expected_ips(
    domain: &str,
    expected: &[IpAddr],
    reply: &[IpAddr],
) -> Result<(), CheckError> {
    let missing: Vec<String> = expected
        .iter()
        .filter(|ip| !reply.contains(ip))
        .map(|ip| ip.to_string())
        .collect();
    if missing.is_empty() {
        return Ok(());
    }
    Err(CheckError::Execution(format!(
        "expected IP {} not found in DNS response for {}",
        missing.join(", "),
        domain
    )))
}
