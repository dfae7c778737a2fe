//! TCP health check: dial the target and close immediately. With
//! `should-fail`, a successful dial is the failure case (useful to assert a
//! port is NOT reachable, e.g. through a firewall).

use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};
use tokio::net::{lookup_host, TcpSocket, TcpStream};

use crate::healthcheck::{Base, CheckError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TcpCheckConfig {
    #[serde(flatten)]
    pub base: Base,
    pub target: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_ip: Option<IpAddr>,
    #[serde(default)]
    pub should_fail: bool,
}

impl TcpCheckConfig {
    pub fn validate(&self) -> Result<(), CheckError> {
        self.base.validate(true)?;
        if self.target.is_empty() {
            return Err(CheckError::Validation(format!(
                "healthcheck {}: target is missing",
                self.base.name
            )));
        }
        if self.port == 0 {
            return Err(CheckError::Validation(format!(
                "healthcheck {}: port is missing",
                self.base.name
            )));
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct TcpCheck {
    pub config: TcpCheckConfig,
}

impl TcpCheck {
    pub fn new(config: TcpCheckConfig) -> Self {
        TcpCheck { config }
    }

    pub fn summary(&self) -> String {
        format!("tcp check on {}:{}", self.config.target, self.config.port)
    }

    pub fn initialize(&mut self) -> Result<(), CheckError> {
        Ok(())
    }

    pub async fn execute(&self) -> Result<(), CheckError> {
        let attempt = dial_tcp(
            &self.config.target,
            self.config.port,
            self.config.source_ip,
        )
        .await;
        if self.config.should_fail {
            return match attempt {
                // The dial went through even though it should not have.
                Ok(_) => Err(CheckError::Execution(format!(
                    "connection to {}:{} succeeded but the check is configured to fail",
                    self.config.target, self.config.port
                ))),
                Err(_) => Ok(()),
            };
        }
        attempt.map(|_| ())
    }
}

/// Dial `target:port`, optionally binding the local side to `source_ip:0`.
/// Shared by the TCP and TLS checks.
pub(crate) async fn dial_tcp(
    target: &str,
    port: u16,
    source_ip: Option<IpAddr>,
) -> Result<TcpStream, CheckError> {
    let mut addresses = lookup_host((target, port)).await.map_err(|err| {
        CheckError::Execution(format!("cannot resolve {}:{}: {}", target, port, err))
    })?;
    let address = match source_ip {
        // Pick an address in the same family as the bound source.
        Some(ip) => addresses.find(|addr| addr.is_ipv4() == ip.is_ipv4()),
        None => addresses.next(),
    }
    .ok_or_else(|| {
        CheckError::Execution(format!("no usable address found for {}:{}", target, port))
    })?;
    let stream = match source_ip {
        Some(ip) => {
            let socket = if ip.is_ipv4() {
                TcpSocket::new_v4()
            } else {
                TcpSocket::new_v6()
            }
            .map_err(|err| CheckError::Execution(format!("cannot create socket: {}", err)))?;
            socket.bind(SocketAddr::new(ip, 0)).map_err(|err| {
                CheckError::Execution(format!("cannot bind source address {}: {}", ip, err))
            })?;
            socket.connect(address).await
        }
        None => TcpStream::connect(address).await,
    }
    .map_err(|err| {
        CheckError::Execution(format!(
            "connection to {}:{} failed: {}",
            target, port, err
        ))
    })?;
    Ok(stream)
}
