//! HTTP service discovery: poll an endpoint returning grouped check lists
//! and reconcile the registry for that poller's source on every success.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use url::Url;

use crate::discovery::DiscoveryError;
use crate::healthcheck::http::USER_AGENT;
use crate::healthcheck::{CheckBundle, Source};
use crate::registry::Registry;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct HttpDiscoveryConfig {
    pub name: String,
    pub url: String,
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cacert: Option<PathBuf>,
    #[serde(default)]
    pub insecure: bool,
}

impl HttpDiscoveryConfig {
    pub fn validate(&self) -> Result<(), DiscoveryError> {
        if self.name.is_empty() {
            return Err(DiscoveryError::Configuration(
                "discovery name is missing".to_string(),
            ));
        }
        if Url::parse(&self.url).is_err() {
            return Err(DiscoveryError::Configuration(format!(
                "discovery {}: invalid url {:?}",
                self.name, self.url
            )));
        }
        if self.interval.is_zero() {
            return Err(DiscoveryError::Configuration(format!(
                "discovery {}: interval must be greater than zero",
                self.name
            )));
        }
        Ok(())
    }
}

pub struct HttpDiscovery {
    config: HttpDiscoveryConfig,
    client: reqwest::Client,
    registry: Arc<Registry>,
}

impl HttpDiscovery {
    pub fn new(
        config: HttpDiscoveryConfig,
        registry: Arc<Registry>,
    ) -> Result<Self, DiscoveryError> {
        config.validate()?;
        let mut builder = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.interval)
            .danger_accept_invalid_certs(config.insecure);
        if let Some(cacert) = &config.cacert {
            let pem = std::fs::read(cacert).map_err(|err| {
                DiscoveryError::Setup(format!("cannot read {}: {}", cacert.display(), err))
            })?;
            let certificate = reqwest::Certificate::from_pem(&pem).map_err(|err| {
                DiscoveryError::Setup(format!(
                    "invalid CA certificate in {}: {}",
                    cacert.display(),
                    err
                ))
            })?;
            builder = builder.add_root_certificate(certificate);
        }
        let client = builder
            .build()
            .map_err(|err| DiscoveryError::Setup(format!("cannot build HTTP client: {}", err)))?;
        Ok(HttpDiscovery {
            config,
            client,
            registry,
        })
    }

    /// Poll once: fetch the grouped check lists and reconcile this poller's
    /// source. A failed poll leaves the last good state running.
    async fn poll(&self) -> anyhow::Result<()> {
        let mut request = self.client.get(&self.config.url);
        if let Some(headers) = &self.config.headers {
            for (key, value) in headers {
                request = request.header(key, value);
            }
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("discovery endpoint answered with status {}", status);
        }
        let bundle: CheckBundle = response.json().await?;
        self.registry
            .reload_for_source(
                Source::HttpDiscovery(self.config.name.clone()),
                self.config.labels.as_ref(),
                bundle,
            )
            .await?;
        Ok(())
    }

    pub fn spawn(self, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(discovery = %self.config.name, url = %self.config.url, "http discovery poller started");
            let mut ticker = tokio::time::interval(self.config.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = ticker.tick() => {}
                }
                let outcome = tokio::select! {
                    _ = token.cancelled() => return,
                    outcome = self.poll() => outcome,
                };
                if let Err(err) = outcome {
                    error!(
                        discovery = %self.config.name,
                        error = %err,
                        "http discovery poll failed"
                    );
                }
            }
        })
    }
}
