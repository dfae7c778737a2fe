//! HTTP push exporter: POSTs every result as JSON to a configured endpoint.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::exporter::{Exporter, ExporterError};
use crate::healthcheck::http::{Protocol, USER_AGENT};
use crate::healthcheck::CheckResult;

const PUSH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct HttpExporterConfig {
    pub name: String,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cacert: Option<PathBuf>,
    #[serde(default)]
    pub insecure: bool,
}

fn default_path() -> String {
    "/".to_string()
}

impl HttpExporterConfig {
    pub fn validate(&self) -> Result<(), ExporterError> {
        if self.name.is_empty() {
            return Err(ExporterError::Configuration(
                "exporter name is missing".to_string(),
            ));
        }
        if self.host.is_empty() {
            return Err(ExporterError::Configuration(format!(
                "exporter {}: host is missing",
                self.name
            )));
        }
        if self.port == 0 {
            return Err(ExporterError::Configuration(format!(
                "exporter {}: port is missing",
                self.name
            )));
        }
        if self.key.is_some() != self.cert.is_some() {
            return Err(ExporterError::Configuration(format!(
                "exporter {}: key and cert must be configured together",
                self.name
            )));
        }
        Ok(())
    }
}

pub struct HttpExporter {
    config: HttpExporterConfig,
    url: Url,
    client: reqwest::Client,
}

impl HttpExporter {
    pub fn new(config: HttpExporterConfig) -> Result<Self, ExporterError> {
        config.validate()?;
        let path = if config.path.starts_with('/') {
            config.path.clone()
        } else {
            format!("/{}", config.path)
        };
        let raw = format!(
            "{}://{}:{}{}",
            config.protocol, config.host, config.port, path
        );
        let url = Url::parse(&raw)
            .map_err(|err| ExporterError::Setup(format!("invalid URL {:?}: {}", raw, err)))?;
        let mut builder = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(PUSH_TIMEOUT)
            .danger_accept_invalid_certs(config.insecure);
        if let Some(cacert) = &config.cacert {
            let pem = std::fs::read(cacert).map_err(|err| {
                ExporterError::Setup(format!("cannot read {}: {}", cacert.display(), err))
            })?;
            let certificate = reqwest::Certificate::from_pem(&pem).map_err(|err| {
                ExporterError::Setup(format!(
                    "invalid CA certificate in {}: {}",
                    cacert.display(),
                    err
                ))
            })?;
            builder = builder.add_root_certificate(certificate);
        }
        if let (Some(key), Some(cert)) = (&config.key, &config.cert) {
            let mut pem = std::fs::read(key).map_err(|err| {
                ExporterError::Setup(format!("cannot read {}: {}", key.display(), err))
            })?;
            let cert_pem = std::fs::read(cert).map_err(|err| {
                ExporterError::Setup(format!("cannot read {}: {}", cert.display(), err))
            })?;
            pem.extend_from_slice(&cert_pem);
            let identity = reqwest::Identity::from_pem(&pem).map_err(|err| {
                ExporterError::Setup(format!("invalid client key/cert pair: {}", err))
            })?;
            builder = builder.identity(identity);
        }
        let client = builder
            .build()
            .map_err(|err| ExporterError::Setup(format!("cannot build HTTP client: {}", err)))?;
        Ok(HttpExporter {
            config,
            url,
            client,
        })
    }
}

#[async_trait::async_trait]
impl Exporter for HttpExporter {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn push(&self, result: &CheckResult) -> Result<(), ExporterError> {
        let mut request = self.client.post(self.url.clone()).json(result);
        if let Some(headers) = &self.config.headers {
            for (key, value) in headers {
                request = request.header(key, value);
            }
        }
        let response = request
            .send()
            .await
            .map_err(|err| ExporterError::Push(format!("request to {} failed: {}", self.url, err)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ExporterError::Push(format!(
                "{} answered with status {}",
                self.url, status
            )));
        }
        Ok(())
    }
}
