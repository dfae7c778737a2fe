//! HTTP(S) health check: perform one request with a pre-built client and
//! validate the response status against the accepted set, plus optional
//! regular expressions over the body.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv6Addr};
use std::path::PathBuf;

use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::healthcheck::result::{escape_message, truncate_message};
use crate::healthcheck::{Base, CheckError};

/// User agent advertised by the HTTP probe and the daemon's HTTP clients.
pub const USER_AGENT: &str = "Cabourotte";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Https,
}

impl Default for Protocol {
    fn default() -> Self {
        Protocol::Http
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Http => write!(f, "http"),
            Protocol::Https => write!(f, "https"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Method {
    #[serde(rename = "GET")]
    Get,
    #[serde(rename = "POST")]
    Post,
    #[serde(rename = "PUT")]
    Put,
    #[serde(rename = "HEAD")]
    Head,
    #[serde(rename = "DELETE")]
    Delete,
}

impl Default for Method {
    fn default() -> Self {
        Method::Get
    }
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Head => reqwest::Method::HEAD,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct HttpCheckConfig {
    #[serde(flatten)]
    pub base: Base,
    pub target: String,
    pub port: u16,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default)]
    pub method: Method,
    pub valid_status: Vec<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub body_regexp: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_ip: Option<IpAddr>,
    /// Follow redirects instead of stopping at the first response.
    #[serde(default)]
    pub redirect: bool,
    /// Host header override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
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

impl HttpCheckConfig {
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
        if self.valid_status.is_empty() {
            return Err(CheckError::Validation(format!(
                "healthcheck {}: valid-status is missing",
                self.base.name
            )));
        }
        if self.key.is_some() != self.cert.is_some() {
            return Err(CheckError::Validation(format!(
                "healthcheck {}: key and cert must be configured together",
                self.base.name
            )));
        }
        for pattern in &self.body_regexp {
            Regex::new(pattern).map_err(|err| {
                CheckError::Validation(format!(
                    "healthcheck {}: invalid body regex {:?}: {}",
                    self.base.name, pattern, err
                ))
            })?;
        }
        Ok(())
    }
}

pub struct HttpCheck {
    pub config: HttpCheckConfig,
    url: Option<Url>,
    client: Option<reqwest::Client>,
    body_regexp: Vec<Regex>,
}

impl std::fmt::Debug for HttpCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpCheck")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl HttpCheck {
    pub fn new(config: HttpCheckConfig) -> Self {
        HttpCheck {
            config,
            url: None,
            client: None,
            body_regexp: Vec::new(),
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "http check on {}://{}:{}{}",
            self.config.protocol, self.config.target, self.config.port, self.config.path
        )
    }

    pub fn initialize(&mut self) -> Result<(), CheckError> {
        let mut url = build_url(
            self.config.protocol,
            &self.config.target,
            self.config.port,
            &self.config.path,
        )?;
        if let Some(query) = &self.config.query {
            url.query_pairs_mut().extend_pairs(query.iter());
        }
        self.body_regexp = self
            .config
            .body_regexp
            .iter()
            .map(|pattern| Regex::new(pattern))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| CheckError::Initialization(format!("invalid body regex: {}", err)))?;
        let redirect_policy = if self.config.redirect {
            reqwest::redirect::Policy::limited(10)
        } else {
            reqwest::redirect::Policy::none()
        };
        let mut builder = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .redirect(redirect_policy)
            .danger_accept_invalid_certs(self.config.insecure);
        if let Some(ip) = self.config.source_ip {
            builder = builder.local_address(ip);
        }
        if let Some(cacert) = &self.config.cacert {
            let pem = std::fs::read(cacert).map_err(|err| {
                CheckError::Initialization(format!("cannot read {}: {}", cacert.display(), err))
            })?;
            let certificate = reqwest::Certificate::from_pem(&pem).map_err(|err| {
                CheckError::Initialization(format!(
                    "invalid CA certificate in {}: {}",
                    cacert.display(),
                    err
                ))
            })?;
            builder = builder.add_root_certificate(certificate);
        }
        if let (Some(key), Some(cert)) = (&self.config.key, &self.config.cert) {
            let mut pem = std::fs::read(key).map_err(|err| {
                CheckError::Initialization(format!("cannot read {}: {}", key.display(), err))
            })?;
            let cert_pem = std::fs::read(cert).map_err(|err| {
                CheckError::Initialization(format!("cannot read {}: {}", cert.display(), err))
            })?;
            pem.extend_from_slice(&cert_pem);
            let identity = reqwest::Identity::from_pem(&pem).map_err(|err| {
                CheckError::Initialization(format!("invalid client key/cert pair: {}", err))
            })?;
            builder = builder.identity(identity);
        }
        let client = builder
            .build()
            .map_err(|err| CheckError::Initialization(format!("cannot build HTTP client: {}", err)))?;
        self.url = Some(url);
        self.client = Some(client);
        Ok(())
    }

    pub async fn execute(&self) -> Result<(), CheckError> {
        let (client, url) = match (&self.client, &self.url) {
            (Some(client), Some(url)) => (client, url),
            _ => {
                return Err(CheckError::Execution(
                    "http check was not initialized".to_string(),
                ))
            }
        };
        let mut request = client.request(self.config.method.into(), url.clone());
        if let Some(headers) = &self.config.headers {
            for (key, value) in headers {
                request = request.header(key, value);
            }
        }
        if let Some(host) = &self.config.host {
            request = request.header(reqwest::header::HOST, host);
        }
        if let Some(body) = &self.config.body {
            request = request.body(body.clone());
        }
        let response = request.send().await.map_err(|err| {
            CheckError::Execution(format!("HTTP request to {} failed: {}", url, err))
        })?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|err| {
            CheckError::Execution(format!(
                "cannot read the response body from {}: {}",
                url, err
            ))
        })?;
        if !self.config.valid_status.contains(&status) {
            return Err(CheckError::Execution(format!(
                "HTTP Status Code = {}, body: {}",
                status,
                escape_message(truncate_message(&body))
            )));
        }
        for regex in &self.body_regexp {
            if !regex.is_match(&body) {
                return Err(CheckError::Execution(format!(
                    "response body does not match the regex {:?}",
                    regex.as_str()
                )));
            }
        }
        Ok(())
    }
}

/// Build the probe URL, bracketing raw IPv6 targets.
fn build_url(
    protocol: Protocol,
    target: &str,
    port: u16,
    path: &str,
) -> Result<Url, CheckError> {
    let host = if target.parse::<Ipv6Addr>().is_ok() {
        format!("[{}]", target)
    } else {
        target.to_string()
    };
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    };
    let raw = format!("{}://{}:{}{}", protocol, host, port, path);
    Url::parse(&raw)
        .map_err(|err| CheckError::Initialization(format!("invalid URL {:?}: {}", raw, err)))
}
