//! TLS health check: dial the target, perform a handshake against the
//! configured SNI and optionally verify that the earliest peer certificate
//! does not expire within the configured window.

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_rustls::rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use tokio_rustls::rustls::crypto::{aws_lc_rs, CryptoProvider};
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use tokio_rustls::rustls::{self, ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio_rustls::TlsConnector;

use crate::healthcheck::tcp::dial_tcp;
use crate::healthcheck::{Base, CheckError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TlsCheckConfig {
    #[serde(flatten)]
    pub base: Base,
    pub target: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_ip: Option<IpAddr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cacert: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    #[serde(default)]
    pub insecure: bool,
    /// Fail when the earliest peer certificate expires within this window.
    #[serde(
        default,
        with = "humantime_serde::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub expiration_delay: Option<Duration>,
}

impl TlsCheckConfig {
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
        if self.key.is_some() != self.cert.is_some() {
            return Err(CheckError::Validation(format!(
                "healthcheck {}: key and cert must be configured together",
                self.base.name
            )));
        }
        Ok(())
    }
}

pub struct TlsCheck {
    pub config: TlsCheckConfig,
    client_config: Option<Arc<ClientConfig>>,
}

impl std::fmt::Debug for TlsCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsCheck")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TlsCheck {
    pub fn new(config: TlsCheckConfig) -> Self {
        TlsCheck {
            config,
            client_config: None,
        }
    }

    pub fn summary(&self) -> String {
        format!("tls check on {}:{}", self.config.target, self.config.port)
    }

    pub fn initialize(&mut self) -> Result<(), CheckError> {
        let mut roots = RootCertStore::empty();
        match &self.config.cacert {
            Some(path) => {
                for cert in load_pem_certs(path)? {
                    roots.add(cert).map_err(|err| {
                        CheckError::Initialization(format!(
                            "invalid CA certificate in {}: {}",
                            path.display(),
                            err
                        ))
                    })?;
                }
            }
            None => {
                let native = rustls_native_certs::load_native_certs().map_err(|err| {
                    CheckError::Initialization(format!(
                        "cannot load system root certificates: {}",
                        err
                    ))
                })?;
                for cert in native {
                    // Tolerate individual unparsable system certificates.
                    let _ = roots.add(cert);
                }
            }
        }
        let builder = ClientConfig::builder().with_root_certificates(roots);
        let mut client_config = match (&self.config.key, &self.config.cert) {
            (Some(key_path), Some(cert_path)) => {
                let certs = load_pem_certs(cert_path)?;
                let key = load_pem_key(key_path)?;
                builder.with_client_auth_cert(certs, key).map_err(|err| {
                    CheckError::Initialization(format!("invalid client key/cert pair: {}", err))
                })?
            }
            _ => builder.with_no_client_auth(),
        };
        if self.config.insecure {
            client_config
                .dangerous()
                .set_certificate_verifier(Arc::new(InsecureVerifier::new()));
        }
        self.client_config = Some(Arc::new(client_config));
        Ok(())
    }

    pub async fn execute(&self) -> Result<(), CheckError> {
        let client_config = self.client_config.as_ref().ok_or_else(|| {
            CheckError::Execution("tls check was not initialized".to_string())
        })?;
        let stream = dial_tcp(
            &self.config.target,
            self.config.port,
            self.config.source_ip,
        )
        .await?;
        let sni = self
            .config
            .server_name
            .clone()
            .unwrap_or_else(|| self.config.target.clone());
        let server_name = ServerName::try_from(sni.clone()).map_err(|err| {
            CheckError::Execution(format!("invalid server name {:?}: {}", sni, err))
        })?;
        let connector = TlsConnector::from(client_config.clone());
        let tls_stream = connector.connect(server_name, stream).await.map_err(|err| {
            CheckError::Execution(format!(
                "TLS handshake with {}:{} failed: {}",
                self.config.target, self.config.port, err
            ))
        })?;
        let expiration_delay = match self.config.expiration_delay {
            Some(delay) if !delay.is_zero() => delay,
            _ => return Ok(()),
        };
        let (_, session) = tls_stream.get_ref();
        let peer_certs = session.peer_certificates().unwrap_or_default();
        let earliest = earliest_expiration(peer_certs)?;
        verify_expiration(
            &self.config.target,
            self.config.port,
            earliest,
            chrono::Utc::now().timestamp(),
            expiration_delay,
        )
    }
}

/// Fail when the earliest peer-certificate expiry falls inside the
/// configured window.
pub fn verify_expiration(
    target: &str,
    port: u16,
    earliest: i64,
    now: i64,
    expiration_delay: Duration,
) -> Result<(), CheckError> {
    if now + expiration_delay.as_secs() as i64 > earliest {
        let expires_at = chrono::DateTime::from_timestamp(earliest, 0)
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| earliest.to_string());
        return Err(CheckError::Execution(format!(
            "The certificate for {}:{} will expire at {}",
            target, port, expires_at
        )));
    }
    Ok(())
}

/// Earliest non-zero not-after across the peer chain, unix seconds.
fn earliest_expiration(certs: &[CertificateDer<'_>]) -> Result<i64, CheckError> {
    let mut earliest: Option<i64> = None;
    for cert in certs {
        let (_, parsed) = x509_parser::parse_x509_certificate(cert.as_ref()).map_err(|err| {
            CheckError::Execution(format!("cannot parse peer certificate: {}", err))
        })?;
        let not_after = parsed.validity().not_after.timestamp();
        if not_after > 0 {
            earliest = Some(match earliest {
                Some(current) => current.min(not_after),
                None => not_after,
            });
        }
    }
    earliest.ok_or_else(|| {
        CheckError::Execution("no certificate expiration found in peer chain".to_string())
    })
}

pub(crate) fn load_pem_certs(path: &PathBuf) -> Result<Vec<CertificateDer<'static>>, CheckError> {
    let data = std::fs::read(path).map_err(|err| {
        CheckError::Initialization(format!("cannot read {}: {}", path.display(), err))
    })?;
    let certs: Result<Vec<_>, _> = rustls_pemfile::certs(&mut data.as_slice()).collect();
    let certs = certs.map_err(|err| {
        CheckError::Initialization(format!("invalid PEM in {}: {}", path.display(), err))
    })?;
    if certs.is_empty() {
        return Err(CheckError::Initialization(format!(
            "no certificate found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

pub(crate) fn load_pem_key(
    path: &PathBuf,
) -> Result<tokio_rustls::rustls::pki_types::PrivateKeyDer<'static>, CheckError> {
    let data = std::fs::read(path).map_err(|err| {
        CheckError::Initialization(format!("cannot read {}: {}", path.display(), err))
    })?;
    rustls_pemfile::private_key(&mut data.as_slice())
        .map_err(|err| {
            CheckError::Initialization(format!("invalid PEM in {}: {}", path.display(), err))
        })?
        .ok_or_else(|| {
            CheckError::Initialization(format!("no private key found in {}", path.display()))
        })
}

/// Certificate verifier used with `insecure: true`. Accepts any peer chain
/// so the probe can still inspect expiration dates on self-signed targets.
#[derive(Debug)]
struct InsecureVerifier {
    provider: Arc<CryptoProvider>,
}

impl InsecureVerifier {
    fn new() -> Self {
        InsecureVerifier {
            provider: Arc::new(aws_lc_rs::default_provider()),
        }
    }
}

impl ServerCertVerifier for InsecureVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
