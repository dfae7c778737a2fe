//! Management HTTP API: router, authentication and the server tasks.
//!
//! The server runs either as a plain listener with graceful shutdown or,
//! when a certificate is configured, as a TLS accept loop serving the same
//! router connection by connection. Mutual TLS is turned on by configuring a
//! client CA; the accepted client common names can additionally be
//! restricted post-handshake.

pub mod handlers;
pub mod response;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_rustls::rustls::pki_types::CertificateDer;
use tokio_rustls::rustls::server::WebPkiClientVerifier;
use tokio_rustls::rustls::{RootCertStore, ServerConfig};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

pub use handlers::AppState;
pub use response::{ApiError, Messages};

use crate::config::{BasicAuthConfig, HttpConfig};
use crate::healthcheck::tls::{load_pem_certs, load_pem_key};

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("cannot bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("TLS setup failed: {0}")]
    Tls(String),
    #[error("server task failed: {0}")]
    Shutdown(#[from] tokio::task::JoinError),
}

/// Build the full router for the given front-end configuration.
pub fn build_router(config: &HttpConfig, state: AppState) -> Router {
    let mut v1: Router<AppState> = Router::new();
    if !config.disable_healthcheck_api {
        v1 = v1
            .route("/healthcheck", get(handlers::list_checks))
            .route("/healthcheck/dns", post(handlers::add_dns_check))
            .route("/healthcheck/tcp", post(handlers::add_tcp_check))
            .route("/healthcheck/tls", post(handlers::add_tls_check))
            .route("/healthcheck/http", post(handlers::add_http_check))
            .route("/healthcheck/command", post(handlers::add_command_check))
            .route("/healthcheck/bulk", post(handlers::add_bulk_checks))
            .route(
                "/healthcheck/:name",
                get(handlers::get_check).delete(handlers::delete_check),
            );
    }
    if !config.disable_result_api {
        v1 = v1
            .route("/result", get(handlers::list_results))
            .route("/result/:name", get(handlers::get_result));
    }
    if let Some(auth) = &config.basic_auth {
        v1 = v1.route_layer(middleware::from_fn_with_state(
            Arc::new(auth.clone()),
            basic_auth,
        ));
    }
    Router::new()
        .nest("/api/v1", v1)
        .route("/health", get(handlers::health))
        .route("/healthz", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .fallback(handlers::not_found)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Credentials guard the `/api/v1` subtree; liveness and metrics stay open
/// for orchestrators and scrapers.
async fn basic_auth(
    State(auth): State<Arc<BasicAuthConfig>>,
    request: Request,
    next: Next,
) -> Response {
    let expected = format!(
        "Basic {}",
        BASE64.encode(format!("{}:{}", auth.username, auth.password))
    );
    let authorized = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(|value| value == expected)
        .unwrap_or(false);
    if authorized {
        return next.run(request).await;
    }
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Basic realm=\"cabourotte\"")],
        Json(Messages::one("unauthorized")),
    )
        .into_response()
}

/// A running API server task.
pub struct ApiServer {
    token: CancellationToken,
    handle: JoinHandle<()>,
    local_addr: SocketAddr,
}

impl std::fmt::Debug for ApiServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiServer")
            .field("local_addr", &self.local_addr)
            .finish_non_exhaustive()
    }
}

impl ApiServer {
    /// Bind and start serving. A bind failure is fatal to the caller.
    pub async fn spawn(config: &HttpConfig, state: AppState) -> Result<ApiServer, ServerError> {
        let router = build_router(config, state);
        let addr = SocketAddr::new(config.host, config.port);
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ServerError::Bind { addr, source })?;
        let token = CancellationToken::new();
        let handle = match (&config.cert, &config.key) {
            (Some(cert), Some(key)) => {
                let tls_config = build_tls_server_config(cert, key, config.cacert.as_ref())?;
                info!(address = %local_addr, "https server listening");
                spawn_tls_loop(
                    listener,
                    router,
                    tls_config,
                    Arc::new(config.allowed_cn.clone()),
                    token.clone(),
                )
            }
            _ => {
                info!(address = %local_addr, "http server listening");
                let shutdown = token.clone().cancelled_owned();
                tokio::spawn(async move {
                    if let Err(err) = axum::serve(listener, router)
                        .with_graceful_shutdown(shutdown)
                        .await
                    {
                        error!(error = %err, "http server error");
                    }
                })
            }
        };
        Ok(ApiServer {
            token,
            handle,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn stop(self) -> Result<(), ServerError> {
        self.token.cancel();
        self.handle.await?;
        Ok(())
    }
}

fn build_tls_server_config(
    cert: &PathBuf,
    key: &PathBuf,
    cacert: Option<&PathBuf>,
) -> Result<ServerConfig, ServerError> {
    let certs = load_pem_certs(cert).map_err(|err| ServerError::Tls(err.to_string()))?;
    let key = load_pem_key(key).map_err(|err| ServerError::Tls(err.to_string()))?;
    let builder = ServerConfig::builder();
    let builder = match cacert {
        Some(cacert) => {
            let mut roots = RootCertStore::empty();
            for cert in load_pem_certs(cacert).map_err(|err| ServerError::Tls(err.to_string()))? {
                roots
                    .add(cert)
                    .map_err(|err| ServerError::Tls(err.to_string()))?;
            }
            let verifier = WebPkiClientVerifier::builder(Arc::new(roots))
                .build()
                .map_err(|err| ServerError::Tls(err.to_string()))?;
            builder.with_client_cert_verifier(verifier)
        }
        None => builder.with_no_client_auth(),
    };
    let mut config = builder
        .with_single_cert(certs, key)
        .map_err(|err| ServerError::Tls(err.to_string()))?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    Ok(config)
}

/// TLS accept loop: terminate the handshake, enforce the client CN
/// allowlist, then serve the connection through the router.
fn spawn_tls_loop(
    listener: TcpListener,
    router: Router,
    tls_config: ServerConfig,
    allowed_cn: Arc<Vec<String>>,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let acceptor = TlsAcceptor::from(Arc::new(tls_config));
        loop {
            let (stream, remote_addr) = tokio::select! {
                _ = token.cancelled() => return,
                conn = listener.accept() => match conn {
                    Ok(conn) => conn,
                    Err(err) => {
                        debug!(error = %err, "failed to accept incoming TCP connection");
                        continue;
                    }
                },
            };
            let acceptor = acceptor.clone();
            let router = router.clone();
            let allowed_cn = allowed_cn.clone();
            tokio::spawn(async move {
                let tls_stream = match acceptor.accept(stream).await {
                    Ok(tls_stream) => tls_stream,
                    Err(err) => {
                        debug!(%remote_addr, error = %err, "TLS handshake failed");
                        return;
                    }
                };
                if !allowed_cn.is_empty() {
                    let (_, session) = tls_stream.get_ref();
                    match client_common_name(session.peer_certificates()) {
                        Some(cn) if allowed_cn.contains(&cn) => {}
                        cn => {
                            warn!(
                                %remote_addr,
                                common_name = cn.as_deref().unwrap_or("<none>"),
                                "rejecting client certificate"
                            );
                            return;
                        }
                    }
                }
                let service = hyper::service::service_fn(move |request: hyper::Request<Incoming>| {
                    router.clone().oneshot(request)
                });
                if let Err(err) = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                    .serve_connection(TokioIo::new(tls_stream), service)
                    .await
                {
                    debug!(%remote_addr, error = %err, "failed to serve connection");
                }
            });
        }
    })
}

/// Subject common name of the client leaf certificate.
fn client_common_name(certs: Option<&[CertificateDer<'_>]>) -> Option<String> {
    let leaf = certs?.first()?;
    let (_, parsed) = x509_parser::parse_x509_certificate(leaf.as_ref()).ok()?;
    let name = parsed
        .subject()
        .iter_common_name()
        .next()
        .and_then(|attr| attr.as_str().ok())
        .map(str::to_string);
    name
}
