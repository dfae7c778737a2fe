//! Shared helpers for the integration tests.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use cabourotte::healthcheck::{Base, Source, TcpCheckConfig};
use cabourotte::metrics::Metrics;

/// A base descriptor with sane defaults for recurring checks.
pub fn base(name: &str) -> Base {
    Base {
        name: name.to_string(),
        description: format!("{} test check", name),
        interval: Some(Duration::from_secs(5)),
        timeout: Some(Duration::from_secs(2)),
        labels: None,
        one_off: false,
        source: Source::Configuration,
    }
}

pub fn tcp_config(name: &str, port: u16) -> TcpCheckConfig {
    TcpCheckConfig {
        base: base(name),
        target: "127.0.0.1".to_string(),
        port,
        source_ip: None,
        should_fail: false,
    }
}

pub fn metrics() -> Arc<Metrics> {
    Arc::new(Metrics::new(&[]).expect("failed to build the metrics component"))
}

pub fn metrics_with_allowlist(allowlist: &[&str]) -> Arc<Metrics> {
    let allowlist: Vec<String> = allowlist.iter().map(|s| s.to_string()).collect();
    Arc::new(Metrics::new(&allowlist).expect("failed to build the metrics component"))
}

/// A TCP listener accepting and dropping connections, for dial tests.
pub async fn spawn_tcp_listener() -> (u16, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind the test listener");
    let port = listener.local_addr().unwrap().port();
    let handle = tokio::spawn(async move {
        loop {
            let _ = listener.accept().await;
        }
    });
    (port, handle)
}

/// A minimal HTTP server answering every route of the given router.
pub async fn spawn_http_server(router: Router) -> (SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind the test http server");
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (addr, handle)
}

/// An HTTP server answering "hello cabourotte" on every GET /.
pub async fn spawn_hello_server() -> (SocketAddr, JoinHandle<()>) {
    spawn_http_server(Router::new().route("/", get(|| async { "hello cabourotte" }))).await
}
