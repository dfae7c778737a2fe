use cabourotte::healthcheck::TcpCheck;

use crate::common::{spawn_tcp_listener, tcp_config};

#[tokio::test]
async fn test_tcp_check_against_open_port() {
    let (port, server) = spawn_tcp_listener().await;
    let check = TcpCheck::new(tcp_config("t1", port));
    assert!(check.execute().await.is_ok());
    server.abort();
}

#[tokio::test]
async fn test_tcp_check_against_closed_port() {
    let mut config = tcp_config("t1", 1);
    config.base.timeout = Some(std::time::Duration::from_millis(500));
    let check = TcpCheck::new(config);
    let err = check.execute().await.unwrap_err();
    assert!(err.to_string().contains("127.0.0.1:1"), "{}", err);
}

#[tokio::test]
async fn test_tcp_should_fail_inverts_closed_port() {
    // Dialing a closed port is the expected outcome here.
    let mut config = tcp_config("t1", 1);
    config.base.timeout = Some(std::time::Duration::from_millis(500));
    config.should_fail = true;
    let check = TcpCheck::new(config);
    assert!(check.execute().await.is_ok());
}

#[tokio::test]
async fn test_tcp_should_fail_inverts_open_port() {
    let (port, server) = spawn_tcp_listener().await;
    let mut config = tcp_config("t1", port);
    config.should_fail = true;
    let check = TcpCheck::new(config);
    let err = check.execute().await.unwrap_err();
    assert!(
        err.to_string().contains("configured to fail"),
        "{}",
        err
    );
    server.abort();
}

#[tokio::test]
async fn test_tcp_check_with_source_ip() {
    let (port, server) = spawn_tcp_listener().await;
    let mut config = tcp_config("t1", port);
    config.source_ip = Some("127.0.0.1".parse().unwrap());
    let check = TcpCheck::new(config);
    assert!(check.execute().await.is_ok());
    server.abort();
}

#[tokio::test]
async fn test_tcp_check_unresolvable_target() {
    let mut config = tcp_config("t1", 80);
    config.target = "does-not-exist.invalid".to_string();
    let check = TcpCheck::new(config);
    assert!(check.execute().await.is_err());
}
