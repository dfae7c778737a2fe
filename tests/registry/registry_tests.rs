use std::time::Duration;

use cabourotte::healthcheck::{CheckConfig, Source};
use cabourotte::registry::{AddOutcome, Registry};

use crate::common::{metrics, spawn_tcp_listener, tcp_config};

#[tokio::test]
async fn test_add_list_get_remove() {
    let (registry, _receiver) = Registry::new(metrics(), 10);

    let outcome = registry
        .add(CheckConfig::Tcp(tcp_config("t2", 80)).build())
        .await
        .unwrap();
    assert_eq!(outcome, AddOutcome::Added);
    registry
        .add(CheckConfig::Tcp(tcp_config("t1", 80)).build())
        .await
        .unwrap();

    let listed = registry.list().await;
    let names: Vec<&str> = listed.iter().map(|config| config.name()).collect();
    assert_eq!(names, vec!["t1", "t2"]);

    // get agrees with list for every name.
    for config in &listed {
        assert_eq!(registry.get(config.name()).await.unwrap(), *config);
    }
    assert!(registry.get("unknown").await.is_none());

    registry.remove("t1").await;
    assert_eq!(registry.len().await, 1);
    assert!(registry.get("t1").await.is_none());

    // Removing an absent check is not an error.
    registry.remove("t1").await;
    registry.stop().await;
}

#[tokio::test]
async fn test_readding_identical_descriptor_is_a_noop() {
    let (registry, _receiver) = Registry::new(metrics(), 10);
    let config = tcp_config("t1", 80);

    assert_eq!(
        registry
            .add(CheckConfig::Tcp(config.clone()).build())
            .await
            .unwrap(),
        AddOutcome::Added
    );
    assert_eq!(
        registry
            .add(CheckConfig::Tcp(config.clone()).build())
            .await
            .unwrap(),
        AddOutcome::Identical
    );

    // A structurally different descriptor replaces the running task.
    let mut changed = config;
    changed.base.interval = Some(Duration::from_secs(10));
    assert_eq!(
        registry
            .add(CheckConfig::Tcp(changed).build())
            .await
            .unwrap(),
        AddOutcome::Replaced
    );
    registry.stop().await;
}

#[tokio::test]
async fn test_add_rejects_invalid_descriptors() {
    let (registry, _receiver) = Registry::new(metrics(), 10);

    let mut config = tcp_config("t1", 80);
    config.base.interval = Some(Duration::from_secs(1));
    assert!(registry
        .add(CheckConfig::Tcp(config).build())
        .await
        .is_err());

    let mut one_off = tcp_config("t1", 80);
    one_off.base.one_off = true;
    assert!(registry
        .add(CheckConfig::Tcp(one_off).build())
        .await
        .is_err());

    assert!(registry.is_empty().await);
    registry.stop().await;
}

#[tokio::test]
async fn test_source_names() {
    let (registry, _receiver) = Registry::new(metrics(), 10);

    let mut api_check = tcp_config("api1", 80);
    api_check.base.source = Source::Api;
    registry
        .add(CheckConfig::Tcp(api_check).build())
        .await
        .unwrap();
    registry
        .add(CheckConfig::Tcp(tcp_config("cfg1", 80)).build())
        .await
        .unwrap();

    let api_names = registry.source_names(&Source::Api).await;
    assert_eq!(api_names.len(), 1);
    assert!(api_names.contains("api1"));

    let config_names = registry.source_names(&Source::Configuration).await;
    assert_eq!(config_names.len(), 1);
    assert!(config_names.contains("cfg1"));
    registry.stop().await;
}

#[tokio::test]
async fn test_remove_non_configured_only_removes_stale_names() {
    let (registry, _receiver) = Registry::new(metrics(), 10);
    registry
        .add(CheckConfig::Tcp(tcp_config("t1", 80)).build())
        .await
        .unwrap();
    registry
        .add(CheckConfig::Tcp(tcp_config("t2", 80)).build())
        .await
        .unwrap();

    let old_set = ["t1".to_string(), "t2".to_string()].into_iter().collect();
    let new_set = ["t2".to_string()].into_iter().collect();
    registry.remove_non_configured(old_set, &new_set).await;

    assert!(registry.get("t1").await.is_none());
    assert!(registry.get("t2").await.is_some());
    registry.stop().await;
}

#[tokio::test]
async fn test_scheduled_check_emits_results() {
    let (port, server) = spawn_tcp_listener().await;
    let (registry, mut receiver) = Registry::new(metrics(), 10);

    let mut config = tcp_config("t1", port);
    config.base.interval = Some(Duration::from_secs(2));
    config.base.timeout = Some(Duration::from_secs(1));
    registry
        .add(CheckConfig::Tcp(config).build())
        .await
        .unwrap();

    // First execution happens after the startup jitter (< 4s).
    let result = tokio::time::timeout(Duration::from_secs(10), receiver.recv())
        .await
        .expect("no result emitted in time")
        .expect("channel closed");
    assert_eq!(result.name, "t1");
    assert!(result.success);
    assert_eq!(result.message, "success");
    assert_eq!(result.source, Source::Configuration);

    registry.stop().await;
    server.abort();
}

#[tokio::test]
async fn test_stop_cancels_every_task() {
    let (registry, _receiver) = Registry::new(metrics(), 10);
    for i in 0..5 {
        registry
            .add(CheckConfig::Tcp(tcp_config(&format!("t{}", i), 80)).build())
            .await
            .unwrap();
    }
    assert_eq!(registry.len().await, 5);
    registry.stop().await;
    assert!(registry.is_empty().await);
}
