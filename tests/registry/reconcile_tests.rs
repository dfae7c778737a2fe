use std::collections::HashMap;
use std::time::Duration;

use cabourotte::healthcheck::{CheckBundle, CheckConfig, Source};
use cabourotte::registry::Registry;

use crate::common::{metrics, tcp_config};

fn bundle_with(names: &[&str]) -> CheckBundle {
    CheckBundle {
        tcp_checks: names.iter().map(|name| tcp_config(name, 80)).collect(),
        ..CheckBundle::default()
    }
}

#[tokio::test]
async fn test_reload_installs_the_desired_set() {
    let (registry, _receiver) = Registry::new(metrics(), 10);
    registry
        .reload_for_source(Source::Configuration, None, bundle_with(&["cfg1", "cfg2"]))
        .await
        .unwrap();

    let names: Vec<String> = registry
        .list()
        .await
        .iter()
        .map(|config| config.name().to_string())
        .collect();
    assert_eq!(names, vec!["cfg1", "cfg2"]);
    for config in registry.list().await {
        assert_eq!(config.base().source, Source::Configuration);
    }
    registry.stop().await;
}

#[tokio::test]
async fn test_reload_is_idempotent() {
    let (registry, _receiver) = Registry::new(metrics(), 10);
    let bundle = bundle_with(&["cfg1", "cfg2"]);

    registry
        .reload_for_source(Source::Configuration, None, bundle.clone())
        .await
        .unwrap();
    let first = registry.list().await;

    registry
        .reload_for_source(Source::Configuration, None, bundle)
        .await
        .unwrap();
    assert_eq!(registry.list().await, first);
    registry.stop().await;
}

#[tokio::test]
async fn test_reload_removes_stale_checks_of_its_source_only() {
    let (registry, _receiver) = Registry::new(metrics(), 10);

    // A check installed through the API must survive configuration reloads.
    let mut api_check = tcp_config("api1", 80);
    api_check.base.source = Source::Api;
    registry
        .add(CheckConfig::Tcp(api_check).build())
        .await
        .unwrap();

    registry
        .reload_for_source(Source::Configuration, None, bundle_with(&["cfg1"]))
        .await
        .unwrap();
    let names: Vec<String> = registry
        .list()
        .await
        .iter()
        .map(|config| config.name().to_string())
        .collect();
    assert_eq!(names, vec!["api1", "cfg1"]);

    // An empty configuration set removes cfg1 and keeps api1.
    registry
        .reload_for_source(Source::Configuration, None, CheckBundle::default())
        .await
        .unwrap();
    let names: Vec<String> = registry
        .list()
        .await
        .iter()
        .map(|config| config.name().to_string())
        .collect();
    assert_eq!(names, vec!["api1"]);
    registry.stop().await;
}

#[tokio::test]
async fn test_reload_of_different_sources_do_not_interfere() {
    let (registry, _receiver) = Registry::new(metrics(), 10);
    registry
        .reload_for_source(Source::Configuration, None, bundle_with(&["cfg1"]))
        .await
        .unwrap();
    registry
        .reload_for_source(
            Source::HttpDiscovery("poller1".to_string()),
            None,
            bundle_with(&["disco1"]),
        )
        .await
        .unwrap();
    assert_eq!(registry.len().await, 2);

    registry
        .reload_for_source(
            Source::HttpDiscovery("poller1".to_string()),
            None,
            CheckBundle::default(),
        )
        .await
        .unwrap();
    let names: Vec<String> = registry
        .list()
        .await
        .iter()
        .map(|config| config.name().to_string())
        .collect();
    assert_eq!(names, vec!["cfg1"]);
    registry.stop().await;
}

#[tokio::test]
async fn test_reload_validation_failure_aborts_without_mutation() {
    let (registry, _receiver) = Registry::new(metrics(), 10);
    registry
        .reload_for_source(Source::Configuration, None, bundle_with(&["cfg1"]))
        .await
        .unwrap();

    let mut bundle = bundle_with(&["cfg2"]);
    let mut broken = tcp_config("broken", 80);
    broken.base.interval = Some(Duration::from_secs(1));
    bundle.tcp_checks.push(broken);

    assert!(registry
        .reload_for_source(Source::Configuration, None, bundle)
        .await
        .is_err());

    // The previous state is still running, untouched.
    let names: Vec<String> = registry
        .list()
        .await
        .iter()
        .map(|config| config.name().to_string())
        .collect();
    assert_eq!(names, vec!["cfg1"]);
    registry.stop().await;
}

#[tokio::test]
async fn test_reload_rejects_duplicate_names() {
    let (registry, _receiver) = Registry::new(metrics(), 10);
    assert!(registry
        .reload_for_source(Source::Configuration, None, bundle_with(&["dup", "dup"]))
        .await
        .is_err());
    assert!(registry.is_empty().await);
    registry.stop().await;
}

#[tokio::test]
async fn test_reload_rejects_one_off_checks() {
    let (registry, _receiver) = Registry::new(metrics(), 10);
    let mut bundle = bundle_with(&[]);
    let mut one_off = tcp_config("once", 80);
    one_off.base.one_off = true;
    bundle.tcp_checks.push(one_off);
    assert!(registry
        .reload_for_source(Source::Configuration, None, bundle)
        .await
        .is_err());
    registry.stop().await;
}

#[tokio::test]
async fn test_reload_merges_common_labels_without_clobbering() {
    let (registry, _receiver) = Registry::new(metrics(), 10);
    let mut bundle = bundle_with(&[]);
    let mut check = tcp_config("cfg1", 80);
    check.base.labels = Some(HashMap::from([(
        "environment".to_string(),
        "production".to_string(),
    )]));
    bundle.tcp_checks.push(check);

    let common = HashMap::from([
        ("environment".to_string(), "staging".to_string()),
        ("datacenter".to_string(), "dc1".to_string()),
    ]);
    registry
        .reload_for_source(Source::Configuration, Some(&common), bundle)
        .await
        .unwrap();

    let config = registry.get("cfg1").await.unwrap();
    let labels = config.base().labels.clone().unwrap();
    assert_eq!(labels.get("environment").unwrap(), "production");
    assert_eq!(labels.get("datacenter").unwrap(), "dc1");
    registry.stop().await;
}
