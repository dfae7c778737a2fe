use std::collections::HashMap;
use std::time::Duration;

use cabourotte::healthcheck::{
    CheckConfig, CommandCheckConfig, DnsCheckConfig, HttpCheckConfig, Method, Protocol, Source,
    TcpCheckConfig, TlsCheckConfig,
};

use crate::common::{base, tcp_config};

fn dns_config(name: &str) -> DnsCheckConfig {
    DnsCheckConfig {
        base: base(name),
        domain: "example.test".to_string(),
        expected_ips: None,
    }
}

fn http_config(name: &str) -> HttpCheckConfig {
    HttpCheckConfig {
        base: base(name),
        target: "127.0.0.1".to_string(),
        port: 8080,
        protocol: Protocol::Http,
        path: "/".to_string(),
        method: Method::Get,
        valid_status: vec![200],
        headers: None,
        query: None,
        body: None,
        body_regexp: vec![],
        source_ip: None,
        redirect: false,
        host: None,
        key: None,
        cert: None,
        cacert: None,
        insecure: false,
    }
}

fn tls_config(name: &str) -> TlsCheckConfig {
    TlsCheckConfig {
        base: base(name),
        target: "127.0.0.1".to_string(),
        port: 443,
        source_ip: None,
        key: None,
        cert: None,
        cacert: None,
        server_name: None,
        insecure: false,
        expiration_delay: None,
    }
}

#[test]
fn test_interval_lower_bound() {
    // 2s is the minimum accepted interval for recurring checks.
    let mut config = tcp_config("t1", 80);
    config.base.interval = Some(Duration::from_secs(2));
    assert!(config.validate().is_ok());

    config.base.interval = Some(Duration::from_millis(1999));
    assert!(config.validate().is_err());
}

#[test]
fn test_interval_must_cover_timeout() {
    let mut config = tcp_config("t1", 80);
    config.base.interval = Some(Duration::from_secs(2));
    config.base.timeout = Some(Duration::from_secs(2));
    assert!(config.validate().is_ok());

    config.base.timeout = Some(Duration::from_secs(3));
    assert!(config.validate().is_err());
}

#[test]
fn test_missing_interval_rejected_unless_one_off() {
    let mut config = tcp_config("t1", 80);
    config.base.interval = None;
    assert!(config.validate().is_err());

    config.base.one_off = true;
    assert!(config.validate().is_ok());
}

#[test]
fn test_timeout_required_except_for_dns() {
    let mut tcp = tcp_config("t1", 80);
    tcp.base.timeout = None;
    assert!(tcp.validate().is_err());

    let mut dns = dns_config("d1");
    dns.base.timeout = None;
    assert!(dns.validate().is_ok());
}

#[test]
fn test_zero_timeout_rejected() {
    let mut config = tcp_config("t1", 80);
    config.base.timeout = Some(Duration::ZERO);
    assert!(config.validate().is_err());
}

#[test]
fn test_tls_materials_must_come_in_pairs() {
    let mut config = tls_config("tls1");
    assert!(config.validate().is_ok());

    config.key = Some("/tmp/key.pem".into());
    assert!(config.validate().is_err());

    config.cert = Some("/tmp/cert.pem".into());
    assert!(config.validate().is_ok());

    config.key = None;
    assert!(config.validate().is_err());
}

#[test]
fn test_http_valid_status_cannot_be_empty() {
    let mut config = http_config("h1");
    config.valid_status = vec![];
    assert!(config.validate().is_err());
}

#[test]
fn test_http_invalid_regex_rejected() {
    let mut config = http_config("h1");
    config.body_regexp = vec!["[invalid".to_string()];
    assert!(config.validate().is_err());
}

#[test]
fn test_missing_name_rejected() {
    let mut config = tcp_config("", 80);
    config.base.name = String::new();
    assert!(config.validate().is_err());
}

#[test]
fn test_missing_target_and_port_rejected() {
    let mut config = tcp_config("t1", 80);
    config.target = String::new();
    assert!(config.validate().is_err());

    let config = tcp_config("t1", 0);
    assert!(config.validate().is_err());
}

#[test]
fn test_command_must_be_set() {
    let config = CommandCheckConfig {
        base: base("c1"),
        command: String::new(),
        arguments: vec![],
    };
    assert!(config.validate().is_err());
}

#[test]
fn test_dns_domain_must_be_set() {
    let mut config = dns_config("d1");
    config.domain = String::new();
    assert!(config.validate().is_err());
}

#[test]
fn test_validation_is_deterministic() {
    let config = http_config("h1");
    assert!(config.validate().is_ok());
    assert!(config.validate().is_ok());
}

#[test]
fn test_source_string_roundtrip() {
    for source in [
        Source::Configuration,
        Source::Api,
        Source::HttpDiscovery("poller1".to_string()),
        Source::KubernetesPod,
        Source::KubernetesService,
        Source::KubernetesCrd,
    ] {
        let parsed: Source = source.to_string().parse().unwrap();
        assert_eq!(parsed, source);
    }
    assert!("nonsense".parse::<Source>().is_err());
    assert!("http-discovery-".parse::<Source>().is_err());
}

#[test]
fn test_merge_labels_does_not_clobber() {
    let mut base = base("t1");
    base.labels = Some(HashMap::from([(
        "environment".to_string(),
        "production".to_string(),
    )]));
    let common = HashMap::from([
        ("environment".to_string(), "staging".to_string()),
        ("datacenter".to_string(), "dc1".to_string()),
    ]);
    base.merge_labels(&common);
    let labels = base.labels.unwrap();
    assert_eq!(labels.get("environment").unwrap(), "production");
    assert_eq!(labels.get("datacenter").unwrap(), "dc1");
}

#[test]
fn test_descriptor_json_roundtrip() {
    // A valid descriptor survives encode-decode unchanged.
    let config = CheckConfig::Http(http_config("h1"));
    let encoded = serde_json::to_string(&config).unwrap();
    let decoded: CheckConfig = serde_json::from_str(&encoded).unwrap();
    assert_eq!(decoded, config);
}

#[test]
fn test_descriptor_kebab_case_wire_format() {
    let raw = r#"{
        "name": "d1",
        "description": "dns check",
        "domain": "example.test",
        "interval": "5s",
        "timeout": "500ms",
        "expected-ips": ["10.0.0.1"],
        "one-off": false
    }"#;
    let config: DnsCheckConfig = serde_json::from_str(raw).unwrap();
    assert_eq!(config.base.interval, Some(Duration::from_secs(5)));
    assert_eq!(config.base.timeout, Some(Duration::from_millis(500)));
    assert_eq!(
        config.expected_ips,
        Some(vec!["10.0.0.1".parse().unwrap()])
    );
    assert!(config.validate().is_ok());
}

#[test]
fn test_tagged_descriptor_decoding() {
    let raw = r#"{
        "type": "tcp",
        "name": "t1",
        "target": "127.0.0.1",
        "port": 80,
        "interval": "5s",
        "timeout": "2s"
    }"#;
    let config: CheckConfig = serde_json::from_str(raw).unwrap();
    match &config {
        CheckConfig::Tcp(TcpCheckConfig { port: 80, .. }) => {}
        other => panic!("unexpected descriptor: {:?}", other),
    }
}
