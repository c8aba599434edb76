use super::types::*;
use std::path::Path;

#[test]
fn test_defaults_when_file_missing() {
    let cfg = Configuration::load(Path::new("/nonexistent/olla.toml")).unwrap();
    assert_eq!(cfg.proxy_prefix, "/olla");
    assert_eq!(cfg.stream_buffer_size, 8 * 1024);
    assert!(matches!(cfg.profile, StreamProfile::Auto));
}

#[test]
fn test_load_toml_config() {
    let toml = r#"
        proxy_prefix = "/olla"
        connection_timeout_secs = 5.0
        read_timeout_secs = 30.0
        stream_buffer_size = 4096
        profile = "streaming"
    "#;
    let tmp = std::env::temp_dir().join("olla_test_config.toml");
    std::fs::write(&tmp, toml).unwrap();
    let cfg = Configuration::load(&tmp).unwrap();
    assert_eq!(cfg.read_timeout_secs, 30.0);
    assert_eq!(cfg.stream_buffer_size, 4096);
    assert!(matches!(cfg.profile, StreamProfile::Streaming));
    std::fs::remove_file(&tmp).ok();
}

#[test]
fn test_load_json_config() {
    let json = r#"{
        "proxy_prefix": "/olla",
        "read_timeout_secs": 45.0,
        "stream_buffer_size": 16384
    }"#;
    let tmp = std::env::temp_dir().join("olla_test_config.json");
    std::fs::write(&tmp, json).unwrap();
    let cfg = Configuration::load(&tmp).unwrap();
    assert_eq!(cfg.read_timeout_secs, 45.0);
    assert_eq!(cfg.stream_buffer_size, 16384);
    std::fs::remove_file(&tmp).ok();
}

#[test]
fn test_validate_rejects_prefix_without_slash() {
    let mut cfg = Configuration::default();
    cfg.proxy_prefix = "olla".to_string();
    assert!(cfg.validate().is_err());
}

#[test]
fn test_validate_rejects_zero_buffer() {
    let mut cfg = Configuration::default();
    cfg.stream_buffer_size = 0;
    assert!(cfg.validate().is_err());
}

#[test]
fn test_validate_rejects_bad_cidr() {
    let mut cfg = Configuration::default();
    cfg.trusted_proxies = vec!["not-a-cidr".to_string()];
    assert!(cfg.validate().is_err());
}

#[test]
fn test_response_timeout_zero_is_unbounded() {
    let cfg = Configuration::default();
    assert_eq!(cfg.response_timeout_secs, 0.0);
    assert!(cfg.response_timeout().is_none());
}
