use std::fs;
use std::time::Duration;

use assert_matches::assert_matches;

use encode_query::client::DEFAULT_BASE_URL;
use encode_query::config::{CacheEntry, Config, ConfigLoader};
use encode_query::download::DEFAULT_BLOCK_SIZE;
use encode_query::error::EncodeError;

#[test]
fn parse_full_config_file() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("encode-query.json");
    fs::write(
        &path,
        r#"{
            "base_url": "https://test.encodedcc.org/",
            "timeout_secs": 5,
            "user_agent": "lab-pipeline/2.1",
            "cache": {"enabled": true, "dir": "/var/cache/encode"},
            "workers": 4,
            "block_size": 65536
        }"#,
    )
    .unwrap();

    let resolved = ConfigLoader::resolve(path.to_str()).unwrap();
    assert_eq!(resolved.client.base_url, "https://test.encodedcc.org");
    assert_eq!(resolved.client.timeout, Duration::from_secs(5));
    assert_eq!(resolved.client.user_agent, "lab-pipeline/2.1");
    assert!(resolved.cache_enabled);
    assert_eq!(
        resolved.response_cache().unwrap().root().as_str(),
        "/var/cache/encode"
    );
    assert_eq!(resolved.workers, Some(4));
    assert_eq!(resolved.block_size, 65536);
}

#[test]
fn missing_explicit_file_is_an_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("absent.json");
    let err = ConfigLoader::resolve(path.to_str()).unwrap_err();
    assert_matches!(err, EncodeError::ConfigRead(read) if read == path);
}

#[test]
fn malformed_json_is_a_parse_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("encode-query.json");
    fs::write(&path, "{ \"workers\": ").unwrap();
    let err = ConfigLoader::resolve(path.to_str()).unwrap_err();
    assert_matches!(err, EncodeError::ConfigParse(_));
}

#[test]
fn defaults_without_file_content() {
    let resolved = ConfigLoader::resolve_config(Config::default()).unwrap();
    assert_eq!(resolved.client.base_url, DEFAULT_BASE_URL);
    assert_eq!(resolved.client.timeout, Duration::from_secs(60));
    assert!(resolved.client.user_agent.starts_with("encode-query/"));
    assert!(resolved.cache_enabled);
    assert!(resolved.cache_dir.is_none());
    assert_eq!(resolved.block_size, DEFAULT_BLOCK_SIZE);
}

#[test]
fn cache_shorthand_disables() {
    let config = Config {
        cache: Some(CacheEntry::Enabled(false)),
        ..Config::default()
    };
    assert!(!ConfigLoader::resolve_config(config).unwrap().cache_enabled);
}

#[test]
fn rejects_non_http_base_url() {
    let config = Config {
        base_url: Some("ftp://encodeproject.org".to_string()),
        ..Config::default()
    };
    let err = ConfigLoader::resolve_config(config).unwrap_err();
    assert_matches!(err, EncodeError::ConfigParse(_));
}

#[test]
fn rejects_zero_block_size() {
    let config = Config {
        block_size: Some(0),
        ..Config::default()
    };
    let err = ConfigLoader::resolve_config(config).unwrap_err();
    assert_matches!(err, EncodeError::ConfigParse(_));
}
