//! Configuration loading tests.

use std::io::Write;
use subghz_link::{ConfigError, CrcMode, LinkConfig, Modulation};
use tempfile::NamedTempFile;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_load_partial_file_fills_defaults() {
    let file = write_config(
        r#"{
            "max_frame_size": 64,
            "retry_budget": 5,
            "radio": { "modulation": "fsk4", "crc": "crc16-ibm", "channel": 3 }
        }"#,
    );

    let config = LinkConfig::from_json_file(file.path()).unwrap();
    assert_eq!(config.max_frame_size, 64);
    assert_eq!(config.max_payload(), 59);
    assert_eq!(config.retry_budget, 5);
    assert_eq!(config.ack_timeout_ms, LinkConfig::default().ack_timeout_ms);
    assert_eq!(config.radio.modulation, Modulation::Fsk4);
    assert_eq!(config.radio.crc, CrcMode::Crc16Ibm);
    assert_eq!(
        config.radio.carrier_frequency_hz(),
        config.radio.base_frequency_hz as u64 + 3 * config.radio.channel_spacing_hz as u64
    );
}

#[test]
fn test_invalid_frame_size_in_file_is_rejected() {
    let file = write_config(r#"{ "max_frame_size": 100 }"#);
    assert!(matches!(
        LinkConfig::from_json_file(file.path()),
        Err(ConfigError::Invalid(_))
    ));
}

#[test]
fn test_malformed_file_is_a_parse_error() {
    let file = write_config("{ not json");
    assert!(matches!(
        LinkConfig::from_json_file(file.path()),
        Err(ConfigError::Parse(_))
    ));
}

#[test]
fn test_missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        LinkConfig::from_json_file(dir.path().join("absent.json")),
        Err(ConfigError::Io(_))
    ));
}

#[test]
fn test_saved_config_loads_back() {
    let mut config = LinkConfig::default();
    config.marker = [0x12, 0x34];
    config.radio.address_filtering = true;
    let file = write_config(&serde_json::to_string_pretty(&config).unwrap());

    assert_eq!(LinkConfig::from_json_file(file.path()).unwrap(), config);
}
