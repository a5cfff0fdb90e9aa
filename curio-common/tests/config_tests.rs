//! Configuration loading and resolution priority
//!
//! Tests that touch CURIO_* environment variables are marked `#[serial]`
//! so they never race each other.

use curio_common::config::{
    resolve_setting, CliOverrides, ResolvedConfig, TomlConfig, ENV_API_URL, ENV_MQTT_HOST, ENV_TOKEN, ENV_USER_ID,
    ENV_WS_URL,
};
use serial_test::serial;
use std::env;
use std::io::Write;
use std::time::Duration;

fn clear_env() {
    for var in [ENV_API_URL, ENV_WS_URL, ENV_MQTT_HOST, ENV_USER_ID, ENV_TOKEN] {
        env::remove_var(var);
    }
}

fn write_config(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn test_load_full_file() {
    let file = write_config(
        r#"
        api_base_url = "https://console.example"
        ws_base_url = "wss://console.example"
        http_timeout_secs = 30
        access_token = "secret"
        user_id = "42"

        [mqtt]
        host = "broker.example"
        port = 8883
        reconnect_secs = 5
        keep_alive_secs = 30

        [logging]
        level = "debug"
        "#,
    );

    let config = TomlConfig::load(file.path()).unwrap();
    assert_eq!(config.api_base_url, "https://console.example");
    assert_eq!(config.mqtt.port, 8883);
    assert_eq!(config.mqtt.reconnect_period(), Duration::from_secs(5));
    assert_eq!(config.http_timeout(), Duration::from_secs(30));
    assert_eq!(config.access_token.as_deref(), Some("secret"));
    assert_eq!(config.logging.level, "debug");
}

#[test]
fn test_load_rejects_malformed_and_invalid() {
    let malformed = write_config("api_base_url = [");
    assert!(TomlConfig::load(malformed.path()).is_err());

    let invalid = write_config("http_timeout_secs = 0");
    assert!(TomlConfig::load(invalid.path()).is_err());

    let dir = tempfile::tempdir().unwrap();
    assert!(TomlConfig::load(&dir.path().join("missing.toml")).is_err());
}

#[test]
fn test_explicit_path_wins_over_platform_file() {
    let file = write_config(r#"ws_base_url = "ws://explicit:1""#);
    let config = TomlConfig::load_or_default(Some(file.path())).unwrap();
    assert_eq!(config.ws_base_url, "ws://explicit:1");
}

#[test]
#[serial]
fn test_priority_cli_then_env_then_file_then_default() {
    clear_env();

    assert_eq!(resolve_setting(None, ENV_API_URL, None, "default"), "default");
    assert_eq!(resolve_setting(None, ENV_API_URL, Some("file"), "default"), "file");

    env::set_var(ENV_API_URL, "env");
    assert_eq!(resolve_setting(None, ENV_API_URL, Some("file"), "default"), "env");
    assert_eq!(resolve_setting(Some("cli"), ENV_API_URL, Some("file"), "default"), "cli");

    clear_env();
}

#[test]
#[serial]
fn test_resolve_full_config() {
    clear_env();
    env::set_var(ENV_MQTT_HOST, "env-broker");

    let file: TomlConfig = toml::from_str(
        r#"
        api_base_url = "http://file-api/"
        user_id = "7"
        "#,
    )
    .unwrap();
    let cli = CliOverrides {
        ws_base_url: Some("ws://cli-ws".to_string()),
        ..CliOverrides::default()
    };

    let resolved = ResolvedConfig::resolve(&file, &cli).unwrap();
    assert_eq!(resolved.api_base_url, "http://file-api");
    assert_eq!(resolved.ws_base_url, "ws://cli-ws");
    assert_eq!(resolved.mqtt.host, "env-broker");
    assert_eq!(resolved.user_id, "7");
    assert_eq!(resolved.access_token, None);
    assert_eq!(resolved.http_timeout, Duration::from_secs(10));

    clear_env();
}

#[test]
#[serial]
fn test_resolve_requires_user_id() {
    clear_env();
    let err = ResolvedConfig::resolve(&TomlConfig::default(), &CliOverrides::default()).unwrap_err();
    assert!(err.to_string().contains("user id"));

    env::set_var(ENV_USER_ID, "u-env");
    env::set_var(ENV_TOKEN, "tok");
    let resolved = ResolvedConfig::resolve(&TomlConfig::default(), &CliOverrides::default()).unwrap();
    assert_eq!(resolved.user_id, "u-env");
    assert_eq!(resolved.access_token.as_deref(), Some("tok"));

    clear_env();
}
