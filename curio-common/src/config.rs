//! Bootstrap configuration loading
//!
//! Every setting is resolved in the same priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file (`~/.config/curio/config.toml`, then `/etc/curio/config.toml`)
//! 4. Compiled default (fallback)

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

pub const ENV_API_URL: &str = "CURIO_API_URL";
pub const ENV_WS_URL: &str = "CURIO_WS_URL";
pub const ENV_MQTT_HOST: &str = "CURIO_MQTT_HOST";
pub const ENV_USER_ID: &str = "CURIO_USER_ID";
pub const ENV_TOKEN: &str = "CURIO_TOKEN";

/// Bootstrap configuration loaded from TOML file
#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    /// REST server root; requests go to `<api_base_url>/api/...`
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Root of the notification channel endpoints (`<ws_base_url>/ws/...`)
    #[serde(default = "default_ws_base_url")]
    pub ws_base_url: String,

    #[serde(default)]
    pub mqtt: MqttConfig,

    /// Default: 10 seconds
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,

    #[serde(default)]
    pub access_token: Option<String>,

    #[serde(default)]
    pub user_id: Option<String>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Topic broker connection settings
#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_mqtt_host")]
    pub host: String,

    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    /// Delay between automatic reconnect attempts
    #[serde(default = "default_reconnect_secs")]
    pub reconnect_secs: u64,

    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            reconnect_secs: default_reconnect_secs(),
            keep_alive_secs: default_keep_alive_secs(),
        }
    }
}

impl MqttConfig {
    pub fn reconnect_period(&self) -> Duration {
        Duration::from_secs(self.reconnect_secs)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_api_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_ws_base_url() -> String {
    "ws://localhost:8080".to_string()
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_reconnect_secs() -> u64 {
    3
}

fn default_keep_alive_secs() -> u64 {
    60
}

fn default_http_timeout_secs() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            ws_base_url: default_ws_base_url(),
            mqtt: MqttConfig::default(),
            http_timeout_secs: default_http_timeout_secs(),
            access_token: None,
            user_id: None,
            logging: LoggingConfig::default(),
        }
    }
}

impl TomlConfig {
    /// Load from an explicit file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        let config: TomlConfig = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))?;
        config.validate()?;
        info!(path = %path.display(), "Loaded configuration file");
        Ok(config)
    }

    /// Load from `explicit` if given, else from the first platform config file
    /// found, else compiled defaults
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        match find_config_file() {
            Some(path) => Self::load(&path),
            None => {
                debug!("No config file found, using compiled defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.api_base_url.trim().is_empty() {
            return Err(Error::Config("api_base_url must not be empty".to_string()));
        }
        if self.ws_base_url.trim().is_empty() {
            return Err(Error::Config("ws_base_url must not be empty".to_string()));
        }
        if self.http_timeout_secs == 0 {
            return Err(Error::Config("http_timeout_secs must be positive".to_string()));
        }
        if self.mqtt.reconnect_secs == 0 {
            return Err(Error::Config("mqtt.reconnect_secs must be positive".to_string()));
        }
        Ok(())
    }
}

/// Platform config file, user file first
pub fn find_config_file() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("curio").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(unix) {
        let system_config = PathBuf::from("/etc/curio/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }
    None
}

/// Resolve one setting: CLI argument, then environment, then file, then default
pub fn resolve_setting(
    cli_arg: Option<&str>,
    env_var_name: &str,
    file_value: Option<&str>,
    default: &str,
) -> String {
    // Priority 1: Command-line argument
    if let Some(value) = cli_arg {
        return value.to_string();
    }

    // Priority 2: Environment variable
    if let Ok(value) = std::env::var(env_var_name) {
        if !value.is_empty() {
            return value;
        }
    }

    // Priority 3: TOML config file
    if let Some(value) = file_value {
        return value.to_string();
    }

    // Priority 4: Compiled default
    default.to_string()
}

/// Values supplied on the command line
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub api_base_url: Option<String>,
    pub ws_base_url: Option<String>,
    pub mqtt_host: Option<String>,
    pub user_id: Option<String>,
    pub access_token: Option<String>,
}

/// Fully resolved settings used to wire the runtime
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub api_base_url: String,
    pub ws_base_url: String,
    pub mqtt: MqttConfig,
    pub http_timeout: Duration,
    pub access_token: Option<String>,
    pub user_id: String,
    pub log_level: String,
}

impl ResolvedConfig {
    pub fn resolve(file: &TomlConfig, cli: &CliOverrides) -> Result<Self> {
        let api_base_url = resolve_setting(
            cli.api_base_url.as_deref(),
            ENV_API_URL,
            Some(&file.api_base_url),
            &default_api_base_url(),
        );
        let ws_base_url = resolve_setting(
            cli.ws_base_url.as_deref(),
            ENV_WS_URL,
            Some(&file.ws_base_url),
            &default_ws_base_url(),
        );

        let mut mqtt = file.mqtt.clone();
        mqtt.host = resolve_setting(
            cli.mqtt_host.as_deref(),
            ENV_MQTT_HOST,
            Some(&file.mqtt.host),
            &default_mqtt_host(),
        );

        let user_id = resolve_setting(cli.user_id.as_deref(), ENV_USER_ID, file.user_id.as_deref(), "");
        if user_id.is_empty() {
            return Err(Error::Config(format!(
                "user id not set (use --user-id, {} or user_id in config.toml)",
                ENV_USER_ID
            )));
        }

        let token = resolve_setting(cli.access_token.as_deref(), ENV_TOKEN, file.access_token.as_deref(), "");

        Ok(Self {
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            ws_base_url: ws_base_url.trim_end_matches('/').to_string(),
            mqtt,
            http_timeout: file.http_timeout(),
            access_token: if token.is_empty() { None } else { Some(token) },
            user_id,
            log_level: file.logging.level.clone(),
        })
    }
}
