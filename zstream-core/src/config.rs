use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub obs: ObsConfig,
    pub twitch: TwitchConfig,
    pub zevent: ZEventConfig,
    pub storage: StorageConfig,
    pub resolver: ResolverConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace | debug | info | warn | error | silent
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

/// OBS control connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObsConfig {
    pub enabled: bool,
    pub url: String,
    pub password: Option<String>,
    pub reconnect_interval_ms: u64,
    pub max_reconnect_attempts: u32,
    /// Dedicated scene collection holding the managed scenes
    pub collection_name: String,
    pub request_timeout_secs: u64,
    /// Wait after creating a media input before placing it
    pub input_settle_ms: u64,
    /// Wait after switching the program scene or collection
    pub scene_switch_settle_ms: u64,
    /// Pause between streams when materializing scenes after a connect
    pub materialize_delay_ms: u64,
    /// Delay before the post-creation media status probe
    pub media_probe_delay_ms: u64,
}

impl Default for ObsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "ws://localhost:4455".to_string(),
            password: None,
            reconnect_interval_ms: 5000,
            max_reconnect_attempts: 10,
            collection_name: "ZEvent".to_string(),
            request_timeout_secs: 10,
            input_settle_ms: 1000,
            scene_switch_settle_ms: 500,
            materialize_delay_ms: 500,
            media_probe_delay_ms: 3000,
        }
    }
}

impl ObsConfig {
    #[must_use]
    pub const fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TwitchConfig {
    pub client_id: String,
    pub client_secret: String,
    pub api_base_url: String,
    pub auth_base_url: String,
    pub poll_interval_secs: u64,
}

impl Default for TwitchConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            api_base_url: "https://api.twitch.tv/helix".to_string(),
            auth_base_url: "https://id.twitch.tv".to_string(),
            poll_interval_secs: 120,
        }
    }
}

impl TwitchConfig {
    #[must_use]
    pub fn is_configured(&self) -> bool {
        !self.client_id.is_empty() && !self.client_secret.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ZEventConfig {
    pub api_url: String,
    pub cache_ttl_secs: u64,
}

impl Default for ZEventConfig {
    fn default() -> Self {
        Self {
            api_url: "https://zevent.fr/api/".to_string(),
            cache_ttl_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub streams_file: String,
    /// Pre-registry hardware decoding preferences, migrated once
    pub legacy_hw_decoding_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            streams_file: "streams.json".to_string(),
            legacy_hw_decoding_file: "hardware-decoding.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub binary: String,
    pub default_quality: String,
    pub url_timeout_secs: u64,
    pub qualities_timeout_secs: u64,
    pub probe_timeout_secs: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            binary: "streamlink".to_string(),
            default_quality: "best".to_string(),
            url_timeout_secs: 20,
            qualities_timeout_secs: 12,
            probe_timeout_secs: 5,
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // ZSTREAM_OBS__PASSWORD, ZSTREAM_SERVER__PORT, ...
        builder = builder.add_source(
            Environment::with_prefix("ZSTREAM")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    /// Collect every configuration problem instead of stopping at the first
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push("server.port must be non-zero".to_string());
        }
        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            errors.push(format!(
                "logging.format must be \"json\" or \"pretty\", got \"{}\"",
                self.logging.format
            ));
        }
        if crate::logging::parse_log_level(&self.logging.level).is_err() {
            errors.push(format!("logging.level \"{}\" is not recognized", self.logging.level));
        }
        if self.obs.enabled {
            if !(self.obs.url.starts_with("ws://") || self.obs.url.starts_with("wss://")) {
                errors.push(format!("obs.url must be a ws:// or wss:// URL, got \"{}\"", self.obs.url));
            }
            if self.obs.collection_name.trim().is_empty() {
                errors.push("obs.collection_name must not be blank".to_string());
            }
            if self.obs.request_timeout_secs == 0 {
                errors.push("obs.request_timeout_secs must be non-zero".to_string());
            }
        }
        if self.twitch.client_id.is_empty() != self.twitch.client_secret.is_empty() {
            errors.push("twitch.client_id and twitch.client_secret must be set together".to_string());
        }
        if self.twitch.poll_interval_secs == 0 {
            errors.push("twitch.poll_interval_secs must be non-zero".to_string());
        }
        if self.storage.streams_file.is_empty() {
            errors.push("storage.streams_file must not be empty".to_string());
        }
        if self.resolver.binary.is_empty() {
            errors.push("resolver.binary must not be empty".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Get HTTP address
    #[must_use]
    pub fn http_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
