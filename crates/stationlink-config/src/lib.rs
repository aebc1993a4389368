//! Shared configuration for stationlink tools.
//!
//! A TOML file plus `STATIONLINK_*` environment overrides, translated
//! into `stationlink_core` runtime types. Also hosts the server URL
//! diagnostics used by `stationlink diagnose`.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use stationlink_core::{CacheConfig, ClientConfig, DEFAULT_SERVER_URL, OutboxConfig, ReconnectPolicy};

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "STATIONLINK_CONFIG";

/// File name of the persisted station cache.
pub const CACHE_FILE: &str = "station_cache.json";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub reconnect: ReconnectSettings,

    #[serde(default)]
    pub outbox: OutboxSettings,

    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub defaults: Defaults,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ServerSettings {
    /// Telemetry server WebSocket URL.
    #[serde(default = "default_url")]
    pub url: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { url: default_url() }
    }
}

fn default_url() -> String {
    DEFAULT_SERVER_URL.into()
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ReconnectSettings {
    /// Attempts before giving up on the fast schedule; 0 retries forever.
    pub max_attempts: u32,
    pub base_interval_ms: u64,
    pub max_interval_ms: u64,
    /// Delay of the last-chance attempt once the fast schedule gave up.
    pub final_attempt_secs: u64,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_interval_ms: 5_000,
            max_interval_ms: 60_000,
            final_attempt_secs: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct OutboxSettings {
    pub capacity: usize,
    pub max_wait_ms: u64,
}

impl Default for OutboxSettings {
    fn default() -> Self {
        Self {
            capacity: 32,
            max_wait_ms: 1_500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Write the cache to disk.
    pub persist: bool,
    /// Snapshot location; defaults to the platform data dir.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    pub max_age_hours: u64,
    pub max_messages: usize,
    pub persisted_messages: usize,
    pub sweep_interval_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            persist: true,
            path: None,
            max_age_hours: 24,
            max_messages: 1000,
            persisted_messages: 100,
            sweep_interval_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}

// ── Translation into runtime types ──────────────────────────────────

impl Config {
    /// Connection settings for [`stationlink_core::ConnectionManager`].
    pub fn client_config(&self) -> Result<ClientConfig, ConfigError> {
        let url = parse_server_url(&self.server.url)?;
        if self.reconnect.base_interval_ms == 0 {
            return Err(ConfigError::Validation {
                field: "reconnect.base_interval_ms".into(),
                reason: "must be greater than zero".into(),
            });
        }

        Ok(ClientConfig {
            url,
            reconnect: ReconnectPolicy {
                initial_delay: Duration::from_millis(self.reconnect.base_interval_ms),
                max_delay: Duration::from_millis(
                    self.reconnect
                        .max_interval_ms
                        .max(self.reconnect.base_interval_ms),
                ),
                max_attempts: (self.reconnect.max_attempts > 0)
                    .then_some(self.reconnect.max_attempts),
                final_attempt_delay: Duration::from_secs(self.reconnect.final_attempt_secs),
            },
            outbox: OutboxConfig {
                capacity: self.outbox.capacity,
                max_wait: Duration::from_millis(self.outbox.max_wait_ms),
            },
        })
    }

    /// Settings for [`stationlink_core::StationStore`].
    pub fn cache_config(&self) -> CacheConfig {
        let path = if self.cache.persist {
            Some(self.cache.path.clone().unwrap_or_else(default_cache_path))
        } else {
            None
        };

        CacheConfig {
            path,
            max_age: Duration::from_secs(self.cache.max_age_hours.saturating_mul(3600)),
            max_messages: self.cache.max_messages,
            persisted_messages: self.cache.persisted_messages,
            sweep_interval: Duration::from_secs(self.cache.sweep_interval_secs),
        }
    }
}

// ── Paths ───────────────────────────────────────────────────────────

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "stationlink", "stationlink")
}

fn home_fallback(parts: &[&str]) -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.extend(parts);
    p
}

/// Resolve the config file path: `STATIONLINK_CONFIG`, then platform
/// conventions.
pub fn config_path() -> PathBuf {
    if let Some(explicit) = std::env::var_os(CONFIG_ENV) {
        return PathBuf::from(explicit);
    }
    project_dirs().map_or_else(
        || home_fallback(&[".config", "stationlink", "config.toml"]),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

/// Where the station cache lives unless configured otherwise.
pub fn default_cache_path() -> PathBuf {
    project_dirs().map_or_else(
        || home_fallback(&[".local", "share", "stationlink", CACHE_FILE]),
        |dirs| dirs.data_dir().join(CACHE_FILE),
    )
}

// ── Loading / saving ────────────────────────────────────────────────

/// Load from the resolved config path plus environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from `path` plus environment. A missing file yields defaults.
///
/// Environment keys nest with `__`: `STATIONLINK_SERVER__URL`,
/// `STATIONLINK_CACHE__MAX_AGE_HOURS`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("STATIONLINK_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Serialize config to TOML at `path`, creating parent directories.
pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── URL diagnostics ─────────────────────────────────────────────────

/// Parse and check a telemetry server URL.
pub fn parse_server_url(raw: &str) -> Result<Url, ConfigError> {
    let url: Url = raw.trim().parse().map_err(|e| ConfigError::Validation {
        field: "server.url".into(),
        reason: format!("invalid URL '{raw}': {e}"),
    })?;

    match url.scheme() {
        "ws" | "wss" => {}
        other => {
            return Err(ConfigError::Validation {
                field: "server.url".into(),
                reason: format!("expected a ws:// or wss:// URL, got '{other}://'"),
            });
        }
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(ConfigError::Validation {
            field: "server.url".into(),
            reason: format!("'{raw}' has no host"),
        });
    }
    Ok(url)
}

/// What `diagnose_url` found out about a server URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UrlDiagnosis {
    pub url: String,
    pub scheme: String,
    /// `wss://`.
    pub secure: bool,
    pub host: String,
    pub port: Option<u16>,
    /// Loopback, RFC 1918, link-local or unique-local address.
    pub private_network: bool,
    pub warnings: Vec<String>,
}

/// Describe a server URL and flag likely deployment problems.
pub fn diagnose_url(raw: &str) -> Result<UrlDiagnosis, ConfigError> {
    let url = parse_server_url(raw)?;
    let host = url.host_str().unwrap_or_default().to_owned();
    let secure = url.scheme() == "wss";
    let private_network = is_private_host(&host);

    let mut warnings = Vec::new();
    if !secure {
        warnings.push("ws:// is unencrypted; frames travel in clear text".to_owned());
    }
    if private_network {
        warnings.push(format!(
            "{host} is a private address, reachable only from the plant network"
        ));
    }
    if url.port().is_none() {
        warnings.push(format!(
            "no explicit port; the {} default is used",
            url.scheme()
        ));
    }

    Ok(UrlDiagnosis {
        url: url.to_string(),
        scheme: url.scheme().to_owned(),
        secure,
        port: url.port_or_known_default(),
        host,
        private_network,
        warnings,
    })
}

fn is_private_host(host: &str) -> bool {
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    match host.trim_matches(['[', ']']).parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => v4.is_private() || v4.is_loopback() || v4.is_link_local(),
        Ok(IpAddr::V6(v6)) => v6.is_loopback() || v6.is_unique_local() || v6.is_unicast_link_local(),
        Err(_) => false,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.server.url, DEFAULT_SERVER_URL);
        assert_eq!(config.reconnect.max_attempts, 5);
        assert_eq!(config.cache.max_messages, 1000);
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[server]
url = "wss://telemetria.fabrica.local:9443"

[reconnect]
max_attempts = 0
base_interval_ms = 1000

[cache]
persist = false
max_age_hours = 8
"#,
        )
        .unwrap();

        let config = load_config_from(&path).unwrap();
        assert_eq!(config.reconnect.max_interval_ms, 60_000);

        let client = config.client_config().unwrap();
        assert_eq!(client.url.as_str(), "wss://telemetria.fabrica.local:9443/");
        assert_eq!(client.reconnect.max_attempts, None);
        assert_eq!(client.reconnect.initial_delay, Duration::from_secs(1));

        let cache = config.cache_config();
        assert_eq!(cache.path, None);
        assert_eq!(cache.max_age, Duration::from_secs(8 * 3600));
    }

    #[test]
    fn defaults_translate_to_core_defaults() {
        let config = Config::default();
        let client = config.client_config().unwrap();
        assert_eq!(client.reconnect, ReconnectPolicy::default());
        assert_eq!(client.outbox, OutboxConfig::default());

        let cache = config.cache_config();
        let core = CacheConfig::default();
        assert_eq!(cache.max_age, core.max_age);
        assert_eq!(cache.sweep_interval, core.sweep_interval);
        assert!(cache.path.unwrap().ends_with(CACHE_FILE));
    }

    #[test]
    fn saved_config_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.server.url = "ws://192.168.1.76:8765".into();
        config.cache.path = Some(dir.path().join("cache.json"));

        save_config_to(&config, &path).unwrap();
        assert_eq!(load_config_from(&path).unwrap(), config);
    }

    #[test]
    fn rejects_non_websocket_urls() {
        let err = parse_server_url("http://10.0.0.1:8765").unwrap_err();
        assert!(err.to_string().contains("ws:// or wss://"));
        assert!(parse_server_url("not a url").is_err());

        let mut config = Config::default();
        config.reconnect.base_interval_ms = 0;
        assert!(config.client_config().is_err());
    }

    #[test]
    fn diagnoses_plant_network_url() {
        let report = diagnose_url(DEFAULT_SERVER_URL).unwrap();
        assert_eq!(report.host, "10.200.0.184");
        assert_eq!(report.port, Some(8765));
        assert!(!report.secure);
        assert!(report.private_network);
        assert_eq!(report.warnings.len(), 2);
    }

    #[test]
    fn diagnoses_public_tls_url() {
        let report = diagnose_url("wss://telemetry.example.com").unwrap();
        assert!(report.secure);
        assert!(!report.private_network);
        assert_eq!(report.port, Some(443));
        assert_eq!(report.warnings, ["no explicit port; the wss default is used"]);
    }
}
