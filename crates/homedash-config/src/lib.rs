//! Configuration for the homedash daemon.
//!
//! A TOML file from the platform config directory, layered over built-in
//! defaults and under `HOMEDASH_`-prefixed environment variables, then
//! validated and translated into `homedash_core::DashboardConfig`.
//!
//! ```toml
//! probe_timeout = "5s"
//! connection_poll_interval = "30s"
//!
//! [startup]
//! max_attempts = 5
//! retry_interval = "2s"
//! timeout = "15s"
//!
//! [[services]]
//! id = "hue"
//! kind = "bridge"
//! host = "192.168.68.62"
//!
//! [[services]]
//! id = "sonos"
//! kind = "proxy"
//! url = "http://localhost:5005"
//! ```
//!
//! Nested keys are reachable from the environment with `__`, e.g.
//! `HOMEDASH_STARTUP__MAX_ATTEMPTS=3`.

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

use homedash_core::{
    DashboardConfig, LegacyKey, ProbeTarget, ServiceConfig, StorageConfig, WaitOptions,
};

const ENV_PREFIX: &str = "HOMEDASH_";

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

fn invalid(field: impl Into<String>, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(with = "duration_str")]
    pub probe_timeout: Duration,

    #[serde(with = "duration_str")]
    pub connection_poll_interval: Duration,

    pub history_capacity: usize,

    /// Top-level state keys written to durable storage.
    pub persist_keys: Vec<String>,

    #[serde(default)]
    pub startup: Startup,

    #[serde(default)]
    pub storage: Storage,

    #[serde(default)]
    pub services: Vec<Service>,

    /// Flat keys from older releases and their new state paths.
    #[serde(default)]
    pub legacy_keys: Vec<LegacyMapping>,
}

impl Default for Config {
    fn default() -> Self {
        let core = DashboardConfig::default();
        Self {
            probe_timeout: core.probe_timeout,
            connection_poll_interval: core.connection_poll_interval,
            history_capacity: core.history_capacity,
            persist_keys: core.persist_keys,
            startup: Startup::default(),
            storage: Storage::default(),
            services: Vec::new(),
            legacy_keys: core
                .legacy_keys
                .into_iter()
                .map(|k| LegacyMapping {
                    legacy_key: k.legacy_key,
                    target_path: k.target_path,
                })
                .collect(),
        }
    }
}

/// Startup connection wait.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Startup {
    pub max_attempts: u32,
    #[serde(with = "duration_str")]
    pub retry_interval: Duration,
    #[serde(with = "duration_str")]
    pub timeout: Duration,
}

impl Default for Startup {
    fn default() -> Self {
        let wait = WaitOptions::default();
        Self {
            max_attempts: wait.max_attempts,
            retry_interval: wait.retry_interval,
            timeout: wait.timeout,
        }
    }
}

/// Where persisted state lives.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Storage {
    /// `"file"` or `"memory"`.
    pub backend: String,
    /// Directory for the file backend; defaults to the platform data dir.
    pub dir: Option<PathBuf>,
}

impl Default for Storage {
    fn default() -> Self {
        Self {
            backend: "file".into(),
            dir: None,
        }
    }
}

/// One monitored service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Service {
    pub id: String,
    /// `"bridge"` (probes `http://{host}/api/config`) or `"proxy"`
    /// (probes `{url}/health`).
    pub kind: String,
    pub host: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LegacyMapping {
    pub legacy_key: String,
    pub target_path: String,
}

// ── Paths ───────────────────────────────────────────────────────────

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("dev", "homedash", "homedash")
}

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    project_dirs().map_or_else(
        || fallback_dir().join("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

/// Default directory for the file storage backend.
pub fn default_state_dir() -> PathBuf {
    project_dirs().map_or_else(
        || fallback_dir().join("state"),
        |dirs| dirs.data_dir().join("state"),
    )
}

fn fallback_dir() -> PathBuf {
    PathBuf::from(".homedash")
}

// ── Loading ─────────────────────────────────────────────────────────

/// Defaults, then the TOML file at `path` (if present), then environment.
pub fn figment(path: &Path) -> Figment {
    Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
}

/// Load the config from the canonical path.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load the config from an explicit file. A missing file yields defaults.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let config: Config = figment(path).extract()?;
    Ok(config)
}

/// Render a config as pretty TOML.
pub fn render_config(cfg: &Config) -> Result<String, ConfigError> {
    Ok(toml::to_string_pretty(cfg)?)
}

/// Write a config to `path`, creating parent directories.
pub fn save_config(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, render_config(cfg)?)?;
    Ok(())
}

// ── Translation ─────────────────────────────────────────────────────

impl Config {
    /// Validate and build the runtime configuration.
    pub fn to_dashboard_config(&self) -> Result<DashboardConfig, ConfigError> {
        if self.probe_timeout.is_zero() {
            return Err(invalid("probe_timeout", "must be greater than zero"));
        }
        if self.connection_poll_interval.is_zero() {
            return Err(invalid("connection_poll_interval", "must be greater than zero"));
        }
        if self.startup.max_attempts == 0 {
            return Err(invalid("startup.max_attempts", "must be at least 1"));
        }

        let mut services = Vec::with_capacity(self.services.len());
        for service in &self.services {
            if services.iter().any(|s: &ServiceConfig| s.id == service.id) {
                return Err(invalid(
                    "services",
                    format!("duplicate service id '{}'", service.id),
                ));
            }
            services.push(service.to_service_config()?);
        }

        Ok(DashboardConfig {
            services,
            probe_timeout: self.probe_timeout,
            connection_poll_interval: self.connection_poll_interval,
            startup: WaitOptions {
                max_attempts: self.startup.max_attempts,
                retry_interval: self.startup.retry_interval,
                timeout: self.startup.timeout,
            },
            persist_keys: self.persist_keys.clone(),
            legacy_keys: self
                .legacy_keys
                .iter()
                .map(|k| LegacyKey::new(&k.legacy_key, &k.target_path))
                .collect(),
            history_capacity: self.history_capacity,
            storage: self.storage.to_storage_config()?,
        })
    }
}

impl Service {
    fn to_service_config(&self) -> Result<ServiceConfig, ConfigError> {
        let field = |name: &str| format!("services.{}.{name}", self.id);

        if self.id.is_empty() || self.id.contains([':', '.']) {
            return Err(invalid(
                "services.id",
                format!("'{}' must be non-empty without ':' or '.'", self.id),
            ));
        }

        let target = match self.kind.as_str() {
            "bridge" => {
                let host = self
                    .host
                    .clone()
                    .filter(|h| !h.is_empty())
                    .ok_or_else(|| invalid(field("host"), "required for bridge services"))?;
                ProbeTarget::Bridge { host }
            }
            "proxy" => {
                let raw = self
                    .url
                    .as_deref()
                    .ok_or_else(|| invalid(field("url"), "required for proxy services"))?;
                let base_url = Url::parse(raw)
                    .map_err(|e| invalid(field("url"), format!("invalid URL '{raw}': {e}")))?;
                ProbeTarget::Proxy { base_url }
            }
            other => {
                return Err(invalid(
                    field("kind"),
                    format!("expected 'bridge' or 'proxy', got '{other}'"),
                ));
            }
        };
        Ok(ServiceConfig::new(&self.id, target))
    }
}

impl Storage {
    fn to_storage_config(&self) -> Result<StorageConfig, ConfigError> {
        match self.backend.as_str() {
            "memory" => Ok(StorageConfig::Memory),
            "file" => Ok(StorageConfig::Directory(
                self.dir.clone().unwrap_or_else(default_state_dir),
            )),
            other => Err(invalid(
                "storage.backend",
                format!("expected 'file' or 'memory', got '{other}'"),
            )),
        }
    }
}

// ── Duration strings ────────────────────────────────────────────────

/// `"5s"`, `"1m 30s"`, `"250ms"` via humantime.
mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&humantime::format_duration(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(D::Error::custom)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn parse(toml: &str) -> Config {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::string(toml))
            .extract()
            .unwrap()
    }

    #[test]
    fn defaults_translate_cleanly() {
        let core = Config::default().to_dashboard_config().unwrap();
        assert_eq!(core.probe_timeout, Duration::from_secs(5));
        assert_eq!(core.persist_keys, vec!["settings", "history"]);
        assert_eq!(core.legacy_keys, LegacyKey::defaults());
        assert!(core.services.is_empty());
        assert!(matches!(core.storage, StorageConfig::Directory(_)));
    }

    #[test]
    fn parses_services_and_durations() {
        let cfg = parse(
            r#"
            probe_timeout = "2s 500ms"
            connection_poll_interval = "1m"

            [startup]
            max_attempts = 3
            retry_interval = "250ms"
            timeout = "10s"

            [storage]
            backend = "memory"

            [[services]]
            id = "hue"
            kind = "bridge"
            host = "192.168.68.62"

            [[services]]
            id = "sonos"
            kind = "proxy"
            url = "http://localhost:5005"
            "#,
        );

        let core = cfg.to_dashboard_config().unwrap();
        assert_eq!(core.probe_timeout, Duration::from_millis(2_500));
        assert_eq!(core.connection_poll_interval, Duration::from_secs(60));
        assert_eq!(core.startup.max_attempts, 3);
        assert_eq!(core.startup.retry_interval, Duration::from_millis(250));
        assert_eq!(core.storage, StorageConfig::Memory);
        assert_eq!(
            core.services,
            vec![
                ServiceConfig::new(
                    "hue",
                    ProbeTarget::Bridge {
                        host: "192.168.68.62".into()
                    }
                ),
                ServiceConfig::new(
                    "sonos",
                    ProbeTarget::Proxy {
                        base_url: Url::parse("http://localhost:5005").unwrap()
                    }
                ),
            ]
        );
    }

    #[test]
    fn rejects_bad_service_entries() {
        let cases = [
            (r#"[[services]]
                id = "hue"
                kind = "bridge""#, "services.hue.host"),
            (r#"[[services]]
                id = "sonos"
                kind = "proxy"
                url = "not a url""#, "services.sonos.url"),
            (r#"[[services]]
                id = "tv"
                kind = "cast""#, "services.tv.kind"),
            (r#"[[services]]
                id = "a:b"
                kind = "bridge"
                host = "h""#, "services.id"),
        ];
        for (toml, expected_field) in cases {
            match parse(toml).to_dashboard_config() {
                Err(ConfigError::Validation { field, .. }) => assert_eq!(field, expected_field),
                other => panic!("expected validation error for {expected_field}, got {other:?}"),
            }
        }
    }

    #[test]
    fn rejects_duplicate_ids_and_zero_values() {
        let dup = parse(
            r#"
            [[services]]
            id = "hue"
            kind = "bridge"
            host = "a"

            [[services]]
            id = "hue"
            kind = "bridge"
            host = "b"
            "#,
        );
        assert!(matches!(
            dup.to_dashboard_config(),
            Err(ConfigError::Validation { .. })
        ));

        let zero = parse(r#"probe_timeout = "0s""#);
        assert!(matches!(
            zero.to_dashboard_config(),
            Err(ConfigError::Validation { field, .. }) if field == "probe_timeout"
        ));
    }

    #[test]
    fn bad_duration_is_a_load_error() {
        let result = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::string(r#"probe_timeout = "soon""#))
            .extract::<Config>();
        assert!(result.is_err());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(cfg.history_capacity, Config::default().history_capacity);
    }

    #[test]
    fn saved_config_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut cfg = Config::default();
        cfg.services.push(Service {
            id: "sonos".into(),
            kind: "proxy".into(),
            host: None,
            url: Some("http://localhost:5005".into()),
        });
        cfg.storage.backend = "memory".into();

        save_config(&cfg, &path).unwrap();
        let loaded = load_config_from(&path).unwrap();

        assert_eq!(loaded.services, cfg.services);
        assert_eq!(loaded.probe_timeout, cfg.probe_timeout);
        assert_eq!(loaded.storage, cfg.storage);
    }
}
