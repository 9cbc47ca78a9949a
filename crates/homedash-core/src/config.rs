// ── Runtime dashboard configuration ──
//
// These types describe which services to watch and how the core behaves.
// They never touch disk; the daemon builds a `DashboardConfig` and hands
// it in.

use std::path::PathBuf;
use std::time::Duration;

use homedash_api::{DEFAULT_PROBE_TIMEOUT, ProbeTarget};

use crate::bus::DEFAULT_HISTORY_CAPACITY;

/// One monitored service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Stable id used in event names and state paths (`hue`, `sonos`).
    pub id: String,
    pub target: ProbeTarget,
}

impl ServiceConfig {
    pub fn new(id: impl Into<String>, target: ProbeTarget) -> Self {
        Self {
            id: id.into(),
            target,
        }
    }
}

/// Bounds for the startup connection wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOptions {
    pub max_attempts: u32,
    pub retry_interval: Duration,
    /// Wall-clock budget across all attempts.
    pub timeout: Duration,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_interval: Duration::from_secs(2),
            timeout: Duration::from_secs(15),
        }
    }
}

/// A flat storage key from the old layout and where its value now lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyKey {
    pub legacy_key: String,
    /// Dot path in the state document.
    pub target_path: String,
}

impl LegacyKey {
    pub fn new(legacy_key: impl Into<String>, target_path: impl Into<String>) -> Self {
        Self {
            legacy_key: legacy_key.into(),
            target_path: target_path.into(),
        }
    }

    /// The history keys written by earlier releases.
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new("temperatureHistory", "history.temperature"),
            Self::new("motionHistory", "history.motion"),
        ]
    }
}

/// Where persisted state lives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum StorageConfig {
    /// Nothing survives a restart.
    #[default]
    Memory,
    /// One JSON file per key in this directory.
    Directory(PathBuf),
}

/// Everything the `Dashboard` needs to start.
#[derive(Debug, Clone)]
pub struct DashboardConfig {
    pub services: Vec<ServiceConfig>,
    /// Per-probe deadline.
    pub probe_timeout: Duration,
    /// How often the connection poll task re-checks every service.
    pub connection_poll_interval: Duration,
    pub startup: WaitOptions,
    /// Top-level state keys written to durable storage.
    pub persist_keys: Vec<String>,
    pub legacy_keys: Vec<LegacyKey>,
    /// Events retained by the bus for debugging.
    pub history_capacity: usize,
    pub storage: StorageConfig,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            services: Vec::new(),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            connection_poll_interval: Duration::from_secs(30),
            startup: WaitOptions::default(),
            persist_keys: vec!["settings".into(), "history".into()],
            legacy_keys: LegacyKey::defaults(),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            storage: StorageConfig::default(),
        }
    }
}
