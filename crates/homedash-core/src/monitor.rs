// ── Connection monitor ──
//
// Tracks online/offline status for a fixed set of services. Probe failures
// of any kind mean "offline"; nothing here returns an error. Transition
// events fire only when a service's `online` flag actually changes.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures_util::future::join_all;
use homedash_api::{HealthClient, ProbeReport};
use serde::Serialize;
use serde_json::{Value, json};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::bus::{EventBus, Topic};
use crate::config::{ServiceConfig, WaitOptions};
use crate::error::CoreError;
use crate::guard::InFlightGuard;
use crate::store::{SetOptions, StateStore};

/// State path under which status records are mirrored.
pub const CONNECTIONS_PATH: &str = "connections";

/// Last known state of one service.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub online: bool,
    pub last_check: Option<DateTime<Utc>>,
    /// `{name?, apiVersion?, uptime?}` from the last successful probe.
    pub metadata: Value,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self {
            online: false,
            last_check: None,
            metadata: Value::Null,
        }
    }
}

/// Status of every service, keyed by id.
pub type StatusSnapshot = BTreeMap<String, ConnectionStatus>;

/// Health checker for the dashboard's backing services.
pub struct ConnectionMonitor {
    client: HealthClient,
    services: Vec<ServiceConfig>,
    status: DashMap<String, ConnectionStatus>,
    bus: EventBus,
    store: Option<Arc<StateStore>>,
    checking: Arc<AtomicBool>,
}

impl ConnectionMonitor {
    /// Every service starts offline.
    pub fn new(client: HealthClient, services: Vec<ServiceConfig>, bus: EventBus) -> Self {
        let status = services
            .iter()
            .map(|s| (s.id.clone(), ConnectionStatus::default()))
            .collect();
        Self {
            client,
            services,
            status,
            bus,
            store: None,
            checking: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Mirror status records into `connections.<id>` of `store`.
    pub fn with_store(mut self, store: Arc<StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn client(&self) -> &HealthClient {
        &self.client
    }

    // ── Checks ───────────────────────────────────────────────────

    /// Probe one service. Unknown ids report `false`.
    pub async fn check_one(&self, id: &str) -> bool {
        let Some(service) = self.services.iter().find(|s| s.id == id) else {
            warn!(service = %id, "check requested for unknown service");
            return false;
        };

        match self.client.probe(&service.target).await {
            Ok(report) => {
                self.record_online(id, report.metadata());
                true
            }
            Err(e) => {
                debug!(service = %id, error = %e, "health probe failed");
                self.record_offline(id, &e.to_string());
                false
            }
        }
    }

    /// Probe one service without touching tracked status or emitting
    /// events, surfacing the failure instead of folding it into "offline".
    pub async fn probe(&self, id: &str) -> Result<ProbeReport, CoreError> {
        let service = self
            .services
            .iter()
            .find(|s| s.id == id)
            .ok_or_else(|| CoreError::UnknownService { id: id.to_owned() })?;
        Ok(self.client.probe(&service.target).await?)
    }

    /// Probe every service concurrently.
    ///
    /// While a sweep is running, further calls return the last known
    /// snapshot immediately instead of probing again.
    pub async fn check_all(&self) -> StatusSnapshot {
        let Some(_guard) = InFlightGuard::try_acquire(&self.checking) else {
            debug!("connection check already in flight, returning last snapshot");
            return self.status();
        };

        join_all(self.services.iter().map(|s| self.check_one(&s.id))).await;
        self.status()
    }

    /// Re-check until everything is online, `max_attempts` sweeps have
    /// run, or `timeout` has elapsed. Never fails; services still offline
    /// are logged and reflected in the returned snapshot.
    pub async fn wait_for_connections(&self, opts: WaitOptions) -> StatusSnapshot {
        let deadline = Instant::now() + opts.timeout;
        let max_attempts = opts.max_attempts.max(1);
        let mut attempt = 0u32;

        let snapshot = loop {
            attempt += 1;
            let snapshot = self.check_all().await;
            if snapshot.values().all(|s| s.online) {
                info!(attempt, "all services online");
                return snapshot;
            }
            if attempt >= max_attempts {
                break snapshot;
            }

            let now = Instant::now();
            if now >= deadline {
                break snapshot;
            }
            let pause = opts.retry_interval.min(deadline - now);
            debug!(attempt, retry_in_ms = pause.as_millis(), "services offline, retrying");
            tokio::time::sleep(pause).await;
            if Instant::now() >= deadline {
                break self.status();
            }
        };

        let offline: Vec<&str> = snapshot
            .iter()
            .filter(|(_, s)| !s.online)
            .map(|(id, _)| id.as_str())
            .collect();
        warn!(attempts = attempt, offline = ?offline, "continuing with services offline");
        snapshot
    }

    // ── Queries ──────────────────────────────────────────────────

    pub fn is_online(&self, id: &str) -> bool {
        self.status.get(id).is_some_and(|s| s.online)
    }

    pub fn status_of(&self, id: &str) -> Option<ConnectionStatus> {
        self.status.get(id).map(|s| s.value().clone())
    }

    /// Copy of every status record.
    pub fn status(&self) -> StatusSnapshot {
        self.status
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Service ids in configuration order.
    pub fn service_ids(&self) -> Vec<String> {
        self.services.iter().map(|s| s.id.clone()).collect()
    }

    /// How long one probe may take.
    pub fn probe_timeout(&self) -> Duration {
        self.client.timeout()
    }

    // ── Private helpers ──────────────────────────────────────────

    fn record_online(&self, id: &str, metadata: Value) {
        let (was_online, record) = {
            let mut entry = self.status.entry(id.to_owned()).or_default();
            let was_online = entry.online;
            entry.online = true;
            entry.last_check = Some(Utc::now());
            entry.metadata = metadata.clone();
            (was_online, entry.value().clone())
        };

        self.mirror(id, &record, !was_online);
        if !was_online {
            info!(service = %id, "service online");
            self.bus
                .emit_topic(&Topic::ConnectionOnline(id.to_owned()), metadata);
        }
    }

    fn record_offline(&self, id: &str, reason: &str) {
        let (was_online, record) = {
            let mut entry = self.status.entry(id.to_owned()).or_default();
            let was_online = entry.online;
            entry.online = false;
            entry.last_check = Some(Utc::now());
            (was_online, entry.value().clone())
        };

        self.mirror(id, &record, was_online);
        if was_online {
            warn!(service = %id, reason, "service offline");
            self.bus.emit_topic(
                &Topic::ConnectionOffline(id.to_owned()),
                json!({ "error": reason, "timestamp": Utc::now() }),
            );
        }
    }

    fn mirror(&self, id: &str, record: &ConnectionStatus, transition: bool) {
        let Some(store) = &self.store else {
            return;
        };
        let value = match serde_json::to_value(record) {
            Ok(value) => value,
            Err(e) => {
                warn!(service = %id, error = %e, "could not serialize connection status");
                return;
            }
        };
        let opts = SetOptions {
            silent: !transition,
            persist: None,
        };
        store.set(&format!("{CONNECTIONS_PATH}.{id}"), value, opts);
    }
}

impl std::fmt::Debug for ConnectionMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionMonitor")
            .field("services", &self.service_ids())
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}
