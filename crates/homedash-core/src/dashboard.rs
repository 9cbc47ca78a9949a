// ── Dashboard facade ──
//
// Owns one instance of each core service and wires them together:
// the monitor mirrors into the store, the store and monitor publish on
// the shared bus, and the poller drives periodic connection checks.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::Utc;
use homedash_api::{HealthClient, TransportConfig};
use serde_json::json;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::bus::{EventBus, HandlerError, Topic};
use crate::config::{DashboardConfig, StorageConfig};
use crate::error::CoreError;
use crate::monitor::{ConnectionMonitor, StatusSnapshot};
use crate::poller::{Poller, TaskOptions};
use crate::store::{FileStorage, KeyValueStorage, MemoryStorage, StateStore};

/// Poller task that re-checks every service.
pub const CONNECTION_TASK: &str = "connections";

// ── Lifecycle ────────────────────────────────────────────────────

/// Lifecycle observable by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Created,
    Starting,
    Ready,
    Stopped,
}

// ── Dashboard ────────────────────────────────────────────────────

/// Entry point for the daemon and embedders.
///
/// Cheaply cloneable via `Arc<DashboardInner>`. Construction wires the
/// services; [`start()`](Self::start) loads state, waits for services, and
/// begins polling.
#[derive(Clone)]
pub struct Dashboard {
    inner: Arc<DashboardInner>,
}

struct DashboardInner {
    config: DashboardConfig,
    bus: EventBus,
    store: Arc<StateStore>,
    monitor: Arc<ConnectionMonitor>,
    poller: Poller,
    lifecycle: watch::Sender<Lifecycle>,
}

impl Dashboard {
    /// Build a dashboard whose storage backend comes from `config.storage`.
    pub fn new(config: DashboardConfig) -> Result<Self, CoreError> {
        let storage: Arc<dyn KeyValueStorage> = match &config.storage {
            StorageConfig::Memory => Arc::new(MemoryStorage::new()),
            StorageConfig::Directory(dir) => Arc::new(FileStorage::open(dir)?),
        };
        Self::with_storage(config, storage)
    }

    /// Build a dashboard over an explicit storage backend.
    ///
    /// Fails with [`CoreError::Config`] when two services share an id.
    pub fn with_storage(
        config: DashboardConfig,
        storage: Arc<dyn KeyValueStorage>,
    ) -> Result<Self, CoreError> {
        let mut seen = BTreeSet::new();
        if let Some(dup) = config.services.iter().find(|s| !seen.insert(s.id.as_str())) {
            return Err(CoreError::Config {
                message: format!("service id '{}' is configured twice", dup.id),
            });
        }

        let client = HealthClient::new(&TransportConfig::with_timeout(config.probe_timeout))?;
        let bus = EventBus::with_history_capacity(config.history_capacity);

        let store = Arc::new(
            StateStore::new(bus.clone(), storage)
                .with_persist_keys(config.persist_keys.iter().cloned())
                .with_legacy_keys(config.legacy_keys.clone()),
        );
        let monitor = Arc::new(
            ConnectionMonitor::new(client, config.services.clone(), bus.clone())
                .with_store(Arc::clone(&store)),
        );
        let (lifecycle, _) = watch::channel(Lifecycle::Created);

        Ok(Self {
            inner: Arc::new(DashboardInner {
                config,
                bus,
                store,
                monitor,
                poller: Poller::new(),
                lifecycle,
            }),
        })
    }

    pub fn config(&self) -> &DashboardConfig {
        &self.inner.config
    }

    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.inner.store
    }

    pub fn monitor(&self) -> &Arc<ConnectionMonitor> {
        &self.inner.monitor
    }

    pub fn poller(&self) -> &Poller {
        &self.inner.poller
    }

    pub fn lifecycle(&self) -> Lifecycle {
        *self.inner.lifecycle.borrow()
    }

    pub fn subscribe_lifecycle(&self) -> watch::Receiver<Lifecycle> {
        self.inner.lifecycle.subscribe()
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Load persisted state, wait (bounded) for services, start the
    /// connection poll task, and emit `app:ready`.
    ///
    /// Never fails on offline services; the returned snapshot says which
    /// ones answered. Must be called from within a Tokio runtime.
    pub async fn start(&self) -> StatusSnapshot {
        self.set_lifecycle(Lifecycle::Starting);
        let inner = &self.inner;

        let report = inner.store.load_persisted();
        debug!(?report, "state restored");

        let snapshot = inner
            .monitor
            .wait_for_connections(inner.config.startup)
            .await;

        let monitor = Arc::clone(&inner.monitor);
        inner.poller.register(
            CONNECTION_TASK,
            move || {
                let monitor = Arc::clone(&monitor);
                async move {
                    monitor.check_all().await;
                    Ok::<(), HandlerError>(())
                }
            },
            inner.config.connection_poll_interval,
            TaskOptions::default(),
        );

        let services: BTreeMap<&str, bool> = snapshot
            .iter()
            .map(|(id, status)| (id.as_str(), status.online))
            .collect();
        inner.bus.emit_topic(
            &Topic::AppReady,
            json!({ "services": services, "timestamp": Utc::now() }),
        );

        self.set_lifecycle(Lifecycle::Ready);
        info!(
            online = services.values().filter(|online| **online).count(),
            total = services.len(),
            "dashboard ready"
        );
        snapshot
    }

    /// Stop every poller timer. State and listeners are left intact.
    pub fn shutdown(&self) {
        self.inner.poller.shutdown();
        self.set_lifecycle(Lifecycle::Stopped);
        info!("dashboard stopped");
    }

    fn set_lifecycle(&self, state: Lifecycle) {
        self.inner.lifecycle.send_replace(state);
    }
}

impl std::fmt::Debug for Dashboard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dashboard")
            .field("lifecycle", &self.lifecycle())
            .field("services", &self.inner.monitor.service_ids())
            .finish_non_exhaustive()
    }
}
