//! Orchestration core of the homedash dashboard.
//!
//! Sits between the health probes in `homedash-api` and whatever renders
//! the dashboard. It owns no device protocols; it coordinates:
//!
//! - **[`EventBus`]**: synchronous publish/subscribe with exact, one-shot,
//!   namespace (`"state:*"`) and global (`"*"`) listeners, a bounded event
//!   history, and awaitable [`wait_for`](EventBus::wait_for) /
//!   [`request`](EventBus::request) helpers.
//!
//! - **[`StateStore`]**: one JSON document addressed by dot paths. Writes
//!   emit `state:<path>:changed` events, bump a `watch`-published version,
//!   and write allow-listed top-level keys through a [`KeyValueStorage`]
//!   backend ([`MemoryStorage`] or [`FileStorage`]).
//!
//! - **[`ConnectionMonitor`]**: concurrent health checks with transition
//!   events (`connection:<id>:online` / `:offline`) and a bounded startup
//!   wait.
//!
//! - **[`Poller`]**: named periodic tasks with skip-if-busy guards,
//!   gating conditions, and start/stop/re-interval control.
//!
//! - **[`Dashboard`]**: facade that builds and wires one of each from a
//!   [`DashboardConfig`].

pub mod bus;
pub mod config;
pub mod dashboard;
pub mod error;
mod guard;
pub mod monitor;
pub mod poller;
pub mod store;

// ── Primary re-exports ──────────────────────────────────────────────
pub use bus::{Event, EventBus, HandlerError, HandlerResult, ListenerId, Subscription, Topic};
pub use config::{DashboardConfig, LegacyKey, ServiceConfig, StorageConfig, WaitOptions};
pub use dashboard::{Dashboard, Lifecycle};
pub use error::{CoreError, StorageError};
pub use monitor::{ConnectionMonitor, ConnectionStatus, StatusSnapshot};
pub use poller::{Poller, RunOutcome, TaskOptions, TaskResult, TaskStatus};
pub use store::{
    FileStorage, KeyValueStorage, LoadReport, MemoryStorage, PushOptions, SetOptions, StateStore,
};

// Probe types callers need to describe services.
pub use homedash_api::{HealthClient, ProbeTarget};
