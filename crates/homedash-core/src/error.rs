// ── Core error types ──
//
// Errors that escape the orchestration layer. Almost nothing does: probe
// failures become "offline", storage failures are logged, handler failures
// are contained by the bus. What remains are the deliberate surfaces:
// event waits that time out, lookups of unknown tasks or services, and
// configuration problems.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Event bus ────────────────────────────────────────────────────
    #[error("Timed out after {timeout_ms}ms waiting for event '{event}'")]
    EventTimeout { event: String, timeout_ms: u64 },

    #[error("Listener for '{event}' was removed before the event fired")]
    ListenerDropped { event: String },

    // ── Lookup errors ────────────────────────────────────────────────
    #[error("Polling task not found: {name}")]
    TaskNotFound { name: String },

    #[error("Unknown service: {id}")]
    UnknownService { id: String },

    // ── Persistence ──────────────────────────────────────────────────
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    // ── Probe errors (wrapped for one-shot helpers) ──────────────────
    #[error("Health probe failed: {0}")]
    Probe(#[from] homedash_api::Error),

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },
}

/// Durable storage failures. Logged by the state store, never thrown to
/// callers of `set` or `persist`.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage I/O failed for '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not serialize '{key}': {source}")]
    Serialization {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid storage key '{key}'")]
    InvalidKey { key: String },

    #[error("storage quota exceeded writing '{key}'")]
    QuotaExceeded { key: String },
}
