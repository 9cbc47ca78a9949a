// ── Path-addressable state document ──
//
// One JSON object tree behind a mutex. Every write emits change events
// through the bus after the lock is released, bumps a version counter,
// and writes the affected top-level key through to durable storage when
// that key is allow-listed.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use dashmap::DashMap;
use serde_json::{Map, Value, json};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::path::{self, is_nested, top_level};
use super::selectors::Selector;
use super::storage::KeyValueStorage;
use crate::bus::{Event, EventBus, HandlerResult, Subscription, Topic};
use crate::config::LegacyKey;
use crate::error::StorageError;

/// Prefix of every storage key written by the store.
pub const STORAGE_KEY_PREFIX: &str = "appState_";

/// Suffix of the storage entry listing legacy keys already migrated.
const MIGRATED_MARKER: &str = "_migrated";

/// Storage key holding the top-level state key `top`.
pub fn storage_key(top: &str) -> String {
    format!("{STORAGE_KEY_PREFIX}{top}")
}

/// Options for `set`, `update`, and `set_many`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetOptions {
    /// Skip change events.
    pub silent: bool,
    /// Force (`Some(true)`) or suppress (`Some(false)`) persistence
    /// regardless of the allow-list.
    pub persist: Option<bool>,
}

impl SetOptions {
    pub fn silent() -> Self {
        Self {
            silent: true,
            persist: None,
        }
    }
}

/// Options for `push`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushOptions {
    /// Evict the oldest elements beyond this length.
    pub max_length: Option<usize>,
    pub set: SetOptions,
}

impl PushOptions {
    pub fn ring(max_length: usize) -> Self {
        Self {
            max_length: Some(max_length),
            set: SetOptions::default(),
        }
    }
}

/// What `load_persisted` restored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Top-level keys read from `appState_*` entries.
    pub loaded: Vec<String>,
    /// Target paths filled from legacy keys.
    pub migrated: Vec<String>,
}

/// Shared, path-addressable application state.
pub struct StateStore {
    document: Mutex<Value>,
    bus: EventBus,
    storage: Arc<dyn KeyValueStorage>,
    persist_keys: BTreeSet<String>,
    legacy_keys: Vec<LegacyKey>,
    selectors: DashMap<String, Selector>,
    version: watch::Sender<u64>,
}

impl StateStore {
    pub fn new(bus: EventBus, storage: Arc<dyn KeyValueStorage>) -> Self {
        let (version, _) = watch::channel(0u64);
        Self {
            document: Mutex::new(Value::Object(Map::new())),
            bus,
            storage,
            persist_keys: BTreeSet::new(),
            legacy_keys: Vec::new(),
            selectors: DashMap::new(),
            version,
        }
    }

    /// Top-level keys to write through to storage.
    pub fn with_persist_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.persist_keys.extend(keys.into_iter().map(Into::into));
        self
    }

    /// Flat keys migrated by `load_persisted`.
    pub fn with_legacy_keys(mut self, keys: Vec<LegacyKey>) -> Self {
        self.legacy_keys = keys;
        self
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn is_persisted(&self, top: &str) -> bool {
        self.persist_keys.contains(top)
    }

    // ── Reads ────────────────────────────────────────────────────

    /// Owned copy of the value at `path`.
    pub fn get(&self, path: &str) -> Option<Value> {
        path::get(&self.lock(), path).cloned()
    }

    /// Owned copy of the whole document.
    pub fn get_all(&self) -> Value {
        self.lock().clone()
    }

    // ── Writes ───────────────────────────────────────────────────

    pub fn set(&self, path: &str, value: Value, opts: SetOptions) {
        self.write(path, opts, |_| value);
    }

    /// Shallow-merge `partial` into the object at `path`; otherwise `set`.
    pub fn update(&self, path: &str, partial: Value, opts: SetOptions) {
        self.write(path, opts, |current| match (current, partial) {
            (Some(Value::Object(current)), Value::Object(partial)) => {
                let mut merged = current.clone();
                merged.extend(partial);
                Value::Object(merged)
            }
            (_, partial) => partial,
        });
    }

    /// Append to the array at `path`, creating it if absent or not an array.
    pub fn push(&self, path: &str, value: Value, opts: PushOptions) {
        self.write(path, opts.set, |current| {
            let mut items = match current {
                Some(Value::Array(items)) => items.clone(),
                _ => Vec::new(),
            };
            items.push(value);
            if let Some(max) = opts.max_length {
                let excess = items.len().saturating_sub(max);
                items.drain(..excess);
            }
            Value::Array(items)
        });
    }

    /// Apply several writes silently, then announce them with a single
    /// `state:batch:changed` event (unless `opts.silent`).
    pub fn set_many<I>(&self, entries: I, opts: SetOptions)
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let quiet = SetOptions {
            silent: true,
            ..opts
        };
        let keys: Vec<String> = entries
            .into_iter()
            .map(|(path, value)| {
                self.set(&path, value, quiet);
                path
            })
            .collect();

        if !opts.silent {
            self.bus.emit_topic(
                &Topic::StateBatchChanged,
                json!({ "keys": keys, "timestamp": Utc::now() }),
            );
        }
    }

    /// Delete the value at `path`. Missing paths are a no-op.
    pub fn remove(&self, path: &str) -> Option<Value> {
        let top = top_level(path);
        let (old, snapshot) = {
            let mut doc = self.lock();
            let old = path::remove(&mut doc, path)?;
            (old, self.snapshot_if_persisted(&doc, top, None))
        };
        if let Some(top_value) = snapshot {
            self.write_through(top, top_value.as_ref());
        }
        self.bump_version();

        self.bus.emit_topic(
            &Topic::StateRemoved(path.to_owned()),
            json!({ "key": path, "oldValue": old, "timestamp": Utc::now() }),
        );
        Some(old)
    }

    /// Listen for changes at exactly `path`.
    pub fn subscribe<F>(&self, path: &str, handler: F) -> Subscription
    where
        F: Fn(&Event) -> HandlerResult + Send + Sync + 'static,
    {
        self.bus.on_topic(&Topic::StateChanged(path.to_owned()), handler)
    }

    // ── Versioning ───────────────────────────────────────────────

    /// Number of mutations applied so far.
    pub fn version(&self) -> u64 {
        *self.version.borrow()
    }

    /// Receiver that observes every version bump.
    pub fn subscribe_version(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    // ── Persistence ──────────────────────────────────────────────

    /// Write the current value of `top` to storage (removing the entry if
    /// the key is gone). Failures are logged.
    pub fn persist(&self, top: &str) {
        let value = path::get(&self.lock(), top).cloned();
        self.write_through(top, value.as_ref());
    }

    /// Restore allow-listed keys from storage, then fill empty paths from
    /// legacy keys. Silent: no change events are emitted.
    ///
    /// Each legacy key is migrated at most once. Keys already handled are
    /// recorded under `appState__migrated`, so data removed after a
    /// migration is not brought back by the next load.
    pub fn load_persisted(&self) -> LoadReport {
        let mut report = LoadReport::default();

        for top in &self.persist_keys {
            let key = storage_key(top);
            let Some(value) = self.read_json(&key) else {
                continue;
            };
            if let Err(e) = path::set(&mut self.lock(), top, value) {
                warn!(key = %key, error = %e, "could not restore persisted state");
                continue;
            }
            report.loaded.push(top.clone());
        }

        let mut migrated = self.migrated_legacy_keys();
        let recorded = migrated.len();
        for legacy in &self.legacy_keys {
            if migrated.contains(&legacy.legacy_key) {
                continue;
            }
            let Some(value) = self.read_json(&legacy.legacy_key) else {
                continue;
            };
            let filled = {
                let mut doc = self.lock();
                if path::get(&doc, &legacy.target_path).is_some() {
                    Ok(false)
                } else {
                    path::set(&mut doc, &legacy.target_path, value).map(|_| true)
                }
            };
            match filled {
                Ok(true) => {
                    let top = top_level(&legacy.target_path);
                    if self.is_persisted(top) {
                        self.persist(top);
                    }
                    report.migrated.push(legacy.target_path.clone());
                }
                Ok(false) => debug!(
                    legacy = %legacy.legacy_key,
                    target = %legacy.target_path,
                    "target already populated, legacy value dropped"
                ),
                Err(e) => {
                    warn!(legacy = %legacy.legacy_key, error = %e, "legacy migration failed");
                    continue;
                }
            }
            migrated.insert(legacy.legacy_key.clone());
        }
        if migrated.len() != recorded {
            self.write_through(MIGRATED_MARKER, Some(&json!(migrated)));
        }

        if !report.loaded.is_empty() || !report.migrated.is_empty() {
            self.bump_version();
        }
        info!(
            loaded = report.loaded.len(),
            migrated = report.migrated.len(),
            "persisted state loaded"
        );
        report
    }

    /// Delete every allow-listed `appState_*` entry. Legacy keys, the
    /// migration marker, and in-memory state are left alone.
    pub fn clear_persisted(&self) {
        for top in &self.persist_keys {
            let key = storage_key(top);
            if let Err(e) = self.storage.remove(&key) {
                warn!(key = %key, error = %e, "failed to clear persisted state");
            }
        }
    }

    // ── Selectors ────────────────────────────────────────────────

    /// Register (or replace) a derived value.
    pub fn register_selector<F>(&self, name: impl Into<String>, selector: F)
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        self.selectors.insert(name.into(), Arc::new(selector));
    }

    /// Compute a selector against the current document.
    pub fn select(&self, name: &str) -> Option<Value> {
        let selector = self.selectors.get(name).map(|s| Arc::clone(s.value()))?;
        let doc = self.get_all();
        Some(selector(&doc))
    }

    // ── Private helpers ──────────────────────────────────────────

    fn lock(&self) -> MutexGuard<'_, Value> {
        self.document.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The single write path: compute the new value from the current one
    /// under the lock, then persist, version, and emit outside it.
    fn write<F>(&self, path: &str, opts: SetOptions, compute: F)
    where
        F: FnOnce(Option<&Value>) -> Value,
    {
        let top = top_level(path);
        let (value, old, snapshot) = {
            let mut doc = self.lock();
            let value = compute(path::get(&doc, path));
            let old = match path::set(&mut doc, path, value.clone()) {
                Ok(old) => old,
                Err(e) => {
                    warn!(path, error = %e, "write rejected");
                    return;
                }
            };
            (value, old, self.snapshot_if_persisted(&doc, top, opts.persist))
        };

        if let Some(top_value) = snapshot {
            self.write_through(top, top_value.as_ref());
        }
        self.bump_version();

        if opts.silent {
            return;
        }
        let payload = json!({
            "key": path,
            "value": value,
            "oldValue": old.unwrap_or(Value::Null),
            "timestamp": Utc::now(),
        });
        if is_nested(path) {
            self.bus
                .emit_topic(&Topic::StateChanged(path.to_owned()), payload.clone());
            self.bus
                .emit_topic(&Topic::StateChanged(top.to_owned()), payload);
        } else {
            self.bus
                .emit_topic(&Topic::StateChanged(path.to_owned()), payload);
        }
    }

    /// `Some(current top-level value)` when this write should be persisted.
    #[allow(clippy::option_option)]
    fn snapshot_if_persisted(
        &self,
        doc: &Value,
        top: &str,
        force: Option<bool>,
    ) -> Option<Option<Value>> {
        let persist = force.unwrap_or_else(|| self.persist_keys.contains(top));
        persist.then(|| path::get(doc, top).cloned())
    }

    fn write_through(&self, top: &str, value: Option<&Value>) {
        let key = storage_key(top);
        let result = match value {
            Some(value) => serde_json::to_string(value)
                .map_err(|source| StorageError::Serialization {
                    key: key.clone(),
                    source,
                })
                .and_then(|text| self.storage.set(&key, &text)),
            None => self.storage.remove(&key),
        };
        if let Err(e) = result {
            warn!(key = %key, error = %e, "failed to persist state; keeping in-memory value");
        }
    }

    fn migrated_legacy_keys(&self) -> BTreeSet<String> {
        let key = storage_key(MIGRATED_MARKER);
        self.read_json(&key)
            .and_then(|value| match serde_json::from_value(value) {
                Ok(keys) => Some(keys),
                Err(e) => {
                    warn!(key = %key, error = %e, "ignoring malformed migration marker");
                    None
                }
            })
            .unwrap_or_default()
    }

    fn read_json(&self, key: &str) -> Option<Value> {
        let text = match self.storage.get(key) {
            Ok(Some(text)) => text,
            Ok(None) => return None,
            Err(e) => {
                warn!(key = %key, error = %e, "failed to read persisted state");
                return None;
            }
        };
        match serde_json::from_str(&text) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key = %key, error = %e, "skipping unparsable persisted state");
                None
            }
        }
    }

    fn bump_version(&self) {
        // `send_modify` updates unconditionally, even with zero receivers.
        self.version.send_modify(|v| *v += 1);
    }
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore")
            .field("persist_keys", &self.persist_keys)
            .field("legacy_keys", &self.legacy_keys)
            .field("version", &self.version())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::store::MemoryStorage;

    fn store_with(storage: &Arc<MemoryStorage>) -> StateStore {
        StateStore::new(EventBus::new(), Arc::clone(storage) as Arc<dyn KeyValueStorage>)
            .with_persist_keys(["settings", "history"])
            .with_legacy_keys(LegacyKey::defaults())
    }

    fn memory_store() -> StateStore {
        store_with(&Arc::new(MemoryStorage::new()))
    }

    fn capture(bus: &EventBus, name: &str) -> Arc<Mutex<Vec<Value>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.on(name, move |event| {
            sink.lock().unwrap().push(event.payload.clone());
            Ok(())
        });
        seen
    }

    struct BrokenStorage;

    impl KeyValueStorage for BrokenStorage {
        fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
            Err(StorageError::InvalidKey { key: key.into() })
        }
        fn set(&self, key: &str, _value: &str) -> Result<(), StorageError> {
            Err(StorageError::QuotaExceeded { key: key.into() })
        }
        fn remove(&self, key: &str) -> Result<(), StorageError> {
            Err(StorageError::InvalidKey { key: key.into() })
        }
        fn keys(&self) -> Result<Vec<String>, StorageError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn reads_are_copies() {
        let store = memory_store();
        store.set("a.b.c", json!(5), SetOptions::default());

        let mut copy = store.get("a").unwrap();
        copy["b"]["c"] = json!(99);

        assert_eq!(store.get("a.b.c"), Some(json!(5)));
        assert_eq!(store.get("a"), Some(json!({"b": {"c": 5}})));
    }

    #[test]
    fn nested_set_emits_fine_and_coarse_events() {
        let store = memory_store();
        store.set("connections.hue.online", json!(false), SetOptions::default());
        let fine = capture(store.bus(), "state:connections.hue.online:changed");
        let coarse = capture(store.bus(), "state:connections:changed");

        store.set("connections.hue.online", json!(true), SetOptions::default());

        let fine = fine.lock().unwrap();
        let coarse = coarse.lock().unwrap();
        assert_eq!(fine.len(), 1);
        assert_eq!(fine[0]["key"], "connections.hue.online");
        assert_eq!(fine[0]["value"], true);
        assert_eq!(fine[0]["oldValue"], false);
        assert!(fine[0]["timestamp"].is_string());
        assert_eq!(*coarse, *fine);
    }

    #[test]
    fn top_level_set_emits_once_with_null_old_value() {
        let store = memory_store();
        let all = capture(store.bus(), "state:*");

        store.set("theme", json!("dark"), SetOptions::default());

        let all = all.lock().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0]["oldValue"], Value::Null);
    }

    #[test]
    fn silent_set_emits_nothing_but_bumps_version() {
        let store = memory_store();
        let all = capture(store.bus(), "*");
        let before = store.version();

        store.set("a.b", json!(1), SetOptions::silent());

        assert!(all.lock().unwrap().is_empty());
        assert_eq!(store.version(), before + 1);
        assert_eq!(store.get("a.b"), Some(json!(1)));
    }

    #[test]
    fn update_merges_objects_and_replaces_scalars() {
        let store = memory_store();
        store.set("settings", json!({"theme": "dark", "units": "c"}), SetOptions::default());

        store.update("settings", json!({"units": "f"}), SetOptions::default());
        assert_eq!(store.get("settings"), Some(json!({"theme": "dark", "units": "f"})));

        store.set("count", json!(1), SetOptions::default());
        store.update("count", json!({"n": 2}), SetOptions::default());
        assert_eq!(store.get("count"), Some(json!({"n": 2})));
    }

    #[test]
    fn push_keeps_a_bounded_ring() {
        let store = memory_store();
        for i in 0..5 {
            store.push("history.temperature", json!(i), PushOptions::ring(3));
        }
        assert_eq!(store.get("history.temperature"), Some(json!([2, 3, 4])));

        store.set("scalar", json!(7), SetOptions::default());
        store.push("scalar", json!("x"), PushOptions::default());
        assert_eq!(store.get("scalar"), Some(json!(["x"])));
    }

    #[test]
    fn remove_emits_removed_and_ignores_missing() {
        let store = memory_store();
        store.set("a.b", json!(1), SetOptions::default());
        let removed = capture(store.bus(), "state:a.b:removed");

        assert_eq!(store.remove("a.b"), Some(json!(1)));
        assert_eq!(store.remove("a.b"), None);
        assert_eq!(store.remove("nothing.here"), None);

        let removed = removed.lock().unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0]["oldValue"], 1);
        assert_eq!(store.get("a"), Some(json!({})));
    }

    #[test]
    fn allow_listed_keys_are_written_through() {
        let storage = Arc::new(MemoryStorage::new());
        let store = store_with(&storage);

        store.set("settings.theme", json!("dark"), SetOptions::default());
        store.set("connections.hue", json!(true), SetOptions::default());
        store.set(
            "scratch",
            json!(1),
            SetOptions {
                persist: Some(true),
                ..SetOptions::default()
            },
        );
        store.set(
            "history.motion",
            json!([]),
            SetOptions {
                persist: Some(false),
                ..SetOptions::default()
            },
        );

        assert_eq!(
            storage.get("appState_settings").unwrap().as_deref(),
            Some(r#"{"theme":"dark"}"#)
        );
        assert_eq!(storage.get("appState_connections").unwrap(), None);
        assert_eq!(storage.get("appState_scratch").unwrap().as_deref(), Some("1"));
        assert_eq!(storage.get("appState_history").unwrap(), None);

        store.remove("settings.theme");
        assert_eq!(storage.get("appState_settings").unwrap().as_deref(), Some("{}"));
    }

    #[test]
    fn load_restores_and_migrates_without_clobbering() {
        let storage = Arc::new(MemoryStorage::with_entries([
            ("appState_settings", r#"{"theme":"light"}"#),
            ("appState_history", r#"{"temperature":[21.5]}"#),
            ("temperatureHistory", "[18.0, 19.0]"),
            ("motionHistory", r#"[{"room":"hall"}]"#),
        ]));
        let store = store_with(&storage);
        let events = capture(store.bus(), "*");

        let report = store.load_persisted();

        assert_eq!(report.loaded, vec!["history", "settings"]);
        assert_eq!(report.migrated, vec!["history.motion"]);
        assert_eq!(store.get("history.temperature"), Some(json!([21.5])));
        assert_eq!(store.get("history.motion"), Some(json!([{"room": "hall"}])));
        assert_eq!(store.get("settings.theme"), Some(json!("light")));
        assert!(events.lock().unwrap().is_empty());

        // Legacy keys stay; both are recorded as handled.
        assert!(storage.get("temperatureHistory").unwrap().is_some());
        assert_eq!(
            storage.get("appState__migrated").unwrap().as_deref(),
            Some(r#"["motionHistory","temperatureHistory"]"#)
        );
        let again = store_with(&storage).load_persisted();
        assert!(again.migrated.is_empty());
    }

    #[test]
    fn removed_migrated_data_stays_removed() {
        let storage = Arc::new(MemoryStorage::with_entries([(
            "motionHistory",
            r#"[{"room":"hall"}]"#,
        )]));
        let first = store_with(&storage);
        assert_eq!(first.load_persisted().migrated, vec!["history.motion"]);
        first.remove("history.motion");
        assert_eq!(storage.get("appState_history").unwrap().as_deref(), Some("{}"));

        let second = store_with(&storage);
        let report = second.load_persisted();

        assert_eq!(report.loaded, vec!["history"]);
        assert!(report.migrated.is_empty());
        assert_eq!(second.get("history.motion"), None);
        assert!(storage.get("motionHistory").unwrap().is_some());
    }

    #[test]
    fn migration_into_memory_only_key_is_not_persisted() {
        let storage = Arc::new(MemoryStorage::with_entries([("motionHistory", "[1]")]));
        let store = StateStore::new(EventBus::new(), Arc::clone(&storage) as Arc<dyn KeyValueStorage>)
            .with_persist_keys(["settings"])
            .with_legacy_keys(LegacyKey::defaults());

        let report = store.load_persisted();

        assert_eq!(report.migrated, vec!["history.motion"]);
        assert_eq!(store.get("history.motion"), Some(json!([1])));
        assert_eq!(storage.get("appState_history").unwrap(), None);
    }

    #[test]
    fn writes_never_discard_arrays() {
        let store = memory_store();
        store.set("list", json!([1, 2]), SetOptions::default());
        let changes = capture(store.bus(), "state:list:changed");

        store.set("list.5", json!(9), SetOptions::default());
        assert_eq!(store.get("list"), Some(json!([1, 2, null, null, null, 9])));

        let version = store.version();
        store.set("list.name", json!("x"), SetOptions::default());
        assert_eq!(store.get("list"), Some(json!([1, 2, null, null, null, 9])));
        assert_eq!(store.version(), version);

        let changes = changes.lock().unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0]["oldValue"], Value::Null);
        assert_eq!(changes[0]["value"], 9);
    }

    #[test]
    fn load_skips_unparsable_entries() {
        let storage = Arc::new(MemoryStorage::with_entries([
            ("appState_settings", "{not json"),
            ("motionHistory", "also not json"),
        ]));
        let store = store_with(&storage);

        let report = store.load_persisted();

        assert_eq!(report, LoadReport::default());
        assert_eq!(store.get_all(), json!({}));
    }

    #[test]
    fn clear_persisted_keeps_memory_and_legacy_keys() {
        let storage = Arc::new(MemoryStorage::with_entries([("motionHistory", "[]")]));
        let store = store_with(&storage);
        store.set("settings.theme", json!("dark"), SetOptions::default());

        store.clear_persisted();

        assert_eq!(storage.keys().unwrap(), vec!["motionHistory"]);
        assert_eq!(store.get("settings.theme"), Some(json!("dark")));
    }

    #[test]
    fn storage_failures_never_reach_callers() {
        let store = StateStore::new(EventBus::new(), Arc::new(BrokenStorage))
            .with_persist_keys(["settings"])
            .with_legacy_keys(LegacyKey::defaults());

        store.set("settings.theme", json!("dark"), SetOptions::default());
        store.persist("settings");
        store.clear_persisted();
        let report = store.load_persisted();

        assert_eq!(store.get("settings.theme"), Some(json!("dark")));
        assert_eq!(report, LoadReport::default());
    }

    #[test]
    fn set_many_emits_one_batch_event() {
        let store = memory_store();
        let batch = capture(store.bus(), "state:batch:changed");
        let singles = capture(store.bus(), "state:a:changed");

        store.set_many(
            [
                ("a".to_owned(), json!(1)),
                ("b.c".to_owned(), json!(2)),
            ],
            SetOptions::default(),
        );

        assert_eq!(store.get_all(), json!({"a": 1, "b": {"c": 2}}));
        assert!(singles.lock().unwrap().is_empty());
        let batch = batch.lock().unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0]["keys"], json!(["a", "b.c"]));
    }

    #[test]
    fn selectors_recompute_on_every_call() {
        let store = memory_store();
        store.register_selector("lightsOn", crate::store::selectors::keys_where("lights", "on", json!(true)));
        assert_eq!(store.select("lightsOn"), Some(json!([])));

        store.set("lights.kitchen", json!({"on": true}), SetOptions::default());
        assert_eq!(store.select("lightsOn"), Some(json!(["kitchen"])));

        store.set("lights.kitchen.on", json!(false), SetOptions::default());
        assert_eq!(store.select("lightsOn"), Some(json!([])));
        assert_eq!(store.select("unknown"), None);
    }

    #[test]
    fn subscribe_targets_exact_path() {
        let store = memory_store();
        let hits = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&hits);
        let sub = store.subscribe("weather.current", move |_| {
            *counter.lock().unwrap() += 1;
            Ok(())
        });

        store.set("weather.current", json!({"temp": 12}), SetOptions::default());
        store.set("weather.forecast", json!([]), SetOptions::default());
        sub.unsubscribe();
        store.set("weather.current", json!({"temp": 13}), SetOptions::default());

        assert_eq!(*hits.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn version_receivers_observe_changes() {
        let store = memory_store();
        let mut rx = store.subscribe_version();
        assert_eq!(*rx.borrow_and_update(), 0);

        store.set("x", json!(1), SetOptions::default());
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), 1);

        assert_eq!(store.remove("missing"), None);
        assert!(!rx.has_changed().unwrap());
    }
}
