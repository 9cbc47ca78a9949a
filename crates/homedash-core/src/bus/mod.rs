// ── Event bus ──
//
// Synchronous publish/subscribe dispatcher. Listeners are keyed by exact
// name or by pattern (`"<ns>:*"`, `"*"`). No lock is held while a handler
// runs, so handlers may subscribe, unsubscribe, or emit re-entrantly.

mod topic;

use std::collections::{BTreeSet, VecDeque};
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use crate::error::CoreError;

pub use topic::{GLOBAL_WILDCARD, NAMESPACE_SEPARATOR, Topic};

/// Default number of events retained for debugging.
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Error a handler may return; it is logged and otherwise ignored.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// What every handler returns.
pub type HandlerResult = Result<(), HandlerError>;

type Handler = Arc<dyn Fn(&Event) -> HandlerResult + Send + Sync>;

// ── Event ────────────────────────────────────────────────────────

/// One emission, as seen by handlers and kept in the history buffer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub name: String,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

/// Identifies one registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

struct Listener {
    id: ListenerId,
    handler: Handler,
}

// ── EventBus ─────────────────────────────────────────────────────

/// Publish/subscribe dispatcher with exact, one-shot, and wildcard
/// subscriptions.
///
/// Cheaply cloneable; clones share listeners and history.
///
/// `emit` runs handlers in four tiers: exact-name listeners, then
/// one-shot listeners for that name, then `"<namespace>:*"` listeners,
/// then `"*"` listeners. Within a tier handlers run in registration order.
/// A handler that errors or panics is logged and the remaining handlers
/// still run.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

struct BusInner {
    listeners: DashMap<String, Vec<Listener>>,
    once: DashMap<String, Vec<Listener>>,
    history: Mutex<VecDeque<Event>>,
    history_capacity: usize,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_history_capacity(DEFAULT_HISTORY_CAPACITY)
    }

    /// Bus whose history ring buffer keeps at most `capacity` events.
    pub fn with_history_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                listeners: DashMap::new(),
                once: DashMap::new(),
                history: Mutex::new(VecDeque::with_capacity(capacity)),
                history_capacity: capacity,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    // ── Subscription ─────────────────────────────────────────────

    /// Listen to `name` (an exact name, `"<ns>:*"`, or `"*"`).
    pub fn on<F>(&self, name: &str, handler: F) -> Subscription
    where
        F: Fn(&Event) -> HandlerResult + Send + Sync + 'static,
    {
        self.add(&self.inner.listeners, name, Arc::new(handler))
    }

    /// Listen to the next emission of exactly `name`, then auto-remove.
    pub fn once<F>(&self, name: &str, handler: F) -> Subscription
    where
        F: Fn(&Event) -> HandlerResult + Send + Sync + 'static,
    {
        self.add(&self.inner.once, name, Arc::new(handler))
    }

    /// Listen to a typed topic.
    pub fn on_topic<F>(&self, topic: &Topic, handler: F) -> Subscription
    where
        F: Fn(&Event) -> HandlerResult + Send + Sync + 'static,
    {
        self.on(&topic.to_string(), handler)
    }

    /// Listen to `name`, deserializing each payload into `T` first.
    /// Payloads that do not fit `T` are reported like handler errors.
    pub fn on_typed<T, F>(&self, name: &str, handler: F) -> Subscription
    where
        T: DeserializeOwned,
        F: Fn(T) -> HandlerResult + Send + Sync + 'static,
    {
        self.on(name, move |event| {
            let payload: T = serde_json::from_value(event.payload.clone())?;
            handler(payload)
        })
    }

    /// Remove a listener previously registered under `name`.
    /// Returns `true` if it was still registered.
    pub fn off(&self, name: &str, id: ListenerId) -> bool {
        self.inner.remove(name, id)
    }

    /// Drop every listener for `name`, or every listener at all.
    pub fn clear(&self, name: Option<&str>) {
        match name {
            Some(name) => {
                self.inner.listeners.remove(name);
                self.inner.once.remove(name);
            }
            None => {
                self.inner.listeners.clear();
                self.inner.once.clear();
            }
        }
    }

    // ── Emission ─────────────────────────────────────────────────

    /// Emit `name` with `payload`. Returns how many handlers ran.
    pub fn emit(&self, name: &str, payload: Value) -> usize {
        let event = Event {
            name: name.to_owned(),
            payload,
            timestamp: Utc::now(),
        };
        self.record(&event);

        let mut handlers = self.inner.snapshot(&self.inner.listeners, name);
        // One-shot listeners are removed before they run so concurrent
        // emitters cannot fire them twice.
        if let Some((_, once)) = self.inner.once.remove(name) {
            handlers.extend(once.into_iter().map(|l| l.handler));
        }
        if let Some(ns) = topic::namespace_of(name) {
            let pattern = Topic::namespace_pattern(ns);
            if pattern != name {
                handlers.extend(self.inner.snapshot(&self.inner.listeners, &pattern));
            }
        }
        if name != GLOBAL_WILDCARD {
            handlers.extend(self.inner.snapshot(&self.inner.listeners, GLOBAL_WILDCARD));
        }

        for handler in &handlers {
            invoke(handler, &event);
        }
        handlers.len()
    }

    /// Emit a typed topic.
    pub fn emit_topic(&self, topic: &Topic, payload: Value) -> usize {
        self.emit(&topic.to_string(), payload)
    }

    // ── Awaiting events ──────────────────────────────────────────

    /// Resolve with the payload of the next emission of `name`.
    ///
    /// The listener is registered immediately, not on first poll. With a
    /// non-zero `timeout` the future fails with
    /// [`CoreError::EventTimeout`] if nothing arrives in time. Either way
    /// the temporary listener is removed, including when the future is
    /// dropped early.
    pub fn wait_for(
        &self,
        name: &str,
        timeout: Option<Duration>,
    ) -> impl Future<Output = Result<Value, CoreError>> + Send + use<> {
        let (tx, rx) = oneshot::channel();
        let slot = Mutex::new(Some(tx));
        let guard = self
            .once(name, move |event| {
                if let Some(tx) = lock(&slot).take() {
                    let _ = tx.send(event.payload.clone());
                }
                Ok(())
            })
            .into_guard();
        let event = name.to_owned();

        async move {
            let _guard = guard;
            match timeout.filter(|t| !t.is_zero()) {
                Some(limit) => match tokio::time::timeout(limit, rx).await {
                    Ok(Ok(payload)) => Ok(payload),
                    Ok(Err(_)) => Err(CoreError::ListenerDropped { event }),
                    Err(_) => Err(CoreError::EventTimeout {
                        event,
                        timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                    }),
                },
                None => rx.await.map_err(|_| CoreError::ListenerDropped { event }),
            }
        }
    }

    /// Request/response over the bus: listen for `response`, emit
    /// `request`, and resolve with the first response payload.
    ///
    /// The request is emitted before this returns; listening starts first
    /// so a responder that answers synchronously is not missed.
    pub fn request(
        &self,
        request: &str,
        payload: Value,
        response: &str,
        timeout: Option<Duration>,
    ) -> impl Future<Output = Result<Value, CoreError>> + Send + use<> {
        let waiter = self.wait_for(response, timeout);
        let handled = self.emit(request, payload);
        debug!(request, response, handled, "bus request sent");
        waiter
    }

    // ── Introspection ────────────────────────────────────────────

    /// Names and patterns that currently have at least one listener.
    pub fn event_names(&self) -> Vec<String> {
        let names: BTreeSet<String> = self
            .inner
            .listeners
            .iter()
            .chain(self.inner.once.iter())
            .filter(|entry| !entry.value().is_empty())
            .map(|entry| entry.key().clone())
            .collect();
        names.into_iter().collect()
    }

    /// Exact plus one-shot listeners registered under `name`.
    pub fn listener_count(&self, name: &str) -> usize {
        let exact = self.inner.listeners.get(name).map_or(0, |l| l.len());
        let once = self.inner.once.get(name).map_or(0, |l| l.len());
        exact + once
    }

    /// The most recent `limit` events, oldest first, optionally only
    /// those whose name contains `filter`.
    pub fn history(&self, limit: usize, filter: Option<&str>) -> Vec<Event> {
        let history = lock(&self.inner.history);
        let matching: Vec<&Event> = history
            .iter()
            .filter(|e| filter.is_none_or(|f| e.name.contains(f)))
            .collect();
        let skip = matching.len().saturating_sub(limit);
        matching.into_iter().skip(skip).cloned().collect()
    }

    pub fn clear_history(&self) {
        lock(&self.inner.history).clear();
    }

    // ── Private helpers ──────────────────────────────────────────

    fn add(
        &self,
        map: &DashMap<String, Vec<Listener>>,
        name: &str,
        handler: Handler,
    ) -> Subscription {
        let id = ListenerId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        map.entry(name.to_owned())
            .or_default()
            .push(Listener { id, handler });
        Subscription {
            bus: Arc::downgrade(&self.inner),
            name: name.to_owned(),
            id,
        }
    }

    fn record(&self, event: &Event) {
        if self.inner.history_capacity == 0 {
            return;
        }
        let mut history = lock(&self.inner.history);
        while history.len() >= self.inner.history_capacity {
            history.pop_front();
        }
        history.push_back(event.clone());
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("names", &self.event_names())
            .field("history_capacity", &self.inner.history_capacity)
            .finish()
    }
}

impl BusInner {
    fn snapshot(&self, map: &DashMap<String, Vec<Listener>>, name: &str) -> Vec<Handler> {
        map.get(name)
            .map(|listeners| listeners.iter().map(|l| Arc::clone(&l.handler)).collect())
            .unwrap_or_default()
    }

    fn remove(&self, name: &str, id: ListenerId) -> bool {
        remove_listener(&self.listeners, name, id) || remove_listener(&self.once, name, id)
    }
}

fn remove_listener(map: &DashMap<String, Vec<Listener>>, name: &str, id: ListenerId) -> bool {
    let removed = match map.get_mut(name) {
        Some(mut listeners) => {
            let before = listeners.len();
            listeners.retain(|l| l.id != id);
            listeners.len() != before
        }
        None => false,
    };
    if removed {
        map.remove_if(name, |_, listeners| listeners.is_empty());
    }
    removed
}

fn invoke(handler: &Handler, event: &Event) {
    match catch_unwind(AssertUnwindSafe(|| (handler.as_ref())(event))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(event = %event.name, error = %e, "event handler failed"),
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(ToString::to_string)
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".into());
            error!(event = %event.name, panic = %message, "event handler panicked");
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Subscription ─────────────────────────────────────────────────

/// Handle for one registered listener.
///
/// Dropping it leaves the listener in place; call
/// [`unsubscribe`](Self::unsubscribe) or convert it with
/// [`into_guard`](Self::into_guard) for scoped removal.
#[derive(Debug, Clone)]
pub struct Subscription {
    bus: Weak<BusInner>,
    name: String,
    id: ListenerId,
}

impl Subscription {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Remove the listener. Returns `false` if it was already gone.
    pub fn unsubscribe(&self) -> bool {
        self.bus
            .upgrade()
            .is_some_and(|bus| bus.remove(&self.name, self.id))
    }

    /// Tie the listener's lifetime to the returned guard.
    pub fn into_guard(self) -> SubscriptionGuard {
        SubscriptionGuard(self)
    }
}

/// Unsubscribes its listener when dropped.
#[derive(Debug)]
pub struct SubscriptionGuard(Subscription);

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.0.unsubscribe();
    }
}
