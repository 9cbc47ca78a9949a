// ── Named-task poller ──
//
// Each registered task owns a timer loop (a spawned Tokio task cancelled
// through a `CancellationToken`) and a runner shared by every invocation.
// Ticks spawn invocations; the runner checks the condition, then the
// in-flight guard, then calls the task function. A busy tick is skipped,
// never queued.
//
// `register`, `start`, and `update_interval` spawn onto the current Tokio
// runtime and must be called from within one.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bus::HandlerError;
use crate::error::CoreError;
use crate::guard::InFlightGuard;

/// Shortest accepted interval; zero would spin.
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// What a task function returns. Errors are logged, never propagated.
pub type TaskResult = Result<(), HandlerError>;

type TaskFn = Arc<dyn Fn() -> BoxFuture<'static, TaskResult> + Send + Sync>;
type Condition = Arc<dyn Fn() -> bool + Send + Sync>;

// ── Options and reports ──────────────────────────────────────────

/// Per-task behavior.
#[derive(Clone)]
pub struct TaskOptions {
    /// Skip ticks while a previous invocation is still running.
    pub guarded: bool,
    /// Checked before the guard; `false` skips the tick.
    pub condition: Option<Arc<dyn Fn() -> bool + Send + Sync>>,
    /// Fire once right away instead of waiting a full interval.
    pub run_immediately: bool,
    /// Cancel an invocation that runs longer than this and release the
    /// guard. `None` lets invocations run indefinitely.
    pub max_in_flight: Option<Duration>,
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            guarded: true,
            condition: None,
            run_immediately: false,
            max_in_flight: None,
        }
    }
}

impl TaskOptions {
    pub fn unguarded(mut self) -> Self {
        self.guarded = false;
        self
    }

    pub fn when<F>(mut self, condition: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.condition = Some(Arc::new(condition));
        self
    }

    pub fn run_immediately(mut self) -> Self {
        self.run_immediately = true;
        self
    }

    pub fn max_in_flight(mut self, limit: Duration) -> Self {
        self.max_in_flight = Some(limit);
        self
    }
}

impl std::fmt::Debug for TaskOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskOptions")
            .field("guarded", &self.guarded)
            .field("condition", &self.condition.is_some())
            .field("run_immediately", &self.run_immediately)
            .field("max_in_flight", &self.max_in_flight)
            .finish()
    }
}

/// Result of one invocation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    /// The function returned an error or panicked.
    Failed(String),
    /// A previous invocation still holds the guard.
    SkippedBusy,
    /// The task's condition returned `false`.
    SkippedCondition,
    /// Cancelled after exceeding `max_in_flight`.
    TimedOut,
}

/// Introspection record for one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskStatus {
    pub name: String,
    pub interval: Duration,
    pub enabled: bool,
    pub timer_active: bool,
    pub executing: bool,
    pub guarded: bool,
    pub runs: u64,
    pub skipped_busy: u64,
    pub skipped_condition: u64,
    pub failures: u64,
    pub last_run: Option<DateTime<Utc>>,
}

// ── TaskRunner ───────────────────────────────────────────────────

/// Everything one invocation needs; shared by the timer loop and `run_now`.
struct TaskRunner {
    name: String,
    func: TaskFn,
    condition: Option<Condition>,
    guarded: bool,
    max_in_flight: Option<Duration>,
    in_flight: Arc<AtomicBool>,
    runs: AtomicU64,
    skipped_busy: AtomicU64,
    skipped_condition: AtomicU64,
    failures: AtomicU64,
    last_run: Mutex<Option<DateTime<Utc>>>,
}

impl TaskRunner {
    async fn run(self: Arc<Self>) -> RunOutcome {
        if let Some(condition) = &self.condition {
            if !condition() {
                self.skipped_condition.fetch_add(1, Ordering::Relaxed);
                debug!(task = %self.name, "condition not met, skipping tick");
                return RunOutcome::SkippedCondition;
            }
        }

        let _guard = if self.guarded {
            let Some(guard) = InFlightGuard::try_acquire(&self.in_flight) else {
                self.skipped_busy.fetch_add(1, Ordering::Relaxed);
                debug!(task = %self.name, "previous run still in flight, skipping tick");
                return RunOutcome::SkippedBusy;
            };
            Some(guard)
        } else {
            None
        };

        self.runs.fetch_add(1, Ordering::Relaxed);
        *lock(&self.last_run) = Some(Utc::now());

        let invocation = AssertUnwindSafe((self.func)()).catch_unwind();
        let result = match self.max_in_flight {
            Some(limit) => match tokio::time::timeout(limit, invocation).await {
                Ok(result) => result,
                Err(_) => {
                    self.failures.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        task = %self.name,
                        limit_ms = limit.as_millis(),
                        "task exceeded max in-flight time, cancelled"
                    );
                    return RunOutcome::TimedOut;
                }
            },
            None => invocation.await,
        };

        match result {
            Ok(Ok(())) => RunOutcome::Completed,
            Ok(Err(e)) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                warn!(task = %self.name, error = %e, "polling task failed");
                RunOutcome::Failed(e.to_string())
            }
            Err(_) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                error!(task = %self.name, "polling task panicked");
                RunOutcome::Failed("task panicked".into())
            }
        }
    }

    fn executing(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }
}

// ── Poller ───────────────────────────────────────────────────────

struct Timer {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Timer {
    fn start(runner: &Arc<TaskRunner>, interval: Duration, immediate: bool) -> Self {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(tick_loop(
            Arc::clone(runner),
            interval,
            immediate,
            cancel.clone(),
        ));
        Self { cancel, handle }
    }

    fn stop(self) {
        self.cancel.cancel();
        drop(self.handle);
    }
}

struct TaskEntry {
    runner: Arc<TaskRunner>,
    interval: Duration,
    enabled: bool,
    timer: Option<Timer>,
}

impl TaskEntry {
    fn status(&self) -> TaskStatus {
        let runner = &self.runner;
        TaskStatus {
            name: runner.name.clone(),
            interval: self.interval,
            enabled: self.enabled,
            timer_active: self.timer.is_some(),
            executing: runner.executing(),
            guarded: runner.guarded,
            runs: runner.runs.load(Ordering::Relaxed),
            skipped_busy: runner.skipped_busy.load(Ordering::Relaxed),
            skipped_condition: runner.skipped_condition.load(Ordering::Relaxed),
            failures: runner.failures.load(Ordering::Relaxed),
            last_run: *lock(&runner.last_run),
        }
    }
}

/// Scheduler for named periodic tasks.
#[derive(Default)]
pub struct Poller {
    tasks: Mutex<HashMap<String, TaskEntry>>,
}

impl Poller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `func` under `name` and start its timer. An existing task
    /// with the same name is torn down first.
    pub fn register<F, Fut>(
        &self,
        name: impl Into<String>,
        func: F,
        interval: Duration,
        opts: TaskOptions,
    ) where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TaskResult> + Send + 'static,
    {
        let name = name.into();
        let interval = clamp_interval(&name, interval);
        let runner = Arc::new(TaskRunner {
            name: name.clone(),
            func: Arc::new(move || func().boxed()),
            condition: opts.condition,
            guarded: opts.guarded,
            max_in_flight: opts.max_in_flight,
            in_flight: Arc::new(AtomicBool::new(false)),
            runs: AtomicU64::new(0),
            skipped_busy: AtomicU64::new(0),
            skipped_condition: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            last_run: Mutex::new(None),
        });

        let mut tasks = self.lock();
        if let Some(previous) = tasks.remove(&name) {
            debug!(task = %name, "replacing existing task");
            if let Some(timer) = previous.timer {
                timer.stop();
            }
        }

        let timer = Timer::start(&runner, interval, opts.run_immediately);
        tasks.insert(
            name.clone(),
            TaskEntry {
                runner,
                interval,
                enabled: true,
                timer: Some(timer),
            },
        );
        info!(task = %name, interval_ms = interval.as_millis(), "task registered");
    }

    /// Stop and forget a task. Returns `false` if it did not exist.
    pub fn unregister(&self, name: &str) -> bool {
        let Some(entry) = self.lock().remove(name) else {
            return false;
        };
        if let Some(timer) = entry.timer {
            timer.stop();
        }
        debug!(task = %name, "task unregistered");
        true
    }

    /// Start the timer of a stopped task. Running tasks are left alone.
    pub fn start(&self, name: &str) -> Result<(), CoreError> {
        let mut tasks = self.lock();
        let entry = tasks.get_mut(name).ok_or_else(|| not_found(name))?;
        if entry.timer.is_none() {
            entry.timer = Some(Timer::start(&entry.runner, entry.interval, false));
            debug!(task = %name, "task started");
        }
        entry.enabled = true;
        Ok(())
    }

    /// Stop a task's timer. Its guard and counters are kept; an invocation
    /// already running is not interrupted.
    pub fn stop(&self, name: &str) -> Result<(), CoreError> {
        let mut tasks = self.lock();
        let entry = tasks.get_mut(name).ok_or_else(|| not_found(name))?;
        if let Some(timer) = entry.timer.take() {
            timer.stop();
            debug!(task = %name, "task stopped");
        }
        entry.enabled = false;
        Ok(())
    }

    pub fn start_all(&self) {
        let mut tasks = self.lock();
        for entry in tasks.values_mut() {
            if entry.timer.is_none() {
                entry.timer = Some(Timer::start(&entry.runner, entry.interval, false));
            }
            entry.enabled = true;
        }
    }

    pub fn stop_all(&self) {
        let mut tasks = self.lock();
        for entry in tasks.values_mut() {
            if let Some(timer) = entry.timer.take() {
                timer.stop();
            }
            entry.enabled = false;
        }
    }

    /// Run a task now, outside its schedule. Condition and guard apply.
    pub async fn run_now(&self, name: &str) -> Result<RunOutcome, CoreError> {
        let runner = self
            .lock()
            .get(name)
            .map(|entry| Arc::clone(&entry.runner))
            .ok_or_else(|| not_found(name))?;
        Ok(runner.run().await)
    }

    /// Change a task's interval. The timer restarts only if it was running;
    /// the function and guard state are kept.
    pub fn update_interval(&self, name: &str, interval: Duration) -> Result<(), CoreError> {
        let interval = clamp_interval(name, interval);
        let mut tasks = self.lock();
        let entry = tasks.get_mut(name).ok_or_else(|| not_found(name))?;
        entry.interval = interval;
        if let Some(timer) = entry.timer.take() {
            timer.stop();
            entry.timer = Some(Timer::start(&entry.runner, interval, false));
        }
        debug!(task = %name, interval_ms = interval.as_millis(), "task interval updated");
        Ok(())
    }

    /// Every task's status, sorted by name.
    pub fn status(&self) -> Vec<TaskStatus> {
        let mut status: Vec<TaskStatus> = self.lock().values().map(TaskEntry::status).collect();
        status.sort_by(|a, b| a.name.cmp(&b.name));
        status
    }

    pub fn task_status(&self, name: &str) -> Option<TaskStatus> {
        self.lock().get(name).map(TaskEntry::status)
    }

    pub fn task_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Stop every timer. Tasks stay registered.
    pub fn shutdown(&self) {
        self.stop_all();
        info!("poller shut down");
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, TaskEntry>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        for entry in self.lock().values() {
            if let Some(timer) = &entry.timer {
                timer.cancel.cancel();
            }
        }
    }
}

impl std::fmt::Debug for Poller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Poller")
            .field("tasks", &self.task_names())
            .finish()
    }
}

// ── Background timer loop ────────────────────────────────────────

async fn tick_loop(
    runner: Arc<TaskRunner>,
    period: Duration,
    immediate: bool,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    if !immediate {
        interval.tick().await; // consume the immediate first tick
    }

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                tokio::spawn(Arc::clone(&runner).run());
            }
        }
    }
}

fn clamp_interval(name: &str, interval: Duration) -> Duration {
    if interval < MIN_INTERVAL {
        warn!(task = %name, "interval below minimum, clamping");
        MIN_INTERVAL
    } else {
        interval
    }
}

fn not_found(name: &str) -> CoreError {
    CoreError::TaskNotFound {
        name: name.to_owned(),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
