use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

use crate::error::Result;
use crate::events::{
    EventKind, NodeExecutingPayload, NodesCachedPayload, ProgressPayload, RunStartPayload,
    TrackerEvent,
};
use crate::execution_state::{ExecutionState, SubProgress};
use crate::metrics::TrackerMetrics;
use crate::telemetry::RunTelemetry;

/// Cadence of the elapsed-time ticker
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Callback fired whenever presentational state may have changed
pub type UpdateCallback = Arc<dyn Fn() + Send + Sync>;

/// Read-only view of the backend queue, used to recover node names
/// when a run announcement carries no graph
#[async_trait]
pub trait QueueSource: Send + Sync {
    /// Node id -> class type for the queued run `prompt_id`, if it is queued
    async fn node_names(&self, prompt_id: &str) -> Result<Option<BTreeMap<String, String>>>;
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FinishKind {
    Done,
    Error,
    Interrupted,
}

impl FinishKind {
    /// Wire name of the terminal event
    pub fn as_str(&self) -> &'static str {
        match self {
            FinishKind::Done => EventKind::RunDone.as_str(),
            FinishKind::Error => EventKind::RunError.as_str(),
            FinishKind::Interrupted => EventKind::RunInterrupted.as_str(),
        }
    }
}

impl fmt::Display for FinishKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A terminal event, handed back so the caller can run post-run actions
#[derive(Debug, Clone, PartialEq)]
pub struct RunFinished {
    pub kind: FinishKind,

    /// Terminal payload exactly as received
    pub data: Value,
}

impl RunFinished {
    /// Seconds reported by `run-done`
    pub fn elapsed(&self) -> Option<f64> {
        self.data.get("elapsed").and_then(Value::as_f64)
    }

    /// Backend error message reported by `run-error`
    pub fn exception_message(&self) -> Option<&str> {
        self.data.get("exception_message").and_then(Value::as_str)
    }

    /// Type of the node that failed
    pub fn node_type(&self) -> Option<&str> {
        self.data.get("node_type").and_then(Value::as_str)
    }
}

/// Result of feeding one event to a tracker
#[derive(Debug, Clone, PartialEq)]
pub enum HandleOutcome {
    /// Lifecycle or progress event; subscribers were notified
    Updated,

    /// Terminal event; state is cleared
    Finished(RunFinished),

    /// Not an event this tracker knows
    Ignored,
}

impl HandleOutcome {
    pub fn is_handled(&self) -> bool {
        !matches!(self, HandleOutcome::Ignored)
    }

    pub fn finished(&self) -> Option<&RunFinished> {
        match self {
            HandleOutcome::Finished(finished) => Some(finished),
            _ => None,
        }
    }
}

/// State shared with the ticker and node-name recovery tasks
struct Shared {
    state: Mutex<Option<ExecutionState>>,
    on_update: UpdateCallback,
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, Option<ExecutionState>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self) {
        (self.on_update)();
    }

    /// Record fetched node names if `prompt_id` is still the tracked run.
    /// Does not notify.
    fn apply_recovered(&self, prompt_id: &str, names: BTreeMap<String, String>) -> bool {
        let mut guard = self.lock_state();
        match guard.as_mut() {
            Some(state) if state.prompt_id == prompt_id => {
                state.record_node_names(names);
                true
            }
            _ => false,
        }
    }
}

/// Folds the backend event stream into the single run a view displays
///
/// Mutation happens synchronously in [`handle_event`](Self::handle_event).
/// The subscriber is never called while the state lock is held, so it may
/// read [`state`](Self::state) from inside the callback.
pub struct ExecutionTracker {
    shared: Arc<Shared>,

    /// Elapsed-time ticker, armed while a run is tracked
    ticker: Mutex<Option<JoinHandle<()>>>,

    /// In-flight node-name recovery
    recovery: Mutex<Option<JoinHandle<()>>>,

    destroyed: AtomicBool,

    queue: Option<Arc<dyn QueueSource>>,

    metrics: Option<TrackerMetrics>,

    telemetry: RunTelemetry,
}

impl ExecutionTracker {
    /// Create a tracker with no queue source and no metrics
    pub fn new<F>(on_update: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self::builder(on_update).build()
    }

    pub fn builder<F>(on_update: F) -> ExecutionTrackerBuilder
    where
        F: Fn() + Send + Sync + 'static,
    {
        ExecutionTrackerBuilder {
            on_update: Arc::new(on_update),
            name: "tracker".to_string(),
            queue: None,
            metrics: None,
        }
    }

    /// Consumer name used in logs
    pub fn name(&self) -> &str {
        self.telemetry.consumer()
    }

    /// Snapshot of the current run
    pub fn state(&self) -> Option<ExecutionState> {
        self.shared.lock_state().clone()
    }

    pub fn is_active(&self) -> bool {
        self.shared.lock_state().is_some()
    }

    /// Whether the elapsed-time ticker is running
    pub fn is_ticking(&self) -> bool {
        lock(&self.ticker)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn metrics(&self) -> Option<&TrackerMetrics> {
        self.metrics.as_ref()
    }

    /// Apply one event
    pub fn handle_event(&self, event: &TrackerEvent) -> HandleOutcome {
        let Some(kind) = EventKind::parse(&event.kind) else {
            debug!(tracker = %self.name(), kind = %event.kind, "Ignoring unknown event");
            return HandleOutcome::Ignored;
        };

        if self.destroyed.load(Ordering::SeqCst) {
            debug!(tracker = %self.name(), %kind, "Tracker destroyed, dropping event");
            return HandleOutcome::Ignored;
        }

        match kind {
            EventKind::RunStart => self.begin_run(event, false),
            EventKind::RunSnapshot => self.begin_run(event, true),
            EventKind::Progress => {
                let payload: ProgressPayload = event.payload();
                self.update_active(|state| {
                    state.progress = Some(SubProgress::from_report(
                        payload.value,
                        payload.max,
                        payload.percent,
                    ));
                })
            }
            EventKind::NodeExecuting => {
                let payload: NodeExecutingPayload = event.payload();
                match payload.node {
                    Some(node) => self.update_active(|state| {
                        state.enter_node(&node, payload.class_type.as_deref());
                    }),
                    None => {
                        debug!(tracker = %self.name(), "node-executing without node id");
                        self.shared.notify();
                        HandleOutcome::Updated
                    }
                }
            }
            EventKind::NodesCached => {
                let payload: NodesCachedPayload = event.payload();
                self.update_active(|state| state.mark_cached(payload.nodes))
            }
            EventKind::RunDone => self.finish_run(FinishKind::Done, event),
            EventKind::RunError => self.finish_run(FinishKind::Error, event),
            EventKind::RunInterrupted => self.finish_run(FinishKind::Interrupted, event),
        }
    }

    /// Stop ticking, cancel recovery and forget the run. Safe to call repeatedly.
    pub fn destroy(&self) {
        let first = !self.destroyed.swap(true, Ordering::SeqCst);
        self.disarm_ticker();
        self.cancel_recovery();

        let previous = self.shared.lock_state().take();
        if previous.is_some() {
            if let Some(metrics) = &self.metrics {
                metrics.run_abandoned();
            }
        }
        if first {
            debug!(tracker = %self.name(), "Tracker destroyed");
        }
    }

    fn begin_run(&self, event: &TrackerEvent, snapshot: bool) -> HandleOutcome {
        let payload: RunStartPayload = event.payload();
        let prompt_id = payload.prompt_id.unwrap_or_default();
        let start_time = payload.start_time.unwrap_or_else(now_seconds);

        let mut state = ExecutionState::new(&prompt_id, start_time);
        if let Some(names) = payload.node_names {
            state.record_node_names(names);
        }
        if snapshot {
            state.current_node = payload.current_node;
            state.executed_nodes.extend(payload.executed_nodes);
            state.mark_cached(payload.cached_nodes);
        }
        let needs_names = state.node_names.is_empty();

        self.telemetry.run_attached(&state, snapshot);
        let replaced = self.shared.lock_state().replace(state).is_some();
        if let Some(metrics) = &self.metrics {
            metrics.run_started(replaced);
        }

        self.cancel_recovery();
        if needs_names {
            self.schedule_node_name_recovery(&prompt_id);
        }
        self.arm_ticker();

        self.shared.notify();
        HandleOutcome::Updated
    }

    fn finish_run(&self, kind: FinishKind, event: &TrackerEvent) -> HandleOutcome {
        let previous = self.shared.lock_state().take();
        self.disarm_ticker();
        self.cancel_recovery();

        let finished = RunFinished {
            kind,
            data: event.data.clone(),
        };

        if let Some(metrics) = &self.metrics {
            metrics.run_finished(kind, finished.elapsed(), previous.is_some());
        }
        match &previous {
            Some(state) => self
                .telemetry
                .run_finished(Some(state.prompt_id.as_str()), &finished),
            None => debug!(tracker = %self.name(), %kind, "Terminal event with no run tracked"),
        }

        self.shared.notify();
        HandleOutcome::Finished(finished)
    }

    /// Mutate the active run, if any, then notify
    fn update_active<F>(&self, mutate: F) -> HandleOutcome
    where
        F: FnOnce(&mut ExecutionState),
    {
        {
            let mut guard = self.shared.lock_state();
            match guard.as_mut() {
                Some(state) => mutate(state),
                None => debug!(tracker = %self.name(), "Event arrived with no run tracked"),
            }
        }
        self.shared.notify();
        HandleOutcome::Updated
    }

    /// Best-effort fetch of node names; applied only if the run is still current
    fn schedule_node_name_recovery(&self, prompt_id: &str) {
        let Some(queue) = self.queue.clone() else {
            return;
        };
        if prompt_id.is_empty() {
            return;
        }
        let Ok(runtime) = Handle::try_current() else {
            debug!(tracker = %self.name(), "No runtime, skipping node name recovery");
            return;
        };

        let shared = Arc::clone(&self.shared);
        let prompt_id = prompt_id.to_string();
        let tracker = self.name().to_string();

        let task = runtime.spawn(async move {
            match queue.node_names(&prompt_id).await {
                Ok(Some(names)) if !names.is_empty() => {
                    if shared.apply_recovered(&prompt_id, names) {
                        debug!(%tracker, %prompt_id, "Recovered node names from queue");
                        shared.notify();
                    } else {
                        debug!(%tracker, %prompt_id, "Discarding node names for a stale run");
                    }
                }
                Ok(_) => debug!(%tracker, %prompt_id, "Run not found in queue"),
                Err(e) => debug!(%tracker, %prompt_id, error = %e, "Node name recovery failed"),
            }
        });

        if let Some(previous) = lock(&self.recovery).replace(task) {
            previous.abort();
        }
    }

    fn cancel_recovery(&self) {
        if let Some(task) = lock(&self.recovery).take() {
            task.abort();
        }
    }

    fn arm_ticker(&self) {
        let Ok(runtime) = Handle::try_current() else {
            debug!(tracker = %self.name(), "No runtime, elapsed-time ticker disabled");
            return;
        };

        // Weak so a dropped tracker never keeps its ticker alive
        let shared = Arc::downgrade(&self.shared);
        let task = runtime.spawn(async move {
            let mut tick = tokio::time::interval_at(Instant::now() + TICK_INTERVAL, TICK_INTERVAL);
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tick.tick().await;
                let Some(shared) = shared.upgrade() else {
                    break;
                };
                shared.notify();
            }
        });

        if let Some(previous) = lock(&self.ticker).replace(task) {
            previous.abort();
        }
    }

    fn disarm_ticker(&self) {
        if let Some(task) = lock(&self.ticker).take() {
            task.abort();
        }
    }
}

impl Drop for ExecutionTracker {
    fn drop(&mut self) {
        self.disarm_ticker();
        self.cancel_recovery();
    }
}

/// Builder for [`ExecutionTracker`]
pub struct ExecutionTrackerBuilder {
    on_update: UpdateCallback,
    name: String,
    queue: Option<Arc<dyn QueueSource>>,
    metrics: Option<TrackerMetrics>,
}

impl ExecutionTrackerBuilder {
    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn queue_source(mut self, queue: Arc<dyn QueueSource>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn metrics(mut self, metrics: TrackerMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> ExecutionTracker {
        ExecutionTracker {
            shared: Arc::new(Shared {
                state: Mutex::new(None),
                on_update: self.on_update,
            }),
            ticker: Mutex::new(None),
            recovery: Mutex::new(None),
            destroyed: AtomicBool::new(false),
            queue: self.queue,
            metrics: self.metrics,
            telemetry: RunTelemetry::new(&self.name),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Wall clock in seconds since epoch
pub fn now_seconds() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}
