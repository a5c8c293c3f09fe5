use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Registry, TextEncoder};

use crate::error::Result;
use crate::execution_tracker::FinishKind;

/// Run counters for one tracker
///
/// Every tracker owns its registry, so two views never double-register.
#[derive(Clone)]
pub struct TrackerMetrics {
    /// Runs announced by run-start or run-snapshot
    runs_started: IntCounter,

    /// Runs currently followed (0 or 1 per tracker)
    active_runs: IntGauge,

    runs_succeeded: IntCounter,

    runs_failed: IntCounter,

    runs_interrupted: IntCounter,

    /// Elapsed seconds reported by run-done
    run_duration: Histogram,

    registry: Registry,
}

impl TrackerMetrics {
    /// Create new metrics collector
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let runs_started = IntCounter::new(
            "deck_runs_started_total",
            "Total number of generation runs observed starting",
        )?;
        registry.register(Box::new(runs_started.clone()))?;

        let active_runs = IntGauge::new(
            "deck_active_runs",
            "Number of generation runs currently tracked",
        )?;
        registry.register(Box::new(active_runs.clone()))?;

        let runs_succeeded = IntCounter::new(
            "deck_runs_succeeded_total",
            "Total number of runs that finished successfully",
        )?;
        registry.register(Box::new(runs_succeeded.clone()))?;

        let runs_failed = IntCounter::new(
            "deck_runs_failed_total",
            "Total number of runs that reported an error",
        )?;
        registry.register(Box::new(runs_failed.clone()))?;

        let runs_interrupted = IntCounter::new(
            "deck_runs_interrupted_total",
            "Total number of runs that were interrupted",
        )?;
        registry.register(Box::new(runs_interrupted.clone()))?;

        let run_duration = Histogram::with_opts(
            HistogramOpts::new("deck_run_duration_seconds", "Run duration in seconds")
                .buckets(vec![1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0]),
        )?;
        registry.register(Box::new(run_duration.clone()))?;

        Ok(Self {
            runs_started,
            active_runs,
            runs_succeeded,
            runs_failed,
            runs_interrupted,
            run_duration,
            registry,
        })
    }

    /// `replaced` is true when the new run displaced one still in flight
    pub fn run_started(&self, replaced: bool) {
        self.runs_started.inc();
        if !replaced {
            self.active_runs.inc();
        }
    }

    /// `was_active` is false for duplicate terminal events
    pub fn run_finished(&self, kind: FinishKind, elapsed: Option<f64>, was_active: bool) {
        if !was_active {
            return;
        }
        match kind {
            FinishKind::Done => {
                self.runs_succeeded.inc();
                if let Some(elapsed) = elapsed {
                    self.run_duration.observe(elapsed);
                }
            }
            FinishKind::Error => self.runs_failed.inc(),
            FinishKind::Interrupted => self.runs_interrupted.inc(),
        }
        self.active_runs.dec();
    }

    /// Teardown while a run was still tracked
    pub fn run_abandoned(&self) {
        self.active_runs.dec();
    }

    pub fn active_runs(&self) -> i64 {
        self.active_runs.get()
    }

    pub fn runs_started(&self) -> u64 {
        self.runs_started.get()
    }

    /// Prometheus text exposition
    pub fn gather_text(&self) -> String {
        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!(error = %e, "Failed to encode tracker metrics");
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }

    /// Get metrics as JSON (name, help, current sample count)
    pub fn to_json(&self) -> serde_json::Value {
        let metrics: Vec<_> = self
            .registry
            .gather()
            .iter()
            .map(|family| {
                serde_json::json!({
                    "name": family.get_name(),
                    "help": family.get_help(),
                    "metric_count": family.get_metric().len(),
                })
            })
            .collect();

        serde_json::json!({ "metrics": metrics })
    }
}
