//! Deck Execution Tracker - current-run state for generation backends
//!
//! Folds the backend's server-pushed event stream into one run record per
//! consumer view:
//! - Tolerates a missed run start (snapshot events) and duplicate terminals
//! - Recovers node names from the queue when the announcement omits them
//! - Ticks once a second so elapsed time keeps moving between events
//! - Renders progress as a pure function of the tracked state

pub mod error;
pub mod events;
pub mod execution_state;
pub mod execution_tracker;
pub mod metrics;
pub mod progress;
pub mod telemetry;

pub use error::{Result, TrackerError};
pub use events::{EventKind, TrackerEvent};
pub use execution_state::{ExecutionState, SubProgress};
pub use execution_tracker::{
    ExecutionTracker, ExecutionTrackerBuilder, FinishKind, HandleOutcome, QueueSource,
    RunFinished, UpdateCallback,
};
pub use metrics::TrackerMetrics;
pub use progress::{render, render_now, ProgressFragment, ProgressView};
pub use telemetry::RunTelemetry;
