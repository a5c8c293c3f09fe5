use tracing::{info, instrument};

use crate::execution_state::ExecutionState;
use crate::execution_tracker::RunFinished;

/// Run lifecycle logging for one consumer view
pub struct RunTelemetry {
    /// Consumer name, e.g. "activity-feed"
    consumer: String,
}

impl RunTelemetry {
    pub fn new(consumer: &str) -> Self {
        Self {
            consumer: consumer.to_string(),
        }
    }

    pub fn consumer(&self) -> &str {
        &self.consumer
    }

    #[instrument(skip(self, state), fields(
        prompt_id = %state.prompt_id,
        total_nodes = state.total_nodes,
        consumer = %self.consumer
    ))]
    pub fn run_attached(&self, state: &ExecutionState, snapshot: bool) {
        if snapshot {
            info!(
                executed = state.executed_nodes.len(),
                cached = state.cached_nodes.len(),
                "Attached to run from snapshot"
            );
        } else {
            info!("Run started");
        }
    }

    #[instrument(skip(self, prompt_id, finished), fields(
        prompt_id = prompt_id.unwrap_or("-"),
        kind = %finished.kind,
        consumer = %self.consumer
    ))]
    pub fn run_finished(&self, prompt_id: Option<&str>, finished: &RunFinished) {
        match finished.exception_message() {
            Some(message) => info!(
                error = message,
                node_type = ?finished.node_type(),
                "Run failed"
            ),
            None => info!(elapsed = ?finished.elapsed(), "Run finished"),
        }
    }
}
