//! Progress rendering
//!
//! Pure functions from a tracker snapshot to what a view shows. Cheap enough
//! to run on every update and every tick; nothing is cached between calls.

use std::fmt;

use crate::execution_state::ExecutionState;
use crate::execution_tracker::now_seconds;

const BAR_WIDTH: usize = 20;

/// What a view displays for the current run
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressView {
    /// Overall fill, 0..=100
    pub fill_percent: u32,

    /// Friendly name of the executing node
    pub label: String,

    pub elapsed_secs: u64,

    /// `Ns` or `Mm Ss`
    pub elapsed: String,

    /// `value/max (percent%)` for the current node, or empty
    pub detail: String,

    pub completed: usize,
    pub total: usize,
}

/// Render output; empty when no run is tracked
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressFragment {
    view: Option<ProgressView>,
}

impl ProgressFragment {
    pub fn is_empty(&self) -> bool {
        self.view.is_none()
    }

    pub fn view(&self) -> Option<&ProgressView> {
        self.view.as_ref()
    }
}

/// Render `state` as of `now` (seconds since epoch)
pub fn render(state: Option<&ExecutionState>, now: f64) -> ProgressFragment {
    let Some(state) = state else {
        return ProgressFragment::default();
    };

    let elapsed_secs = (now - state.start_time).round().max(0.0) as u64;
    let completed = state.completed_count();

    ProgressFragment {
        view: Some(ProgressView {
            fill_percent: fill_percent(state),
            label: state.current_label().to_string(),
            elapsed_secs,
            elapsed: format_elapsed(elapsed_secs),
            detail: state
                .progress
                .map(|p| format!("{}/{} ({}%)", p.value, p.max, p.percent))
                .unwrap_or_default(),
            completed,
            total: state.total_nodes,
        }),
    }
}

/// Render against the wall clock
pub fn render_now(state: Option<&ExecutionState>) -> ProgressFragment {
    render(state, now_seconds())
}

/// Overall bar fill.
///
/// The executing node is already in `executed_nodes`, so it is left out of
/// the base share and contributes only its sub-progress. Halves round away
/// from zero.
pub fn fill_percent(state: &ExecutionState) -> u32 {
    let sub_percent = state.progress.map(|p| p.percent);

    let fill = if state.total_nodes > 0 {
        let total = state.total_nodes as f64;
        let base = state.completed_count().saturating_sub(1) as f64 / total;
        let current = sub_percent.map(|p| p / 100.0 / total).unwrap_or(0.0);
        ((base + current) * 100.0).round()
    } else {
        sub_percent.unwrap_or(0.0).round()
    };

    fill.clamp(0.0, 100.0) as u32
}

pub fn format_elapsed(secs: u64) -> String {
    if secs < 60 {
        format!("{}s", secs)
    } else {
        format!("{}m {}s", secs / 60, secs % 60)
    }
}

impl fmt::Display for ProgressFragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(view) = &self.view else {
            return Ok(());
        };

        let filled = (view.fill_percent as usize * BAR_WIDTH) / 100;
        write!(
            f,
            "[{}{}] {:>3}%",
            "#".repeat(filled),
            "-".repeat(BAR_WIDTH - filled),
            view.fill_percent
        )?;
        if !view.label.is_empty() {
            write!(f, " {}", view.label)?;
        }
        if !view.detail.is_empty() {
            write!(f, " {}", view.detail)?;
        }
        write!(f, " | {}", view.elapsed)
    }
}
