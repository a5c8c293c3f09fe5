use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// State of the run a tracker is currently following
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionState {
    /// Seconds since epoch when the run began
    pub start_time: f64,

    /// Run identifier shared by every event of the run
    pub prompt_id: String,

    /// Node presently executing
    pub current_node: Option<String>,

    /// Node id -> node type label
    pub node_names: BTreeMap<String, String>,

    /// Derived from `node_names`, zero until the graph is known
    pub total_nodes: usize,

    /// Nodes that have begun executing
    pub executed_nodes: BTreeSet<String>,

    /// Nodes skipped because a previous result was reused
    pub cached_nodes: BTreeSet<String>,

    /// Step progress inside the current node
    pub progress: Option<SubProgress>,
}

/// Fine-grained progress within the executing node (sampler steps etc.)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SubProgress {
    pub value: f64,
    pub max: f64,
    pub percent: f64,
}

impl SubProgress {
    /// Build from a backend report.
    ///
    /// `value` is clamped into `0..=max`, or only floored at zero when no
    /// usable `max` was reported. A directly reported percent wins over the
    /// derived one; without either the percent is zero.
    pub fn from_report(value: Option<f64>, max: Option<f64>, percent: Option<f64>) -> Self {
        let max = max.filter(|m| m.is_finite() && *m > 0.0).unwrap_or(0.0);
        let value = value.filter(|v| v.is_finite()).unwrap_or(0.0).max(0.0);
        let value = if max > 0.0 { value.min(max) } else { value };

        let percent = match percent.filter(|p| p.is_finite()) {
            Some(p) => p,
            None if max > 0.0 => (value / max * 100.0).round(),
            None => 0.0,
        };

        Self { value, max, percent }
    }
}

impl ExecutionState {
    /// Create state for a run that has just been announced
    pub fn new(prompt_id: &str, start_time: f64) -> Self {
        Self {
            start_time,
            prompt_id: prompt_id.to_string(),
            current_node: None,
            node_names: BTreeMap::new(),
            total_nodes: 0,
            executed_nodes: BTreeSet::new(),
            cached_nodes: BTreeSet::new(),
            progress: None,
        }
    }

    /// Record node labels. Existing keys are overwritten, never removed.
    pub fn record_node_names<I>(&mut self, names: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.node_names.extend(names);
        self.total_nodes = self.node_names.len();
    }

    /// Mark `node` as the executing node. Sub-progress starts over.
    pub fn enter_node(&mut self, node: &str, class_type: Option<&str>) {
        self.current_node = Some(node.to_string());
        self.executed_nodes.insert(node.to_string());
        if let Some(class_type) = class_type {
            self.record_node_names([(node.to_string(), class_type.to_string())]);
        }
        self.progress = None;
    }

    pub fn mark_cached<I>(&mut self, nodes: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.cached_nodes.extend(nodes);
    }

    /// Number of nodes that were executed or served from cache
    pub fn completed_count(&self) -> usize {
        self.executed_nodes.len() + self.cached_nodes.len()
    }

    /// Human-readable name of the executing node, falling back to its id
    pub fn current_label(&self) -> &str {
        match &self.current_node {
            Some(node) => self.node_names.get(node).map(String::as_str).unwrap_or(node),
            None => "",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sub_progress_derives_percent() {
        let progress = SubProgress::from_report(Some(5.0), Some(10.0), None);
        assert_eq!(progress.percent, 50.0);

        let progress = SubProgress::from_report(Some(1.0), Some(3.0), None);
        assert_eq!(progress.percent, 33.0);
    }

    #[test]
    fn test_sub_progress_prefers_reported_percent() {
        let progress = SubProgress::from_report(Some(5.0), Some(10.0), Some(42.0));
        assert_eq!(progress.percent, 42.0);

        let progress = SubProgress::from_report(None, None, Some(70.0));
        assert_eq!(progress.percent, 70.0);
        assert_eq!(progress.value, 0.0);
    }

    #[test]
    fn test_sub_progress_clamps_value() {
        let progress = SubProgress::from_report(Some(14.0), Some(10.0), None);
        assert_eq!(progress.value, 10.0);
        assert_eq!(progress.percent, 100.0);

        let progress = SubProgress::from_report(Some(-3.0), Some(10.0), None);
        assert_eq!(progress.value, 0.0);

    }

    #[test]
    fn test_sub_progress_keeps_value_without_max() {
        let progress = SubProgress::from_report(Some(5.0), None, None);
        assert_eq!(progress.value, 5.0);
        assert_eq!(progress.max, 0.0);
        assert_eq!(progress.percent, 0.0);

        let progress = SubProgress::from_report(Some(3.0), Some(0.0), Some(25.0));
        assert_eq!(progress.value, 3.0);
        assert_eq!(progress.percent, 25.0);

        let progress = SubProgress::from_report(Some(-2.0), None, None);
        assert_eq!(progress.value, 0.0);
    }

    #[test]
    fn test_enter_node_records_label_and_clears_progress() {
        let mut state = ExecutionState::new("p1", 0.0);
        state.progress = Some(SubProgress::from_report(Some(1.0), Some(2.0), None));

        state.enter_node("3", Some("KSampler"));

        assert_eq!(state.current_node.as_deref(), Some("3"));
        assert_eq!(state.node_names.get("3").map(String::as_str), Some("KSampler"));
        assert_eq!(state.total_nodes, 1);
        assert!(state.executed_nodes.contains("3"));
        assert!(state.progress.is_none());
        assert_eq!(state.current_label(), "KSampler");
    }

    #[test]
    fn test_current_label_falls_back_to_id() {
        let mut state = ExecutionState::new("p1", 0.0);
        assert_eq!(state.current_label(), "");

        state.enter_node("9", None);
        assert_eq!(state.current_label(), "9");
    }
}
