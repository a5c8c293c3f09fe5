//! Backend events consumed by the tracker
//!
//! The channel delivers raw `{type, data}` pairs. Payloads are decoded
//! leniently: a malformed or missing field degrades to its default instead of
//! failing the whole event.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// A raw event as delivered by the event channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerEvent {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default)]
    pub data: Value,
}

impl TrackerEvent {
    pub fn new(kind: &str, data: Value) -> Self {
        Self {
            kind: kind.to_string(),
            data,
        }
    }

    /// Decode the payload into `T`, falling back to `T::default()`
    pub fn payload<T: DeserializeOwned + Default>(&self) -> T {
        serde_json::from_value(self.data.clone()).unwrap_or_default()
    }
}

/// Event types the tracker understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    RunStart,
    RunSnapshot,
    Progress,
    NodeExecuting,
    NodesCached,
    RunDone,
    RunError,
    RunInterrupted,
}

impl EventKind {
    pub fn parse(kind: &str) -> Option<Self> {
        match kind {
            "run-start" => Some(EventKind::RunStart),
            "run-snapshot" => Some(EventKind::RunSnapshot),
            "progress" => Some(EventKind::Progress),
            "node-executing" => Some(EventKind::NodeExecuting),
            "nodes-cached" => Some(EventKind::NodesCached),
            "run-done" => Some(EventKind::RunDone),
            "run-error" => Some(EventKind::RunError),
            "run-interrupted" => Some(EventKind::RunInterrupted),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::RunStart => "run-start",
            EventKind::RunSnapshot => "run-snapshot",
            EventKind::Progress => "progress",
            EventKind::NodeExecuting => "node-executing",
            EventKind::NodesCached => "nodes-cached",
            EventKind::RunDone => "run-done",
            EventKind::RunError => "run-error",
            EventKind::RunInterrupted => "run-interrupted",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of `run-start` and `run-snapshot`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunStartPayload {
    #[serde(default, deserialize_with = "lenient")]
    pub start_time: Option<f64>,

    #[serde(default, deserialize_with = "lenient_id")]
    pub prompt_id: Option<String>,

    #[serde(default, deserialize_with = "lenient")]
    pub node_names: Option<BTreeMap<String, String>>,

    #[serde(default, deserialize_with = "lenient_id")]
    pub current_node: Option<String>,

    #[serde(default, deserialize_with = "lenient_ids")]
    pub executed_nodes: Vec<String>,

    #[serde(default, deserialize_with = "lenient_ids")]
    pub cached_nodes: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProgressPayload {
    #[serde(default, deserialize_with = "lenient")]
    pub value: Option<f64>,

    #[serde(default, deserialize_with = "lenient")]
    pub max: Option<f64>,

    #[serde(default, deserialize_with = "lenient")]
    pub percent: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeExecutingPayload {
    #[serde(default, deserialize_with = "lenient_id")]
    pub node: Option<String>,

    #[serde(default, deserialize_with = "lenient")]
    pub class_type: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodesCachedPayload {
    #[serde(default, deserialize_with = "lenient_ids")]
    pub nodes: Vec<String>,
}

/// Decode a field, treating any type mismatch as absent.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

fn lenient_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(id_from_value(&Value::deserialize(deserializer)?))
}

fn lenient_ids<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let ids = match Value::deserialize(deserializer)? {
        Value::Array(items) => items.iter().filter_map(id_from_value).collect(),
        _ => Vec::new(),
    };
    Ok(ids)
}

/// Node ids arrive as strings, but some backends send bare numbers
fn id_from_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
