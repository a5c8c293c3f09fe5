//! Queue status client used for node-name recovery

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use deck_execution_tracker::{QueueSource, TrackerError};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::error::Result;

/// Queue listing as served by the generation backend.
///
/// Entries are positional arrays: `[number, prompt_id, prompt_graph, extra, outputs]`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueueSnapshot {
    #[serde(default)]
    pub queue_running: Vec<Value>,

    #[serde(default)]
    pub queue_pending: Vec<Value>,
}

impl QueueSnapshot {
    /// Node id -> class type of the queued run `prompt_id`, running entries first
    pub fn node_names_for(&self, prompt_id: &str) -> Option<BTreeMap<String, String>> {
        self.queue_running
            .iter()
            .chain(&self.queue_pending)
            .find(|entry| entry.get(1).and_then(Value::as_str) == Some(prompt_id))
            .and_then(|entry| entry.get(2))
            .and_then(Value::as_object)
            .map(|graph| {
                graph
                    .iter()
                    .filter_map(|(id, node)| {
                        let class_type = node.get("class_type")?.as_str()?;
                        Some((id.clone(), class_type.to_string()))
                    })
                    .collect()
            })
    }
}

pub struct HttpQueueSource {
    client: reqwest::Client,
    url: String,
}

impl HttpQueueSource {
    pub fn new(base_url: &str, queue_path: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: format!(
                "{}/{}",
                base_url.trim_end_matches('/'),
                queue_path.trim_start_matches('/')
            ),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn fetch(&self) -> Result<QueueSnapshot> {
        let response = self.client.get(&self.url).send().await?;
        let snapshot = response.error_for_status()?.json::<QueueSnapshot>().await?;
        Ok(snapshot)
    }
}

#[async_trait]
impl QueueSource for HttpQueueSource {
    async fn node_names(
        &self,
        prompt_id: &str,
    ) -> deck_execution_tracker::Result<Option<BTreeMap<String, String>>> {
        let snapshot = self
            .fetch()
            .await
            .map_err(|e| TrackerError::QueueRequest(e.to_string()))?;

        let names = snapshot.node_names_for(prompt_id);
        debug!(
            %prompt_id,
            found = names.is_some(),
            running = snapshot.queue_running.len(),
            pending = snapshot.queue_pending.len(),
            "Queried queue for node names"
        );
        Ok(names)
    }
}
