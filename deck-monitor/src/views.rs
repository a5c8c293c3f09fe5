//! Consumer views
//!
//! Each view owns its own tracker; nothing is shared between them.

use std::fmt;
use std::io::Write;
use std::sync::Arc;

use deck_event_channel::EventSink;
use deck_execution_tracker::{
    progress, ExecutionTracker, FinishKind, QueueSource, RunFinished, TrackerEvent,
    TrackerMetrics,
};
use tokio::sync::{mpsc, Notify};
use tracing::debug;

/// User-facing notice for a finished run
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Succeeded { elapsed: Option<f64> },
    Failed { message: String, node_type: Option<String> },
    Interrupted,
}

impl Notification {
    pub fn from_finished(finished: &RunFinished) -> Self {
        match finished.kind {
            FinishKind::Done => Notification::Succeeded {
                elapsed: finished.elapsed(),
            },
            FinishKind::Error => Notification::Failed {
                message: finished
                    .exception_message()
                    .unwrap_or("unknown error")
                    .to_string(),
                node_type: finished.node_type().map(str::to_string),
            },
            FinishKind::Interrupted => Notification::Interrupted,
        }
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notification::Succeeded { elapsed: Some(secs) } => write!(
                f,
                "Run finished in {}",
                progress::format_elapsed(secs.round().max(0.0) as u64)
            ),
            Notification::Succeeded { elapsed: None } => write!(f, "Run finished"),
            Notification::Failed {
                message,
                node_type: Some(node_type),
            } => write!(f, "Run failed in {}: {}", node_type, message),
            Notification::Failed { message, .. } => write!(f, "Run failed: {}", message),
            Notification::Interrupted => write!(f, "Run interrupted"),
        }
    }
}

/// Activity feed: counts active runs and announces finished ones
pub struct ActivityFeed {
    tracker: ExecutionTracker,
    notifications: mpsc::UnboundedSender<Notification>,
}

impl ActivityFeed {
    pub fn new(
        queue: Option<Arc<dyn QueueSource>>,
        metrics: TrackerMetrics,
    ) -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();

        // the feed only reacts to events, the ticker has nothing to redraw
        let mut builder = ExecutionTracker::builder(|| {})
            .name("activity-feed")
            .metrics(metrics);
        if let Some(queue) = queue {
            builder = builder.queue_source(queue);
        }

        let feed = Self {
            tracker: builder.build(),
            notifications: tx,
        };
        (feed, rx)
    }

    pub fn active_jobs(&self) -> i64 {
        self.tracker.metrics().map(|m| m.active_runs()).unwrap_or(0)
    }

    pub fn tracker(&self) -> &ExecutionTracker {
        &self.tracker
    }

    /// Prometheus text dump of the feed's run counters
    pub fn metrics_report(&self) -> Option<String> {
        self.tracker.metrics().map(TrackerMetrics::gather_text)
    }

    pub fn destroy(&self) {
        self.tracker.destroy();
    }
}

impl EventSink for ActivityFeed {
    fn on_event(&self, event: &TrackerEvent) {
        let outcome = self.tracker.handle_event(event);
        if let Some(finished) = outcome.finished() {
            let notification = Notification::from_finished(finished);
            debug!(%notification, active = self.active_jobs(), "Run finished");
            let _ = self.notifications.send(notification);
        }
    }
}

/// Execution bar: redraws the progress line on every tracker update
pub struct ExecutionBar {
    tracker: Arc<ExecutionTracker>,
    changed: Arc<Notify>,
}

impl ExecutionBar {
    pub fn new(queue: Option<Arc<dyn QueueSource>>) -> Self {
        let changed = Arc::new(Notify::new());
        let signal = Arc::clone(&changed);

        let mut builder = ExecutionTracker::builder(move || signal.notify_one()).name("execution-bar");
        if let Some(queue) = queue {
            builder = builder.queue_source(queue);
        }

        Self {
            tracker: Arc::new(builder.build()),
            changed,
        }
    }

    pub fn tracker(&self) -> Arc<ExecutionTracker> {
        Arc::clone(&self.tracker)
    }

    /// The line to draw at `now`; empty when idle
    pub fn frame(&self, now: f64) -> String {
        progress::render(self.tracker.state().as_ref(), now).to_string()
    }

    /// Redraw loop; runs until its task is aborted
    pub async fn run<W: Write>(&self, mut out: W) {
        loop {
            self.changed.notified().await;
            let line = self.frame(deck_execution_tracker::execution_tracker::now_seconds());
            // \r + clear-line keeps the bar on a single terminal row
            let redraw = format!("\r\x1b[2K{}", line);
            if out.write_all(redraw.as_bytes()).and_then(|_| out.flush()).is_err() {
                debug!("Execution bar output closed");
                return;
            }
        }
    }

    pub fn destroy(&self) {
        self.tracker.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_notification_text() {
        let done = RunFinished {
            kind: FinishKind::Done,
            data: json!({"elapsed": 75.2}),
        };
        assert_eq!(Notification::from_finished(&done).to_string(), "Run finished in 1m 15s");

        let failed = RunFinished {
            kind: FinishKind::Error,
            data: json!({"exception_message": "CUDA out of memory", "node_type": "KSampler"}),
        };
        assert_eq!(
            Notification::from_finished(&failed).to_string(),
            "Run failed in KSampler: CUDA out of memory"
        );

        let bare = RunFinished {
            kind: FinishKind::Error,
            data: json!(null),
        };
        assert_eq!(Notification::from_finished(&bare).to_string(), "Run failed: unknown error");

        let interrupted = RunFinished {
            kind: FinishKind::Interrupted,
            data: json!({}),
        };
        assert_eq!(Notification::from_finished(&interrupted), Notification::Interrupted);
    }

    #[test]
    fn test_feed_counts_and_announces() {
        let (feed, mut notifications) = ActivityFeed::new(None, TrackerMetrics::new().unwrap());

        feed.on_event(&TrackerEvent::new("run-start", json!({"prompt_id": "p1"})));
        assert_eq!(feed.active_jobs(), 1);

        feed.on_event(&TrackerEvent::new(
            "run-error",
            json!({"exception_message": "boom", "node_type": "VAEDecode"}),
        ));
        assert_eq!(feed.active_jobs(), 0);
        assert_eq!(
            notifications.try_recv().unwrap(),
            Notification::Failed {
                message: "boom".to_string(),
                node_type: Some("VAEDecode".to_string()),
            }
        );
        assert!(notifications.try_recv().is_err());
    }

    #[test]
    fn test_feed_metrics_report() {
        let (feed, _notifications) = ActivityFeed::new(None, TrackerMetrics::new().unwrap());

        feed.on_event(&TrackerEvent::new("run-start", json!({"prompt_id": "p1"})));
        feed.on_event(&TrackerEvent::new("run-done", json!({"elapsed": 4.0})));
        feed.on_event(&TrackerEvent::new("run-start", json!({"prompt_id": "p2"})));

        let report = feed.metrics_report().unwrap();
        assert!(report.contains("deck_runs_started_total 2"));
        assert!(report.contains("deck_runs_succeeded_total 1"));
        assert!(report.contains("deck_active_runs 1"));
    }

    #[test]
    fn test_bar_frame_follows_tracker() {
        let bar = ExecutionBar::new(None);
        assert_eq!(bar.frame(0.0), "");

        let tracker = bar.tracker();
        tracker.handle_event(&TrackerEvent::new(
            "run-snapshot",
            json!({
                "prompt_id": "p1",
                "start_time": 100.0,
                "node_names": {"1": "LoadImage", "2": "KSampler"},
                "current_node": "2",
                "executed_nodes": ["1", "2"],
            }),
        ));
        assert_eq!(bar.frame(112.0), "[##########----------]  50% KSampler | 12s");

        bar.destroy();
        assert_eq!(bar.frame(112.0), "");
    }

    #[tokio::test]
    async fn test_bar_redraws_on_update() {
        let bar = Arc::new(ExecutionBar::new(None));
        let tracker = bar.tracker();
        tracker.handle_event(&TrackerEvent::new("run-start", json!({"prompt_id": "p1"})));

        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
        struct ChannelWriter(mpsc::UnboundedSender<Vec<u8>>);
        impl Write for ChannelWriter {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                let _ = self.0.send(buf.to_vec());
                Ok(buf.len())
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let runner = Arc::clone(&bar);
        let task = tokio::spawn(async move { runner.run(ChannelWriter(tx)).await });

        let written = tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        let text = String::from_utf8(written).unwrap();
        assert!(text.starts_with("\r\x1b[2K["));
        assert!(text.contains("0%"));

        task.abort();
        bar.destroy();
    }
}
