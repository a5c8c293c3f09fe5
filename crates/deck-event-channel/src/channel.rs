//! Event channel adapter
//!
//! One server-push connection per view lifetime. Decoded events are
//! forwarded, in order, to every registered sink from a single task, so a
//! tracker never sees two events at once.

use std::sync::Arc;

use deck_execution_tracker::{ExecutionTracker, TrackerEvent};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::message::decode_frame;
use crate::sse::SseFrame;
use crate::transport::{SseTransport, TransportConfig};

const FRAME_BUFFER: usize = 256;

/// Receiver of decoded channel events
pub trait EventSink: Send + Sync {
    fn on_event(&self, event: &TrackerEvent);
}

impl EventSink for ExecutionTracker {
    fn on_event(&self, event: &TrackerEvent) {
        self.handle_event(event);
    }
}

pub struct EventChannel {
    config: TransportConfig,
    sinks: Vec<Arc<dyn EventSink>>,
    task: Option<JoinHandle<()>>,
}

impl EventChannel {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            sinks: Vec::new(),
            task: None,
        }
    }

    /// Add a sink. Sinks registered while running take effect on the next `start`.
    pub fn register(&mut self, sink: Arc<dyn EventSink>) {
        self.sinks.push(sink);
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Open the connection. A connection left over from an earlier `start`
    /// is closed first.
    pub fn start(&mut self) -> Result<()> {
        self.stop();

        let transport = SseTransport::new(self.config.clone())?;
        let sinks = self.sinks.clone();
        info!(url = %transport.url(), sinks = sinks.len(), "Starting event channel");

        self.task = Some(tokio::spawn(async move {
            let (tx, mut rx) = mpsc::channel(FRAME_BUFFER);
            let transport_run = transport.run(tx);
            tokio::pin!(transport_run);

            loop {
                tokio::select! {
                    _ = &mut transport_run => break,
                    frame = rx.recv() => match frame {
                        Some(frame) => dispatch(&sinks, &frame),
                        None => break,
                    },
                }
            }

            // frames already buffered when the transport gave up
            while let Ok(frame) = rx.try_recv() {
                dispatch(&sinks, &frame);
            }
            debug!("Event channel task finished");
        }));

        Ok(())
    }

    /// Close the connection. Safe to call when not running.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            info!(url = %self.config.url, "Stopped event channel");
        }
    }
}

impl Drop for EventChannel {
    fn drop(&mut self) {
        self.stop();
    }
}

fn dispatch(sinks: &[Arc<dyn EventSink>], frame: &SseFrame) {
    match decode_frame(frame) {
        Ok(event) => {
            for sink in sinks {
                sink.on_event(&event);
            }
        }
        Err(e) => warn!(event = %frame.event, error = %e, "Dropping undecodable message"),
    }
}
