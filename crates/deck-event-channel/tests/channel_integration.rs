//! End-to-end tests: in-process SSE backend -> EventChannel -> ExecutionTracker

use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::sse::{Event, Sse};
use axum::routing::get;
use axum::{Json, Router};
use deck_event_channel::{EventChannel, EventSink, HttpQueueSource, TransportConfig};
use deck_execution_tracker::{ExecutionState, ExecutionTracker, FinishKind, HandleOutcome, TrackerEvent};
use futures::stream::{self, BoxStream, StreamExt};
use serde_json::{json, Value};

#[derive(Default)]
struct Backend {
    /// every connection gets the opening script and stays open
    hold_open: bool,
    connections: AtomicUsize,
    last_event_ids: Mutex<Vec<Option<String>>>,
}

fn message(kind: &str, data: Value) -> Event {
    Event::default().data(json!({"type": kind, "data": data}).to_string())
}

fn opening_script() -> Vec<Event> {
    vec![
        Event::default().retry(Duration::from_millis(50)).comment("hello"),
        message("run-start", json!({"prompt_id": "p1"})).id("1"),
        message("node-executing", json!({"node": "3"})).id("2"),
        message("progress", json!({"value": 5, "max": 10})).id("3"),
    ]
}

fn script(events: Vec<Event>) -> BoxStream<'static, Result<Event, Infallible>> {
    stream::iter(events.into_iter().map(Ok)).boxed()
}

async fn events(
    State(backend): State<Arc<Backend>>,
    headers: HeaderMap,
) -> Sse<BoxStream<'static, Result<Event, Infallible>>> {
    let connection = backend.connections.fetch_add(1, Ordering::SeqCst);
    backend.last_event_ids.lock().unwrap().push(
        headers
            .get("last-event-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    );

    let body = if backend.hold_open {
        script(opening_script()).chain(stream::pending()).boxed()
    } else if connection == 0 {
        // first connection drops after announcing the run
        script(opening_script())
    } else {
        script(vec![message("run-done", json!({"elapsed": 7})).id("4")])
            .chain(stream::pending())
            .boxed()
    };
    Sse::new(body)
}

async fn queue() -> Json<Value> {
    Json(json!({
        "queue_running": [[0, "p1", {
            "3": {"class_type": "KSampler"},
            "8": {"class_type": "VAEDecode"}
        }, {}, []]],
        "queue_pending": []
    }))
}

async fn spawn_backend(hold_open: bool) -> (String, Arc<Backend>) {
    let backend = Arc::new(Backend {
        hold_open,
        ..Backend::default()
    });
    let app = Router::new()
        .route("/events", get(events))
        .route("/queue", get(queue))
        .with_state(Arc::clone(&backend));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), backend)
}

/// Sink that keeps the outcomes the tracker returned, like a dashboard would
struct Feed {
    tracker: ExecutionTracker,
    snapshots: Mutex<Vec<Option<ExecutionState>>>,
    finished: Mutex<Vec<HandleOutcome>>,
}

impl EventSink for Feed {
    fn on_event(&self, event: &TrackerEvent) {
        let outcome = self.tracker.handle_event(event);
        self.snapshots.lock().unwrap().push(self.tracker.state());
        if outcome.finished().is_some() {
            self.finished.lock().unwrap().push(outcome);
        }
    }
}

async fn wait_for<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

#[tokio::test]
async fn test_stream_drives_tracker_through_reconnect() {
    let (base, backend) = spawn_backend(false).await;

    let queue = HttpQueueSource::new(&base, "/queue", Duration::from_secs(2)).unwrap();
    let feed = Arc::new(Feed {
        tracker: ExecutionTracker::builder(|| {})
            .name("activity-feed")
            .queue_source(Arc::new(queue))
            .build(),
        snapshots: Mutex::new(Vec::new()),
        finished: Mutex::new(Vec::new()),
    });

    let mut channel = EventChannel::new(TransportConfig::new(&format!("{}/events", base)));
    channel.register(feed.clone());
    channel.start().unwrap();

    wait_for(|| !feed.finished.lock().unwrap().is_empty()).await;

    let snapshots = feed.snapshots.lock().unwrap().clone();
    assert_eq!(snapshots.len(), 4);
    let during = snapshots[2].as_ref().unwrap();
    assert_eq!(during.prompt_id, "p1");
    assert_eq!(during.current_node.as_deref(), Some("3"));
    assert_eq!(during.progress.map(|p| p.percent), Some(50.0));
    assert!(snapshots[3].is_none());

    let finished = feed.finished.lock().unwrap()[0].finished().cloned().unwrap();
    assert_eq!(finished.kind, FinishKind::Done);
    assert_eq!(finished.elapsed(), Some(7.0));

    assert_eq!(backend.connections.load(Ordering::SeqCst), 2);
    assert_eq!(
        *backend.last_event_ids.lock().unwrap(),
        vec![None, Some("3".to_string())]
    );

    channel.stop();
}

#[tokio::test]
async fn test_two_views_track_independently() {
    let (base, backend) = spawn_backend(true).await;

    let bar = Arc::new(ExecutionTracker::builder(|| {}).name("execution-bar").build());
    let updates = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&updates);
    let feed = Arc::new(
        ExecutionTracker::builder(move || {
            counted.fetch_add(1, Ordering::SeqCst);
        })
        .name("activity-feed")
        .queue_source(Arc::new(
            HttpQueueSource::new(&base, "queue", Duration::from_secs(2)).unwrap(),
        ))
        .build(),
    );

    let mut bar_channel = EventChannel::new(TransportConfig::new(&format!("{}/events", base)));
    bar_channel.register(bar.clone());
    let mut feed_channel = EventChannel::new(TransportConfig::new(&format!("{}/events", base)));
    feed_channel.register(feed.clone());

    bar_channel.start().unwrap();
    feed_channel.start().unwrap();

    wait_for(|| bar.state().is_some_and(|s| s.progress.is_some())).await;
    // only the feed has a queue source to recover node names from
    wait_for(|| feed.state().is_some_and(|s| s.total_nodes == 2 && s.progress.is_some())).await;
    assert_eq!(bar.state().unwrap().total_nodes, 0);
    assert!(updates.load(Ordering::SeqCst) >= 4);

    // tearing down one view leaves the other untouched
    bar_channel.stop();
    bar.destroy();
    assert!(bar.state().is_none());

    let feed_state = feed.state().unwrap();
    assert_eq!(feed_state.prompt_id, "p1");
    assert_eq!(feed_state.current_label(), "KSampler");

    feed_channel.stop();
    assert_eq!(backend.connections.load(Ordering::SeqCst), 2);
}
