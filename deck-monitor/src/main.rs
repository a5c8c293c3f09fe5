//! Deck Monitor
//!
//! Follows generation runs on the GPU workstation from a terminal:
//! - Activity feed: active-run count and a notice per finished run
//! - Execution bar: live progress line, redrawn every second
//!
//! Each view opens its own event stream and owns its own tracker.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use deck_event_channel::{EventChannel, HttpQueueSource, TransportConfig};
use deck_execution_tracker::{QueueSource, TrackerMetrics};

mod config;
mod views;

use config::{MonitorConfig, ViewSelection};
use views::{ActivityFeed, ExecutionBar};

#[derive(Parser, Debug)]
#[command(name = "deck-monitor")]
#[command(about = "Follow generation runs on a remote GPU workstation")]
struct Args {
    /// Config file (JSON or YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Panel base URL, e.g. http://gpu-box:8188
    #[arg(short, long)]
    url: Option<String>,

    /// Views to run
    #[arg(long, value_enum)]
    views: Option<ViewSelection>,

    /// Skip node-name recovery from the queue endpoint
    #[arg(long)]
    no_queue: bool,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    /// Print the activity feed's run metrics on exit
    #[arg(long)]
    metrics: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr so the execution bar owns stdout
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("deck_monitor=info".parse()?)
        .add_directive("deck_event_channel=info".parse()?)
        .add_directive("deck_execution_tracker=info".parse()?);
    if args.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    let mut config = match &args.config {
        Some(path) => MonitorConfig::load(path)?,
        None => MonitorConfig::load_default()?,
    };
    if let Some(url) = args.url {
        config.base_url = url;
    }
    if let Some(views) = args.views {
        config.views = views;
    }

    let queue: Option<Arc<dyn QueueSource>> = if args.no_queue {
        None
    } else {
        Some(Arc::new(HttpQueueSource::new(
            &config.base_url,
            &config.queue_path,
            config.request_timeout(),
        )?))
    };
    let transport = TransportConfig::new(&config.events_url()).with_retry(config.retry());

    info!(url = %config.events_url(), views = ?config.views, "Starting deck monitor");

    // --- Activity feed ---
    let mut feed_view = None;
    if config.views.feed() {
        let (feed, mut notifications) = ActivityFeed::new(queue.clone(), TrackerMetrics::new()?);
        let feed = Arc::new(feed);

        let mut channel = EventChannel::new(transport.clone());
        channel.register(feed.clone());
        channel.start()?;

        let counter = Arc::clone(&feed);
        let printer = tokio::spawn(async move {
            while let Some(notification) = notifications.recv().await {
                info!(active = counter.active_jobs(), "{}", notification);
            }
        });
        feed_view = Some((feed, channel, printer));
    }

    // --- Execution bar ---
    let mut bar_view = None;
    if config.views.bar() {
        let bar = Arc::new(ExecutionBar::new(queue.clone()));

        let mut channel = EventChannel::new(transport.clone());
        channel.register(bar.tracker());
        channel.start()?;

        let runner = Arc::clone(&bar);
        let redraw = tokio::spawn(async move { runner.run(std::io::stdout()).await });
        bar_view = Some((bar, channel, redraw));
    }

    if feed_view.is_none() && bar_view.is_none() {
        warn!("No views selected, exiting");
        return Ok(());
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutting down deck monitor");

    if let Some((feed, mut channel, printer)) = feed_view {
        channel.stop();
        feed.destroy();
        printer.abort();
        if args.metrics {
            if let Some(report) = feed.metrics_report() {
                eprint!("{}", report);
            }
        }
    }
    if let Some((bar, mut channel, redraw)) = bar_view {
        channel.stop();
        redraw.abort();
        bar.destroy();
        println!();
    }

    Ok(())
}
