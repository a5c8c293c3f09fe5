//! Reconnecting SSE transport
//!
//! Behaves like a browser EventSource: one long-lived GET, reconnect after
//! the server-announced `retry` delay, resume with `Last-Event-ID`. A 204
//! response tells the client to stop. There is no backoff growth.

use std::time::Duration;

use futures::StreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use reqwest::StatusCode;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{ChannelError, Result};
use crate::sse::{SseDecoder, SseFrame};

/// Default reconnection delay, as in browsers
pub const DEFAULT_RETRY: Duration = Duration::from_millis(3000);

/// Settings for one event stream connection
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Full URL of the event stream endpoint
    pub url: String,

    /// Initial reconnection delay; the server may change it
    pub retry: Duration,

    pub connect_timeout: Duration,
}

impl TransportConfig {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            retry: DEFAULT_RETRY,
            connect_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_retry(mut self, retry: Duration) -> Self {
        self.retry = retry;
        self
    }
}

enum StreamEnd {
    /// Server closed the response body
    Eof,
    /// Server asked us not to reconnect
    Stopped,
    /// Nobody is listening anymore
    ReceiverClosed,
}

pub struct SseTransport {
    client: reqwest::Client,
    config: TransportConfig,
}

impl SseTransport {
    pub fn new(config: TransportConfig) -> Result<Self> {
        // No overall timeout: the response body is expected to stay open
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;
        Ok(Self { client, config })
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }

    /// Stream frames into `tx` until the receiver goes away or the server
    /// answers 204
    pub async fn run(self, tx: mpsc::Sender<SseFrame>) {
        let mut last_event_id: Option<String> = None;
        let mut retry = self.config.retry;

        loop {
            match self.stream_once(&tx, &mut last_event_id, &mut retry).await {
                Ok(StreamEnd::ReceiverClosed) => return,
                Ok(StreamEnd::Stopped) => {
                    info!(url = %self.config.url, "Event stream answered 204, not reconnecting");
                    return;
                }
                Ok(StreamEnd::Eof) => {
                    debug!(url = %self.config.url, "Event stream closed by server");
                }
                Err(e) => {
                    warn!(url = %self.config.url, error = %e, "Event stream failed");
                }
            }

            if tx.is_closed() {
                return;
            }
            debug!(url = %self.config.url, retry_ms = retry.as_millis() as u64, "Reconnecting event stream");
            tokio::time::sleep(retry).await;
        }
    }

    async fn stream_once(
        &self,
        tx: &mpsc::Sender<SseFrame>,
        last_event_id: &mut Option<String>,
        retry: &mut Duration,
    ) -> Result<StreamEnd> {
        let mut request = self
            .client
            .get(&self.config.url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache");
        if let Some(id) = last_event_id.as_deref() {
            request = request.header("Last-Event-ID", id);
        }

        let response = request.send().await?;
        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            return Ok(StreamEnd::Stopped);
        }
        if !status.is_success() {
            return Err(ChannelError::Status(status));
        }
        info!(url = %self.config.url, "Event stream connected");

        let mut decoder = SseDecoder::new();
        let mut body = response.bytes_stream();

        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            for frame in decoder.feed(&chunk) {
                if tx.send(frame).await.is_err() {
                    return Ok(StreamEnd::ReceiverClosed);
                }
            }
            if let Some(ms) = decoder.take_retry() {
                *retry = Duration::from_millis(ms);
            }
            if let Some(id) = decoder.last_event_id() {
                *last_event_id = Some(id.to_string());
            }
        }

        Ok(StreamEnd::Eof)
    }
}
