//! Deck Event Channel
//!
//! Plumbing between the panel backend and execution trackers:
//! - `sse`: incremental Server-Sent Events decoder
//! - `transport`: reconnecting EventSource-style HTTP stream
//! - `channel`: per-view adapter forwarding decoded events to sinks
//! - `queue`: queue status client used to recover node names

pub mod channel;
pub mod error;
pub mod message;
pub mod queue;
pub mod sse;
pub mod transport;

pub use channel::{EventChannel, EventSink};
pub use error::{ChannelError, Result};
pub use message::decode_frame;
pub use queue::{HttpQueueSource, QueueSnapshot};
pub use sse::{SseDecoder, SseFrame};
pub use transport::{SseTransport, TransportConfig, DEFAULT_RETRY};
