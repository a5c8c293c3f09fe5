//! Decoding SSE frames into tracker events

use deck_execution_tracker::TrackerEvent;
use serde_json::Value;

use crate::error::{ChannelError, Result};
use crate::sse::SseFrame;

/// Decode one frame.
///
/// The panel sends `{"type": ..., "data": ...}` as the message body. A body
/// without `type` on a named SSE event is taken whole as that event's payload.
pub fn decode_frame(frame: &SseFrame) -> Result<TrackerEvent> {
    let mut body: Value = serde_json::from_str(&frame.data)?;

    if let Some(kind) = body.get("type").and_then(Value::as_str) {
        let kind = kind.to_string();
        let data = body.get_mut("data").map(Value::take).unwrap_or(Value::Null);
        return Ok(TrackerEvent { kind, data });
    }

    if frame.event != "message" {
        return Ok(TrackerEvent {
            kind: frame.event.clone(),
            data: body,
        });
    }

    Err(ChannelError::MissingType)
}
