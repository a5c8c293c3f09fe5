//! Incremental Server-Sent Events decoder
//!
//! Follows the EventSource parsing rules: LF, CRLF and CR line endings,
//! `:` comments, multi-line `data`, `event`, `id` and `retry` fields. Chunks
//! may split lines (and CRLF pairs) anywhere.

/// One dispatched SSE message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    /// `event:` field, `"message"` when absent
    pub event: String,
    pub data: String,
    /// Last event id seen on the stream at dispatch time
    pub id: Option<String>,
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    line: Vec<u8>,
    data: String,
    event: String,
    last_event_id: Option<String>,
    retry_ms: Option<u64>,
    /// previous chunk ended in CR; a leading LF belongs to it
    after_cr: bool,
    started: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of the response body, returning every completed frame
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        let mut frames = Vec::new();
        let mut bytes = chunk;

        if !self.started && !bytes.is_empty() {
            self.started = true;
            bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
        }

        for &byte in bytes {
            match byte {
                b'\n' if self.after_cr => self.after_cr = false,
                b'\n' | b'\r' => {
                    self.after_cr = byte == b'\r';
                    let line = std::mem::take(&mut self.line);
                    if let Some(frame) = self.process_line(&line) {
                        frames.push(frame);
                    }
                }
                _ => {
                    self.after_cr = false;
                    self.line.push(byte);
                }
            }
        }

        frames
    }

    /// Reconnection delay announced by the server since the last call
    pub fn take_retry(&mut self) -> Option<u64> {
        self.retry_ms.take()
    }

    pub fn last_event_id(&self) -> Option<&str> {
        self.last_event_id.as_deref()
    }

    fn process_line(&mut self, line: &[u8]) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line[0] == b':' {
            return None;
        }

        let line = String::from_utf8_lossy(line);
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (&*line, ""),
        };

        match field {
            "event" => self.event = value.to_string(),
            "data" => {
                self.data.push_str(value);
                self.data.push('\n');
            }
            "id" if !value.contains('\0') => {
                self.last_event_id = Some(value.to_string()).filter(|id| !id.is_empty());
            }
            "retry" if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) => {
                self.retry_ms = value.parse().ok();
            }
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = std::mem::take(&mut self.event);
        if self.data.is_empty() {
            return None;
        }

        let mut data = std::mem::take(&mut self.data);
        data.pop();

        Some(SseFrame {
            event: if event.is_empty() {
                "message".to_string()
            } else {
                event
            },
            data,
            id: self.last_event_id.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_message() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.feed(b"data: {\"type\":\"progress\"}\n\n");
        assert_eq!(
            frames,
            vec![SseFrame {
                event: "message".to_string(),
                data: "{\"type\":\"progress\"}".to_string(),
                id: None,
            }]
        );
    }

    #[test]
    fn test_chunk_boundaries_and_crlf() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"event: run-done\r").is_empty());
        assert!(decoder.feed(b"\ndata: {\"elap").is_empty());
        let frames = decoder.feed(b"sed\":3}\r\n\r\n");

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, "run-done");
        assert_eq!(frames[0].data, "{\"elapsed\":3}");
    }

    #[test]
    fn test_bare_cr_line_endings() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.feed(b"data: a\rdata: b\r\rdata: c\r\r");
        let data: Vec<_> = frames.iter().map(|f| f.data.as_str()).collect();
        assert_eq!(data, vec!["a\nb", "c"]);
    }

    #[test]
    fn test_comments_and_empty_data_are_not_dispatched() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.feed(b": keepalive\n\nevent: ping\n\n:ping\n\n");
        assert!(frames.is_empty());

        // event name does not leak into the next message
        let frames = decoder.feed(b"data: x\n\n");
        assert_eq!(frames[0].event, "message");
    }

    #[test]
    fn test_id_and_retry_fields() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.feed(b"retry: 1500\nid: 42\ndata: x\n\nretry: soon\n\n");

        assert_eq!(frames[0].id.as_deref(), Some("42"));
        assert_eq!(decoder.last_event_id(), Some("42"));
        assert_eq!(decoder.take_retry(), Some(1500));
        assert_eq!(decoder.take_retry(), None);
    }

    #[test]
    fn test_field_without_colon_and_bom() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.feed(b"\xEF\xBB\xBFdata\ndata:no-space\n\n");
        assert_eq!(frames[0].data, "\nno-space");
    }
}
