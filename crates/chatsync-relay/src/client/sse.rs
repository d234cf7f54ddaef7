use futures::{Stream, StreamExt};
use std::collections::VecDeque;
use std::fmt::Display;

use chatsync_core::BroadcastFeed;
use chatsync_types::StreamingBroadcast;

/// Byte buffer that yields complete `\n`-terminated lines
pub(crate) struct LineBuffer {
    buffer: VecDeque<u8>,
}

impl LineBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: VecDeque::with_capacity(capacity),
        }
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend(bytes);
    }

    /// Next complete line without its terminator, `None` until one is buffered
    pub fn next_line(&mut self) -> Option<Result<String, std::str::Utf8Error>> {
        let newline_pos = self.buffer.iter().position(|&b| b == b'\n')?;
        let line_bytes: Vec<u8> = self.buffer.drain(..=newline_pos).collect();

        Some(std::str::from_utf8(&line_bytes).map(|line| line.trim_end_matches(['\r', '\n']).to_string()))
    }
}

/// Collects the `data:` lines of one SSE event until the blank line ending it
#[derive(Default)]
pub(crate) struct EventAssembler {
    data: Vec<String>,
}

impl EventAssembler {
    /// Feed one line; returns the event payload once the event is complete
    pub fn push_line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            if self.data.is_empty() {
                return None;
            }
            let payload = self.data.join("\n");
            self.data.clear();
            return Some(payload);
        }
        // Comments (keep-alives), `event:`, `id:` and `retry:` carry nothing we need
        if let Some(data) = line.strip_prefix("data:") {
            self.data.push(data.strip_prefix(' ').unwrap_or(data).to_string());
        }
        None
    }
}

/// Decode an SSE byte stream into streaming frames.
///
/// Undecodable events are skipped; a transport error ends the feed.
pub fn decode_broadcasts<S, B, E>(bytes: S) -> BroadcastFeed
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    Box::pin(async_stream::stream! {
        let mut chunks = Box::pin(bytes);
        let mut lines = LineBuffer::with_capacity(4096);
        let mut assembler = EventAssembler::default();

        while let Some(chunk) = chunks.next().await {
            match chunk {
                Ok(bytes) => {
                    lines.extend(bytes.as_ref());
                    while let Some(line) = lines.next_line() {
                        let line = match line {
                            Ok(line) => line,
                            Err(e) => {
                                tracing::warn!("Skipping non UTF-8 relay line: {}", e);
                                continue;
                            }
                        };
                        let Some(payload) = assembler.push_line(&line) else {
                            continue;
                        };
                        match serde_json::from_str::<StreamingBroadcast>(&payload) {
                            Ok(frame) => yield frame,
                            Err(e) => tracing::warn!("Skipping undecodable streaming frame: {}", e),
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("Relay stream ended: {}", e);
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_buffer_handles_partial_lines() {
        let mut buffer = LineBuffer::with_capacity(64);

        buffer.extend(b"data: par");
        assert!(buffer.next_line().is_none());

        buffer.extend(b"tial\r\n\n");
        assert_eq!(buffer.next_line().unwrap().unwrap(), "data: partial");
        assert_eq!(buffer.next_line().unwrap().unwrap(), "");
        assert!(buffer.next_line().is_none());
    }

    #[test]
    fn test_assembler_joins_multiline_data() {
        let mut assembler = EventAssembler::default();

        assert_eq!(assembler.push_line(": keep-alive"), None);
        assert_eq!(assembler.push_line(""), None);
        assert_eq!(assembler.push_line("event: broadcast"), None);
        assert_eq!(assembler.push_line("data: {\"a\":"), None);
        assert_eq!(assembler.push_line("data:1}"), None);
        assert_eq!(assembler.push_line("").as_deref(), Some("{\"a\":\n1}"));
    }

    #[tokio::test]
    async fn test_decode_skips_garbage_between_frames() {
        let body: Vec<Result<&'static [u8], std::io::Error>> = vec![
            Ok(b"event: broadcast\ndata: {\"type\":\"start\",\"session_id\":\"s1\",".as_slice()),
            Ok(b"\"thread_id\":\"t1\",\"message_id\":\"m1\",\"created_at\":\"2025-03-01T10:00:00Z\"}\n\n".as_slice()),
            Ok(b"data: not json\n\n".as_slice()),
            Ok(b"data: {\"type\":\"end\",\"session_id\":\"s1\",\"thread_id\":\"t1\",\"message_id\":\"m1\",\"content\":\"Hi\",\"created_at\":\"2025-03-01T10:00:00Z\"}\n\n".as_slice()),
        ];

        let frames: Vec<StreamingBroadcast> = decode_broadcasts(futures::stream::iter(body)).collect().await;

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].message_id(), "m1");
        assert!(frames[1].is_end());
        assert_eq!(frames[1].content(), "Hi");
    }
}
