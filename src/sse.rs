//! Server-Sent Events (SSE) stream processing utilities.
//!
//! This module provides generic SSE parsing and stream processing
//! shared across the provider adapters.
//!
//! SSE format:
//! ```text
//! event: message_start
//! data: {"key": "value"}
//!
//! data: {"another": "event"}
//!
//! data: [DONE]
//! ```

use std::collections::VecDeque;

use futures::stream::{self, Stream, StreamExt};

use crate::error::Error;

/// One parsed SSE event: the optional `event:` name and the `data:` payload
/// (multiple data lines joined with newlines, per the SSE format).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

/// Incremental SSE parser.
///
/// Bytes arrive in arbitrary chunks; the parser buffers partial lines
/// (including split UTF-8 sequences) and emits events as their terminating
/// blank lines arrive.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes, returning every event completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1]);
            if let Some(event) = self.process_line(line.trim_end_matches('\r')) {
                events.push(event);
            }
        }
        events
    }

    /// Flush any event left unterminated when the stream ends.
    pub fn finish(&mut self) -> Option<SseEvent> {
        if !self.buffer.is_empty() {
            let line = String::from_utf8_lossy(&std::mem::take(&mut self.buffer)).to_string();
            if let Some(event) = self.process_line(line.trim_end_matches('\r')) {
                return Some(event);
            }
        }
        self.close_event()
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.close_event();
        }
        // Lines starting with a colon are comments (vendors use them as
        // keep-alives).
        if line.starts_with(':') {
            return None;
        }

        match parse_sse_field(line) {
            Some(("event", value)) => self.event = Some(value.to_string()),
            Some(("data", value)) => self.data.push(value.to_string()),
            _ => {}
        }
        None
    }

    fn close_event(&mut self) -> Option<SseEvent> {
        if self.event.is_none() && self.data.is_empty() {
            return None;
        }
        Some(SseEvent {
            event: self.event.take(),
            data: std::mem::take(&mut self.data).join("\n"),
        })
    }
}

/// Extension trait for `reqwest::Response` to enable SSE streaming.
///
/// # Example
/// ```ignore
/// use unichat::sse::SseResponseExt;
/// use futures::StreamExt;
///
/// let response = client.get("https://api.example.com/stream").send().await?;
///
/// let mut stream = response.sse();
/// while let Some(result) = stream.next().await {
///     let event = result?;
///     println!("SSE data: {}", event.data);
/// }
/// ```
pub trait SseResponseExt {
    /// Convert the response into a stream of parsed SSE events.
    ///
    /// Stops when the `[DONE]` marker is encountered or the stream ends.
    fn sse(self) -> impl Stream<Item = Result<SseEvent, Error>> + Send;
}

impl SseResponseExt for reqwest::Response {
    fn sse(self) -> impl Stream<Item = Result<SseEvent, Error>> + Send {
        let byte_stream = self.bytes_stream();

        stream::unfold(
            (
                Box::pin(byte_stream),
                SseParser::new(),
                VecDeque::<SseEvent>::new(),
                false,
            ),
            |(mut byte_stream, mut parser, mut pending, mut stream_ended)| async move {
                loop {
                    if let Some(event) = pending.pop_front() {
                        if is_done_marker(&event.data) {
                            return None;
                        }
                        return Some((Ok(event), (byte_stream, parser, pending, stream_ended)));
                    }

                    if stream_ended {
                        return None;
                    }

                    match byte_stream.next().await {
                        Some(Ok(chunk)) => {
                            pending.extend(parser.feed(&chunk));
                        }
                        Some(Err(e)) => {
                            return Some((
                                Err(Error::from(e)),
                                (byte_stream, parser, pending, stream_ended),
                            ));
                        }
                        None => {
                            stream_ended = true;
                            pending.extend(parser.finish());
                        }
                    }
                }
            },
        )
    }
}

/// Split an SSE line into its field name and value.
///
/// # Example
/// ```
/// use unichat::sse::parse_sse_field;
///
/// let line = "data: {\"key\": \"value\"}";
/// assert_eq!(parse_sse_field(line), Some(("data", "{\"key\": \"value\"}")));
///
/// let line = "invalid";
/// assert_eq!(parse_sse_field(line), None);
/// ```
pub fn parse_sse_field(line: &str) -> Option<(&str, &str)> {
    let (name, value) = line.split_once(':')?;
    Some((name, value.strip_prefix(' ').unwrap_or(value)))
}

/// Whether a data payload is the `[DONE]` sentinel OpenAI-style streams
/// send instead of a final JSON chunk.
pub fn is_done_marker(data: &str) -> bool {
    data == "[DONE]"
}
