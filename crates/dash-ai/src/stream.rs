//! Incremental decoding and line framing of the response body

use std::pin::Pin;

use async_stream::stream;
use futures::StreamExt;
use tokio_stream::Stream;

use crate::error::Result;
use crate::types::StreamRecord;

/// Raw response body, chunk by chunk
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>>> + Send>>;

/// Complete protocol lines, without their terminating newline
pub type LineStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// UTF-8 decoder that tolerates multi-byte characters split across chunks.
///
/// Bytes of an incomplete trailing sequence are held back until the next
/// chunk arrives. Invalid sequences decode to U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a chunk, carrying any incomplete trailing sequence forward
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        let mut bytes = std::mem::take(&mut self.pending);
        bytes.extend_from_slice(chunk);

        let mut text = String::with_capacity(bytes.len());
        let mut rest = bytes.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    text.push_str(valid);
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    text.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            self.pending = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        text
    }

    /// Flush bytes still held back at end of stream
    pub fn finish(&mut self) -> String {
        let pending = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&pending).into_owned()
    }

    /// Whether bytes of an incomplete character are held back
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

/// Splits decoded text into newline-terminated lines, keeping the unfinished
/// tail buffered.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buffer: String,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append text and return every line it completed, in order
    pub fn push(&mut self, text: &str) -> Vec<String> {
        self.buffer.push_str(text);

        let Some((complete, tail)) = self.buffer.rsplit_once('\n') else {
            return Vec::new();
        };
        let lines: Vec<String> = complete.split('\n').map(String::from).collect();
        self.buffer = tail.to_string();
        lines
    }

    /// Take the remaining fragment, if it holds anything but whitespace
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        if rest.trim().is_empty() {
            None
        } else {
            Some(rest)
        }
    }

    /// The buffered fragment awaiting more text
    pub fn pending(&self) -> &str {
        &self.buffer
    }
}

/// Turn a body stream into a stream of protocol lines.
///
/// A read error is yielded once and ends the stream. At end of data the
/// final unterminated fragment is yielded if it is not blank.
pub fn frame_lines(mut body: ByteStream) -> LineStream {
    Box::pin(stream! {
        let mut decoder = Utf8Decoder::new();
        let mut buffer = LineBuffer::new();

        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(bytes) => {
                    let text = decoder.decode(&bytes);
                    tracing::debug!(bytes = bytes.len(), "received chunk");
                    for line in buffer.push(&text) {
                        yield Ok(line);
                    }
                }
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }

        tracing::debug!("stream done");
        for line in buffer.push(&decoder.finish()) {
            yield Ok(line);
        }
        if let Some(rest) = buffer.finish() {
            yield Ok(rest);
        }
    })
}

/// How a single protocol line should be applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEvent {
    /// Empty or whitespace-only; skipped
    Blank,
    /// A structured record
    Record(StreamRecord),
    /// Looked like JSON but failed to parse; discarded
    Malformed,
    /// Unstructured text to append as-is
    Text(String),
}

/// Classify one line of the response stream.
///
/// Object keys are read independently, so a mistyped key does not hide the
/// others. Valid JSON that is not an object (a bare number, an array) yields
/// an empty record.
pub fn parse_line(line: &str) -> LineEvent {
    let line = line.strip_suffix('\r').unwrap_or(line);
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return LineEvent::Blank;
    }

    match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(serde_json::Value::Object(object)) => {
            LineEvent::Record(StreamRecord::from_object(&object))
        }
        Ok(_) => LineEvent::Record(StreamRecord::default()),
        Err(_) if trimmed.starts_with('{') || trimmed.starts_with('[') => LineEvent::Malformed,
        Err(_) => LineEvent::Text(line.to_string()),
    }
}
