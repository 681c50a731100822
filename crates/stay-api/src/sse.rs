//! Incremental decoder for the chat event stream
//!
//! The backend frames each event as
//!
//! ```text
//! event: <name>
//! data: <json payload>
//!
//! ```
//!
//! Network chunks arrive with arbitrary boundaries, so the decoder keeps the
//! unterminated trailing line (and any split UTF-8 sequence) between calls.
//! Payloads are returned verbatim; turning them into typed events is the job
//! of [`crate::events`].

use crate::error::Result;
use async_stream::stream;
use futures::StreamExt;
use std::pin::Pin;
use tokio_stream::Stream;

/// A raw response body delivered in chunks
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>>> + Send>>;

/// A stream of decoded frames
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame>> + Send>>;

const EVENT_PREFIX: &str = "event: ";
const DATA_PREFIX: &str = "data: ";

/// One decoded `(event, payload)` unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub event: String,
    pub data: String,
}

impl Frame {
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            data: data.into(),
        }
    }
}

/// Stateful frame decoder fed with successive chunks
#[derive(Debug, Default)]
pub struct FrameDecoder {
    /// Unterminated trailing line from the previous chunk
    buffer: String,
    /// Incomplete UTF-8 sequence from the previous chunk
    utf8_tail: Vec<u8>,
    event: Option<String>,
    data: Option<String>,
}

impl FrameDecoder {
    /// Create a new decoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of raw bytes, returning every frame it completes
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Frame> {
        let text = self.decode_utf8(chunk);
        self.feed_str(&text)
    }

    /// Feed a chunk of text, returning every frame it completes
    pub fn feed_str(&mut self, chunk: &str) -> Vec<Frame> {
        let mut buffer = std::mem::take(&mut self.buffer);
        buffer.push_str(chunk);

        let mut frames = Vec::new();
        let mut start = 0;
        while let Some(offset) = buffer[start..].find('\n') {
            let end = start + offset;
            let line = &buffer[start..end];
            let line = line.strip_suffix('\r').unwrap_or(line);
            if let Some(frame) = self.process_line(line) {
                frames.push(frame);
            }
            start = end + 1;
        }

        self.buffer = buffer.split_off(start);
        frames
    }

    /// Close the input. Unterminated frames are never emitted.
    pub fn finish(&mut self) -> Vec<Frame> {
        if !self.buffer.is_empty() || self.event.is_some() || self.data.is_some() {
            tracing::debug!(
                "Discarding unterminated frame ({} residual bytes)",
                self.buffer.len()
            );
        }
        *self = Self::default();
        Vec::new()
    }

    fn process_line(&mut self, line: &str) -> Option<Frame> {
        if line.is_empty() {
            return self.take_frame();
        }

        if let Some(name) = line.strip_prefix(EVENT_PREFIX) {
            self.event = Some(name.trim().to_string());
        } else if let Some(data) = line.strip_prefix(DATA_PREFIX) {
            self.data = Some(data.to_string());
        } else {
            tracing::trace!("Ignoring stream line: {:?}", line);
        }
        None
    }

    fn take_frame(&mut self) -> Option<Frame> {
        let ready = matches!(
            (&self.event, &self.data),
            (Some(event), Some(data)) if !event.is_empty() && !data.is_empty()
        );
        if !ready {
            return None;
        }
        let event = self.event.take()?;
        let data = self.data.take()?;
        Some(Frame { event, data })
    }

    fn decode_utf8(&mut self, chunk: &[u8]) -> String {
        let mut bytes = std::mem::take(&mut self.utf8_tail);
        bytes.extend_from_slice(chunk);

        let mut out = String::with_capacity(bytes.len());
        let mut rest: &[u8] = &bytes;
        loop {
            match std::str::from_utf8(rest) {
                Ok(s) => {
                    out.push_str(s);
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&rest[..valid]));
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &rest[valid + len..];
                        }
                        None => {
                            self.utf8_tail = rest[valid..].to_vec();
                            break;
                        }
                    }
                }
            }
        }
        out
    }
}

/// Decode a response body into frames, in order.
///
/// A transport error is yielded once and ends the stream.
pub fn frames(mut body: ByteStream) -> FrameStream {
    Box::pin(stream! {
        let mut decoder = FrameDecoder::new();
        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(bytes) => {
                    for frame in decoder.feed(&bytes) {
                        yield Ok(frame);
                    }
                }
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }
        for frame in decoder.finish() {
            yield Ok(frame);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    const STREAM: &str = concat!(
        "event: thinking\n",
        "data: {\"content\":\"让我想想\"}\n",
        "\n",
        "event: content\n",
        "data: {\"content\":\"Hi \"}\n",
        "\n",
        ": keep-alive\n",
        "\n",
        "event: content\n",
        "data: {\"content\":\"there\"}\n",
        "\n",
        "event: done\n",
        "data: {\"id\":1,\"content\":\"Hi there\",\"created_at\":\"2025-01-01T00:00:00\"}\n",
        "\n",
    );

    fn decode_all(chunks: &[&[u8]]) -> Vec<Frame> {
        let mut decoder = FrameDecoder::new();
        let mut frames = Vec::new();
        for chunk in chunks {
            frames.extend(decoder.feed(chunk));
        }
        frames.extend(decoder.finish());
        frames
    }

    #[test]
    fn test_single_chunk() {
        let frames = decode_all(&[STREAM.as_bytes()]);
        let names: Vec<&str> = frames.iter().map(|f| f.event.as_str()).collect();
        assert_eq!(names, vec!["thinking", "content", "content", "done"]);
        assert_eq!(frames[1].data, "{\"content\":\"Hi \"}");
    }

    #[test]
    fn test_chunking_invariance_every_split_point() {
        let bytes = STREAM.as_bytes();
        let expected = decode_all(&[bytes]);
        for split in 0..=bytes.len() {
            let (a, b) = bytes.split_at(split);
            assert_eq!(decode_all(&[a, b]), expected, "split at byte {}", split);
        }
    }

    #[test]
    fn test_chunking_invariance_byte_by_byte() {
        let bytes = STREAM.as_bytes();
        let chunks: Vec<&[u8]> = bytes.chunks(1).collect();
        assert_eq!(decode_all(&chunks), decode_all(&[bytes]));
    }

    #[test]
    fn test_multibyte_char_split() {
        let frame = "event: content\ndata: {\"content\":\"房源\"}\n\n".as_bytes();
        let pos = frame.iter().position(|b| *b >= 0x80).unwrap() + 1;
        let frames = decode_all(&[&frame[..pos], &frame[pos..]]);
        assert_eq!(frames, vec![Frame::new("content", "{\"content\":\"房源\"}")]);
    }

    #[test]
    fn test_invalid_utf8_is_lossy() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.feed(b"event: content\ndata: a\xffb\n\n");
        assert_eq!(frames, vec![Frame::new("content", "a\u{FFFD}b")]);
    }

    #[test]
    fn test_crlf_lines() {
        let frames = decode_all(&[b"event: content\r\ndata: x\r\n\r\n"]);
        assert_eq!(frames, vec![Frame::new("content", "x")]);
    }

    #[test]
    fn test_event_name_trimmed_payload_verbatim() {
        let frames = decode_all(&[b"event: content  \ndata:   spaced  \n\n"]);
        assert_eq!(frames, vec![Frame::new("content", "  spaced  ")]);
    }

    #[test]
    fn test_unterminated_frame_discarded() {
        let frames = decode_all(&[b"event: content\ndata: {\"content\":\"x\"}\n"]);
        assert!(frames.is_empty());

        let mut decoder = FrameDecoder::new();
        decoder.feed(b"event: content\ndata: partial");
        assert!(decoder.finish().is_empty());
        // the discarded residue does not complete on later input
        assert!(decoder.feed(b"\n\n").is_empty());
    }

    #[test]
    fn test_blank_line_without_pending_is_noop() {
        let frames = decode_all(&[b"\n\n\nevent: done\ndata: {}\n\n"]);
        assert_eq!(frames, vec![Frame::new("done", "{}")]);
    }

    #[test]
    fn test_blank_line_with_only_event_keeps_pending() {
        let frames = decode_all(&[b"event: content\n\ndata: x\n\n"]);
        assert_eq!(frames, vec![Frame::new("content", "x")]);
    }

    #[test]
    fn test_unknown_event_names_pass_through() {
        let frames = decode_all(&[b"event: heartbeat\ndata: 1\n\n"]);
        assert_eq!(frames, vec![Frame::new("heartbeat", "1")]);
    }

    #[tokio::test]
    async fn test_frames_stream_stops_on_error() {
        let chunks: Vec<Result<Vec<u8>>> = vec![
            Ok(b"event: content\ndata: a\n\nevent: con".to_vec()),
            Ok(b"tent\ndata: b\n\n".to_vec()),
            Err(Error::UnexpectedResponse("reset".into())),
            Ok(b"event: content\ndata: c\n\n".to_vec()),
        ];
        let body: ByteStream = Box::pin(futures::stream::iter(chunks));
        let items: Vec<Result<Frame>> = frames(body).collect().await;

        assert_eq!(items.len(), 3);
        assert_eq!(items[0].as_ref().unwrap(), &Frame::new("content", "a"));
        assert_eq!(items[1].as_ref().unwrap(), &Frame::new("content", "b"));
        assert!(items[2].is_err());
    }
}
