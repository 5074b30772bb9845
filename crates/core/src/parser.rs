//! Incremental `data:` frame parsing for chunked response bodies.
//!
//! The network may cut a body anywhere, including inside a frame delimiter or a
//! multi-byte UTF-8 sequence. The parser keeps everything after the last
//! complete delimiter in a buffer, so the frames it yields do not depend on
//! where the cuts fall.

use crate::frame::ControlFrame;
use futures::{Stream, StreamExt, stream};
use std::collections::VecDeque;
use std::pin::Pin;

/// Separates two frames in the decoded text.
pub const FRAME_DELIMITER: &str = "\n\n";
/// Prefix carried by every frame.
pub const DATA_PREFIX: &str = "data: ";

/// Accumulates chunks of one response body and yields complete frames.
///
/// One parser serves exactly one stream; it is dropped when the body ends.
#[derive(Debug, Default)]
pub struct StreamFrameParser {
    buffer: String,
    /// Trailing bytes of an incomplete UTF-8 sequence.
    undecoded: Vec<u8>,
}

impl StreamFrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one raw chunk and returns the frames it completed, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<ControlFrame> {
        let text = self.decode(chunk);
        self.push_str(&text)
    }

    /// Feeds one already-decoded chunk.
    pub fn push_str(&mut self, chunk: &str) -> Vec<ControlFrame> {
        self.buffer.push_str(chunk);
        if !self.buffer.contains(FRAME_DELIMITER) {
            return Vec::new();
        }

        let mut segments: Vec<&str> = self.buffer.split(FRAME_DELIMITER).collect();
        // The last segment is incomplete (possibly empty) and stays buffered.
        let residual = segments.pop().unwrap_or_default().to_string();
        let frames = segments.into_iter().filter_map(parse_segment).collect();
        self.buffer = residual;
        frames
    }

    /// Text received after the last complete delimiter.
    pub fn residual(&self) -> &str {
        &self.buffer
    }

    /// Ends the stream, parsing a non-empty residual as one final frame.
    pub fn finish(mut self) -> Option<ControlFrame> {
        if !self.undecoded.is_empty() {
            let tail = String::from_utf8_lossy(&self.undecoded).into_owned();
            self.buffer.push_str(&tail);
        }
        if self.buffer.trim().is_empty() {
            return None;
        }
        parse_segment(&self.buffer)
    }

    /// Streaming UTF-8 decode: invalid sequences become U+FFFD, an incomplete
    /// trailing sequence waits for the next chunk.
    fn decode(&mut self, chunk: &[u8]) -> String {
        self.undecoded.extend_from_slice(chunk);
        let mut out = String::with_capacity(self.undecoded.len());
        loop {
            match std::str::from_utf8(&self.undecoded) {
                Ok(text) => {
                    out.push_str(text);
                    self.undecoded.clear();
                    return out;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.undecoded[..valid]));
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.undecoded.drain(..valid + len);
                        }
                        None => {
                            self.undecoded.drain(..valid);
                            return out;
                        }
                    }
                }
            }
        }
    }
}

/// Parses one delimited segment. Segments without the `data: ` prefix or with
/// a malformed JSON payload yield nothing.
pub fn parse_segment(segment: &str) -> Option<ControlFrame> {
    let Some(payload) = segment.strip_prefix(DATA_PREFIX) else {
        if !segment.trim().is_empty() {
            tracing::debug!(segment, "Dropping segment without data prefix");
        }
        return None;
    };
    ControlFrame::from_json(payload)
}

/// Adapts a stream of raw body chunks into a lazy stream of frames.
///
/// Frames are yielded strictly in arrival order. A transport error is yielded
/// once and ends the stream; the residual buffer is only parsed when the body
/// ends cleanly.
pub fn frames<S, B, E>(chunks: S) -> impl Stream<Item = Result<ControlFrame, E>>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
{
    struct Pending<S> {
        chunks: Pin<Box<S>>,
        parser: Option<StreamFrameParser>,
        ready: VecDeque<ControlFrame>,
    }

    let initial = Pending {
        chunks: Box::pin(chunks),
        parser: Some(StreamFrameParser::new()),
        ready: VecDeque::new(),
    };

    stream::unfold(initial, |mut pending| async move {
        loop {
            if let Some(frame) = pending.ready.pop_front() {
                return Some((Ok(frame), pending));
            }
            if pending.parser.is_none() {
                return None;
            }

            match pending.chunks.next().await {
                Some(Ok(chunk)) => {
                    if let Some(parser) = pending.parser.as_mut() {
                        pending.ready.extend(parser.push(chunk.as_ref()));
                    }
                }
                Some(Err(e)) => {
                    pending.parser = None;
                    return Some((Err(e), pending));
                }
                None => {
                    if let Some(parser) = pending.parser.take() {
                        pending.ready.extend(parser.finish());
                    }
                }
            }
        }
    })
}
