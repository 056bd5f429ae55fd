//! Turns raw response bytes into logical frames.
//!
//! The decoder keeps incomplete UTF-8 sequences between chunks and the line
//! splitter keeps incomplete lines, so feeding a body in one piece or split at
//! any byte offset yields the same frames.

use std::collections::VecDeque;

use serde::de::IgnoredAny;

const REPLACEMENT_CHARACTER: char = '\u{FFFD}';

/// Which line prefix introduced a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    Data,
    Message,
    Bare,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Payload { kind: FrameKind, payload: String },
    /// End-of-stream marker such as `[DONE]`.
    Sentinel,
}

impl Frame {
    pub fn payload(&self) -> Option<&str> {
        match self {
            Self::Payload { payload, .. } => Some(payload),
            Self::Sentinel => None,
        }
    }
}

/// Returns true for `[DONE]`, `DONE`, `"[DONE]"` and case variants.
pub fn is_termination_sentinel(payload: &str) -> bool {
    let unquoted = payload.replace('"', "");
    let marker = unquoted.trim();
    let marker = marker
        .strip_prefix('[')
        .and_then(|inner| inner.strip_suffix(']'))
        .unwrap_or(marker);
    marker.eq_ignore_ascii_case("DONE")
}

/// Incremental UTF-8 decoder that never splits a multi-byte character.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    carry: Vec<u8>,
}

impl Utf8Decoder {
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        let mut input = std::mem::take(&mut self.carry);
        input.extend_from_slice(bytes);

        let mut decoded = String::with_capacity(input.len());
        let mut rest = input.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    decoded.push_str(valid);
                    break;
                }
                Err(error) => {
                    let (valid, after) = rest.split_at(error.valid_up_to());
                    decoded.push_str(&String::from_utf8_lossy(valid));
                    match error.error_len() {
                        Some(invalid_len) => {
                            decoded.push(REPLACEMENT_CHARACTER);
                            rest = &after[invalid_len..];
                        }
                        None => {
                            self.carry = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        decoded
    }

    /// Flushes a sequence left incomplete at end of input.
    pub fn finish(&mut self) -> String {
        if self.carry.is_empty() {
            return String::new();
        }
        self.carry.clear();
        REPLACEMENT_CHARACTER.to_string()
    }
}

enum Line<'a> {
    Blank,
    Event,
    Data(&'a str),
    Message(&'a str),
    Bare(&'a str),
}

fn classify(line: &str) -> Line<'_> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        Line::Blank
    } else if trimmed.starts_with("event:") {
        Line::Event
    } else if let Some(payload) = trimmed.strip_prefix("data:") {
        Line::Data(payload.trim())
    } else if let Some(payload) = trimmed.strip_prefix("message:") {
        Line::Message(payload.trim())
    } else {
        Line::Bare(trimmed)
    }
}

/// A bare line holding one complete JSON value is an NDJSON record.
fn is_complete_json(line: &str) -> bool {
    let framed = (line.starts_with('{') && line.ends_with('}'))
        || (line.starts_with('[') && line.ends_with(']'));
    framed && serde_json::from_str::<IgnoredAny>(line).is_ok()
}

#[derive(Debug, Default)]
pub struct FrameDemuxer {
    decoder: Utf8Decoder,
    buffer: String,
    pending: Vec<String>,
    pending_kind: Option<FrameKind>,
    ready: VecDeque<Frame>,
}

impl FrameDemuxer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one network chunk. Frames are produced lazily by the iterator;
    /// anything left unread stays buffered for the next call.
    pub fn push_bytes(&mut self, bytes: &[u8]) -> Frames<'_> {
        let text = self.decoder.decode(bytes);
        self.push_str(&text)
    }

    pub fn push_str(&mut self, text: &str) -> Frames<'_> {
        self.buffer.push_str(text);
        if self.buffer.contains("\r\n") {
            self.buffer = self.buffer.replace("\r\n", "\n");
        }
        Frames { demuxer: self }
    }

    /// Drains everything still buffered once the body has ended.
    pub fn finish(&mut self) -> Vec<Frame> {
        let tail = self.decoder.finish();
        self.buffer.push_str(&tail);
        let rest = std::mem::take(&mut self.buffer).replace("\r\n", "\n");
        for line in rest.split('\n') {
            self.consume_line(line);
        }
        self.flush_pending();
        self.ready.drain(..).collect()
    }

    fn next_frame(&mut self) -> Option<Frame> {
        loop {
            if let Some(frame) = self.ready.pop_front() {
                return Some(frame);
            }
            let newline = self.buffer.find('\n')?;
            let line = self.buffer.drain(..=newline).collect::<String>();
            self.consume_line(&line);
        }
    }

    fn consume_line(&mut self, line: &str) {
        match classify(line) {
            Line::Blank | Line::Event => self.flush_pending(),
            Line::Data(payload) => self.start_payload(FrameKind::Data, payload),
            Line::Message(payload) => self.start_payload(FrameKind::Message, payload),
            Line::Bare(payload) if is_termination_sentinel(payload) => {
                self.flush_pending();
                self.ready.push_back(Frame::Sentinel);
            }
            Line::Bare(payload) if is_complete_json(payload) => {
                self.flush_pending();
                self.ready.push_back(Frame::Payload {
                    kind: FrameKind::Bare,
                    payload: payload.to_string(),
                });
            }
            Line::Bare(payload) => {
                self.pending_kind.get_or_insert(FrameKind::Bare);
                self.pending.push(payload.to_string());
            }
        }
    }

    fn start_payload(&mut self, kind: FrameKind, payload: &str) {
        self.flush_pending();
        if is_termination_sentinel(payload) {
            self.ready.push_back(Frame::Sentinel);
            return;
        }
        self.pending_kind = Some(kind);
        self.pending.push(payload.to_string());
    }

    fn flush_pending(&mut self) {
        let kind = self.pending_kind.take().unwrap_or(FrameKind::Bare);
        if self.pending.is_empty() {
            return;
        }
        let joined = self.pending.join("\n");
        self.pending.clear();

        let payload = joined.trim();
        if payload.is_empty() {
            return;
        }
        if is_termination_sentinel(payload) {
            self.ready.push_back(Frame::Sentinel);
        } else {
            self.ready.push_back(Frame::Payload {
                kind,
                payload: payload.to_string(),
            });
        }
    }
}

/// Lazily yields the frames completed by the last pushed chunk.
pub struct Frames<'a> {
    demuxer: &'a mut FrameDemuxer,
}

impl Iterator for Frames<'_> {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        self.demuxer.next_frame()
    }
}
