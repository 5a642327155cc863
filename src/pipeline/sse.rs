//! Incremental SSE framing (bytes -> frames)
//!
//! Bytes may arrive in arbitrary pieces: a line, a field name, even a multi-byte
//! character can be split across reads. The parser keeps the unfinished line in
//! a rolling buffer and only interprets complete lines, so the frames produced
//! do not depend on how the input was chunked.

use tracing::debug;

use crate::{Error, ErrorContext, Result};

/// The OpenAI-style end sentinel carried in a `data:` field.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Default cap on one unfinished line and on one frame's joined `data`.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024;

/// One dispatched SSE frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseFrame {
    /// `event:` field, if the frame had one.
    pub event: Option<String>,
    /// All `data:` lines joined with `\n`.
    pub data: String,
    pub id: Option<String>,
}

impl SseFrame {
    pub fn data(data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            ..Self::default()
        }
    }

    pub fn with_event(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: Some(event.into()),
            data: data.into(),
            id: None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.data.trim() == DONE_SENTINEL
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    /// Between frames; nothing buffered.
    AwaitingFrame,
    /// Part of a line or some fields of the current frame are buffered.
    AccumulatingLine,
    /// A frame was just dispatched and nothing new has been buffered since.
    FrameComplete,
}

#[derive(Debug)]
pub struct SseFrameParser {
    line: Vec<u8>,
    event: Option<String>,
    data: String,
    has_data: bool,
    id: Option<String>,
    state: ParserState,
    terminated: bool,
    max_frame_bytes: usize,
}

impl Default for SseFrameParser {
    fn default() -> Self {
        Self::new()
    }
}

impl SseFrameParser {
    pub fn new() -> Self {
        Self {
            line: Vec::new(),
            event: None,
            data: String::new(),
            has_data: false,
            id: None,
            state: ParserState::AwaitingFrame,
            terminated: false,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }

    /// Parser that rejects lines or frames larger than `limit` bytes.
    pub fn with_max_frame_bytes(limit: usize) -> Self {
        Self {
            max_frame_bytes: limit.max(1),
            ..Self::new()
        }
    }

    pub fn max_frame_bytes(&self) -> usize {
        self.max_frame_bytes
    }

    pub fn state(&self) -> ParserState {
        self.state
    }

    /// True once the `[DONE]` sentinel was seen. All later input is ignored.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Bytes held for an unfinished line.
    pub fn buffered_len(&self) -> usize {
        self.line.len()
    }

    /// Feed one chunk; returns every frame completed by it, in order.
    ///
    /// Fails with a protocol error once an unfinished line or a frame's data
    /// grows past the size limit; the parser is terminated afterwards.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<SseFrame>> {
        let mut frames = Vec::new();
        if self.terminated || chunk.is_empty() {
            return Ok(frames);
        }

        // The buffered tail holds no terminator, so only new bytes are scanned.
        let mut scan = self.line.len();
        self.line.extend_from_slice(chunk);
        let mut start = 0;
        while let Some(rel) = self.line[scan..].iter().position(|b| *b == b'\n') {
            let end = scan + rel;
            let raw = &self.line[start..end];
            let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
            let text = String::from_utf8_lossy(raw).into_owned();
            start = end + 1;
            scan = start;

            if let Some(frame) = self.process_line(&text) {
                let done = frame.is_done();
                frames.push(frame);
                if done {
                    self.terminate();
                    return Ok(frames);
                }
            }
            if self.data.len() > self.max_frame_bytes {
                return Err(self.oversized("frame data"));
            }
        }
        self.line.drain(..start);

        if self.line.len() > self.max_frame_bytes {
            return Err(self.oversized("unterminated line"));
        }
        if !self.line.is_empty() {
            self.state = ParserState::AccumulatingLine;
        }
        Ok(frames)
    }

    fn oversized(&mut self, what: &str) -> Error {
        let limit = self.max_frame_bytes;
        self.terminate();
        Error::protocol_with_context(
            format!("SSE {} exceeds {} bytes", what, limit),
            ErrorContext::new().with_source("sse_frame_parser"),
        )
    }

    /// End of input: interpret a trailing unterminated line and dispatch a
    /// frame that was never closed by a blank line.
    pub fn finish(&mut self) -> Option<SseFrame> {
        if self.terminated {
            return None;
        }
        let mut out = None;
        if !self.line.is_empty() {
            let raw = std::mem::take(&mut self.line);
            let raw = raw.strip_suffix(b"\r").unwrap_or(&raw);
            let text = String::from_utf8_lossy(raw).into_owned();
            out = self.process_line(&text);
        }
        if out.is_none() {
            out = self.dispatch();
        }
        self.terminate();
        out
    }

    fn terminate(&mut self) {
        self.terminated = true;
        self.line.clear();
        self.event = None;
        self.data.clear();
        self.has_data = false;
        self.state = ParserState::FrameComplete;
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        if !self.has_data && self.event.is_none() {
            self.state = ParserState::AwaitingFrame;
            return None;
        }
        let frame = SseFrame {
            event: self.event.take(),
            data: std::mem::take(&mut self.data),
            id: self.id.clone(),
        };
        self.has_data = false;
        self.state = ParserState::FrameComplete;
        Some(frame)
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        self.state = ParserState::AccumulatingLine;

        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.find(':') {
            Some(idx) => {
                let value = &line[idx + 1..];
                (&line[..idx], value.strip_prefix(' ').unwrap_or(value))
            }
            None => (line, ""),
        };

        match field {
            "data" => {
                if self.has_data {
                    self.data.push('\n');
                }
                self.data.push_str(value);
                self.has_data = true;
                // The sentinel ends the stream immediately; no blank line is awaited.
                if value.trim() == DONE_SENTINEL && self.data.trim() == DONE_SENTINEL {
                    return self.dispatch();
                }
            }
            "event" => self.event = Some(value.to_string()),
            "id" => self.id = Some(value.to_string()),
            "retry" => {}
            other => {
                debug!(field = other, "skipping unrecognized SSE line");
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_all(input: &[u8]) -> Vec<SseFrame> {
        let mut p = SseFrameParser::new();
        let mut frames = p.push(input).unwrap();
        frames.extend(p.finish());
        frames
    }

    #[test]
    fn splits_frames_on_blank_lines() {
        let frames = parse_all(b"data: a\n\ndata: b\n\n");
        assert_eq!(frames, vec![SseFrame::data("a"), SseFrame::data("b")]);
    }

    #[test]
    fn crlf_frames() {
        let frames = parse_all(b"event: ping\r\ndata: {}\r\n\r\n");
        assert_eq!(frames, vec![SseFrame::with_event("ping", "{}")]);
    }

    #[test]
    fn multiple_data_lines_join_with_newline() {
        let frames = parse_all(b"data: one\ndata: two\n\n");
        assert_eq!(frames[0].data, "one\ntwo");
    }

    #[test]
    fn partial_line_waits_for_terminator() {
        let mut p = SseFrameParser::new();
        assert!(p.push(b"data: hel").unwrap().is_empty());
        assert_eq!(p.state(), ParserState::AccumulatingLine);
        assert!(p.push(b"lo\n").unwrap().is_empty());
        let frames = p.push(b"\n").unwrap();
        assert_eq!(frames, vec![SseFrame::data("hello")]);
        assert_eq!(p.state(), ParserState::FrameComplete);
    }

    #[test]
    fn done_sentinel_terminates() {
        let mut p = SseFrameParser::new();
        let frames = p.push(b"data: x\n\ndata: [DONE]\n\ndata: late\n\n").unwrap();
        assert_eq!(frames.len(), 2);
        assert!(frames[1].is_done());
        assert!(p.is_terminated());
        assert!(p.push(b"data: more\n\n").unwrap().is_empty());
        assert!(p.finish().is_none());
    }

    #[test]
    fn comments_and_unknown_fields_are_ignored() {
        let frames = parse_all(b": keep-alive\nfoo: bar\nretry: 10\ndata: ok\n\n");
        assert_eq!(frames, vec![SseFrame::data("ok")]);
    }

    #[test]
    fn empty_data_payload_is_a_frame() {
        let frames = parse_all(b"data:\n\n");
        assert_eq!(frames, vec![SseFrame::data("")]);
    }

    #[test]
    fn blank_lines_without_fields_emit_nothing() {
        let mut p = SseFrameParser::new();
        assert!(p.push(b"\n\n\n").unwrap().is_empty());
        assert_eq!(p.state(), ParserState::AwaitingFrame);
    }

    #[test]
    fn unterminated_tail_is_flushed_on_finish() {
        let mut p = SseFrameParser::new();
        assert!(p.push(b"data: tail").unwrap().is_empty());
        assert_eq!(p.finish(), Some(SseFrame::data("tail")));
    }

    #[test]
    fn multibyte_character_split_across_chunks() {
        let input = "data: héllo\n\n".as_bytes();
        let split = input.iter().position(|b| *b == 0xC3).unwrap() + 1;
        let mut p = SseFrameParser::new();
        let mut frames = p.push(&input[..split]).unwrap();
        frames.extend(p.push(&input[split..]).unwrap());
        assert_eq!(frames, vec![SseFrame::data("héllo")]);
    }

    #[test]
    fn chunking_invariance_at_every_offset() {
        let input: &[u8] = b"event: message_start\ndata: {\"a\":1}\n\n: c\r\ndata: x\r\ndata: y\r\n\r\ndata: [DONE]\n\n";
        let expected = parse_all(input);
        assert_eq!(expected.len(), 3);

        for cut in 0..=input.len() {
            let mut p = SseFrameParser::new();
            let mut frames = p.push(&input[..cut]).unwrap();
            frames.extend(p.push(&input[cut..]).unwrap());
            frames.extend(p.finish());
            assert_eq!(frames, expected, "split at byte {}", cut);
        }

        for size in 1..8 {
            let mut p = SseFrameParser::new();
            let mut frames = Vec::new();
            for piece in input.chunks(size) {
                frames.extend(p.push(piece).unwrap());
            }
            frames.extend(p.finish());
            assert_eq!(frames, expected, "chunk size {}", size);
        }
    }

    #[test]
    fn oversized_unterminated_line_is_rejected() {
        let mut p = SseFrameParser::with_max_frame_bytes(16);
        assert!(p.push(b"data: 0123456").unwrap().is_empty());
        let err = p.push(b"789abcdef").unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Protocol);
        assert!(err.to_string().contains("exceeds 16 bytes"), "{}", err);
        assert!(p.is_terminated());
        assert_eq!(p.buffered_len(), 0);
        assert!(p.push(b"\n\n").unwrap().is_empty());
    }

    #[test]
    fn oversized_multi_line_frame_is_rejected() {
        let mut p = SseFrameParser::with_max_frame_bytes(8);
        let err = p.push(b"data: 12345\ndata: 6789\n").unwrap_err();
        assert!(err.to_string().contains("frame data"), "{}", err);
    }

    #[test]
    fn lines_at_the_limit_are_accepted() {
        let mut p = SseFrameParser::with_max_frame_bytes(8);
        let mut frames = p.push(b"data: ab").unwrap();
        frames.extend(p.push(b"\n\n").unwrap());
        assert_eq!(frames, vec![SseFrame::data("ab")]);
    }
}
