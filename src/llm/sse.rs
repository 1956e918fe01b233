//! Incremental server-sent-events decoder.
//!
//! Network chunks can end anywhere, including inside a multi-byte character,
//! so bytes are buffered until a full line is available.

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds raw bytes and returns every frame completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(bytes);
        let mut frames = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line).into_owned();
            if let Some(frame) = self.process_line(&line) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Flushes a trailing frame when the body ends without a blank line.
    pub fn finish(&mut self) -> Option<SseFrame> {
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&rest).trim_end_matches('\r').to_string();
            if let Some(frame) = self.process_line(&line) {
                return Some(frame);
            }
        }
        self.take_frame()
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.take_frame();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            _ => {}
        }
        None
    }

    fn take_frame(&mut self) -> Option<SseFrame> {
        if self.data.is_empty() && self.event.is_none() {
            return None;
        }
        let frame = SseFrame {
            event: self.event.take(),
            data: self.data.join("\n"),
        };
        self.data.clear();
        Some(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_split_across_chunks_are_reassembled() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"event: content_block_delta\nda").is_empty());
        let frames = decoder.push(b"ta: {\"a\":1}\n\nevent: ping\ndata: {}\n\n");

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].event.as_deref(), Some("content_block_delta"));
        assert_eq!(frames[0].data, "{\"a\":1}");
        assert_eq!(frames[1].event.as_deref(), Some("ping"));
    }

    #[test]
    fn multibyte_characters_split_mid_sequence_survive() {
        let payload = "data: 電源\n\n".as_bytes();
        let mut decoder = SseDecoder::new();
        let (head, tail) = payload.split_at(8);
        assert!(decoder.push(head).is_empty());
        let frames = decoder.push(tail);
        assert_eq!(frames[0].data, "電源");
    }

    #[test]
    fn crlf_comments_and_unterminated_tail() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.push(b": keep-alive\r\ndata: one\r\n\r\ndata: two");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "one");
        assert_eq!(decoder.finish().unwrap().data, "two");
        assert!(decoder.finish().is_none());
    }
}
