//! Minimal server-sent-events line framing over a byte stream

use bytes::BytesMut;

/// One decoded `data:` payload
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum SseData {
    /// Terminal `[DONE]` marker
    Done,
    /// Raw payload text of one data line
    Payload(String),
}

/// Incremental SSE line buffer.
///
/// Feed raw response chunks with `push`; drain complete `data:` lines with
/// `next_data`. Comments, event names and blank keep-alive lines are skipped.
#[derive(Debug, Default)]
pub(crate) struct SseLineBuffer {
    buf: BytesMut,
}

impl SseLineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    pub fn next_data(&mut self) -> Option<SseData> {
        loop {
            let line_end = self.buf.iter().position(|&b| b == b'\n')? + 1;
            let line = self.buf.split_to(line_end);
            let text = String::from_utf8_lossy(&line);
            let trimmed = text.trim();

            if trimmed.is_empty() || trimmed.starts_with(':') {
                continue;
            }

            if let Some(data) = trimmed.strip_prefix("data:") {
                let data = data.trim();
                if data == "[DONE]" {
                    return Some(SseData::Done);
                }
                return Some(SseData::Payload(data.to_string()));
            }

            // event:/id:/retry: fields carry nothing we need
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_data_line() {
        let mut buf = SseLineBuffer::new();
        buf.push(b"data: {\"token\":\"hi\"}\n\n");
        assert_eq!(
            buf.next_data(),
            Some(SseData::Payload("{\"token\":\"hi\"}".to_string()))
        );
        assert_eq!(buf.next_data(), None);
    }

    #[test]
    fn test_split_across_chunks() {
        let mut buf = SseLineBuffer::new();
        buf.push(b"data: {\"to");
        assert_eq!(buf.next_data(), None);
        buf.push(b"ken\":\"a\"}\n");
        assert_eq!(
            buf.next_data(),
            Some(SseData::Payload("{\"token\":\"a\"}".to_string()))
        );
    }

    #[test]
    fn test_done_marker() {
        let mut buf = SseLineBuffer::new();
        buf.push(b"data: [DONE]\n");
        assert_eq!(buf.next_data(), Some(SseData::Done));
    }

    #[test]
    fn test_skips_comments_and_events() {
        let mut buf = SseLineBuffer::new();
        buf.push(b": keep-alive\nevent: token\ndata: x\n");
        assert_eq!(buf.next_data(), Some(SseData::Payload("x".to_string())));
    }

    #[test]
    fn test_multiple_lines_in_one_chunk() {
        let mut buf = SseLineBuffer::new();
        buf.push(b"data: a\n\ndata: b\n\ndata: [DONE]\n");
        assert_eq!(buf.next_data(), Some(SseData::Payload("a".to_string())));
        assert_eq!(buf.next_data(), Some(SseData::Payload("b".to_string())));
        assert_eq!(buf.next_data(), Some(SseData::Done));
    }
}
