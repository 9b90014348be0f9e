//! Incremental decoder for `text/event-stream` bodies.
//!
//! Chat-completion APIs (and the coach endpoint itself) emit one JSON payload
//! per `data:` line. The decoder works line by line, so it accepts both the
//! blank-line separated framing of the SSE standard and the bare
//! newline-delimited framing some providers use. It handles:
//! - frames split across network chunks
//! - many frames in one chunk
//! - UTF-8 sequences split across chunk boundaries
//! - comment (`:`), `event:`, `id:` and `retry:` lines, which are ignored

/// Buffers partial lines between reads and yields complete `data:` payloads.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: String,
    incomplete_utf8: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds raw bytes and returns the payload of every complete `data:` line.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.append_utf8(chunk);

        let mut payloads = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            if let Some(data) = parse_data_line(&line) {
                payloads.push(data);
            }
        }
        payloads
    }

    /// Flushes a trailing line that arrived without a newline before EOF.
    pub fn finish(&mut self) -> Option<String> {
        self.incomplete_utf8.clear();
        let rest = std::mem::take(&mut self.buffer);
        parse_data_line(&rest)
    }

    /// Data buffered while waiting for the rest of a line.
    pub fn remaining_buffer(&self) -> &str {
        &self.buffer
    }

    fn append_utf8(&mut self, chunk: &[u8]) {
        let mut bytes = std::mem::take(&mut self.incomplete_utf8);
        bytes.extend_from_slice(chunk);

        let mut rest: &[u8] = &bytes;
        loop {
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    self.buffer.push_str(text);
                    return;
                }
                Err(err) => {
                    let (valid, after) = rest.split_at(err.valid_up_to());
                    self.buffer.push_str(&String::from_utf8_lossy(valid));
                    match err.error_len() {
                        // Truncated multi-byte sequence: wait for the next chunk.
                        None => {
                            self.incomplete_utf8 = after.to_vec();
                            return;
                        }
                        Some(len) => {
                            tracing::warn!(invalid_bytes = len, "invalid UTF-8 in event stream");
                            self.buffer.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                    }
                }
            }
        }
    }
}

fn parse_data_line(line: &str) -> Option<String> {
    let line = line.trim_end_matches(['\n', '\r']);
    let data = line.strip_prefix("data:")?;
    let data = data.strip_prefix(' ').unwrap_or(data);
    if data.trim().is_empty() {
        return None;
    }
    Some(data.to_string())
}
