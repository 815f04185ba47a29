//! NDJSON record decoding for streamed chat answers
//!
//! The backend writes one JSON object per line:
//! `{"status": "Searching 10-K", "step": 3}`, `{"answer": "..."}`, or
//! `{"status": "Error", "step": 5, "error": "..."}` on failure.
//! Network chunks split those lines at arbitrary byte offsets, so the
//! decoder keeps the unterminated tail until the next chunk arrives.

use serde::Deserialize;

/// One decoded line of the answer stream
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct StreamRecord {
    /// Fragment of the answer text
    #[serde(default)]
    pub answer: Option<String>,
    /// Pipeline step indicator (1..=5)
    #[serde(default)]
    pub step: Option<u8>,
    /// Human-readable step label
    #[serde(default)]
    pub status: Option<String>,
    /// Backend-side failure message
    #[serde(default)]
    pub error: Option<String>,
}

/// Longest line kept while waiting for its newline
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Incremental newline-delimited JSON decoder
#[derive(Debug)]
pub struct RecordDecoder {
    tail: Vec<u8>,
    malformed: usize,
    max_line: usize,
    /// Skipping the rest of an oversized line up to its newline
    discarding: bool,
}

impl Default for RecordDecoder {
    fn default() -> Self {
        Self::with_max_line(MAX_LINE_BYTES)
    }
}

impl RecordDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decoder that drops unterminated lines longer than `max_line` bytes
    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            tail: Vec::new(),
            malformed: 0,
            max_line: max_line.max(1),
            discarding: false,
        }
    }

    /// Feed one network chunk and return every record completed by it.
    /// Malformed and oversized lines are logged and skipped.
    pub fn push(&mut self, mut chunk: &[u8]) -> Vec<StreamRecord> {
        if self.discarding {
            match chunk.iter().position(|b| *b == b'\n') {
                Some(end) => {
                    self.discarding = false;
                    chunk = &chunk[end + 1..];
                }
                None => return Vec::new(),
            }
        }
        self.tail.extend_from_slice(chunk);

        let records = match self.tail.iter().rposition(|b| *b == b'\n') {
            Some(last_newline) => {
                let rest = self.tail.split_off(last_newline + 1);
                let complete = std::mem::replace(&mut self.tail, rest);
                complete
                    .split(|b| *b == b'\n')
                    .filter_map(|line| self.decode_line(line))
                    .collect()
            }
            None => Vec::new(),
        };

        if self.tail.len() > self.max_line {
            self.malformed += 1;
            log::error!(
                "Dropping stream line longer than {} bytes without a newline",
                self.max_line
            );
            self.tail.clear();
            self.discarding = true;
        }
        records
    }

    /// Decode whatever is left once the stream has ended. The final record
    /// is not required to be newline-terminated.
    pub fn finish(&mut self) -> Vec<StreamRecord> {
        self.discarding = false;
        let tail = std::mem::take(&mut self.tail);
        self.decode_line(&tail).into_iter().collect()
    }

    /// Number of lines skipped because they were not valid records
    pub fn malformed_count(&self) -> usize {
        self.malformed
    }

    fn decode_line(&mut self, line: &[u8]) -> Option<StreamRecord> {
        let line = trim_line(line);
        if line.is_empty() {
            return None;
        }

        match serde_json::from_slice::<StreamRecord>(line) {
            Ok(record) => Some(record),
            Err(e) => {
                self.malformed += 1;
                log::error!(
                    "Error parsing stream record: {} (line: {})",
                    e,
                    String::from_utf8_lossy(line)
                );
                None
            }
        }
    }
}

fn trim_line(line: &[u8]) -> &[u8] {
    let start = line
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(line.len());
    let end = line
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &line[start..end]
}
