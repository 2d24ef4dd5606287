//! Newline framing and record decoding for the worker's event stream.

use serde_json::Value;
use thiserror::Error;
use tokio::time::Instant;
use tracing::warn;

/// Marker the worker prints on stdout when the socket path is not used.
pub const STDOUT_GESTURE_TAG: &str = "[GESTURE]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSource {
    Socket,
    Stdout,
    Injected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GestureEvent {
    pub gesture_id: String,
    pub received_at: Instant,
    pub source: EventSource,
}

impl GestureEvent {
    pub fn new(gesture_id: impl Into<String>, source: EventSource) -> Self {
        Self {
            gesture_id: gesture_id.into(),
            received_at: Instant::now(),
            source,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IngestError {
    #[error("malformed event `{line}`: {reason}")]
    MalformedEvent { line: String, reason: String },
}

/// Longest unterminated fragment held between reads.
pub const MAX_PENDING_BYTES: usize = 64 * 1024;

const PREVIEW_BYTES: usize = 64;

/// Splits a byte stream on `\n`, holding the unterminated tail for the next read.
/// A tail that outgrows the limit is reported once and dropped up to the next
/// delimiter.
#[derive(Debug)]
pub struct LineFramer {
    pending: Vec<u8>,
    limit: usize,
    discarding: bool,
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::with_limit(MAX_PENDING_BYTES)
    }
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            pending: Vec::new(),
            limit,
            discarding: false,
        }
    }

    pub fn push(&mut self, bytes: &[u8]) -> Vec<Result<String, IngestError>> {
        // Bytes already held were searched on an earlier push.
        let scanned = self.pending.len();
        self.pending.extend_from_slice(bytes);
        let delimiters: Vec<usize> = self.pending[scanned..]
            .iter()
            .enumerate()
            .filter_map(|(offset, b)| (*b == b'\n').then_some(scanned + offset))
            .collect();

        let mut lines = Vec::with_capacity(delimiters.len());
        let mut start = 0;
        for end in delimiters {
            if self.discarding {
                self.discarding = false;
            } else {
                let line = String::from_utf8_lossy(&self.pending[start..end]);
                lines.push(Ok(line.trim_end_matches('\r').to_string()));
            }
            start = end + 1;
        }
        self.pending.drain(..start);

        if self.pending.len() > self.limit {
            if !self.discarding {
                let preview = &self.pending[..PREVIEW_BYTES.min(self.pending.len())];
                lines.push(Err(IngestError::MalformedEvent {
                    line: String::from_utf8_lossy(preview).into_owned(),
                    reason: format!("unterminated record exceeds {} bytes", self.limit),
                }));
                self.discarding = true;
            }
            self.pending.clear();
        }
        lines
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Decodes one complete line. `Ok(None)` means the record carries no usable
/// gesture and is dropped without complaint.
pub fn decode_record(line: &str) -> Result<Option<String>, IngestError> {
    let value: Value = serde_json::from_str(line).map_err(|err| IngestError::MalformedEvent {
        line: line.to_string(),
        reason: err.to_string(),
    })?;
    let gesture = value
        .get("gesture")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|gesture| !gesture.is_empty())
        .map(str::to_string);
    Ok(gesture)
}

/// Parses a `[GESTURE] <id>` stdout line.
pub fn parse_stdout_line(line: &str) -> Option<String> {
    line.trim()
        .strip_prefix(STDOUT_GESTURE_TAG)
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

/// Per-connection decoder: framing plus per-line decoding. A bad line is
/// logged and skipped; it never poisons the lines around it.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    framer: LineFramer,
    malformed: u64,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, bytes: &[u8]) -> Vec<GestureEvent> {
        let mut events = Vec::new();
        for line in self.framer.push(bytes) {
            let line = match line {
                Ok(line) if line.trim().is_empty() => continue,
                Ok(line) => line,
                Err(err) => {
                    self.malformed += 1;
                    warn!(error = %err, "dropping oversized event fragment");
                    continue;
                }
            };
            match decode_record(&line) {
                Ok(Some(gesture_id)) => {
                    events.push(GestureEvent::new(gesture_id, EventSource::Socket))
                }
                Ok(None) => {}
                Err(err) => {
                    self.malformed += 1;
                    warn!(error = %err, "dropping malformed event line");
                }
            }
        }
        events
    }

    pub fn malformed_count(&self) -> u64 {
        self.malformed
    }

    pub fn pending_len(&self) -> usize {
        self.framer.pending_len()
    }
}
