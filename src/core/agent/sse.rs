//! Minimal line-oriented SSE accumulator.
//!
//! The agent stream is the only client of this protocol, so there is no
//! need for a full framework: accumulate `data:` lines until a blank line
//! terminates the event, ignore comments and other fields. Malformed frames
//! are the *caller's* problem to skip; the parser never fails.

/// Accumulates one event's `data:` payload at a time.
#[derive(Debug, Default)]
pub struct SseParser {
    data: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line (newline already stripped). Returns the joined payload
    /// when a blank line closes a non-empty event.
    pub fn push_line(&mut self, line: &str) -> Option<String> {
        let line = line.trim_end_matches('\r');

        if line.is_empty() {
            if self.data.is_empty() {
                return None;
            }
            return Some(self.data.drain(..).collect::<Vec<_>>().join("\n"));
        }

        // Comment lines start with a bare colon.
        if line.starts_with(':') {
            return None;
        }

        if let Some(value) = line.strip_prefix("data:") {
            self.data.push(value.strip_prefix(' ').unwrap_or(value).to_string());
        }
        // Other fields (event:, id:, retry:) are irrelevant to this stream.

        None
    }
}
