//! SSE stream observation for OpenAI-compatible streaming responses.
//!
//! [`SseObserver`] reassembles `data:` lines across TCP chunk boundaries and
//! pulls out `choices[0].delta.content` fragments, the finish_reason, and the
//! `[DONE]` sentinel.

/// Unterminated lines longer than this are dropped.
const MAX_LINE_BUFFER: usize = 64 * 1024;

/// Summary of a stream observed to its end.
#[derive(Debug, Clone, Default)]
pub struct StreamResult {
    /// The finish_reason from the last chunk with a non-null finish_reason.
    pub finish_reason: Option<String>,
    /// Whether `data: [DONE]` was received.
    pub done_received: bool,
    /// Message of an in-band `{"error": ...}` payload, if one arrived.
    pub error: Option<String>,
}

impl StreamResult {
    /// A stream is complete when the upstream said so, either way.
    pub fn is_complete(&self) -> bool {
        self.done_received || self.finish_reason.is_some()
    }
}

pub(crate) struct SseObserver {
    buffer: Vec<u8>,
    result: StreamResult,
}

impl SseObserver {
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            result: StreamResult::default(),
        }
    }

    /// Feed raw bytes; returns the text fragments completed by this chunk.
    pub fn process_chunk(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut fragments = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(fragment) = self.process_line(&line) {
                fragments.push(fragment);
            }
        }

        if self.buffer.len() > MAX_LINE_BUFFER {
            tracing::warn!(
                buffered = self.buffer.len(),
                "SSE line exceeded buffer cap, discarding"
            );
            self.buffer.clear();
        }

        fragments
    }

    /// Flush the trailing partial line and return what it held plus the summary.
    pub fn finish(mut self) -> (Vec<String>, StreamResult) {
        let mut fragments = Vec::new();
        if !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            if let Some(fragment) = self.process_line(&line) {
                fragments.push(fragment);
            }
        }
        (fragments, self.result)
    }

    fn process_line(&mut self, raw: &[u8]) -> Option<String> {
        let line = String::from_utf8_lossy(raw);
        let line = line.trim_end_matches(['\r', '\n']);

        // event:, id:, retry: and comments carry nothing we need
        let data = line.strip_prefix("data:")?;
        let data = data.strip_prefix(' ').unwrap_or(data);
        self.process_data(data)
    }

    fn process_data(&mut self, data: &str) -> Option<String> {
        if data.trim() == "[DONE]" {
            self.result.done_received = true;
            return None;
        }

        let parsed: serde_json::Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(error = %e, "Skipping malformed SSE data line");
                return None;
            }
        };

        if let Some(err) = parsed.get("error").filter(|e| !e.is_null()) {
            let message = err
                .get("message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| err.to_string());
            self.result.error = Some(message);
            return None;
        }

        let choice = parsed.get("choices").and_then(|c| c.get(0))?;

        if let Some(reason) = choice.get("finish_reason").and_then(|r| r.as_str()) {
            self.result.finish_reason = Some(reason.to_string());
        }

        choice
            .get("delta")
            .and_then(|d| d.get("content"))
            .and_then(|c| c.as_str())
            .filter(|c| !c.is_empty())
            .map(str::to_string)
    }
}
