// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pure server-sent-events line/event parser (spec §4.4). Deliberately has
//! no knowledge of HTTP or `reqwest` — it only turns decoded text chunks
//! into `(event, data)` pairs, so it can be driven by any byte source
//! (a live stream in `runtime`, or a literal string in tests).

/// One decoded SSE frame: the `event:` name in effect and the JSON value
/// decoded from the paired `data:` line.
#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
    pub event: String,
    pub data: serde_json::Value,
}

/// Accumulates decoded text across chunk boundaries and yields complete
/// frames as they become available.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: String,
    current_event: Option<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next chunk of decoded text, returning every complete frame
    /// it produced. Unparseable `data:` lines are logged and skipped
    /// rather than treated as an error. Unrecognized events are logged and
    /// ignored. A line beginning `event:` updates the event name without
    /// itself producing a frame.
    pub fn feed(&mut self, chunk: &str) -> Vec<SseEvent> {
        self.buffer.push_str(chunk);
        let mut frames = Vec::new();

        loop {
            let Some(newline) = self.buffer.find('\n') else { break };
            let line = self.buffer[..newline].trim_end_matches('\r').to_owned();
            self.buffer.drain(..=newline);
            self.process_line(&line, &mut frames);
        }

        frames
    }

    fn process_line(&mut self, line: &str, frames: &mut Vec<SseEvent>) {
        if let Some(name) = line.strip_prefix("event: ").or_else(|| line.strip_prefix("event:")) {
            self.current_event = Some(name.trim().to_owned());
            return;
        }
        if let Some(payload) = line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:")) {
            let Some(event) = self.current_event.clone() else {
                tracing::debug!("SSE data line with no preceding event:, skipping");
                return;
            };
            match serde_json::from_str::<serde_json::Value>(payload) {
                Ok(data) => frames.push(SseEvent { event, data }),
                Err(err) => {
                    tracing::warn!(%err, "SSE data line failed to parse as JSON, skipping");
                }
            }
            return;
        }
        // Blank lines and any other SSE field (id:, retry:, comments) are
        // not meaningful to this protocol; ignore.
    }
}

#[cfg(test)]
#[path = "sse_tests.rs"]
mod tests;
