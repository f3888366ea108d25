// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

use serde::{Deserialize, Serialize};

/// Error kinds surfaced through `ExecutionRecord.error` or a runtime
/// callback (spec §7).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MonitorError {
    /// Transport to the runtime failed or returned a non-2xx status.
    ConnectionError { message: String },
    /// The browser's output region never converged within the poll window.
    SyncError { message: String },
    /// Unexpected failure inside the execution drive loop.
    MonitorError { message: String },
    /// Local cancellation; recorded in a return value, not written into the
    /// shared record unless the caller explicitly does so.
    Aborted { message: String },
    /// Surfaced verbatim from the runtime's `error` event.
    RuntimeReported {
        #[serde(rename = "type")]
        kind: String,
        message: String,
        #[serde(flatten)]
        extra: serde_json::Map<String, serde_json::Value>,
    },
}

impl MonitorError {
    pub fn connection(message: impl Into<String>) -> Self {
        Self::ConnectionError { message: message.into() }
    }

    pub fn sync(message: impl Into<String>) -> Self {
        Self::SyncError { message: message.into() }
    }

    pub fn monitor(message: impl Into<String>) -> Self {
        Self::MonitorError { message: message.into() }
    }

    pub fn aborted(message: impl Into<String>) -> Self {
        Self::Aborted { message: message.into() }
    }

    /// Machine-readable kind string, matching the `type` discriminant used
    /// on the wire (`ConnectionError`, `SyncError`, `MonitorError`,
    /// `Aborted`, or the runtime-reported type verbatim).
    pub fn kind(&self) -> &str {
        match self {
            Self::ConnectionError { .. } => "ConnectionError",
            Self::SyncError { .. } => "SyncError",
            Self::MonitorError { .. } => "MonitorError",
            Self::Aborted { .. } => "Aborted",
            Self::RuntimeReported { kind, .. } => kind,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::ConnectionError { message }
            | Self::SyncError { message }
            | Self::MonitorError { message }
            | Self::Aborted { message }
            | Self::RuntimeReported { message, .. } => message,
        }
    }

    /// Build a `RuntimeReported` error from an arbitrary JSON payload
    /// received on the runtime's `error` SSE event.
    pub fn from_runtime_payload(value: serde_json::Value) -> Self {
        let mut obj = match value {
            serde_json::Value::Object(obj) => obj,
            other => {
                let mut obj = serde_json::Map::new();
                obj.insert("value".to_owned(), other);
                obj
            }
        };
        let kind = obj
            .remove("type")
            .and_then(|v| v.as_str().map(str::to_owned))
            .unwrap_or_else(|| "RuntimeError".to_owned());
        let message = obj
            .remove("message")
            .and_then(|v| v.as_str().map(str::to_owned))
            .unwrap_or_else(|| "runtime reported an error".to_owned());
        Self::RuntimeReported { kind, message, extra: obj }
    }
}

impl fmt::Display for MonitorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind(), self.message())
    }
}

impl std::error::Error for MonitorError {}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
