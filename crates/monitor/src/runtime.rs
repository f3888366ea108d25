// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Runtime Client: opens a streaming execution request against a remote
//! language runtime, decodes its server-sent-events response, and
//! dispatches typed callbacks (spec §4.4). Supports cancellation and the
//! two auxiliary endpoints (`/input`, `/interrupt`).

use std::cell::RefCell;
use std::collections::HashMap;
use std::time::Duration;

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::error::MonitorError;
use crate::sse::SseDecoder;

/// A runtime's request for a line of stdin.
#[derive(Debug, Clone, PartialEq)]
pub struct StdinPrompt {
    pub prompt: String,
    pub password: bool,
}

/// A rich-output payload emitted on a `display` or `asset` event.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeDisplay {
    pub mime_type: String,
    pub data: Option<serde_json::Value>,
    pub asset_id: Option<String>,
    pub url: Option<String>,
}

/// Typed callbacks invoked while driving one execution's SSE stream.
/// Single-threaded by design: the monitor loop runs on one cooperative
/// task runner, so these are plain `FnMut` rather than `Send` closures.
#[derive(Default)]
pub struct RuntimeCallbacks {
    pub on_start: Option<Box<dyn FnMut()>>,
    pub on_stdout: Option<Box<dyn FnMut(&str, &str)>>,
    pub on_stderr: Option<Box<dyn FnMut(&str, &str)>>,
    pub on_stdin_request: Option<Box<dyn FnMut(StdinPrompt)>>,
    pub on_display: Option<Box<dyn FnMut(RuntimeDisplay)>>,
    pub on_result: Option<Box<dyn FnMut(serde_json::Value)>>,
    pub on_error: Option<Box<dyn FnMut(MonitorError)>>,
    pub on_done: Option<Box<dyn FnMut()>>,
}

/// The terminal state of one `execute()` call.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecuteOutcome {
    Completed(Option<serde_json::Value>),
    Error(MonitorError),
    Aborted,
}

/// Drives streaming executions against runtimes and tracks which execution
/// ids are currently in flight so they can be cancelled.
pub struct RuntimeClient {
    http: reqwest::Client,
    cancellations: RefCell<HashMap<String, CancellationToken>>,
}

impl Default for RuntimeClient {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeClient {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { http, cancellations: RefCell::new(HashMap::new()) }
    }

    pub fn is_active(&self, exec_id: &str) -> bool {
        self.cancellations.borrow().contains_key(exec_id)
    }

    pub fn active_count(&self) -> usize {
        self.cancellations.borrow().len()
    }

    /// Abort the in-flight request registered under `exec_id`, if any.
    pub fn cancel(&self, exec_id: &str) -> bool {
        if let Some(token) = self.cancellations.borrow_mut().remove(exec_id) {
            token.cancel();
            true
        } else {
            false
        }
    }

    pub fn cancel_all(&self) {
        for (_, token) in self.cancellations.borrow_mut().drain() {
            token.cancel();
        }
    }

    /// Open `POST <runtime_url>/execute/stream`, decode the SSE response,
    /// and dispatch callbacks per spec §4.4's event table until `done` (or
    /// the stream closes, or `cancel(exec_id)` is called).
    pub async fn execute(
        &self,
        runtime_url: &str,
        code: &str,
        session: &str,
        exec_id: &str,
        mut callbacks: RuntimeCallbacks,
    ) -> ExecuteOutcome {
        let cancel = CancellationToken::new();
        self.cancellations.borrow_mut().insert(exec_id.to_owned(), cancel.clone());

        let outcome = tokio::select! {
            _ = cancel.cancelled() => ExecuteOutcome::Aborted,
            outcome = self.drive(runtime_url, code, session, &mut callbacks, &cancel) => outcome,
        };

        self.cancellations.borrow_mut().remove(exec_id);
        outcome
    }

    async fn drive(
        &self,
        runtime_url: &str,
        code: &str,
        session: &str,
        callbacks: &mut RuntimeCallbacks,
        cancel: &CancellationToken,
    ) -> ExecuteOutcome {
        let body = serde_json::json!({
            "code": code,
            "session": session,
            "storeHistory": true,
        });

        let response = match self
            .http
            .post(format!("{runtime_url}/execute/stream"))
            .json(&body)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(err) => {
                let error = MonitorError::connection(err.to_string());
                invoke(&mut callbacks.on_error, error.clone());
                return ExecuteOutcome::Error(error);
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let error = MonitorError::connection(format!("runtime returned HTTP {status}: {body}"));
            invoke(&mut callbacks.on_error, error.clone());
            return ExecuteOutcome::Error(error);
        }

        invoke_unit(&mut callbacks.on_start);

        let mut stream = response.bytes_stream();
        let mut decoder = SseDecoder::new();
        let mut stdout_acc = String::new();
        let mut stderr_acc = String::new();
        let mut final_result: Option<serde_json::Value> = None;

        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => return ExecuteOutcome::Aborted,
                chunk = stream.next() => chunk,
            };
            let Some(chunk) = chunk else { break };
            let bytes = match chunk {
                Ok(bytes) => bytes,
                Err(err) => {
                    let error = MonitorError::connection(err.to_string());
                    invoke(&mut callbacks.on_error, error.clone());
                    return ExecuteOutcome::Error(error);
                }
            };
            let text = String::from_utf8_lossy(&bytes);
            for frame in decoder.feed(&text) {
                match frame.event.as_str() {
                    "start" => invoke_unit(&mut callbacks.on_start),
                    "stdout" => {
                        if let Some(chunk) = frame.data.get("content").and_then(|v| v.as_str()) {
                            stdout_acc.push_str(chunk);
                            if let Some(cb) = callbacks.on_stdout.as_mut() {
                                cb(chunk, &stdout_acc);
                            }
                        }
                    }
                    "stderr" => {
                        if let Some(chunk) = frame.data.get("content").and_then(|v| v.as_str()) {
                            stderr_acc.push_str(chunk);
                            if let Some(cb) = callbacks.on_stderr.as_mut() {
                                cb(chunk, &stderr_acc);
                            }
                        }
                    }
                    "stdin_request" => {
                        let prompt = StdinPrompt {
                            prompt: frame
                                .data
                                .get("prompt")
                                .and_then(|v| v.as_str())
                                .unwrap_or_default()
                                .to_owned(),
                            password: frame
                                .data
                                .get("password")
                                .and_then(|v| v.as_bool())
                                .unwrap_or(false),
                        };
                        invoke(&mut callbacks.on_stdin_request, prompt);
                    }
                    "display" => {
                        let display = RuntimeDisplay {
                            mime_type: frame
                                .data
                                .get("mimeType")
                                .and_then(|v| v.as_str())
                                .unwrap_or_default()
                                .to_owned(),
                            data: frame.data.get("data").cloned(),
                            asset_id: None,
                            url: None,
                        };
                        invoke(&mut callbacks.on_display, display);
                    }
                    "asset" => {
                        let display = RuntimeDisplay {
                            mime_type: frame
                                .data
                                .get("mimeType")
                                .and_then(|v| v.as_str())
                                .unwrap_or_default()
                                .to_owned(),
                            data: None,
                            asset_id: frame
                                .data
                                .get("path")
                                .and_then(|v| v.as_str())
                                .map(str::to_owned),
                            url: frame.data.get("url").and_then(|v| v.as_str()).map(str::to_owned),
                        };
                        invoke(&mut callbacks.on_display, display);
                    }
                    "result" => {
                        final_result = Some(frame.data.clone());
                        invoke(&mut callbacks.on_result, frame.data);
                    }
                    "error" => {
                        let error = MonitorError::from_runtime_payload(frame.data);
                        invoke(&mut callbacks.on_error, error);
                    }
                    "done" => {
                        invoke_unit(&mut callbacks.on_done);
                        return ExecuteOutcome::Completed(final_result);
                    }
                    other => {
                        tracing::debug!(event = other, "unrecognized SSE event, ignoring");
                    }
                }
            }
        }

        invoke_unit(&mut callbacks.on_done);
        ExecuteOutcome::Completed(final_result)
    }

    pub async fn send_input(
        &self,
        runtime_url: &str,
        session: &str,
        exec_id: &str,
        text: &str,
    ) -> Result<serde_json::Value, MonitorError> {
        let body = serde_json::json!({ "session": session, "exec_id": exec_id, "text": text });
        self.post_json(runtime_url, "/input", &body).await
    }

    pub async fn interrupt(
        &self,
        runtime_url: &str,
        session: &str,
    ) -> Result<serde_json::Value, MonitorError> {
        let body = serde_json::json!({ "session": session });
        self.post_json(runtime_url, "/interrupt", &body).await
    }

    async fn post_json(
        &self,
        runtime_url: &str,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, MonitorError> {
        let resp = self
            .http
            .post(format!("{runtime_url}{path}"))
            .timeout(Duration::from_secs(10))
            .json(body)
            .send()
            .await
            .map_err(|err| MonitorError::connection(err.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(MonitorError::connection(format!("runtime returned HTTP {status}: {body}")));
        }
        resp.json().await.map_err(|err| MonitorError::connection(err.to_string()))
    }
}

fn invoke<T>(slot: &mut Option<Box<dyn FnMut(T)>>, arg: T) {
    if let Some(cb) = slot.as_mut() {
        cb(arg);
    }
}

fn invoke_unit(slot: &mut Option<Box<dyn FnMut()>>) {
    if let Some(cb) = slot.as_mut() {
        cb();
    }
}

#[cfg(test)]
#[path = "runtime_tests.rs"]
mod tests;
