// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Monitor Loop: connects the transport, observes the coordination map,
//! and drives each claimed execution through its lifecycle (spec §4.5).
//!
//! Runs entirely on one `tokio::task::LocalSet`: the CRDT doc and runtime
//! client are `Rc`/`RefCell`-based (`yrs::Doc` is not `Send`), matching the
//! single-threaded cooperative model of spec §5. Each execution's drive is
//! its own `spawn_local` task so one execution's SSE read never blocks
//! another's, while the "processing" and "active executions" bookkeeping
//! stays owned by this single task runner, exactly as spec §5 requires.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::coordination::{
    ChangeAction, CoordinationProtocol, DisplayDatum, ExecutionStatus, ObserverHandle,
};
use crate::crdt::CrdtDoc;
use crate::document::DocumentWriter;
use crate::error::MonitorError;
use crate::runtime::{ExecuteOutcome, RuntimeCallbacks, RuntimeClient, RuntimeDisplay};
use crate::terminal::TerminalProjector;
use crate::transport::{SyncHandle, SyncProvider};

const OUTPUT_BLOCK_POLL_ATTEMPTS: u32 = 50;
const OUTPUT_BLOCK_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Drives one monitor process's side of the coordination protocol.
pub struct MonitorLoop {
    doc: CrdtDoc,
    coordination: CoordinationProtocol,
    runtime: Rc<RuntimeClient>,
    provider: Arc<SyncProvider>,
    processing: Rc<RefCell<HashSet<String>>>,
    sync_handle: Option<SyncHandle>,
    observer: Option<ObserverHandle>,
    connect_cancel: CancellationToken,
}

impl MonitorLoop {
    pub fn new(provider: Arc<SyncProvider>, config: Config) -> Self {
        let doc = CrdtDoc::new();
        let coordination = CoordinationProtocol::new(doc.clone(), config.name);
        Self {
            doc,
            coordination,
            runtime: Rc::new(RuntimeClient::new()),
            provider,
            processing: Rc::new(RefCell::new(HashSet::new())),
            sync_handle: None,
            observer: None,
            connect_cancel: CancellationToken::new(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.sync_handle.as_ref().is_some_and(|handle| handle.is_synced())
    }

    pub fn active_executions(&self) -> usize {
        self.runtime.active_count()
    }

    /// Establish transport, wait for the first sync, install the
    /// coordination observer, and scan existing records for work.
    pub async fn connect(&mut self) -> Result<(), MonitorError> {
        let handle = self.provider.run(self.doc.clone(), self.connect_cancel.clone()).await?;
        handle.wait_synced().await;
        self.sync_handle = Some(handle);

        self.observer = Some(self.install_observer());
        self.reconcile_existing_records();
        Ok(())
    }

    /// Cancel all in-flight executions, tear down the observer, and close
    /// the transport connection.
    pub async fn disconnect(&mut self) {
        self.runtime.cancel_all();
        self.observer = None;
        if let Some(handle) = self.sync_handle.take() {
            handle.disconnect();
        }
    }

    fn install_observer(&self) -> ObserverHandle {
        let coordination = self.coordination.clone();
        let runtime = self.runtime.clone();
        let doc = self.doc.clone();
        let processing = self.processing.clone();
        let self_id = self.coordination.self_id().to_owned();

        self.coordination.observe(move |exec_id, record, action| {
            if action == ChangeAction::Delete {
                return;
            }
            let Some(record) = record else { return };

            match record.status {
                ExecutionStatus::Requested => {
                    try_claim(&coordination, &processing, exec_id);
                }
                ExecutionStatus::Ready if record.claimed_by.as_deref() == Some(self_id.as_str()) => {
                    if !runtime.is_active(exec_id) {
                        begin_execution(
                            coordination.clone(),
                            runtime.clone(),
                            doc.clone(),
                            processing.clone(),
                            exec_id.to_owned(),
                        );
                    }
                }
                ExecutionStatus::Cancelled if record.claimed_by.as_deref() == Some(self_id.as_str()) => {
                    runtime.cancel(exec_id);
                }
                _ => {}
            }

            if record.claimed_by.as_deref() == Some(self_id.as_str()) {
                if let Some(response) = record.stdin_response.clone() {
                    forward_stdin(
                        coordination.clone(),
                        runtime.clone(),
                        exec_id.to_owned(),
                        record.runtime_url.clone(),
                        record.session.clone(),
                        response.text,
                    );
                }
            }
        })
    }

    /// Startup reconciliation (spec §4.5): claim any still-`requested`
    /// record, resume driving any `ready` record already claimed by us.
    /// `running` records left by a crashed prior instance are not resumed.
    fn reconcile_existing_records(&self) {
        for record in self.coordination.get_executions_by_status(ExecutionStatus::Requested) {
            try_claim(&self.coordination, &self.processing, &record.id);
        }
        for record in self.coordination.get_executions_by_status(ExecutionStatus::Ready) {
            if record.claimed_by.as_deref() == Some(self.coordination.self_id())
                && !self.runtime.is_active(&record.id)
            {
                begin_execution(
                    self.coordination.clone(),
                    self.runtime.clone(),
                    self.doc.clone(),
                    self.processing.clone(),
                    record.id,
                );
            }
        }
    }
}

fn try_claim(
    coordination: &CoordinationProtocol,
    processing: &Rc<RefCell<HashSet<String>>>,
    exec_id: &str,
) {
    if !processing.borrow_mut().insert(exec_id.to_owned()) {
        return;
    }
    coordination.claim_execution(exec_id);
    processing.borrow_mut().remove(exec_id);
}

fn forward_stdin(
    coordination: CoordinationProtocol,
    runtime: Rc<RuntimeClient>,
    exec_id: String,
    runtime_url: String,
    session: String,
    text: String,
) {
    tokio::task::spawn_local(async move {
        let _ = runtime.send_input(&runtime_url, &session, &exec_id, &text).await;
        coordination.clear_stdin_request(&exec_id);
    });
}

fn begin_execution(
    coordination: CoordinationProtocol,
    runtime: Rc<RuntimeClient>,
    doc: CrdtDoc,
    processing: Rc<RefCell<HashSet<String>>>,
    exec_id: String,
) {
    if !processing.borrow_mut().insert(exec_id.clone()) {
        return;
    }
    tokio::task::spawn_local(async move {
        drive_execution(&coordination, &runtime, &doc, &exec_id).await;
        processing.borrow_mut().remove(&exec_id);
    });
}

async fn drive_execution(
    coordination: &CoordinationProtocol,
    runtime: &Rc<RuntimeClient>,
    doc: &CrdtDoc,
    exec_id: &str,
) {
    let Some(record) = coordination.get_execution(exec_id) else { return };

    let writer = DocumentWriter::new(doc.output());
    let mut block_found = writer.has_output_block(exec_id);
    for _ in 0..OUTPUT_BLOCK_POLL_ATTEMPTS {
        if block_found {
            break;
        }
        tokio::time::sleep(OUTPUT_BLOCK_POLL_INTERVAL).await;
        block_found = writer.has_output_block(exec_id);
    }
    if !block_found {
        coordination.set_error(
            exec_id,
            MonitorError::sync(format!("output block for {exec_id} never appeared")),
        );
        return;
    }

    coordination.set_running(exec_id);

    let projector = Rc::new(RefCell::new(TerminalProjector::new()));
    let callbacks = build_callbacks(coordination.clone(), doc.clone(), exec_id.to_owned(), projector);

    let outcome = runtime
        .execute(&record.runtime_url, &record.code, &record.session, exec_id, callbacks)
        .await;

    // The streaming callbacks below already drive most executions to a
    // terminal status; these are a safety net for the cases they don't
    // (no `result` event before `done`, or a connection drop with no
    // fired `error`). `set_completed`/`set_error`/`cancel` are no-ops once
    // terminal, so this is idempotent either way.
    match outcome {
        ExecuteOutcome::Completed(result) => {
            coordination.set_completed(exec_id, result, Vec::new());
        }
        ExecuteOutcome::Error(error) => {
            coordination.set_error(exec_id, error);
        }
        ExecuteOutcome::Aborted => {
            coordination.cancel(exec_id);
        }
    }
}

fn build_callbacks(
    coordination: CoordinationProtocol,
    doc: CrdtDoc,
    exec_id: String,
    projector: Rc<RefCell<TerminalProjector>>,
) -> RuntimeCallbacks {
    let on_stdout = {
        let doc = doc.clone();
        let exec_id = exec_id.clone();
        let projector = projector.clone();
        Box::new(move |chunk: &str, _acc: &str| project_chunk(&doc, &exec_id, &projector, chunk))
    };
    let on_stderr = {
        let doc = doc.clone();
        let exec_id = exec_id.clone();
        let projector = projector.clone();
        Box::new(move |chunk: &str, _acc: &str| project_chunk(&doc, &exec_id, &projector, chunk))
    };
    let on_stdin_request = {
        let coordination = coordination.clone();
        let exec_id = exec_id.clone();
        Box::new(move |prompt: crate::runtime::StdinPrompt| {
            coordination.request_stdin(&exec_id, prompt.prompt, prompt.password);
        })
    };
    let on_display = {
        let coordination = coordination.clone();
        let exec_id = exec_id.clone();
        Box::new(move |display: RuntimeDisplay| {
            coordination.add_display_data(
                &exec_id,
                DisplayDatum {
                    mime_type: display.mime_type,
                    data: display.data,
                    asset_id: display.asset_id,
                    url: display.url,
                },
            );
        })
    };
    let on_result = {
        let coordination = coordination.clone();
        let exec_id = exec_id.clone();
        Box::new(move |value: serde_json::Value| {
            coordination.set_completed(&exec_id, Some(value), Vec::new());
        })
    };
    let on_error = {
        let coordination = coordination.clone();
        let exec_id = exec_id.clone();
        Box::new(move |error: MonitorError| {
            coordination.set_error(&exec_id, error);
        })
    };

    RuntimeCallbacks {
        on_start: None,
        on_stdout: Some(on_stdout),
        on_stderr: Some(on_stderr),
        on_stdin_request: Some(on_stdin_request),
        on_display: Some(on_display),
        on_result: Some(on_result),
        on_error: Some(on_error),
        on_done: None,
    }
}

/// Feed a stdout/stderr chunk to the shared projector and publish the new
/// projection. A trailing newline is appended before `replaceOutput`:
/// without it, the next `find_output_block` scan could mistake a closing
/// fence that now starts mid-line for ordinary content (see `document.rs`).
fn project_chunk(doc: &CrdtDoc, exec_id: &str, projector: &Rc<RefCell<TerminalProjector>>, chunk: &str) {
    projector.borrow_mut().write(chunk);
    let snapshot = projector.borrow().snapshot();
    let writer = DocumentWriter::new(doc.output());
    writer.replace_output(exec_id, &format!("{snapshot}\n"));
}

#[cfg(test)]
#[path = "monitor_loop_tests.rs"]
mod tests;
