// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Coordination Protocol: a typed view over the shared `executions` map
//! (spec §4.3). Implements the status state machine, claim arbitration via
//! guarded read-modify-write, the stdin request/response channel, and
//! change observation.
//!
//! Every non-creating write here is read-modify-write on the *whole*
//! record value (see `DESIGN.md` for why records are stored as JSON
//! strings rather than nested CRDT structures): the CRDT's last-writer-wins
//! resolves concurrent competing writes, so a caller must never treat its
//! own optimistic write as definitive — only a subsequent observed read
//! (via [`CoordinationProtocol::observe`] or
//! [`CoordinationProtocol::get_execution`]) confirms it survived
//! convergence.

use serde::{Deserialize, Serialize};
use yrs::types::map::{EntryChange, MapEvent};
use yrs::{Any, Map, MapRef, Observable, ReadTxn, TransactionMut, Value};

use crate::crdt::{CrdtDoc, LogicalPosition};
use crate::error::MonitorError;
use crate::execid;

/// Execution lifecycle status (spec §3/§4.3).
///
/// `requested -> claimed -> ready -> running -> {completed, error,
/// cancelled}`; `cancelled` may also be entered from `claimed`, `ready`, or
/// `running`. The three terminal states are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Requested,
    Claimed,
    Ready,
    Running,
    Completed,
    Error,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Cancelled)
    }
}

/// A pending stdin prompt, set by the monitor and cleared once answered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StdinRequest {
    pub prompt: String,
    #[serde(default)]
    pub password: bool,
    pub requested_at: u64,
}

/// The browser's answer to a [`StdinRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StdinResponse {
    pub text: String,
    pub responded_at: u64,
}

/// One rich-output item, appended to `displayData` (append-only, spec §3
/// invariant 5).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayDatum {
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Fields supplied by the browser role when creating a new execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewExecutionRequest {
    pub code: String,
    pub language: String,
    pub runtime_url: String,
    #[serde(default)]
    pub session: Option<String>,
    #[serde(default)]
    pub cell_id: Option<String>,
}

/// The full value stored under an execution id in the shared `executions`
/// map (spec §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cell_id: Option<String>,
    pub code: String,
    pub language: String,
    pub runtime_url: String,
    pub session: String,
    pub status: ExecutionStatus,
    pub requested_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_by: Option<String>,
    pub requested_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<u64>,
    #[serde(default)]
    pub output_block_ready: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_position: Option<LogicalPosition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdin_request: Option<StdinRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdin_response: Option<StdinResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<MonitorError>,
    #[serde(default)]
    pub display_data: Vec<DisplayDatum>,
}

/// What happened to a record under observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeAction {
    Add,
    Update,
    Delete,
}

/// Keeps a [`CoordinationProtocol::observe`] subscription alive; dropping
/// it unsubscribes, matching `yrs`'s subscription idiom.
pub struct ObserverHandle(#[allow(dead_code)] Box<dyn std::any::Any>);

/// A view over the shared `executions` map, scoped to one peer id.
#[derive(Clone)]
pub struct CoordinationProtocol {
    doc: CrdtDoc,
    executions: MapRef,
    self_id: String,
}

impl CoordinationProtocol {
    pub fn new(doc: CrdtDoc, self_id: impl Into<String>) -> Self {
        let executions = doc.executions().clone();
        Self { doc, executions, self_id: self_id.into() }
    }

    pub fn self_id(&self) -> &str {
        &self.self_id
    }

    pub fn generate_exec_id(&self) -> String {
        execid::generate()
    }

    /// Create a full record with `status=requested`. Browser role.
    pub fn request_execution(&self, request: NewExecutionRequest) -> String {
        let id = self.generate_exec_id();
        let record = ExecutionRecord {
            id: id.clone(),
            cell_id: request.cell_id,
            code: request.code,
            language: request.language,
            runtime_url: request.runtime_url,
            session: request.session.unwrap_or_else(|| "default".to_owned()),
            status: ExecutionStatus::Requested,
            requested_by: self.self_id.clone(),
            claimed_by: None,
            requested_at: now_millis(),
            claimed_at: None,
            started_at: None,
            completed_at: None,
            output_block_ready: false,
            output_position: None,
            stdin_request: None,
            stdin_response: None,
            result: None,
            error: None,
            display_data: Vec::new(),
        };
        self.doc.with_write_txn(|txn| self.write_record(txn, &record));
        id
    }

    /// Guarded optimistic claim: fails the local check if the record is
    /// absent, not `requested`, or already claimed. A `true` return means
    /// the write was issued, not that it won — see module docs.
    pub fn claim_execution(&self, exec_id: &str) -> bool {
        self.update_record(exec_id, |record| {
            if record.status != ExecutionStatus::Requested || record.claimed_by.is_some() {
                return false;
            }
            record.status = ExecutionStatus::Claimed;
            record.claimed_by = Some(self.self_id.clone());
            record.claimed_at = Some(now_millis());
            true
        })
    }

    /// Re-read the converged record to see whether this peer's claim
    /// actually survived. This, not `claim_execution`'s return value, is
    /// the authoritative check.
    pub fn is_claimed_by_self(&self, exec_id: &str) -> bool {
        self.get_execution(exec_id).is_some_and(|record| {
            record.claimed_by.as_deref() == Some(self.self_id.as_str())
        })
    }

    /// Browser role: `claimed -> ready`.
    pub fn set_output_block_ready(&self, exec_id: &str, position: LogicalPosition) -> bool {
        self.update_record(exec_id, |record| {
            if record.status != ExecutionStatus::Claimed {
                return false;
            }
            record.status = ExecutionStatus::Ready;
            record.output_block_ready = true;
            record.output_position = Some(position.clone());
            true
        })
    }

    pub fn set_running(&self, exec_id: &str) -> bool {
        self.update_record(exec_id, |record| {
            if record.status.is_terminal() {
                return false;
            }
            record.status = ExecutionStatus::Running;
            record.started_at = Some(now_millis());
            true
        })
    }

    pub fn set_completed(
        &self,
        exec_id: &str,
        result: Option<serde_json::Value>,
        display_data: Vec<DisplayDatum>,
    ) -> bool {
        self.update_record(exec_id, |record| {
            if record.status.is_terminal() {
                return false;
            }
            record.status = ExecutionStatus::Completed;
            record.completed_at = Some(now_millis());
            record.result = result.clone();
            record.display_data.extend(display_data.clone());
            true
        })
    }

    pub fn set_error(&self, exec_id: &str, error: MonitorError) -> bool {
        self.update_record(exec_id, |record| {
            if record.status.is_terminal() {
                return false;
            }
            record.status = ExecutionStatus::Error;
            record.completed_at = Some(now_millis());
            record.error = Some(error.clone());
            true
        })
    }

    pub fn cancel(&self, exec_id: &str) -> bool {
        self.update_record(exec_id, |record| {
            if record.status.is_terminal() {
                return false;
            }
            record.status = ExecutionStatus::Cancelled;
            record.completed_at = Some(now_millis());
            true
        })
    }

    pub fn request_stdin(&self, exec_id: &str, prompt: impl Into<String>, password: bool) -> bool {
        let prompt = prompt.into();
        self.update_record(exec_id, |record| {
            record.stdin_request =
                Some(StdinRequest { prompt: prompt.clone(), password, requested_at: now_millis() });
            record.stdin_response = None;
            true
        })
    }

    pub fn respond_stdin(&self, exec_id: &str, text: impl Into<String>) -> bool {
        let text = text.into();
        self.update_record(exec_id, |record| {
            record.stdin_response =
                Some(StdinResponse { text: text.clone(), responded_at: now_millis() });
            true
        })
    }

    pub fn clear_stdin_request(&self, exec_id: &str) -> bool {
        self.update_record(exec_id, |record| {
            record.stdin_request = None;
            record.stdin_response = None;
            true
        })
    }

    pub fn add_display_data(&self, exec_id: &str, display: DisplayDatum) -> bool {
        self.update_record(exec_id, |record| {
            record.display_data.push(display.clone());
            true
        })
    }

    pub fn get_execution(&self, exec_id: &str) -> Option<ExecutionRecord> {
        self.doc.with_read_txn(|txn| self.read_record(txn, exec_id))
    }

    pub fn get_executions_by_status(&self, status: ExecutionStatus) -> Vec<ExecutionRecord> {
        self.doc.with_read_txn(|txn| {
            self.executions
                .iter(txn)
                .filter_map(|(_, value)| value_to_record(&value))
                .filter(|record| record.status == status)
                .collect()
        })
    }

    /// Subscribe to keyed changes on the `executions` map. The returned
    /// handle must be kept alive for as long as the subscription should
    /// run.
    pub fn observe<F>(&self, mut callback: F) -> ObserverHandle
    where
        F: FnMut(&str, Option<ExecutionRecord>, ChangeAction) + 'static,
    {
        let subscription = self.executions.observe(move |txn, event: &MapEvent| {
            for (key, change) in event.keys(txn).iter() {
                match change {
                    EntryChange::Inserted(value) => {
                        callback(key, value_to_record(value), ChangeAction::Add);
                    }
                    EntryChange::Updated(_, value) => {
                        callback(key, value_to_record(value), ChangeAction::Update);
                    }
                    EntryChange::Removed(_) => {
                        callback(key, None, ChangeAction::Delete);
                    }
                }
            }
        });
        ObserverHandle(Box::new(subscription))
    }

    fn read_record<T: ReadTxn>(&self, txn: &T, exec_id: &str) -> Option<ExecutionRecord> {
        let value = self.executions.get(txn, exec_id)?;
        value_to_record(&value)
    }

    fn write_record(&self, txn: &mut TransactionMut, record: &ExecutionRecord) {
        let json = serde_json::to_string(record).expect("ExecutionRecord always serializes");
        self.executions.insert(txn, record.id.clone(), json);
    }

    /// Read-modify-write helper: reads the current record, lets `mutate`
    /// decide whether the write is valid and apply it in place, and writes
    /// back the whole record if so. Returns whatever `mutate` returned.
    fn update_record(
        &self,
        exec_id: &str,
        mutate: impl FnOnce(&mut ExecutionRecord) -> bool,
    ) -> bool {
        self.doc.with_write_txn(|txn| {
            let Some(mut record) = self.read_record(txn, exec_id) else {
                return false;
            };
            if !mutate(&mut record) {
                return false;
            }
            self.write_record(txn, &record);
            true
        })
    }
}

fn value_to_record(value: &Value) -> Option<ExecutionRecord> {
    match value {
        Value::Any(Any::String(s)) => serde_json::from_str(s).ok(),
        _ => None,
    }
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
#[path = "coordination_tests.rs"]
mod tests;
