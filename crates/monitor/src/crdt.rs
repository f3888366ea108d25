// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Thin wrapper over a `yrs::Doc` exposing the two shared roots this crate
//! needs — the `executions` map and the `output` text — plus a
//! [`LogicalPosition`] type for the "sticky" relative positions spec §3
//! calls `outputPosition`/`stdinPosition`.
//!
//! Keeping this module narrow means [`document`](crate::document) and
//! [`coordination`](crate::coordination) never touch `yrs` transactions
//! directly; they go through [`SharedText`] and [`CrdtDoc`] instead, which
//! keeps their unit tests free of a real CRDT runtime.

use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{
    Assoc, Doc, Map, MapRef, ReadTxn, StateVector, StickyIndex, Text, TextRef, Transact,
    TransactionMut, Update, UpdateSubscription,
};

/// Errors surfaced while decoding or applying wire-format CRDT updates.
#[derive(Debug, Clone, PartialEq)]
pub enum CrdtError {
    Decode(String),
    Apply(String),
}

impl std::fmt::Display for CrdtError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CrdtError::Decode(msg) => write!(f, "failed to decode CRDT update: {msg}"),
            CrdtError::Apply(msg) => write!(f, "failed to apply CRDT update: {msg}"),
        }
    }
}

impl std::error::Error for CrdtError {}

/// Origin tag stamped onto transactions created by [`CrdtDoc::apply_update`].
const REMOTE_ORIGIN: &str = "remote-sync";

/// A shared document: one `executions` map root and one `output` text root.
///
/// `yrs::Doc` and `yrs::MapRef`/`TextRef` are cheap `Rc`-backed handles, so
/// `CrdtDoc` is `Clone` and can be shared across the tasks that observe it.
#[derive(Clone)]
pub struct CrdtDoc {
    doc: Doc,
    executions: MapRef,
    output: TextRef,
}

impl Default for CrdtDoc {
    fn default() -> Self {
        Self::new()
    }
}

impl CrdtDoc {
    pub fn new() -> Self {
        let doc = Doc::new();
        let executions = doc.get_or_insert_map("executions");
        let output = doc.get_or_insert_text("output");
        Self { doc, executions, output }
    }

    pub fn client_id(&self) -> u64 {
        self.doc.client_id()
    }

    pub fn executions(&self) -> &MapRef {
        &self.executions
    }

    pub fn output(&self) -> YrsText {
        YrsText { doc: self.doc.clone(), text: self.output.clone() }
    }

    /// Apply a remote update encoded with the v1 lib0 wire format. Tagged
    /// with an origin so [`CrdtDoc::on_local_update`] subscribers can tell
    /// it apart from a locally-issued write and not echo it straight back
    /// out over the same sync connection.
    pub fn apply_update(&self, update: &[u8]) -> Result<(), CrdtError> {
        let update = Update::decode_v1(update).map_err(|e| CrdtError::Decode(e.to_string()))?;
        let mut txn = self.doc.transact_mut_with(REMOTE_ORIGIN);
        txn.apply_update(update).map_err(|e| CrdtError::Apply(e.to_string()))?;
        Ok(())
    }

    /// Subscribe to updates produced by local writes (`with_write_txn`, or
    /// any `CoordinationProtocol`/`DocumentWriter` call), encoded for the
    /// wire. Updates applied via [`CrdtDoc::apply_update`] are not
    /// redelivered here — a sync provider forwarding these out never echoes
    /// what a peer just sent it.
    pub fn on_local_update(&self, mut callback: impl FnMut(Vec<u8>) + 'static) -> UpdateSubscription {
        self.doc.observe_update_v1(move |txn, event| {
            if txn.origin().is_some() {
                return;
            }
            callback(event.update.clone());
        })
    }

    /// This replica's state vector, to hand to a peer as SyncStep1.
    pub fn encode_state_vector(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.state_vector().encode_v1()
    }

    /// The update a peer needs to catch up from `remote_sv` (SyncStep2).
    pub fn encode_diff(&self, remote_sv: &[u8]) -> Result<Vec<u8>, CrdtError> {
        let sv = StateVector::decode_v1(remote_sv).map_err(|e| CrdtError::Decode(e.to_string()))?;
        let txn = self.doc.transact();
        Ok(txn.encode_diff_v1(&sv))
    }

    /// The full document state from an empty state vector, for a brand new
    /// peer that has nothing to diff against.
    pub fn encode_full_state(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.encode_diff_v1(&StateVector::default())
    }

    /// Run `f` inside a write transaction and return its result.
    pub fn with_write_txn<R>(&self, f: impl FnOnce(&mut TransactionMut) -> R) -> R {
        let mut txn = self.doc.transact_mut();
        f(&mut txn)
    }

    /// Run `f` inside a read-only transaction and return its result.
    pub fn with_read_txn<R>(&self, f: impl FnOnce(&yrs::Transaction<'_>) -> R) -> R {
        let txn = self.doc.transact();
        f(&txn)
    }
}

/// Abstraction over a shared append/insert/remove text sequence, so
/// [`document`](crate::document) can be unit-tested against a plain
/// in-memory fake instead of a real `yrs::Doc`.
pub trait SharedText {
    fn insert(&self, index: u32, chunk: &str);
    fn remove_range(&self, index: u32, len: u32);
    fn len(&self) -> u32;
    fn content(&self) -> String;
    fn sticky_index(&self, index: u32, assoc: Assoc) -> Option<LogicalPosition>;
    fn resolve(&self, pos: &LogicalPosition) -> Option<u32>;
}

/// Production [`SharedText`] backed by a real `yrs::TextRef`.
#[derive(Clone)]
pub struct YrsText {
    doc: Doc,
    text: TextRef,
}

impl SharedText for YrsText {
    fn insert(&self, index: u32, chunk: &str) {
        let mut txn = self.doc.transact_mut();
        self.text.insert(&mut txn, index, chunk);
    }

    fn remove_range(&self, index: u32, len: u32) {
        if len == 0 {
            return;
        }
        let mut txn = self.doc.transact_mut();
        self.text.remove_range(&mut txn, index, len);
    }

    fn len(&self) -> u32 {
        let txn = self.doc.transact();
        self.text.len(&txn)
    }

    fn content(&self) -> String {
        let txn = self.doc.transact();
        self.text.get_string(&txn)
    }

    fn sticky_index(&self, index: u32, assoc: Assoc) -> Option<LogicalPosition> {
        let txn = self.doc.transact();
        self.text.sticky_index(&txn, index, assoc).map(LogicalPosition::encode)
    }

    fn resolve(&self, pos: &LogicalPosition) -> Option<u32> {
        let txn = self.doc.transact();
        let sticky = pos.decode()?;
        sticky.get_offset(&txn).map(|offset| offset.index)
    }
}

/// A "sticky" relative position: an offset into a [`SharedText`] that
/// survives concurrent edits elsewhere in the document, encoded for
/// storage inside an `executions` record. Opaque outside this module other
/// than its wire-format bytes.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct LogicalPosition(Vec<u8>);

impl LogicalPosition {
    fn encode(sticky: StickyIndex) -> Self {
        LogicalPosition(sticky.encode_v1())
    }

    fn decode(&self) -> Option<StickyIndex> {
        StickyIndex::decode_v1(&self.0).ok()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Construct from raw encoded bytes, e.g. a fake [`SharedText`] in
    /// tests, or bytes just read back out of a stored execution record.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        LogicalPosition(bytes)
    }
}
#[cfg(test)]
#[path = "crdt_tests.rs"]
mod tests;
