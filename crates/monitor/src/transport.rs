// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Minimal y-sync/y-websocket wire subset: `SyncStep1`/`SyncStep2`/`Update`
//! plus an awareness broadcast on connect (spec §6). Reconnects with
//! exponential backoff, mirroring the teacher's
//! `upstream::feed::spawn_event_feed`. Deliberately not a full y-protocol
//! implementation — no diff-based resync beyond the initial handshake, no
//! custom message extensions (see `DESIGN.md`): the websocket transport is
//! an explicit external/non-core concern.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::crdt::CrdtDoc;
use crate::error::MonitorError;

/// One frame of the sync-subset wire protocol: a one-byte tag, a
/// big-endian `u32` payload length, then the payload.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncMessage {
    SyncStep1 { state_vector: Vec<u8> },
    SyncStep2 { update: Vec<u8> },
    Update { update: Vec<u8> },
    Awareness { payload: Vec<u8> },
}

impl SyncMessage {
    const SYNC_STEP1: u8 = 0;
    const SYNC_STEP2: u8 = 1;
    const UPDATE: u8 = 2;
    const AWARENESS: u8 = 3;

    pub fn encode(&self) -> Vec<u8> {
        let (tag, payload) = match self {
            Self::SyncStep1 { state_vector } => (Self::SYNC_STEP1, state_vector),
            Self::SyncStep2 { update } => (Self::SYNC_STEP2, update),
            Self::Update { update } => (Self::UPDATE, update),
            Self::Awareness { payload } => (Self::AWARENESS, payload),
        };
        let mut out = Vec::with_capacity(payload.len() + 5);
        out.push(tag);
        out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        out.extend_from_slice(payload);
        out
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let tag = *bytes.first()?;
        let len_bytes: [u8; 4] = bytes.get(1..5)?.try_into().ok()?;
        let len = u32::from_be_bytes(len_bytes) as usize;
        let payload = bytes.get(5..5 + len)?.to_vec();
        Some(match tag {
            Self::SYNC_STEP1 => Self::SyncStep1 { state_vector: payload },
            Self::SYNC_STEP2 => Self::SyncStep2 { update: payload },
            Self::UPDATE => Self::Update { update: payload },
            Self::AWARENESS => Self::Awareness { payload },
            _ => return None,
        })
    }
}

/// Handle to a running sync connection: lets the monitor loop push local
/// doc updates out over the wire, and disconnect cleanly.
pub struct SyncHandle {
    outbound: mpsc::UnboundedSender<SyncMessage>,
    cancel: CancellationToken,
    synced: watch::Receiver<bool>,
    // Kept alive only so the doc keeps forwarding local writes for as long
    // as this handle exists; never read directly.
    _local_update_sub: yrs::UpdateSubscription,
}

impl SyncHandle {
    pub fn send_update(&self, update: Vec<u8>) {
        let _ = self.outbound.send(SyncMessage::Update { update });
    }

    pub fn disconnect(&self) {
        self.cancel.cancel();
    }

    pub fn is_synced(&self) -> bool {
        *self.synced.borrow()
    }

    /// Wait for the server's first `SyncStep2` reply to be applied.
    pub async fn wait_synced(&self) {
        let mut synced = self.synced.clone();
        if *synced.borrow() {
            return;
        }
        let _ = synced.changed().await;
    }
}

/// Connects to the CRDT sync server at `url` for room `room`, wired to
/// `doc`. Applies every inbound `SyncStep1`/`SyncStep2`/`Update` frame
/// straight into `doc`; replies to the server's `SyncStep1` with our own
/// `SyncStep2` diff; broadcasts `awareness` once connected. Reconnects
/// with exponential backoff (100ms, doubling, capped at 5s) until
/// `cancel` fires. `doc` is `!Send` (`yrs::Doc` is `Rc`-based), so this
/// must run on a `tokio::task::LocalSet`.
pub struct SyncProvider {
    url: String,
    room: String,
    awareness: serde_json::Value,
}

impl SyncProvider {
    pub fn new(url: String, room: String, awareness: serde_json::Value) -> Self {
        Self { url, room, awareness }
    }

    fn ws_url(&self) -> String {
        format!("{}/{}", self.url.trim_end_matches('/'), self.room)
    }

    /// Dial the sync server once, bounded by `CONNECT_TIMEOUT`, and only
    /// once that first connection is up hand the socket off to a detached
    /// reconnect loop for the rest of the handle's lifetime. A failure or
    /// timeout on this first dial is returned as `Err` instead of being
    /// swallowed into silent background retries, so spec §6's "exit 1 on
    /// connect failure" has something to fire on. Subscribes to `doc`'s
    /// local writes for the lifetime of the returned handle, so claims,
    /// status transitions, and output appends all reach the wire without
    /// the caller having to push anything explicitly.
    pub async fn run(
        &self,
        doc: CrdtDoc,
        cancel: CancellationToken,
    ) -> Result<SyncHandle, MonitorError> {
        let url = self.ws_url();
        let ws_stream = match tokio::time::timeout(CONNECT_TIMEOUT, tokio_tungstenite::connect_async(&url)).await
        {
            Ok(Ok((ws_stream, _))) => ws_stream,
            Ok(Err(err)) => return Err(MonitorError::connection(err.to_string())),
            Err(_) => {
                return Err(MonitorError::connection(format!(
                    "timed out connecting to sync server within {CONNECT_TIMEOUT:?}"
                )))
            }
        };

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (synced_tx, synced_rx) = watch::channel(false);

        let forward = outbound_tx.clone();
        let local_update_sub = doc.on_local_update(move |update| {
            let _ = forward.send(SyncMessage::Update { update });
        });

        let handle = SyncHandle {
            outbound: outbound_tx,
            cancel: cancel.clone(),
            synced: synced_rx,
            _local_update_sub: local_update_sub,
        };

        let awareness = self.awareness.clone();
        tokio::task::spawn_local(run_reconnect_loop(
            url,
            Some(ws_stream),
            doc,
            awareness,
            outbound_rx,
            synced_tx,
            cancel,
        ));

        Ok(handle)
    }
}

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

async fn run_reconnect_loop(
    url: String,
    mut initial_stream: Option<
        tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    >,
    doc: CrdtDoc,
    awareness: serde_json::Value,
    mut outbound_rx: mpsc::UnboundedReceiver<SyncMessage>,
    synced_tx: watch::Sender<bool>,
    cancel: CancellationToken,
) {
    let mut backoff = Duration::from_millis(100);
    let max_backoff = Duration::from_secs(5);

    while !cancel.is_cancelled() {
        let ws_stream = if let Some(stream) = initial_stream.take() {
            Ok(stream)
        } else {
            match tokio_tungstenite::connect_async(&url).await {
                Ok((ws_stream, _)) => Ok(ws_stream),
                Err(err) => Err(err),
            }
        };

        match ws_stream {
            Ok(ws_stream) => {
                backoff = Duration::from_millis(100);
                let (mut write, mut read) = ws_stream.split();

                let sync_step1 = SyncMessage::SyncStep1 { state_vector: doc.encode_state_vector() };
                if write.send(Message::Binary(sync_step1.encode().into())).await.is_err() {
                    continue;
                }
                let awareness_bytes = serde_json::to_vec(&awareness).unwrap_or_default();
                let awareness_msg = SyncMessage::Awareness { payload: awareness_bytes };
                let _ = write.send(Message::Binary(awareness_msg.encode().into())).await;

                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        outgoing = outbound_rx.recv() => {
                            match outgoing {
                                Some(msg) => {
                                    if write.send(Message::Binary(msg.encode().into())).await.is_err() {
                                        break;
                                    }
                                }
                                None => return,
                            }
                        }
                        incoming = read.next() => {
                            match incoming {
                                Some(Ok(Message::Binary(bytes))) => {
                                    handle_inbound(&doc, &bytes, &mut write, &synced_tx).await;
                                }
                                Some(Ok(_)) => {}
                                Some(Err(err)) => {
                                    tracing::debug!(error = %err, "sync connection error");
                                    break;
                                }
                                None => break,
                            }
                        }
                    }
                }
                let _ = synced_tx.send(false);
            }
            Err(err) => {
                tracing::debug!(error = %err, "sync connect failed");
            }
        }

        if cancel.is_cancelled() {
            return;
        }
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(backoff) => {}
        }
        backoff = (backoff * 2).min(max_backoff);
    }
}

async fn handle_inbound(
    doc: &CrdtDoc,
    bytes: &[u8],
    write: &mut (impl futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
              + Unpin),
    synced_tx: &watch::Sender<bool>,
) {
    let Some(message) = SyncMessage::decode(bytes) else {
        tracing::debug!("dropping unrecognized sync frame");
        return;
    };
    match message {
        SyncMessage::SyncStep1 { state_vector } => {
            if let Ok(diff) = doc.encode_diff(&state_vector) {
                let reply = SyncMessage::SyncStep2 { update: diff };
                let _ = write.send(Message::Binary(reply.encode().into())).await;
            }
        }
        SyncMessage::SyncStep2 { update } | SyncMessage::Update { update } => {
            if let Err(err) = doc.apply_update(&update) {
                tracing::warn!(error = %err, "failed to apply remote update");
            }
            let _ = synced_tx.send(true);
        }
        SyncMessage::Awareness { .. } => {}
    }
}

#[cfg(test)]
#[path = "transport_tests.rs"]
mod tests;
