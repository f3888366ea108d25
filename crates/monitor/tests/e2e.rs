// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end scenarios wiring the monitor loop to a real websocket sync
//! connection and a mocked runtime HTTP server (spec §8): a "browser" peer
//! and one or more monitor peers, each with their own `CrdtDoc`, converging
//! purely through the wire.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use monitor::config::Config;
use monitor::coordination::{CoordinationProtocol, ExecutionStatus, NewExecutionRequest};
use monitor::crdt::{CrdtDoc, SharedText};
use monitor::document::DocumentWriter;
use monitor::monitor_loop::MonitorLoop;
use monitor::transport::{SyncHandle, SyncProvider};

const POLL_TIMEOUT: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// A bare relay: answers every peer's `SyncStep1` with an empty `SyncStep2`
/// diff, then rebroadcasts every `Update` frame it receives to every other
/// connected peer. Holds no document of its own — peers converge purely
/// through each other's updates, matching this crate's minimal sync-subset
/// contract (`transport.rs`).
async fn spawn_relay() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind relay listener");
    let addr = listener.local_addr().expect("relay local addr");
    let (tx, _rx) = broadcast::channel::<Vec<u8>>(256);

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else { return };
            tokio::spawn(handle_relay_connection(stream, tx.clone()));
        }
    });

    format!("ws://{addr}")
}

async fn handle_relay_connection(stream: TcpStream, tx: broadcast::Sender<Vec<u8>>) {
    let Ok(ws) = tokio_tungstenite::accept_async(stream).await else { return };
    let (mut write, mut read) = ws.split();
    let mut rx = tx.subscribe();

    loop {
        tokio::select! {
            incoming = read.next() => match incoming {
                Some(Ok(Message::Binary(bytes))) => match bytes.first() {
                    Some(0) => {
                        // SyncStep1: this relay has no state of its own to diff against.
                        let empty_sync_step2: Vec<u8> = vec![1, 0, 0, 0, 0];
                        if write.send(Message::Binary(empty_sync_step2.into())).await.is_err() {
                            return;
                        }
                    }
                    Some(2) => {
                        let _ = tx.send(bytes.to_vec());
                    }
                    _ => {}
                },
                Some(Ok(_)) => {}
                _ => return,
            },
            relayed = rx.recv() => match relayed {
                Ok(bytes) => {
                    if write.send(Message::Binary(bytes.into())).await.is_err() {
                        return;
                    }
                }
                Err(_) => return,
            },
        }
    }
}

fn config_for(sync_url: &str, name: &str) -> Config {
    Config::parse_from(["monitor", sync_url, "--name", name])
}

async fn connected_monitor(relay_url: &str, name: &str) -> MonitorLoop {
    let config = config_for(relay_url, name);
    let provider = Arc::new(SyncProvider::new(
        config.normalized_sync_url(),
        config.doc.clone(),
        config.awareness(),
    ));
    let mut monitor = MonitorLoop::new(provider, config);
    monitor.connect().await.expect("monitor connects");
    monitor
}

/// A "browser" peer: its own doc and coordination view, wired to the same
/// relay, standing in for the editor that creates execution requests and
/// lays down the output fence.
struct BrowserPeer {
    doc: CrdtDoc,
    coordination: CoordinationProtocol,
    _handle: SyncHandle,
}

async fn connected_browser(relay_url: &str) -> BrowserPeer {
    let doc = CrdtDoc::new();
    let coordination = CoordinationProtocol::new(doc.clone(), "browser");
    let provider = Arc::new(SyncProvider::new(
        relay_url.to_owned(),
        "default".to_owned(),
        serde_json::json!({}),
    ));
    let handle = provider.run(doc.clone(), CancellationToken::new()).await.expect("browser connects");
    handle.wait_synced().await;
    BrowserPeer { doc, coordination, _handle: handle }
}

async fn poll_until<T>(mut check: impl FnMut() -> Option<T>) -> T {
    let deadline = tokio::time::Instant::now() + POLL_TIMEOUT;
    loop {
        if let Some(value) = check() {
            return value;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("condition never became true within {POLL_TIMEOUT:?}");
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Insert the output fence into `browser`'s replica and flip the record to
/// `ready`, the way the editor does once it sees a `claimed` record.
fn lay_output_fence(browser: &BrowserPeer, exec_id: &str) {
    let text = browser.doc.output();
    text.insert(0, &format!("```output:{exec_id}\n```\n"));
    let writer = DocumentWriter::new(browser.doc.output());
    let position = writer.create_output_position(exec_id).expect("fence resolves to a position");
    assert!(browser.coordination.set_output_block_ready(exec_id, position));
}

#[tokio::test]
async fn happy_path_request_to_completion_across_two_independent_docs() {
    let relay = spawn_relay().await;
    let runtime = MockServer::start().await;
    let body = "event: stdout\ndata: {\"content\":\"6\\n\"}\n\n\
                event: result\ndata: {\"value\":6}\n\n\
                event: done\ndata: {}\n\n";
    Mock::given(method("POST"))
        .and(path("/execute/stream"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body.to_owned(), "text/event-stream"))
        .mount(&runtime)
        .await;

    tokio::task::LocalSet::new()
        .run_until(async move {
            let mut monitor = connected_monitor(&relay, "monitor-1").await;
            let browser = connected_browser(&relay).await;

            let exec_id = browser.coordination.request_execution(NewExecutionRequest {
                code: "2 * 3".to_owned(),
                language: "python".to_owned(),
                runtime_url: runtime.uri(),
                session: Some("session-1".to_owned()),
                cell_id: None,
            });

            // The monitor sees the request only through the relay, claims it,
            // and that claim propagates back to the browser's own replica.
            poll_until(|| {
                let record = browser.coordination.get_execution(&exec_id)?;
                (record.status == ExecutionStatus::Claimed
                    && record.claimed_by.as_deref() == Some("monitor-1"))
                .then_some(())
            })
            .await;

            lay_output_fence(&browser, &exec_id);

            let record = poll_until(|| {
                let record = browser.coordination.get_execution(&exec_id)?;
                matches!(record.status, ExecutionStatus::Completed | ExecutionStatus::Error)
                    .then_some(record)
            })
            .await;

            assert_eq!(record.status, ExecutionStatus::Completed);
            assert_eq!(record.result, Some(serde_json::json!({"value": 6})));
            assert!(record.started_at.is_some());

            monitor.disconnect().await;
        })
        .await;
}

#[tokio::test]
async fn two_monitors_converge_on_a_single_claim() {
    let relay = spawn_relay().await;

    tokio::task::LocalSet::new()
        .run_until(async move {
            let mut monitor_a = connected_monitor(&relay, "monitor-a").await;
            let mut monitor_b = connected_monitor(&relay, "monitor-b").await;
            let browser = connected_browser(&relay).await;

            let exec_id = browser.coordination.request_execution(NewExecutionRequest {
                code: "1".to_owned(),
                language: "python".to_owned(),
                runtime_url: "http://unused.invalid".to_owned(),
                session: None,
                cell_id: None,
            });

            let claimed_by = poll_until(|| {
                let record = browser.coordination.get_execution(&exec_id)?;
                (record.status == ExecutionStatus::Claimed).then_some(record.claimed_by)
            })
            .await
            .expect("claimed record has a claimant");

            assert!(claimed_by == "monitor-a" || claimed_by == "monitor-b");

            // Give any losing optimistic write time to reach both replicas;
            // the record must converge and stay put, not flip back and forth.
            tokio::time::sleep(Duration::from_millis(200)).await;
            let settled = browser.coordination.get_execution(&exec_id).expect("record still present");
            assert_eq!(settled.status, ExecutionStatus::Claimed);
            assert_eq!(settled.claimed_by, Some(claimed_by));

            monitor_a.disconnect().await;
            monitor_b.disconnect().await;
        })
        .await;
}

#[tokio::test]
async fn stdin_round_trip_across_the_relay() {
    let relay = spawn_relay().await;
    let runtime = MockServer::start().await;
    let stream_body = "event: stdin_request\ndata: {\"prompt\":\"name?\"}\n\n";
    Mock::given(method("POST"))
        .and(path("/execute/stream"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(stream_body.to_owned(), "text/event-stream"))
        .mount(&runtime)
        .await;
    Mock::given(method("POST"))
        .and(path("/input"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"accepted": true})))
        .mount(&runtime)
        .await;

    tokio::task::LocalSet::new()
        .run_until(async move {
            let mut monitor = connected_monitor(&relay, "monitor-1").await;
            let browser = connected_browser(&relay).await;

            let exec_id = browser.coordination.request_execution(NewExecutionRequest {
                code: "input('name?')".to_owned(),
                language: "python".to_owned(),
                runtime_url: runtime.uri(),
                session: Some("session-1".to_owned()),
                cell_id: None,
            });

            poll_until(|| {
                (browser.coordination.get_execution(&exec_id)?.status == ExecutionStatus::Claimed)
                    .then_some(())
            })
            .await;

            lay_output_fence(&browser, &exec_id);

            let prompt = poll_until(|| browser.coordination.get_execution(&exec_id)?.stdin_request).await;
            assert_eq!(prompt.prompt, "name?");

            browser.coordination.respond_stdin(&exec_id, "Ada");

            // The monitor forwards the answer to `/input` and clears the
            // request; that clearing is itself a write that must cross the
            // relay back to the browser's replica.
            poll_until(|| {
                browser
                    .coordination
                    .get_execution(&exec_id)
                    .filter(|record| record.stdin_request.is_none())
                    .map(|_| ())
            })
            .await;

            monitor.disconnect().await;
        })
        .await;
}
