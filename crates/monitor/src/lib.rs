// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! mrmd-monitor: headless collaborative execution monitor.
//!
//! Participates as a peer in a multi-writer CRDT-replicated notebook
//! document and drives code executions against remote language runtimes on
//! behalf of disconnected browser editors, streaming their output back into
//! the shared document.

pub mod config;
pub mod coordination;
pub mod crdt;
pub mod document;
pub mod error;
pub mod execid;
pub mod log;
pub mod monitor_loop;
pub mod runtime;
pub mod sse;
pub mod terminal;
pub mod transport;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::monitor_loop::MonitorLoop;
use crate::transport::SyncProvider;

/// Connect, run until shutdown is requested, then disconnect cleanly.
pub async fn run(config: Config, shutdown: CancellationToken) -> anyhow::Result<()> {
    let sync_url = config.normalized_sync_url();
    tracing::info!(component = "monitor", doc = %config.doc, %sync_url, "starting monitor");

    let provider = Arc::new(SyncProvider::new(sync_url, config.doc.clone(), config.awareness()));
    let mut monitor = MonitorLoop::new(provider, config.clone());

    tokio::select! {
        result = monitor.connect() => result?,
        _ = shutdown.cancelled() => {
            tracing::info!(component = "monitor", "shutdown requested before connect completed");
            return Ok(());
        }
    }
    tracing::info!(component = "monitor", "connected and synced");

    shutdown.cancelled().await;
    tracing::info!(component = "monitor", "shutdown requested, draining");
    monitor.disconnect().await;

    Ok(())
}
