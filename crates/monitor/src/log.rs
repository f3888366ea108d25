// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Structured logging init (spec §6): one JSON object per line by default,
//! pretty-printed when stdout is a terminal.

use std::io::IsTerminal;

use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber for the given `--log-level`.
/// Falls back to `info` if `level` doesn't parse as a filter directive.
pub fn init(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if std::io::stdout().is_terminal() {
        tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
    } else {
        tracing_subscriber::fmt().json().with_env_filter(filter).with_target(false).init();
    }
}
