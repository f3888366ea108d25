// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! CLI surface (spec §6): `monitor [options] <sync-url>`.

use clap::Parser;

/// Headless collaborative execution monitor.
#[derive(Debug, Clone, Parser)]
#[command(name = "monitor", version, about)]
pub struct Config {
    /// CRDT sync server URL. `ws://`/`wss://` is prepended if missing.
    #[arg(value_name = "sync-url")]
    pub sync_url: String,

    /// Room / document name.
    #[arg(long, default_value = "default")]
    pub doc: String,

    /// Awareness display name.
    #[arg(long, default_value = "mrmd-monitor")]
    pub name: String,

    /// Awareness display color.
    #[arg(long, default_value = "#10b981")]
    pub color: String,

    /// Log level (debug, info, warn, error).
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.sync_url.trim().is_empty() {
            anyhow::bail!("sync-url must not be empty");
        }
        match self.log_level.as_str() {
            "debug" | "info" | "warn" | "error" => {}
            other => anyhow::bail!("invalid --log-level: {other}"),
        }
        Ok(())
    }

    /// The sync URL with a `ws://` scheme prepended if none is present.
    pub fn normalized_sync_url(&self) -> String {
        if self.sync_url.starts_with("ws://") || self.sync_url.starts_with("wss://") {
            self.sync_url.clone()
        } else {
            format!("ws://{}", self.sync_url)
        }
    }

    /// The awareness payload published on connect (spec §6): `{user: {name,
    /// color, type: "monitor"}}`.
    pub fn awareness(&self) -> serde_json::Value {
        serde_json::json!({
            "user": {
                "name": self.name,
                "color": self.color,
                "type": "monitor",
            }
        })
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
