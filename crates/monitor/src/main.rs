// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use monitor::config::Config;

/// `current_thread`, not the teacher's default multi-thread runtime: the
/// CRDT doc and runtime client are `Rc`/`RefCell`-based (spec §5's
/// single-threaded cooperative model), so the whole monitor loop runs
/// inside one `tokio::task::LocalSet`.
#[tokio::main(flavor = "current_thread")]
async fn main() {
    let config = Config::parse();

    if let Err(err) = config.validate() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }

    monitor::log::init(&config.log_level);

    let shutdown = CancellationToken::new();
    let local = tokio::task::LocalSet::new();

    let exit_code = local
        .run_until(async {
            spawn_signal_handler(shutdown.clone());

            match monitor::run(config, shutdown).await {
                Ok(()) => 0,
                Err(err) => {
                    error!("fatal: {err:#}");
                    1
                }
            }
        })
        .await;

    std::process::exit(exit_code);
}

fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
        let mut sigint =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()).ok();

        tokio::select! {
            _ = async {
                if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await }
            } => info!("received SIGTERM"),
            _ = async {
                if let Some(ref mut s) = sigint { s.recv().await } else { std::future::pending().await }
            } => info!("received SIGINT"),
        }
        shutdown.cancel();
    });
}
