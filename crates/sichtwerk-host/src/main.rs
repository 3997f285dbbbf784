// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Sichtwerk host
//
// Entry point. Initialises logging, loads the bridge config, builds the
// platform detector backend and serves the method channel over stdin/stdout.
// Logs go to stderr so stdout carries nothing but replies.

mod data_dir;
mod session;

use std::process::ExitCode;

use sichtwerk_bridge::{FrameBridge, MethodChannel};
use sichtwerk_core::error::Result;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("Sichtwerk host starting");

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "host stopped");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let path = data_dir::config_path();
    let config = data_dir::load_config(&path)?;

    let backend = sichtwerk_native::platform_backend(config.detector)?;
    tracing::info!(backend = backend.name(), channel = %config.channel_name, "backend ready");

    let bridge = FrameBridge::start(backend, &config);
    let channel = MethodChannel::new(config.channel_name.clone(), bridge);

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    session::serve(channel.clone(), stdin, tokio::io::stdout()).await?;

    let stats = channel.bridge().stats();
    tracing::info!(
        submitted = stats.submitted,
        completed = stats.completed,
        rejected = stats.rejected,
        failed = stats.failed,
        "input closed, exiting"
    );
    Ok(())
}
