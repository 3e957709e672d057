//! wifigate-sim: devices competing for a router's Wi-Fi connections.

mod config;
mod simulation;

use std::fs::File;
use std::io::BufWriter;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Args, SimConfig};

/// Initialize tracing with WIFIGATE_LOG and LOG_FORMAT support.
fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let base_level = match std::env::var("WIFIGATE_LOG").as_deref() {
            Ok("debug") => "debug",
            Ok("trace") => "trace",
            Ok("warn") | Ok("warning") => "warn",
            Ok("error") => "error",
            _ => "info",
        };

        EnvFilter::new(format!(
            "wifigate={level},wifigate_sim={level}",
            level = base_level
        ))
    };

    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for Ctrl+C, running to completion");
        std::future::pending::<()>().await;
    }
    info!("Received SIGINT");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();

    info!("wifigate-sim {}", env!("CARGO_PKG_VERSION"));

    let config = SimConfig::resolve(args)?;
    let file = File::create(&config.output)
        .with_context(|| format!("failed to create {}", config.output.display()))?;

    let report = simulation::run(&config, BufWriter::new(file), shutdown_signal()).await?;

    println!("\n{}", simulation::SUMMARY_LINE);

    if !report.is_clean() {
        anyhow::bail!("{} device(s) hit a contract violation", report.failed);
    }
    Ok(())
}
