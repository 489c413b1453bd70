//! The telemetry operator.

mod app;
mod config;
mod error;
mod k8s;
mod server;

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusRecorder};
use once_cell::sync::OnceCell;
use tracing_subscriber::prelude::*;

use crate::app::App;
use crate::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Setup tracing/logging system.
    tracing_subscriber::registry()
        // Filter spans based on the RUST_LOG env var.
        .with(tracing_subscriber::EnvFilter::from_default_env())
        // Send a copy of all spans to stdout in compact form.
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_ansi(true)
        )
        // Install this registry as the global tracing registry.
        .try_init()
        .context("error initializing logging/tracing system")?;

    let cfg = Arc::new(Config::new()?);
    let recorder = get_metrics_recorder(&cfg);
    metrics::set_recorder(recorder).context("error setting prometheus metrics recorder")?;
    k8s::register_metrics();

    tracing::info!(
        http_port = %cfg.http_port,
        namespace = %cfg.namespace,
        resource_name = %cfg.resource_name,
        create_service_monitor = %cfg.create_service_monitor,
        "starting telemetry operator",
    );
    if let Err(err) = App::new(cfg).await?.spawn().await {
        tracing::error!(error = ?err);
    }

    // Ensure any pending output is flushed.
    let _ = std::io::stdout().flush();
    let _ = std::io::stderr().flush();

    Ok(())
}

/// Get a handle to the metrics recorder, initializing it as needed.
///
/// The recorder is labeled with the namespace of the given config on first use.
pub fn get_metrics_recorder(config: &Config) -> &'static PrometheusRecorder {
    static RECORDER: OnceCell<PrometheusRecorder> = OnceCell::new();
    RECORDER.get_or_init(|| PrometheusBuilder::new().add_global_label("namespace", config.namespace.clone()).build())
}
