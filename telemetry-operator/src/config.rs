//! Runtime configuration.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Runtime configuration data.
///
/// This value is immutable once built, and is shared by reference with every reconcile pass.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// The server's logging config, which uses Rust's `env_logger` directives.
    pub rust_log: String,
    /// The port used for metrics and healthchecks.
    #[serde(default = "Config::default_http_port")]
    pub http_port: u16,

    /// The Kubernetes namespace in which the trace collector is deployed.
    pub namespace: String,
    /// The name shared by all objects of the trace collector.
    pub resource_name: String,
    /// The container image of the trace collector.
    pub collector_image: String,
    /// The number of trace collector replicas.
    #[serde(default = "Config::default_collector_replicas")]
    pub collector_replicas: i32,
    /// The priority class of the trace collector pods, if any.
    #[serde(default)]
    pub collector_priority_class: Option<String>,
    /// The CPU limit of the trace collector container.
    #[serde(default = "Config::default_collector_cpu_limit")]
    pub collector_cpu_limit: String,
    /// The memory limit of the trace collector container.
    #[serde(default = "Config::default_collector_memory_limit")]
    pub collector_memory_limit: String,
    /// The CPU request of the trace collector container.
    #[serde(default = "Config::default_collector_cpu_request")]
    pub collector_cpu_request: String,
    /// The memory request of the trace collector container.
    #[serde(default = "Config::default_collector_memory_request")]
    pub collector_memory_request: String,

    /// Create a Prometheus ServiceMonitor and a metrics Service for the trace collector.
    ///
    /// Requires the Prometheus operator CRDs to be installed in the cluster.
    #[serde(default)]
    pub create_service_monitor: bool,

    /// The delay in seconds before a reconcile pass which failed transiently is retried.
    #[serde(default = "Config::default_requeue_seconds")]
    pub requeue_seconds: u64,
}

impl Config {
    /// Create a new config instance.
    ///
    /// Currently this routing just parses the runtime environment and builds the application
    /// config from that.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Result<Self> {
        envy::from_env().context("error building config from env")
    }

    /// The delay before a transiently failed reconcile pass is retried.
    pub fn requeue_after(&self) -> Duration {
        Duration::from_secs(self.requeue_seconds)
    }

    /// The name of the Service exposing the trace collector's own metrics.
    pub fn metrics_service_name(&self) -> String {
        format!("{}-metrics", self.resource_name)
    }

    fn default_http_port() -> u16 {
        8080
    }

    fn default_collector_replicas() -> i32 {
        1
    }

    fn default_collector_cpu_limit() -> String {
        "1".into()
    }

    fn default_collector_memory_limit() -> String {
        "1Gi".into()
    }

    fn default_collector_cpu_request() -> String {
        "150m".into()
    }

    fn default_collector_memory_request() -> String {
        "256Mi".into()
    }

    fn default_requeue_seconds() -> u64 {
        5
    }
}

#[cfg(test)]
impl Config {
    /// Build a config instance for testing.
    pub fn new_test() -> Self {
        Self {
            rust_log: "error".into(),
            http_port: 8080,
            namespace: "telemetry-system".into(),
            resource_name: "trace-collector".into(),
            collector_image: "otel/opentelemetry-collector:0.45.0".into(),
            collector_replicas: 1,
            collector_priority_class: None,
            collector_cpu_limit: Self::default_collector_cpu_limit(),
            collector_memory_limit: Self::default_collector_memory_limit(),
            collector_cpu_request: Self::default_collector_cpu_request(),
            collector_memory_request: Self::default_collector_memory_request(),
            create_service_monitor: false,
            requeue_seconds: 5,
        }
    }
}
