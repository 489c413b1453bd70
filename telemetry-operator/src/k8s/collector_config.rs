//! The OpenTelemetry collector configuration file.
//!
//! The configuration is modelled with plain structs so that serialization is deterministic:
//! field order follows declaration order, and all maps are ordered.

use std::collections::BTreeMap;

use serde::Serialize;

use telemetry_core::crd::{OtlpOutput, OtlpProtocol};

/// The port on which the collector receives OTLP over gRPC.
pub const PORT_OTLP_GRPC: i32 = 4317;
/// The port on which the collector receives OTLP over HTTP.
pub const PORT_OTLP_HTTP: i32 = 4318;
/// The port on which the collector exposes its own metrics.
pub const PORT_METRICS: i32 = 8888;
/// The port of the collector's health check extension.
pub const PORT_HEALTH: i32 = 13133;

/// The environment variable carrying the export endpoint.
pub const ENV_OTLP_ENDPOINT: &str = "OTLP_ENDPOINT";
/// The environment variable carrying the basic auth header of the export destination.
pub const ENV_BASIC_AUTH_HEADER: &str = "BASIC_AUTH_HEADER";

#[derive(Debug, Serialize)]
pub struct CollectorConfig {
    pub extensions: Extensions,
    pub receivers: Receivers,
    pub processors: Processors,
    pub exporters: Exporters,
    pub service: ServiceConfig,
}

#[derive(Debug, Serialize)]
pub struct Extensions {
    pub health_check: Endpoint,
}

#[derive(Debug, Serialize)]
pub struct Endpoint {
    pub endpoint: String,
}

#[derive(Debug, Serialize)]
pub struct Receivers {
    pub otlp: OtlpReceiver,
}

#[derive(Debug, Serialize)]
pub struct OtlpReceiver {
    pub protocols: OtlpReceiverProtocols,
}

#[derive(Debug, Serialize)]
pub struct OtlpReceiverProtocols {
    pub grpc: Endpoint,
    pub http: Endpoint,
}

#[derive(Debug, Serialize)]
pub struct Processors {
    pub memory_limiter: MemoryLimiter,
    pub batch: Batch,
}

#[derive(Debug, Serialize)]
pub struct MemoryLimiter {
    pub check_interval: String,
    pub limit_percentage: u32,
    pub spike_limit_percentage: u32,
}

#[derive(Debug, Serialize)]
pub struct Batch {
    pub send_batch_size: u32,
    pub send_batch_max_size: u32,
    pub timeout: String,
}

#[derive(Debug, Serialize)]
pub struct Exporters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub otlp: Option<OtlpExporter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub otlphttp: Option<OtlpExporter>,
    pub logging: LoggingExporter,
}

#[derive(Debug, Serialize)]
pub struct OtlpExporter {
    pub endpoint: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    pub sending_queue: SendingQueue,
    pub retry_on_failure: RetryOnFailure,
}

#[derive(Debug, Serialize)]
pub struct SendingQueue {
    pub enabled: bool,
    pub queue_size: u32,
}

#[derive(Debug, Serialize)]
pub struct RetryOnFailure {
    pub enabled: bool,
    pub initial_interval: String,
    pub max_interval: String,
    pub max_elapsed_time: String,
}

#[derive(Debug, Serialize)]
pub struct LoggingExporter {
    pub loglevel: String,
}

#[derive(Debug, Serialize)]
pub struct ServiceConfig {
    pub extensions: Vec<String>,
    pub telemetry: Telemetry,
    pub pipelines: Pipelines,
}

#[derive(Debug, Serialize)]
pub struct Telemetry {
    pub metrics: TelemetryMetrics,
}

#[derive(Debug, Serialize)]
pub struct TelemetryMetrics {
    pub address: String,
}

#[derive(Debug, Serialize)]
pub struct Pipelines {
    pub traces: PipelineConfig,
}

#[derive(Debug, Serialize)]
pub struct PipelineConfig {
    pub receivers: Vec<String>,
    pub processors: Vec<String>,
    pub exporters: Vec<String>,
}

impl CollectorConfig {
    /// Build the collector configuration exporting to the given output.
    ///
    /// Credentials are never written into the configuration. They are referenced as environment
    /// variables, which the collector Deployment sources from the credentials Secret.
    pub fn new(otlp: &OtlpOutput) -> Self {
        let mut headers = BTreeMap::new();
        if otlp.basic_auth().is_some() {
            headers.insert("Authorization".into(), format!("${{{}}}", ENV_BASIC_AUTH_HEADER));
        }
        let exporter = OtlpExporter {
            endpoint: format!("${{{}}}", ENV_OTLP_ENDPOINT),
            headers,
            sending_queue: SendingQueue { enabled: true, queue_size: 512 },
            retry_on_failure: RetryOnFailure {
                enabled: true,
                initial_interval: "5s".into(),
                max_interval: "30s".into(),
                max_elapsed_time: "300s".into(),
            },
        };
        let (exporter_name, exporters) = match otlp.protocol {
            OtlpProtocol::Grpc => ("otlp", Exporters { otlp: Some(exporter), otlphttp: None, logging: LoggingExporter { loglevel: "info".into() } }),
            OtlpProtocol::Http => ("otlphttp", Exporters { otlp: None, otlphttp: Some(exporter), logging: LoggingExporter { loglevel: "info".into() } }),
        };

        Self {
            extensions: Extensions { health_check: Endpoint { endpoint: format!("0.0.0.0:{}", PORT_HEALTH) } },
            receivers: Receivers {
                otlp: OtlpReceiver {
                    protocols: OtlpReceiverProtocols {
                        grpc: Endpoint { endpoint: format!("0.0.0.0:{}", PORT_OTLP_GRPC) },
                        http: Endpoint { endpoint: format!("0.0.0.0:{}", PORT_OTLP_HTTP) },
                    },
                },
            },
            processors: Processors {
                memory_limiter: MemoryLimiter {
                    check_interval: "1s".into(),
                    limit_percentage: 75,
                    spike_limit_percentage: 10,
                },
                batch: Batch {
                    send_batch_size: 512,
                    send_batch_max_size: 512,
                    timeout: "10s".into(),
                },
            },
            exporters,
            service: ServiceConfig {
                extensions: vec!["health_check".into()],
                telemetry: Telemetry { metrics: TelemetryMetrics { address: format!("0.0.0.0:{}", PORT_METRICS) } },
                pipelines: Pipelines {
                    traces: PipelineConfig {
                        receivers: vec!["otlp".into()],
                        // NOTE: the memory limiter must run first to apply back-pressure before batching.
                        processors: vec!["memory_limiter".into(), "batch".into()],
                        exporters: vec![exporter_name.into(), "logging".into()],
                    },
                },
            },
        }
    }
}
