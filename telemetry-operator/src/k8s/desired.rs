//! The desired state of all objects derived from a TracePipeline.
//!
//! Everything here is a pure function of the runtime config, the pipeline spec and the resolved
//! secret data. All maps are ordered, so the same inputs always produce identical objects.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, ContainerPort, EnvFromSource, HTTPGetAction, PodSpec, PodTemplateSpec, Probe,
    ResourceRequirements, Secret, SecretEnvSource, Service, ServicePort, ServiceSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use k8s_openapi::ByteString;
use maplit::btreemap;

use crate::config::Config;
use crate::error::SpecError;
use crate::k8s::checksum;
use crate::k8s::collector_config::{
    CollectorConfig, ENV_BASIC_AUTH_HEADER, ENV_OTLP_ENDPOINT, PORT_HEALTH, PORT_METRICS, PORT_OTLP_GRPC, PORT_OTLP_HTTP,
};
use crate::k8s::secrets::SecretData;
use crate::k8s::sync::ChildResource;
use telemetry_core::crd::{OtlpOutput, ServiceMonitor, ServiceMonitorEndpoint, ServiceMonitorSelector, ServiceMonitorSpec, TracePipeline};
use telemetry_core::{LABEL_APP_NAME, LABEL_MANAGED_BY, OPERATOR_NAME};

/// The key of the collector configuration file within the ConfigMap.
pub const CONFIG_FILE_KEY: &str = "relay.conf.yaml";
/// The directory in which the collector configuration file is mounted.
const CONFIG_MOUNT_PATH: &str = "/conf";
/// The name of the config volume of the collector pods.
const CONFIG_VOLUME: &str = "config";
/// The pod template annotation carrying the fingerprint of the collector configuration.
pub const ANNOTATION_CONFIG_CHECKSUM: &str = "checksum/config";
/// The label selecting the metrics Service of the collector.
pub const LABEL_SELF_MONITOR: &str = "telemetry.io/self-monitor";
/// The name of the collector container.
const CONTAINER_NAME: &str = "collector";
/// The name of the metrics port of the collector.
const PORT_NAME_METRICS: &str = "http-metrics";

/// The complete desired state of a TracePipeline.
#[derive(Clone, Debug, PartialEq)]
pub struct Desired {
    /// The credentials consumed by the collector as environment variables.
    pub secret: Secret,
    /// The collector configuration file.
    pub config_map: ConfigMap,
    /// The collector workload, stamped with the fingerprint of the secret & config map.
    pub deployment: Deployment,
    /// The Service exposing the collector's OTLP receivers.
    pub collector_service: Service,
    /// The ServiceMonitor & metrics Service, present only when monitoring is enabled.
    pub monitoring: Option<(ServiceMonitor, Service)>,
}

impl Desired {
    /// All objects of this desired state, in the order in which they are to be synced.
    pub fn into_children(self) -> Vec<ChildResource> {
        let mut children = vec![
            ChildResource::Secret(self.secret),
            ChildResource::ConfigMap(self.config_map),
            ChildResource::Deployment(self.deployment),
            ChildResource::Service(self.collector_service),
        ];
        if let Some((monitor, service)) = self.monitoring {
            children.push(ChildResource::ServiceMonitor(monitor));
            children.push(ChildResource::Service(service));
        }
        children
    }
}

/// Build the desired state of the given pipeline.
pub fn build(config: &Config, pipeline: &TracePipeline, secret_data: &SecretData) -> Result<Desired, SpecError> {
    let otlp = &pipeline.spec.output.otlp;
    let secret = build_secret(config, secret_data);
    let config_map = build_config_map(config, otlp)?;
    let checksum = checksum::calculate(&[&config_map], &[&secret]);
    let deployment = build_deployment(config, &checksum);
    let collector_service = build_collector_service(config);
    let monitoring = if config.create_service_monitor {
        Some((build_service_monitor(config), build_metrics_service(config)))
    } else {
        None
    };
    Ok(Desired { secret, config_map, deployment, collector_service, monitoring })
}

/// The labels carried by every object managed by the operator.
pub fn canonical_labels(config: &Config) -> BTreeMap<String, String> {
    btreemap! {
        LABEL_APP_NAME.into() => config.resource_name.clone(),
        LABEL_MANAGED_BY.into() => OPERATOR_NAME.into(),
    }
}

/// The labels selecting the collector pods.
pub fn selector_labels(config: &Config) -> BTreeMap<String, String> {
    btreemap! { LABEL_APP_NAME.into() => config.resource_name.clone() }
}

fn metadata(config: &Config, name: String, mut labels: BTreeMap<String, String>) -> ObjectMeta {
    labels.extend(canonical_labels(config));
    ObjectMeta {
        name: Some(name),
        namespace: Some(config.namespace.clone()),
        labels: Some(labels),
        ..Default::default()
    }
}

/// Build the Secret holding the export endpoint & credentials.
pub fn build_secret(config: &Config, secret_data: &SecretData) -> Secret {
    let mut data = btreemap! {
        ENV_OTLP_ENDPOINT.into() => ByteString(secret_data.endpoint.clone()),
    };
    if let Some(header) = secret_data.basic_auth_header() {
        data.insert(ENV_BASIC_AUTH_HEADER.into(), ByteString(header.into_bytes()));
    }
    Secret {
        metadata: metadata(config, config.resource_name.clone(), Default::default()),
        data: Some(data),
        ..Default::default()
    }
}

/// Build the ConfigMap holding the collector configuration.
pub fn build_config_map(config: &Config, otlp: &OtlpOutput) -> Result<ConfigMap, SpecError> {
    if !otlp.endpoint.is_defined() {
        return Err(SpecError::UndefinedValue("output.otlp.endpoint"));
    }
    let collector_config = serde_yaml::to_string(&CollectorConfig::new(otlp)).map_err(|err| SpecError::Serialization(err.to_string()))?;
    Ok(ConfigMap {
        metadata: metadata(config, config.resource_name.clone(), Default::default()),
        data: Some(btreemap! { CONFIG_FILE_KEY.into() => collector_config }),
        ..Default::default()
    })
}

/// Build the collector Deployment, stamped with the given configuration checksum.
pub fn build_deployment(config: &Config, checksum: &str) -> Deployment {
    let labels = selector_labels(config);
    let quantities = |cpu: &str, memory: &str| {
        btreemap! {
            "cpu".to_string() => Quantity(cpu.into()),
            "memory".to_string() => Quantity(memory.into()),
        }
    };
    let probe = Probe {
        http_get: Some(HTTPGetAction {
            path: Some("/".into()),
            port: IntOrString::Int(PORT_HEALTH),
            ..Default::default()
        }),
        ..Default::default()
    };
    let container = Container {
        name: CONTAINER_NAME.into(),
        image: Some(config.collector_image.clone()),
        args: Some(vec![format!("--config={}/{}", CONFIG_MOUNT_PATH, CONFIG_FILE_KEY)]),
        env_from: Some(vec![EnvFromSource {
            secret_ref: Some(SecretEnvSource {
                name: Some(config.resource_name.clone()),
                optional: Some(false),
            }),
            ..Default::default()
        }]),
        ports: Some(vec![
            container_port("grpc-otlp", PORT_OTLP_GRPC),
            container_port("http-otlp", PORT_OTLP_HTTP),
            container_port(PORT_NAME_METRICS, PORT_METRICS),
        ]),
        resources: Some(ResourceRequirements {
            limits: Some(quantities(&config.collector_cpu_limit, &config.collector_memory_limit)),
            requests: Some(quantities(&config.collector_cpu_request, &config.collector_memory_request)),
        }),
        volume_mounts: Some(vec![VolumeMount {
            name: CONFIG_VOLUME.into(),
            mount_path: CONFIG_MOUNT_PATH.into(),
            ..Default::default()
        }]),
        liveness_probe: Some(probe.clone()),
        readiness_probe: Some(probe),
        ..Default::default()
    };

    Deployment {
        metadata: metadata(config, config.resource_name.clone(), Default::default()),
        spec: Some(DeploymentSpec {
            replicas: Some(config.collector_replicas),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    annotations: Some(btreemap! { ANNOTATION_CONFIG_CHECKSUM.into() => checksum.into() }),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    priority_class_name: config.collector_priority_class.clone(),
                    volumes: Some(vec![Volume {
                        name: CONFIG_VOLUME.into(),
                        config_map: Some(ConfigMapVolumeSource {
                            name: Some(config.resource_name.clone()),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Build the Service exposing the collector's OTLP receivers.
pub fn build_collector_service(config: &Config) -> Service {
    Service {
        metadata: metadata(config, config.resource_name.clone(), Default::default()),
        spec: Some(ServiceSpec {
            ports: Some(vec![
                service_port("grpc-otlp", PORT_OTLP_GRPC),
                service_port("http-otlp", PORT_OTLP_HTTP),
            ]),
            selector: Some(selector_labels(config)),
            type_: Some("ClusterIP".into()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Build the Service exposing the collector's own metrics.
pub fn build_metrics_service(config: &Config) -> Service {
    let labels = btreemap! { LABEL_SELF_MONITOR.into() => "true".into() };
    Service {
        metadata: metadata(config, config.metrics_service_name(), labels),
        spec: Some(ServiceSpec {
            ports: Some(vec![service_port(PORT_NAME_METRICS, PORT_METRICS)]),
            selector: Some(selector_labels(config)),
            type_: Some("ClusterIP".into()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Build the ServiceMonitor scraping the metrics Service.
pub fn build_service_monitor(config: &Config) -> ServiceMonitor {
    let spec = ServiceMonitorSpec {
        endpoints: vec![ServiceMonitorEndpoint {
            port: PORT_NAME_METRICS.into(),
            path: Some("/metrics".into()),
            interval: Some("30s".into()),
        }],
        selector: ServiceMonitorSelector {
            match_labels: btreemap! {
                LABEL_APP_NAME.into() => config.resource_name.clone(),
                LABEL_SELF_MONITOR.into() => "true".into(),
            },
        },
    };
    let mut monitor = ServiceMonitor::new(&config.resource_name, spec);
    monitor.metadata = metadata(config, config.resource_name.clone(), Default::default());
    monitor
}

fn container_port(name: &str, port: i32) -> ContainerPort {
    ContainerPort {
        name: Some(name.into()),
        container_port: port,
        protocol: Some("TCP".into()),
        ..Default::default()
    }
}

fn service_port(name: &str, port: i32) -> ServicePort {
    ServicePort {
        name: Some(name.into()),
        port,
        protocol: Some("TCP".into()),
        target_port: Some(IntOrString::Int(port)),
        ..Default::default()
    }
}
