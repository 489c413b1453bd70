//! Prometheus operator ServiceMonitor CRD.
//!
//! Only the subset of the upstream schema used by the trace collector's self-monitoring is
//! modelled here. The CRD itself is owned by the Prometheus operator and is never generated from
//! this code.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub type ServiceMonitor = ServiceMonitorCRD; // Mostly to resolve a Rust Analyzer issue.

/// CRD spec for the ServiceMonitor resource.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, CustomResource, JsonSchema)]
#[kube(
    struct = "ServiceMonitorCRD",
    group = "monitoring.coreos.com",
    version = "v1",
    kind = "ServiceMonitor",
    namespaced,
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct ServiceMonitorSpec {
    /// The endpoints of the selected Services to scrape.
    pub endpoints: Vec<ServiceMonitorEndpoint>,
    /// The selector used to find the Services to scrape.
    pub selector: ServiceMonitorSelector,
}

/// A scrape endpoint of a ServiceMonitor.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServiceMonitorEndpoint {
    /// The name of the Service port to scrape.
    pub port: String,
    /// The HTTP path to scrape.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// The scrape interval, for example `30s`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
}

/// A label based Service selector.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServiceMonitorSelector {
    #[serde(default)]
    pub match_labels: BTreeMap<String, String>,
}
