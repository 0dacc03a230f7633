//! Naming client: instance registration, heartbeats, queries and service CRUD.
//!
//! Every operation is a thin mapping onto one registry endpoint. Mutating
//! instance/service calls are acknowledged by the literal body `ok`;
//! responses carrying data are JSON. All errors surface synchronously as
//! [`HttpError`] — retry policy belongs to the callers.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::http::{
    ApiClient, HttpError, INSTANCE_BEAT_ENDPOINT, INSTANCE_ENDPOINT, INSTANCE_LIST_ENDPOINT,
    SERVICE_ENDPOINT, SERVICE_LIST_ENDPOINT,
};
use crate::instance::{Instance, InstanceFilter, Metadata};

/// Service metadata as stored on the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Service {
    /// Service name.
    pub name: String,
    /// Group the service belongs to; empty selects the server default.
    pub group_name: String,
    /// Namespace (tenant) identifier; empty selects the default namespace.
    pub namespace_id: String,
    /// Healthy-instance ratio below which the server serves all instances.
    pub protect_threshold: f64,
    /// Opaque service-level metadata.
    pub metadata: Metadata,
    /// Clusters declared under the service.
    pub clusters: Vec<Cluster>,
}

/// One cluster within a service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Cluster {
    /// Cluster name.
    pub name: String,
    /// Health check the server applies to members of this cluster.
    pub health_checker: HealthChecker,
    /// Opaque cluster-level metadata.
    pub metadata: Metadata,
}

/// Health-check declaration attached to a cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct HealthChecker {
    /// Checker type, e.g. `TCP` or `HTTP`.
    #[serde(rename = "type", default)]
    pub checker_type: String,
}

/// One page of service names.
#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
#[serde(default)]
pub struct ServiceList {
    /// Total number of services matching the query.
    pub count: u64,
    /// Service names on this page.
    #[serde(rename = "doms")]
    pub names: Vec<String>,
}

/// Heartbeat acknowledgement payload.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct BeatResponse {
    /// Interval the server suggests for subsequent beats, in milliseconds.
    #[serde(rename = "clientBeatInterval")]
    client_beat_interval: u64,
}

/// Instance-list response envelope.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct InstanceList {
    hosts: Vec<Instance>,
}

/// Client for the registry's naming (service discovery) API.
#[derive(Debug, Clone)]
pub struct NamingClient {
    api: ApiClient,
}

impl NamingClient {
    /// Wraps an [`ApiClient`] for naming operations.
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    /// Registers `instance` on the registry.
    pub async fn register_instance(&self, instance: &Instance) -> Result<(), HttpError> {
        let request = self
            .api
            .post(INSTANCE_ENDPOINT)
            .query(&full_instance_params(instance));
        self.api.dispatch_expecting(request, "ok").await
    }

    /// Removes `instance` from the registry.
    pub async fn deregister_instance(&self, instance: &Instance) -> Result<(), HttpError> {
        let request = self
            .api
            .delete(INSTANCE_ENDPOINT)
            .query(&identity_instance_params(instance));
        self.api.dispatch_expecting(request, "ok").await
    }

    /// Updates the registration of `instance` in place.
    pub async fn update_instance(&self, instance: &Instance) -> Result<(), HttpError> {
        let request = self
            .api
            .put(INSTANCE_ENDPOINT)
            .query(&full_instance_params(instance));
        self.api.dispatch_expecting(request, "ok").await
    }

    /// Sends one heartbeat for `instance`.
    ///
    /// Returns the interval the server suggests for subsequent beats; zero
    /// means the server offered no suggestion.
    pub async fn heartbeat(&self, instance: &Instance) -> Result<Duration, HttpError> {
        let beat = serde_json::to_string(instance)?;
        let form = [
            ("serviceName", instance.service_name.as_str()),
            ("groupName", instance.group_name.as_str()),
            ("ephemeral", if instance.ephemeral { "true" } else { "false" }),
            ("beat", beat.as_str()),
        ];
        let request = self.api.put(INSTANCE_BEAT_ENDPOINT).form(&form);
        let ack: BeatResponse = self.api.dispatch_json(request).await?;
        Ok(Duration::from_millis(ack.client_beat_interval))
    }

    /// Returns the instances of `service_name` matching `filter`.
    pub async fn query_instances(
        &self,
        service_name: &str,
        filter: &InstanceFilter,
    ) -> Result<Vec<Instance>, HttpError> {
        let mut params: Vec<(&str, String)> = vec![("serviceName", service_name.to_string())];
        if let Some(group_name) = &filter.group_name {
            params.push(("groupName", group_name.clone()));
        }
        if let Some(namespace) = &filter.namespace {
            params.push(("namespaceId", namespace.clone()));
        }
        if !filter.clusters.is_empty() {
            params.push(("clusters", filter.clusters.join(",")));
        }
        if filter.healthy_only {
            params.push(("healthyOnly", "true".to_string()));
        }

        let request = self.api.get(INSTANCE_LIST_ENDPOINT).query(&params);
        let list: InstanceList = self.api.dispatch_json(request).await?;
        Ok(list.hosts)
    }

    /// Creates `service` on the registry.
    pub async fn create_service(&self, service: &Service) -> Result<(), HttpError> {
        let request = self
            .api
            .post(SERVICE_ENDPOINT)
            .query(&service_params(service));
        self.api.dispatch_expecting(request, "ok").await
    }

    /// Updates the metadata of `service`.
    pub async fn update_service(&self, service: &Service) -> Result<(), HttpError> {
        let request = self
            .api
            .put(SERVICE_ENDPOINT)
            .query(&service_params(service));
        self.api.dispatch_expecting(request, "ok").await
    }

    /// Removes the named service. Arguments are (service, group, namespace).
    pub async fn remove_service(
        &self,
        service_name: &str,
        group_name: &str,
        namespace: &str,
    ) -> Result<(), HttpError> {
        let request = self.api.delete(SERVICE_ENDPOINT).query(&[
            ("serviceName", service_name),
            ("groupName", group_name),
            ("namespaceId", namespace),
        ]);
        self.api.dispatch_expecting(request, "ok").await
    }

    /// Fetches the metadata of the named service.
    pub async fn query_service(
        &self,
        service_name: &str,
        group_name: &str,
        namespace: &str,
    ) -> Result<Service, HttpError> {
        let request = self.api.get(SERVICE_ENDPOINT).query(&[
            ("serviceName", service_name),
            ("groupName", group_name),
            ("namespaceId", namespace),
        ]);
        self.api.dispatch_json(request).await
    }

    /// Returns one page of service names.
    pub async fn list_services(
        &self,
        page_no: u32,
        page_size: u32,
        group_name: &str,
        namespace: &str,
    ) -> Result<ServiceList, HttpError> {
        let request = self.api.get(SERVICE_LIST_ENDPOINT).query(&[
            ("pageNo", page_no.to_string()),
            ("pageSize", page_size.to_string()),
            ("groupName", group_name.to_string()),
            ("namespaceId", namespace.to_string()),
        ]);
        self.api.dispatch_json(request).await
    }
}

/// Full parameter set used by register and update.
fn full_instance_params(instance: &Instance) -> Vec<(&'static str, String)> {
    vec![
        ("ip", instance.ip.clone()),
        ("port", instance.port.to_string()),
        ("namespaceId", instance.namespace.clone()),
        ("weight", format!("{:.2}", instance.weight)),
        ("enabled", instance.enabled.to_string()),
        ("healthy", instance.healthy.to_string()),
        ("metadata", metadata_string(&instance.metadata)),
        ("clusterName", instance.cluster_name.clone()),
        ("serviceName", instance.service_name.clone()),
        ("groupName", instance.group_name.clone()),
        ("ephemeral", instance.ephemeral.to_string()),
    ]
}

/// Identity-only parameter set used by deregister.
fn identity_instance_params(instance: &Instance) -> Vec<(&'static str, String)> {
    vec![
        ("ip", instance.ip.clone()),
        ("port", instance.port.to_string()),
        ("namespaceId", instance.namespace.clone()),
        ("clusterName", instance.cluster_name.clone()),
        ("serviceName", instance.service_name.clone()),
        ("groupName", instance.group_name.clone()),
        ("ephemeral", instance.ephemeral.to_string()),
    ]
}

/// Parameter set shared by service create and update.
fn service_params(service: &Service) -> Vec<(&'static str, String)> {
    vec![
        ("serviceName", service.name.clone()),
        ("groupName", service.group_name.clone()),
        ("namespaceId", service.namespace_id.clone()),
        ("protectThreshold", format!("{:.2}", service.protect_threshold)),
        ("metadata", metadata_string(&service.metadata)),
    ]
}

/// Encodes metadata as the JSON-object string the query parameters expect.
fn metadata_string(metadata: &Metadata) -> String {
    serde_json::to_string(metadata).unwrap_or_default()
}
