//! Service-instance model shared by the naming client and the discovery facade.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque per-instance metadata: string keys mapping to semi-structured values.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// One service endpoint as registered on (or returned by) the registry.
///
/// Field names follow the registry's JSON contract, which is also the shape
/// embedded in heartbeat payloads. Construction goes through [`Instance::new`]
/// plus `with_*` builders; the registry defaults (weight 1.0, enabled,
/// healthy, ephemeral) apply unless overridden.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Instance {
    /// Server-assigned identifier; empty until the registry echoes one back.
    pub instance_id: String,
    /// Endpoint IP address.
    pub ip: String,
    /// Endpoint port.
    pub port: u16,
    /// Namespace (tenant) the instance lives in; empty selects the default.
    pub namespace: String,
    /// Relative weight used by weighted selection strategies.
    pub weight: f64,
    /// Whether the instance accepts traffic.
    #[serde(rename = "enable")]
    pub enabled: bool,
    /// Health flag as reported to or by the registry.
    pub healthy: bool,
    /// Opaque metadata attached to the registration.
    pub metadata: Metadata,
    /// Cluster within the service; empty selects the default cluster.
    pub cluster_name: String,
    /// Logical service this endpoint belongs to.
    pub service_name: String,
    /// Group the service belongs to; empty selects the server default.
    pub group_name: String,
    /// Ephemeral registrations are expired by the server when beats stop.
    pub ephemeral: bool,
}

impl Default for Instance {
    fn default() -> Self {
        Self {
            instance_id: String::new(),
            ip: String::new(),
            port: 0,
            namespace: String::new(),
            weight: 1.0,
            enabled: true,
            healthy: true,
            metadata: Metadata::new(),
            cluster_name: String::new(),
            service_name: String::new(),
            group_name: String::new(),
            ephemeral: true,
        }
    }
}

impl Instance {
    /// Creates an instance for `service_name` at `ip:port` with registry defaults.
    pub fn new(service_name: impl Into<String>, ip: impl Into<String>, port: u16) -> Self {
        Self {
            service_name: service_name.into(),
            ip: ip.into(),
            port,
            ..Self::default()
        }
    }

    /// Sets the namespace (tenant).
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Sets the group name.
    pub fn with_group(mut self, group_name: impl Into<String>) -> Self {
        self.group_name = group_name.into();
        self
    }

    /// Sets the cluster name.
    pub fn with_cluster(mut self, cluster_name: impl Into<String>) -> Self {
        self.cluster_name = cluster_name.into();
        self
    }

    /// Sets the selection weight.
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    /// Replaces the metadata map.
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Adds one metadata entry.
    pub fn with_metadata_entry(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Sets the traffic-enabled flag.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Sets the health flag.
    pub fn with_healthy(mut self, healthy: bool) -> Self {
        self.healthy = healthy;
        self
    }

    /// Sets the ephemeral flag.
    pub fn with_ephemeral(mut self, ephemeral: bool) -> Self {
        self.ephemeral = ephemeral;
        self
    }

    /// Returns the registration identity of this instance.
    pub fn key(&self) -> InstanceKey {
        InstanceKey {
            service_name: self.service_name.clone(),
            group_name: self.group_name.clone(),
            cluster_name: self.cluster_name.clone(),
            ip: self.ip.clone(),
            port: self.port,
        }
    }

    /// Checks the fields making up the registration identity.
    pub(crate) fn check_identity(&self) -> Result<(), String> {
        if self.service_name.is_empty() {
            return Err("instance is missing a service name".to_string());
        }
        if self.ip.is_empty() {
            return Err("instance is missing an ip".to_string());
        }
        if self.port == 0 {
            return Err("instance port must be non-zero".to_string());
        }
        Ok(())
    }
}

/// Unique identity of one registration: (service, group, cluster, ip, port).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceKey {
    /// Logical service name.
    pub service_name: String,
    /// Group name (may be empty for the server default).
    pub group_name: String,
    /// Cluster name (may be empty for the default cluster).
    pub cluster_name: String,
    /// Endpoint IP address.
    pub ip: String,
    /// Endpoint port.
    pub port: u16,
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}:{}",
            self.group_name, self.service_name, self.cluster_name, self.ip, self.port
        )
    }
}

/// Filter applied when querying the instances of a service.
#[derive(Debug, Clone, Default)]
pub struct InstanceFilter {
    /// Restricts the query to one group.
    pub group_name: Option<String>,
    /// Restricts the query to one namespace (tenant).
    pub namespace: Option<String>,
    /// Restricts the query to the named clusters.
    pub clusters: Vec<String>,
    /// Asks the server to return only healthy instances.
    pub healthy_only: bool,
}

impl InstanceFilter {
    /// Restricts the query to one group.
    pub fn with_group(mut self, group_name: impl Into<String>) -> Self {
        self.group_name = Some(group_name.into());
        self
    }

    /// Restricts the query to one namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Adds a cluster to the filter.
    pub fn with_cluster(mut self, cluster: impl Into<String>) -> Self {
        self.clusters.push(cluster.into());
        self
    }

    /// Asks the server for healthy instances only.
    pub fn healthy_only(mut self) -> Self {
        self.healthy_only = true;
        self
    }
}
