//! Canonical records for workloads, namespaces and platform groups.
//!
//! Every record is a plain snapshot built once per discovery pass. Nothing
//! here knows about the Kubernetes client types; the discovery crate converts
//! raw API objects into these shapes.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::keys::ServiceKey;

/// The kind tag of a workload-like unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ServiceKind {
    /// `apps/v1` Deployment.
    Deployment,
    /// `apps/v1` StatefulSet.
    StatefulSet,
    /// `apps/v1` DaemonSet.
    DaemonSet,
    /// `apps/v1` ReplicaSet without an owner.
    ReplicaSet,
    /// A bare or pod-owned Pod.
    Pod,
    /// OpenShift DeploymentConfig.
    DeploymentConfig,
    /// Argo Rollout.
    Rollout,
    /// A configured custom resource kind.
    Custom(String),
}

impl ServiceKind {
    /// The kind name as it appears in the Kubernetes API.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Deployment => "Deployment",
            Self::StatefulSet => "StatefulSet",
            Self::DaemonSet => "DaemonSet",
            Self::ReplicaSet => "ReplicaSet",
            Self::Pod => "Pod",
            Self::DeploymentConfig => "DeploymentConfig",
            Self::Rollout => "Rollout",
            Self::Custom(name) => name,
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for ServiceKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "Deployment" => Self::Deployment,
            "StatefulSet" => Self::StatefulSet,
            "DaemonSet" => Self::DaemonSet,
            "ReplicaSet" => Self::ReplicaSet,
            "Pod" => Self::Pod,
            "DeploymentConfig" => Self::DeploymentConfig,
            "Rollout" => Self::Rollout,
            _ => Self::Custom(value),
        }
    }
}

impl From<ServiceKind> for String {
    fn from(kind: ServiceKind) -> Self {
        match kind {
            ServiceKind::Custom(name) => name,
            other => other.as_str().to_string(),
        }
    }
}

/// An environment variable declared on a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVarInfo {
    /// Variable name.
    pub name: String,
    /// Literal value, or a description of the referenced source
    /// (`secret:name/key`, `configmap:name/key`, `field:path`, `resource:name`).
    pub value: String,
}

/// Resource requests and limits of a container, as raw quantity strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceInfo {
    /// Requested quantities keyed by resource name.
    pub requests: BTreeMap<String, String>,
    /// Limit quantities keyed by resource name.
    pub limits: BTreeMap<String, String>,
}

/// One container of a pod template or pod.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfo {
    /// Container name.
    pub name: String,
    /// Image reference, empty when unset.
    pub image: String,
    /// Declared environment.
    pub env: Vec<EnvVarInfo>,
    /// Requests and limits.
    pub resources: ResourceInfo,
    /// Declared container ports.
    pub ports: Vec<i32>,
}

/// One volume of a pod template or pod.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeInfo {
    /// Volume name.
    pub name: String,
    /// Claim name when the volume is backed by a persistent volume claim.
    pub persistent_volume_claim: Option<String>,
}

/// Labels, containers and volumes of a workload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Object labels.
    pub labels: BTreeMap<String, String>,
    /// Containers of the pod template.
    pub containers: Vec<ContainerInfo>,
    /// Volumes of the pod template.
    pub volumes: Vec<VolumeInfo>,
}

/// One workload-like unit discovered in the cluster.
///
/// `ready_pods <= total_pods` is not enforced: the API may report it
/// transiently and the values are passed through as observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    /// Object resource version, 0 when absent or not numeric.
    pub resource_version: u64,
    /// Object name.
    pub name: String,
    /// Object namespace.
    pub namespace: String,
    /// Kind tag.
    pub service_type: ServiceKind,
    /// Labels, containers and volumes.
    pub service_config: ServiceConfig,
    /// Ready replica count.
    pub ready_pods: u32,
    /// Desired replica count.
    pub total_pods: u32,
    /// Whether the object was created by a package-manager release.
    pub is_helm_release: bool,
}

impl ServiceInfo {
    /// The `namespace/kind/name` key of this service.
    #[must_use]
    pub fn service_key(&self) -> ServiceKey {
        ServiceKey::new(&self.namespace, self.service_type.as_str(), &self.name)
    }
}

/// One namespace's metadata snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceInfo {
    /// Namespace name.
    pub name: String,
    /// Lifecycle phase (`Active`, `Terminating`), empty when unset.
    pub phase: String,
    /// Namespace labels.
    pub labels: BTreeMap<String, String>,
    /// Namespace annotations.
    pub annotations: BTreeMap<String, String>,
    /// Resource version, 0 when absent.
    pub resource_version: u64,
}

/// One OpenShift user group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenshiftGroup {
    /// Group name.
    pub name: String,
    /// Member user names.
    pub users: Vec<String>,
    /// Namespaces in which a role binding grants this group a role.
    pub namespaces: Vec<String>,
    /// Group labels.
    pub labels: BTreeMap<String, String>,
    /// Group annotations.
    pub annotations: BTreeMap<String, String>,
    /// Resource version, 0 when absent.
    pub resource_version: u64,
}

/// Parse a Kubernetes resource version into the numeric counter.
///
/// Resource versions are opaque strings; every API server in practice uses
/// a decimal etcd revision. Anything else maps to 0.
#[must_use]
pub fn parse_resource_version(version: Option<&str>) -> u64 {
    version.and_then(|v| v.parse().ok()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_kind_string_roundtrip() {
        for kind in [
            ServiceKind::Deployment,
            ServiceKind::StatefulSet,
            ServiceKind::DaemonSet,
            ServiceKind::ReplicaSet,
            ServiceKind::Pod,
            ServiceKind::DeploymentConfig,
            ServiceKind::Rollout,
        ] {
            let name = String::from(kind.clone());
            assert_eq!(ServiceKind::from(name), kind);
        }
    }

    #[test]
    fn unknown_kind_is_custom() {
        let kind = ServiceKind::from("SparkApplication".to_string());
        assert_eq!(kind, ServiceKind::Custom("SparkApplication".to_string()));
        assert_eq!(kind.to_string(), "SparkApplication");
    }

    #[test]
    fn service_kind_serializes_as_plain_string() {
        let json = serde_json::to_string(&ServiceKind::DaemonSet).unwrap();
        assert_eq!(json, "\"DaemonSet\"");
    }

    #[test]
    fn resource_version_parsing() {
        assert_eq!(parse_resource_version(Some("12345")), 12345);
        assert_eq!(parse_resource_version(Some("abc")), 0);
        assert_eq!(parse_resource_version(None), 0);
    }

    #[test]
    fn service_key_uses_kind_name() {
        let info = ServiceInfo {
            resource_version: 1,
            name: "web".to_string(),
            namespace: "shop".to_string(),
            service_type: ServiceKind::Rollout,
            service_config: ServiceConfig::default(),
            ready_pods: 2,
            total_pods: 3,
            is_helm_release: false,
        };
        assert_eq!(info.service_key().to_string(), "shop/Rollout/web");
    }
}
