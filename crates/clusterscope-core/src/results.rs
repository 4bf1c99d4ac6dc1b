//! The aggregate snapshot of one discovery pass, and cluster size estimates.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::helm::HelmRelease;
use crate::jobs::JobInfo;
use crate::nodes::{NodeInfo, PodRequests};
use crate::types::{NamespaceInfo, OpenshiftGroup, ServiceInfo};

/// An item that did not make it into the snapshot, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedItem {
    /// Resource kind being discovered.
    pub kind: String,
    /// Object name, when it could be read.
    pub name: Option<String>,
    /// Why the item was skipped or the listing truncated.
    pub reason: String,
}

/// Everything one discovery pass found.
///
/// Built once per pass and handed to the caller by value; nothing in it is
/// carried over from a previous pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryResults {
    /// Reported workload-like units.
    pub services: Vec<ServiceInfo>,
    /// Nodes with the requests of the pods scheduled onto them.
    pub nodes: Vec<NodeInfo>,
    /// Pod requests keyed by node name.
    pub node_requests: BTreeMap<String, Vec<PodRequests>>,
    /// Jobs with their correlated pods.
    pub jobs: Vec<JobInfo>,
    /// Namespace snapshots.
    pub namespaces: Vec<NamespaceInfo>,
    /// Latest revision of each package-manager release.
    pub helm_releases: Vec<HelmRelease>,
    /// Pods observed in the `Running` phase.
    pub pods_running_count: usize,
    /// OpenShift groups with the namespaces they are bound in.
    pub openshift_groups: Vec<OpenshiftGroup>,
    /// Malformed items and truncated listings.
    pub skipped: Vec<SkippedItem>,
}

/// The hosting provider of the cluster.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClusterProvider {
    /// Google Kubernetes Engine.
    Gke,
    /// Amazon Elastic Kubernetes Service.
    Eks,
    /// Azure Kubernetes Service.
    Aks,
    /// Red Hat OpenShift.
    Openshift,
    /// Kubernetes in Docker.
    Kind,
    /// Minikube.
    Minikube,
    /// K3s.
    K3s,
    /// Rancher Kubernetes Engine.
    Rke,
    /// DigitalOcean Kubernetes.
    DigitalOcean,
    /// Not recognised.
    #[default]
    Unknown,
}

impl ClusterProvider {
    /// Parse a provider name as used in configuration, case-insensitively.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "gke" => Some(Self::Gke),
            "eks" => Some(Self::Eks),
            "aks" => Some(Self::Aks),
            "openshift" => Some(Self::Openshift),
            "kind" => Some(Self::Kind),
            "minikube" => Some(Self::Minikube),
            "k3s" => Some(Self::K3s),
            "rke" => Some(Self::Rke),
            "digital_ocean" | "digitalocean" => Some(Self::DigitalOcean),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }
}

impl fmt::Display for ClusterProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Gke => "GKE",
            Self::Eks => "EKS",
            Self::Aks => "AKS",
            Self::Openshift => "OPENSHIFT",
            Self::Kind => "KIND",
            Self::Minikube => "MINIKUBE",
            Self::K3s => "K3S",
            Self::Rke => "RKE",
            Self::DigitalOcean => "DIGITAL_OCEAN",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

/// Approximate cluster size.
///
/// A `None` count means the count could not be obtained, which is distinct
/// from a cluster that has zero objects of that kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterStats {
    /// Deployments.
    pub deployments: Option<u64>,
    /// StatefulSets.
    pub statefulsets: Option<u64>,
    /// DaemonSets.
    pub daemonsets: Option<u64>,
    /// ReplicaSets.
    pub replicasets: Option<u64>,
    /// Pods.
    pub pods: Option<u64>,
    /// Nodes.
    pub nodes: Option<u64>,
    /// Jobs.
    pub jobs: Option<u64>,
    /// Detected hosting provider.
    pub provider: ClusterProvider,
    /// API server git version.
    pub k8s_version: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_names() {
        assert_eq!(ClusterProvider::from_name("gke"), Some(ClusterProvider::Gke));
        assert_eq!(ClusterProvider::from_name("EKS"), Some(ClusterProvider::Eks));
        assert_eq!(
            ClusterProvider::from_name("DigitalOcean"),
            Some(ClusterProvider::DigitalOcean)
        );
        assert_eq!(ClusterProvider::from_name("mainframe"), None);
        assert_eq!(ClusterProvider::DigitalOcean.to_string(), "DIGITAL_OCEAN");
    }

    #[test]
    fn unknown_counts_serialize_as_null() {
        let stats = ClusterStats {
            deployments: Some(8),
            ..ClusterStats::default()
        };
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["deployments"], 8);
        assert!(json["pods"].is_null());
        assert_eq!(json["provider"], "UNKNOWN");
    }
}
