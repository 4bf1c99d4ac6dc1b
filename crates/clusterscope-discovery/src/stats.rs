//! Cheap cluster sizing.
//!
//! Counts are estimated from a single `limit=1` list call per kind: the
//! server's remaining-item hint plus the items returned. A kind whose call
//! fails is reported as `None` rather than zero.

use std::collections::BTreeMap;
use std::sync::Arc;

use clusterscope_core::{ClusterProvider, ClusterStats};
use k8s_openapi::api::core::v1::Node;
use serde_json::Value;
use tracing::{debug, warn};

use crate::api::{ApiResult, ClusterApi, ListPage, PageRequest, ResourceRef};
use crate::lister::{structural_error, Lister};
use crate::records::decode_object;
use crate::types::DiscoveryConfig;
use crate::{DiscoveryError, Result};

const CORE_KINDS: [(&str, &str); 12] = [
    ("pods", "Pod"),
    ("configmaps", "ConfigMap"),
    ("endpoints", "Endpoints"),
    ("services", "Service"),
    ("secrets", "Secret"),
    ("persistentvolumeclaims", "PersistentVolumeClaim"),
    ("serviceaccounts", "ServiceAccount"),
    ("replicationcontrollers", "ReplicationController"),
    ("limitranges", "LimitRange"),
    ("resourcequotas", "ResourceQuota"),
    ("events", "Event"),
    ("podtemplates", "PodTemplate"),
];

fn approximate<T>(kind: &str, page: ApiResult<ListPage<T>>) -> Option<u64> {
    match page {
        Ok(page) => {
            let remaining = page
                .remaining_item_count
                .and_then(|n| u64::try_from(n).ok())
                .unwrap_or(0);
            Some(remaining + page.items.len() as u64)
        }
        Err(e) => {
            warn!(kind, error = %e, "Failed to count resources");
            None
        }
    }
}

/// Detect the hosting provider from a node's labels, provider ID and name.
#[must_use]
pub fn detect_provider(node: &Node) -> ClusterProvider {
    const LABEL_PREFIXES: [(&str, ClusterProvider); 7] = [
        ("cloud.google.com/gke", ClusterProvider::Gke),
        ("eks.amazonaws.com/", ClusterProvider::Eks),
        ("kubernetes.azure.com/", ClusterProvider::Aks),
        ("node.openshift.io/", ClusterProvider::Openshift),
        ("minikube.k8s.io/", ClusterProvider::Minikube),
        ("doks.digitalocean.com/", ClusterProvider::DigitalOcean),
        ("rke.cattle.io/", ClusterProvider::Rke),
    ];
    const PROVIDER_ID_PREFIXES: [(&str, ClusterProvider); 6] = [
        ("gce://", ClusterProvider::Gke),
        ("aws://", ClusterProvider::Eks),
        ("azure://", ClusterProvider::Aks),
        ("kind://", ClusterProvider::Kind),
        ("k3s://", ClusterProvider::K3s),
        ("digitalocean://", ClusterProvider::DigitalOcean),
    ];

    if let Some(labels) = &node.metadata.labels {
        for (prefix, provider) in LABEL_PREFIXES {
            if labels.keys().any(|k| k.starts_with(prefix)) {
                return provider;
            }
        }
        if labels.get("node.kubernetes.io/instance-type").map(String::as_str) == Some("k3s") {
            return ClusterProvider::K3s;
        }
    }

    if let Some(provider_id) = node.spec.as_ref().and_then(|s| s.provider_id.as_deref()) {
        for (prefix, provider) in PROVIDER_ID_PREFIXES {
            if provider_id.starts_with(prefix) {
                return provider;
            }
        }
    }

    match node.metadata.name.as_deref() {
        Some("minikube") => ClusterProvider::Minikube,
        Some(name) if name.starts_with("kind-") => ClusterProvider::Kind,
        _ => ClusterProvider::Unknown,
    }
}

/// Estimates cluster size and counts resources by namespace.
pub struct StatsEstimator {
    api: Arc<dyn ClusterApi>,
    lister: Lister,
    provider_override: Option<ClusterProvider>,
}

impl StatsEstimator {
    /// Create an estimator.
    #[must_use]
    pub fn new(api: Arc<dyn ClusterApi>, config: &DiscoveryConfig) -> Self {
        Self {
            api,
            lister: Lister::new(config.batch_size, config.max_batches),
            provider_override: config.cluster_provider,
        }
    }

    /// Estimate per-kind counts, the server version and the provider.
    ///
    /// Each kind is counted independently; a failure leaves only that
    /// kind's count unset.
    pub async fn estimate_stats(&self) -> ClusterStats {
        let one = PageRequest::first(1);
        let api = self.api.as_ref();

        let nodes_page = api.list_nodes(&one).await;
        let first_node = nodes_page
            .as_ref()
            .ok()
            .and_then(|page| page.items.first())
            .and_then(|object| match decode_object::<Node>("nodes", object.clone()) {
                Ok(node) => Some(node),
                Err(e) => {
                    warn!(error = %e, "Failed to decode node for provider detection");
                    None
                }
            });

        let k8s_version = match api.server_version().await {
            Ok(version) => Some(version),
            Err(e) => {
                warn!(error = %e, "Failed to get server version");
                None
            }
        };

        let provider = self.provider_override.unwrap_or_else(|| {
            first_node
                .as_ref()
                .map_or(ClusterProvider::Unknown, detect_provider)
        });

        let stats = ClusterStats {
            deployments: approximate("deployments", api.list_deployments(&one).await),
            statefulsets: approximate("statefulsets", api.list_stateful_sets(&one).await),
            daemonsets: approximate("daemonsets", api.list_daemon_sets(&one).await),
            replicasets: approximate("replicasets", api.list_replica_sets(&one).await),
            pods: approximate("pods", api.list_pods(&one).await),
            nodes: approximate("nodes", nodes_page),
            jobs: approximate("jobs", api.list_jobs(&one).await),
            provider,
            k8s_version,
        };
        debug!(?stats, "Estimated cluster stats");
        stats
    }

    /// Count objects of a resource per namespace.
    ///
    /// An empty `group` selects a core `v1` kind by plural name; unknown core
    /// kinds and versions yield an empty map. Objects without a namespace
    /// are not counted. A grouped kind whose listing fails for any reason
    /// other than a permission denial is counted from the pages fetched
    /// before the failure.
    ///
    /// # Errors
    ///
    /// Returns `AccessForbidden` if listing is forbidden, or `ListFailed` if
    /// the single core-kind list call fails.
    pub async fn count_resources(
        &self,
        kind: &str,
        group: &str,
        version: &str,
    ) -> Result<BTreeMap<String, u64>> {
        let plural = kind.to_ascii_lowercase();
        let api = self.api.as_ref();

        let items = if group.is_empty() {
            if version != "v1" {
                warn!(kind, version, "Unsupported core resource version");
                return Ok(BTreeMap::new());
            }
            let Some((_, kind_name)) = CORE_KINDS.iter().find(|(p, _)| *p == plural) else {
                warn!(kind, "No core mapping for resource kind");
                return Ok(BTreeMap::new());
            };
            let resource = ResourceRef::new("", version, &plural, kind_name);
            api.list_objects(&resource, &PageRequest::default())
                .await
                .map_err(|e| structural_error(&plural, e))?
                .items
        } else {
            let resource = ResourceRef::new(group, version, &plural, kind);
            let resource = &resource;
            let listing = self
                .lister
                .list_all(&plural, None, |req| async move {
                    api.list_objects(resource, &req).await
                })
                .await;
            match listing {
                Ok(listing) => listing.items,
                Err(DiscoveryError::ListFailed { message, .. }) => {
                    warn!(
                        kind,
                        group,
                        version,
                        error = %message,
                        "Failed to list resources, counting none"
                    );
                    Vec::new()
                }
                Err(e) => return Err(e),
            }
        };

        Ok(count_by_namespace(&plural, &items))
    }
}

fn count_by_namespace(kind: &str, items: &[Value]) -> BTreeMap<String, u64> {
    let mut counts = BTreeMap::new();
    for item in items {
        match item
            .pointer("/metadata/namespace")
            .and_then(Value::as_str)
            .filter(|ns| !ns.is_empty())
        {
            Some(namespace) => *counts.entry(namespace.to_string()).or_insert(0) += 1,
            None => warn!(
                kind,
                name = item.pointer("/metadata/name").and_then(serde_json::Value::as_str).unwrap_or_default(),
                "Resource has no namespace, not counted"
            ),
        }
    }
    counts
}
