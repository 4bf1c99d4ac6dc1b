//! Types for the discovery crate.

use std::path::PathBuf;
use std::time::Duration;

use clusterscope_core::ClusterProvider;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::api::ResourceRef;

/// Phase of the pod lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PodPhase {
    /// Pod has been accepted but containers are not yet running.
    Pending,
    /// Pod is running with at least one container.
    Running,
    /// All containers terminated successfully.
    Succeeded,
    /// At least one container failed.
    Failed,
    /// The node stopped reporting the pod's state.
    Unknown,
}

impl PodPhase {
    /// Parse a pod phase from a Kubernetes phase string, case-insensitively.
    ///
    /// Unrecognised strings yield `None`, not `Unknown`: `Unknown` is a real
    /// phase reported by the API server.
    #[must_use]
    pub fn from_k8s_phase(phase: &str) -> Option<Self> {
        match phase.to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }

    /// Check if the pod is in a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Check if the pod's requests count toward its node's allocation.
    #[must_use]
    pub const fn holds_node_resources(&self) -> bool {
        matches!(self, Self::Running | Self::Unknown | Self::Pending)
    }
}

/// A custom resource kind discovered as a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomResourceDef {
    /// Kind name reported as the service type.
    pub name: String,
    /// API group.
    pub group: String,
    /// API version.
    pub version: String,
    /// Plural resource name.
    pub plural: String,
    /// `/`-separated path to the ready pod count.
    #[serde(default = "CustomResourceDef::default_ready_path")]
    pub ready_pods_path: String,
    /// `/`-separated path to the desired pod count.
    #[serde(default = "CustomResourceDef::default_total_path")]
    pub total_pods_path: String,
}

impl CustomResourceDef {
    fn default_ready_path() -> String {
        "status/readyReplicas".to_string()
    }

    fn default_total_path() -> String {
        "spec/replicas".to_string()
    }

    /// The API coordinates used to list this kind.
    #[must_use]
    pub fn resource(&self) -> ResourceRef {
        ResourceRef::new(&self.group, &self.version, &self.plural, &self.name)
    }
}

/// Configuration for discovery passes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Items requested per page.
    pub batch_size: u32,
    /// Maximum pages fetched per resource kind.
    pub max_batches: u32,
    /// Deadline for one pass, in seconds.
    pub process_timeout_seconds: u64,
    /// Interval between passes, in seconds.
    pub period_seconds: u64,
    /// Report pods whose only owners are other pods.
    pub pod_owned_pods: bool,
    /// Discover package-manager releases.
    pub helm_monitoring: bool,
    /// Discover OpenShift DeploymentConfigs.
    pub is_openshift: bool,
    /// Discover OpenShift groups.
    pub openshift_groups: bool,
    /// Discover Argo Rollouts.
    pub argo_rollouts: bool,
    /// Additional custom resource kinds.
    pub custom_crds: Vec<CustomResourceDef>,
    /// Marker file requesting a stack dump of the running pass.
    pub stacktrace_file: PathBuf,
    /// How often the marker file is checked, in seconds.
    pub stacktrace_poll_seconds: u64,
    /// Hosting provider, overriding detection.
    pub cluster_provider: Option<ClusterProvider>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            batch_size: 30_000,
            max_batches: 25,
            process_timeout_seconds: 60 * 120,
            period_seconds: 90,
            pod_owned_pods: false,
            helm_monitoring: true,
            is_openshift: false,
            openshift_groups: false,
            argo_rollouts: false,
            custom_crds: Vec::new(),
            stacktrace_file: PathBuf::from("/tmp/make_discovery_stacktrace"),
            stacktrace_poll_seconds: 10,
            cluster_provider: None,
        }
    }
}

impl DiscoveryConfig {
    /// Load configuration from environment variables.
    ///
    /// Supported environment variables:
    /// - `DISCOVERY_BATCH_SIZE`: Items requested per page
    /// - `DISCOVERY_MAX_BATCHES`: Maximum pages per resource kind
    /// - `DISCOVERY_PROCESS_TIMEOUT_SEC`: Deadline for one pass
    /// - `DISCOVERY_PERIOD_SEC`: Interval between passes
    /// - `DISCOVERY_POD_OWNED_PODS`: Report pods owned only by pods
    /// - `DISABLE_HELM_MONITORING`: Skip release discovery
    /// - `IS_OPENSHIFT`: Discover DeploymentConfigs
    /// - `OPENSHIFT_GROUPS`: Discover OpenShift groups
    /// - `ARGO_ROLLOUTS`: Discover Argo Rollouts
    /// - `CUSTOM_CRD`: JSON list of custom resource definitions
    /// - `DISCOVERY_STACKTRACE_FILE`: Stack dump marker path
    /// - `DISCOVERY_STACKTRACE_TIMEOUT_S`: Marker poll interval
    /// - `CLUSTER_PROVIDER`: Hosting provider override
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(n) = parse_number(&lookup, "DISCOVERY_BATCH_SIZE") {
            config.batch_size = n;
        }
        if let Some(n) = parse_number(&lookup, "DISCOVERY_MAX_BATCHES") {
            config.max_batches = n;
        }
        if let Some(n) = parse_number(&lookup, "DISCOVERY_PROCESS_TIMEOUT_SEC") {
            config.process_timeout_seconds = n;
        }
        if let Some(n) = parse_number(&lookup, "DISCOVERY_PERIOD_SEC") {
            config.period_seconds = n;
        }
        if let Some(b) = parse_bool(&lookup, "DISCOVERY_POD_OWNED_PODS") {
            config.pod_owned_pods = b;
        }
        if let Some(b) = parse_bool(&lookup, "DISABLE_HELM_MONITORING") {
            config.helm_monitoring = !b;
        }
        if let Some(b) = parse_bool(&lookup, "IS_OPENSHIFT") {
            config.is_openshift = b;
        }
        if let Some(b) = parse_bool(&lookup, "OPENSHIFT_GROUPS") {
            config.openshift_groups = b;
        }
        if let Some(b) = parse_bool(&lookup, "ARGO_ROLLOUTS") {
            config.argo_rollouts = b;
        }
        if let Some(val) = lookup("CUSTOM_CRD") {
            match serde_json::from_str::<Vec<CustomResourceDef>>(&val) {
                Ok(crds) => config.custom_crds = crds,
                Err(e) => warn!(error = %e, "Ignoring invalid CUSTOM_CRD"),
            }
        }
        if let Some(val) = lookup("DISCOVERY_STACKTRACE_FILE") {
            config.stacktrace_file = PathBuf::from(val);
        }
        if let Some(n) = parse_number(&lookup, "DISCOVERY_STACKTRACE_TIMEOUT_S") {
            config.stacktrace_poll_seconds = n;
        }
        if let Some(val) = lookup("CLUSTER_PROVIDER") {
            config.cluster_provider = ClusterProvider::from_name(&val);
        }

        config
    }

    /// Validate the pagination and timeout settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch size, batch count, timeout or poll
    /// interval is zero.
    pub fn validate(&self) -> crate::Result<()> {
        if self.batch_size == 0 {
            return Err(crate::DiscoveryError::Config(
                "batch size must be positive".to_string(),
            ));
        }
        if self.max_batches == 0 {
            return Err(crate::DiscoveryError::Config(
                "max batches must be positive".to_string(),
            ));
        }
        if self.process_timeout_seconds == 0 {
            return Err(crate::DiscoveryError::Config(
                "process timeout must be positive".to_string(),
            ));
        }
        if self.stacktrace_poll_seconds == 0 {
            return Err(crate::DiscoveryError::Config(
                "stack trace poll interval must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Get the pass deadline as a `Duration`.
    #[must_use]
    pub fn process_timeout(&self) -> Duration {
        Duration::from_secs(self.process_timeout_seconds)
    }

    /// Get the pass interval as a `Duration`.
    #[must_use]
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_seconds)
    }

    /// Get the marker poll interval as a `Duration`.
    #[must_use]
    pub fn stacktrace_poll_interval(&self) -> Duration {
        Duration::from_secs(self.stacktrace_poll_seconds)
    }
}

fn parse_number<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let val = lookup(key)?;
    match val.trim().parse() {
        Ok(n) => Some(n),
        Err(_) => {
            warn!(key, value = %val, "Ignoring non-numeric setting");
            None
        }
    }
}

fn parse_bool(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<bool> {
    let val = lookup(key)?;
    match val.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => {
            warn!(key, value = %val, "Ignoring non-boolean setting");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn pod_phase_from_k8s() {
        assert_eq!(PodPhase::from_k8s_phase("Pending"), Some(PodPhase::Pending));
        assert_eq!(PodPhase::from_k8s_phase("Running"), Some(PodPhase::Running));
        assert_eq!(
            PodPhase::from_k8s_phase("succeeded"),
            Some(PodPhase::Succeeded)
        );
        assert_eq!(PodPhase::from_k8s_phase("Failed"), Some(PodPhase::Failed));
        assert_eq!(PodPhase::from_k8s_phase("Unknown"), Some(PodPhase::Unknown));
        assert_eq!(PodPhase::from_k8s_phase("Invalid"), None);
    }

    #[test]
    fn pod_phase_states() {
        assert!(PodPhase::Succeeded.is_terminal());
        assert!(PodPhase::Failed.is_terminal());
        assert!(!PodPhase::Running.is_terminal());

        assert!(PodPhase::Running.holds_node_resources());
        assert!(PodPhase::Pending.holds_node_resources());
        assert!(PodPhase::Unknown.holds_node_resources());
        assert!(!PodPhase::Succeeded.holds_node_resources());
    }

    #[test]
    fn config_defaults() {
        let config = DiscoveryConfig::default();
        assert_eq!(config.batch_size, 30_000);
        assert_eq!(config.max_batches, 25);
        assert_eq!(config.process_timeout(), Duration::from_secs(7200));
        assert!(config.helm_monitoring);
        assert!(!config.pod_owned_pods);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_from_lookup() {
        let config = DiscoveryConfig::from_lookup(lookup_from(&[
            ("DISCOVERY_BATCH_SIZE", "500"),
            ("DISCOVERY_MAX_BATCHES", "3"),
            ("DISABLE_HELM_MONITORING", "True"),
            ("ARGO_ROLLOUTS", "1"),
            ("DISCOVERY_POD_OWNED_PODS", "yes"),
            ("CLUSTER_PROVIDER", "eks"),
            (
                "CUSTOM_CRD",
                r#"[{"name":"SparkApp","group":"spark.io","version":"v1","plural":"sparkapps"}]"#,
            ),
        ]));

        assert_eq!(config.batch_size, 500);
        assert_eq!(config.max_batches, 3);
        assert!(!config.helm_monitoring);
        assert!(config.argo_rollouts);
        assert!(config.pod_owned_pods);
        assert_eq!(config.cluster_provider, Some(ClusterProvider::Eks));
        assert_eq!(config.custom_crds.len(), 1);
        assert_eq!(config.custom_crds[0].ready_pods_path, "status/readyReplicas");
        assert_eq!(config.custom_crds[0].total_pods_path, "spec/replicas");
    }

    #[test]
    fn invalid_values_keep_defaults() {
        let config = DiscoveryConfig::from_lookup(lookup_from(&[
            ("DISCOVERY_BATCH_SIZE", "lots"),
            ("IS_OPENSHIFT", "maybe"),
            ("CUSTOM_CRD", "not json"),
        ]));
        assert_eq!(config.batch_size, 30_000);
        assert!(!config.is_openshift);
        assert!(config.custom_crds.is_empty());
    }

    #[test]
    fn validate_rejects_zero_limits() {
        let config = DiscoveryConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = DiscoveryConfig {
            max_batches: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
