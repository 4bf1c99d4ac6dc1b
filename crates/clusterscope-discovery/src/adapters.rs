//! Workload adapters.
//!
//! The same logical workload reaches discovery in one of two shapes: a typed
//! `k8s-openapi` object from the core listings, or an untyped JSON object from
//! custom-resource listings. Both implement [`WorkloadAdapter`], and
//! [`RawWorkload`] tags which shape an object arrived in so that
//! [`build_service_info`] can treat them the same way.

use std::borrow::Cow;
use std::collections::BTreeMap;

use clusterscope_core::{
    parse_resource_version, ContainerInfo, EnvVarInfo, ResourceInfo, ServiceConfig, ServiceInfo,
    ServiceKind, VolumeInfo,
};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::core::v1::{Container, EnvVar, Pod, PodSpec, Volume};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::api::ObjectMeta;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;

use crate::types::CustomResourceDef;
use crate::{DiscoveryError, Result};

/// Outcome of extracting one field; the error describes what was malformed.
pub type Extract<T> = std::result::Result<T, String>;

const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
const MANAGED_BY_VALUE: &str = "Helm";
const HELM_KEY_PREFIXES: [&str; 2] = ["helm.", "meta.helm."];

/// Uniform read access to a workload object.
pub trait WorkloadAdapter {
    /// Kind reported for the workload.
    fn kind(&self) -> ServiceKind;

    /// Object metadata.
    ///
    /// # Errors
    ///
    /// Returns a reason if the metadata is missing or malformed.
    fn metadata(&self) -> Extract<Cow<'_, ObjectMeta>>;

    /// Containers of the pod template.
    ///
    /// # Errors
    ///
    /// Returns a reason if the containers are malformed.
    fn containers(&self) -> Extract<Vec<ContainerInfo>>;

    /// Volumes of the pod template.
    ///
    /// # Errors
    ///
    /// Returns a reason if the volumes are malformed.
    fn volumes(&self) -> Extract<Vec<VolumeInfo>>;

    /// Desired pod count.
    ///
    /// # Errors
    ///
    /// Returns a reason if the count is malformed.
    fn total_pods(&self) -> Extract<u32>;

    /// Ready pod count.
    ///
    /// # Errors
    ///
    /// Returns a reason if the count is malformed.
    fn ready_pods(&self) -> Extract<u32>;
}

/// A workload delivered as a typed API object.
#[derive(Debug, Clone, Copy)]
pub enum TypedWorkload<'a> {
    /// A deployment.
    Deployment(&'a Deployment),
    /// A stateful set.
    StatefulSet(&'a StatefulSet),
    /// A daemon set.
    DaemonSet(&'a DaemonSet),
    /// A replica set.
    ReplicaSet(&'a ReplicaSet),
    /// A pod.
    Pod(&'a Pod),
}

macro_rules! typed_workload_from {
    ($($kind:ident),*) => {
        $(
            impl<'a> From<&'a $kind> for TypedWorkload<'a> {
                fn from(object: &'a $kind) -> Self {
                    Self::$kind(object)
                }
            }
        )*
    };
}

typed_workload_from!(Deployment, StatefulSet, DaemonSet, ReplicaSet, Pod);

impl TypedWorkload<'_> {
    fn pod_spec(&self) -> Option<&PodSpec> {
        match self {
            Self::Deployment(d) => d.spec.as_ref()?.template.spec.as_ref(),
            Self::StatefulSet(s) => s.spec.as_ref()?.template.spec.as_ref(),
            Self::DaemonSet(d) => d.spec.as_ref()?.template.spec.as_ref(),
            Self::ReplicaSet(r) => r.spec.as_ref()?.template.as_ref()?.spec.as_ref(),
            Self::Pod(p) => p.spec.as_ref(),
        }
    }
}

impl WorkloadAdapter for TypedWorkload<'_> {
    fn kind(&self) -> ServiceKind {
        match self {
            Self::Deployment(_) => ServiceKind::Deployment,
            Self::StatefulSet(_) => ServiceKind::StatefulSet,
            Self::DaemonSet(_) => ServiceKind::DaemonSet,
            Self::ReplicaSet(_) => ServiceKind::ReplicaSet,
            Self::Pod(_) => ServiceKind::Pod,
        }
    }

    fn metadata(&self) -> Extract<Cow<'_, ObjectMeta>> {
        let meta = match self {
            Self::Deployment(d) => &d.metadata,
            Self::StatefulSet(s) => &s.metadata,
            Self::DaemonSet(d) => &d.metadata,
            Self::ReplicaSet(r) => &r.metadata,
            Self::Pod(p) => &p.metadata,
        };
        Ok(Cow::Borrowed(meta))
    }

    fn containers(&self) -> Extract<Vec<ContainerInfo>> {
        Ok(self
            .pod_spec()
            .map(|spec| spec.containers.iter().map(container_info).collect())
            .unwrap_or_default())
    }

    fn volumes(&self) -> Extract<Vec<VolumeInfo>> {
        Ok(self
            .pod_spec()
            .and_then(|spec| spec.volumes.as_ref())
            .map(|volumes| volumes.iter().map(volume_info).collect())
            .unwrap_or_default())
    }

    fn total_pods(&self) -> Extract<u32> {
        match self {
            Self::Deployment(d) => count(
                d.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1),
                "spec.replicas",
            ),
            Self::StatefulSet(s) => count(
                s.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1),
                "spec.replicas",
            ),
            Self::ReplicaSet(r) => count(
                r.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1),
                "spec.replicas",
            ),
            Self::DaemonSet(d) => count(
                d.status.as_ref().map_or(0, |s| s.desired_number_scheduled),
                "status.desiredNumberScheduled",
            ),
            Self::Pod(_) => Ok(1),
        }
    }

    fn ready_pods(&self) -> Extract<u32> {
        match self {
            Self::Deployment(d) => count(
                d.status.as_ref().and_then(|s| s.ready_replicas).unwrap_or(0),
                "status.readyReplicas",
            ),
            Self::StatefulSet(s) => count(
                s.status.as_ref().and_then(|s| s.ready_replicas).unwrap_or(0),
                "status.readyReplicas",
            ),
            Self::ReplicaSet(r) => count(
                r.status.as_ref().and_then(|s| s.ready_replicas).unwrap_or(0),
                "status.readyReplicas",
            ),
            Self::DaemonSet(d) => count(
                d.status.as_ref().map_or(0, |s| s.number_ready),
                "status.numberReady",
            ),
            Self::Pod(p) => Ok(u32::from(is_pod_ready(p))),
        }
    }
}

/// Where an untyped workload keeps its replica counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicaRule {
    /// `spec/replicas` (default 1) and `status/readyReplicas`.
    SpecReplicas,
    /// `status/replicas` (default 1) and `status/readyReplicas`.
    StatusReplicas,
    /// `status/desiredNumberScheduled` and `status/numberReady`.
    DaemonSet,
    /// One pod, ready when its `Ready` condition is true.
    Pod,
    /// Configured paths, both defaulting to 0.
    Paths {
        /// Path to the ready count.
        ready: String,
        /// Path to the desired count.
        total: String,
    },
}

impl ReplicaRule {
    /// The rule for a built-in kind.
    #[must_use]
    pub fn for_kind(kind: &ServiceKind) -> Self {
        match kind {
            ServiceKind::Rollout => Self::StatusReplicas,
            ServiceKind::DaemonSet => Self::DaemonSet,
            ServiceKind::Pod => Self::Pod,
            ServiceKind::Custom(_) => Self::Paths {
                ready: "status/readyReplicas".to_string(),
                total: "spec/replicas".to_string(),
            },
            _ => Self::SpecReplicas,
        }
    }
}

/// A workload delivered as untyped JSON.
#[derive(Debug, Clone)]
pub struct UntypedWorkload<'a> {
    kind: ServiceKind,
    object: &'a Value,
    rule: ReplicaRule,
}

impl<'a> UntypedWorkload<'a> {
    /// Wrap an object of a built-in kind.
    #[must_use]
    pub fn new(kind: ServiceKind, object: &'a Value) -> Self {
        let rule = ReplicaRule::for_kind(&kind);
        Self { kind, object, rule }
    }

    /// Wrap an object of a configured custom resource kind.
    #[must_use]
    pub fn custom(def: &CustomResourceDef, object: &'a Value) -> Self {
        Self {
            kind: ServiceKind::from(def.name.clone()),
            object,
            rule: ReplicaRule::Paths {
                ready: def.ready_pods_path.clone(),
                total: def.total_pods_path.clone(),
            },
        }
    }

    fn pod_spec_path(&self) -> Option<&'static str> {
        match self.rule {
            ReplicaRule::Paths { .. } => None,
            ReplicaRule::Pod => Some("spec"),
            _ => Some("spec/template/spec"),
        }
    }

    fn pod_spec_field<T: DeserializeOwned>(&self, field: &str) -> Extract<Vec<T>> {
        let Some(base) = self.pod_spec_path() else {
            return Ok(Vec::new());
        };
        let path = format!("{base}/{field}");
        match lookup(self.object, &path) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(value) => {
                serde_json::from_value(value.clone()).map_err(|e| format!("{path}: {e}"))
            }
        }
    }
}

impl WorkloadAdapter for UntypedWorkload<'_> {
    fn kind(&self) -> ServiceKind {
        self.kind.clone()
    }

    fn metadata(&self) -> Extract<Cow<'_, ObjectMeta>> {
        let meta = self.object.get("metadata").ok_or("missing metadata")?;
        serde_json::from_value(meta.clone())
            .map(Cow::Owned)
            .map_err(|e| format!("metadata: {e}"))
    }

    fn containers(&self) -> Extract<Vec<ContainerInfo>> {
        let containers: Vec<Container> = self.pod_spec_field("containers")?;
        Ok(containers.iter().map(container_info).collect())
    }

    fn volumes(&self) -> Extract<Vec<VolumeInfo>> {
        let volumes: Vec<Volume> = self.pod_spec_field("volumes")?;
        Ok(volumes.iter().map(volume_info).collect())
    }

    fn total_pods(&self) -> Extract<u32> {
        match &self.rule {
            ReplicaRule::SpecReplicas => count_at(self.object, "spec/replicas", 1),
            ReplicaRule::StatusReplicas => count_at(self.object, "status/replicas", 1),
            ReplicaRule::DaemonSet => count_at(self.object, "status/desiredNumberScheduled", 0),
            ReplicaRule::Pod => Ok(1),
            ReplicaRule::Paths { total, .. } => count_at(self.object, total, 0),
        }
    }

    fn ready_pods(&self) -> Extract<u32> {
        match &self.rule {
            ReplicaRule::SpecReplicas | ReplicaRule::StatusReplicas => {
                count_at(self.object, "status/readyReplicas", 0)
            }
            ReplicaRule::DaemonSet => count_at(self.object, "status/numberReady", 0),
            ReplicaRule::Pod => {
                let ready = lookup(self.object, "status/conditions")
                    .and_then(Value::as_array)
                    .and_then(|conditions| {
                        conditions
                            .iter()
                            .find(|c| c.get("type").and_then(Value::as_str) == Some("Ready"))
                    })
                    .and_then(|c| c.get("status").and_then(Value::as_str))
                    .is_some_and(|status| status.eq_ignore_ascii_case("true"));
                Ok(u32::from(ready))
            }
            ReplicaRule::Paths { ready, .. } => count_at(self.object, ready, 0),
        }
    }
}

/// A workload in either shape, tagged at the listing boundary.
#[derive(Debug, Clone)]
pub enum RawWorkload<'a> {
    /// A typed API object.
    Typed(TypedWorkload<'a>),
    /// An untyped JSON object.
    Untyped(UntypedWorkload<'a>),
}

impl WorkloadAdapter for RawWorkload<'_> {
    fn kind(&self) -> ServiceKind {
        match self {
            Self::Typed(w) => w.kind(),
            Self::Untyped(w) => w.kind(),
        }
    }

    fn metadata(&self) -> Extract<Cow<'_, ObjectMeta>> {
        match self {
            Self::Typed(w) => w.metadata(),
            Self::Untyped(w) => w.metadata(),
        }
    }

    fn containers(&self) -> Extract<Vec<ContainerInfo>> {
        match self {
            Self::Typed(w) => w.containers(),
            Self::Untyped(w) => w.containers(),
        }
    }

    fn volumes(&self) -> Extract<Vec<VolumeInfo>> {
        match self {
            Self::Typed(w) => w.volumes(),
            Self::Untyped(w) => w.volumes(),
        }
    }

    fn total_pods(&self) -> Extract<u32> {
        match self {
            Self::Typed(w) => w.total_pods(),
            Self::Untyped(w) => w.total_pods(),
        }
    }

    fn ready_pods(&self) -> Extract<u32> {
        match self {
            Self::Typed(w) => w.ready_pods(),
            Self::Untyped(w) => w.ready_pods(),
        }
    }
}

/// Build the service record for a workload.
///
/// Malformed containers, volumes or counts are logged and replaced by an
/// empty or zero value.
///
/// # Errors
///
/// Returns an item-level error if the metadata or name cannot be read.
pub fn build_service_info(workload: &impl WorkloadAdapter) -> Result<ServiceInfo> {
    let kind = workload.kind();
    let meta = workload
        .metadata()
        .map_err(|reason| DiscoveryError::item(kind.as_str(), None, reason))?;
    let name = meta
        .name
        .clone()
        .ok_or_else(|| DiscoveryError::item(kind.as_str(), None, "missing metadata.name"))?;

    let containers = or_default(workload.containers(), &kind, &name, "containers");
    let volumes = or_default(workload.volumes(), &kind, &name, "volumes");
    let total_pods = or_default(workload.total_pods(), &kind, &name, "total pods");
    let ready_pods = or_default(workload.ready_pods(), &kind, &name, "ready pods");

    Ok(ServiceInfo {
        resource_version: parse_resource_version(meta.resource_version.as_deref()),
        namespace: meta.namespace.clone().unwrap_or_default(),
        service_type: kind,
        service_config: ServiceConfig {
            labels: meta.labels.clone().unwrap_or_default(),
            containers,
            volumes,
        },
        ready_pods,
        total_pods,
        is_helm_release: is_release_managed_by_helm(
            meta.labels.as_ref(),
            meta.annotations.as_ref(),
        ),
        name,
    })
}

fn or_default<T: Default>(value: Extract<T>, kind: &ServiceKind, name: &str, what: &str) -> T {
    value.unwrap_or_else(|reason| {
        warn!(kind = %kind, name, field = what, reason = %reason, "Failed to extract field, using default");
        T::default()
    })
}

/// Check whether labels or annotations mark an object as release-managed.
#[must_use]
pub fn is_release_managed_by_helm(
    labels: Option<&BTreeMap<String, String>>,
    annotations: Option<&BTreeMap<String, String>>,
) -> bool {
    let has_helm_key = |map: &BTreeMap<String, String>| {
        map.keys()
            .any(|key| HELM_KEY_PREFIXES.iter().any(|p| key.starts_with(p)))
    };

    if let Some(labels) = labels {
        if labels.get(MANAGED_BY_LABEL).map(String::as_str) == Some(MANAGED_BY_VALUE) {
            return true;
        }
        if has_helm_key(labels) {
            return true;
        }
    }
    annotations.is_some_and(has_helm_key)
}

/// Check whether a pod's `Ready` condition is true.
#[must_use]
pub fn is_pod_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .and_then(|conditions| conditions.iter().find(|c| c.type_ == "Ready"))
        .is_some_and(|c| c.status.eq_ignore_ascii_case("true"))
}

/// Convert a container spec into its canonical record.
#[must_use]
pub fn container_info(container: &Container) -> ContainerInfo {
    let quantities = |map: Option<&BTreeMap<String, Quantity>>| {
        map.map(|m| m.iter().map(|(k, q)| (k.clone(), q.0.clone())).collect())
            .unwrap_or_default()
    };
    let resources = container.resources.as_ref();

    ContainerInfo {
        name: container.name.clone(),
        image: container.image.clone().unwrap_or_default(),
        env: container
            .env
            .as_ref()
            .map(|env| env.iter().map(env_var_info).collect())
            .unwrap_or_default(),
        resources: ResourceInfo {
            requests: quantities(resources.and_then(|r| r.requests.as_ref())),
            limits: quantities(resources.and_then(|r| r.limits.as_ref())),
        },
        ports: container
            .ports
            .as_ref()
            .map(|ports| ports.iter().map(|p| p.container_port).collect())
            .unwrap_or_default(),
    }
}

fn env_var_info(var: &EnvVar) -> EnvVarInfo {
    let value = match (&var.value, &var.value_from) {
        (Some(value), _) => value.clone(),
        (None, Some(source)) => {
            if let Some(secret) = &source.secret_key_ref {
                format!("secretKeyRef:{}", secret.key)
            } else if let Some(config_map) = &source.config_map_key_ref {
                format!("configMapKeyRef:{}", config_map.key)
            } else if let Some(field) = &source.field_ref {
                format!("fieldRef:{}", field.field_path)
            } else if let Some(resource) = &source.resource_field_ref {
                format!("resourceFieldRef:{}", resource.resource)
            } else {
                String::new()
            }
        }
        (None, None) => String::new(),
    };
    EnvVarInfo {
        name: var.name.clone(),
        value,
    }
}

fn volume_info(volume: &Volume) -> VolumeInfo {
    VolumeInfo {
        name: volume.name.clone(),
        persistent_volume_claim: volume
            .persistent_volume_claim
            .as_ref()
            .map(|pvc| pvc.claim_name.clone()),
    }
}

fn count(value: i32, field: &str) -> Extract<u32> {
    u32::try_from(value).map_err(|_| format!("{field} is negative: {value}"))
}

/// Look up a `/`-separated path in a JSON object.
#[must_use]
pub fn lookup<'v>(object: &'v Value, path: &str) -> Option<&'v Value> {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .try_fold(object, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
}

fn count_at(object: &Value, path: &str, default: u32) -> Extract<u32> {
    match lookup(object, path) {
        None | Some(Value::Null) => Ok(default),
        Some(value) => value
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| format!("{path} is not a count: {value}")),
    }
}
