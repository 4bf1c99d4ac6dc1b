//! Conversion of API objects into canonical records.

use std::collections::{BTreeMap, HashMap};

use clusterscope_core::quantity::{parse_cpu_cores, parse_memory_mib};
use clusterscope_core::{
    parse_resource_version, JobInfo, JobStatus, NamespaceInfo, NodeInfo, OpenshiftGroup,
    PodRequests,
};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Namespace, Node, Pod};
use k8s_openapi::api::rbac::v1::RoleBinding;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::adapters::container_info;
use crate::{DiscoveryError, Result};

/// Decode one listed object into its typed model.
///
/// # Errors
///
/// Returns `ItemParse` naming the object when it does not fit the model.
pub fn decode_object<T: DeserializeOwned>(kind: &str, object: Value) -> Result<T> {
    let name = object
        .pointer("/metadata/name")
        .and_then(Value::as_str)
        .map(str::to_string);
    serde_json::from_value(object)
        .map_err(|e| DiscoveryError::item(kind, name.as_deref(), e.to_string()))
}

fn quantity(map: Option<&BTreeMap<String, Quantity>>, key: &str) -> Option<String> {
    map.and_then(|m| m.get(key)).map(|q| q.0.clone())
}

fn parse_or_zero(raw: Option<String>, parse: fn(&str) -> Option<f64>, what: &str) -> f64 {
    let Some(raw) = raw else {
        return 0.0;
    };
    parse(&raw).unwrap_or_else(|| {
        warn!(quantity = %raw, field = what, "Unparseable quantity, counting as zero");
        0.0
    })
}

/// Sum the cpu and memory requests of a pod's containers.
#[must_use]
pub fn pod_requests(pod: &Pod) -> PodRequests {
    let containers = pod.spec.as_ref().map_or(&[][..], |s| &s.containers[..]);
    let per_container: Vec<PodRequests> = containers
        .iter()
        .map(|c| {
            let requests = c.resources.as_ref().and_then(|r| r.requests.as_ref());
            PodRequests {
                cpu_req: parse_or_zero(quantity(requests, "cpu"), parse_cpu_cores, "cpu"),
                memory_req: parse_or_zero(
                    quantity(requests, "memory"),
                    parse_memory_mib,
                    "memory",
                ),
            }
        })
        .collect();
    PodRequests::total(&per_container)
}

fn is_condition_healthy(kind: &str, status: &str) -> bool {
    if kind == "Ready" {
        status == "True"
    } else {
        status == "False"
    }
}

/// Build a node record carrying the requests of the pods scheduled onto it.
///
/// # Errors
///
/// Returns an item-level error if the node has no name.
pub fn node_info(node: &Node, pod_requests: Vec<PodRequests>) -> Result<NodeInfo> {
    let name = node
        .metadata
        .name
        .clone()
        .ok_or_else(|| DiscoveryError::item("nodes", None, "missing metadata.name"))?;
    let status = node.status.as_ref();

    let address = |kind: &str| {
        status
            .and_then(|s| s.addresses.as_ref())
            .and_then(|addrs| addrs.iter().find(|a| a.type_ == kind))
            .map(|a| a.address.clone())
    };

    let taints = node
        .spec
        .as_ref()
        .and_then(|s| s.taints.as_ref())
        .map(|taints| {
            taints
                .iter()
                .map(|t| {
                    format!(
                        "{}={}:{}",
                        t.key,
                        t.value.as_deref().unwrap_or_default(),
                        t.effect
                    )
                })
                .collect()
        })
        .unwrap_or_default();

    let conditions = status
        .and_then(|s| s.conditions.as_ref())
        .map(|conditions| {
            conditions
                .iter()
                .filter(|c| !is_condition_healthy(&c.type_, &c.status))
                .map(|c| {
                    let detail = c.message.clone().unwrap_or_else(|| c.status.clone());
                    (c.type_.clone(), detail)
                })
                .collect()
        })
        .unwrap_or_default();

    let capacity = status.and_then(|s| s.capacity.as_ref());
    let allocatable = status.and_then(|s| s.allocatable.as_ref());
    let allocated = PodRequests::total(&pod_requests);

    let node_info = status
        .and_then(|s| s.node_info.as_ref())
        .map(|info| {
            BTreeMap::from([
                ("architecture".to_string(), info.architecture.clone()),
                ("kernel_version".to_string(), info.kernel_version.clone()),
                ("kubelet_version".to_string(), info.kubelet_version.clone()),
                ("os_image".to_string(), info.os_image.clone()),
                ("operating_system".to_string(), info.operating_system.clone()),
                (
                    "container_runtime_version".to_string(),
                    info.container_runtime_version.clone(),
                ),
            ])
        })
        .unwrap_or_default();

    Ok(NodeInfo {
        node_creation_time: node.metadata.creation_timestamp.as_ref().map(|t| t.0),
        internal_ip: address("InternalIP"),
        external_ip: address("ExternalIP"),
        taints,
        conditions,
        cpu_capacity: parse_or_zero(quantity(capacity, "cpu"), parse_cpu_cores, "cpu"),
        cpu_allocatable: parse_or_zero(quantity(allocatable, "cpu"), parse_cpu_cores, "cpu"),
        cpu_allocated: allocated.cpu_req,
        memory_capacity: parse_or_zero(quantity(capacity, "memory"), parse_memory_mib, "memory"),
        memory_allocatable: parse_or_zero(
            quantity(allocatable, "memory"),
            parse_memory_mib,
            "memory",
        ),
        memory_allocated: allocated.memory_req,
        pods_count: pod_requests.len(),
        node_info,
        resource_version: parse_resource_version(node.metadata.resource_version.as_deref()),
        pod_requests,
        name,
    })
}

/// Build a namespace record.
///
/// # Errors
///
/// Returns an item-level error if the namespace has no name.
pub fn namespace_info(namespace: &Namespace) -> Result<NamespaceInfo> {
    let meta = &namespace.metadata;
    let name = meta
        .name
        .clone()
        .ok_or_else(|| DiscoveryError::item("namespaces", None, "missing metadata.name"))?;
    Ok(NamespaceInfo {
        name,
        phase: namespace
            .status
            .as_ref()
            .and_then(|s| s.phase.clone())
            .unwrap_or_default(),
        labels: meta.labels.clone().unwrap_or_default(),
        annotations: meta.annotations.clone().unwrap_or_default(),
        resource_version: parse_resource_version(meta.resource_version.as_deref()),
    })
}

/// Build a job record with its correlated pod names.
///
/// # Errors
///
/// Returns an item-level error if the job has no name.
pub fn job_info(job: &Job, job_pods: Vec<String>) -> Result<JobInfo> {
    let meta = &job.metadata;
    let name = meta
        .name
        .clone()
        .ok_or_else(|| DiscoveryError::item("jobs", None, "missing metadata.name"))?;
    let spec = job.spec.as_ref();
    let status = job.status.as_ref();

    let failure = status
        .and_then(|s| s.conditions.as_ref())
        .and_then(|conditions| {
            conditions
                .iter()
                .find(|c| c.type_ == "Failed" && c.status == "True")
        });

    Ok(JobInfo {
        namespace: meta.namespace.clone().unwrap_or_default(),
        labels: meta.labels.clone().unwrap_or_default(),
        created_at: meta.creation_timestamp.as_ref().map(|t| t.0),
        resource_version: parse_resource_version(meta.resource_version.as_deref()),
        completions: spec.and_then(|s| s.completions),
        parallelism: spec.and_then(|s| s.parallelism),
        backoff_limit: spec.and_then(|s| s.backoff_limit),
        status: JobStatus {
            active: status.and_then(|s| s.active).unwrap_or(0),
            succeeded: status.and_then(|s| s.succeeded).unwrap_or(0),
            failed: status.and_then(|s| s.failed).unwrap_or(0),
            completion_time: status
                .and_then(|s| s.completion_time.as_ref())
                .map(|t| t.0),
            failed_reason: failure.and_then(|c| c.reason.clone()),
            failed_message: failure.and_then(|c| c.message.clone()),
        },
        containers: spec
            .and_then(|s| s.template.spec.as_ref())
            .map(|s| s.containers.iter().map(container_info).collect())
            .unwrap_or_default(),
        job_pods,
        name,
    })
}

/// Map each group subject to the namespaces of the role bindings naming it.
///
/// Bindings without subjects are skipped.
#[must_use]
pub fn group_namespaces(bindings: &[RoleBinding]) -> HashMap<String, Vec<String>> {
    let mut map: HashMap<String, Vec<String>> = HashMap::new();
    for binding in bindings {
        let Some(subjects) = binding.subjects.as_ref().filter(|s| !s.is_empty()) else {
            debug!(
                name = binding.metadata.name.as_deref().unwrap_or_default(),
                namespace = binding.metadata.namespace.as_deref().unwrap_or_default(),
                "Skipping role binding without subjects"
            );
            continue;
        };
        let namespace = binding.metadata.namespace.clone().unwrap_or_default();
        for subject in subjects.iter().filter(|s| s.kind == "Group") {
            map.entry(subject.name.clone())
                .or_default()
                .push(namespace.clone());
        }
    }
    map
}

/// Build a platform group record from its JSON object.
///
/// # Errors
///
/// Returns an item-level error if the group has no name.
pub fn openshift_group(
    object: &Value,
    namespaces_by_group: &HashMap<String, Vec<String>>,
) -> Result<OpenshiftGroup> {
    let meta = object.get("metadata");
    let name = meta
        .and_then(|m| m.get("name"))
        .and_then(Value::as_str)
        .ok_or_else(|| DiscoveryError::item("groups", None, "missing metadata.name"))?
        .to_string();

    let string_map = |key: &str| -> BTreeMap<String, String> {
        meta.and_then(|m| m.get(key))
            .and_then(Value::as_object)
            .map(|m| {
                m.iter()
                    .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                    .collect()
            })
            .unwrap_or_default()
    };

    Ok(OpenshiftGroup {
        users: object
            .get("users")
            .and_then(Value::as_array)
            .map(|users| {
                users
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
        namespaces: namespaces_by_group.get(&name).cloned().unwrap_or_default(),
        labels: string_map("labels"),
        annotations: string_map("annotations"),
        resource_version: parse_resource_version(
            meta.and_then(|m| m.get("resourceVersion"))
                .and_then(Value::as_str),
        ),
        name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::batch::v1::{JobCondition, JobSpec, JobStatus as K8sJobStatus};
    use k8s_openapi::api::core::v1::{
        Container, NodeAddress, NodeCondition, NodeSpec, NodeStatus, PodSpec,
        ResourceRequirements, Taint,
    };
    use k8s_openapi::api::rbac::v1::{RoleRef, Subject};
    use kube::api::ObjectMeta;
    use serde_json::json;

    #[test]
    fn decode_object_names_the_bad_item() {
        let pod: Pod = decode_object(
            "pods",
            json!({"apiVersion": "v1", "kind": "Pod", "metadata": {"name": "ok"}}),
        )
        .unwrap();
        assert_eq!(pod.metadata.name.as_deref(), Some("ok"));

        let err = decode_object::<Pod>(
            "pods",
            json!({"metadata": {"name": "bad"}, "spec": {"containers": "oops"}}),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            DiscoveryError::ItemParse { ref kind, ref name, .. }
                if kind == "pods" && name.as_deref() == Some("bad")
        ));
    }

    fn named(name: &str, namespace: Option<&str>) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            namespace: namespace.map(str::to_string),
            ..Default::default()
        }
    }

    fn container_with_requests(cpu: &str, memory: &str) -> Container {
        Container {
            name: "c".to_string(),
            resources: Some(ResourceRequirements {
                requests: Some(BTreeMap::from([
                    ("cpu".to_string(), Quantity(cpu.to_string())),
                    ("memory".to_string(), Quantity(memory.to_string())),
                ])),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn pod_requests_sum_containers() {
        let pod = Pod {
            metadata: named("p", Some("default")),
            spec: Some(PodSpec {
                containers: vec![
                    container_with_requests("250m", "128Mi"),
                    container_with_requests("1", "1Gi"),
                ],
                ..Default::default()
            }),
            status: None,
        };
        let requests = pod_requests(&pod);
        assert!((requests.cpu_req - 1.25).abs() < 1e-9);
        assert!((requests.memory_req - 1152.0).abs() < 1e-9);
    }

    #[test]
    fn bad_quantities_count_as_zero() {
        let pod = Pod {
            metadata: named("p", Some("default")),
            spec: Some(PodSpec {
                containers: vec![container_with_requests("lots", "64Mi")],
                ..Default::default()
            }),
            status: None,
        };
        let requests = pod_requests(&pod);
        assert!(requests.cpu_req.abs() < f64::EPSILON);
        assert!((requests.memory_req - 64.0).abs() < 1e-9);
    }

    #[test]
    fn node_record() {
        let node = Node {
            metadata: ObjectMeta {
                resource_version: Some("9".to_string()),
                ..named("node-a", None)
            },
            spec: Some(NodeSpec {
                taints: Some(vec![Taint {
                    key: "dedicated".to_string(),
                    value: Some("gpu".to_string()),
                    effect: "NoSchedule".to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            status: Some(NodeStatus {
                addresses: Some(vec![NodeAddress {
                    address: "10.0.0.5".to_string(),
                    type_: "InternalIP".to_string(),
                }]),
                capacity: Some(BTreeMap::from([
                    ("cpu".to_string(), Quantity("4".to_string())),
                    ("memory".to_string(), Quantity("8Gi".to_string())),
                ])),
                conditions: Some(vec![
                    NodeCondition {
                        type_: "Ready".to_string(),
                        status: "True".to_string(),
                        ..Default::default()
                    },
                    NodeCondition {
                        type_: "DiskPressure".to_string(),
                        status: "True".to_string(),
                        message: Some("disk almost full".to_string()),
                        ..Default::default()
                    },
                ]),
                ..Default::default()
            }),
        };
        let requests = vec![
            PodRequests {
                cpu_req: 0.5,
                memory_req: 256.0,
            },
            PodRequests {
                cpu_req: 1.0,
                memory_req: 512.0,
            },
        ];

        let info = node_info(&node, requests).unwrap();
        assert_eq!(info.name, "node-a");
        assert_eq!(info.internal_ip.as_deref(), Some("10.0.0.5"));
        assert!(info.external_ip.is_none());
        assert_eq!(info.taints, vec!["dedicated=gpu:NoSchedule"]);
        assert_eq!(info.conditions.len(), 1);
        assert_eq!(info.conditions["DiskPressure"], "disk almost full");
        assert!((info.cpu_capacity - 4.0).abs() < f64::EPSILON);
        assert!((info.memory_capacity - 8192.0).abs() < 1e-9);
        assert!((info.cpu_allocated - 1.5).abs() < f64::EPSILON);
        assert_eq!(info.pods_count, 2);
        assert_eq!(info.resource_version, 9);
    }

    #[test]
    fn failed_job_record() {
        let job = Job {
            metadata: named("nightly", Some("batch")),
            spec: Some(JobSpec {
                backoff_limit: Some(3),
                ..Default::default()
            }),
            status: Some(K8sJobStatus {
                failed: Some(4),
                conditions: Some(vec![JobCondition {
                    type_: "Failed".to_string(),
                    status: "True".to_string(),
                    reason: Some("BackoffLimitExceeded".to_string()),
                    message: Some("Job has reached the specified backoff limit".to_string()),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
        };
        let info = job_info(&job, vec!["nightly-abc".to_string()]).unwrap();
        assert_eq!(info.namespace, "batch");
        assert_eq!(info.status.failed, 4);
        assert_eq!(info.status.active, 0);
        assert_eq!(
            info.status.failed_reason.as_deref(),
            Some("BackoffLimitExceeded")
        );
        assert_eq!(info.backoff_limit, Some(3));
        assert_eq!(info.job_pods, vec!["nightly-abc"]);
    }

    #[test]
    fn namespace_without_name_is_item_error() {
        let ns = Namespace::default();
        assert!(matches!(
            namespace_info(&ns),
            Err(DiscoveryError::ItemParse { .. })
        ));
    }

    #[test]
    fn group_namespaces_from_bindings() {
        let binding = |ns: &str, subjects: Option<Vec<Subject>>| RoleBinding {
            metadata: named("rb", Some(ns)),
            role_ref: RoleRef {
                api_group: "rbac.authorization.k8s.io".to_string(),
                kind: "ClusterRole".to_string(),
                name: "view".to_string(),
            },
            subjects,
        };
        let subject = |kind: &str, name: &str| Subject {
            kind: kind.to_string(),
            name: name.to_string(),
            ..Default::default()
        };

        let map = group_namespaces(&[
            binding("dev", Some(vec![subject("Group", "devs"), subject("User", "ann")])),
            binding("prod", Some(vec![subject("Group", "devs")])),
            binding("ops", None),
        ]);
        assert_eq!(map["devs"], vec!["dev", "prod"]);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn group_record() {
        let mut namespaces = HashMap::new();
        namespaces.insert("devs".to_string(), vec!["dev".to_string()]);

        let object = json!({
            "metadata": {"name": "devs", "resourceVersion": "17", "labels": {"team": "core"}},
            "users": ["ann", "bob"]
        });
        let group = openshift_group(&object, &namespaces).unwrap();
        assert_eq!(group.users, vec!["ann", "bob"]);
        assert_eq!(group.namespaces, vec!["dev"]);
        assert_eq!(group.labels["team"], "core");
        assert_eq!(group.resource_version, 17);

        let nameless = json!({"users": null});
        assert!(openshift_group(&nameless, &namespaces).is_err());
    }
}
