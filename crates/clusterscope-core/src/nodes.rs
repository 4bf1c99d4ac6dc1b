//! Node records and the pod requests scheduled onto them.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Aggregate resource requests of one pod.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PodRequests {
    /// Requested cpu in cores.
    pub cpu_req: f64,
    /// Requested memory in MiB.
    pub memory_req: f64,
}

impl PodRequests {
    /// Sum a set of pod requests.
    #[must_use]
    pub fn total<'a>(requests: impl IntoIterator<Item = &'a Self>) -> Self {
        requests.into_iter().fold(Self::default(), |acc, r| Self {
            cpu_req: acc.cpu_req + r.cpu_req,
            memory_req: acc.memory_req + r.memory_req,
        })
    }
}

/// One cluster node plus the pods scheduled onto it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Node name.
    pub name: String,
    /// Creation timestamp.
    pub node_creation_time: Option<DateTime<Utc>>,
    /// First `InternalIP` address.
    pub internal_ip: Option<String>,
    /// First `ExternalIP` address.
    pub external_ip: Option<String>,
    /// Taints formatted as `key=value:effect`.
    pub taints: Vec<String>,
    /// Conditions that are not in their healthy state, keyed by type.
    pub conditions: BTreeMap<String, String>,
    /// Cpu capacity in cores.
    pub cpu_capacity: f64,
    /// Allocatable cpu in cores.
    pub cpu_allocatable: f64,
    /// Cpu requested by scheduled pods, in cores.
    pub cpu_allocated: f64,
    /// Memory capacity in MiB.
    pub memory_capacity: f64,
    /// Allocatable memory in MiB.
    pub memory_allocatable: f64,
    /// Memory requested by scheduled pods, in MiB.
    pub memory_allocated: f64,
    /// Number of pods counted toward allocation.
    pub pods_count: usize,
    /// Kubelet, runtime and OS details from the node status.
    pub node_info: BTreeMap<String, String>,
    /// Resource version, 0 when absent.
    pub resource_version: u64,
    /// Requests of the pods counted toward allocation.
    pub pod_requests: Vec<PodRequests>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_requests() {
        let requests = [
            PodRequests {
                cpu_req: 0.25,
                memory_req: 128.0,
            },
            PodRequests {
                cpu_req: 1.0,
                memory_req: 512.0,
            },
        ];
        let total = PodRequests::total(&requests);
        assert!((total.cpu_req - 1.25).abs() < f64::EPSILON);
        assert!((total.memory_req - 640.0).abs() < f64::EPSILON);
    }

    #[test]
    fn total_of_nothing_is_zero() {
        assert_eq!(PodRequests::total(&[]), PodRequests::default());
    }
}
