//! Batch job records.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::ContainerInfo;

/// Status counters of a job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    /// Pods currently running.
    pub active: i32,
    /// Pods that succeeded.
    pub succeeded: i32,
    /// Pods that failed.
    pub failed: i32,
    /// Completion time, when the job has completed.
    pub completion_time: Option<DateTime<Utc>>,
    /// Reason of the `Failed` condition, when present.
    pub failed_reason: Option<String>,
    /// Message of the `Failed` condition, when present.
    pub failed_message: Option<String>,
}

/// One batch job plus the names of the pods attributed to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInfo {
    /// Job name.
    pub name: String,
    /// Job namespace.
    pub namespace: String,
    /// Job labels.
    pub labels: BTreeMap<String, String>,
    /// Creation timestamp.
    pub created_at: Option<DateTime<Utc>>,
    /// Resource version, 0 when absent.
    pub resource_version: u64,
    /// Desired completions.
    pub completions: Option<i32>,
    /// Maximum parallel pods.
    pub parallelism: Option<i32>,
    /// Retry budget before the job is marked failed.
    pub backoff_limit: Option<i32>,
    /// Status counters.
    pub status: JobStatus,
    /// Containers of the pod template.
    pub containers: Vec<ContainerInfo>,
    /// Pods whose labels match the job selector in the same namespace.
    pub job_pods: Vec<String>,
}
