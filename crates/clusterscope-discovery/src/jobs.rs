//! Job-to-pod correlation.

use std::collections::BTreeMap;

use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;

const JOB_NAME_LABEL: &str = "job-name";

/// The identity of a pod retained for job correlation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodMeta {
    /// Pod name.
    pub name: String,
    /// Pod namespace.
    pub namespace: String,
    /// Pod labels.
    pub labels: BTreeMap<String, String>,
}

impl PodMeta {
    /// Capture a pod's identity; `None` for pods without a name.
    #[must_use]
    pub fn from_pod(pod: &Pod) -> Option<Self> {
        Some(Self {
            name: pod.metadata.name.clone()?,
            namespace: pod.metadata.namespace.clone().unwrap_or_default(),
            labels: pod.metadata.labels.clone().unwrap_or_default(),
        })
    }
}

/// The labels a job's pods carry.
///
/// Taken from the job selector's `matchLabels` when a selector is set,
/// otherwise synthesized from the job's `job-name` label. Returns `None`
/// when neither yields any label.
#[must_use]
pub fn job_selector(job: &Job) -> Option<BTreeMap<String, String>> {
    let selector = match job.spec.as_ref().and_then(|s| s.selector.as_ref()) {
        Some(selector) => selector.match_labels.clone().unwrap_or_default(),
        None => job
            .metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get(JOB_NAME_LABEL))
            .map(|name| BTreeMap::from([(JOB_NAME_LABEL.to_string(), name.clone())]))
            .unwrap_or_default(),
    };
    (!selector.is_empty()).then_some(selector)
}

/// Names of the pods in `namespace` whose labels include all of `selector`.
#[must_use]
pub fn correlate(namespace: &str, selector: &BTreeMap<String, String>, pods: &[PodMeta]) -> Vec<String> {
    pods.iter()
        .filter(|pod| pod.namespace == namespace)
        .filter(|pod| {
            selector
                .iter()
                .all(|(k, v)| pod.labels.get(k).is_some_and(|pv| pv == v))
        })
        .map(|pod| pod.name.clone())
        .collect()
}

/// Pods belonging to a job, empty when the job has no resolvable selector.
#[must_use]
pub fn job_pods(job: &Job, pods: &[PodMeta]) -> Vec<String> {
    let namespace = job.metadata.namespace.as_deref().unwrap_or_default();
    job_selector(job)
        .map(|selector| correlate(namespace, &selector, pods))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::batch::v1::JobSpec;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
    use kube::api::ObjectMeta;

    fn pod(name: &str, namespace: &str, labels: &[(&str, &str)]) -> PodMeta {
        PodMeta {
            name: name.to_string(),
            namespace: namespace.to_string(),
            labels: labels
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        }
    }

    fn job(namespace: &str, selector: Option<&[(&str, &str)]>, labels: &[(&str, &str)]) -> Job {
        let to_map = |pairs: &[(&str, &str)]| -> BTreeMap<String, String> {
            pairs
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect()
        };
        Job {
            metadata: ObjectMeta {
                name: Some("job".to_string()),
                namespace: Some(namespace.to_string()),
                labels: Some(to_map(labels)),
                ..Default::default()
            },
            spec: Some(JobSpec {
                selector: selector.map(|s| LabelSelector {
                    match_labels: Some(to_map(s)),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            status: None,
        }
    }

    #[test]
    fn selector_matches_superset_in_namespace() {
        let pods = vec![
            pod("a", "ns", &[("app", "x"), ("tier", "web")]),
            pod("b", "ns", &[("app", "y")]),
            pod("c", "other", &[("app", "x")]),
            pod("d", "ns", &[]),
        ];
        let job = job("ns", Some(&[("app", "x")]), &[]);
        assert_eq!(job_pods(&job, &pods), vec!["a"]);
    }

    #[test]
    fn falls_back_to_job_name_label() {
        let pods = vec![
            pod("nightly-1", "ns", &[("job-name", "nightly")]),
            pod("other", "ns", &[("job-name", "hourly")]),
        ];
        let job = job("ns", None, &[("job-name", "nightly")]);
        assert_eq!(job_pods(&job, &pods), vec!["nightly-1"]);
    }

    #[test]
    fn no_selector_means_no_pods() {
        let pods = vec![pod("a", "ns", &[("app", "x")])];
        let job = job("ns", None, &[("team", "data")]);
        assert!(job_selector(&job).is_none());
        assert!(job_pods(&job, &pods).is_empty());
    }
}
