//! The discovery pass.
//!
//! [`Correlator::run`] walks every resource category in a fixed order and
//! merges what it finds into one [`DiscoveryResults`]. A malformed object is
//! recorded in `skipped` and does not affect its siblings; a forbidden or
//! failed primary list call aborts the pass.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use clusterscope_core::{DiscoveryResults, HelmRelease, ServiceKey, ServiceKind};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Namespace, Node, Pod, Secret};
use k8s_openapi::api::rbac::v1::RoleBinding;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::adapters::{build_service_info, RawWorkload, TypedWorkload, UntypedWorkload};
use crate::api::{ClusterApi, PageRequest, ResourceRef};
use crate::diagnostics::PassTracer;
use crate::jobs::{job_pods, PodMeta};
use crate::lister::{structural_error, Lister, Listing};
use crate::records::{
    decode_object, group_namespaces, job_info, namespace_info, node_info, openshift_group,
    pod_requests,
};
use crate::types::{DiscoveryConfig, PodPhase};
use crate::{DiscoveryError, Result};

const HELM_SECRET_SELECTOR: &str = "owner=helm";
const HELM_RELEASE_DATA_KEY: &str = "release";

#[derive(Default)]
struct PassState {
    results: DiscoveryResults,
    pods: Vec<PodMeta>,
    releases: BTreeMap<ServiceKey, HelmRelease>,
}

impl PassState {
    fn skip(&mut self, err: &DiscoveryError) {
        warn!(error = %err, "Skipping item");
        if let Some(item) = err.to_skipped() {
            self.results.skipped.push(item);
        }
    }

    fn absorb<T>(&mut self, listing: &mut Listing<T>) -> Vec<T> {
        if let Some(err) = listing.truncated.take() {
            self.skip(&err);
        }
        std::mem::take(&mut listing.items)
    }

    fn decode<T: DeserializeOwned>(&mut self, kind: &str, objects: Vec<Value>) -> Vec<T> {
        let mut decoded = Vec::with_capacity(objects.len());
        for object in objects {
            match decode_object(kind, object) {
                Ok(item) => decoded.push(item),
                Err(err) => self.skip(&err),
            }
        }
        decoded
    }

    fn take<T: DeserializeOwned>(&mut self, kind: &str, listing: &mut Listing<Value>) -> Vec<T> {
        let objects = self.absorb(listing);
        self.decode(kind, objects)
    }

    fn add_service(&mut self, workload: &RawWorkload<'_>) {
        match build_service_info(workload) {
            Ok(info) => self.results.services.push(info),
            Err(err) => self.skip(&err),
        }
    }
}

/// Runs discovery passes against a cluster.
pub struct Correlator {
    api: Arc<dyn ClusterApi>,
    config: DiscoveryConfig,
    tracer: PassTracer,
}

impl Correlator {
    /// Create a correlator.
    #[must_use]
    pub fn new(api: Arc<dyn ClusterApi>, config: DiscoveryConfig) -> Self {
        Self {
            api,
            config,
            tracer: PassTracer::new(),
        }
    }

    /// A correlator over the same cluster and configuration that records
    /// its passes on `tracer`.
    #[must_use]
    pub fn with_tracer(&self, tracer: PassTracer) -> Self {
        Self {
            api: Arc::clone(&self.api),
            config: self.config.clone(),
            tracer,
        }
    }

    /// Get a reference to the configuration.
    #[must_use]
    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// The tracer recording the pass in flight.
    #[must_use]
    pub fn tracer(&self) -> &PassTracer {
        &self.tracer
    }

    fn lister(&self) -> Lister {
        Lister::new(self.config.batch_size, self.config.max_batches).with_tracer(self.tracer.clone())
    }

    /// Run one complete pass.
    ///
    /// # Errors
    ///
    /// Returns `AccessForbidden` or `ListFailed` if the primary list call of
    /// any sub-phase fails.
    pub async fn run(&self) -> Result<DiscoveryResults> {
        let started = Instant::now();
        self.tracer.begin_pass();
        let _frame = self.tracer.enter("discovery_pass");
        let mut state = PassState::default();

        self.discover_custom_resources(&mut state).await?;
        if self.config.is_openshift {
            self.discover_untyped(
                &mut state,
                &ResourceRef::deployment_configs(),
                &ServiceKind::DeploymentConfig,
            )
            .await?;
        }
        if self.config.openshift_groups {
            self.discover_openshift_groups(&mut state).await?;
        }
        if self.config.argo_rollouts {
            self.discover_untyped(&mut state, &ResourceRef::rollouts(), &ServiceKind::Rollout)
                .await?;
        }
        self.discover_workloads(&mut state).await?;
        self.discover_pods(&mut state).await?;
        self.discover_nodes(&mut state).await?;
        self.discover_jobs(&mut state).await?;
        if self.config.helm_monitoring {
            self.discover_helm_releases(&mut state).await?;
        }
        self.discover_namespaces(&mut state).await?;

        let mut results = state.results;
        results.helm_releases = state.releases.into_values().collect();

        info!(
            services = results.services.len(),
            nodes = results.nodes.len(),
            jobs = results.jobs.len(),
            namespaces = results.namespaces.len(),
            helm_releases = results.helm_releases.len(),
            pods_running = results.pods_running_count,
            skipped = results.skipped.len(),
            elapsed_ms = started.elapsed().as_millis(),
            "Discovery pass complete"
        );
        Ok(results)
    }

    async fn list_untyped(&self, resource: &ResourceRef) -> Result<Listing<Value>> {
        let api = self.api.as_ref();
        self.lister()
            .list_all(&resource.plural, None, |req| async move {
                api.list_objects(resource, &req).await
            })
            .await
    }

    async fn discover_custom_resources(&self, state: &mut PassState) -> Result<()> {
        let _frame = self.tracer.enter("custom_resources");
        for def in &self.config.custom_crds {
            let resource = def.resource();
            let mut listing = self.list_untyped(&resource).await?;
            for object in &state.absorb(&mut listing) {
                state.add_service(&RawWorkload::Untyped(UntypedWorkload::custom(def, object)));
            }
            debug!(kind = %def.name, batches = listing.batches, "Discovered custom resources");
        }
        Ok(())
    }

    async fn discover_untyped(
        &self,
        state: &mut PassState,
        resource: &ResourceRef,
        kind: &ServiceKind,
    ) -> Result<()> {
        let _frame = self.tracer.enter(&resource.plural);
        let mut listing = self.list_untyped(resource).await?;
        for object in &state.absorb(&mut listing) {
            state.add_service(&RawWorkload::Untyped(UntypedWorkload::new(kind.clone(), object)));
        }
        Ok(())
    }

    async fn discover_openshift_groups(&self, state: &mut PassState) -> Result<()> {
        let _frame = self.tracer.enter("openshift_groups");
        let namespaces_by_group = match self.api.list_role_bindings().await {
            Ok(bindings) => {
                let bindings: Vec<RoleBinding> = state.decode("rolebindings", bindings);
                group_namespaces(&bindings)
            }
            Err(err) => match structural_error("rolebindings", err) {
                forbidden @ DiscoveryError::AccessForbidden { .. } => return Err(forbidden),
                other => {
                    warn!(error = %other, "Failed to map role bindings to groups");
                    HashMap::new()
                }
            },
        };

        let mut listing = self.list_untyped(&ResourceRef::openshift_groups()).await?;
        for object in &state.absorb(&mut listing) {
            match openshift_group(object, &namespaces_by_group) {
                Ok(group) => state.results.openshift_groups.push(group),
                Err(err) => state.skip(&err),
            }
        }
        Ok(())
    }

    async fn discover_workloads(&self, state: &mut PassState) -> Result<()> {
        let _frame = self.tracer.enter("workloads");
        let api = self.api.as_ref();
        let lister = self.lister();

        let mut deployments = lister
            .list_all("deployments", None, |req| async move {
                api.list_deployments(&req).await
            })
            .await?;
        let deployments: Vec<Deployment> = state.take("deployments", &mut deployments);
        for item in &deployments {
            state.add_service(&RawWorkload::Typed(TypedWorkload::from(item)));
        }

        let mut stateful_sets = lister
            .list_all("statefulsets", None, |req| async move {
                api.list_stateful_sets(&req).await
            })
            .await?;
        let stateful_sets: Vec<StatefulSet> = state.take("statefulsets", &mut stateful_sets);
        for item in &stateful_sets {
            state.add_service(&RawWorkload::Typed(TypedWorkload::from(item)));
        }

        let mut daemon_sets = lister
            .list_all("daemonsets", None, |req| async move {
                api.list_daemon_sets(&req).await
            })
            .await?;
        let daemon_sets: Vec<DaemonSet> = state.take("daemonsets", &mut daemon_sets);
        for item in &daemon_sets {
            state.add_service(&RawWorkload::Typed(TypedWorkload::from(item)));
        }

        let mut replica_sets = lister
            .list_all("replicasets", None, |req| async move {
                api.list_replica_sets(&req).await
            })
            .await?;
        let replica_sets: Vec<ReplicaSet> = state.take("replicasets", &mut replica_sets);
        for item in &replica_sets {
            let unowned = item
                .metadata
                .owner_references
                .as_ref()
                .map_or(true, Vec::is_empty);
            let replicas = item.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
            if unowned && replicas > 0 {
                state.add_service(&RawWorkload::Typed(TypedWorkload::from(item)));
            }
        }
        Ok(())
    }

    /// Whether a pod appears in the service list.
    ///
    /// Finished pods never do. Unowned pods always do. Owned pods do only
    /// when pod-owned reporting is on and every owner is a pod.
    #[must_use]
    pub fn should_report_pod(&self, pod: &Pod) -> bool {
        if pod_phase(pod).is_some_and(|p| p.is_terminal()) {
            return false;
        }
        match pod.metadata.owner_references.as_deref() {
            None | Some([]) => true,
            Some(owners) => {
                self.config.pod_owned_pods
                    && owners.iter().all(|o| o.kind.eq_ignore_ascii_case("pod"))
            }
        }
    }

    async fn discover_pods(&self, state: &mut PassState) -> Result<()> {
        let _frame = self.tracer.enter("pods");
        let api = self.api.as_ref();
        let mut listing = self
            .lister()
            .list_all("pods", None, |req| async move { api.list_pods(&req).await })
            .await?;

        let pods: Vec<Pod> = state.take("pods", &mut listing);
        for pod in &pods {
            if let Some(meta) = PodMeta::from_pod(pod) {
                state.pods.push(meta);
            }
            if self.should_report_pod(pod) {
                state.add_service(&RawWorkload::Typed(TypedWorkload::from(pod)));
            }

            let phase = pod_phase(pod);
            let node = pod.spec.as_ref().and_then(|s| s.node_name.as_ref());
            if let (Some(phase), Some(node)) = (phase, node) {
                if phase.holds_node_resources() {
                    state
                        .results
                        .node_requests
                        .entry(node.clone())
                        .or_default()
                        .push(pod_requests(pod));
                }
            }
            if phase == Some(PodPhase::Running) {
                state.results.pods_running_count += 1;
            }
        }
        Ok(())
    }

    async fn discover_nodes(&self, state: &mut PassState) -> Result<()> {
        let _frame = self.tracer.enter("nodes");
        let page = self
            .api
            .list_nodes(&PageRequest::default())
            .await
            .map_err(|e| structural_error("nodes", e))?;

        let nodes: Vec<Node> = state.decode("nodes", page.items);
        for node in &nodes {
            let requests = node
                .metadata
                .name
                .as_ref()
                .and_then(|name| state.results.node_requests.get(name))
                .cloned()
                .unwrap_or_default();
            match node_info(node, requests) {
                Ok(info) => state.results.nodes.push(info),
                Err(err) => state.skip(&err),
            }
        }
        Ok(())
    }

    async fn discover_jobs(&self, state: &mut PassState) -> Result<()> {
        let _frame = self.tracer.enter("jobs");
        let api = self.api.as_ref();
        let mut listing = self
            .lister()
            .list_all("jobs", None, |req| async move { api.list_jobs(&req).await })
            .await?;

        let jobs: Vec<Job> = state.take("jobs", &mut listing);
        for job in &jobs {
            let pods = job_pods(job, &state.pods);
            match job_info(job, pods) {
                Ok(info) => state.results.jobs.push(info),
                Err(err) => state.skip(&err),
            }
        }
        Ok(())
    }

    async fn discover_helm_releases(&self, state: &mut PassState) -> Result<()> {
        let _frame = self.tracer.enter("helm_releases");
        let api = self.api.as_ref();
        let mut listing = self
            .lister()
            .list_all("secrets", Some(HELM_SECRET_SELECTOR), |req| async move {
                api.list_secrets(&req).await
            })
            .await?;

        let secrets: Vec<Secret> = state.take("secrets", &mut listing);
        for secret in &secrets {
            match decode_release(secret) {
                Ok(Some(release)) => {
                    state.releases.insert(release.service_key(), release);
                }
                Ok(None) => {}
                Err(err) => state.skip(&err),
            }
        }
        Ok(())
    }

    async fn discover_namespaces(&self, state: &mut PassState) -> Result<()> {
        let _frame = self.tracer.enter("namespaces");
        let namespaces = self
            .api
            .list_namespaces()
            .await
            .map_err(|e| structural_error("namespaces", e))?;

        let namespaces: Vec<Namespace> = state.decode("namespaces", namespaces);
        for namespace in &namespaces {
            match namespace_info(namespace) {
                Ok(info) => state.results.namespaces.push(info),
                Err(err) => state.skip(&err),
            }
        }
        Ok(())
    }
}

fn pod_phase(pod: &Pod) -> Option<PodPhase> {
    pod.status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .and_then(PodPhase::from_k8s_phase)
}

fn decode_release(secret: &Secret) -> Result<Option<HelmRelease>> {
    let Some(payload) = secret
        .data
        .as_ref()
        .and_then(|d| d.get(HELM_RELEASE_DATA_KEY))
        .filter(|p| !p.0.is_empty())
    else {
        debug!(
            name = secret.metadata.name.as_deref().unwrap_or_default(),
            "Release secret has no payload"
        );
        return Ok(None);
    };
    HelmRelease::decode(&payload.0).map(Some).map_err(|e| {
        DiscoveryError::item("secrets", secret.metadata.name.as_deref(), e.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::*;
    use crate::api::ApiError;
    use crate::types::CustomResourceDef;
    use base64::Engine;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use k8s_openapi::api::apps::v1::ReplicaSetSpec;
    use k8s_openapi::api::batch::v1::JobSpec;
    use k8s_openapi::api::core::v1::{PodSpec, PodStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, OwnerReference};
    use k8s_openapi::ByteString;
    use kube::api::ObjectMeta;
    use serde_json::json;
    use std::io::Write;

    fn meta(name: &str, namespace: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        }
    }

    fn owner(kind: &str) -> OwnerReference {
        OwnerReference {
            kind: kind.to_string(),
            name: "owner".to_string(),
            api_version: "v1".to_string(),
            uid: "uid".to_string(),
            ..Default::default()
        }
    }

    fn pod(name: &str, phase: &str, node: Option<&str>, owners: Vec<OwnerReference>) -> Pod {
        Pod {
            metadata: ObjectMeta {
                owner_references: (!owners.is_empty()).then_some(owners),
                labels: Some(BTreeMap::from([("app".to_string(), name.to_string())])),
                ..meta(name, "default")
            },
            spec: Some(PodSpec {
                node_name: node.map(str::to_string),
                ..Default::default()
            }),
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                ..Default::default()
            }),
        }
    }

    fn node(name: &str) -> Node {
        Node {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn release_secret(name: &str, release: &str, revision: u32) -> Secret {
        let body = json!({
            "name": release,
            "namespace": "default",
            "version": revision,
            "info": {"status": "deployed"},
            "chart": {"metadata": {"name": release, "version": "1.0.0"}}
        });
        let mut gz = GzEncoder::new(Vec::new(), Compression::default());
        gz.write_all(body.to_string().as_bytes()).unwrap();
        let payload = base64::engine::general_purpose::STANDARD.encode(gz.finish().unwrap());

        Secret {
            metadata: ObjectMeta {
                labels: Some(BTreeMap::from([("owner".to_string(), "helm".to_string())])),
                ..meta(name, "default")
            },
            data: Some(BTreeMap::from([(
                HELM_RELEASE_DATA_KEY.to_string(),
                ByteString(payload.into_bytes()),
            )])),
            ..Default::default()
        }
    }

    fn cluster() -> Arc<MockClusterApi> {
        let api = MockClusterApi::new();
        api.add(
            DEPLOYMENTS,
            vec![Deployment {
                metadata: meta("api", "default"),
                ..Default::default()
            }],
        );
        api.add(NODES, vec![node("node-a")]);
        api.add(
            NAMESPACES,
            vec![Namespace {
                metadata: ObjectMeta {
                    name: Some("default".to_string()),
                    ..Default::default()
                },
                ..Default::default()
            }],
        );
        Arc::new(api)
    }

    fn correlator(api: &Arc<MockClusterApi>, config: DiscoveryConfig) -> Correlator {
        Correlator::new(api.clone(), config)
    }

    #[tokio::test]
    async fn minimal_pass() {
        let api = cluster();
        let results = correlator(&api, DiscoveryConfig::default())
            .run()
            .await
            .unwrap();

        assert_eq!(results.services.len(), 1);
        assert_eq!(results.services[0].name, "api");
        assert_eq!(results.nodes.len(), 1);
        assert_eq!(results.namespaces.len(), 1);
        assert!(results.skipped.is_empty());
        assert!(api.requests_for(ROLE_BINDINGS).is_empty());
    }

    #[tokio::test]
    async fn pass_records_on_its_own_tracer() {
        let api = cluster();
        let base = correlator(&api, DiscoveryConfig::default());
        let tracer = PassTracer::new();

        base.with_tracer(tracer.clone()).run().await.unwrap();
        assert!(tracer.render().starts_with("discovery pass on thread"));
        assert!(tracer.frame_names().is_empty());
        assert!(base.tracer().render().starts_with("no discovery pass recorded"));
    }

    #[tokio::test]
    async fn replica_set_filter() {
        let api = cluster();
        let rs = |name: &str, replicas: i32, owners: Vec<OwnerReference>| ReplicaSet {
            metadata: ObjectMeta {
                owner_references: (!owners.is_empty()).then_some(owners),
                ..meta(name, "default")
            },
            spec: Some(ReplicaSetSpec {
                replicas: Some(replicas),
                ..Default::default()
            }),
            status: None,
        };
        api.add(
            REPLICA_SETS,
            vec![
                rs("standalone", 3, vec![]),
                rs("scaled-down", 0, vec![]),
                rs("owned", 3, vec![owner("Deployment")]),
            ],
        );

        let results = correlator(&api, DiscoveryConfig::default())
            .run()
            .await
            .unwrap();
        let names: Vec<_> = results
            .services
            .iter()
            .filter(|s| s.service_type == ServiceKind::ReplicaSet)
            .map(|s| s.name.as_str())
            .collect();
        assert_eq!(names, vec!["standalone"]);
    }

    #[tokio::test]
    async fn pod_reporting_and_node_pressure() {
        let api = cluster();
        api.add(
            PODS,
            vec![
                pod("lone", "Running", Some("node-a"), vec![]),
                pod("done", "Succeeded", Some("node-a"), vec![]),
                pod("child", "Pending", Some("node-a"), vec![owner("Pod")]),
                pod("replica", "Running", Some("node-a"), vec![owner("ReplicaSet")]),
                pod("lost", "Unknown", None, vec![]),
            ],
        );

        let results = correlator(&api, DiscoveryConfig::default())
            .run()
            .await
            .unwrap();
        let reported: Vec<_> = results
            .services
            .iter()
            .filter(|s| s.service_type == ServiceKind::Pod)
            .map(|s| s.name.as_str())
            .collect();
        assert_eq!(reported, vec!["lone", "lost"]);
        assert_eq!(results.pods_running_count, 2);
        assert_eq!(results.node_requests["node-a"].len(), 3);
        assert_eq!(results.nodes[0].pods_count, 3);

        let config = DiscoveryConfig {
            pod_owned_pods: true,
            ..Default::default()
        };
        let results = correlator(&api, config).run().await.unwrap();
        let reported: Vec<_> = results
            .services
            .iter()
            .filter(|s| s.service_type == ServiceKind::Pod)
            .map(|s| s.name.as_str())
            .collect();
        assert_eq!(reported, vec!["lone", "child", "lost"]);
    }

    #[tokio::test]
    async fn jobs_are_correlated_with_all_pods() {
        let api = cluster();
        api.add(
            PODS,
            vec![
                pod("x", "Succeeded", None, vec![owner("Job")]),
                pod("y", "Running", None, vec![]),
            ],
        );
        api.add(
            JOBS,
            vec![Job {
                metadata: meta("job-x", "default"),
                spec: Some(JobSpec {
                    selector: Some(LabelSelector {
                        match_labels: Some(BTreeMap::from([(
                            "app".to_string(),
                            "x".to_string(),
                        )])),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                status: None,
            }],
        );

        let results = correlator(&api, DiscoveryConfig::default())
            .run()
            .await
            .unwrap();
        assert_eq!(results.jobs[0].job_pods, vec!["x"]);
    }

    #[tokio::test]
    async fn forbidden_aborts_pass() {
        let api = cluster();
        api.fail_always(JOBS, ApiError::Forbidden("jobs is forbidden".to_string()));

        let err = correlator(&api, DiscoveryConfig::default())
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::AccessForbidden { ref kind, .. } if kind == "jobs"));
    }

    #[tokio::test]
    async fn failing_namespaces_abort_pass() {
        let api = cluster();
        api.fail_always(NAMESPACES, ApiError::Other("timeout".to_string()));

        let err = correlator(&api, DiscoveryConfig::default())
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::ListFailed { .. }));
    }

    #[tokio::test]
    async fn malformed_item_is_skipped() {
        let api = cluster();
        let rollouts = ResourceRef::rollouts();
        api.add(
            &rollouts.path(),
            vec![
                json!({"metadata": {"name": "a", "namespace": "default"}}),
                json!({"metadata": {"namespace": "default"}}),
                json!({"metadata": {"name": "c", "namespace": "default"}}),
            ],
        );
        let config = DiscoveryConfig {
            argo_rollouts: true,
            ..Default::default()
        };

        let results = correlator(&api, config).run().await.unwrap();
        let rollouts: Vec<_> = results
            .services
            .iter()
            .filter(|s| s.service_type == ServiceKind::Rollout)
            .collect();
        assert_eq!(rollouts.len(), 2);
        assert_eq!(results.skipped.len(), 1);
        assert_eq!(results.skipped[0].kind, "Rollout");
    }

    #[tokio::test]
    async fn undecodable_pod_spares_its_page() {
        let api = cluster();
        api.add(PODS, vec![pod("a", "Running", Some("node-a"), vec![])]);
        api.add(
            PODS,
            vec![json!({
                "apiVersion": "v1",
                "kind": "Pod",
                "metadata": {"name": "bad", "namespace": "default"},
                "spec": {"containers": "oops"},
                "status": {"phase": "Running"}
            })],
        );
        api.add(PODS, vec![pod("c", "Running", Some("node-a"), vec![])]);

        let results = correlator(&api, DiscoveryConfig::default())
            .run()
            .await
            .unwrap();
        assert_eq!(results.pods_running_count, 2);
        assert_eq!(results.skipped.len(), 1);
        assert_eq!(results.skipped[0].kind, "pods");
        assert_eq!(results.skipped[0].name.as_deref(), Some("bad"));
    }

    #[tokio::test]
    async fn undecodable_node_is_skipped() {
        let api = cluster();
        api.add(
            NODES,
            vec![json!({
                "apiVersion": "v1",
                "kind": "Node",
                "metadata": {"name": "node-b"},
                "spec": {"taints": 7}
            })],
        );

        let results = correlator(&api, DiscoveryConfig::default())
            .run()
            .await
            .unwrap();
        assert_eq!(results.nodes.len(), 1);
        assert_eq!(results.skipped[0].kind, "nodes");
    }

    #[tokio::test]
    async fn truncated_listing_is_recorded() {
        let api = cluster();
        api.add(
            PODS,
            (0..4).map(|i| pod(&format!("p{i}"), "Running", None, vec![])),
        );
        api.fail_call(PODS, 1, ApiError::Other("connection reset".to_string()));
        let config = DiscoveryConfig {
            batch_size: 2,
            ..Default::default()
        };

        let results = correlator(&api, config).run().await.unwrap();
        assert_eq!(results.pods_running_count, 2);
        assert_eq!(results.skipped.len(), 1);
        assert_eq!(results.skipped[0].kind, "pods");
    }

    #[tokio::test]
    async fn helm_releases_deduplicate() {
        let api = cluster();
        api.add(
            SECRETS,
            vec![
                release_secret("sh.helm.release.v1.shop.v1", "shop", 1),
                release_secret("sh.helm.release.v1.shop.v2", "shop", 2),
                release_secret("sh.helm.release.v1.blog.v1", "blog", 1),
            ],
        );

        let results = correlator(&api, DiscoveryConfig::default())
            .run()
            .await
            .unwrap();
        assert_eq!(results.helm_releases.len(), 2);
        let shop = results
            .helm_releases
            .iter()
            .find(|r| r.name == "shop")
            .unwrap();
        assert_eq!(shop.version, 2);
        assert_eq!(
            api.requests_for(SECRETS)[0].label_selector.as_deref(),
            Some(HELM_SECRET_SELECTOR)
        );

        let config = DiscoveryConfig {
            helm_monitoring: false,
            ..Default::default()
        };
        let results = correlator(&api, config).run().await.unwrap();
        assert!(results.helm_releases.is_empty());
    }

    #[tokio::test]
    async fn openshift_groups_get_namespaces() {
        let api = cluster();
        api.add(
            ROLE_BINDINGS,
            vec![json!({
                "apiVersion": "rbac.authorization.k8s.io/v1",
                "kind": "RoleBinding",
                "metadata": {"name": "view", "namespace": "dev"},
                "roleRef": {"apiGroup": "rbac.authorization.k8s.io", "kind": "ClusterRole", "name": "view"},
                "subjects": [{"kind": "Group", "name": "devs"}]
            })],
        );
        api.add(
            &ResourceRef::openshift_groups().path(),
            vec![json!({"metadata": {"name": "devs"}, "users": ["ann"]})],
        );
        let config = DiscoveryConfig {
            openshift_groups: true,
            ..Default::default()
        };

        let results = correlator(&api, config).run().await.unwrap();
        assert_eq!(results.openshift_groups.len(), 1);
        assert_eq!(results.openshift_groups[0].namespaces, vec!["dev"]);
    }

    #[tokio::test]
    async fn role_binding_failure_leaves_groups_unmapped() {
        let api = cluster();
        api.fail_always(ROLE_BINDINGS, ApiError::Other("unavailable".to_string()));
        api.add(
            &ResourceRef::openshift_groups().path(),
            vec![json!({"metadata": {"name": "devs"}})],
        );
        let config = DiscoveryConfig {
            openshift_groups: true,
            ..Default::default()
        };

        let results = correlator(&api, config).run().await.unwrap();
        assert!(results.openshift_groups[0].namespaces.is_empty());
    }

    #[tokio::test]
    async fn custom_resources_are_services() {
        let api = cluster();
        let def = CustomResourceDef {
            name: "SparkApp".to_string(),
            group: "spark.io".to_string(),
            version: "v1".to_string(),
            plural: "sparkapps".to_string(),
            ready_pods_path: "status/ready".to_string(),
            total_pods_path: "spec/instances".to_string(),
        };
        api.add(
            &def.resource().path(),
            vec![json!({
                "metadata": {"name": "etl", "namespace": "data"},
                "spec": {"instances": 3},
                "status": {"ready": 2}
            })],
        );
        let config = DiscoveryConfig {
            custom_crds: vec![def],
            ..Default::default()
        };

        let results = correlator(&api, config).run().await.unwrap();
        let spark = results
            .services
            .iter()
            .find(|s| s.service_type == ServiceKind::Custom("SparkApp".to_string()))
            .unwrap();
        assert_eq!((spark.ready_pods, spark.total_pods), (2, 3));
    }

    #[tokio::test]
    async fn endless_pagination_terminates() {
        let api = cluster();
        api.endless_pages(DEPLOYMENTS);
        let config = DiscoveryConfig {
            max_batches: 4,
            ..Default::default()
        };

        let results = correlator(&api, config).run().await.unwrap();
        assert_eq!(api.requests_for(DEPLOYMENTS).len(), 4);
        assert_eq!(results.services.len(), 1);
    }
}
