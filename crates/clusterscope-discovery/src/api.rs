//! Cluster API seam.
//!
//! This module defines the `ClusterApi` trait through which every discovery
//! sub-phase reads the cluster, and `KubeClusterApi`, its implementation over
//! a `kube::Client`. List calls are paginated with a page size and an opaque
//! continuation token; forbidden responses are kept distinct from every other
//! failure so callers can surface them.
//!
//! Objects come back as JSON, one value per object. Callers decode each object
//! into its typed model on its own, so one object the model rejects never
//! fails the page it arrived on.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Namespace, Node, Pod, Secret};
use k8s_openapi::api::rbac::v1::RoleBinding;
use kube::api::{Api, ApiResource, DynamicObject, ListParams};
use kube::core::{GroupVersionKind, TypeMeta};
use kube::Client;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// Failure reported by a cluster API call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// The caller lacks permission for the resource.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Any other failure.
    #[error("{0}")]
    Other(String),
}

impl From<kube::Error> for ApiError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(resp) if resp.code == 403 => Self::Forbidden(resp.message),
            other => Self::Other(other.to_string()),
        }
    }
}

/// Result of a cluster API call.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Parameters of one list call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageRequest {
    /// Maximum items to return; `None` lists everything.
    pub limit: Option<u32>,
    /// Continuation token from the previous page.
    pub continue_token: Option<String>,
    /// Label selector in `key=value,...` form.
    pub label_selector: Option<String>,
}

impl PageRequest {
    /// A request for the first page of at most `limit` items.
    #[must_use]
    pub fn first(limit: u32) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }

    /// Restrict the request to objects matching a label selector.
    #[must_use]
    pub fn with_selector(mut self, selector: Option<&str>) -> Self {
        self.label_selector = selector.map(str::to_string);
        self
    }

    /// Convert into `kube` list parameters.
    #[must_use]
    pub fn to_list_params(&self) -> ListParams {
        let mut params = ListParams::default();
        if let Some(limit) = self.limit {
            params = params.limit(limit);
        }
        if let Some(token) = &self.continue_token {
            params = params.continue_token(token);
        }
        if let Some(selector) = &self.label_selector {
            params = params.labels(selector);
        }
        params
    }
}

/// One page of a list call.
#[derive(Debug, Clone, PartialEq)]
pub struct ListPage<T> {
    /// Items on this page.
    pub items: Vec<T>,
    /// Token for the next page; `None` when this is the last one.
    pub continue_token: Option<String>,
    /// Server estimate of items left after this page.
    pub remaining_item_count: Option<i64>,
}

impl<T> ListPage<T> {
    /// A final page holding `items`.
    #[must_use]
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            continue_token: None,
            remaining_item_count: None,
        }
    }
}

/// API coordinates of a resource listed as untyped objects.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceRef {
    /// API group; empty for the core group.
    pub group: String,
    /// API version.
    pub version: String,
    /// Plural resource name.
    pub plural: String,
    /// Kind name.
    pub kind: String,
}

impl ResourceRef {
    /// Create a resource reference.
    #[must_use]
    pub fn new(group: &str, version: &str, plural: &str, kind: &str) -> Self {
        Self {
            group: group.to_string(),
            version: version.to_string(),
            plural: plural.to_string(),
            kind: kind.to_string(),
        }
    }

    /// OpenShift DeploymentConfigs.
    #[must_use]
    pub fn deployment_configs() -> Self {
        Self::new("apps.openshift.io", "v1", "deploymentconfigs", "DeploymentConfig")
    }

    /// Argo Rollouts.
    #[must_use]
    pub fn rollouts() -> Self {
        Self::new("argoproj.io", "v1alpha1", "rollouts", "Rollout")
    }

    /// OpenShift user groups.
    #[must_use]
    pub fn openshift_groups() -> Self {
        Self::new("user.openshift.io", "v1", "groups", "Group")
    }

    /// `group/version/plural`, or `version/plural` for the core group.
    #[must_use]
    pub fn path(&self) -> String {
        if self.group.is_empty() {
            format!("{}/{}", self.version, self.plural)
        } else {
            format!("{}/{}/{}", self.group, self.version, self.plural)
        }
    }

    fn api_resource(&self) -> ApiResource {
        let gvk = GroupVersionKind::gvk(&self.group, &self.version, &self.kind);
        ApiResource::from_gvk_with_plural(&gvk, &self.plural)
    }
}

/// Read access to the cluster used by discovery.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// List deployments across all namespaces.
    async fn list_deployments(&self, req: &PageRequest) -> ApiResult<ListPage<Value>>;

    /// List stateful sets across all namespaces.
    async fn list_stateful_sets(&self, req: &PageRequest) -> ApiResult<ListPage<Value>>;

    /// List daemon sets across all namespaces.
    async fn list_daemon_sets(&self, req: &PageRequest) -> ApiResult<ListPage<Value>>;

    /// List replica sets across all namespaces.
    async fn list_replica_sets(&self, req: &PageRequest) -> ApiResult<ListPage<Value>>;

    /// List pods across all namespaces.
    async fn list_pods(&self, req: &PageRequest) -> ApiResult<ListPage<Value>>;

    /// List jobs across all namespaces.
    async fn list_jobs(&self, req: &PageRequest) -> ApiResult<ListPage<Value>>;

    /// List secrets across all namespaces.
    async fn list_secrets(&self, req: &PageRequest) -> ApiResult<ListPage<Value>>;

    /// List nodes.
    async fn list_nodes(&self, req: &PageRequest) -> ApiResult<ListPage<Value>>;

    /// List objects of an arbitrary resource as JSON.
    async fn list_objects(
        &self,
        resource: &ResourceRef,
        req: &PageRequest,
    ) -> ApiResult<ListPage<Value>>;

    /// List every role binding in the cluster.
    async fn list_role_bindings(&self) -> ApiResult<Vec<Value>>;

    /// List every namespace.
    async fn list_namespaces(&self) -> ApiResult<Vec<Value>>;

    /// Get the API server's version string.
    async fn server_version(&self) -> ApiResult<String>;
}

/// `ClusterApi` backed by a Kubernetes client.
#[derive(Clone)]
pub struct KubeClusterApi {
    client: Client,
}

impl KubeClusterApi {
    /// Connect using in-cluster config or the local kubeconfig.
    ///
    /// # Errors
    ///
    /// Returns an error if the Kubernetes client cannot be created.
    pub async fn try_default() -> crate::Result<Self> {
        let client = Client::try_default().await?;
        Ok(Self { client })
    }

    /// Create an API over a pre-configured client.
    #[must_use]
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    async fn page<K>(&self, req: &PageRequest) -> ApiResult<ListPage<Value>>
    where
        K: kube::Resource<DynamicType = ()>,
    {
        self.raw_page(&ApiResource::erase::<K>(&()), req).await
    }

    async fn raw_page(
        &self,
        resource: &ApiResource,
        req: &PageRequest,
    ) -> ApiResult<ListPage<Value>> {
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), resource);
        let list = api.list(&req.to_list_params()).await?;
        debug!(resource = %resource.plural, count = list.items.len(), "Listed objects");

        let continue_token = list.metadata.continue_.filter(|t| !t.is_empty());
        let remaining_item_count = list.metadata.remaining_item_count;
        let items = list
            .items
            .into_iter()
            .map(|mut object| {
                // List items usually omit their type; typed decoding checks it when present.
                object.types.get_or_insert_with(|| TypeMeta {
                    api_version: resource.api_version.clone(),
                    kind: resource.kind.clone(),
                });
                serde_json::to_value(object)
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ApiError::Other(format!("failed to encode object: {e}")))?;

        Ok(ListPage {
            items,
            continue_token,
            remaining_item_count,
        })
    }
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    async fn list_deployments(&self, req: &PageRequest) -> ApiResult<ListPage<Value>> {
        self.page::<Deployment>(req).await
    }

    async fn list_stateful_sets(&self, req: &PageRequest) -> ApiResult<ListPage<Value>> {
        self.page::<StatefulSet>(req).await
    }

    async fn list_daemon_sets(&self, req: &PageRequest) -> ApiResult<ListPage<Value>> {
        self.page::<DaemonSet>(req).await
    }

    async fn list_replica_sets(&self, req: &PageRequest) -> ApiResult<ListPage<Value>> {
        self.page::<ReplicaSet>(req).await
    }

    async fn list_pods(&self, req: &PageRequest) -> ApiResult<ListPage<Value>> {
        self.page::<Pod>(req).await
    }

    async fn list_jobs(&self, req: &PageRequest) -> ApiResult<ListPage<Value>> {
        self.page::<Job>(req).await
    }

    async fn list_secrets(&self, req: &PageRequest) -> ApiResult<ListPage<Value>> {
        self.page::<Secret>(req).await
    }

    async fn list_nodes(&self, req: &PageRequest) -> ApiResult<ListPage<Value>> {
        self.page::<Node>(req).await
    }

    async fn list_objects(
        &self,
        resource: &ResourceRef,
        req: &PageRequest,
    ) -> ApiResult<ListPage<Value>> {
        self.raw_page(&resource.api_resource(), req).await
    }

    async fn list_role_bindings(&self) -> ApiResult<Vec<Value>> {
        let page = self.page::<RoleBinding>(&PageRequest::default()).await?;
        Ok(page.items)
    }

    async fn list_namespaces(&self) -> ApiResult<Vec<Value>> {
        let page = self.page::<Namespace>(&PageRequest::default()).await?;
        Ok(page.items)
    }

    async fn server_version(&self) -> ApiResult<String> {
        let info = self.client.apiserver_version().await?;
        Ok(info.git_version)
    }
}

/// An in-memory cluster for testing without a real Kubernetes cluster.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::{BTreeMap, HashMap, HashSet};
    use std::time::Duration;

    /// Kind key used for deployments.
    pub const DEPLOYMENTS: &str = "deployments";
    /// Kind key used for stateful sets.
    pub const STATEFUL_SETS: &str = "statefulsets";
    /// Kind key used for daemon sets.
    pub const DAEMON_SETS: &str = "daemonsets";
    /// Kind key used for replica sets.
    pub const REPLICA_SETS: &str = "replicasets";
    /// Kind key used for pods.
    pub const PODS: &str = "pods";
    /// Kind key used for jobs.
    pub const JOBS: &str = "jobs";
    /// Kind key used for secrets.
    pub const SECRETS: &str = "secrets";
    /// Kind key used for nodes.
    pub const NODES: &str = "nodes";
    /// Kind key used for role bindings.
    pub const ROLE_BINDINGS: &str = "rolebindings";
    /// Kind key used for namespaces.
    pub const NAMESPACES: &str = "namespaces";
    /// Kind key used for the server version call.
    pub const VERSION: &str = "version";

    /// A mock cluster serving objects stored as JSON.
    ///
    /// Objects are keyed by the constants in this module, or by
    /// `ResourceRef::path` for untyped resources. Continuation tokens are
    /// item offsets.
    #[derive(Default)]
    pub struct MockClusterApi {
        objects: Mutex<HashMap<String, Vec<Value>>>,
        failures: Mutex<HashMap<String, BTreeMap<usize, ApiError>>>,
        persistent_failures: Mutex<HashMap<String, ApiError>>,
        endless: Mutex<HashSet<String>>,
        panics: Mutex<HashMap<String, usize>>,
        delay: Mutex<Option<Duration>>,
        requests: Mutex<Vec<(String, PageRequest)>>,
        version: Mutex<Option<String>>,
    }

    impl MockClusterApi {
        /// Create an empty mock cluster.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Add objects of a kind.
        ///
        /// # Panics
        ///
        /// Panics if an object cannot be encoded as JSON.
        pub fn add<T: serde::Serialize>(&self, kind: &str, items: impl IntoIterator<Item = T>) {
            let mut objects = self.objects.lock();
            let stored = objects.entry(kind.to_string()).or_default();
            for item in items {
                stored.push(serde_json::to_value(item).expect("object encodes as JSON"));
            }
        }

        /// Fail the `call`-th request (zero based) for a kind.
        pub fn fail_call(&self, kind: &str, call: usize, error: ApiError) {
            self.failures
                .lock()
                .entry(kind.to_string())
                .or_default()
                .insert(call, error);
        }

        /// Fail every request for a kind.
        pub fn fail_always(&self, kind: &str, error: ApiError) {
            self.persistent_failures
                .lock()
                .insert(kind.to_string(), error);
        }

        /// Keep returning a continuation token for a kind, even past the end.
        pub fn endless_pages(&self, kind: &str) {
            self.endless.lock().insert(kind.to_string());
        }

        /// Panic on the next `times` requests for a kind.
        pub fn panic_on(&self, kind: &str, times: usize) {
            self.panics.lock().insert(kind.to_string(), times);
        }

        /// Sleep before answering each request.
        pub fn set_delay(&self, delay: Option<Duration>) {
            *self.delay.lock() = delay;
        }

        /// Set the server version string.
        pub fn set_version(&self, version: &str) {
            *self.version.lock() = Some(version.to_string());
        }

        /// All requests received for a kind, in order.
        #[must_use]
        pub fn requests_for(&self, kind: &str) -> Vec<PageRequest> {
            self.requests
                .lock()
                .iter()
                .filter(|(k, _)| k == kind)
                .map(|(_, req)| req.clone())
                .collect()
        }

        /// Total number of requests received.
        #[must_use]
        pub fn request_count(&self) -> usize {
            self.requests.lock().len()
        }

        async fn begin(&self, kind: &str, req: &PageRequest) -> ApiResult<()> {
            let call = {
                let mut requests = self.requests.lock();
                let call = requests.iter().filter(|(k, _)| k == kind).count();
                requests.push((kind.to_string(), req.clone()));
                call
            };

            let delay = *self.delay.lock();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            let should_panic = {
                let mut panics = self.panics.lock();
                match panics.get_mut(kind) {
                    Some(left) if *left > 0 => {
                        *left -= 1;
                        true
                    }
                    _ => false,
                }
            };
            assert!(!should_panic, "injected panic listing {kind}");

            if let Some(err) = self.persistent_failures.lock().get(kind) {
                return Err(err.clone());
            }
            if let Some(err) = self
                .failures
                .lock()
                .get_mut(kind)
                .and_then(|f| f.remove(&call))
            {
                return Err(err);
            }
            Ok(())
        }

        async fn serve(&self, kind: &str, req: &PageRequest) -> ApiResult<ListPage<Value>> {
            self.begin(kind, req).await?;

            let matching: Vec<Value> = self
                .objects
                .lock()
                .get(kind)
                .map(|items| {
                    items
                        .iter()
                        .filter(|item| matches_selector(item, req.label_selector.as_deref()))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();

            let offset = match &req.continue_token {
                Some(token) => token
                    .parse::<usize>()
                    .map_err(|_| ApiError::Other(format!("bad continue token {token}")))?,
                None => 0,
            };
            let start = offset.min(matching.len());
            let end = match req.limit {
                Some(limit) => (start + limit as usize).min(matching.len()),
                None => matching.len(),
            };
            let remaining = matching.len() - end;
            let endless = self.endless.lock().contains(kind);

            Ok(ListPage {
                items: matching[start..end].to_vec(),
                continue_token: (remaining > 0 || endless).then(|| end.to_string()),
                remaining_item_count: (remaining > 0)
                    .then_some(remaining)
                    .and_then(|r| i64::try_from(r).ok()),
            })
        }
    }

    fn matches_selector(item: &Value, selector: Option<&str>) -> bool {
        let Some(selector) = selector else {
            return true;
        };
        let labels = item.pointer("/metadata/labels");
        selector
            .split(',')
            .filter(|term| !term.is_empty())
            .all(|term| match term.split_once('=') {
                Some((key, value)) => labels
                    .and_then(|l| l.get(key))
                    .and_then(Value::as_str)
                    .is_some_and(|v| v == value),
                None => labels.and_then(|l| l.get(term)).is_some(),
            })
    }

    #[async_trait]
    impl ClusterApi for MockClusterApi {
        async fn list_deployments(&self, req: &PageRequest) -> ApiResult<ListPage<Value>> {
            self.serve(DEPLOYMENTS, req).await
        }

        async fn list_stateful_sets(&self, req: &PageRequest) -> ApiResult<ListPage<Value>> {
            self.serve(STATEFUL_SETS, req).await
        }

        async fn list_daemon_sets(&self, req: &PageRequest) -> ApiResult<ListPage<Value>> {
            self.serve(DAEMON_SETS, req).await
        }

        async fn list_replica_sets(&self, req: &PageRequest) -> ApiResult<ListPage<Value>> {
            self.serve(REPLICA_SETS, req).await
        }

        async fn list_pods(&self, req: &PageRequest) -> ApiResult<ListPage<Value>> {
            self.serve(PODS, req).await
        }

        async fn list_jobs(&self, req: &PageRequest) -> ApiResult<ListPage<Value>> {
            self.serve(JOBS, req).await
        }

        async fn list_secrets(&self, req: &PageRequest) -> ApiResult<ListPage<Value>> {
            self.serve(SECRETS, req).await
        }

        async fn list_nodes(&self, req: &PageRequest) -> ApiResult<ListPage<Value>> {
            self.serve(NODES, req).await
        }

        async fn list_objects(
            &self,
            resource: &ResourceRef,
            req: &PageRequest,
        ) -> ApiResult<ListPage<Value>> {
            self.serve(&resource.path(), req).await
        }

        async fn list_role_bindings(&self) -> ApiResult<Vec<Value>> {
            let page = self.serve(ROLE_BINDINGS, &PageRequest::default()).await?;
            Ok(page.items)
        }

        async fn list_namespaces(&self) -> ApiResult<Vec<Value>> {
            let page = self.serve(NAMESPACES, &PageRequest::default()).await?;
            Ok(page.items)
        }

        async fn server_version(&self) -> ApiResult<String> {
            self.begin(VERSION, &PageRequest::default()).await?;
            Ok(self
                .version
                .lock()
                .clone()
                .unwrap_or_else(|| "v1.31.0".to_string()))
        }
    }
}
