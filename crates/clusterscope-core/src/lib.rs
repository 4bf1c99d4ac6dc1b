//! Canonical records for clusterscope.
//!
//! This crate provides the snapshot types produced by one discovery pass:
//!
//! - **Services**: workload-like units with their containers and volumes
//! - **Nodes**: nodes with the requests of the pods scheduled onto them
//! - **Jobs**: batch jobs with their correlated pods
//! - **Releases**: package-manager release revisions decoded from secrets
//! - **Results**: the [`DiscoveryResults`] aggregate and [`ClusterStats`]
//!
//! # Example
//!
//! ```
//! use clusterscope_core::{ServiceKey, ServiceKind};
//!
//! let key: ServiceKey = "default/Deployment/api".parse().unwrap();
//! assert_eq!(key.kind(), ServiceKind::Deployment.as_str());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod helm;
pub mod jobs;
pub mod keys;
pub mod nodes;
pub mod quantity;
pub mod results;
pub mod types;

pub use error::{CoreError, Result};
pub use helm::HelmRelease;
pub use jobs::{JobInfo, JobStatus};
pub use keys::{KeyError, ServiceKey};
pub use nodes::{NodeInfo, PodRequests};
pub use results::{ClusterProvider, ClusterStats, DiscoveryResults, SkippedItem};
pub use types::{
    parse_resource_version, ContainerInfo, EnvVarInfo, NamespaceInfo, OpenshiftGroup,
    ResourceInfo, ServiceConfig, ServiceInfo, ServiceKind, VolumeInfo,
};
