//! Kubernetes discovery engine for clusterscope.
//!
//! This crate takes periodic, full-cluster snapshots. One discovery pass lists
//! every resource category it is configured for, converts the objects into
//! the canonical records of `clusterscope-core`, and correlates pods with the
//! nodes they run on and the jobs they belong to.
//!
//! - [`Lister`] follows continuation tokens with a page size and batch bound
//! - [`adapters`] read typed and untyped workload objects through one trait
//! - [`Correlator`] runs the sub-phases of a pass in order
//! - [`DiscoverySupervisor`] runs passes on an isolated, replaceable worker
//! - [`DiscoveryMetrics`] exports pass errors and durations to Prometheus
//! - [`StatsEstimator`] sizes the cluster without listing everything
//! - [`diagnostics`] dumps the logical stack of a running pass on request
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    DiscoverySupervisor                       │
//! │        deadline · crash detection · worker replacement       │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │              worker thread (own runtime)               │  │
//! │  │                      Correlator                        │  │
//! │  │   custom resources → workloads → pods → nodes → jobs   │  │
//! │  │            → releases → namespaces                     │  │
//! │  └───────────────┬──────────────────────┬─────────────────┘  │
//! │                  ▼                      ▼                    │
//! │            ┌──────────┐          ┌────────────┐              │
//! │            │  Lister  │          │  Adapters  │              │
//! │            └──────────┘          └────────────┘              │
//! └──────────────────┬───────────────────────────────────────────┘
//!                    ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                  ClusterApi (kube::Client)                   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use clusterscope_discovery::{
//!     Correlator, DiscoveryConfig, DiscoverySupervisor, KubeClusterApi,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = DiscoveryConfig::from_env();
//! let api = Arc::new(KubeClusterApi::try_default().await?);
//! let correlator = Arc::new(Correlator::new(api, config));
//! let supervisor = DiscoverySupervisor::new(correlator)?;
//!
//! let results = supervisor.run_pass().await?;
//! println!("{} services", results.services.len());
//! # Ok(())
//! # }
//! ```
//!
//! # Testing
//!
//! Enable the `test-utils` feature for [`MockClusterApi`], an in-memory
//! cluster that serves scripted pages and injects failures.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod adapters;
pub mod api;
pub mod cache;
pub mod diagnostics;
pub mod error;
pub mod jobs;
pub mod lister;
pub mod metrics;
pub mod pass;
pub mod records;
pub mod stats;
pub mod supervisor;
pub mod types;

pub use api::{ApiError, ClusterApi, KubeClusterApi, ListPage, PageRequest, ResourceRef};
pub use cache::{Snapshot, SnapshotCache};
pub use diagnostics::{request_stack_dump, PassTracer, StackDumpWatcher};
pub use error::{DiscoveryError, Result};
pub use lister::{Lister, Listing};
pub use metrics::DiscoveryMetrics;
pub use pass::Correlator;
pub use stats::{detect_provider, StatsEstimator};
pub use supervisor::{worker_crash_detected, DiscoverySupervisor};
pub use types::{CustomResourceDef, DiscoveryConfig, PodPhase};

#[cfg(any(test, feature = "test-utils"))]
pub use api::mock::MockClusterApi;
