//! Clusterscope - periodic Kubernetes discovery service
//!
//! Runs a discovery pass every `DISCOVERY_PERIOD_SEC`, keeps the latest
//! snapshot, and serves it over HTTP.
//!
//! # HTTP Endpoints
//!
//! ## Health & Readiness
//! - `GET /health` - Liveness, pass count and the worker crash flag
//! - `GET /ready` - Ready once a pass has succeeded
//! - `GET /metrics` - Prometheus metrics
//!
//! ## Discovery
//! - `GET /v1/discovery` - Summary of the latest snapshot
//! - `GET /v1/stats` - Approximate cluster size
//! - `GET /v1/stats/namespaces?kind=&group=&version=` - Per-namespace counts
//! - `POST /v1/diagnostics/stacktrace` - Request a stack dump of the running pass

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use clusterscope_discovery::{
    request_stack_dump, worker_crash_detected, Correlator, DiscoveryConfig, DiscoveryError,
    DiscoverySupervisor, KubeClusterApi, SnapshotCache, StatsEstimator,
};
use serde::{Deserialize, Serialize};
use tokio::time::MissedTickBehavior;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    supervisor: Arc<DiscoverySupervisor>,
    estimator: Arc<StatsEstimator>,
    snapshots: Arc<SnapshotCache>,
    config: Arc<DiscoveryConfig>,
}

// ============================================================================
// Health Endpoints
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    worker_crash_detected: bool,
    worker_generation: u64,
    passes: u64,
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        service: "clusterscope",
        worker_crash_detected: worker_crash_detected(),
        worker_generation: state.supervisor.metrics().worker_generation(),
        passes: state.supervisor.metrics().passes(),
    })
}

/// Prometheus metrics endpoint.
///
/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.supervisor.metrics().encode() {
        Ok(buffer) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
            buffer,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            error_response(&e)
        }
    }
}

async fn ready_handler(State(state): State<AppState>) -> impl IntoResponse {
    if state.snapshots.is_empty() {
        (StatusCode::SERVICE_UNAVAILABLE, "waiting for first discovery pass")
    } else {
        (StatusCode::OK, "ready")
    }
}

// ============================================================================
// Discovery Endpoints
// ============================================================================

/// Error response format.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    code: u16,
}

impl ErrorResponse {
    fn new(error: impl Into<String>, code: u16) -> Self {
        Self {
            error: error.into(),
            code,
        }
    }
}

fn error_response(e: &DiscoveryError) -> axum::response::Response {
    let code = e.http_status_code();
    (
        StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        Json(ErrorResponse::new(e.to_string(), code)),
    )
        .into_response()
}

#[derive(Serialize)]
struct SnapshotSummary {
    taken_at: chrono::DateTime<chrono::Utc>,
    age_seconds: i64,
    services: usize,
    nodes: usize,
    jobs: usize,
    namespaces: usize,
    helm_releases: usize,
    openshift_groups: usize,
    pods_running: usize,
    skipped: usize,
}

/// Summarize the latest snapshot.
///
/// GET /v1/discovery
async fn discovery_handler(State(state): State<AppState>) -> impl IntoResponse {
    let Some(snapshot) = state.snapshots.latest() else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse::new("No discovery pass has succeeded yet", 503)),
        )
            .into_response();
    };
    let results = &snapshot.results;
    Json(SnapshotSummary {
        taken_at: snapshot.taken_at,
        age_seconds: state.snapshots.age().map_or(0, |a| a.num_seconds()),
        services: results.services.len(),
        nodes: results.nodes.len(),
        jobs: results.jobs.len(),
        namespaces: results.namespaces.len(),
        helm_releases: results.helm_releases.len(),
        openshift_groups: results.openshift_groups.len(),
        pods_running: results.pods_running_count,
        skipped: results.skipped.len(),
    })
    .into_response()
}

/// Estimate cluster size.
///
/// GET /v1/stats
async fn stats_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.estimator.estimate_stats().await)
}

#[derive(Debug, Deserialize)]
struct CountQuery {
    kind: String,
    #[serde(default)]
    group: String,
    #[serde(default = "default_version")]
    version: String,
}

fn default_version() -> String {
    "v1".to_string()
}

/// Count a resource per namespace.
///
/// GET /v1/stats/namespaces
async fn namespace_counts_handler(
    State(state): State<AppState>,
    Query(query): Query<CountQuery>,
) -> impl IntoResponse {
    match state
        .estimator
        .count_resources(&query.kind, &query.group, &query.version)
        .await
    {
        Ok(counts) => Json::<BTreeMap<String, u64>>(counts).into_response(),
        Err(e) => {
            tracing::error!(kind = %query.kind, error = %e, "Failed to count resources");
            error_response(&e)
        }
    }
}

/// Request a stack dump of the running pass.
///
/// POST /v1/diagnostics/stacktrace
async fn stacktrace_handler(State(state): State<AppState>) -> impl IntoResponse {
    match request_stack_dump(&state.config.stacktrace_file).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e) => error_response(&e),
    }
}

// ============================================================================
// Router
// ============================================================================

fn create_router(state: AppState) -> Router {
    Router::new()
        // Health & readiness
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/metrics", get(metrics_handler))
        // Discovery
        .route("/v1/discovery", get(discovery_handler))
        .route("/v1/stats", get(stats_handler))
        .route("/v1/stats/namespaces", get(namespace_counts_handler))
        .route("/v1/diagnostics/stacktrace", post(stacktrace_handler))
        .with_state(state)
}

async fn run_discovery_loop(
    supervisor: Arc<DiscoverySupervisor>,
    snapshots: Arc<SnapshotCache>,
    period: std::time::Duration,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        match supervisor.run_pass().await {
            Ok(results) => snapshots.store(results),
            Err(e) => {
                tracing::error!(
                    error = %e,
                    retriable = e.is_retriable(),
                    "Discovery pass failed, retrying next period"
                );
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,clusterscope=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Clusterscope");

    // Load configuration from environment
    let listen_addr = std::env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let config = DiscoveryConfig::from_env();
    config.validate()?;

    tracing::info!(
        batch_size = config.batch_size,
        max_batches = config.max_batches,
        timeout_secs = config.process_timeout_seconds,
        period_secs = config.period_seconds,
        custom_crds = config.custom_crds.len(),
        "Loaded discovery configuration"
    );

    let api = Arc::new(KubeClusterApi::try_default().await?);
    tracing::info!("Connected to Kubernetes cluster");

    let correlator = Arc::new(Correlator::new(api.clone(), config.clone()));
    let supervisor = Arc::new(DiscoverySupervisor::new(correlator)?);
    let estimator = Arc::new(StatsEstimator::new(api, &config));
    let snapshots = Arc::new(SnapshotCache::new());

    // Start the discovery loop as a background task
    tokio::spawn(run_discovery_loop(
        Arc::clone(&supervisor),
        Arc::clone(&snapshots),
        config.period(),
    ));
    tracing::info!("Started discovery loop");

    let state = AppState {
        supervisor,
        estimator,
        snapshots,
        config: Arc::new(config),
    };
    let app = create_router(state);

    // Start server
    tracing::info!(listen_addr = %listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
