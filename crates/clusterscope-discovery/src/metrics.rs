//! Prometheus metrics for discovery passes.
//!
//! Each supervisor owns a [`DiscoveryMetrics`] registered into its own
//! [`Registry`]; the binary serves it on `/metrics`.

use std::time::Duration;

use clusterscope_core::DiscoveryResults;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

use crate::Result;

/// Pass durations range from seconds on small clusters to the two hour deadline.
const PROCESS_TIME_BUCKETS: &[f64] = &[
    1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1200.0, 1800.0, 3600.0, 7200.0,
];

/// Metrics describing discovery passes.
#[derive(Clone)]
pub struct DiscoveryMetrics {
    registry: Registry,
    errors: IntCounterVec,
    process_time: Histogram,
    worker_crash_detected: IntGauge,
    worker_generation: IntGauge,
}

impl DiscoveryMetrics {
    /// Create the metrics in a fresh registry.
    ///
    /// # Errors
    ///
    /// Returns an error if a metric cannot be registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let errors = IntCounterVec::new(
            Opts::new("discovery_errors_total", "Failed discovery passes by error kind"),
            &["kind"],
        )?;
        let process_time = Histogram::with_opts(
            HistogramOpts::new(
                "discovery_process_time_seconds",
                "Wall-clock time of discovery passes, successful or not",
            )
            .buckets(PROCESS_TIME_BUCKETS.to_vec()),
        )?;
        let worker_crash_detected = IntGauge::new(
            "discovery_worker_crash_detected",
            "1 once a discovery worker has died during a pass (suspected out of memory)",
        )?;
        let worker_generation = IntGauge::new(
            "discovery_worker_generation",
            "Number of times the discovery worker has been replaced",
        )?;

        registry.register(Box::new(errors.clone()))?;
        registry.register(Box::new(process_time.clone()))?;
        registry.register(Box::new(worker_crash_detected.clone()))?;
        registry.register(Box::new(worker_generation.clone()))?;

        Ok(Self {
            registry,
            errors,
            process_time,
            worker_crash_detected,
            worker_generation,
        })
    }

    /// The registry holding these metrics.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record the outcome and duration of a pass.
    pub fn observe_pass(&self, outcome: &Result<DiscoveryResults>, elapsed: Duration) {
        self.process_time.observe(elapsed.as_secs_f64());
        if let Err(err) = outcome {
            self.errors.with_label_values(&[err.kind_label()]).inc();
        }
    }

    /// Raise the worker crash gauge. It is never lowered.
    pub fn mark_worker_crash(&self) {
        self.worker_crash_detected.set(1);
    }

    /// Record the generation of the current worker.
    pub fn set_worker_generation(&self, generation: u64) {
        self.worker_generation
            .set(i64::try_from(generation).unwrap_or(i64::MAX));
    }

    /// Number of passes observed.
    #[must_use]
    pub fn passes(&self) -> u64 {
        self.process_time.get_sample_count()
    }

    /// Number of failed passes with the given error kind label.
    #[must_use]
    pub fn errors(&self, kind: &str) -> u64 {
        self.errors.with_label_values(&[kind]).get()
    }

    /// Generation of the current worker.
    #[must_use]
    pub fn worker_generation(&self) -> u64 {
        u64::try_from(self.worker_generation.get()).unwrap_or(0)
    }

    /// Whether the worker crash gauge is raised.
    #[must_use]
    pub fn worker_crash_detected(&self) -> bool {
        self.worker_crash_detected.get() > 0
    }

    /// Encode every metric in the Prometheus text format.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(buffer)
    }
}
