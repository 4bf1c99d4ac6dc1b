//! Isolated execution of discovery passes.
//!
//! Passes run on a dedicated worker thread that owns its own single-threaded
//! runtime, so a pass that panics or stalls cannot take the service's runtime
//! down with it. The worker is kept across passes and replaced after any
//! failure. A worker that dies without answering is reported as a crash and
//! raises the process-wide worker crash flag. Every pass gets its own
//! [`PassTracer`], so a pass abandoned on a discarded worker cannot mix its
//! frames into the next pass's stack dumps.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use clusterscope_core::DiscoveryResults;
use futures::future::LocalBoxFuture;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

use crate::diagnostics::{PassTracer, StackDumpWatcher};
use crate::metrics::DiscoveryMetrics;
use crate::pass::Correlator;
use crate::{DiscoveryError, Result};

static WORKER_CRASH_DETECTED: AtomicBool = AtomicBool::new(false);

/// Whether a worker has died during a pass since the process started.
///
/// This is the sticky suspected-out-of-memory signal for external alerting.
/// It is raised only when a worker exits without answering, which happens
/// when the pass panics; a pass that returns an error never raises it. An
/// out-of-memory kill of the process itself ends the process, so that is
/// reported by the orchestrator rather than by this flag.
#[must_use]
pub fn worker_crash_detected() -> bool {
    WORKER_CRASH_DETECTED.load(Ordering::Acquire)
}

type PassJob = Box<dyn FnOnce() -> LocalBoxFuture<'static, Result<DiscoveryResults>> + Send>;

struct Submission {
    job: PassJob,
    cancel: oneshot::Receiver<()>,
    reply: oneshot::Sender<Result<DiscoveryResults>>,
}

struct Worker {
    generation: u64,
    queue: mpsc::UnboundedSender<Submission>,
    _thread: JoinHandle<()>,
}

impl Worker {
    fn spawn(generation: u64) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| DiscoveryError::PassFailure(format!("failed to build worker runtime: {e}")))?;
        let (queue, mut submissions) = mpsc::unbounded_channel::<Submission>();

        let thread = std::thread::Builder::new()
            .name(format!("discovery-worker-{generation}"))
            .spawn(move || {
                runtime.block_on(async move {
                    while let Some(Submission { job, cancel, reply }) = submissions.recv().await {
                        tokio::select! {
                            result = job() => {
                                let _ = reply.send(result);
                            }
                            _ = cancel => {
                                warn!("Discovery pass cancelled");
                            }
                        }
                    }
                });
            })
            .map_err(|e| DiscoveryError::PassFailure(format!("failed to spawn worker: {e}")))?;

        info!(generation, "Initialized discovery worker");
        Ok(Self {
            generation,
            queue,
            _thread: thread,
        })
    }
}

/// Runs passes on a persistent, replaceable worker with a deadline.
pub struct DiscoverySupervisor {
    correlator: Arc<Correlator>,
    worker: Mutex<Worker>,
    timeout: Duration,
    metrics: DiscoveryMetrics,
}

impl DiscoverySupervisor {
    /// Create a supervisor and start its worker.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker thread cannot be started or the
    /// metrics cannot be registered.
    pub fn new(correlator: Arc<Correlator>) -> Result<Self> {
        let timeout = correlator.config().process_timeout();
        let metrics = DiscoveryMetrics::new()?;
        if worker_crash_detected() {
            metrics.mark_worker_crash();
        }
        Ok(Self {
            correlator,
            worker: Mutex::new(Worker::spawn(0)?),
            timeout,
            metrics,
        })
    }

    /// Override the pass deadline.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Metrics for the passes run by this supervisor.
    #[must_use]
    pub fn metrics(&self) -> &DiscoveryMetrics {
        &self.metrics
    }

    /// Run one pass on the worker and wait for it up to the deadline.
    ///
    /// # Errors
    ///
    /// Returns `PassTimeout` if the deadline passes, `WorkerCrash` if the
    /// worker dies, or the pass's own error. The worker is replaced in
    /// every case.
    pub async fn run_pass(&self) -> Result<DiscoveryResults> {
        let started = Instant::now();
        let config = self.correlator.config();
        let tracer = PassTracer::new();
        let watcher = StackDumpWatcher::spawn(
            config.stacktrace_file.clone(),
            config.stacktrace_poll_interval(),
            tracer.clone(),
        );

        let outcome = self.submit_and_wait(self.correlator.with_tracer(tracer)).await;
        watcher.stop().await;

        let elapsed = started.elapsed();
        match &outcome {
            Ok(results) => {
                info!(
                    services = results.services.len(),
                    elapsed_ms = elapsed.as_millis(),
                    "Discovery pass succeeded"
                );
            }
            Err(err) => {
                error!(error = %err, elapsed_ms = elapsed.as_millis(), "Discovery pass failed");
                if let Err(e) = self.recycle() {
                    error!(error = %e, "Failed to replace discovery worker");
                }
            }
        }
        self.metrics.observe_pass(&outcome, elapsed);
        outcome
    }

    async fn submit_and_wait(&self, correlator: Correlator) -> Result<DiscoveryResults> {
        let job: PassJob = Box::new(move || Box::pin(async move { correlator.run().await }));
        let (cancel_tx, cancel) = oneshot::channel();
        let (reply, response) = oneshot::channel();

        let (generation, sent) = {
            let worker = self.worker.lock();
            let sent = worker.queue.send(Submission { job, cancel, reply });
            (worker.generation, sent)
        };
        if sent.is_err() {
            return Err(self.crashed(generation));
        }

        match tokio::time::timeout(self.timeout, response).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(self.crashed(generation)),
            Err(_) => {
                drop(cancel_tx);
                warn!(generation, timeout = ?self.timeout, "Discovery pass timed out");
                Err(DiscoveryError::PassTimeout(self.timeout))
            }
        }
    }

    fn crashed(&self, generation: u64) -> DiscoveryError {
        WORKER_CRASH_DETECTED.store(true, Ordering::Release);
        self.metrics.mark_worker_crash();
        error!(
            generation,
            "Discovery worker died during a pass, suspected out of memory"
        );
        DiscoveryError::WorkerCrash(format!("worker {generation} exited without a result"))
    }

    fn recycle(&self) -> Result<()> {
        let mut worker = self.worker.lock();
        let next = worker.generation + 1;
        *worker = Worker::spawn(next)?;
        self.metrics.set_worker_generation(next);
        Ok(())
    }
}
