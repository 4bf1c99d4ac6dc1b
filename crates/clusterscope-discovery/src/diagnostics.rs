//! On-demand stack dumps of a running discovery pass.
//!
//! A pass records the sub-phase it is in on a [`PassTracer`]. While the pass
//! runs, a [`StackDumpWatcher`] polls for a marker file; when an operator
//! creates it, the watcher logs the tracer's frames, removes the marker and
//! stops.

use std::fmt::Write as _;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::{DiscoveryError, Result};

#[derive(Debug, Default)]
struct TracerState {
    thread: Option<String>,
    started: Option<Instant>,
    frames: Vec<Frame>,
}

#[derive(Debug, Clone)]
struct Frame {
    name: String,
    batch: u32,
    items: usize,
    entered: Instant,
}

/// Logical call stack of the pass in flight.
#[derive(Debug, Clone, Default)]
pub struct PassTracer {
    state: Arc<Mutex<TracerState>>,
}

impl PassTracer {
    /// Create an idle tracer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset the tracer for a new pass on the current thread.
    pub fn begin_pass(&self) {
        let mut state = self.state.lock();
        state.thread = std::thread::current().name().map(str::to_string);
        state.started = Some(Instant::now());
        state.frames.clear();
    }

    /// Push a frame; it is popped when the guard drops.
    #[must_use = "the frame is popped when the guard drops"]
    pub fn enter(&self, name: &str) -> FrameGuard {
        let mut state = self.state.lock();
        let depth = state.frames.len();
        state.frames.push(Frame {
            name: name.to_string(),
            batch: 0,
            items: 0,
            entered: Instant::now(),
        });
        FrameGuard {
            state: Arc::clone(&self.state),
            depth,
        }
    }

    /// Record pagination progress on the innermost frame.
    pub fn record_batch(&self, batch: u32, items: usize) {
        if let Some(frame) = self.state.lock().frames.last_mut() {
            frame.batch = batch;
            frame.items = items;
        }
    }

    /// Names of the active frames, outermost first.
    #[must_use]
    pub fn frame_names(&self) -> Vec<String> {
        self.state
            .lock()
            .frames
            .iter()
            .map(|f| f.name.clone())
            .collect()
    }

    /// Render the stack, innermost frame first.
    #[must_use]
    pub fn render(&self) -> String {
        let state = self.state.lock();
        let thread = state.thread.as_deref().unwrap_or("<unnamed>");
        let mut out = match state.started {
            Some(started) => format!(
                "discovery pass on thread {thread}, running for {:?}\n",
                started.elapsed()
            ),
            None => format!("no discovery pass recorded on thread {thread}\n"),
        };
        for (i, frame) in state.frames.iter().rev().enumerate() {
            let _ = writeln!(
                out,
                "  #{i} {} batch={} items={} elapsed={:?}",
                frame.name,
                frame.batch,
                frame.items,
                frame.entered.elapsed()
            );
        }
        out
    }
}

/// Pops a tracer frame on drop.
#[derive(Debug)]
pub struct FrameGuard {
    state: Arc<Mutex<TracerState>>,
    depth: usize,
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        self.state.lock().frames.truncate(self.depth);
    }
}

/// Watches for the stack dump marker while a pass runs.
pub struct StackDumpWatcher {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<Option<String>>,
}

impl StackDumpWatcher {
    /// Start polling `marker` every `interval`.
    #[must_use]
    pub fn spawn(marker: PathBuf, interval: Duration, tracer: PassTracer) -> Self {
        let (stop, mut stopped) = oneshot::channel();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = &mut stopped => return None,
                    _ = ticker.tick() => {}
                }

                match tokio::fs::try_exists(&marker).await {
                    Ok(true) => {
                        let dump = tracer.render();
                        warn!(marker = %marker.display(), "Stack dump requested\n{dump}");
                        if let Err(e) = tokio::fs::remove_file(&marker).await {
                            warn!(marker = %marker.display(), error = %e, "Failed to remove stack dump marker");
                        }
                        return Some(dump);
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!(marker = %marker.display(), error = %e, "Failed to check stack dump marker");
                    }
                }
            }
        });
        Self { stop, handle }
    }

    /// Stop watching; returns the dump if one was taken.
    pub async fn stop(self) -> Option<String> {
        let _ = self.stop.send(());
        self.handle.await.ok().flatten()
    }
}

/// Ask the running pass for a stack dump by creating the marker file.
///
/// # Errors
///
/// Returns `StackDumpPending` if the marker already exists, or a diagnostics
/// error if it cannot be created.
pub async fn request_stack_dump(marker: &Path) -> Result<()> {
    match tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(marker)
        .await
    {
        Ok(_) => {
            info!(marker = %marker.display(), "Requested discovery stack dump");
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            warn!(marker = %marker.display(), "Stack dump already requested");
            Err(DiscoveryError::StackDumpPending(marker.to_path_buf()))
        }
        Err(e) => Err(DiscoveryError::Diagnostics(format!(
            "failed to create {}: {e}",
            marker.display()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_pop_on_drop() {
        let tracer = PassTracer::new();
        tracer.begin_pass();
        {
            let _outer = tracer.enter("services");
            let _inner = tracer.enter("deployments");
            tracer.record_batch(2, 40);
            assert_eq!(tracer.frame_names(), vec!["services", "deployments"]);

            let rendered = tracer.render();
            assert!(rendered.contains("#0 deployments batch=2 items=40"));
            assert!(rendered.contains("#1 services"));
        }
        assert!(tracer.frame_names().is_empty());
    }

    #[tokio::test]
    async fn watcher_dumps_and_removes_marker() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("dump");
        let tracer = PassTracer::new();
        tracer.begin_pass();
        let _frame = tracer.enter("jobs");

        let watcher =
            StackDumpWatcher::spawn(marker.clone(), Duration::from_millis(10), tracer.clone());
        request_stack_dump(&marker).await.unwrap();

        for _ in 0..200 {
            if !marker.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!marker.exists());

        let dump = watcher.stop().await.unwrap();
        assert!(dump.contains("jobs"));
    }

    #[tokio::test]
    async fn watcher_stops_without_marker() {
        let dir = tempfile::tempdir().unwrap();
        let watcher = StackDumpWatcher::spawn(
            dir.path().join("dump"),
            Duration::from_millis(10),
            PassTracer::new(),
        );
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(watcher.stop().await.is_none());
    }

    #[tokio::test]
    async fn second_request_is_pending() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("dump");

        request_stack_dump(&marker).await.unwrap();
        let err = request_stack_dump(&marker).await.unwrap_err();
        assert!(matches!(err, DiscoveryError::StackDumpPending(_)));
        assert_eq!(err.http_status_code(), 409);
    }
}
