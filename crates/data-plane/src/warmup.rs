use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use control_plane::admission::AdmissionController;
use control_plane::backend_state::BackendState;
use control_plane::metrics::{Metrics, WarmupErrorKind};
use control_plane::template::TemplateWatcher;

use crate::backend::{BackendClient, CompletionError};
use crate::kvcache::{cache_filename, KvCacheClient, KvCacheError};

#[derive(Debug, Error)]
pub enum WarmupError {
    /// The slot was busy with user traffic; the prefix stays marked for
    /// warmup and the next tick retries.
    #[error("slot busy")]
    SlotBusy,
    /// A user request pre-empted the attempt mid-flight.
    #[error("cancelled")]
    Cancelled,
    #[error("template processing failed: {0}")]
    Template(String),
    #[error("completion request failed: {0}")]
    Completion(String),
}

/// Background loop that keeps changed templates warm in the backend's
/// slot snapshot. One check runs immediately on start, then one per
/// configured interval.
pub struct WarmupScheduler {
    admission: Arc<AdmissionController>,
    backend_state: Arc<BackendState>,
    watcher: Arc<TemplateWatcher>,
    kvcache: Arc<KvCacheClient>,
    backend: Arc<BackendClient>,
    metrics: Arc<Metrics>,
    check_interval: Duration,
}

/// Stops the scheduler's worker task: signals shutdown and waits for the
/// current tick to finish.
pub struct WarmupHandle {
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl WarmupHandle {
    pub async fn stop(self) {
        self.shutdown.cancel();
        if let Err(err) = self.task.await {
            warn!(error = %err, "warmup worker terminated abnormally");
        }
    }
}

impl WarmupScheduler {
    pub fn new(
        admission: Arc<AdmissionController>,
        backend_state: Arc<BackendState>,
        watcher: Arc<TemplateWatcher>,
        kvcache: Arc<KvCacheClient>,
        backend: Arc<BackendClient>,
        metrics: Arc<Metrics>,
        check_interval: Duration,
    ) -> Self {
        Self {
            admission,
            backend_state,
            watcher,
            kvcache,
            backend,
            metrics,
            check_interval,
        }
    }

    pub fn start(self: &Arc<Self>) -> WarmupHandle {
        let scheduler = self.clone();
        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();
        let task = tokio::spawn(async move {
            info!(
                interval_seconds = scheduler.check_interval.as_secs(),
                "warmup scheduler started"
            );
            let mut ticker = tokio::time::interval(scheduler.check_interval);
            // The first interval tick completes immediately, giving the
            // immediate-on-start check.
            loop {
                tokio::select! {
                    _ = signal.cancelled() => break,
                    _ = ticker.tick() => scheduler.run_check().await,
                }
            }
            info!("warmup scheduler stopped");
        });
        WarmupHandle { shutdown, task }
    }

    /// One check cycle: collect changed templates and warm them in
    /// lexicographic order.
    pub async fn run_check(&self) {
        self.metrics.record_warmup_check();
        let changed = self.watcher.check_for_changes();
        if changed.is_empty() {
            debug!("no template changes");
            return;
        }
        info!(count = changed.len(), "templates need warmup");
        for prefix in changed {
            match self.warmup(&prefix).await {
                Ok(()) => {
                    self.watcher.mark_warmed(&prefix);
                    info!(prefix = %prefix, "warmup complete");
                }
                Err(WarmupError::SlotBusy) => {
                    debug!(prefix = %prefix, "slot busy, warmup deferred");
                }
                Err(WarmupError::Cancelled) => {
                    self.metrics.record_warmup_cancellation(&prefix);
                    info!(prefix = %prefix, "warmup cancelled by user request");
                }
                Err(err) => {
                    warn!(prefix = %prefix, error = %err, "warmup failed");
                }
            }
        }
    }

    /// One warmup attempt. On success the backend's slot holds this
    /// template's prefill and its state is recorded; on cancellation
    /// nothing is recorded at all and the next tick retries.
    pub async fn warmup(&self, prefix: &str) -> Result<(), WarmupError> {
        let cancel = CancellationToken::new();
        if !self.admission.acquire_warmup(prefix, cancel.clone()) {
            return Err(WarmupError::SlotBusy);
        }
        let _release = WarmupGuard {
            admission: self.admission.clone(),
        };
        let started = Instant::now();

        if self.backend_state.should_save(prefix) {
            let last = self.backend_state.last_prefix();
            if let Err(err) = self.kvcache.save(&last, &cache_filename(&last)).await {
                // The warmup can still succeed without the old snapshot.
                self.metrics.record_warmup_error(prefix, WarmupErrorKind::Save);
                warn!(prefix = %last, error = %err, "kv cache save failed before warmup");
            }
        }
        if self.backend_state.should_restore(prefix) {
            match self.kvcache.restore(prefix, &cache_filename(prefix)).await {
                Ok(()) => {}
                Err(KvCacheError::NotFound) => {
                    debug!(prefix = %prefix, "no snapshot yet, warming from scratch");
                }
                Err(err) => {
                    warn!(prefix = %prefix, error = %err, "kv cache restore failed");
                }
            }
        }

        let content = self.watcher.process(prefix, "").map_err(|err| {
            self.metrics
                .record_warmup_error(prefix, WarmupErrorKind::Template);
            WarmupError::Template(err.to_string())
        })?;

        let body = json!({
            "messages": [{ "role": "user", "content": content }],
            "max_tokens": 1,
            "stream": false,
        })
        .to_string()
        .into_bytes();

        debug!(prefix = %prefix, "sending warmup completion");
        match self.backend.completion(body, &cancel).await {
            Ok(()) => {}
            Err(CompletionError::Cancelled) => return Err(WarmupError::Cancelled),
            Err(err) => {
                // The abort of a pre-empted request can also surface as a
                // transport error; it still counts as cancellation.
                if cancel.is_cancelled() {
                    return Err(WarmupError::Cancelled);
                }
                self.metrics
                    .record_warmup_error(prefix, WarmupErrorKind::Completion);
                return Err(WarmupError::Completion(err.to_string()));
            }
        }

        self.backend_state.update(prefix);
        self.metrics
            .record_warmup_execution(prefix, started.elapsed().as_secs_f64());
        Ok(())
    }
}

/// Releases the warmup slot on every exit path. After a user pre-emption
/// the release is a no-op.
struct WarmupGuard {
    admission: Arc<AdmissionController>,
}

impl Drop for WarmupGuard {
    fn drop(&mut self) {
        self.admission.release_warmup();
    }
}
