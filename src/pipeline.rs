//! Pipeline controller: lifecycle, periodic loops, status.
//!
//! Owns the mutable shared state (configuration and retry queue) behind a
//! single async mutex and drives two periodic tasks: the capture tick and
//! the retry-queue scan. Constructed once by the process entry point and
//! handed to the shell collaborator by `Arc`; there is no global instance.

use crate::config::Config;
use crate::permissions;
use crate::retry::RetryQueue;
use crate::scheduler::CaptureScheduler;
use crate::store::ArtifactStore;
use crate::types::{Artifact, PermissionState, UploadTask};
use crate::uploader::{apply_outcome, DeliveryAction, Uploader};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Point-in-time view of the pipeline for the shell's status display.
#[derive(Debug, Clone)]
pub struct PipelineStatus {
    pub running: bool,
    pub capture_interval_ms: u64,
    pub storage_dir: PathBuf,
    pub artifact_count: usize,
    pub endpoint_configured: bool,
    pub queue_depth: usize,
    pub permission: PermissionState,
}

/// Mutable state shared by the two periodic loops.
struct Shared {
    config: Config,
    queue: RetryQueue,
}

/// The capture-buffer-upload pipeline.
pub struct CapturePipeline {
    shared: Arc<Mutex<Shared>>,
    scheduler: Arc<CaptureScheduler>,
    uploader: Uploader,
    running: Arc<AtomicBool>,
    cancel: std::sync::Mutex<Option<CancellationToken>>,
}

impl CapturePipeline {
    pub fn new(config: Config) -> Self {
        let dir = config
            .storage
            .dir
            .clone()
            .unwrap_or_else(ArtifactStore::default_dir);
        Self::with_store(config, ArtifactStore::new(dir))
    }

    /// Build a pipeline over an explicit store (tests use a temp dir).
    pub fn with_store(config: Config, store: ArtifactStore) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared {
                config,
                queue: RetryQueue::new(),
            })),
            scheduler: Arc::new(CaptureScheduler::new(store)),
            uploader: Uploader::new(),
            running: Arc::new(AtomicBool::new(false)),
            cancel: std::sync::Mutex::new(None),
        }
    }

    pub fn store(&self) -> &ArtifactStore {
        self.scheduler.store()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start the capture and retry-scan loops. Idempotent; a second start
    /// while running just logs.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            info!("Pipeline already running");
            return;
        }

        let token = CancellationToken::new();
        if let Ok(mut slot) = self.cancel.lock() {
            *slot = Some(token.clone());
        }

        tokio::spawn(capture_loop(
            Arc::clone(&self.shared),
            Arc::clone(&self.scheduler),
            self.uploader.clone(),
            token.clone(),
        ));
        tokio::spawn(retry_loop(
            Arc::clone(&self.shared),
            Arc::clone(&self.scheduler),
            self.uploader.clone(),
            token,
        ));

        info!("Pipeline started");
    }

    /// Stop both periodic loops. Idempotent. Cancellation is observed
    /// between timer firings; an attempt already in flight completes and
    /// applies its outcome.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            info!("Pipeline already stopped");
            return;
        }

        if let Ok(mut slot) = self.cancel.lock() {
            if let Some(token) = slot.take() {
                token.cancel();
            }
        }

        info!("Pipeline stopped");
    }

    /// One-shot capture bypassing the schedule; returns the captured batch
    /// after attempting delivery for each artifact.
    pub async fn capture_now(&self) -> Vec<Artifact> {
        let config = {
            let shared = self.shared.lock().await;
            shared.config.clone()
        };

        let batch = self.scheduler.run_tick(&config);
        let artifacts: Vec<Artifact> = batch.iter().map(|(artifact, _)| artifact.clone()).collect();

        for (artifact, task) in batch {
            self.deliver(task, Some(artifact.base64_payload)).await;
        }

        artifacts
    }

    /// Live-replace the collector settings; takes effect on the next
    /// delivery attempt.
    pub async fn configure(
        &self,
        endpoint: Option<String>,
        auth_token: String,
        delete_after_upload: bool,
    ) {
        let mut shared = self.shared.lock().await;
        let configured = endpoint.is_some();
        shared.config.upload.endpoint = endpoint;
        shared.config.upload.auth_token = auth_token;
        shared.config.upload.delete_after_upload = delete_after_upload;
        info!("Collector configuration updated (endpoint set: {})", configured);
    }

    /// Probe the collector's health endpoint. Never errors; an unset
    /// endpoint reports unhealthy.
    pub async fn test_connection(&self) -> bool {
        let (endpoint, timeout_secs) = {
            let shared = self.shared.lock().await;
            (
                shared.config.upload.endpoint.clone(),
                shared.config.upload.health_timeout_secs,
            )
        };

        match endpoint {
            Some(endpoint) => {
                self.uploader
                    .health_check(&endpoint, Duration::from_secs(timeout_secs))
                    .await
            }
            None => false,
        }
    }

    /// Snapshot for status display.
    pub async fn status(&self) -> PipelineStatus {
        let shared = self.shared.lock().await;
        let store = self.scheduler.store();
        PipelineStatus {
            running: self.is_running(),
            capture_interval_ms: shared.config.capture.interval_ms,
            storage_dir: store.dir().to_path_buf(),
            artifact_count: store.count(),
            endpoint_configured: shared.config.upload.endpoint.is_some(),
            queue_depth: shared.queue.len(),
            permission: permissions::check(),
        }
    }

    /// Purge artifacts older than the configured age, if one is set.
    /// Maintenance entry; independent of the capture/upload path.
    pub async fn purge_stale(&self) -> Option<usize> {
        let max_age_hours = {
            let shared = self.shared.lock().await;
            shared.config.storage.max_age_hours?
        };
        let removed = self
            .scheduler
            .store()
            .purge_older_than(Duration::from_secs(max_age_hours * 3600));
        Some(removed)
    }

    /// Route one task through the uploader and apply the outcome. Shared by
    /// the capture path (which passes the freshly encoded payload) and the
    /// retry path (which re-reads the artifact from disk).
    pub async fn deliver(&self, task: UploadTask, preloaded_b64: Option<String>) -> DeliveryAction {
        deliver_task(
            &self.shared,
            self.scheduler.store(),
            &self.uploader,
            task,
            preloaded_b64,
        )
        .await
    }
}

/// Periodic capture loop. The first tick fires immediately on start; tick
/// bodies are serialized, and a slow tick delays later ones rather than
/// overlapping them.
async fn capture_loop(
    shared: Arc<Mutex<Shared>>,
    scheduler: Arc<CaptureScheduler>,
    uploader: Uploader,
    token: CancellationToken,
) {
    let interval_ms = {
        let shared = shared.lock().await;
        shared.config.capture.interval_ms.max(1)
    };
    let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = interval.tick() => {
                let config = {
                    let shared = shared.lock().await;
                    shared.config.clone()
                };
                let batch = scheduler.run_tick(&config);
                for (artifact, task) in batch {
                    deliver_task(
                        &shared,
                        scheduler.store(),
                        &uploader,
                        task,
                        Some(artifact.base64_payload),
                    )
                    .await;
                }
            }
        }
    }

    debug!("Capture loop stopped");
}

/// Periodic retry-queue scan. Due tasks are removed under the state lock
/// and routed back through the uploader carrying their retry count.
async fn retry_loop(
    shared: Arc<Mutex<Shared>>,
    scheduler: Arc<CaptureScheduler>,
    uploader: Uploader,
    token: CancellationToken,
) {
    let scan_ms = {
        let shared = shared.lock().await;
        shared.config.retry.scan_interval_ms.max(1)
    };
    let mut interval = tokio::time::interval(Duration::from_millis(scan_ms));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = interval.tick() => {
                let due = {
                    let mut locked = shared.lock().await;
                    let now_ms = chrono::Utc::now().timestamp_millis();
                    locked.queue.take_due(now_ms)
                };

                if due.is_empty() {
                    continue;
                }

                debug!("Retry scan found {} due tasks", due.len());
                for task in due {
                    deliver_task(&shared, scheduler.store(), &uploader, task, None).await;
                }
            }
        }
    }

    debug!("Retry loop stopped");
}

/// One full delivery pass for one task: configuration snapshot, transport
/// attempt (lock released across the network call), outcome application
/// under the lock.
async fn deliver_task(
    shared: &Arc<Mutex<Shared>>,
    store: &ArtifactStore,
    uploader: &Uploader,
    task: UploadTask,
    preloaded_b64: Option<String>,
) -> DeliveryAction {
    let config = {
        let locked = shared.lock().await;
        locked.config.clone()
    };

    let endpoint = match config.upload.endpoint {
        Some(ref endpoint) => endpoint.clone(),
        None => {
            info!(
                "No collector endpoint configured; {:?} retained on disk",
                task.file_path
            );
            return DeliveryAction::Skipped;
        }
    };

    let image_b64 = match preloaded_b64 {
        Some(b64) => b64,
        None => match Uploader::load_image_b64(&task.file_path) {
            Ok(b64) => b64,
            Err(e) => {
                warn!(
                    "Artifact {:?} unreadable, dropping its task: {}",
                    task.file_path, e
                );
                return DeliveryAction::Abandoned;
            }
        },
    };

    let outcome = uploader
        .attempt(
            &task,
            &image_b64,
            &endpoint,
            &config.upload.auth_token,
            Duration::from_secs(config.upload.request_timeout_secs),
        )
        .await;

    let now_ms = chrono::Utc::now().timestamp_millis();
    let mut locked = shared.lock().await;
    // Retry policy and delete flag are re-read under the lock so a live
    // reconfiguration applies to this outcome
    let retry = locked.config.retry.clone();
    let delete_after_upload = locked.config.upload.delete_after_upload;
    apply_outcome(
        task,
        outcome,
        &retry,
        delete_after_upload,
        &mut locked.queue,
        store,
        now_ms,
    )
}
