//! HTTP delivery of captured artifacts to the collector.
//!
//! One `attempt` is one POST; the response (or transport failure) is
//! classified into an [`UploadOutcome`] and `apply_outcome` turns that into
//! queue and store effects. No transport error propagates past this module.
//! The endpoint-unset short-circuit lives at the single delivery call site
//! in the pipeline, which owns the configuration.

use crate::config::RetryConfig;
use crate::retry::{backoff_ms, RetryQueue};
use crate::store::ArtifactStore;
use crate::types::{UploadMetadata, UploadOutcome, UploadRequest, UploadTask};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::TimeZone;
use reqwest::header::{AUTHORIZATION, RETRY_AFTER};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// What became of one delivery pass over a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryAction {
    /// 2xx confirmed; task discarded
    Delivered,
    /// Recoverable failure; task waiting in the retry queue
    Requeued { due_ms: i64 },
    /// Retry budget exhausted or request unbuildable; task discarded,
    /// artifact retained on disk
    Abandoned,
    /// No endpoint configured; nothing attempted
    Skipped,
}

/// HTTP uploader with a shared client.
#[derive(Debug, Clone)]
pub struct Uploader {
    client: reqwest::Client,
}

impl Default for Uploader {
    fn default() -> Self {
        Self::new()
    }
}

impl Uploader {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Read an artifact's bytes back from disk and transport-encode them.
    /// Used on retries, where only the task's path reference survives.
    pub fn load_image_b64(path: &Path) -> std::io::Result<String> {
        let bytes = std::fs::read(path)?;
        Ok(BASE64.encode(bytes))
    }

    /// Issue one delivery attempt and classify the result.
    pub async fn attempt(
        &self,
        task: &UploadTask,
        image_b64: &str,
        endpoint: &str,
        auth_token: &str,
        timeout: Duration,
    ) -> UploadOutcome {
        let body = build_request(task, image_b64);

        let response = self
            .client
            .post(endpoint)
            .header(AUTHORIZATION, auth_token)
            .timeout(timeout)
            .json(&body)
            .send()
            .await;

        match response {
            Ok(response) => {
                let status = response.status().as_u16();
                let retry_after_ms = response
                    .headers()
                    .get(RETRY_AFTER)
                    .and_then(|value| value.to_str().ok())
                    .and_then(parse_retry_after_ms);
                classify_status(status, retry_after_ms)
            }
            Err(e) if e.is_builder() => {
                warn!("Upload request could not be built for {:?}: {}", task.file_path, e);
                UploadOutcome::Failed { retryable: false }
            }
            Err(e) => {
                warn!("Upload attempt failed for {:?}: {}", task.file_path, e);
                UploadOutcome::Failed { retryable: true }
            }
        }
    }

    /// Probe the collector's health endpoint. Any 2xx is healthy; every
    /// failure mode reports unhealthy rather than erroring.
    pub async fn health_check(&self, endpoint: &str, timeout: Duration) -> bool {
        let url = match health_url(endpoint) {
            Some(url) => url,
            None => {
                warn!("Cannot derive health URL from endpoint {:?}", endpoint);
                return false;
            }
        };

        match self.client.get(url).timeout(timeout).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("Health probe failed: {}", e);
                false
            }
        }
    }
}

/// Build the JSON wire payload for a task.
pub fn build_request(task: &UploadTask, image_b64: &str) -> UploadRequest {
    let captured_at = chrono::Utc
        .timestamp_millis_opt(task.captured_at_ms)
        .single()
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_default();

    UploadRequest {
        account_email: task.account_email.clone(),
        subject_name: task.subject_name.clone(),
        screen_number: task.display_index,
        display_id: task.display_id,
        screen_name: task.display_name.clone(),
        timestamp: task.captured_at_ms,
        image: image_b64.to_string(),
        metadata: UploadMetadata {
            width: task.width,
            height: task.height,
            captured_at,
        },
    }
}

/// Classify an HTTP status into an upload outcome.
pub fn classify_status(status: u16, retry_after_ms: Option<u64>) -> UploadOutcome {
    match status {
        200..=299 => UploadOutcome::Success,
        429 => UploadOutcome::RateLimited { retry_after_ms },
        _ => UploadOutcome::Failed { retryable: true },
    }
}

/// Parse a Retry-After header value (delta-seconds form) to milliseconds.
pub fn parse_retry_after_ms(value: &str) -> Option<u64> {
    value
        .trim()
        .parse::<u64>()
        .ok()
        .map(|secs| secs.saturating_mul(1_000))
}

/// Replace the endpoint's final path segment with the health segment.
pub fn health_url(endpoint: &str) -> Option<String> {
    let mut url = reqwest::Url::parse(endpoint).ok()?;
    {
        let mut segments = url.path_segments_mut().ok()?;
        segments.pop();
        segments.push("health");
    }
    Some(url.to_string())
}

/// Apply a classified outcome to the retry queue and artifact store.
///
/// Holds the delivery semantics: delete-on-success, hint-or-backoff on rate
/// limiting without consuming retry budget, increment-and-requeue on a
/// retryable failure, abandonment once the budget is spent.
pub fn apply_outcome(
    mut task: UploadTask,
    outcome: UploadOutcome,
    retry: &RetryConfig,
    delete_after_upload: bool,
    queue: &mut RetryQueue,
    store: &ArtifactStore,
    now_ms: i64,
) -> DeliveryAction {
    match outcome {
        UploadOutcome::Success => {
            info!("Delivered {:?}", task.file_path);
            if delete_after_upload {
                store.delete(&task.file_path);
            }
            DeliveryAction::Delivered
        }

        UploadOutcome::RateLimited { retry_after_ms } => {
            // Rate limiting does not consume a retry attempt
            let delay_ms = retry_after_ms
                .unwrap_or_else(|| backoff_ms(task.retry_count, retry.base_backoff_ms, retry.max_backoff_ms));
            let due_ms = now_ms + delay_ms as i64;
            info!(
                "Rate limited on {:?}, retrying in {}ms",
                task.file_path, delay_ms
            );
            task.next_retry_ms = Some(due_ms);
            queue.enqueue(task);
            DeliveryAction::Requeued { due_ms }
        }

        UploadOutcome::Failed { retryable: true } => {
            if task.retry_count < retry.max_retries {
                // Backoff is a function of the pre-increment attempt count
                let delay_ms =
                    backoff_ms(task.retry_count, retry.base_backoff_ms, retry.max_backoff_ms);
                let due_ms = now_ms + delay_ms as i64;
                task.retry_count += 1;
                task.next_retry_ms = Some(due_ms);
                info!(
                    "Upload failed for {:?}, retry {}/{} in {}ms",
                    task.file_path, task.retry_count, retry.max_retries, delay_ms
                );
                queue.enqueue(task);
                DeliveryAction::Requeued { due_ms }
            } else {
                warn!(
                    "Abandoning {:?} after {} retries; artifact retained on disk",
                    task.file_path, task.retry_count
                );
                DeliveryAction::Abandoned
            }
        }

        UploadOutcome::Failed { retryable: false } => {
            warn!(
                "Dropping undeliverable task for {:?}; artifact retained on disk",
                task.file_path
            );
            DeliveryAction::Abandoned
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn task(path: PathBuf, retry_count: u32) -> UploadTask {
        UploadTask {
            file_path: path,
            account_email: "user@example.com".to_string(),
            subject_name: "Subject".to_string(),
            display_index: 1,
            display_id: 1,
            display_name: "Display 1".to_string(),
            captured_at_ms: 1700000000000,
            width: 1920,
            height: 1080,
            retry_count,
            next_retry_ms: None,
        }
    }

    fn store_with_file(dir: &tempfile::TempDir, name: &str) -> (ArtifactStore, PathBuf) {
        let store = ArtifactStore::new(dir.path().to_path_buf());
        store.ensure_dir();
        let path = store.path_for(name);
        std::fs::write(&path, b"png-bytes").unwrap();
        (store, path)
    }

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status(200, None), UploadOutcome::Success);
        assert_eq!(classify_status(204, None), UploadOutcome::Success);
        assert_eq!(
            classify_status(429, Some(5_000)),
            UploadOutcome::RateLimited { retry_after_ms: Some(5_000) }
        );
        assert_eq!(
            classify_status(429, None),
            UploadOutcome::RateLimited { retry_after_ms: None }
        );
        assert_eq!(classify_status(500, None), UploadOutcome::Failed { retryable: true });
        assert_eq!(classify_status(404, None), UploadOutcome::Failed { retryable: true });
        assert_eq!(classify_status(401, None), UploadOutcome::Failed { retryable: true });
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after_ms("5"), Some(5_000));
        assert_eq!(parse_retry_after_ms(" 12 "), Some(12_000));
        // HTTP-date form is not honored; computed backoff applies instead
        assert_eq!(parse_retry_after_ms("Wed, 21 Oct 2015 07:28:00 GMT"), None);
        assert_eq!(parse_retry_after_ms(""), None);
    }

    #[test]
    fn test_health_url_replaces_last_segment() {
        assert_eq!(
            health_url("https://collector.example.com/api/upload").as_deref(),
            Some("https://collector.example.com/api/health")
        );
        assert_eq!(
            health_url("https://collector.example.com/upload").as_deref(),
            Some("https://collector.example.com/health")
        );
        assert!(health_url("not a url").is_none());
    }

    #[test]
    fn test_success_deletes_artifact_when_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let (store, path) = store_with_file(&dir, "screen_1_1.png");
        let mut queue = RetryQueue::new();
        let retry = RetryConfig::default();

        let action = apply_outcome(
            task(path.clone(), 0),
            UploadOutcome::Success,
            &retry,
            true,
            &mut queue,
            &store,
            1_000_000,
        );

        assert_eq!(action, DeliveryAction::Delivered);
        assert!(!path.exists());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_success_keeps_artifact_when_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let (store, path) = store_with_file(&dir, "screen_1_2.png");
        let mut queue = RetryQueue::new();
        let retry = RetryConfig::default();

        let action = apply_outcome(
            task(path.clone(), 0),
            UploadOutcome::Success,
            &retry,
            false,
            &mut queue,
            &store,
            1_000_000,
        );

        assert_eq!(action, DeliveryAction::Delivered);
        assert!(path.exists());
    }

    #[test]
    fn test_retryable_failure_increments_and_requeues() {
        let dir = tempfile::tempdir().unwrap();
        let (store, path) = store_with_file(&dir, "screen_1_3.png");
        let mut queue = RetryQueue::new();
        let retry = RetryConfig::default();

        let action = apply_outcome(
            task(path.clone(), 0),
            UploadOutcome::Failed { retryable: true },
            &retry,
            true,
            &mut queue,
            &store,
            1_000_000,
        );

        // Delay computed from the pre-increment count (0 -> base backoff)
        assert_eq!(action, DeliveryAction::Requeued { due_ms: 1_001_000 });
        let entry = queue.get(&path).unwrap();
        assert_eq!(entry.retry_count, 1);
        assert_eq!(entry.next_retry_ms, Some(1_001_000));
        assert!(path.exists());
    }

    #[test]
    fn test_backoff_progression_across_failures() {
        let dir = tempfile::tempdir().unwrap();
        let (store, path) = store_with_file(&dir, "screen_1_4.png");
        let mut queue = RetryQueue::new();
        let retry = RetryConfig {
            max_retries: 10,
            ..RetryConfig::default()
        };

        let mut current = task(path.clone(), 0);
        let expected_delays = [1_000, 2_000, 4_000, 8_000, 16_000];

        for expected in expected_delays {
            let action = apply_outcome(
                current.clone(),
                UploadOutcome::Failed { retryable: true },
                &retry,
                true,
                &mut queue,
                &store,
                0,
            );
            assert_eq!(action, DeliveryAction::Requeued { due_ms: expected });
            current = queue.take_due(i64::MAX).pop().unwrap();
        }
    }

    #[test]
    fn test_exhausted_budget_abandons_and_retains_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let (store, path) = store_with_file(&dir, "screen_1_5.png");
        let mut queue = RetryQueue::new();
        let retry = RetryConfig::default(); // max_retries = 3

        let action = apply_outcome(
            task(path.clone(), 3),
            UploadOutcome::Failed { retryable: true },
            &retry,
            true,
            &mut queue,
            &store,
            0,
        );

        assert_eq!(action, DeliveryAction::Abandoned);
        assert!(queue.is_empty());
        assert!(path.exists());
    }

    #[test]
    fn test_rate_limit_does_not_consume_retry_budget() {
        let dir = tempfile::tempdir().unwrap();
        let (store, path) = store_with_file(&dir, "screen_1_6.png");
        let mut queue = RetryQueue::new();
        let retry = RetryConfig::default();

        let action = apply_outcome(
            task(path.clone(), 2),
            UploadOutcome::RateLimited { retry_after_ms: Some(5_000) },
            &retry,
            true,
            &mut queue,
            &store,
            100_000,
        );

        // Server hint wins over computed backoff
        assert_eq!(action, DeliveryAction::Requeued { due_ms: 105_000 });
        let entry = queue.get(&path).unwrap();
        assert_eq!(entry.retry_count, 2);
    }

    #[test]
    fn test_rate_limit_without_hint_uses_backoff() {
        let dir = tempfile::tempdir().unwrap();
        let (store, path) = store_with_file(&dir, "screen_1_7.png");
        let mut queue = RetryQueue::new();
        let retry = RetryConfig::default();

        let action = apply_outcome(
            task(path.clone(), 2),
            UploadOutcome::RateLimited { retry_after_ms: None },
            &retry,
            true,
            &mut queue,
            &store,
            100_000,
        );

        // 2^2 * 1000ms, count still unchanged
        assert_eq!(action, DeliveryAction::Requeued { due_ms: 104_000 });
        assert_eq!(queue.get(&path).unwrap().retry_count, 2);
    }

    #[test]
    fn test_unbuildable_request_drops_task_and_keeps_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let (store, path) = store_with_file(&dir, "screen_1_8.png");
        let mut queue = RetryQueue::new();
        let retry = RetryConfig::default();

        let action = apply_outcome(
            task(path.clone(), 0),
            UploadOutcome::Failed { retryable: false },
            &retry,
            true,
            &mut queue,
            &store,
            0,
        );

        assert_eq!(action, DeliveryAction::Abandoned);
        assert!(queue.is_empty());
        assert!(path.exists());
    }

    #[test]
    fn test_build_request_carries_display_metadata() {
        let body = build_request(&task(PathBuf::from("/a/screen_1_1.png"), 0), "aW1n");
        assert_eq!(body.screen_number, 1);
        assert_eq!(body.display_id, 1);
        assert_eq!(body.screen_name, "Display 1");
        assert_eq!(body.timestamp, 1700000000000);
        assert_eq!(body.image, "aW1n");
        assert_eq!(body.metadata.width, 1920);
        assert!(body.metadata.captured_at.starts_with("2023-11-14T"));
    }

    #[test]
    fn test_load_image_b64_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("screen_1_1.png");
        std::fs::write(&path, b"hello").unwrap();
        assert_eq!(Uploader::load_image_b64(&path).unwrap(), "aGVsbG8=");
        assert!(Uploader::load_image_b64(&dir.path().join("missing.png")).is_err());
    }
}
