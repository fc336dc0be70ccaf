//! Core types used throughout the capture agent.
//!
//! This module defines the fundamental data structures for captured display
//! images, their delivery bookkeeping, and the wire payload sent to the
//! collector.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Unique identifier for a display (platform-specific)
pub type DisplayId = u32;

/// Platform screen-capture permission, as reported by the capability gate.
///
/// The result is advisory: capture is attempted regardless, because the
/// capture call itself may raise the system permission prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PermissionState {
    Granted,
    Denied,
    Undetermined,
    /// Platform has no distinguishable screen-capture permission
    NotApplicable,
}

impl PermissionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionState::Granted => "granted",
            PermissionState::Denied => "denied",
            PermissionState::Undetermined => "undetermined",
            PermissionState::NotApplicable => "not-applicable",
        }
    }

    /// Whether the scheduler should treat this state as capture-capable.
    pub fn is_usable(&self) -> bool {
        matches!(self, PermissionState::Granted | PermissionState::NotApplicable)
    }
}

/// One image captured from one display at one instant.
#[derive(Debug, Clone)]
pub struct Artifact {
    /// 1-based ordinal among the displays present at capture time
    pub display_index: u32,
    /// Platform display identifier
    pub display_id: DisplayId,
    /// Human-readable display name
    pub display_name: String,
    /// Capture instant, epoch milliseconds
    pub captured_at_ms: i64,
    pub width: u32,
    pub height: u32,
    /// On-disk location; unique per capture (timestamp + display ordinal)
    pub file_path: PathBuf,
    /// PNG encoding of the capture
    pub encoded_bytes: Vec<u8>,
    /// Transport encoding of the same bytes
    pub base64_payload: String,
}

/// Delivery-attempt record for one artifact.
///
/// Carries the display metadata needed to rebuild the wire payload on a
/// retry; the image bytes themselves are re-read from `file_path` so the
/// queue stays small. At most one task per `file_path` lives in the retry
/// queue at any time.
#[derive(Debug, Clone)]
pub struct UploadTask {
    pub file_path: PathBuf,
    /// Identity fields, read from the onboarding record at enqueue time
    pub account_email: String,
    pub subject_name: String,
    pub display_index: u32,
    pub display_id: DisplayId,
    pub display_name: String,
    pub captured_at_ms: i64,
    pub width: u32,
    pub height: u32,
    /// Attempts made so far
    pub retry_count: u32,
    /// Epoch ms; absent until the task fails recoverably
    pub next_retry_ms: Option<i64>,
}

impl UploadTask {
    /// Build a fresh task (retry count 0) for a captured artifact.
    pub fn for_artifact(artifact: &Artifact, account_email: String, subject_name: String) -> Self {
        Self {
            file_path: artifact.file_path.clone(),
            account_email,
            subject_name,
            display_index: artifact.display_index,
            display_id: artifact.display_id,
            display_name: artifact.display_name.clone(),
            captured_at_ms: artifact.captured_at_ms,
            width: artifact.width,
            height: artifact.height,
            retry_count: 0,
            next_retry_ms: None,
        }
    }
}

/// Classified result of one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    /// HTTP 2xx
    Success,
    /// HTTP 429; delay hint from the Retry-After header when present
    RateLimited { retry_after_ms: Option<u64> },
    /// Any other non-2xx status or a network-level failure. `retryable` is
    /// false only when the request could not be constructed at all.
    Failed { retryable: bool },
}

/// JSON body POSTed to the collector endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRequest {
    pub account_email: String,
    pub subject_name: String,
    pub screen_number: u32,
    pub display_id: DisplayId,
    pub screen_name: String,
    /// Capture instant, epoch milliseconds
    pub timestamp: i64,
    /// Base64-encoded PNG
    pub image: String,
    pub metadata: UploadMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadMetadata {
    pub width: u32,
    pub height: u32,
    /// ISO-8601 rendering of the capture instant
    pub captured_at: String,
}

/// Derive the artifact file name for a capture.
///
/// Uniqueness across the process lifetime follows from the millisecond
/// timestamp plus the display ordinal; collisions are not expected at
/// normal capture cadence.
pub fn artifact_file_name(display_index: u32, epoch_ms: i64) -> String {
    format!("screen_{}_{}.png", display_index, epoch_ms)
}

/// Errors that can occur while producing an artifact. Delivery failures
/// are classified into [`UploadOutcome`] instead; no transport error leaves
/// the uploader.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("capture failed: {0}")]
    Capture(String),

    #[error("image encoding error: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
