//! Capture Agent - background display capture and upload
//!
//! This crate captures every connected display on a fixed period, buffers
//! the images on local disk, and ships each one to a remote collector over
//! HTTP with bounded-retry exponential backoff:
//!
//! - **Scheduler**: periodic tick capturing one PNG per display
//! - **Store**: on-disk buffer partitioned by unique file names
//! - **Uploader**: one POST per attempt, outcomes classified and applied
//! - **Retry queue**: at most one pending task per artifact, drained by
//!   due time
//!
//! # Architecture
//!
//! The pipeline controller owns the shared state (configuration and retry
//! queue) behind one mutex and runs the capture tick and retry scan as two
//! cooperative periodic tasks. Delivery is at-most-one-in-flight per
//! artifact; a successful upload deletes the local file, an abandoned one
//! retains it.

pub mod config;
pub mod display;
pub mod permissions;
pub mod pipeline;
pub mod retry;
pub mod scheduler;
pub mod store;
pub mod types;
pub mod uploader;

// Re-export commonly used types
pub use config::{Config, IdentityRecord};
pub use display::DisplaySource;
pub use pipeline::{CapturePipeline, PipelineStatus};
pub use retry::{backoff_ms, RetryQueue};
pub use scheduler::CaptureScheduler;
pub use store::ArtifactStore;
pub use types::{
    artifact_file_name, Artifact, DisplayId, PermissionState, PipelineError, UploadMetadata,
    UploadOutcome, UploadRequest, UploadTask,
};
pub use uploader::{DeliveryAction, Uploader};
