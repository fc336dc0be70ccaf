//! Capture scheduler: one tick captures every display once.
//!
//! A tick enumerates displays, captures each in enumeration order, encodes
//! to PNG, writes through the artifact store, and pairs every artifact with
//! a fresh upload task. Any per-display or per-tick failure is logged and
//! skipped; a tick never aborts the periodic loop that drives it.

use crate::config::{Config, IdentityRecord};
use crate::display::{self, DisplaySource};
use crate::permissions;
use crate::store::ArtifactStore;
use crate::types::{artifact_file_name, Artifact, PipelineError, UploadTask};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use image::DynamicImage;
use std::io::Cursor;
use tracing::{debug, info, warn};

/// Downscale an image to fit within the resolution ceiling, preserving
/// aspect ratio. Images already inside the ceiling pass through untouched.
pub fn fit_within(image: DynamicImage, max_width: u32, max_height: u32) -> DynamicImage {
    if image.width() <= max_width && image.height() <= max_height {
        return image;
    }
    image.thumbnail(max_width, max_height)
}

/// Encode an image as a lossless PNG.
pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut bytes = Vec::new();
    image.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)?;
    Ok(bytes)
}

/// Per-tick capture driver.
pub struct CaptureScheduler {
    store: ArtifactStore,
}

impl CaptureScheduler {
    pub fn new(store: ArtifactStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Run one capture tick: one artifact and one fresh upload task per
    /// display present right now, in enumeration order.
    pub fn run_tick(&self, config: &Config) -> Vec<(Artifact, UploadTask)> {
        // Advisory only; capture is attempted regardless because the
        // platform call may itself raise the permission prompt
        let permission = permissions::check();
        if !permission.is_usable() {
            warn!("Screen capture permission is {}", permission.as_str());
        }

        let sources = display::enumerate();
        if sources.is_empty() {
            debug!("No capturable displays; tick yields nothing");
            return Vec::new();
        }

        self.store.ensure_dir();

        // Identity is read fresh at enqueue time; the record is owned by
        // the onboarding flow
        let identity = IdentityRecord::load_from_path(&config.identity_record_path());

        let tick_ms = chrono::Utc::now().timestamp_millis();
        let mut batch = Vec::with_capacity(sources.len());

        for source in &sources {
            match self.capture_one(source, tick_ms, config) {
                Ok(artifact) => {
                    let task = UploadTask::for_artifact(
                        &artifact,
                        identity.account_email.clone(),
                        identity.subject_name.clone(),
                    );
                    batch.push((artifact, task));
                }
                Err(e) => {
                    warn!("Capture failed for display {}: {}", source.id, e);
                }
            }
        }

        info!(
            "Capture tick produced {}/{} artifacts",
            batch.len(),
            sources.len()
        );
        batch
    }

    fn capture_one(
        &self,
        source: &DisplaySource,
        tick_ms: i64,
        config: &Config,
    ) -> Result<Artifact, PipelineError> {
        let image = display::capture(source)
            .ok_or_else(|| PipelineError::Capture(format!("display {} not capturable", source.id)))?;

        let image = fit_within(image, config.capture.max_width, config.capture.max_height);
        let encoded_bytes = encode_png(&image)?;
        let base64_payload = BASE64.encode(&encoded_bytes);

        let file_name = artifact_file_name(source.index, tick_ms);

        let artifact = Artifact {
            display_index: source.index,
            display_id: source.id,
            display_name: source.name.clone(),
            captured_at_ms: tick_ms,
            width: image.width(),
            height: image.height(),
            file_path: self.store.path_for(&file_name),
            encoded_bytes,
            base64_payload,
        };

        self.store.write(&artifact)?;
        Ok(artifact)
    }
}
