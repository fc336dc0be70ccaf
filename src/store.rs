//! On-disk artifact buffer.
//!
//! Captured images live here between capture and confirmed delivery. The
//! filesystem namespace is partitioned by unique file names, so concurrent
//! writes never collide.

use crate::types::Artifact;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

const ARTIFACT_EXTENSION: &str = "png";

/// Disk buffer for captured artifacts.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Default per-user artifact directory.
    pub fn default_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("capture-agent")
            .join("captures")
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Idempotent creation of the storage directory. I/O failure is logged,
    /// not fatal; the next write will surface it again.
    pub fn ensure_dir(&self) {
        if let Err(e) = std::fs::create_dir_all(&self.dir) {
            warn!("Failed to create artifact directory {:?}: {}", self.dir, e);
        }
    }

    /// Full path an artifact file name resolves to in this store.
    pub fn path_for(&self, file_name: &str) -> PathBuf {
        self.dir.join(file_name)
    }

    /// Persist an artifact's encoded bytes.
    pub fn write(&self, artifact: &Artifact) -> std::io::Result<PathBuf> {
        std::fs::write(&artifact.file_path, &artifact.encoded_bytes)?;
        debug!(
            "Wrote {} bytes to {:?}",
            artifact.encoded_bytes.len(),
            artifact.file_path
        );
        Ok(artifact.file_path.clone())
    }

    /// Remove an artifact file. Absence is a no-op, not an error.
    pub fn delete(&self, path: &Path) {
        match std::fs::remove_file(path) {
            Ok(()) => debug!("Deleted artifact {:?}", path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to delete artifact {:?}: {}", path, e),
        }
    }

    /// Number of stored artifacts. Status reporting only; a read failure
    /// reports 0.
    pub fn count(&self) -> usize {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(_) => return 0,
        };

        entries
            .flatten()
            .filter(|entry| {
                entry
                    .path()
                    .extension()
                    .map(|ext| ext == ARTIFACT_EXTENSION)
                    .unwrap_or(false)
            })
            .count()
    }

    /// Delete artifacts whose modification time exceeds `max_age`. Returns
    /// the number removed. Maintenance only; not on the capture/upload path.
    pub fn purge_older_than(&self, max_age: Duration) -> usize {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Failed to read artifact directory {:?}: {}", self.dir, e);
                return 0;
            }
        };

        let now = SystemTime::now();
        let mut removed = 0;

        for entry in entries.flatten() {
            let path = entry.path();
            let is_artifact = path
                .extension()
                .map(|ext| ext == ARTIFACT_EXTENSION)
                .unwrap_or(false);
            if !is_artifact {
                continue;
            }

            let modified = match entry.metadata().and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(_) => continue,
            };

            let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
            if age > max_age {
                match std::fs::remove_file(&path) {
                    Ok(()) => removed += 1,
                    Err(e) => warn!("Failed to purge {:?}: {}", path, e),
                }
            }
        }

        if removed > 0 {
            debug!("Purged {} artifacts older than {:?}", removed, max_age);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn test_artifact(path: PathBuf) -> Artifact {
        Artifact {
            display_index: 1,
            display_id: 1,
            display_name: "Display 1".to_string(),
            captured_at_ms: 1700000000000,
            width: 4,
            height: 4,
            file_path: path,
            encoded_bytes: vec![0x89, 0x50, 0x4e, 0x47],
            base64_payload: "iVBORw==".to_string(),
        }
    }

    #[test]
    fn test_write_and_count() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().to_path_buf());
        store.ensure_dir();

        let artifact = test_artifact(store.path_for("screen_1_1700000000000.png"));
        let written = store.write(&artifact).unwrap();
        assert!(written.exists());
        assert_eq!(store.count(), 1);

        // Non-artifact files are not counted
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn test_delete_missing_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().to_path_buf());
        store.ensure_dir();

        // Must not panic or error
        store.delete(&store.path_for("screen_9_1.png"));
        assert_eq!(store.count(), 0);
    }

    #[test]
    fn test_delete_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().to_path_buf());
        store.ensure_dir();

        let artifact = test_artifact(store.path_for("screen_1_2.png"));
        store.write(&artifact).unwrap();
        assert_eq!(store.count(), 1);

        store.delete(&artifact.file_path);
        assert_eq!(store.count(), 0);
        assert!(!artifact.file_path.exists());
    }

    #[test]
    fn test_count_on_missing_dir_is_zero() {
        let store = ArtifactStore::new(PathBuf::from("/nonexistent/captures"));
        assert_eq!(store.count(), 0);
    }

    #[test]
    fn test_purge_older_than() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().to_path_buf());
        store.ensure_dir();

        let artifact = test_artifact(store.path_for("screen_1_3.png"));
        store.write(&artifact).unwrap();

        // Fresh file survives a generous threshold
        assert_eq!(store.purge_older_than(Duration::from_secs(3600)), 0);
        assert_eq!(store.count(), 1);

        // Zero threshold removes everything with a nonzero age
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(store.purge_older_than(Duration::ZERO), 1);
        assert_eq!(store.count(), 0);
    }

    #[test]
    fn test_ensure_dir_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().join("captures"));
        store.ensure_dir();
        store.ensure_dir();
        assert!(store.dir().exists());
    }
}
