//! Retry queue for failed delivery attempts.
//!
//! Holds at most one pending task per artifact path; a re-enqueue replaces
//! the prior entry. Lives in process memory only — a restart loses pending
//! retries while their artifacts stay on disk.

use crate::types::UploadTask;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::debug;

/// Exponential backoff delay for a failing attempt.
///
/// `retry_count` is the pre-increment attempt count at the time of the
/// failure: 0, 1, 2, ... yield base, 2*base, 4*base, ... capped at `max_ms`.
pub fn backoff_ms(retry_count: u32, base_ms: u64, max_ms: u64) -> u64 {
    let factor = 1u64.checked_shl(retry_count).unwrap_or(u64::MAX);
    base_ms.saturating_mul(factor).min(max_ms)
}

/// Pending upload tasks keyed by artifact path.
#[derive(Debug, Default)]
pub struct RetryQueue {
    tasks: HashMap<PathBuf, UploadTask>,
}

impl RetryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a task, replacing any prior entry for the same artifact.
    pub fn enqueue(&mut self, task: UploadTask) {
        debug!(
            "Queued {:?} (retry {}, due {:?})",
            task.file_path, task.retry_count, task.next_retry_ms
        );
        self.tasks.insert(task.file_path.clone(), task);
    }

    /// Remove and return every task due at `now_ms`, ordered by due time.
    /// Tasks not yet due are left untouched.
    pub fn take_due(&mut self, now_ms: i64) -> Vec<UploadTask> {
        let due_paths: Vec<PathBuf> = self
            .tasks
            .values()
            .filter(|task| task.next_retry_ms.map(|due| due <= now_ms).unwrap_or(true))
            .map(|task| task.file_path.clone())
            .collect();

        let mut due: Vec<UploadTask> = due_paths
            .into_iter()
            .filter_map(|path| self.tasks.remove(&path))
            .collect();

        due.sort_by_key(|task| task.next_retry_ms.unwrap_or(0));
        due
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    #[cfg(test)]
    pub fn contains(&self, path: &std::path::Path) -> bool {
        self.tasks.contains_key(path)
    }

    #[cfg(test)]
    pub fn get(&self, path: &std::path::Path) -> Option<&UploadTask> {
        self.tasks.get(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(path: &str, retry_count: u32, next_retry_ms: Option<i64>) -> UploadTask {
        UploadTask {
            file_path: PathBuf::from(path),
            account_email: "user@example.com".to_string(),
            subject_name: "Subject".to_string(),
            display_index: 1,
            display_id: 1,
            display_name: "Display 1".to_string(),
            captured_at_ms: 1700000000000,
            width: 1920,
            height: 1080,
            retry_count,
            next_retry_ms,
        }
    }

    #[test]
    fn test_backoff_doubles_up_to_cap() {
        assert_eq!(backoff_ms(0, 1_000, 60_000), 1_000);
        assert_eq!(backoff_ms(1, 1_000, 60_000), 2_000);
        assert_eq!(backoff_ms(2, 1_000, 60_000), 4_000);
        assert_eq!(backoff_ms(3, 1_000, 60_000), 8_000);
        assert_eq!(backoff_ms(4, 1_000, 60_000), 16_000);
        assert_eq!(backoff_ms(10, 1_000, 60_000), 60_000);
    }

    #[test]
    fn test_backoff_saturates_on_large_counts() {
        assert_eq!(backoff_ms(63, 1_000, 60_000), 60_000);
        assert_eq!(backoff_ms(64, 1_000, 60_000), 60_000);
        assert_eq!(backoff_ms(200, 1_000, 60_000), 60_000);
    }

    #[test]
    fn test_enqueue_replaces_same_path() {
        let mut queue = RetryQueue::new();
        queue.enqueue(task("/a/screen_1_1.png", 0, Some(1_000)));
        queue.enqueue(task("/a/screen_1_1.png", 1, Some(2_000)));
        queue.enqueue(task("/a/screen_1_1.png", 2, Some(4_000)));

        assert_eq!(queue.len(), 1);
        let entry = queue.get(std::path::Path::new("/a/screen_1_1.png")).unwrap();
        assert_eq!(entry.retry_count, 2);
        assert_eq!(entry.next_retry_ms, Some(4_000));
    }

    #[test]
    fn test_take_due_selects_only_due_tasks() {
        let mut queue = RetryQueue::new();
        queue.enqueue(task("/a/screen_1_1.png", 1, Some(500)));
        queue.enqueue(task("/a/screen_2_1.png", 1, Some(1_500)));
        queue.enqueue(task("/a/screen_3_1.png", 1, Some(999)));

        let due = queue.take_due(1_000);
        assert_eq!(due.len(), 2);
        // Ordered by due time
        assert_eq!(due[0].file_path, PathBuf::from("/a/screen_1_1.png"));
        assert_eq!(due[1].file_path, PathBuf::from("/a/screen_3_1.png"));

        // Not-yet-due task is untouched
        assert_eq!(queue.len(), 1);
        assert!(queue.contains(std::path::Path::new("/a/screen_2_1.png")));
    }

    #[test]
    fn test_take_due_on_empty_queue_is_noop() {
        let mut queue = RetryQueue::new();
        assert!(queue.take_due(i64::MAX).is_empty());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_task_without_due_time_is_immediately_due() {
        let mut queue = RetryQueue::new();
        queue.enqueue(task("/a/screen_1_9.png", 0, None));
        let due = queue.take_due(0);
        assert_eq!(due.len(), 1);
    }
}
