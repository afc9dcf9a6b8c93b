//! Attachment upload batches and aggregate progress.
//!
//! One batch is one multipart request carrying every file of a send. The
//! batch reports a single percentage for all of its bytes. The message is
//! only created after the batch resolves to server attachments.

use bytes::Bytes;
use quadchat_proto::{MessageId, RoomId};

/// A file picked for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    /// Name sent as the multipart filename.
    pub filename: String,
    /// MIME type, if known.
    pub mime_type: Option<String>,
    /// File contents.
    pub data: Bytes,
}

impl LocalFile {
    /// Create a file from its parts.
    pub fn new(filename: impl Into<String>, mime_type: Option<String>, data: Bytes) -> Self {
        Self { filename: filename.into(), mime_type, data }
    }

    /// Size in bytes.
    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    /// Whether the file has no contents.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Aggregate progress for one batch.
///
/// # Invariants
///
/// - Reported values never decrease.
/// - Each value is reported at most once.
/// - 100 is reported exactly once, and only by [`ProgressTracker::complete`]:
///   all bytes written is not the same as the server accepting them.
#[derive(Debug, Clone, Default)]
pub struct ProgressTracker {
    last: Option<u8>,
    finished: bool,
}

impl ProgressTracker {
    /// Tracker with nothing reported.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a bytes-sent observation. Returns the percentage to report, if
    /// it moved.
    pub fn observe(&mut self, sent: u64, total: u64) -> Option<u8> {
        if self.finished {
            return None;
        }

        let percent = if total == 0 {
            0
        } else {
            let scaled = u128::from(sent.min(total)) * 100 / u128::from(total);
            u8::try_from(scaled.min(99)).unwrap_or(99)
        };

        if self.last.is_some_and(|last| last >= percent) {
            return None;
        }
        self.last = Some(percent);
        Some(percent)
    }

    /// The batch succeeded. Returns 100 the first time only.
    pub fn complete(&mut self) -> Option<u8> {
        if self.finished {
            return None;
        }
        self.finished = true;
        self.last = Some(100);
        Some(100)
    }

    /// Last reported percentage.
    pub fn last_reported(&self) -> Option<u8> {
        self.last
    }
}

/// A send waiting for its attachments.
#[derive(Debug, Clone)]
pub struct UploadBatch {
    /// Correlates progress and completion events.
    pub batch_id: u64,
    /// Room the message goes to once the upload succeeds.
    pub room_id: RoomId,
    /// Message text.
    pub content: String,
    /// Message being replied to.
    pub reply_to_id: Option<MessageId>,
    /// Number of files in the batch.
    pub file_count: usize,
    /// Sum of file sizes.
    pub total_bytes: u64,
    /// Aggregate progress.
    pub tracker: ProgressTracker,
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn reports_distinct_increasing_values() {
        let mut tracker = ProgressTracker::new();
        assert_eq!(tracker.observe(0, 200), Some(0));
        assert_eq!(tracker.observe(0, 200), None);
        assert_eq!(tracker.observe(50, 200), Some(25));
        assert_eq!(tracker.observe(40, 200), None);
        assert_eq!(tracker.observe(200, 200), Some(99));
        assert_eq!(tracker.complete(), Some(100));
        assert_eq!(tracker.complete(), None);
        assert_eq!(tracker.observe(200, 200), None);
    }

    #[test]
    fn empty_batch_still_completes() {
        let mut tracker = ProgressTracker::new();
        assert_eq!(tracker.observe(0, 0), Some(0));
        assert_eq!(tracker.complete(), Some(100));
    }

    #[test]
    fn local_file_size() {
        let file = LocalFile::new("a.txt", None, Bytes::from_static(b"hello"));
        assert_eq!(file.len(), 5);
        assert!(!file.is_empty());
    }

    proptest! {
        #[test]
        fn reported_sequence_is_strictly_increasing_and_ends_at_100(
            total in 1u64..1_000_000,
            samples in proptest::collection::vec(0u64..1_200_000, 0..50),
        ) {
            let mut tracker = ProgressTracker::new();
            let mut reported = Vec::new();
            for sent in samples {
                reported.extend(tracker.observe(sent, total));
            }
            reported.extend(tracker.complete());

            prop_assert!(reported.windows(2).all(|w| w[0] < w[1]));
            prop_assert_eq!(reported.last().copied(), Some(100));
            prop_assert_eq!(reported.iter().filter(|p| **p == 100).count(), 1);
        }
    }
}
