use chrono::{DateTime, FixedOffset};

/// Why a rotation happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerCause {
    /// The active file's time bucket differs from the current one.
    TimeBoundary,
    /// Appending the pending bytes would exceed the size threshold.
    SizeExceeded,
    /// Explicitly requested via `rotate_now`.
    Manual,
}

/// Decides whether rotation should occur now. Pure with respect to the
/// clock: callers pass `now`, so decisions are reproducible and testable.
///
/// The two conditions are independent and combined with OR; the time check
/// runs first so that a simultaneous boundary-plus-size crossing rotates once
/// and restarts the sequence index for the new bucket.
#[derive(Debug, Clone)]
pub(crate) struct TriggerEvaluator {
    /// Bucket rendering format from the archive pattern; `None` disables the
    /// time trigger (archiving off, size-only rotation).
    date_format: Option<String>,
    max_size: Option<u64>,
}

impl TriggerEvaluator {
    pub fn new(date_format: Option<String>, max_size: Option<u64>) -> Self {
        TriggerEvaluator {
            date_format,
            max_size,
        }
    }

    /// `file_bucket` is the rendered bucket the active file belongs to;
    /// `pending` the size of the write about to be appended. Checked before
    /// the append, so the triggering write lands in the fresh file.
    pub fn evaluate(
        &self,
        file_bucket: Option<&str>,
        current_size: u64,
        pending: u64,
        now: &DateTime<FixedOffset>,
    ) -> Option<TriggerCause> {
        if let (Some(format), Some(bucket)) = (&self.date_format, file_bucket) {
            if now.format(format).to_string() != bucket {
                return Some(TriggerCause::TimeBoundary);
            }
        }
        if let Some(max_size) = self.max_size {
            // An empty file is never rotated: a single oversize record has
            // nowhere smaller to go.
            if current_size > 0 && current_size + pending > max_size {
                return Some(TriggerCause::SizeExceeded);
            }
        }
        None
    }
}
