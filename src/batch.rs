//! Vendor-independent batch job vocabulary and status normalization.
//!
//! A batch job lives on the vendor's side; nothing here holds a worker or
//! any local state between calls. Adapters refresh a [`BatchJob`] by
//! re-fetching it, and callers never mutate one directly.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::core::entities::{GenerateTextOptions, GenerateTextResult};

/// Normalized lifecycle of a vendor-tracked batch job.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl BatchStatus {
    /// Terminal states will never change on a subsequent refresh.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchStatus::Completed | BatchStatus::Failed | BatchStatus::Cancelled
        )
    }
}

/// References to the vendor-side input/output artifacts of a job.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BatchStorage {
    /// Vendor reference to the uploaded input payload.
    pub input_ref: String,
    /// Vendor reference to the output artifact; absent until the job
    /// completes (or if it failed before producing output).
    #[serde(default)]
    pub output_ref: Option<String>,
    /// Storage kind, e.g. "file".
    pub kind: String,
}

/// Snapshot of a vendor batch job. Mutated only by refresh calls
/// (`get_batch_job`), never by the caller.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BatchJob {
    pub id: String,
    pub status: BatchStatus,
    pub total_count: u64,
    pub done_count: u64,
    pub failed_count: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub error: Option<String>,
    pub storage: BatchStorage,
}

/// One generation request inside a batch submission.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BatchRequestItem {
    /// Caller-supplied key for matching results back to requests.
    pub custom_id: String,
    pub options: GenerateTextOptions,
}

/// One result line of a downloaded batch, keyed by `custom_id`. The
/// outcome holds either a full result or an error string, structurally
/// never both.
#[derive(Debug)]
pub struct BatchResult {
    pub custom_id: String,
    pub outcome: Result<GenerateTextResult, String>,
}

impl BatchResult {
    pub fn error(&self) -> Option<&str> {
        self.outcome.as_ref().err().map(String::as_str)
    }
}

/// Cursor-style pagination for listing jobs. Adapters for vendors without
/// cursor APIs define their own equivalent contract.
#[derive(Clone, Debug, Default)]
pub struct BatchPage {
    pub after: Option<String>,
    pub limit: Option<u32>,
}

/// Look a raw vendor status up in an adapter-supplied table. Total by
/// construction: unknown strings fall back to `Pending` so a new vendor
/// status never breaks polling.
pub fn map_vendor_status(table: &[(&str, BatchStatus)], raw: &str) -> BatchStatus {
    for (vendor, status) in table {
        if *vendor == raw {
            return *status;
        }
    }
    tracing::debug!(status = raw, "unknown vendor batch status, treating as pending");
    BatchStatus::Pending
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &[(&str, BatchStatus)] = &[
        ("queued", BatchStatus::Pending),
        ("running", BatchStatus::Processing),
        ("done", BatchStatus::Completed),
    ];

    #[test]
    fn known_statuses_map_through_table() {
        assert_eq!(map_vendor_status(TABLE, "queued"), BatchStatus::Pending);
        assert_eq!(map_vendor_status(TABLE, "running"), BatchStatus::Processing);
        assert_eq!(map_vendor_status(TABLE, "done"), BatchStatus::Completed);
    }

    #[test]
    fn unknown_status_defaults_to_pending() {
        assert_eq!(map_vendor_status(TABLE, "exploded"), BatchStatus::Pending);
        assert_eq!(map_vendor_status(TABLE, ""), BatchStatus::Pending);
    }

    #[test]
    fn terminal_states() {
        assert!(BatchStatus::Completed.is_terminal());
        assert!(BatchStatus::Failed.is_terminal());
        assert!(BatchStatus::Cancelled.is_terminal());
        assert!(!BatchStatus::Pending.is_terminal());
        assert!(!BatchStatus::Processing.is_terminal());
    }
}
