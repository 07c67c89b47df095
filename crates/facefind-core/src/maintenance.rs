//! Maintenance Operations
//!
//! Bulk removal of records: age-based cleanup of archived videos and a full
//! reset that also deletes media and face files.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::fs::{base_name, remove_file_best_effort};
use crate::library::VideoLibrary;
use crate::{CoreError, CoreResult};

/// Smallest retention window accepted by cleanup
pub const MIN_CLEANUP_DAYS: i64 = 7;

/// What a reset removed
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetReport {
    pub records_removed: usize,
    pub files_attempted: usize,
    pub files_deleted: usize,
}

pub struct Maintenance {
    library: Arc<VideoLibrary>,
    faces_dir: PathBuf,
}

impl Maintenance {
    pub fn new(library: Arc<VideoLibrary>, faces_dir: impl Into<PathBuf>) -> Self {
        Self {
            library,
            faces_dir: faces_dir.into(),
        }
    }

    /// Removes archived records not accessed within `days` days.
    ///
    /// Records that were never read count from their upload time.
    pub fn cleanup_older_than(&self, days: i64) -> CoreResult<usize> {
        if days < MIN_CLEANUP_DAYS {
            return Err(CoreError::Validation(format!(
                "Cleanup window must be at least {} days, got {}",
                MIN_CLEANUP_DAYS, days
            )));
        }

        // A window reaching past the representable range keeps everything.
        let cutoff = Duration::try_days(days)
            .and_then(|window| Utc::now().checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let removed = self
            .library
            .store()
            .remove_where(|r| r.is_archived && r.last_activity() < cutoff)?;

        info!(removed, days, "Cleaned up archived videos");
        Ok(removed)
    }

    /// Deletes every record along with its media and face files.
    ///
    /// File deletion is best effort; failures are logged and counted.
    pub fn reset_all(&self) -> CoreResult<ResetReport> {
        let records = self.library.store().take_all()?;
        let mut report = ResetReport {
            records_removed: records.len(),
            ..ResetReport::default()
        };

        for record in &records {
            report.files_attempted += 1;
            if remove_file_best_effort(&record.stored_path) {
                report.files_deleted += 1;
            }
            for face in &record.face_images {
                report.files_attempted += 1;
                if remove_file_best_effort(&self.faces_dir.join(base_name(face))) {
                    report.files_deleted += 1;
                }
            }
        }

        if report.files_deleted < report.files_attempted {
            warn!(
                "Reset could not delete {} of {} files",
                report.files_attempted - report.files_deleted,
                report.files_attempted
            );
        }
        info!(
            records = report.records_removed,
            files = report.files_deleted,
            "Reset all video data"
        );
        Ok(report)
    }
}
