//! Video Library
//!
//! Lifecycle of video records on top of the record store:
//! `processing → completed | failed`, then archive/restore on finished videos.
//! None of these operations touch media or face files.

use std::path::PathBuf;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::engine::DetectionOutcome;
use crate::models::{new_video_id, Location, VideoId, VideoRecord, VideoStatus};
use crate::store::RecordStore;
use crate::{CoreError, CoreResult};

/// Input for registering a freshly stored upload
#[derive(Clone, Debug, Default)]
pub struct NewVideo {
    /// Generated when absent
    pub id: Option<VideoId>,
    pub original_filename: String,
    pub stored_path: PathBuf,
    pub location: Location,
}

/// Filter for [`VideoLibrary::query`]
#[derive(Clone, Debug, Default)]
pub struct VideoQuery {
    /// Case-insensitive substring over filename, status and id
    pub text: Option<String>,
    pub status: Option<VideoStatus>,
    /// `None` matches both archived and active records
    pub archived: Option<bool>,
}

impl VideoQuery {
    fn matches(&self, record: &VideoRecord) -> bool {
        if let Some(status) = self.status {
            if record.status != status {
                return false;
            }
        }
        if let Some(archived) = self.archived {
            if record.is_archived != archived {
                return false;
            }
        }
        match self.text.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => {
                let needle = text.to_lowercase();
                record.original_filename.to_lowercase().contains(&needle)
                    || record.status.as_str().contains(&needle)
                    || record.id.to_lowercase().contains(&needle)
            }
            _ => true,
        }
    }
}

/// Aggregate numbers over the whole library
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoStats {
    pub total_records: usize,
    pub active_records: usize,
    pub archived_records: usize,
    pub total_faces_detected: u64,
    pub total_processing_time: f64,
    pub locations_with_gps: usize,
}

/// A record together with facts about its media file
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VideoPreview {
    pub video: VideoRecord,
    pub media_path: PathBuf,
    pub file_size_bytes: u64,
}

/// Video record lifecycle service
pub struct VideoLibrary {
    store: RecordStore<VideoRecord>,
}

impl VideoLibrary {
    pub fn new(store: RecordStore<VideoRecord>) -> Self {
        Self { store }
    }

    /// Opens the library backed by `path`
    pub fn open(path: impl Into<PathBuf>) -> CoreResult<Self> {
        Ok(Self::new(RecordStore::open(path)?))
    }

    pub fn store(&self) -> &RecordStore<VideoRecord> {
        &self.store
    }

    // -------------------------------------------------------------------------
    // Transitions
    // -------------------------------------------------------------------------

    /// Creates a record in the `processing` state
    pub fn register_upload(&self, new_video: NewVideo) -> CoreResult<VideoRecord> {
        let record = VideoRecord::new(
            new_video.id.unwrap_or_else(new_video_id),
            new_video.original_filename,
            new_video.stored_path,
            new_video.location,
        );
        self.store.upsert(record.clone())?;
        info!(video_id = %record.id, "Registered upload {}", record.original_filename);
        Ok(record)
    }

    pub fn mark_completed(
        &self,
        id: &str,
        detection: &DetectionOutcome,
        processing_time: f64,
    ) -> CoreResult<VideoRecord> {
        let record = self.store.modify(id, |record| {
            require_processing(record)?;
            record.status = VideoStatus::Completed;
            record.unique_faces_count = detection.unique_faces_count;
            record.face_images = detection.faces.clone();
            record.processing_time = processing_time;
            record.error_message = None;
            Ok(())
        })?;
        info!(
            video_id = %id,
            faces = record.unique_faces_count,
            "Video processing completed"
        );
        Ok(record)
    }

    pub fn mark_failed(&self, id: &str, message: &str) -> CoreResult<VideoRecord> {
        let record = self.store.modify(id, |record| {
            require_processing(record)?;
            record.status = VideoStatus::Failed;
            record.error_message = Some(message.to_string());
            Ok(())
        })?;
        warn!(video_id = %id, "Video processing failed: {}", message);
        Ok(record)
    }

    /// Soft-deletes a finished video. Archiving twice only refreshes `last_accessed`.
    pub fn archive(&self, id: &str) -> CoreResult<VideoRecord> {
        let record = self.store.modify(id, |record| {
            if record.status == VideoStatus::Processing {
                return Err(CoreError::InvalidState(format!(
                    "Video {} is still processing",
                    record.id
                )));
            }
            record.is_archived = true;
            record.last_accessed = Some(Utc::now());
            Ok(())
        })?;
        info!(video_id = %id, "Video archived");
        Ok(record)
    }

    pub fn restore(&self, id: &str) -> CoreResult<VideoRecord> {
        let record = self.store.modify(id, |record| {
            if !record.is_archived {
                return Err(CoreError::InvalidState(format!(
                    "Video {} is not archived",
                    record.id
                )));
            }
            record.is_archived = false;
            record.last_accessed = Some(Utc::now());
            Ok(())
        })?;
        info!(video_id = %id, "Video restored");
        Ok(record)
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// Fetches a record, counting the access
    pub fn get(&self, id: &str) -> CoreResult<VideoRecord> {
        self.store
            .get(id)?
            .ok_or_else(|| CoreError::RecordNotFound(id.to_string()))
    }

    pub fn list_all(&self) -> CoreResult<Vec<VideoRecord>> {
        self.store.list_all().map(newest_first)
    }

    pub fn list_active(&self) -> CoreResult<Vec<VideoRecord>> {
        self.store.list_where(|r| !r.is_archived).map(newest_first)
    }

    pub fn list_archived(&self) -> CoreResult<Vec<VideoRecord>> {
        self.store.list_where(|r| r.is_archived).map(newest_first)
    }

    pub fn query(&self, query: &VideoQuery) -> CoreResult<Vec<VideoRecord>> {
        self.store.list_where(|r| query.matches(r)).map(newest_first)
    }

    /// Completed videos with at least one face, optionally including archived ones
    pub fn search_candidates(&self, include_archived: bool) -> CoreResult<Vec<VideoRecord>> {
        let mut candidates = self
            .store
            .list_where(|r| r.is_searchable() && (include_archived || !r.is_archived))?;
        candidates.sort_by(|a, b| a.upload_time.cmp(&b.upload_time).then(a.id.cmp(&b.id)));
        Ok(candidates)
    }

    pub fn stats(&self) -> CoreResult<VideoStats> {
        let records = self.store.list_all()?;
        let mut stats = VideoStats {
            total_records: records.len(),
            ..VideoStats::default()
        };
        for record in &records {
            if record.is_archived {
                stats.archived_records += 1;
            } else {
                stats.active_records += 1;
            }
            stats.total_faces_detected += u64::from(record.unique_faces_count);
            stats.total_processing_time += record.processing_time;
            if record.location.has_gps() {
                stats.locations_with_gps += 1;
            }
        }
        Ok(stats)
    }

    /// Resolves the media file of a video. Fails if the file is gone.
    pub fn preview(&self, id: &str) -> CoreResult<VideoPreview> {
        let video = self.get(id)?;
        let metadata = std::fs::metadata(&video.stored_path).map_err(|_| {
            CoreError::RecordNotFound(format!(
                "Media file for {} not found: {}",
                id,
                video.stored_path.display()
            ))
        })?;
        Ok(VideoPreview {
            media_path: video.stored_path.clone(),
            file_size_bytes: metadata.len(),
            video,
        })
    }
}

fn require_processing(record: &VideoRecord) -> CoreResult<()> {
    if record.status != VideoStatus::Processing {
        return Err(CoreError::InvalidState(format!(
            "Video {} is {}, expected processing",
            record.id, record.status
        )));
    }
    Ok(())
}

fn newest_first(mut records: Vec<VideoRecord>) -> Vec<VideoRecord> {
    records.sort_by(|a, b| b.upload_time.cmp(&a.upload_time).then(a.id.cmp(&b.id)));
    records
}
