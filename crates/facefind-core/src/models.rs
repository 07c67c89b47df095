//! Record Model Definitions
//!
//! Video and search-history records as they are persisted in the record
//! files. Field names are snake_case on disk.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::Record;

/// Video record identifier (`video_<ULID>`)
pub type VideoId = String;

/// Search record identifier (`search_<ULID>`)
pub type SearchId = String;

/// Generates a new time-ordered video id
pub fn new_video_id() -> VideoId {
    format!("video_{}", ulid::Ulid::new())
}

/// Generates a new time-ordered search id
pub fn new_search_id() -> SearchId {
    format!("search_{}", ulid::Ulid::new())
}

// =============================================================================
// Video Record
// =============================================================================

/// Processing status of an uploaded video
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoStatus {
    #[default]
    Processing,
    Completed,
    Failed,
}

impl VideoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoStatus::Processing => "processing",
            VideoStatus::Completed => "completed",
            VideoStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for VideoStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for VideoStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "processing" => Ok(VideoStatus::Processing),
            "completed" => Ok(VideoStatus::Completed),
            "failed" => Ok(VideoStatus::Failed),
            other => Err(format!("unknown video status: {other}")),
        }
    }
}

/// Where a video was recorded. Attached at upload, never changed.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    #[serde(
        rename = "location_name",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
}

impl Location {
    /// Whether both coordinates are present and non-zero
    pub fn has_gps(&self) -> bool {
        matches!(
            (self.latitude, self.longitude),
            (Some(lat), Some(lon)) if lat != 0.0 && lon != 0.0
        )
    }
}

/// A video processing record
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VideoRecord {
    pub id: VideoId,
    pub original_filename: String,
    pub stored_path: PathBuf,
    pub upload_time: DateTime<Utc>,
    #[serde(default)]
    pub status: VideoStatus,
    /// Seconds spent in upload + detection
    #[serde(default)]
    pub processing_time: f64,
    #[serde(default)]
    pub unique_faces_count: u32,
    /// Face image references produced by the engine, in engine order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub face_images: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub is_archived: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_accessed: Option<DateTime<Utc>>,
    #[serde(default)]
    pub access_count: u64,
    #[serde(flatten)]
    pub location: Location,
}

impl VideoRecord {
    /// Creates a record in the `processing` state
    pub fn new(
        id: impl Into<VideoId>,
        original_filename: impl Into<String>,
        stored_path: impl Into<PathBuf>,
        location: Location,
    ) -> Self {
        Self {
            id: id.into(),
            original_filename: original_filename.into(),
            stored_path: stored_path.into(),
            upload_time: Utc::now(),
            status: VideoStatus::Processing,
            processing_time: 0.0,
            unique_faces_count: 0,
            face_images: Vec::new(),
            error_message: None,
            is_archived: false,
            last_accessed: None,
            access_count: 0,
            location,
        }
    }

    /// Last access time, falling back to the upload time for never-read records
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_accessed.unwrap_or(self.upload_time)
    }

    /// Whether the search orchestrator may compare against this video
    pub fn is_searchable(&self) -> bool {
        self.status == VideoStatus::Completed && !self.face_images.is_empty()
    }
}

impl Record for VideoRecord {
    fn id(&self) -> &str {
        &self.id
    }

    fn record_access(&mut self, at: DateTime<Utc>) -> bool {
        self.last_accessed = Some(at);
        self.access_count += 1;
        true
    }
}

// =============================================================================
// Search Record
// =============================================================================

/// One face search, kept for auditing
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchRecord {
    pub id: SearchId,
    pub search_image_path: PathBuf,
    pub search_time: DateTime<Utc>,
    /// SHA-256 of the search image bytes, hex encoded
    pub query_hash: String,
    pub matches_found: usize,
    /// Candidate pool size at the time of the search
    pub total_videos: usize,
    #[serde(default)]
    pub matched_videos: Vec<VideoId>,
    pub processing_time: f64,
}

impl Record for SearchRecord {
    fn id(&self) -> &str {
        &self.id
    }
}
