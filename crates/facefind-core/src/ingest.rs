//! Video Ingest
//!
//! Upload pipeline: validate, copy into the video directory under the new
//! video id, register a `processing` record, run face detection and settle
//! the record.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::engine::AnalysisEngine;
use crate::fs::{base_name, has_allowed_extension, remove_file_best_effort};
use crate::library::{NewVideo, VideoLibrary};
use crate::models::{new_video_id, Location, VideoId};
use crate::{CoreError, CoreResult};

/// Accepted video container extensions
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mkv", "wmv", "flv", "webm"];

/// A video to ingest
#[derive(Clone, Debug, Default)]
pub struct UploadRequest {
    pub source_path: PathBuf,
    /// Name to record; defaults to the source file name
    pub original_filename: Option<String>,
    pub location: Location,
}

/// Result of a successful upload
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UploadOutcome {
    pub video_id: VideoId,
    pub unique_faces_count: u32,
    pub faces: Vec<String>,
    pub message: String,
    pub processing_time_seconds: f64,
}

pub struct VideoIngest {
    library: Arc<VideoLibrary>,
    engine: Arc<dyn AnalysisEngine>,
    videos_dir: PathBuf,
}

impl VideoIngest {
    pub fn new(
        library: Arc<VideoLibrary>,
        engine: Arc<dyn AnalysisEngine>,
        videos_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            library,
            engine,
            videos_dir: videos_dir.into(),
        }
    }

    /// Ingests one video.
    ///
    /// Detection failures mark the record failed and are returned to the caller.
    pub async fn upload(&self, request: UploadRequest) -> CoreResult<UploadOutcome> {
        let started = Instant::now();

        let filename = match request.original_filename {
            Some(name) if !name.trim().is_empty() => base_name(name.trim()),
            _ => base_name(&request.source_path.to_string_lossy()),
        };
        if !has_allowed_extension(&filename, VIDEO_EXTENSIONS) {
            return Err(CoreError::Validation(format!(
                "Unsupported video format: {}. Allowed: {}",
                filename,
                VIDEO_EXTENSIONS.join(", ")
            )));
        }
        if !request.source_path.is_file() {
            return Err(CoreError::Validation(format!(
                "Video file not found: {}",
                request.source_path.display()
            )));
        }

        let video_id = new_video_id();
        let stored_path = self
            .store_media(&request.source_path, &video_id, &filename)
            .await?;

        let record = match self.library.register_upload(NewVideo {
            id: Some(video_id),
            original_filename: filename,
            stored_path: stored_path.clone(),
            location: request.location,
        }) {
            Ok(record) => record,
            Err(e) => {
                remove_file_best_effort(&stored_path);
                return Err(e);
            }
        };

        match self.engine.detect_faces(&stored_path, &record.id).await {
            Ok(detection) => {
                let elapsed = started.elapsed().as_secs_f64();
                self.library
                    .mark_completed(&record.id, &detection, elapsed)?;
                Ok(UploadOutcome {
                    video_id: record.id,
                    unique_faces_count: detection.unique_faces_count,
                    faces: detection.faces,
                    message: detection.message,
                    processing_time_seconds: elapsed,
                })
            }
            Err(e) => {
                error!(video_id = %record.id, "Face detection failed: {}", e);
                if let Err(mark_err) = self.library.mark_failed(&record.id, &e.to_string()) {
                    error!(video_id = %record.id, "Could not mark video failed: {}", mark_err);
                }
                Err(e.into())
            }
        }
    }

    /// Copies the upload to `<videos_dir>/<video_id>_<filename>`
    async fn store_media(
        &self,
        source: &Path,
        video_id: &str,
        filename: &str,
    ) -> CoreResult<PathBuf> {
        tokio::fs::create_dir_all(&self.videos_dir)
            .await
            .map_err(|e| {
                CoreError::Storage(format!(
                    "Failed to create video directory {}: {}",
                    self.videos_dir.display(),
                    e
                ))
            })?;

        let dest = self.videos_dir.join(format!("{video_id}_{filename}"));
        tokio::fs::copy(source, &dest).await.map_err(|e| {
            CoreError::Storage(format!("Failed to store video {}: {}", dest.display(), e))
        })?;

        info!("Stored upload at {}", dest.display());
        Ok(dest)
    }
}
