//! Face Search
//!
//! Compares one search image against the faces of every searchable video.
//! Engine calls run in parallel, bounded by a semaphore; each video
//! contributes a match only when the engine matched at least one of its faces.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::engine::{AnalysisEngine, EngineResult};
use crate::fs::{base_name, has_allowed_extension, remove_file_best_effort};
use crate::history::SearchHistory;
use crate::library::VideoLibrary;
use crate::models::{new_search_id, SearchId, SearchRecord, VideoRecord};
use crate::settings::SearchSettings;
use crate::{CoreError, CoreResult};

/// Accepted search image extensions
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "gif"];

/// Similarity reported for every match. The engine only answers match/no-match.
pub const PLACEHOLDER_SIMILARITY: f64 = 0.85;

/// One video whose faces matched the search image
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FaceMatch {
    pub video: VideoRecord,
    pub matched_faces: Vec<String>,
    pub similarity: f64,
}

/// Result of a face search
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchOutcome {
    pub search_id: SearchId,
    pub matches: Vec<FaceMatch>,
    pub message: String,
    pub processing_time_seconds: f64,
}

/// Deletes the wrapped file when dropped
struct TempFile {
    path: PathBuf,
}

impl TempFile {
    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        if self.path.exists() && remove_file_best_effort(&self.path) {
            debug!("Removed temporary search image {}", self.path.display());
        }
    }
}

pub struct FaceSearch {
    library: Arc<VideoLibrary>,
    history: Arc<SearchHistory>,
    engine: Arc<dyn AnalysisEngine>,
    temp_dir: PathBuf,
    max_concurrency: usize,
    include_archived: bool,
}

impl FaceSearch {
    pub fn new(
        library: Arc<VideoLibrary>,
        history: Arc<SearchHistory>,
        engine: Arc<dyn AnalysisEngine>,
        temp_dir: impl Into<PathBuf>,
        settings: &SearchSettings,
    ) -> Self {
        Self {
            library,
            history,
            engine,
            temp_dir: temp_dir.into(),
            max_concurrency: settings.max_concurrency.max(1),
            include_archived: settings.include_archived,
        }
    }

    /// Searches every candidate video for the face in `image_path`
    pub async fn search(&self, image_path: &Path) -> CoreResult<SearchOutcome> {
        let started = Instant::now();

        let filename = base_name(&image_path.to_string_lossy());
        if !has_allowed_extension(&filename, IMAGE_EXTENSIONS) {
            return Err(CoreError::Validation(format!(
                "Unsupported image format: {}. Allowed: {}",
                filename,
                IMAGE_EXTENSIONS.join(", ")
            )));
        }
        let bytes = tokio::fs::read(image_path).await.map_err(|e| {
            CoreError::Validation(format!(
                "Cannot read search image {}: {}",
                image_path.display(),
                e
            ))
        })?;
        let query_hash = hash_hex(&bytes);

        let search_id = new_search_id();
        let temp = self
            .persist_temp(&search_id, &filename, &bytes)
            .await?;

        let candidates = self.library.search_candidates(self.include_archived)?;
        info!(
            search_id = %search_id,
            candidates = candidates.len(),
            "Searching for face matches"
        );

        let matches = self.match_candidates(temp.path(), &candidates).await;

        let processing_time = started.elapsed().as_secs_f64();
        let message = format!("Found {} video(s) with matching faces", matches.len());
        info!(search_id = %search_id, matches = matches.len(), "{}", message);

        record_history_or_warn(
            &self.history,
            SearchRecord {
                id: search_id.clone(),
                search_image_path: temp.path().to_path_buf(),
                search_time: Utc::now(),
                query_hash,
                matches_found: matches.len(),
                total_videos: candidates.len(),
                matched_videos: matches.iter().map(|m| m.video.id.clone()).collect(),
                processing_time,
            },
        );

        Ok(SearchOutcome {
            search_id,
            matches,
            message,
            processing_time_seconds: processing_time,
        })
    }

    async fn persist_temp(
        &self,
        search_id: &str,
        filename: &str,
        bytes: &[u8],
    ) -> CoreResult<TempFile> {
        tokio::fs::create_dir_all(&self.temp_dir)
            .await
            .map_err(|e| {
                CoreError::Storage(format!(
                    "Failed to create temp directory {}: {}",
                    self.temp_dir.display(),
                    e
                ))
            })?;

        let temp = TempFile {
            path: self.temp_dir.join(format!("{search_id}_{filename}")),
        };
        tokio::fs::write(temp.path(), bytes).await.map_err(|e| {
            CoreError::Storage(format!(
                "Failed to store search image {}: {}",
                temp.path().display(),
                e
            ))
        })?;
        Ok(temp)
    }

    /// Runs the engine over every candidate and keeps the non-empty matches,
    /// in candidate order.
    async fn match_candidates(&self, image: &Path, candidates: &[VideoRecord]) -> Vec<FaceMatch> {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut tasks: JoinSet<(usize, EngineResult<Vec<String>>)> = JoinSet::new();

        for (index, candidate) in candidates.iter().enumerate() {
            let semaphore = semaphore.clone();
            let engine = self.engine.clone();
            let image = image.to_path_buf();
            let faces = candidate.face_images.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                (index, engine.match_faces(&image, &faces).await)
            });
        }

        let mut results: Vec<Option<Vec<String>>> = vec![None; candidates.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, Ok(matched))) => results[index] = Some(matched),
                Ok((index, Err(e))) => {
                    warn!(
                        video_id = %candidates[index].id,
                        "Face matching failed, skipping video: {}", e
                    );
                }
                Err(e) => warn!("Face matching task aborted: {}", e),
            }
        }

        candidates
            .iter()
            .zip(results)
            .filter_map(|(video, matched)| {
                let matched_faces = matched.filter(|faces| !faces.is_empty())?;
                Some(FaceMatch {
                    video: video.clone(),
                    matched_faces,
                    similarity: PLACEHOLDER_SIMILARITY,
                })
            })
            .collect()
    }
}

/// Appends a search to the history. A failed write is logged and swallowed.
pub fn record_history_or_warn(history: &SearchHistory, record: SearchRecord) {
    let id = record.id.clone();
    if let Err(e) = history.append(record) {
        warn!(search_id = %id, "Failed to record search history: {}", e);
    }
}

fn hash_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{DetectionOutcome, EngineError};
    use crate::library::NewVideo;
    use crate::models::Location;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Matches any face ref listed in `known`; refs containing "broken" fail.
    #[derive(Default)]
    struct MockEngine {
        known: HashSet<String>,
        delay: Duration,
        running: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
        images: Mutex<Vec<PathBuf>>,
    }

    impl MockEngine {
        fn knowing(faces: &[&str]) -> Self {
            Self {
                known: faces.iter().map(|f| f.to_string()).collect(),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl AnalysisEngine for MockEngine {
        async fn detect_faces(
            &self,
            _video_path: &Path,
            _video_id: &str,
        ) -> EngineResult<DetectionOutcome> {
            Ok(DetectionOutcome::default())
        }

        async fn match_faces(
            &self,
            search_image: &Path,
            candidates: &[String],
        ) -> EngineResult<Vec<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.images.lock().unwrap().push(search_image.to_path_buf());
            assert!(search_image.exists());

            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.running.fetch_sub(1, Ordering::SeqCst);

            if candidates.iter().any(|c| c.contains("broken")) {
                return Err(EngineError::ExecutionFailed("exit status 1".into()));
            }
            Ok(candidates
                .iter()
                .filter(|c| self.known.contains(*c))
                .cloned()
                .collect())
        }
    }

    struct Fixture {
        dir: TempDir,
        library: Arc<VideoLibrary>,
        history: Arc<SearchHistory>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let library =
                Arc::new(VideoLibrary::open(dir.path().join("data/videos.json")).unwrap());
            let history = Arc::new(
                SearchHistory::open(dir.path().join("history/search_history.json")).unwrap(),
            );
            Self {
                dir,
                library,
                history,
            }
        }

        fn video(&self, name: &str, faces: &[&str]) -> VideoRecord {
            let record = self
                .library
                .register_upload(NewVideo {
                    id: None,
                    original_filename: name.to_string(),
                    stored_path: self.dir.path().join(name),
                    location: Location::default(),
                })
                .unwrap();
            self.library
                .mark_completed(
                    &record.id,
                    &DetectionOutcome {
                        unique_faces_count: faces.len() as u32,
                        faces: faces.iter().map(|f| f.to_string()).collect(),
                        message: String::new(),
                    },
                    1.0,
                )
                .unwrap()
        }

        fn image(&self, name: &str) -> PathBuf {
            let path = self.dir.path().join(name);
            std::fs::write(&path, b"\x89PNG fake image").unwrap();
            path
        }

        fn temp_dir(&self) -> PathBuf {
            self.dir.path().join("temp")
        }

        fn search(&self, engine: Arc<MockEngine>, settings: SearchSettings) -> FaceSearch {
            FaceSearch::new(
                self.library.clone(),
                self.history.clone(),
                engine,
                self.temp_dir(),
                &settings,
            )
        }
    }

    fn settings(max_concurrency: usize) -> SearchSettings {
        SearchSettings {
            max_concurrency,
            include_archived: false,
        }
    }

    // -------------------------------------------------------------------------
    // Results
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_zero_candidates_returns_empty_list() {
        let fx = Fixture::new();
        let engine = Arc::new(MockEngine::default());
        let outcome = fx
            .search(engine.clone(), settings(2))
            .search(&fx.image("q.jpg"))
            .await
            .unwrap();

        assert!(outcome.matches.is_empty());
        assert_eq!(outcome.message, "Found 0 video(s) with matching faces");
        assert_eq!(engine.calls.load(Ordering::SeqCst), 0);

        let json = serde_json::to_value(&outcome).unwrap();
        assert!(json["matches"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_matches_in_candidate_order() {
        let fx = Fixture::new();
        let first = fx.video("a.mp4", &["faces/a1.jpg", "faces/a2.jpg"]);
        let _miss = fx.video("b.mp4", &["faces/b1.jpg"]);
        let third = fx.video("c.mp4", &["faces/c1.jpg"]);

        let engine = Arc::new(MockEngine::knowing(&["faces/a2.jpg", "faces/c1.jpg"]));
        let outcome = fx
            .search(engine.clone(), settings(4))
            .search(&fx.image("q.png"))
            .await
            .unwrap();

        assert_eq!(outcome.matches.len(), 2);
        assert_eq!(outcome.message, "Found 2 video(s) with matching faces");
        assert_eq!(outcome.matches[0].video.id, first.id);
        assert_eq!(outcome.matches[0].matched_faces, vec!["faces/a2.jpg"]);
        assert_eq!(outcome.matches[1].video.id, third.id);
        assert!(outcome
            .matches
            .iter()
            .all(|m| m.similarity == PLACEHOLDER_SIMILARITY));
        assert_eq!(engine.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_engine_failure_skips_candidate() {
        let fx = Fixture::new();
        fx.video("broken.mp4", &["faces/broken_1.jpg"]);
        let good = fx.video("good.mp4", &["faces/good_1.jpg"]);

        let engine = Arc::new(MockEngine::knowing(&["faces/good_1.jpg"]));
        let outcome = fx
            .search(engine, settings(2))
            .search(&fx.image("q.jpg"))
            .await
            .unwrap();

        assert_eq!(outcome.matches.len(), 1);
        assert_eq!(outcome.matches[0].video.id, good.id);
    }

    #[tokio::test]
    async fn test_archived_videos_excluded_unless_enabled() {
        let fx = Fixture::new();
        let archived = fx.video("old.mp4", &["faces/old.jpg"]);
        fx.library.archive(&archived.id).unwrap();
        let engine = Arc::new(MockEngine::knowing(&["faces/old.jpg"]));

        let outcome = fx
            .search(engine.clone(), settings(2))
            .search(&fx.image("q.jpg"))
            .await
            .unwrap();
        assert!(outcome.matches.is_empty());

        let include = SearchSettings {
            max_concurrency: 2,
            include_archived: true,
        };
        let outcome = fx
            .search(engine, include)
            .search(&fx.image("q.jpg"))
            .await
            .unwrap();
        assert_eq!(outcome.matches.len(), 1);
    }

    // -------------------------------------------------------------------------
    // Resources
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let fx = Fixture::new();
        for i in 0..6 {
            let face = format!("faces/v{i}.jpg");
            fx.video(&format!("v{i}.mp4"), &[face.as_str()]);
        }
        let engine = Arc::new(MockEngine {
            delay: Duration::from_millis(50),
            ..MockEngine::default()
        });

        fx.search(engine.clone(), settings(2))
            .search(&fx.image("q.jpg"))
            .await
            .unwrap();

        assert_eq!(engine.calls.load(Ordering::SeqCst), 6);
        assert!(engine.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_temp_image_removed() {
        let fx = Fixture::new();
        fx.video("a.mp4", &["faces/a.jpg"]);
        let engine = Arc::new(MockEngine::knowing(&["faces/a.jpg"]));

        fx.search(engine.clone(), settings(2))
            .search(&fx.image("q.jpg"))
            .await
            .unwrap();

        let used = engine.images.lock().unwrap().clone();
        assert_eq!(used.len(), 1);
        assert!(used[0].starts_with(fx.temp_dir()));
        assert!(!used[0].exists());
    }

    #[tokio::test]
    async fn test_temp_image_removed_when_candidates_fail() {
        let fx = Fixture::new();
        fx.video("a.mp4", &["faces/a.jpg"]);
        fx.library.store().poison_lock();
        let engine = Arc::new(MockEngine::knowing(&["faces/a.jpg"]));

        let err = fx
            .search(engine.clone(), settings(2))
            .search(&fx.image("q.jpg"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Storage(_)));
        assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
        assert!(std::fs::read_dir(fx.temp_dir()).unwrap().next().is_none());
        assert!(fx.history.list().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_unsupported_image() {
        let fx = Fixture::new();
        let engine = Arc::new(MockEngine::default());
        let err = fx
            .search(engine, settings(2))
            .search(&fx.image("q.tiff"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
        assert!(fx.history.list().unwrap().is_empty());
    }

    // -------------------------------------------------------------------------
    // History
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_search_is_recorded() {
        let fx = Fixture::new();
        let a = fx.video("a.mp4", &["faces/a.jpg"]);
        fx.video("b.mp4", &["faces/b.jpg"]);
        let engine = Arc::new(MockEngine::knowing(&["faces/a.jpg"]));

        let outcome = fx
            .search(engine, settings(2))
            .search(&fx.image("q.jpg"))
            .await
            .unwrap();

        let history = fx.history.list().unwrap();
        assert_eq!(history.len(), 1);
        let record = &history[0];
        assert_eq!(record.id, outcome.search_id);
        assert_eq!(record.matches_found, 1);
        assert_eq!(record.total_videos, 2);
        assert_eq!(record.matched_videos, vec![a.id]);
        assert_eq!(record.query_hash, hash_hex(b"\x89PNG fake image"));
        assert_eq!(
            hash_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(record.query_hash.len(), 64);
    }

    #[tokio::test]
    async fn test_history_failure_does_not_fail_search() {
        let fx = Fixture::new();
        fx.video("a.mp4", &["faces/a.jpg"]);
        let history_dir = fx.dir.path().join("history");
        std::fs::remove_dir_all(&history_dir).unwrap();
        std::fs::write(&history_dir, b"not a directory").unwrap();

        let engine = Arc::new(MockEngine::knowing(&["faces/a.jpg"]));
        let outcome = fx
            .search(engine, settings(2))
            .search(&fx.image("q.jpg"))
            .await
            .unwrap();
        assert_eq!(outcome.matches.len(), 1);
    }
}
