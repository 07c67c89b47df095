//! facefind Core
//!
//! Video face indexing and search.
//! Uploaded videos are analysed by an external face engine; the detected faces
//! are kept in a durable record store and later compared against a search image.

pub mod engine;
pub mod fs;
pub mod history;
pub mod ingest;
pub mod library;
pub mod maintenance;
pub mod models;
pub mod search;
pub mod settings;
pub mod store;

mod error;
pub use error::*;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use engine::{AnalysisEngine, SubprocessEngine};
use history::SearchHistory;
use ingest::VideoIngest;
use library::VideoLibrary;
use maintenance::Maintenance;
use search::FaceSearch;
use settings::{Settings, StoragePaths};

/// Everything a command needs, built once from settings
pub struct AppContext {
    root: PathBuf,
    settings: Settings,
    paths: StoragePaths,
    library: Arc<VideoLibrary>,
    history: Arc<SearchHistory>,
    engine: Arc<dyn AnalysisEngine>,
}

impl AppContext {
    /// Opens both record stores and wires up the subprocess engine.
    ///
    /// Fails if either record file cannot be read or parsed.
    pub fn open(root: impl Into<PathBuf>, settings: Settings) -> CoreResult<Self> {
        let root = root.into();
        let engine = Arc::new(SubprocessEngine::new(settings.engine_config(&root)));
        Self::with_engine(root, settings, engine)
    }

    pub fn with_engine(
        root: impl Into<PathBuf>,
        settings: Settings,
        engine: Arc<dyn AnalysisEngine>,
    ) -> CoreResult<Self> {
        let root = root.into();
        let paths = settings.storage_paths(&root);
        let library = Arc::new(VideoLibrary::open(paths.videos_file())?);
        let history = Arc::new(SearchHistory::open(paths.history_file())?);
        info!("Opened facefind data at {}", paths.data_dir.display());

        Ok(Self {
            root,
            settings,
            paths,
            library,
            history,
            engine,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn paths(&self) -> &StoragePaths {
        &self.paths
    }

    pub fn library(&self) -> &VideoLibrary {
        &self.library
    }

    pub fn history(&self) -> &SearchHistory {
        &self.history
    }

    pub fn ingest(&self) -> VideoIngest {
        VideoIngest::new(
            self.library.clone(),
            self.engine.clone(),
            self.paths.videos_dir.clone(),
        )
    }

    pub fn search(&self) -> FaceSearch {
        FaceSearch::new(
            self.library.clone(),
            self.history.clone(),
            self.engine.clone(),
            self.paths.temp_dir.clone(),
            &self.settings.search,
        )
    }

    pub fn maintenance(&self) -> Maintenance {
        Maintenance::new(self.library.clone(), self.paths.faces_dir.clone())
    }
}
