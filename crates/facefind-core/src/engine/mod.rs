//! Analysis Engine Module
//!
//! Bridge to the external face analysis engine.
//!
//! The engine is consumed only through its JSON contract:
//! - Detection: `{unique_faces_count: int, faces: [string], message: string}`
//! - Matching: `{matched_faces: [string], error?: string}`
//!
//! Callers depend on the [`AnalysisEngine`] trait. [`SubprocessEngine`] is the
//! implementation that spawns the engine scripts and scrapes their output.

mod subprocess;

pub use subprocess::{EngineConfig, SubprocessEngine};

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Analysis engine error types
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Analysis engine not available: {0}")]
    Unavailable(String),

    #[error("Engine execution failed: {0}")]
    ExecutionFailed(String),

    #[error("No JSON object found in engine output: {0}")]
    OutputParse(String),

    #[error("Engine reported error: {0}")]
    Reported(String),

    #[error("Timeout: engine did not finish within {0}s")]
    Timeout(u64),

    #[error("Process error: {0}")]
    Process(#[from] std::io::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Result of running face detection over one video
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionOutcome {
    pub unique_faces_count: u32,
    pub faces: Vec<String>,
    pub message: String,
}

/// Face analysis operations the rest of the crate relies on
#[async_trait]
pub trait AnalysisEngine: Send + Sync {
    /// Detects the unique faces in a video
    async fn detect_faces(&self, video_path: &Path, video_id: &str)
        -> EngineResult<DetectionOutcome>;

    /// Returns the subset of `candidates` that match the face in `search_image`
    async fn match_faces(
        &self,
        search_image: &Path,
        candidates: &[String],
    ) -> EngineResult<Vec<String>>;
}

// =============================================================================
// Output Scraping
// =============================================================================

/// Locates the JSON payload in mixed engine output.
///
/// Takes the last `}` in the text and the last `{` at or before it, and returns
/// the inclusive slice between them. Any JSON-shaped diagnostics printed after
/// the real result will be picked instead of it; the engine is expected to
/// emit its result last.
pub fn extract_json_payload(output: &str) -> EngineResult<&str> {
    let close = output
        .rfind('}')
        .ok_or_else(|| EngineError::OutputParse("no closing brace".to_string()))?;
    let open = output[..=close]
        .rfind('{')
        .ok_or_else(|| EngineError::OutputParse("no opening brace".to_string()))?;
    Ok(&output[open..=close])
}

#[derive(Deserialize)]
struct DetectionPayload {
    #[serde(default)]
    unique_faces_count: u32,
    #[serde(default)]
    faces: Vec<String>,
    #[serde(default)]
    message: String,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct MatchPayload {
    #[serde(default)]
    matched_faces: Vec<String>,
    #[serde(default)]
    error: Option<String>,
}

fn decode<T: serde::de::DeserializeOwned>(output: &str) -> EngineResult<T> {
    let payload = extract_json_payload(output)?;
    serde_json::from_str(payload).map_err(|e| {
        EngineError::ExecutionFailed(format!("Failed to parse engine output: {}", e))
    })
}

fn reported(error: Option<String>) -> EngineResult<()> {
    match error {
        Some(msg) if !msg.trim().is_empty() => Err(EngineError::Reported(msg)),
        _ => Ok(()),
    }
}

/// Decodes detection output into a typed outcome
pub fn decode_detection(output: &str) -> EngineResult<DetectionOutcome> {
    let payload: DetectionPayload = decode(output)?;
    reported(payload.error)?;
    Ok(DetectionOutcome {
        unique_faces_count: payload.unique_faces_count,
        faces: payload.faces,
        message: payload.message,
    })
}

/// Decodes matching output into the matched face references
pub fn decode_match(output: &str) -> EngineResult<Vec<String>> {
    let payload: MatchPayload = decode(output)?;
    reported(payload.error)?;
    Ok(payload.matched_faces)
}
