//! Subprocess Engine
//!
//! Runs the engine scripts through an interpreter and scrapes the JSON
//! result out of their combined stdout/stderr.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use super::{
    decode_detection, decode_match, AnalysisEngine, DetectionOutcome, EngineError, EngineResult,
};

#[cfg(target_os = "windows")]
const CREATE_NO_WINDOW: u32 = 0x08000000;

/// How to reach the engine scripts
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Interpreter used to run the scripts (e.g. `venv/bin/python3`)
    pub interpreter: PathBuf,
    /// Detection script, relative to `working_dir` unless absolute
    pub detect_script: PathBuf,
    /// Matching script, relative to `working_dir` unless absolute
    pub match_script: PathBuf,
    /// Working directory for the engine process
    pub working_dir: PathBuf,
    /// Per-invocation limit
    pub timeout: Duration,
}

/// [`AnalysisEngine`] backed by one engine process per call
#[derive(Clone, Debug)]
pub struct SubprocessEngine {
    config: EngineConfig,
}

impl SubprocessEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn resolve(&self, script: &Path) -> PathBuf {
        if script.is_absolute() {
            script.to_path_buf()
        } else {
            self.config.working_dir.join(script)
        }
    }

    /// Runs `interpreter script args...` and returns the combined output.
    async fn run(&self, script: &Path, args: &[&str]) -> EngineResult<String> {
        let script_path = self.resolve(script);
        if !script_path.exists() {
            return Err(EngineError::Unavailable(format!(
                "engine script not found: {}",
                script_path.display()
            )));
        }

        let mut cmd = tokio::process::Command::new(&self.config.interpreter);
        cmd.arg(&script_path)
            .args(args)
            .current_dir(&self.config.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        configure_command(&mut cmd);

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                EngineError::Unavailable(format!(
                    "engine interpreter not found: {}",
                    self.config.interpreter.display()
                ))
            } else {
                EngineError::Process(e)
            }
        })?;

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        if let Some(stdout) = child.stdout.take() {
            forward_lines(stdout, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(stderr, tx.clone());
        }
        drop(tx);

        let child_ref = &mut child;
        let collect = async {
            let mut combined = String::new();
            while let Some(line) = rx.recv().await {
                combined.push_str(&line);
                combined.push('\n');
            }
            let status = child_ref.wait().await?;
            Ok::<(ExitStatus, String), std::io::Error>((status, combined))
        };

        let (status, combined) = match tokio::time::timeout(self.config.timeout, collect).await {
            Ok(result) => result?,
            Err(_) => {
                let _ = child.kill().await;
                error!(
                    "Engine script {} timed out after {:?}",
                    script_path.display(),
                    self.config.timeout
                );
                return Err(EngineError::Timeout(self.config.timeout.as_secs()));
            }
        };

        if !status.success() {
            error!("Engine script {} failed: {}", script_path.display(), status);
            error!("Engine output: {}", combined);
            return Err(EngineError::ExecutionFailed(format!(
                "{} exited with {}",
                script_path.display(),
                status
            )));
        }

        debug!("Engine output: {}", combined);
        Ok(combined)
    }
}

#[async_trait]
impl AnalysisEngine for SubprocessEngine {
    async fn detect_faces(
        &self,
        video_path: &Path,
        video_id: &str,
    ) -> EngineResult<DetectionOutcome> {
        info!("Running face detection for {}", video_id);
        let video_arg = video_path.to_string_lossy();
        let output = self
            .run(
                &self.config.detect_script,
                &[&*video_arg, "--video-id", video_id],
            )
            .await?;
        decode_detection(&output).inspect_err(|e| error!("Detection output rejected: {}", e))
    }

    async fn match_faces(
        &self,
        search_image: &Path,
        candidates: &[String],
    ) -> EngineResult<Vec<String>> {
        let image_arg = search_image.to_string_lossy();
        let joined = candidates.join(",");
        let output = self
            .run(
                &self.config.match_script,
                &[&*image_arg, "--face-images", joined.as_str()],
            )
            .await?;
        decode_match(&output)
    }
}

/// Pumps a child stream into `tx` line by line.
///
/// Bytes are decoded lossily so non-UTF-8 output never stalls the pipe.
fn forward_lines<R>(reader: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf)
                        .trim_end_matches(['\n', '\r'])
                        .to_string();
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            }
        }
    });
}

/// Keeps engine processes from opening console windows on Windows.
fn configure_command(cmd: &mut tokio::process::Command) {
    #[cfg(target_os = "windows")]
    {
        cmd.creation_flags(CREATE_NO_WINDOW);
    }
    #[cfg(not(target_os = "windows"))]
    let _ = cmd;
}
