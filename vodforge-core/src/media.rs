use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::fs as async_fs;
use tokio::process::Command;
use tracing::debug;

use crate::config::MediaSection;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("command failed ({command}): {stderr}")]
    CommandFailure {
        command: String,
        status: Option<i32>,
        stderr: String,
    },
    #[error("unreadable probe output: {0}")]
    Probe(String),
    #[error("validation reported defects: {0}")]
    Validation(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type PipelineResult<T> = Result<T, PipelineError>;

#[async_trait::async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn run(&self, command: &mut Command) -> std::io::Result<std::process::Output>;
}

#[derive(Debug, Default)]
pub struct SystemCommandExecutor;

#[async_trait::async_trait]
impl CommandExecutor for SystemCommandExecutor {
    async fn run(&self, command: &mut Command) -> std::io::Result<std::process::Output> {
        command.output().await
    }
}

/// Source characteristics used to rebuild the original rendition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MediaProbe {
    pub width: u32,
    pub height: u32,
    pub bit_rate: u64,
    pub duration: f64,
}

pub struct MediaPipeline {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    log_level: String,
    thumbnail_offset_s: u32,
    executor: Arc<dyn CommandExecutor>,
}

impl fmt::Debug for MediaPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaPipeline")
            .field("ffmpeg", &self.ffmpeg)
            .field("ffprobe", &self.ffprobe)
            .field("log_level", &self.log_level)
            .finish()
    }
}

impl MediaPipeline {
    pub fn new(config: &MediaSection, executor: Option<Arc<dyn CommandExecutor>>) -> Self {
        Self {
            ffmpeg: PathBuf::from(&config.ffmpeg),
            ffprobe: PathBuf::from(&config.ffprobe),
            log_level: config.log_level.clone(),
            thumbnail_offset_s: config.thumbnail_offset_s,
            executor: executor.unwrap_or_else(|| Arc::new(SystemCommandExecutor)),
        }
    }

    pub async fn probe(&self, input: &Path) -> PipelineResult<MediaProbe> {
        let args = vec![
            "-v".to_string(),
            "error".to_string(),
            "-select_streams".to_string(),
            "v:0".to_string(),
            "-show_entries".to_string(),
            "stream=width,height,bit_rate".to_string(),
            "-show_entries".to_string(),
            "format=duration,bit_rate".to_string(),
            "-print_format".to_string(),
            "json".to_string(),
            input.to_string_lossy().to_string(),
        ];
        let output = self.run_tool(&self.ffprobe, &args).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_probe(&stdout)
    }

    /// Constant-bitrate re-encode reproducing the probed rendition.
    pub async fn reencode(
        &self,
        input: &Path,
        output: &Path,
        probe: &MediaProbe,
    ) -> PipelineResult<()> {
        let bitrate = probe.bit_rate.to_string();
        let args = vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            self.log_level.clone(),
            "-y".to_string(),
            "-i".to_string(),
            input.to_string_lossy().to_string(),
            "-c:v".to_string(),
            "libx264".to_string(),
            "-b:v".to_string(),
            bitrate.clone(),
            "-minrate".to_string(),
            bitrate.clone(),
            "-maxrate".to_string(),
            bitrate,
            "-bufsize".to_string(),
            (probe.bit_rate * 2).to_string(),
            "-s".to_string(),
            format!("{}x{}", probe.width, probe.height),
            "-c:a".to_string(),
            "aac".to_string(),
            output.to_string_lossy().to_string(),
        ];
        self.run_tool(&self.ffmpeg, &args).await?;
        Ok(())
    }

    /// Concatenate `first` then `second` without re-encoding.
    pub async fn merge(&self, first: &Path, second: &Path, output: &Path) -> PipelineResult<()> {
        let playlist_path = output.with_extension("concat.txt");
        let playlist = format!(
            "file '{}'\nfile '{}'\n",
            first.display(),
            second.display()
        );
        async_fs::write(&playlist_path, playlist).await?;

        let args = vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            self.log_level.clone(),
            "-y".to_string(),
            "-f".to_string(),
            "concat".to_string(),
            "-safe".to_string(),
            "0".to_string(),
            "-i".to_string(),
            playlist_path.to_string_lossy().to_string(),
            "-c".to_string(),
            "copy".to_string(),
            output.to_string_lossy().to_string(),
        ];
        let result = self.run_tool(&self.ffmpeg, &args).await;
        if let Err(error) = async_fs::remove_file(&playlist_path).await {
            debug!(path = %playlist_path.display(), %error, "failed to remove concat playlist");
        }
        result.map(|_| ())
    }

    pub async fn thumbnail(&self, input: &Path, output: &Path) -> PipelineResult<()> {
        let args = vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            self.log_level.clone(),
            "-y".to_string(),
            "-ss".to_string(),
            self.thumbnail_offset_s.to_string(),
            "-i".to_string(),
            input.to_string_lossy().to_string(),
            "-frames:v".to_string(),
            "1".to_string(),
            output.to_string_lossy().to_string(),
        ];
        self.run_tool(&self.ffmpeg, &args).await?;
        Ok(())
    }

    /// Decode pass over the output; any diagnostic line is a failure.
    pub async fn validate(&self, input: &Path) -> PipelineResult<()> {
        let args = vec![
            "-hide_banner".to_string(),
            "-v".to_string(),
            "error".to_string(),
            "-i".to_string(),
            input.to_string_lossy().to_string(),
            "-f".to_string(),
            "null".to_string(),
            "-".to_string(),
        ];
        let output = self.run_tool(&self.ffmpeg, &args).await?;
        let stderr = String::from_utf8_lossy(&output.stderr);
        let diagnostics = stderr.trim();
        if !diagnostics.is_empty() {
            return Err(PipelineError::Validation(diagnostics.to_string()));
        }
        Ok(())
    }

    async fn run_tool(
        &self,
        program: &Path,
        args: &[String],
    ) -> PipelineResult<std::process::Output> {
        let mut command = Command::new(program);
        for arg in args {
            command.arg(arg);
        }
        let output = self.executor.run(&mut command).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            return Err(PipelineError::CommandFailure {
                command: format!("{} {}", program.display(), args.join(" ")),
                status: output.status.code(),
                stderr,
            });
        }
        Ok(output)
    }
}

fn parse_probe(raw: &str) -> PipelineResult<MediaProbe> {
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|err| PipelineError::Probe(err.to_string()))?;
    let stream = value
        .get("streams")
        .and_then(|streams| streams.get(0))
        .ok_or_else(|| PipelineError::Probe("no video stream reported".into()))?;
    let width = stream
        .get("width")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| PipelineError::Probe("missing stream width".into()))? as u32;
    let height = stream
        .get("height")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| PipelineError::Probe("missing stream height".into()))? as u32;
    // ffprobe reports rates and durations as strings; the stream-level
    // bit_rate is absent for some containers, format-level fills in.
    let bit_rate = numeric_field(stream, "bit_rate")
        .or_else(|| {
            value
                .get("format")
                .and_then(|format| numeric_field(format, "bit_rate"))
        })
        .ok_or_else(|| PipelineError::Probe("missing bit_rate".into()))? as u64;
    let duration = value
        .get("format")
        .and_then(|format| numeric_field(format, "duration"))
        .unwrap_or(0.0);
    Ok(MediaProbe {
        width,
        height,
        bit_rate,
        duration,
    })
}

fn numeric_field(value: &serde_json::Value, key: &str) -> Option<f64> {
    match value.get(key)? {
        serde_json::Value::String(text) => text.parse().ok(),
        serde_json::Value::Number(number) => number.as_f64(),
        _ => None,
    }
}
