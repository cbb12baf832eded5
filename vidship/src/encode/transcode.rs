//! Transcode stage: convert a file to the playback-compatible codec pair.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use tokio::process::Command;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::child::{self, OutputLine};
use crate::progress::{Phase, Progress, ProgressSink};
use crate::{Error, Result};

use super::parser;

/// Wrapper around the external encoder for codec conversion.
pub struct Transcoder {
    ffmpeg_path: String,
}

impl Transcoder {
    pub fn new(ffmpeg_path: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
        }
    }

    /// H.264/AAC, fast preset, constant quality, streaming-optimized layout.
    fn build_args(input: &Path, output: &Path) -> Vec<String> {
        vec![
            "-y".to_string(),
            "-hide_banner".to_string(),
            "-i".to_string(),
            input.to_string_lossy().to_string(),
            "-c:v".to_string(),
            "libx264".to_string(),
            "-preset".to_string(),
            "fast".to_string(),
            "-crf".to_string(),
            "23".to_string(),
            "-c:a".to_string(),
            "aac".to_string(),
            "-movflags".to_string(),
            "+faststart".to_string(),
            output.to_string_lossy().to_string(),
        ]
    }

    /// Re-encode `input` next to itself, returning the new path. The input
    /// file is left in place; discarding it is the caller's decision.
    ///
    /// `duration` is the known source duration used for percent math; when
    /// it is unknown (zero), the stage still runs but reports 0%.
    pub async fn transcode(
        &self,
        input: &Path,
        duration: f64,
        source_codec: &str,
        sink: &dyn ProgressSink,
        token: &CancellationToken,
        deadline: Instant,
    ) -> Result<PathBuf> {
        let output = output_path(input);
        info!(
            input = %input.display(),
            output = %output.display(),
            source_codec,
            "transcoding to h264"
        );

        let mut cmd = Command::new(&self.ffmpeg_path);
        cmd.args(Self::build_args(input, &output)).env("LC_ALL", "C");

        let mut stream = child::spawn(&mut cmd)
            .map_err(|e| Error::transcode(format!("failed to start {}: {}", self.ffmpeg_path, e)))?;

        let mut stderr_tail = VecDeque::new();
        let failed: Option<Error> = loop {
            tokio::select! {
                _ = token.cancelled() => {
                    stream.kill().await;
                    break Some(Error::transcode("cancelled"));
                }
                _ = tokio::time::sleep_until(deadline) => {
                    stream.kill().await;
                    break Some(Error::transcode("deadline exceeded while transcoding"));
                }
                line = stream.next_line() => match line {
                    Some(OutputLine::Stderr(line)) => {
                        // The encoder writes both progress markers and
                        // diagnostics to stderr.
                        if let Some(elapsed) = parser::parse_time_marker(&line) {
                            sink.notify(Progress {
                                phase: Phase::Transcoding,
                                percent: parser::percent_of(elapsed, duration),
                                codec: Some(source_codec.to_string()),
                                ..Default::default()
                            });
                        } else {
                            child::push_tail(&mut stderr_tail, line);
                        }
                    }
                    Some(OutputLine::Stdout(line)) => {
                        debug!("encoder stdout: {}", line);
                    }
                    None => break None,
                }
            }
        };

        if let Some(err) = failed {
            remove_partial(&output).await;
            return Err(err);
        }

        let status = stream
            .wait()
            .await
            .map_err(|e| Error::transcode(format!("failed to wait for {}: {}", self.ffmpeg_path, e)))?;
        if !status.success() {
            remove_partial(&output).await;
            return Err(Error::transcode(format!(
                "{} exited with {}: {}",
                self.ffmpeg_path,
                status,
                child::render_tail(&stderr_tail)
            )));
        }

        info!(output = %output.display(), "transcode complete");
        Ok(output)
    }
}

fn output_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    input.with_file_name(format!("{stem}_h264.mp4"))
}

async fn remove_partial(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!(path = %path.display(), error = %e, "failed to remove partial output");
    }
}
