//! End-to-end orchestration: fetch, codec gate, size gate, handoff.

use std::path::{Path, PathBuf};

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::encode::{PartInfo, Splitter, Transcoder, needs_split};
use crate::fetch::{FetchedFile, Fetcher};
use crate::media::{MediaInfo, Prober, is_playback_compatible};
use crate::progress::{Phase, Progress, ProgressSink, Throttle};
use crate::util::content_type_for;
use crate::Result;

/// The deliverable files of a finished job.
#[derive(Debug)]
pub enum Payload {
    /// One file under the upload ceiling.
    Single(PathBuf),
    /// Ordered parts of a file that exceeded the ceiling.
    Parts(Vec<PartInfo>),
}

/// Result of a processed job: descriptor fields, the deliverable payload and
/// the scratch-directory cleanup handle.
///
/// The pipeline owns the scratch directory for the job's lifetime; the
/// consumer calls [`Delivery::cleanup`] once it no longer needs any of the
/// derived files.
#[derive(Debug)]
pub struct Delivery {
    /// Filename of the processed file.
    pub file_name: String,
    /// Display title derived from the source.
    pub title: String,
    /// Duration in seconds, 0 if unknown.
    pub duration: f64,
    /// Video width in pixels, 0 if unknown.
    pub width: u32,
    /// Video height in pixels, 0 if unknown.
    pub height: u32,
    /// Byte size of the processed file (before any split).
    pub size_bytes: u64,
    /// MIME type of the processed file.
    pub content_type: &'static str,
    /// The deliverable file(s).
    pub payload: Payload,
    work_dir: PathBuf,
}

impl Delivery {
    /// The job's scratch directory.
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Whether the result was split into parts.
    pub fn is_split(&self) -> bool {
        matches!(self.payload, Payload::Parts(_))
    }

    /// Remove the scratch directory and every derived file. Idempotent: a
    /// directory that is already gone is success.
    pub async fn cleanup(&self) -> Result<()> {
        match tokio::fs::remove_dir_all(&self.work_dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// One URL-to-deliverable pipeline instance.
///
/// Stages run strictly sequentially within a job; concurrent jobs are
/// isolated by their scratch directories and need no locking against each
/// other.
pub struct Pipeline {
    config: PipelineConfig,
    prober: Prober,
    fetcher: Fetcher,
    transcoder: Transcoder,
    splitter: Splitter,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        let prober = Prober::new(&config.ffprobe_path);
        let fetcher = Fetcher::new(&config);
        let transcoder = Transcoder::new(&config.ffmpeg_path);
        let splitter = Splitter::new(&config.ffmpeg_path, config.target_part_size);
        Self {
            config,
            prober,
            fetcher,
            transcoder,
            splitter,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Process `url` into one or more messaging-ready files.
    pub async fn process(&self, url: &str, sink: &dyn ProgressSink) -> Result<Delivery> {
        self.process_with_cancel(url, sink, &CancellationToken::new())
            .await
    }

    /// Process `url`, aborting (and cleaning up) when `token` triggers or the
    /// per-job deadline passes. Every progress event is routed through the
    /// rate limiter before reaching `sink`.
    pub async fn process_with_cancel(
        &self,
        url: &str,
        sink: &dyn ProgressSink,
        token: &CancellationToken,
    ) -> Result<Delivery> {
        let throttle = Throttle::new(
            sink,
            self.config.progress_interval,
            self.config.progress_min_delta,
        );
        let deadline = Instant::now() + self.config.job_timeout;

        let fetched = self.fetcher.fetch(url, &throttle, token, deadline).await?;
        let work_dir = fetched.work_dir.clone();

        match self.finish(fetched, &throttle, token, deadline).await {
            Ok(delivery) => Ok(delivery),
            Err(e) => {
                // Terminal failure: never leave partial artifacts behind.
                if let Err(rm) = tokio::fs::remove_dir_all(&work_dir).await {
                    warn!(work_dir = %work_dir.display(), error = %rm, "failed to remove scratch directory");
                }
                Err(e)
            }
        }
    }

    async fn finish(
        &self,
        fetched: FetchedFile,
        sink: &dyn ProgressSink,
        token: &CancellationToken,
        deadline: Instant,
    ) -> Result<Delivery> {
        let mut path = fetched.path;

        let codec = match self.prober.video_codec(&path).await {
            Ok(codec) => codec,
            Err(e) => {
                warn!(error = %e, "codec probe failed, assuming re-encode is needed");
                String::new()
            }
        };

        if !is_playback_compatible(&codec) {
            let label = if codec.is_empty() {
                "unknown"
            } else {
                codec.as_str()
            };
            info!(codec = label, "source codec needs transcoding");
            sink.notify(Progress {
                phase: Phase::Transcoding,
                percent: 0.0,
                codec: Some(label.to_string()),
                ..Default::default()
            });

            let duration = match self.prober.media_info(&path).await {
                Ok(info) => info.duration,
                Err(e) => {
                    warn!(error = %e, "duration unavailable, transcode runs without percentages");
                    0.0
                }
            };

            let new_path = self
                .transcoder
                .transcode(&path, duration, label, sink, token, deadline)
                .await?;
            if let Err(e) = tokio::fs::remove_file(&path).await {
                warn!(path = %path.display(), error = %e, "failed to remove pre-transcode original");
            }
            path = new_path;
        }

        let info = match self.prober.media_info(&path).await {
            Ok(info) => info,
            Err(e) => {
                warn!(error = %e, "media info unavailable for processed file");
                MediaInfo::default()
            }
        };
        let size_bytes = tokio::fs::metadata(&path).await?.len();

        let payload = if needs_split(size_bytes, self.config.max_upload_size) {
            let parts = self
                .splitter
                .split(&path, info.duration, size_bytes, sink, token, deadline)
                .await?;
            Payload::Parts(parts)
        } else {
            Payload::Single(path.clone())
        };

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        Ok(Delivery {
            file_name,
            title: fetched.title,
            duration: info.duration,
            width: info.width,
            height: info.height,
            size_bytes,
            content_type: content_type_for(&path),
            payload,
            work_dir: fetched.work_dir,
        })
    }
}
