//! Pipeline configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Largest file the messaging backend accepts without splitting.
pub const DEFAULT_MAX_UPLOAD_SIZE: u64 = 1900 * 1024 * 1024;

/// Target byte size for each split part.
pub const DEFAULT_TARGET_PART_SIZE: u64 = 1900 * 1024 * 1024;

/// Height cap applied to the fetch tool's format selection.
pub const DEFAULT_MAX_HEIGHT: u32 = 1080;

/// Per-job deadline. Encoding long videos can take far longer than the
/// download itself, so this bounds every phase of a job.
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Minimum interval between forwarded progress notifications.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(2);

/// Minimum percent advance that forwards a notification early.
pub const DEFAULT_PROGRESS_MIN_DELTA: f64 = 5.0;

/// Configuration for a [`Pipeline`](crate::Pipeline).
///
/// Binary paths default from `YTDLP_PATH`, `FFMPEG_PATH` and `FFPROBE_PATH`
/// environment variables, falling back to plain command names resolved via
/// `PATH`.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Root directory under which per-job scratch directories are created.
    pub download_dir: PathBuf,
    /// Files larger than this are split before handoff.
    pub max_upload_size: u64,
    /// Target byte size per split part.
    pub target_part_size: u64,
    /// Maximum video height requested from the fetch tool.
    pub max_height: u32,
    /// Absolute deadline applied to every phase of a job.
    pub job_timeout: Duration,
    /// Minimum interval between forwarded progress events.
    pub progress_interval: Duration,
    /// Minimum percent advance that bypasses the interval gate.
    pub progress_min_delta: f64,
    /// Path to the fetch tool binary.
    pub ytdlp_path: String,
    /// Path to the encoder binary.
    pub ffmpeg_path: String,
    /// Path to the probe binary.
    pub ffprobe_path: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            download_dir: std::env::temp_dir().join("vidship"),
            max_upload_size: DEFAULT_MAX_UPLOAD_SIZE,
            target_part_size: DEFAULT_TARGET_PART_SIZE,
            max_height: DEFAULT_MAX_HEIGHT,
            job_timeout: DEFAULT_JOB_TIMEOUT,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            progress_min_delta: DEFAULT_PROGRESS_MIN_DELTA,
            ytdlp_path: std::env::var("YTDLP_PATH").unwrap_or_else(|_| "yt-dlp".to_string()),
            ffmpeg_path: std::env::var("FFMPEG_PATH").unwrap_or_else(|_| "ffmpeg".to_string()),
            ffprobe_path: std::env::var("FFPROBE_PATH").unwrap_or_else(|_| "ffprobe".to_string()),
        }
    }
}

impl PipelineConfig {
    /// Create a config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the scratch-directory root.
    pub fn with_download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.download_dir = dir.into();
        self
    }

    /// Set the split threshold and target part size together.
    pub fn with_max_upload_size(mut self, bytes: u64) -> Self {
        self.max_upload_size = bytes;
        self.target_part_size = bytes;
        self
    }

    /// Set the target byte size per split part.
    pub fn with_target_part_size(mut self, bytes: u64) -> Self {
        self.target_part_size = bytes;
        self
    }

    /// Set the height cap for format selection.
    pub fn with_max_height(mut self, height: u32) -> Self {
        self.max_height = height;
        self
    }

    /// Set the per-job deadline.
    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    /// Set the progress rate-limit interval.
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Set the progress percent-delta gate.
    pub fn with_progress_min_delta(mut self, delta: f64) -> Self {
        self.progress_min_delta = delta;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = PipelineConfig::new()
            .with_download_dir("/tmp/jobs")
            .with_max_upload_size(100)
            .with_max_height(720)
            .with_job_timeout(Duration::from_secs(30));

        assert_eq!(config.download_dir, PathBuf::from("/tmp/jobs"));
        assert_eq!(config.max_upload_size, 100);
        assert_eq!(config.target_part_size, 100);
        assert_eq!(config.max_height, 720);
        assert_eq!(config.job_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_config_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.max_upload_size, DEFAULT_MAX_UPLOAD_SIZE);
        assert_eq!(config.progress_min_delta, DEFAULT_PROGRESS_MIN_DELTA);
        assert!(config.download_dir.ends_with("vidship"));
    }
}
