//! Partition stage: split an oversized file into near-equal-duration parts.

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

/// One output segment of a split, in time order.
#[derive(Debug, Clone, PartialEq)]
pub struct PartInfo {
    /// Path of the segment file.
    pub path: PathBuf,
    /// 1-based position; ordinal order equals filename order equals time order.
    pub ordinal: u32,
    /// Segment size in bytes.
    pub size_bytes: u64,
}

/// Returns true if a file of `file_size` bytes must be split before handoff.
pub fn needs_split(file_size: u64, max_upload_size: u64) -> bool {
    file_size > max_upload_size
}

/// Number of parts needed so each stays near the target size.
pub fn part_count(file_size: u64, target_part_size: u64) -> u32 {
    file_size.div_ceil(target_part_size) as u32
}

/// Active part ordinal for an elapsed position, clamped to `total` so
/// rounding at the tail never reports a part past the end.
pub fn part_ordinal(elapsed: f64, segment_duration: f64, total: u32) -> u32 {
    if segment_duration <= 0.0 || total == 0 {
        return total.min(1);
    }
    let ordinal = (elapsed / segment_duration) as u32 + 1;
    ordinal.clamp(1, total)
}

/// Wrapper around the external encoder in segmenting mode.
///
/// Parts are re-encoded rather than stream-copied so cut points are
/// frame-accurate and each part plays standalone.
pub struct Splitter {
    ffmpeg_path: String,
    target_part_size: u64,
}

impl Splitter {
    pub fn new(ffmpeg_path: impl Into<String>, target_part_size: u64) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            target_part_size,
        }
    }

    fn build_args(input: &Path, segment_duration: f64, pattern: &Path) -> Vec<String> {
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
            "-f".to_string(),
            "segment".to_string(),
            "-segment_time".to_string(),
            format!("{:.2}", segment_duration),
            "-reset_timestamps".to_string(),
            "1".to_string(),
            pattern.to_string_lossy().to_string(),
        ]
    }

    /// Split `input` into `ceil(file_size / target_part_size)` equal-duration
    /// parts, returning the ordered manifest. Fails fast with a validation
    /// error when duration or size is unusable, before any tool invocation.
    pub async fn split(
        &self,
        input: &Path,
        duration: f64,
        file_size: u64,
        sink: &dyn ProgressSink,
        token: &CancellationToken,
        deadline: Instant,
    ) -> Result<Vec<PartInfo>> {
        if duration <= 0.0 {
            return Err(Error::validation(format!(
                "invalid source duration: {duration}"
            )));
        }
        if file_size == 0 {
            return Err(Error::validation("unknown source file size"));
        }

        let total_parts = part_count(file_size, self.target_part_size);
        let segment_duration = duration / f64::from(total_parts);

        let dir = input.parent().unwrap_or_else(|| Path::new("."));
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let pattern = dir.join(format!("{stem}_part%03d.mp4"));

        info!(
            input = %input.display(),
            file_size,
            duration,
            total_parts,
            segment_duration,
            "splitting video"
        );

        let mut cmd = Command::new(&self.ffmpeg_path);
        cmd.args(Self::build_args(input, segment_duration, &pattern))
            .env("LC_ALL", "C");

        let mut stream = child::spawn(&mut cmd)
            .map_err(|e| Error::split(format!("failed to start {}: {}", self.ffmpeg_path, e)))?;

        let mut stderr_tail = VecDeque::new();
        let failed: Option<Error> = loop {
            tokio::select! {
                _ = token.cancelled() => {
                    stream.kill().await;
                    break Some(Error::split("cancelled"));
                }
                _ = tokio::time::sleep_until(deadline) => {
                    stream.kill().await;
                    break Some(Error::split("deadline exceeded while splitting"));
                }
                line = stream.next_line() => match line {
                    Some(OutputLine::Stderr(line)) => {
                        if let Some(elapsed) = parser::parse_time_marker(&line) {
                            sink.notify(Progress {
                                phase: Phase::Partitioning,
                                percent: parser::percent_of(elapsed, duration),
                                part: part_ordinal(elapsed, segment_duration, total_parts),
                                total_parts,
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
            remove_parts(dir, &stem).await;
            return Err(err);
        }

        let status = stream
            .wait()
            .await
            .map_err(|e| Error::split(format!("failed to wait for {}: {}", self.ffmpeg_path, e)))?;
        if !status.success() {
            remove_parts(dir, &stem).await;
            return Err(Error::split(format!(
                "{} exited with {}: {}",
                self.ffmpeg_path,
                status,
                child::render_tail(&stderr_tail)
            )));
        }

        let parts = collect_parts(dir, &stem).await?;
        info!(parts = parts.len(), "split complete");
        Ok(parts)
    }
}

/// Gather produced segment files in filename order and stat each one.
async fn collect_parts(dir: &Path, stem: &str) -> Result<Vec<PartInfo>> {
    let paths = list_part_files(dir, stem).await?;
    if paths.is_empty() {
        return Err(Error::split("no split parts produced"));
    }

    let mut parts = Vec::with_capacity(paths.len());
    for (index, path) in paths.into_iter().enumerate() {
        let size_bytes = tokio::fs::metadata(&path)
            .await
            .map_err(|e| Error::split(format!("failed to stat {}: {}", path.display(), e)))?
            .len();
        parts.push(PartInfo {
            path,
            ordinal: index as u32 + 1,
            size_bytes,
        });
    }

    Ok(parts)
}

async fn list_part_files(dir: &Path, stem: &str) -> Result<Vec<PathBuf>> {
    let prefix = format!("{stem}_part");
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| Error::split(format!("failed to read {}: {}", dir.display(), e)))?;

    let mut paths = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| Error::split(format!("failed to read {}: {}", dir.display(), e)))?
    {
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with(&prefix) && name.ends_with(".mp4") {
            paths.push(entry.path());
        }
    }

    paths.sort();
    Ok(paths)
}

async fn remove_parts(dir: &Path, stem: &str) {
    if let Ok(paths) = list_part_files(dir, stem).await {
        for path in paths {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                warn!(path = %path.display(), error = %e, "failed to remove partial segment");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NullSink;

    const MIB: u64 = 1024 * 1024;

    #[test]
    fn test_needs_split_boundary() {
        let max = 1900 * MIB;
        assert!(!needs_split(max, max));
        assert!(needs_split(max + 1, max));
        assert!(!needs_split(1, max));
    }

    #[test]
    fn test_part_count() {
        let target = 1900 * MIB;
        assert_eq!(part_count(target, target), 1);
        assert_eq!(part_count(target + 1, target), 2);
        assert_eq!(part_count(target * 3, target), 3);
        assert_eq!(part_count(1, target), 1);
    }

    #[test]
    fn test_part_ordinal_walks_segments() {
        // 10s total, 3 parts: segments of 3.33s each.
        let segment = 10.0 / 3.0;
        assert_eq!(part_ordinal(0.0, segment, 3), 1);
        assert_eq!(part_ordinal(3.0, segment, 3), 1);
        assert_eq!(part_ordinal(3.4, segment, 3), 2);
        assert_eq!(part_ordinal(9.9, segment, 3), 3);
    }

    #[test]
    fn test_part_ordinal_clamped_past_end() {
        // Rounding can push the elapsed marker slightly past the duration.
        let segment = 10.0 / 3.0;
        assert_eq!(part_ordinal(10.2, segment, 3), 3);
        assert_eq!(part_ordinal(500.0, segment, 3), 3);
    }

    #[test]
    fn test_part_ordinal_degenerate_inputs() {
        assert_eq!(part_ordinal(5.0, 0.0, 3), 1);
        assert_eq!(part_ordinal(5.0, 1.0, 0), 0);
    }

    #[tokio::test]
    async fn test_split_rejects_bad_duration_before_running() {
        let splitter = Splitter::new("ffmpeg", 1900 * MIB);
        let token = CancellationToken::new();
        let deadline = Instant::now() + std::time::Duration::from_secs(1);

        for duration in [0.0, -3.0] {
            let err = splitter
                .split(
                    Path::new("/nonexistent.mp4"),
                    duration,
                    4000 * MIB,
                    &NullSink,
                    &token,
                    deadline,
                )
                .await
                .unwrap_err();
            assert!(matches!(err, Error::Validation(_)), "duration {duration}");
        }
    }

    #[tokio::test]
    async fn test_split_rejects_zero_size() {
        let splitter = Splitter::new("ffmpeg", 1900 * MIB);
        let token = CancellationToken::new();
        let deadline = Instant::now() + std::time::Duration::from_secs(1);

        let err = splitter
            .split(Path::new("/nonexistent.mp4"), 10.0, 0, &NullSink, &token, deadline)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_collect_parts_orders_by_filename() {
        let dir = tempfile::tempdir().unwrap();
        for (name, len) in [
            ("clip_part002.mp4", 20),
            ("clip_part000.mp4", 10),
            ("clip_part001.mp4", 15),
            ("clip.mp4", 99),
            ("unrelated.txt", 1),
        ] {
            std::fs::write(dir.path().join(name), vec![0u8; len]).unwrap();
        }

        let parts = collect_parts(dir.path(), "clip").await.unwrap();
        assert_eq!(parts.len(), 3);
        assert_eq!(
            parts.iter().map(|p| p.ordinal).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(
            parts.iter().map(|p| p.size_bytes).collect::<Vec<_>>(),
            vec![10, 15, 20]
        );
        assert!(parts[0].path.ends_with("clip_part000.mp4"));
    }

    #[tokio::test]
    async fn test_collect_parts_empty_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = collect_parts(dir.path(), "clip").await.unwrap_err();
        assert!(matches!(err, Error::Split(_)));
    }
}
