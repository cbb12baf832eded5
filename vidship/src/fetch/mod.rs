//! Acquisition stage: download a URL into a fresh scratch directory.

pub mod parser;

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use tokio::process::Command;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::child::{self, OutputLine};
use crate::config::PipelineConfig;
use crate::progress::{Phase, Progress, ProgressSink};
use crate::{Error, Result};

use parser::FetchLine;

/// Hosts recognized without consulting the fetch tool. The fallback is
/// permissive: anything http(s) is attempted and the tool fails gracefully
/// for sources it does not support.
const KNOWN_HOSTS: &[&str] = &[
    "youtube.com",
    "youtu.be",
    "twitter.com",
    "x.com",
    "tiktok.com",
    "instagram.com",
    "facebook.com",
    "fb.watch",
    "vimeo.com",
    "dailymotion.com",
    "twitch.tv",
    "reddit.com",
    "v.redd.it",
    "streamable.com",
    "imgur.com",
];

/// Process-wide sequence distinguishing jobs created within the same
/// timestamp tick, so concurrent jobs never share a scratch directory.
static JOB_SEQ: AtomicU64 = AtomicU64::new(0);

/// A successfully downloaded file inside its job scratch directory.
#[derive(Debug)]
pub struct FetchedFile {
    /// Path of the downloaded file.
    pub path: PathBuf,
    /// The job's scratch directory, owned by the pipeline until cleanup.
    pub work_dir: PathBuf,
    /// Display title, derived from the downloaded filename.
    pub title: String,
}

/// Wrapper around the external fetch tool.
pub struct Fetcher {
    ytdlp_path: String,
    download_dir: PathBuf,
    max_height: u32,
}

impl Fetcher {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            ytdlp_path: config.ytdlp_path.clone(),
            download_dir: config.download_dir.clone(),
            max_height: config.max_height,
        }
    }

    /// Build the format-preference chain, most specific tier first:
    /// compatible video + compatible audio under the height cap, then
    /// compatible video + any audio, then any video + any audio, then capped
    /// best, then unconstrained best. The last tier deliberately accepts
    /// whatever is available rather than failing on low-quality-only sources.
    fn format_chain(max_height: u32) -> String {
        format!(
            "bestvideo[vcodec^=avc1][height<={h}]+bestaudio[acodec^=mp4a]\
             /bestvideo[vcodec^=avc][height<={h}]+bestaudio\
             /bestvideo[height<={h}]+bestaudio\
             /best[height<={h}]\
             /best",
            h = max_height
        )
    }

    /// Create the job's scratch directory under the configured root.
    fn create_work_dir(&self) -> Result<PathBuf> {
        let seq = JOB_SEQ.fetch_add(1, Ordering::Relaxed);
        let stamp = Utc::now().timestamp_micros();
        let dir = self.download_dir.join(format!("job-{stamp}-{seq}"));
        std::fs::create_dir_all(&dir)
            .map_err(|e| Error::fetch(format!("failed to create work directory: {}", e)))?;
        Ok(dir)
    }

    /// Download `url` into a fresh scratch directory, reporting progress to
    /// `sink`. Any failure removes the scratch directory before surfacing.
    pub async fn fetch(
        &self,
        url: &str,
        sink: &dyn ProgressSink,
        token: &CancellationToken,
        deadline: Instant,
    ) -> Result<FetchedFile> {
        let work_dir = self.create_work_dir()?;
        info!(url, work_dir = %work_dir.display(), "starting fetch");

        match self.run(url, &work_dir, sink, token, deadline).await {
            Ok(file) => Ok(file),
            Err(e) => {
                if let Err(rm) = tokio::fs::remove_dir_all(&work_dir).await {
                    warn!(work_dir = %work_dir.display(), error = %rm, "failed to remove scratch directory");
                }
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        url: &str,
        work_dir: &Path,
        sink: &dyn ProgressSink,
        token: &CancellationToken,
        deadline: Instant,
    ) -> Result<FetchedFile> {
        let format_chain = Self::format_chain(self.max_height);
        let mut cmd = Command::new(&self.ytdlp_path);
        cmd.args([
            "--no-playlist",
            "-f",
            &format_chain,
            "--merge-output-format",
            "mp4",
            "-o",
            "%(title).100s.%(ext)s",
            "--no-warnings",
            "--progress",
            "--newline",
        ])
        .arg(url)
        .current_dir(work_dir);

        let mut stream = child::spawn(&mut cmd)
            .map_err(|e| Error::fetch(format!("failed to start {}: {}", self.ytdlp_path, e)))?;

        let mut stderr_tail = VecDeque::new();
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    stream.kill().await;
                    return Err(Error::fetch("cancelled"));
                }
                _ = tokio::time::sleep_until(deadline) => {
                    stream.kill().await;
                    return Err(Error::fetch("deadline exceeded while downloading"));
                }
                line = stream.next_line() => match line {
                    Some(OutputLine::Stdout(line)) => {
                        debug!("fetch stdout: {}", line);
                        self.handle_line(&line, sink);
                    }
                    Some(OutputLine::Stderr(line)) => {
                        debug!("fetch stderr: {}", line);
                        child::push_tail(&mut stderr_tail, line);
                    }
                    None => break,
                }
            }
        }

        let status = stream
            .wait()
            .await
            .map_err(|e| Error::fetch(format!("failed to wait for {}: {}", self.ytdlp_path, e)))?;
        if !status.success() {
            return Err(Error::fetch(format!(
                "{} exited with {}: {}",
                self.ytdlp_path,
                status,
                child::render_tail(&stderr_tail)
            )));
        }

        let path = find_downloaded_file(work_dir).await?;
        let title = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();

        info!(path = %path.display(), %title, "fetch complete");
        Ok(FetchedFile {
            path,
            work_dir: work_dir.to_path_buf(),
            title,
        })
    }

    fn handle_line(&self, line: &str, sink: &dyn ProgressSink) {
        match parser::classify(line) {
            FetchLine::Progress {
                percent,
                total,
                speed,
                eta,
            } => sink.notify(Progress {
                phase: Phase::Acquiring,
                percent,
                total: Some(total),
                speed: Some(speed),
                eta: Some(eta),
                ..Default::default()
            }),
            FetchLine::Complete { total } => sink.notify(Progress {
                phase: Phase::Acquiring,
                percent: 100.0,
                total: Some(total),
                ..Default::default()
            }),
            FetchLine::MergeStarted => sink.notify(Progress {
                phase: Phase::Merging,
                percent: 100.0,
                ..Default::default()
            }),
            FetchLine::Unrecognized => {}
        }
    }
}

/// Locate the single file the fetch tool produced in the scratch directory.
async fn find_downloaded_file(work_dir: &Path) -> Result<PathBuf> {
    let mut entries = tokio::fs::read_dir(work_dir)
        .await
        .map_err(|e| Error::fetch(format!("failed to read work directory: {}", e)))?;

    let mut files = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| Error::fetch(format!("failed to read work directory: {}", e)))?
    {
        if entry.file_type().await.map(|t| t.is_file()).unwrap_or(false) {
            files.push(entry.path());
        }
    }

    files.sort();
    match files.len() {
        0 => Err(Error::fetch("no file downloaded")),
        1 => Ok(files.remove(0)),
        n => {
            // Leftover fragments can survive a merge; take the first name and
            // keep the rest for cleanup with the scratch directory.
            warn!(count = n, "multiple files in scratch directory");
            Ok(files.remove(0))
        }
    }
}

/// Returns true if `s` looks like a URL the fetch tool may be able to handle.
pub fn is_probable_video_url(s: &str) -> bool {
    let s = s.trim();
    if !s.starts_with("http://") && !s.starts_with("https://") {
        return false;
    }
    if KNOWN_HOSTS.iter().any(|host| s.contains(host)) {
        return true;
    }
    // Permissive fallback: let the tool decide for unknown hosts.
    true
}

/// Extract candidate video URLs from free-form message text.
pub fn extract_urls(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|word| word.trim_matches(|c| "<>()[]\"'".contains(c)))
        .filter(|word| is_probable_video_url(word))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_chain_tiers() {
        let chain = Fetcher::format_chain(1080);
        let tiers: Vec<&str> = chain.split('/').collect();
        assert_eq!(tiers.len(), 5);
        assert_eq!(
            tiers[0],
            "bestvideo[vcodec^=avc1][height<=1080]+bestaudio[acodec^=mp4a]"
        );
        assert_eq!(tiers[1], "bestvideo[vcodec^=avc][height<=1080]+bestaudio");
        assert_eq!(tiers[2], "bestvideo[height<=1080]+bestaudio");
        assert_eq!(tiers[3], "best[height<=1080]");
        assert_eq!(tiers[4], "best");
    }

    #[test]
    fn test_format_chain_uses_height_cap() {
        let chain = Fetcher::format_chain(720);
        assert!(chain.contains("height<=720"));
        assert!(!chain.contains("1080"));
    }

    #[test]
    fn test_url_validation() {
        assert!(is_probable_video_url("https://youtu.be/abc123"));
        assert!(is_probable_video_url("http://vimeo.com/12345"));
        assert!(is_probable_video_url("https://example.com/clip.mp4"));
        assert!(!is_probable_video_url("ftp://example.com/clip.mp4"));
        assert!(!is_probable_video_url("just some text"));
    }

    #[test]
    fn test_extract_urls() {
        let text = "check this out <https://youtu.be/abc123> and (https://vimeo.com/9)";
        assert_eq!(
            extract_urls(text),
            vec![
                "https://youtu.be/abc123".to_string(),
                "https://vimeo.com/9".to_string()
            ]
        );
    }

    #[test]
    fn test_extract_urls_none() {
        assert!(extract_urls("no links here").is_empty());
    }

    #[tokio::test]
    async fn test_find_downloaded_file_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        let err = find_downloaded_file(dir.path()).await.unwrap_err();
        assert!(matches!(err, Error::Fetch(_)));
    }

    #[tokio::test]
    async fn test_find_downloaded_file_single() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("clip.mp4");
        std::fs::write(&file, b"x").unwrap();
        assert_eq!(find_downloaded_file(dir.path()).await.unwrap(), file);
    }

    #[tokio::test]
    async fn test_work_dirs_are_unique() {
        let root = tempfile::tempdir().unwrap();
        let fetcher = Fetcher {
            ytdlp_path: "yt-dlp".to_string(),
            download_dir: root.path().to_path_buf(),
            max_height: 1080,
        };

        let a = fetcher.create_work_dir().unwrap();
        let b = fetcher.create_work_dir().unwrap();
        assert_ne!(a, b);
        assert!(a.is_dir());
        assert!(b.is_dir());
    }
}
