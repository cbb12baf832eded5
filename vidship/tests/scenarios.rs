//! End-to-end scenarios against real `ffmpeg`/`ffprobe` binaries.
//!
//! Ignored by default; run with `cargo test -- --ignored` on a host that has
//! both tools on PATH.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use vidship::encode::{Splitter, Transcoder, needs_split, part_count};
use vidship::media::{Prober, is_playback_compatible};
use vidship::progress::NullSink;

const MIB: u64 = 1024 * 1024;

/// Render a 10-second synthetic test clip.
fn synthesize(dir: &Path, name: &str, video_codec: &str) -> PathBuf {
    let out = dir.join(name);
    let status = Command::new("ffmpeg")
        .args([
            "-y",
            "-f",
            "lavfi",
            "-i",
            "testsrc=duration=10:size=1280x720:rate=30",
            "-f",
            "lavfi",
            "-i",
            "sine=frequency=440:duration=10",
            "-c:v",
            video_codec,
            "-c:a",
        ])
        .args(if video_codec == "libvpx-vp9" {
            ["libopus"]
        } else {
            ["aac"]
        })
        .arg(&out)
        .status()
        .expect("run ffmpeg");
    assert!(status.success(), "synthesizing {name} failed");
    out
}

#[tokio::test]
#[ignore = "requires ffmpeg and ffprobe on PATH"]
async fn scenario_small_h264_file_needs_no_processing() {
    let dir = tempfile::tempdir().unwrap();
    let clip = synthesize(dir.path(), "clip.mp4", "libx264");

    let prober = Prober::new("ffprobe");
    let info = prober.media_info(&clip).await.unwrap();
    assert!((info.duration - 10.0).abs() < 0.5, "duration {}", info.duration);
    assert_eq!((info.width, info.height), (1280, 720));

    let codec = prober.video_codec(&clip).await.unwrap();
    assert_eq!(codec, "h264");
    assert!(is_playback_compatible(&codec));

    let size = std::fs::metadata(&clip).unwrap().len();
    assert!(!needs_split(size, 1900 * MIB));
}

#[tokio::test]
#[ignore = "requires ffmpeg and ffprobe on PATH"]
async fn scenario_oversized_file_splits_into_three_parts() {
    let dir = tempfile::tempdir().unwrap();
    let clip = synthesize(dir.path(), "clip.mp4", "libx264");

    let prober = Prober::new("ffprobe");
    let info = prober.media_info(&clip).await.unwrap();
    let size = std::fs::metadata(&clip).unwrap().len();

    // Pick a target that forces exactly three parts for this file.
    let target = size.div_ceil(3);
    assert_eq!(part_count(size, target), 3);

    let splitter = Splitter::new("ffmpeg", target);
    let parts = splitter
        .split(
            &clip,
            info.duration,
            size,
            &NullSink,
            &CancellationToken::new(),
            Instant::now() + Duration::from_secs(300),
        )
        .await
        .unwrap();

    assert_eq!(parts.len(), 3);
    assert_eq!(parts.iter().map(|p| p.ordinal).collect::<Vec<_>>(), vec![1, 2, 3]);
    for pair in parts.windows(2) {
        assert!(pair[0].path < pair[1].path);
    }

    // Re-encoded parts vary in size with content complexity, but together
    // they should land near the original.
    let total: u64 = parts.iter().map(|p| p.size_bytes).sum();
    assert!(total > size / 4, "parts sum {total} vs original {size}");

    // Part durations should cover the whole clip.
    let mut covered = 0.0;
    for part in &parts {
        covered += prober.media_info(&part.path).await.unwrap().duration;
    }
    assert!((covered - info.duration).abs() < 1.5, "covered {covered}");
}

#[tokio::test]
#[ignore = "requires ffmpeg and ffprobe on PATH"]
async fn scenario_vp9_source_transcodes_to_compatible_codec() {
    let dir = tempfile::tempdir().unwrap();
    let clip = synthesize(dir.path(), "clip.webm", "libvpx-vp9");

    let prober = Prober::new("ffprobe");
    let codec = prober.video_codec(&clip).await.unwrap();
    assert_eq!(codec, "vp9");
    assert!(!is_playback_compatible(&codec));

    let info = prober.media_info(&clip).await.unwrap();
    let transcoder = Transcoder::new("ffmpeg");
    let output = transcoder
        .transcode(
            &clip,
            info.duration,
            &codec,
            &NullSink,
            &CancellationToken::new(),
            Instant::now() + Duration::from_secs(300),
        )
        .await
        .unwrap();

    // The original is left in place; discarding it is the caller's call.
    assert!(clip.exists());

    let new_codec = prober.video_codec(&output).await.unwrap();
    assert!(
        is_playback_compatible(&new_codec),
        "re-probed codec {new_codec:?}"
    );
}
