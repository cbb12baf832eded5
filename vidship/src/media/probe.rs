//! ffprobe invocation and output parsing.

use std::path::Path;

use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use crate::{Error, Result};

/// Measurable properties of a media file.
///
/// Derived fresh from the file on every inspection call; never cached.
/// Fields the probe cannot determine default to zero: a file without a
/// video stream has zero dimensions, which is not itself an error.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MediaInfo {
    /// Duration in seconds, 0 if unknown.
    pub duration: f64,
    /// Container bit rate in bits per second.
    pub bit_rate: u64,
    /// File size in bytes as reported by the container.
    pub file_size: u64,
    /// Video width in pixels, 0 if no video stream.
    pub width: u32,
    /// Video height in pixels, 0 if no video stream.
    pub height: u32,
}

#[derive(Debug, Default, Deserialize)]
struct ProbeDocument {
    #[serde(default)]
    format: ProbeFormat,
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Default, Deserialize)]
struct ProbeFormat {
    #[serde(default)]
    duration: Option<String>,
    #[serde(default)]
    size: Option<String>,
    #[serde(default)]
    bit_rate: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ProbeStream {
    #[serde(default)]
    codec_type: Option<String>,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
}

/// Returns true if the codec identifier is accepted for inline playback by
/// the messaging platform (the H.264/AVC family).
///
/// Everything else, including the empty identifier for "no video stream
/// found", is treated as incompatible, so unknown input re-encodes instead
/// of shipping as-is.
pub fn is_playback_compatible(codec: &str) -> bool {
    matches!(
        codec.to_ascii_lowercase().as_str(),
        "h264" | "avc" | "avc1"
    )
}

/// Wrapper around the external probe binary.
pub struct Prober {
    ffprobe_path: String,
}

impl Prober {
    pub fn new(ffprobe_path: impl Into<String>) -> Self {
        Self {
            ffprobe_path: ffprobe_path.into(),
        }
    }

    /// Probe container- and stream-level metadata for a file.
    async fn run(&self, args: &[&str], path: &Path) -> Result<Vec<u8>> {
        let output = Command::new(&self.ffprobe_path)
            .args(args)
            .arg(path)
            .output()
            .await
            .map_err(|e| Error::probe(format!("failed to run {}: {}", self.ffprobe_path, e)))?;

        if !output.status.success() {
            return Err(Error::probe(format!(
                "{} exited with {} for {}",
                self.ffprobe_path,
                output.status,
                path.display()
            )));
        }

        Ok(output.stdout)
    }

    /// Return duration, bit rate, size and dimensions for a file.
    pub async fn media_info(&self, path: &Path) -> Result<MediaInfo> {
        let stdout = self
            .run(
                &[
                    "-v",
                    "quiet",
                    "-print_format",
                    "json",
                    "-show_format",
                    "-show_streams",
                ],
                path,
            )
            .await?;

        let info = parse_media_info(&stdout)?;
        debug!(path = %path.display(), ?info, "probed media info");
        Ok(info)
    }

    /// Return the lowercase codec identifier of the first video stream, or
    /// an empty string when the file has no video stream.
    pub async fn video_codec(&self, path: &Path) -> Result<String> {
        let stdout = self
            .run(
                &[
                    "-v",
                    "quiet",
                    "-select_streams",
                    "v:0",
                    "-show_entries",
                    "stream=codec_name",
                    "-of",
                    "csv=p=0",
                ],
                path,
            )
            .await?;

        let codec = String::from_utf8_lossy(&stdout).trim().to_lowercase();
        Ok(codec)
    }
}

/// Parse the probe tool's JSON document into a [`MediaInfo`].
fn parse_media_info(json: &[u8]) -> Result<MediaInfo> {
    let doc: ProbeDocument = serde_json::from_slice(json)
        .map_err(|e| Error::probe(format!("unparseable probe output: {}", e)))?;

    let duration = doc
        .format
        .duration
        .as_deref()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0.0);
    let file_size = doc
        .format
        .size
        .as_deref()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);
    let bit_rate = doc
        .format
        .bit_rate
        .as_deref()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);

    // Dimensions come from the first video stream, if any.
    let (width, height) = doc
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .map(|s| (s.width.unwrap_or(0), s.height.unwrap_or(0)))
        .unwrap_or((0, 0));

    Ok(MediaInfo {
        duration,
        bit_rate,
        file_size,
        width,
        height,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compatible_codecs() {
        for codec in ["h264", "avc", "avc1", "H264", "AVC", "Avc1"] {
            assert!(is_playback_compatible(codec), "{codec} should be compatible");
        }
    }

    #[test]
    fn test_incompatible_codecs() {
        for codec in ["vp9", "av1", "hevc", "h265", "mpeg4", "unknown", ""] {
            assert!(
                !is_playback_compatible(codec),
                "{codec:?} should be incompatible"
            );
        }
    }

    #[test]
    fn test_parse_media_info() {
        let json = br#"{
            "format": {
                "duration": "10.033333",
                "size": "1048576",
                "bit_rate": "836102"
            },
            "streams": [
                {"codec_type": "audio"},
                {"codec_type": "video", "width": 1280, "height": 720}
            ]
        }"#;

        let info = parse_media_info(json).unwrap();
        assert!((info.duration - 10.033333).abs() < 1e-6);
        assert_eq!(info.file_size, 1_048_576);
        assert_eq!(info.bit_rate, 836_102);
        assert_eq!(info.width, 1280);
        assert_eq!(info.height, 720);
    }

    #[test]
    fn test_parse_media_info_no_video_stream() {
        let json = br#"{
            "format": {"duration": "3.5"},
            "streams": [{"codec_type": "audio"}]
        }"#;

        let info = parse_media_info(json).unwrap();
        assert!((info.duration - 3.5).abs() < 1e-6);
        assert_eq!(info.width, 0);
        assert_eq!(info.height, 0);
    }

    #[test]
    fn test_parse_media_info_empty_document() {
        let info = parse_media_info(b"{}").unwrap();
        assert_eq!(info, MediaInfo::default());
    }

    #[test]
    fn test_parse_media_info_rejects_garbage() {
        assert!(matches!(
            parse_media_info(b"not json at all"),
            Err(Error::Probe(_))
        ));
    }
}
