//! Tolerant classifier for the fetch tool's line-oriented progress output.
//!
//! The tool's free-text lines are an inherently fragile contract, so parsing
//! is isolated here behind a tagged variant and tested against fixture
//! transcripts. A line that matches nothing is `Unrecognized`, never an
//! error.

use std::sync::LazyLock;

use regex::Regex;

// [download]  45.2% of 50.00MiB at 2.50MiB/s ETA 00:30
static PROGRESS_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[download\]\s+(\d+\.?\d*)%\s+of\s+~?(\S+)\s+at\s+(\S+)\s+ETA\s+(\S+)").unwrap()
});

// [download] 100% of 50.00MiB in 00:20
static COMPLETE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[download\]\s+100%\s+of\s+(\S+)").unwrap());

/// One classified line of fetch-tool output.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchLine {
    /// An in-flight progress report.
    Progress {
        percent: f64,
        total: String,
        speed: String,
        eta: String,
    },
    /// The 100%-of-size completion line.
    Complete { total: String },
    /// The tool started merging separate audio/video streams.
    MergeStarted,
    /// Anything else; retained for diagnostics only.
    Unrecognized,
}

/// Classify one line of the fetch tool's output.
pub fn classify(line: &str) -> FetchLine {
    if let Some(caps) = PROGRESS_REGEX.captures(line) {
        let percent = caps[1].parse().unwrap_or(0.0);
        return FetchLine::Progress {
            percent,
            total: caps[2].to_string(),
            speed: caps[3].to_string(),
            eta: caps[4].to_string(),
        };
    }

    if let Some(caps) = COMPLETE_REGEX.captures(line) {
        return FetchLine::Complete {
            total: caps[1].to_string(),
        };
    }

    if line.contains("[Merger]") {
        return FetchLine::MergeStarted;
    }

    FetchLine::Unrecognized
}
