//! Progress events and the rate-limiting policy around them.

mod throttle;

pub use throttle::Throttle;

/// Phase of a job's lifecycle, used to tag progress events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// The fetch tool is downloading the source.
    Acquiring,
    /// The fetch tool is merging separate audio/video streams.
    Merging,
    /// The encoder is converting to a playback-compatible codec.
    Transcoding,
    /// The encoder is splitting an oversized file into parts.
    Partitioning,
    /// The consumer is moving finished files to their destination.
    Transferring,
}

impl Phase {
    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Acquiring => "acquiring",
            Self::Merging => "merging",
            Self::Transcoding => "transcoding",
            Self::Partitioning => "partitioning",
            Self::Transferring => "transferring",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Default for Phase {
    fn default() -> Self {
        Self::Acquiring
    }
}

/// A snapshot of pipeline state at an instant.
///
/// Produced by the stage parsers and handed to a caller-supplied sink; never
/// stored by the pipeline itself. Percent is 0–100 and may reset to 0 when
/// the phase changes.
#[derive(Debug, Clone, Default)]
pub struct Progress {
    /// Current phase.
    pub phase: Phase,
    /// Percent complete within the phase.
    pub percent: f64,
    /// Human-readable total size (e.g. "50.00MiB"), when the tool reports one.
    pub total: Option<String>,
    /// Human-readable transfer rate (e.g. "2.50MiB/s").
    pub speed: Option<String>,
    /// Human-readable ETA (e.g. "00:30").
    pub eta: Option<String>,
    /// Source codec label, set on transcoding events.
    pub codec: Option<String>,
    /// Active part ordinal (1-based) during partitioning or transfer.
    pub part: u32,
    /// Total part count during partitioning or transfer.
    pub total_parts: u32,
}

/// Callback target for progress events.
///
/// Sinks are invoked synchronously from whichever reader task observed the
/// triggering subprocess line, so implementations must be thread-safe and
/// must hand off quickly rather than block.
pub trait ProgressSink: Send + Sync {
    fn notify(&self, progress: Progress);
}

impl<F> ProgressSink for F
where
    F: Fn(Progress) + Send + Sync,
{
    fn notify(&self, progress: Progress) {
        self(progress)
    }
}

/// A sink that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn notify(&self, _progress: Progress) {}
}
