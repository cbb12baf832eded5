//! Media inspection via the external probe tool.

mod probe;

pub use probe::{MediaInfo, Prober, is_playback_compatible};
