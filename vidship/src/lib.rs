//! vidship library crate.
//!
//! Processes a video URL end-to-end into one or more messaging-ready files:
//! fetch with an external download tool, verify codec compatibility against
//! the platform's inline-playback requirements, re-encode when needed, split
//! oversized results into parts, and report rate-limited progress to a
//! caller-supplied sink throughout.
//!
//! The crate orchestrates external codec tools and interprets their textual
//! output; it implements no decoding or encoding itself, and keeps no job
//! state across restarts.

mod child;
pub mod config;
pub mod encode;
pub mod error;
pub mod fetch;
pub mod media;
pub mod pipeline;
pub mod progress;
pub mod util;

pub use config::PipelineConfig;
pub use encode::PartInfo;
pub use error::{Error, Result};
pub use media::{MediaInfo, is_playback_compatible};
pub use pipeline::{Delivery, Payload, Pipeline};
pub use progress::{Phase, Progress, ProgressSink, Throttle};
