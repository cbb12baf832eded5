//! Encoder-backed stages: codec conversion and size-driven partitioning.

pub mod parser;
mod split;
mod transcode;

pub use split::{PartInfo, Splitter, needs_split, part_count, part_ordinal};
pub use transcode::Transcoder;
