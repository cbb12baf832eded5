//! Crate-wide error types.

use thiserror::Error;

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Crate-wide error type.
///
/// Probe failures are recoverable by the caller (retry, or treat media info
/// as unavailable). Fetch, transcode and split failures are terminal for the
/// job; the job's scratch directory is removed before they surface.
#[derive(Error, Debug)]
pub enum Error {
    #[error("probe failed: {0}")]
    Probe(String),

    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("transcode failed: {0}")]
    Transcode(String),

    #[error("split failed: {0}")]
    Split(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn probe(msg: impl Into<String>) -> Self {
        Self::Probe(msg.into())
    }

    pub fn fetch(msg: impl Into<String>) -> Self {
        Self::Fetch(msg.into())
    }

    pub fn transcode(msg: impl Into<String>) -> Self {
        Self::Transcode(msg.into())
    }

    pub fn split(msg: impl Into<String>) -> Self {
        Self::Split(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}
