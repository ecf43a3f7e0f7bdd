//! Unified error types for Longan operations.
//!
//! This module provides a single error type covering both the byte-range
//! scanning side (boundary scans, size estimation, segment planning) and the
//! tree building side, presenting a consistent API to users.
use thiserror::Error;

/// Main error type for Longan operations.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error (seek or read failure on the underlying stream)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// XML decode error reported by the tokenizer
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// A forward scan reached the end of the stream before finding the
    /// requested tag occurrence
    #[error("end of stream reached before a matching tag")]
    EndOfStream,

    /// The target tag does not occur anywhere in the document
    #[error("cannot find tag \"{0}\" in stream")]
    TagNotFound(String),

    /// Size estimation recorded no complete element span
    #[error("cannot estimate element size for tag \"{0}\": no complete element sampled")]
    EstimationFailed(String),
}

impl Error {
    /// Whether this error marks an exhausted forward scan.
    ///
    /// `EndOfStream` doubles as control flow in the segment planner and the
    /// size estimator, so callers routinely need to tell it apart from hard
    /// failures.
    #[inline]
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, Error::EndOfStream)
    }
}

/// Result type for Longan operations.
pub type Result<T> = std::result::Result<T, Error>;
