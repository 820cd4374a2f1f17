//! Error types shared across the contour engine.

use thiserror::Error;

/// Errors produced while building a contour tile.
///
/// The type is `Clone` because a single failure may be observed by several
/// callers coalesced onto the same in-flight cache entry; each of them
/// receives its own copy of the error.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ContourError {
    /// Tile fetch failed or the server returned a non-success status.
    #[error("fetch failed: {0}")]
    FetchFailed(String),

    /// The raster decoder rejected the bytes.
    #[error("decode failed: {0}")]
    DecodeFailed(String),

    /// A fetch or decode exceeded the configured timeout.
    #[error("request timed out")]
    TimedOut,

    /// Cooperative cancellation fired before the result was ready.
    #[error("request cancelled")]
    Cancelled,

    /// Malformed options or request parameters.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}
