//! Error types for the raster output pipeline.
//!
//! Compression itself never fails; routines that cannot win simply fall back
//! to verbatim block emission. The errors here cover contract violations and
//! the output sink.

use thiserror::Error;

/// Main error type for raster pipeline operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A banding pass was started while another one is still active on the
    /// same blit session.
    ///
    /// Recursive banding would corrupt the shared seed-row state, so the
    /// Bander fails fast and leaves prior state untouched.
    #[error("banding is already active for this blit session")]
    BandingActive,

    /// A scanline was handed to the compressor with a length different from
    /// the seed row it is compared against.
    #[error("scanline length {line} does not match seed row length {seed}")]
    RowLengthMismatch { line: usize, seed: usize },

    /// A caller-supplied destination buffer is too small for the operation.
    #[error("destination buffer too small: need {need} bytes, have {have}")]
    BufferTooSmall { need: usize, have: usize },

    /// The strip source returned pixel data that does not cover the
    /// requested strip.
    #[error("strip source returned {got} rows, strip needs {need}")]
    ShortStrip { need: usize, got: usize },

    /// A degenerate (empty or inverted) rectangle was passed where a
    /// non-empty destination is required.
    #[error("empty or inverted rectangle")]
    EmptyRect,

    /// Error while writing to the caller-owned output sink.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
