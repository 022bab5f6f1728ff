//! Output sink and cancellation primitives.
//!
//! The pipeline never talks to a device directly; byte emission is delegated
//! to a caller-owned sink which handles its own buffering and any blocking
//! I/O. Cancellation is cooperative: loops poll an externally owned flag and
//! stop without flushing a partially written protocol fragment.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::Error;

/// Destination for the ordered device byte stream.
///
/// Implemented for `Vec<u8>` (capture buffers, tests) and for any
/// `io::Write` via [`IoSink`].
pub trait OutputSink {
    /// Append a range of bytes to the stream.
    fn push_bytes(&mut self, bytes: &[u8]) -> Result<(), Error>;

    /// Append a formatted decimal token, as used by the device sub-language
    /// for lengths and coordinates.
    fn push_num(&mut self, value: i64) -> Result<(), Error> {
        let mut buf = [0u8; 20];
        let s = fmt_decimal(value, &mut buf);
        self.push_bytes(s)
    }
}

impl OutputSink for Vec<u8> {
    fn push_bytes(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.extend_from_slice(bytes);
        Ok(())
    }
}

/// Adapter turning any `io::Write` into an [`OutputSink`].
pub struct IoSink<W: io::Write>(pub W);

impl<W: io::Write> OutputSink for IoSink<W> {
    fn push_bytes(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.0.write_all(bytes)?;
        Ok(())
    }
}

// Formats into the tail of `buf` without allocating; the stream writers sit
// inside per-row loops.
fn fmt_decimal(value: i64, buf: &mut [u8; 20]) -> &[u8] {
    let mut n = value.unsigned_abs();
    let mut at = buf.len();
    loop {
        at -= 1;
        buf[at] = b'0' + (n % 10) as u8;
        n /= 10;
        if n == 0 {
            break;
        }
    }
    if value < 0 {
        at -= 1;
        buf[at] = b'-';
    }
    &buf[at..]
}

/// Externally owned cancellation signal, polled once per scanline and per
/// strip.
///
/// Clones share the same flag, so the job owner can keep one handle and hand
/// another to the pipeline.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of the in-flight blit.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// How a blit run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlitOutcome {
    Completed,
    /// The cancel flag was observed; the stream was left at a row boundary,
    /// with no half-written row header.
    Canceled,
}
