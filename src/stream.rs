//! Device stream framing: per-row raster framing, block emission and the
//! batched adaptive writer.
//!
//! All three writers speak the same raster sub-language. A row or block
//! always opens with the 3-byte graphics-start token; a 1-digit mode token
//! is inserted lazily whenever the compression method visible to the device
//! changes.
//!
//! Every transfer has the same shape:
//! `ESC*b [<digit>m] <count:ascii> <V|W> <count payload bytes>`, where `V`
//! sends a secondary plane and `W` the final plane of a row (or an entire
//! block). A zero-length row means "repeat the previous row" in delta mode
//! and "entirely zero" in packbits mode. Block payloads are raw scanline
//! bytes; adaptive payloads are control records `{method: u8, count: u16
//! be}` with their run data.

use log::{debug, warn};

use crate::compress::{CompressionMode, RowEncoding, ScanState};
use crate::error::Error;
use crate::sink::OutputSink;

/// 3-byte graphics-start token opening every framed row or block.
pub const GRAPHICS_START: [u8; 3] = [0x1B, b'*', b'b'];

/// Plane terminator for a secondary plane of a 3-plane group.
pub const PLANE_NEXT: u8 = b'V';
/// Plane terminator for the final (or only) plane of a row.
pub const PLANE_LAST: u8 = b'W';

/// Adaptive control-record methods.
pub const ADAPT_RAW: u8 = 0;
pub const ADAPT_PACKBITS: u8 = 1;
pub const ADAPT_DELTA: u8 = 2;
/// Run of all-zero rows; count is the row count, no payload.
pub const ADAPT_ZERO: u8 = 3;
/// Run of seed-identical rows; count is the row count, no payload.
pub const ADAPT_DUP: u8 = 4;

const CONTROL_LEN: usize = 3;
/// Smallest usable adaptive buffer: one control record and a little payload.
const MIN_ADAPTIVE_BYTES: usize = 16;
/// Adaptive buffer size used when the caller has no preference.
pub const DEFAULT_ADAPTIVE_BYTES: usize = 4096;

/// Per-row framing writer for the fixed delta and packbits modes.
///
/// Tracks the plane cursor within a 3-plane group and the mode the device
/// currently has selected, so mode tokens are only emitted on change.
#[derive(Debug)]
pub struct RowStream {
    planes: usize,
    plane: usize,
    device_mode: Option<CompressionMode>,
}

impl RowStream {
    pub fn new(planes: usize) -> Self {
        debug_assert!(planes == 1 || planes == 3);
        RowStream {
            planes,
            plane: 0,
            device_mode: None,
        }
    }

    /// Emit one compressed scanline. `raw` is the uncompressed line, used
    /// when the encoding is the "no gain" sentinel.
    pub fn write_row<S: OutputSink>(
        &mut self,
        sink: &mut S,
        encoding: &RowEncoding,
        raw: &[u8],
    ) -> Result<(), Error> {
        match encoding {
            RowEncoding::Repeat => self.frame(sink, CompressionMode::Delta, &[]),
            RowEncoding::Zero => self.frame(sink, CompressionMode::PackBits, &[]),
            RowEncoding::Delta(d) => self.frame(sink, CompressionMode::Delta, d),
            RowEncoding::PackBits(p) => self.frame(sink, CompressionMode::PackBits, p),
            RowEncoding::Raw => self.frame(sink, CompressionMode::Block, raw),
        }
    }

    fn frame<S: OutputSink>(
        &mut self,
        sink: &mut S,
        mode: CompressionMode,
        payload: &[u8],
    ) -> Result<(), Error> {
        sink.push_bytes(&GRAPHICS_START)?;
        if self.device_mode != Some(mode) {
            sink.push_bytes(&[mode.token(), b'm'])?;
            self.device_mode = Some(mode);
        }
        sink.push_num(payload.len() as i64)?;

        let term = if self.plane + 1 == self.planes {
            PLANE_LAST
        } else {
            PLANE_NEXT
        };
        sink.push_bytes(&[term])?;
        sink.push_bytes(payload)?;
        self.plane = (self.plane + 1) % self.planes;
        Ok(())
    }
}

/// Verbatim block emission: one header declaring the total byte count, raw
/// scanline bytes following with no per-row framing.
#[derive(Debug, Default)]
pub struct BlockStream {
    mode_sent: bool,
}

impl BlockStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_block<S: OutputSink>(&mut self, sink: &mut S, data: &[u8]) -> Result<(), Error> {
        sink.push_bytes(&GRAPHICS_START)?;
        if !self.mode_sent {
            sink.push_bytes(&[CompressionMode::Block.token(), b'm'])?;
            self.mode_sent = true;
        }
        sink.push_num(data.len() as i64)?;
        sink.push_bytes(&[PLANE_LAST])?;
        sink.push_bytes(data)
    }
}

/// One scanline classified for the adaptive writer.
#[derive(Debug)]
pub enum AdaptiveRow<'a> {
    /// Entirely zero row.
    Zero,
    /// Row identical to the seed row.
    Duplicate,
    /// Row with payload bytes under one of the data methods.
    Data { method: u8, payload: &'a [u8] },
}

impl<'a> AdaptiveRow<'a> {
    /// Classify a compressor result. `raw` backs the "no gain" literal case.
    pub fn from_encoding(encoding: &'a RowEncoding, raw: &'a [u8]) -> Self {
        match encoding {
            RowEncoding::Zero => AdaptiveRow::Zero,
            RowEncoding::Repeat => AdaptiveRow::Duplicate,
            RowEncoding::Delta(d) => AdaptiveRow::Data {
                method: ADAPT_DELTA,
                payload: d,
            },
            RowEncoding::PackBits(p) => AdaptiveRow::Data {
                method: ADAPT_PACKBITS,
                payload: p,
            },
            RowEncoding::Raw => AdaptiveRow::Data {
                method: ADAPT_RAW,
                payload: raw,
            },
        }
    }
}

/// Batches compressed runs with method tags into one budgeted buffer shared
/// across scanlines and planes.
///
/// Zero and duplicate rows coalesce into a saturating run counter; raw
/// literal records coalesce their byte counts. The buffer flushes strictly
/// before its budget would be exceeded, when the run counter saturates at
/// the state's duplicate limit, and at teardown ([`AdaptiveWriter::finish`]).
/// Every flush zero-fills the seed rows, because the device treats each
/// adaptive block as starting from a blank reference row.
#[derive(Debug)]
pub struct AdaptiveWriter {
    buf: Vec<u8>,
    max_bytes: usize,
    /// Coalesced zero/duplicate run not yet written into `buf`.
    pending: Option<(u8, u16)>,
    /// Offset and method of the last record in `buf`, for literal coalescing.
    last_record: Option<(usize, u8)>,
    mode_sent: bool,
}

impl AdaptiveWriter {
    pub fn new(max_bytes: usize) -> Self {
        AdaptiveWriter {
            buf: Vec::new(),
            max_bytes: max_bytes.max(MIN_ADAPTIVE_BYTES),
            pending: None,
            last_record: None,
            mode_sent: false,
        }
    }

    /// Bytes the buffer would occupy once the pending run is materialized.
    fn committed_len(&self) -> usize {
        self.buf.len() + if self.pending.is_some() { CONTROL_LEN } else { 0 }
    }

    /// Queue one classified scanline.
    pub fn push<S: OutputSink>(
        &mut self,
        state: &mut ScanState,
        sink: &mut S,
        row: AdaptiveRow<'_>,
    ) -> Result<(), Error> {
        match row {
            AdaptiveRow::Zero => self.bump_counter(state, sink, ADAPT_ZERO),
            AdaptiveRow::Duplicate => self.bump_counter(state, sink, ADAPT_DUP),
            AdaptiveRow::Data { method, payload } => self.push_data(state, sink, method, payload),
        }
    }

    fn bump_counter<S: OutputSink>(
        &mut self,
        state: &mut ScanState,
        sink: &mut S,
        method: u8,
    ) -> Result<(), Error> {
        if let Some((m, count)) = self.pending {
            if m == method {
                let count = count.saturating_add(1);
                self.pending = Some((m, count));
                if count >= state.dup_limit() {
                    // Saturated: the run cannot grow, close the block.
                    self.flush(state, sink)?;
                }
                return Ok(());
            }
            self.settle_pending();
        }

        if self.committed_len() + CONTROL_LEN > self.max_bytes {
            self.flush(state, sink)?;
        }
        self.pending = Some((method, 1));
        Ok(())
    }

    fn push_data<S: OutputSink>(
        &mut self,
        state: &mut ScanState,
        sink: &mut S,
        method: u8,
        payload: &[u8],
    ) -> Result<(), Error> {
        // Raw literal records are the only data records whose payloads can
        // be concatenated without losing row boundaries (count is a whole
        // multiple of the row width), so only they coalesce.
        if method == ADAPT_RAW && self.pending.is_none() {
            if let Some((off, ADAPT_RAW)) = self.last_record {
                let count = u16::from_be_bytes([self.buf[off + 1], self.buf[off + 2]]);
                let fits_count = count as usize + payload.len() <= u16::MAX as usize;
                let fits_buf = self.committed_len() + payload.len() <= self.max_bytes;
                if fits_count && fits_buf {
                    let count = count + payload.len() as u16;
                    self.buf[off + 1..off + 3].copy_from_slice(&count.to_be_bytes());
                    self.buf.extend_from_slice(payload);
                    return Ok(());
                }
            }
        }

        let record = CONTROL_LEN + payload.len();
        if self.committed_len() + record > self.max_bytes {
            self.flush(state, sink)?;
        }

        if record > self.max_bytes {
            // A single run larger than the whole budget: emit it as its own
            // block rather than letting the buffer overrun.
            warn!(
                "adaptive run of {} bytes exceeds buffer budget {}",
                record, self.max_bytes
            );
            self.write_header(sink, record)?;
            push_control(sink, method, payload.len() as u16)?;
            sink.push_bytes(payload)?;
            state.reset_seeds();
            return Ok(());
        }

        self.settle_pending();
        let off = self.buf.len();
        self.buf.push(method);
        self.buf
            .extend_from_slice(&(payload.len() as u16).to_be_bytes());
        self.buf.extend_from_slice(payload);
        self.last_record = Some((off, method));
        Ok(())
    }

    // Materialize the pending zero/duplicate run into the buffer.
    fn settle_pending(&mut self) {
        if let Some((method, count)) = self.pending.take() {
            let off = self.buf.len();
            self.buf.push(method);
            self.buf.extend_from_slice(&count.to_be_bytes());
            self.last_record = Some((off, method));
        }
    }

    fn write_header<S: OutputSink>(&mut self, sink: &mut S, total: usize) -> Result<(), Error> {
        sink.push_bytes(&GRAPHICS_START)?;
        if !self.mode_sent {
            sink.push_bytes(&[CompressionMode::Adaptive.token(), b'm'])?;
            self.mode_sent = true;
        }
        sink.push_num(total as i64)?;
        sink.push_bytes(&[PLANE_LAST])
    }

    /// Emit the buffered block, if any, and zero the seed rows.
    pub fn flush<S: OutputSink>(
        &mut self,
        state: &mut ScanState,
        sink: &mut S,
    ) -> Result<(), Error> {
        self.settle_pending();
        if self.buf.is_empty() {
            return Ok(());
        }
        debug!("adaptive flush: {} bytes", self.buf.len());
        let total = self.buf.len();
        self.write_header(sink, total)?;
        sink.push_bytes(&self.buf)?;
        self.buf.clear();
        self.last_record = None;
        state.reset_seeds();
        Ok(())
    }

    /// Teardown flush.
    pub fn finish<S: OutputSink>(
        &mut self,
        state: &mut ScanState,
        sink: &mut S,
    ) -> Result<(), Error> {
        self.flush(state, sink)
    }
}

fn push_control<S: OutputSink>(sink: &mut S, method: u8, count: u16) -> Result<(), Error> {
    sink.push_bytes(&[method])?;
    sink.push_bytes(&count.to_be_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> ScanState {
        ScanState::new(1, 4, 32, CompressionMode::Adaptive)
    }

    #[test]
    fn row_stream_frames_and_mode_tokens() {
        let mut out: Vec<u8> = Vec::new();
        let mut rows = RowStream::new(1);
        rows.write_row(&mut out, &RowEncoding::Delta(vec![0x01, 0xAA]), &[])
            .unwrap();
        rows.write_row(&mut out, &RowEncoding::Repeat, &[]).unwrap();

        let mut expect = Vec::new();
        expect.extend_from_slice(&GRAPHICS_START);
        expect.extend_from_slice(b"3m2W\x01\xAA");
        expect.extend_from_slice(&GRAPHICS_START);
        // Same device mode: no second token.
        expect.extend_from_slice(b"0W");
        assert_eq!(out, expect);
    }

    #[test]
    fn row_stream_plane_terminators() {
        let mut out: Vec<u8> = Vec::new();
        let mut rows = RowStream::new(3);
        for _ in 0..3 {
            rows.write_row(&mut out, &RowEncoding::Repeat, &[]).unwrap();
        }
        let terms: Vec<u8> = out
            .iter()
            .filter(|b| **b == PLANE_NEXT || **b == PLANE_LAST)
            .cloned()
            .collect();
        assert_eq!(terms, vec![PLANE_NEXT, PLANE_NEXT, PLANE_LAST]);
    }

    #[test]
    fn block_stream_header_then_raw() {
        let mut out: Vec<u8> = Vec::new();
        let mut block = BlockStream::new();
        block.write_block(&mut out, &[0xDE, 0xAD]).unwrap();
        let mut expect = Vec::new();
        expect.extend_from_slice(&GRAPHICS_START);
        expect.extend_from_slice(b"0m2W\xDE\xAD");
        assert_eq!(out, expect);
    }

    #[test]
    fn adaptive_coalesces_duplicates() {
        let mut st = state();
        let mut out: Vec<u8> = Vec::new();
        let mut w = AdaptiveWriter::new(64);
        for _ in 0..5 {
            w.push(&mut st, &mut out, AdaptiveRow::Duplicate).unwrap();
        }
        w.push(
            &mut st,
            &mut out,
            AdaptiveRow::Data {
                method: ADAPT_DELTA,
                payload: &[0x01, 0xFF],
            },
        )
        .unwrap();
        w.finish(&mut st, &mut out).unwrap();

        // Header: ESC*b 5m 8 W, then {dup,5} and {delta,2}+payload.
        let mut expect = Vec::new();
        expect.extend_from_slice(&GRAPHICS_START);
        expect.extend_from_slice(b"5m8W");
        expect.extend_from_slice(&[ADAPT_DUP, 0, 5]);
        expect.extend_from_slice(&[ADAPT_DELTA, 0, 2, 0x01, 0xFF]);
        assert_eq!(out, expect);
    }

    #[test]
    fn adaptive_flushes_before_budget() {
        let mut st = state();
        let mut out: Vec<u8> = Vec::new();
        let mut w = AdaptiveWriter::new(16);
        // Each record is 3 + 8 = 11 bytes; the second must force a flush.
        let payload = [0xABu8; 8];
        for _ in 0..2 {
            w.push(
                &mut st,
                &mut out,
                AdaptiveRow::Data {
                    method: ADAPT_DELTA,
                    payload: &payload,
                },
            )
            .unwrap();
        }
        // First block already on the wire, second still buffered.
        assert!(!out.is_empty());
        w.finish(&mut st, &mut out).unwrap();

        let blocks = out
            .windows(GRAPHICS_START.len())
            .filter(|w| **w == GRAPHICS_START)
            .count();
        assert_eq!(blocks, 2);
    }

    #[test]
    fn counter_saturation_flushes_and_resets_seeds() {
        let mut st = ScanState::new(1, 4, 32, CompressionMode::Adaptive).with_dup_limit(3);
        let mut out: Vec<u8> = Vec::new();
        let mut w = AdaptiveWriter::new(64);

        // Install a non-zero seed first.
        let mut row = [0xF0u8, 0, 0, 0];
        st.compress_row(0, &mut row).unwrap();

        for _ in 0..3 {
            w.push(&mut st, &mut out, AdaptiveRow::Duplicate).unwrap();
        }
        // Saturation flushed the block and zeroed the seed, so the same row
        // is no longer a duplicate.
        assert!(!out.is_empty());
        let mut row = [0xF0u8, 0, 0, 0];
        assert_ne!(st.compress_row(0, &mut row).unwrap(), RowEncoding::Repeat);
    }

    #[test]
    fn raw_literals_coalesce_counts() {
        let mut st = state();
        let mut out: Vec<u8> = Vec::new();
        let mut w = AdaptiveWriter::new(64);
        for _ in 0..3 {
            w.push(
                &mut st,
                &mut out,
                AdaptiveRow::Data {
                    method: ADAPT_RAW,
                    payload: &[1, 2, 3, 4],
                },
            )
            .unwrap();
        }
        w.finish(&mut st, &mut out).unwrap();

        // One control record with count 12, not three records.
        let body_at = out.iter().position(|&b| b == PLANE_LAST).unwrap() + 1;
        let body = &out[body_at..];
        assert_eq!(body[0], ADAPT_RAW);
        assert_eq!(u16::from_be_bytes([body[1], body[2]]), 12);
        assert_eq!(body.len(), 3 + 12);
    }
}
