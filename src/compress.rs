//! Per-scanline compression against a seed row.
//!
//! Each device scanline is encoded with the cheapest of the raster
//! sub-language's methods: delta-from-seed (only the bytes that changed
//! since the previous row) or packbits run-length. Two degenerate cases get
//! dedicated signals instead of payload bytes: a row identical to the seed
//! ("repeat previous row") and an all-zero row (the device zero-pads). When
//! no method beats the raw line, the compressor reports [`RowEncoding::Raw`]
//! and the caller emits the scanline verbatim; compression never hard-fails.
//!
//! Seed rows are owned by [`ScanState`], one per plane, and are zero-filled
//! at the start and end of every blit. The candidate encodings are built in
//! independent buffers and never alias a seed row until a winner is chosen.

use log::debug;

use crate::error::Error;

/// Longest run of differing bytes a single delta header can describe.
const DELTA_MAX_RUN: usize = 8;
/// Offset value in the delta header that chains into extension bytes.
const DELTA_OFFSET_MORE: u8 = 31;
/// Longest literal or repeat run a packbits control byte can describe.
const PACKBITS_MAX_RUN: usize = 128;
/// Shortest repeat worth a control byte; anything less folds into a literal.
const PACKBITS_MIN_REPEAT: usize = 3;

/// Default saturation bound for coalesced zero/duplicate row runs.
///
/// Kept configurable on [`ScanState`]; some devices may cap the repeat count
/// below the 16-bit field limit.
pub const DEFAULT_DUP_LIMIT: u16 = 65_535;

/// Compression method active for a blit.
///
/// Exactly one mode is active per [`ScanState`]. Only `Adaptive` may pick a
/// different method on every row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMode {
    /// Verbatim rows under a single block header, no per-row framing.
    Block,
    /// Delta-from-seed rows with per-row framing.
    Delta,
    /// Packbits run-length rows with per-row framing.
    PackBits,
    /// Best method per row, batched into budgeted adaptive blocks.
    Adaptive,
}

impl CompressionMode {
    /// The 1-digit mode token the device sub-language uses for this mode.
    pub fn token(self) -> u8 {
        match self {
            Self::Block => b'0',
            Self::PackBits => b'2',
            Self::Delta => b'3',
            Self::Adaptive => b'5',
        }
    }
}

/// Result of compressing one scanline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowEncoding {
    /// Scanline equals the seed row; emit a zero-length row. The seed row is
    /// left unchanged.
    Repeat,
    /// Scanline is entirely zero; the seed row has been reset to zero (by
    /// fill, not by copying the line).
    Zero,
    /// Delta-encoded payload, strictly smaller than the raw line.
    Delta(Vec<u8>),
    /// Packbits-encoded payload, strictly smaller than the raw line.
    PackBits(Vec<u8>),
    /// "No gain" sentinel: emit the scanline verbatim.
    Raw,
}

/// Per-blit compression state: seed rows, active mode, row bookkeeping.
///
/// Created once per blit or band and mutated per scanline. If the seed rows
/// cannot be allocated the state silently degrades to [`CompressionMode::Block`]
/// rather than failing the page.
#[derive(Debug)]
pub struct ScanState {
    planes: usize,
    row_bytes: usize,
    width_bits: u32,
    last_byte_mask: u8,
    seeds: Vec<Vec<u8>>,
    mode: CompressionMode,
    /// Method that won the previous adaptive row; ties go to it.
    active: CompressionMode,
    rows_left: u32,
    dup_limit: u16,
}

impl ScanState {
    /// Create compression state for a blit of `planes` (1 or 3) planes of
    /// `row_bytes`-wide rows covering `width_bits` device bits.
    pub fn new(planes: usize, row_bytes: usize, width_bits: u32, mode: CompressionMode) -> Self {
        debug_assert!(planes == 1 || planes == 3);

        let mut seeds = Vec::new();
        let mut mode = mode;
        if mode != CompressionMode::Block {
            for _ in 0..planes {
                match alloc_zeroed(row_bytes) {
                    Some(seed) => seeds.push(seed),
                    None => {
                        // Out of memory for scratch: finish the page in
                        // block mode instead of aborting it.
                        debug!("seed row allocation failed, degrading to block mode");
                        seeds.clear();
                        mode = CompressionMode::Block;
                        break;
                    }
                }
            }
        }

        let rem = (width_bits % 8) as u8;
        let last_byte_mask = if rem == 0 { 0xFF } else { 0xFFu8 << (8 - rem) };

        ScanState {
            planes,
            row_bytes,
            width_bits,
            last_byte_mask,
            seeds,
            mode,
            active: CompressionMode::Delta,
            rows_left: 0,
            dup_limit: DEFAULT_DUP_LIMIT,
        }
    }

    /// Override the zero/duplicate run saturation bound.
    pub fn with_dup_limit(mut self, limit: u16) -> Self {
        self.dup_limit = limit.max(1);
        self
    }

    pub fn mode(&self) -> CompressionMode {
        self.mode
    }

    pub fn planes(&self) -> usize {
        self.planes
    }

    pub fn row_bytes(&self) -> usize {
        self.row_bytes
    }

    pub fn width_bits(&self) -> u32 {
        self.width_bits
    }

    pub fn dup_limit(&self) -> u16 {
        self.dup_limit
    }

    pub fn rows_left(&self) -> u32 {
        self.rows_left
    }

    /// Declare how many rows the current band will feed through the state.
    pub fn begin_rows(&mut self, rows: u32) {
        self.rows_left = rows;
    }

    /// Zero-fill every seed row. Called at blit end and after every adaptive
    /// flush, matching the device's notion of a fresh raster block.
    pub fn reset_seeds(&mut self) {
        for seed in &mut self.seeds {
            for b in seed.iter_mut() {
                *b = 0;
            }
        }
    }

    /// Compress one scanline of `plane` against its seed row.
    ///
    /// The line's final byte is masked down to the device row width first,
    /// so stride padding can never reach the stream. On `Delta`, `PackBits`
    /// and `Raw` outcomes the seed row is updated to the (masked) input.
    pub fn compress_row(&mut self, plane: usize, line: &mut [u8]) -> Result<RowEncoding, Error> {
        if self.rows_left > 0 {
            self.rows_left -= 1;
        }

        if self.mode == CompressionMode::Block {
            return Ok(RowEncoding::Raw);
        }

        if let Some(last) = line.last_mut() {
            *last &= self.last_byte_mask;
        }

        let seed = &mut self.seeds[plane];
        if line.len() != seed.len() {
            return Err(Error::RowLengthMismatch {
                line: line.len(),
                seed: seed.len(),
            });
        }

        if line[..] == seed[..] {
            return Ok(RowEncoding::Repeat);
        }

        if line.iter().all(|&b| b == 0) {
            // Reset, not copy: the seed becomes the implicit zero row the
            // device now holds.
            for b in seed.iter_mut() {
                *b = 0;
            }
            return Ok(RowEncoding::Zero);
        }

        let encoding = match self.mode {
            CompressionMode::Delta => match delta_encode(line, seed) {
                Some(d) => RowEncoding::Delta(d),
                None => RowEncoding::Raw,
            },
            CompressionMode::PackBits => match packbits_encode(line) {
                Some(p) => RowEncoding::PackBits(p),
                None => RowEncoding::Raw,
            },
            CompressionMode::Adaptive => {
                let (enc, winner) = pick_adaptive(line, seed, self.active);
                if let Some(method) = winner {
                    self.active = method;
                }
                enc
            }
            CompressionMode::Block => unreachable!(),
        };

        seed.copy_from_slice(line);
        Ok(encoding)
    }
}

fn alloc_zeroed(len: usize) -> Option<Vec<u8>> {
    let mut v: Vec<u8> = Vec::new();
    if v.try_reserve_exact(len).is_err() {
        return None;
    }
    v.resize(len, 0);
    Some(v)
}

/// Run both candidate encoders and keep the smaller result; ties favor the
/// currently active method. Both candidates live in their own buffers and
/// never touch the seed row.
fn pick_adaptive(
    line: &[u8],
    seed: &[u8],
    active: CompressionMode,
) -> (RowEncoding, Option<CompressionMode>) {
    let delta = delta_encode(line, seed);
    let packed = packbits_encode(line);

    match (delta, packed) {
        (Some(d), Some(p)) => {
            let delta_wins = if d.len() != p.len() {
                d.len() < p.len()
            } else {
                active != CompressionMode::PackBits
            };
            if delta_wins {
                (RowEncoding::Delta(d), Some(CompressionMode::Delta))
            } else {
                (RowEncoding::PackBits(p), Some(CompressionMode::PackBits))
            }
        }
        (Some(d), None) => (RowEncoding::Delta(d), Some(CompressionMode::Delta)),
        (None, Some(p)) => (RowEncoding::PackBits(p), Some(CompressionMode::PackBits)),
        (None, None) => (RowEncoding::Raw, None),
    }
}

/// Delta-encode `line` against `seed`.
///
/// Each run of up to 8 differing bytes becomes a header byte holding
/// `(run_len - 1)` in the top 3 bits and an offset from the end of the
/// previous run in the low 5 bits, followed by extension offset bytes when
/// the offset reaches 31 (each adds up to 255; a trailing zero byte closes
/// an offset that lands exactly on the boundary), then the literal bytes.
///
/// Returns `None` when the encoding would not be smaller than the raw line,
/// and an empty buffer only when `line == seed`.
pub fn delta_encode(line: &[u8], seed: &[u8]) -> Option<Vec<u8>> {
    debug_assert_eq!(line.len(), seed.len());

    let mut out = Vec::new();
    let len = line.len();
    let mut i = 0;
    let mut run_base = 0; // offset reference: one past the previous run

    while i < len {
        if line[i] == seed[i] {
            i += 1;
            continue;
        }

        let start = i;
        while i < len && line[i] != seed[i] {
            i += 1;
        }

        let mut offset = start - run_base;
        let mut at = start;
        while at < i {
            let run = (i - at).min(DELTA_MAX_RUN);
            let field = offset.min(DELTA_OFFSET_MORE as usize);
            out.push((((run - 1) as u8) << 5) | field as u8);
            if field == DELTA_OFFSET_MORE as usize {
                let mut rest = offset - field;
                while rest >= 255 {
                    out.push(255);
                    rest -= 255;
                }
                out.push(rest as u8);
            }
            out.extend_from_slice(&line[at..at + run]);
            if out.len() >= len {
                return None;
            }
            at += run;
            offset = 0;
        }
        run_base = i;
    }

    Some(out)
}

/// Packbits-encode `line`.
///
/// Literal runs of 1..=128 bytes carry control `len - 1`; repeat runs of at
/// least 3 identical bytes (up to 128) carry control `1 - len` as a signed
/// byte. Shorter repeats fold into the surrounding literal. Trailing zero
/// bytes are dropped entirely because the device zero-pads short rows; an
/// all-zero line therefore encodes to zero bytes.
///
/// Returns `None` when the encoding would not be smaller than the raw line.
pub fn packbits_encode(line: &[u8]) -> Option<Vec<u8>> {
    let end = match line.iter().rposition(|&b| b != 0) {
        Some(at) => at + 1,
        None => return Some(Vec::new()),
    };
    let data = &line[..end];

    let mut out = Vec::new();
    let mut i = 0;
    while i < end {
        let run = run_len(data, i);
        if run >= PACKBITS_MIN_REPEAT {
            out.push((1i32 - run as i32) as i8 as u8);
            out.push(data[i]);
            i += run;
        } else {
            // Literal: absorb everything up to the next worthwhile repeat.
            let start = i;
            i += run;
            while i < end && i - start < PACKBITS_MAX_RUN {
                let next = run_len(data, i);
                if next >= PACKBITS_MIN_REPEAT {
                    break;
                }
                if i - start + next > PACKBITS_MAX_RUN {
                    break;
                }
                i += next;
            }
            let lit = i - start;
            out.push((lit - 1) as u8);
            out.extend_from_slice(&data[start..i]);
        }
        if out.len() >= line.len() {
            return None;
        }
    }

    Some(out)
}

// Length of the run of identical bytes starting at `at`, capped at 128.
fn run_len(data: &[u8], at: usize) -> usize {
    let mut n = 1;
    while at + n < data.len() && n < PACKBITS_MAX_RUN && data[at + n] == data[at] {
        n += 1;
    }
    n
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(row_bytes: usize, mode: CompressionMode) -> ScanState {
        ScanState::new(1, row_bytes, row_bytes as u32 * 8, mode)
    }

    #[test]
    fn delta_is_empty_iff_equal() {
        let seed = [0x12u8, 0x34, 0x56, 0x78];
        assert_eq!(delta_encode(&seed, &seed), Some(Vec::new()));

        let mut line = seed;
        line[2] = 0x00;
        let enc = delta_encode(&line, &seed).unwrap();
        assert!(!enc.is_empty());
    }

    #[test]
    fn delta_single_differing_byte() {
        // Header: run 1, offset 1; then the literal byte.
        let enc = delta_encode(&[0xFF, 0x00, 0x55, 0x66], &[0xFF, 0x01, 0x55, 0x66]).unwrap();
        assert_eq!(enc, vec![0x01, 0x00]);

        // On a 2-byte row the same run ties with raw: no gain.
        assert_eq!(delta_encode(&[0xFF, 0x00], &[0xFF, 0x01]), None);
    }

    #[test]
    fn delta_offset_extension_and_exact_multiple() {
        // A difference far enough out to need extension bytes.
        let mut seed = vec![0u8; 300];
        let mut line = seed.clone();
        line[286] = 0xAA; // offset 31 + 255 exactly: trailing zero byte
        seed[0] = 1;
        line[0] = 1; // keep the line from being all-zero
        let enc = delta_encode(&line, &seed).unwrap();
        assert_eq!(enc, vec![0x1F, 255, 0, 0xAA]);

        // Offset exactly 31 keeps the chain open with a zero byte too.
        let seed = vec![0u8; 40];
        let mut line = seed.clone();
        line[31] = 0x5A;
        let enc = delta_encode(&line, &seed).unwrap();
        assert_eq!(enc, vec![0x1F, 0, 0x5A]);
    }

    #[test]
    fn delta_splits_long_runs() {
        let seed = vec![0u8; 24];
        let line = vec![0xEEu8; 24];
        // 24 differing bytes: three full 8-byte runs with zero offsets.
        let enc = delta_encode(&line, &seed);
        // 3 headers + 24 literals = 27 >= 24, so no gain.
        assert_eq!(enc, None);
    }

    #[test]
    fn packbits_zero_line_is_empty() {
        assert_eq!(packbits_encode(&[0u8; 64]), Some(Vec::new()));
    }

    #[test]
    fn packbits_repeat_and_literal() {
        let line = [7u8, 7, 7, 7, 1, 2, 0, 0];
        // Trailing zeros dropped; run of four 7s; literal [1, 2].
        let enc = packbits_encode(&line).unwrap();
        assert_eq!(enc, vec![0xFD, 7, 0x01, 1, 2]);
    }

    #[test]
    fn packbits_short_repeat_folds_into_literal() {
        let line = [5u8, 5, 9, 9, 1, 0, 0, 0, 0, 0, 0, 0];
        let enc = packbits_encode(&line).unwrap();
        assert_eq!(enc, vec![0x04, 5, 5, 9, 9, 1]);
    }

    #[test]
    fn packbits_no_gain_on_noise() {
        let line: Vec<u8> = (1..=16).collect();
        assert_eq!(packbits_encode(&line), None);
    }

    #[test]
    fn repeat_leaves_seed_untouched() {
        let mut st = state(2, CompressionMode::Adaptive);
        let mut row = [0xFFu8, 0x00];
        // First pass installs the row as the seed.
        st.compress_row(0, &mut row.clone()).unwrap();
        let enc = st.compress_row(0, &mut row).unwrap();
        assert_eq!(enc, RowEncoding::Repeat);
    }

    #[test]
    fn zero_row_resets_seed() {
        let mut st = state(4, CompressionMode::Adaptive);
        let mut row = [0xAAu8, 0xBB, 0xCC, 0xDD];
        st.compress_row(0, &mut row).unwrap();

        let mut zeros = [0u8; 4];
        assert_eq!(st.compress_row(0, &mut zeros).unwrap(), RowEncoding::Zero);

        // Seed is now zero, so a second zero row is a repeat.
        let mut zeros = [0u8; 4];
        assert_eq!(st.compress_row(0, &mut zeros).unwrap(), RowEncoding::Repeat);
    }

    #[test]
    fn concrete_two_byte_scenario() {
        // 16-pixel 1bpp row [0xFF, 0x00] with identical seed: 0 bytes.
        let mut st = state(2, CompressionMode::Adaptive);
        st.compress_row(0, &mut [0xFF, 0x00]).unwrap();
        assert_eq!(
            st.compress_row(0, &mut [0xFF, 0x00]).unwrap(),
            RowEncoding::Repeat
        );

        // Seed second byte 0x01: delta would be 2 bytes, raw is 2 bytes;
        // output must never exceed the 2-byte raw size.
        let mut st = state(2, CompressionMode::Adaptive);
        st.compress_row(0, &mut [0xFF, 0x01]).unwrap();
        match st.compress_row(0, &mut [0xFF, 0x00]).unwrap() {
            RowEncoding::Delta(d) => assert!(d.len() <= 2),
            RowEncoding::PackBits(p) => assert!(p.len() <= 2),
            RowEncoding::Raw => {}
            other => panic!("unexpected encoding {:?}", other),
        }
    }

    #[test]
    fn idempotent_for_identical_inputs() {
        let seed0 = [1u8, 2, 3, 4, 5, 6, 7, 8];
        let row = [1u8, 2, 0, 4, 5, 0, 7, 8];

        let mut a = state(8, CompressionMode::Adaptive);
        let mut b = state(8, CompressionMode::Adaptive);
        for st in [&mut a, &mut b].iter_mut() {
            st.compress_row(0, &mut seed0.clone()).unwrap();
        }
        let ea = a.compress_row(0, &mut row.clone()).unwrap();
        let eb = b.compress_row(0, &mut row.clone()).unwrap();
        assert_eq!(ea, eb);
    }

    #[test]
    fn fixed_mode_uses_only_its_method() {
        let mut st = state(8, CompressionMode::PackBits);
        let mut row = [9u8, 9, 9, 9, 9, 9, 9, 9];
        match st.compress_row(0, &mut row).unwrap() {
            RowEncoding::PackBits(_) => {}
            other => panic!("expected packbits, got {:?}", other),
        }

        let mut st = state(8, CompressionMode::Delta);
        let mut row = [9u8, 9, 9, 9, 9, 9, 9, 9];
        match st.compress_row(0, &mut row).unwrap() {
            // Against a zero seed every byte differs: 1 header + 8 literals
            // is not smaller than 8 raw bytes.
            RowEncoding::Raw => {}
            other => panic!("expected raw fallback, got {:?}", other),
        }
    }

    #[test]
    fn block_mode_always_raw() {
        let mut st = state(4, CompressionMode::Block);
        let mut row = [0u8; 4];
        assert_eq!(st.compress_row(0, &mut row).unwrap(), RowEncoding::Raw);
    }

    #[test]
    fn last_byte_mask_hides_stride_padding() {
        // 12-bit row in 2 bytes: low 4 bits of the last byte are padding.
        let mut st = ScanState::new(1, 2, 12, CompressionMode::Adaptive);
        st.compress_row(0, &mut [0xAB, 0xC0]).unwrap();
        let mut row = [0xAB, 0xCF]; // same device bits, dirty padding
        assert_eq!(st.compress_row(0, &mut row).unwrap(), RowEncoding::Repeat);
    }

    #[test]
    fn mismatched_row_length_is_an_error() {
        let mut st = state(4, CompressionMode::Adaptive);
        let mut row = [0u8; 3];
        assert!(matches!(
            st.compress_row(0, &mut row),
            Err(Error::RowLengthMismatch { line: 3, seed: 4 })
        ));
    }
}
