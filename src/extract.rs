//! Scanline extraction from halftoned surfaces.
//!
//! The halftone stage leaves a packed surface (1 bit per pixel, or 4 bits
//! per pixel for color devices); the extractors here carve device-aligned
//! scanlines out of an arbitrary sub-rectangle of that surface, one row per
//! call, ready for the compressor. Alignment is done bit-exact: the source
//! rectangle may start at any bit, the destination at any device bit offset,
//! and the two are reconciled with a single shift pass per row.
//!
//! 4bpp surfaces additionally split into three 1bpp planes per row (plane
//! `p` holds bit `p` of every pixel) through a 256-entry lookup table, so
//! the inner loop handles two pixels per table probe.
//!
//! The `*Rotated` variants pull their rows from the rotation engine in
//! [`crate::rotate`], one 8-row (1bpp) or 2-row (4bpp) group at a time.

use bitflags::bitflags;

use crate::error::Error;
use crate::rotate::{rotate_1bpp_group, rotate_4bpp_group, GROUP_ROWS_1BPP, GROUP_ROWS_4BPP};

bitflags! {
    /// Per-extraction row treatment.
    pub struct ExtractFlags: u32 {
        /// Invert every bit; used when the halftoned polarity is opposite
        /// to the device's ink sense (mask planes).
        const FLIP_BITS = 0b0000_0001;
        /// Fill the padding bits outside the destination window with ones
        /// instead of zeros, for planes merged with an AND raster op.
        const PAD_ONE = 0b0000_0010;
    }
}

/// Shift a packed bit row right by `shift` (0..=7) bits into `dst`,
/// carrying across byte boundaries.
///
/// `dst` may be one byte longer than `src` to receive the final carry; no
/// byte past the end of `src` is ever read.
pub fn shift_row(src: &[u8], dst: &mut [u8], shift: u32) {
    debug_assert!(shift < 8);
    debug_assert!(dst.len() >= src.len() && dst.len() <= src.len() + 1);

    if shift == 0 {
        dst[..src.len()].copy_from_slice(src);
        if dst.len() > src.len() {
            dst[src.len()] = 0;
        }
        return;
    }

    let mut carry = 0u8;
    for (d, &s) in dst.iter_mut().zip(src.iter()) {
        *d = carry | (s >> shift);
        carry = s << (8 - shift);
    }
    if dst.len() > src.len() {
        dst[src.len()] = carry;
    }
}

// Left-shift counterpart for destinations less aligned than the source;
// reads at most `dst.len() + 1` source bytes and never past the end.
fn shift_row_left(src: &[u8], dst: &mut [u8], shift: u32) {
    debug_assert!(shift >= 1 && shift < 8);
    for (j, d) in dst.iter_mut().enumerate() {
        let hi = src[j] << shift;
        let lo = match src.get(j + 1) {
            Some(&b) => b >> (8 - shift),
            None => 0,
        };
        *d = hi | lo;
    }
}

/// Invert a row in place.
pub fn invert_row(row: &mut [u8]) {
    for b in row.iter_mut() {
        *b = !*b;
    }
}

/// Clamp the padding bits outside the destination window.
///
/// `first_mask`/`last_mask` select the window bits in the first and last
/// byte. Padding is forced to zero, or to one when `pad_one` is set.
pub fn mask_row(row: &mut [u8], first_mask: u8, last_mask: u8, pad_one: bool) {
    if row.is_empty() {
        return;
    }
    if row.len() == 1 {
        let mask = first_mask & last_mask;
        row[0] = apply_mask(row[0], mask, pad_one);
        return;
    }
    row[0] = apply_mask(row[0], first_mask, pad_one);
    let last = row.len() - 1;
    row[last] = apply_mask(row[last], last_mask, pad_one);
}

fn apply_mask(byte: u8, mask: u8, pad_one: bool) -> u8 {
    if pad_one {
        byte | !mask
    } else {
        byte & mask
    }
}

// Destination window geometry shared by all extractors.
#[derive(Debug, Clone, Copy)]
struct Window {
    offset: u32, // destination bit offset, 0..8
    out_bytes: usize,
    first_mask: u8,
    last_mask: u8,
}

impl Window {
    fn new(dest_bit: u32, width_bits: usize) -> Self {
        let offset = dest_bit % 8;
        let total = offset as usize + width_bits;
        let rem = (total % 8) as u8;
        Window {
            offset,
            out_bytes: (total + 7) / 8,
            first_mask: 0xFFu8 >> offset,
            last_mask: if rem == 0 { 0xFF } else { 0xFFu8 << (8 - rem) },
        }
    }

    fn finish_row(&self, row: &mut [u8], flags: ExtractFlags) {
        if flags.contains(ExtractFlags::FLIP_BITS) {
            invert_row(row);
        }
        mask_row(
            row,
            self.first_mask,
            self.last_mask,
            flags.contains(ExtractFlags::PAD_ONE),
        );
    }
}

// Align one packed source row to the destination bit offset.
fn align_row(src: &[u8], line: &mut [u8], src_bit: u32, dest_offset: u32) {
    if dest_offset >= src_bit {
        shift_row(src, line, dest_offset - src_bit);
    } else {
        shift_row_left(src, line, src_bit - dest_offset);
    }
}

/// Row-by-row extractor for a 1bpp surface rectangle.
///
/// Each [`Extract1bpp::next_row`] call yields one device-aligned scanline of
/// [`Extract1bpp::out_bytes`] bytes, shifted, optionally inverted, and with
/// its padding bits clamped.
#[derive(Debug)]
pub struct Extract1bpp<'a> {
    data: &'a [u8],
    stride: usize,
    src_first: usize, // byte of the leftmost source bit in each row
    src_bit: u32,     // bit offset within that byte
    src_bytes: usize, // source bytes covering the row window
    rows: usize,
    row: usize,
    window: Window,
    flags: ExtractFlags,
    line: Vec<u8>,
}

impl<'a> Extract1bpp<'a> {
    /// Extract `rows` rows of `width_bits` starting at source bit `src_x`
    /// of `data` (row pitch `stride`), aligned to destination bit `dest_bit`.
    pub fn new(
        data: &'a [u8],
        stride: usize,
        src_x: usize,
        width_bits: usize,
        rows: usize,
        dest_bit: u32,
        flags: ExtractFlags,
    ) -> Result<Self, Error> {
        if width_bits == 0 || rows == 0 {
            return Err(Error::EmptyRect);
        }
        let src_first = src_x / 8;
        let src_bit = (src_x % 8) as u32;
        let src_bytes = (src_bit as usize + width_bits + 7) / 8;
        if src_first + src_bytes > stride {
            return Err(Error::BufferTooSmall {
                need: src_first + src_bytes,
                have: stride,
            });
        }
        let need = (rows - 1) * stride + src_first + src_bytes;
        if data.len() < need {
            return Err(Error::BufferTooSmall {
                need,
                have: data.len(),
            });
        }
        let window = Window::new(dest_bit, width_bits);
        Ok(Extract1bpp {
            data,
            stride,
            src_first,
            src_bit,
            src_bytes,
            rows,
            row: 0,
            line: vec![0u8; window.out_bytes],
            window,
            flags,
        })
    }

    /// Bytes in every extracted scanline.
    pub fn out_bytes(&self) -> usize {
        self.window.out_bytes
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Produce the next scanline, or `None` after the last row.
    pub fn next_row(&mut self) -> Option<&mut [u8]> {
        if self.row == self.rows {
            return None;
        }
        let at = self.row * self.stride + self.src_first;
        let src = &self.data[at..at + self.src_bytes];
        align_row(src, &mut self.line, self.src_bit, self.window.offset);
        self.window.finish_row(&mut self.line, self.flags);
        self.row += 1;
        Some(&mut self.line)
    }
}

/// 1bpp extractor that rotates the fragment 90 degrees while reading it.
///
/// Output rows run down the rotated image: `width_bits` rows of `height`
/// bits each, the rightmost source column first. Groups of 8 rotated rows
/// are produced on demand, so memory stays bounded by one group regardless
/// of fragment size.
#[derive(Debug)]
pub struct Extract1bppRotated<'a> {
    data: &'a [u8],
    stride: usize,
    height: usize,
    width_bits: usize,
    group: Vec<u8>,
    group_stride: usize,
    emitted: usize,
    window: Window,
    flags: ExtractFlags,
    line: Vec<u8>,
}

impl<'a> Extract1bppRotated<'a> {
    pub fn new(
        data: &'a [u8],
        stride: usize,
        width_bits: usize,
        height: usize,
        dest_bit: u32,
        flags: ExtractFlags,
    ) -> Result<Self, Error> {
        if width_bits == 0 || height == 0 {
            return Err(Error::EmptyRect);
        }
        let need = (height - 1) * stride + (width_bits + 7) / 8;
        if data.len() < need {
            return Err(Error::BufferTooSmall {
                need,
                have: data.len(),
            });
        }
        let group_stride = (height + 7) / 8;
        let window = Window::new(dest_bit, height);
        Ok(Extract1bppRotated {
            data,
            stride,
            height,
            width_bits,
            group: vec![0u8; GROUP_ROWS_1BPP * group_stride],
            group_stride,
            emitted: 0,
            line: vec![0u8; window.out_bytes],
            window,
            flags,
        })
    }

    pub fn out_bytes(&self) -> usize {
        self.window.out_bytes
    }

    /// Rotated row count.
    pub fn rows(&self) -> usize {
        self.width_bits
    }

    pub fn next_row(&mut self) -> Option<&mut [u8]> {
        if self.emitted == self.width_bits {
            return None;
        }
        // Device rows walk source columns right to left.
        let col = self.width_bits - 1 - self.emitted;
        if self.emitted == 0 || col % GROUP_ROWS_1BPP == GROUP_ROWS_1BPP - 1 {
            // All rows of the previous group are consumed; rotate the next
            // source byte column. The geometry is checked in `new`, so a
            // failure here is a bug and must not truncate the row stream.
            if let Err(e) = rotate_1bpp_group(
                self.data,
                self.stride,
                self.height,
                col / GROUP_ROWS_1BPP,
                &mut self.group,
                self.group_stride,
            ) {
                unreachable!("group rotation rejected validated geometry: {}", e);
            }
        }
        let at = (col % GROUP_ROWS_1BPP) * self.group_stride;
        let src = &self.group[at..at + self.group_stride];
        align_row(src, &mut self.line, 0, self.window.offset);
        self.window.finish_row(&mut self.line, self.flags);
        self.emitted += 1;
        Some(&mut self.line)
    }
}

/// Lookup table splitting a packed 4bpp byte (two pixels) into per-plane
/// bit pairs.
///
/// Entry `[byte][p]` holds bit `p` of the left pixel in bit 1 and of the
/// right pixel in bit 0. Plane 0 is the lowest pixel bit.
#[derive(Debug)]
pub struct PlaneTable([[u8; 3]; 256]);

/// Color planes per 4bpp pixel.
pub const PLANES: usize = 3;

impl PlaneTable {
    pub fn new() -> Self {
        let mut table = [[0u8; 3]; 256];
        for (byte, entry) in table.iter_mut().enumerate() {
            let hi = (byte >> 4) as u8;
            let lo = (byte & 0x0F) as u8;
            for (p, cell) in entry.iter_mut().enumerate() {
                *cell = (((hi >> p) & 1) << 1) | ((lo >> p) & 1);
            }
        }
        PlaneTable(table)
    }

    #[inline]
    pub fn pair(&self, byte: u8, plane: usize) -> u8 {
        self.0[byte as usize][plane]
    }
}

impl Default for PlaneTable {
    fn default() -> Self {
        Self::new()
    }
}

// Split `width_px` packed pixels into 3 bit-0-aligned plane rows. `get`
// returns the i-th nibble-aligned source byte of the window.
fn split_planes<F: Fn(usize) -> u8>(
    table: &PlaneTable,
    get: F,
    width_px: usize,
    planes: &mut [Vec<u8>; PLANES],
) {
    let src_bytes = (width_px + 1) / 2;
    let out_bytes = (width_px + 7) / 8;
    for j in 0..out_bytes {
        let mut acc = [0u8; PLANES];
        for k in 0..4 {
            let i = j * 4 + k;
            if i >= src_bytes {
                break;
            }
            let byte = get(i);
            let shift = 6 - 2 * k;
            for (p, a) in acc.iter_mut().enumerate() {
                *a |= table.pair(byte, p) << shift;
            }
        }
        for (p, a) in acc.iter().enumerate() {
            planes[p][j] = *a;
        }
    }
}

/// Row-by-row extractor for a 4bpp surface rectangle, yielding three 1bpp
/// plane rows per source row.
///
/// The source window is aligned to whole nibbles by carrying across byte
/// boundaries when `src_x` is odd, then each plane row is shifted and
/// clamped exactly like the 1bpp path.
#[derive(Debug)]
pub struct Extract4bpp<'a> {
    data: &'a [u8],
    stride: usize,
    src_x: usize,
    width_px: usize,
    row_cols: usize, // source bytes covering the row window
    rows: usize,
    row: usize,
    table: PlaneTable,
    window: Window,
    flags: ExtractFlags,
    aligned: [Vec<u8>; PLANES],
    lines: [Vec<u8>; PLANES],
}

impl<'a> Extract4bpp<'a> {
    pub fn new(
        data: &'a [u8],
        stride: usize,
        src_x: usize,
        width_px: usize,
        rows: usize,
        dest_bit: u32,
        flags: ExtractFlags,
    ) -> Result<Self, Error> {
        if width_px == 0 || rows == 0 {
            return Err(Error::EmptyRect);
        }
        // Odd alignment reads one extra byte for the carried nibble.
        let last_px = src_x + width_px - 1;
        let need_cols = last_px / 2 + 1;
        if need_cols > stride {
            return Err(Error::BufferTooSmall {
                need: need_cols,
                have: stride,
            });
        }
        let need = (rows - 1) * stride + need_cols;
        if data.len() < need {
            return Err(Error::BufferTooSmall {
                need,
                have: data.len(),
            });
        }
        let window = Window::new(dest_bit, width_px);
        let aligned_bytes = (width_px + 7) / 8;
        Ok(Extract4bpp {
            data,
            stride,
            src_x,
            width_px,
            row_cols: need_cols,
            rows,
            row: 0,
            table: PlaneTable::new(),
            flags,
            aligned: [
                vec![0u8; aligned_bytes],
                vec![0u8; aligned_bytes],
                vec![0u8; aligned_bytes],
            ],
            lines: [
                vec![0u8; window.out_bytes],
                vec![0u8; window.out_bytes],
                vec![0u8; window.out_bytes],
            ],
            window,
        })
    }

    pub fn out_bytes(&self) -> usize {
        self.window.out_bytes
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Produce the three plane rows of the next source row.
    pub fn next_row(&mut self) -> Option<&mut [Vec<u8>; PLANES]> {
        if self.row == self.rows {
            return None;
        }
        // Only the window bytes; the final row may stop short of the
        // stride.
        let at = self.row * self.stride;
        let src_row = &self.data[at..at + self.row_cols];
        let base = self.src_x / 2;
        let odd = self.src_x % 2 == 1;
        split_planes(
            &self.table,
            |i| {
                if odd {
                    let lo = match src_row.get(base + i + 1) {
                        Some(&b) => b >> 4,
                        None => 0,
                    };
                    (src_row[base + i] << 4) | lo
                } else {
                    src_row[base + i]
                }
            },
            self.width_px,
            &mut self.aligned,
        );
        for p in 0..PLANES {
            align_row(&self.aligned[p], &mut self.lines[p], 0, self.window.offset);
            self.window.finish_row(&mut self.lines[p], self.flags);
        }
        self.row += 1;
        Some(&mut self.lines)
    }
}

/// 4bpp extractor with rotation, yielding three plane rows per rotated
/// row. Rotated rows are `height` pixels long, rightmost source pixel
/// column first, and arrive in groups of 2 from the rotation engine.
#[derive(Debug)]
pub struct Extract4bppRotated<'a> {
    data: &'a [u8],
    stride: usize,
    height: usize,
    width_px: usize,
    group: Vec<u8>,
    group_stride: usize,
    emitted: usize,
    table: PlaneTable,
    window: Window,
    flags: ExtractFlags,
    aligned: [Vec<u8>; PLANES],
    lines: [Vec<u8>; PLANES],
}

impl<'a> Extract4bppRotated<'a> {
    pub fn new(
        data: &'a [u8],
        stride: usize,
        width_px: usize,
        height: usize,
        dest_bit: u32,
        flags: ExtractFlags,
    ) -> Result<Self, Error> {
        if width_px == 0 || height == 0 {
            return Err(Error::EmptyRect);
        }
        let need = (height - 1) * stride + (width_px + 1) / 2;
        if data.len() < need {
            return Err(Error::BufferTooSmall {
                need,
                have: data.len(),
            });
        }
        let group_stride = (height + 1) / 2;
        let window = Window::new(dest_bit, height);
        let aligned_bytes = (height + 7) / 8;
        Ok(Extract4bppRotated {
            data,
            stride,
            height,
            width_px,
            group: vec![0u8; GROUP_ROWS_4BPP * group_stride],
            group_stride,
            emitted: 0,
            table: PlaneTable::new(),
            flags,
            aligned: [
                vec![0u8; aligned_bytes],
                vec![0u8; aligned_bytes],
                vec![0u8; aligned_bytes],
            ],
            lines: [
                vec![0u8; window.out_bytes],
                vec![0u8; window.out_bytes],
                vec![0u8; window.out_bytes],
            ],
            window,
        })
    }

    pub fn out_bytes(&self) -> usize {
        self.window.out_bytes
    }

    /// Rotated row count.
    pub fn rows(&self) -> usize {
        self.width_px
    }

    pub fn next_row(&mut self) -> Option<&mut [Vec<u8>; PLANES]> {
        if self.emitted == self.width_px {
            return None;
        }
        let col = self.width_px - 1 - self.emitted;
        if self.emitted == 0 || col % GROUP_ROWS_4BPP == GROUP_ROWS_4BPP - 1 {
            // Checked in `new`; see the 1bpp variant.
            if let Err(e) = rotate_4bpp_group(
                self.data,
                self.stride,
                self.height,
                col / GROUP_ROWS_4BPP,
                &mut self.group,
                self.group_stride,
            ) {
                unreachable!("group rotation rejected validated geometry: {}", e);
            }
        }
        let at = (col % GROUP_ROWS_4BPP) * self.group_stride;
        let row = &self.group[at..at + self.group_stride];
        split_planes(&self.table, |i| row[i], self.height, &mut self.aligned);
        for p in 0..PLANES {
            align_row(&self.aligned[p], &mut self.lines[p], 0, self.window.offset);
            self.window.finish_row(&mut self.lines[p], self.flags);
        }
        self.emitted += 1;
        Some(&mut self.lines)
    }
}
