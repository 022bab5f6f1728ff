//! Rotation of bitmap fragments by 90 degrees.
//!
//! Landscape output is produced by rotating the halftoned surface while it
//! is being extracted, never by re-halftoning. A source pixel at column `x`,
//! row `y` of a `W`-column fragment lands at output row `W - 1 - x`, output
//! column `y`: the rightmost source column becomes the first device
//! scanline, read top to bottom, so rotated strips advance right to left
//! across the source while the device consumes rows in its natural order.
//!
//! Work proceeds one *group* at a time: a group is one source byte column,
//! which rotates into 8 complete output rows at 1bpp (one per source bit)
//! or 2 at 4bpp (one per nibble pixel). The extractor asks for the next
//! group exactly when it has consumed the rotated rows of the previous one,
//! so the scratch buffer stays 8 rows deep no matter how large the fragment
//! is. Within a group, row `k` holds source column `8 * group + k`; the
//! caller walks them in descending `k` to keep device order.

use crate::error::Error;

/// Rotated output rows produced per 1bpp group.
pub const GROUP_ROWS_1BPP: usize = 8;
/// Rotated output rows produced per 4bpp group.
pub const GROUP_ROWS_4BPP: usize = 2;

/// Rotate one 1bpp source byte column into 8 output rows.
///
/// `out` is zeroed and filled with `8 * out_stride` bytes, one `out_stride`
/// run per output row; row `k` is source column `8 * group + k` read top to
/// bottom. Rows past the fragment width hold zeros and are skipped by the
/// caller. `out_stride` must cover `height` bits.
pub fn rotate_1bpp_group(
    src: &[u8],
    src_stride: usize,
    height: usize,
    group: usize,
    out: &mut [u8],
    out_stride: usize,
) -> Result<(), Error> {
    let need_out = GROUP_ROWS_1BPP * out_stride;
    if out.len() < need_out || out_stride < (height + 7) / 8 {
        return Err(Error::BufferTooSmall {
            need: need_out.max(GROUP_ROWS_1BPP * ((height + 7) / 8)),
            have: out.len(),
        });
    }
    if height == 0 {
        return Err(Error::EmptyRect);
    }
    let need_src = (height - 1) * src_stride + group + 1;
    if src.len() < need_src {
        return Err(Error::BufferTooSmall {
            need: need_src,
            have: src.len(),
        });
    }

    for b in out[..need_out].iter_mut() {
        *b = 0;
    }

    for r in 0..height {
        let byte = src[r * src_stride + group];
        if byte == 0 {
            continue;
        }
        let out_byte = r / 8;
        let out_bit = 0x80u8 >> (r % 8);
        for k in 0..8 {
            if byte & (0x80 >> k) != 0 {
                out[k * out_stride + out_byte] |= out_bit;
            }
        }
    }
    Ok(())
}

/// Rotate one 4bpp source byte column (two pixel columns) into 2 output
/// rows. The high nibble of every byte is the leftmost of its two pixels;
/// row 0 of the group is source pixel column `2 * group`.
pub fn rotate_4bpp_group(
    src: &[u8],
    src_stride: usize,
    height: usize,
    group: usize,
    out: &mut [u8],
    out_stride: usize,
) -> Result<(), Error> {
    let need_out = GROUP_ROWS_4BPP * out_stride;
    if out.len() < need_out || out_stride < (height + 1) / 2 {
        return Err(Error::BufferTooSmall {
            need: need_out.max(GROUP_ROWS_4BPP * ((height + 1) / 2)),
            have: out.len(),
        });
    }
    if height == 0 {
        return Err(Error::EmptyRect);
    }
    let need_src = (height - 1) * src_stride + group + 1;
    if src.len() < need_src {
        return Err(Error::BufferTooSmall {
            need: need_src,
            have: src.len(),
        });
    }

    for b in out[..need_out].iter_mut() {
        *b = 0;
    }

    for r in 0..height {
        let byte = src[r * src_stride + group];
        let shift = if r % 2 == 0 { 4 } else { 0 };
        let out_byte = r / 2;
        // High nibble is the left pixel of the pair.
        out[out_byte] |= (byte >> 4) << shift;
        out[out_stride + out_byte] |= (byte & 0x0F) << shift;
    }
    Ok(())
}

/// Rotate a whole 1bpp fragment. Mostly a test and small-fragment
/// convenience; banding drives the group functions directly.
pub fn rotate_1bpp(
    src: &[u8],
    src_stride: usize,
    width_bits: usize,
    height: usize,
    dst: &mut [u8],
    dst_stride: usize,
) -> Result<(), Error> {
    let need = width_bits * dst_stride;
    if dst.len() < need {
        return Err(Error::BufferTooSmall {
            need,
            have: dst.len(),
        });
    }

    let groups = (width_bits + 7) / 8;
    let mut scratch = vec![0u8; GROUP_ROWS_1BPP * dst_stride];
    for g in 0..groups {
        rotate_1bpp_group(src, src_stride, height, g, &mut scratch, dst_stride)?;
        let cols = (width_bits - g * 8).min(GROUP_ROWS_1BPP);
        for k in 0..cols {
            let at = (width_bits - 1 - (g * 8 + k)) * dst_stride;
            dst[at..at + dst_stride].copy_from_slice(&scratch[k * dst_stride..(k + 1) * dst_stride]);
        }
    }
    Ok(())
}

/// Rotate a whole 4bpp fragment. `width_px` counts pixels, two per source
/// byte.
pub fn rotate_4bpp(
    src: &[u8],
    src_stride: usize,
    width_px: usize,
    height: usize,
    dst: &mut [u8],
    dst_stride: usize,
) -> Result<(), Error> {
    let need = width_px * dst_stride;
    if dst.len() < need {
        return Err(Error::BufferTooSmall {
            need,
            have: dst.len(),
        });
    }

    let groups = (width_px + 1) / 2;
    let mut scratch = vec![0u8; GROUP_ROWS_4BPP * dst_stride];
    for g in 0..groups {
        rotate_4bpp_group(src, src_stride, height, g, &mut scratch, dst_stride)?;
        let cols = (width_px - g * 2).min(GROUP_ROWS_4BPP);
        for k in 0..cols {
            let at = (width_px - 1 - (g * 2 + k)) * dst_stride;
            dst[at..at + dst_stride].copy_from_slice(&scratch[k * dst_stride..(k + 1) * dst_stride]);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bit(buf: &[u8], stride: usize, x: usize, y: usize) -> bool {
        buf[y * stride + x / 8] & (0x80 >> (x % 8)) != 0
    }

    fn pixel(buf: &[u8], stride: usize, x: usize, y: usize) -> u8 {
        let b = buf[y * stride + x / 2];
        if x % 2 == 0 {
            b >> 4
        } else {
            b & 0x0F
        }
    }

    #[test]
    fn single_bit_lands_rotated() {
        // 16x4 fragment with one bit at (x=9, y=1): lands at row 6, col 1.
        let mut src = [0u8; 8];
        src[1 * 2 + 1] = 0x40;
        let mut dst = [0u8; 16];
        rotate_1bpp(&src, 2, 16, 4, &mut dst, 1).unwrap();

        for x in 0..4 {
            for y in 0..16 {
                let hit = bit(&dst, 1, x, y);
                assert_eq!(hit, x == 1 && y == 6, "at ({}, {})", x, y);
            }
        }
    }

    #[test]
    fn double_rotation_is_half_turn() {
        let src: Vec<u8> = vec![0b1100_0101, 0b0010_1110, 0b1000_0001, 0b0111_1010];
        // 8x4 -> rotate -> 4x8 -> rotate -> 8x4 upside down and mirrored.
        let mut once = vec![0u8; 8];
        rotate_1bpp(&src, 1, 8, 4, &mut once, 1).unwrap();
        let mut twice = vec![0u8; 4];
        rotate_1bpp(&once, 1, 4, 8, &mut twice, 1).unwrap();

        for y in 0..4 {
            for x in 0..8 {
                assert_eq!(
                    bit(&src, 1, x, y),
                    bit(&twice, 1, 7 - x, 3 - y),
                    "at ({}, {})",
                    x,
                    y
                );
            }
        }
    }

    #[test]
    fn group_rows_match_whole_rotation() {
        // 16x8: group 1 holds columns 8..16, which are output rows 7..=0.
        let src: Vec<u8> = (0u8..16).map(|i| i.wrapping_mul(37) ^ 0x5C).collect();
        let mut whole = vec![0u8; 16];
        rotate_1bpp(&src, 2, 16, 8, &mut whole, 1).unwrap();

        let mut group = [0u8; 8];
        rotate_1bpp_group(&src, 2, 8, 1, &mut group, 1).unwrap();
        for k in 0..8 {
            assert_eq!(whole[15 - (8 + k)], group[k], "column {}", 8 + k);
        }
    }

    #[test]
    fn rotate_4bpp_pixels() {
        // 4x2 pixel fragment, distinct nibbles.
        let src = [0x12u8, 0x34, 0x56, 0x78];
        let mut dst = [0u8; 4];
        rotate_4bpp(&src, 2, 4, 2, &mut dst, 1).unwrap();

        for x in 0..4 {
            for y in 0..2 {
                let want = pixel(&src, 2, x, y);
                // (x, y) -> (row 3 - x, col y)
                assert_eq!(pixel(&dst, 1, y, 3 - x), want, "pixel ({}, {})", x, y);
            }
        }
    }

    #[test]
    fn undersized_output_is_rejected() {
        let src = [0u8; 8];
        let mut dst = [0u8; 4];
        assert!(matches!(
            rotate_1bpp_group(&src, 1, 8, 0, &mut dst, 1),
            Err(Error::BufferTooSmall { .. })
        ));
    }
}
