//! Banding: splitting a large blit into memory-bounded strips and driving
//! the extract-compress-emit pipeline over each one.
//!
//! A strip never requires more working memory than the configured budget
//! (rows times bytes per device scanline), except that a strip is never
//! thinner than 8 scanlines so progress cannot stall. Strips tile the
//! destination exactly, top to bottom, or right to left across the source
//! when the device orientation is rotated 90 degrees (the rightmost source
//! column is the first device scanline).
//!
//! When a mask accompanies the bitmap, every color strip is preceded by its
//! 1bpp mask strip: the mask is merged into the background first, then the
//! halftoned color data is AND-combined over it.

use log::{debug, trace};

use crate::compress::{CompressionMode, ScanState};
use crate::error::Error;
use crate::extract::{
    Extract1bpp, Extract1bppRotated, Extract4bpp, Extract4bppRotated, ExtractFlags, PLANES,
};
use crate::sink::{BlitOutcome, CancelFlag, OutputSink};
use crate::stream::{AdaptiveRow, AdaptiveWriter, BlockStream, RowStream, DEFAULT_ADAPTIVE_BYTES};

/// Default strip memory budget.
pub const DEFAULT_BAND_BUDGET: usize = 2 * 1024 * 1024;

/// Logical operation merging a mask strip into the background.
const ROP_MERGE_MASK: i64 = 238;
/// Logical operation AND-combining color data over a merged mask.
const ROP_AND_COLOR: i64 = 136;

/// Device-space rectangle, half-open on the right and bottom.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Rect {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }

    pub fn is_empty(&self) -> bool {
        self.right <= self.left || self.bottom <= self.top
    }

    pub fn intersect(&self, other: &Rect) -> Rect {
        Rect {
            left: self.left.max(other.left),
            top: self.top.max(other.top),
            right: self.right.min(other.right),
            bottom: self.bottom.min(other.bottom),
        }
    }
}

/// Pixel depth of the halftoned color surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceDepth {
    /// 1 bit per pixel, one plane.
    One,
    /// 4 bits per pixel, split into three 1bpp planes on output.
    Four,
}

impl SurfaceDepth {
    /// Surface bytes covering `px` pixels of one row.
    pub fn row_bytes(self, px: usize) -> usize {
        match self {
            SurfaceDepth::One => (px + 7) / 8,
            SurfaceDepth::Four => (px + 1) / 2,
        }
    }

    pub fn planes(self) -> usize {
        match self {
            SurfaceDepth::One => 1,
            SurfaceDepth::Four => PLANES,
        }
    }
}

/// Strip partition of a destination rectangle under a memory budget.
#[derive(Debug)]
pub struct BandPlan {
    total: Rect,
    scan_increment: usize,
    rotated: bool,
}

impl BandPlan {
    /// Partition `total` into strips of at most `budget / bytes_per_scan`
    /// device scanlines, rounded down to a multiple of 8 and forced to a
    /// minimum of 8.
    pub fn new(
        total: Rect,
        bytes_per_scan: usize,
        budget: usize,
        rotated: bool,
    ) -> Result<Self, Error> {
        if total.is_empty() {
            return Err(Error::EmptyRect);
        }
        let mut scans = if bytes_per_scan == 0 {
            0
        } else {
            budget / bytes_per_scan
        };
        scans &= !7;
        if scans < 8 {
            // Even one 8-row strip busts the budget; take it anyway so the
            // blit makes progress.
            debug!(
                "band budget {} below an 8-scan strip ({} bytes/scan), forcing minimum",
                budget, bytes_per_scan
            );
            scans = 8;
        }
        Ok(BandPlan {
            total,
            scan_increment: scans,
            rotated,
        })
    }

    /// Device scanlines per full strip.
    pub fn scan_increment(&self) -> usize {
        self.scan_increment
    }

    pub fn strips(&self) -> Strips<'_> {
        Strips { plan: self, at: 0 }
    }
}

/// Iterator over a plan's strip rectangles, in device-scan order.
#[derive(Debug)]
pub struct Strips<'a> {
    plan: &'a BandPlan,
    at: i32,
}

impl<'a> Iterator for Strips<'a> {
    type Item = Rect;

    fn next(&mut self) -> Option<Rect> {
        let t = &self.plan.total;
        let inc = self.plan.scan_increment as i32;
        if self.plan.rotated {
            let right = t.right - self.at;
            if right <= t.left {
                return None;
            }
            let left = (right - inc).max(t.left);
            self.at += right - left;
            Some(Rect::new(left, t.top, right, t.bottom))
        } else {
            let top = t.top + self.at;
            if top >= t.bottom {
                return None;
            }
            let bottom = (top + inc).min(t.bottom);
            self.at += bottom - top;
            Some(Rect::new(t.left, top, t.right, bottom))
        }
    }
}

/// Which surface a strip is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StripKind {
    Color,
    Mask,
}

/// Halftoned pixel data for one strip.
///
/// `data` covers the strip rectangle row by row at `stride` bytes per row;
/// the strip's left edge sits `x_px` pixels into each row.
#[derive(Debug)]
pub struct StripData<'a> {
    pub data: &'a [u8],
    pub stride: usize,
    pub x_px: usize,
}

/// Upstream supplier of halftoned strip pixels.
///
/// `Mask` strips are always 1 bit per pixel, whatever the color depth.
pub trait StripSource {
    fn strip(&mut self, kind: StripKind, rect: Rect) -> Result<StripData<'_>, Error>;
}

/// Shared per-blit state guarded against re-entrant banding.
///
/// Owned by the caller and lent to [`Bander::run`] for the duration of one
/// blit; starting a second banding pass on the same session fails fast with
/// [`Error::BandingActive`] and leaves the session untouched.
#[derive(Debug, Default)]
pub struct BlitSession {
    active: bool,
}

impl BlitSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

struct ActiveGuard<'a> {
    session: &'a mut BlitSession,
}

impl<'a> ActiveGuard<'a> {
    fn begin(session: &'a mut BlitSession) -> Result<Self, Error> {
        if session.active {
            return Err(Error::BandingActive);
        }
        session.active = true;
        Ok(ActiveGuard { session })
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.session.active = false;
    }
}

/// One banded blit request.
#[derive(Debug, Clone)]
pub struct BlitParams {
    /// Destination rectangle in device coordinates.
    pub dest: Rect,
    /// Optional clip; the blit covers `dest` intersected with it.
    pub clip: Option<Rect>,
    pub depth: SurfaceDepth,
    /// Rotate the surface 90 degrees while emitting.
    pub rotate: bool,
    pub mode: CompressionMode,
    /// A 1bpp mask accompanies the color surface.
    pub has_mask: bool,
    /// Strip memory budget in bytes.
    pub budget: usize,
}

impl BlitParams {
    pub fn new(dest: Rect, depth: SurfaceDepth, mode: CompressionMode) -> Self {
        BlitParams {
            dest,
            clip: None,
            depth,
            rotate: false,
            mode,
            has_mask: false,
            budget: DEFAULT_BAND_BUDGET,
        }
    }
}

/// Drives a whole banded blit: plans strips, pulls pixel data from the
/// [`StripSource`], and pushes the compressed raster stream into the sink.
pub struct Bander;

impl Bander {
    pub fn run<Src: StripSource, S: OutputSink>(
        session: &mut BlitSession,
        params: &BlitParams,
        source: &mut Src,
        sink: &mut S,
        cancel: &CancelFlag,
    ) -> Result<BlitOutcome, Error> {
        let guard = ActiveGuard::begin(session)?;

        if params.dest.is_empty() {
            return Err(Error::EmptyRect);
        }
        let target = match &params.clip {
            Some(clip) => params.dest.intersect(clip),
            None => params.dest,
        };
        if target.is_empty() {
            // Fully clipped out: nothing to emit.
            return Ok(BlitOutcome::Completed);
        }
        if cancel.is_canceled() {
            return Ok(BlitOutcome::Canceled);
        }

        // Scanlines run along the width, or along the height when rotated.
        let (scan_px, dest_bit) = if params.rotate {
            (target.height() as usize, (target.top % 8) as u32)
        } else {
            (target.width() as usize, (target.left % 8) as u32)
        };
        let bytes_per_scan = params.depth.row_bytes(scan_px);
        let plan = BandPlan::new(target, bytes_per_scan, params.budget, params.rotate)?;
        debug!(
            "banding {}x{} at {:?}, {} scans per strip",
            target.width(),
            target.height(),
            params.depth,
            plan.scan_increment()
        );

        let width_bits = dest_bit + scan_px as u32;
        let out_bytes = (width_bits as usize + 7) / 8;
        let mut color_state = ScanState::new(
            params.depth.planes(),
            out_bytes,
            width_bits,
            params.mode,
        );
        let mut mask_state = if params.has_mask {
            Some(ScanState::new(1, out_bytes, width_bits, params.mode))
        } else {
            None
        };

        for rect in plan.strips() {
            if cancel.is_canceled() {
                return Ok(BlitOutcome::Canceled);
            }
            trace!("strip {:?}", rect);

            if let Some(mask_state) = mask_state.as_mut() {
                write_rop(sink, ROP_MERGE_MASK)?;
                let data = source.strip(StripKind::Mask, rect)?;
                let outcome = emit_mono_strip(
                    mask_state,
                    &data,
                    rect,
                    params.rotate,
                    dest_bit,
                    ExtractFlags::FLIP_BITS,
                    sink,
                    cancel,
                )?;
                if outcome == BlitOutcome::Canceled {
                    return Ok(outcome);
                }
                write_rop(sink, ROP_AND_COLOR)?;
            }

            let flags = if params.has_mask {
                ExtractFlags::PAD_ONE
            } else {
                ExtractFlags::empty()
            };
            let data = source.strip(StripKind::Color, rect)?;
            let outcome = match params.depth {
                SurfaceDepth::One => emit_mono_strip(
                    &mut color_state,
                    &data,
                    rect,
                    params.rotate,
                    dest_bit,
                    flags,
                    sink,
                    cancel,
                )?,
                SurfaceDepth::Four => emit_color_strip(
                    &mut color_state,
                    &data,
                    rect,
                    params.rotate,
                    dest_bit,
                    flags,
                    sink,
                    cancel,
                )?,
            };
            if outcome == BlitOutcome::Canceled {
                return Ok(outcome);
            }
        }

        drop(guard);
        Ok(BlitOutcome::Completed)
    }
}

fn check_strip(data: &StripData<'_>, rect: Rect) -> Result<(), Error> {
    let need = rect.height() as usize;
    let got = if data.stride == 0 {
        0
    } else {
        (data.data.len() + data.stride - 1) / data.stride
    };
    if got < need {
        return Err(Error::ShortStrip { need, got });
    }
    Ok(())
}

// 1bpp strip (color or mask), either orientation.
#[allow(clippy::too_many_arguments)]
fn emit_mono_strip<S: OutputSink>(
    state: &mut ScanState,
    data: &StripData<'_>,
    rect: Rect,
    rotate: bool,
    dest_bit: u32,
    flags: ExtractFlags,
    sink: &mut S,
    cancel: &CancelFlag,
) -> Result<BlitOutcome, Error> {
    check_strip(data, rect)?;
    let mut scan = if rotate {
        Scan1::Rot(Extract1bppRotated::new(
            data.data,
            data.stride,
            rect.width() as usize,
            rect.height() as usize,
            dest_bit,
            flags,
        )?)
    } else {
        Scan1::Flat(Extract1bpp::new(
            data.data,
            data.stride,
            data.x_px,
            rect.width() as usize,
            rect.height() as usize,
            dest_bit,
            flags,
        )?)
    };

    let scan_px = if rotate { rect.height() } else { rect.width() };
    start_raster(sink, scan_px as i64)?;
    state.reset_seeds();
    state.begin_rows(scan.rows() as u32);

    let canceled = match state.mode() {
        CompressionMode::Block => {
            let mut buf = Vec::new();
            let mut canceled = false;
            while let Some(row) = scan.next_row() {
                if cancel.is_canceled() {
                    canceled = true;
                    break;
                }
                buf.extend_from_slice(row);
            }
            if !canceled {
                BlockStream::new().write_block(sink, &buf)?;
            }
            canceled
        }
        CompressionMode::Delta | CompressionMode::PackBits => {
            let mut rows = RowStream::new(1);
            let mut canceled = false;
            while let Some(row) = scan.next_row() {
                if cancel.is_canceled() {
                    canceled = true;
                    break;
                }
                let enc = state.compress_row(0, row)?;
                rows.write_row(sink, &enc, row)?;
            }
            canceled
        }
        CompressionMode::Adaptive => {
            let mut writer = AdaptiveWriter::new(DEFAULT_ADAPTIVE_BYTES);
            let mut canceled = false;
            while let Some(row) = scan.next_row() {
                if cancel.is_canceled() {
                    canceled = true;
                    break;
                }
                let enc = state.compress_row(0, row)?;
                let class = AdaptiveRow::from_encoding(&enc, row);
                writer.push(state, sink, class)?;
            }
            if !canceled {
                writer.finish(state, sink)?;
            }
            canceled
        }
    };

    end_raster(sink)?;
    Ok(if canceled {
        BlitOutcome::Canceled
    } else {
        BlitOutcome::Completed
    })
}

// 4bpp color strip: three planes per scanline.
#[allow(clippy::too_many_arguments)]
fn emit_color_strip<S: OutputSink>(
    state: &mut ScanState,
    data: &StripData<'_>,
    rect: Rect,
    rotate: bool,
    dest_bit: u32,
    flags: ExtractFlags,
    sink: &mut S,
    cancel: &CancelFlag,
) -> Result<BlitOutcome, Error> {
    check_strip(data, rect)?;
    let mut scan = if rotate {
        Scan4::Rot(Extract4bppRotated::new(
            data.data,
            data.stride,
            rect.width() as usize,
            rect.height() as usize,
            dest_bit,
            flags,
        )?)
    } else {
        Scan4::Flat(Extract4bpp::new(
            data.data,
            data.stride,
            data.x_px,
            rect.width() as usize,
            rect.height() as usize,
            dest_bit,
            flags,
        )?)
    };

    let scan_px = if rotate { rect.height() } else { rect.width() };
    start_raster(sink, scan_px as i64)?;
    state.reset_seeds();
    state.begin_rows(scan.rows() as u32 * PLANES as u32);

    let canceled = match state.mode() {
        CompressionMode::Block => {
            let mut buf = Vec::new();
            let mut canceled = false;
            while let Some(planes) = scan.next_row() {
                if cancel.is_canceled() {
                    canceled = true;
                    break;
                }
                for plane in planes.iter() {
                    buf.extend_from_slice(plane);
                }
            }
            if !canceled {
                BlockStream::new().write_block(sink, &buf)?;
            }
            canceled
        }
        CompressionMode::Delta | CompressionMode::PackBits => {
            let mut rows = RowStream::new(PLANES);
            let mut canceled = false;
            while let Some(planes) = scan.next_row() {
                if cancel.is_canceled() {
                    canceled = true;
                    break;
                }
                for (p, plane) in planes.iter_mut().enumerate() {
                    let enc = state.compress_row(p, plane)?;
                    rows.write_row(sink, &enc, plane)?;
                }
            }
            canceled
        }
        CompressionMode::Adaptive => {
            let mut writer = AdaptiveWriter::new(DEFAULT_ADAPTIVE_BYTES);
            let mut canceled = false;
            while let Some(planes) = scan.next_row() {
                if cancel.is_canceled() {
                    canceled = true;
                    break;
                }
                for p in 0..PLANES {
                    let enc = state.compress_row(p, &mut planes[p])?;
                    let class = AdaptiveRow::from_encoding(&enc, &planes[p]);
                    writer.push(state, sink, class)?;
                }
            }
            if !canceled {
                writer.finish(state, sink)?;
            }
            canceled
        }
    };

    end_raster(sink)?;
    Ok(if canceled {
        BlitOutcome::Canceled
    } else {
        BlitOutcome::Completed
    })
}

enum Scan1<'a> {
    Flat(Extract1bpp<'a>),
    Rot(Extract1bppRotated<'a>),
}

impl<'a> Scan1<'a> {
    fn rows(&self) -> usize {
        match self {
            Scan1::Flat(s) => s.rows(),
            Scan1::Rot(s) => s.rows(),
        }
    }

    fn next_row(&mut self) -> Option<&mut [u8]> {
        match self {
            Scan1::Flat(s) => s.next_row(),
            Scan1::Rot(s) => s.next_row(),
        }
    }
}

enum Scan4<'a> {
    Flat(Extract4bpp<'a>),
    Rot(Extract4bppRotated<'a>),
}

impl<'a> Scan4<'a> {
    fn rows(&self) -> usize {
        match self {
            Scan4::Flat(s) => s.rows(),
            Scan4::Rot(s) => s.rows(),
        }
    }

    fn next_row(&mut self) -> Option<&mut [Vec<u8>; PLANES]> {
        match self {
            Scan4::Flat(s) => s.next_row(),
            Scan4::Rot(s) => s.next_row(),
        }
    }
}

fn start_raster<S: OutputSink>(sink: &mut S, scan_px: i64) -> Result<(), Error> {
    sink.push_bytes(b"\x1b*r")?;
    sink.push_num(scan_px)?;
    sink.push_bytes(b"s1A")
}

fn end_raster<S: OutputSink>(sink: &mut S) -> Result<(), Error> {
    sink.push_bytes(b"\x1b*rC")
}

fn write_rop<S: OutputSink>(sink: &mut S, rop: i64) -> Result<(), Error> {
    sink.push_bytes(b"\x1b*l")?;
    sink.push_num(rop)?;
    sink.push_bytes(b"O")
}

#[cfg(test)]
mod tests {
    use super::*;

    struct PageSource {
        page: Rect,
        color: Vec<u8>,
        mask: Vec<u8>,
        stride: usize,
    }

    impl PageSource {
        fn solid(page: Rect, depth: SurfaceDepth, byte: u8) -> Self {
            let stride = depth.row_bytes(page.width() as usize);
            let len = stride * page.height() as usize;
            PageSource {
                page,
                color: vec![byte; len],
                mask: vec![0u8; ((page.width() as usize + 7) / 8) * page.height() as usize],
                stride,
            }
        }
    }

    impl StripSource for PageSource {
        fn strip(&mut self, kind: StripKind, rect: Rect) -> Result<StripData<'_>, Error> {
            let (buf, stride) = match kind {
                StripKind::Color => (&self.color, self.stride),
                StripKind::Mask => (&self.mask, (self.page.width() as usize + 7) / 8),
            };
            let at = (rect.top - self.page.top) as usize * stride;
            Ok(StripData {
                data: &buf[at..],
                stride,
                x_px: (rect.left - self.page.left) as usize,
            })
        }
    }

    #[test]
    fn plan_rounds_down_to_multiple_of_eight() {
        let r = Rect::new(0, 0, 100, 1000);
        let plan = BandPlan::new(r, 10, 100, false).unwrap();
        assert_eq!(plan.scan_increment(), 8);

        let plan = BandPlan::new(r, 10, 250, false).unwrap();
        assert_eq!(plan.scan_increment(), 24);
    }

    #[test]
    fn plan_forces_minimum_eight_rows() {
        let r = Rect::new(0, 0, 100, 100);
        let plan = BandPlan::new(r, 1000, 10, false).unwrap();
        assert_eq!(plan.scan_increment(), 8);
    }

    #[test]
    fn strips_tile_exactly_top_to_bottom() {
        let r = Rect::new(3, 10, 40, 135);
        let plan = BandPlan::new(r, 100, 1600, false).unwrap();
        let strips: Vec<Rect> = plan.strips().collect();

        let mut expect_top = r.top;
        for s in &strips {
            assert_eq!(s.left, r.left);
            assert_eq!(s.right, r.right);
            assert_eq!(s.top, expect_top);
            assert!(s.height() as usize <= plan.scan_increment());
            expect_top = s.bottom;
        }
        assert_eq!(expect_top, r.bottom);
    }

    #[test]
    fn rotated_strips_walk_right_to_left() {
        let r = Rect::new(0, 0, 30, 64);
        let plan = BandPlan::new(r, 8, 128, true).unwrap(); // 16 scans per strip
        let strips: Vec<Rect> = plan.strips().collect();
        assert_eq!(strips.len(), 2);
        assert_eq!(strips[0], Rect::new(14, 0, 30, 64));
        assert_eq!(strips[1], Rect::new(0, 0, 14, 64));
    }

    #[test]
    fn recursion_guard_fails_fast() {
        let mut session = BlitSession::new();
        session.active = true;

        let params = BlitParams::new(
            Rect::new(0, 0, 16, 16),
            SurfaceDepth::One,
            CompressionMode::Block,
        );
        let mut src = PageSource::solid(params.dest, SurfaceDepth::One, 0xFF);
        let mut out: Vec<u8> = Vec::new();
        let err = Bander::run(&mut session, &params, &mut src, &mut out, &CancelFlag::new());
        assert!(matches!(err, Err(Error::BandingActive)));
        assert!(out.is_empty());
        assert!(session.is_active());
    }

    #[test]
    fn guard_releases_after_run() {
        let mut session = BlitSession::new();
        let params = BlitParams::new(
            Rect::new(0, 0, 16, 16),
            SurfaceDepth::One,
            CompressionMode::Block,
        );
        let mut src = PageSource::solid(params.dest, SurfaceDepth::One, 0xFF);
        let mut out: Vec<u8> = Vec::new();
        Bander::run(&mut session, &params, &mut src, &mut out, &CancelFlag::new()).unwrap();
        assert!(!session.is_active());
    }

    #[test]
    fn block_blit_emits_raster_framing() {
        let mut session = BlitSession::new();
        let params = BlitParams::new(
            Rect::new(0, 0, 16, 8),
            SurfaceDepth::One,
            CompressionMode::Block,
        );
        let mut src = PageSource::solid(params.dest, SurfaceDepth::One, 0xA5);
        let mut out: Vec<u8> = Vec::new();
        let outcome =
            Bander::run(&mut session, &params, &mut src, &mut out, &CancelFlag::new()).unwrap();
        assert_eq!(outcome, BlitOutcome::Completed);

        // Start raster, block header, 16 raw bytes, end raster.
        let mut expect: Vec<u8> = Vec::new();
        expect.extend_from_slice(b"\x1b*r16s1A");
        expect.extend_from_slice(b"\x1b*b0m16W");
        expect.extend_from_slice(&[0xA5; 16]);
        expect.extend_from_slice(b"\x1b*rC");
        assert_eq!(out, expect);
    }

    #[test]
    fn pre_canceled_blit_writes_nothing() {
        let mut session = BlitSession::new();
        let params = BlitParams::new(
            Rect::new(0, 0, 64, 64),
            SurfaceDepth::One,
            CompressionMode::Adaptive,
        );
        let mut src = PageSource::solid(params.dest, SurfaceDepth::One, 0x55);
        let mut out: Vec<u8> = Vec::new();
        let cancel = CancelFlag::new();
        cancel.cancel();
        let outcome = Bander::run(&mut session, &params, &mut src, &mut out, &cancel).unwrap();
        assert_eq!(outcome, BlitOutcome::Canceled);
        assert!(out.is_empty());
        assert!(!session.is_active());
    }

    #[test]
    fn mask_strip_precedes_color_with_rops() {
        let mut session = BlitSession::new();
        let mut params = BlitParams::new(
            Rect::new(0, 0, 16, 8),
            SurfaceDepth::One,
            CompressionMode::Block,
        );
        params.has_mask = true;
        let mut src = PageSource::solid(params.dest, SurfaceDepth::One, 0x00);
        let mut out: Vec<u8> = Vec::new();
        Bander::run(&mut session, &params, &mut src, &mut out, &CancelFlag::new()).unwrap();

        let find = |needle: &[u8]| {
            out.windows(needle.len())
                .position(|w| w == needle)
                .unwrap_or_else(|| panic!("missing {:?}", needle))
        };
        let mask_rop = find(b"\x1b*l238O");
        let color_rop = find(b"\x1b*l136O");
        assert!(mask_rop < color_rop);
    }

    #[test]
    fn clipped_out_blit_completes_without_output() {
        let mut session = BlitSession::new();
        let mut params = BlitParams::new(
            Rect::new(0, 0, 16, 16),
            SurfaceDepth::One,
            CompressionMode::Block,
        );
        params.clip = Some(Rect::new(100, 100, 200, 200));
        let mut src = PageSource::solid(params.dest, SurfaceDepth::One, 0xFF);
        let mut out: Vec<u8> = Vec::new();
        let outcome =
            Bander::run(&mut session, &params, &mut src, &mut out, &CancelFlag::new()).unwrap();
        assert_eq!(outcome, BlitOutcome::Completed);
        assert!(out.is_empty());
    }

    #[test]
    fn empty_dest_is_an_error() {
        let mut session = BlitSession::new();
        let params = BlitParams::new(
            Rect::new(10, 10, 10, 20),
            SurfaceDepth::One,
            CompressionMode::Block,
        );
        let mut src = PageSource::solid(Rect::new(0, 0, 8, 8), SurfaceDepth::One, 0);
        let mut out: Vec<u8> = Vec::new();
        let err = Bander::run(&mut session, &params, &mut src, &mut out, &CancelFlag::new());
        assert!(matches!(err, Err(Error::EmptyRect)));
        assert!(!session.is_active());
    }

    #[test]
    fn short_strip_is_reported() {
        struct Short;
        impl StripSource for Short {
            fn strip(&mut self, _: StripKind, _: Rect) -> Result<StripData<'_>, Error> {
                Ok(StripData {
                    data: &[0u8; 4],
                    stride: 2,
                    x_px: 0,
                })
            }
        }
        let mut session = BlitSession::new();
        let params = BlitParams::new(
            Rect::new(0, 0, 16, 8),
            SurfaceDepth::One,
            CompressionMode::Block,
        );
        let mut out: Vec<u8> = Vec::new();
        let err = Bander::run(&mut session, &params, &mut Short, &mut out, &CancelFlag::new());
        assert!(matches!(err, Err(Error::ShortStrip { need: 8, got: 2 })));
    }
}
