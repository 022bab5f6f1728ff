//! Raster output pipeline for HP-GL/2 RTL vector plotters.
//!
//! This crate turns rasterized, halftoned page data into the compact byte
//! stream of the plotter's raster-transfer sub-language. Scanlines are
//! compressed adaptively (delta-from-seed, packbits, or verbatim, chosen
//! per row), large blits are split into memory-bounded strips, and 1bpp and
//! 4bpp surfaces are extracted bit-exact with optional 90 degree rotation.
//!
//! # Example
//!
//! ```rust
//! use rtl_raster::{CompressionMode, RowEncoding, ScanState};
//!
//! // One plane, 4-byte rows, 32 device bits wide.
//! let mut state = ScanState::new(1, 4, 32, CompressionMode::Adaptive);
//! let mut row = [0x00u8, 0xFF, 0xFF, 0x00];
//! let encoding = state.compress_row(0, &mut row).unwrap();
//! assert!(matches!(encoding, RowEncoding::Delta(_)));
//! ```
//!
//! The full pipeline is driven by [`Bander::run`], which plans strips,
//! pulls halftoned pixels from a [`StripSource`], and writes the device
//! stream into any [`OutputSink`].

mod band;
mod compress;
mod error;
mod extract;
mod rotate;
mod sink;
mod stream;

pub use crate::{
    band::{
        BandPlan, Bander, BlitParams, BlitSession, Rect, StripData, StripKind, StripSource,
        Strips, SurfaceDepth, DEFAULT_BAND_BUDGET,
    },
    compress::{
        delta_encode, packbits_encode, CompressionMode, RowEncoding, ScanState, DEFAULT_DUP_LIMIT,
    },
    error::Error,
    extract::{
        invert_row, mask_row, shift_row, Extract1bpp, Extract1bppRotated, Extract4bpp,
        Extract4bppRotated, ExtractFlags, PlaneTable, PLANES,
    },
    rotate::{
        rotate_1bpp, rotate_1bpp_group, rotate_4bpp, rotate_4bpp_group, GROUP_ROWS_1BPP,
        GROUP_ROWS_4BPP,
    },
    sink::{BlitOutcome, CancelFlag, IoSink, OutputSink},
    stream::{
        AdaptiveRow, AdaptiveWriter, BlockStream, RowStream, ADAPT_DELTA, ADAPT_DUP,
        ADAPT_PACKBITS, ADAPT_RAW, ADAPT_ZERO, DEFAULT_ADAPTIVE_BYTES, GRAPHICS_START,
        PLANE_LAST, PLANE_NEXT,
    },
};
