//! Output canvas sizing.
//!
//! Every converter that allocates pixels derives its output size here, and
//! the pipeline checks the same figure before the transform runs, so an
//! oversized request fails with `DIMENSION_EXCEEDED` instead of reaching the
//! allocator.

use super::VECTORIZE_MAX_DIMENSION;
use crate::error::ConverterError;
use crate::format::ImageFormat;
use crate::request::ConversionOptions;

/// SVG user units per inch.
pub const CSS_DPI: f64 = 96.0;

/// Largest raster canvas, in pixels (10000 × 10000).
pub const MAX_CANVAS_PIXELS: u64 = 100_000_000;

const CANVAS_SIDE: u32 = 10_000;

/// Output size for a `src`-sized input.
///
/// Both dimensions given: used as-is. One given: the other follows the source
/// aspect ratio when `keep_aspect`, otherwise stays at the source size.
pub(crate) fn fit_dimensions(
    src: (u32, u32),
    width: Option<u32>,
    height: Option<u32>,
    keep_aspect: bool,
) -> (u32, u32) {
    let (sw, sh) = (src.0.max(1), src.1.max(1));
    let scaled = |v: u32, num: u32, den: u32| {
        ((f64::from(v) * f64::from(num) / f64::from(den)).round() as u32).max(1)
    };
    match (width, height) {
        (Some(w), Some(h)) => (w, h),
        (Some(w), None) if keep_aspect => (w, scaled(sh, w, sw)),
        (Some(w), None) => (w, sh),
        (None, Some(h)) if keep_aspect => (scaled(sw, h, sh), h),
        (None, Some(h)) => (sw, h),
        (None, None) => (sw, sh),
    }
}

/// Shrink `size` to fit within `max` on both sides, keeping its ratio.
pub(crate) fn cap_dimensions(size: (u32, u32), max: u32) -> (u32, u32) {
    let (w, h) = size;
    if w <= max && h <= max {
        return size;
    }
    let ratio = f64::from(max) / f64::from(w.max(h));
    (
        ((f64::from(w) * ratio).round() as u32).clamp(1, max),
        ((f64::from(h) * ratio).round() as u32).clamp(1, max),
    )
}

/// Size of the output for a `src`-sized `from` input.
///
/// An explicit width/height wins. Otherwise `dpi` scales vector sources from
/// their intrinsic size. ICO output is shrunk to the icon ceiling.
pub fn output_dimensions(
    src: (u32, u32),
    from: ImageFormat,
    to: ImageFormat,
    options: &ConversionOptions,
) -> (u32, u32) {
    let size = match (options.dpi, options.width, options.height) {
        (Some(dpi), None, None) if from.is_vector() => {
            let k = f64::from(dpi) / CSS_DPI;
            let scale = |v: u32| (f64::from(v.max(1)) * k).round().clamp(1.0, f64::from(u32::MAX)) as u32;
            (scale(src.0), scale(src.1))
        }
        _ => fit_dimensions(src, options.width, options.height, options.preserve_aspect_ratio),
    };
    match (to, to.max_dimensions()) {
        (ImageFormat::Ico, Some((max, _))) => cap_dimensions(size, max),
        _ => size,
    }
}

/// Per-side ceiling for output of `to` made from `from`.
///
/// Raster sources going to a vector target are held to the vectorisation
/// ceiling.
pub fn output_limit(from: ImageFormat, to: ImageFormat) -> Option<(u32, u32)> {
    let (w, h) = to.max_dimensions()?;
    if to.is_vector() && !from.is_vector() {
        return Some((w.min(VECTORIZE_MAX_DIMENSION), h.min(VECTORIZE_MAX_DIMENSION)));
    }
    Some((w, h))
}

/// Reject an output size over the target's ceiling or the raster canvas budget.
pub fn check_output_dimensions(
    size: (u32, u32),
    from: ImageFormat,
    to: ImageFormat,
) -> Result<(), ConverterError> {
    let (width, height) = size;
    let exceeded = |max_width: u32, max_height: u32| ConverterError::Dimension {
        width,
        height,
        max_width,
        max_height,
        format: to.as_str().to_uppercase(),
    };
    if let Some((max_w, max_h)) = output_limit(from, to) {
        if width > max_w || height > max_h {
            return Err(exceeded(max_w, max_h));
        }
    }
    if to.image_crate_format().is_some() && u64::from(width) * u64::from(height) > MAX_CANVAS_PIXELS {
        return Err(exceeded(CANVAS_SIDE, CANVAS_SIDE));
    }
    Ok(())
}

/// Output size for a `src`-sized input, rejected when too large to allocate.
pub fn checked_output_dimensions(
    src: (u32, u32),
    from: ImageFormat,
    to: ImageFormat,
    options: &ConversionOptions,
) -> Result<(u32, u32), ConverterError> {
    let size = output_dimensions(src, from, to, options);
    check_output_dimensions(size, from, to)?;
    Ok(size)
}
