//! SVG → raster via `resvg`.
//!
//! ## Sizing
//!
//! The document's intrinsic size comes from the parsed tree. An explicit
//! width/height wins; otherwise `dpi` scales the intrinsic size (SVG user
//! units are 96 per inch). When both width and height are given and the
//! aspect ratio is preserved, the drawing is scaled uniformly and centred on
//! the requested canvas. ICO output is capped at 256 px per side. Sizes come
//! from [`crate::validation::canvas`] and are checked before the canvas is
//! allocated.
//!
//! ## Why spawn_blocking?
//!
//! Parsing and rendering are CPU-bound and can take hundreds of milliseconds
//! for large documents; they run on the blocking pool so Tokio workers stay
//! responsive.

use super::run_blocking;
use crate::context::EngineContext;
use crate::converter::{Transform, TransformContext};
use crate::deps::FontDatabase;
use crate::error::{BoxError, ConverterError};
use crate::format::ImageFormat;
use crate::output::ConversionOutput;
use crate::progress::checkpoint;
use crate::request::ConversionOptions;
use crate::validation::checked_output_dimensions;
use crate::validation::params::parse_hex_color;
use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, RgbImage, RgbaImage};
use resvg::tiny_skia;
use resvg::usvg;
use std::io::Cursor;
use std::sync::Arc;
use tracing::debug;

const DEFAULT_JPEG_QUALITY: u8 = 90;
const WHITE: [u8; 3] = [255, 255, 255];

#[derive(Debug, Clone, Copy)]
pub struct SvgRasterizer {
    to: ImageFormat,
}

impl SvgRasterizer {
    pub fn new(to: ImageFormat) -> Self {
        Self { to }
    }
}

#[async_trait]
impl Transform for SvgRasterizer {
    fn has_heavy_dependencies(&self) -> bool {
        true
    }

    fn dependency_name(&self) -> &str {
        "fontdb"
    }

    async fn load_dependencies(&self, engine: &EngineContext) -> Result<(), BoxError> {
        engine.deps.fonts(engine.config.load_system_fonts).await?;
        Ok(())
    }

    async fn transform(
        &self,
        input: &[u8],
        options: &ConversionOptions,
        ctx: &TransformContext<'_>,
    ) -> Result<ConversionOutput, BoxError> {
        let fonts = ctx
            .engine
            .deps
            .fonts(ctx.engine.config.load_system_fonts)
            .await?;
        ctx.report(checkpoint::TRANSFORM_STARTED);

        let to = self.to;
        let data = input.to_vec();
        let options = options.clone();
        let (bytes, width, height) =
            run_blocking("Render", move || rasterize(&data, to, &options, fonts)).await?;

        ctx.report(checkpoint::TRANSFORM_DONE);
        Ok(ConversionOutput::binary(bytes, to).with_dimensions(width, height))
    }
}

fn rasterize(
    data: &[u8],
    to: ImageFormat,
    options: &ConversionOptions,
    fonts: Arc<FontDatabase>,
) -> Result<(Vec<u8>, u32, u32), BoxError> {
    // ── Step 1: Parse ────────────────────────────────────────────────────
    let opt = usvg::Options {
        fontdb: fonts,
        ..usvg::Options::default()
    };
    let tree = usvg::Tree::from_data(data, &opt)
        .map_err(|e| ConverterError::corrupted("svg", &format!("Parse error: {e}.")))?;
    let (src_w, src_h) = (
        f64::from(tree.size().width()),
        f64::from(tree.size().height()),
    );
    let intrinsic = (src_w.ceil().max(1.0) as u32, src_h.ceil().max(1.0) as u32);

    // ── Step 2: Size ─────────────────────────────────────────────────────
    let (width, height) = checked_output_dimensions(intrinsic, ImageFormat::Svg, to, options)?;

    // ── Step 3: Render ───────────────────────────────────────────────────
    let mut pixmap = tiny_skia::Pixmap::new(width, height).ok_or_else(|| {
        ConverterError::invalid_parameter("size", format!("{width}x{height}"), "a drawable canvas")
    })?;
    let fill = match options.background.as_deref().and_then(parse_hex_color) {
        Some(rgb) => Some(rgb),
        None if !to.supports_transparency() => Some(WHITE),
        None => None,
    };
    if let Some([r, g, b]) = fill {
        pixmap.fill(tiny_skia::Color::from_rgba8(r, g, b, 255));
    }

    let sx = f64::from(width) / src_w.max(f64::EPSILON);
    let sy = f64::from(height) / src_h.max(f64::EPSILON);
    let transform = if options.preserve_aspect_ratio && options.width.is_some() && options.height.is_some() {
        let s = sx.min(sy);
        let tx = (f64::from(width) - src_w * s) / 2.0;
        let ty = (f64::from(height) - src_h * s) / 2.0;
        tiny_skia::Transform::from_row(s as f32, 0.0, 0.0, s as f32, tx as f32, ty as f32)
    } else {
        tiny_skia::Transform::from_scale(sx as f32, sy as f32)
    };
    resvg::render(&tree, transform, &mut pixmap.as_mut());
    debug!("rendered {}x{} -> {}x{} for {to}", intrinsic.0, intrinsic.1, width, height);

    // ── Step 4: Encode ───────────────────────────────────────────────────
    let rgba: Vec<u8> = pixmap
        .pixels()
        .iter()
        .flat_map(|p| {
            let c = p.demultiply();
            [c.red(), c.green(), c.blue(), c.alpha()]
        })
        .collect();
    let rgba = RgbaImage::from_raw(width, height, rgba)
        .ok_or_else(|| ConverterError::conversion("Rendered buffer has an unexpected size"))?;
    let bytes = encode(rgba, to, options.quality, fill.unwrap_or(WHITE))?;
    Ok((bytes, width, height))
}

/// Drop alpha by compositing over `bg`.
fn flatten(img: &RgbaImage, bg: [u8; 3]) -> RgbImage {
    RgbImage::from_fn(img.width(), img.height(), |x, y| {
        let p = img.get_pixel(x, y).0;
        let a = u16::from(p[3]);
        let mix = |c: u8, b: u8| ((u16::from(c) * a + u16::from(b) * (255 - a) + 127) / 255) as u8;
        image::Rgb([mix(p[0], bg[0]), mix(p[1], bg[1]), mix(p[2], bg[2])])
    })
}

fn encode(img: RgbaImage, to: ImageFormat, quality: Option<u32>, bg: [u8; 3]) -> Result<Vec<u8>, BoxError> {
    let mut buf = Vec::new();
    match to {
        ImageFormat::Jpg => {
            let q = quality.map_or(DEFAULT_JPEG_QUALITY, |q| q.clamp(1, 100) as u8);
            flatten(&img, bg).write_with_encoder(JpegEncoder::new_with_quality(&mut buf, q))?;
        }
        ImageFormat::Bmp => {
            DynamicImage::ImageRgb8(flatten(&img, bg))
                .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Bmp)?;
        }
        other => {
            let format = other
                .image_crate_format()
                .ok_or_else(|| ConverterError::unsupported_format(other.as_str(), Vec::new()))?;
            DynamicImage::ImageRgba8(img).write_to(&mut Cursor::new(&mut buf), format)?;
        }
    }
    Ok(buf)
}
