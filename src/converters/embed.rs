//! Raster → SVG by embedding.
//!
//! The raster is kept as pixels inside an `<image>` element, so the output
//! scales with the document but is not traced into paths. Formats browsers
//! display natively are embedded byte-for-byte unless a resize is requested;
//! everything else is re-encoded as PNG.

use super::run_blocking;
use crate::converter::{Transform, TransformContext};
use crate::error::BoxError;
use crate::format::ImageFormat;
use crate::output::ConversionOutput;
use crate::progress::checkpoint;
use crate::request::ConversionOptions;
use crate::validation::checked_output_dimensions;
use crate::validation::params::parse_hex_color;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::imageops::FilterType;
use std::io::Cursor;
use tracing::debug;

/// Embedded as-is when no resize is needed.
const PASSTHROUGH: [ImageFormat; 4] =
    [ImageFormat::Png, ImageFormat::Jpg, ImageFormat::Gif, ImageFormat::Webp];

#[derive(Debug, Clone, Copy)]
pub struct RasterEmbed {
    from: ImageFormat,
}

impl RasterEmbed {
    pub fn new(from: ImageFormat) -> Self {
        Self { from }
    }
}

#[async_trait]
impl Transform for RasterEmbed {
    async fn transform(
        &self,
        input: &[u8],
        options: &ConversionOptions,
        ctx: &TransformContext<'_>,
    ) -> Result<ConversionOutput, BoxError> {
        ctx.report(checkpoint::TRANSFORM_STARTED);

        let from = self.from;
        let data = input.to_vec();
        let options = options.clone();
        let embedded = run_blocking("Embed", move || embed(&data, from, &options)).await?;

        ctx.report(checkpoint::TRANSFORM_DONE);
        let (w, h) = (embedded.width, embedded.height);
        Ok(ConversionOutput::text(embedded.svg, ImageFormat::Svg)
            .with_dimensions(w, h)
            .with_extra("embeddedMime", embedded.mime.into())
            .with_extra("resized", embedded.resized.into()))
    }
}

#[derive(Debug)]
struct Embedded {
    svg: String,
    width: u32,
    height: u32,
    mime: &'static str,
    resized: bool,
}

fn embed(data: &[u8], from: ImageFormat, options: &ConversionOptions) -> Result<Embedded, BoxError> {
    let img = match from.image_crate_format() {
        Some(f) => image::load_from_memory_with_format(data, f)?,
        None => image::load_from_memory(data)?,
    };
    let src = (img.width(), img.height());
    let (width, height) = checked_output_dimensions(src, from, ImageFormat::Svg, options)?;
    let resized = (width, height) != src;

    let (bytes, mime) = if !resized && PASSTHROUGH.contains(&from) {
        (data.to_vec(), from.mime_type())
    } else {
        let out = if resized {
            img.resize_exact(width, height, FilterType::Lanczos3)
        } else {
            img
        };
        let mut buf = Vec::new();
        out.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
        (buf, ImageFormat::Png.mime_type())
    };
    debug!("embedding {}x{} {mime} ({} bytes)", width, height, bytes.len());

    let background = options
        .background
        .as_deref()
        .and_then(parse_hex_color)
        .map(|[r, g, b]| {
            format!(r##"<rect width="100%" height="100%" fill="#{r:02x}{g:02x}{b:02x}"/>"##)
        })
        .unwrap_or_default();

    let svg = format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{width}" height="{height}" viewBox="0 0 {width} {height}">{background}<image width="{width}" height="{height}" preserveAspectRatio="none" href="data:{mime};base64,{}"/></svg>"#,
        STANDARD.encode(&bytes)
    );
    Ok(Embedded {
        svg,
        width,
        height,
        mime,
        resized,
    })
}
