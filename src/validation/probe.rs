//! Read declared pixel dimensions without decoding the whole image.

use crate::format::ImageFormat;
use once_cell::sync::Lazy;
use regex::Regex;
use std::io::Cursor;

static RE_SVG_ROOT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<svg\b([^>]*)>").unwrap());
static RE_WIDTH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)\swidth\s*=\s*["']\s*([\d.]+)\s*(px)?\s*["']"#).unwrap());
static RE_HEIGHT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)\sheight\s*=\s*["']\s*([\d.]+)\s*(px)?\s*["']"#).unwrap());
static RE_VIEWBOX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)viewbox\s*=\s*["']\s*[-\d.]+[\s,]+[-\d.]+[\s,]+([\d.]+)[\s,]+([\d.]+)\s*["']"#)
        .unwrap()
});

/// Declared `(width, height)` in pixels, when the format carries them and
/// the header is readable.
pub fn dimensions(format: ImageFormat, buf: &[u8]) -> Option<(u32, u32)> {
    match format {
        ImageFormat::Svg => svg_dimensions(&String::from_utf8_lossy(buf)),
        f if f.is_decodable_raster() => raster_dimensions(f, buf),
        _ => None,
    }
}

fn raster_dimensions(format: ImageFormat, buf: &[u8]) -> Option<(u32, u32)> {
    let reader = match format.image_crate_format() {
        Some(f) => image::ImageReader::with_format(Cursor::new(buf), f),
        None => image::ImageReader::new(Cursor::new(buf)).with_guessed_format().ok()?,
    };
    reader.into_dimensions().ok()
}

fn parse_px(raw: &str) -> Option<u32> {
    let v: f64 = raw.parse().ok()?;
    (v.is_finite() && v > 0.0).then(|| v.ceil() as u32)
}

/// Dimensions of an SVG document from its root `width`/`height` attributes,
/// falling back to the `viewBox`. Percentages and other units are ignored.
pub fn svg_dimensions(text: &str) -> Option<(u32, u32)> {
    let root = RE_SVG_ROOT.captures(text)?.get(1)?.as_str();
    let root = format!(" {root}");
    let attr = |re: &Regex| re.captures(&root).and_then(|c| parse_px(c.get(1)?.as_str()));
    let view_box = RE_VIEWBOX
        .captures(&root)
        .and_then(|c| Some((parse_px(c.get(1)?.as_str())?, parse_px(c.get(2)?.as_str())?)));

    match (attr(&RE_WIDTH), attr(&RE_HEIGHT), view_box) {
        (Some(w), Some(h), _) => Some((w, h)),
        (Some(w), None, Some((vw, vh))) => Some((w, scale(vh, w, vw))),
        (None, Some(h), Some((vw, vh))) => Some((scale(vw, h, vh), h)),
        (_, _, Some(vb)) => Some(vb),
        _ => None,
    }
}

fn scale(value: u32, num: u32, den: u32) -> u32 {
    ((u64::from(value) * u64::from(num)) / u64::from(den.max(1))).max(1) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn svg_attributes() {
        assert_eq!(
            svg_dimensions(r#"<svg xmlns="x" width="120" height="80px"></svg>"#),
            Some((120, 80))
        );
    }

    #[test]
    fn svg_viewbox_fallback() {
        assert_eq!(svg_dimensions(r#"<svg viewBox="0 0 300 150"></svg>"#), Some((300, 150)));
        assert_eq!(
            svg_dimensions(r#"<svg width="600" viewBox="0,0,300,150"></svg>"#),
            Some((600, 300))
        );
    }

    #[test]
    fn svg_percentages_are_unknown() {
        assert_eq!(svg_dimensions(r#"<svg width="100%" height="100%"></svg>"#), None);
    }

    #[test]
    fn stroke_width_is_not_width() {
        assert_eq!(
            svg_dimensions(r#"<svg stroke-width="3" viewBox="0 0 10 20"></svg>"#),
            Some((10, 20))
        );
    }

    #[test]
    fn png_header() {
        let img = image::RgbaImage::new(7, 3);
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
        assert_eq!(dimensions(ImageFormat::Png, buf.get_ref()), Some((7, 3)));
    }
}
