//! Content sniffing: identify a format from its bytes, never from a filename.

use crate::format::ImageFormat;

const PNG_SIGNATURE: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// How many leading bytes are inspected for text formats.
const TEXT_WINDOW: usize = 1000;

/// Detect the format of `buf` from its content signature.
pub fn detect_format(buf: &[u8]) -> Option<ImageFormat> {
    detect_binary(buf)
        .or_else(|| detect_text(buf))
        .or_else(|| detect_late_binary(buf))
}

fn u16_le(buf: &[u8], at: usize) -> Option<u16> {
    buf.get(at..at + 2).map(|b| u16::from_le_bytes([b[0], b[1]]))
}

fn u32_le(buf: &[u8], at: usize) -> Option<u32> {
    buf.get(at..at + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

fn u32_be(buf: &[u8], at: usize) -> Option<u32> {
    buf.get(at..at + 4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

/// Unambiguous magic numbers at offset zero.
fn detect_binary(buf: &[u8]) -> Option<ImageFormat> {
    if buf.starts_with(PNG_SIGNATURE) {
        return Some(ImageFormat::Png);
    }
    if buf.len() >= 4 && buf[..3] == [0xFF, 0xD8, 0xFF] && is_jpeg_marker(buf[3]) {
        return Some(ImageFormat::Jpg);
    }
    if buf.starts_with(b"GIF87a") || buf.starts_with(b"GIF89a") {
        return Some(ImageFormat::Gif);
    }
    if buf.starts_with(b"RIFF") && buf.len() >= 12 {
        match &buf[8..12] {
            b"WEBP" => return Some(ImageFormat::Webp),
            t if t.starts_with(b"CDR") || t.starts_with(b"cdr") => return Some(ImageFormat::Cdr),
            _ => {}
        }
    }
    if buf.starts_with(b"BM") && buf.len() >= 26 {
        return Some(ImageFormat::Bmp);
    }
    if buf.starts_with(b"%PDF-") {
        return Some(if has_illustrator_marker(buf) {
            ImageFormat::Ai
        } else {
            ImageFormat::Pdf
        });
    }
    if buf.starts_with(&[0x00, 0x00, 0x01, 0x00]) && buf.len() >= 6 {
        return Some(ImageFormat::Ico);
    }
    if buf.starts_with(b"II*\0") || buf.starts_with(b"MM\0*") {
        return Some(ImageFormat::Tiff);
    }
    if buf.len() >= 12 && &buf[4..8] == b"ftyp" {
        return Some(match &buf[8..12] {
            b"avif" | b"avis" => ImageFormat::Avif,
            b"heic" | b"heix" | b"hevc" | b"hevx" | b"mif1" | b"msf1" => ImageFormat::Heic,
            _ => ImageFormat::Mp4,
        });
    }
    if let Some(tag) = u32_be(buf, 0) {
        if buf.len() >= 12 && matches!(tag, 0x0001_0000 | 0x4F54_544F | 0x7472_7565 | 0x7479_7031) {
            return Some(ImageFormat::Ttf);
        }
    }
    None
}

fn is_jpeg_marker(b: u8) -> bool {
    (0xE0..=0xEF).contains(&b) || matches!(b, 0xDB | 0xC0 | 0xC2 | 0xC4 | 0xFE)
}

fn text_window(buf: &[u8]) -> String {
    String::from_utf8_lossy(&buf[..buf.len().min(TEXT_WINDOW)]).into_owned()
}

fn has_illustrator_marker(buf: &[u8]) -> bool {
    let text = text_window(buf);
    let lower = text.to_lowercase();
    text.contains("%%Creator: Adobe Illustrator")
        || text.contains("/Creator (Adobe Illustrator)")
        || text.contains("/Creator(Adobe Illustrator)")
        || text.contains("%%AI")
        || text.contains("AI9_")
        || text.contains("AI8_")
        || (text.contains("%%Title:") && text.contains(".ai"))
        || lower.contains("adobe illustrator")
}

/// Text formats, checked on the leading window only.
fn detect_text(buf: &[u8]) -> Option<ImageFormat> {
    let text = text_window(buf);
    let trimmed = text.trim_start_matches('\u{feff}').trim_start();
    let lower = trimmed.to_lowercase();

    if has_svg_root(&lower) || (lower.contains("<?xml") && lower.contains("<svg")) {
        return Some(ImageFormat::Svg);
    }
    if lower.contains("<!doctype html") || lower.contains("<html") {
        return Some(ImageFormat::Html);
    }
    if trimmed.starts_with("%!PS") {
        return Some(if trimmed.contains("%%Creator: Adobe Illustrator") {
            ImageFormat::Ai
        } else {
            ImageFormat::Eps
        });
    }
    if trimmed.contains("0\nSECTION") || trimmed.contains("0\r\nSECTION") {
        return Some(ImageFormat::Dxf);
    }
    if lower.starts_with("solid") && (lower.contains("facet normal") || lower.contains("vertex")) {
        return Some(ImageFormat::Stl);
    }
    None
}

fn has_svg_root(lower: &str) -> bool {
    lower
        .match_indices("<svg")
        .any(|(i, _)| matches!(lower[i + 4..].chars().next(), Some(c) if c.is_whitespace() || c == '>' || c == '/'))
}

/// Weaker binary heuristics, tried after the text formats.
fn detect_late_binary(buf: &[u8]) -> Option<ImageFormat> {
    // EMF: EMR_HEADER record whose size fits the buffer, " EMF" signature at 40.
    if buf.len() >= 88 && u32_le(buf, 0) == Some(1) {
        let header_size = u32_le(buf, 4).unwrap_or(0) as usize;
        if (88..=buf.len()).contains(&header_size) || buf.get(40..44) == Some(b" EMF") {
            return Some(ImageFormat::Emf);
        }
    }
    if buf.len() >= 22 {
        if u32_le(buf, 0) == Some(0x9AC6_CDD7) {
            return Some(ImageFormat::Wmf);
        }
        let mt_type = u16_le(buf, 0).unwrap_or(0);
        if matches!(mt_type, 1 | 2) && u16_le(buf, 2) == Some(9) {
            return Some(ImageFormat::Wmf);
        }
    }
    // Binary STL: 80-byte header then a plausible triangle count.
    if let Some(count) = u32_le(buf, 80) {
        let expected = 84u64 + u64::from(count) * 50;
        if count > 0 && count < 10_000_000 && buf.len() as u64 >= expected.min(1000) {
            return Some(ImageFormat::Stl);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_signatures() {
        let mut png = PNG_SIGNATURE.to_vec();
        png.extend_from_slice(&[0; 20]);
        assert_eq!(detect_format(&png), Some(ImageFormat::Png));
        assert_eq!(detect_format(&[0xFF, 0xD8, 0xFF, 0xE0, 0, 0]), Some(ImageFormat::Jpg));
        assert_eq!(detect_format(b"GIF89a\x01\x00\x01\x00"), Some(ImageFormat::Gif));
        assert_eq!(detect_format(b"RIFF\0\0\0\0WEBPVP8 "), Some(ImageFormat::Webp));
        assert_eq!(detect_format(b"II*\0\x08\0\0\0"), Some(ImageFormat::Tiff));
    }

    #[test]
    fn ftyp_brands() {
        assert_eq!(detect_format(b"\0\0\0\x20ftypisom\0\0\0\0"), Some(ImageFormat::Mp4));
        assert_eq!(detect_format(b"\0\0\0\x20ftypavif\0\0\0\0"), Some(ImageFormat::Avif));
        assert_eq!(detect_format(b"\0\0\0\x20ftypheic\0\0\0\0"), Some(ImageFormat::Heic));
    }

    #[test]
    fn pdf_and_illustrator() {
        assert_eq!(detect_format(b"%PDF-1.7\n1 0 obj"), Some(ImageFormat::Pdf));
        assert_eq!(
            detect_format(b"%PDF-1.5\n%%Creator: Adobe Illustrator 27\n"),
            Some(ImageFormat::Ai)
        );
        assert_eq!(detect_format(b"%!PS-Adobe-3.0 EPSF-3.0\n"), Some(ImageFormat::Eps));
    }

    #[test]
    fn text_formats() {
        assert_eq!(
            detect_format(b"<?xml version=\"1.0\"?>\n<svg xmlns=\"http://www.w3.org/2000/svg\"/>"),
            Some(ImageFormat::Svg)
        );
        assert_eq!(detect_format(b"<!DOCTYPE html><html></html>"), Some(ImageFormat::Html));
        assert_eq!(detect_format(b"  0\nSECTION\n  2\nHEADER\n"), Some(ImageFormat::Dxf));
        assert_eq!(
            detect_format(b"solid cube\n facet normal 0 0 1\n"),
            Some(ImageFormat::Stl)
        );
    }

    #[test]
    fn svg_root_needs_delimiter() {
        assert_eq!(detect_format(b"<svgfoo>"), None);
        assert_eq!(detect_format(b"<svg>"), Some(ImageFormat::Svg));
    }

    #[test]
    fn unknown_bytes() {
        assert_eq!(detect_format(b"hello world"), None);
        assert_eq!(detect_format(&[]), None);
    }
}
