//! Format-specific structural checks run after sniffing and the size check.

use crate::format::ImageFormat;
use once_cell::sync::Lazy;
use regex::bytes::Regex;

static PDF_HEADER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^%PDF-\d\.\d").unwrap());
static HTML_MARKUP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<\s*[a-z!][^>]*>").unwrap());

/// Outcome of a failed structural check.
#[derive(Debug, Clone, PartialEq)]
pub enum StructureIssue {
    /// The file is not a usable instance of the format at all.
    Invalid(String),
    /// The file is recognisably the format but damaged; a repair may help.
    Corrupted(String),
}

pub fn check(format: ImageFormat, buf: &[u8]) -> Result<(), StructureIssue> {
    match format {
        ImageFormat::Svg => check_svg(buf),
        ImageFormat::Png => check_png(buf),
        ImageFormat::Jpg => check_jpeg(buf),
        ImageFormat::Gif if buf.len() < 10 => {
            Err(invalid("GIF file is too small to be valid."))
        }
        ImageFormat::Pdf => check_pdf(buf),
        ImageFormat::Mp4 => check_mp4(buf),
        ImageFormat::Html => {
            if HTML_MARKUP.is_match(buf) {
                Ok(())
            } else {
                Err(invalid("Invalid HTML file. The file must contain HTML markup."))
            }
        }
        ImageFormat::Ttf => check_ttf(buf),
        _ => Ok(()),
    }
}

fn invalid(msg: &str) -> StructureIssue {
    StructureIssue::Invalid(msg.to_string())
}

fn corrupted(msg: &str) -> StructureIssue {
    StructureIssue::Corrupted(msg.to_string())
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

fn tail(buf: &[u8], n: usize) -> &[u8] {
    &buf[buf.len().saturating_sub(n)..]
}

fn check_svg(buf: &[u8]) -> Result<(), StructureIssue> {
    let text = String::from_utf8_lossy(buf).to_lowercase();
    if !text.contains("<svg") {
        return Err(invalid(
            "Invalid SVG file structure. The file must contain a valid <svg> element.",
        ));
    }
    let self_closing_root = text
        .find("<svg")
        .and_then(|i| text[i..].find('>').map(|j| text[i..i + j].ends_with('/')))
        .unwrap_or(false);
    if !text.contains("</svg") && !self_closing_root {
        return Err(corrupted("Missing closing </svg> tag."));
    }
    Ok(())
}

fn check_png(buf: &[u8]) -> Result<(), StructureIssue> {
    if buf.len() < 24 {
        return Err(invalid("PNG file is too small to be valid. The file may be corrupted."));
    }
    if &buf[12..16] != b"IHDR" {
        return Err(invalid("Invalid PNG file structure. Missing required IHDR chunk."));
    }
    if !contains(tail(buf, 12), b"IEND") {
        return Err(corrupted("Missing IEND chunk."));
    }
    Ok(())
}

fn check_jpeg(buf: &[u8]) -> Result<(), StructureIssue> {
    if buf.len() < 4 {
        return Err(invalid("JPEG file is too small to be valid."));
    }
    // Some encoders pad after EOI; tolerate trailing zero bytes.
    let end = buf.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    if !buf[..end].ends_with(&[0xFF, 0xD9]) {
        return Err(corrupted("Missing end-of-image marker."));
    }
    Ok(())
}

fn check_pdf(buf: &[u8]) -> Result<(), StructureIssue> {
    if !PDF_HEADER.is_match(buf) {
        return Err(invalid("Invalid PDF file. Missing PDF version header."));
    }
    if !contains(tail(buf, 1024), b"%%EOF") {
        return Err(corrupted(
            "PDF file may be truncated or corrupted (missing EOF marker).",
        ));
    }
    Ok(())
}

fn check_mp4(buf: &[u8]) -> Result<(), StructureIssue> {
    if buf.len() < 12 {
        return Err(invalid("MP4 file is too small to be valid."));
    }
    if &buf[4..8] != b"ftyp" {
        return Err(invalid("Invalid MP4 file structure. Missing required ftyp box."));
    }
    Ok(())
}

fn check_ttf(buf: &[u8]) -> Result<(), StructureIssue> {
    if buf.len() < 12 {
        return Err(invalid(
            "Invalid font file. The file is too small to be a valid TTF/OTF font.",
        ));
    }
    let tables = u16::from_be_bytes([buf[4], buf[5]]);
    if !(1..=100).contains(&tables) {
        return Err(invalid("Invalid font file structure. The font table count is invalid."));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn svg_requires_root_and_close() {
        assert!(check(ImageFormat::Svg, b"<svg></svg>").is_ok());
        assert!(check(ImageFormat::Svg, b"<svg width='1'/>").is_ok());
        assert_eq!(
            check(ImageFormat::Svg, b"<svg><rect>"),
            Err(StructureIssue::Corrupted("Missing closing </svg> tag.".into()))
        );
        assert!(matches!(
            check(ImageFormat::Svg, b"<div/>"),
            Err(StructureIssue::Invalid(_))
        ));
    }

    #[test]
    fn png_ihdr_and_iend() {
        let mut png = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 13];
        png.extend_from_slice(b"IHDR");
        png.extend_from_slice(&[0; 17]);
        assert!(matches!(check(ImageFormat::Png, &png), Err(StructureIssue::Corrupted(_))));
        png.extend_from_slice(&[0, 0, 0, 0, b'I', b'E', b'N', b'D', 0xAE, 0x42, 0x60, 0x82]);
        assert!(check(ImageFormat::Png, &png).is_ok());
    }

    #[test]
    fn jpeg_eoi_with_padding() {
        assert!(check(ImageFormat::Jpg, &[0xFF, 0xD8, 0xFF, 0xE0, 0xFF, 0xD9, 0, 0]).is_ok());
        assert!(matches!(
            check(ImageFormat::Jpg, &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10]),
            Err(StructureIssue::Corrupted(_))
        ));
    }

    #[test]
    fn pdf_header_and_eof() {
        assert!(check(ImageFormat::Pdf, b"%PDF-1.4\n...\n%%EOF\n").is_ok());
        assert!(matches!(
            check(ImageFormat::Pdf, b"%PDF-1.4\n..."),
            Err(StructureIssue::Corrupted(_))
        ));
        assert!(matches!(
            check(ImageFormat::Pdf, b"%PDF-x"),
            Err(StructureIssue::Invalid(_))
        ));
    }

    #[test]
    fn ttf_table_count() {
        let mut ttf = vec![0, 1, 0, 0, 0, 12, 0, 0, 0, 0, 0, 0];
        assert!(check(ImageFormat::Ttf, &ttf).is_ok());
        ttf[5] = 0;
        assert!(check(ImageFormat::Ttf, &ttf).is_err());
    }
}
