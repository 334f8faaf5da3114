//! Best-effort structural repair for a few simple container formats.
//!
//! Repairs are narrow: insert a missing leading or trailing marker, or close
//! unbalanced markup tags. They never guarantee a decodable result; the
//! validation pipeline re-validates whatever comes back.

use crate::format::ImageFormat;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

const PNG_SIGNATURE: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
const PNG_IEND: [u8; 12] = [
    0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82,
];
const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];
const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];
const VOID_ELEMENTS: [&str; 6] = ["br", "hr", "img", "input", "meta", "link"];

static RE_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<(/?)([A-Za-z][\w:.-]*)(?:[^>]*?)(/?)>").unwrap());

/// Attempt a repair. Returns `Some` only when bytes were actually changed.
pub fn repair_corrupted(buf: &[u8], format: ImageFormat) -> Option<Vec<u8>> {
    let repaired = match format {
        ImageFormat::Png => repair_png(buf),
        ImageFormat::Jpg => repair_jpeg(buf),
        ImageFormat::Svg => repair_svg(buf),
        _ => None,
    }?;
    (repaired != buf).then(|| {
        debug!("repaired {format} input ({} -> {} bytes)", buf.len(), repaired.len());
        repaired
    })
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

fn repair_png(buf: &[u8]) -> Option<Vec<u8>> {
    let mut out = if buf.starts_with(&PNG_SIGNATURE) {
        buf.to_vec()
    } else if buf.get(4..8) == Some(b"IHDR") {
        // Signature stripped: data starts at the IHDR chunk.
        let mut v = PNG_SIGNATURE.to_vec();
        v.extend_from_slice(buf);
        v
    } else {
        return None;
    };
    let tail = &out[out.len().saturating_sub(12)..];
    if !contains(tail, b"IEND") {
        out.extend_from_slice(&PNG_IEND);
    }
    Some(out)
}

fn repair_jpeg(buf: &[u8]) -> Option<Vec<u8>> {
    let mut out = if buf.starts_with(&JPEG_SOI) {
        buf.to_vec()
    } else if buf.first() == Some(&0xFF) {
        // Starts on a segment marker: only the SOI is missing.
        let mut v = JPEG_SOI.to_vec();
        v.extend_from_slice(buf);
        v
    } else {
        return None;
    };
    if !out.ends_with(&JPEG_EOI) {
        out.extend_from_slice(&JPEG_EOI);
    }
    Some(out)
}

fn repair_svg(buf: &[u8]) -> Option<Vec<u8>> {
    let text = std::str::from_utf8(buf).ok()?;
    if !text.contains('<') {
        return None;
    }
    let lower = text.to_lowercase();
    if !lower.contains("<svg") {
        return Some(
            format!("<svg xmlns=\"http://www.w3.org/2000/svg\">{text}</svg>").into_bytes(),
        );
    }
    Some(balance_tags(text).into_bytes())
}

/// Append closing tags for every element left open, innermost first.
fn balance_tags(text: &str) -> String {
    let mut stack: Vec<String> = Vec::new();
    for cap in RE_TAG.captures_iter(text) {
        let closing = !cap[1].is_empty();
        let self_closing = !cap[3].is_empty();
        let name = cap[2].to_string();
        if self_closing || VOID_ELEMENTS.contains(&name.to_ascii_lowercase().as_str()) {
            continue;
        }
        if closing {
            if let Some(pos) = stack.iter().rposition(|open| open.eq_ignore_ascii_case(&name)) {
                stack.truncate(pos);
            }
        } else {
            stack.push(name);
        }
    }
    let mut out = text.trim_end().to_string();
    for name in stack.iter().rev() {
        out.push_str(&format!("</{name}>"));
    }
    out
}
