//! Scan markup inputs for unsafe embedded content.

use crate::format::ImageFormat;
use once_cell::sync::Lazy;
use regex::Regex;

static RE_SCRIPT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<script[\s>/]").unwrap());
static RE_EVENT_HANDLER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)[\s"'/]on[a-z]+\s*="#).unwrap());
static RE_SCRIPT_URI: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:java|vb)script\s*:").unwrap());
static RE_EMBEDDED_DOC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<(iframe|embed|object|foreignobject)[\s>/]").unwrap());
static RE_HREF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)(?:xlink:)?href\s*=\s*["']\s*([^"']*)["']"#).unwrap());

/// Return a short description of the first unsafe construct found.
pub fn scan(format: ImageFormat, text: &str) -> Option<&'static str> {
    if RE_SCRIPT.is_match(text) {
        return Some("a <script> element");
    }
    if RE_EVENT_HANDLER.is_match(text) {
        return Some("an inline event handler");
    }
    if RE_SCRIPT_URI.is_match(text) {
        return Some("a script URI");
    }
    if format == ImageFormat::Svg {
        if RE_EMBEDDED_DOC.is_match(text) {
            return Some("an embedded document");
        }
        let external = RE_HREF.captures_iter(text).any(|c| {
            let target = c.get(1).map_or("", |m| m.as_str()).trim();
            !(target.is_empty() || target.starts_with('#') || target.starts_with("data:"))
        });
        if external {
            return Some("an external reference");
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_svg_passes() {
        let svg = r##"<svg xmlns="http://www.w3.org/2000/svg"><use href="#a"/><image href="data:image/png;base64,AA=="/></svg>"##;
        assert_eq!(scan(ImageFormat::Svg, svg), None);
    }

    #[test]
    fn detects_each_construct() {
        assert_eq!(
            scan(ImageFormat::Svg, "<svg><script>alert(1)</script></svg>"),
            Some("a <script> element")
        );
        assert_eq!(
            scan(ImageFormat::Svg, r#"<svg onload="x()"></svg>"#),
            Some("an inline event handler")
        );
        assert_eq!(
            scan(ImageFormat::Svg, r#"<svg><a href="javascript:x()"/></svg>"#),
            Some("a script URI")
        );
        assert_eq!(
            scan(ImageFormat::Svg, r#"<svg><image xlink:href="https://evil.test/a.png"/></svg>"#),
            Some("an external reference")
        );
    }

    #[test]
    fn html_allows_links() {
        let html = r#"<html><a href="https://example.com">x</a></html>"#;
        assert_eq!(scan(ImageFormat::Html, html), None);
    }

    #[test]
    fn namespace_declarations_are_not_handlers() {
        let svg = r#"<svg xmlns="http://www.w3.org/2000/svg" version="1.1"></svg>"#;
        assert_eq!(scan(ImageFormat::Svg, svg), None);
    }
}
