//! SVG → HTML.
//!
//! Extras:
//! - `embed`: `inline` (default) places the SVG markup in the page body;
//!   `img` references it through a base64 data URI.
//! - `full_document`: `false` emits only the fragment, without the
//!   surrounding `<!DOCTYPE html>` page.

use super::run_blocking;
use crate::converter::{Transform, TransformContext};
use crate::error::{BoxError, ConverterError};
use crate::format::ImageFormat;
use crate::output::ConversionOutput;
use crate::progress::checkpoint;
use crate::request::ConversionOptions;
use crate::validation::params::parse_hex_color;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use once_cell::sync::Lazy;
use regex::Regex;

static RE_PROLOG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)^\s*(<\?xml[^>]*\?>\s*)?(<!DOCTYPE[^>]*>\s*)?").unwrap());
static RE_TITLE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EmbedMode {
    Inline,
    Img,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SvgToHtml;

#[async_trait]
impl Transform for SvgToHtml {
    async fn transform(
        &self,
        input: &[u8],
        options: &ConversionOptions,
        ctx: &TransformContext<'_>,
    ) -> Result<ConversionOutput, BoxError> {
        ctx.report(checkpoint::TRANSFORM_STARTED);

        let mode = match options.extras.get("embed").map(String::as_str) {
            None | Some("inline") => EmbedMode::Inline,
            Some("img") => EmbedMode::Img,
            Some(other) => {
                return Err(ConverterError::invalid_parameter("embed", other, "inline or img").into())
            }
        };
        let full_document = options
            .extras
            .get("full_document")
            .map_or(true, |v| v != "false");

        let text = String::from_utf8_lossy(input).into_owned();
        let dims = ctx.source_dimensions();
        let background = options.background.clone();
        let html = run_blocking("Markup", move || {
            Ok(render(&text, mode, full_document, dims, background.as_deref()))
        })
        .await?;

        ctx.report(checkpoint::TRANSFORM_DONE);
        let mut out = ConversionOutput::text(html, ImageFormat::Html);
        if let Some((w, h)) = dims {
            out = out.with_dimensions(w, h);
        }
        Ok(out.with_extra("embed", if mode == EmbedMode::Img { "img" } else { "inline" }.into()))
    }
}

/// Titles come from markup already, so existing entities are kept.
fn escape(s: &str) -> String {
    s.replace('<', "&lt;").replace('>', "&gt;")
}

fn render(
    svg: &str,
    mode: EmbedMode,
    full_document: bool,
    dims: Option<(u32, u32)>,
    background: Option<&str>,
) -> String {
    let body = RE_PROLOG.replace(svg, "");
    let body = body.trim();
    let figure = match mode {
        EmbedMode::Inline => body.to_string(),
        EmbedMode::Img => {
            let size = dims
                .map(|(w, h)| format!(r#" width="{w}" height="{h}""#))
                .unwrap_or_default();
            format!(
                r#"<img src="data:image/svg+xml;base64,{}"{size} alt="">"#,
                STANDARD.encode(body)
            )
        }
    };
    if !full_document {
        return figure;
    }

    let title = RE_TITLE
        .captures(body)
        .and_then(|c| c.get(1))
        .map(|m| escape(m.as_str().trim()))
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "SVG image".to_string());
    let bg = background
        .and_then(parse_hex_color)
        .map(|[r, g, b]| format!("background:#{r:02x}{g:02x}{b:02x};"))
        .unwrap_or_default();

    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n\
         <title>{title}</title>\n\
         <style>body{{margin:0;display:flex;min-height:100vh;align-items:center;justify-content:center;{bg}}}svg,img{{max-width:100%;height:auto}}</style>\n\
         </head>\n<body>\n{figure}\n</body>\n</html>\n"
    )
}
