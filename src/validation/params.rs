//! Conversion-parameter bounds and pair support checks.
//!
//! Valid ranges depend on the target format, so every check takes the
//! `(from, to)` pair. Invalid values are rejected, never clamped.

use super::canvas::output_limit;
use crate::error::ConverterError;
use crate::format::ImageFormat;
use crate::request::ConversionOptions;

/// Pairs that are well-formed tags but can never be converted.
const IMPOSSIBLE_PAIRS: [(ImageFormat, ImageFormat); 4] = [
    (ImageFormat::Ttf, ImageFormat::Mp4),
    (ImageFormat::Mp4, ImageFormat::Ttf),
    (ImageFormat::Html, ImageFormat::Ttf),
    (ImageFormat::Ttf, ImageFormat::Stl),
];

/// Whether `from → to` makes sense at all, independent of any registry.
pub fn is_conversion_supported(from: ImageFormat, to: ImageFormat) -> Result<(), ConverterError> {
    if from == to {
        return Err(ConverterError::unsupported_with_message(
            to.as_str(),
            Vec::new(),
            format!(
                "Cannot convert {} to {}: source and target formats are the same",
                from.as_str().to_uppercase(),
                to.as_str().to_uppercase()
            ),
        ));
    }
    if IMPOSSIBLE_PAIRS.contains(&(from, to)) {
        return Err(ConverterError::unsupported_with_message(
            to.as_str(),
            Vec::new(),
            format!(
                "Conversion from {} to {} is not supported",
                from.as_str().to_uppercase(),
                to.as_str().to_uppercase()
            ),
        ));
    }
    Ok(())
}

/// Validate `options` for a conversion from `from` to `to`.
pub fn validate_conversion_params(
    options: &ConversionOptions,
    from: ImageFormat,
    to: ImageFormat,
) -> Result<(), ConverterError> {
    if let Some(q) = options.quality {
        if !(1..=100).contains(&q) {
            return Err(ConverterError::invalid_parameter("quality", q, "1-100"));
        }
    }

    for (name, value) in [("width", options.width), ("height", options.height)] {
        if value == Some(0) {
            return Err(ConverterError::invalid_parameter(name, 0, "a positive integer"));
        }
    }
    if let Some((max_w, max_h)) = output_limit(from, to) {
        let w = options.width.unwrap_or(0);
        let h = options.height.unwrap_or(0);
        if w > max_w || h > max_h {
            return Err(ConverterError::Dimension {
                width: w,
                height: h,
                max_width: max_w,
                max_height: max_h,
                format: to.as_str().to_uppercase(),
            });
        }
    }

    if let Some(dpi) = options.dpi {
        if !(72..=2400).contains(&dpi) {
            return Err(ConverterError::invalid_parameter("dpi", dpi, "72-2400"));
        }
    }

    if let Some(page) = options.page {
        if page == 0 {
            return Err(ConverterError::invalid_parameter("page", page, "1 or greater"));
        }
        if from != ImageFormat::Pdf {
            return Err(ConverterError::invalid_parameter(
                "page",
                page,
                format!("no page selection for {} sources", from.as_str().to_uppercase()),
            ));
        }
    }

    if let Some(bg) = options.background.as_deref() {
        if bg.eq_ignore_ascii_case("transparent") {
            if !to.supports_transparency() {
                return Err(ConverterError::invalid_parameter(
                    "background",
                    bg,
                    format!("an opaque #RRGGBB colour ({} has no alpha channel)", to.as_str().to_uppercase()),
                ));
            }
        } else if parse_hex_color(bg).is_none() {
            return Err(ConverterError::invalid_parameter(
                "background",
                bg,
                "#RGB, #RRGGBB or transparent",
            ));
        }
    }

    if let Some(key) = options
        .extras
        .keys()
        .find(|k| k.is_empty() || !k.is_ascii())
    {
        return Err(ConverterError::invalid_parameter("extras", key, "non-empty ASCII keys"));
    }

    Ok(())
}

/// Parse `#RGB` / `#RRGGBB` into RGB bytes.
pub(crate) fn parse_hex_color(s: &str) -> Option<[u8; 3]> {
    let hex = s.strip_prefix('#')?;
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    match hex.len() {
        3 => {
            let mut out = [0u8; 3];
            for (i, c) in hex.chars().enumerate() {
                let v = c.to_digit(16)? as u8;
                out[i] = v * 17;
            }
            Some(out)
        }
        6 => Some([
            u8::from_str_radix(&hex[0..2], 16).ok()?,
            u8::from_str_radix(&hex[2..4], 16).ok()?,
            u8::from_str_radix(&hex[4..6], 16).ok()?,
        ]),
        _ => None,
    }
}
