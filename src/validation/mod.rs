//! Validation pipeline: reject bad input before any transform work starts.
//!
//! ```text
//! bytes
//!  │
//!  ├─ 1. Non-empty
//!  ├─ 2. Sniff    content signature must match the declared source (or an alias)
//!  ├─ 3. Size     per-format byte ceiling
//!  ├─ 4. Shape    structural checks; damaged PNG/JPEG/SVG get one repair attempt
//!  ├─ 5. Pixels   declared dimensions against per-format and vectorisation ceilings
//!  └─ 6. Safety   markup scan for scripts, handlers, script URIs, external refs
//! ```
//!
//! The first failing check wins; nothing is clamped or coerced. Parameter
//! validation ([`validate_conversion_params`]) and the output size check
//! ([`checked_output_dimensions`]) run separately once the input itself is
//! known to be good.

pub mod canvas;
pub mod params;
pub mod probe;
pub mod security;
pub mod sniff;
pub mod structure;

pub use canvas::{check_output_dimensions, checked_output_dimensions, output_dimensions};
pub use params::{is_conversion_supported, validate_conversion_params};
pub use sniff::detect_format;

use crate::config::EngineConfig;
use crate::error::ConverterError;
use crate::format::ImageFormat;
use crate::recovery::repair::repair_corrupted;
use structure::StructureIssue;
use tracing::debug;

/// Largest raster input accepted for vectorisation, per side.
pub const VECTORIZE_MAX_DIMENSION: u32 = 4096;

/// Formats with a best-effort repair.
const REPAIRABLE: [ImageFormat; 3] = [ImageFormat::Png, ImageFormat::Jpg, ImageFormat::Svg];

/// What to validate against.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationOptions {
    /// Declared source formats. Aliases from
    /// [`ImageFormat::accepted_detections`] are honoured.
    pub allowed_formats: Vec<ImageFormat>,
    /// Conversion target, when known; tightens the dimension ceiling.
    pub target_format: Option<ImageFormat>,
    pub enable_security_checks: bool,
    pub repair_corrupted: bool,
    pub max_file_size: Option<u64>,
}

impl ValidationOptions {
    pub fn new(allowed_formats: impl Into<Vec<ImageFormat>>) -> Self {
        Self {
            allowed_formats: allowed_formats.into(),
            target_format: None,
            enable_security_checks: true,
            repair_corrupted: true,
            max_file_size: None,
        }
    }

    pub fn for_pair(from: ImageFormat, to: ImageFormat, config: &EngineConfig) -> Self {
        Self {
            allowed_formats: vec![from],
            target_format: Some(to),
            enable_security_checks: config.enable_security_checks,
            repair_corrupted: config.repair_corrupted,
            max_file_size: config.max_file_size,
        }
    }

    pub fn with_target(mut self, to: ImageFormat) -> Self {
        self.target_format = Some(to);
        self
    }

    pub fn security_checks(mut self, enabled: bool) -> Self {
        self.enable_security_checks = enabled;
        self
    }
}

/// A buffer that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedInput {
    /// Declared format the content was accepted as.
    pub format: ImageFormat,
    /// What the content actually sniffed as (may be an alias of `format`).
    pub detected: ImageFormat,
    pub size: usize,
    pub dimensions: Option<(u32, u32)>,
    /// Replacement bytes when a structural repair was applied.
    pub repaired: Option<Vec<u8>>,
    pub warning: Option<String>,
}

/// Run the ordered checks over `buf`.
pub fn validate(buf: &[u8], opts: &ValidationOptions) -> Result<ValidatedInput, ConverterError> {
    match validate_once(buf, opts) {
        Ok(v) => Ok(v),
        Err(Failure::Fatal(e)) => Err(e),
        Err(Failure::Repairable { error, format }) => {
            try_repair(buf, opts, &[format]).ok_or(error)
        }
        Err(Failure::Unrecognised(error)) => {
            let candidates: Vec<ImageFormat> = opts
                .allowed_formats
                .iter()
                .copied()
                .filter(|f| REPAIRABLE.contains(f))
                .collect();
            try_repair(buf, opts, &candidates).ok_or(error)
        }
    }
}

enum Failure {
    Fatal(ConverterError),
    /// Content matched nothing allowed; a repair might restore the signature.
    Unrecognised(ConverterError),
    /// Recognised but structurally damaged.
    Repairable {
        error: ConverterError,
        format: ImageFormat,
    },
}

fn try_repair(
    buf: &[u8],
    opts: &ValidationOptions,
    candidates: &[ImageFormat],
) -> Option<ValidatedInput> {
    if !opts.repair_corrupted {
        return None;
    }
    let strict = ValidationOptions {
        repair_corrupted: false,
        ..opts.clone()
    };
    candidates.iter().find_map(|&format| {
        let fixed = repair_corrupted(buf, format)?;
        match validate_once(&fixed, &strict) {
            Ok(mut v) => {
                debug!("validation accepted repaired {format} input");
                v.warning = Some(format!(
                    "The {} file was damaged and has been repaired automatically; the output may differ from the original.",
                    format.as_str().to_uppercase()
                ));
                v.repaired = Some(fixed);
                Some(v)
            }
            Err(_) => None,
        }
    })
}

fn validate_once(buf: &[u8], opts: &ValidationOptions) -> Result<ValidatedInput, Failure> {
    // ── Step 1: Non-empty ────────────────────────────────────────────────
    if buf.is_empty() {
        return Err(Failure::Fatal(ConverterError::FileValidation {
            message: "File is empty. Please provide a valid file with content.".into(),
            code: "EMPTY_FILE".into(),
        }));
    }

    // ── Step 2: Sniff ────────────────────────────────────────────────────
    let detected = sniff::detect_format(buf).ok_or_else(|| {
        Failure::Unrecognised(ConverterError::FileValidation {
            message: "Unable to detect file format. The file may be corrupted or in an unsupported format."
                .into(),
            code: "FORMAT_NOT_DETECTED".into(),
        })
    })?;
    let format = if opts.allowed_formats.contains(&detected) {
        detected
    } else {
        opts.allowed_formats
            .iter()
            .copied()
            .find(|f| f.accepted_detections().contains(&detected))
            .ok_or_else(|| {
                let supported: Vec<String> =
                    opts.allowed_formats.iter().map(|f| f.to_string()).collect();
                Failure::Unrecognised(ConverterError::unsupported_with_message(
                    detected.as_str(),
                    supported.clone(),
                    format!(
                        "File format \"{detected}\" is not supported. Supported formats: {}",
                        supported.join(", ")
                    ),
                ))
            })?
    };

    // ── Step 3: Size ─────────────────────────────────────────────────────
    let limit = opts
        .max_file_size
        .map_or(format.size_limit(), |m| m.min(format.size_limit()));
    if buf.len() as u64 > limit {
        return Err(Failure::Fatal(ConverterError::FileSize {
            size: buf.len() as u64,
            max_size: limit,
        }));
    }

    // ── Step 4: Structure ────────────────────────────────────────────────
    match structure::check(format, buf) {
        Ok(()) => {}
        Err(StructureIssue::Invalid(msg)) => {
            return Err(Failure::Fatal(ConverterError::validation(msg)));
        }
        Err(StructureIssue::Corrupted(details)) => {
            let error = ConverterError::corrupted(format.as_str(), &details);
            return Err(if REPAIRABLE.contains(&format) {
                Failure::Repairable { error, format }
            } else {
                Failure::Fatal(error)
            });
        }
    }

    // ── Step 5: Dimensions ───────────────────────────────────────────────
    let dimensions = probe::dimensions(format, buf);
    if let Some((w, h)) = dimensions {
        check_dimensions(w, h, format, opts.target_format).map_err(Failure::Fatal)?;
    }

    // ── Step 6: Safety ───────────────────────────────────────────────────
    if opts.enable_security_checks && format.is_markup() {
        let text = String::from_utf8_lossy(buf);
        if let Some(finding) = security::scan(format, &text) {
            return Err(Failure::Fatal(ConverterError::security(
                &format!("{} file contains {finding}", format.as_str().to_uppercase()),
                Some("Scripts, event handlers, and external references are not allowed."),
            )));
        }
    }

    Ok(ValidatedInput {
        format,
        detected,
        size: buf.len(),
        dimensions,
        repaired: None,
        warning: None,
    })
}

fn check_dimensions(
    w: u32,
    h: u32,
    format: ImageFormat,
    target: Option<ImageFormat>,
) -> Result<(), ConverterError> {
    let (mut max_w, mut max_h) = match format.max_dimensions() {
        Some(d) => d,
        None => return Ok(()),
    };
    let mut named = format;
    if let Some(to) = target {
        if to.is_vector() && !format.is_vector() {
            max_w = max_w.min(VECTORIZE_MAX_DIMENSION);
            max_h = max_h.min(VECTORIZE_MAX_DIMENSION);
            named = to;
        }
    }
    if w > max_w || h > max_h {
        return Err(ConverterError::Dimension {
            width: w,
            height: h,
            max_width: max_w,
            max_height: max_h,
            format: named.as_str().to_uppercase(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::io::Cursor;

    fn png_bytes(w: u32, h: u32) -> Vec<u8> {
        let img = image::RgbaImage::new(w, h);
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    const SVG: &[u8] = br#"<svg xmlns="http://www.w3.org/2000/svg" width="10" height="10"><rect width="10" height="10"/></svg>"#;

    #[test]
    fn empty_buffer() {
        let err = validate(&[], &ValidationOptions::new([ImageFormat::Png])).unwrap_err();
        assert_eq!(err.code(), "EMPTY_FILE");
    }

    #[test]
    fn valid_png() {
        let v = validate(&png_bytes(4, 4), &ValidationOptions::new([ImageFormat::Png])).unwrap();
        assert_eq!(v.format, ImageFormat::Png);
        assert_eq!(v.dimensions, Some((4, 4)));
        assert!(v.repaired.is_none());
    }

    #[test]
    fn wrong_format_is_unsupported() {
        let err = validate(SVG, &ValidationOptions::new([ImageFormat::Png])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedFormat);
    }

    #[test]
    fn alias_detection_is_accepted() {
        let pdf = b"%PDF-1.4\n1 0 obj\n%%EOF\n";
        let v = validate(pdf, &ValidationOptions::new([ImageFormat::Eps])).unwrap();
        assert_eq!(v.format, ImageFormat::Eps);
        assert_eq!(v.detected, ImageFormat::Pdf);
    }

    #[test]
    fn global_size_ceiling() {
        let opts = ValidationOptions {
            max_file_size: Some(10),
            ..ValidationOptions::new([ImageFormat::Svg])
        };
        let err = validate(SVG, &opts).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FileSize);
    }

    #[test]
    fn vectorisation_ceiling() {
        let opts = ValidationOptions::new([ImageFormat::Png]).with_target(ImageFormat::Svg);
        assert!(check_dimensions(4096, 4096, ImageFormat::Png, opts.target_format).is_ok());
        let err = check_dimensions(5000, 5000, ImageFormat::Png, opts.target_format).unwrap_err();
        assert_eq!(
            err,
            ConverterError::Dimension {
                width: 5000,
                height: 5000,
                max_width: 4096,
                max_height: 4096,
                format: "SVG".into(),
            }
        );
        assert!(check_dimensions(5000, 5000, ImageFormat::Png, Some(ImageFormat::Jpg)).is_ok());
    }

    #[test]
    fn ico_source_ceiling() {
        let err = check_dimensions(300, 300, ImageFormat::Ico, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Dimension);
    }

    #[test]
    fn script_rejected_unless_disabled() {
        let svg = br#"<svg xmlns="http://www.w3.org/2000/svg"><script>alert(1)</script></svg>"#;
        let opts = ValidationOptions::new([ImageFormat::Svg]);
        let err = validate(svg, &opts).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Security);
        assert!(validate(svg, &opts.security_checks(false)).is_ok());
    }

    #[test]
    fn truncated_svg_is_repaired() {
        let svg = br#"<svg xmlns="http://www.w3.org/2000/svg" width="10" height="10"><g><rect width="10" height="10"/>"#;
        let v = validate(svg, &ValidationOptions::new([ImageFormat::Svg])).unwrap();
        let fixed = String::from_utf8(v.repaired.unwrap()).unwrap();
        assert!(fixed.ends_with("</g></svg>"));
        assert!(v.warning.is_some());
    }

    #[test]
    fn truncated_png_without_repair_is_corrupted() {
        let mut png = png_bytes(2, 2);
        png.truncate(png.len() - 12);
        let opts = ValidationOptions {
            repair_corrupted: false,
            ..ValidationOptions::new([ImageFormat::Png])
        };
        let err = validate(&png, &opts).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CorruptedFile);

        let v = validate(&png, &ValidationOptions::new([ImageFormat::Png])).unwrap();
        assert!(v.repaired.is_some());
    }

    #[test]
    fn png_missing_signature_is_repaired() {
        let png = png_bytes(2, 2);
        let v = validate(&png[8..], &ValidationOptions::new([ImageFormat::Png])).unwrap();
        assert_eq!(v.repaired.as_deref(), Some(png.as_slice()));
    }
}
