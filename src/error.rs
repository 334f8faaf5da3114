//! Error taxonomy for the formatshift engine.
//!
//! Every failure that reaches a caller is a [`ConverterError`]. The set of
//! variants is closed: transform hooks may fail with any error type, but the
//! converter base class rewraps anything foreign into
//! [`ConverterError::Conversion`] before it propagates.
//!
//! Each variant carries a stable machine code (`code()`), an HTTP-style status
//! (`status_code()`), and a human-readable message (`Display`). Boundary
//! adapters ([`ErrorResponse`]) turn an error into a serialisable payload for
//! UIs and JSON output.

use serde::Serialize;
use thiserror::Error;

/// Error type that transform hooks may return. Anything that is not a
/// [`ConverterError`] is wrapped by the base class.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

const MB: f64 = 1024.0 * 1024.0;

fn mb(bytes: &u64) -> f64 {
    *bytes as f64 / MB
}

/// All failures produced by the conversion engine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConverterError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The input could not be accepted (empty, undetectable, malformed).
    #[error("{message}")]
    FileValidation { message: String, code: String },

    /// Size exceeds the ceiling for the detected format.
    #[error(
        "File size ({:.2}MB) exceeds maximum allowed size ({:.2}MB)",
        mb(.size),
        mb(.max_size)
    )]
    FileSize { size: u64, max_size: u64 },

    /// Pixel dimensions exceed the ceiling for the format.
    #[error(
        "Image dimensions ({width}x{height}) exceed maximum {max_width}x{max_height} for {format} format. \
         Please resize your image and try again."
    )]
    Dimension {
        width: u32,
        height: u32,
        max_width: u32,
        max_height: u32,
        format: String,
    },

    /// The structure of the file is broken and could not be repaired.
    #[error("{message}")]
    CorruptedFile { message: String },

    /// Markup input carries scripts, event handlers or external references.
    #[error("{message}")]
    Security { message: String },

    /// A conversion option is out of range for this format pair.
    #[error("Invalid {parameter}: {value}. Expected: {expected}")]
    InvalidParameter {
        parameter: String,
        value: String,
        expected: String,
    },

    // ── Dispatch errors ───────────────────────────────────────────────────
    /// The format (or the pair) is not handled.
    #[error("{message}")]
    UnsupportedFormat {
        message: String,
        format: String,
        supported: Vec<String>,
    },

    // ── Transform errors ──────────────────────────────────────────────────
    /// The transform itself failed. `code` distinguishes the cause
    /// (`CONVERSION_FAILED`, `<FROM>_TO_<TO>_FAILED`, `API_REQUEST_FAILED`, …).
    #[error("{message}")]
    Conversion {
        message: String,
        code: String,
        status: u16,
    },
}

/// Fieldless mirror of [`ConverterError`] variants, used by retry allow-lists
/// and fallback guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    FileValidation,
    Conversion,
    UnsupportedFormat,
    FileSize,
    Dimension,
    CorruptedFile,
    Security,
    InvalidParameter,
}

impl ConverterError {
    // ── Constructors ──────────────────────────────────────────────────────

    pub fn validation(message: impl Into<String>) -> Self {
        Self::FileValidation {
            message: message.into(),
            code: "FILE_VALIDATION_FAILED".into(),
        }
    }

    pub fn conversion(message: impl Into<String>) -> Self {
        Self::conversion_with_code(message, "CONVERSION_FAILED")
    }

    pub fn conversion_with_code(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self::Conversion {
            message: message.into(),
            code: code.into(),
            status: 500,
        }
    }

    /// Remote call exceeded its deadline.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Conversion {
            message: message.into(),
            code: "CONVERSION_TIMEOUT".into(),
            status: 504,
        }
    }

    pub fn unsupported_format(format: impl Into<String>, supported: Vec<String>) -> Self {
        let format = format.into();
        Self::UnsupportedFormat {
            message: format!("Format '{format}' is not supported"),
            format,
            supported,
        }
    }

    pub fn unsupported_with_message(
        format: impl Into<String>,
        supported: Vec<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::UnsupportedFormat {
            message: message.into(),
            format: format.into(),
            supported,
        }
    }

    pub fn corrupted(format: &str, details: &str) -> Self {
        Self::CorruptedFile {
            message: format!(
                "The {} file appears to be corrupted or invalid. {details}",
                format.to_uppercase()
            )
            .trim_end()
            .to_string(),
        }
    }

    pub fn security(message: &str, details: Option<&str>) -> Self {
        let details = details
            .unwrap_or("The file contains potentially harmful content and cannot be processed.");
        Self::Security {
            message: format!("{message}. {details}"),
        }
    }

    pub fn invalid_parameter(
        parameter: impl Into<String>,
        value: impl ToString,
        expected: impl Into<String>,
    ) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            value: value.to_string(),
            expected: expected.into(),
        }
    }

    /// Wrap a foreign failure raised while converting `from` → `to`.
    pub fn wrap_unknown(from: &str, to: &str, raw: &str) -> Self {
        Self::conversion_with_code(
            user_friendly_message(raw),
            format!("{}_TO_{}_FAILED", from.to_uppercase(), to.to_uppercase()),
        )
    }

    // ── Accessors ─────────────────────────────────────────────────────────

    /// Stable machine-readable code.
    pub fn code(&self) -> &str {
        match self {
            Self::FileValidation { code, .. } | Self::Conversion { code, .. } => code,
            Self::UnsupportedFormat { .. } => "UNSUPPORTED_FORMAT",
            Self::FileSize { .. } => "FILE_SIZE_EXCEEDED",
            Self::Dimension { .. } => "DIMENSION_EXCEEDED",
            Self::CorruptedFile { .. } => "CORRUPTED_FILE",
            Self::Security { .. } => "SECURITY_VIOLATION",
            Self::InvalidParameter { .. } => "INVALID_PARAMETER",
        }
    }

    /// HTTP-style status for boundary adapters.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Conversion { status, .. } => *status,
            Self::FileSize { .. } => 413,
            Self::Security { .. } => 403,
            Self::FileValidation { .. }
            | Self::UnsupportedFormat { .. }
            | Self::Dimension { .. }
            | Self::CorruptedFile { .. }
            | Self::InvalidParameter { .. } => 400,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::FileValidation { .. } => ErrorKind::FileValidation,
            Self::Conversion { .. } => ErrorKind::Conversion,
            Self::UnsupportedFormat { .. } => ErrorKind::UnsupportedFormat,
            Self::FileSize { .. } => ErrorKind::FileSize,
            Self::Dimension { .. } => ErrorKind::Dimension,
            Self::CorruptedFile { .. } => ErrorKind::CorruptedFile,
            Self::Security { .. } => ErrorKind::Security,
            Self::InvalidParameter { .. } => ErrorKind::InvalidParameter,
        }
    }

    /// One short recovery hint per error type, appended by
    /// [`ErrorResponse::detailed`].
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::FileSize { .. } => {
                Some("Try compressing the file or reducing its dimensions before converting.")
            }
            Self::Dimension { .. } => Some("You can use an image editor to resize the image first."),
            Self::CorruptedFile { .. } => Some(
                "Try re-saving the file in its original application or use a different file.",
            ),
            Self::Security { .. } => Some("Remove any scripts or external references from the file."),
            Self::UnsupportedFormat { .. } => Some(
                "Check our supported formats list or try converting to a different format first.",
            ),
            _ => None,
        }
    }
}

/// Map raw failure text from foreign errors to a message fit for end users.
///
/// Unmatched text is returned unchanged.
pub fn user_friendly_message(raw: &str) -> String {
    let lower = raw.to_lowercase();
    if lower.contains("memory") || lower.contains("heap") {
        "The file is too large to process. Please try with a smaller file or reduce its dimensions."
            .into()
    } else if lower.contains("timeout") || lower.contains("timed out") {
        "Conversion timed out. Please try with a smaller file".into()
    } else if lower.contains("network") || lower.contains("fetch") {
        "Network error occurred during conversion".into()
    } else if lower.contains("encoding") || lower.contains("decode") {
        "Unable to process the file encoding. Please ensure the file is not corrupted.".into()
    } else if raw.trim().is_empty() {
        "An unexpected error occurred. Please try again.".into()
    } else {
        raw.to_string()
    }
}

// ── Boundary adapter ─────────────────────────────────────────────────────

/// Serialisable error payload for user-facing boundaries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorResponse {
    pub fn from_error(err: &ConverterError) -> Self {
        let details = match err {
            ConverterError::UnsupportedFormat {
                format, supported, ..
            } => Some(serde_json::json!({ "format": format, "supportedFormats": supported })),
            ConverterError::FileSize { size, max_size } => {
                Some(serde_json::json!({ "size": size, "maxSize": max_size }))
            }
            ConverterError::Dimension {
                width,
                height,
                max_width,
                max_height,
                ..
            } => Some(serde_json::json!({
                "width": width,
                "height": height,
                "maxWidth": max_width,
                "maxHeight": max_height,
            })),
            ConverterError::InvalidParameter {
                parameter,
                value,
                expected,
            } => Some(serde_json::json!({
                "parameter": parameter,
                "value": value,
                "expectedRange": expected,
            })),
            _ => None,
        };
        Self {
            success: false,
            error: err.to_string(),
            code: err.code().to_string(),
            details,
        }
    }

    /// Like [`ErrorResponse::from_error`] with a recovery suggestion appended.
    pub fn detailed(err: &ConverterError) -> Self {
        let mut resp = Self::from_error(err);
        if let Some(hint) = err.suggestion() {
            resp.error = format!("{} {hint}", resp.error);
        }
        resp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_size_display_in_megabytes() {
        let e = ConverterError::FileSize {
            size: 30 * 1024 * 1024,
            max_size: 20 * 1024 * 1024,
        };
        assert_eq!(
            e.to_string(),
            "File size (30.00MB) exceeds maximum allowed size (20.00MB)"
        );
        assert_eq!(e.status_code(), 413);
        assert_eq!(e.code(), "FILE_SIZE_EXCEEDED");
    }

    #[test]
    fn dimension_display_names_actual_and_max() {
        let e = ConverterError::Dimension {
            width: 5000,
            height: 5000,
            max_width: 4096,
            max_height: 4096,
            format: "SVG".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("5000x5000"), "got: {msg}");
        assert!(msg.contains("4096x4096"), "got: {msg}");
    }

    #[test]
    fn wrap_unknown_builds_pair_code() {
        let e = ConverterError::wrap_unknown("png", "svg", "boom");
        assert_eq!(e.code(), "PNG_TO_SVG_FAILED");
        assert_eq!(e.kind(), ErrorKind::Conversion);
        assert_eq!(e.to_string(), "boom");
    }

    #[test]
    fn wrap_unknown_maps_friendly_messages() {
        let e = ConverterError::wrap_unknown("svg", "png", "out of memory while allocating");
        assert!(e.to_string().starts_with("The file is too large"));
        let e = ConverterError::wrap_unknown("svg", "png", "failed to decode chunk");
        assert!(e.to_string().starts_with("Unable to process the file encoding"));
    }

    #[test]
    fn security_default_details() {
        let e = ConverterError::security("SVG contains scripts", None);
        assert_eq!(
            e.to_string(),
            "SVG contains scripts. The file contains potentially harmful content and cannot be processed."
        );
        assert_eq!(e.status_code(), 403);
    }

    #[test]
    fn invalid_parameter_display() {
        let e = ConverterError::invalid_parameter("quality", 150, "1-100");
        assert_eq!(e.to_string(), "Invalid quality: 150. Expected: 1-100");
    }

    #[test]
    fn detailed_response_appends_suggestion() {
        let e = ConverterError::security("Script found", Some("Remove it."));
        let resp = ErrorResponse::detailed(&e);
        assert!(!resp.success);
        assert_eq!(resp.code, "SECURITY_VIOLATION");
        assert!(resp.error.ends_with("Remove any scripts or external references from the file."));
    }

    #[test]
    fn response_details_for_unsupported() {
        let e = ConverterError::unsupported_format("xyz", vec!["png".into()]);
        let resp = ErrorResponse::from_error(&e);
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["details"]["format"], "xyz");
        assert_eq!(json["error"], "Format 'xyz' is not supported");
    }
}
