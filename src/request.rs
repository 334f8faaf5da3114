//! Per-call input types: the raw input, its options, and the full request.

use crate::error::ConverterError;
use crate::format::ImageFormat;
use crate::progress::SharedProgress;
use base64::Engine as _;
use std::collections::BTreeMap;
use std::fmt;

/// Input accepted by a converter: raw bytes or base64 text (optionally a
/// `data:` URL).
#[derive(Debug, Clone, PartialEq)]
pub enum ConversionInput {
    Bytes(Vec<u8>),
    Base64(String),
}

impl ConversionInput {
    /// Normalise to the canonical byte representation.
    pub fn into_bytes(self) -> Result<Vec<u8>, ConverterError> {
        match self {
            Self::Bytes(b) => Ok(b),
            Self::Base64(text) => {
                let payload = match text.split_once(";base64,") {
                    Some((prefix, rest)) if prefix.starts_with("data:") => rest,
                    _ => text.as_str(),
                };
                let cleaned: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
                base64::engine::general_purpose::STANDARD
                    .decode(cleaned.as_bytes())
                    .map_err(|e| {
                        ConverterError::FileValidation {
                            message: format!("Input is not valid base64: {e}"),
                            code: "INVALID_INPUT_ENCODING".into(),
                        }
                    })
            }
        }
    }
}

impl From<Vec<u8>> for ConversionInput {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<&[u8]> for ConversionInput {
    fn from(v: &[u8]) -> Self {
        Self::Bytes(v.to_vec())
    }
}

/// Options for one conversion. Immutable for the duration of the call.
#[derive(Clone)]
pub struct ConversionOptions {
    /// Output quality, 1–100.
    pub quality: Option<u32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Keep the source aspect ratio when only one dimension is given. Default: true.
    pub preserve_aspect_ratio: bool,
    /// `#RRGGBB` or `transparent`.
    pub background: Option<String>,
    /// Rasterisation density, 72–2400.
    pub dpi: Option<u32>,
    /// 1-indexed page for multi-page sources.
    pub page: Option<u32>,
    /// Format-specific extras, forwarded verbatim to transforms and the
    /// remote service.
    pub extras: BTreeMap<String, String>,
    /// Receives progress checkpoints.
    pub progress: Option<SharedProgress>,
}

impl Default for ConversionOptions {
    fn default() -> Self {
        Self {
            quality: None,
            width: None,
            height: None,
            preserve_aspect_ratio: true,
            background: None,
            dpi: None,
            page: None,
            extras: BTreeMap::new(),
            progress: None,
        }
    }
}

impl fmt::Debug for ConversionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionOptions")
            .field("quality", &self.quality)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("preserve_aspect_ratio", &self.preserve_aspect_ratio)
            .field("background", &self.background)
            .field("dpi", &self.dpi)
            .field("page", &self.page)
            .field("extras", &self.extras)
            .field("progress", &self.progress.as_ref().map(|_| "<dyn ProgressSink>"))
            .finish()
    }
}

impl ConversionOptions {
    pub fn with_quality(mut self, q: u32) -> Self {
        self.quality = Some(q);
        self
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    pub fn with_width(mut self, width: u32) -> Self {
        self.width = Some(width);
        self
    }

    pub fn with_height(mut self, height: u32) -> Self {
        self.height = Some(height);
        self
    }

    pub fn with_background(mut self, bg: impl Into<String>) -> Self {
        self.background = Some(bg.into());
        self
    }

    pub fn with_dpi(mut self, dpi: u32) -> Self {
        self.dpi = Some(dpi);
        self
    }

    pub fn with_page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extras.insert(key.into(), value.into());
        self
    }

    pub fn with_progress(mut self, sink: SharedProgress) -> Self {
        self.progress = Some(sink);
        self
    }

    pub fn preserve_aspect_ratio(mut self, keep: bool) -> Self {
        self.preserve_aspect_ratio = keep;
        self
    }

    /// Options summary recorded in telemetry start events. Excludes the sink.
    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "quality": self.quality,
            "width": self.width,
            "height": self.height,
            "preserveAspectRatio": self.preserve_aspect_ratio,
            "background": self.background,
            "dpi": self.dpi,
            "page": self.page,
            "extras": self.extras,
        })
    }
}

/// A complete conversion request.
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    pub input: ConversionInput,
    pub from: ImageFormat,
    pub to: ImageFormat,
    pub options: ConversionOptions,
}

impl ConversionRequest {
    pub fn new(input: impl Into<ConversionInput>, from: ImageFormat, to: ImageFormat) -> Self {
        Self {
            input: input.into(),
            from,
            to,
            options: ConversionOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ConversionOptions) -> Self {
        self.options = options;
        self
    }
}
