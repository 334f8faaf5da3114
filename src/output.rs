//! Result types returned by a conversion.

use crate::error::ConverterError;
use crate::format::ImageFormat;
use base64::Engine as _;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;

/// Converted content.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Binary(Vec<u8>),
    Text(String),
}

impl Payload {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Binary(b) => b,
            Self::Text(t) => t.as_bytes(),
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(t) => Some(t),
            Self::Binary(b) => std::str::from_utf8(b).ok(),
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Self::Binary(b) => b,
            Self::Text(t) => t.into_bytes(),
        }
    }
}

impl Serialize for Payload {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Text(t) => s.serialize_str(t),
            Self::Binary(b) => {
                s.serialize_str(&base64::engine::general_purpose::STANDARD.encode(b))
            }
        }
    }
}

/// How the payload was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversionMethod {
    Local,
    Remote,
}

/// Metadata attached to every successful conversion.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionMetadata {
    pub format: ImageFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    /// Payload size in bytes.
    pub size: usize,
    pub original_size: usize,
    pub method: ConversionMethod,
    pub duration_ms: u64,
    /// Non-fatal notice, e.g. the input was repaired before conversion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    /// Format-specific extras.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extras: BTreeMap<String, serde_json::Value>,
}

impl ConversionMetadata {
    pub fn new(format: ImageFormat) -> Self {
        Self {
            format,
            width: None,
            height: None,
            size: 0,
            original_size: 0,
            method: ConversionMethod::Local,
            duration_ms: 0,
            warning: None,
            extras: BTreeMap::new(),
        }
    }
}

/// Successful conversion: payload, MIME type and metadata are always present.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionOutput {
    #[serde(rename = "data")]
    pub payload: Payload,
    pub mime_type: String,
    pub metadata: ConversionMetadata,
}

impl ConversionOutput {
    pub fn binary(bytes: Vec<u8>, format: ImageFormat) -> Self {
        Self::build(Payload::Binary(bytes), format)
    }

    pub fn text(text: String, format: ImageFormat) -> Self {
        Self::build(Payload::Text(text), format)
    }

    fn build(payload: Payload, format: ImageFormat) -> Self {
        let mut metadata = ConversionMetadata::new(format);
        metadata.size = payload.len();
        Self {
            payload,
            mime_type: format.mime_type().to_string(),
            metadata,
        }
    }

    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.metadata.width = Some(width);
        self.metadata.height = Some(height);
        self
    }

    pub fn with_method(mut self, method: ConversionMethod) -> Self {
        self.metadata.method = method;
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.extras.insert(key.into(), value);
        self
    }
}

/// Outcome of a conversion: success carries a payload, failure carries an
/// error, never both and never neither.
pub type ConversionResult = Result<ConversionOutput, ConverterError>;
