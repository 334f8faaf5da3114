//! Converters delegated to a remote conversion service.
//!
//! Each pair posts a multipart form to
//! `{remote_base_url}/api/convert/{from}-to-{to}`: the file as `file`, plus
//! the conversion options as string fields. The service answers with either
//! the converted body (typed by `Content-Type`) or a JSON envelope
//! `{"data": ...}` / `{"error": ...}`.
//!
//! Without a configured base URL the factory fails, so the registry caches a
//! failed converter for every remote pair.

use crate::config::EngineConfig;
use crate::converter::{Transform, TransformContext};
use crate::error::{BoxError, ConverterError};
use crate::format::ImageFormat;
use crate::output::{ConversionMethod, ConversionOutput};
use crate::progress::checkpoint;
use crate::request::ConversionOptions;
use crate::validation::probe::svg_dimensions;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::header::CONTENT_TYPE;
use reqwest::multipart::{Form, Part};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Smallest well-formed EMF: header record plus EOF record.
const MIN_EMF_BYTES: usize = 88;
/// Non-JSON error bodies longer than this are replaced by a generic message.
const MAX_ERROR_TEXT: usize = 1000;

/// Body of a successful response.
#[derive(Debug, Clone, PartialEq)]
enum RemoteBody {
    Text(String),
    Binary(Vec<u8>),
}

/// HTTP client bound to one service root.
#[derive(Debug, Clone)]
pub struct RemoteClient {
    http: reqwest::Client,
    base_url: String,
    timeout_secs: u64,
}

impl RemoteClient {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self, ConverterError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| {
                ConverterError::conversion_with_code(
                    format!("Failed to build HTTP client: {e}"),
                    "API_CLIENT_FAILED",
                )
            })?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout_secs,
        })
    }

    pub fn endpoint(&self, from: ImageFormat, to: ImageFormat) -> String {
        format!("{}/api/convert/{from}-to-{to}", self.base_url)
    }

    async fn convert(
        &self,
        from: ImageFormat,
        to: ImageFormat,
        input: Vec<u8>,
        options: &ConversionOptions,
    ) -> Result<RemoteBody, ConverterError> {
        let url = self.endpoint(from, to);
        let form = build_form(from, input, options)?;
        info!("POST {url}");

        let response = self.http.post(&url).multipart(form).send().await.map_err(|e| {
            if e.is_timeout() {
                ConverterError::timeout(format!(
                    "Remote conversion timed out after {}s",
                    self.timeout_secs
                ))
            } else {
                ConverterError::conversion_with_code(
                    format!("Remote conversion service unreachable: {e}"),
                    "API_REQUEST_FAILED",
                )
            }
        })?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();
        let body = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                ConverterError::timeout(format!(
                    "Remote conversion timed out after {}s",
                    self.timeout_secs
                ))
            } else {
                ConverterError::conversion_with_code(
                    format!("Failed to read remote response: {e}"),
                    "API_REQUEST_FAILED",
                )
            }
        })?;
        debug!("{url}: HTTP {status}, {content_type:?}, {} bytes", body.len());

        if !status.is_success() {
            return Err(ConverterError::Conversion {
                message: error_message(status.as_u16(), &content_type, &body),
                code: "API_REQUEST_FAILED".into(),
                status: status.as_u16(),
            });
        }
        parse_body(to, &content_type, body.to_vec())
    }
}

fn build_form(from: ImageFormat, input: Vec<u8>, options: &ConversionOptions) -> Result<Form, ConverterError> {
    let part = Part::bytes(input)
        .file_name(format!("input.{}", from.extension()))
        .mime_str(from.mime_type())
        .map_err(|e| ConverterError::conversion(format!("Invalid upload MIME type: {e}")))?;
    let mut form = Form::new()
        .part("file", part)
        .text("preserveAspectRatio", options.preserve_aspect_ratio.to_string());
    let fields = [
        ("width", options.width),
        ("height", options.height),
        ("quality", options.quality),
        ("dpi", options.dpi),
        ("page", options.page),
    ];
    for (name, value) in fields {
        if let Some(v) = value {
            form = form.text(name, v.to_string());
        }
    }
    if let Some(bg) = &options.background {
        form = form.text("background", bg.clone());
    }
    for (k, v) in &options.extras {
        form = form.text(k.clone(), v.clone());
    }
    Ok(form)
}

/// Message for a non-success response: JSON `error`/`message`, else a short
/// text body, else the status line.
fn error_message(status: u16, content_type: &str, body: &[u8]) -> String {
    let fallback = format!("Request failed with status {status}");
    if content_type.contains("application/json") {
        return serde_json::from_slice::<serde_json::Value>(body)
            .ok()
            .and_then(|v| {
                ["error", "message"]
                    .iter()
                    .find_map(|k| v.get(*k).and_then(|m| m.as_str()).map(str::to_string))
            })
            .unwrap_or(fallback);
    }
    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if !text.is_empty() && text.len() < MAX_ERROR_TEXT {
        text.to_string()
    } else {
        fallback
    }
}

fn parse_body(to: ImageFormat, content_type: &str, body: Vec<u8>) -> Result<RemoteBody, ConverterError> {
    if content_type.contains("application/json") {
        let envelope: serde_json::Value = serde_json::from_slice(&body).map_err(|_| {
            ConverterError::conversion_with_code("Invalid response format", "INVALID_RESPONSE")
        })?;
        if let Some(data) = envelope.get("data").and_then(|d| d.as_str()) {
            return Ok(if to.is_markup() {
                RemoteBody::Text(data.to_string())
            } else {
                let raw = data.rsplit_once("base64,").map_or(data, |(_, b64)| b64);
                RemoteBody::Binary(STANDARD.decode(raw.trim()).map_err(|_| {
                    ConverterError::conversion_with_code(
                        "Remote service returned undecodable data",
                        "INVALID_RESPONSE",
                    )
                })?)
            });
        }
        if let Some(error) = envelope.get("error").and_then(|e| e.as_str()) {
            return Err(ConverterError::conversion(error));
        }
        return Err(ConverterError::conversion_with_code(
            "Invalid response format",
            "INVALID_RESPONSE",
        ));
    }
    if to == ImageFormat::Svg {
        return Ok(RemoteBody::Text(String::from_utf8_lossy(&body).into_owned()));
    }
    Ok(RemoteBody::Binary(body))
}

/// Reject payloads that cannot be what the target format claims.
fn check_payload(to: ImageFormat, body: &RemoteBody) -> Result<(), ConverterError> {
    match (to, body) {
        (ImageFormat::Svg, RemoteBody::Text(s)) if !(s.contains("<svg") || s.contains("<?xml")) => {
            Err(ConverterError::conversion_with_code(
                "Invalid SVG data received",
                "INVALID_SVG_DATA",
            ))
        }
        (ImageFormat::Emf, RemoteBody::Binary(b)) if b.len() < MIN_EMF_BYTES => {
            Err(ConverterError::conversion_with_code(
                "Invalid EMF data received",
                "INVALID_EMF_DATA",
            ))
        }
        _ => Ok(()),
    }
}

#[derive(Debug, Clone)]
pub struct RemoteTransform {
    from: ImageFormat,
    to: ImageFormat,
    client: RemoteClient,
}

impl RemoteTransform {
    pub fn from_config(
        from: ImageFormat,
        to: ImageFormat,
        config: &EngineConfig,
    ) -> Result<Self, ConverterError> {
        let base = config.remote_base_url.as_deref().ok_or_else(|| {
            ConverterError::conversion_with_code(
                "Remote conversion service is not configured (set FORMATSHIFT_REMOTE_URL)",
                "REMOTE_NOT_CONFIGURED",
            )
        })?;
        Ok(Self {
            from,
            to,
            client: RemoteClient::new(base, config.remote_timeout_secs)?,
        })
    }
}

#[async_trait]
impl Transform for RemoteTransform {
    async fn transform(
        &self,
        input: &[u8],
        options: &ConversionOptions,
        ctx: &TransformContext<'_>,
    ) -> Result<ConversionOutput, BoxError> {
        ctx.report(checkpoint::TRANSFORM_STARTED);
        let started = Instant::now();
        let body = self
            .client
            .convert(self.from, self.to, input.to_vec(), options)
            .await?;
        check_payload(self.to, &body)?;
        ctx.report(checkpoint::TRANSFORM_DONE);

        let mut output = match body {
            RemoteBody::Text(text) => {
                let dims = svg_dimensions(&text);
                let out = ConversionOutput::text(text, self.to);
                match dims {
                    Some((w, h)) => out.with_dimensions(w, h),
                    None => out,
                }
            }
            RemoteBody::Binary(bytes) => ConversionOutput::binary(bytes, self.to),
        };
        output = output
            .with_method(ConversionMethod::Remote)
            .with_extra("endpoint", self.client.endpoint(self.from, self.to).into())
            .with_extra("remoteMs", (started.elapsed().as_millis() as u64).into());
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_error_message() {
        let msg = error_message(500, "application/json", br#"{"error":"engine overloaded"}"#);
        assert_eq!(msg, "engine overloaded");
        let msg = error_message(502, "application/json; charset=utf-8", br#"{"message":"bad gateway"}"#);
        assert_eq!(msg, "bad gateway");
    }

    #[test]
    fn text_and_fallback_error_message() {
        assert_eq!(error_message(503, "text/plain", b"maintenance"), "maintenance");
        let long = vec![b'x'; 2000];
        assert_eq!(error_message(503, "text/html", &long), "Request failed with status 503");
        assert_eq!(error_message(500, "application/json", b"not json"), "Request failed with status 500");
    }

    #[test]
    fn envelope_variants() {
        let ok = parse_body(ImageFormat::Svg, "application/json", br#"{"data":"<svg/>"}"#.to_vec()).unwrap();
        assert_eq!(ok, RemoteBody::Text("<svg/>".into()));

        let err = parse_body(ImageFormat::Svg, "application/json", br#"{"error":"nope"}"#.to_vec()).unwrap_err();
        assert_eq!((err.code(), err.to_string().as_str()), ("CONVERSION_FAILED", "nope"));

        let err = parse_body(ImageFormat::Svg, "application/json", b"{}".to_vec()).unwrap_err();
        assert_eq!(err.code(), "INVALID_RESPONSE");
    }

    #[test]
    fn binary_envelope_is_base64() {
        let b64 = STANDARD.encode([1u8, 2, 3]);
        let body = format!(r#"{{"data":"data:application/pdf;base64,{b64}"}}"#);
        let parsed = parse_body(ImageFormat::Pdf, "application/json", body.into_bytes()).unwrap();
        assert_eq!(parsed, RemoteBody::Binary(vec![1, 2, 3]));
    }

    #[test]
    fn payload_checks() {
        let err = check_payload(ImageFormat::Svg, &RemoteBody::Text("hello".into())).unwrap_err();
        assert_eq!(err.code(), "INVALID_SVG_DATA");
        let err = check_payload(ImageFormat::Emf, &RemoteBody::Binary(vec![0; 10])).unwrap_err();
        assert_eq!(err.code(), "INVALID_EMF_DATA");
        assert!(check_payload(ImageFormat::Emf, &RemoteBody::Binary(vec![0; 88])).is_ok());
    }

    #[test]
    fn missing_base_url_fails_to_load() {
        let err = RemoteTransform::from_config(ImageFormat::Pdf, ImageFormat::Svg, &EngineConfig::default())
            .unwrap_err();
        assert_eq!(err.code(), "REMOTE_NOT_CONFIGURED");
    }

    #[test]
    fn endpoint_shape() {
        let client = RemoteClient::new("http://localhost:9000/", 5).unwrap();
        assert_eq!(
            client.endpoint(ImageFormat::Eps, ImageFormat::Svg),
            "http://localhost:9000/api/convert/eps-to-svg"
        );
    }
}
