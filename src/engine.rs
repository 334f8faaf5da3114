//! High-level entry point: one engine owns the configuration, telemetry,
//! dependency cache and a registry pre-loaded with the built-in catalogue.

use crate::config::EngineConfig;
use crate::context::EngineContext;
use crate::converter::Converter;
use crate::converters::register_builtin;
use crate::error::ConverterError;
use crate::format::ImageFormat;
use crate::output::{ConversionOutput, ConversionResult};
use crate::registry::ConverterRegistry;
use crate::request::ConversionRequest;
use crate::telemetry::Telemetry;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Conversion engine.
///
/// ```rust,no_run
/// use formatshift::{ConversionEngine, ConversionRequest, EngineConfig, ImageFormat};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let engine = ConversionEngine::new(EngineConfig::default());
///     let svg = std::fs::read("logo.svg")?;
///     let request = ConversionRequest::new(svg, ImageFormat::Svg, ImageFormat::Png);
///     let output = engine.convert(request).await?;
///     std::fs::write("logo.png", output.payload.as_bytes())?;
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct ConversionEngine {
    registry: ConverterRegistry,
}

impl ConversionEngine {
    /// Engine with in-memory telemetry.
    pub fn new(config: EngineConfig) -> Self {
        Self::with_telemetry(config, Telemetry::in_memory())
    }

    /// Engine recording into caller-supplied stores.
    pub fn with_telemetry(config: EngineConfig, telemetry: Telemetry) -> Self {
        let ctx = Arc::new(EngineContext::new(config, Arc::new(telemetry)));
        let registry = ConverterRegistry::new(ctx);
        register_builtin(&registry);
        debug!("engine ready with {} converters", registry.len());
        Self { registry }
    }

    pub fn registry(&self) -> &ConverterRegistry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.registry.context().config
    }

    pub fn telemetry(&self) -> &Arc<Telemetry> {
        &self.registry.context().telemetry
    }

    /// Resolve the converter for a pair, or fail with `UnsupportedFormat`
    /// listing the targets reachable from `from`.
    pub async fn converter(
        &self,
        from: ImageFormat,
        to: ImageFormat,
    ) -> Result<Arc<Converter>, ConverterError> {
        match self.registry.get_converter(from, to).await {
            Some(converter) => Ok(converter),
            None => {
                let supported = self
                    .registry
                    .converters_from(from)
                    .into_iter()
                    .map(|d| d.to.to_string())
                    .collect();
                Err(ConverterError::unsupported_with_message(
                    to.as_str(),
                    supported,
                    format!(
                        "Conversion from {} to {} is not supported",
                        from.as_str().to_uppercase(),
                        to.as_str().to_uppercase()
                    ),
                ))
            }
        }
    }

    pub async fn convert(&self, request: ConversionRequest) -> ConversionResult {
        let converter = self.converter(request.from, request.to).await?;
        converter.convert(request.input, &request.options).await
    }

    /// Blocking wrapper around [`ConversionEngine::convert`].
    ///
    /// Creates a temporary tokio runtime internally; do not call from inside
    /// an async context.
    pub fn convert_sync(&self, request: ConversionRequest) -> ConversionResult {
        tokio::runtime::Runtime::new()
            .map_err(|e| ConverterError::conversion(format!("Failed to create tokio runtime: {e}")))?
            .block_on(self.convert(request))
    }
}

/// File name for a converted file: the original stem (directories and the
/// old extension dropped, unsafe characters replaced) plus the target
/// extension.
pub fn output_filename(original: &str, from: ImageFormat, to: ImageFormat) -> String {
    let name = original.rsplit(['/', '\\']).next().unwrap_or(original);
    let stem = match name.rsplit_once('.') {
        Some((stem, ext))
            if !stem.is_empty()
                && (ext.eq_ignore_ascii_case(from.extension())
                    || ext.parse::<ImageFormat>().is_ok()) =>
        {
            stem
        }
        _ => name,
    };
    let clean: String = stem
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let clean = clean.trim_matches(|c| c == '.' || c == '_');
    let clean = if clean.is_empty() { "converted" } else { clean };
    format!("{clean}.{}", to.extension())
}

/// Write a conversion result to `path` atomically (temp file, then rename).
pub async fn write_output(output: &ConversionOutput, path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp_path = path.with_extension(format!("{}.tmp", output.metadata.format.extension()));
    tokio::fs::write(&tmp_path, output.payload.as_bytes()).await?;
    tokio::fs::rename(&tmp_path, path).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn filenames() {
        assert_eq!(output_filename("logo.svg", ImageFormat::Svg, ImageFormat::Png), "logo.png");
        assert_eq!(
            output_filename("/tmp/my file.final.JPEG", ImageFormat::Jpg, ImageFormat::Svg),
            "my_file.final.svg"
        );
        assert_eq!(output_filename("..", ImageFormat::Svg, ImageFormat::Png), "converted.png");
        assert_eq!(output_filename("C:\\a\\b.pdf", ImageFormat::Pdf, ImageFormat::Svg), "b.svg");
        assert_eq!(output_filename("notes.v2", ImageFormat::Svg, ImageFormat::Html), "notes.v2.html");
    }

    #[tokio::test]
    async fn unregistered_pair_is_unsupported() {
        let engine = ConversionEngine::new(EngineConfig::default());
        let err = engine
            .convert(ConversionRequest::new(vec![1u8], ImageFormat::Ttf, ImageFormat::Mp4))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedFormat);
    }

    #[tokio::test]
    async fn atomic_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("out.svg");
        let out = ConversionOutput::text("<svg/>".into(), ImageFormat::Svg);
        write_output(&out, &path).await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "<svg/>");
        assert_eq!(std::fs::read_dir(path.parent().unwrap()).unwrap().count(), 1);
    }

    #[test]
    fn sync_wrapper() {
        let engine = ConversionEngine::new(EngineConfig::default());
        let svg = br#"<svg xmlns="http://www.w3.org/2000/svg" width="4" height="4"></svg>"#;
        let out = engine
            .convert_sync(ConversionRequest::new(svg.as_slice(), ImageFormat::Svg, ImageFormat::Html))
            .unwrap();
        assert!(out.payload.as_text().unwrap().contains("<svg"));
    }
}
