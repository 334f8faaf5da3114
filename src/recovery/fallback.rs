use crate::error::{ConverterError, ErrorKind};
use crate::format::ImageFormat;
use crate::output::ConversionResult;
use crate::request::ConversionOptions;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

/// Minimum quality a quality-reduction fallback will request.
const QUALITY_FLOOR: u32 = 50;
const QUALITY_STEP: u32 = 25;
const DEFAULT_QUALITY: u32 = 85;
const DIMENSION_SCALE: f64 = 0.75;

/// A re-runnable conversion: input bytes and options in, result out.
pub type ConvertFn =
    Arc<dyn Fn(Vec<u8>, ConversionOptions) -> BoxFuture<'static, ConversionResult> + Send + Sync>;

/// Like [`ConvertFn`] but with an explicit target format.
pub type ConvertToFn = Arc<
    dyn Fn(Vec<u8>, ConversionOptions, ImageFormat) -> BoxFuture<'static, ConversionResult>
        + Send
        + Sync,
>;

type Guard = Arc<dyn Fn(&ConverterError) -> bool + Send + Sync>;

/// An alternative execution tried after the primary operation fails, when
/// its guard matches the primary error.
#[derive(Clone)]
pub struct FallbackStrategy {
    name: String,
    guard: Guard,
    execute: ConvertFn,
}

impl std::fmt::Debug for FallbackStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackStrategy").field("name", &self.name).finish_non_exhaustive()
    }
}

impl FallbackStrategy {
    pub fn custom(
        name: impl Into<String>,
        guard: impl Fn(&ConverterError) -> bool + Send + Sync + 'static,
        execute: ConvertFn,
    ) -> Self {
        Self {
            name: name.into(),
            guard: Arc::new(guard),
            execute,
        }
    }

    /// Retry at a lower quality (25 points lower, never below 50) after a
    /// size or dimension failure.
    pub fn quality_reduction(convert: ConvertFn) -> Self {
        let execute: ConvertFn = Arc::new(move |input: Vec<u8>, mut options: ConversionOptions| {
            let q = options.quality.unwrap_or(DEFAULT_QUALITY);
            options.quality = Some(q.saturating_sub(QUALITY_STEP).max(QUALITY_FLOOR));
            convert(input, options)
        });
        Self::custom(
            "quality-reduction",
            |e| matches!(e.kind(), ErrorKind::FileSize | ErrorKind::Dimension),
            execute,
        )
    }

    /// Retry with requested width and height scaled by 0.75 after a
    /// dimension failure.
    pub fn dimension_reduction(convert: ConvertFn) -> Self {
        let execute: ConvertFn = Arc::new(move |input: Vec<u8>, mut options: ConversionOptions| {
            let shrink = |v: u32| ((f64::from(v) * DIMENSION_SCALE).floor() as u32).max(1);
            options.width = options.width.map(shrink);
            options.height = options.height.map(shrink);
            convert(input, options)
        });
        Self::custom("dimension-reduction", |e| e.kind() == ErrorKind::Dimension, execute)
    }

    /// Convert to `alternative` instead after an unsupported-format failure.
    pub fn format_change(alternative: ImageFormat, convert: ConvertToFn) -> Self {
        let execute: ConvertFn = Arc::new(move |input: Vec<u8>, options: ConversionOptions| {
            convert(input, options, alternative)
        });
        Self::custom(
            format!("format-change:{alternative}"),
            |e| e.kind() == ErrorKind::UnsupportedFormat,
            execute,
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn applies_to(&self, err: &ConverterError) -> bool {
        (self.guard)(err)
    }
}

/// Run `primary`; on failure try each applicable strategy in order.
///
/// The first strategy that succeeds wins. If none applies or all fail, the
/// primary error is returned, never a fallback's.
pub async fn with_fallback<F, Fut>(
    primary: F,
    strategies: &[FallbackStrategy],
    input: &[u8],
    options: &ConversionOptions,
) -> ConversionResult
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = ConversionResult>,
{
    let primary_err = match primary().await {
        Ok(out) => return Ok(out),
        Err(e) => e,
    };
    for strategy in strategies.iter().filter(|s| s.applies_to(&primary_err)) {
        info!("attempting fallback strategy {} after [{}]", strategy.name, primary_err.code());
        match (strategy.execute)(input.to_vec(), options.clone()).await {
            Ok(out) => return Ok(out),
            Err(e) => warn!("fallback strategy {} failed: {e}", strategy.name),
        }
    }
    Err(primary_err)
}
