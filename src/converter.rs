//! Converter contract and the fixed conversion template every pair runs.
//!
//! Concrete converters implement [`Transform`]; everything else (input
//! normalisation, validation, dependency loading, progress checkpoints,
//! telemetry and error classification) lives in [`Converter::convert`] and
//! cannot be reordered per implementation:
//!
//! ```text
//! input ─► normalise ─► track start ─► validate ─► 0.1
//!                                                   │
//!                        (heavy deps only) load ─► 0.3
//!                                                   │
//!              transform hook (reports 0.5 / 0.7) ──┤
//!                                                   ▼
//!                      0.9 ─► metadata ─► 1.0 ─► track complete
//! ```
//!
//! On failure the invocation is closed with `success = false` and the error
//! is returned: taxonomy errors unchanged, anything else (including a panic
//! inside the hook) as a `Conversion` error coded `<FROM>_TO_<TO>_FAILED`.

use crate::context::EngineContext;
use crate::error::{BoxError, ConverterError};
use crate::format::ImageFormat;
use crate::output::{ConversionOutput, ConversionResult};
use crate::progress::{checkpoint, ProgressReporter};
use crate::request::{ConversionInput, ConversionOptions};
use crate::telemetry::Invocation;
use crate::validation::{self, ValidatedInput, ValidationOptions};
use async_trait::async_trait;
use futures::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Static description of one format pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConverterDescriptor {
    /// `"{from}-to-{to}"`.
    pub name: String,
    pub from: ImageFormat,
    pub to: ImageFormat,
    /// False when the transform delegates to the remote service.
    pub is_client_side: bool,
    pub description: String,
}

impl ConverterDescriptor {
    pub fn new(
        from: ImageFormat,
        to: ImageFormat,
        is_client_side: bool,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: format!("{from}-to-{to}"),
            from,
            to,
            is_client_side,
            description: description.into(),
        }
    }
}

/// What a transform hook can see besides its input bytes.
pub struct TransformContext<'a> {
    pub descriptor: &'a ConverterDescriptor,
    pub engine: &'a EngineContext,
    /// Validation outcome for the bytes handed to the hook.
    pub input: &'a ValidatedInput,
    progress: &'a ProgressReporter,
    invocation: &'a Invocation,
}

impl TransformContext<'_> {
    /// Report progress to the caller's sink and the telemetry sampler.
    pub fn report(&self, progress: f64) {
        if self.progress.report(progress) {
            self.engine.telemetry.track_progress(self.invocation, progress);
        }
    }

    pub fn source_dimensions(&self) -> Option<(u32, u32)> {
        self.input.dimensions
    }
}

/// The part of a converter each format pair supplies.
#[async_trait]
pub trait Transform: Send + Sync {
    /// Whether [`Transform::load_dependencies`] does real work. When false the
    /// 0.3 checkpoint is skipped.
    fn has_heavy_dependencies(&self) -> bool {
        false
    }

    /// Label used for dependency-load telemetry.
    fn dependency_name(&self) -> &str {
        "main"
    }

    async fn load_dependencies(&self, _engine: &EngineContext) -> Result<(), BoxError> {
        Ok(())
    }

    /// Convert validated bytes. Should report
    /// [`checkpoint::TRANSFORM_STARTED`] and [`checkpoint::TRANSFORM_DONE`].
    async fn transform(
        &self,
        input: &[u8],
        options: &ConversionOptions,
        ctx: &TransformContext<'_>,
    ) -> Result<ConversionOutput, BoxError>;
}

enum Handler {
    Ready(Arc<dyn Transform>),
    /// Load failed: every call returns this error.
    Failed(ConverterError),
}

/// A loaded converter for one format pair.
pub struct Converter {
    descriptor: ConverterDescriptor,
    handler: Handler,
    ctx: Arc<EngineContext>,
}

impl std::fmt::Debug for Converter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Converter")
            .field("descriptor", &self.descriptor)
            .field("available", &self.is_available())
            .finish_non_exhaustive()
    }
}

impl Converter {
    pub fn new(
        descriptor: ConverterDescriptor,
        transform: Arc<dyn Transform>,
        ctx: Arc<EngineContext>,
    ) -> Self {
        Self {
            descriptor,
            handler: Handler::Ready(transform),
            ctx,
        }
    }

    /// A converter whose load failed; `convert` always returns `error`.
    pub fn failed(descriptor: ConverterDescriptor, error: ConverterError, ctx: Arc<EngineContext>) -> Self {
        Self {
            descriptor,
            handler: Handler::Failed(error),
            ctx,
        }
    }

    pub fn descriptor(&self) -> &ConverterDescriptor {
        &self.descriptor
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn from(&self) -> ImageFormat {
        self.descriptor.from
    }

    pub fn to(&self) -> ImageFormat {
        self.descriptor.to
    }

    pub fn is_available(&self) -> bool {
        matches!(self.handler, Handler::Ready(_))
    }

    pub fn load_error(&self) -> Option<&ConverterError> {
        match &self.handler {
            Handler::Failed(e) => Some(e),
            Handler::Ready(_) => None,
        }
    }

    /// Run one conversion through the fixed template.
    pub async fn convert(
        &self,
        input: impl Into<ConversionInput>,
        options: &ConversionOptions,
    ) -> ConversionResult {
        let transform = match &self.handler {
            Handler::Ready(t) => Arc::clone(t),
            Handler::Failed(e) => return Err(e.clone()),
        };

        // ── Step 1: Normalise ────────────────────────────────────────────
        let bytes = input.into().into_bytes()?;

        // ── Step 2: Start event ──────────────────────────────────────────
        let telemetry = &self.ctx.telemetry;
        let invocation = telemetry.track_start(
            self.descriptor.from,
            self.descriptor.to,
            bytes.len(),
            options.summary(),
        );
        let reporter = ProgressReporter::new(options.progress.clone());

        match self
            .run(transform.as_ref(), bytes, options, &reporter, &invocation)
            .await
        {
            Ok(output) => {
                info!(
                    "{}: {} -> {} bytes in {}ms",
                    self.descriptor.name,
                    output.metadata.original_size,
                    output.metadata.size,
                    output.metadata.duration_ms
                );
                telemetry.track_complete(invocation, true, Some(output.payload.len()), None);
                Ok(output)
            }
            Err(e) => {
                warn!("{} failed [{}]: {e}", self.descriptor.name, e.code());
                telemetry.track_complete(invocation, false, None, Some(&e.to_string()));
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        transform: &dyn Transform,
        bytes: Vec<u8>,
        options: &ConversionOptions,
        reporter: &ProgressReporter,
        invocation: &Invocation,
    ) -> ConversionResult {
        let started = Instant::now();
        let d = &self.descriptor;
        let original_size = bytes.len();

        // ── Step 3: Validate ─────────────────────────────────────────────
        let mut validated =
            validation::validate(&bytes, &ValidationOptions::for_pair(d.from, d.to, &self.ctx.config))?;
        validation::is_conversion_supported(d.from, d.to)?;
        validation::validate_conversion_params(options, d.from, d.to)?;
        if let Some(src) = validated.dimensions {
            validation::checked_output_dimensions(src, d.from, d.to, options)?;
        }
        let data = validated.repaired.take().unwrap_or(bytes);

        let tctx = TransformContext {
            descriptor: d,
            engine: &self.ctx,
            input: &validated,
            progress: reporter,
            invocation,
        };
        tctx.report(checkpoint::VALIDATED);

        // ── Step 4: Dependencies ─────────────────────────────────────────
        if transform.has_heavy_dependencies() {
            self.load_dependencies(transform).await?;
            tctx.report(checkpoint::DEPENDENCIES_READY);
        }

        // ── Step 5: Transform ────────────────────────────────────────────
        let outcome = AssertUnwindSafe(transform.transform(&data, options, &tctx))
            .catch_unwind()
            .await;
        let mut output = match outcome {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(self.classify(e)),
            Err(panic) => return Err(self.classify(panic_message(panic).into())),
        };
        tctx.report(checkpoint::POST_PROCESSED);

        // ── Step 6: Metadata ─────────────────────────────────────────────
        let meta = &mut output.metadata;
        meta.size = output.payload.len();
        meta.original_size = original_size;
        meta.duration_ms = started.elapsed().as_millis() as u64;
        if meta.warning.is_none() {
            meta.warning = validated.warning.clone();
        }

        tctx.report(checkpoint::COMPLETE);
        Ok(output)
    }

    async fn load_dependencies(&self, transform: &dyn Transform) -> Result<(), ConverterError> {
        let started = Instant::now();
        let result = AssertUnwindSafe(transform.load_dependencies(&self.ctx))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(panic_message(panic).into()));
        let elapsed = started.elapsed().as_millis() as u64;
        self.ctx.telemetry.track_dependency_load(
            &self.descriptor.name,
            transform.dependency_name(),
            result.is_ok(),
            elapsed,
        );
        result.map_err(|e| {
            ConverterError::conversion_with_code(
                format!(
                    "Failed to load required libraries for {}: {e}",
                    self.descriptor.name
                ),
                "LIBRARY_LOAD_FAILED",
            )
        })?;
        debug!("{}: dependencies ready in {elapsed}ms", self.descriptor.name);
        Ok(())
    }

    /// Pass taxonomy errors through, wrap everything else.
    fn classify(&self, err: BoxError) -> ConverterError {
        match err.downcast::<ConverterError>() {
            Ok(e) => *e,
            Err(other) => ConverterError::wrap_unknown(
                self.descriptor.from.as_str(),
                self.descriptor.to.as_str(),
                &other.to_string(),
            ),
        }
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "transform panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::progress::ProgressSink;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const SVG: &str = r#"<svg xmlns="http://www.w3.org/2000/svg" width="8" height="8"><rect width="8" height="8"/></svg>"#;

    enum Behaviour {
        Ok,
        Foreign,
        Typed,
        Panic,
    }

    struct Probe {
        behaviour: Behaviour,
        heavy: bool,
        fail_load: bool,
        calls: AtomicUsize,
    }

    impl Probe {
        fn new(behaviour: Behaviour) -> Self {
            Self {
                behaviour,
                heavy: false,
                fail_load: false,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Transform for Probe {
        fn has_heavy_dependencies(&self) -> bool {
            self.heavy
        }

        async fn load_dependencies(&self, _engine: &EngineContext) -> Result<(), BoxError> {
            if self.fail_load {
                return Err("wasm module missing".into());
            }
            Ok(())
        }

        async fn transform(
            &self,
            input: &[u8],
            _options: &ConversionOptions,
            ctx: &TransformContext<'_>,
        ) -> Result<ConversionOutput, BoxError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            ctx.report(checkpoint::TRANSFORM_STARTED);
            match self.behaviour {
                Behaviour::Ok => {}
                Behaviour::Foreign => return Err("decoder exploded".into()),
                Behaviour::Typed => return Err(ConverterError::timeout("slow").into()),
                Behaviour::Panic => panic!("boom"),
            }
            ctx.report(checkpoint::TRANSFORM_DONE);
            Ok(ConversionOutput::binary(input.to_vec(), ImageFormat::Png))
        }
    }

    fn converter(probe: Arc<Probe>) -> (Converter, Arc<EngineContext>) {
        let ctx = Arc::new(EngineContext::default());
        let d = ConverterDescriptor::new(ImageFormat::Svg, ImageFormat::Png, true, "probe");
        (Converter::new(d, probe, Arc::clone(&ctx)), ctx)
    }

    fn recorder() -> (Arc<Mutex<Vec<f64>>>, ConversionOptions) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let seen = Arc::clone(&seen);
            move |p: f64| seen.lock().unwrap().push(p)
        };
        let opts = ConversionOptions::default().with_progress(Arc::new(sink) as Arc<dyn ProgressSink>);
        (seen, opts)
    }

    #[tokio::test]
    async fn success_reports_full_curve() {
        let probe = Arc::new(Probe {
            heavy: true,
            ..Probe::new(Behaviour::Ok)
        });
        let (conv, ctx) = converter(Arc::clone(&probe));
        let (seen, opts) = recorder();
        let out = conv.convert(SVG.as_bytes(), &opts).await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![0.1, 0.3, 0.5, 0.7, 0.9, 1.0]);
        assert_eq!(out.metadata.original_size, SVG.len());
        let stats = ctx.telemetry.stats().unwrap();
        assert_eq!(stats.converters["svg-to-png"].successful, 1);
        assert_eq!(stats.libraries["svg-to-png-main"].successful, 1);
        assert_eq!(ctx.telemetry.in_flight().unwrap(), 0);
    }

    #[tokio::test]
    async fn lightweight_skips_dependency_checkpoint() {
        let (conv, _) = converter(Arc::new(Probe::new(Behaviour::Ok)));
        let (seen, opts) = recorder();
        conv.convert(SVG.as_bytes(), &opts).await.unwrap();
        assert!(!seen.lock().unwrap().contains(&0.3));
    }

    #[tokio::test]
    async fn foreign_error_is_wrapped() {
        let (conv, ctx) = converter(Arc::new(Probe::new(Behaviour::Foreign)));
        let err = conv.convert(SVG.as_bytes(), &ConversionOptions::default()).await.unwrap_err();
        assert_eq!(err.code(), "SVG_TO_PNG_FAILED");
        assert_eq!(ctx.telemetry.stats().unwrap().converters["svg-to-png"].failed, 1);
    }

    #[tokio::test]
    async fn panic_is_wrapped() {
        let (conv, _) = converter(Arc::new(Probe::new(Behaviour::Panic)));
        let err = conv.convert(SVG.as_bytes(), &ConversionOptions::default()).await.unwrap_err();
        assert_eq!(err.code(), "SVG_TO_PNG_FAILED");
    }

    #[tokio::test]
    async fn taxonomy_error_passes_through() {
        let (conv, _) = converter(Arc::new(Probe::new(Behaviour::Typed)));
        let err = conv.convert(SVG.as_bytes(), &ConversionOptions::default()).await.unwrap_err();
        assert_eq!(err.code(), "CONVERSION_TIMEOUT");
    }

    #[tokio::test]
    async fn dependency_failure_is_library_load_failed() {
        let probe = Arc::new(Probe {
            heavy: true,
            fail_load: true,
            ..Probe::new(Behaviour::Ok)
        });
        let (conv, ctx) = converter(Arc::clone(&probe));
        let err = conv.convert(SVG.as_bytes(), &ConversionOptions::default()).await.unwrap_err();
        assert_eq!(err.code(), "LIBRARY_LOAD_FAILED");
        assert!(err.to_string().contains("svg-to-png"));
        assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
        assert_eq!(ctx.telemetry.stats().unwrap().libraries["svg-to-png-main"].failed, 1);
    }

    #[tokio::test]
    async fn validation_failure_skips_transform() {
        let probe = Arc::new(Probe::new(Behaviour::Ok));
        let (conv, _) = converter(Arc::clone(&probe));
        let err = conv.convert(b"not an svg".as_slice(), &ConversionOptions::default()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FileValidation);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn base64_input_is_accepted() {
        use base64::Engine as _;
        let (conv, _) = converter(Arc::new(Probe::new(Behaviour::Ok)));
        let b64 = base64::engine::general_purpose::STANDARD.encode(SVG);
        let out = conv
            .convert(ConversionInput::Base64(b64), &ConversionOptions::default())
            .await
            .unwrap();
        assert_eq!(out.payload.as_bytes(), SVG.as_bytes());
    }

    #[tokio::test]
    async fn failed_handler_returns_cached_error() {
        let ctx = Arc::new(EngineContext::default());
        let d = ConverterDescriptor::new(ImageFormat::Pdf, ImageFormat::Svg, false, "remote");
        let conv = Converter::failed(d, ConverterError::conversion("no service"), ctx);
        assert!(!conv.is_available());
        let err = conv.convert(vec![1u8], &ConversionOptions::default()).await.unwrap_err();
        assert_eq!(err.to_string(), "no service");
    }
}
