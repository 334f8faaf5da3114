use super::fallback::{with_fallback, ConvertFn, FallbackStrategy};
use super::retry::{with_retry, RetryConfig};
use crate::converter::Converter;
use crate::error::ConverterError;
use crate::output::ConversionResult;
use crate::progress::{ProgressReporter, SharedProgress};
use crate::request::{ConversionInput, ConversionOptions};
use futures::future::BoxFuture;
use std::sync::Arc;

pub type ErrorObserver = Arc<dyn Fn(&ConverterError) + Send + Sync>;

/// Expose a converter as a re-runnable [`ConvertFn`] for fallback strategies.
pub fn convert_fn(converter: Arc<Converter>) -> ConvertFn {
    Arc::new(move |input: Vec<u8>, options: ConversionOptions| {
        let converter = Arc::clone(&converter);
        Box::pin(async move { converter.convert(input, &options).await })
            as BoxFuture<'static, ConversionResult>
    })
}

/// A converter wrapped in opt-in recovery.
///
/// Each retry attempt runs the primary conversion followed by the fallback
/// chain. The caller's progress sink sees one non-decreasing sequence across
/// all attempts.
pub struct ResilientConverter {
    converter: Arc<Converter>,
    retry: Option<RetryConfig>,
    fallbacks: Vec<FallbackStrategy>,
    on_error: Option<ErrorObserver>,
}

impl std::fmt::Debug for ResilientConverter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientConverter")
            .field("converter", &self.converter.name())
            .field("retry", &self.retry)
            .field("fallbacks", &self.fallbacks)
            .finish_non_exhaustive()
    }
}

impl ResilientConverter {
    pub fn new(converter: Arc<Converter>) -> Self {
        Self {
            converter,
            retry: None,
            fallbacks: Vec::new(),
            on_error: None,
        }
    }

    pub fn with_retry(mut self, config: RetryConfig) -> Self {
        self.retry = Some(config);
        self
    }

    pub fn with_fallback(mut self, strategy: FallbackStrategy) -> Self {
        self.fallbacks.push(strategy);
        self
    }

    /// Called once with the final error when every recovery path failed.
    pub fn on_error(mut self, observer: impl Fn(&ConverterError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(observer));
        self
    }

    pub fn converter(&self) -> &Arc<Converter> {
        &self.converter
    }

    pub async fn convert(
        &self,
        input: impl Into<ConversionInput>,
        options: &ConversionOptions,
    ) -> ConversionResult {
        let bytes = input.into().into_bytes()?;
        let reporter = Arc::new(ProgressReporter::new(options.progress.clone()));
        let mut options = options.clone();
        options.progress = Some(reporter as SharedProgress);

        let converter = &self.converter;
        let fallbacks = self.fallbacks.as_slice();
        let bytes = bytes.as_slice();
        let options = &options;
        let attempt = move || async move {
            with_fallback(
                move || converter.convert(bytes.to_vec(), options),
                fallbacks,
                bytes,
                options,
            )
            .await
        };

        let result = match &self.retry {
            Some(config) => with_retry(config, attempt).await,
            None => attempt().await,
        };
        if let (Err(e), Some(observer)) = (&result, &self.on_error) {
            observer(e);
        }
        result
    }
}
