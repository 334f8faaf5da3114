//! # formatshift
//!
//! Pluggable file-format conversion engine.
//!
//! Converters are registered per `(source, target)` pair and built lazily on
//! first use. Every conversion runs through the same validation pipeline,
//! reports the same progress curve and fails with the same typed errors, so
//! callers never need to know which converter handled a pair.
//!
//! ## Pipeline Overview
//!
//! ```text
//! bytes / base64
//!  │
//!  ├─ 1. Lookup    registry resolves the pair, builds the converter once
//!  ├─ 2. Validate  size, magic bytes, structure, security scan, parameters   0.1
//!  ├─ 3. Load      heavy dependencies (font database), cached per engine     0.3
//!  ├─ 4. Transform converter-specific work                            0.5 → 0.7
//!  ├─ 5. Finish    metadata (sizes, duration, warnings)                      0.9
//!  └─ 6. Output    binary or text payload + metadata                         1.0
//! ```
//!
//! Recovery (retry, fallback strategies) is opt-in through [`recovery`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use formatshift::{ConversionEngine, ConversionOptions, ConversionRequest, EngineConfig, ImageFormat};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = ConversionEngine::new(EngineConfig::from_env()?);
//!     let svg = std::fs::read("logo.svg")?;
//!     let request = ConversionRequest::new(svg, ImageFormat::Svg, ImageFormat::Png)
//!         .with_options(ConversionOptions::default().with_size(200, 100));
//!     let output = engine.convert(request).await?;
//!     eprintln!("{}x{:?} in {}ms",
//!         output.metadata.width.unwrap_or(0),
//!         output.metadata.height,
//!         output.metadata.duration_ms);
//!     std::fs::write("logo.png", output.payload.as_bytes())?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature  | Default | Description |
//! |----------|---------|-------------|
//! | `cli`    | on      | Enables the `fmtshift` binary (clap + anyhow + indicatif + tracing-subscriber) |
//! | `vector` | on      | SVG → PNG/JPG/WEBP/BMP/GIF/TIFF/ICO via resvg |
//! | `remote` | on      | Pairs handled by a remote conversion service (reqwest) |
//!
//! Library-only use without the binary:
//! ```toml
//! formatshift = { version = "0.1", default-features = false, features = ["vector"] }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod context;
pub mod converter;
pub mod converters;
pub mod deps;
pub mod engine;
pub mod error;
pub mod format;
pub mod output;
pub mod progress;
pub mod recovery;
pub mod registry;
pub mod request;
pub mod store;
pub mod telemetry;
pub mod validation;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{EngineConfig, EngineConfigBuilder};
pub use context::EngineContext;
pub use converter::{Converter, ConverterDescriptor, Transform, TransformContext};
pub use engine::{output_filename, write_output, ConversionEngine};
pub use error::{BoxError, ConverterError, ErrorKind, ErrorResponse};
pub use format::ImageFormat;
pub use output::{ConversionMetadata, ConversionMethod, ConversionOutput, ConversionResult, Payload};
pub use progress::{ChannelProgress, ProgressReporter, ProgressSink, SharedProgress};
pub use recovery::{FallbackStrategy, ResilientConverter, RetryConfig};
pub use registry::{ConverterRegistry, TransformFactory};
pub use request::{ConversionInput, ConversionOptions, ConversionRequest};
pub use store::{JsonFileStore, KeyValueStore, MemoryStore, StoreError};
pub use telemetry::{Telemetry, TelemetryStats};
pub use validation::detect_format;
