//! End-to-end behaviour of the public engine API.
//!
//! Remote scenarios talk to a throwaway HTTP stub on 127.0.0.1; nothing here
//! needs network access or system fonts.

use async_trait::async_trait;
use formatshift::recovery::{convert_fn, with_fallback};
use formatshift::{
    BoxError, ConversionEngine, ConversionOptions, ConversionOutput, ConversionRequest,
    ConverterDescriptor, ConverterError, EngineConfig, ErrorKind, FallbackStrategy, ImageFormat,
    ResilientConverter, RetryConfig, Transform, TransformContext,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const SVG: &[u8] = br##"<svg xmlns="http://www.w3.org/2000/svg" width="40" height="20"><rect width="40" height="20" fill="#336699"/></svg>"##;

fn engine() -> ConversionEngine {
    ConversionEngine::new(
        EngineConfig::builder()
            .load_system_fonts(false)
            .build()
            .unwrap(),
    )
}

fn recorder() -> (Arc<Mutex<Vec<f64>>>, ConversionOptions) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = {
        let seen = Arc::clone(&seen);
        move |p: f64| seen.lock().unwrap().push(p)
    };
    (seen, ConversionOptions::default().with_progress(Arc::new(sink)))
}

// ── PNG helpers ──────────────────────────────────────────────────────────

fn chunk(out: &mut Vec<u8>, kind: &[u8; 4], data: &[u8]) {
    out.extend_from_slice(&(data.len() as u32).to_be_bytes());
    let mut body = kind.to_vec();
    body.extend_from_slice(data);
    out.extend_from_slice(&body);
    out.extend_from_slice(&crc32fast::hash(&body).to_be_bytes());
}

/// Header-only PNG declaring `w`x`h`; the pixel data is never decoded.
fn png_header(w: u32, h: u32) -> Vec<u8> {
    let mut png = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    let mut ihdr = Vec::new();
    ihdr.extend_from_slice(&w.to_be_bytes());
    ihdr.extend_from_slice(&h.to_be_bytes());
    ihdr.extend_from_slice(&[8, 6, 0, 0, 0]);
    chunk(&mut png, b"IHDR", &ihdr);
    chunk(&mut png, b"IDAT", &[0x78, 0x9C, 0x03, 0x00, 0x00, 0x00, 0x00, 0x01]);
    chunk(&mut png, b"IEND", &[]);
    png
}

fn small_png(w: u32, h: u32) -> Vec<u8> {
    let mut buf = std::io::Cursor::new(Vec::new());
    image::RgbaImage::new(w, h)
        .write_to(&mut buf, image::ImageFormat::Png)
        .unwrap();
    buf.into_inner()
}

// ── Scenarios ────────────────────────────────────────────────────────────

#[tokio::test]
async fn oversized_raster_is_rejected_before_vectorising() {
    let engine = engine();
    let (seen, options) = recorder();
    let err = engine
        .convert(
            ConversionRequest::new(png_header(5000, 5000), ImageFormat::Png, ImageFormat::Svg)
                .with_options(options),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Dimension);
    assert_eq!(err.code(), "DIMENSION_EXCEEDED");
    assert!(err.to_string().contains("5000x5000"), "{err}");
    assert!(seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn oversized_embed_target_is_rejected() {
    let engine = engine();
    let (seen, options) = recorder();
    let err = engine
        .convert(
            ConversionRequest::new(small_png(4, 4), ImageFormat::Png, ImageFormat::Svg)
                .with_options(options.with_size(100_000, 100_000)),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "DIMENSION_EXCEEDED");
    assert!(seen.lock().unwrap().is_empty());
}

#[cfg(feature = "vector")]
#[tokio::test]
async fn declared_svg_canvas_over_target_ceiling_is_rejected() {
    let engine = engine();
    let (seen, options) = recorder();
    let svg = br#"<svg xmlns="http://www.w3.org/2000/svg" width="100000" height="100000"></svg>"#;
    let err = engine
        .convert(
            ConversionRequest::new(svg.as_slice(), ImageFormat::Svg, ImageFormat::Png)
                .with_options(options),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "DIMENSION_EXCEEDED");
    assert!(err.to_string().contains("100000x100000"), "{err}");
    assert!(seen.lock().unwrap().is_empty());
}

#[cfg(feature = "vector")]
#[tokio::test]
async fn dpi_scaled_canvas_over_target_ceiling_is_rejected() {
    let engine = engine();
    let (seen, options) = recorder();
    let svg = br#"<svg xmlns="http://www.w3.org/2000/svg" width="10000" height="10000"></svg>"#;
    let err = engine
        .convert(
            ConversionRequest::new(svg.as_slice(), ImageFormat::Svg, ImageFormat::Png)
                .with_options(options.with_dpi(2400)),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "DIMENSION_EXCEEDED");
    assert!(seen.lock().unwrap().is_empty());
}

#[cfg(feature = "vector")]
#[tokio::test]
async fn svg_renders_to_exact_jpeg_size() {
    let engine = engine();
    let (seen, options) = recorder();
    let out = engine
        .convert(
            ConversionRequest::new(SVG, ImageFormat::Svg, ImageFormat::Jpg)
                .with_options(options.with_size(200, 100).with_quality(90)),
        )
        .await
        .unwrap();

    assert_eq!(out.mime_type, "image/jpeg");
    assert_eq!((out.metadata.width, out.metadata.height), (Some(200), Some(100)));
    assert_eq!(out.metadata.original_size, SVG.len());
    assert_eq!(out.metadata.size, out.payload.len());
    let img = image::load_from_memory(out.payload.as_bytes()).unwrap();
    assert_eq!((img.width(), img.height()), (200, 100));
    assert_eq!(*seen.lock().unwrap(), vec![0.1, 0.3, 0.5, 0.7, 0.9, 1.0]);
}

#[cfg(feature = "remote")]
mod remote {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one request with `status` and a JSON `body`, then close.
    async fn stub(status: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut tmp = [0u8; 4096];
            loop {
                let n = socket.read(&mut tmp).await.unwrap();
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&tmp[..n]);
                let text = String::from_utf8_lossy(&buf);
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text[..end]
                        .lines()
                        .find_map(|l| {
                            let (k, v) = l.split_once(':')?;
                            k.eq_ignore_ascii_case("content-length").then(|| v.trim().parse::<usize>().ok())?
                        })
                        .unwrap_or(0);
                    if buf.len() >= end + 4 + length {
                        break;
                    }
                }
            }
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        });
        format!("http://{addr}")
    }

    const PDF: &[u8] = b"%PDF-1.4\n1 0 obj\n<<>>\nendobj\n%%EOF\n";

    #[tokio::test]
    async fn remote_failure_surfaces_service_message() {
        let url = stub("500 Internal Server Error", r#"{"error":"engine overloaded"}"#).await;
        let engine = ConversionEngine::new(EngineConfig::builder().remote_base_url(url).build().unwrap());
        let err = engine
            .convert(ConversionRequest::new(PDF, ImageFormat::Pdf, ImageFormat::Svg))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Conversion);
        assert_eq!(err.code(), "API_REQUEST_FAILED");
        assert_eq!(err.status_code(), 500);
        assert_eq!(err.to_string(), "engine overloaded");
    }

    #[tokio::test]
    async fn remote_success_returns_svg_text() {
        let url = stub(
            "200 OK",
            r#"{"success":true,"data":"<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"1\" height=\"1\"/>"}"#,
        )
        .await;
        let engine = ConversionEngine::new(EngineConfig::builder().remote_base_url(url).build().unwrap());
        let out = engine
            .convert(ConversionRequest::new(PDF, ImageFormat::Pdf, ImageFormat::Svg))
            .await
            .unwrap();

        assert!(out.payload.as_text().unwrap().starts_with("<svg"));
        assert_eq!(out.metadata.method, formatshift::ConversionMethod::Remote);
    }

    #[tokio::test]
    async fn remote_pair_without_url_fails_to_load_once() {
        let engine = engine();
        let first = engine.converter(ImageFormat::Pdf, ImageFormat::Svg).await.unwrap();
        let second = engine.converter(ImageFormat::Pdf, ImageFormat::Svg).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(!first.is_available());

        let err = first.convert(PDF, &ConversionOptions::default()).await.unwrap_err();
        assert_eq!(err.code(), "LIBRARY_LOAD_FAILED");
        assert_eq!(engine.registry().load_count(), 1);
    }
}

#[tokio::test]
async fn script_in_svg_is_a_security_error() {
    let engine = engine();
    let calls = install_counter(&engine);
    let svg = br#"<svg xmlns="http://www.w3.org/2000/svg" width="4" height="4"><script>alert(1)</script></svg>"#;
    let err = engine
        .convert(ConversionRequest::new(svg.as_slice(), ImageFormat::Svg, ImageFormat::Html))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Security);
    assert_eq!(err.status_code(), 403);
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let relaxed = ConversionEngine::new(
        EngineConfig::builder()
            .enable_security_checks(false)
            .build()
            .unwrap(),
    );
    let calls = install_counter(&relaxed);
    assert!(relaxed
        .convert(ConversionRequest::new(svg.as_slice(), ImageFormat::Svg, ImageFormat::Html))
        .await
        .is_ok());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

// ── Properties ───────────────────────────────────────────────────────────

#[tokio::test]
async fn repeated_lookups_share_one_converter() {
    let engine = engine();
    let (a, b) = tokio::join!(
        engine.converter(ImageFormat::Svg, ImageFormat::Html),
        engine.converter(ImageFormat::Svg, ImageFormat::Html),
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(engine.registry().load_count(), 1);
}

#[tokio::test]
async fn global_size_ceiling_applies() {
    let engine = ConversionEngine::new(EngineConfig::builder().max_file_size(16).build().unwrap());
    let err = engine
        .convert(ConversionRequest::new(SVG, ImageFormat::Svg, ImageFormat::Html))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FileSize);
    assert_eq!(err.status_code(), 413);
}

#[tokio::test]
async fn svg_over_its_format_ceiling_never_reaches_the_transform() {
    let engine = engine();
    let calls = install_counter(&engine);
    let head = r#"<svg xmlns="http://www.w3.org/2000/svg" width="4" height="4"><!-- "#;
    let tail = " --></svg>";
    let limit = ImageFormat::Svg.size_limit() as usize;
    let svg = format!("{head}{}{tail}", "x".repeat(limit + 1 - head.len() - tail.len()));
    assert_eq!(svg.len(), limit + 1);

    let err = engine
        .convert(ConversionRequest::new(svg.into_bytes(), ImageFormat::Svg, ImageFormat::Html))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FileSize);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn configured_ceiling_below_format_ceiling_wins() {
    let engine = ConversionEngine::new(EngineConfig::builder().max_file_size(64).build().unwrap());
    let calls = install_counter(&engine);
    let err = engine
        .convert(ConversionRequest::new(SVG, ImageFormat::Svg, ImageFormat::Html))
        .await
        .unwrap_err();
    assert!(matches!(err, ConverterError::FileSize { max_size: 64, .. }), "{err:?}");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn lightweight_converter_skips_dependency_checkpoint() {
    let engine = engine();
    let (seen, options) = recorder();
    engine
        .convert(ConversionRequest::new(SVG, ImageFormat::Svg, ImageFormat::Html).with_options(options))
        .await
        .unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![0.1, 0.5, 0.7, 0.9, 1.0]);
}

#[tokio::test]
async fn telemetry_counts_each_pair() {
    let engine = engine();
    for _ in 0..2 {
        engine
            .convert(ConversionRequest::new(SVG, ImageFormat::Svg, ImageFormat::Html))
            .await
            .unwrap();
    }
    let stats = engine.telemetry().stats().unwrap();
    let pair = &stats.converters["svg-to-html"];
    assert_eq!((pair.total, pair.successful, pair.failed), (2, 2, 0));
    assert_eq!(engine.telemetry().in_flight().unwrap(), 0);
}

#[test]
fn blocking_callers_can_drive_the_engine() {
    let engine = engine();
    let out = tokio_test::block_on(
        engine.convert(ConversionRequest::new(SVG, ImageFormat::Svg, ImageFormat::Html)),
    )
    .unwrap();
    assert_eq!(out.mime_type, "text/html");
    assert_eq!(out.metadata.original_size, SVG.len());
}

/// Counts hook invocations; always succeeds.
struct Counting(Arc<AtomicU32>);

#[async_trait]
impl Transform for Counting {
    async fn transform(
        &self,
        _input: &[u8],
        _options: &ConversionOptions,
        _ctx: &TransformContext<'_>,
    ) -> Result<ConversionOutput, BoxError> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(ConversionOutput::text("<p>ok</p>".into(), ImageFormat::Html))
    }
}

fn install_counter(engine: &ConversionEngine) -> Arc<AtomicU32> {
    let calls = Arc::new(AtomicU32::new(0));
    let shared = Arc::clone(&calls);
    engine.registry().register_with(
        ConverterDescriptor::new(ImageFormat::Svg, ImageFormat::Html, true, "counting"),
        move |_| Ok(Counting(Arc::clone(&shared))),
    );
    calls
}

/// Fails with a non-engine error a fixed number of times.
struct Stubborn {
    failures: u32,
    calls: AtomicU32,
}

#[async_trait]
impl Transform for Stubborn {
    async fn transform(
        &self,
        _input: &[u8],
        _options: &ConversionOptions,
        _ctx: &TransformContext<'_>,
    ) -> Result<ConversionOutput, BoxError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            return Err(std::io::Error::other("renderer crashed").into());
        }
        Ok(ConversionOutput::text("<p>ok</p>".into(), ImageFormat::Html))
    }
}

fn install_stubborn(engine: &ConversionEngine, failures: u32) {
    engine.registry().register_with(
        ConverterDescriptor::new(ImageFormat::Svg, ImageFormat::Html, true, "flaky"),
        move |_| {
            Ok(Stubborn {
                failures,
                calls: AtomicU32::new(0),
            })
        },
    );
}

#[tokio::test]
async fn foreign_errors_are_wrapped() {
    let engine = engine();
    install_stubborn(&engine, u32::MAX);
    let err = engine
        .convert(ConversionRequest::new(SVG, ImageFormat::Svg, ImageFormat::Html))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conversion);
    assert_eq!(err.code(), "SVG_TO_HTML_FAILED");
}

#[tokio::test]
async fn retry_hook_fires_between_attempts() {
    let engine = engine();
    install_stubborn(&engine, 2);
    let converter = engine.converter(ImageFormat::Svg, ImageFormat::Html).await.unwrap();

    let hooks = Arc::new(AtomicU32::new(0));
    let counted = Arc::clone(&hooks);
    let (seen, options) = recorder();
    let out = ResilientConverter::new(converter)
        .with_retry(
            RetryConfig::default()
                .with_delays(Duration::from_millis(1), Duration::from_millis(2))
                .on_retry(move |_, _| {
                    counted.fetch_add(1, Ordering::SeqCst);
                }),
        )
        .convert(SVG, &options)
        .await
        .unwrap();

    assert_eq!(out.payload.as_text(), Some("<p>ok</p>"));
    assert_eq!(hooks.load(Ordering::SeqCst), 2);
    let seen = seen.lock().unwrap();
    assert!(seen.windows(2).all(|w| w[0] <= w[1]), "{seen:?}");
    assert_eq!(seen.last(), Some(&1.0));
}

#[tokio::test]
async fn failed_fallbacks_return_the_primary_error() {
    let engine = engine();
    let converter = engine.converter(ImageFormat::Png, ImageFormat::Svg).await.unwrap();
    let input = png_header(5000, 5000);
    let options = ConversionOptions::default().with_size(4500, 4500);

    let primary = Arc::clone(&converter);
    let err = with_fallback(
        || {
            let input = input.clone();
            let options = options.clone();
            async move { primary.convert(input, &options).await }
        },
        &[
            FallbackStrategy::quality_reduction(convert_fn(Arc::clone(&converter))),
            FallbackStrategy::dimension_reduction(convert_fn(Arc::clone(&converter))),
        ],
        &input,
        &options,
    )
    .await
    .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Dimension);
    assert!(matches!(err, ConverterError::Dimension { width: 5000, .. }));
}
