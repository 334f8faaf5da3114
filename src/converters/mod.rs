//! Built-in converter catalogue.
//!
//! | Pair                                   | Module        | Runs   |
//! |----------------------------------------|---------------|--------|
//! | png/jpg/gif/webp/bmp/tiff/ico → svg    | [`embed`]     | local  |
//! | svg → html                             | [`markup`]    | local  |
//! | svg → png/jpg/webp/bmp/gif/ico/tiff    | `rasterize`   | local (`vector` feature) |
//! | ai/eps/pdf/emf/wmf/cdr/avif/heic → svg | `remote`      | remote (`remote` feature) |
//! | svg → emf/wmf/eps/pdf                  | `remote`      | remote (`remote` feature) |

pub mod embed;
pub mod markup;
#[cfg(feature = "vector")]
pub mod rasterize;
#[cfg(feature = "remote")]
pub mod remote;

use crate::converter::ConverterDescriptor;
use crate::error::BoxError;
use crate::format::ImageFormat;
use crate::registry::ConverterRegistry;
#[cfg(not(all(feature = "vector", feature = "remote")))]
use crate::{
    context::EngineContext,
    converter::Transform,
    error::ConverterError,
    registry::{TransformFactory, TransformFuture},
};
#[cfg(not(all(feature = "vector", feature = "remote")))]
use std::sync::Arc;

/// Raster formats that can be wrapped into an SVG document.
pub const EMBEDDABLE_RASTERS: [ImageFormat; 7] = [
    ImageFormat::Png,
    ImageFormat::Jpg,
    ImageFormat::Gif,
    ImageFormat::Webp,
    ImageFormat::Bmp,
    ImageFormat::Tiff,
    ImageFormat::Ico,
];

/// Raster formats SVG can be rendered to.
pub const RASTER_TARGETS: [ImageFormat; 7] = [
    ImageFormat::Png,
    ImageFormat::Jpg,
    ImageFormat::Webp,
    ImageFormat::Bmp,
    ImageFormat::Gif,
    ImageFormat::Ico,
    ImageFormat::Tiff,
];

/// Sources the remote service can turn into SVG.
pub const REMOTE_TO_SVG: [ImageFormat; 8] = [
    ImageFormat::Ai,
    ImageFormat::Eps,
    ImageFormat::Pdf,
    ImageFormat::Emf,
    ImageFormat::Wmf,
    ImageFormat::Cdr,
    ImageFormat::Avif,
    ImageFormat::Heic,
];

/// Targets the remote service can produce from SVG.
pub const SVG_TO_REMOTE: [ImageFormat; 4] =
    [ImageFormat::Emf, ImageFormat::Wmf, ImageFormat::Eps, ImageFormat::Pdf];

/// Register the whole catalogue.
///
/// Pairs whose backend feature is compiled out are still registered; loading
/// them fails with `FEATURE_DISABLED` and the registry caches that failure.
pub fn register_builtin(registry: &ConverterRegistry) {
    for from in EMBEDDABLE_RASTERS {
        registry.register_with(
            ConverterDescriptor::new(
                from,
                ImageFormat::Svg,
                true,
                format!("Wrap a {} image in a scalable SVG document", upper(from)),
            ),
            move |_| Ok(embed::RasterEmbed::new(from)),
        );
    }

    registry.register_with(
        ConverterDescriptor::new(
            ImageFormat::Svg,
            ImageFormat::Html,
            true,
            "Publish an SVG as a standalone HTML page",
        ),
        |_| Ok(markup::SvgToHtml),
    );

    for to in RASTER_TARGETS {
        let descriptor = ConverterDescriptor::new(
            ImageFormat::Svg,
            to,
            true,
            format!("Render an SVG to {}", upper(to)),
        );
        #[cfg(feature = "vector")]
        registry.register_with(descriptor, move |_| Ok(rasterize::SvgRasterizer::new(to)));
        #[cfg(not(feature = "vector"))]
        registry.register(descriptor, disabled("vector"));
    }

    let remote_pairs = REMOTE_TO_SVG
        .iter()
        .map(|&from| (from, ImageFormat::Svg))
        .chain(SVG_TO_REMOTE.iter().map(|&to| (ImageFormat::Svg, to)));
    for (from, to) in remote_pairs {
        let descriptor = ConverterDescriptor::new(
            from,
            to,
            false,
            format!(
                "Convert {} to {} with the remote conversion service",
                upper(from),
                upper(to)
            ),
        );
        #[cfg(feature = "remote")]
        registry.register_with(descriptor, move |ctx| {
            remote::RemoteTransform::from_config(from, to, &ctx.config)
        });
        #[cfg(not(feature = "remote"))]
        registry.register(descriptor, disabled("remote"));
    }
}

/// Factory for a pair whose backend was compiled out of this build.
#[cfg(not(all(feature = "vector", feature = "remote")))]
fn disabled(feature: &'static str) -> TransformFactory {
    Arc::new(move |_: Arc<EngineContext>| {
        Box::pin(async move {
            Err::<Arc<dyn Transform>, _>(ConverterError::conversion_with_code(
                format!("formatshift was built without the `{feature}` feature"),
                "FEATURE_DISABLED",
            ))
        }) as TransformFuture
    })
}

fn upper(f: ImageFormat) -> String {
    f.as_str().to_uppercase()
}

/// Run CPU-bound work on the blocking pool.
pub(crate) async fn run_blocking<T, F>(label: &str, work: F) -> Result<T, BoxError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, BoxError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| -> BoxError { format!("{label} task failed: {e}").into() })?
}
