//! The closed set of file formats the engine knows about, with their
//! per-format limits and MIME types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const MB: u64 = 1024 * 1024;

/// A file format tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Png,
    Jpg,
    Gif,
    Webp,
    Bmp,
    Svg,
    Pdf,
    Ico,
    Tiff,
    Eps,
    Ai,
    Dxf,
    Stl,
    Avif,
    Cdr,
    Mp4,
    Html,
    Ttf,
    Heic,
    Emf,
    Wmf,
}

impl ImageFormat {
    pub const ALL: [ImageFormat; 21] = [
        Self::Png,
        Self::Jpg,
        Self::Gif,
        Self::Webp,
        Self::Bmp,
        Self::Svg,
        Self::Pdf,
        Self::Ico,
        Self::Tiff,
        Self::Eps,
        Self::Ai,
        Self::Dxf,
        Self::Stl,
        Self::Avif,
        Self::Cdr,
        Self::Mp4,
        Self::Html,
        Self::Ttf,
        Self::Heic,
        Self::Emf,
        Self::Wmf,
    ];

    /// Lowercase tag, also the canonical file extension.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpg => "jpg",
            Self::Gif => "gif",
            Self::Webp => "webp",
            Self::Bmp => "bmp",
            Self::Svg => "svg",
            Self::Pdf => "pdf",
            Self::Ico => "ico",
            Self::Tiff => "tiff",
            Self::Eps => "eps",
            Self::Ai => "ai",
            Self::Dxf => "dxf",
            Self::Stl => "stl",
            Self::Avif => "avif",
            Self::Cdr => "cdr",
            Self::Mp4 => "mp4",
            Self::Html => "html",
            Self::Ttf => "ttf",
            Self::Heic => "heic",
            Self::Emf => "emf",
            Self::Wmf => "wmf",
        }
    }

    pub fn extension(self) -> &'static str {
        self.as_str()
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpg => "image/jpeg",
            Self::Gif => "image/gif",
            Self::Webp => "image/webp",
            Self::Bmp => "image/bmp",
            Self::Svg => "image/svg+xml",
            Self::Pdf => "application/pdf",
            Self::Ico => "image/x-icon",
            Self::Tiff => "image/tiff",
            Self::Eps => "application/postscript",
            Self::Ai => "application/illustrator",
            Self::Dxf => "application/dxf",
            Self::Stl => "model/stl",
            Self::Avif => "image/avif",
            Self::Cdr => "application/vnd.corel-draw",
            Self::Mp4 => "video/mp4",
            Self::Html => "text/html",
            Self::Ttf => "font/ttf",
            Self::Heic => "image/heic",
            Self::Emf => "image/x-emf",
            Self::Wmf => "image/x-wmf",
        }
    }

    pub fn from_mime(mime: &str) -> Option<Self> {
        let essence = mime.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
        match essence.as_str() {
            "image/jpg" | "image/pjpeg" => Some(Self::Jpg),
            "image/x-tiff" => Some(Self::Tiff),
            "image/vnd.microsoft.icon" => Some(Self::Ico),
            "application/x-font-ttf" | "font/otf" => Some(Self::Ttf),
            "image/emf" => Some(Self::Emf),
            "image/wmf" => Some(Self::Wmf),
            other => Self::ALL.into_iter().find(|f| f.mime_type() == other),
        }
    }

    /// Maximum accepted input size in bytes.
    pub fn size_limit(self) -> u64 {
        let megabytes = match self {
            Self::Png => 20,
            Self::Jpg => 15,
            Self::Gif => 10,
            Self::Webp => 15,
            Self::Bmp => 50,
            Self::Svg => 5,
            Self::Pdf => 100,
            Self::Ico => 1,
            Self::Tiff => 50,
            Self::Eps => 25,
            Self::Ai => 50,
            Self::Dxf => 25,
            Self::Stl => 100,
            Self::Avif => 10,
            Self::Cdr => 50,
            Self::Mp4 => 200,
            Self::Html => 5,
            Self::Ttf => 10,
            Self::Heic => 20,
            Self::Emf => 25,
            Self::Wmf => 10,
        };
        megabytes * MB
    }

    /// Maximum `(width, height)` in pixels, `None` where dimensions do not apply.
    pub fn max_dimensions(self) -> Option<(u32, u32)> {
        match self {
            Self::Png | Self::Jpg | Self::Bmp | Self::Avif | Self::Stl | Self::Html | Self::Heic => {
                Some((10_000, 10_000))
            }
            Self::Gif => Some((5_000, 5_000)),
            Self::Webp => Some((16_383, 16_383)),
            Self::Svg => Some((100_000, 100_000)),
            Self::Pdf | Self::Eps | Self::Ai | Self::Cdr => Some((20_000, 20_000)),
            Self::Ico => Some((256, 256)),
            Self::Tiff => Some((30_000, 30_000)),
            Self::Dxf => Some((50_000, 50_000)),
            Self::Mp4 => Some((4_096, 2_160)),
            Self::Emf | Self::Wmf => Some((32_767, 32_767)),
            Self::Ttf => None,
        }
    }

    /// Resolution-independent formats.
    pub fn is_vector(self) -> bool {
        matches!(
            self,
            Self::Svg | Self::Pdf | Self::Eps | Self::Ai | Self::Dxf | Self::Emf | Self::Wmf | Self::Cdr
        )
    }

    /// Text/markup formats that are scanned for unsafe embedded content.
    pub fn is_markup(self) -> bool {
        matches!(self, Self::Svg | Self::Html)
    }

    /// Raster formats decodable by the `image` crate.
    pub fn is_decodable_raster(self) -> bool {
        matches!(
            self,
            Self::Png | Self::Jpg | Self::Gif | Self::Webp | Self::Bmp | Self::Tiff | Self::Ico
        )
    }

    /// Whether the encoded output can carry an alpha channel.
    pub fn supports_transparency(self) -> bool {
        !matches!(self, Self::Jpg | Self::Bmp | Self::Mp4 | Self::Pdf | Self::Eps)
    }

    /// Formats whose content may legitimately sniff as this one. A container
    /// format can sniff as the standard document format it wraps.
    pub fn accepted_detections(self) -> &'static [ImageFormat] {
        match self {
            Self::Ai => &[Self::Ai, Self::Pdf],
            Self::Eps => &[Self::Eps, Self::Pdf],
            Self::Png => &[Self::Png],
            Self::Jpg => &[Self::Jpg],
            Self::Gif => &[Self::Gif],
            Self::Webp => &[Self::Webp],
            Self::Bmp => &[Self::Bmp],
            Self::Svg => &[Self::Svg],
            Self::Pdf => &[Self::Pdf],
            Self::Ico => &[Self::Ico],
            Self::Tiff => &[Self::Tiff],
            Self::Dxf => &[Self::Dxf],
            Self::Stl => &[Self::Stl],
            Self::Avif => &[Self::Avif],
            Self::Cdr => &[Self::Cdr],
            Self::Mp4 => &[Self::Mp4],
            Self::Html => &[Self::Html],
            Self::Ttf => &[Self::Ttf],
            Self::Heic => &[Self::Heic],
            Self::Emf => &[Self::Emf],
            Self::Wmf => &[Self::Wmf],
        }
    }

    pub(crate) fn image_crate_format(self) -> Option<image::ImageFormat> {
        match self {
            Self::Png => Some(image::ImageFormat::Png),
            Self::Jpg => Some(image::ImageFormat::Jpeg),
            Self::Gif => Some(image::ImageFormat::Gif),
            Self::Webp => Some(image::ImageFormat::WebP),
            Self::Bmp => Some(image::ImageFormat::Bmp),
            Self::Tiff => Some(image::ImageFormat::Tiff),
            Self::Ico => Some(image::ImageFormat::Ico),
            _ => None,
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageFormat {
    type Err = crate::error::ConverterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag = s.trim().trim_start_matches('.').to_ascii_lowercase();
        match tag.as_str() {
            "jpeg" => return Ok(Self::Jpg),
            "tif" => return Ok(Self::Tiff),
            "otf" => return Ok(Self::Ttf),
            "htm" => return Ok(Self::Html),
            "heif" => return Ok(Self::Heic),
            _ => {}
        }
        Self::ALL
            .into_iter()
            .find(|f| f.as_str() == tag)
            .ok_or_else(|| {
                crate::error::ConverterError::unsupported_format(
                    tag.clone(),
                    Self::ALL.iter().map(|f| f.to_string()).collect(),
                )
            })
    }
}
