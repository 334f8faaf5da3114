//! Engine-wide configuration.
//!
//! All engine behaviour that is not per-call is controlled through
//! [`EngineConfig`], built via its [`EngineConfigBuilder`]. Per-call knobs
//! (quality, dimensions, progress sink) live in
//! [`crate::request::ConversionOptions`] instead.

use crate::error::ConverterError;
use serde::{Deserialize, Serialize};

/// Configuration shared by every converter an engine hands out.
///
/// # Example
/// ```rust
/// use formatshift::EngineConfig;
///
/// let config = EngineConfig::builder()
///     .enable_security_checks(true)
///     .remote_base_url("http://localhost:8080")
///     .build()
///     .unwrap();
/// assert_eq!(config.remote_timeout_secs, 300);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Reject markup inputs with scripts, event handlers or external
    /// references. Default: true.
    pub enable_security_checks: bool,

    /// Attempt a best-effort structural repair of simple container formats
    /// before reporting corruption. Default: true.
    pub repair_corrupted: bool,

    /// Optional global size ceiling in bytes, applied on top of the
    /// per-format limit (the smaller one wins).
    pub max_file_size: Option<u64>,

    /// Root URL of the remote conversion service. Remote-backed converters
    /// fail to load without it.
    pub remote_base_url: Option<String>,

    /// Request timeout for the remote service in seconds. Default: 300.
    pub remote_timeout_secs: u64,

    /// Load the system font database for SVG text rendering. Default: true.
    ///
    /// Disabling it makes the rasteriser's dependency load near-instant at the
    /// cost of dropping `<text>` elements that reference system fonts.
    pub load_system_fonts: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enable_security_checks: true,
            repair_corrupted: true,
            max_file_size: None,
            remote_base_url: None,
            remote_timeout_secs: 300,
            load_system_fonts: true,
        }
    }
}

impl EngineConfig {
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder {
            config: Self::default(),
        }
    }

    /// Build a configuration from `FORMATSHIFT_*` environment variables,
    /// falling back to defaults for anything unset.
    pub fn from_env() -> Result<Self, ConverterError> {
        let mut b = Self::builder();
        if let Some(v) = env_bool("FORMATSHIFT_SECURITY_CHECKS")? {
            b = b.enable_security_checks(v);
        }
        if let Some(v) = env_bool("FORMATSHIFT_REPAIR")? {
            b = b.repair_corrupted(v);
        }
        if let Some(v) = env_u64("FORMATSHIFT_MAX_FILE_SIZE")? {
            b = b.max_file_size(v);
        }
        if let Ok(url) = std::env::var("FORMATSHIFT_REMOTE_URL") {
            if !url.trim().is_empty() {
                b = b.remote_base_url(url);
            }
        }
        if let Some(v) = env_u64("FORMATSHIFT_REMOTE_TIMEOUT")? {
            b = b.remote_timeout_secs(v);
        }
        b.build()
    }
}

fn env_bool(key: &str) -> Result<Option<bool>, ConverterError> {
    match std::env::var(key) {
        Ok(v) => match v.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(ConverterError::invalid_parameter(key, v, "true or false")),
        },
        Err(_) => Ok(None),
    }
}

fn env_u64(key: &str) -> Result<Option<u64>, ConverterError> {
    match std::env::var(key) {
        Ok(v) => v
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConverterError::invalid_parameter(key, v, "a non-negative integer")),
        Err(_) => Ok(None),
    }
}

/// Builder for [`EngineConfig`].
#[derive(Debug)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn enable_security_checks(mut self, v: bool) -> Self {
        self.config.enable_security_checks = v;
        self
    }

    pub fn repair_corrupted(mut self, v: bool) -> Self {
        self.config.repair_corrupted = v;
        self
    }

    pub fn max_file_size(mut self, bytes: u64) -> Self {
        self.config.max_file_size = Some(bytes);
        self
    }

    pub fn remote_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.remote_base_url = Some(url.into());
        self
    }

    pub fn remote_timeout_secs(mut self, secs: u64) -> Self {
        self.config.remote_timeout_secs = secs;
        self
    }

    pub fn load_system_fonts(mut self, v: bool) -> Self {
        self.config.load_system_fonts = v;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(mut self) -> Result<EngineConfig, ConverterError> {
        let c = &mut self.config;
        if !(1..=3600).contains(&c.remote_timeout_secs) {
            return Err(ConverterError::invalid_parameter(
                "remote_timeout_secs",
                c.remote_timeout_secs,
                "1-3600",
            ));
        }
        if c.max_file_size == Some(0) {
            return Err(ConverterError::invalid_parameter("max_file_size", 0, "> 0"));
        }
        if let Some(url) = c.remote_base_url.as_mut() {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConverterError::invalid_parameter(
                    "remote_base_url",
                    url.clone(),
                    "an http:// or https:// URL",
                ));
            }
            while url.ends_with('/') {
                url.pop();
            }
        }
        Ok(self.config)
    }
}
