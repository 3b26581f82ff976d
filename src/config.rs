//! Application configuration.
//!
//! Configuration is loaded once at startup from a TOML file at:
//! 1. `$MAILPDF_CONFIG` (environment variable)
//! 2. `~/.config/mailpdf/config.toml` (Linux/macOS)
//!    `%APPDATA%\mailpdf\config.toml` (Windows)
//! 3. Built-in defaults
//!
//! The conversion pipeline only ever sees the section structs passed to it.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General behavior settings.
    pub general: GeneralConfig,
    /// Page geometry, typography and font selection.
    pub render: RenderConfig,
    /// How `.msg` containers are decoded.
    pub msg: MsgConfig,
    /// Attachment merging policy.
    pub merge: MergeConfig,
}

/// General behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Override cache directory for logs.
    pub cache_dir: Option<PathBuf>,
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
}

/// Page geometry and typography, all lengths in PDF points.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub page_width: f32,
    pub page_height: f32,
    pub margin_top: f32,
    pub margin_right: f32,
    pub margin_bottom: f32,
    pub margin_left: f32,
    /// Body text size.
    pub font_size: f32,
    /// Baseline-to-baseline distance for body text.
    pub line_height: f32,
    pub subject_size: f32,
    pub subject_line_height: f32,
    pub header_size: f32,
    pub header_line_height: f32,
    /// Inline images are never drawn taller than this.
    pub image_max_height: f32,
    /// Explicit TrueType font; system fonts are searched when unset.
    pub font_path: Option<PathBuf>,
    /// Extra TrueType fonts consulted for glyphs the primary font lacks.
    pub fallback_fonts: Vec<PathBuf>,
}

/// Which `.msg` decoder to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MsgBackendKind {
    /// In-process decoding.
    Native,
    /// External collaborator process speaking the JSON contract.
    Command,
}

/// `.msg` decoding settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MsgConfig {
    pub backend: MsgBackendKind,
    /// Program and leading arguments; the input path is appended.
    pub command: Vec<String>,
    /// Upper bound on one collaborator run.
    pub timeout_secs: u64,
    /// Re-run the collaborator once if the first attempt timed out.
    pub retry_on_timeout: bool,
}

/// Attachment merging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Append non-inline image attachments as full pages.
    pub append_images: bool,
}

// ── Default implementations ─────────────────────────────────────

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            log_level: "warn".to_string(),
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            page_width: 595.28, // A4
            page_height: 841.89,
            margin_top: 50.0,
            margin_right: 50.0,
            margin_bottom: 50.0,
            margin_left: 50.0,
            font_size: 10.5,
            line_height: 14.5,
            subject_size: 16.0,
            subject_line_height: 22.0,
            header_size: 10.0,
            header_line_height: 14.0,
            image_max_height: 360.0,
            font_path: None,
            fallback_fonts: Vec::new(),
        }
    }
}

impl Default for MsgConfig {
    fn default() -> Self {
        Self {
            backend: MsgBackendKind::Native,
            command: Vec::new(),
            timeout_secs: 30,
            retry_on_timeout: false,
        }
    }
}

impl MsgConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            append_images: true,
        }
    }
}

// ── Load ────────────────────────────────────────────────────────

/// Load configuration, searching standard locations.
///
/// Returns the default configuration if no file is found or on parse error.
pub fn load_config() -> Config {
    if let Some(path) = config_file_path() {
        if path.exists() {
            match std::fs::read_to_string(&path) {
                Ok(contents) => match toml::from_str::<Config>(&contents) {
                    Ok(cfg) => {
                        tracing::info!(path = %path.display(), "Loaded config");
                        return cfg;
                    }
                    Err(e) => {
                        tracing::warn!(
                            path = %path.display(),
                            error = %e,
                            "Failed to parse config, using defaults"
                        );
                    }
                },
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Failed to read config file, using defaults"
                    );
                }
            }
        }
    }
    Config::default()
}

/// Determine the config file path (checking env var first, then standard dirs).
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(env_path) = std::env::var("MAILPDF_CONFIG") {
        return Some(PathBuf::from(env_path));
    }

    dirs::config_dir().map(|d| d.join("mailpdf").join("config.toml"))
}

/// Return the cache directory used for the log file.
pub fn cache_dir(config: &Config) -> PathBuf {
    if let Some(ref dir) = config.general.cache_dir {
        return dir.clone();
    }
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mailpdf")
}
