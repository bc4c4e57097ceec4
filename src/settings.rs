//! Host configuration.
//!
//! Stored as `key=value` lines in `fogview_settings.cfg` under the per-OS
//! config directory. [`HostConfig::load`] never fails: a missing or corrupt
//! file yields the defaults. [`HostConfig::parse`] is the strict reader used
//! by the CLI and tests.

use std::fmt;
use std::path::PathBuf;

use image::Rgba;

use crate::ops::mask::MaskStrategy;
use crate::ops::raster::{color_to_hex, parse_color, OPAQUE_BLACK};

#[derive(Debug, Clone, PartialEq)]
pub enum SettingsError {
    Io(String),
    InvalidValue { key: String, value: String },
    UnknownKey(String),
}

impl fmt::Display for SettingsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingsError::Io(e) => write!(f, "settings I/O error: {}", e),
            SettingsError::InvalidValue { key, value } => {
                write!(f, "invalid value {:?} for setting '{}'", value, key)
            }
            SettingsError::UnknownKey(key) => write!(f, "unknown setting '{}'", key),
        }
    }
}

impl std::error::Error for SettingsError {}

impl From<std::io::Error> for SettingsError {
    fn from(e: std::io::Error) -> Self {
        SettingsError::Io(e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HostConfig {
    /// Solid fill behind everything; `None` leaves the frame transparent.
    pub background_fill: Option<Rgba<u8>>,
    /// Colour of hidden regions; `None` disables the mask composite.
    pub mask_fill: Option<Rgba<u8>>,
    /// Border (world units) added around the map on the mask raster.
    pub gutter: u32,
    /// Render tick interval in milliseconds.
    pub tick_interval_ms: u64,
    pub mask_strategy: MaskStrategy,
    /// Multiplier applied to raw pointer coordinates.
    pub pointer_scale: f32,
    /// Pixels of fixed chrome above the canvas, subtracted from pointer y.
    pub header_offset: f32,
    pub brush_width: f32,
    pub brush_step: f32,
    pub selection_color: Rgba<u8>,
    pub selection_width: f32,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            background_fill: None,
            mask_fill: Some(OPAQUE_BLACK),
            gutter: 20,
            tick_interval_ms: 30,
            mask_strategy: MaskStrategy::Tint,
            pointer_scale: 1.0,
            header_offset: 0.0,
            brush_width: 120.0,
            brush_step: 10.0,
            selection_color: Rgba([0xCC, 0x00, 0x00, 0xFF]),
            selection_width: 2.0,
        }
    }
}

/// Parse a colour setting; `none` maps to `Some(None)`.
pub fn parse_optional_color(s: &str) -> Option<Option<Rgba<u8>>> {
    if s.trim().eq_ignore_ascii_case("none") {
        return Some(None);
    }
    parse_color(s).map(Some)
}

fn optional_color_to_str(c: Option<Rgba<u8>>) -> String {
    match c {
        Some(c) => color_to_hex(c),
        None => "none".to_string(),
    }
}

impl HostConfig {
    /// Path to the settings file.
    /// On Linux:   ~/.config/fogview/fogview_settings.cfg  (XDG_CONFIG_HOME respected)
    /// On Windows: %APPDATA%\FogView\fogview_settings.cfg
    /// On macOS:   ~/Library/Application Support/FogView/fogview_settings.cfg
    pub fn settings_path() -> Option<PathBuf> {
        #[cfg(target_os = "linux")]
        {
            let config_dir = std::env::var("XDG_CONFIG_HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|_| {
                    let home = std::env::var("HOME").unwrap_or_else(|_| "~".to_string());
                    PathBuf::from(home).join(".config")
                })
                .join("fogview");
            return Some(config_dir.join("fogview_settings.cfg"));
        }
        #[cfg(target_os = "windows")]
        {
            let appdata = std::env::var("APPDATA").or_else(|_| std::env::var("USERPROFILE")).ok()?;
            return Some(PathBuf::from(appdata).join("FogView").join("fogview_settings.cfg"));
        }
        #[cfg(target_os = "macos")]
        {
            let home = std::env::var("HOME").ok()?;
            return Some(
                PathBuf::from(home)
                    .join("Library")
                    .join("Application Support")
                    .join("FogView")
                    .join("fogview_settings.cfg"),
            );
        }
        #[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
        {
            std::env::current_exe()
                .ok()
                .and_then(|p| p.parent().map(|d| d.join("fogview_settings.cfg")))
        }
    }

    /// Strict parse. Blank lines and `#` comments are skipped; anything else
    /// must be a known `key=value` pair with a valid value.
    pub fn parse(content: &str) -> Result<Self, SettingsError> {
        let mut s = Self::default();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, val)) = line.split_once('=') else {
                return Err(SettingsError::InvalidValue {
                    key: line.to_string(),
                    value: String::new(),
                });
            };
            s.apply(key.trim(), val.trim())?;
        }
        Ok(s)
    }

    /// Set a single key. Used by `parse` and by CLI overrides.
    pub fn apply(&mut self, key: &str, val: &str) -> Result<(), SettingsError> {
        let invalid = || SettingsError::InvalidValue {
            key: key.to_string(),
            value: val.to_string(),
        };
        match key {
            "background_fill" => self.background_fill = parse_optional_color(val).ok_or_else(invalid)?,
            "mask_fill" => self.mask_fill = parse_optional_color(val).ok_or_else(invalid)?,
            "gutter" => self.gutter = val.parse().map_err(|_| invalid())?,
            "tick_interval_ms" => {
                let v: u64 = val.parse().map_err(|_| invalid())?;
                if v == 0 {
                    return Err(invalid());
                }
                self.tick_interval_ms = v;
            }
            "mask_strategy" => self.mask_strategy = MaskStrategy::from_name(val).ok_or_else(invalid)?,
            "pointer_scale" => self.pointer_scale = positive_f32(val).ok_or_else(invalid)?,
            "header_offset" => {
                self.header_offset = val.parse::<f32>().ok().filter(|v| v.is_finite()).ok_or_else(invalid)?
            }
            "brush_width" => self.brush_width = positive_f32(val).ok_or_else(invalid)?,
            "brush_step" => self.brush_step = positive_f32(val).ok_or_else(invalid)?,
            "selection_color" => self.selection_color = parse_color(val).ok_or_else(invalid)?,
            "selection_width" => self.selection_width = positive_f32(val).ok_or_else(invalid)?,
            _ => return Err(SettingsError::UnknownKey(key.to_string())),
        }
        Ok(())
    }

    pub fn to_config_string(&self) -> String {
        format!(
            "background_fill={}\n\
             mask_fill={}\n\
             gutter={}\n\
             tick_interval_ms={}\n\
             mask_strategy={}\n\
             pointer_scale={}\n\
             header_offset={}\n\
             brush_width={}\n\
             brush_step={}\n\
             selection_color={}\n\
             selection_width={}\n",
            optional_color_to_str(self.background_fill),
            optional_color_to_str(self.mask_fill),
            self.gutter,
            self.tick_interval_ms,
            self.mask_strategy.name(),
            self.pointer_scale,
            self.header_offset,
            self.brush_width,
            self.brush_step,
            color_to_hex(self.selection_color),
            self.selection_width,
        )
    }

    /// Load settings from disk (defaults if the file is missing or corrupt).
    pub fn load() -> Self {
        let Some(path) = Self::settings_path() else { return Self::default() };
        let Ok(content) = std::fs::read_to_string(&path) else { return Self::default() };
        match Self::parse(&content) {
            Ok(s) => s,
            Err(e) => {
                log_warn!("Ignoring settings file {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn save(&self) -> Result<(), SettingsError> {
        let Some(path) = Self::settings_path() else { return Ok(()) };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_config_string())?;
        Ok(())
    }
}

fn positive_f32(val: &str) -> Option<f32> {
    val.parse::<f32>().ok().filter(|v| v.is_finite() && *v > 0.0)
}
