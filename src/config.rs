// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Every key is optional. Missing sections fall back to the defaults below,
// which match what the samples expect when no config file is present.

use anyhow::{Context, Result};
use ash::vk;
use log::LevelFilter;
use serde::Deserialize;
use std::path::Path;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub window: WindowSettings,
    pub graphics: GraphicsSettings,
    pub debug: DebugSettings,
    pub application: ApplicationSettings,
}

/// Window settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WindowSettings {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub fullscreen: bool,
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            title: "vkfw".to_string(),
            width: 1024,
            height: 768,
            fullscreen: false,
        }
    }
}

/// Graphics settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GraphicsSettings {
    pub present_mode: String,
    pub max_frames_in_flight: u32,
    pub clear_color: [f32; 4],
}

impl Default for GraphicsSettings {
    fn default() -> Self {
        Self {
            present_mode: "mailbox".to_string(),
            max_frames_in_flight: 3,
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

/// Debug settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DebugSettings {
    pub validation_layers: bool,
    pub log_level: String,
    pub log_to_file: bool,
    pub log_file: String,
    pub show_fps: bool,
}

impl Default for DebugSettings {
    fn default() -> Self {
        Self {
            validation_layers: true,
            log_level: "info".to_string(),
            log_to_file: false,
            log_file: "vkfw.log".to_string(),
            show_fps: true,
        }
    }
}

/// Version reported to the driver through `VkApplicationInfo`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApplicationSettings {
    /// major, minor, patch
    pub version: [u32; 3],
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self { version: [1, 0, 0] }
    }
}

impl Settings {
    /// Load configuration from `config.toml`, falling back to defaults if it
    /// is missing or broken.
    ///
    /// Settings are usually read before the logger exists, so the reason for
    /// a fallback is handed back for `report_fallback` instead of logged.
    pub fn load() -> (Self, Option<anyhow::Error>) {
        Self::load_or_default("config.toml")
    }

    /// Like `load`, for an explicit path
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> (Self, Option<anyhow::Error>) {
        match Self::load_from_path(path) {
            Ok(settings) => (settings, None),
            Err(e) => (Settings::default(), Some(e)),
        }
    }

    /// Log the error returned by `load`/`load_or_default`, once logging is up
    pub fn report_fallback(fallback: Option<&anyhow::Error>) {
        if let Some(e) = fallback {
            log::warn!("{:#}. Using default settings.", e);
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Settings::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let settings = Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Settings: {:?}", settings);

        Ok(settings)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(content)?;
        Ok(settings)
    }

    /// Reject settings no window system can honour.
    pub fn validate(&self) -> Result<()> {
        if self.window.width == 0 || self.window.height == 0 {
            anyhow::bail!(
                "invalid window size {}x{}",
                self.window.width,
                self.window.height
            );
        }
        Ok(())
    }
}

impl GraphicsSettings {
    /// Number of frames the CPU may record ahead of the GPU (at least one).
    pub fn frames_in_flight(&self) -> u32 {
        self.max_frames_in_flight.max(1)
    }

    /// Get present mode as Vulkan enum
    pub fn preferred_present_mode(&self) -> vk::PresentModeKHR {
        match self.present_mode.to_lowercase().as_str() {
            "immediate" => vk::PresentModeKHR::IMMEDIATE,
            "mailbox" => vk::PresentModeKHR::MAILBOX,
            "fifo" => vk::PresentModeKHR::FIFO,
            "fifo_relaxed" => vk::PresentModeKHR::FIFO_RELAXED,
            _ => {
                log::warn!(
                    "Unknown present mode '{}', defaulting to MAILBOX",
                    self.present_mode
                );
                vk::PresentModeKHR::MAILBOX
            }
        }
    }
}

impl DebugSettings {
    /// Validation layers are a debug-build feature only.
    pub fn enable_validation(&self) -> bool {
        cfg!(debug_assertions) && self.validation_layers
    }

    pub fn level_filter(&self) -> LevelFilter {
        self.log_level.parse().unwrap_or(LevelFilter::Info)
    }
}

impl ApplicationSettings {
    pub fn vk_version(&self) -> u32 {
        let [major, minor, patch] = self.version;
        vk::make_api_version(0, major, minor, patch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let settings = Settings::from_toml_str("").unwrap();
        assert_eq!(settings.window.title, "vkfw");
        assert_eq!(settings.window.width, 1024);
        assert_eq!(settings.window.height, 768);
        assert_eq!(settings.graphics.max_frames_in_flight, 3);
        assert_eq!(settings.application.version, [1, 0, 0]);
        assert!(!settings.debug.log_to_file);
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let settings = Settings::from_toml_str(
            r#"
            [window]
            width = 640

            [graphics]
            present_mode = "fifo"
            "#,
        )
        .unwrap();

        assert_eq!(settings.window.width, 640);
        assert_eq!(settings.window.height, 768);
        assert_eq!(
            settings.graphics.preferred_present_mode(),
            vk::PresentModeKHR::FIFO
        );
        assert_eq!(settings.graphics.clear_color, [0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn present_mode_names_are_case_insensitive() {
        let graphics = GraphicsSettings {
            present_mode: "FIFO_Relaxed".to_string(),
            ..Default::default()
        };
        assert_eq!(
            graphics.preferred_present_mode(),
            vk::PresentModeKHR::FIFO_RELAXED
        );
    }

    #[test]
    fn unknown_present_mode_falls_back_to_mailbox() {
        let graphics = GraphicsSettings {
            present_mode: "vsync-please".to_string(),
            ..Default::default()
        };
        assert_eq!(graphics.preferred_present_mode(), vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn zero_frames_in_flight_is_clamped_to_one() {
        let graphics = GraphicsSettings {
            max_frames_in_flight: 0,
            ..Default::default()
        };
        assert_eq!(graphics.frames_in_flight(), 1);
    }

    #[test]
    fn zero_sized_window_is_rejected() {
        let mut settings = Settings::default();
        assert!(settings.validate().is_ok());
        settings.window.height = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn application_version_is_packed_for_vulkan() {
        let application = ApplicationSettings { version: [2, 3, 4] };
        let packed = application.vk_version();
        assert_eq!(vk::api_version_major(packed), 2);
        assert_eq!(vk::api_version_minor(packed), 3);
        assert_eq!(vk::api_version_patch(packed), 4);
    }

    #[test]
    fn log_level_parses_or_defaults_to_info() {
        let mut debug = DebugSettings::default();
        debug.log_level = "trace".to_string();
        assert_eq!(debug.level_filter(), LevelFilter::Trace);
        debug.log_level = "chatty".to_string();
        assert_eq!(debug.level_filter(), LevelFilter::Info);
    }

    #[test]
    fn malformed_document_is_an_error() {
        assert!(Settings::from_toml_str("[window\nwidth = ").is_err());
        assert!(Settings::from_toml_str("[window]\nwidth = \"wide\"").is_err());
    }

    #[test]
    fn broken_file_falls_back_with_a_reason() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[window]\nwidth = \"wide\"\n").unwrap();

        let (settings, fallback) = Settings::load_or_default(&path);

        assert_eq!(settings.window.width, 1024);
        let reason = format!("{:#}", fallback.unwrap());
        assert!(reason.contains("Failed to parse config file"), "{reason}");
        assert!(reason.contains("config.toml"), "{reason}");
    }

    #[test]
    fn readable_file_reports_no_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[window]\nwidth = 640\n").unwrap();

        let (settings, fallback) = Settings::load_or_default(&path);

        assert!(fallback.is_none());
        assert_eq!(settings.window.width, 640);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let settings = Settings::load_from_path("definitely/not/here.toml").unwrap();
        assert_eq!(settings.window.title, "vkfw");
    }
}
