// ============================================================================
// ENGINE SETTINGS - persisted as a plain `key=value` file
// ============================================================================

use std::path::{Path, PathBuf};

use crate::ops::smoothing::SmoothingMode;

/// Tunables for the drawing engine.  Every value has a default so a missing
/// or partially corrupt settings file never prevents a session from starting.
#[derive(Clone, Debug, PartialEq)]
pub struct EngineSettings {
    /// Buffer pixels per logical canvas pixel.
    pub device_pixel_scale: f32,
    pub canvas_width: u32,
    pub canvas_height: u32,
    pub max_undo_steps: usize,
    /// Memory cap for the snapshot history in MiB (0 = unlimited).
    pub history_memory_mb: usize,
    pub command_log_size: usize,
    pub stamp_cache_size: usize,
    pub fill_max_pixels: usize,
    /// JPEG quality used by the exporter (1-100).
    pub export_quality: u8,
    pub zoom_min: f32,
    pub zoom_max: f32,
    pub zoom_step: f32,
    /// Smoothing applied to stroke points when a document is replayed.
    pub replay_smoothing: SmoothingMode,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            device_pixel_scale: 2.0,
            canvas_width: 1600,
            canvas_height: 1000,
            max_undo_steps: 50,
            history_memory_mb: 512,
            command_log_size: 100,
            stamp_cache_size: 50,
            fill_max_pixels: 2_000_000,
            export_quality: 85,
            zoom_min: 0.2,
            zoom_max: 6.0,
            zoom_step: 1.1,
            replay_smoothing: SmoothingMode::None,
        }
    }
}

impl EngineSettings {
    /// Path to the settings file.
    /// On Linux:   ~/.config/drawly/drawly_settings.cfg  (XDG_CONFIG_HOME respected)
    /// On Windows: %APPDATA%\Drawly\drawly_settings.cfg
    /// On macOS:   ~/Library/Application Support/Drawly/drawly_settings.cfg
    pub fn settings_path() -> Option<PathBuf> {
        #[cfg(target_os = "windows")]
        {
            let appdata = std::env::var("APPDATA")
                .or_else(|_| std::env::var("USERPROFILE"))
                .ok()?;
            return Some(PathBuf::from(appdata).join("Drawly").join("drawly_settings.cfg"));
        }
        #[cfg(target_os = "macos")]
        {
            let home = std::env::var("HOME").ok()?;
            return Some(
                PathBuf::from(home)
                    .join("Library")
                    .join("Application Support")
                    .join("Drawly")
                    .join("drawly_settings.cfg"),
            );
        }
        #[cfg(not(any(target_os = "windows", target_os = "macos")))]
        {
            let config_dir = match std::env::var("XDG_CONFIG_HOME") {
                Ok(xdg) => PathBuf::from(xdg),
                Err(_) => PathBuf::from(std::env::var("HOME").ok()?).join(".config"),
            };
            Some(config_dir.join("drawly").join("drawly_settings.cfg"))
        }
    }

    /// Load from the platform settings file (defaults if missing or unreadable).
    pub fn load() -> Self {
        match Self::settings_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::parse(&content),
            Err(_) => Self::default(),
        }
    }

    /// Parse `key=value` lines.  Unknown keys and unparsable values are ignored.
    pub fn parse(content: &str) -> Self {
        let mut s = Self::default();
        for line in content.lines() {
            let line = line.trim();
            if line.starts_with('#') {
                continue;
            }
            let Some((key, val)) = line.split_once('=') else { continue };
            let val = val.trim();
            match key.trim() {
                "device_pixel_scale" => {
                    let v: f32 = val.parse().unwrap_or(s.device_pixel_scale);
                    if v > 0.0 && v.is_finite() {
                        s.device_pixel_scale = v;
                    }
                }
                "canvas_width" => s.canvas_width = val.parse().unwrap_or(s.canvas_width).max(1),
                "canvas_height" => s.canvas_height = val.parse().unwrap_or(s.canvas_height).max(1),
                "max_undo_steps" => s.max_undo_steps = val.parse().unwrap_or(s.max_undo_steps).max(1),
                "history_memory_mb" => s.history_memory_mb = val.parse().unwrap_or(s.history_memory_mb),
                "command_log_size" => s.command_log_size = val.parse().unwrap_or(s.command_log_size).max(1),
                "stamp_cache_size" => s.stamp_cache_size = val.parse().unwrap_or(s.stamp_cache_size).max(1),
                "fill_max_pixels" => s.fill_max_pixels = val.parse().unwrap_or(s.fill_max_pixels).max(1),
                "export_quality" => s.export_quality = val.parse().unwrap_or(s.export_quality).clamp(1, 100),
                "zoom_min" => s.zoom_min = val.parse().unwrap_or(s.zoom_min),
                "zoom_max" => s.zoom_max = val.parse().unwrap_or(s.zoom_max),
                "zoom_step" => s.zoom_step = val.parse().unwrap_or(s.zoom_step),
                "replay_smoothing" => {
                    s.replay_smoothing = SmoothingMode::from_name(val).unwrap_or(s.replay_smoothing);
                }
                _ => {}
            }
        }
        if !(s.zoom_min > 0.0 && s.zoom_min <= s.zoom_max) {
            let d = Self::default();
            s.zoom_min = d.zoom_min;
            s.zoom_max = d.zoom_max;
        }
        if !(s.zoom_step > 1.0) {
            s.zoom_step = Self::default().zoom_step;
        }
        s
    }

    pub fn to_config_string(&self) -> String {
        format!(
            "device_pixel_scale={}\n\
             canvas_width={}\n\
             canvas_height={}\n\
             max_undo_steps={}\n\
             history_memory_mb={}\n\
             command_log_size={}\n\
             stamp_cache_size={}\n\
             fill_max_pixels={}\n\
             export_quality={}\n\
             zoom_min={}\n\
             zoom_max={}\n\
             zoom_step={}\n\
             replay_smoothing={}\n",
            self.device_pixel_scale,
            self.canvas_width,
            self.canvas_height,
            self.max_undo_steps,
            self.history_memory_mb,
            self.command_log_size,
            self.stamp_cache_size,
            self.fill_max_pixels,
            self.export_quality,
            self.zoom_min,
            self.zoom_max,
            self.zoom_step,
            self.replay_smoothing.name(),
        )
    }

    /// Save to the platform settings file.
    pub fn save(&self) -> std::io::Result<()> {
        let Some(path) = Self::settings_path() else { return Ok(()) };
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_config_string())
    }

    /// History memory cap in bytes, `None` when unlimited.
    pub fn history_memory_bytes(&self) -> Option<usize> {
        (self.history_memory_mb > 0).then(|| self.history_memory_mb * 1024 * 1024)
    }
}
