// ============================================================================
// RENDER SETTINGS: worker count, tile shape, pump interval, log level
// ============================================================================

use std::path::{Path, PathBuf};

use log::LevelFilter;

use crate::error::PreviewError;

/// Default tile edge, matching the editor's 64×64 storage chunks.
pub const DEFAULT_TILE_SIZE: u32 = 64;

/// Largest tile edge that still fits signed pixel coordinates.
pub const MAX_TILE_SIZE: u32 = i32::MAX as u32;

#[derive(Clone, Debug, PartialEq)]
pub struct RenderSettings {
    /// Number of render worker threads (≥ 1).
    pub thread_count: usize,
    pub tile_width: u32,
    pub tile_height: u32,
    /// How long a blocking wait sleeps on the message queue before it
    /// re-checks for a terminal outcome.
    pub update_interval_ms: u64,
    pub log_level: LevelFilter,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            thread_count: default_thread_count(),
            tile_width: DEFAULT_TILE_SIZE,
            tile_height: DEFAULT_TILE_SIZE,
            update_interval_ms: 16,
            log_level: LevelFilter::Info,
        }
    }
}

/// Available parallelism, never less than one.
pub fn default_thread_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .max(1)
}

impl RenderSettings {
    pub fn validate(&self) -> Result<(), PreviewError> {
        if self.thread_count < 1 {
            return Err(PreviewError::InvalidSettings(
                "thread_count must be at least 1".into(),
            ));
        }
        if self.tile_width == 0 || self.tile_height == 0 {
            return Err(PreviewError::InvalidSettings(format!(
                "tile size {}x{} must be non-zero",
                self.tile_width, self.tile_height
            )));
        }
        if self.tile_width > MAX_TILE_SIZE || self.tile_height > MAX_TILE_SIZE {
            return Err(PreviewError::InvalidSettings(format!(
                "tile size {}x{} exceeds {}",
                self.tile_width, self.tile_height, MAX_TILE_SIZE
            )));
        }
        if self.update_interval_ms == 0 {
            return Err(PreviewError::InvalidSettings(
                "update_interval_ms must be strictly positive".into(),
            ));
        }
        Ok(())
    }

    /// Path to the settings file.
    /// On Linux:   ~/.config/paintfe/preview.cfg  (XDG_CONFIG_HOME respected)
    /// On Windows: %APPDATA%\PaintFE\preview.cfg
    /// On macOS:   ~/Library/Application Support/PaintFE/preview.cfg
    pub fn settings_path() -> Option<PathBuf> {
        #[cfg(target_os = "windows")]
        {
            let appdata = std::env::var("APPDATA")
                .or_else(|_| std::env::var("USERPROFILE"))
                .ok()?;
            return Some(PathBuf::from(appdata).join("PaintFE").join("preview.cfg"));
        }
        #[cfg(target_os = "macos")]
        {
            let home = std::env::var("HOME").ok()?;
            return Some(
                PathBuf::from(home)
                    .join("Library")
                    .join("Application Support")
                    .join("PaintFE")
                    .join("preview.cfg"),
            );
        }
        #[cfg(not(any(target_os = "windows", target_os = "macos")))]
        {
            let config_dir = std::env::var("XDG_CONFIG_HOME")
                .map(PathBuf::from)
                .or_else(|_| std::env::var("HOME").map(|h| PathBuf::from(h).join(".config")))
                .ok()?;
            Some(config_dir.join("paintfe").join("preview.cfg"))
        }
    }

    /// Load settings from the default path (defaults if missing or unreadable).
    pub fn load() -> Self {
        Self::settings_path()
            .map(|p| Self::load_from(&p))
            .unwrap_or_default()
    }

    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_config_str(&content),
            Err(_) => Self::default(),
        }
    }

    /// Write to the default path. Does nothing when no config dir is known.
    pub fn save(&self) -> Result<(), PreviewError> {
        let Some(path) = Self::settings_path() else {
            return Ok(());
        };
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), PreviewError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| PreviewError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(path, self.to_config_string()).map_err(|source| PreviewError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parse `key=value` lines. Unknown keys are skipped and malformed values
    /// keep their defaults.
    pub fn from_config_str(content: &str) -> Self {
        let mut s = Self::default();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, val)) = line.split_once('=') else { continue };
            let val = val.trim();
            match key.trim() {
                "thread_count" => {
                    if let Ok(n) = val.parse::<usize>() {
                        s.thread_count = n.max(1);
                    }
                }
                "tile_width" => {
                    if let Ok(n) = val.parse::<u32>() {
                        s.tile_width = n.clamp(1, MAX_TILE_SIZE);
                    }
                }
                "tile_height" => {
                    if let Ok(n) = val.parse::<u32>() {
                        s.tile_height = n.clamp(1, MAX_TILE_SIZE);
                    }
                }
                "update_interval_ms" => {
                    if let Ok(n) = val.parse::<u64>() {
                        s.update_interval_ms = n.max(1);
                    }
                }
                "log_level" => {
                    if let Ok(level) = val.parse::<LevelFilter>() {
                        s.log_level = level;
                    }
                }
                _ => {}
            }
        }
        s
    }

    pub fn to_config_string(&self) -> String {
        format!(
            "thread_count={}\n\
             tile_width={}\n\
             tile_height={}\n\
             update_interval_ms={}\n\
             log_level={}\n",
            self.thread_count,
            self.tile_width,
            self.tile_height,
            self.update_interval_ms,
            self.log_level.as_str().to_lowercase(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let s = RenderSettings::default();
        assert!(s.thread_count >= 1);
        assert!(s.validate().is_ok());
    }

    #[test]
    fn config_round_trips_through_text() {
        let s = RenderSettings {
            thread_count: 3,
            tile_width: 128,
            tile_height: 32,
            update_interval_ms: 40,
            log_level: LevelFilter::Debug,
        };
        assert_eq!(RenderSettings::from_config_str(&s.to_config_string()), s);
    }

    #[test]
    fn saved_file_loads_back() {
        let dir = std::env::temp_dir().join(format!("paintfe-settings-{}", std::process::id()));
        let path = dir.join("nested").join("preview.cfg");
        let s = RenderSettings {
            thread_count: 2,
            tile_width: 48,
            tile_height: 96,
            ..RenderSettings::default()
        };
        s.save_to(&path).unwrap();
        assert_eq!(RenderSettings::load_from(&path), s);
        let _ = std::fs::remove_dir_all(&dir);
        assert_eq!(RenderSettings::load_from(&path), RenderSettings::default());
    }

    #[test]
    fn malformed_and_unknown_lines_keep_defaults() {
        let s = RenderSettings::from_config_str(
            "# comment\nthread_count=lots\ntile_width=0\nmystery=1\nno_equals_sign\nlog_level=warn\n",
        );
        let d = RenderSettings::default();
        assert_eq!(s.thread_count, d.thread_count);
        assert_eq!(s.tile_width, 1);
        assert_eq!(s.log_level, LevelFilter::Warn);
    }

    #[test]
    fn validation_rejects_zero_values() {
        let mut s = RenderSettings::default();
        s.thread_count = 0;
        assert!(matches!(s.validate(), Err(PreviewError::InvalidSettings(_))));

        let mut s = RenderSettings::default();
        s.tile_height = 0;
        assert!(s.validate().is_err());

        let mut s = RenderSettings::default();
        s.update_interval_ms = 0;
        assert!(s.validate().is_err());
    }

    #[test]
    fn validation_rejects_tiles_beyond_pixel_range() {
        let mut s = RenderSettings::default();
        s.tile_width = 3_000_000_000;
        assert!(matches!(s.validate(), Err(PreviewError::InvalidSettings(_))));

        let mut s = RenderSettings::default();
        s.tile_height = MAX_TILE_SIZE;
        assert!(s.validate().is_ok());
        s.tile_height = MAX_TILE_SIZE + 1;
        assert!(s.validate().is_err());

        let s = RenderSettings::from_config_str("tile_width=4000000000\n");
        assert_eq!(s.tile_width, MAX_TILE_SIZE);
    }
}
