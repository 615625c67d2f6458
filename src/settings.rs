use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, RwLock};
use std::time::Duration;

use crate::ink::{
    DEFAULT_CACHE_CAPACITY, DEFAULT_CHUNK_GROWTH, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_CHUNKS,
    DEFAULT_REFERENCE_WIDTH, DEFAULT_WORKERS, EvictionPolicy, RenderConfig, ZoomState,
};

pub const CURRENT_VERSION: u32 = 2;
const SETTINGS_FILENAME: &str = "config.yaml";
const APP_NAME: &str = "inkpane";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_version")]
    pub version: u32,

    /// Tile edge in device pixels before growth
    #[serde(default = "default_chunk_size")]
    pub base_chunk_size: u32,

    #[serde(default = "default_max_chunks")]
    pub max_chunks: usize,

    #[serde(default = "default_chunk_growth")]
    pub chunk_growth: f64,

    /// Tiles kept per frame; 0 keeps everything until the page closes
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default = "default_one")]
    pub preview_scale: f64,

    #[serde(default = "default_min_zoom")]
    pub min_zoom: f64,

    #[serde(default = "default_max_zoom")]
    pub max_zoom: f64,

    #[serde(default = "default_zoom_sensitivity")]
    pub zoom_sensitivity: f64,

    #[serde(default = "default_zoom_settle_ms")]
    pub zoom_settle_ms: u64,

    #[serde(default = "default_reference_width")]
    pub reference_width: f64,

    #[serde(default = "default_one")]
    pub ui_scale: f64,

    /// Fixed tile dispatch order, mostly for reproducible output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shuffle_seed: Option<u64>,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_version() -> u32 {
    CURRENT_VERSION
}

fn default_chunk_size() -> u32 {
    DEFAULT_CHUNK_SIZE
}

fn default_max_chunks() -> usize {
    DEFAULT_MAX_CHUNKS
}

fn default_chunk_growth() -> f64 {
    DEFAULT_CHUNK_GROWTH
}

fn default_cache_capacity() -> usize {
    DEFAULT_CACHE_CAPACITY
}

fn default_workers() -> usize {
    DEFAULT_WORKERS
}

fn default_one() -> f64 {
    1.0
}

fn default_min_zoom() -> f64 {
    ZoomState::DEFAULT_MIN_ZOOM
}

fn default_max_zoom() -> f64 {
    ZoomState::DEFAULT_MAX_ZOOM
}

fn default_zoom_sensitivity() -> f64 {
    ZoomState::DEFAULT_SENSITIVITY
}

fn default_zoom_settle_ms() -> u64 {
    ZoomState::DEFAULT_SETTLE.as_millis() as u64
}

fn default_reference_width() -> f64 {
    DEFAULT_REFERENCE_WIDTH
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            base_chunk_size: default_chunk_size(),
            max_chunks: default_max_chunks(),
            chunk_growth: default_chunk_growth(),
            cache_capacity: default_cache_capacity(),
            workers: default_workers(),
            preview_scale: default_one(),
            min_zoom: default_min_zoom(),
            max_zoom: default_max_zoom(),
            zoom_sensitivity: default_zoom_sensitivity(),
            zoom_settle_ms: default_zoom_settle_ms(),
            reference_width: default_reference_width(),
            ui_scale: default_one(),
            shuffle_seed: None,
            log_level: default_log_level(),
        }
    }
}

impl Settings {
    /// Tile engine configuration for these settings
    #[must_use]
    pub fn render_config(&self) -> RenderConfig {
        RenderConfig {
            base_chunk_size: self.base_chunk_size,
            max_chunks: self.max_chunks,
            chunk_growth: self.chunk_growth,
            eviction: EvictionPolicy::from_capacity(self.cache_capacity),
            workers: self.workers,
            preview_scale: self.preview_scale,
            reference_width: self.reference_width,
            ui_scale: self.ui_scale,
            shuffle_seed: self.shuffle_seed,
        }
        .sanitized()
    }

    #[must_use]
    pub fn zoom_state(&self) -> ZoomState {
        ZoomState::new(
            self.min_zoom,
            self.max_zoom,
            self.zoom_sensitivity,
            Duration::from_millis(self.zoom_settle_ms),
        )
    }

    #[must_use]
    pub fn log_level_filter(&self) -> log::LevelFilter {
        self.log_level.parse().unwrap_or(log::LevelFilter::Info)
    }
}

static SETTINGS: LazyLock<RwLock<Settings>> = LazyLock::new(|| RwLock::new(Settings::default()));

pub fn preferred_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|config| config.join(APP_NAME).join(SETTINGS_FILENAME))
}

/// Load the settings file, creating it with defaults when missing
pub fn load_settings() {
    let Some(path) = preferred_config_path() else {
        warn!("Could not determine config directory, using default settings");
        return;
    };
    load_settings_from_path(&path);
}

/// Load settings from `path` into the global, creating the file if needed
pub fn load_settings_from_path(path: &Path) {
    if !path.exists() {
        info!("Settings file not found, creating with defaults at {path:?}");
        if let Ok(settings) = SETTINGS.read() {
            if let Err(e) = save_settings_to_file(&settings, path) {
                error!("{e:#}");
            }
        }
        return;
    }

    match read_settings(path) {
        Ok(mut settings) => {
            debug!("Loaded settings from {path:?}");

            if settings.version < CURRENT_VERSION {
                migrate_settings(&mut settings);
                if let Err(e) = save_settings_to_file(&settings, path) {
                    error!("{e:#}");
                }
            }

            if let Ok(mut global) = SETTINGS.write() {
                *global = settings;
            }
        }
        Err(e) => error!("{e:#}"),
    }
}

fn read_settings(path: &Path) -> Result<Settings> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read settings file {path:?}"))?;
    serde_yaml::from_str(&content).with_context(|| format!("Failed to parse settings file {path:?}"))
}

fn migrate_settings(settings: &mut Settings) {
    info!(
        "Migrating settings from v{} to v{}",
        settings.version, CURRENT_VERSION
    );

    // v1 accepted a tile ceiling below one 2x2 block.
    if settings.version < 2 && settings.max_chunks < 4 {
        settings.max_chunks = DEFAULT_MAX_CHUNKS;
    }

    settings.version = CURRENT_VERSION;
}

fn save_settings_to_file(settings: &Settings, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory {parent:?}"))?;
        }
    }

    let content = serde_yaml::to_string(settings).context("Failed to serialize settings")?;
    fs::write(path, format!("{SETTINGS_HEADER}{content}"))
        .with_context(|| format!("Failed to save settings to {path:?}"))?;
    debug!("Saved settings to {path:?}");
    Ok(())
}

const SETTINGS_HEADER: &str = r#"# ============================================================================
# inkpane settings
# ============================================================================
# base_chunk_size: tile edge in pixels before the tile count ceiling kicks in
# max_chunks:      most tiles requested per frame per UI frame
# cache_capacity:  tiles kept per frame (0 = keep all until the page closes)
# zoom_settle_ms:  quiet time after zooming before new tiles are rendered

"#;

/// Snapshot of the loaded settings
pub fn get_settings() -> Settings {
    SETTINGS.read().map(|s| s.clone()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn reset_global() {
        if let Ok(mut global) = SETTINGS.write() {
            *global = Settings::default();
        }
    }

    #[test]
    fn defaults_match_engine_defaults() {
        let config = Settings::default().render_config();
        assert_eq!(config, RenderConfig::default());
    }

    #[test]
    fn zero_capacity_means_unbounded() {
        let settings = Settings {
            cache_capacity: 0,
            ..Settings::default()
        };
        assert_eq!(settings.render_config().eviction, EvictionPolicy::Unbounded);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let settings: Settings = serde_yaml::from_str("workers: 2\nshuffle_seed: 9\n").unwrap();
        assert_eq!(settings.workers, 2);
        assert_eq!(settings.shuffle_seed, Some(9));
        assert_eq!(settings.max_chunks, DEFAULT_MAX_CHUNKS);
        assert_eq!(settings.version, CURRENT_VERSION);
    }

    #[test]
    fn log_level_falls_back_to_info() {
        let settings = Settings {
            log_level: "chatty".into(),
            ..Settings::default()
        };
        assert_eq!(settings.log_level_filter(), log::LevelFilter::Info);
    }

    #[test]
    #[serial]
    fn creates_file_with_defaults() {
        reset_global();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(SETTINGS_FILENAME);

        load_settings_from_path(&path);

        let written = read_settings(&path).unwrap();
        assert_eq!(written, Settings::default());
    }

    #[test]
    #[serial]
    fn loads_and_migrates_old_file() {
        reset_global();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILENAME);
        fs::write(&path, "version: 1\nmax_chunks: 2\nzoom_settle_ms: 50\n").unwrap();

        load_settings_from_path(&path);

        let settings = get_settings();
        assert_eq!(settings.version, CURRENT_VERSION);
        assert_eq!(settings.max_chunks, DEFAULT_MAX_CHUNKS);
        assert_eq!(settings.zoom_settle_ms, 50);
        assert_eq!(read_settings(&path).unwrap().version, CURRENT_VERSION);
        reset_global();
    }

    #[test]
    #[serial]
    fn broken_file_keeps_current_settings() {
        reset_global();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILENAME);
        fs::write(&path, "workers: [not a number\n").unwrap();

        load_settings_from_path(&path);
        assert_eq!(get_settings(), Settings::default());
    }
}
