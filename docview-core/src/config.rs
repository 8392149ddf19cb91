use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tracing::debug;

use crate::cache::DEFAULT_CACHE_CAPACITY;
use crate::outline::DEFAULT_MAX_OUTLINE_DEPTH;
use crate::scale::{FIT_WIDTH_RATIO, STANDARD_PAGE_WIDTH_PT};
use crate::types::ViewMode;

pub const CONFIG_FILENAME: &str = "config.toml";

pub fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "docview", "docview")
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    pub cache_capacity: usize,
    /// Pages on each side of the current page rendered ahead of time.
    pub preload_radius: usize,
    pub preload_concurrency: usize,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub open_timeout: Duration,
    pub device_pixel_ratio: f32,
    pub standard_page_width_pt: f32,
    pub fit_width_ratio: f32,
    pub default_view_mode: ViewMode,
    pub fit_to_width: bool,
    pub continuous_window: usize,
    pub max_outline_depth: usize,
    /// Explicit pdfium shared library, tried before any other location.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pdfium_library: Option<PathBuf>,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            preload_radius: 1,
            preload_concurrency: 2,
            open_timeout: Duration::from_secs(30),
            device_pixel_ratio: 1.0,
            standard_page_width_pt: STANDARD_PAGE_WIDTH_PT,
            fit_width_ratio: FIT_WIDTH_RATIO,
            default_view_mode: ViewMode::Single,
            fit_to_width: false,
            continuous_window: 2,
            max_outline_depth: DEFAULT_MAX_OUTLINE_DEPTH,
            pdfium_library: None,
        }
    }
}

impl ViewerConfig {
    pub fn default_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join(CONFIG_FILENAME))
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {:?}", path))?;
        Self::from_toml_str(&raw).with_context(|| format!("invalid config file {:?}", path))
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    fn validate(&self) -> Result<()> {
        ensure!(self.cache_capacity > 0, "cache_capacity must be at least 1");
        ensure!(
            self.preload_concurrency > 0,
            "preload_concurrency must be at least 1"
        );
        ensure!(
            self.device_pixel_ratio.is_finite() && self.device_pixel_ratio > 0.0,
            "device_pixel_ratio must be positive"
        );
        ensure!(
            self.standard_page_width_pt.is_finite() && self.standard_page_width_pt > 0.0,
            "standard_page_width_pt must be positive"
        );
        ensure!(
            self.fit_width_ratio.is_finite()
                && self.fit_width_ratio > 0.0
                && self.fit_width_ratio <= 1.0,
            "fit_width_ratio must be in (0, 1]"
        );
        ensure!(self.max_outline_depth > 0, "max_outline_depth must be at least 1");
        Ok(())
    }
}
