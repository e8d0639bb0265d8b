use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::model::names::CursorNames;
use crate::pipeline_worker::{BuildQueuePolicy, FrameQueuePolicy};

/// Settings for one build run, usually read from a TOML file.
///
/// Every field has a default, so an empty document is a valid config.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Registry tag of the output format (`windows`, `xcursor`, `mousecape`).
    pub output_format: String,
    /// Merge new images into files that already exist at the target path.
    pub update_existing: bool,
    pub windows: WindowsConfig,
    pub xcursor: XcursorConfig,
    pub mousecape: MousecapeConfig,
    pub concurrency: ConcurrencyConfig,
    pub names: CursorNames,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            output_format: "xcursor".to_string(),
            update_existing: false,
            windows: WindowsConfig::default(),
            xcursor: XcursorConfig::default(),
            mousecape: MousecapeConfig::default(),
            concurrency: ConcurrencyConfig::default(),
            names: CursorNames::default(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowsConfig {
    /// Stored in the `INAM` entry of animated cursors.
    pub title: Option<String>,
    pub artist: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct XcursorConfig {
    /// Multiplies the nominal size recorded for each image.
    pub nominal_factor: f64,
    /// Create alias symlinks from `names.aliases` after each build.
    pub link_aliases: bool,
    /// When set, an `index.theme` naming the theme is written next to each
    /// `cursors` directory on finalization.
    pub theme_name: Option<String>,
}

impl Default for XcursorConfig {
    fn default() -> Self {
        Self {
            nominal_factor: 1.0,
            link_aliases: true,
            theme_name: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MousecapeConfig {
    /// Theme name; defaults to the theme directory name.
    pub name: Option<String>,
    pub author: String,
    /// Defaults to `local.<name>`.
    pub identifier: Option<String>,
    pub version: f64,
    pub hidpi: bool,
    /// Write each cursor as soon as it is built instead of at finalization.
    pub incremental: bool,
}

impl Default for MousecapeConfig {
    fn default() -> Self {
        Self {
            name: None,
            author: String::new(),
            identifier: None,
            version: 1.0,
            hidpi: true,
            incremental: false,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    pub enabled: bool,
    pub frame_queue: FrameQueuePolicy,
    pub build_queue: BuildQueuePolicy,
    /// Bound on pending tasks per queue; unbounded when absent.
    pub queue_capacity: Option<usize>,
}

impl BuildConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).context("invalid build configuration")
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("failed to serialize build configuration")
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml_str(&content).with_context(|| format!("in {}", path.display()))
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        fs::write(path, self.to_toml_string()?)
            .with_context(|| format!("failed to write {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = BuildConfig::from_toml_str("").unwrap();
        assert_eq!(config, BuildConfig::default());
        assert_eq!(config.output_format, "xcursor");
        assert_eq!(config.xcursor.nominal_factor, 1.0);
        assert!(!config.concurrency.enabled);
    }

    #[test]
    fn test_partial_document() {
        let config = BuildConfig::from_toml_str(
            r#"
            output_format = "mousecape"

            [mousecape]
            name = "Breeze"
            incremental = true

            [concurrency]
            enabled = true
            frame_queue = "per-theme"
            build_queue = "global"
            queue_capacity = 8
            "#,
        )
        .unwrap();
        assert_eq!(config.output_format, "mousecape");
        assert_eq!(config.mousecape.name.as_deref(), Some("Breeze"));
        assert!(config.mousecape.hidpi);
        assert_eq!(config.concurrency.frame_queue, FrameQueuePolicy::PerTheme);
        assert_eq!(config.concurrency.build_queue, BuildQueuePolicy::Global);
        assert_eq!(config.concurrency.queue_capacity, Some(8));
    }

    #[test]
    fn test_unknown_policy_is_rejected() {
        let err = BuildConfig::from_toml_str("[concurrency]\nframe_queue = \"sometimes\"\n");
        assert!(err.is_err());
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("build.toml");
        let mut config = BuildConfig::default();
        config.output_format = "windows".to_string();
        config.windows.title = Some("Busy".to_string());
        config.save_to_file(&path).unwrap();
        assert_eq!(BuildConfig::load_from_file(&path).unwrap(), config);
    }
}
