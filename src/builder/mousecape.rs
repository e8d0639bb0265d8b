use image::RgbaImage;
use log::{debug, info};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use super::{CursorBuilder, OutputFormat};
use crate::config::{BuildConfig, MousecapeConfig};
use crate::error::{CursorError, Result};
use crate::formats::mousecape::{CAPE_EXTENSION, CapeCursor, CapeMetadata, CapeWriter};
use crate::fs_ops::file_name_or;
use crate::model::{CursorImage, CursorNames, FrameTable, Hotspot};

type SharedTheme = Arc<Mutex<Option<CapeWriter<BufWriter<File>>>>>;

/// Collects cursors into one `.cape` per theme directory.
///
/// A target `<dir>/<cursor name>` becomes the entry for the cursor's
/// Mousecape identifier in `<dir>/<dir name>.cape`.
pub struct MousecapeFormat {
    config: MousecapeConfig,
    names: CursorNames,
    themes: BTreeMap<PathBuf, SharedTheme>,
}

impl MousecapeFormat {
    pub fn new(config: &BuildConfig) -> Self {
        Self {
            config: config.mousecape.clone(),
            names: config.names.clone(),
            themes: BTreeMap::new(),
        }
    }

    pub fn container_path(theme_dir: &Path) -> PathBuf {
        let name = file_name_or(theme_dir, "theme");
        theme_dir.join(format!("{name}.{CAPE_EXTENSION}"))
    }

    fn metadata(&self, theme_dir: &Path) -> CapeMetadata {
        let name = self
            .config
            .name
            .clone()
            .unwrap_or_else(|| file_name_or(theme_dir, "theme").to_string());
        let identifier = self.config.identifier.clone().unwrap_or_else(|| {
            let slug: String = name
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
                .collect();
            format!("local.{slug}")
        });
        CapeMetadata {
            name,
            author: self.config.author.clone(),
            identifier,
            version: self.config.version,
            hidpi: self.config.hidpi,
            ..CapeMetadata::default()
        }
    }

    fn theme_dir(target: &Path) -> PathBuf {
        match target.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    fn theme(&mut self, theme_dir: &Path) -> Result<SharedTheme> {
        if let Some(theme) = self.themes.get(theme_dir) {
            return Ok(Arc::clone(theme));
        }
        let path = Self::container_path(theme_dir);
        debug!("opening mousecape theme {}", path.display());
        let writer = CapeWriter::create(&path, self.metadata(theme_dir), self.config.incremental)?;
        let theme = Arc::new(Mutex::new(Some(writer)));
        self.themes.insert(theme_dir.to_path_buf(), Arc::clone(&theme));
        Ok(theme)
    }
}

impl OutputFormat for MousecapeFormat {
    fn name(&self) -> &'static str {
        "mousecape"
    }

    fn builder_for(
        &mut self,
        target: &Path,
        update_existing: bool,
        _frame_delay_hint: Option<u32>,
    ) -> Result<Box<dyn CursorBuilder>> {
        if update_existing {
            return Err(CursorError::unsupported(
                "mousecape themes cannot be updated in place",
            ));
        }
        let theme_dir = Self::theme_dir(target);
        let identifier = self
            .names
            .mousecape_id(file_name_or(target, "cursor"))
            .to_string();
        let theme = self.theme(&theme_dir)?;
        Ok(Box::new(MousecapeBuilder {
            theme,
            identifier,
            table: FrameTable::new(),
        }))
    }

    fn finalize(&mut self) -> Result<()> {
        for (theme_dir, theme) in std::mem::take(&mut self.themes) {
            let writer = theme
                .lock()
                .map_err(|_| CursorError::state("mousecape theme lock poisoned"))?
                .take();
            if let Some(writer) = writer {
                let count = writer.len();
                writer.finish()?;
                info!(
                    "wrote {} ({count} cursors)",
                    Self::container_path(&theme_dir).display()
                );
            }
        }
        Ok(())
    }

    /// The cursor's entry inside the theme container, `<theme>.cape/<identifier>`.
    fn output_path(&self, target: &Path, _frame_delay_hint: Option<u32>) -> PathBuf {
        let identifier = self.names.mousecape_id(file_name_or(target, "cursor"));
        Self::container_path(&Self::theme_dir(target)).join(identifier)
    }
}

pub struct MousecapeBuilder {
    theme: SharedTheme,
    identifier: String,
    table: FrameTable,
}

impl CursorBuilder for MousecapeBuilder {
    /// Images are grouped into scale tiers by pixel width; `nominal_size`
    /// only keys duplicates.
    fn add_frame(
        &mut self,
        frame: u32,
        nominal_size: u32,
        hotspot: Hotspot,
        image: RgbaImage,
        delay_ms: u32,
    ) -> Result<()> {
        self.table
            .insert(frame, CursorImage::new(image, hotspot, nominal_size), delay_ms);
        Ok(())
    }

    fn build(self: Box<Self>) -> Result<()> {
        let Self {
            theme,
            identifier,
            table,
        } = *self;
        let cursor = CapeCursor::from_frames(table)?;
        let mut guard = theme
            .lock()
            .map_err(|_| CursorError::state("mousecape theme lock poisoned"))?;
        match guard.as_mut() {
            Some(writer) => writer.add_cursor(&identifier, cursor),
            None => Err(CursorError::state(format!(
                "theme already finalized, cannot add {identifier}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::CapeReader;
    use crate::formats::test_support::frame_image;
    use tempfile::tempdir;

    fn config(incremental: bool) -> BuildConfig {
        let mut config = BuildConfig::default();
        config.output_format = "mousecape".to_string();
        config.mousecape.author = "tester".to_string();
        config.mousecape.incremental = incremental;
        config
    }

    fn build_cursor(format: &mut MousecapeFormat, target: &Path, frames: u32) {
        let delay = (frames > 1).then_some(80);
        let mut builder = format.builder_for(target, false, delay).unwrap();
        for frame in 1..=frames {
            for size in [32, 64] {
                let hot = Hotspot::new(size / 16, size / 16);
                builder
                    .add_frame(frame, size, hot, frame_image(size, frame), 80)
                    .unwrap();
            }
        }
        builder.build().unwrap();
    }

    #[test]
    fn test_theme_collects_cursors() {
        for incremental in [false, true] {
            let dir = tempdir().unwrap();
            let theme_dir = dir.path().join("Aqua");
            std::fs::create_dir_all(&theme_dir).unwrap();

            let mut format = MousecapeFormat::new(&config(incremental));
            build_cursor(&mut format, &theme_dir.join("left_ptr"), 1);
            build_cursor(&mut format, &theme_dir.join("wait"), 4);
            format.finalize().unwrap();

            let theme = CapeReader::read_file(theme_dir.join("Aqua.cape")).unwrap();
            assert_eq!(theme.metadata.name, "Aqua");
            assert_eq!(theme.metadata.author, "tester");
            assert_eq!(theme.metadata.identifier, "local.Aqua");

            let ids: Vec<&str> = theme.cursors.keys().map(String::as_str).collect();
            assert_eq!(
                ids,
                vec!["com.apple.coregraphics.Arrow", "com.apple.coregraphics.Wait"]
            );
            let wait = &theme.cursors["com.apple.coregraphics.Wait"];
            assert_eq!(wait.frame_count, 4);
            assert_eq!(wait.representations[1].dimensions(), (64, 256));
        }
    }

    #[test]
    fn test_update_existing_is_rejected_eagerly() {
        let dir = tempdir().unwrap();
        let mut format = MousecapeFormat::new(&config(false));
        let err = format
            .builder_for(&dir.path().join("left_ptr"), true, None)
            .err()
            .unwrap();
        assert!(matches!(err, CursorError::Unsupported(_)));
        assert!(!MousecapeFormat::container_path(dir.path()).exists());
    }

    #[test]
    fn test_build_after_finalize_fails() {
        let dir = tempdir().unwrap();
        let mut format = MousecapeFormat::new(&config(false));
        let mut builder = format
            .builder_for(&dir.path().join("left_ptr"), false, None)
            .unwrap();
        builder
            .add_frame(0, 32, Hotspot::new(0, 0), frame_image(32, 0), 0)
            .unwrap();
        format.finalize().unwrap();
        assert!(matches!(builder.build(), Err(CursorError::State(_))));
    }
}
