// Xcursor output: one file per cursor name, alias symlinks, optional index.theme

use image::RgbaImage;
use log::{info, warn};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use super::{CursorBuilder, OutputFormat};
use crate::config::BuildConfig;
use crate::error::Result;
use crate::formats::XcursorWriter;
use crate::fs_ops::{file_name_or, link_alias};
use crate::model::{CursorImage, CursorNames, Hotspot};

pub struct XcursorFormat {
    nominal_factor: f64,
    aliases: Option<CursorNames>,
    theme_name: Option<String>,
    cursor_dirs: BTreeSet<PathBuf>,
}

impl XcursorFormat {
    pub fn new(config: &BuildConfig) -> Self {
        Self {
            nominal_factor: config.xcursor.nominal_factor,
            aliases: config
                .xcursor
                .link_aliases
                .then(|| config.names.clone()),
            theme_name: config.xcursor.theme_name.clone(),
            cursor_dirs: BTreeSet::new(),
        }
    }

    fn write_theme_files(&self, theme_name: &str) -> Result<()> {
        for cursors_dir in &self.cursor_dirs {
            let theme_dir = match cursors_dir.parent() {
                Some(parent) if cursors_dir.file_name().is_some_and(|n| n == "cursors") => parent,
                _ => {
                    warn!(
                        "{} is not a cursors/ directory, skipping index.theme",
                        cursors_dir.display()
                    );
                    continue;
                }
            };
            let index_theme = format!(
                "[Icon Theme]\n\
                 Name={theme_name}\n\
                 Comment={theme_name} cursor theme\n\
                 Inherits=hicolor\n\
                 \n\
                 Directories=cursors\n\
                 \n\
                 [cursors]\n\
                 Context=Cursors\n\
                 Type=Fixed\n"
            );
            fs::write(theme_dir.join("index.theme"), index_theme)?;
            info!("wrote {}", theme_dir.join("index.theme").display());
        }
        Ok(())
    }
}

impl OutputFormat for XcursorFormat {
    fn name(&self) -> &'static str {
        "xcursor"
    }

    fn builder_for(
        &mut self,
        target: &Path,
        update_existing: bool,
        _frame_delay_hint: Option<u32>,
    ) -> Result<Box<dyn CursorBuilder>> {
        let writer = if update_existing && target.exists() {
            XcursorWriter::open_existing(target)?
        } else {
            XcursorWriter::new()
        };
        if let Some(dir) = target.parent() {
            self.cursor_dirs.insert(dir.to_path_buf());
        }
        let aliases = self
            .aliases
            .as_ref()
            .map(|names| names.aliases_for(file_name_or(target, "")).to_vec())
            .unwrap_or_default();

        Ok(Box::new(XcursorBuilder {
            path: target.to_path_buf(),
            writer: writer.with_nominal_factor(self.nominal_factor),
            aliases,
        }))
    }

    fn finalize(&mut self) -> Result<()> {
        if let Some(name) = &self.theme_name {
            self.write_theme_files(name)?;
        }
        Ok(())
    }
}

pub struct XcursorBuilder {
    path: PathBuf,
    writer: XcursorWriter,
    aliases: Vec<String>,
}

impl CursorBuilder for XcursorBuilder {
    fn add_frame(
        &mut self,
        frame: u32,
        nominal_size: u32,
        hotspot: Hotspot,
        image: RgbaImage,
        delay_ms: u32,
    ) -> Result<()> {
        self.writer
            .add_image(frame, CursorImage::new(image, hotspot, nominal_size), delay_ms);
        Ok(())
    }

    fn build(self: Box<Self>) -> Result<()> {
        self.writer.write_file(&self.path)?;
        info!(
            "wrote {} ({} images)",
            self.path.display(),
            self.writer.len()
        );

        let name = file_name_or(&self.path, "");
        if let (Some(dir), false) = (self.path.parent(), name.is_empty()) {
            for alias in &self.aliases {
                link_alias(dir, name, alias)?;
            }
        }
        Ok(())
    }
}
