// Dump cursor files to PNG + descriptor, and compile descriptors back into any format

use anyhow::{Context, Result, anyhow};
use image::{ImageFormat, RgbaImage};
use log::{info, warn};
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::builder::{BuilderFactory, CursorBuilderFactory};
use crate::config::BuildConfig;
use crate::formats::{
    AniReader, CapeReader, CurReader, CursorFormat, XcursorReader, detect_file,
};
use crate::gen_config::CursorGenConfig;
use crate::model::CursorData;
use crate::pipeline_worker::ConcurrentFactory;

pub const DESCRIPTOR_EXTENSION: &str = "conf";

#[derive(Debug, Clone, Default)]
pub struct DumpOptions {
    /// Base name for images and descriptor; defaults to the cursor's name.
    pub prefix: Option<String>,
    /// Also write `<prefix>.xcursorgen` in the `xcursorgen` layout.
    pub xcursorgen: bool,
}

impl DumpOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn with_xcursorgen(mut self, write: bool) -> Self {
        self.xcursorgen = write;
        self
    }
}

#[derive(Debug, Default)]
pub struct DumpSummary {
    /// Descriptors written.
    pub dumped: Vec<PathBuf>,
    /// Files that no codec recognized.
    pub skipped: usize,
    pub failed: Vec<(PathBuf, String)>,
}

/// Decodes every cursor in a file, named by file stem (or Mousecape
/// identifier for themes).
pub fn read_cursors(path: &Path) -> Result<(CursorFormat, Vec<(String, CursorData)>)> {
    let format = detect_file(path)?
        .ok_or_else(|| anyhow!("unrecognized cursor file: {}", path.display()))?;
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("cursor")
        .to_string();

    let cursors = match format {
        CursorFormat::Cur => vec![(stem, CurReader::read_file(path)?)],
        CursorFormat::Ani => vec![(stem, AniReader::read_file(path)?.to_cursor_data()?)],
        CursorFormat::Xcursor => vec![(stem, XcursorReader::read_file(path)?.to_cursor_data())],
        CursorFormat::Mousecape => {
            let theme = CapeReader::read_file(path)?;
            let mut cursors = Vec::with_capacity(theme.cursors.len());
            for (identifier, cursor) in &theme.cursors {
                let data = cursor
                    .frames()
                    .with_context(|| format!("cursor {identifier}"))?;
                cursors.push((identifier.clone(), data));
            }
            cursors
        }
    };
    Ok((format, cursors))
}

/// Writes each image of `cursor` as a PNG plus a descriptor listing them.
pub fn dump_cursor(
    cursor: &CursorData,
    name: &str,
    output_dir: &Path,
    source_format: CursorFormat,
    options: &DumpOptions,
) -> Result<PathBuf> {
    fs::create_dir_all(output_dir)?;
    let prefix = options.prefix.as_deref().unwrap_or(name);

    let mut config = CursorGenConfig::from_cursor(cursor, |frame, size| {
        format!("{prefix}_{frame:03}_{size}.png")
    })?;
    config.set_meta("name", name);
    config.set_meta("format", source_format.name());

    for frame in &cursor.frames {
        for image in &frame.images {
            let file = format!("{prefix}_{:03}_{}.png", frame.number, image.nominal_size);
            write_png(&image.image, &output_dir.join(file))?;
        }
    }

    let config_path = output_dir.join(format!("{prefix}.{DESCRIPTOR_EXTENSION}"));
    config.save_to_file(&config_path)?;
    if options.xcursorgen {
        fs::write(
            output_dir.join(format!("{prefix}.xcursorgen")),
            config.to_xcursorgen_string(),
        )?;
    }
    Ok(config_path)
}

/// Dumps every cursor in `input`; returns the descriptors written.
pub fn dump(input: &Path, output_dir: &Path, options: &DumpOptions) -> Result<Vec<PathBuf>> {
    let (format, cursors) =
        read_cursors(input).with_context(|| format!("failed to read {}", input.display()))?;
    let mut written = Vec::with_capacity(cursors.len());
    for (name, cursor) in &cursors {
        let path = dump_cursor(cursor, name, output_dir, format, options)
            .with_context(|| format!("failed to dump {name}"))?;
        written.push(path);
    }
    info!("dumped {} cursor(s) from {}", written.len(), input.display());
    Ok(written)
}

/// Dumps every recognized cursor file under `input_dir` in parallel, one
/// output directory per file. Failures are collected, not fatal.
pub fn dump_all(input_dir: &Path, output_dir: &Path, options: &DumpOptions) -> Result<DumpSummary> {
    fs::create_dir_all(output_dir)?;

    let files: Vec<PathBuf> = WalkDir::new(input_dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect();

    let results: Vec<(PathBuf, Result<Option<Vec<PathBuf>>>)> = files
        .into_par_iter()
        .map(|path| {
            let result = match detect_file(&path) {
                Ok(Some(_)) => {
                    let stem = path
                        .file_stem()
                        .and_then(|s| s.to_str())
                        .unwrap_or("cursor");
                    dump(&path, &output_dir.join(stem), options).map(Some)
                }
                Ok(None) => Ok(None),
                Err(e) => Err(e.into()),
            };
            (path, result)
        })
        .collect();

    let mut summary = DumpSummary::default();
    for (path, result) in results {
        match result {
            Ok(Some(configs)) => summary.dumped.extend(configs),
            Ok(None) => summary.skipped += 1,
            Err(e) => {
                warn!("{}: {e:#}", path.display());
                summary.failed.push((path, format!("{e:#}")));
            }
        }
    }
    summary.dumped.sort();
    info!(
        "dumped {} cursor(s), skipped {} file(s), {} failure(s)",
        summary.dumped.len(),
        summary.skipped,
        summary.failed.len()
    );
    Ok(summary)
}

/// Feeds one descriptor into a builder for `target`. Multi-cursor formats
/// still need `finalize_themes` on the factory afterwards.
pub fn compile(
    config_path: &Path,
    target: &Path,
    factory: &mut dyn BuilderFactory,
    update_existing: bool,
) -> Result<()> {
    let config = CursorGenConfig::load_from_file(config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    if config.is_empty() {
        return Err(anyhow!("{} lists no images", config_path.display()));
    }
    let base_dir = config_path.parent().unwrap_or(Path::new(""));

    let mut builder = factory
        .builder_for(target, update_existing, config.frame_delay_hint())
        .with_context(|| format!("no builder for {}", target.display()))?;
    for entry in config.entries() {
        let path = config.image_path(base_dir, entry);
        let image = image::open(&path)
            .with_context(|| format!("failed to open {}", path.display()))?
            .to_rgba8();
        builder.add_frame(
            entry.frame,
            entry.nominal_size,
            entry.hotspot,
            image,
            entry.delay_ms,
        )?;
    }
    builder
        .build()
        .with_context(|| format!("failed to build {}", target.display()))
}

/// Compiles `(descriptor, target)` pairs with the factory `config` selects,
/// through the worker queues when concurrency is enabled.
pub fn compile_all(jobs: &[(PathBuf, PathBuf)], config: &BuildConfig) -> Result<()> {
    let factory = CursorBuilderFactory::new(config)?;
    if config.concurrency.enabled {
        let mut factory = ConcurrentFactory::from_config(factory, &config.concurrency);
        for (descriptor, target) in jobs {
            compile(descriptor, target, &mut factory, config.update_existing)?;
        }
        factory.shutdown()?;
    } else {
        let mut factory = factory;
        for (descriptor, target) in jobs {
            compile(descriptor, target, &mut factory, config.update_existing)?;
        }
        factory.finalize_themes()?;
    }
    info!("compiled {} cursor(s)", jobs.len());
    Ok(())
}

fn write_png(image: &RgbaImage, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    image
        .save_with_format(path, ImageFormat::Png)
        .with_context(|| format!("failed to write {}", path.display()))
}
