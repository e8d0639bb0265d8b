// Format-agnostic cursor sinks and the factory that picks one per output format

pub mod mousecape;
pub mod registry;
pub mod windows;
pub mod xcursor;

pub use registry::FormatRegistry;

use image::RgbaImage;
use log::debug;
use std::path::{Path, PathBuf};

use crate::config::BuildConfig;
use crate::error::Result;
use crate::fs_ops::ensure_parent_dir;
use crate::model::Hotspot;

/// Receives the images of one output cursor and writes its container.
///
/// Frames may arrive in any order. `build` consumes the builder; formats that
/// batch several cursors into one container only finish the container in
/// [`BuilderFactory::finalize_themes`].
pub trait CursorBuilder: Send {
    fn add_frame(
        &mut self,
        frame: u32,
        nominal_size: u32,
        hotspot: Hotspot,
        image: RgbaImage,
        delay_ms: u32,
    ) -> Result<()>;

    fn build(self: Box<Self>) -> Result<()>;
}

/// Hands out one builder per target path.
pub trait BuilderFactory {
    /// `frame_delay_hint` is `Some` for animated cursors.
    fn builder_for(
        &mut self,
        target: &Path,
        update_existing: bool,
        frame_delay_hint: Option<u32>,
    ) -> Result<Box<dyn CursorBuilder>>;

    /// Completes every container that holds more than one cursor.
    fn finalize_themes(&mut self) -> Result<()>;

    /// The output `builder_for(target, ..)` writes to. Targets that resolve
    /// to the same path write the same cursor.
    fn output_path(&self, target: &Path, _frame_delay_hint: Option<u32>) -> PathBuf {
        target.to_path_buf()
    }
}

/// One registered output format.
pub trait OutputFormat: Send {
    fn name(&self) -> &'static str;

    fn builder_for(
        &mut self,
        target: &Path,
        update_existing: bool,
        frame_delay_hint: Option<u32>,
    ) -> Result<Box<dyn CursorBuilder>>;

    fn finalize(&mut self) -> Result<()> {
        Ok(())
    }

    fn output_path(&self, target: &Path, _frame_delay_hint: Option<u32>) -> PathBuf {
        target.to_path_buf()
    }
}

/// The synchronous factory: builders encode and write on the calling thread.
pub struct CursorBuilderFactory {
    format: Box<dyn OutputFormat>,
}

impl CursorBuilderFactory {
    /// Looks up `config.output_format` among the built-in formats.
    pub fn new(config: &BuildConfig) -> Result<Self> {
        Self::with_registry(&FormatRegistry::with_defaults(), config)
    }

    pub fn with_registry(registry: &FormatRegistry, config: &BuildConfig) -> Result<Self> {
        let format = registry.create(&config.output_format, config)?;
        debug!("output format {}", format.name());
        Ok(Self { format })
    }

    pub fn format_name(&self) -> &'static str {
        self.format.name()
    }
}

impl BuilderFactory for CursorBuilderFactory {
    fn builder_for(
        &mut self,
        target: &Path,
        update_existing: bool,
        frame_delay_hint: Option<u32>,
    ) -> Result<Box<dyn CursorBuilder>> {
        ensure_parent_dir(target)?;
        self.format
            .builder_for(target, update_existing, frame_delay_hint)
    }

    fn finalize_themes(&mut self) -> Result<()> {
        self.format.finalize()
    }

    fn output_path(&self, target: &Path, frame_delay_hint: Option<u32>) -> PathBuf {
        self.format.output_path(target, frame_delay_hint)
    }
}
