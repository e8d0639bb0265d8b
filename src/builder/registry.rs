use std::collections::BTreeMap;

use super::OutputFormat;
use super::mousecape::MousecapeFormat;
use super::windows::WindowsFormat;
use super::xcursor::XcursorFormat;
use crate::config::BuildConfig;
use crate::error::{CursorError, Result};

pub type FormatConstructor = fn(&BuildConfig) -> Box<dyn OutputFormat>;

/// Output formats by tag. Other formats can be added with
/// [`FormatRegistry::register`].
#[derive(Clone, Default)]
pub struct FormatRegistry {
    formats: BTreeMap<String, FormatConstructor>,
}

impl FormatRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("windows", windows);
        registry.register("xcursor", xcursor);
        registry.register("mousecape", mousecape);
        registry
    }

    /// Replaces any format already registered under `name`.
    pub fn register(&mut self, name: &str, constructor: FormatConstructor) {
        self.formats.insert(name.to_string(), constructor);
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.formats.keys().map(String::as_str)
    }

    pub fn create(&self, name: &str, config: &BuildConfig) -> Result<Box<dyn OutputFormat>> {
        let constructor = self.formats.get(name).ok_or_else(|| {
            let known: Vec<&str> = self.names().collect();
            CursorError::unsupported(format!(
                "unknown output format {name:?} (known: {})",
                known.join(", ")
            ))
        })?;
        Ok(constructor(config))
    }
}

fn windows(config: &BuildConfig) -> Box<dyn OutputFormat> {
    Box::new(WindowsFormat::new(config))
}

fn xcursor(config: &BuildConfig) -> Box<dyn OutputFormat> {
    Box::new(XcursorFormat::new(config))
}

fn mousecape(config: &BuildConfig) -> Box<dyn OutputFormat> {
    Box::new(MousecapeFormat::new(config))
}
