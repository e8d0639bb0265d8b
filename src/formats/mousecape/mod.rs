// Mousecape (.cape) theme bundles: an XML property list holding many cursors

mod dtd;
mod reader;
mod writer;

pub use reader::{CapeContentHandler, CapeReader, PlistValue};
pub use writer::CapeWriter;

use image::RgbaImage;
use image::imageops;
use log::warn;
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{CursorError, Result, format_err};
use crate::model::{CursorData, CursorFrame, CursorImage, FrameTable, Hotspot, STATIC_FRAME};

/// Mousecape stores at most this many scale tiers per cursor (×1, ×2, ×5, ×10).
pub const MAX_REPRESENTATIONS: usize = 4;
pub const CAPE_EXTENSION: &str = "cape";
pub const MIN_CAPE_VERSION: f64 = 2.0;

/// Theme-level keys of the top dictionary.
#[derive(Debug, Clone, PartialEq)]
pub struct CapeMetadata {
    pub name: String,
    pub author: String,
    pub identifier: String,
    pub version: f64,
    pub min_version: f64,
    pub hidpi: bool,
    pub cloud: bool,
}

impl Default for CapeMetadata {
    fn default() -> Self {
        Self {
            name: "Untitled".to_string(),
            author: String::new(),
            identifier: "local.cursorforge.theme".to_string(),
            version: 1.0,
            min_version: MIN_CAPE_VERSION,
            hidpi: true,
            cloud: false,
        }
    }
}

/// One entry of the `Cursors` dictionary.
///
/// Hotspot and dimensions are in points; each representation is a PNG
/// filmstrip whose width fixes its scale tier.
#[derive(Debug, Clone, PartialEq)]
pub struct CapeCursor {
    pub frame_count: u32,
    /// Seconds per frame.
    pub frame_duration: f64,
    pub hotspot: (f64, f64),
    pub points_wide: f64,
    pub points_high: f64,
    pub representations: Vec<RgbaImage>,
}

impl Default for CapeCursor {
    fn default() -> Self {
        Self {
            frame_count: 1,
            frame_duration: 1.0,
            hotspot: (0.0, 0.0),
            points_wide: 0.0,
            points_high: 0.0,
            representations: Vec::new(),
        }
    }
}

impl CapeCursor {
    /// Assembles filmstrips from per-frame images.
    ///
    /// Tiers are the pixel widths every frame supplies. The smallest one is
    /// the ×1 tier and defines the point dimensions and hotspot.
    pub fn from_frames(table: FrameTable) -> Result<Self> {
        let cursor = table.into_cursor();
        let Some(first) = cursor.frames.first() else {
            return Err(CursorError::state("cursor has no images"));
        };
        cursor.inconsistent_frames();

        let mut tiers: BTreeSet<u32> = first.images.iter().map(|i| i.width()).collect();
        for frame in &cursor.frames[1..] {
            let widths: BTreeSet<u32> = frame.images.iter().map(|i| i.width()).collect();
            let missing: Vec<u32> = tiers.difference(&widths).copied().collect();
            for width in missing {
                warn!(
                    "frame {} has no {width}px image, dropping that tier",
                    frame.number
                );
                tiers.remove(&width);
            }
        }
        let mut tiers: Vec<u32> = tiers.into_iter().collect();
        if tiers.is_empty() {
            return Err(CursorError::state("no image size is present in every frame"));
        }
        if tiers.len() > MAX_REPRESENTATIONS {
            warn!(
                "{} scale tiers requested, keeping the smallest {MAX_REPRESENTATIONS}",
                tiers.len()
            );
            tiers.truncate(MAX_REPRESENTATIONS);
        }

        let pick = |frame: &CursorFrame, width: u32| -> Option<CursorImage> {
            frame.images.iter().find(|i| i.width() == width).cloned()
        };
        let base = pick(first, tiers[0])
            .ok_or_else(|| CursorError::state("base tier image vanished"))?;

        let frame_count = cursor.frames.len() as u32;
        let delays: BTreeSet<u32> = cursor.frames.iter().map(|f| f.delay_ms).collect();
        if delays.len() > 1 {
            warn!("mousecape supports one frame duration, using {}ms", first.delay_ms);
        }
        let frame_duration = if frame_count > 1 {
            f64::from(first.delay_ms) / 1000.0
        } else {
            1.0
        };

        let mut representations = Vec::with_capacity(tiers.len());
        for &width in &tiers {
            let images: Vec<CursorImage> = cursor
                .frames
                .iter()
                .filter_map(|frame| pick(frame, width))
                .collect();
            let height = images[0].height();
            if images.iter().any(|i| i.height() != height) {
                return Err(CursorError::state(format!(
                    "frames of the {width}px tier differ in height"
                )));
            }
            let mut strip = RgbaImage::new(width, height * frame_count);
            for (index, image) in images.iter().enumerate() {
                imageops::replace(&mut strip, &image.image, 0, i64::from(height) * index as i64);
            }
            representations.push(strip);
        }

        Ok(Self {
            frame_count,
            frame_duration,
            hotspot: (f64::from(base.hotspot.x), f64::from(base.hotspot.y)),
            points_wide: f64::from(base.width()),
            points_high: f64::from(base.height()),
            representations,
        })
    }

    pub fn is_animated(&self) -> bool {
        self.frame_count > 1
    }

    /// Slices every representation back into frames.
    ///
    /// Each tier's scale is its image width over the point width; frame
    /// height is the image height divided by the frame count. Images are
    /// keyed by their pixel width.
    pub fn frames(&self) -> Result<CursorData> {
        if self.frame_count == 0 {
            format_err!("cursor declares zero frames");
        }
        if self.points_wide <= 0.0 {
            format_err!("cursor has no point width");
        }
        let delay_ms = if self.is_animated() {
            (self.frame_duration * 1000.0).round() as u32
        } else {
            0
        };
        let mut frames: Vec<CursorFrame> = (0..self.frame_count)
            .map(|i| {
                let number = if self.is_animated() { i + 1 } else { STATIC_FRAME };
                CursorFrame::new(number, delay_ms)
            })
            .collect();

        for strip in &self.representations {
            let width = strip.width();
            if strip.height() % self.frame_count != 0 {
                format_err!(
                    "{}px representation of height {} does not hold {} equal frames",
                    width,
                    strip.height(),
                    self.frame_count
                );
            }
            let frame_height = strip.height() / self.frame_count;
            let scale = f64::from(width) / self.points_wide;
            let hotspot = Hotspot::new(
                (self.hotspot.0 * scale).round().max(0.0) as u32,
                (self.hotspot.1 * scale).round().max(0.0) as u32,
            );
            for (index, frame) in frames.iter_mut().enumerate() {
                let top = frame_height * index as u32;
                let image = imageops::crop_imm(strip, 0, top, width, frame_height).to_image();
                frame.images.push(CursorImage::new(image, hotspot, width));
            }
        }
        Ok(CursorData::new(frames))
    }
}

/// A fully decoded theme.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CapeTheme {
    pub metadata: CapeMetadata,
    pub cursors: BTreeMap<String, CapeCursor>,
    current: Option<(String, CapeCursor)>,
}

impl CapeTheme {
    pub fn new(metadata: CapeMetadata) -> Self {
        Self {
            metadata,
            ..Self::default()
        }
    }

    pub fn cursor_data(&self, identifier: &str) -> Result<Option<CursorData>> {
        self.cursors
            .get(identifier)
            .map(CapeCursor::frames)
            .transpose()
    }
}

impl CapeContentHandler for CapeTheme {
    fn theme_property(&mut self, key: &str, value: &PlistValue) -> Result<()> {
        let meta = &mut self.metadata;
        match key {
            "CapeName" => meta.name = value.as_str().unwrap_or_default().to_string(),
            "Author" => meta.author = value.as_str().unwrap_or_default().to_string(),
            "Identifier" => meta.identifier = value.as_str().unwrap_or_default().to_string(),
            "CapeVersion" => meta.version = value.as_f64().unwrap_or(meta.version),
            "MinimumVersion" => meta.min_version = value.as_f64().unwrap_or(meta.min_version),
            "HiDPI" => meta.hidpi = value.as_bool().unwrap_or(meta.hidpi),
            "Cloud" => meta.cloud = value.as_bool().unwrap_or(meta.cloud),
            other => log::debug!("ignoring theme key {other}"),
        }
        Ok(())
    }

    fn begin_cursor(&mut self, identifier: &str) -> Result<()> {
        self.current = Some((identifier.to_string(), CapeCursor::default()));
        Ok(())
    }

    fn cursor_property(&mut self, _identifier: &str, key: &str, value: &PlistValue) -> Result<()> {
        let Some((_, cursor)) = self.current.as_mut() else {
            return Ok(());
        };
        let number = value.as_f64();
        match (key, number) {
            ("FrameCount", Some(n)) => cursor.frame_count = n.max(0.0) as u32,
            ("FrameDuration", Some(n)) => cursor.frame_duration = n,
            ("HotSpotX", Some(n)) => cursor.hotspot.0 = n,
            ("HotSpotY", Some(n)) => cursor.hotspot.1 = n,
            ("PointsWide", Some(n)) => cursor.points_wide = n,
            ("PointsHigh", Some(n)) => cursor.points_high = n,
            (key, _) => log::debug!("ignoring cursor key {key}"),
        }
        Ok(())
    }

    fn representation(&mut self, _identifier: &str, _index: usize, png: &[u8]) -> Result<()> {
        if let Some((_, cursor)) = self.current.as_mut() {
            cursor.representations.push(super::decode_png(png)?);
        }
        Ok(())
    }

    fn end_cursor(&mut self, identifier: &str) -> Result<()> {
        if let Some((_, cursor)) = self.current.take() {
            if self.cursors.insert(identifier.to_string(), cursor).is_some() {
                warn!("cursor {identifier} appears twice, keeping the last one");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::test_support::frame_image;

    fn animated_table(frames: u32, sizes: &[u32]) -> FrameTable {
        let mut table = FrameTable::new();
        for frame in 1..=frames {
            for &size in sizes {
                let hot = Hotspot::new(size / 8, size / 4);
                table.insert(frame, CursorImage::new(frame_image(size, frame), hot, size), 50);
            }
        }
        table
    }

    #[test]
    fn test_filmstrip_layout() {
        let cape = CapeCursor::from_frames(animated_table(3, &[32, 64])).unwrap();
        assert_eq!(cape.frame_count, 3);
        assert_eq!(cape.frame_duration, 0.05);
        assert_eq!((cape.points_wide, cape.points_high), (32.0, 32.0));
        assert_eq!(cape.hotspot, (4.0, 8.0));
        let dims: Vec<(u32, u32)> = cape.representations.iter().map(|r| r.dimensions()).collect();
        assert_eq!(dims, vec![(32, 96), (64, 192)]);
    }

    #[test]
    fn test_filmstrip_slicing() {
        let cape = CapeCursor::from_frames(animated_table(4, &[32, 64])).unwrap();
        let data = cape.frames().unwrap();
        assert_eq!(data.frames.len(), 4);
        for frame in &data.frames {
            assert_eq!(frame.delay_ms, 50);
            let large = frame.image_for_size(64).unwrap();
            assert_eq!(large.image, frame_image(64, frame.number));
            assert_eq!(large.hotspot, Hotspot::new(8, 16));
            assert_eq!(frame.image_for_size(32).unwrap().height(), 32);
        }
    }

    #[test]
    fn test_static_cursor_has_single_frame() {
        let mut table = FrameTable::new();
        table.insert(
            STATIC_FRAME,
            CursorImage::new(frame_image(32, 0), Hotspot::new(1, 1), 32),
            0,
        );
        let cape = CapeCursor::from_frames(table).unwrap();
        assert!(!cape.is_animated());
        assert_eq!(cape.frame_duration, 1.0);

        let data = cape.frames().unwrap();
        assert!(!data.is_animated());
        assert_eq!(data.frames[0].delay_ms, 0);
    }

    #[test]
    fn test_uneven_filmstrip_is_rejected() {
        let cape = CapeCursor {
            frame_count: 3,
            points_wide: 32.0,
            points_high: 32.0,
            representations: vec![RgbaImage::new(32, 100)],
            ..CapeCursor::default()
        };
        assert!(cape.frames().unwrap_err().is_format_error());
    }

    #[test]
    fn test_tiers_are_capped() {
        let cape = CapeCursor::from_frames(animated_table(1, &[16, 32, 48, 64, 96])).unwrap();
        let widths: Vec<u32> = cape.representations.iter().map(|r| r.width()).collect();
        assert_eq!(widths, vec![16, 32, 48, 64]);
    }

    #[test]
    fn test_partial_tier_is_dropped() {
        let mut table = animated_table(2, &[32]);
        table.insert(
            1,
            CursorImage::new(frame_image(64, 1), Hotspot::new(8, 16), 64),
            50,
        );
        let cape = CapeCursor::from_frames(table).unwrap();
        assert_eq!(cape.representations.len(), 1);
    }
}
