// In-memory cursor model shared by every codec

use image::RgbaImage;
use log::warn;
use std::collections::{BTreeMap, BTreeSet};

/// Frame number used for a cursor that is not animated.
pub const STATIC_FRAME: u32 = 0;

/// Click point of a cursor image, in pixels from the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Hotspot {
    pub x: u32,
    pub y: u32,
}

impl Hotspot {
    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }

    /// Scales both coordinates by `factor`, rounding to the nearest pixel.
    pub fn scaled(self, factor: f64) -> Self {
        Self {
            x: (self.x as f64 * factor).round() as u32,
            y: (self.y as f64 * factor).round() as u32,
        }
    }

    /// Keeps the hotspot inside a `width` x `height` bitmap.
    pub fn clamped(self, width: u32, height: u32) -> Self {
        Self {
            x: self.x.min(width.saturating_sub(1)),
            y: self.y.min(height.saturating_sub(1)),
        }
    }
}

impl From<(u32, u32)> for Hotspot {
    fn from((x, y): (u32, u32)) -> Self {
        Self { x, y }
    }
}

/// One stored bitmap: pixels, hotspot and the nominal size it is filed under.
#[derive(Debug, Clone, PartialEq)]
pub struct CursorImage {
    pub image: RgbaImage,
    pub hotspot: Hotspot,
    pub nominal_size: u32,
}

impl CursorImage {
    pub fn new(image: RgbaImage, hotspot: Hotspot, nominal_size: u32) -> Self {
        Self {
            image,
            hotspot,
            nominal_size,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// The larger pixel dimension, used to key images by size.
    pub fn pixel_size(&self) -> u32 {
        self.width().max(self.height())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CursorFrame {
    /// 1-based for animations, [`STATIC_FRAME`] otherwise.
    pub number: u32,
    pub images: Vec<CursorImage>,
    pub delay_ms: u32,
}

impl CursorFrame {
    pub fn new(number: u32, delay_ms: u32) -> Self {
        Self {
            number,
            images: Vec::new(),
            delay_ms,
        }
    }

    pub fn image_for_size(&self, nominal_size: u32) -> Option<&CursorImage> {
        self.images.iter().find(|i| i.nominal_size == nominal_size)
    }
}

/// A single logical pointer as decoded from any container.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CursorData {
    pub frames: Vec<CursorFrame>,
}

impl CursorData {
    pub fn new(frames: Vec<CursorFrame>) -> Self {
        Self { frames }
    }

    pub fn is_animated(&self) -> bool {
        self.frames.len() > 1 || self.frames.iter().any(|f| f.number != STATIC_FRAME)
    }

    /// Distinct nominal sizes over all frames, ascending.
    pub fn nominal_sizes(&self) -> Vec<u32> {
        let sizes: BTreeSet<u32> = self
            .frames
            .iter()
            .flat_map(|f| f.images.iter().map(|i| i.nominal_size))
            .collect();
        sizes.into_iter().collect()
    }

    pub fn image_count(&self) -> usize {
        self.frames.iter().map(|f| f.images.len()).sum()
    }

    /// Frames whose size set differs from the first frame's. Logged as warnings;
    /// codecs tolerate partial sets.
    pub fn inconsistent_frames(&self) -> Vec<u32> {
        let mut sets = self.frames.iter().map(|f| {
            let sizes: BTreeSet<u32> = f.images.iter().map(|i| i.nominal_size).collect();
            (f.number, sizes)
        });
        let Some((_, expected)) = sets.next() else {
            return Vec::new();
        };
        let mismatched: Vec<u32> = sets
            .filter(|(_, sizes)| *sizes != expected)
            .map(|(number, _)| number)
            .collect();
        if !mismatched.is_empty() {
            warn!(
                "frames {:?} do not supply the same sizes as the first frame {:?}",
                mismatched, expected
            );
        }
        mismatched
    }
}

/// Accumulates images keyed by (frame number, nominal size).
///
/// Builders use this to collect `add_frame` calls in any order and emit them
/// in a deterministic (frame, size) order. Re-adding a key replaces the
/// previous image and logs a warning.
#[derive(Debug, Clone, Default)]
pub struct FrameTable {
    images: BTreeMap<(u32, u32), CursorImage>,
    delays: BTreeMap<u32, u32>,
}

impl FrameTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, frame: u32, image: CursorImage, delay_ms: u32) {
        let key = (frame, image.nominal_size);
        if self.images.insert(key, image).is_some() {
            warn!(
                "duplicate image for frame {} size {}, keeping the last one",
                key.0, key.1
            );
        }
        self.delays.insert(frame, delay_ms);
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn frame_numbers(&self) -> Vec<u32> {
        self.delays.keys().copied().collect()
    }

    pub fn delay(&self, frame: u32) -> u32 {
        self.delays.get(&frame).copied().unwrap_or(0)
    }

    pub fn images(&self) -> impl Iterator<Item = (u32, &CursorImage)> {
        self.images.iter().map(|(&(frame, _), img)| (frame, img))
    }

    /// Loads every frame of a decoded cursor, e.g. for update-in-place merges.
    pub fn extend_from(&mut self, cursor: CursorData) {
        for frame in cursor.frames {
            for image in frame.images {
                self.insert(frame.number, image, frame.delay_ms);
            }
        }
    }

    pub fn into_cursor(self) -> CursorData {
        let mut frames: BTreeMap<u32, CursorFrame> = BTreeMap::new();
        for ((number, _), image) in self.images {
            let delay = self.delays.get(&number).copied().unwrap_or(0);
            frames
                .entry(number)
                .or_insert_with(|| CursorFrame::new(number, delay))
                .images
                .push(image);
        }
        CursorData::new(frames.into_values().collect())
    }
}
