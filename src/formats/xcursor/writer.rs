use byteorder::{LittleEndian, WriteBytesExt};
use log::debug;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

use super::reader::XcursorReader;
use super::{
    FILE_HEADER_LEN, FILE_VERSION, IMAGE_HEADER_LEN, IMAGE_TYPE, IMAGE_VERSION, MAX_IMAGE_DIM,
    TOC_ENTRY_LEN, XCURSOR_MAGIC, remap_nominal, to_premultiplied_bgra,
};
use crate::error::{CursorError, Result};
use crate::model::{CursorData, CursorImage, FrameTable};

/// Accumulates images keyed by (frame, nominal size) and serializes an
/// Xcursor file.
///
/// Images are written grouped by nominal size, frames in ascending order
/// within each size, which is the order libXcursor plays them in.
#[derive(Debug, Clone)]
pub struct XcursorWriter {
    table: FrameTable,
    nominal_factor: f64,
}

impl Default for XcursorWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl XcursorWriter {
    pub fn new() -> Self {
        Self {
            table: FrameTable::new(),
            nominal_factor: 1.0,
        }
    }

    /// Files each added image under `nominal * factor` (rounded) instead of
    /// its own nominal size.
    pub fn with_nominal_factor(mut self, factor: f64) -> Self {
        self.nominal_factor = factor;
        self
    }

    /// Starts from the images of an existing file. Their nominal sizes are
    /// kept as stored.
    pub fn from_cursor(cursor: CursorData) -> Self {
        let mut writer = Self::new();
        writer.table.extend_from(cursor);
        writer
    }

    pub fn open_existing<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = XcursorReader::read_file(path)?;
        Ok(Self::from_cursor(file.to_cursor_data()))
    }

    pub fn add_image(&mut self, frame: u32, mut image: CursorImage, delay_ms: u32) {
        if self.nominal_factor != 1.0 {
            image.nominal_size = remap_nominal(image.nominal_size, self.nominal_factor);
        }
        self.table.insert(frame, image, delay_ms);
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn write<W: Write>(&self, mut writer: W) -> Result<()> {
        if self.table.is_empty() {
            return Err(CursorError::state("cursor has no images"));
        }

        let mut chunks: Vec<(u32, &CursorImage)> = self.table.images().collect();
        chunks.sort_by_key(|(frame, image)| (image.nominal_size, *frame));

        for (_, image) in &chunks {
            if image.width() > MAX_IMAGE_DIM || image.height() > MAX_IMAGE_DIM {
                return Err(CursorError::state(format!(
                    "{}x{} image exceeds the Xcursor size limit",
                    image.width(),
                    image.height()
                )));
            }
        }

        let positions = chunk_positions(chunks.iter().map(|(_, i)| (i.width(), i.height())))?;
        let ntoc = chunks.len() as u32;
        writer.write_all(XCURSOR_MAGIC)?;
        writer.write_u32::<LittleEndian>(FILE_HEADER_LEN)?;
        writer.write_u32::<LittleEndian>(FILE_VERSION)?;
        writer.write_u32::<LittleEndian>(ntoc)?;

        for ((_, image), position) in chunks.iter().zip(positions) {
            writer.write_u32::<LittleEndian>(IMAGE_TYPE)?;
            writer.write_u32::<LittleEndian>(image.nominal_size)?;
            writer.write_u32::<LittleEndian>(position)?;
        }

        for (frame, image) in &chunks {
            let hotspot = image.hotspot.clamped(image.width(), image.height());
            writer.write_u32::<LittleEndian>(IMAGE_HEADER_LEN)?;
            writer.write_u32::<LittleEndian>(IMAGE_TYPE)?;
            writer.write_u32::<LittleEndian>(image.nominal_size)?;
            writer.write_u32::<LittleEndian>(IMAGE_VERSION)?;
            writer.write_u32::<LittleEndian>(image.width())?;
            writer.write_u32::<LittleEndian>(image.height())?;
            writer.write_u32::<LittleEndian>(hotspot.x)?;
            writer.write_u32::<LittleEndian>(hotspot.y)?;
            writer.write_u32::<LittleEndian>(self.table.delay(*frame))?;
            writer.write_all(&to_premultiplied_bgra(&image.image))?;
        }
        debug!("wrote {ntoc} xcursor images");
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.write(&mut out)?;
        Ok(out)
    }

    pub fn write_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let bytes = self.to_bytes()?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(&bytes)?;
        file.flush()?;
        Ok(())
    }
}

/// File offsets of consecutive image chunks of the given dimensions, which
/// the table of contents stores as `u32`.
fn chunk_positions(dims: impl ExactSizeIterator<Item = (u32, u32)>) -> Result<Vec<u32>> {
    let mut positions = Vec::with_capacity(dims.len());
    let mut position = FILE_HEADER_LEN as u64 + TOC_ENTRY_LEN as u64 * dims.len() as u64;
    for (width, height) in dims {
        let offset = u32::try_from(position).map_err(|_| {
            CursorError::state(format!(
                "image chunk {} would start at byte {position}, past the 4 GiB Xcursor limit",
                positions.len()
            ))
        })?;
        positions.push(offset);
        position += IMAGE_HEADER_LEN as u64 + width as u64 * height as u64 * 4;
    }
    Ok(positions)
}
