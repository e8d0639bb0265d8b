use byteorder::{LittleEndian, ReadBytesExt};
use image::RgbaImage;
use log::{debug, warn};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, BufReader, Read};
use std::path::Path;

use super::{
    COMMENT_HEADER_LEN, COMMENT_TYPE, FILE_HEADER_LEN, FILE_VERSION, IMAGE_HEADER_LEN,
    IMAGE_TYPE, IMAGE_VERSION, MAX_IMAGE_DIM, XCURSOR_MAGIC, from_premultiplied_bgra,
};
use crate::error::{CursorError, Result, format_err};
use crate::formats::Detection;
use crate::formats::bounded::CountingReader;
use crate::model::{CursorData, CursorImage, FrameTable, Hotspot, STATIC_FRAME};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TocEntry {
    pub chunk_type: u32,
    pub subtype: u32,
    pub position: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageHeader {
    pub nominal_size: u32,
    pub width: u32,
    pub height: u32,
    pub hotspot: Hotspot,
    pub delay_ms: u32,
}

/// Structural events of an Xcursor file, chunks in file order.
pub trait XcursorContentHandler {
    fn toc(&mut self, _entries: &[TocEntry]) -> Result<()> {
        Ok(())
    }

    fn image(&mut self, header: &ImageHeader, pixels: RgbaImage) -> Result<()>;

    fn comment(&mut self, subtype: u32, text: &str) -> Result<()> {
        debug!("comment (type {subtype}): {text}");
        Ok(())
    }

    fn unknown_chunk(&mut self, entry: &TocEntry) -> Result<()> {
        warn!(
            "skipping unknown chunk type 0x{:08x} at {}",
            entry.chunk_type, entry.position
        );
        Ok(())
    }
}

pub struct XcursorReader;

impl XcursorReader {
    pub fn detect<R: Read>(mut reader: R) -> Detection {
        let mut head = [0u8; 8];
        match reader.read_exact(&mut head) {
            Ok(()) if &head[0..4] == XCURSOR_MAGIC => {
                let header_len = u32::from_le_bytes([head[4], head[5], head[6], head[7]]);
                if header_len >= FILE_HEADER_LEN {
                    Detection::ThisFormat
                } else {
                    Detection::NotThisFormat
                }
            }
            Ok(()) => Detection::NotThisFormat,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Detection::NotThisFormat,
            Err(e) => Detection::ParseError(e.into()),
        }
    }

    pub fn parse<R, H>(reader: R, handler: &mut H) -> Result<()>
    where
        R: Read,
        H: XcursorContentHandler + ?Sized,
    {
        let mut reader = CountingReader::new(reader);

        let mut magic = [0u8; 4];
        reader
            .read_exact(&mut magic)
            .map_err(|e| CursorError::from_read(e, "file header"))?;
        if &magic != XCURSOR_MAGIC {
            format_err!("invalid Xcursor magic bytes");
        }
        let header_len = read_u32(&mut reader, "file header")?;
        if header_len < FILE_HEADER_LEN {
            format_err!("invalid Xcursor header size: {header_len}");
        }
        let version = read_u32(&mut reader, "file header")?;
        if version != FILE_VERSION {
            warn!("unexpected Xcursor version 0x{version:08x}");
        }
        let ntoc = read_u32(&mut reader, "file header")?;
        reader
            .skip_to(header_len as u64)
            .map_err(|e| CursorError::from_read(e, "file header"))?;

        let mut toc = Vec::with_capacity(ntoc.min(4096) as usize);
        for _ in 0..ntoc {
            toc.push(TocEntry {
                chunk_type: read_u32(&mut reader, "table of contents")?,
                subtype: read_u32(&mut reader, "table of contents")?,
                position: read_u32(&mut reader, "table of contents")?,
            });
        }
        handler.toc(&toc)?;

        let mut ordered = toc.clone();
        ordered.sort_by_key(|e| e.position);
        for entry in ordered {
            if entry.chunk_type != IMAGE_TYPE && entry.chunk_type != COMMENT_TYPE {
                handler.unknown_chunk(&entry)?;
                continue;
            }
            reader.skip_to(entry.position as u64).map_err(|e| {
                if e.kind() == io::ErrorKind::InvalidData {
                    CursorError::format(format!(
                        "chunk at {} overlaps the previous chunk",
                        entry.position
                    ))
                } else {
                    CursorError::from_read(e, "chunk")
                }
            })?;
            if entry.chunk_type == IMAGE_TYPE {
                let (header, pixels) = read_image_chunk(&mut reader, &entry)?;
                handler.image(&header, pixels)?;
            } else {
                let text = read_comment_chunk(&mut reader, &entry)?;
                handler.comment(entry.subtype, &text)?;
            }
        }
        Ok(())
    }

    pub fn read<R: Read>(reader: R) -> Result<XcursorFile> {
        let mut file = XcursorFile::default();
        Self::parse(reader, &mut file)?;
        if file.images.is_empty() {
            format_err!("no cursor images found");
        }
        Ok(file)
    }

    pub fn read_file<P: AsRef<Path>>(path: P) -> Result<XcursorFile> {
        let file = fs::File::open(path)?;
        Self::read(BufReader::new(file))
    }
}

fn read_u32<R: Read>(reader: &mut R, what: &str) -> Result<u32> {
    reader
        .read_u32::<LittleEndian>()
        .map_err(|e| CursorError::from_read(e, what))
}

fn read_chunk_header<R: Read>(
    reader: &mut R,
    entry: &TocEntry,
    expected_len: u32,
) -> Result<u32> {
    let header_len = read_u32(reader, "chunk header")?;
    let chunk_type = read_u32(reader, "chunk header")?;
    let subtype = read_u32(reader, "chunk header")?;
    if header_len != expected_len {
        format_err!("chunk header size is {header_len}, expected {expected_len}");
    }
    if chunk_type != entry.chunk_type {
        format_err!(
            "chunk at {} has type 0x{chunk_type:08x}, table says 0x{:08x}",
            entry.position,
            entry.chunk_type
        );
    }
    if subtype != entry.subtype {
        warn!(
            "chunk at {} has subtype {subtype}, table says {}",
            entry.position, entry.subtype
        );
    }
    read_u32(reader, "chunk header")
}

fn read_image_chunk<R: Read>(reader: &mut R, entry: &TocEntry) -> Result<(ImageHeader, RgbaImage)> {
    let version = read_chunk_header(reader, entry, IMAGE_HEADER_LEN)?;
    if version != IMAGE_VERSION {
        format_err!("unsupported image version: {version}");
    }
    let width = read_u32(reader, "image header")?;
    let height = read_u32(reader, "image header")?;
    let xhot = read_u32(reader, "image header")?;
    let yhot = read_u32(reader, "image header")?;
    let delay_ms = read_u32(reader, "image header")?;

    if width == 0 || height == 0 || width > MAX_IMAGE_DIM || height > MAX_IMAGE_DIM {
        format_err!("image dimensions {width}x{height} out of range");
    }
    if xhot >= width || yhot >= height {
        warn!("hotspot ({xhot}, {yhot}) lies outside the {width}x{height} image");
    }

    let mut data = vec![0u8; width as usize * height as usize * 4];
    reader
        .read_exact(&mut data)
        .map_err(|e| CursorError::from_read(e, "image pixels"))?;

    let header = ImageHeader {
        nominal_size: entry.subtype,
        width,
        height,
        hotspot: Hotspot::new(xhot, yhot),
        delay_ms,
    };
    Ok((header, from_premultiplied_bgra(width, height, &data)))
}

fn read_comment_chunk<R: Read>(reader: &mut R, entry: &TocEntry) -> Result<String> {
    let _version = read_chunk_header(reader, entry, COMMENT_HEADER_LEN)?;
    let length = read_u32(reader, "comment header")?;
    let mut raw = Vec::with_capacity(length.min(1 << 16) as usize);
    let read = (&mut *reader)
        .take(length as u64)
        .read_to_end(&mut raw)
        .map_err(|e| CursorError::from_read(e, "comment"))?;
    if read < length as usize {
        format_err!("truncated comment");
    }
    Ok(String::from_utf8_lossy(&raw).into_owned())
}

/// All images of an Xcursor file with frame numbers assigned.
///
/// Images sharing a nominal size are successive animation frames, numbered
/// from 1 in file order. A file with one image per size is static.
#[derive(Debug, Clone, Default)]
pub struct XcursorFile {
    pub images: Vec<(ImageHeader, RgbaImage)>,
    pub comments: Vec<(u32, String)>,
}

impl XcursorContentHandler for XcursorFile {
    fn image(&mut self, header: &ImageHeader, pixels: RgbaImage) -> Result<()> {
        self.images.push((*header, pixels));
        Ok(())
    }

    fn comment(&mut self, subtype: u32, text: &str) -> Result<()> {
        self.comments.push((subtype, text.to_string()));
        Ok(())
    }
}

impl XcursorFile {
    pub fn nominal_sizes(&self) -> Vec<u32> {
        let mut sizes: Vec<u32> = self.images.iter().map(|(h, _)| h.nominal_size).collect();
        sizes.sort_unstable();
        sizes.dedup();
        sizes
    }

    pub fn is_animated(&self) -> bool {
        let mut counts: BTreeMap<u32, usize> = BTreeMap::new();
        for (header, _) in &self.images {
            *counts.entry(header.nominal_size).or_default() += 1;
        }
        counts.values().any(|&n| n > 1)
    }

    pub fn to_cursor_data(&self) -> CursorData {
        let animated = self.is_animated();
        let mut next_frame: BTreeMap<u32, u32> = BTreeMap::new();
        let mut table = FrameTable::new();
        for (header, pixels) in &self.images {
            let frame = if animated {
                let n = next_frame.entry(header.nominal_size).or_insert(0);
                *n += 1;
                *n
            } else {
                STATIC_FRAME
            };
            let image = CursorImage::new(pixels.clone(), header.hotspot, header.nominal_size);
            table.insert(frame, image, header.delay_ms);
        }
        let cursor = table.into_cursor();
        cursor.inconsistent_frames();
        cursor
    }
}
