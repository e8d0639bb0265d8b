// Windows static cursor (.cur): an icon directory of PNG payloads

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use image::RgbaImage;
use log::{debug, warn};
use std::fs;
use std::io::{BufReader, Cursor, Read, Write};
use std::path::Path;

use super::bounded::{BoundedReader, CountingReader};
use super::{Detection, decode_png, encode_png, is_png};
use crate::error::{CursorError, Result, format_err};
use crate::model::{CursorData, CursorFrame, CursorImage, Hotspot, STATIC_FRAME};

pub const RESOURCE_ICON: u16 = 1;
pub const RESOURCE_CURSOR: u16 = 2;

const HEADER_LEN: u32 = 6;
const ENTRY_LEN: u32 = 16;
/// Color count written for true-color images: "256 or more".
const COLOR_COUNT_UNBOUNDED: u8 = 0;

/// One directory record, with width/height bytes of 0 expanded to 256.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirEntry {
    pub width: u32,
    pub height: u32,
    pub color_count: u8,
    pub reserved: u8,
    pub hotspot: Hotspot,
    pub data_size: u32,
    pub data_offset: u32,
}

/// Receives the structural events of a cursor directory as it is parsed.
pub trait CurContentHandler {
    fn header(&mut self, _resource_type: u16, _count: u16) -> Result<()> {
        Ok(())
    }

    /// `data` yields exactly `entry.data_size` bytes. Unread bytes are skipped
    /// once the callback returns.
    fn image(&mut self, entry: &DirEntry, data: &mut dyn Read) -> Result<()>;
}

pub struct CurReader;

impl CurReader {
    /// Peeks the 6-byte header.
    pub fn detect<R: Read>(mut reader: R) -> Detection {
        let mut header = [0u8; HEADER_LEN as usize];
        match reader.read_exact(&mut header) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Detection::NotThisFormat;
            }
            Err(e) => return Detection::ParseError(e.into()),
        }
        let reserved = u16::from_le_bytes([header[0], header[1]]);
        let restype = u16::from_le_bytes([header[2], header[3]]);
        let count = u16::from_le_bytes([header[4], header[5]]);
        if reserved == 0 && restype == RESOURCE_CURSOR && count > 0 {
            Detection::ThisFormat
        } else {
            Detection::NotThisFormat
        }
    }

    /// Streams a cursor directory through `handler`.
    ///
    /// Payloads are delivered in file order, which for files written by
    /// [`CurWriter`] is also directory order.
    pub fn parse<R, H>(reader: R, handler: &mut H) -> Result<()>
    where
        R: Read,
        H: CurContentHandler + ?Sized,
    {
        let mut reader = CountingReader::new(reader);

        let reserved = read_u16(&mut reader, "header")?;
        let restype = read_u16(&mut reader, "header")?;
        let count = read_u16(&mut reader, "header")?;
        if reserved != 0 {
            format_err!("reserved header field is {reserved}, expected 0");
        }
        if restype != RESOURCE_CURSOR {
            format_err!("resource type is {restype}, expected {RESOURCE_CURSOR} (cursor)");
        }
        handler.header(restype, count)?;

        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            entries.push(read_dir_entry(&mut reader)?);
        }

        let mut order: Vec<usize> = (0..entries.len()).collect();
        order.sort_by_key(|&i| entries[i].data_offset);

        for index in order {
            let entry = entries[index];
            reader.skip_to(entry.data_offset as u64).map_err(|e| {
                if e.kind() == std::io::ErrorKind::InvalidData {
                    CursorError::format(format!(
                        "image data at offset {} overlaps previous entry",
                        entry.data_offset
                    ))
                } else {
                    CursorError::from_read(e, "directory")
                }
            })?;
            debug!(
                "cur entry {}x{} at {} ({} bytes)",
                entry.width, entry.height, entry.data_offset, entry.data_size
            );
            let mut data = BoundedReader::new(&mut reader, entry.data_size as u64);
            handler.image(&entry, &mut data)?;
            data.finish().map_err(|e| CursorError::from_read(e, "image data"))?;
        }
        Ok(())
    }

    pub fn read<R: Read>(reader: R) -> Result<CursorData> {
        let mut collector = ImageCollector::default();
        Self::parse(reader, &mut collector)?;
        Ok(CursorData::new(vec![CursorFrame {
            number: STATIC_FRAME,
            images: collector.images,
            delay_ms: 0,
        }]))
    }

    pub fn read_file<P: AsRef<Path>>(path: P) -> Result<CursorData> {
        let file = fs::File::open(path)?;
        Self::read(BufReader::new(file))
    }
}

/// Decodes every payload into a [`CursorImage`], in delivery order.
#[derive(Debug, Default)]
pub struct ImageCollector {
    pub images: Vec<CursorImage>,
}

impl CurContentHandler for ImageCollector {
    fn image(&mut self, entry: &DirEntry, data: &mut dyn Read) -> Result<()> {
        let mut bytes = Vec::with_capacity(entry.data_size as usize);
        data.read_to_end(&mut bytes)
            .map_err(|e| CursorError::from_read(e, "image data"))?;
        let image = decode_payload(&bytes)?;
        if image.width() != entry.width || image.height() != entry.height {
            debug!(
                "directory says {}x{}, payload is {}x{}",
                entry.width,
                entry.height,
                image.width(),
                image.height()
            );
        }
        let nominal = image.width().max(image.height());
        let image = CursorImage::new(image, entry.hotspot, nominal);
        self.images.push(image);
        Ok(())
    }
}

fn read_u16<R: Read>(reader: &mut R, what: &str) -> Result<u16> {
    reader
        .read_u16::<LittleEndian>()
        .map_err(|e| CursorError::from_read(e, what))
}

fn read_dir_entry<R: Read>(reader: &mut R) -> Result<DirEntry> {
    let mut read = || -> std::io::Result<DirEntry> {
        let width = reader.read_u8()?;
        let height = reader.read_u8()?;
        Ok(DirEntry {
            width: if width == 0 { 256 } else { width as u32 },
            height: if height == 0 { 256 } else { height as u32 },
            color_count: reader.read_u8()?,
            reserved: reader.read_u8()?,
            hotspot: Hotspot::new(
                reader.read_u16::<LittleEndian>()? as u32,
                reader.read_u16::<LittleEndian>()? as u32,
            ),
            data_size: reader.read_u32::<LittleEndian>()?,
            data_offset: reader.read_u32::<LittleEndian>()?,
        })
    };
    read().map_err(|e| CursorError::from_read(e, "directory entry"))
}

/// Decodes a PNG payload, or a legacy DIB (BMP without file header, XOR
/// image followed by an AND mask).
pub fn decode_payload(data: &[u8]) -> Result<RgbaImage> {
    if is_png(data) {
        return decode_png(data);
    }
    decode_dib(data)
}

fn decode_dib(dib: &[u8]) -> Result<RgbaImage> {
    if dib.len() < 40 {
        format_err!("DIB payload too small ({} bytes)", dib.len());
    }
    let width = i32::from_le_bytes([dib[4], dib[5], dib[6], dib[7]]).unsigned_abs();
    // DIB height covers the XOR image and the AND mask.
    let height = i32::from_le_bytes([dib[8], dib[9], dib[10], dib[11]]).unsigned_abs() / 2;
    if width == 0 || height == 0 {
        format_err!("DIB payload has empty dimensions {width}x{height}");
    }

    // image's ICO decoder handles the mask; give it a one-entry icon directory.
    let mut ico = Vec::with_capacity(dib.len() + 22);
    ico.write_u16::<LittleEndian>(0)?;
    ico.write_u16::<LittleEndian>(RESOURCE_ICON)?;
    ico.write_u16::<LittleEndian>(1)?;
    ico.write_u8(size_byte(width))?;
    ico.write_u8(size_byte(height))?;
    ico.write_u8(0)?;
    ico.write_u8(0)?;
    ico.write_u16::<LittleEndian>(1)?; // planes
    ico.write_u16::<LittleEndian>(u16::from_le_bytes([dib[14], dib[15]]))?;
    ico.write_u32::<LittleEndian>(dib.len() as u32)?;
    ico.write_u32::<LittleEndian>(HEADER_LEN + ENTRY_LEN)?;
    ico.write_all(dib)?;

    let decoder = image::codecs::ico::IcoDecoder::new(Cursor::new(ico))?;
    Ok(image::DynamicImage::from_decoder(decoder)?.to_rgba8())
}

fn size_byte(px: u32) -> u8 {
    if px >= 256 { 0 } else { px as u8 }
}

/// Accumulates images and serializes a `.cur` file.
///
/// Images are keyed by pixel dimensions; adding a second image of the same
/// dimensions replaces the first.
#[derive(Debug, Clone, Default)]
pub struct CurWriter {
    images: Vec<CursorImage>,
}

impl CurWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from the images of an existing file.
    pub fn from_cursor(cursor: CursorData) -> Self {
        let mut writer = Self::new();
        for image in cursor.frames.into_iter().flat_map(|f| f.images) {
            writer.add_image(image);
        }
        writer
    }

    pub fn add_image(&mut self, image: CursorImage) {
        let dims = (image.width(), image.height());
        if let Some(slot) = self
            .images
            .iter_mut()
            .find(|i| (i.width(), i.height()) == dims)
        {
            warn!("replacing existing {}x{} cursor image", dims.0, dims.1);
            *slot = image;
        } else {
            self.images.push(image);
        }
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Writes the directory largest image first, then the payloads in the
    /// same order.
    pub fn write<W: Write>(&self, mut writer: W) -> Result<()> {
        if self.images.is_empty() {
            return Err(CursorError::state("cursor has no images"));
        }
        if self.images.len() > u16::MAX as usize {
            return Err(CursorError::state(format!(
                "too many images ({}, max {})",
                self.images.len(),
                u16::MAX
            )));
        }

        let mut sorted: Vec<&CursorImage> = self.images.iter().collect();
        sorted.sort_by(|a, b| {
            (b.width(), b.height()).cmp(&(a.width(), a.height()))
        });

        let payloads = sorted
            .iter()
            .map(|img| encode_png(&img.image))
            .collect::<Result<Vec<_>>>()?;

        writer.write_u16::<LittleEndian>(0)?;
        writer.write_u16::<LittleEndian>(RESOURCE_CURSOR)?;
        writer.write_u16::<LittleEndian>(sorted.len() as u16)?;

        let mut offset = HEADER_LEN + ENTRY_LEN * sorted.len() as u32;
        for (img, payload) in sorted.iter().zip(&payloads) {
            let hotspot = img.hotspot;
            if hotspot.x > u16::MAX as u32 || hotspot.y > u16::MAX as u32 {
                return Err(CursorError::state(format!(
                    "hotspot ({}, {}) does not fit the directory entry",
                    hotspot.x, hotspot.y
                )));
            }
            writer.write_u8(size_byte(img.width()))?;
            writer.write_u8(size_byte(img.height()))?;
            writer.write_u8(COLOR_COUNT_UNBOUNDED)?;
            writer.write_u8(0)?;
            writer.write_u16::<LittleEndian>(hotspot.x as u16)?;
            writer.write_u16::<LittleEndian>(hotspot.y as u16)?;
            writer.write_u32::<LittleEndian>(payload.len() as u32)?;
            writer.write_u32::<LittleEndian>(offset)?;
            offset += payload.len() as u32;
        }
        for payload in &payloads {
            writer.write_all(payload)?;
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.write(&mut out)?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::test_support::{pattern_image, sample};

    #[test]
    fn test_magic_detection() {
        let valid = [0x00, 0x00, 0x02, 0x00, 0x01, 0x00];
        assert!(matches!(CurReader::detect(&valid[..]), Detection::ThisFormat));

        let icon = [0x00, 0x00, 0x01, 0x00, 0x01, 0x00];
        assert!(matches!(CurReader::detect(&icon[..]), Detection::NotThisFormat));

        let short = [0x00, 0x00];
        assert!(matches!(CurReader::detect(&short[..]), Detection::NotThisFormat));
    }

    #[test]
    fn test_entries_sorted_largest_first() {
        let mut writer = CurWriter::new();
        writer.add_image(sample(32, 4));
        writer.add_image(sample(64, 8));
        writer.add_image(sample(48, 6));
        let bytes = writer.to_bytes().unwrap();

        let cursor = CurReader::read(&bytes[..]).unwrap();
        let images = &cursor.frames[0].images;
        let widths: Vec<u32> = images.iter().map(|i| i.width()).collect();
        assert_eq!(widths, vec![64, 48, 32]);
        let hotspots: Vec<Hotspot> = images.iter().map(|i| i.hotspot).collect();
        assert_eq!(
            hotspots,
            vec![Hotspot::new(8, 8), Hotspot::new(6, 6), Hotspot::new(4, 4)]
        );
        assert_eq!(images[0].height(), 64);
    }

    #[test]
    fn test_directory_layout() {
        let mut writer = CurWriter::new();
        writer.add_image(sample(32, 4));
        writer.add_image(sample(256, 9));
        let bytes = writer.to_bytes().unwrap();

        assert_eq!(&bytes[0..6], &[0, 0, 2, 0, 2, 0]);
        // 256 px is stored as 0
        assert_eq!(bytes[6], 0);
        assert_eq!(bytes[8], COLOR_COUNT_UNBOUNDED);
        let first_offset = u32::from_le_bytes([bytes[18], bytes[19], bytes[20], bytes[21]]);
        assert_eq!(first_offset, 6 + 2 * 16);
        let first_size = u32::from_le_bytes([bytes[14], bytes[15], bytes[16], bytes[17]]);
        let second_offset = u32::from_le_bytes([bytes[34], bytes[35], bytes[36], bytes[37]]);
        assert_eq!(second_offset, first_offset + first_size);
        assert_eq!(bytes[22], 32);
    }

    #[test]
    fn test_pixels_survive() {
        let image = pattern_image(24);
        let mut writer = CurWriter::new();
        writer.add_image(CursorImage::new(image.clone(), Hotspot::new(3, 5), 24));
        let cursor = CurReader::read(&writer.to_bytes().unwrap()[..]).unwrap();
        assert_eq!(cursor.frames[0].images[0].image, image);
        assert_eq!(cursor.frames[0].images[0].nominal_size, 24);
    }

    #[test]
    fn test_handler_sees_exact_payload_windows() {
        struct Sizes(Vec<(u32, usize)>);
        impl CurContentHandler for Sizes {
            fn image(&mut self, entry: &DirEntry, data: &mut dyn Read) -> Result<()> {
                // Read only part of the payload; the parser must skip the rest.
                let mut head = [0u8; 8];
                data.read_exact(&mut head)?;
                let mut rest = Vec::new();
                data.read_to_end(&mut rest)?;
                self.0.push((entry.width, head.len() + rest.len()));
                Ok(())
            }
        }

        let mut writer = CurWriter::new();
        writer.add_image(sample(16, 1));
        writer.add_image(sample(32, 2));
        let bytes = writer.to_bytes().unwrap();

        let mut sizes = Sizes(Vec::new());
        CurReader::parse(&bytes[..], &mut sizes).unwrap();
        assert_eq!(sizes.0.len(), 2);
        assert_eq!(sizes.0[0].0, 32);
        let total: usize = sizes.0.iter().map(|(_, n)| n).sum();
        assert_eq!(total + 6 + 32, bytes.len());
    }

    #[test]
    fn test_truncated_payload_is_format_error() {
        let mut writer = CurWriter::new();
        writer.add_image(sample(32, 4));
        let bytes = writer.to_bytes().unwrap();
        let err = CurReader::read(&bytes[..bytes.len() - 10]).unwrap_err();
        assert!(err.is_format_error(), "{err:?}");
    }

    #[test]
    fn test_bad_header_is_format_error() {
        let err = CurReader::read(&[0u8, 0, 1, 0, 1, 0][..]).unwrap_err();
        assert!(err.is_format_error());
    }

    #[test]
    fn test_same_dimensions_replaced() {
        let mut writer = CurWriter::new();
        writer.add_image(sample(32, 4));
        writer.add_image(sample(32, 7));
        assert_eq!(writer.len(), 1);
        let cursor = CurReader::read(&writer.to_bytes().unwrap()[..]).unwrap();
        assert_eq!(cursor.frames[0].images[0].hotspot, Hotspot::new(7, 7));
    }

    #[test]
    fn test_empty_writer_fails() {
        assert!(matches!(
            CurWriter::new().to_bytes(),
            Err(CursorError::State(_))
        ));
    }
}
