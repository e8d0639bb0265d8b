// Cursor container codecs

pub mod ani;
pub mod bounded;
pub mod cur;
pub mod mousecape;
pub mod xcursor;

#[cfg(test)]
mod formats_test;

pub use ani::{AniReader, AniWriter};
pub use cur::{CurReader, CurWriter};
pub use mousecape::{CapeReader, CapeTheme, CapeWriter};
pub use xcursor::{XcursorReader, XcursorWriter};

use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, ImageFormat, RgbaImage};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::error::{CursorError, Result};

const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";

/// Outcome of a bounded peek at a file header.
#[derive(Debug)]
pub enum Detection {
    NotThisFormat,
    ThisFormat,
    /// The peek itself failed (e.g. an I/O error), not a format mismatch.
    ParseError(CursorError),
}

impl Detection {
    pub fn is_match(&self) -> bool {
        matches!(self, Detection::ThisFormat)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CursorFormat {
    Cur,
    Ani,
    Xcursor,
    Mousecape,
}

impl CursorFormat {
    pub const ALL: [CursorFormat; 4] = [
        CursorFormat::Xcursor,
        CursorFormat::Cur,
        CursorFormat::Ani,
        CursorFormat::Mousecape,
    ];

    /// Runs this format's header peek over `reader`.
    pub fn detect<R: Read>(self, reader: R) -> Detection {
        match self {
            CursorFormat::Cur => CurReader::detect(reader),
            CursorFormat::Ani => AniReader::detect(reader),
            CursorFormat::Xcursor => XcursorReader::detect(reader),
            CursorFormat::Mousecape => CapeReader::detect(reader),
        }
    }

    /// Tries every format against an in-memory prefix of a file.
    pub fn sniff(data: &[u8]) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|format| format.detect(data).is_match())
    }

    pub fn name(self) -> &'static str {
        match self {
            CursorFormat::Cur => "cur",
            CursorFormat::Ani => "ani",
            CursorFormat::Xcursor => "xcursor",
            CursorFormat::Mousecape => "mousecape",
        }
    }
}

/// Identifies the container format of a file on disk.
///
/// Returns `Ok(None)` when no codec recognizes the file; errors only for
/// failures unrelated to the file's content.
pub fn detect_file<P: AsRef<Path>>(path: P) -> Result<Option<CursorFormat>> {
    let path = path.as_ref();
    let mut first_error = None;
    for format in CursorFormat::ALL {
        let reader = BufReader::new(File::open(path)?);
        match format.detect(reader) {
            Detection::ThisFormat => return Ok(Some(format)),
            Detection::NotThisFormat => {}
            Detection::ParseError(e) => {
                first_error.get_or_insert(e);
            }
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(None),
    }
}

pub(crate) fn is_png(data: &[u8]) -> bool {
    data.starts_with(PNG_SIGNATURE)
}

pub(crate) fn encode_png(image: &RgbaImage) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    PngEncoder::new(&mut out).write_image(
        image.as_raw(),
        image.width(),
        image.height(),
        ExtendedColorType::Rgba8,
    )?;
    Ok(out)
}

pub(crate) fn decode_png(data: &[u8]) -> Result<RgbaImage> {
    if !is_png(data) {
        return Err(CursorError::format("payload is not a PNG stream"));
    }
    Ok(image::load_from_memory_with_format(data, ImageFormat::Png)?.to_rgba8())
}

#[cfg(test)]
pub(crate) mod test_support {
    use image::{Rgba, RgbaImage};

    use crate::model::{CursorImage, Hotspot};

    /// Opaque gradient with a fully transparent top-left corner, so codecs
    /// that premultiply alpha still round-trip exactly.
    pub fn pattern_image(size: u32) -> RgbaImage {
        let mut img = RgbaImage::new(size, size);
        for y in 0..size {
            for x in 0..size {
                let px = if x < 2 && y < 2 {
                    Rgba([0, 0, 0, 0])
                } else {
                    Rgba([(x * 7) as u8, (y * 5) as u8, ((x + y) * 3) as u8, 255])
                };
                img.put_pixel(x, y, px);
            }
        }
        img
    }

    pub fn sample(size: u32, hot: u32) -> CursorImage {
        CursorImage::new(pattern_image(size), Hotspot::new(hot, hot), size)
    }

    /// Every alpha level from 0 to 255 under varying colour, including
    /// colour hidden behind zero alpha.
    pub fn translucent_image(size: u32, frame: u32) -> RgbaImage {
        RgbaImage::from_fn(size, size, |x, y| {
            let alpha = ((y * size + x) * 7 + frame) % 256;
            Rgba([
                ((x * 37 + frame * 11) % 256) as u8,
                ((y * 53) % 256) as u8,
                ((x * y + 90) % 256) as u8,
                alpha as u8,
            ])
        })
    }

    /// A frame-dependent variant of [`pattern_image`].
    pub fn frame_image(size: u32, frame: u32) -> RgbaImage {
        let mut img = pattern_image(size);
        let marker = Rgba([255, (frame * 40) as u8, 0, 255]);
        img.put_pixel(size - 1, size - 1, marker);
        img
    }
}
