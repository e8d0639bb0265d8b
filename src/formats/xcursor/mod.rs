// X11 Xcursor files: a table of contents followed by image and comment chunks

mod reader;
mod writer;

pub use reader::{ImageHeader, TocEntry, XcursorContentHandler, XcursorFile, XcursorReader};
pub use writer::XcursorWriter;

use image::{Rgba, RgbaImage};

pub const XCURSOR_MAGIC: &[u8; 4] = b"Xcur";
pub const FILE_HEADER_LEN: u32 = 16;
pub const FILE_VERSION: u32 = 0x0001_0000;
pub const TOC_ENTRY_LEN: u32 = 12;

pub const IMAGE_TYPE: u32 = 0xfffd_0002;
pub const IMAGE_HEADER_LEN: u32 = 36;
pub const IMAGE_VERSION: u32 = 1;
pub const MAX_IMAGE_DIM: u32 = 0x7fff;

pub const COMMENT_TYPE: u32 = 0xfffe_0001;
pub const COMMENT_HEADER_LEN: u32 = 20;

/// Maps a nominal size through a desktop size-convention factor, rounding
/// half away from zero.
pub fn remap_nominal(size: u32, factor: f64) -> u32 {
    ((size as f64 * factor).round() as u32).max(1)
}

/// Straight RGBA to premultiplied ARGB32, little-endian (B, G, R, A bytes).
pub(crate) fn to_premultiplied_bgra(image: &RgbaImage) -> Vec<u8> {
    let mut out = Vec::with_capacity(image.as_raw().len());
    for px in image.pixels() {
        let [r, g, b, a] = px.0;
        let mul = |c: u8| ((c as u32 * a as u32 + 127) / 255) as u8;
        out.extend_from_slice(&[mul(b), mul(g), mul(r), a]);
    }
    out
}

/// Inverse of [`to_premultiplied_bgra`]; fully transparent pixels become
/// transparent black.
pub(crate) fn from_premultiplied_bgra(width: u32, height: u32, data: &[u8]) -> RgbaImage {
    let mut image = RgbaImage::new(width, height);
    for (px, chunk) in image.pixels_mut().zip(data.chunks_exact(4)) {
        let [b, g, r, a] = [chunk[0], chunk[1], chunk[2], chunk[3]];
        *px = if a == 0 {
            Rgba([0, 0, 0, 0])
        } else {
            let div = |c: u8| ((c as u32 * 255 + a as u32 / 2) / a as u32).min(255) as u8;
            Rgba([div(r), div(g), div(b), a])
        };
    }
    image
}
