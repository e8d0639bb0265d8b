// Cross-codec conversions: CUR/ANI -> Xcursor -> back, Xcursor -> Mousecape

#[cfg(test)]
mod tests {
    use crate::formats::mousecape::{CapeCursor, CapeMetadata};
    use crate::formats::test_support::{frame_image, sample, translucent_image};
    use crate::formats::{
        AniReader, AniWriter, CapeReader, CapeWriter, CurReader, CurWriter, CursorFormat,
        XcursorReader, XcursorWriter, detect_file,
    };
    use crate::model::{CursorData, CursorImage, FrameTable, Hotspot, STATIC_FRAME};
    use tempfile::tempdir;

    fn animated_xcursor() -> Vec<u8> {
        let mut writer = XcursorWriter::new();
        for frame in 1..=3 {
            for size in [24, 48] {
                let hot = Hotspot::new(size / 6, size / 3);
                writer.add_image(frame, CursorImage::new(frame_image(size, frame), hot, size), 70);
            }
        }
        writer.to_bytes().unwrap()
    }

    #[test]
    fn test_cur_through_xcursor_is_lossless() {
        let mut cur = CurWriter::new();
        cur.add_image(sample(32, 4));
        cur.add_image(sample(48, 6));
        let original = cur.to_bytes().unwrap();

        let decoded = CurReader::read(&original[..]).unwrap();
        let xcur = XcursorWriter::from_cursor(decoded).to_bytes().unwrap();
        let back = XcursorReader::read(&xcur[..]).unwrap().to_cursor_data();
        let again = CurWriter::from_cursor(back).to_bytes().unwrap();

        assert_eq!(original, again);
    }

    #[test]
    fn test_ani_through_xcursor_keeps_timing() {
        let mut ani = AniWriter::new();
        for (frame, delay) in [(1, 50), (2, 50), (3, 100)] {
            ani.add_image(frame, sample(32, 2), delay);
        }
        let bytes = ani.to_bytes().unwrap();

        let decoded = AniReader::read(&bytes[..]).unwrap().to_cursor_data().unwrap();
        let xcur = XcursorWriter::from_cursor(decoded).to_bytes().unwrap();
        let file = XcursorReader::read(&xcur[..]).unwrap();
        assert!(file.is_animated());

        let delays: Vec<u32> = file
            .to_cursor_data()
            .frames
            .iter()
            .map(|f| f.delay_ms)
            .collect();
        assert_eq!(delays, vec![50, 50, 100]);

        let rebuilt = AniWriter::from_cursor(file.to_cursor_data()).to_bytes().unwrap();
        assert_eq!(rebuilt, bytes);
    }

    #[test]
    fn test_xcursor_into_mousecape_theme() {
        let cursor = XcursorReader::read(&animated_xcursor()[..])
            .unwrap()
            .to_cursor_data();
        let mut table = FrameTable::new();
        table.extend_from(cursor.clone());

        let mut writer = CapeWriter::new(Vec::new(), CapeMetadata::default(), true).unwrap();
        writer
            .add_cursor("com.apple.cursor.4", CapeCursor::from_frames(table).unwrap())
            .unwrap();
        let xml = writer.finish().unwrap();

        let theme = CapeReader::read(&xml[..]).unwrap();
        let from_cape = theme.cursor_data("com.apple.cursor.4").unwrap().unwrap();
        assert_eq!(from_cape, cursor);
    }

    fn translucent(frame: u32, size: u32) -> CursorImage {
        CursorImage::new(translucent_image(size, frame), Hotspot::new(3, 4), size)
    }

    fn assert_pixels_match(decoded: &CursorData, frames: &[u32], sizes: &[u32]) {
        for (frame, &number) in decoded.frames.iter().zip(frames) {
            for &size in sizes {
                let image = frame.images.iter().find(|i| i.width() == size).unwrap();
                assert!(
                    image.image == translucent_image(size, number),
                    "frame {number} size {size} differs"
                );
            }
        }
        assert_eq!(decoded.frames.len(), frames.len());
    }

    #[test]
    fn test_partial_alpha_survives_png_codecs() {
        let mut cur = CurWriter::new();
        cur.add_image(translucent(0, 32));
        cur.add_image(translucent(0, 48));
        let decoded = CurReader::read(&cur.to_bytes().unwrap()[..]).unwrap();
        assert_pixels_match(&decoded, &[0], &[32, 48]);

        let mut ani = AniWriter::new();
        for frame in 1..=3 {
            ani.add_image(frame, translucent(frame, 32), 80);
        }
        let bytes = ani.to_bytes().unwrap();
        let decoded = AniReader::read(&bytes[..]).unwrap().to_cursor_data().unwrap();
        assert_pixels_match(&decoded, &[1, 2, 3], &[32]);

        let mut table = FrameTable::new();
        for frame in 1..=3 {
            for size in [32, 64] {
                table.insert(frame, translucent(frame, size), 80);
            }
        }
        let mut writer = CapeWriter::new(Vec::new(), CapeMetadata::default(), false).unwrap();
        writer
            .add_cursor("com.apple.cursor.4", CapeCursor::from_frames(table).unwrap())
            .unwrap();
        let theme = CapeReader::read(&writer.finish().unwrap()[..]).unwrap();
        let decoded = theme.cursor_data("com.apple.cursor.4").unwrap().unwrap();
        assert_pixels_match(&decoded, &[1, 2, 3], &[32, 64]);
    }

    /// Xcursor stores premultiplied alpha, so straight colour comes back only
    /// to within the rounding of one premultiply/unpremultiply pass, and is
    /// lost entirely under zero alpha. Alpha itself is exact.
    #[test]
    fn test_partial_alpha_through_xcursor_within_rounding() {
        let mut writer = XcursorWriter::new();
        writer.add_image(STATIC_FRAME, translucent(0, 32), 0);
        let bytes = writer.to_bytes().unwrap();
        let cursor = XcursorReader::read(&bytes[..]).unwrap().to_cursor_data();
        let decoded = &cursor.frames[0].images[0].image;

        let original = translucent_image(32, 0);
        let mut inexact = 0;
        for (before, after) in original.pixels().zip(decoded.pixels()) {
            let alpha = before.0[3];
            assert_eq!(after.0[3], alpha);
            if alpha == 0 {
                assert_eq!(after.0, [0, 0, 0, 0]);
                continue;
            }
            let tolerance = 255 / (2 * u32::from(alpha)) + 2;
            for channel in 0..3 {
                let diff = u32::from(before.0[channel].abs_diff(after.0[channel]));
                assert!(diff <= tolerance, "{before:?} -> {after:?}");
                if diff > 0 {
                    inexact += 1;
                }
            }
            if alpha == 255 {
                assert_eq!(after, before);
            }
        }
        assert!(inexact > 0);
    }

    #[test]
    fn test_detect_file_on_disk() {
        let dir = tempdir().unwrap();

        let mut cur = CurWriter::new();
        cur.add_image(sample(32, 1));
        let cur_path = dir.path().join("arrow.cur");
        std::fs::write(&cur_path, cur.to_bytes().unwrap()).unwrap();

        let mut ani = AniWriter::new();
        ani.add_image(1, sample(32, 1), 100);
        let ani_path = dir.path().join("busy.ani");
        std::fs::write(&ani_path, ani.to_bytes().unwrap()).unwrap();

        let xcur_path = dir.path().join("left_ptr");
        std::fs::write(&xcur_path, animated_xcursor()).unwrap();

        let cape_path = dir.path().join("theme.cape");
        let writer = CapeWriter::new(Vec::new(), CapeMetadata::default(), false).unwrap();
        std::fs::write(&cape_path, writer.finish().unwrap()).unwrap();

        let junk_path = dir.path().join("notes.txt");
        std::fs::write(&junk_path, b"just some text").unwrap();

        assert_eq!(detect_file(&cur_path).unwrap(), Some(CursorFormat::Cur));
        assert_eq!(detect_file(&ani_path).unwrap(), Some(CursorFormat::Ani));
        assert_eq!(detect_file(&xcur_path).unwrap(), Some(CursorFormat::Xcursor));
        assert_eq!(detect_file(&cape_path).unwrap(), Some(CursorFormat::Mousecape));
        assert_eq!(detect_file(&junk_path).unwrap(), None);
        assert!(detect_file(dir.path().join("missing")).is_err());
    }
}
