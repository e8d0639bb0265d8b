use image::RgbaImage;
use log::info;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use super::{CursorBuilder, OutputFormat};
use crate::config::BuildConfig;
use crate::error::{CursorError, Result};
use crate::formats::{AniReader, AniWriter, CurReader, CurWriter};
use crate::model::{CursorImage, Hotspot, STATIC_FRAME};

/// `.cur` for static cursors, `.ani` for animated ones.
pub struct WindowsFormat {
    title: Option<String>,
    artist: Option<String>,
}

impl WindowsFormat {
    pub fn new(config: &BuildConfig) -> Self {
        Self {
            title: config.windows.title.clone(),
            artist: config.windows.artist.clone(),
        }
    }
}

/// An explicit `.ani`/`.cur` extension wins; otherwise the delay hint picks
/// one and it is appended.
pub fn resolve_target(target: &Path, frame_delay_hint: Option<u32>) -> (PathBuf, bool) {
    let ext = target
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase());
    match ext.as_deref() {
        Some("ani") => (target.to_path_buf(), true),
        Some("cur") => (target.to_path_buf(), false),
        _ => {
            let animated = frame_delay_hint.is_some();
            let mut name = OsString::from(target.as_os_str());
            name.push(if animated { ".ani" } else { ".cur" });
            (PathBuf::from(name), animated)
        }
    }
}

impl OutputFormat for WindowsFormat {
    fn name(&self) -> &'static str {
        "windows"
    }

    fn builder_for(
        &mut self,
        target: &Path,
        update_existing: bool,
        frame_delay_hint: Option<u32>,
    ) -> Result<Box<dyn CursorBuilder>> {
        let (path, animated) = resolve_target(target, frame_delay_hint);
        let merge = update_existing && path.exists();

        if animated {
            let mut writer = if merge {
                AniWriter::from_cursor(AniReader::read_file(&path)?.to_cursor_data()?)
            } else {
                AniWriter::new()
            };
            if let Some(delay) = frame_delay_hint {
                writer.set_display_rate_ms(delay);
            }
            if let Some(title) = &self.title {
                writer.set_title(title.clone());
            }
            if let Some(artist) = &self.artist {
                writer.set_artist(artist.clone());
            }
            Ok(Box::new(AniBuilder { path, writer }))
        } else {
            let writer = if merge {
                CurWriter::from_cursor(CurReader::read_file(&path)?)
            } else {
                CurWriter::new()
            };
            Ok(Box::new(CurBuilder { path, writer }))
        }
    }

    fn output_path(&self, target: &Path, frame_delay_hint: Option<u32>) -> PathBuf {
        resolve_target(target, frame_delay_hint).0
    }
}

pub struct CurBuilder {
    path: PathBuf,
    writer: CurWriter,
}

impl CursorBuilder for CurBuilder {
    fn add_frame(
        &mut self,
        frame: u32,
        nominal_size: u32,
        hotspot: Hotspot,
        image: RgbaImage,
        _delay_ms: u32,
    ) -> Result<()> {
        if frame > 1 {
            return Err(CursorError::state(format!(
                "static cursor {} cannot hold frame {frame}",
                self.path.display()
            )));
        }
        self.writer
            .add_image(CursorImage::new(image, hotspot, nominal_size));
        Ok(())
    }

    fn build(self: Box<Self>) -> Result<()> {
        fs::write(&self.path, self.writer.to_bytes()?)?;
        info!(
            "wrote {} ({} images)",
            self.path.display(),
            self.writer.len()
        );
        Ok(())
    }
}

pub struct AniBuilder {
    path: PathBuf,
    writer: AniWriter,
}

impl CursorBuilder for AniBuilder {
    fn add_frame(
        &mut self,
        frame: u32,
        nominal_size: u32,
        hotspot: Hotspot,
        image: RgbaImage,
        delay_ms: u32,
    ) -> Result<()> {
        // a static image becomes the only frame
        let frame = if frame == STATIC_FRAME { 1 } else { frame };
        self.writer
            .add_image(frame, CursorImage::new(image, hotspot, nominal_size), delay_ms);
        Ok(())
    }

    fn build(self: Box<Self>) -> Result<()> {
        fs::write(&self.path, self.writer.to_bytes()?)?;
        info!(
            "wrote {} ({} frames)",
            self.path.display(),
            self.writer.frame_count()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::test_support::pattern_image;
    use tempfile::tempdir;

    fn format() -> WindowsFormat {
        WindowsFormat::new(&BuildConfig::default())
    }

    #[test]
    fn test_resolve_target() {
        let cases = [
            ("a/arrow", None, "a/arrow.cur", false),
            ("a/busy", Some(50), "a/busy.ani", true),
            ("a/busy.ANI", None, "a/busy.ANI", true),
            ("a/still.cur", Some(50), "a/still.cur", false),
            ("a/v1.2", None, "a/v1.2.cur", false),
        ];
        for (target, hint, path, animated) in cases {
            let resolved = resolve_target(Path::new(target), hint);
            assert_eq!(resolved, (PathBuf::from(path), animated), "{target}");
        }
    }

    #[test]
    fn test_static_sizes_sorted() {
        let dir = tempdir().unwrap();
        let mut builder = format()
            .builder_for(&dir.path().join("arrow"), false, None)
            .unwrap();
        for (size, hot) in [(32, 4), (64, 8), (48, 6)] {
            builder
                .add_frame(STATIC_FRAME, size, Hotspot::new(hot, hot), pattern_image(size), 0)
                .unwrap();
        }
        builder.build().unwrap();

        let cursor = CurReader::read_file(dir.path().join("arrow.cur")).unwrap();
        let entries: Vec<(u32, u32)> = cursor.frames[0]
            .images
            .iter()
            .map(|i| (i.width(), i.hotspot.x))
            .collect();
        assert_eq!(entries, vec![(64, 8), (48, 6), (32, 4)]);
    }

    #[test]
    fn test_animation_gap_fails_build() {
        let dir = tempdir().unwrap();
        let mut builder = format()
            .builder_for(&dir.path().join("busy"), false, Some(100))
            .unwrap();
        for frame in [1, 2, 4] {
            builder
                .add_frame(frame, 32, Hotspot::new(0, 0), pattern_image(32), 100)
                .unwrap();
        }
        let err = builder.build().unwrap_err();
        assert!(matches!(err, CursorError::State(_)));
        assert!(err.to_string().contains("frame 3"));
        assert!(!dir.path().join("busy.ani").exists());
    }

    #[test]
    fn test_update_existing_merges_frames() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("busy");

        let mut first = format().builder_for(&target, false, Some(100)).unwrap();
        for frame in [1, 2] {
            first
                .add_frame(frame, 32, Hotspot::new(1, 1), pattern_image(32), 100)
                .unwrap();
        }
        first.build().unwrap();

        let mut second = format().builder_for(&target, true, Some(100)).unwrap();
        second
            .add_frame(3, 32, Hotspot::new(1, 1), pattern_image(32), 100)
            .unwrap();
        second.build().unwrap();

        let ani = AniReader::read_file(dir.path().join("busy.ani")).unwrap();
        assert_eq!(ani.to_cursor_data().unwrap().frames.len(), 3);
    }

    #[test]
    fn test_static_target_rejects_animation() {
        let dir = tempdir().unwrap();
        let mut builder = format()
            .builder_for(&dir.path().join("still.cur"), false, Some(50))
            .unwrap();
        assert!(
            builder
                .add_frame(2, 32, Hotspot::new(0, 0), pattern_image(32), 50)
                .is_err()
        );
    }
}
