// Frame descriptor files: one metadata line, then one row per (frame, size) image
//
//   #	name=wait	format=ani
//   1	32	4	4	wait_001_32.png	50
//
// Columns are frame, nominal size, hotspot x, hotspot y, image file, delay in
// milliseconds. Rows are tab separated; whitespace separated rows are accepted
// too, in which case everything between the hotspot and the delay is the file
// name.

use log::warn;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{CursorError, Result, format_err, utf8_text};
use crate::model::{CursorData, Hotspot, STATIC_FRAME};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameEntry {
    pub frame: u32,
    pub nominal_size: u32,
    pub hotspot: Hotspot,
    /// Relative to the descriptor's directory.
    pub file: String,
    pub delay_ms: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CursorGenConfig {
    metadata: BTreeMap<String, String>,
    entries: BTreeMap<(u32, u32), FrameEntry>,
}

impl CursorGenConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_meta(&mut self, key: &str, value: impl Into<String>) {
        self.metadata.insert(key.to_string(), value.into());
    }

    pub fn meta(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    /// Fails on a second row for the same (frame, size).
    pub fn add(&mut self, entry: FrameEntry) -> Result<()> {
        let key = (entry.frame, entry.nominal_size);
        if self.entries.contains_key(&key) {
            format_err!("duplicate entry for frame {} size {}", key.0, key.1);
        }
        self.entries.insert(key, entry);
        Ok(())
    }

    /// Rows in (frame, size) order.
    pub fn entries(&self) -> impl Iterator<Item = &FrameEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_animated(&self) -> bool {
        self.entries.keys().any(|&(frame, _)| frame != STATIC_FRAME)
    }

    /// Delay of the first frame, for animated cursors.
    pub fn frame_delay_hint(&self) -> Option<u32> {
        if !self.is_animated() {
            return None;
        }
        self.entries.values().next().map(|e| e.delay_ms)
    }

    /// Describes `cursor` with image files named by `file_name(frame, size)`.
    pub fn from_cursor(
        cursor: &CursorData,
        file_name: impl Fn(u32, u32) -> String,
    ) -> Result<Self> {
        let mut config = Self::new();
        for frame in &cursor.frames {
            for image in &frame.images {
                config.add(FrameEntry {
                    frame: frame.number,
                    nominal_size: image.nominal_size,
                    hotspot: image.hotspot,
                    file: file_name(frame.number, image.nominal_size),
                    delay_ms: frame.delay_ms,
                })?;
            }
        }
        Ok(config)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut config = Self::new();
        let mut seen_metadata = false;
        for (index, line) in text.lines().enumerate() {
            let line_no = index + 1;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if let Some(rest) = trimmed.strip_prefix('#') {
                if !seen_metadata && rest.contains('=') {
                    config.metadata = parse_metadata(rest);
                    seen_metadata = true;
                }
                continue;
            }
            let entry = parse_row(line)
                .map_err(|e| CursorError::format(format!("line {line_no}: {e}")))?;
            let key = (entry.frame, entry.nominal_size);
            if config.entries.insert(key, entry).is_some() {
                format_err!(
                    "line {line_no}: duplicate entry for frame {} size {}",
                    key.0,
                    key.1
                );
            }
        }
        config.check_sizes();
        Ok(config)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::parse(&utf8_text(fs::read(path)?, "frame descriptor")?)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, self.to_string())?;
        Ok(())
    }

    /// Absolute path of an entry's image.
    pub fn image_path(&self, base_dir: &Path, entry: &FrameEntry) -> PathBuf {
        base_dir.join(&entry.file)
    }

    /// Reads the `xcursorgen` layout: `size xhot yhot file [delay]`.
    ///
    /// The n-th row of a given size becomes frame n. A cursor in which every
    /// size occurs once is static.
    pub fn parse_xcursorgen(text: &str) -> Result<Self> {
        let mut rows = Vec::new();
        for (index, line) in text.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = trimmed.split_whitespace().collect();
            if fields.len() < 4 {
                format_err!("line {}: expected size, hotspot and file", index + 1);
            }
            let number = |i: usize, what: &str| -> Result<u32> {
                fields[i].parse().map_err(|_| {
                    CursorError::format(format!("line {}: bad {what} {:?}", index + 1, fields[i]))
                })
            };
            let size = number(0, "size")?;
            let hotspot = Hotspot::new(number(1, "hotspot x")?, number(2, "hotspot y")?);
            // a trailing number is the delay; file names may contain spaces
            let (file_fields, delay) = match fields.len() {
                4 => (&fields[3..], 0),
                n => match fields[n - 1].parse::<u32>() {
                    Ok(delay) => (&fields[3..n - 1], delay),
                    Err(_) => (&fields[3..], 0),
                },
            };
            rows.push((size, hotspot, file_fields.join(" "), delay));
        }

        let mut counts: BTreeMap<u32, u32> = BTreeMap::new();
        for (size, ..) in &rows {
            *counts.entry(*size).or_insert(0) += 1;
        }
        let animated = counts.values().any(|&n| n > 1);

        let mut next_frame: BTreeMap<u32, u32> = BTreeMap::new();
        let mut config = Self::new();
        for (size, hotspot, file, delay_ms) in rows {
            let frame = if animated {
                let n = next_frame.entry(size).or_insert(0);
                *n += 1;
                *n
            } else {
                STATIC_FRAME
            };
            config.add(FrameEntry {
                frame,
                nominal_size: size,
                hotspot,
                file,
                delay_ms,
            })?;
        }
        config.check_sizes();
        Ok(config)
    }

    /// Rows ordered by size, then frame.
    pub fn to_xcursorgen_string(&self) -> String {
        let mut rows: Vec<&FrameEntry> = self.entries.values().collect();
        rows.sort_by_key(|e| (e.nominal_size, e.frame));
        let mut out = String::new();
        for e in rows {
            if self.is_animated() {
                out.push_str(&format!(
                    "{} {} {} {} {}\n",
                    e.nominal_size, e.hotspot.x, e.hotspot.y, e.file, e.delay_ms
                ));
            } else {
                out.push_str(&format!(
                    "{} {} {} {}\n",
                    e.nominal_size, e.hotspot.x, e.hotspot.y, e.file
                ));
            }
        }
        out
    }

    /// Warns when frames do not all list the same sizes.
    fn check_sizes(&self) {
        let mut sizes: BTreeMap<u32, BTreeSet<u32>> = BTreeMap::new();
        for &(frame, size) in self.entries.keys() {
            sizes.entry(frame).or_default().insert(size);
        }
        let mut sets = sizes.iter();
        if let Some((_, first)) = sets.next() {
            for (frame, set) in sets {
                if set != first {
                    warn!("frame {frame} lists sizes {set:?}, first frame lists {first:?}");
                }
            }
        }
    }
}

impl fmt::Display for CursorGenConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#")?;
        for (key, value) in &self.metadata {
            write!(f, "\t{key}={value}")?;
        }
        writeln!(f)?;
        for e in self.entries.values() {
            writeln!(
                f,
                "{}\t{}\t{}\t{}\t{}\t{}",
                e.frame, e.nominal_size, e.hotspot.x, e.hotspot.y, e.file, e.delay_ms
            )?;
        }
        Ok(())
    }
}

fn parse_metadata(line: &str) -> BTreeMap<String, String> {
    let parts: Vec<&str> = if line.contains('\t') {
        line.split('\t').collect()
    } else {
        line.split_whitespace().collect()
    };
    parts
        .into_iter()
        .filter_map(|part| part.trim().split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}

fn parse_row(line: &str) -> std::result::Result<FrameEntry, String> {
    let tabbed: Vec<&str> = line.trim().split('\t').collect();
    let fields: Vec<String> = if tabbed.len() == 6 {
        tabbed.iter().map(|s| s.trim().to_string()).collect()
    } else {
        let words: Vec<&str> = line.split_whitespace().collect();
        if words.len() < 6 {
            return Err(format!("expected 6 columns, found {}", words.len()));
        }
        let last = words.len() - 1;
        let mut fields: Vec<String> = words[..4].iter().map(|s| s.to_string()).collect();
        fields.push(words[4..last].join(" "));
        fields.push(words[last].to_string());
        fields
    };

    let number = |i: usize, what: &str| -> std::result::Result<u32, String> {
        fields[i]
            .parse()
            .map_err(|_| format!("bad {what} {:?}", fields[i]))
    };
    if fields[4].is_empty() {
        return Err("missing image file".to_string());
    }
    Ok(FrameEntry {
        frame: number(0, "frame number")?,
        nominal_size: number(1, "size")?,
        hotspot: Hotspot::new(number(2, "hotspot x")?, number(3, "hotspot y")?),
        file: fields[4].clone(),
        delay_ms: number(5, "delay")?,
    })
}
