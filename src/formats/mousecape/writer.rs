use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use log::{debug, warn};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use super::dtd::{PLIST_PUBLIC_ID, PLIST_SYSTEM_ID};
use super::{CapeCursor, CapeMetadata};
use crate::error::{CursorError, Result};
use crate::formats::encode_png;

const FORMAT_VERSION: f64 = 2.0;
const BASE64_LINE: usize = 76;

/// Streams a theme as an XML property list.
///
/// In incremental mode the document head goes out on creation and each
/// cursor dictionary is written as soon as it is added. Otherwise cursors
/// are held until [`CapeWriter::finish`] and written sorted by identifier.
pub struct CapeWriter<W: Write> {
    out: W,
    metadata: CapeMetadata,
    incremental: bool,
    pending: BTreeMap<String, CapeCursor>,
    written: BTreeSet<String>,
}

impl CapeWriter<BufWriter<File>> {
    pub fn create<P: AsRef<Path>>(
        path: P,
        metadata: CapeMetadata,
        incremental: bool,
    ) -> Result<Self> {
        let file = BufWriter::new(File::create(path)?);
        Self::new(file, metadata, incremental)
    }
}

impl<W: Write> CapeWriter<W> {
    pub fn new(out: W, metadata: CapeMetadata, incremental: bool) -> Result<Self> {
        let mut writer = Self {
            out,
            metadata,
            incremental,
            pending: BTreeMap::new(),
            written: BTreeSet::new(),
        };
        if incremental {
            writer.write_head()?;
        }
        Ok(writer)
    }

    pub fn is_incremental(&self) -> bool {
        self.incremental
    }

    pub fn len(&self) -> usize {
        self.written.len() + self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn add_cursor(&mut self, identifier: &str, cursor: CapeCursor) -> Result<()> {
        if self.incremental {
            if !self.written.insert(identifier.to_string()) {
                return Err(CursorError::state(format!(
                    "cursor {identifier} was already written to this theme"
                )));
            }
            write_cursor(&mut self.out, identifier, &cursor)?;
            self.out.flush()?;
        } else if self.pending.insert(identifier.to_string(), cursor).is_some() {
            warn!("cursor {identifier} added twice, keeping the last one");
        }
        Ok(())
    }

    /// Closes the document and hands back the sink.
    pub fn finish(mut self) -> Result<W> {
        if !self.incremental {
            self.write_head()?;
            for (identifier, cursor) in std::mem::take(&mut self.pending) {
                write_cursor(&mut self.out, &identifier, &cursor)?;
                self.written.insert(identifier);
            }
        }
        let meta = &self.metadata;
        let out = &mut self.out;
        writeln!(out, "\t</dict>")?;
        write_key(out, 1, "HiDPI")?;
        write_bool(out, 1, meta.hidpi)?;
        write_key(out, 1, "Identifier")?;
        write_string(out, 1, &meta.identifier)?;
        write_key(out, 1, "MinimumVersion")?;
        write_real(out, 1, meta.min_version)?;
        write_key(out, 1, "Version")?;
        write_real(out, 1, FORMAT_VERSION)?;
        writeln!(out, "</dict>")?;
        writeln!(out, "</plist>")?;
        out.flush()?;
        debug!(
            "wrote mousecape theme {:?} with {} cursors",
            meta.name,
            self.written.len()
        );
        Ok(self.out)
    }

    fn write_head(&mut self) -> Result<()> {
        let meta = &self.metadata;
        let out = &mut self.out;
        writeln!(out, "<?xml version=\"1.0\" encoding=\"UTF-8\"?>")?;
        writeln!(out, "<!DOCTYPE plist PUBLIC \"{PLIST_PUBLIC_ID}\" \"{PLIST_SYSTEM_ID}\">")?;
        writeln!(out, "<plist version=\"1.0\">")?;
        writeln!(out, "<dict>")?;
        write_key(out, 1, "Author")?;
        write_string(out, 1, &meta.author)?;
        write_key(out, 1, "CapeName")?;
        write_string(out, 1, &meta.name)?;
        write_key(out, 1, "CapeVersion")?;
        write_real(out, 1, meta.version)?;
        write_key(out, 1, "Cloud")?;
        write_bool(out, 1, meta.cloud)?;
        write_key(out, 1, "Cursors")?;
        writeln!(out, "\t<dict>")?;
        Ok(())
    }
}

fn write_cursor<W: Write>(out: &mut W, identifier: &str, cursor: &CapeCursor) -> Result<()> {
    write_key(out, 2, identifier)?;
    writeln!(out, "\t\t<dict>")?;
    write_key(out, 3, "FrameCount")?;
    writeln!(out, "\t\t\t<integer>{}</integer>", cursor.frame_count)?;
    write_key(out, 3, "FrameDuration")?;
    write_real(out, 3, cursor.frame_duration)?;
    write_key(out, 3, "HotSpotX")?;
    write_real(out, 3, cursor.hotspot.0)?;
    write_key(out, 3, "HotSpotY")?;
    write_real(out, 3, cursor.hotspot.1)?;
    write_key(out, 3, "PointsHigh")?;
    write_real(out, 3, cursor.points_high)?;
    write_key(out, 3, "PointsWide")?;
    write_real(out, 3, cursor.points_wide)?;
    write_key(out, 3, "Representations")?;
    writeln!(out, "\t\t\t<array>")?;
    for strip in &cursor.representations {
        let encoded = STANDARD.encode(encode_png(strip)?);
        writeln!(out, "\t\t\t\t<data>")?;
        for line in encoded.as_bytes().chunks(BASE64_LINE) {
            // base64 output is ASCII
            writeln!(out, "\t\t\t\t{}", String::from_utf8_lossy(line))?;
        }
        writeln!(out, "\t\t\t\t</data>")?;
    }
    writeln!(out, "\t\t\t</array>")?;
    writeln!(out, "\t\t</dict>")?;
    Ok(())
}

fn indent(depth: usize) -> String {
    "\t".repeat(depth)
}

fn write_key<W: Write>(out: &mut W, depth: usize, key: &str) -> Result<()> {
    writeln!(out, "{}<key>{}</key>", indent(depth), escape(key))?;
    Ok(())
}

fn write_string<W: Write>(out: &mut W, depth: usize, value: &str) -> Result<()> {
    writeln!(out, "{}<string>{}</string>", indent(depth), escape(value))?;
    Ok(())
}

fn write_real<W: Write>(out: &mut W, depth: usize, value: f64) -> Result<()> {
    writeln!(out, "{}<real>{value}</real>", indent(depth))?;
    Ok(())
}

fn write_bool<W: Write>(out: &mut W, depth: usize, value: bool) -> Result<()> {
    let tag = if value { "<true/>" } else { "<false/>" };
    writeln!(out, "{}{tag}", indent(depth))?;
    Ok(())
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}
