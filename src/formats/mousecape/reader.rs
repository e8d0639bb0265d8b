use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use log::{debug, warn};
use roxmltree::{Document, Node, ParsingOptions};
use std::fs;
use std::io::Read;
use std::path::Path;

use super::CapeTheme;
use super::dtd::{PLIST_PUBLIC_ID, PLIST_SYSTEM_ID, PlistDtd};
use crate::error::{CursorError, Result, format_err, utf8_text};
use crate::formats::Detection;

const SNIFF_LEN: u64 = 512;
const CURSORS_KEY: &str = "Cursors";
const REPRESENTATIONS_KEY: &str = "Representations";

/// A decoded property-list value.
#[derive(Debug, Clone, PartialEq)]
pub enum PlistValue {
    String(String),
    Integer(i64),
    Real(f64),
    Bool(bool),
    Data(Vec<u8>),
    Date(String),
    Array(Vec<PlistValue>),
    Dict(Vec<(String, PlistValue)>),
}

impl PlistValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PlistValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PlistValue::Real(n) => Some(*n),
            PlistValue::Integer(n) => Some(*n as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PlistValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

/// Receives a theme in document order.
///
/// Representations arrive as raw PNG bytes; everything else in a cursor
/// dictionary arrives through `cursor_property`.
pub trait CapeContentHandler {
    fn theme_property(&mut self, _key: &str, _value: &PlistValue) -> Result<()> {
        Ok(())
    }

    fn begin_cursor(&mut self, _identifier: &str) -> Result<()> {
        Ok(())
    }

    fn cursor_property(
        &mut self,
        _identifier: &str,
        _key: &str,
        _value: &PlistValue,
    ) -> Result<()> {
        Ok(())
    }

    fn representation(&mut self, identifier: &str, index: usize, png: &[u8]) -> Result<()>;

    fn end_cursor(&mut self, _identifier: &str) -> Result<()> {
        Ok(())
    }
}

pub struct CapeReader;

impl CapeReader {
    /// Looks for a property-list prologue in the first few hundred bytes.
    pub fn detect<R: Read>(reader: R) -> Detection {
        let mut head = Vec::new();
        if let Err(e) = reader.take(SNIFF_LEN).read_to_end(&mut head) {
            return Detection::ParseError(e.into());
        }
        let text = String::from_utf8_lossy(&head);
        let text = text.trim_start_matches('\u{feff}').trim_start();
        if !text.starts_with('<') {
            return Detection::NotThisFormat;
        }
        if text.contains("<plist") || text.contains(PLIST_PUBLIC_ID) {
            Detection::ThisFormat
        } else {
            Detection::NotThisFormat
        }
    }

    pub fn parse<R, H>(mut reader: R, handler: &mut H) -> Result<()>
    where
        R: Read,
        H: CapeContentHandler + ?Sized,
    {
        let mut bytes = Vec::new();
        reader
            .read_to_end(&mut bytes)
            .map_err(|e| CursorError::from_read(e, "property list"))?;
        Self::parse_str(&utf8_text(bytes, "property list")?, handler)
    }

    /// Parses a whole document and drives `handler`.
    ///
    /// Malformed XML is fatal. Structural problems against the plist DTD are
    /// logged and the readable parts are still delivered.
    pub fn parse_str<H: CapeContentHandler + ?Sized>(text: &str, handler: &mut H) -> Result<()> {
        let options = ParsingOptions {
            allow_dtd: true,
            ..ParsingOptions::default()
        };
        let doc = Document::parse_with_options(text, options)?;
        check_doctype(text);

        let dtd = PlistDtd::bundled();
        let root = doc.root_element();
        for issue in dtd.validate(root) {
            warn!("plist validation: {issue}");
        }

        let theme = if root.has_tag_name("dict") {
            root
        } else {
            if !root.has_tag_name("plist") {
                warn!("root element is <{}>, expected <plist>", root.tag_name().name());
            }
            match root.children().find(|n| n.has_tag_name("dict")) {
                Some(dict) => dict,
                None => format_err!("property list has no top-level dictionary"),
            }
        };

        for (key, value) in dict_entries(theme) {
            if key == CURSORS_KEY && value.has_tag_name("dict") {
                read_cursors(value, handler)?;
            } else if let Some(value) = parse_value(value)? {
                handler.theme_property(key, &value)?;
            }
        }
        Ok(())
    }

    pub fn read<R: Read>(reader: R) -> Result<CapeTheme> {
        let mut theme = CapeTheme::default();
        Self::parse(reader, &mut theme)?;
        debug!(
            "read mousecape theme {:?} with {} cursors",
            theme.metadata.name,
            theme.cursors.len()
        );
        Ok(theme)
    }

    pub fn read_file<P: AsRef<Path>>(path: P) -> Result<CapeTheme> {
        let text = utf8_text(fs::read(path)?, "property list")?;
        let mut theme = CapeTheme::default();
        Self::parse_str(&text, &mut theme)?;
        Ok(theme)
    }
}

fn check_doctype(text: &str) {
    if let Some(start) = text.find("<!DOCTYPE") {
        let decl = text[start..].split('>').next().unwrap_or_default();
        if !decl.contains(PLIST_PUBLIC_ID) && !decl.contains(PLIST_SYSTEM_ID) {
            warn!("unknown document type, checking against the bundled plist DTD");
        }
    }
}

fn read_cursors<H: CapeContentHandler + ?Sized>(cursors: Node, handler: &mut H) -> Result<()> {
    for (identifier, cursor) in dict_entries(cursors) {
        if !cursor.has_tag_name("dict") {
            warn!("cursor {identifier} is not a dictionary, skipping");
            continue;
        }
        handler.begin_cursor(identifier)?;
        for (key, value) in dict_entries(cursor) {
            if key == REPRESENTATIONS_KEY {
                let blobs = value.children().filter(|n| n.has_tag_name("data"));
                for (index, blob) in blobs.enumerate() {
                    let png = decode_data(blob)?;
                    handler.representation(identifier, index, &png)?;
                }
            } else if let Some(value) = parse_value(value)? {
                handler.cursor_property(identifier, key, &value)?;
            }
        }
        handler.end_cursor(identifier)?;
    }
    Ok(())
}

/// Pairs each `<key>` with the element that follows it. Unpaired elements are
/// skipped with a warning.
fn dict_entries<'a, 'input>(dict: Node<'a, 'input>) -> Vec<(&'a str, Node<'a, 'input>)> {
    let mut entries = Vec::new();
    let mut pending: Option<&'a str> = None;
    for child in dict.children().filter(Node::is_element) {
        match (pending.take(), child.has_tag_name("key")) {
            (None, true) => pending = Some(child.text().unwrap_or_default()),
            (Some(key), false) => entries.push((key, child)),
            (Some(key), true) => {
                warn!("key {key:?} has no value");
                pending = Some(child.text().unwrap_or_default());
            }
            (None, false) => warn!("<{}> without a key", child.tag_name().name()),
        }
    }
    if let Some(key) = pending {
        warn!("key {key:?} has no value");
    }
    entries
}

fn decode_data(node: Node) -> Result<Vec<u8>> {
    let compact: String = node
        .text()
        .unwrap_or_default()
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    STANDARD
        .decode(compact)
        .map_err(|e| CursorError::format(format!("bad base64 in <data>: {e}")))
}

/// Decodes one value element; elements outside the plist vocabulary yield
/// `None`.
fn parse_value(node: Node) -> Result<Option<PlistValue>> {
    let text = node.text().unwrap_or_default().trim();
    let value = match node.tag_name().name() {
        "string" => PlistValue::String(node.text().unwrap_or_default().to_string()),
        "integer" => match text.parse() {
            Ok(n) => PlistValue::Integer(n),
            Err(_) => {
                warn!("unparsable integer {text:?}");
                PlistValue::String(text.to_string())
            }
        },
        "real" => match text.parse() {
            Ok(n) => PlistValue::Real(n),
            Err(_) => {
                warn!("unparsable real {text:?}");
                PlistValue::String(text.to_string())
            }
        },
        "true" => PlistValue::Bool(true),
        "false" => PlistValue::Bool(false),
        "data" => PlistValue::Data(decode_data(node)?),
        "date" => PlistValue::Date(text.to_string()),
        "array" => {
            let mut items = Vec::new();
            for child in node.children().filter(Node::is_element) {
                items.extend(parse_value(child)?);
            }
            PlistValue::Array(items)
        }
        "dict" => {
            let mut entries = Vec::new();
            for (key, child) in dict_entries(node) {
                if let Some(value) = parse_value(child)? {
                    entries.push((key.to_string(), value));
                }
            }
            PlistValue::Dict(entries)
        }
        _ => return Ok(None),
    };
    Ok(Some(value))
}
