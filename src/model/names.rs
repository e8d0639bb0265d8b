// Cursor name tables: Xcursor alias names and Mousecape identifiers

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CursorNames {
    /// Extra file names an Xcursor should also be reachable under.
    #[serde(default = "default_aliases")]
    pub aliases: BTreeMap<String, Vec<String>>,

    /// Cursor name -> reverse-DNS identifier used as a Mousecape cursor key.
    #[serde(default = "default_mousecape_ids")]
    pub mousecape_ids: BTreeMap<String, String>,
}

impl Default for CursorNames {
    fn default() -> Self {
        Self {
            aliases: default_aliases(),
            mousecape_ids: default_mousecape_ids(),
        }
    }
}

impl CursorNames {
    /// An empty table: no aliases, names are used verbatim as identifiers.
    pub fn empty() -> Self {
        Self {
            aliases: BTreeMap::new(),
            mousecape_ids: BTreeMap::new(),
        }
    }

    pub fn aliases_for(&self, name: &str) -> &[String] {
        self.aliases.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The Mousecape key for `name`. Names that already look like reverse-DNS
    /// identifiers, or that have no table entry, are used unchanged.
    pub fn mousecape_id<'a>(&'a self, name: &'a str) -> &'a str {
        self.mousecape_ids
            .get(name)
            .map(String::as_str)
            .unwrap_or(name)
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let content = self
            .to_toml_string()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        fs::write(path, content)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}

fn table(entries: &[(&str, &[&str])]) -> BTreeMap<String, Vec<String>> {
    entries
        .iter()
        .map(|(name, links)| {
            (
                name.to_string(),
                links.iter().map(|l| l.to_string()).collect(),
            )
        })
        .collect()
}

fn default_aliases() -> BTreeMap<String, Vec<String>> {
    table(&[
        ("left_ptr", &["arrow", "default", "top_left_arrow"]),
        ("pointer", &["hand1", "hand2", "pointing_hand"]),
        ("text", &["xterm", "ibeam"]),
        ("wait", &["watch"]),
        ("progress", &["left_ptr_watch", "half-busy"]),
        ("crosshair", &["cross", "tcross"]),
        ("move", &["fleur", "all-scroll", "size_all"]),
        ("not-allowed", &["crossed_circle", "forbidden", "no-drop"]),
        ("help", &["question_arrow", "whats_this", "left_ptr_help"]),
        ("grabbing", &["closedhand", "dnd-move"]),
        ("size_hor", &["sb_h_double_arrow", "ew-resize", "col-resize"]),
        ("size_ver", &["sb_v_double_arrow", "ns-resize", "row-resize"]),
        ("size_fdiag", &["fd_double_arrow", "nesw-resize"]),
        ("size_bdiag", &["bd_double_arrow", "nwse-resize"]),
    ])
}

fn default_mousecape_ids() -> BTreeMap<String, String> {
    [
        ("left_ptr", "com.apple.coregraphics.Arrow"),
        ("text", "com.apple.coregraphics.IBeam"),
        ("wait", "com.apple.coregraphics.Wait"),
        ("move", "com.apple.coregraphics.Move"),
        ("copy", "com.apple.coregraphics.Copy"),
        ("alias", "com.apple.coregraphics.Alias"),
        ("context-menu", "com.apple.coregraphics.ArrowCtx"),
        ("pointer", "com.apple.cursor.13"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        let names = CursorNames::default();
        assert!(names.aliases_for("left_ptr").contains(&"default".to_string()));
        assert!(names.aliases_for("no_such_cursor").is_empty());
        assert_eq!(names.mousecape_id("text"), "com.apple.coregraphics.IBeam");
        assert_eq!(
            names.mousecape_id("com.example.Custom"),
            "com.example.Custom"
        );
    }

    #[test]
    fn test_toml_defaults_fill_missing_tables() {
        let names = CursorNames::from_toml_str("[aliases]\nleft_ptr = [\"arrow\"]\n").unwrap();
        assert_eq!(names.aliases_for("left_ptr"), ["arrow".to_string()]);
        assert_eq!(names.mousecape_ids, default_mousecape_ids());
    }

    #[test]
    fn test_toml_round_trip() {
        let names = CursorNames::default();
        let text = names.to_toml_string().unwrap();
        assert_eq!(CursorNames::from_toml_str(&text).unwrap(), names);
    }
}
