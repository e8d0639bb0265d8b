// Structure checks against the bundled Apple property-list DTD.
//
// Documents are never resolved against a remote DTD. The public identifier of
// the plist DTD maps to this local copy, and anything else is checked against
// it too with a warning.

use roxmltree::Node;
use std::collections::{BTreeMap, BTreeSet};

const BUNDLED_DTD: &str = include_str!("PropertyList-1.0.dtd");
pub(super) const PLIST_PUBLIC_ID: &str = "-//Apple//DTD PLIST 1.0//EN";
pub(super) const PLIST_SYSTEM_ID: &str = "http://www.apple.com/DTDs/PropertyList-1.0.dtd";

#[derive(Debug, Clone, PartialEq, Eq)]
enum ContentModel {
    Empty,
    Text,
    Children(BTreeSet<String>),
}

#[derive(Debug, Clone)]
pub(super) struct PlistDtd {
    elements: BTreeMap<String, ContentModel>,
}

impl PlistDtd {
    pub fn bundled() -> Self {
        Self::parse(BUNDLED_DTD)
    }

    /// Reads `<!ENTITY %` and `<!ELEMENT` declarations. Attribute lists are
    /// not checked.
    fn parse(text: &str) -> Self {
        let text = strip_comments(text);
        let mut entities: BTreeMap<String, String> = BTreeMap::new();
        let mut elements = BTreeMap::new();

        for decl in text.split("<!").skip(1) {
            let decl = decl.split('>').next().unwrap_or_default().trim();
            if let Some(rest) = decl.strip_prefix("ENTITY") {
                let rest = rest.trim_start().trim_start_matches('%').trim_start();
                let mut parts = rest.splitn(2, char::is_whitespace);
                let (Some(name), Some(value)) = (parts.next(), parts.next()) else {
                    continue;
                };
                entities.insert(name.to_string(), value.trim().trim_matches('"').to_string());
            } else if let Some(rest) = decl.strip_prefix("ELEMENT") {
                let mut parts = rest.trim_start().splitn(2, char::is_whitespace);
                let (Some(name), Some(model)) = (parts.next(), parts.next()) else {
                    continue;
                };
                let mut model = model.trim().to_string();
                for (entity, value) in &entities {
                    model = model.replace(&format!("%{entity};"), value);
                }
                elements.insert(name.to_string(), content_model(&model));
            }
        }
        Self { elements }
    }

    /// Walks the element tree and collects every structural violation.
    pub fn validate(&self, node: Node) -> Vec<String> {
        let mut issues = Vec::new();
        self.check(node, &mut issues);
        issues
    }

    fn check(&self, node: Node, issues: &mut Vec<String>) {
        let name = node.tag_name().name();
        let pos = node.document().text_pos_at(node.range().start);
        let has_text = node
            .children()
            .any(|c| c.is_text() && c.text().is_some_and(|t| !t.trim().is_empty()));
        let mut children = node.children().filter(Node::is_element).peekable();

        match self.elements.get(name) {
            None => issues.push(format!("{pos}: element <{name}> is not declared")),
            Some(ContentModel::Empty) => {
                if has_text || children.peek().is_some() {
                    issues.push(format!("{pos}: <{name}> must be empty"));
                }
            }
            Some(ContentModel::Text) => {
                if children.peek().is_some() {
                    issues.push(format!("{pos}: <{name}> may only contain text"));
                }
            }
            Some(ContentModel::Children(allowed)) => {
                if has_text {
                    issues.push(format!("{pos}: unexpected text inside <{name}>"));
                }
                for child in children.clone() {
                    let child_name = child.tag_name().name();
                    if !allowed.contains(child_name) {
                        issues.push(format!("{pos}: <{child_name}> is not allowed in <{name}>"));
                    }
                }
            }
        }
        for child in children {
            self.check(child, issues);
        }
    }
}

fn content_model(model: &str) -> ContentModel {
    if model == "EMPTY" {
        ContentModel::Empty
    } else if model.contains("#PCDATA") {
        ContentModel::Text
    } else {
        let names = model
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        ContentModel::Children(names)
    }
}

fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("<!--") {
        out.push_str(&rest[..start]);
        match rest[start..].find("-->") {
            Some(end) => rest = &rest[start + end + 3..],
            None => {
                rest = "";
                break;
            }
        }
    }
    out.push_str(rest);
    out
}
