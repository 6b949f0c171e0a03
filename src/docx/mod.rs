//! Word document model: the zip package plus the parsed XML parts the
//! anonymizer reads and mutates.
//!
//! Parts are ordered the way blocks are extracted: the main document
//! first, then header and footer parts in section order, then metadata
//! parts. Only parts that were handed out mutably are re-serialized on
//! save; every other zip entry is written back byte for byte.

pub mod package;
pub mod wordml;
pub mod xml;

use std::collections::HashMap;
use std::path::Path;

use regex::Regex;
use serde::Serialize;

pub use package::DocxPackage;
pub use xml::{NodeId, XmlTree};

use crate::error::DocumentError;

pub const MAIN_PART: &str = "word/document.xml";
pub const MAIN_RELS: &str = "word/_rels/document.xml.rels";
pub const METADATA_PARTS: &[&str] = &["docProps/core.xml", "docProps/app.xml", "docProps/custom.xml"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PartKind {
    Body,
    Header,
    Footer,
    Metadata,
}

#[derive(Debug, Clone)]
pub struct XmlPart {
    pub name: String,
    pub kind: PartKind,
    tree: XmlTree,
    dirty: bool,
}

impl XmlPart {
    pub fn tree(&self) -> &XmlTree {
        &self.tree
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}

/// Index of a part inside its [`Document`].
pub type PartIndex = usize;

/// A weak handle to one node of one part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeRef {
    pub part: PartIndex,
    pub node: NodeId,
}

#[derive(Debug, Clone)]
pub struct Document {
    package: DocxPackage,
    parts: Vec<XmlPart>,
}

impl Document {
    pub fn open(path: &Path) -> Result<Self, DocumentError> {
        Self::from_package(DocxPackage::open(path)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DocumentError> {
        Self::from_package(DocxPackage::from_bytes(bytes)?)
    }

    /// Parse every part the anonymizer works on. Any parse failure is
    /// fatal; there is no partially loaded document.
    pub fn from_package(package: DocxPackage) -> Result<Self, DocumentError> {
        let main_xml = package
            .get_text(MAIN_PART)
            .ok_or_else(|| DocumentError::MissingPart(MAIN_PART.to_string()))?;
        let main_tree = XmlTree::parse(&main_xml, MAIN_PART)?;

        let mut parts = vec![XmlPart {
            name: MAIN_PART.to_string(),
            kind: PartKind::Body,
            tree: main_tree,
            dirty: false,
        }];

        for (name, kind) in header_footer_parts(&package, &parts[0].tree) {
            let Some(xml) = package.get_text(&name) else {
                log::warn!("{name} is referenced by a section but missing from the package");
                continue;
            };
            let tree = XmlTree::parse(&xml, &name)?;
            parts.push(XmlPart {
                name,
                kind,
                tree,
                dirty: false,
            });
        }

        for &name in METADATA_PARTS {
            if let Some(xml) = package.get_text(name) {
                let tree = XmlTree::parse(&xml, name)?;
                parts.push(XmlPart {
                    name: name.to_string(),
                    kind: PartKind::Metadata,
                    tree,
                    dirty: false,
                });
            }
        }

        Ok(Self { package, parts })
    }

    /// Write modified parts back into the package and save it.
    pub fn save(&mut self, path: &Path) -> Result<(), DocumentError> {
        self.flush()?;
        self.package.save(path)
    }

    pub fn to_bytes(&mut self) -> Result<Vec<u8>, DocumentError> {
        self.flush()?;
        self.package.to_bytes()
    }

    fn flush(&mut self) -> Result<(), DocumentError> {
        for part in self.parts.iter_mut().filter(|p| p.dirty) {
            let bytes = part.tree.to_bytes().map_err(|source| DocumentError::Serialize {
                part: part.name.clone(),
                source,
            })?;
            self.package.set(&part.name, bytes);
            part.dirty = false;
        }
        Ok(())
    }

    pub fn package(&self) -> &DocxPackage {
        &self.package
    }

    pub fn parts(&self) -> &[XmlPart] {
        &self.parts
    }

    pub fn part(&self, index: PartIndex) -> Option<&XmlPart> {
        self.parts.get(index)
    }

    pub fn tree(&self, index: PartIndex) -> Option<&XmlTree> {
        self.parts.get(index).map(|p| &p.tree)
    }

    /// Mutable access to a part's tree. Marks the part for re-serialization.
    pub fn tree_mut(&mut self, index: PartIndex) -> Option<&mut XmlTree> {
        self.parts.get_mut(index).map(|p| {
            p.dirty = true;
            &mut p.tree
        })
    }

    /// Indices of body, header and footer parts in extraction order.
    pub fn content_parts(&self) -> Vec<PartIndex> {
        self.parts
            .iter()
            .enumerate()
            .filter(|(_, p)| p.kind != PartKind::Metadata)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn metadata_parts(&self) -> Vec<PartIndex> {
        self.parts
            .iter()
            .enumerate()
            .filter(|(_, p)| p.kind == PartKind::Metadata)
            .map(|(i, _)| i)
            .collect()
    }
}

/// Parse rels XML into rId -> (type, target).
fn parse_rels(xml: &str) -> HashMap<String, (String, String)> {
    // Attribute order inside Relationship varies between producers.
    let re = Regex::new(r#"<Relationship\s+([^>]+?)/?>"#).expect("invalid regex");
    let id_re = Regex::new(r#"\bId="([^"]+)""#).expect("invalid regex");
    let type_re = Regex::new(r#"\bType="([^"]+)""#).expect("invalid regex");
    let target_re = Regex::new(r#"\bTarget="([^"]+)""#).expect("invalid regex");

    let mut map = HashMap::new();
    for caps in re.captures_iter(xml) {
        let attrs = &caps[1];
        let id = id_re.captures(attrs).map(|c| c[1].to_string());
        let type_str = type_re.captures(attrs).map(|c| c[1].to_string());
        let target = target_re
            .captures(attrs)
            .map(|c| c[1].replace("&amp;", "&"));
        if let (Some(id), Some(type_str), Some(target)) = (id, type_str, target) {
            map.insert(id, (type_str, target));
        }
    }
    map
}

/// Resolve a relationship target relative to `word/`.
fn resolve_target(target: &str) -> String {
    match target.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None => format!("word/{}", target.trim_start_matches("./")),
    }
}

/// Header and footer part names in section order: for every `w:sectPr`,
/// its header references then its footer references. Parts present in the
/// package but not referenced by any section follow in name order.
fn header_footer_parts(package: &DocxPackage, main: &XmlTree) -> Vec<(String, PartKind)> {
    let rels = package
        .get_text(MAIN_RELS)
        .map(|xml| parse_rels(&xml))
        .unwrap_or_default();

    fn push(name: String, kind: PartKind, ordered: &mut Vec<(String, PartKind)>) {
        if !ordered.iter().any(|(n, _)| *n == name) {
            ordered.push((name, kind));
        }
    }

    let mut ordered: Vec<(String, PartKind)> = Vec::new();

    if let Some(root) = main.document_element() {
        for sect in main
            .descendants(root)
            .into_iter()
            .filter(|&n| main.is_element(n, wordml::W_SECT_PR))
        {
            for (element, kind) in [
                (wordml::W_HEADER_REFERENCE, PartKind::Header),
                (wordml::W_FOOTER_REFERENCE, PartKind::Footer),
            ] {
                for reference in main.child_elements(sect, element) {
                    let Some(rid) = main.attr(reference, "r:id") else {
                        continue;
                    };
                    match rels.get(rid) {
                        Some((_, target)) => push(resolve_target(target), kind, &mut ordered),
                        None => log::warn!("section references unknown relationship {rid}"),
                    }
                }
            }
        }
    }

    let loose_re = Regex::new(r"^word/(header|footer)\d*\.xml$").expect("invalid regex");
    let mut loose: Vec<(String, PartKind)> = package
        .entry_names()
        .filter_map(|name| {
            let caps = loose_re.captures(name)?;
            let kind = if &caps[1] == "header" {
                PartKind::Header
            } else {
                PartKind::Footer
            };
            Some((name.to_string(), kind))
        })
        .collect();
    loose.sort_by(|a, b| a.0.cmp(&b.0));
    for (name, kind) in loose {
        push(name, kind, &mut ordered);
    }

    ordered
}
