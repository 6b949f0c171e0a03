//! Block extraction.
//!
//! Walks the body, then every header and footer part, then every
//! structured-tag region, and emits one [`Block`] per addressable unit.
//! Blocks are snapshots: they carry normalized text plus an index-based
//! handle back into the document arena. Extraction never mutates.

use serde::Serialize;

use crate::docx::wordml::{self, PieceScope};
use crate::docx::{Document, NodeId, PartIndex, PartKind, XmlTree};
use crate::error::{DocumentError, ReplacementError};
use crate::normalize::{char_len, normalize};

/// Joins the paragraphs of a table cell. Structural only: no span may
/// cover any part of it.
pub const CELL_DELIMITER: &str = " | ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    Paragraph,
    TableCell,
    Header,
    Footer,
    StructuredTag,
}

impl BlockKind {
    fn id_prefix(self) -> &'static str {
        match self {
            BlockKind::Paragraph => "p",
            BlockKind::TableCell => "tc",
            BlockKind::Header => "hdr",
            BlockKind::Footer => "ftr",
            BlockKind::StructuredTag => "sdt",
        }
    }
}

/// One paragraph (or region) inside a block, with its char range in the
/// block text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub node: NodeId,
    pub scope: PieceScope,
    pub start: usize,
    pub end: usize,
}

/// Weak handle from a block snapshot to the live nodes it was read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHandle {
    pub part: PartIndex,
    pub segments: Vec<Segment>,
}

impl BlockHandle {
    /// Resolve a block-level range to the owning segment, returning the
    /// segment index and the range relative to that segment.
    pub fn locate(&self, start: usize, end: usize) -> Result<(usize, usize, usize), ReplacementError> {
        for (idx, seg) in self.segments.iter().enumerate() {
            if start >= seg.start && start < seg.end {
                if end > seg.end {
                    return Err(ReplacementError::CrossesDelimiter { start, end });
                }
                return Ok((idx, start - seg.start, end - seg.start));
            }
        }
        // Either inside a delimiter or past the end.
        let total = self.segments.last().map_or(0, |s| s.end);
        if start < total {
            Err(ReplacementError::CrossesDelimiter { start, end })
        } else {
            Err(ReplacementError::OutOfBounds { start, end })
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Block {
    pub id: String,
    pub kind: BlockKind,
    pub text: String,
    #[serde(skip)]
    pub handle: BlockHandle,
}

/// Extract every block of `document` in document order.
pub fn extract(document: &Document) -> Result<Vec<Block>, DocumentError> {
    let mut extractor = Extractor::default();

    for index in document.content_parts() {
        let part = document
            .part(index)
            .ok_or_else(|| DocumentError::MissingPart(format!("part #{index}")))?;
        let tree = part.tree();
        let root = tree
            .document_element()
            .ok_or_else(|| DocumentError::malformed(&part.name, "no root element"))?;
        let (container, kind) = match part.kind {
            PartKind::Body => {
                let body = tree
                    .child_element(root, wordml::W_BODY)
                    .ok_or_else(|| DocumentError::malformed(&part.name, "no w:body element"))?;
                (body, BlockKind::Paragraph)
            }
            PartKind::Header => (root, BlockKind::Header),
            PartKind::Footer => (root, BlockKind::Footer),
            PartKind::Metadata => continue,
        };
        extractor.walk_container(tree, index, container, kind);
    }

    for index in document.content_parts() {
        if let Some(tree) = document.tree(index) {
            extractor.regions(tree, index);
        }
    }

    log::debug!("extracted {} blocks", extractor.blocks.len());
    Ok(extractor.blocks)
}

#[derive(Default)]
struct Extractor {
    blocks: Vec<Block>,
    counter: usize,
}

impl Extractor {
    fn emit(&mut self, kind: BlockKind, part: PartIndex, pieces: Vec<(NodeId, PieceScope, String)>) {
        let mut text = String::new();
        let mut segments = Vec::new();
        let mut offset = 0;
        for (node, scope, seg_text) in pieces {
            if seg_text.is_empty() {
                continue;
            }
            if !segments.is_empty() {
                text.push_str(CELL_DELIMITER);
                offset += char_len(CELL_DELIMITER);
            }
            let len = char_len(&seg_text);
            segments.push(Segment {
                node,
                scope,
                start: offset,
                end: offset + len,
            });
            text.push_str(&seg_text);
            offset += len;
        }
        if segments.is_empty() {
            return;
        }
        let id = format!("{}-{}", kind.id_prefix(), self.counter);
        self.counter += 1;
        self.blocks.push(Block {
            id,
            kind,
            text,
            handle: BlockHandle { part, segments },
        });
    }

    fn paragraph(&mut self, tree: &XmlTree, part: PartIndex, p: NodeId, kind: BlockKind) {
        let text = normalize(&wordml::raw_text(tree, p, PieceScope::Paragraph));
        self.emit(kind, part, vec![(p, PieceScope::Paragraph, text)]);
    }

    /// Paragraphs and tables directly below `container`, descending through
    /// wrappers like `w:customXml` but not into content controls.
    fn walk_container(&mut self, tree: &XmlTree, part: PartIndex, container: NodeId, kind: BlockKind) {
        for &child in tree.children(container) {
            let Some(name) = tree.name(child) else {
                continue;
            };
            match name {
                wordml::W_P => self.paragraph(tree, part, child, kind),
                wordml::W_TBL => self.table(tree, part, child),
                wordml::W_SDT | wordml::W_SECT_PR => {}
                _ if is_hidden(name) => {}
                _ => self.walk_container(tree, part, child, kind),
            }
        }
    }

    /// Row-major walk over cells. Nested tables follow their parent cell.
    fn table(&mut self, tree: &XmlTree, part: PartIndex, table: NodeId) {
        for tc in cells(tree, table) {
            let mut paragraphs = Vec::new();
            let mut nested = Vec::new();
            cell_content(tree, tc, &mut paragraphs, &mut nested);
            let pieces = paragraphs
                .into_iter()
                .map(|p| {
                    let text = normalize(&wordml::raw_text(tree, p, PieceScope::Paragraph));
                    (p, PieceScope::Paragraph, text)
                })
                .collect();
            self.emit(BlockKind::TableCell, part, pieces);
            for inner in nested {
                self.table(tree, part, inner);
            }
        }
    }

    /// Every outermost `w:sdt` of a part becomes one region block. A
    /// block-level region contributes one segment per paragraph, joined
    /// like table cells; an inline region is a single segment.
    fn regions(&mut self, tree: &XmlTree, part: PartIndex) {
        let Some(root) = tree.document_element() else {
            return;
        };
        for node in tree.descendants(root) {
            if !tree.is_element(node, wordml::W_SDT) || !is_outermost_region(tree, node) {
                continue;
            }
            let mut paragraphs = Vec::new();
            region_paragraphs(tree, node, &mut paragraphs);
            if paragraphs.is_empty() {
                paragraphs.push(node);
            }
            let pieces = paragraphs
                .into_iter()
                .map(|p| {
                    let text = normalize(&wordml::raw_text(tree, p, PieceScope::Region));
                    (p, PieceScope::Region, text)
                })
                .collect();
            self.emit(BlockKind::StructuredTag, part, pieces);
        }
    }
}

fn is_hidden(name: &str) -> bool {
    matches!(name, "w:del" | "w:moveFrom" | "w:txbxContent" | "mc:Fallback")
}

fn is_outermost_region(tree: &XmlTree, node: NodeId) -> bool {
    let mut current = tree.parent(node);
    while let Some(id) = current {
        if let Some(name) = tree.name(id) {
            if name == wordml::W_SDT || is_hidden(name) {
                return false;
            }
        }
        current = tree.parent(id);
    }
    true
}

/// Cells of a table in row-major order, looking through row and cell
/// wrappers.
fn cells(tree: &XmlTree, table: NodeId) -> Vec<NodeId> {
    fn collect(tree: &XmlTree, node: NodeId, out: &mut Vec<NodeId>) {
        for &child in tree.children(node) {
            match tree.name(child) {
                Some(wordml::W_TC) => out.push(child),
                Some(wordml::W_TBL) | Some(wordml::W_SDT) | None => {}
                Some(_) => collect(tree, child, out),
            }
        }
    }
    let mut out = Vec::new();
    collect(tree, table, &mut out);
    out
}

/// Paragraphs inside a region in document order, including those of
/// tables and nested regions.
fn region_paragraphs(tree: &XmlTree, node: NodeId, out: &mut Vec<NodeId>) {
    for &child in tree.children(node) {
        match tree.name(child) {
            Some(wordml::W_P) => out.push(child),
            Some("w:sdtPr") | Some("w:sdtEndPr") | None => {}
            Some(name) if is_hidden(name) => {}
            Some(_) => region_paragraphs(tree, child, out),
        }
    }
}

fn cell_content(tree: &XmlTree, node: NodeId, paragraphs: &mut Vec<NodeId>, nested: &mut Vec<NodeId>) {
    for &child in tree.children(node) {
        match tree.name(child) {
            Some(wordml::W_P) => paragraphs.push(child),
            Some(wordml::W_TBL) => nested.push(child),
            Some(wordml::W_SDT) | Some("w:tcPr") | None => {}
            Some(name) if is_hidden(name) => {}
            Some(_) => cell_content(tree, child, paragraphs, nested),
        }
    }
}
