//! WordprocessingML vocabulary and run-level editing primitives.

use super::xml::{NodeId, XmlTree};

pub const W_BODY: &str = "w:body";
pub const W_P: &str = "w:p";
pub const W_R: &str = "w:r";
pub const W_T: &str = "w:t";
pub const W_TAB: &str = "w:tab";
pub const W_BR: &str = "w:br";
pub const W_CR: &str = "w:cr";
pub const W_RPR: &str = "w:rPr";
pub const W_HIGHLIGHT: &str = "w:highlight";
pub const W_TBL: &str = "w:tbl";
pub const W_TR: &str = "w:tr";
pub const W_TC: &str = "w:tc";
pub const W_SDT: &str = "w:sdt";
pub const W_SDT_CONTENT: &str = "w:sdtContent";
pub const W_SECT_PR: &str = "w:sectPr";
pub const W_HEADER_REFERENCE: &str = "w:headerReference";
pub const W_FOOTER_REFERENCE: &str = "w:footerReference";

/// Subtrees whose text is never addressable: deleted or moved-away
/// revisions, text boxes, and the fallback copy of alternate content.
const HIDDEN_CONTAINERS: &[&str] = &["w:del", "w:moveFrom", "w:txbxContent", "mc:Fallback"];

/// `w:rPr` children that must come after `w:highlight` (CT_RPr order).
const RPR_AFTER_HIGHLIGHT: &[&str] = &[
    "w:u",
    "w:effect",
    "w:bdr",
    "w:shd",
    "w:fitText",
    "w:vertAlign",
    "w:rtl",
    "w:cs",
    "w:em",
    "w:lang",
    "w:eastAsianLayout",
    "w:specVanish",
    "w:oMath",
    "w:rPrChange",
];

/// How text pieces are collected below a segment node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PieceScope {
    /// A body/table/header/footer paragraph: content controls are skipped,
    /// they are extracted as their own regions.
    Paragraph,
    /// A structured-tag region: everything inside counts.
    Region,
}

/// One `w:t` node, or a run-level tab/break, together with the run that
/// carries its formatting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextPiece {
    pub text_node: NodeId,
    pub run: NodeId,
    pub text: String,
    /// `false` for tabs and breaks: they count as whitespace in the text
    /// but are never rewritten.
    pub editable: bool,
}

impl TextPiece {
    pub fn is_separator(&self) -> bool {
        !self.editable
    }
}

/// Whitespace a run-level separator element stands for.
fn separator_text(name: &str) -> Option<&'static str> {
    match name {
        W_TAB => Some("\t"),
        W_BR | W_CR => Some("\n"),
        _ => None,
    }
}

/// Collect the visible text pieces below `container`, in document order.
pub fn collect_pieces(tree: &XmlTree, container: NodeId, scope: PieceScope) -> Vec<TextPiece> {
    let mut pieces = Vec::new();
    let mut stack: Vec<NodeId> = tree.children(container).iter().rev().copied().collect();
    while let Some(id) = stack.pop() {
        let Some(name) = tree.name(id) else {
            continue;
        };
        if HIDDEN_CONTAINERS.contains(&name) {
            continue;
        }
        if scope == PieceScope::Paragraph && name == W_SDT {
            continue;
        }
        if name == W_T {
            if let Some(run) = tree.ancestor(id, W_R) {
                pieces.push(TextPiece {
                    text_node: id,
                    run,
                    text: tree.own_text(id),
                    editable: true,
                });
            }
            continue;
        }
        if let Some(whitespace) = separator_text(name) {
            // Only direct run children; `w:tab` also names tab stops in `w:pPr`.
            if let Some(run) = tree.parent(id).filter(|&p| tree.is_element(p, W_R)) {
                pieces.push(TextPiece {
                    text_node: id,
                    run,
                    text: whitespace.to_string(),
                    editable: false,
                });
            }
            continue;
        }
        stack.extend(tree.children(id).iter().rev().copied());
    }
    pieces
}

/// Raw (not normalized) visible text below `container`.
pub fn raw_text(tree: &XmlTree, container: NodeId, scope: PieceScope) -> String {
    collect_pieces(tree, container, scope)
        .into_iter()
        .map(|p| p.text)
        .collect()
}

/// Set the text of a `w:t`, keeping `xml:space="preserve"` in step with
/// leading or trailing whitespace.
pub fn set_piece_text(tree: &mut XmlTree, text_node: NodeId, text: &str) {
    tree.set_own_text(text_node, text);
    let needs_preserve = text.starts_with(char::is_whitespace) || text.ends_with(char::is_whitespace);
    if needs_preserve {
        tree.set_attr(text_node, "xml:space", "preserve");
    }
}

/// Give a run a highlight marker, creating `w:rPr` if needed.
pub fn highlight_run(tree: &mut XmlTree, run: NodeId, color: &str) {
    let rpr = match tree.child_element(run, W_RPR) {
        Some(rpr) => rpr,
        None => {
            let rpr = tree.new_element(W_RPR, &[]);
            tree.insert_child(run, 0, rpr);
            rpr
        }
    };

    let existing: Vec<NodeId> = tree.child_elements(rpr, W_HIGHLIGHT).collect();
    for node in existing {
        tree.detach(node);
    }

    let highlight = tree.new_element(W_HIGHLIGHT, &[("w:val", color)]);
    let position = tree
        .children(rpr)
        .iter()
        .position(|&c| tree.name(c).is_some_and(|n| RPR_AFTER_HIGHLIGHT.contains(&n)))
        .unwrap_or(tree.children(rpr).len());
    tree.insert_child(rpr, position, highlight);
}

/// Split `run` around its text node `text_node` so the identifier sits in a
/// run of its own:
///
/// ```text
/// <r>[before..] t(prefix)</r> <r>t(identifier)</r> <r>t(suffix) [after..]</r>
/// ```
///
/// All three runs carry copies of the original `w:rPr`; only the identifier
/// run gets the highlight. Empty prefix/suffix pieces are dropped, the
/// original run itself is kept even if it ends up empty. Returns the
/// identifier run.
pub fn split_run_around(
    tree: &mut XmlTree,
    run: NodeId,
    text_node: NodeId,
    prefix: &str,
    identifier: &str,
    suffix: &str,
    highlight: Option<&str>,
) -> NodeId {
    let rpr = tree.child_element(run, W_RPR);
    let run_attrs: Vec<(String, String)> = tree.attrs(run).to_vec();

    // Children of the run that follow the text node move to the suffix run.
    let children = tree.children(run).to_vec();
    let after: Vec<NodeId> = match children.iter().position(|&c| c == text_node) {
        Some(idx) => children[idx + 1..].to_vec(),
        None => Vec::new(),
    };

    if prefix.is_empty() {
        tree.detach(text_node);
    } else {
        set_piece_text(tree, text_node, prefix);
    }

    let identifier_run = new_run_like(tree, &run_attrs, rpr);
    let id_text = tree.append_element(identifier_run, W_T, &[]);
    set_piece_text(tree, id_text, identifier);
    if let Some(color) = highlight {
        highlight_run(tree, identifier_run, color);
    }
    tree.insert_after(run, identifier_run);

    if !suffix.is_empty() || !after.is_empty() {
        let suffix_run = new_run_like(tree, &run_attrs, rpr);
        if !suffix.is_empty() {
            let suffix_text = tree.append_element(suffix_run, W_T, &[]);
            set_piece_text(tree, suffix_text, suffix);
        }
        for node in after {
            tree.append(suffix_run, node);
        }
        tree.insert_after(identifier_run, suffix_run);
    }

    identifier_run
}

fn new_run_like(tree: &mut XmlTree, attrs: &[(String, String)], rpr: Option<NodeId>) -> NodeId {
    let borrowed: Vec<(&str, &str)> = attrs.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
    let run = tree.new_element(W_R, &borrowed);
    if let Some(rpr) = rpr {
        let copy = tree.deep_clone(rpr);
        tree.append(run, copy);
    }
    run
}
