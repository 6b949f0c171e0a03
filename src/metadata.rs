//! Document property anonymization (`docProps/*.xml`).
//!
//! Plain string substitution over the text of every property element:
//! values already replaced in the body are swapped for the same
//! identifiers, longest value first, in a single pass so that an
//! identifier just written is never matched again.

use std::collections::HashMap;

use regex::Regex;

use crate::docx::{Document, NodeId};
use crate::mapper::Ledger;

/// Replace ledger values found in metadata parts by their identifiers.
/// With several identifiers for one value the first one issued is used.
/// Returns the number of substitutions.
pub fn anonymize_metadata(document: &mut Document, ledger: &Ledger) -> Result<usize, regex::Error> {
    let mut pairs: Vec<(String, String)> = Vec::new();
    for entry in ledger.entries() {
        if entry.original_text.trim().is_empty() || pairs.iter().any(|(k, _)| *k == entry.original_text) {
            continue;
        }
        pairs.push((entry.original_text.clone(), entry.identifier.clone()));
    }
    substitute(document, pairs)
}

/// Put original values back in place of identifiers.
pub fn restore_metadata(document: &mut Document, ledger: &Ledger) -> Result<usize, regex::Error> {
    let pairs = ledger
        .entries()
        .iter()
        .map(|e| (e.identifier.clone(), e.original_text.clone()))
        .collect();
    substitute(document, pairs)
}

fn substitute(document: &mut Document, mut pairs: Vec<(String, String)>) -> Result<usize, regex::Error> {
    if pairs.is_empty() {
        return Ok(0);
    }
    // Longest first, so the alternation prefers the longest value.
    pairs.sort_by(|a, b| b.0.chars().count().cmp(&a.0.chars().count()));
    let pattern = pairs
        .iter()
        .map(|(from, _)| regex::escape(from))
        .collect::<Vec<_>>()
        .join("|");
    let re = Regex::new(&pattern)?;
    let lookup: HashMap<&str, &str> = pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();

    let mut total = 0;
    for index in document.metadata_parts() {
        let Some(tree) = document.tree(index) else {
            continue;
        };
        let Some(root) = tree.document_element() else {
            continue;
        };

        let mut edits: Vec<(NodeId, String)> = Vec::new();
        for node in tree.descendants(root) {
            let text = tree.own_text(node);
            if text.is_empty() || !re.is_match(&text) {
                continue;
            }
            let mut count = 0;
            let replaced = re.replace_all(&text, |caps: &regex::Captures| {
                count += 1;
                lookup.get(&caps[0]).copied().unwrap_or(&caps[0]).to_string()
            });
            total += count;
            edits.push((node, replaced.into_owned()));
        }

        if edits.is_empty() {
            continue;
        }
        if let Some(tree) = document.tree_mut(index) {
            for (node, text) in edits {
                tree.set_own_text(node, &text);
            }
        }
        if let Some(part) = document.part(index) {
            log::debug!("{}: metadata values substituted", part.name);
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docx::{DocxPackage, MAIN_PART};
    use crate::mapper::LedgerEntry;

    fn ledger(pairs: &[(&str, &str)]) -> Ledger {
        pairs
            .iter()
            .map(|(id, text)| LedgerEntry {
                identifier: id.to_string(),
                original_text: text.to_string(),
                category: "person_name".to_string(),
                occurrences: 1,
            })
            .collect::<Vec<_>>()
            .into()
    }

    fn document(core: &str) -> Document {
        let mut pkg = DocxPackage::default();
        pkg.set(MAIN_PART, b"<w:document><w:body/></w:document>".to_vec());
        pkg.set("docProps/core.xml", core.as_bytes().to_vec());
        Document::from_package(pkg).unwrap()
    }

    fn core_text(doc: &mut Document) -> String {
        let bytes = doc.to_bytes().unwrap();
        DocxPackage::from_bytes(&bytes)
            .unwrap()
            .get_text("docProps/core.xml")
            .unwrap()
    }

    #[test]
    fn test_longest_value_first_and_round_trip() {
        let core = r#"<cp:coreProperties><dc:creator>John Smith</dc:creator><cp:lastModifiedBy>John</cp:lastModifiedBy><dc:title>Contract</dc:title></cp:coreProperties>"#;
        let mut doc = document(core);
        let ledger = ledger(&[("ID-J", "John"), ("ID-JS", "John Smith")]);

        assert_eq!(anonymize_metadata(&mut doc, &ledger).unwrap(), 2);
        assert_eq!(
            core_text(&mut doc),
            r#"<cp:coreProperties><dc:creator>ID-JS</dc:creator><cp:lastModifiedBy>ID-J</cp:lastModifiedBy><dc:title>Contract</dc:title></cp:coreProperties>"#
        );

        assert_eq!(restore_metadata(&mut doc, &ledger).unwrap(), 2);
        assert_eq!(core_text(&mut doc), core);
    }

    #[test]
    fn test_untouched_metadata_is_not_rewritten() {
        let core = r#"<cp:coreProperties ><dc:title>Nothing here</dc:title></cp:coreProperties>"#;
        let mut doc = document(core);
        assert_eq!(anonymize_metadata(&mut doc, &ledger(&[("X", "Secret")])).unwrap(), 0);
        assert!(!doc.part(1).unwrap().is_dirty());
        assert_eq!(core_text(&mut doc), core);
    }
}
