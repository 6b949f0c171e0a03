//! Positional replacement inside formatted runs.
//!
//! Replacements of one block are applied back to front, so an edit never
//! shifts the offsets of the edits still pending. Each edit re-reads the
//! live runs under the block's segment, re-validates the snapshot offset
//! with [`locate_live_match`], and then rewrites only the `w:t` nodes the
//! match covers.

use std::cmp::Reverse;

use crate::docx::wordml::{self, TextPiece};
use crate::docx::{Document, XmlTree};
use crate::error::ReplacementError;
use crate::extract::{Block, CELL_DELIMITER};
use crate::mapper::{identifier_regex, is_identifier};
use crate::normalize::{byte_to_char, char_len, NormalizedText};
use crate::span::Replacement;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStrategy {
    /// The live text still holds the expected text at the snapshot offset.
    Exact,
    /// Found by a first-occurrence search after the offset went stale.
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveMatch {
    pub start: usize,
    pub end: usize,
    pub strategy: MatchStrategy,
}

/// Re-validate a snapshot range against the live normalized text.
///
/// If `live[start..end]` no longer equals `expected`, the first occurrence
/// of `expected` is used instead, skipping occurrences that overlap an
/// already written identifier. Fails with `LiveTextNotFound` when the text
/// is gone.
pub fn locate_live_match(
    live: &NormalizedText,
    start: usize,
    end: usize,
    expected: &str,
) -> Result<LiveMatch, ReplacementError> {
    if expected.is_empty() {
        return Err(ReplacementError::InvalidRange { start, end });
    }
    if live.slice(start, end) == Some(expected) {
        return Ok(LiveMatch {
            start,
            end,
            strategy: MatchStrategy::Exact,
        });
    }

    let text = live.as_str();
    let guarded: Vec<(usize, usize)> = if is_identifier(expected) {
        Vec::new()
    } else {
        identifier_regex()
            .find_iter(text)
            .map(|m| (byte_to_char(text, m.start()), byte_to_char(text, m.end())))
            .collect()
    };
    let len = char_len(expected);
    live.find_all(expected)
        .into_iter()
        .map(|s| (s, s + len))
        .find(|&(s, e)| !guarded.iter().any(|&(gs, ge)| s < ge && gs < e))
        .map(|(start, end)| LiveMatch {
            start,
            end,
            strategy: MatchStrategy::Fallback,
        })
        .ok_or_else(|| ReplacementError::LiveTextNotFound(expected.to_string()))
}

/// What happened to the replacements of one block.
#[derive(Debug, Clone, Default)]
pub struct BlockOutcome {
    pub block_id: String,
    pub applied: usize,
    pub fallbacks: usize,
    pub failures: Vec<(Replacement, ReplacementError)>,
}

#[derive(Debug, Clone, Default)]
pub struct PositionalReplacer {
    highlight: Option<String>,
}

impl PositionalReplacer {
    /// `highlight` is a Word highlight color applied to the runs that end up
    /// holding a replacement, or `None` for plain substitution.
    pub fn new(highlight: Option<String>) -> Self {
        Self { highlight }
    }

    /// Apply `replacements` to `block`, back to front. Failures are
    /// collected; they never stop the remaining replacements.
    pub fn apply(&self, document: &mut Document, block: &Block, replacements: &[Replacement]) -> BlockOutcome {
        let mut ordered: Vec<&Replacement> = replacements.iter().collect();
        ordered.sort_by_key(|r| Reverse((r.position.start, r.position.end)));

        let mut outcome = BlockOutcome {
            block_id: block.id.clone(),
            ..BlockOutcome::default()
        };
        for replacement in ordered {
            match self.apply_one(document, block, replacement) {
                Ok(MatchStrategy::Exact) => outcome.applied += 1,
                Ok(MatchStrategy::Fallback) => {
                    outcome.applied += 1;
                    outcome.fallbacks += 1;
                }
                Err(err) => {
                    log::warn!(
                        "{}: replacement of {:?} at [{}, {}) failed: {err}",
                        block.id,
                        replacement.original_text,
                        replacement.position.start,
                        replacement.position.end
                    );
                    outcome.failures.push((replacement.clone(), err));
                }
            }
        }
        outcome
    }

    fn apply_one(
        &self,
        document: &mut Document,
        block: &Block,
        replacement: &Replacement,
    ) -> Result<MatchStrategy, ReplacementError> {
        if block.id != replacement.block_id {
            return Err(ReplacementError::UnknownBlock(replacement.block_id.clone()));
        }
        let (index, local_start, local_end) =
            block.handle.locate(replacement.position.start, replacement.position.end)?;
        let segment = &block.handle.segments[index];
        let part = block.handle.part;

        let tree = document.tree(part).ok_or(ReplacementError::StaleHandle)?;
        if !tree.contains(segment.node) {
            return Err(ReplacementError::StaleHandle);
        }
        let pieces = wordml::collect_pieces(tree, segment.node, segment.scope);
        let raw: String = pieces.iter().map(|p| p.text.as_str()).collect();
        let live = NormalizedText::new(&raw);

        let found = locate_live_match(&live, local_start, local_end, &replacement.original_text)?;
        if found.strategy == MatchStrategy::Fallback {
            log::warn!(
                "{}: {:?} moved from {} to {}, using first occurrence",
                block.id,
                replacement.original_text,
                local_start,
                found.start
            );
        }
        let (raw_start, raw_end) = live
            .raw_range(found.start, found.end)
            .ok_or_else(|| ReplacementError::LiveTextNotFound(replacement.original_text.clone()))?;
        let edit = plan_edit(&pieces, raw_start, raw_end)
            .ok_or_else(|| ReplacementError::LiveTextNotFound(replacement.original_text.clone()))?;

        let tree = document.tree_mut(part).ok_or(ReplacementError::StaleHandle)?;
        self.write(tree, &pieces, &edit, &replacement.identifier);
        Ok(found.strategy)
    }

    fn write(&self, tree: &mut XmlTree, pieces: &[TextPiece], edit: &Edit, identifier: &str) {
        let first = &pieces[edit.first];
        let highlight = self.highlight.as_deref();

        if edit.first == edit.last {
            match highlight {
                Some(color) => {
                    wordml::split_run_around(
                        tree,
                        first.run,
                        first.text_node,
                        &edit.prefix,
                        identifier,
                        &edit.suffix,
                        Some(color),
                    );
                }
                None => {
                    let text = format!("{}{}{}", edit.prefix, identifier, edit.suffix);
                    wordml::set_piece_text(tree, first.text_node, &text);
                }
            }
            return;
        }

        // Straddling: middle pieces are emptied but kept, the last keeps
        // its suffix, the first takes the identifier in its own formatting.
        // Tabs and breaks stay untouched.
        for piece in pieces[edit.first + 1..edit.last].iter().filter(|p| !p.is_separator()) {
            wordml::set_piece_text(tree, piece.text_node, "");
        }
        wordml::set_piece_text(tree, pieces[edit.last].text_node, &edit.suffix);
        match highlight {
            Some(color) => {
                wordml::split_run_around(tree, first.run, first.text_node, &edit.prefix, identifier, "", Some(color));
            }
            None => {
                let text = format!("{}{}", edit.prefix, identifier);
                wordml::set_piece_text(tree, first.text_node, &text);
            }
        }
    }
}

/// The editable pieces a raw char range covers, and what survives around
/// it. Separator pieces inside the range are left in place.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Edit {
    first: usize,
    last: usize,
    prefix: String,
    suffix: String,
}

fn plan_edit(pieces: &[TextPiece], raw_start: usize, raw_end: usize) -> Option<Edit> {
    let mut offset = 0;
    let mut covered: Option<(usize, usize, usize, usize)> = None;
    for (i, piece) in pieces.iter().enumerate() {
        let start = offset;
        offset += char_len(&piece.text);
        if piece.is_separator() || start >= raw_end || offset <= raw_start {
            continue;
        }
        covered = match covered {
            None => Some((i, start, i, start)),
            Some((first, first_start, _, _)) => Some((first, first_start, i, start)),
        };
    }
    if raw_end > offset {
        return None;
    }
    let (first, first_start, last, last_start) = covered?;
    Some(Edit {
        first,
        last,
        prefix: pieces[first].text.chars().take(raw_start.saturating_sub(first_start)).collect(),
        suffix: pieces[last].text.chars().skip(raw_end - last_start).collect(),
    })
}

/// Current normalized text of a block, read from the live document with
/// the same segment layout extraction uses.
pub fn live_block_text(document: &Document, block: &Block) -> Result<String, ReplacementError> {
    let tree = document.tree(block.handle.part).ok_or(ReplacementError::StaleHandle)?;
    let mut parts = Vec::with_capacity(block.handle.segments.len());
    for segment in &block.handle.segments {
        if !tree.contains(segment.node) {
            return Err(ReplacementError::StaleHandle);
        }
        let raw = wordml::raw_text(tree, segment.node, segment.scope);
        parts.push(NormalizedText::new(&raw).into_text());
    }
    Ok(parts.join(CELL_DELIMITER))
}
