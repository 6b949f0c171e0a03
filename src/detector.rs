//! Detector contract and the built-in detectors.
//!
//! Detectors see only `{block_id, content}` pairs and answer with
//! [`DetectorRecord`]s, the same shape external detection services emit.
//! Records are turned into [`Span`]s by the coordinator; a record that
//! cannot be turned into a valid span is counted and skipped.

use std::path::Path;

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::{DictionaryEntry, PatternRule};
use crate::error::{DetectorError, ReplacementError};
use crate::extract::Block;
use crate::mapper::identifier_regex;
use crate::normalize::{byte_to_char, char_len, normalize};
use crate::span::{DetectionMethod, Position, Span};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInput {
    pub block_id: String,
    pub content: String,
}

impl From<&Block> for BlockInput {
    fn from(block: &Block) -> Self {
        Self {
            block_id: block.id.clone(),
            content: block.text.clone(),
        }
    }
}

/// One detection as reported by a detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorRecord {
    pub block_id: String,
    pub category: String,
    pub original_text: String,
    pub position: Position,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    pub method: String,
    /// Identifier suggested by the detector. Always overwritten.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
}

fn default_confidence() -> f64 {
    1.0
}

impl DetectorRecord {
    /// Convert to a span. Offsets are checked later against the block.
    pub fn to_span(&self) -> Result<Span, ReplacementError> {
        let source_method: DetectionMethod = self.method.parse()?;
        Ok(Span {
            block_id: self.block_id.clone(),
            start: self.position.start,
            end: self.position.end,
            original_text: self.original_text.clone(),
            category: self.category.clone(),
            confidence: self.confidence,
            source_method,
        })
    }
}

pub trait Detector: Send + Sync {
    fn name(&self) -> &str;

    fn detect(&self, blocks: &[BlockInput]) -> Result<Vec<DetectorRecord>, DetectorError>;
}

fn record(
    block: &BlockInput,
    byte_start: usize,
    byte_end: usize,
    category: &str,
    confidence: f64,
    method: DetectionMethod,
) -> DetectorRecord {
    let start = byte_to_char(&block.content, byte_start);
    let original_text = block.content[byte_start..byte_end].to_string();
    DetectorRecord {
        block_id: block.block_id.clone(),
        category: category.to_string(),
        position: Position {
            start,
            end: start + char_len(&original_text),
        },
        original_text,
        confidence,
        method: method.as_str().to_string(),
        placeholder: None,
    }
}

/// Exact term matches. Longer terms are matched first and shorter terms
/// never match inside an already claimed range.
#[derive(Debug, Clone)]
pub struct DictionaryDetector {
    terms: Vec<DictionaryEntry>,
}

impl DictionaryDetector {
    pub fn new(entries: &[DictionaryEntry]) -> Self {
        let mut terms: Vec<DictionaryEntry> = entries
            .iter()
            .map(|e| DictionaryEntry {
                category: e.category.clone(),
                term: normalize(&e.term),
            })
            .filter(|e| !e.term.is_empty())
            .collect();
        terms.sort_by(|a, b| b.term.chars().count().cmp(&a.term.chars().count()));
        terms.dedup_by(|a, b| a.term == b.term);
        Self { terms }
    }
}

/// A match must not start or end in the middle of a word.
fn on_word_boundaries(text: &str, start: usize, end: usize) -> bool {
    let before = text[..start].chars().next_back();
    let after = text[end..].chars().next();
    let first = text[start..end].chars().next();
    let last = text[start..end].chars().next_back();
    let clean_start = !(first.is_some_and(char::is_alphanumeric) && before.is_some_and(char::is_alphanumeric));
    let clean_end = !(last.is_some_and(char::is_alphanumeric) && after.is_some_and(char::is_alphanumeric));
    clean_start && clean_end
}

impl Detector for DictionaryDetector {
    fn name(&self) -> &str {
        "dictionary"
    }

    fn detect(&self, blocks: &[BlockInput]) -> Result<Vec<DetectorRecord>, DetectorError> {
        let mut out = Vec::new();
        for block in blocks {
            let mut claimed: Vec<(usize, usize)> = Vec::new();
            for entry in &self.terms {
                for (byte_start, matched) in block.content.match_indices(entry.term.as_str()) {
                    let byte_end = byte_start + matched.len();
                    if !on_word_boundaries(&block.content, byte_start, byte_end) {
                        continue;
                    }
                    if claimed.iter().any(|&(s, e)| byte_start < e && s < byte_end) {
                        continue;
                    }
                    claimed.push((byte_start, byte_end));
                    out.push(record(
                        block,
                        byte_start,
                        byte_end,
                        &entry.category,
                        1.0,
                        DetectionMethod::ExactDictionary,
                    ));
                }
            }
        }
        Ok(out)
    }
}

/// Regex rules, one category each.
#[derive(Debug, Clone)]
pub struct PatternDetector {
    rules: Vec<(PatternRule, Regex)>,
}

impl PatternDetector {
    pub fn new(rules: &[PatternRule]) -> Result<Self, DetectorError> {
        let rules = rules
            .iter()
            .map(|rule| {
                let re = Regex::new(&rule.regex).map_err(|source| DetectorError::InvalidPattern {
                    category: rule.category.clone(),
                    source,
                })?;
                Ok((rule.clone(), re))
            })
            .collect::<Result<Vec<_>, DetectorError>>()?;
        Ok(Self { rules })
    }
}

impl Detector for PatternDetector {
    fn name(&self) -> &str {
        "pattern"
    }

    fn detect(&self, blocks: &[BlockInput]) -> Result<Vec<DetectorRecord>, DetectorError> {
        let mut out = Vec::new();
        for block in blocks {
            for (rule, re) in &self.rules {
                for m in re.find_iter(&block.content).filter(|m| !m.is_empty()) {
                    out.push(record(
                        block,
                        m.start(),
                        m.end(),
                        &rule.category,
                        rule.confidence.clamp(0.0, 1.0),
                        DetectionMethod::StructuredPattern,
                    ));
                }
            }
        }
        Ok(out)
    }
}

/// Finds identifiers issued by a previous run. Drives the restore path.
#[derive(Debug, Clone, Default)]
pub struct IdentifierDetector;

impl Detector for IdentifierDetector {
    fn name(&self) -> &str {
        "identifier"
    }

    fn detect(&self, blocks: &[BlockInput]) -> Result<Vec<DetectorRecord>, DetectorError> {
        let mut out = Vec::new();
        for block in blocks {
            for m in identifier_regex().find_iter(&block.content) {
                out.push(record(
                    block,
                    m.start(),
                    m.end(),
                    "identifier",
                    1.0,
                    DetectionMethod::StructuredPattern,
                ));
            }
        }
        Ok(out)
    }
}

/// Detections computed elsewhere and loaded from disk.
#[derive(Debug, Clone)]
pub struct RecordedDetections {
    name: String,
    records: Vec<DetectorRecord>,
}

impl RecordedDetections {
    pub fn new(name: impl Into<String>, records: Vec<DetectorRecord>) -> Self {
        Self {
            name: name.into(),
            records,
        }
    }

    /// Read a JSON array of records.
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read detections: {}", path.display()))?;
        let records: Vec<DetectorRecord> = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse detections: {}", path.display()))?;
        Ok(Self::new(path.display().to_string(), records))
    }
}

impl Detector for RecordedDetections {
    fn name(&self) -> &str {
        &self.name
    }

    fn detect(&self, _blocks: &[BlockInput]) -> Result<Vec<DetectorRecord>, DetectorError> {
        Ok(self.records.clone())
    }
}
