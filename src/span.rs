//! Detected spans, merged spans and replacements.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ReplacementError;
use crate::normalize::slice_chars;

/// How a span was found. The variant order is the merge priority: an exact
/// dictionary hit beats a structured pattern, which beats a statistical
/// model, which beats a heuristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    ExactDictionary,
    StructuredPattern,
    StatisticalModel,
    Heuristic,
}

impl DetectionMethod {
    pub const ALL: [DetectionMethod; 4] = [
        DetectionMethod::ExactDictionary,
        DetectionMethod::StructuredPattern,
        DetectionMethod::StatisticalModel,
        DetectionMethod::Heuristic,
    ];

    /// Merge priority weight, higher wins.
    pub fn priority(self) -> u8 {
        match self {
            DetectionMethod::ExactDictionary => 4,
            DetectionMethod::StructuredPattern => 3,
            DetectionMethod::StatisticalModel => 2,
            DetectionMethod::Heuristic => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DetectionMethod::ExactDictionary => "exact_dictionary",
            DetectionMethod::StructuredPattern => "structured_pattern",
            DetectionMethod::StatisticalModel => "statistical_model",
            DetectionMethod::Heuristic => "heuristic",
        }
    }
}

impl fmt::Display for DetectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DetectionMethod {
    type Err = ReplacementError;

    /// Accepts the canonical names plus the tags detectors commonly emit.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_lowercase().replace(['-', ' '], "_");
        match key.as_str() {
            "exact_dictionary" | "dictionary" | "exact" | "gazetteer" => {
                Ok(DetectionMethod::ExactDictionary)
            }
            "structured_pattern" | "pattern" | "regex" | "regexp" => {
                Ok(DetectionMethod::StructuredPattern)
            }
            "statistical_model" | "statistical" | "model" | "ner" | "spacy_ner" | "spacy"
            | "natasha" => Ok(DetectionMethod::StatisticalModel),
            "heuristic" | "context" | "morph" | "morphology" | "pymorphy" => {
                Ok(DetectionMethod::Heuristic)
            }
            _ => Err(ReplacementError::UnknownMethod(s.to_string())),
        }
    }
}

/// A detector's claim that `[start, end)` of a block is sensitive.
/// Offsets are char offsets into the normalized block text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    pub block_id: String,
    pub start: usize,
    pub end: usize,
    pub original_text: String,
    pub category: String,
    pub confidence: f64,
    pub source_method: DetectionMethod,
}

impl Span {
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    pub fn overlap_len(&self, other: &Span) -> usize {
        let lo = self.start.max(other.start);
        let hi = self.end.min(other.end);
        hi.saturating_sub(lo)
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.overlap_len(other) > 0
    }

    /// Overlap length relative to the shorter span, in `[0, 1]`.
    pub fn overlap_ratio(&self, other: &Span) -> f64 {
        let shorter = self.len().min(other.len());
        if shorter == 0 {
            return 0.0;
        }
        self.overlap_len(other) as f64 / shorter as f64
    }

    /// Check the span invariants against the block text it claims to
    /// address: non-empty range, confidence in `[0, 1]`, and
    /// `text[start..end] == original_text`.
    pub fn validate(&self, block_text: &str) -> Result<(), ReplacementError> {
        if self.start >= self.end {
            return Err(ReplacementError::InvalidRange {
                start: self.start,
                end: self.end,
            });
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(ReplacementError::InvalidConfidence(self.confidence));
        }
        let found = slice_chars(block_text, self.start, self.end).ok_or(
            ReplacementError::OutOfBounds {
                start: self.start,
                end: self.end,
            },
        )?;
        if found != self.original_text {
            return Err(ReplacementError::TextMismatch {
                expected: self.original_text.clone(),
                found: found.to_string(),
            });
        }
        Ok(())
    }
}

/// The single winner of a group of overlapping spans.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedSpan {
    #[serde(flatten)]
    pub span: Span,
    pub winning_method: DetectionMethod,
    /// Number of detections collapsed into this one (1 when unopposed).
    pub group_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub start: usize,
    pub end: usize,
}

/// A resolved span paired with the identifier that will replace it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Replacement {
    pub block_id: String,
    pub original_text: String,
    pub identifier: String,
    pub position: Position,
    pub category: String,
}
