//! Run configuration.
//!
//! Everything a run needs is carried in one [`AnonymizeConfig`] value that
//! is passed down explicitly; there is no process-wide detector state.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::detector::{Detector, DictionaryDetector, PatternDetector};
use crate::error::DetectorError;
use crate::mapper::UniquenessMode;
use crate::merge::MergeConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternRule {
    pub category: String,
    pub regex: String,
    #[serde(default = "default_pattern_confidence")]
    pub confidence: f64,
}

fn default_pattern_confidence() -> f64 {
    0.9
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DictionaryEntry {
    pub category: String,
    pub term: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnonymizeConfig {
    pub uniqueness_mode: UniquenessMode,
    pub highlight: bool,
    /// Word highlight color name (`yellow`, `green`, `cyan`, ...).
    pub highlight_color: String,
    pub anonymize_metadata: bool,
    pub merge: MergeConfig,
    pub patterns: Vec<PatternRule>,
    pub dictionary: Vec<DictionaryEntry>,
}

impl Default for AnonymizeConfig {
    fn default() -> Self {
        Self {
            uniqueness_mode: UniquenessMode::default(),
            highlight: false,
            highlight_color: "yellow".to_string(),
            anonymize_metadata: true,
            merge: MergeConfig::default(),
            patterns: Vec::new(),
            dictionary: Vec::new(),
        }
    }
}

impl AnonymizeConfig {
    /// Load a JSON config file. Missing fields take their defaults.
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let config: AnonymizeConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))?;
        Ok(config)
    }

    /// Highlight color to apply, or `None` when highlighting is off.
    pub fn highlight_color(&self) -> Option<&str> {
        self.highlight.then_some(self.highlight_color.as_str())
    }

    /// Detectors described by this config: the dictionary (if any terms)
    /// followed by the pattern rules (if any).
    pub fn builtin_detectors(&self) -> Result<Vec<Box<dyn Detector>>, DetectorError> {
        let mut detectors: Vec<Box<dyn Detector>> = Vec::new();
        if !self.dictionary.is_empty() {
            detectors.push(Box::new(DictionaryDetector::new(&self.dictionary)));
        }
        if !self.patterns.is_empty() {
            detectors.push(Box::new(PatternDetector::new(&self.patterns)?));
        }
        Ok(detectors)
    }
}

/// Parse `category=term` lines. Blank lines and `#` comments are skipped.
pub fn parse_dictionary(content: &str) -> Vec<DictionaryEntry> {
    content
        .lines()
        .filter(|line| !line.trim().is_empty() && !line.trim_start().starts_with('#'))
        .filter_map(|line| {
            let (category, term) = line.split_once('=')?;
            let (category, term) = (category.trim(), term.trim());
            if category.is_empty() || term.is_empty() {
                return None;
            }
            Some(DictionaryEntry {
                category: category.to_string(),
                term: term.to_string(),
            })
        })
        .collect()
}

pub fn load_dictionary(path: &Path) -> Result<Vec<DictionaryEntry>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read dictionary: {}", path.display()))?;
    Ok(parse_dictionary(&content))
}

/// Parse a `CATEGORY=REGEX` command-line pattern.
pub fn parse_pattern_arg(arg: &str) -> Result<PatternRule> {
    let (category, regex) = arg
        .split_once('=')
        .with_context(|| format!("Pattern must be CATEGORY=REGEX, got {arg:?}"))?;
    anyhow::ensure!(!category.trim().is_empty(), "Pattern {arg:?} has an empty category");
    Ok(PatternRule {
        category: category.trim().to_string(),
        regex: regex.to_string(),
        confidence: default_pattern_confidence(),
    })
}
