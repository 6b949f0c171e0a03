//! Opaque identifiers and the reversible ledger.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

lazy_static::lazy_static! {
    // Lowercase hyphenated UUID, the only shape `assign` produces.
    static ref IDENTIFIER_RE: Regex = Regex::new(
        r"\b[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}\b"
    )
    .expect("invalid regex");
}

/// Regex matching identifiers issued by [`IdentifierMapper`].
pub fn identifier_regex() -> &'static Regex {
    &IDENTIFIER_RE
}

/// Whether `text` is exactly one issued-identifier-shaped token.
pub fn is_identifier(text: &str) -> bool {
    text.len() == 36 && IDENTIFIER_RE.find(text).is_some_and(|m| m.len() == text.len())
}

/// Whether identical values share an identifier.
///
/// * `PerOccurrence`: every occurrence gets a fresh identifier. The ledger
///   maps each identifier to exactly one original value; nothing links two
///   identifiers of the same value.
/// * `PerValue`: equal `(original_text, category)` pairs get the same
///   identifier within one run. The ledger then also guarantees the
///   inverse mapping, and `occurrences` counts how often it was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UniquenessMode {
    #[default]
    PerOccurrence,
    PerValue,
}

impl fmt::Display for UniquenessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UniquenessMode::PerOccurrence => f.write_str("per_occurrence"),
            UniquenessMode::PerValue => f.write_str("per_value"),
        }
    }
}

impl FromStr for UniquenessMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "per_occurrence" | "occurrence" | "random" => Ok(UniquenessMode::PerOccurrence),
            "per_value" | "value" | "deterministic" => Ok(UniquenessMode::PerValue),
            other => Err(format!(
                "unknown uniqueness mode {other:?} (expected per_occurrence or per_value)"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub identifier: String,
    pub original_text: String,
    pub category: String,
    #[serde(default = "one")]
    pub occurrences: usize,
}

fn one() -> usize {
    1
}

/// Append-only `identifier -> original` table. Serializes as a plain list
/// of entries in issue order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<LedgerEntry>", into = "Vec<LedgerEntry>")]
pub struct Ledger {
    entries: Vec<LedgerEntry>,
    index: HashMap<String, usize>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry. Returns `false` (and changes nothing) if the
    /// identifier is already present.
    pub fn insert(&mut self, entry: LedgerEntry) -> bool {
        if self.index.contains_key(&entry.identifier) {
            return false;
        }
        self.index.insert(entry.identifier.clone(), self.entries.len());
        self.entries.push(entry);
        true
    }

    pub fn resolve(&self, identifier: &str) -> Option<&str> {
        self.get(identifier).map(|e| e.original_text.as_str())
    }

    pub fn get(&self, identifier: &str) -> Option<&LedgerEntry> {
        self.index.get(identifier).map(|&i| &self.entries[i])
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.index.contains_key(identifier)
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Occurrence totals per category.
    pub fn per_category(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for entry in &self.entries {
            *counts.entry(entry.category.clone()).or_insert(0) += entry.occurrences;
        }
        counts
    }

    fn bump(&mut self, identifier: &str) {
        if let Some(&i) = self.index.get(identifier) {
            self.entries[i].occurrences += 1;
        }
    }

    /// Take back one occurrence. The entry itself stays; an entry at zero
    /// occurrences was issued but never written.
    fn retract(&mut self, identifier: &str) {
        if let Some(&i) = self.index.get(identifier) {
            let entry = &mut self.entries[i];
            entry.occurrences = entry.occurrences.saturating_sub(1);
        }
    }
}

impl From<Vec<LedgerEntry>> for Ledger {
    fn from(entries: Vec<LedgerEntry>) -> Self {
        let mut ledger = Ledger::new();
        for entry in entries {
            if !ledger.insert(entry) {
                log::warn!("duplicate ledger identifier ignored");
            }
        }
        ledger
    }
}

impl From<Ledger> for Vec<LedgerEntry> {
    fn from(ledger: Ledger) -> Self {
        ledger.entries
    }
}

/// Issues identifiers and records every issue in its ledger before
/// returning. One mapper per document run.
#[derive(Debug, Default)]
pub struct IdentifierMapper {
    mode: UniquenessMode,
    ledger: Ledger,
    by_value: HashMap<(String, String), String>,
}

impl IdentifierMapper {
    pub fn new(mode: UniquenessMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    pub fn mode(&self) -> UniquenessMode {
        self.mode
    }

    pub fn assign(&mut self, original_text: &str, category: &str) -> String {
        if self.mode == UniquenessMode::PerValue {
            let key = (original_text.to_string(), category.to_string());
            if let Some(identifier) = self.by_value.get(&key) {
                let identifier = identifier.clone();
                self.ledger.bump(&identifier);
                return identifier;
            }
            let identifier = self.issue(original_text, category);
            self.by_value.insert(key, identifier.clone());
            return identifier;
        }
        self.issue(original_text, category)
    }

    /// Undo the occurrence counted by [`assign`](Self::assign) for a
    /// replacement that could not be written.
    pub fn release(&mut self, identifier: &str) {
        self.ledger.retract(identifier);
    }

    pub fn resolve(&self, identifier: &str) -> Option<&str> {
        self.ledger.resolve(identifier)
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn into_ledger(self) -> Ledger {
        self.ledger
    }

    fn issue(&mut self, original_text: &str, category: &str) -> String {
        loop {
            let identifier = Uuid::new_v4().hyphenated().to_string();
            let fresh = self.ledger.insert(LedgerEntry {
                identifier: identifier.clone(),
                original_text: original_text.to_string(),
                category: category.to_string(),
                occurrences: 1,
            });
            if fresh {
                return identifier;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_per_occurrence_issues_fresh_identifiers() {
        let mut mapper = IdentifierMapper::new(UniquenessMode::PerOccurrence);
        let a = mapper.assign("John Smith", "person_name");
        let b = mapper.assign("John Smith", "person_name");
        assert_ne!(a, b);
        assert!(is_identifier(&a) && is_identifier(&b));
        assert_eq!(mapper.resolve(&a), Some("John Smith"));
        assert_eq!(mapper.resolve(&b), Some("John Smith"));
        assert_eq!(mapper.ledger().len(), 2);
    }

    #[test]
    fn test_per_value_reuses_identifier_per_category() {
        let mut mapper = IdentifierMapper::new(UniquenessMode::PerValue);
        let a = mapper.assign("Acme", "organization");
        let b = mapper.assign("Acme", "organization");
        let c = mapper.assign("Acme", "product");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(mapper.ledger().get(&a).unwrap().occurrences, 2);
        assert_eq!(mapper.ledger().per_category()["organization"], 2);
    }

    #[test]
    fn test_release_takes_back_one_occurrence() {
        let mut mapper = IdentifierMapper::new(UniquenessMode::PerValue);
        let a = mapper.assign("Bob", "person_name");
        mapper.assign("Bob", "person_name");
        mapper.release(&a);
        assert_eq!(mapper.ledger().get(&a).unwrap().occurrences, 1);
        mapper.release(&a);
        mapper.release(&a);
        assert_eq!(mapper.ledger().get(&a).unwrap().occurrences, 0);
        assert_eq!(mapper.resolve(&a), Some("Bob"));
        assert_eq!(mapper.ledger().per_category()["person_name"], 0);

        mapper.assign("Bob", "person_name");
        assert_eq!(mapper.ledger().get(&a).unwrap().occurrences, 1);
    }

    #[test]
    fn test_ledger_is_append_only() {
        let mut ledger = Ledger::new();
        let entry = LedgerEntry {
            identifier: "x".to_string(),
            original_text: "first".to_string(),
            category: "c".to_string(),
            occurrences: 1,
        };
        assert!(ledger.insert(entry.clone()));
        assert!(!ledger.insert(LedgerEntry {
            original_text: "second".to_string(),
            ..entry
        }));
        assert_eq!(ledger.resolve("x"), Some("first"));
        assert_eq!(ledger.resolve("y"), None);
    }

    #[test]
    fn test_ledger_json_rebuilds_index() {
        let mut mapper = IdentifierMapper::new(UniquenessMode::PerOccurrence);
        let id = mapper.assign("555-1234", "phone");
        let json = serde_json::to_string(mapper.ledger()).unwrap();
        assert!(json.starts_with('['));
        let back: Ledger = serde_json::from_str(&json).unwrap();
        assert_eq!(back.resolve(&id), Some("555-1234"));
    }

    #[test]
    fn test_identifier_shape() {
        assert!(is_identifier("123e4567-e89b-42d3-a456-426614174000"));
        assert!(!is_identifier("123e4567-e89b-42d3-a456-42661417400"));
        assert!(!is_identifier("x123e4567-e89b-42d3-a456-426614174000"));
        assert_eq!("per-value".parse::<UniquenessMode>(), Ok(UniquenessMode::PerValue));
        assert!("sometimes".parse::<UniquenessMode>().is_err());
    }
}
