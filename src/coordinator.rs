//! Run orchestration: extract, detect, merge, assign, replace.
//!
//! One coordinator run owns its document and its identifier mapper for
//! the whole pass. Blocks are processed sequentially, and within a block
//! replacements go back to front. Per-span problems end up in
//! [`RunStats::failures`]; only document-level errors abort a run.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::config::AnonymizeConfig;
use crate::detector::{BlockInput, Detector, DetectorRecord, IdentifierDetector};
use crate::docx::Document;
use crate::error::{DocumentError, ReplacementError};
use crate::extract::{extract, Block};
use crate::mapper::{IdentifierMapper, Ledger};
use crate::merge::SpanMerger;
use crate::metadata::{anonymize_metadata, restore_metadata};
use crate::replace::{BlockOutcome, PositionalReplacer};
use crate::span::{Position, Replacement, Span};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedReplacement {
    pub block_id: String,
    pub original_text: String,
    pub category: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockStats {
    pub block_id: String,
    pub planned: usize,
    pub replaced: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunStats {
    pub blocks: usize,
    /// Detector records received.
    pub found: usize,
    /// Records that could not become a valid span.
    pub rejected: usize,
    /// Spans moved onto their text after an offset mismatch.
    pub reanchored: usize,
    /// Spans that lost overlap resolution.
    pub merged_away: usize,
    pub planned: usize,
    pub replaced: usize,
    /// Replacements located by the first-occurrence fallback.
    pub fallbacks: usize,
    pub per_category: BTreeMap<String, usize>,
    pub per_block: Vec<BlockStats>,
    pub failures: Vec<FailedReplacement>,
    pub detector_errors: Vec<String>,
    pub metadata_replacements: usize,
}

impl RunStats {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    fn fail(&mut self, block_id: &str, original_text: &str, category: &str, err: &ReplacementError) {
        self.failures.push(FailedReplacement {
            block_id: block_id.to_string(),
            original_text: original_text.to_string(),
            category: category.to_string(),
            reason: err.to_string(),
        });
    }

    fn absorb(&mut self, replacements: &[Replacement], outcome: BlockOutcome) {
        let mut failed_ids: Vec<&str> = Vec::new();
        for (replacement, err) in &outcome.failures {
            self.fail(&replacement.block_id, &replacement.original_text, &replacement.category, err);
            failed_ids.push(&replacement.identifier);
        }
        for replacement in replacements {
            if let Some(pos) = failed_ids.iter().position(|id| *id == replacement.identifier) {
                failed_ids.swap_remove(pos);
                continue;
            }
            *self.per_category.entry(replacement.category.clone()).or_insert(0) += 1;
        }
        self.planned += replacements.len();
        self.replaced += outcome.applied;
        self.fallbacks += outcome.fallbacks;
        self.per_block.push(BlockStats {
            block_id: outcome.block_id,
            planned: replacements.len(),
            replaced: outcome.applied,
            failed: outcome.failures.len(),
        });
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub ledger: Ledger,
    pub stats: RunStats,
}

#[derive(Debug, Clone, Default)]
pub struct ReplacementCoordinator {
    config: AnonymizeConfig,
    merger: SpanMerger,
    replacer: PositionalReplacer,
}

impl ReplacementCoordinator {
    pub fn new(config: AnonymizeConfig) -> Self {
        let merger = SpanMerger::new(config.merge.clone());
        let replacer = PositionalReplacer::new(config.highlight_color().map(str::to_string));
        Self {
            config,
            merger,
            replacer,
        }
    }

    pub fn config(&self) -> &AnonymizeConfig {
        &self.config
    }

    /// Anonymize `document` in place with the spans reported by `detectors`.
    pub fn run(&self, document: &mut Document, detectors: &[Box<dyn Detector>]) -> Result<RunReport, DocumentError> {
        let blocks = extract(document)?;
        let inputs: Vec<BlockInput> = blocks.iter().map(BlockInput::from).collect();

        let mut stats = RunStats::default();
        let mut records = Vec::new();
        for detector in detectors {
            match detector.detect(&inputs) {
                Ok(found) => {
                    log::debug!("detector {} reported {} spans", detector.name(), found.len());
                    records.extend(found);
                }
                Err(err) => {
                    log::warn!("detector {} failed: {err}", detector.name());
                    stats.detector_errors.push(err.to_string());
                }
            }
        }
        Ok(self.process(document, &blocks, records, stats))
    }

    /// Anonymize `document` with detector output computed elsewhere.
    pub fn run_with_records(
        &self,
        document: &mut Document,
        records: Vec<DetectorRecord>,
    ) -> Result<RunReport, DocumentError> {
        let blocks = extract(document)?;
        Ok(self.process(document, &blocks, records, RunStats::default()))
    }

    fn process(
        &self,
        document: &mut Document,
        blocks: &[Block],
        records: Vec<DetectorRecord>,
        mut stats: RunStats,
    ) -> RunReport {
        stats.blocks = blocks.len();
        let index: HashMap<&str, usize> = blocks.iter().enumerate().map(|(i, b)| (b.id.as_str(), i)).collect();

        let mut per_block: Vec<Vec<Span>> = vec![Vec::new(); blocks.len()];
        for record in records {
            stats.found += 1;
            let span = match record.to_span() {
                Ok(span) => span,
                Err(err) => {
                    log::warn!("{}: malformed detection {:?}: {err}", record.block_id, record.original_text);
                    stats.rejected += 1;
                    stats.fail(&record.block_id, &record.original_text, &record.category, &err);
                    continue;
                }
            };
            match index.get(span.block_id.as_str()) {
                Some(&i) => per_block[i].push(span),
                None => {
                    let err = ReplacementError::UnknownBlock(span.block_id.clone());
                    log::warn!("{err}");
                    stats.rejected += 1;
                    stats.fail(&span.block_id, &span.original_text, &span.category, &err);
                }
            }
        }

        let mut mapper = IdentifierMapper::new(self.config.uniqueness_mode);
        for (block, spans) in blocks.iter().zip(per_block) {
            if spans.is_empty() {
                continue;
            }
            let merged = self.merger.merge(&block.text, spans);
            stats.reanchored += merged.reanchored;
            stats.merged_away += merged.discarded;
            stats.rejected += merged.rejected.len();
            for (span, err) in &merged.rejected {
                stats.fail(&span.block_id, &span.original_text, &span.category, err);
            }

            let replacements: Vec<Replacement> = merged
                .resolved
                .iter()
                .map(|resolved| {
                    let span = &resolved.span;
                    Replacement {
                        block_id: span.block_id.clone(),
                        identifier: mapper.assign(&span.original_text, &span.category),
                        original_text: span.original_text.clone(),
                        position: Position {
                            start: span.start,
                            end: span.end,
                        },
                        category: span.category.clone(),
                    }
                })
                .collect();
            if replacements.is_empty() {
                continue;
            }
            let outcome = self.replacer.apply(document, block, &replacements);
            for (replacement, _) in &outcome.failures {
                mapper.release(&replacement.identifier);
            }
            stats.absorb(&replacements, outcome);
        }

        if self.config.anonymize_metadata {
            match anonymize_metadata(document, mapper.ledger()) {
                Ok(count) => stats.metadata_replacements = count,
                Err(err) => log::warn!("metadata anonymization skipped: {err}"),
            }
        }

        log::info!(
            "{} blocks, {} spans found, {} replaced, {} failed",
            stats.blocks,
            stats.found,
            stats.replaced,
            stats.failed()
        );
        RunReport {
            ledger: mapper.into_ledger(),
            stats,
        }
    }
}

/// Put the original values back in place of every identifier the ledger
/// knows. Identifier-shaped tokens without a ledger entry are counted as
/// failures and left alone.
pub fn restore_document(document: &mut Document, ledger: &Ledger) -> Result<RunStats, DocumentError> {
    let blocks = extract(document)?;
    let inputs: Vec<BlockInput> = blocks.iter().map(BlockInput::from).collect();
    let mut stats = RunStats {
        blocks: blocks.len(),
        ..RunStats::default()
    };
    let records = match IdentifierDetector.detect(&inputs) {
        Ok(records) => records,
        Err(err) => {
            stats.detector_errors.push(err.to_string());
            Vec::new()
        }
    };

    let mut per_block: HashMap<String, Vec<Replacement>> = HashMap::new();
    for record in records {
        stats.found += 1;
        let Some(entry) = ledger.get(&record.original_text) else {
            let err = ReplacementError::UnknownIdentifier(record.original_text.clone());
            log::warn!("{}: {err}", record.block_id);
            stats.fail(&record.block_id, &record.original_text, "", &err);
            continue;
        };
        per_block.entry(record.block_id.clone()).or_default().push(Replacement {
            block_id: record.block_id,
            original_text: record.original_text,
            identifier: entry.original_text.clone(),
            position: record.position,
            category: entry.category.clone(),
        });
    }

    let replacer = PositionalReplacer::default();
    for block in &blocks {
        let Some(replacements) = per_block.remove(&block.id) else {
            continue;
        };
        let outcome = replacer.apply(document, block, &replacements);
        stats.absorb(&replacements, outcome);
    }

    match restore_metadata(document, ledger) {
        Ok(count) => stats.metadata_replacements = count,
        Err(err) => log::warn!("metadata restore skipped: {err}"),
    }
    log::info!("restored {} of {} identifiers", stats.replaced, stats.found);
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docx::{DocxPackage, MAIN_PART};
    use crate::mapper::{is_identifier, UniquenessMode};
    use crate::replace::live_block_text;

    fn document(body: &str) -> Document {
        let mut pkg = DocxPackage::default();
        pkg.set(
            MAIN_PART,
            format!("<w:document><w:body>{body}</w:body></w:document>").into_bytes(),
        );
        Document::from_package(pkg).unwrap()
    }

    fn record(block: &str, text: &str, start: usize, end: usize, category: &str, method: &str, confidence: f64) -> DetectorRecord {
        DetectorRecord {
            block_id: block.to_string(),
            category: category.to_string(),
            original_text: text.to_string(),
            position: Position { start, end },
            confidence,
            method: method.to_string(),
            placeholder: None,
        }
    }

    #[test]
    fn test_bad_records_are_counted_not_fatal() {
        let mut doc = document(r#"<w:p><w:r><w:t>Pay Bob 10 dollars</w:t></w:r></w:p>"#);
        let records = vec![
            record("p-0", "Bob", 4, 7, "person_name", "ner", 0.9),
            record("p-99", "Bob", 4, 7, "person_name", "ner", 0.9),
            record("p-0", "Bob", 4, 7, "person_name", "ouija", 0.9),
            record("p-0", "Alice", 4, 9, "person_name", "ner", 0.9),
            record("p-0", "Bob", 4, 7, "person_name", "ner", 7.0),
        ];
        let report = ReplacementCoordinator::default().run_with_records(&mut doc, records).unwrap();
        let stats = &report.stats;
        assert_eq!(stats.found, 5);
        assert_eq!(stats.replaced, 1);
        assert_eq!(stats.rejected, 4);
        assert_eq!(stats.failed(), 4);
        assert_eq!(stats.per_category["person_name"], 1);
        assert_eq!(stats.per_block, vec![BlockStats { block_id: "p-0".to_string(), planned: 1, replaced: 1, failed: 0 }]);
        assert_eq!(report.ledger.len(), 1);
    }

    #[test]
    fn test_per_value_mode_shares_identifiers() {
        let mut doc = document(
            r#"<w:p><w:r><w:t>Acme sued Acme</w:t></w:r></w:p><w:p><w:r><w:t>Acme again</w:t></w:r></w:p>"#,
        );
        let config = AnonymizeConfig {
            uniqueness_mode: UniquenessMode::PerValue,
            dictionary: vec![crate::config::DictionaryEntry {
                category: "organization".to_string(),
                term: "Acme".to_string(),
            }],
            ..AnonymizeConfig::default()
        };
        let detectors = config.builtin_detectors().unwrap();
        let report = ReplacementCoordinator::new(config).run(&mut doc, &detectors).unwrap();
        assert_eq!(report.stats.replaced, 3);
        assert_eq!(report.ledger.len(), 1);
        let id = &report.ledger.entries()[0].identifier;
        assert_eq!(report.ledger.entries()[0].occurrences, 3);

        let blocks = extract(&doc).unwrap();
        assert_eq!(blocks[0].text, format!("{id} sued {id}"));
        assert_eq!(blocks[1].text, format!("{id} again"));
    }

    #[test]
    fn test_failed_replacement_is_not_counted_in_ledger() {
        // The same value once in a paragraph and once across a cell's
        // paragraph delimiter, where it cannot be written.
        let mut doc = document(
            r#"<w:p><w:r><w:t>Bob | Bob</w:t></w:r></w:p><w:tbl><w:tr><w:tc><w:p><w:r><w:t>Bob</w:t></w:r></w:p><w:p><w:r><w:t>Bob</w:t></w:r></w:p></w:tc></w:tr></w:tbl>"#,
        );
        let config = AnonymizeConfig {
            uniqueness_mode: UniquenessMode::PerValue,
            ..AnonymizeConfig::default()
        };
        let records = vec![
            record("p-0", "Bob | Bob", 0, 9, "person_name", "ner", 0.9),
            record("tc-1", "Bob | Bob", 0, 9, "person_name", "ner", 0.9),
        ];
        let report = ReplacementCoordinator::new(config).run_with_records(&mut doc, records).unwrap();
        assert_eq!(report.stats.replaced, 1);
        assert_eq!(report.stats.failed(), 1);
        assert_eq!(report.ledger.len(), 1);
        assert_eq!(report.ledger.entries()[0].occurrences, 1);
        assert_eq!(report.ledger.per_category()["person_name"], 1);
        assert_eq!(report.stats.per_category["person_name"], 1);
    }

    #[test]
    fn test_restore_round_trip() {
        let body = r#"<w:p><w:r><w:rPr><w:b/></w:rPr><w:t>John</w:t></w:r><w:r><w:t xml:space="preserve"> Smith called 555-1234</w:t></w:r></w:p>"#;
        let mut doc = document(body);
        let records = vec![
            record("p-0", "John Smith", 0, 10, "person_name", "ner", 0.8),
            record("p-0", "555-1234", 18, 26, "phone", "regex", 0.9),
        ];
        let report = ReplacementCoordinator::default().run_with_records(&mut doc, records).unwrap();
        assert_eq!(report.stats.replaced, 2);

        let blocks = extract(&doc).unwrap();
        let words: Vec<&str> = blocks[0].text.split(' ').collect();
        assert!(is_identifier(words[0]) && is_identifier(words[2]));
        assert_eq!(report.ledger.resolve(words[0]), Some("John Smith"));
        assert_eq!(report.ledger.resolve(words[2]), Some("555-1234"));

        let stats = restore_document(&mut doc, &report.ledger).unwrap();
        assert_eq!((stats.found, stats.replaced, stats.failed()), (2, 2, 0));
        let blocks = extract(&doc).unwrap();
        assert_eq!(live_block_text(&doc, &blocks[0]).unwrap(), "John Smith called 555-1234");
    }

    #[test]
    fn test_restore_counts_unknown_identifiers() {
        let mut doc = document(
            r#"<w:p><w:r><w:t>Ref 123e4567-e89b-42d3-a456-426614174000</w:t></w:r></w:p>"#,
        );
        let stats = restore_document(&mut doc, &Ledger::new()).unwrap();
        assert_eq!(stats.found, 1);
        assert_eq!(stats.failed(), 1);
        assert!(stats.failures[0].reason.contains("no ledger entry"));
    }
}
