//! Anonymize DOCX documents: replace detected sensitive text with opaque
//! identifiers, keep formatting intact, and write a reversible ledger.
//!
//! Usage:
//!   docx-anon extract input.docx [-o blocks.json]
//!   docx-anon anonymize input.docx -o output.docx \
//!     [--detections spans.json] [--config config.json] [--dictionary terms.txt] \
//!     [--pattern 'phone=\d{3}-\d{4}'] [--mode per-value] [--highlight] \
//!     [--ledger-xlsx ledger.xlsx] [--ledger-json ledger.json] [--ledger-csv ledger.csv]
//!   docx-anon batch --input-dir in/ --output-dir out/ [--threads 4] [...]
//!   docx-anon restore anonymized.docx --ledger ledger.json -o restored.docx

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use docx_anonymizer::config::{load_dictionary, parse_pattern_arg};
use docx_anonymizer::detector::{Detector, RecordedDetections};
use docx_anonymizer::report::{read_ledger, write_ledger_csv, write_ledger_json, write_ledger_xlsx};
use docx_anonymizer::{
    extract, restore_document, AnonymizeConfig, BlockKind, Document, ReplacementCoordinator, RunReport,
    UniquenessMode,
};
use rayon::prelude::*;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Parser)]
#[command(name = "docx-anon")]
#[command(about = "Anonymize sensitive text in DOCX documents with a reversible ledger")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Dump the addressable text blocks as JSON ({block_id, kind, content})
    Extract {
        /// Input DOCX file
        input: PathBuf,

        /// Output JSON file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Anonymize one document
    Anonymize {
        /// Input DOCX file
        input: PathBuf,

        /// Output DOCX file
        #[arg(short, long)]
        output: PathBuf,

        /// Detector output files (JSON array of span records)
        #[arg(long)]
        detections: Vec<PathBuf>,

        #[command(flatten)]
        options: RunOptions,

        /// Write the ledger as an Excel workbook
        #[arg(long)]
        ledger_xlsx: Option<PathBuf>,

        /// Write the ledger as JSON
        #[arg(long)]
        ledger_json: Option<PathBuf>,

        /// Write the ledger as CSV
        #[arg(long)]
        ledger_csv: Option<PathBuf>,
    },

    /// Anonymize every .docx in a directory, one ledger per document
    Batch {
        /// Directory with input DOCX files; `<name>.detections.json` next to
        /// a document is used as its detector output
        #[arg(long)]
        input_dir: PathBuf,

        /// Directory for anonymized documents and their ledgers
        #[arg(long)]
        output_dir: PathBuf,

        #[command(flatten)]
        options: RunOptions,

        /// Also write `<name>.ledger.xlsx` for each document
        #[arg(long)]
        xlsx: bool,

        /// Number of worker threads (defaults to the number of CPUs)
        #[arg(long)]
        threads: Option<usize>,
    },

    /// Put original values back using a ledger
    Restore {
        /// Anonymized DOCX file
        input: PathBuf,

        /// Ledger file (.json or .csv)
        #[arg(long)]
        ledger: PathBuf,

        /// Output DOCX file
        #[arg(short, long)]
        output: PathBuf,
    },
}

#[derive(Args, Clone)]
struct RunOptions {
    /// JSON configuration file
    #[arg(long, env = "DOCX_ANON_CONFIG")]
    config: Option<PathBuf>,

    /// Dictionary file (one "category=term" per line)
    #[arg(long, env = "DOCX_ANON_DICTIONARY")]
    dictionary: Option<PathBuf>,

    /// Extra pattern rule, CATEGORY=REGEX (repeatable)
    #[arg(long = "pattern")]
    patterns: Vec<String>,

    /// Identifier policy: per-occurrence or per-value
    #[arg(long)]
    mode: Option<UniquenessMode>,

    /// Highlight replaced text
    #[arg(long)]
    highlight: bool,

    /// Highlight color (Word color name)
    #[arg(long)]
    highlight_color: Option<String>,

    /// Leave document properties untouched
    #[arg(long)]
    no_metadata: bool,
}

impl RunOptions {
    /// Config file first, then command-line overrides.
    fn build_config(&self) -> Result<AnonymizeConfig> {
        let mut config = match &self.config {
            Some(path) => AnonymizeConfig::from_path(path)?,
            None => AnonymizeConfig::default(),
        };
        if let Some(path) = &self.dictionary {
            let entries = load_dictionary(path)?;
            println!("Loaded {} dictionary terms", entries.len());
            config.dictionary.extend(entries);
        }
        for arg in &self.patterns {
            config.patterns.push(parse_pattern_arg(arg)?);
        }
        if let Some(mode) = self.mode {
            config.uniqueness_mode = mode;
        }
        if self.highlight {
            config.highlight = true;
        }
        if let Some(color) = &self.highlight_color {
            config.highlight_color = color.clone();
        }
        if self.no_metadata {
            config.anonymize_metadata = false;
        }
        Ok(config)
    }
}

#[derive(Serialize)]
struct ExtractedBlock<'a> {
    block_id: &'a str,
    kind: BlockKind,
    content: &'a str,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Extract { input, output } => extract_blocks(&input, output.as_deref()),
        Commands::Anonymize {
            input,
            output,
            detections,
            options,
            ledger_xlsx,
            ledger_json,
            ledger_csv,
        } => {
            let config = options.build_config()?;
            println!("Opening DOCX: {}", input.display());
            let report = anonymize_file(&input, &output, &config, &detections)?;
            print_summary(&report);
            if let Some(path) = ledger_xlsx {
                write_ledger_xlsx(&path, &report.ledger, &report.stats, &input.display().to_string())?;
                println!("Ledger workbook: {}", path.display());
            }
            if let Some(path) = ledger_json {
                write_ledger_json(&path, &report.ledger)?;
                println!("Ledger JSON: {}", path.display());
            }
            if let Some(path) = ledger_csv {
                write_ledger_csv(&path, &report.ledger)?;
                println!("Ledger CSV: {}", path.display());
            }
            println!("\nSaved to: {}", output.display());
            Ok(())
        }
        Commands::Batch {
            input_dir,
            output_dir,
            options,
            xlsx,
            threads,
        } => batch(&input_dir, &output_dir, &options.build_config()?, xlsx, threads),
        Commands::Restore { input, ledger, output } => {
            let ledger = read_ledger(&ledger)?;
            println!("Loaded {} ledger entries", ledger.len());
            let mut document =
                Document::open(&input).with_context(|| format!("Failed to open {}", input.display()))?;
            let stats = restore_document(&mut document, &ledger)?;
            document
                .save(&output)
                .with_context(|| format!("Failed to write {}", output.display()))?;
            println!(
                "Restored {} of {} identifiers ({} failed, {} in metadata)",
                stats.replaced,
                stats.found,
                stats.failed(),
                stats.metadata_replacements
            );
            println!("\nSaved to: {}", output.display());
            Ok(())
        }
    }
}

fn extract_blocks(input: &Path, output: Option<&Path>) -> Result<()> {
    let document = Document::open(input).with_context(|| format!("Failed to open {}", input.display()))?;
    let blocks = extract(&document)?;
    let rows: Vec<ExtractedBlock> = blocks
        .iter()
        .map(|b| ExtractedBlock {
            block_id: &b.id,
            kind: b.kind,
            content: &b.text,
        })
        .collect();
    let json = serde_json::to_string_pretty(&rows)?;
    match output {
        Some(path) => {
            std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!("Extracted {} blocks to {}", rows.len(), path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn anonymize_file(input: &Path, output: &Path, config: &AnonymizeConfig, detections: &[PathBuf]) -> Result<RunReport> {
    let mut document = Document::open(input).with_context(|| format!("Failed to open {}", input.display()))?;

    let mut detectors: Vec<Box<dyn Detector>> = config.builtin_detectors()?;
    for path in detections {
        detectors.push(Box::new(RecordedDetections::from_path(path)?));
    }
    if detectors.is_empty() {
        log::warn!("{}: no detectors configured, nothing will be replaced", input.display());
    }

    let coordinator = ReplacementCoordinator::new(config.clone());
    let report = coordinator.run(&mut document, &detectors)?;
    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)?;
    }
    document
        .save(output)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    Ok(report)
}

fn print_summary(report: &RunReport) {
    let stats = &report.stats;
    println!(
        "  {} blocks, {} spans found, {} replaced, {} failed",
        stats.blocks,
        stats.found,
        stats.replaced,
        stats.failed()
    );
    if stats.merged_away > 0 || stats.reanchored > 0 || stats.fallbacks > 0 {
        println!(
            "  {} merged away, {} re-anchored, {} located by fallback search",
            stats.merged_away, stats.reanchored, stats.fallbacks
        );
    }
    for (category, count) in &stats.per_category {
        println!("    {category}: {count}");
    }
    if stats.metadata_replacements > 0 {
        println!("  {} metadata values replaced", stats.metadata_replacements);
    }
    for failure in &stats.failures {
        println!("  Failed: [{}] {:?}: {}", failure.block_id, failure.original_text, failure.reason);
    }
    println!("  {} ledger entries", report.ledger.len());
}

fn batch(input_dir: &Path, output_dir: &Path, config: &AnonymizeConfig, xlsx: bool, threads: Option<usize>) -> Result<()> {
    if let Some(n) = threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(n)
            .build_global()
            .ok(); // Ignore error if already initialized
    }

    let mut files: Vec<PathBuf> = std::fs::read_dir(input_dir)
        .with_context(|| format!("Failed to read {}", input_dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            let is_docx = p.extension().is_some_and(|e| e.eq_ignore_ascii_case("docx"));
            // Word lock files
            let is_lock = p
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("~$"));
            is_docx && !is_lock
        })
        .collect();
    files.sort();
    std::fs::create_dir_all(output_dir)?;
    println!("Anonymizing {} documents from {}", files.len(), input_dir.display());

    let done = AtomicUsize::new(0);
    let errors = AtomicUsize::new(0);
    let replaced = AtomicUsize::new(0);

    files.par_iter().for_each(|path| {
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("document");
        let output = output_dir.join(format!("{stem}.docx"));
        let sidecar = path.with_file_name(format!("{stem}.detections.json"));
        let detections: Vec<PathBuf> = if sidecar.exists() { vec![sidecar] } else { Vec::new() };

        let result = anonymize_file(path, &output, config, &detections).and_then(|report| {
            write_ledger_json(&output_dir.join(format!("{stem}.ledger.json")), &report.ledger)?;
            if xlsx {
                write_ledger_xlsx(
                    &output_dir.join(format!("{stem}.ledger.xlsx")),
                    &report.ledger,
                    &report.stats,
                    &path.display().to_string(),
                )?;
            }
            Ok(report)
        });

        match result {
            Ok(report) => {
                replaced.fetch_add(report.stats.replaced, Ordering::Relaxed);
                println!(
                    "  {}: {} replaced, {} failed",
                    path.display(),
                    report.stats.replaced,
                    report.stats.failed()
                );
            }
            Err(e) => {
                errors.fetch_add(1, Ordering::Relaxed);
                log::warn!("{}: {:#}", path.display(), e);
                eprintln!("  Error: {}: {:#}", path.display(), e);
            }
        }
        done.fetch_add(1, Ordering::Relaxed);
    });

    println!(
        "\nProcessed {} documents ({} errors), {} replacements",
        done.load(Ordering::Relaxed),
        errors.load(Ordering::Relaxed),
        replaced.load(Ordering::Relaxed)
    );
    Ok(())
}
