//! Ledger export and import.
//!
//! The ledger is the only way back from an anonymized document, so it can
//! be written as an Excel workbook for reviewers and as JSON or CSV for
//! the restore path.

use std::path::Path;

use anyhow::{Context, Result};
use rust_xlsxwriter::{Format, FormatAlign, Workbook};

use crate::coordinator::RunStats;
use crate::mapper::{Ledger, LedgerEntry};

const CSV_HEADERS: [&str; 4] = ["identifier", "original_value", "category", "occurrences"];

/// Write a workbook with a Summary sheet, the Ledger sheet and, when any
/// replacement failed, a Failures sheet.
pub fn write_ledger_xlsx(path: &Path, ledger: &Ledger, stats: &RunStats, source: &str) -> Result<()> {
    let mut workbook = Workbook::new();
    let bold = Format::new().set_bold();
    let left_fmt = Format::new().set_align(FormatAlign::Left);

    // ---------------------------------------------------------------
    // Summary sheet (first tab)
    // ---------------------------------------------------------------
    {
        let sheet = workbook.add_worksheet();
        sheet.set_name("Summary")?;

        let title_fmt = Format::new().set_bold().set_font_size(16);
        let mut row: u32 = 0;

        sheet.write_string_with_format(row, 0, "Anonymization Ledger", &title_fmt)?;
        row += 2;

        sheet.write_string_with_format(row, 0, "Source Document", &bold)?;
        sheet.write_string_with_format(row, 1, source, &left_fmt)?;
        row += 1;

        let now = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        sheet.write_string_with_format(row, 0, "Created", &bold)?;
        sheet.write_string_with_format(row, 1, &now, &left_fmt)?;
        row += 2;

        for (label, value) in [
            ("Blocks", stats.blocks),
            ("Spans Found", stats.found),
            ("Replaced", stats.replaced),
            ("Failed", stats.failed()),
            ("Metadata Replacements", stats.metadata_replacements),
            ("Ledger Entries", ledger.len()),
        ] {
            sheet.write_string_with_format(row, 0, label, &bold)?;
            sheet.write_number_with_format(row, 1, value as f64, &left_fmt)?;
            row += 1;
        }
        row += 1;

        sheet.write_string_with_format(row, 0, "Category", &bold)?;
        sheet.write_string_with_format(row, 1, "Replacements", &bold)?;
        row += 1;
        for (category, count) in &stats.per_category {
            sheet.write_string(row, 0, category)?;
            sheet.write_number_with_format(row, 1, *count as f64, &left_fmt)?;
            row += 1;
        }

        sheet.set_column_width(0, 24)?;
        sheet.set_column_width(1, 40)?;
    }

    // ---------------------------------------------------------------
    // Ledger sheet
    // ---------------------------------------------------------------
    {
        let sheet = workbook.add_worksheet();
        sheet.set_name("Ledger")?;

        for (col, header) in ["#", "Identifier", "Original Value", "Category", "Occurrences"]
            .iter()
            .enumerate()
        {
            sheet.write_string_with_format(0, col as u16, *header, &bold)?;
        }
        for (i, entry) in ledger.entries().iter().enumerate() {
            let row = (i + 1) as u32;
            sheet.write_number(row, 0, (i + 1) as f64)?;
            sheet.write_string(row, 1, &entry.identifier)?;
            sheet.write_string(row, 2, &entry.original_text)?;
            sheet.write_string(row, 3, &entry.category)?;
            sheet.write_number(row, 4, entry.occurrences as f64)?;
        }
        sheet.set_column_width(0, 6)?;
        sheet.set_column_width(1, 40)?;
        sheet.set_column_width(2, 40)?;
        sheet.set_column_width(3, 20)?;
    }

    if !stats.failures.is_empty() {
        let sheet = workbook.add_worksheet();
        sheet.set_name("Failures")?;
        for (col, header) in ["Block", "Text", "Category", "Reason"].iter().enumerate() {
            sheet.write_string_with_format(0, col as u16, *header, &bold)?;
        }
        for (i, failure) in stats.failures.iter().enumerate() {
            let row = (i + 1) as u32;
            sheet.write_string(row, 0, &failure.block_id)?;
            sheet.write_string(row, 1, &failure.original_text)?;
            sheet.write_string(row, 2, &failure.category)?;
            sheet.write_string(row, 3, &failure.reason)?;
        }
        sheet.set_column_width(1, 30)?;
        sheet.set_column_width(3, 60)?;
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    workbook
        .save(path)
        .map_err(|e| anyhow::anyhow!("Failed to save workbook: {}", e))?;
    Ok(())
}

pub fn write_ledger_json(path: &Path, ledger: &Ledger) -> Result<()> {
    let json = serde_json::to_string_pretty(ledger).context("Failed to serialize ledger")?;
    std::fs::write(path, json).with_context(|| format!("Failed to write ledger: {}", path.display()))?;
    Ok(())
}

pub fn write_ledger_csv(path: &Path, ledger: &Ledger) -> Result<()> {
    let mut writer = csv::Writer::from_path(path).context("Failed to create ledger CSV")?;
    writer.write_record(CSV_HEADERS)?;
    for entry in ledger.entries() {
        let occurrences = entry.occurrences.to_string();
        writer.write_record([
            entry.identifier.as_str(),
            entry.original_text.as_str(),
            entry.category.as_str(),
            occurrences.as_str(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// Read a ledger written by [`write_ledger_json`] or [`write_ledger_csv`],
/// chosen by file extension.
pub fn read_ledger(path: &Path) -> Result<Ledger> {
    let is_csv = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("csv"));
    if is_csv {
        return read_ledger_csv(path);
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read ledger: {}", path.display()))?;
    let ledger: Ledger = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse ledger: {}", path.display()))?;
    Ok(ledger)
}

fn read_ledger_csv(path: &Path) -> Result<Ledger> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to open ledger: {}", path.display()))?;
    let headers = reader.headers()?.clone();
    let column = |name: &str| headers.iter().position(|h| h.trim().eq_ignore_ascii_case(name));
    let id_col = column("identifier").context("Ledger CSV has no identifier column")?;
    let value_col = column("original_value")
        .or_else(|| column("original_text"))
        .context("Ledger CSV has no original_value column")?;
    let category_col = column("category");
    let occurrences_col = column("occurrences");

    let mut entries = Vec::new();
    for (row_num, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("Failed to read ledger row {}", row_num + 2))?;
        let Some(identifier) = record.get(id_col).filter(|s| !s.is_empty()) else {
            log::warn!("ledger row {} has no identifier, skipped", row_num + 2);
            continue;
        };
        entries.push(LedgerEntry {
            identifier: identifier.to_string(),
            original_text: record.get(value_col).unwrap_or_default().to_string(),
            category: category_col
                .and_then(|c| record.get(c))
                .unwrap_or_default()
                .to_string(),
            occurrences: occurrences_col
                .and_then(|c| record.get(c))
                .and_then(|s| s.parse().ok())
                .unwrap_or(1),
        });
    }
    Ok(Ledger::from(entries))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::FailedReplacement;
    use crate::mapper::{IdentifierMapper, UniquenessMode};

    fn sample() -> Ledger {
        let mut mapper = IdentifierMapper::new(UniquenessMode::PerValue);
        mapper.assign("John Smith", "person_name");
        mapper.assign("Smith, \"Jr\"", "person_name");
        mapper.assign("John Smith", "person_name");
        mapper.into_ledger()
    }

    #[test]
    fn test_csv_and_json_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = sample();

        let csv_path = dir.path().join("ledger.csv");
        write_ledger_csv(&csv_path, &ledger).unwrap();
        let from_csv = read_ledger(&csv_path).unwrap();
        assert_eq!(from_csv.entries(), ledger.entries());

        let json_path = dir.path().join("ledger.json");
        write_ledger_json(&json_path, &ledger).unwrap();
        let from_json = read_ledger(&json_path).unwrap();
        assert_eq!(from_json.entries(), ledger.entries());
        assert_eq!(from_json.entries()[0].occurrences, 2);
    }

    #[test]
    fn test_two_column_csv_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manual.csv");
        std::fs::write(&path, "identifier,original_value\nabc,Acme\n,orphan\n").unwrap();
        let ledger = read_ledger(&path).unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.resolve("abc"), Some("Acme"));
    }

    #[test]
    fn test_xlsx_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("ledger.xlsx");
        let mut stats = RunStats::default();
        stats.per_category.insert("person_name".to_string(), 3);
        stats.failures.push(FailedReplacement {
            block_id: "p-0".to_string(),
            original_text: "x".to_string(),
            category: "c".to_string(),
            reason: "gone".to_string(),
        });
        write_ledger_xlsx(&path, &sample(), &stats, "contract.docx").unwrap();
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[..2], b"PK");
    }
}
