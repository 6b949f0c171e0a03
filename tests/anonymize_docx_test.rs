//! End-to-end tests on real DOCX archives.
//!
//! Each test writes a small package into a temp directory, runs it through
//! the library the same way the `docx-anon` binary does (open, run, save,
//! reopen), and checks the text, the XML and the ledger.

use std::io::Write;
use std::path::Path;

use docx_anonymizer::config::DictionaryEntry;
use docx_anonymizer::docx::{DocxPackage, XmlTree, MAIN_PART};
use docx_anonymizer::mapper::is_identifier;
use docx_anonymizer::replace::live_block_text;
use docx_anonymizer::span::{Position, Replacement};
use docx_anonymizer::{
    extract, restore_document, AnonymizeConfig, DetectorRecord, Document, DocumentError, PositionalReplacer,
    ReplacementCoordinator,
};
use regex::Regex;

const W_NS: &str = r#"xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships""#;

const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="xml" ContentType="application/xml"/></Types>"#;

const STYLES: &str = r#"<w:styles   xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:style w:styleId="Normal"/></w:styles>"#;

fn main_part(body: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document {W_NS}><w:body>{body}</w:body></w:document>"#
    )
}

fn write_docx(path: &Path, body: &str, extra: &[(&str, &str)]) {
    let file = std::fs::File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    let opts = zip::write::SimpleFileOptions::default();
    zip.start_file("[Content_Types].xml", opts).unwrap();
    zip.write_all(CONTENT_TYPES.as_bytes()).unwrap();
    zip.start_file(MAIN_PART, opts).unwrap();
    zip.write_all(main_part(body).as_bytes()).unwrap();
    zip.start_file("word/styles.xml", opts).unwrap();
    zip.write_all(STYLES.as_bytes()).unwrap();
    for (name, data) in extra {
        zip.start_file(*name, opts).unwrap();
        zip.write_all(data.as_bytes()).unwrap();
    }
    zip.finish().unwrap();
}

fn record(block: &str, text: &str, start: usize, end: usize, category: &str, method: &str, confidence: f64) -> DetectorRecord {
    DetectorRecord {
        block_id: block.to_string(),
        category: category.to_string(),
        original_text: text.to_string(),
        position: Position { start, end },
        confidence,
        method: method.to_string(),
        placeholder: Some("PLACEHOLDER".to_string()),
    }
}

fn block_texts(doc: &Document) -> Vec<String> {
    extract(doc).unwrap().into_iter().map(|b| b.text).collect()
}

fn part_text(path: &Path, name: &str) -> String {
    DocxPackage::open(path).unwrap().get_text(name).unwrap()
}

fn runs_xml(xml: &str) -> Vec<String> {
    let tree = XmlTree::parse(xml, MAIN_PART).unwrap();
    tree.descendants(tree.root())
        .into_iter()
        .filter(|&n| tree.is_element(n, "w:r"))
        .map(|n| tree.node_to_string(n).unwrap())
        .collect()
}

#[test]
fn test_contact_line_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("contact.docx");
    let output = dir.path().join("contact.anon.docx");
    write_docx(
        &input,
        r#"<w:p><w:r><w:t>Contact: John Smith, phone 555-1234</w:t></w:r></w:p>"#,
        &[],
    );

    let mut doc = Document::open(&input).unwrap();
    assert_eq!(block_texts(&doc), vec!["Contact: John Smith, phone 555-1234".to_string()]);

    // The phone offsets are one character off, as detectors working on a
    // slightly different text produce them.
    let records = vec![
        record("p-0", "John Smith", 9, 19, "person_name", "spacy_ner", 0.85),
        record("p-0", "555-1234", 28, 36, "phone", "regex", 0.95),
    ];
    let report = ReplacementCoordinator::default().run_with_records(&mut doc, records).unwrap();
    doc.save(&output).unwrap();

    assert_eq!(report.stats.found, 2);
    assert_eq!(report.stats.replaced, 2);
    assert_eq!(report.stats.failed(), 0);
    assert_eq!(report.stats.reanchored, 1);
    assert_eq!(report.stats.per_category["person_name"], 1);
    assert_eq!(report.stats.per_category["phone"], 1);

    let reopened = Document::open(&output).unwrap();
    let texts = block_texts(&reopened);
    let re = Regex::new(r"^Contact: ([0-9a-f-]{36}), phone ([0-9a-f-]{36})$").unwrap();
    let caps = re.captures(&texts[0]).unwrap();
    let (id1, id2) = (&caps[1], &caps[2]);
    assert!(is_identifier(id1) && is_identifier(id2));
    assert_ne!(id1, id2);
    assert_eq!(report.ledger.resolve(id1), Some("John Smith"));
    assert_eq!(report.ledger.resolve(id2), Some("555-1234"));
}

#[test]
fn test_run_split_keeps_first_run_formatting() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("split.docx");
    let output = dir.path().join("split.anon.docx");
    write_docx(
        &input,
        r#"<w:p><w:r><w:rPr><w:b/></w:rPr><w:t>John</w:t></w:r><w:r><w:t xml:space="preserve"> Smith</w:t></w:r></w:p>"#,
        &[],
    );

    let mut doc = Document::open(&input).unwrap();
    let records = vec![record("p-0", "John Smith", 0, 10, "person_name", "ner", 0.9)];
    let report = ReplacementCoordinator::default().run_with_records(&mut doc, records).unwrap();
    doc.save(&output).unwrap();
    assert_eq!(report.stats.replaced, 1);

    let id = &report.ledger.entries()[0].identifier;
    let runs = runs_xml(&part_text(&output, MAIN_PART));
    assert_eq!(
        runs,
        vec![
            format!("<w:r><w:rPr><w:b/></w:rPr><w:t>{id}</w:t></w:r>"),
            r#"<w:r><w:t xml:space="preserve"></w:t></w:r>"#.to_string(),
        ]
    );
}

#[test]
fn test_overlapping_detectors_resolve_to_dictionary_span() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("overlap.docx");
    write_docx(
        &input,
        r#"<w:p><w:r><w:t>Limited Liability Co Horns and Hooves</w:t></w:r></w:p>"#,
        &[],
    );

    let mut doc = Document::open(&input).unwrap();
    let records = vec![
        record("p-0", "Limited Liability Co", 0, 20, "organization", "statistical_model", 0.7),
        record("p-0", "mited Liability ", 2, 18, "organization", "exact_dictionary", 0.98),
    ];
    let report = ReplacementCoordinator::default().run_with_records(&mut doc, records).unwrap();
    assert_eq!(report.stats.replaced, 1);
    assert_eq!(report.stats.merged_away, 1);
    assert_eq!(report.ledger.len(), 1);
    assert_eq!(report.ledger.entries()[0].original_text, "mited Liability ");

    let id = &report.ledger.entries()[0].identifier;
    assert_eq!(block_texts(&doc), vec![format!("Li{id}Co Horns and Hooves")]);
}

#[test]
fn test_descending_order_matches_ascending_with_shift() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("order.docx");
    write_docx(
        &input,
        r#"<w:p><w:r><w:t xml:space="preserve">aaaa bbbbb </w:t></w:r><w:r><w:rPr><w:i/></w:rPr><w:t>cccccccc ddddd eeee</w:t></w:r></w:p>"#,
        &[],
    );
    const ID1: &str = "11111111-1111-4111-8111-111111111111";
    const ID2: &str = "22222222-2222-4222-8222-222222222222";
    let rep = |block: &str, start: usize, end: usize, text: &str, id: &str| Replacement {
        block_id: block.to_string(),
        original_text: text.to_string(),
        identifier: id.to_string(),
        position: Position { start, end },
        category: "test".to_string(),
    };

    // Descending: both at once, the replacer sorts back to front.
    let mut descending = Document::open(&input).unwrap();
    let blocks = extract(&descending).unwrap();
    assert_eq!(blocks[0].text, "aaaa bbbbb cccccccc ddddd eeee");
    let outcome = PositionalReplacer::default().apply(
        &mut descending,
        &blocks[0],
        &[rep("p-0", 5, 10, "bbbbb", ID1), rep("p-0", 20, 25, "ddddd", ID2)],
    );
    assert_eq!(outcome.applied, 2);
    assert_eq!(outcome.fallbacks, 0);

    // Ascending: one at a time, shifting the second by the growth of the
    // first and re-extracting in between.
    let mut ascending = Document::open(&input).unwrap();
    let blocks = extract(&ascending).unwrap();
    let first = PositionalReplacer::default().apply(&mut ascending, &blocks[0], &[rep("p-0", 5, 10, "bbbbb", ID1)]);
    assert_eq!(first.applied, 1);
    let shift = ID1.len() - 5;
    let blocks = extract(&ascending).unwrap();
    let second = PositionalReplacer::default().apply(
        &mut ascending,
        &blocks[0],
        &[rep("p-0", 20 + shift, 25 + shift, "ddddd", ID2)],
    );
    assert_eq!((second.applied, second.fallbacks), (1, 0));

    assert_eq!(block_texts(&descending), block_texts(&ascending));
    assert_eq!(block_texts(&descending), vec![format!("aaaa {ID1} cccccccc {ID2} eeee")]);
}

#[test]
fn test_untouched_runs_and_parts_are_byte_identical() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("format.docx");
    let output = dir.path().join("format.anon.docx");
    write_docx(
        &input,
        concat!(
            r#"<w:p><w:pPr><w:jc w:val="center"/></w:pPr>"#,
            r#"<w:r><w:rPr><w:rFonts w:ascii="Arial"/><w:sz w:val="28"/></w:rPr><w:t xml:space="preserve">Signed by </w:t></w:r>"#,
            r#"<w:r><w:rPr><w:u w:val="single"/></w:rPr><w:t>Mary Major</w:t></w:r>"#,
            r#"<w:r><w:rPr><w:color w:val="FF0000"/></w:rPr><w:t xml:space="preserve"> on behalf of &amp; for Acme</w:t></w:r>"#,
            r#"</w:p>"#
        ),
        &[],
    );
    let before = runs_xml(&part_text(&input, MAIN_PART));

    let mut doc = Document::open(&input).unwrap();
    let records = vec![record("p-0", "Mary Major", 10, 20, "person_name", "ner", 0.9)];
    let report = ReplacementCoordinator::default().run_with_records(&mut doc, records).unwrap();
    doc.save(&output).unwrap();
    assert_eq!(report.stats.replaced, 1);

    let after = runs_xml(&part_text(&output, MAIN_PART));
    assert_eq!(after.len(), 3);
    assert_eq!(after[0], before[0]);
    assert_eq!(after[2], before[2]);
    let id = &report.ledger.entries()[0].identifier;
    assert_eq!(after[1], format!(r#"<w:r><w:rPr><w:u w:val="single"/></w:rPr><w:t>{id}</w:t></w:r>"#));

    // Parts nobody edits are copied byte for byte.
    assert_eq!(part_text(&output, "word/styles.xml"), STYLES);
    assert_eq!(part_text(&output, "[Content_Types].xml"), CONTENT_TYPES);
}

#[test]
fn test_whole_document_and_restore_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("contract.docx");
    let output = dir.path().join("contract.anon.docx");
    let restored = dir.path().join("contract.restored.docx");

    let rels = r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId5" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/header" Target="header1.xml"/><Relationship Id="rId6" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/footer" Target="footer1.xml"/></Relationships>"#;
    let header = format!(r#"<w:hdr {W_NS}><w:p><w:r><w:t>Acme Ltd confidential</w:t></w:r></w:p></w:hdr>"#);
    let footer = format!(r#"<w:ftr {W_NS}><w:p><w:r><w:t>Prepared for John Smith</w:t></w:r></w:p></w:ftr>"#);
    let core = r#"<cp:coreProperties xmlns:cp="cp" xmlns:dc="dc"><dc:creator>John Smith</dc:creator><dc:title>Acme Ltd contract</dc:title></cp:coreProperties>"#;
    write_docx(
        &input,
        concat!(
            r#"<w:p><w:r><w:t xml:space="preserve">Between </w:t></w:r><w:r><w:rPr><w:b/></w:rPr><w:t>Acme</w:t></w:r><w:r><w:t xml:space="preserve"> Ltd and John Smith.</w:t></w:r></w:p>"#,
            r#"<w:tbl><w:tr><w:tc><w:p><w:r><w:t>Party</w:t></w:r></w:p></w:tc><w:tc><w:p><w:r><w:t>John Smith</w:t></w:r></w:p><w:p><w:r><w:t>Acme Ltd</w:t></w:r></w:p></w:tc></w:tr></w:tbl>"#,
            r#"<w:p><w:r><w:t xml:space="preserve">Signatory: </w:t></w:r><w:sdt><w:sdtPr><w:alias w:val="Signatory"/></w:sdtPr><w:sdtContent><w:r><w:t>John Smith</w:t></w:r></w:sdtContent></w:sdt></w:p>"#,
            r#"<w:sectPr><w:headerReference w:type="default" r:id="rId5"/><w:footerReference w:type="default" r:id="rId6"/></w:sectPr>"#
        ),
        &[
            ("word/_rels/document.xml.rels", rels),
            ("word/header1.xml", header.as_str()),
            ("word/footer1.xml", footer.as_str()),
            ("docProps/core.xml", core),
        ],
    );

    let original_doc = Document::open(&input).unwrap();
    let original_texts = block_texts(&original_doc);
    assert_eq!(
        original_texts,
        vec![
            "Between Acme Ltd and John Smith.",
            "Party",
            "John Smith | Acme Ltd",
            "Signatory:",
            "Acme Ltd confidential",
            "Prepared for John Smith",
            "John Smith",
        ]
    );

    let config = AnonymizeConfig {
        highlight: true,
        dictionary: vec![
            DictionaryEntry {
                category: "organization".to_string(),
                term: "Acme Ltd".to_string(),
            },
            DictionaryEntry {
                category: "person_name".to_string(),
                term: "John Smith".to_string(),
            },
        ],
        ..AnonymizeConfig::default()
    };
    let detectors = config.builtin_detectors().unwrap();
    let mut doc = Document::open(&input).unwrap();
    let report = ReplacementCoordinator::new(config).run(&mut doc, &detectors).unwrap();
    doc.save(&output).unwrap();

    assert_eq!(report.stats.replaced, 7);
    assert_eq!(report.stats.failed(), 0);
    assert_eq!(report.stats.metadata_replacements, 2);
    assert_eq!(report.ledger.len(), 7);

    // Nothing sensitive is left in any part, and every identifier in the
    // output resolves through the ledger.
    let id_re = Regex::new(r"[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}").unwrap();
    for part in [MAIN_PART, "word/header1.xml", "word/footer1.xml", "docProps/core.xml"] {
        let xml = part_text(&output, part);
        assert!(!xml.contains("John Smith"), "{part} still names John Smith");
        assert!(!xml.contains("Acme Ltd"), "{part} still names Acme Ltd");
        for m in id_re.find_iter(&xml) {
            assert!(report.ledger.resolve(m.as_str()).is_some());
        }
    }
    assert!(part_text(&output, MAIN_PART).contains(r#"<w:highlight w:val="yellow"/>"#));

    // Restore puts every original value back at its location.
    let mut anonymized = Document::open(&output).unwrap();
    let stats = restore_document(&mut anonymized, &report.ledger).unwrap();
    assert_eq!((stats.found, stats.replaced, stats.failed()), (7, 7, 0));
    anonymized.save(&restored).unwrap();
    let restored_doc = Document::open(&restored).unwrap();
    assert_eq!(block_texts(&restored_doc), original_texts);
    assert!(part_text(&restored, "docProps/core.xml").contains("<dc:creator>John Smith</dc:creator>"));
}

#[test]
fn test_live_text_tracks_each_block() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("live.docx");
    write_docx(
        &input,
        r#"<w:p><w:r><w:t>Bob paid Bob</w:t></w:r></w:p><w:p><w:r><w:t>Bob left</w:t></w:r></w:p>"#,
        &[],
    );
    let mut doc = Document::open(&input).unwrap();
    let records = vec![
        record("p-0", "Bob", 0, 3, "person_name", "ner", 0.9),
        record("p-0", "Bob", 9, 12, "person_name", "ner", 0.9),
        record("p-1", "Bob", 0, 3, "person_name", "ner", 0.9),
        record("p-7", "Bob", 0, 3, "person_name", "ner", 0.9),
    ];
    let report = ReplacementCoordinator::default().run_with_records(&mut doc, records).unwrap();
    assert_eq!(report.stats.replaced, 3);
    assert_eq!(report.stats.failed(), 1);
    assert_eq!(report.stats.per_block.len(), 2);
    // Per-occurrence identifiers: three different tokens for the same name.
    let ids: std::collections::HashSet<&str> =
        report.ledger.entries().iter().map(|e| e.identifier.as_str()).collect();
    assert_eq!(ids.len(), 3);

    let blocks = extract(&doc).unwrap();
    for block in &blocks {
        assert_eq!(live_block_text(&doc, block).unwrap(), block.text);
        assert!(!block.text.contains("Bob"));
    }
}

#[test]
fn test_unreadable_documents_are_fatal() {
    let dir = tempfile::tempdir().unwrap();

    let garbage = dir.path().join("garbage.docx");
    std::fs::write(&garbage, b"not a zip archive").unwrap();
    assert!(matches!(Document::open(&garbage), Err(DocumentError::Archive(_))));

    let broken = dir.path().join("broken.docx");
    write_docx(&broken, "<w:p><w:r><w:t>unclosed</w:r></w:p>", &[]);
    assert!(matches!(Document::open(&broken), Err(DocumentError::Malformed { .. })));

    let missing = dir.path().join("missing.docx");
    assert!(matches!(Document::open(&missing), Err(DocumentError::Io { .. })));
}
