//! DOCX Anonymizer
//!
//! Replaces sensitive text in Word documents with opaque identifiers while
//! keeping run formatting, tables, headers/footers and content controls
//! intact, and records every replacement in a reversible ledger.
//!
//! This library provides:
//! - `docx`: zip package and XML arena for the parts that carry text
//! - `extract`: ordered block snapshots with handles back into the arena
//! - `detector`: the detector contract plus dictionary, pattern and
//!   identifier detectors
//! - `merge`: overlap/duplicate resolution across detectors
//! - `mapper`: identifier issuing and the ledger
//! - `replace`: run-splitting positional replacement
//! - `coordinator`: the full extract → detect → merge → replace pass, and
//!   the restore pass
//! - `report`: ledger export (xlsx, JSON, CSV) and import
//!
//! Binaries:
//! - `docx-anon`: extract, anonymize, batch and restore from the command line

pub mod config;
pub mod coordinator;
pub mod detector;
pub mod docx;
pub mod error;
pub mod extract;
pub mod mapper;
pub mod merge;
pub mod metadata;
pub mod normalize;
pub mod replace;
pub mod report;
pub mod span;

pub use config::AnonymizeConfig;
pub use coordinator::{restore_document, ReplacementCoordinator, RunReport, RunStats};
pub use detector::{Detector, DetectorRecord};
pub use docx::Document;
pub use error::{DetectorError, DocumentError, ReplacementError};
pub use extract::{extract, Block, BlockKind};
pub use mapper::{IdentifierMapper, Ledger, UniquenessMode};
pub use merge::SpanMerger;
pub use normalize::normalize;
pub use replace::PositionalReplacer;
pub use span::{DetectionMethod, ResolvedSpan, Span};
