//! Error types.
//!
//! Two tiers: [`DocumentError`] is fatal and aborts a whole run (the
//! document cannot be read, parsed or written). [`ReplacementError`]
//! describes why a single span or replacement was skipped; it is collected
//! into the run statistics and never stops the run.

use std::path::PathBuf;
use thiserror::Error;

/// Fatal errors while loading, parsing or saving a document.
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("not a readable DOCX archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("required part {0} is missing from the package")]
    MissingPart(String),

    /// A part exists but is not well-formed WordprocessingML.
    #[error("malformed document part {part}: {reason}")]
    Malformed { part: String, reason: String },

    #[error("failed to serialize part {part}: {source}")]
    Serialize {
        part: String,
        #[source]
        source: quick_xml::Error,
    },
}

impl DocumentError {
    pub(crate) fn malformed(part: &str, reason: impl std::fmt::Display) -> Self {
        DocumentError::Malformed {
            part: part.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DocumentError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Why a span was rejected or a replacement could not be applied.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReplacementError {
    #[error("span range [{start}, {end}) is empty or inverted")]
    InvalidRange { start: usize, end: usize },

    #[error("span range [{start}, {end}) lies outside the block text")]
    OutOfBounds { start: usize, end: usize },

    #[error("span text {expected:?} does not match block text {found:?}")]
    TextMismatch { expected: String, found: String },

    #[error("confidence {0} is outside [0, 1]")]
    InvalidConfidence(f64),

    #[error("unknown detection method {0:?}")]
    UnknownMethod(String),

    #[error("block {0:?} was not produced by this extraction pass")]
    UnknownBlock(String),

    #[error("span [{start}, {end}) crosses a structural delimiter")]
    CrossesDelimiter { start: usize, end: usize },

    #[error("text {0:?} is no longer present in the live document")]
    LiveTextNotFound(String),

    #[error("block handle no longer resolves to a document node")]
    StaleHandle,

    #[error("identifier {0:?} has no ledger entry")]
    UnknownIdentifier(String),
}

/// Errors reported by a detector call. The coordinator logs them and moves
/// on to the next detector.
#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("detector {detector} failed: {reason}")]
    Failed { detector: String, reason: String },

    #[error("invalid pattern for category {category}: {source}")]
    InvalidPattern {
        category: String,
        #[source]
        source: regex::Error,
    },
}
