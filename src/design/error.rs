//! Error types for guide set design
//!
//! Systemic failures (bad input, corrupt alignment) abort a run and are
//! returned as [`DesignError`]. Per-batch screening failures are not errors
//! from the caller's point of view: they are recorded as
//! [`ScreeningBatchError`] values in the screening summary.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Invalid user input, detected before any collaborator is invoked.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InputError {
    #[error("no target genes supplied")]
    NoTargets,
    #[error("duplicate target gene id '{0}'")]
    DuplicateGene(String),
    #[error("gene '{gene}': malformed coordinates {start}..{end}")]
    MalformedCoordinates { gene: String, start: u64, end: u64 },
    #[error("gene '{gene}': sequence of {sequence_len} bases for an interval of {interval_len}")]
    SequenceLengthMismatch {
        gene: String,
        sequence_len: usize,
        interval_len: u64,
    },
    #[error("gene '{gene}': invalid character '{found}' at position {position}")]
    InvalidBase {
        gene: String,
        found: char,
        position: usize,
    },
    #[error("invalid PAM pattern '{0}'")]
    InvalidPam(String),
    #[error("no PAM pattern configured")]
    NoPam,
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

/// A corrupt or incomplete alignment.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProjectionError {
    #[error("gene '{0}' does not appear in the alignment")]
    GeneNotAligned(String),
    #[error("alignment row '{0}' does not name a target gene")]
    UnknownRow(String),
    #[error("gene '{gene}' appears more than once in alignment block {block}")]
    DuplicateRow { gene: String, block: usize },
    #[error("alignment block {block}: row '{gene}' has {found} columns, expected {expected}")]
    RaggedBlock {
        block: usize,
        gene: String,
        found: usize,
        expected: usize,
    },
    #[error("gene '{gene}': aligned interval lies outside the gene")]
    RowOutsideGene { gene: String },
    #[error("gene '{gene}': {residues} aligned residues for an interval of {interval_len} bases")]
    Incomplete {
        gene: String,
        residues: usize,
        interval_len: u64,
    },
    #[error("gene '{gene}': residue mismatch against gene sequence at column {column}")]
    ResidueMismatch { gene: String, column: usize },
    #[error("gene '{gene}': block {block} steps back over projected offsets at column {column}")]
    NonMonotonic {
        gene: String,
        block: usize,
        column: usize,
    },
}

/// Failure reported by an external collaborator (alignment or search).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SearchError {
    #[error("search returned {found} result lists for {expected} queries")]
    ResultCountMismatch { expected: usize, found: usize },
    #[error("malformed search output: {0}")]
    Malformed(String),
    #[error("collaborator failed: {0}")]
    Failed(String),
}

/// One screening batch whose searches failed; its candidates were marked
/// unknown and excluded from coverage.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("screening batch {batch} failed ({} candidates skipped): {message}", .candidate_ids.len())]
pub struct ScreeningBatchError {
    pub batch: usize,
    pub candidate_ids: Vec<usize>,
    pub message: String,
}

/// Top-level error for a design run.
#[derive(Error, Debug)]
pub enum DesignError {
    #[error("input error: {0}")]
    Input(#[from] InputError),
    #[error("alignment projection error: {0}")]
    Projection(#[from] ProjectionError),
    #[error("alignment producer failed: {0}")]
    Alignment(SearchError),
    #[error("FASTA error: {0}")]
    Fasta(String),
    #[error("annotation error at line {line}: {message}")]
    Annotation { line: usize, message: String },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
