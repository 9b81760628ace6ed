// This module defines the error types for graph-file lowering using the thiserror crate.
// LowerError is the main error enum and follows the three failure classes of the stage:
// malformed input (a scheduled op or tensor lacks an attribute its strategy requires),
// unsupported configurations (an op/tensor combination with no lowering rule), and format
// failures (artifact verification on read, I/O on write). Every variant carries the op,
// tensor, allocator or path it concerns so the enclosing compiler driver can report it
// without re-deriving context. FormatError is kept separate because the bounds-checked
// wire reader and the entropy decoder produce it without knowing about graphs at all.

//! Error types for graph-file lowering.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the lowering stage.
#[derive(Error, Debug)]
pub enum LowerError {
    #[error("Op '{op}' is missing required attribute '{attribute}'")]
    MissingAttribute {
        op: String,
        attribute: &'static str,
    },

    #[error("Tensor '{tensor}' has no subtensor for cluster {cluster}")]
    MissingSubtensor {
        tensor: String,
        cluster: usize,
    },

    #[error("Tensor '{tensor}' has no buffer in {space}")]
    MissingBuffer {
        tensor: String,
        space: &'static str,
    },

    #[error("Tensor '{tensor}' lives in the constant pool but has no pool index")]
    MissingPoolIndex {
        tensor: String,
    },

    #[error("Constant pool index {index} of '{tensor}' {reason}")]
    InvalidPoolIndex {
        tensor: String,
        index: u32,
        reason: &'static str,
    },

    #[error("Tensor '{tensor}' is sparse but has no {what}")]
    MissingSparsityMap {
        tensor: String,
        what: &'static str,
    },

    #[error("Tensor '{tensor}' is not allocated in {space}")]
    AllocatorMismatch {
        tensor: String,
        space: &'static str,
    },

    #[error("Tensor '{tensor}' carries no constant data")]
    MissingData {
        tensor: String,
    },

    #[error("Unknown tensor id {id}")]
    UnknownTensor {
        id: u32,
    },

    #[error("Unknown op id {id}")]
    UnknownOp {
        id: u32,
    },

    #[error("Workloads of op '{op}' do not tile cluster {cluster}: {reason}")]
    InvalidTiling {
        op: String,
        cluster: usize,
        reason: String,
    },

    #[error("Unsupported configuration for '{op}': {reason}")]
    Unsupported {
        op: String,
        reason: String,
    },

    #[error("Unknown {kind} '{name}'")]
    UnknownName {
        kind: &'static str,
        name: String,
    },

    #[error("Graph file format error: {0}")]
    Format(#[from] FormatError),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised while verifying or decoding a binary artifact.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("Truncated input: needed {needed} bytes at offset {offset}, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("Bad magic in section {section}")]
    BadMagic {
        section: &'static str,
    },

    #[error("Unsupported format version {major}.{minor} (expected major {expected})")]
    VersionMismatch {
        major: u32,
        minor: u32,
        expected: u32,
    },

    #[error("Invalid {kind} tag {tag}")]
    InvalidTag {
        kind: &'static str,
        tag: u32,
    },

    #[error("Missing section {section}")]
    MissingSection {
        section: &'static str,
    },

    #[error("Unexpected section {section}")]
    UnexpectedSection {
        section: &'static str,
    },

    #[error("{count} trailing bytes after section {section}")]
    TrailingBytes {
        section: &'static str,
        count: usize,
    },

    #[error("Container error: {reason}")]
    Container {
        reason: String,
    },

    #[error("Corrupt compressed stream: {reason}")]
    CorruptStream {
        reason: &'static str,
    },
}

/// Result type alias for lowering operations.
pub type LowerResult<T> = Result<T, LowerError>;

impl LowerError {
    pub(crate) fn missing(op: &str, attribute: &'static str) -> Self {
        LowerError::MissingAttribute {
            op: op.to_string(),
            attribute,
        }
    }

    pub(crate) fn unknown_name(kind: &'static str, name: &str) -> Self {
        LowerError::UnknownName {
            kind,
            name: name.to_string(),
        }
    }

    pub(crate) fn unsupported(op: &str, reason: impl Into<String>) -> Self {
        LowerError::Unsupported {
            op: op.to_string(),
            reason: reason.into(),
        }
    }
}
