//! Error types for purchase-order generation

use std::path::PathBuf;
use thiserror::Error;

/// Main error type surfaced by generation runs
#[derive(Error, Debug)]
pub enum PoError {
    /// Form input rejected before any extraction or population work
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Extraction service unreachable or rejected the request
    #[error("extraction service error: {0}")]
    Service(String),

    /// Extraction service answered with something that is not a quotation record
    #[error("could not parse extraction response: {message}")]
    Parse { message: String, raw: String },

    /// I/O error on the quotation, transient file, or permanent destination
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Template could not be read, parsed, or written back
    #[error("template error: {0:#}")]
    Template(anyhow::Error),

    /// Another generation is still running
    #[error("a purchase order is already being generated")]
    Busy,
}

/// Coarse classification used by callers to decide how to report a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Service,
    Parse,
    Io,
    Busy,
}

impl PoError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PoError::Validation(_) => ErrorKind::Validation,
            PoError::Service(_) => ErrorKind::Service,
            PoError::Parse { .. } => ErrorKind::Parse,
            PoError::Io(_) | PoError::Template(_) => ErrorKind::Io,
            PoError::Busy => ErrorKind::Busy,
        }
    }

    /// Raw service response attached to a parse failure, if any
    pub fn raw_response(&self) -> Option<&str> {
        match self {
            PoError::Parse { raw, .. } => Some(raw),
            _ => None,
        }
    }
}

/// Problems with user-supplied form fields
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<String>),

    #[error("PO number '{0}' must look like P-######-###M (e.g. P-250719-001M)")]
    InvalidPoNumber(String),

    #[error("invalid date '{0}', expected dd/mm/yyyy")]
    InvalidDate(String),

    #[error("quotation file does not exist: {}", .0.display())]
    FileNotFound(PathBuf),
}

pub type Result<T> = std::result::Result<T, PoError>;
