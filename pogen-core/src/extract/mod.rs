//! Quotation extraction
//!
//! The extraction service is a black box: it receives the quotation document
//! and returns JSON text shaped like [`SourceRecord`]. Everything that talks to
//! it goes through the [`Extractor`] trait so runs can be replayed offline.

mod archive;
#[cfg(feature = "gemini")]
pub mod gemini;

pub use archive::ReferenceArchive;
#[cfg(feature = "gemini")]
pub use gemini::GeminiExtractor;

use std::fs;
use std::path::Path;
use tracing::debug;

use crate::error::{PoError, Result};
use crate::model::SourceRecord;

/// Something that turns a quotation document into a [`SourceRecord`]
pub trait Extractor: Send + Sync {
    /// Short name used in log messages
    fn name(&self) -> &str;

    fn extract(&self, document: &[u8]) -> Result<SourceRecord>;
}

/// Parse a service response, tolerating Markdown code fences around the JSON
pub fn parse_response(text: &str) -> Result<SourceRecord> {
    let cleaned = text.trim().replace("```json", "").replace("```", "");
    serde_json::from_str(cleaned.trim()).map_err(|e| PoError::Parse {
        message: e.to_string(),
        raw: text.to_string(),
    })
}

/// Replays a recorded response instead of calling the service
#[derive(Debug, Clone)]
pub struct CannedExtractor {
    response: String,
}

impl CannedExtractor {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
        }
    }

    /// Use the contents of a saved response or reference-log file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::new(fs::read_to_string(path)?))
    }
}

impl Extractor for CannedExtractor {
    fn name(&self) -> &str {
        "canned"
    }

    fn extract(&self, document: &[u8]) -> Result<SourceRecord> {
        debug!(bytes = document.len(), "Ignoring document, replaying recorded response");
        parse_response(&self.response)
    }
}
