use chrono::Local;
use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use tracing::debug;

use crate::error::Result;
use crate::model::{HeaderInfo, SourceRecord};

/// Reference log: one JSON file per successful extraction
#[derive(Debug, Clone)]
pub struct ReferenceArchive {
    dir: PathBuf,
}

#[derive(Serialize)]
struct ArchiveEntry<'a> {
    #[serde(flatten)]
    record: &'a SourceRecord,
    header: &'a HeaderInfo,
}

impl ReferenceArchive {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Write `output_<timestamp>.json` holding the record and the header fields used with it
    pub fn record(&self, record: &SourceRecord, header: &HeaderInfo) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;

        let stamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
        let mut path = self.dir.join(format!("output_{}.json", stamp));
        let mut attempt = 1;
        while path.exists() {
            path = self.dir.join(format!("output_{}_{}.json", stamp, attempt));
            attempt += 1;
        }

        let json = serde_json::to_string_pretty(&ArchiveEntry { record, header })
            .map_err(std::io::Error::other)?;
        fs::write(&path, json)?;

        debug!(path = %path.display(), "Archived extraction result");
        Ok(path)
    }
}
