//! Spreadsheet template handling
//!
//! An [`XlsxPackage`] holds every part of a template in memory. Only the
//! active worksheet is parsed into a [`Worksheet`]; all other parts (styles,
//! shared strings, drawings, printer settings) are copied through unchanged
//! when the package is saved.

pub mod cell_ref;
pub mod region;
pub mod worksheet;
pub mod xlsx_parser;
pub mod xlsx_writer;

pub use cell_ref::{CellRange, CellRef, column_letters};
pub use region::{Expansion, TableLayout, TableRegion, TemplateSheet, expand_table, shift_merges};
pub use worksheet::{Cell, CellValue, Row, Worksheet};

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, Write};
use std::path::Path;
use tracing::debug;
use zip::ZipArchive;

/// An XLSX file loaded into memory with its active worksheet parsed
#[derive(Debug, Clone)]
pub struct XlsxPackage {
    /// Every zip entry in archive order
    entries: Vec<(String, Vec<u8>)>,
    sheet_path: String,
    sheet_xml: String,
    worksheet: Worksheet,
}

impl XlsxPackage {
    /// Load a package from disk. The file itself is never written to.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("Failed to open template {}", path.display()))?;
        Self::from_reader(BufReader::new(file))
            .with_context(|| format!("Failed to read template {}", path.display()))
    }

    pub fn from_reader<R: Read + Seek>(reader: R) -> Result<Self> {
        let mut archive = ZipArchive::new(reader)?;
        let mut entries = Vec::with_capacity(archive.len());

        for i in 0..archive.len() {
            let mut file = archive.by_index(i)?;
            if file.is_dir() {
                continue;
            }
            let name = file.name().to_string();
            let mut buffer = Vec::new();
            file.read_to_end(&mut buffer)?;
            entries.push((name, buffer));
        }

        let workbook_xml = entry_str(&entries, "xl/workbook.xml")?;
        let rels_xml = entry_str(&entries, "xl/_rels/workbook.xml.rels")?;

        let (sheets, active_tab) = xlsx_parser::parse_workbook_sheets(workbook_xml)?;
        let sheet = sheets
            .get(active_tab)
            .or_else(|| sheets.first())
            .ok_or_else(|| anyhow::anyhow!("Workbook contains no worksheets"))?;
        let sheet_path = xlsx_parser::resolve_relationship(rels_xml, &sheet.rel_id)?;

        let sheet_xml = entry_str(&entries, &sheet_path)?.to_string();
        let worksheet = xlsx_parser::parse_worksheet(&sheet.name, &sheet_xml)
            .with_context(|| format!("Failed to parse worksheet '{}'", sheet.name))?;

        debug!(
            sheet = %worksheet.name,
            path = %sheet_path,
            rows = worksheet.rows.len(),
            merges = worksheet.merged.len(),
            "Loaded template worksheet"
        );

        Ok(Self {
            entries,
            sheet_path,
            sheet_xml,
            worksheet,
        })
    }

    /// Package path of the active worksheet (e.g. `xl/worksheets/sheet1.xml`)
    pub fn sheet_path(&self) -> &str {
        &self.sheet_path
    }

    pub fn worksheet(&self) -> &Worksheet {
        &self.worksheet
    }

    pub fn worksheet_mut(&mut self) -> &mut Worksheet {
        &mut self.worksheet
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        self.write_to(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    pub fn write_to<W: Write + Seek>(&self, writer: W) -> Result<()> {
        let sheet_xml = xlsx_writer::render_worksheet(&self.sheet_xml, &self.worksheet)?;
        xlsx_writer::write_package(&self.entries, &self.sheet_path, &sheet_xml, writer)
    }
}

fn entry_str<'a>(entries: &'a [(String, Vec<u8>)], name: &str) -> Result<&'a str> {
    let (_, data) = entries
        .iter()
        .find(|(entry_name, _)| entry_name == name)
        .ok_or_else(|| anyhow::anyhow!("Missing package part {}", name))?;
    Ok(std::str::from_utf8(data)?)
}
