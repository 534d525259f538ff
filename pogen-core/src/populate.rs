//! Fill the purchase-order template
//!
//! Cell positions above the item table are fixed. Everything below it (total,
//! amount in words, signatures, page break) is placed relative to the final
//! table row, which moves down when the table has to grow.

use chrono::Local;
use rust_decimal::Decimal;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::TemplateLayout;
use crate::error::{PoError, Result};
use crate::model::{HeaderInfo, SourceRecord};
use crate::sheet::{CellRef, CellValue, Expansion, TemplateSheet, XlsxPackage, expand_table};
use crate::text;

// Item table columns
const COL_INDEX: u32 = 1; // A
const COL_QUANTITY: u32 = 2; // B
const COL_UNIT: u32 = 3; // C
const COL_DESCRIPTION: u32 = 4; // D
const COL_UNIT_PRICE: u32 = 8; // H
const COL_LINE_TOTAL: u32 = 9; // I

/// Result of writing one order into a sheet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PopulationSummary {
    pub total_cost: Decimal,
    pub expansion: Expansion,
}

/// Writes header, vendor, item and total fields into a template
#[derive(Debug, Clone, Default)]
pub struct Populator {
    layout: TemplateLayout,
}

impl Populator {
    pub fn new(layout: TemplateLayout) -> Self {
        Self { layout }
    }

    /// Populate a fresh copy of `template` and write it to a uniquely named
    /// transient file in `out_dir`. The template file is only read.
    pub fn populate(
        &self,
        template: &Path,
        header: &HeaderInfo,
        record: &SourceRecord,
        out_dir: &Path,
    ) -> Result<GeneratedDocument> {
        let mut package = XlsxPackage::open(template).map_err(PoError::Template)?;
        let summary = self.populate_sheet(package.worksheet_mut(), header, record);

        fs::create_dir_all(out_dir)?;
        let path = transient_path(out_dir);
        if let Err(e) = package.save(&path) {
            if path.exists() {
                if let Err(remove_err) = fs::remove_file(&path) {
                    warn!(path = %path.display(), error = %remove_err, "Could not remove partial output");
                }
            }
            return Err(PoError::Template(e));
        }

        info!(
            path = %path.display(),
            po = header.po_number(),
            items = record.items.len(),
            total = %summary.total_cost,
            "Created transient purchase order"
        );

        Ok(GeneratedDocument {
            path,
            total_cost: summary.total_cost,
            final_row: summary.expansion.final_row,
            inserted_rows: summary.expansion.inserted_rows,
        })
    }

    /// Write every field into `sheet`, expanding the item table as needed
    pub fn populate_sheet<S: TemplateSheet + ?Sized>(
        &self,
        sheet: &mut S,
        header: &HeaderInfo,
        record: &SourceRecord,
    ) -> PopulationSummary {
        self.write_header(sheet, header);
        self.write_vendor(sheet, header, record);

        let table = &self.layout.table;
        let expansion = expand_table(&mut *sheet, table, record.items.len());
        let total_cost = self.write_items(sheet, record);
        self.write_totals(sheet, header, expansion.final_row, total_cost);

        PopulationSummary {
            total_cost,
            expansion,
        }
    }

    fn write_header<S: TemplateSheet + ?Sized>(&self, sheet: &mut S, header: &HeaderInfo) {
        set_text(sheet, "E8", header.po_number());
        set_text(sheet, "H8", &text::format_date(header.issue_date()));
        set_text(sheet, "H9", header.project_number());
        set_text(sheet, "H10", header.project_name());
        set_text(sheet, "G18", &header.contact_line());
        set_text(sheet, "G20", &header.order_line());
    }

    fn write_vendor<S: TemplateSheet + ?Sized>(
        &self,
        sheet: &mut S,
        header: &HeaderInfo,
        record: &SourceRecord,
    ) {
        set_text(sheet, "B9", &record.company_name);

        let (line1, line2) = text::wrap_address(&record.address, self.layout.address_width);
        set_text(sheet, "B10", &line1);
        set_text(sheet, "B11", &line2);

        let contact = &record.contact;
        for (cell, value) in [
            ("C13", &contact.name),
            ("C14", &contact.phone),
            ("C15", &contact.fax),
            ("C16", &contact.email),
        ] {
            set_text(sheet, cell, &format!(": {}", value.as_deref().unwrap_or("")));
        }

        set_text(sheet, "A18", "N/A");
        set_text(sheet, "A21", &record.terms.payment);

        match text::delivery_date(header.issue_date(), record.terms.delivery_weeks) {
            Some(date) => set_text(sheet, "H24", &text::format_date(date)),
            None => debug!(weeks = ?record.terms.delivery_weeks, "No delivery date"),
        }

        set_text(
            sheet,
            "D29",
            &format!("With reference to your quotation {}:", record.quotation_number),
        );
    }

    /// Returns the sum of all line totals
    fn write_items<S: TemplateSheet + ?Sized>(&self, sheet: &mut S, record: &SourceRecord) -> Decimal {
        let mut total_cost = Decimal::ZERO;

        for (index, item) in record.items.iter().enumerate() {
            let row = self.layout.table.item_row(index);
            let line_total = item.line_total();
            total_cost += line_total;

            sheet.set_value(CellRef::new(row, COL_INDEX), Decimal::from(index + 1).into());
            sheet.set_value(CellRef::new(row, COL_QUANTITY), item.quantity.into());
            sheet.set_value(CellRef::new(row, COL_UNIT), text_value(&item.unit));
            sheet.set_value(CellRef::new(row, COL_DESCRIPTION), text_value(&item.description));
            sheet.set_value(CellRef::new(row, COL_UNIT_PRICE), item.unit_price.into());
            sheet.set_value(CellRef::new(row, COL_LINE_TOTAL), line_total.into());
        }

        total_cost
    }

    fn write_totals<S: TemplateSheet + ?Sized>(
        &self,
        sheet: &mut S,
        header: &HeaderInfo,
        final_row: u32,
        total_cost: Decimal,
    ) {
        let table = &self.layout.table;

        sheet.set_value(
            CellRef::new(final_row + table.total_offset, COL_LINE_TOTAL),
            CellValue::formula(format!("SUM(I{}:I{})", table.start_row, final_row)),
        );
        sheet.set_value(
            CellRef::new(final_row + table.words_offset, 5),
            text_value(&text::amount_to_words(total_cost)),
        );

        let signature_row = final_row + table.signature_offset;
        sheet.set_value(CellRef::new(signature_row, 7), text_value(header.purchaser_name()));
        sheet.set_value(CellRef::new(signature_row, 8), text_value(header.manager_name()));

        sheet.set_row_break(final_row + table.page_break_offset);
    }
}

/// Empty strings clear the cell instead of writing an empty string
fn text_value(value: &str) -> CellValue {
    if value.is_empty() {
        CellValue::Empty
    } else {
        CellValue::text(value)
    }
}

fn set_text<S: TemplateSheet + ?Sized>(sheet: &mut S, cell: &str, value: &str) {
    if let Some(cell_ref) = CellRef::parse(cell) {
        sheet.set_value(cell_ref, text_value(value));
    }
}

fn transient_path(out_dir: &Path) -> PathBuf {
    let stamp = Local::now().format("%Y%m%d_%H%M%S_%3f").to_string();
    let mut path = out_dir.join(format!("temp_po_{}.xlsx", stamp));
    let mut attempt = 1;
    while path.exists() {
        path = out_dir.join(format!("temp_po_{}_{}.xlsx", stamp, attempt));
        attempt += 1;
    }
    path
}

/// A populated workbook waiting to be saved or discarded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedDocument {
    pub path: PathBuf,
    pub total_cost: Decimal,
    /// Last item-table row after expansion
    pub final_row: u32,
    pub inserted_rows: u32,
}

impl GeneratedDocument {
    /// Copy to `dest` and remove the transient file
    pub fn persist(self, dest: &Path) -> Result<PathBuf> {
        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::copy(&self.path, dest)?;
        fs::remove_file(&self.path)?;
        info!(path = %dest.display(), "Saved purchase order");
        Ok(dest.to_path_buf())
    }

    /// Delete the transient file
    pub fn discard(self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(path = %self.path.display(), "Discarded transient purchase order");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
