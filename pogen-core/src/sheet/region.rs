//! Line-item table region and its expansion
//!
//! The template reserves a block of rows for line items, each item taking
//! `rows_per_item` rows (a data row followed by a spacer). When a quotation has
//! more items than the block holds, rows are inserted after the block, merged
//! ranges below it are moved down, and the new rows get the styling of the
//! block's last item.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::cell_ref::{CellRange, CellRef};
use super::worksheet::{CellValue, Worksheet};

/// Geometry of the line-item table and the cells placed relative to its last row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableLayout {
    /// First row of the item table
    pub start_row: u32,
    /// Last reserved row of the item table in the unexpanded template
    pub end_row: u32,
    pub rows_per_item: u32,
    /// Offsets below the final table row
    pub total_offset: u32,
    pub words_offset: u32,
    pub signature_offset: u32,
    pub page_break_offset: u32,
}

impl Default for TableLayout {
    fn default() -> Self {
        Self {
            start_row: 31,
            end_row: 50,
            rows_per_item: 2,
            total_offset: 1,
            words_offset: 3,
            signature_offset: 10,
            page_break_offset: 13,
        }
    }
}

impl TableLayout {
    /// Number of items the unexpanded template can hold
    pub fn reserved_slots(&self) -> u32 {
        if self.end_row < self.start_row || self.rows_per_item == 0 {
            return 0;
        }
        (self.end_row - self.start_row + 1) / self.rows_per_item
    }

    /// Rows that must be inserted to fit `item_count` items
    pub fn rows_to_insert(&self, item_count: usize) -> u32 {
        let slots = self.reserved_slots() as usize;
        if item_count <= slots {
            return 0;
        }
        ((item_count - slots) as u32) * self.rows_per_item
    }

    /// First row of the item at `index` (0-based)
    pub fn item_row(&self, index: usize) -> u32 {
        self.start_row + index as u32 * self.rows_per_item
    }

    /// Sanity check used when loading a configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.start_row == 0 {
            anyhow::bail!("Layout error: start_row must be at least 1");
        }
        if self.rows_per_item == 0 {
            anyhow::bail!("Layout error: rows_per_item must be at least 1");
        }
        if self.end_row < self.start_row + self.rows_per_item - 1 {
            anyhow::bail!(
                "Layout error: table rows {}..={} cannot hold a single item of {} rows",
                self.start_row,
                self.end_row,
                self.rows_per_item
            );
        }
        Ok(())
    }
}

/// Outcome of sizing the table for a list of items
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expansion {
    pub inserted_rows: u32,
    /// Last row belonging to the item table after expansion
    pub final_row: u32,
}

/// Structural operations the table expansion needs from a spreadsheet engine
pub trait TableRegion {
    fn merged_ranges(&self) -> Vec<CellRange>;
    fn unmerge(&mut self, range: &CellRange) -> bool;
    fn merge(&mut self, range: CellRange);
    fn insert_rows(&mut self, at: u32, count: u32);
    fn clone_row_style(&mut self, source: u32, dest: u32);
}

/// Everything the populator writes through, on top of the table operations
pub trait TemplateSheet: TableRegion {
    fn set_value(&mut self, cell: CellRef, value: CellValue);
    fn set_row_break(&mut self, after_row: u32);
}

impl TableRegion for Worksheet {
    fn merged_ranges(&self) -> Vec<CellRange> {
        Worksheet::merged_ranges(self).to_vec()
    }

    fn unmerge(&mut self, range: &CellRange) -> bool {
        Worksheet::unmerge(self, range)
    }

    fn merge(&mut self, range: CellRange) {
        Worksheet::merge(self, range)
    }

    fn insert_rows(&mut self, at: u32, count: u32) {
        Worksheet::insert_rows(self, at, count)
    }

    fn clone_row_style(&mut self, source: u32, dest: u32) {
        Worksheet::clone_row_style(self, source, dest)
    }
}

impl TemplateSheet for Worksheet {
    fn set_value(&mut self, cell: CellRef, value: CellValue) {
        Worksheet::set_value(self, cell, value)
    }

    fn set_row_break(&mut self, after_row: u32) {
        Worksheet::set_row_break(self, after_row)
    }
}

/// Unmerge every range whose top row is at or below `from_row`, insert the
/// rows, then merge the same ranges again `rows` further down.
pub fn shift_merges<R: TableRegion + ?Sized>(region: &mut R, from_row: u32, rows: u32) -> usize {
    let to_shift: Vec<CellRange> = region
        .merged_ranges()
        .into_iter()
        .filter(|range| range.top_row() >= from_row)
        .collect();

    for range in &to_shift {
        region.unmerge(range);
    }

    region.insert_rows(from_row, rows);

    for range in &to_shift {
        region.merge(range.shifted_rows(rows));
    }

    to_shift.len()
}

/// Make room for `item_count` items, expanding the table when needed.
///
/// New rows are styled in blocks of `rows_per_item`, each block copying the
/// template's last item block row by row (data row onto data row, spacer onto
/// spacer). Nothing is restyled when no rows were inserted.
pub fn expand_table<R: TableRegion + ?Sized>(
    region: &mut R,
    layout: &TableLayout,
    item_count: usize,
) -> Expansion {
    let rows_to_insert = layout.rows_to_insert(item_count);
    if rows_to_insert == 0 {
        return Expansion {
            inserted_rows: 0,
            final_row: layout.end_row,
        };
    }

    let insertion_point = layout.end_row + 1;
    let shifted = shift_merges(region, insertion_point, rows_to_insert);
    debug!(
        items = item_count,
        slots = layout.reserved_slots(),
        rows = rows_to_insert,
        merges = shifted,
        "Expanded item table"
    );

    let last_block_start = layout.end_row + 1 - layout.rows_per_item;
    for block in (0..rows_to_insert).step_by(layout.rows_per_item as usize) {
        for offset in 0..layout.rows_per_item {
            region.clone_row_style(last_block_start + offset, insertion_point + block + offset);
        }
    }

    Expansion {
        inserted_rows: rows_to_insert,
        final_row: layout.end_row + rows_to_insert,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sheet::worksheet::{Cell, Row};

    fn range(text: &str) -> CellRange {
        CellRange::parse(text).unwrap()
    }

    /// Template-like sheet: styled data/spacer rows 31..=50, a merged footer below
    fn template_sheet() -> Worksheet {
        let mut sheet = Worksheet::new("PO");
        for row in 31..=50 {
            let is_data = (row - 31) % 2 == 0;
            let style = if is_data { 10 } else { 11 };
            let mut r = Row {
                height: Some(if is_data { 18.0 } else { 6.0 }),
                custom_height: true,
                ..Default::default()
            };
            for col in 1..=9 {
                r.cells.insert(
                    col,
                    Cell {
                        style: Some(style),
                        ..Default::default()
                    },
                );
            }
            sheet.rows.insert(row, r);
        }
        sheet.set_value(CellRef::new(51, 9), CellValue::formula("SUM(I31:I50)"));
        sheet.set_value(CellRef::new(53, 5), "words");
        sheet.merge(range("D31:G31")); // inside the table, above the insertion point
        sheet.merge(range("E53:I53"));
        sheet.merge(range("A60:C62"));
        sheet
    }

    #[test]
    fn test_reserved_slots() {
        let layout = TableLayout::default();
        assert_eq!(layout.reserved_slots(), 10);
        assert_eq!(layout.rows_to_insert(0), 0);
        assert_eq!(layout.rows_to_insert(10), 0);
        assert_eq!(layout.rows_to_insert(13), 6);
        assert_eq!(layout.item_row(0), 31);
        assert_eq!(layout.item_row(9), 49);
    }

    #[test]
    fn test_exact_fill_does_not_expand() {
        let layout = TableLayout::default();
        let mut sheet = template_sheet();
        let before = sheet.clone();

        let expansion = expand_table(&mut sheet, &layout, 10);

        assert_eq!(expansion.inserted_rows, 0);
        assert_eq!(expansion.final_row, 50);
        assert_eq!(sheet.rows, before.rows);
        assert_eq!(sheet.merged, before.merged);
    }

    #[test]
    fn test_zero_items() {
        let layout = TableLayout::default();
        let mut sheet = template_sheet();
        let expansion = expand_table(&mut sheet, &layout, 0);
        assert_eq!(expansion.inserted_rows, 0);
        assert_eq!(expansion.final_row, 50);
    }

    #[test]
    fn test_overflow_inserts_rows_and_shifts_merges() {
        let layout = TableLayout::default();
        let mut sheet = template_sheet();

        let expansion = expand_table(&mut sheet, &layout, 13);

        assert_eq!(expansion.inserted_rows, 6);
        assert_eq!(expansion.final_row, 56);

        // Footer content moved with its rows
        assert_eq!(
            sheet.value(CellRef::new(57, 9)).as_formula(),
            Some("SUM(I31:I50)")
        );
        assert_eq!(sheet.value(CellRef::new(59, 5)).as_text(), Some("words"));

        let mut merged = sheet.merged_ranges().to_vec();
        merged.sort();
        assert_eq!(
            merged,
            vec![range("D31:G31"), range("E59:I59"), range("A66:C68")]
        );
    }

    #[test]
    fn test_inserted_rows_clone_last_item_block() {
        let layout = TableLayout::default();
        let mut sheet = template_sheet();

        expand_table(&mut sheet, &layout, 12);

        for row in [51, 53] {
            let r = sheet.row(row).unwrap();
            assert_eq!(r.height, Some(18.0), "row {row} should look like a data row");
            assert!(r.cells.values().all(|c| c.style == Some(10)));
            assert_eq!(r.cells.len(), 9);
        }
        for row in [52, 54] {
            let r = sheet.row(row).unwrap();
            assert_eq!(r.height, Some(6.0), "row {row} should look like a spacer");
            assert!(r.cells.values().all(|c| c.style == Some(11)));
        }
    }

    #[test]
    fn test_shift_merges_counts_moved_ranges() {
        let mut sheet = template_sheet();
        let moved = shift_merges(&mut sheet, 51, 2);
        assert_eq!(moved, 2);
        assert!(sheet.merged_ranges().contains(&range("D31:G31")));
        assert!(sheet.merged_ranges().contains(&range("E55:I55")));
    }

    #[test]
    fn test_layout_validation() {
        assert!(TableLayout::default().validate().is_ok());
        let bad = TableLayout {
            rows_per_item: 0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        let too_small = TableLayout {
            start_row: 31,
            end_row: 31,
            ..Default::default()
        };
        assert!(too_small.validate().is_err());
    }
}
