//! In-memory worksheet model
//!
//! Only what the populator touches is modelled explicitly (values, style
//! indices, row formatting, merges, row breaks). Template cells keep their
//! original XML payload so they are written back exactly as they were read.

use rust_decimal::Decimal;
use std::collections::BTreeMap;

use super::cell_ref::{CellRange, CellRef};

/// Cell content
#[derive(Debug, Clone, PartialEq, Default)]
pub enum CellValue {
    #[default]
    Empty,
    Number(Decimal),
    /// Written as an inline string so the shared string table stays untouched
    Text(String),
    /// Formula without the leading `=`
    Formula(String),
    /// Untouched template content: the `t` attribute and the serialized children
    Raw {
        cell_type: Option<String>,
        inner_xml: String,
    },
}

impl CellValue {
    pub fn text(value: impl Into<String>) -> Self {
        CellValue::Text(value.into())
    }

    /// Formula from either "SUM(A1:A2)" or "=SUM(A1:A2)"
    pub fn formula(value: impl AsRef<str>) -> Self {
        let value = value.as_ref();
        CellValue::Formula(value.strip_prefix('=').unwrap_or(value).to_string())
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, CellValue::Empty)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            CellValue::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<Decimal> {
        match self {
            CellValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_formula(&self) -> Option<&str> {
        match self {
            CellValue::Formula(f) => Some(f),
            _ => None,
        }
    }
}

impl From<Decimal> for CellValue {
    fn from(value: Decimal) -> Self {
        CellValue::Number(value)
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Text(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        CellValue::Text(value)
    }
}

/// A single cell
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Cell {
    /// Index into `cellXfs` (font, border, fill, number format, protection, alignment)
    pub style: Option<u32>,
    pub value: CellValue,
    /// Attributes other than `r`, `s` and `t`, preserved verbatim
    pub extra_attrs: Vec<(String, String)>,
}

/// A row and its formatting
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    pub height: Option<f64>,
    pub custom_height: bool,
    /// Row-level style index, only applied when `custom_format` is set
    pub style: Option<u32>,
    pub custom_format: bool,
    /// Attributes other than `r`, `spans`, `ht`, `customHeight`, `s`, `customFormat`
    pub extra_attrs: Vec<(String, String)>,
    pub cells: BTreeMap<u32, Cell>,
}

impl Row {
    /// Copy height and style from another row, leaving values alone
    pub fn copy_format_from(&mut self, source: &Row) {
        self.height = source.height;
        self.custom_height = source.custom_height;
        self.style = source.style;
        self.custom_format = source.custom_format;

        for (&col, source_cell) in &source.cells {
            if let Some(style) = source_cell.style {
                self.cells.entry(col).or_default().style = Some(style);
            }
        }
    }
}

/// Worksheet contents keyed by 1-based row and column
#[derive(Debug, Clone, Default)]
pub struct Worksheet {
    pub name: String,
    pub rows: BTreeMap<u32, Row>,
    pub merged: Vec<CellRange>,
    /// Manual page breaks; a break after row `n` is stored as `n`
    pub row_breaks: Vec<u32>,
}

impl Worksheet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn row(&self, row: u32) -> Option<&Row> {
        self.rows.get(&row)
    }

    pub fn cell(&self, cell: CellRef) -> Option<&Cell> {
        self.rows.get(&cell.row)?.cells.get(&cell.col)
    }

    /// Value at `cell`, `Empty` when the cell does not exist
    pub fn value(&self, cell: CellRef) -> &CellValue {
        static EMPTY: CellValue = CellValue::Empty;
        self.cell(cell).map(|c| &c.value).unwrap_or(&EMPTY)
    }

    /// Set a value, keeping the cell's existing style
    pub fn set_value(&mut self, cell: CellRef, value: impl Into<CellValue>) {
        let target = self
            .rows
            .entry(cell.row)
            .or_default()
            .cells
            .entry(cell.col)
            .or_default();
        target.value = value.into();
    }

    pub fn merged_ranges(&self) -> &[CellRange] {
        &self.merged
    }

    pub fn merge(&mut self, range: CellRange) {
        if !self.merged.contains(&range) {
            self.merged.push(range);
        }
    }

    /// Remove a merge; returns false if the range was not merged
    pub fn unmerge(&mut self, range: &CellRange) -> bool {
        let before = self.merged.len();
        self.merged.retain(|r| r != range);
        self.merged.len() != before
    }

    pub fn row_breaks(&self) -> &[u32] {
        &self.row_breaks
    }

    /// Replace all manual row breaks with a single one after `row`
    pub fn set_row_break(&mut self, row: u32) {
        self.row_breaks = vec![row];
    }

    /// Insert `count` blank rows before `at`; rows at or below `at` move down.
    ///
    /// Only rows move. Merges, formulas and breaks are left for the caller.
    pub fn insert_rows(&mut self, at: u32, count: u32) {
        if count == 0 {
            return;
        }
        let moved = self.rows.split_off(&at);
        for (row_num, row) in moved {
            self.rows.insert(row_num + count, row);
        }
    }

    /// Copy row height and every cell style from `source` onto `dest`
    pub fn clone_row_style(&mut self, source: u32, dest: u32) {
        let Some(source_row) = self.rows.get(&source).cloned() else {
            return;
        };
        self.rows.entry(dest).or_default().copy_format_from(&source_row);
    }

    /// Bounding range of all cells, `None` for an empty sheet
    pub fn dimension(&self) -> Option<CellRange> {
        let mut min_row = u32::MAX;
        let mut max_row = 0;
        let mut min_col = u32::MAX;
        let mut max_col = 0;

        for (&row_num, row) in &self.rows {
            for &col in row.cells.keys() {
                min_row = min_row.min(row_num);
                max_row = max_row.max(row_num);
                min_col = min_col.min(col);
                max_col = max_col.max(col);
            }
        }

        if max_row == 0 {
            return None;
        }

        Some(CellRange::new(
            CellRef::new(min_row, min_col),
            CellRef::new(max_row, max_col),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(text: &str) -> CellRef {
        CellRef::parse(text).unwrap()
    }

    #[test]
    fn test_set_value_keeps_style() {
        let mut sheet = Worksheet::new("PO");
        sheet
            .rows
            .entry(8)
            .or_default()
            .cells
            .insert(5, Cell {
                style: Some(7),
                ..Default::default()
            });

        sheet.set_value(cell("E8"), "P-250719-001M");

        let written = sheet.cell(cell("E8")).unwrap();
        assert_eq!(written.style, Some(7));
        assert_eq!(written.value.as_text(), Some("P-250719-001M"));
    }

    #[test]
    fn test_insert_rows_moves_following_rows() {
        let mut sheet = Worksheet::new("PO");
        sheet.set_value(cell("A10"), "above");
        sheet.set_value(cell("A11"), "at");
        sheet.set_value(cell("A20"), "below");

        sheet.insert_rows(11, 4);

        assert_eq!(sheet.value(cell("A10")).as_text(), Some("above"));
        assert!(sheet.value(cell("A11")).is_empty());
        assert_eq!(sheet.value(cell("A15")).as_text(), Some("at"));
        assert_eq!(sheet.value(cell("A24")).as_text(), Some("below"));
    }

    #[test]
    fn test_clone_row_style() {
        let mut sheet = Worksheet::new("PO");
        let source = Row {
            height: Some(21.75),
            custom_height: true,
            cells: BTreeMap::from([
                (
                    1,
                    Cell {
                        style: Some(3),
                        value: CellValue::text("kept in source"),
                        ..Default::default()
                    },
                ),
                (
                    9,
                    Cell {
                        style: Some(4),
                        ..Default::default()
                    },
                ),
            ]),
            ..Default::default()
        };
        sheet.rows.insert(49, source);

        sheet.clone_row_style(49, 51);

        let dest = sheet.row(51).unwrap();
        assert_eq!(dest.height, Some(21.75));
        assert!(dest.custom_height);
        assert_eq!(dest.cells[&1].style, Some(3));
        assert!(dest.cells[&1].value.is_empty());
        assert_eq!(dest.cells[&9].style, Some(4));
    }

    #[test]
    fn test_merge_and_unmerge() {
        let mut sheet = Worksheet::new("PO");
        let range = CellRange::parse("D31:G31").unwrap();
        sheet.merge(range);
        sheet.merge(range);
        assert_eq!(sheet.merged_ranges().len(), 1);
        assert!(sheet.unmerge(&range));
        assert!(!sheet.unmerge(&range));
    }

    #[test]
    fn test_dimension() {
        let mut sheet = Worksheet::new("PO");
        assert_eq!(sheet.dimension(), None);
        sheet.set_value(cell("B9"), "x");
        sheet.set_value(cell("I51"), "y");
        assert_eq!(sheet.dimension().unwrap().to_string(), "B9:I51");
    }
}
