//! A1-style cell references and ranges
//!
//! Rows and columns are 1-based here, matching the `r` attributes in the
//! worksheet XML, so a reference can be written back without conversion.

use std::fmt;
use std::str::FromStr;

/// Single cell position (e.g. `I31`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CellRef {
    pub row: u32,
    pub col: u32,
}

impl CellRef {
    pub fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }

    /// Parse a reference like "AB10"; `$` markers are ignored
    pub fn parse(cell_ref: &str) -> Option<Self> {
        let mut col = 0u32;
        let mut row_str = String::new();

        for ch in cell_ref.chars() {
            if ch == '$' {
                continue;
            } else if ch.is_ascii_alphabetic() {
                if !row_str.is_empty() {
                    return None;
                }
                col = col
                    .checked_mul(26)?
                    .checked_add(ch.to_ascii_uppercase() as u32 - 'A' as u32 + 1)?;
            } else if ch.is_ascii_digit() {
                row_str.push(ch);
            } else {
                return None;
            }
        }

        if row_str.is_empty() || col == 0 {
            return None;
        }

        let row = row_str.parse::<u32>().ok()?;
        if row == 0 {
            return None;
        }

        Some(Self { row, col })
    }

    /// Same cell `rows` further down
    pub fn shifted_rows(self, rows: u32) -> Self {
        Self {
            row: self.row + rows,
            col: self.col,
        }
    }
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", column_letters(self.col), self.row)
    }
}

impl FromStr for CellRef {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| anyhow::anyhow!("Invalid cell reference: {}", s))
    }
}

/// Convert a 1-based column number to letters (1 -> A, 27 -> AA)
pub fn column_letters(col: u32) -> String {
    let mut result = String::new();
    let mut n = col;
    while n > 0 {
        let rem = (n - 1) % 26;
        result.insert(0, (b'A' + rem as u8) as char);
        n = (n - 1) / 26;
    }
    result
}

/// Rectangular range of cells (e.g. `D31:G31`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CellRange {
    pub start: CellRef,
    pub end: CellRef,
}

impl CellRange {
    pub fn new(start: CellRef, end: CellRef) -> Self {
        Self { start, end }
    }

    /// Parse "A1:B2"; a single reference is a one-cell range
    pub fn parse(range: &str) -> Option<Self> {
        match range.split_once(':') {
            Some((start, end)) => Some(Self {
                start: CellRef::parse(start)?,
                end: CellRef::parse(end)?,
            }),
            None => {
                let cell = CellRef::parse(range)?;
                Some(Self {
                    start: cell,
                    end: cell,
                })
            }
        }
    }

    pub fn top_row(&self) -> u32 {
        self.start.row.min(self.end.row)
    }

    pub fn contains(&self, cell: CellRef) -> bool {
        let (top, bottom) = (self.start.row.min(self.end.row), self.start.row.max(self.end.row));
        let (left, right) = (self.start.col.min(self.end.col), self.start.col.max(self.end.col));
        (top..=bottom).contains(&cell.row) && (left..=right).contains(&cell.col)
    }

    /// Same shape, moved `rows` down; columns are untouched
    pub fn shifted_rows(self, rows: u32) -> Self {
        Self {
            start: self.start.shifted_rows(rows),
            end: self.end.shifted_rows(rows),
        }
    }
}

impl fmt::Display for CellRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.start, self.end)
    }
}

impl FromStr for CellRange {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| anyhow::anyhow!("Invalid cell range: {}", s))
    }
}
