//! XML parsing for the parts of an XLSX package the populator needs

use anyhow::{Context, Result};
use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::escape::unescape;
use quick_xml::events::{BytesStart, Event};
use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::sync::OnceLock;
use tracing::{debug, warn};

use super::cell_ref::{CellRange, CellRef, column_letters};
use super::worksheet::{Cell, CellValue, Row, Worksheet};

/// Sheet entry from `xl/workbook.xml`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetEntry {
    pub name: String,
    pub rel_id: String,
}

/// Sheets in workbook order plus the index of the active tab
pub fn parse_workbook_sheets(workbook_xml: &str) -> Result<(Vec<SheetEntry>, usize)> {
    let mut reader = Reader::from_str(workbook_xml);
    reader.config_mut().trim_text(true);

    let mut sheets = Vec::new();
    let mut active_tab = 0usize;

    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) => match e.local_name().as_ref() {
                b"sheet" => {
                    let mut name = String::new();
                    let mut rel_id = String::new();
                    for attr in e.attributes().flatten() {
                        match attr.key.as_ref() {
                            b"name" => name = attr.unescape_value()?.to_string(),
                            b"r:id" => rel_id = attr.unescape_value()?.to_string(),
                            _ => {}
                        }
                    }
                    sheets.push(SheetEntry { name, rel_id });
                }
                b"workbookView" => {
                    for attr in e.attributes().flatten() {
                        if attr.key.as_ref() == b"activeTab" {
                            active_tab = attr.unescape_value()?.parse().unwrap_or(0);
                        }
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    Ok((sheets, active_tab))
}

/// Resolve a relationship id to a package path using `xl/_rels/workbook.xml.rels`
pub fn resolve_relationship(rels_xml: &str, rel_id: &str) -> Result<String> {
    let mut reader = Reader::from_str(rels_xml);
    reader.config_mut().trim_text(true);

    let mut target = String::new();
    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) => {
                if e.local_name().as_ref() == b"Relationship" {
                    let mut id = String::new();
                    let mut t = String::new();
                    for attr in e.attributes().flatten() {
                        match attr.key.as_ref() {
                            b"Id" => id = attr.unescape_value()?.to_string(),
                            b"Target" => t = attr.unescape_value()?.to_string(),
                            _ => {}
                        }
                    }
                    if id == rel_id {
                        target = t;
                        break;
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if target.is_empty() {
        anyhow::bail!("Relationship '{}' not found in workbook relationships", rel_id);
    }

    // Targets are relative to `xl/` unless absolute within the package
    if let Some(absolute) = target.strip_prefix('/') {
        Ok(absolute.to_string())
    } else {
        Ok(format!("xl/{}", target))
    }
}

/// Parse worksheet XML into the in-memory model
pub fn parse_worksheet(name: &str, sheet_xml: &str) -> Result<Worksheet> {
    let mut sheet = Worksheet::new(name);
    let mut reader = Reader::from_str(sheet_xml);

    let mut current_row = 0u32;
    let mut current_col = 0u32;
    let mut in_row_breaks = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"row" => {
                    current_row = parse_row(&e, current_row, &mut sheet)?;
                    current_col = 0;
                }
                b"c" => {
                    let (cell_ref, cell_type, mut cell) = parse_cell_start(&e, current_row, current_col)?;
                    let inner_xml = read_inner_xml(&mut reader)
                        .with_context(|| format!("Failed to read cell {}", cell_ref))?;
                    if !inner_xml.trim().is_empty() || cell_type.is_some() {
                        cell.value = CellValue::Raw {
                            cell_type,
                            inner_xml,
                        };
                    }
                    current_col = cell_ref.col;
                    insert_cell(&mut sheet, cell_ref, cell);
                }
                b"mergeCell" => push_merge(&e, &mut sheet)?,
                b"rowBreaks" => in_row_breaks = true,
                b"brk" if in_row_breaks => push_break(&e, &mut sheet)?,
                _ => {}
            },
            Event::Empty(e) => match e.local_name().as_ref() {
                b"row" => {
                    current_row = parse_row(&e, current_row, &mut sheet)?;
                    current_col = 0;
                }
                b"c" => {
                    let (cell_ref, _, cell) = parse_cell_start(&e, current_row, current_col)?;
                    current_col = cell_ref.col;
                    insert_cell(&mut sheet, cell_ref, cell);
                }
                b"mergeCell" => push_merge(&e, &mut sheet)?,
                b"brk" if in_row_breaks => push_break(&e, &mut sheet)?,
                _ => {}
            },
            Event::End(e) => {
                if e.local_name().as_ref() == b"rowBreaks" {
                    in_row_breaks = false;
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    expand_shared_formulas(&mut sheet)?;
    Ok(sheet)
}

/// `<f t="shared">` content of a template cell
struct SharedFormula {
    si: u32,
    range: Option<CellRange>,
    /// Only the group's master cell carries the formula text
    text: Option<String>,
}

fn shared_formula(inner_xml: &str) -> Result<Option<SharedFormula>> {
    let mut reader = Reader::from_str(inner_xml);

    loop {
        let (e, has_text) = match reader.read_event()? {
            Event::Start(e) if e.local_name().as_ref() == b"f" => (e, true),
            Event::Empty(e) if e.local_name().as_ref() == b"f" => (e, false),
            Event::Eof => return Ok(None),
            _ => continue,
        };

        let mut is_shared = false;
        let mut si = None;
        let mut range = None;
        for attr in e.attributes() {
            let attr = attr?;
            match attr.key.as_ref() {
                b"t" => is_shared = attr.value.as_ref() == b"shared",
                b"si" => si = attr.unescape_value()?.parse::<u32>().ok(),
                b"ref" => range = CellRange::parse(&attr.unescape_value()?),
                _ => {}
            }
        }

        let (true, Some(si)) = (is_shared, si) else {
            return Ok(None);
        };

        let text = if has_text {
            let raw = reader.read_text(e.to_end().name())?;
            Some(unescape(raw.trim())?.into_owned()).filter(|text| !text.is_empty())
        } else {
            None
        };
        return Ok(Some(SharedFormula { si, range, text }));
    }
}

/// Replace every shared-formula cell with a plain formula of its own.
///
/// Row insertion and overwriting the group's master cell would otherwise
/// leave dependents pointing at a master or range that no longer matches.
fn expand_shared_formulas(sheet: &mut Worksheet) -> Result<()> {
    let mut shared = Vec::new();
    for (&row, r) in &sheet.rows {
        for (&col, cell) in &r.cells {
            if let CellValue::Raw { inner_xml, .. } = &cell.value {
                if let Some(formula) = shared_formula(inner_xml)? {
                    shared.push((CellRef::new(row, col), formula));
                }
            }
        }
    }
    if shared.is_empty() {
        return Ok(());
    }

    let mut masters: BTreeMap<u32, Vec<(CellRef, &str, Option<CellRange>)>> = BTreeMap::new();
    for (cell, formula) in &shared {
        if let Some(text) = &formula.text {
            masters
                .entry(formula.si)
                .or_default()
                .push((*cell, text.as_str(), formula.range));
        }
    }

    let mut expanded = Vec::with_capacity(shared.len());
    for (cell, formula) in &shared {
        let Some(defs) = masters.get(&formula.si) else {
            warn!(cell = %cell, si = formula.si, "Shared formula without a master cell, clearing it");
            expanded.push((*cell, CellValue::Empty));
            continue;
        };
        let def = defs
            .iter()
            .find(|(_, _, range)| range.is_some_and(|r| r.contains(*cell)))
            .or_else(|| defs.last());
        if let Some((master, text, _)) = def {
            let row_shift = i64::from(cell.row) - i64::from(master.row);
            let col_shift = i64::from(cell.col) - i64::from(master.col);
            let text = translate_shared_formula(text, row_shift, col_shift);
            expanded.push((*cell, CellValue::formula(text)));
        }
    }

    debug!(cells = expanded.len(), "Expanded shared formulas");
    for (cell, value) in expanded {
        sheet.set_value(cell, value);
    }
    Ok(())
}

fn cell_reference_pattern() -> &'static Regex {
    static CELL_REFERENCE: OnceLock<Regex> = OnceLock::new();
    CELL_REFERENCE.get_or_init(|| {
        Regex::new(r"(?P<sheet>(?:'[^']+'|[A-Za-z0-9_.\-]+)!)?(?P<col_abs>\$?)(?P<col>[A-Z]{1,3})(?P<row_abs>\$?)(?P<row>[0-9]+)")
            .unwrap()
    })
}

/// Move the relative references of a formula by the given offsets.
///
/// Absolute parts (`$A`, `$1`) stay put. Matches glued to a longer name or
/// followed by `(` are functions such as `LOG10`, not references.
pub fn translate_shared_formula(formula: &str, row_shift: i64, col_shift: i64) -> String {
    let is_name_char = |c: char| c.is_ascii_alphanumeric() || c == '_' || c == '.';

    cell_reference_pattern()
        .replace_all(formula, |caps: &Captures| {
            let whole = &caps[0];
            let (start, end) = caps.get(0).map_or((0, 0), |m| (m.start(), m.end()));
            let before = formula[..start].chars().next_back();
            let after = formula[end..].chars().next();
            if before.is_some_and(is_name_char) || after.is_some_and(|c| c == '(' || is_name_char(c)) {
                return whole.to_string();
            }
            let Some(cell) = CellRef::parse(whole.rsplit('!').next().unwrap_or(whole)) else {
                return whole.to_string();
            };

            let col_abs = !caps["col_abs"].is_empty();
            let row_abs = !caps["row_abs"].is_empty();
            let shift = |value: u32, by: i64, absolute: bool| {
                if absolute {
                    value
                } else {
                    u32::try_from((i64::from(value) + by).max(1)).unwrap_or(value)
                }
            };

            format!(
                "{}{}{}{}{}",
                caps.name("sheet").map_or("", |m| m.as_str()),
                if col_abs { "$" } else { "" },
                column_letters(shift(cell.col, col_shift, col_abs)),
                if row_abs { "$" } else { "" },
                shift(cell.row, row_shift, row_abs),
            )
        })
        .into_owned()
}

fn parse_row(e: &BytesStart, previous_row: u32, sheet: &mut Worksheet) -> Result<u32> {
    let mut row_num = previous_row + 1;
    let mut row = Row::default();

    for attr in e.attributes() {
        let attr = attr?;
        let value = attr.unescape_value()?;
        match attr.key.as_ref() {
            b"r" => row_num = value.parse()?,
            // Recomputed by spreadsheet applications; stale after row moves
            b"spans" => {}
            b"ht" => row.height = Some(value.parse()?),
            b"customHeight" => row.custom_height = is_true(&value),
            b"s" => row.style = Some(value.parse()?),
            b"customFormat" => row.custom_format = is_true(&value),
            key => row
                .extra_attrs
                .push((String::from_utf8(key.to_vec())?, value.into_owned())),
        }
    }

    sheet.rows.insert(row_num, row);
    Ok(row_num)
}

fn parse_cell_start(
    e: &BytesStart,
    current_row: u32,
    current_col: u32,
) -> Result<(CellRef, Option<String>, Cell)> {
    let mut cell_ref = CellRef::new(current_row, current_col + 1);
    let mut cell_type = None;
    let mut cell = Cell::default();

    for attr in e.attributes() {
        let attr = attr?;
        let value = attr.unescape_value()?;
        match attr.key.as_ref() {
            b"r" => {
                cell_ref = CellRef::parse(&value)
                    .ok_or_else(|| anyhow::anyhow!("Invalid cell reference '{}'", value))?;
            }
            b"s" => cell.style = Some(value.parse()?),
            b"t" => cell_type = Some(value.into_owned()),
            key => cell
                .extra_attrs
                .push((String::from_utf8(key.to_vec())?, value.into_owned())),
        }
    }

    Ok((cell_ref, cell_type, cell))
}

fn insert_cell(sheet: &mut Worksheet, cell_ref: CellRef, cell: Cell) {
    sheet
        .rows
        .entry(cell_ref.row)
        .or_default()
        .cells
        .insert(cell_ref.col, cell);
}

fn push_merge(e: &BytesStart, sheet: &mut Worksheet) -> Result<()> {
    for attr in e.attributes().flatten() {
        if attr.key.as_ref() == b"ref" {
            let ref_str = attr.unescape_value()?;
            if let Some(range) = CellRange::parse(&ref_str) {
                sheet.merged.push(range);
            }
        }
    }
    Ok(())
}

fn push_break(e: &BytesStart, sheet: &mut Worksheet) -> Result<()> {
    for attr in e.attributes().flatten() {
        if attr.key.as_ref() == b"id" {
            sheet.row_breaks.push(attr.unescape_value()?.parse()?);
        }
    }
    Ok(())
}

fn is_true(value: &str) -> bool {
    value == "1" || value == "true"
}

/// Serialize everything up to the end tag of the element just opened
fn read_inner_xml(reader: &mut Reader<&[u8]>) -> Result<String> {
    let mut writer = Writer::new(Vec::new());
    let mut depth = 0usize;

    loop {
        match reader.read_event()? {
            Event::End(e) => {
                if depth == 0 {
                    break;
                }
                depth -= 1;
                writer.write_event(Event::End(e))?;
            }
            Event::Start(e) => {
                depth += 1;
                writer.write_event(Event::Start(e))?;
            }
            Event::Eof => anyhow::bail!("Unexpected end of worksheet XML"),
            event => writer.write_event(event)?,
        }
    }

    Ok(String::from_utf8(writer.into_inner())?)
}
