//! XLSX writer: re-serializes the populated worksheet into a copy of the template package

use anyhow::{Context, Result};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::borrow::Cow;
use std::io::{Cursor, Seek, Write};
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use super::cell_ref::{CellRange, CellRef};
use super::worksheet::{Cell, CellValue, Worksheet};

pub const CALC_CHAIN_PATH: &str = "xl/calcChain.xml";
const CONTENT_TYPES_PATH: &str = "[Content_Types].xml";
const WORKBOOK_PATH: &str = "xl/workbook.xml";
const WORKBOOK_RELS_PATH: &str = "xl/_rels/workbook.xml.rels";

/// Top-level worksheet children in schema order
const WORKSHEET_CHILD_ORDER: &[&str] = &[
    "sheetPr",
    "dimension",
    "sheetViews",
    "sheetFormatPr",
    "cols",
    "sheetData",
    "sheetCalcPr",
    "sheetProtection",
    "protectedRanges",
    "scenarios",
    "autoFilter",
    "sortState",
    "dataConsolidate",
    "customSheetViews",
    "mergeCells",
    "phoneticPr",
    "conditionalFormatting",
    "dataValidations",
    "hyperlinks",
    "printOptions",
    "pageMargins",
    "pageSetup",
    "headerFooter",
    "rowBreaks",
    "colBreaks",
    "customProperties",
    "cellWatches",
    "ignoredErrors",
    "smartTags",
    "drawing",
    "legacyDrawing",
    "legacyDrawingHF",
    "drawingHF",
    "picture",
    "oleObjects",
    "controls",
    "webPublishItems",
    "tableParts",
    "extLst",
];

/// Workbook children that must follow `calcPr`
const WORKBOOK_AFTER_CALC_PR: &[&str] = &[
    "oleSize",
    "customWorkbookViews",
    "pivotCaches",
    "smartTagPr",
    "smartTagTypes",
    "webPublishing",
    "fileRecoveryPr",
    "webPublishObjects",
    "extLst",
];

fn child_rank(name: &[u8]) -> Option<usize> {
    WORKSHEET_CHILD_ORDER
        .iter()
        .position(|child| child.as_bytes() == name)
}

/// Copy every package entry to `writer`, swapping in the rendered worksheet.
///
/// The calculation chain is dropped together with its content type and
/// relationship, and the workbook is flagged for a full recalculation on open.
pub fn write_package<W: Write + Seek>(
    entries: &[(String, Vec<u8>)],
    sheet_path: &str,
    sheet_xml: &str,
    writer: W,
) -> Result<()> {
    let mut zip_writer = ZipWriter::new(writer);
    let options = SimpleFileOptions::default();

    for (name, data) in entries {
        if name == CALC_CHAIN_PATH {
            continue;
        }

        let content = if name == sheet_path {
            sheet_xml.as_bytes().to_vec()
        } else if name == CONTENT_TYPES_PATH {
            remove_calc_chain_content_type(std::str::from_utf8(data)?)?.into_bytes()
        } else if name == WORKBOOK_RELS_PATH {
            remove_calc_chain_relationship(std::str::from_utf8(data)?)?.into_bytes()
        } else if name == WORKBOOK_PATH {
            force_full_calc_on_load(std::str::from_utf8(data)?)?.into_bytes()
        } else {
            data.clone()
        };

        zip_writer.start_file(name.as_str(), options)?;
        zip_writer
            .write_all(&content)
            .with_context(|| format!("Failed to write {}", name))?;
    }

    zip_writer.finish()?;
    Ok(())
}

/// Regenerate the worksheet XML from the model, keeping every part of the
/// original that the model does not own (views, columns, page setup, drawings)
pub fn render_worksheet(original_xml: &str, sheet: &Worksheet) -> Result<String> {
    let mut reader = Reader::from_str(original_xml);
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    let mut pending = PendingParts::default();
    let mut depth = 0usize;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                if depth == 1 {
                    let name = e.local_name();
                    pending.flush_before(name.as_ref(), sheet, &mut writer)?;
                    if pending.replace(name.as_ref(), sheet, &mut writer)? {
                        skip_element(&mut reader)?;
                        continue;
                    }
                }
                depth += 1;
                writer.write_event(Event::Start(e))?;
            }
            Event::Empty(e) => {
                if depth == 1 {
                    let name = e.local_name();
                    pending.flush_before(name.as_ref(), sheet, &mut writer)?;
                    if pending.replace(name.as_ref(), sheet, &mut writer)? {
                        continue;
                    }
                }
                writer.write_event(Event::Empty(e))?;
            }
            Event::End(e) => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    pending.flush_all(sheet, &mut writer)?;
                }
                writer.write_event(Event::End(e))?;
            }
            Event::Eof => break,
            e => writer.write_event(e)?,
        }
    }

    let result = writer.into_inner().into_inner();
    Ok(String::from_utf8(result)?)
}

/// Tracks which model-owned parts have been written
#[derive(Default)]
struct PendingParts {
    sheet_data: bool,
    merge_cells: bool,
    row_breaks: bool,
}

impl PendingParts {
    /// Write the part in place of the template element named `name`.
    /// Returns false when the element is not model-owned.
    fn replace<W: Write>(
        &mut self,
        name: &[u8],
        sheet: &Worksheet,
        writer: &mut Writer<W>,
    ) -> Result<bool> {
        match name {
            b"dimension" => {
                if let Some(range) = sheet.dimension() {
                    let mut el = BytesStart::new("dimension");
                    el.push_attribute(("ref", range.to_string().as_str()));
                    writer.write_event(Event::Empty(el))?;
                }
            }
            b"sheetData" => {
                write_sheet_data(writer, sheet)?;
                self.sheet_data = true;
            }
            b"mergeCells" => {
                write_merge_cells(writer, &sheet.merged)?;
                self.merge_cells = true;
            }
            b"rowBreaks" => {
                write_row_breaks(writer, &sheet.row_breaks)?;
                self.row_breaks = true;
            }
            _ => return Ok(false),
        }
        Ok(true)
    }

    /// Emit parts the template lacks once an element ranked after them appears
    fn flush_before<W: Write>(
        &mut self,
        name: &[u8],
        sheet: &Worksheet,
        writer: &mut Writer<W>,
    ) -> Result<()> {
        let Some(rank) = child_rank(name) else {
            return Ok(());
        };
        if !self.sheet_data && child_rank(b"sheetData").is_some_and(|r| rank > r) {
            write_sheet_data(writer, sheet)?;
            self.sheet_data = true;
        }
        if !self.merge_cells && child_rank(b"mergeCells").is_some_and(|r| rank > r) {
            write_merge_cells(writer, &sheet.merged)?;
            self.merge_cells = true;
        }
        if !self.row_breaks && child_rank(b"rowBreaks").is_some_and(|r| rank > r) {
            write_row_breaks(writer, &sheet.row_breaks)?;
            self.row_breaks = true;
        }
        Ok(())
    }

    fn flush_all<W: Write>(&mut self, sheet: &Worksheet, writer: &mut Writer<W>) -> Result<()> {
        if !self.sheet_data {
            write_sheet_data(writer, sheet)?;
            self.sheet_data = true;
        }
        if !self.merge_cells {
            write_merge_cells(writer, &sheet.merged)?;
            self.merge_cells = true;
        }
        if !self.row_breaks {
            write_row_breaks(writer, &sheet.row_breaks)?;
            self.row_breaks = true;
        }
        Ok(())
    }
}

/// Consume events up to and including the end tag of the element just opened
fn skip_element(reader: &mut Reader<&[u8]>) -> Result<()> {
    let mut depth = 0usize;
    loop {
        match reader.read_event()? {
            Event::Start(_) => depth += 1,
            Event::End(_) => {
                if depth == 0 {
                    return Ok(());
                }
                depth -= 1;
            }
            Event::Eof => anyhow::bail!("Unexpected end of worksheet XML"),
            _ => {}
        }
    }
}

fn write_sheet_data<W: Write>(writer: &mut Writer<W>, sheet: &Worksheet) -> Result<()> {
    writer.write_event(Event::Start(BytesStart::new("sheetData")))?;

    for (&row_num, row) in &sheet.rows {
        let mut el = BytesStart::new("row");
        el.push_attribute(("r", row_num.to_string().as_str()));
        if let Some(style) = row.style {
            el.push_attribute(("s", style.to_string().as_str()));
        }
        if row.custom_format {
            el.push_attribute(("customFormat", "1"));
        }
        if let Some(height) = row.height {
            el.push_attribute(("ht", height.to_string().as_str()));
        }
        if row.custom_height {
            el.push_attribute(("customHeight", "1"));
        }
        for (key, value) in &row.extra_attrs {
            el.push_attribute((key.as_str(), value.as_str()));
        }

        if row.cells.is_empty() {
            writer.write_event(Event::Empty(el))?;
            continue;
        }

        writer.write_event(Event::Start(el))?;
        for (&col, cell) in &row.cells {
            write_cell(writer, CellRef::new(row_num, col), cell)?;
        }
        writer.write_event(Event::End(BytesEnd::new("row")))?;
    }

    writer.write_event(Event::End(BytesEnd::new("sheetData")))?;
    Ok(())
}

fn write_cell<W: Write>(writer: &mut Writer<W>, cell_ref: CellRef, cell: &Cell) -> Result<()> {
    let mut el = BytesStart::new("c");
    el.push_attribute(("r", cell_ref.to_string().as_str()));
    if let Some(style) = cell.style {
        el.push_attribute(("s", style.to_string().as_str()));
    }
    match &cell.value {
        CellValue::Text(_) => el.push_attribute(("t", "inlineStr")),
        CellValue::Raw {
            cell_type: Some(t), ..
        } => el.push_attribute(("t", t.as_str())),
        _ => {}
    }
    for (key, value) in &cell.extra_attrs {
        el.push_attribute((key.as_str(), value.as_str()));
    }

    match &cell.value {
        CellValue::Empty => {
            writer.write_event(Event::Empty(el))?;
        }
        CellValue::Number(n) => {
            writer.write_event(Event::Start(el))?;
            write_text_element(writer, "v", &n.normalize().to_string(), false)?;
            writer.write_event(Event::End(BytesEnd::new("c")))?;
        }
        CellValue::Text(text) => {
            writer.write_event(Event::Start(el))?;
            writer.write_event(Event::Start(BytesStart::new("is")))?;
            write_text_element(writer, "t", &escape_cell_text(text), true)?;
            writer.write_event(Event::End(BytesEnd::new("is")))?;
            writer.write_event(Event::End(BytesEnd::new("c")))?;
        }
        CellValue::Formula(formula) => {
            writer.write_event(Event::Start(el))?;
            let formula: String = formula.chars().filter(|&c| is_xml_char(c)).collect();
            write_text_element(writer, "f", &formula, false)?;
            writer.write_event(Event::End(BytesEnd::new("c")))?;
        }
        CellValue::Raw { inner_xml, .. } => {
            if inner_xml.is_empty() {
                writer.write_event(Event::Empty(el))?;
            } else {
                writer.write_event(Event::Start(el))?;
                writer.get_mut().write_all(inner_xml.as_bytes())?;
                writer.write_event(Event::End(BytesEnd::new("c")))?;
            }
        }
    }
    Ok(())
}

/// Characters allowed in XML 1.0 documents
fn is_xml_char(c: char) -> bool {
    matches!(c,
        '\t' | '\n' | '\r'
        | '\u{20}'..='\u{D7FF}'
        | '\u{E000}'..='\u{FFFD}'
        | '\u{10000}'..='\u{10FFFF}')
}

/// Encode characters XML cannot carry as `_xHHHH_`, the way spreadsheet
/// applications store them. A literal `_xHHHH_` in the text gets its
/// underscore escaped so it reads back unchanged.
pub fn escape_cell_text(text: &str) -> Cow<'_, str> {
    let looks_escaped = |rest: &str| {
        let bytes = rest.as_bytes();
        bytes.len() >= 7
            && bytes[1] == b'x'
            && bytes[2..6].iter().all(u8::is_ascii_hexdigit)
            && bytes[6] == b'_'
    };

    if text.chars().all(is_xml_char) && !text.contains("_x") {
        return Cow::Borrowed(text);
    }

    let mut escaped = String::with_capacity(text.len() + 8);
    for (i, ch) in text.char_indices() {
        if ch == '_' && looks_escaped(&text[i..]) {
            escaped.push_str("_x005F_");
        } else if is_xml_char(ch) {
            escaped.push(ch);
        } else {
            escaped.push_str(&format!("_x{:04X}_", u32::from(ch)));
        }
    }
    Cow::Owned(escaped)
}

fn write_text_element<W: Write>(
    writer: &mut Writer<W>,
    tag: &str,
    text: &str,
    preserve_space: bool,
) -> Result<()> {
    let mut el = BytesStart::new(tag);
    if preserve_space {
        el.push_attribute(("xml:space", "preserve"));
    }
    writer.write_event(Event::Start(el))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(BytesEnd::new(tag)))?;
    Ok(())
}

fn write_merge_cells<W: Write>(writer: &mut Writer<W>, merged: &[CellRange]) -> Result<()> {
    if merged.is_empty() {
        return Ok(());
    }
    let mut el = BytesStart::new("mergeCells");
    el.push_attribute(("count", merged.len().to_string().as_str()));
    writer.write_event(Event::Start(el))?;
    for range in merged {
        let mut cell = BytesStart::new("mergeCell");
        cell.push_attribute(("ref", range.to_string().as_str()));
        writer.write_event(Event::Empty(cell))?;
    }
    writer.write_event(Event::End(BytesEnd::new("mergeCells")))?;
    Ok(())
}

fn write_row_breaks<W: Write>(writer: &mut Writer<W>, breaks: &[u32]) -> Result<()> {
    let mut rows = breaks.to_vec();
    rows.sort_unstable();
    rows.dedup();
    if rows.is_empty() {
        return Ok(());
    }

    let count = rows.len().to_string();
    let mut el = BytesStart::new("rowBreaks");
    el.push_attribute(("count", count.as_str()));
    el.push_attribute(("manualBreakCount", count.as_str()));
    writer.write_event(Event::Start(el))?;
    for row in rows {
        let mut brk = BytesStart::new("brk");
        brk.push_attribute(("id", row.to_string().as_str()));
        brk.push_attribute(("max", "16383"));
        brk.push_attribute(("man", "1"));
        writer.write_event(Event::Empty(brk))?;
    }
    writer.write_event(Event::End(BytesEnd::new("rowBreaks")))?;
    Ok(())
}

fn remove_calc_chain_content_type(xml: &str) -> Result<String> {
    let mut reader = Reader::from_str(xml);
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"Override" => {
                let mut part_name = String::new();
                for attr in e.attributes() {
                    let attr = attr?;
                    if attr.key.as_ref() == b"PartName" {
                        part_name = String::from_utf8(attr.value.to_vec())?;
                        break;
                    }
                }

                if part_name.trim_start_matches('/') != CALC_CHAIN_PATH {
                    writer.write_event(Event::Empty(e))?;
                }
            }
            Ok(Event::Eof) => break,
            Ok(e) => writer.write_event(e)?,
            Err(e) => return Err(anyhow::anyhow!("Error parsing XML: {}", e)),
        }
        buf.clear();
    }

    let result = writer.into_inner().into_inner();
    Ok(String::from_utf8(result)?)
}

fn remove_calc_chain_relationship(xml: &str) -> Result<String> {
    let mut reader = Reader::from_str(xml);
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"Relationship" => {
                let mut target = String::new();
                for attr in e.attributes() {
                    let attr = attr?;
                    if attr.key.as_ref() == b"Target" {
                        target = String::from_utf8(attr.value.to_vec())?;
                        break;
                    }
                }

                if !target.ends_with("calcChain.xml") {
                    writer.write_event(Event::Empty(e))?;
                }
            }
            Ok(Event::Eof) => break,
            Ok(e) => writer.write_event(e)?,
            Err(e) => return Err(anyhow::anyhow!("Error parsing XML: {}", e)),
        }
        buf.clear();
    }

    let result = writer.into_inner().into_inner();
    Ok(String::from_utf8(result)?)
}

/// Set `fullCalcOnLoad` on the workbook's `calcPr`, adding the element if needed
fn force_full_calc_on_load(xml: &str) -> Result<String> {
    let mut reader = Reader::from_str(xml);
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    let mut depth = 0usize;
    let mut written = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                if depth == 1 && !written && e.local_name().as_ref() == b"calcPr" {
                    writer.write_event(Event::Start(with_full_calc(&e)?))?;
                    written = true;
                } else {
                    if depth == 1 && !written && follows_calc_pr(e.local_name().as_ref()) {
                        writer.write_event(Event::Empty(new_calc_pr()))?;
                        written = true;
                    }
                    writer.write_event(Event::Start(e))?;
                }
                depth += 1;
            }
            Event::Empty(e) => {
                if depth == 1 && !written && e.local_name().as_ref() == b"calcPr" {
                    writer.write_event(Event::Empty(with_full_calc(&e)?))?;
                    written = true;
                } else {
                    if depth == 1 && !written && follows_calc_pr(e.local_name().as_ref()) {
                        writer.write_event(Event::Empty(new_calc_pr()))?;
                        written = true;
                    }
                    writer.write_event(Event::Empty(e))?;
                }
            }
            Event::End(e) => {
                depth = depth.saturating_sub(1);
                if depth == 0 && !written {
                    writer.write_event(Event::Empty(new_calc_pr()))?;
                    written = true;
                }
                writer.write_event(Event::End(e))?;
            }
            Event::Eof => break,
            e => writer.write_event(e)?,
        }
    }

    let result = writer.into_inner().into_inner();
    Ok(String::from_utf8(result)?)
}

fn follows_calc_pr(name: &[u8]) -> bool {
    WORKBOOK_AFTER_CALC_PR
        .iter()
        .any(|child| child.as_bytes() == name)
}

fn new_calc_pr() -> BytesStart<'static> {
    let mut el = BytesStart::new("calcPr");
    el.push_attribute(("fullCalcOnLoad", "1"));
    el
}

fn with_full_calc(e: &BytesStart) -> Result<BytesStart<'static>> {
    let name = String::from_utf8(e.name().as_ref().to_vec())?;
    let mut updated = BytesStart::new(name);
    for attr in e.attributes() {
        let attr = attr?;
        if attr.key.as_ref() != b"fullCalcOnLoad" {
            updated.push_attribute(attr);
        }
    }
    updated.push_attribute(("fullCalcOnLoad", "1"));
    Ok(updated)
}
