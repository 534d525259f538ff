use chrono::NaiveDate;
use pogen_core::sheet::{CellRange, CellRef, CellValue, Worksheet};
use pogen_core::{
    AppConfig, CannedExtractor, Controller, FormInput, GenerationEvent, HeaderInfo, LineItem,
    Populator, SettingsRepository, SourceRecord, XlsxPackage,
};
use rust_decimal::Decimal;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

const STYLES_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<styleSheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><cellXfs count="13"/></styleSheet>"#;

// Helper to create a purchase-order template: a notes sheet plus the active PO
// sheet with a 20-row item table (31..=50), a total row and a merged footer
fn create_mock_template(path: &Path) -> anyhow::Result<()> {
    create_template(path, false)
}

// Same template, with every data row computing its line total through one
// shared formula anchored at I31
fn create_template(path: &Path, shared_line_totals: bool) -> anyhow::Result<()> {
    let file = File::create(path)?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);

    zip.start_file("[Content_Types].xml", options)?;
    zip.write_all(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">
<Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>
<Default Extension="xml" ContentType="application/xml"/>
<Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/>
<Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/>
<Override PartName="/xl/worksheets/sheet2.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/>
<Override PartName="/xl/styles.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml"/>
<Override PartName="/xl/sharedStrings.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sharedStrings+xml"/>
<Override PartName="/xl/calcChain.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.calcChain+xml"/>
</Types>"#.as_bytes())?;

    zip.start_file("_rels/.rels", options)?;
    zip.write_all(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/>
</Relationships>"#.as_bytes())?;

    zip.start_file("xl/workbook.xml", options)?;
    zip.write_all(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">
<bookViews><workbookView activeTab="1"/></bookViews>
<sheets><sheet name="Notes" sheetId="1" r:id="rId1"/><sheet name="PO" sheetId="2" r:id="rId2"/></sheets>
<calcPr calcId="191029"/>
</workbook>"#.as_bytes())?;

    zip.start_file("xl/_rels/workbook.xml.rels", options)?;
    zip.write_all(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/>
<Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet2.xml"/>
<Relationship Id="rId3" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/>
<Relationship Id="rId4" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/sharedStrings" Target="sharedStrings.xml"/>
<Relationship Id="rId5" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/calcChain" Target="calcChain.xml"/>
</Relationships>"#.as_bytes())?;

    zip.start_file("xl/styles.xml", options)?;
    zip.write_all(STYLES_XML.as_bytes())?;

    zip.start_file("xl/sharedStrings.xml", options)?;
    zip.write_all(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<sst xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" count="1" uniqueCount="1"><si><t>PO No.</t></si></sst>"#.as_bytes())?;

    zip.start_file("xl/calcChain.xml", options)?;
    zip.write_all(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<calcChain xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><c r="I51" i="2"/></calcChain>"#.as_bytes())?;

    zip.start_file("xl/worksheets/sheet1.xml", options)?;
    zip.write_all(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData/></worksheet>"#.as_bytes())?;

    zip.start_file("xl/worksheets/sheet2.xml", options)?;
    let mut sheet = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><dimension ref="A8:I62"/><sheetViews><sheetView workbookViewId="0"/></sheetViews><cols><col min="4" max="4" width="40" customWidth="1"/></cols><sheetData>"#,
    );
    sheet.push_str(r#"<row r="8" spans="1:9"><c r="A8" t="s"><v>0</v></c><c r="E8" s="5"/><c r="H8" s="6"/></row>"#);
    for row in 31..=50 {
        let (style, height) = if (row - 31) % 2 == 0 { (10, 18) } else { (11, 6) };
        sheet.push_str(&format!(r#"<row r="{row}" ht="{height}" customHeight="1">"#));
        for col in ["A", "B", "C", "D", "E", "F", "G", "H"] {
            sheet.push_str(&format!(r#"<c r="{col}{row}" s="{style}"/>"#));
        }
        match (shared_line_totals && style == 10, row) {
            (true, 31) => sheet.push_str(
                r#"<c r="I31" s="10"><f t="shared" ref="I31:I49" si="0">B31*H31</f><v>0</v></c>"#,
            ),
            (true, _) => sheet.push_str(&format!(
                r#"<c r="I{row}" s="10"><f t="shared" si="0"/><v>0</v></c>"#
            )),
            (false, _) => sheet.push_str(&format!(r#"<c r="I{row}" s="{style}"/>"#)),
        }
        sheet.push_str("</row>");
    }
    sheet.push_str(r#"<row r="51"><c r="I51" s="9"><f>SUM(I31:I50)</f><v>0</v></c></row>"#);
    sheet.push_str(r#"<row r="53"><c r="E53" s="12"/></row>"#);
    sheet.push_str(r#"<row r="60"><c r="G60" s="7"/><c r="H60" s="7"/></row>"#);
    sheet.push_str(
        r#"</sheetData><mergeCells count="3"><mergeCell ref="D31:G31"/><mergeCell ref="E53:I53"/><mergeCell ref="A60:C62"/></mergeCells><pageMargins left="0.7" right="0.7" top="0.75" bottom="0.75" header="0.3" footer="0.3"/><pageSetup paperSize="9" orientation="portrait"/><rowBreaks count="1" manualBreakCount="1"><brk id="63" max="16383" man="1"/></rowBreaks></worksheet>"#,
    );
    zip.write_all(sheet.as_bytes())?;

    zip.finish()?;
    Ok(())
}

fn read_entry(path: &Path, name: &str) -> Option<String> {
    let mut archive = ZipArchive::new(File::open(path).ok()?).ok()?;
    let mut file = archive.by_name(name).ok()?;
    let mut content = String::new();
    file.read_to_string(&mut content).ok()?;
    Some(content)
}

fn header() -> HeaderInfo {
    HeaderInfo::new(
        "P-250719-001M",
        NaiveDate::from_ymd_opt(2025, 7, 19).unwrap(),
        "Plant upgrade",
        "Farid",
        "+60123456789",
        "Lim",
    )
    .unwrap()
}

fn record(item_count: usize) -> SourceRecord {
    SourceRecord {
        company_name: "Syarikat Maju Sdn Bhd".to_string(),
        address: "No. 5, Jalan Industri 3, 47000 Sungai Buloh, Selangor".to_string(),
        quotation_number: "QT-118".to_string(),
        items: (1..=item_count)
            .map(|n| LineItem {
                quantity: Decimal::from(2),
                unit: "pcs".to_string(),
                description: format!("Item {}", n),
                unit_price: Decimal::new(1050, 2),
            })
            .collect(),
        ..Default::default()
    }
}

/// Serialized content of a cell read back from a saved workbook
fn raw(sheet: &Worksheet, cell: &str) -> String {
    match sheet.value(CellRef::parse(cell).unwrap()) {
        CellValue::Raw { inner_xml, .. } => inner_xml.clone(),
        CellValue::Empty => String::new(),
        other => panic!("unexpected value in {}: {:?}", cell, other),
    }
}

fn style(sheet: &Worksheet, cell: &str) -> Option<u32> {
    sheet.cell(CellRef::parse(cell).unwrap()).and_then(|c| c.style)
}

#[test]
fn test_populate_within_capacity() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let template = dir.path().join("po_template.xlsx");
    create_mock_template(&template)?;
    let template_bytes = fs::read(&template)?;

    let document = Populator::default().populate(&template, &header(), &record(3), &dir.path().join("temp"))?;

    assert_eq!(document.inserted_rows, 0);
    assert_eq!(document.final_row, 50);
    assert_eq!(document.total_cost, Decimal::new(6300, 2));
    assert_eq!(fs::read(&template)?, template_bytes, "template must not change");

    let name = document.path.file_name().unwrap().to_string_lossy().to_string();
    assert!(name.starts_with("temp_po_") && name.ends_with(".xlsx"));

    let package = XlsxPackage::open(&document.path)?;
    let sheet = package.worksheet();
    assert_eq!(sheet.name, "PO");
    assert_eq!(package.sheet_path(), "xl/worksheets/sheet2.xml");

    // Template content and styles survive
    assert_eq!(raw(sheet, "A8"), "<v>0</v>");
    assert_eq!(style(sheet, "E8"), Some(5));
    assert!(raw(sheet, "E8").contains(">P-250719-001M<"));
    assert!(raw(sheet, "H8").contains(">19/07/2025<"));
    assert!(raw(sheet, "D29").contains(">With reference to your quotation QT-118:<"));

    // Items: A index, B quantity, H unit price, I line total
    assert_eq!(raw(sheet, "A31"), "<v>1</v>");
    assert_eq!(raw(sheet, "B33"), "<v>2</v>");
    assert!(raw(sheet, "D35").contains(">Item 3<"));
    assert_eq!(raw(sheet, "H35"), "<v>10.5</v>");
    assert_eq!(raw(sheet, "I35"), "<v>21</v>");
    assert_eq!(style(sheet, "I35"), Some(10));
    assert_eq!(raw(sheet, "A37"), "");

    assert_eq!(raw(sheet, "I51"), "<f>SUM(I31:I50)</f>");
    assert_eq!(style(sheet, "I51"), Some(9));
    assert!(raw(sheet, "E53").contains(">Sixty-Three Ringgit Only<"));
    assert_eq!(style(sheet, "E53"), Some(12));
    assert!(raw(sheet, "G60").contains(">Farid<"));
    assert!(raw(sheet, "H60").contains(">Lim<"));
    assert_eq!(sheet.row_breaks(), &[63]);
    assert_eq!(sheet.merged_ranges().len(), 3);

    // Package level: untouched parts copied, stale calculation chain dropped
    assert_eq!(read_entry(&document.path, "xl/styles.xml").as_deref(), Some(STYLES_XML));
    assert!(read_entry(&document.path, "xl/calcChain.xml").is_none());
    assert!(!read_entry(&document.path, "[Content_Types].xml").unwrap().contains("calcChain"));
    assert!(!read_entry(&document.path, "xl/_rels/workbook.xml.rels").unwrap().contains("calcChain"));
    assert!(read_entry(&document.path, "xl/workbook.xml").unwrap().contains(r#"fullCalcOnLoad="1""#));

    let sheet_xml = read_entry(&document.path, "xl/worksheets/sheet2.xml").unwrap();
    assert!(sheet_xml.contains(r#"<col min="4" max="4" width="40" customWidth="1"/>"#));
    assert!(sheet_xml.contains(r#"<pageSetup paperSize="9" orientation="portrait"/>"#));
    assert!(!sheet_xml.contains("spans="));

    Ok(())
}

#[test]
fn test_populate_expands_table() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let template = dir.path().join("po_template.xlsx");
    create_mock_template(&template)?;

    let document = Populator::default().populate(&template, &header(), &record(13), dir.path())?;

    assert_eq!(document.inserted_rows, 6);
    assert_eq!(document.final_row, 56);
    assert_eq!(document.total_cost, Decimal::new(27300, 2));

    let package = XlsxPackage::open(&document.path)?;
    let sheet = package.worksheet();

    // New rows look like the template's last item block
    for row in [51, 53, 55] {
        let r = sheet.row(row).unwrap();
        assert_eq!(r.height, Some(18.0));
        assert_eq!(style(sheet, &format!("A{row}")), Some(10));
        assert_eq!(style(sheet, &format!("I{row}")), Some(10));
    }
    for row in [52, 54, 56] {
        assert_eq!(sheet.row(row).unwrap().height, Some(6.0));
        assert_eq!(style(sheet, &format!("E{row}")), Some(11));
    }

    assert_eq!(raw(sheet, "A55"), "<v>13</v>");
    assert_eq!(raw(sheet, "I57"), "<f>SUM(I31:I56)</f>");
    assert_eq!(style(sheet, "I57"), Some(9));
    assert!(raw(sheet, "E59").contains(">Two Hundred Seventy-Three Ringgit Only<"));
    assert_eq!(style(sheet, "E59"), Some(12));
    assert!(raw(sheet, "G66").contains(">Farid<"));
    assert_eq!(style(sheet, "G66"), Some(7));

    let mut merged = sheet.merged_ranges().to_vec();
    merged.sort();
    let expected: Vec<CellRange> = ["D31:G31", "E59:I59", "A66:C68"]
        .iter()
        .map(|r| r.parse().unwrap())
        .collect();
    let mut expected_sorted = expected.clone();
    expected_sorted.sort();
    assert_eq!(merged, expected_sorted);

    assert_eq!(sheet.row_breaks(), &[69]);
    let sheet_xml = read_entry(&document.path, "xl/worksheets/sheet2.xml").unwrap();
    assert_eq!(sheet_xml.matches("<brk ").count(), 1);
    assert!(sheet_xml.contains(r#"<dimension ref="A8:I66"/>"#));

    Ok(())
}

#[test]
fn test_zero_items() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let template = dir.path().join("po_template.xlsx");
    create_mock_template(&template)?;

    let document = Populator::default().populate(&template, &header(), &record(0), dir.path())?;
    assert_eq!(document.inserted_rows, 0);
    assert_eq!(document.total_cost, Decimal::ZERO);

    let package = XlsxPackage::open(&document.path)?;
    let sheet = package.worksheet();
    assert_eq!(raw(sheet, "I51"), "<f>SUM(I31:I50)</f>");
    assert!(raw(sheet, "E53").contains(">Zero Ringgit Only<"));
    assert_eq!(raw(sheet, "A31"), "");
    Ok(())
}

#[test]
fn test_persist_and_discard() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let template = dir.path().join("po_template.xlsx");
    create_mock_template(&template)?;
    let populator = Populator::default();

    let document = populator.populate(&template, &header(), &record(1), &dir.path().join("temp"))?;
    let transient = document.path.clone();
    let dest = dir.path().join("out").join("P-250719-001M.xlsx");
    document.persist(&dest)?;
    assert!(dest.exists());
    assert!(!transient.exists());

    let document = populator.populate(&template, &header(), &record(1), &dir.path().join("temp"))?;
    let transient = document.path.clone();
    document.discard()?;
    assert!(!transient.exists());
    Ok(())
}

#[test]
fn test_controller_end_to_end() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let template = dir.path().join("po_template.xlsx");
    create_mock_template(&template)?;
    let quotation = dir.path().join("quotation.pdf");
    fs::write(&quotation, b"%PDF-1.7")?;

    let mut config = AppConfig::default();
    config.paths.template = template;
    config.paths.temp_dir = dir.path().join("temp");
    config.paths.archive_dir = dir.path().join("jsons");
    config.paths.settings_file = dir.path().join("config").join("user_settings.toml");

    let response = r#"```json
{"companyName": "Maju", "address": "Shah Alam", "quotationNumber": "QT-7",
 "pic": {"name": "Aminah", "phone": null},
 "terms": {"payment": "COD", "deliveryWeeks": "2"},
 "items": [{"quantity": "4", "unit": "lot", "description": "Cabling", "unitPrice": 250}]}
```"#;
    let settings = SettingsRepository::new(&config.paths.settings_file);
    let (controller, events) =
        Controller::new(&config, Arc::new(CannedExtractor::new(response)), settings.clone());

    let mut form = FormInput::from_settings(&settings.load(), NaiveDate::from_ymd_opt(2025, 7, 19).unwrap());
    form.po_number = "P-250719-001M".to_string();
    form.project_name = "Plant upgrade".to_string();
    form.purchaser_name = "Farid".to_string();
    form.quotation_file = quotation;
    form.remember = true;

    controller.submit(&form)?.join().unwrap();

    let mut received = Vec::new();
    while let Ok(event) = events.try_recv() {
        received.push(event);
    }
    assert!(matches!(received.first(), Some(GenerationEvent::Started { .. })));
    let document = match received.pop() {
        Some(GenerationEvent::Finished(result)) => result?,
        other => panic!("expected a finished event, got {:?}", other),
    };
    assert_eq!(document.total_cost, Decimal::from(1000));

    let package = XlsxPackage::open(&document.path)?;
    assert!(raw(package.worksheet(), "H24").contains(">02/08/2025<"));
    assert!(raw(package.worksheet(), "G18").contains(">Contact: Farid ()<"));

    let archived: Vec<_> = fs::read_dir(dir.path().join("jsons"))?.collect();
    assert_eq!(archived.len(), 1);

    let dest = dir.path().join(form.default_file_name());
    document.persist(&dest)?;
    assert!(dest.exists());

    controller.commit_settings(&form)?;
    assert_eq!(settings.load().po_number, "P-250719-001M");
    Ok(())
}

#[test]
fn test_shared_line_total_formulas_survive_population() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let template = dir.path().join("po_template.xlsx");
    create_template(&template, true)?;

    let document = Populator::default().populate(&template, &header(), &record(1), dir.path())?;

    let sheet_xml = read_entry(&document.path, "xl/worksheets/sheet2.xml").unwrap();
    assert!(!sheet_xml.contains(r#"t="shared""#));
    assert!(!sheet_xml.contains("si="));

    let package = XlsxPackage::open(&document.path)?;
    let sheet = package.worksheet();
    assert_eq!(raw(sheet, "I31"), "<v>21</v>");
    assert_eq!(raw(sheet, "I33"), "<f>B33*H33</f>");
    assert_eq!(raw(sheet, "I49"), "<f>B49*H49</f>");
    assert_eq!(style(sheet, "I33"), Some(10));
    assert_eq!(raw(sheet, "I51"), "<f>SUM(I31:I50)</f>");

    // Expansion moves the footer below rows that hold plain formulas
    let document = Populator::default().populate(&template, &header(), &record(12), dir.path())?;
    let package = XlsxPackage::open(&document.path)?;
    let sheet = package.worksheet();
    assert_eq!(raw(sheet, "I49"), "<v>21</v>");
    assert_eq!(raw(sheet, "I53"), "<v>21</v>");
    assert_eq!(raw(sheet, "I55"), "<f>SUM(I31:I54)</f>");
    let sheet_xml = read_entry(&document.path, "xl/worksheets/sheet2.xml").unwrap();
    assert!(!sheet_xml.contains(r#"t="shared""#));

    Ok(())
}

#[test]
fn test_control_characters_in_description() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let template = dir.path().join("po_template.xlsx");
    create_mock_template(&template)?;

    let mut source = record(1);
    source.items[0].description = "Gate valve\u{b}DN50".to_string();
    let document = Populator::default().populate(&template, &header(), &source, dir.path())?;

    let sheet_xml = read_entry(&document.path, "xl/worksheets/sheet2.xml").unwrap();
    assert!(!sheet_xml.contains('\u{b}'));
    assert!(sheet_xml.contains(">Gate valve_x000B_DN50<"));

    let package = XlsxPackage::open(&document.path)?;
    assert!(raw(package.worksheet(), "D31").contains(">Gate valve_x000B_DN50<"));
    Ok(())
}
