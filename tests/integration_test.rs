//! Integration tests for excelmap

use chrono::NaiveDate;
use excelmap::fast_writer::StreamingZipReader;
use excelmap::streaming_reader::StreamingReader;
use excelmap::{
    excel_record, export_writable, import_readable, Align, BooleanLabels, CellValue, ExcelError,
    ExcelField, ExcelRecord, FieldTable, FieldValue, FromExcelRow, MemorySheet, RecordRow,
    RowStyleTemplate, SchemaBuilder, SheetBuilder, SheetConfig,
};
use std::io::Cursor;
use std::sync::Arc;
use tempfile::NamedTempFile;

struct Account {
    id: i64,
    active: bool,
}

excel_record!(Account {
    id => ExcelField::new(0, "ID"),
    active => ExcelField::new(1, "Active"),
});

fn read_rows(bytes: Vec<u8>, sheet: usize) -> Vec<Vec<CellValue>> {
    let mut reader = StreamingReader::from_reader(Cursor::new(bytes)).unwrap();
    reader
        .rows_by_index(sheet)
        .unwrap()
        .map(|row| row.unwrap().cells)
        .collect()
}

#[test]
fn test_scenario_a_header_and_labelled_boolean() {
    let accounts = vec![Account { id: 1, active: true }];
    let mut excel = export_writable::<Account>();
    excel.add_sheet(&accounts).unwrap();

    let rows = read_rows(excel.into_bytes().unwrap(), 0);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0], vec![CellValue::from("ID"), CellValue::from("Active")]);
    assert_eq!(rows[1], vec![CellValue::Number(1.0), CellValue::from("Y")]);
}

#[test]
fn test_scenario_a_in_memory_grid() {
    let table = FieldTable::<Account>::get().unwrap();
    let mut builder = SheetBuilder::new("Grid", SheetConfig::default(), table, MemorySheet::new());
    builder.start().unwrap();
    builder
        .append_rows(&[Account { id: 1, active: true }, Account { id: 2, active: false }])
        .unwrap();
    builder.seal().unwrap();

    let grid = builder.into_sink();
    assert_eq!(grid.row_values(1), vec![CellValue::Number(1.0), CellValue::from("Y")]);
    assert_eq!(grid.row_values(2), vec![CellValue::Number(2.0), CellValue::from("N")]);
    assert_eq!(grid.cell(2, 1).unwrap().style.num_format, "@");
    assert_eq!(grid.column_width(1), Some(20 * 256 + 184));
    assert!(grid.is_finished());
}

#[test]
fn test_scenario_b_empty_list_gives_header_only() {
    let mut excel = export_writable::<Account>();
    excel.add_sheet(Vec::<&Account>::new()).unwrap();

    let rows = read_rows(excel.into_bytes().unwrap(), 0);
    assert_eq!(rows, vec![vec![CellValue::from("ID"), CellValue::from("Active")]]);
}

struct Clash {
    a: String,
    b: String,
}

impl ExcelRecord for Clash {
    fn describe(schema: &mut SchemaBuilder<Self>) {
        schema
            .field(ExcelField::new(0, "A"), |c: &Clash| c.a.clone())
            .field(ExcelField::new(0, "B"), |c: &Clash| c.b.clone());
    }
}

#[test]
fn test_scenario_c_duplicate_index_is_schema_error() {
    let err = FieldTable::<Clash>::build().err().unwrap();
    assert!(matches!(err, ExcelError::Schema { .. }));

    let records = vec![Clash {
        a: "x".to_string(),
        b: "y".to_string(),
    }];
    let mut excel = export_writable::<Clash>();
    let err = excel.add_sheet(&records).err().unwrap();
    assert!(err.is_schema_error());
}

#[test]
fn test_scenario_d_three_sheets_named_by_counter() {
    let accounts = vec![Account { id: 7, active: false }];
    let mut excel = export_writable::<Account>();
    excel.add_sheet(&accounts).unwrap();
    excel.add_sheet(&accounts).unwrap();
    excel.add_sheet(&accounts).unwrap();

    let reader = StreamingReader::from_reader(Cursor::new(excel.into_bytes().unwrap())).unwrap();
    assert_eq!(reader.sheet_names(), ["Sheet1", "Sheet2", "Sheet3"].map(String::from));
}

#[derive(Debug, Clone, PartialEq)]
struct Shipment {
    reference: String,
    weight: f64,
    fragile: bool,
    shipped: NaiveDate,
    carrier: Option<String>,
}

impl ExcelRecord for Shipment {
    fn describe(schema: &mut SchemaBuilder<Self>) {
        schema
            .field(ExcelField::new(0, "Reference"), |s: &Shipment| s.reference.clone())
            .field(
                ExcelField::new(1, "Weight (kg)")
                    .with_format("0.00")
                    .with_align(Align::Right),
                |s: &Shipment| s.weight,
            )
            .field(ExcelField::new(2, "Fragile"), |s: &Shipment| s.fragile)
            .field(
                ExcelField::new(3, "Shipped").with_format("yyyy-mm-dd"),
                |s: &Shipment| s.shipped,
            )
            .field(ExcelField::new(4, "Carrier"), |s: &Shipment| s.carrier.clone());
    }
}

impl FromExcelRow for Shipment {
    fn from_row(row: &RecordRow<'_>) -> excelmap::Result<Self> {
        Ok(Shipment {
            reference: row.get(0)?,
            weight: row.get(1)?,
            fragile: row.get(2)?,
            shipped: row.get(3)?,
            carrier: row.get(4)?,
        })
    }
}

fn shipments() -> Vec<Shipment> {
    vec![
        Shipment {
            reference: "SH-001".to_string(),
            weight: 12.75,
            fragile: true,
            shipped: NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
            carrier: Some("Nord <Express>".to_string()),
        },
        Shipment {
            reference: "  padded  ".to_string(),
            weight: 0.5,
            fragile: false,
            shipped: NaiveDate::from_ymd_opt(2023, 12, 1).unwrap(),
            carrier: None,
        },
    ]
}

#[test]
fn test_round_trip_through_file() {
    let temp = NamedTempFile::new().unwrap();
    let data = shipments();

    let mut excel = export_writable::<Shipment>()
        .with_sheet_name("Shipments")
        .with_boolean_labels(BooleanLabels::new("yes", "no"));
    excel.add_sheet(&data).unwrap();
    excel.write_to_path(temp.path()).unwrap();

    let mut readable = import_readable(temp.path())
        .unwrap()
        .with_boolean_labels(BooleanLabels::new("yes", "no"));
    assert_eq!(readable.start_row(), 2);
    let read: Vec<Shipment> = readable.read_sheet_by_name("Shipments").unwrap();
    assert_eq!(read, data);
}

#[test]
fn test_header_only_sheet_reads_as_no_records() {
    let mut excel = export_writable::<Shipment>();
    excel.add_sheet(Vec::<&Shipment>::new()).unwrap();

    let mut readable =
        excelmap::ReadableExcel::from_reader(Cursor::new(excel.into_bytes().unwrap())).unwrap();
    let read: Vec<Shipment> = readable.read_sheet(0).unwrap();
    assert!(read.is_empty());
}

#[test]
fn test_duplicate_explicit_names_are_disambiguated() {
    let data = shipments();
    let mut excel = export_writable::<Shipment>();
    excel.add_named_sheet("Q1: North/South", &data).unwrap();
    excel.add_named_sheet("Q1: North/South", &data).unwrap();
    excel.add_sheet(&data).unwrap();

    let reader = StreamingReader::from_reader(Cursor::new(excel.into_bytes().unwrap())).unwrap();
    assert_eq!(
        reader.sheet_names(),
        ["Q1_ North_South", "Q1_ North_South (2)", "Sheet3"].map(String::from)
    );
}

struct Reading {
    sensor: String,
    value: String,
}

impl ExcelRecord for Reading {
    fn describe(schema: &mut SchemaBuilder<Self>) {
        schema
            .field(ExcelField::new(0, "Sensor"), |r: &Reading| r.sensor.clone())
            .field_with_type(ExcelField::new(1, "Value"), "f64", |r: &Reading| {
                Ok(FieldValue::Text(r.value.clone()))
            });
    }
}

#[test]
fn test_failed_sheet_poisons_export() {
    let good = vec![Reading {
        sensor: "t1".to_string(),
        value: "21.5".to_string(),
    }];
    let bad = vec![
        Reading {
            sensor: "t2".to_string(),
            value: "19".to_string(),
        },
        Reading {
            sensor: "t3".to_string(),
            value: "n/a".to_string(),
        },
    ];

    let mut excel = export_writable::<Reading>();
    excel.add_sheet(&good).unwrap();
    let err = excel.add_sheet(&bad).err().unwrap();
    assert!(err.is_coercion_error());
    let message = err.to_string();
    assert!(message.contains("sheet #2"), "{message}");
    assert!(message.contains("row 3"), "{message}");

    assert!(matches!(
        excel.add_sheet(&good).err().unwrap().root_cause(),
        ExcelError::InvalidState(_)
    ));
    assert!(excel.into_bytes().is_err());
}

#[test]
fn test_styles_and_layout_in_package() {
    let data = shipments();
    let mut excel = export_writable::<Shipment>()
        .with_cell_width(30)
        .with_title_style(RowStyleTemplate::default_title().with_height(32.0))
        .with_footer_style(RowStyleTemplate::default_footer(), ["Total", "13.25"]);
    excel.add_sheet(&data).unwrap();
    let bytes = excel.into_bytes().unwrap();

    let mut zip = StreamingZipReader::new(Cursor::new(bytes.clone())).unwrap();
    let sheet = String::from_utf8(zip.read_entry_by_name("xl/worksheets/sheet1.xml").unwrap())
        .unwrap();
    assert!(sheet.contains("width=\"30.71875\""));
    assert!(sheet.contains("<row r=\"1\" ht=\"32\" customHeight=\"1\">"));
    assert!(sheet.contains("<row r=\"2\" ht=\"24\" customHeight=\"1\">"));
    assert!(sheet.contains("<t xml:space=\"preserve\">  padded  </t>"));
    assert!(sheet.contains("Nord &lt;Express&gt;"));

    let styles = String::from_utf8(zip.read_entry_by_name("xl/styles.xml").unwrap()).unwrap();
    assert!(styles.contains("formatCode=\"yyyy-mm-dd\""));
    assert!(styles.contains("horizontal=\"right\""));

    let rows = read_rows(bytes, 0);
    assert_eq!(rows.len(), 4);
    assert_eq!(rows[3][0], CellValue::from("Total"));
}

#[test]
fn test_write_to_stream_returns_sink() {
    let accounts = vec![Account { id: 3, active: true }];
    let mut excel = export_writable::<Account>().with_compression_level(1);
    excel.add_sheet(&accounts).unwrap();
    let sink = excel.write_to_stream(Cursor::new(Vec::new())).unwrap();
    let bytes = sink.into_inner();
    assert!(bytes.starts_with(b"PK"));
}

#[test]
fn test_descriptor_table_is_shared() {
    let first = FieldTable::<Account>::get().unwrap();
    let second = FieldTable::<Account>::get().unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.headers(), vec!["ID", "Active"]);
}
