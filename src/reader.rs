//! Import side: map sheet rows back into records
//!
//! Reading starts at a 1-based start row (2 by default, below the title row).
//! Rows before it and rows with no content are skipped; each remaining row is
//! handed to [`FromExcelRow::from_row`] as a [`RecordRow`].

use crate::coerce::BooleanLabels;
use crate::config::DEFAULT_READ_START_ROW;
use crate::error::{ExcelError, Result};
use crate::schema::ExcelScalar;
use crate::streaming_reader::{RowIterator, StreamingReader};
use crate::types::{col_to_letter, CellValue, Row, ScalarKind};
use log::debug;
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;

/// A record type that can be built from one sheet row
pub trait FromExcelRow: Sized {
    fn from_row(row: &RecordRow<'_>) -> Result<Self>;
}

/// One row being mapped into a record
pub struct RecordRow<'a> {
    row: &'a Row,
    labels: &'a BooleanLabels,
}

static EMPTY_CELL: CellValue = CellValue::Empty;

impl<'a> RecordRow<'a> {
    pub fn new(row: &'a Row, labels: &'a BooleanLabels) -> Self {
        RecordRow { row, labels }
    }

    /// 1-based row number as shown by spreadsheet applications
    pub fn number(&self) -> u32 {
        self.row.index + 1
    }

    /// Raw cell at a zero-based column; missing cells are empty
    pub fn cell(&self, col: u32) -> &CellValue {
        self.row.get(col as usize).unwrap_or(&EMPTY_CELL)
    }

    /// Typed value at a zero-based column
    ///
    /// Boolean targets also accept the configured true/false labels.
    pub fn get<V: ExcelScalar>(&self, col: u32) -> Result<V> {
        let raw = self.cell(col);
        let labelled;
        let cell = match (V::KIND, raw) {
            (ScalarKind::Boolean, CellValue::String(text)) => match self.labels.parse(text) {
                Some(flag) => {
                    labelled = CellValue::Bool(flag);
                    &labelled
                }
                None => raw,
            },
            _ => raw,
        };

        V::from_cell(cell).ok_or_else(|| ExcelError::ValueCoercion {
            field: format!("{}{}", col_to_letter(col), self.number()),
            value: raw.as_string(),
            kind: V::KIND,
        })
    }
}

/// Reader mapping sheets of a workbook into records
pub struct ReadableExcel<R: Read + Seek> {
    reader: StreamingReader<R>,
    start_row: u32,
    boolean_labels: BooleanLabels,
}

impl ReadableExcel<BufReader<File>> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::with_reader(StreamingReader::open(path)?))
    }
}

impl<R: Read + Seek> ReadableExcel<R> {
    /// Read a package from any seekable source
    pub fn from_reader(source: R) -> Result<Self> {
        Ok(Self::with_reader(StreamingReader::from_reader(source)?))
    }

    fn with_reader(reader: StreamingReader<R>) -> Self {
        ReadableExcel {
            reader,
            start_row: DEFAULT_READ_START_ROW,
            boolean_labels: BooleanLabels::default(),
        }
    }

    /// First 1-based row mapped into a record; 0 is treated as 1
    pub fn with_start_row(mut self, row: u32) -> Self {
        self.start_row = row.max(1);
        self
    }

    pub fn with_boolean_labels(mut self, labels: BooleanLabels) -> Self {
        self.boolean_labels = labels;
        self
    }

    pub fn start_row(&self) -> u32 {
        self.start_row
    }

    pub fn sheet_names(&self) -> &[String] {
        self.reader.sheet_names()
    }

    /// Records of the sheet at a zero-based position
    pub fn read_sheet<T: FromExcelRow>(&mut self, index: usize) -> Result<Vec<T>> {
        let name = self
            .sheet_names()
            .get(index)
            .cloned()
            .unwrap_or_else(|| format!("#{}", index));
        let start_row = self.start_row;
        let rows = self.reader.rows_by_index(index)?;
        collect_records(rows, start_row, &self.boolean_labels).map_err(|e| ExcelError::Sheet {
            sheet: name,
            sheet_number: index as u32 + 1,
            source: Box::new(e),
        })
    }

    /// Records of the sheet with the given name
    pub fn read_sheet_by_name<T: FromExcelRow>(&mut self, name: &str) -> Result<Vec<T>> {
        let index = self
            .sheet_names()
            .iter()
            .position(|sheet| sheet == name)
            .ok_or_else(|| ExcelError::SheetNotFound {
                sheet: name.to_string(),
                available: self.sheet_names().join(", "),
            })?;
        self.read_sheet(index)
    }
}

fn collect_records<T: FromExcelRow>(
    rows: RowIterator<'_>,
    start_row: u32,
    labels: &BooleanLabels,
) -> Result<Vec<T>> {
    let first_index = start_row - 1;
    let mut records = Vec::new();
    let mut skipped = 0usize;
    for row in rows {
        let row = row?;
        if row.index < first_index {
            continue;
        }
        if row.is_empty() {
            skipped += 1;
            continue;
        }
        records.push(T::from_row(&RecordRow::new(&row, labels))?);
    }
    debug!(
        "Mapped {} records from row {} ({} blank rows skipped)",
        records.len(),
        start_row,
        skipped
    );
    Ok(records)
}
