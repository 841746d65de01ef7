//! Worksheet writer streaming rows straight into the package

use super::workbook::FastWorkbook;
use super::xml_writer::escape_into;
use crate::error::{ExcelError, Result};
use crate::sheet::SheetSink;
use crate::style::ResolvedCellStyle;
use crate::types::{excel_serial_from_datetime, CellValue};
use std::io::Write;

const WORKSHEET_HEADER: &[u8] = br#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">"#;

/// One worksheet part of a [`FastWorkbook`]
///
/// Rows are rendered into a reusable buffer and pushed through the
/// compressor as soon as they end. Column widths are collected until the
/// first row because `<cols>` must precede `<sheetData>`.
pub struct FastWorksheet<'a, W: Write> {
    book: &'a mut FastWorkbook<W>,
    columns: Vec<(u32, u32)>,
    sheet_data_open: bool,
    current_row: Option<u32>,
    last_row: Option<u32>,
    xml_buffer: Vec<u8>,
    num_buffer: itoa::Buffer,
    row_count: u32,
    finished: bool,
}

impl<'a, W: Write> FastWorksheet<'a, W> {
    pub(crate) fn new(book: &'a mut FastWorkbook<W>, entry_name: &str) -> Result<Self> {
        book.zip_mut().start_entry(entry_name)?;
        book.zip_mut().write_data(WORKSHEET_HEADER)?;
        Ok(FastWorksheet {
            book,
            columns: Vec::new(),
            sheet_data_open: false,
            current_row: None,
            last_row: None,
            xml_buffer: Vec::with_capacity(4096),
            num_buffer: itoa::Buffer::new(),
            row_count: 0,
            finished: false,
        })
    }

    /// Rows written so far
    pub fn row_count(&self) -> u32 {
        self.row_count
    }

    fn open_sheet_data(&mut self) -> Result<()> {
        if self.sheet_data_open {
            return Ok(());
        }
        let mut xml = Vec::with_capacity(64 + self.columns.len() * 64);
        if !self.columns.is_empty() {
            self.columns.sort_by_key(|(col, _)| *col);
            xml.extend_from_slice(b"<cols>");
            for (col, stored_width) in &self.columns {
                let n = self.num_buffer.format(col + 1).as_bytes();
                xml.extend_from_slice(b"<col min=\"");
                xml.extend_from_slice(n);
                xml.extend_from_slice(b"\" max=\"");
                xml.extend_from_slice(n);
                xml.extend_from_slice(b"\" width=\"");
                xml.extend_from_slice(format_width(*stored_width).as_bytes());
                xml.extend_from_slice(b"\" customWidth=\"1\"/>");
            }
            xml.extend_from_slice(b"</cols>");
        }
        xml.extend_from_slice(b"<sheetData>");
        self.book.zip_mut().write_data(&xml)?;
        self.sheet_data_open = true;
        Ok(())
    }

    fn check_open(&self) -> Result<()> {
        if self.finished {
            return Err(ExcelError::InvalidState(
                "worksheet is already finished".to_string(),
            ));
        }
        Ok(())
    }
}

/// Width attribute in characters from the 1/256-character stored unit
fn format_width(stored_width: u32) -> String {
    (stored_width as f64 / 256.0).to_string()
}

/// Push column letters for a 1-based column number (1 -> A, 27 -> AA)
fn push_column_letter(buffer: &mut Vec<u8>, mut n: u32) {
    let mut tmp = [0u8; 10];
    let mut len = 0;
    while n > 0 {
        let rem = (n - 1) % 26;
        tmp[len] = b'A' + rem as u8;
        len += 1;
        n = (n - 1) / 26;
    }
    buffer.extend(tmp[..len].iter().rev());
}

fn needs_space_preserve(text: &str) -> bool {
    text.starts_with(char::is_whitespace) || text.ends_with(char::is_whitespace)
}

impl<W: Write> SheetSink for FastWorksheet<'_, W> {
    fn set_column_width(&mut self, col: u32, stored_width: u32) -> Result<()> {
        self.check_open()?;
        if self.sheet_data_open {
            return Err(ExcelError::InvalidState(
                "column widths must be set before the first row".to_string(),
            ));
        }
        match self.columns.iter_mut().find(|(c, _)| *c == col) {
            Some(entry) => entry.1 = stored_width,
            None => self.columns.push((col, stored_width)),
        }
        Ok(())
    }

    fn start_row(&mut self, row: u32, height: f64) -> Result<()> {
        self.check_open()?;
        if self.current_row.is_some() {
            return Err(ExcelError::InvalidState(format!(
                "row {} started while another row is open",
                row + 1
            )));
        }
        if self.last_row.is_some_and(|last| row <= last) {
            return Err(ExcelError::InvalidState(format!(
                "row {} is not below the previous row",
                row + 1
            )));
        }
        self.open_sheet_data()?;

        self.xml_buffer.clear();
        self.xml_buffer.extend_from_slice(b"<row r=\"");
        self.xml_buffer
            .extend_from_slice(self.num_buffer.format(row + 1).as_bytes());
        self.xml_buffer.extend_from_slice(b"\" ht=\"");
        self.xml_buffer.extend_from_slice(height.to_string().as_bytes());
        self.xml_buffer.extend_from_slice(b"\" customHeight=\"1\">");
        self.current_row = Some(row);
        Ok(())
    }

    fn write_cell(
        &mut self,
        col: u32,
        value: &CellValue,
        style: &ResolvedCellStyle,
    ) -> Result<()> {
        let row = self
            .current_row
            .ok_or_else(|| ExcelError::InvalidState("cell written outside a row".to_string()))?;
        let style_id = self.book.styles_mut().intern(style);

        let buf = &mut self.xml_buffer;
        buf.extend_from_slice(b"<c r=\"");
        push_column_letter(buf, col + 1);
        buf.extend_from_slice(self.num_buffer.format(row + 1).as_bytes());
        buf.extend_from_slice(b"\"");
        if style_id > 0 {
            buf.extend_from_slice(b" s=\"");
            buf.extend_from_slice(self.num_buffer.format(style_id).as_bytes());
            buf.extend_from_slice(b"\"");
        }

        match value {
            CellValue::Empty => buf.extend_from_slice(b"/>"),
            CellValue::String(s) if s.is_empty() => buf.extend_from_slice(b"/>"),
            CellValue::String(s) => {
                if needs_space_preserve(s) {
                    buf.extend_from_slice(b" t=\"inlineStr\"><is><t xml:space=\"preserve\">");
                } else {
                    buf.extend_from_slice(b" t=\"inlineStr\"><is><t>");
                }
                escape_into(buf, s);
                buf.extend_from_slice(b"</t></is></c>");
            }
            CellValue::Number(n) if n.is_finite() => {
                buf.extend_from_slice(b"><v>");
                buf.extend_from_slice(n.to_string().as_bytes());
                buf.extend_from_slice(b"</v></c>");
            }
            CellValue::Number(n) => {
                // Spreadsheets have no NaN or infinity; keep the text.
                buf.extend_from_slice(b" t=\"inlineStr\"><is><t>");
                buf.extend_from_slice(n.to_string().as_bytes());
                buf.extend_from_slice(b"</t></is></c>");
            }
            CellValue::Bool(b) => {
                buf.extend_from_slice(b" t=\"b\"><v>");
                buf.extend_from_slice(if *b { b"1" } else { b"0" });
                buf.extend_from_slice(b"</v></c>");
            }
            CellValue::DateTime(dt) => match excel_serial_from_datetime(dt) {
                Some(serial) => {
                    buf.extend_from_slice(b"><v>");
                    buf.extend_from_slice(serial.to_string().as_bytes());
                    buf.extend_from_slice(b"</v></c>");
                }
                None => {
                    // No serial before 1900; keep the date as text.
                    buf.extend_from_slice(b" t=\"inlineStr\"><is><t>");
                    let text = dt.format("%Y-%m-%d %H:%M:%S").to_string();
                    buf.extend_from_slice(text.as_bytes());
                    buf.extend_from_slice(b"</t></is></c>");
                }
            },
        }
        Ok(())
    }

    fn end_row(&mut self) -> Result<()> {
        let row = self
            .current_row
            .take()
            .ok_or_else(|| ExcelError::InvalidState("no row is open".to_string()))?;
        self.xml_buffer.extend_from_slice(b"</row>");
        self.book.zip_mut().write_data(&self.xml_buffer)?;
        self.last_row = Some(row);
        self.row_count += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.check_open()?;
        if self.current_row.is_some() {
            self.end_row()?;
        }
        self.open_sheet_data()?;
        self.book
            .zip_mut()
            .write_data(b"</sheetData></worksheet>")?;
        self.book.close_sheet();
        self.finished = true;
        Ok(())
    }
}
