//! Streaming reader for XLSX packages
//!
//! The shared strings table and the sheet list are loaded when the package is
//! opened. Worksheet XML is decompressed in chunks and parsed one `<row>` at a
//! time, so memory stays bounded by the largest row rather than the sheet.
//!
//! Cells come back typed: shared and inline strings as [`CellValue::String`],
//! `t="b"` cells as [`CellValue::Bool`], everything numeric as
//! [`CellValue::Number`]. Dates are stored as serial numbers in the package and
//! therefore read back as numbers; [`crate::schema::ExcelScalar::from_cell`]
//! turns them into dates when the target field asks for one.

use crate::error::{ExcelError, Result};
use crate::fast_writer::streaming_zip_reader::StreamingZipReader;
use crate::schema::parse_datetime_text;
use crate::types::{CellValue, Row};
use log::debug;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;

const READ_CHUNK_SIZE: usize = 32 * 1024;

/// Streaming reader over an XLSX package
pub struct StreamingReader<R: Read + Seek> {
    archive: StreamingZipReader<R>,
    sst: Vec<String>,
    sheet_names: Vec<String>,
    sheet_paths: Vec<String>,
}

impl StreamingReader<BufReader<File>> {
    /// Open an XLSX file
    ///
    /// ```no_run
    /// use excelmap::streaming_reader::StreamingReader;
    ///
    /// let mut reader = StreamingReader::open("orders.xlsx")?;
    /// for row in reader.rows("Orders")? {
    ///     let row = row?;
    ///     println!("{}: {:?}", row.index, row.to_strings());
    /// }
    /// # Ok::<(), excelmap::ExcelError>(())
    /// ```
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("opening workbook {}", path.display());
        Self::from_archive(StreamingZipReader::open(path)?)
    }
}

impl<R: Read + Seek> StreamingReader<R> {
    /// Read a package from any seekable source
    pub fn from_reader(source: R) -> Result<Self> {
        Self::from_archive(StreamingZipReader::new(source)?)
    }

    fn from_archive(mut archive: StreamingZipReader<R>) -> Result<Self> {
        let sst = if archive.find_entry("xl/sharedStrings.xml").is_some() {
            let data = archive.read_entry_by_name("xl/sharedStrings.xml")?;
            parse_shared_strings(&utf8(&data, "xl/sharedStrings.xml")?)
        } else {
            Vec::new()
        };

        let workbook = archive.read_entry_by_name("xl/workbook.xml")?;
        let rels = archive.read_entry_by_name("xl/_rels/workbook.xml.rels")?;
        let (sheet_names, sheet_paths) = parse_sheet_info(
            &utf8(&workbook, "xl/workbook.xml")?,
            &utf8(&rels, "xl/_rels/workbook.xml.rels")?,
        )?;

        debug!(
            "workbook has {} sheets and {} shared strings",
            sheet_names.len(),
            sst.len()
        );
        Ok(StreamingReader {
            archive,
            sst,
            sheet_names,
            sheet_paths,
        })
    }

    /// Sheet names in workbook order
    pub fn sheet_names(&self) -> &[String] {
        &self.sheet_names
    }

    /// Stream the rows of a sheet by name
    pub fn rows(&mut self, sheet_name: &str) -> Result<RowIterator<'_>> {
        let position = self
            .sheet_names
            .iter()
            .position(|name| name == sheet_name)
            .ok_or_else(|| ExcelError::SheetNotFound {
                sheet: sheet_name.to_string(),
                available: self.sheet_names.join(", "),
            })?;
        self.rows_by_index(position)
    }

    /// Stream the rows of a sheet by zero-based position
    pub fn rows_by_index(&mut self, sheet_index: usize) -> Result<RowIterator<'_>> {
        let path = self
            .sheet_paths
            .get(sheet_index)
            .ok_or_else(|| ExcelError::SheetNotFound {
                sheet: format!("#{}", sheet_index),
                available: self.sheet_names.join(", "),
            })?
            .clone();
        debug!("streaming rows of {}", path);

        let reader = self.archive.read_entry_streaming_by_name(&path)?;
        Ok(RowIterator::new(reader, &self.sst, READ_CHUNK_SIZE))
    }
}

fn utf8(data: &[u8], part: &str) -> Result<String> {
    String::from_utf8(data.to_vec())
        .map_err(|e| ExcelError::ReadError(format!("{} is not valid UTF-8: {}", part, e)))
}

/// Iterator over the rows of one worksheet
///
/// Rows are yielded in document order. Missing cells before a referenced
/// column are filled with [`CellValue::Empty`].
pub struct RowIterator<'a> {
    reader: Box<dyn Read + 'a>,
    sst: &'a [String],
    buffer: Vec<u8>,
    chunk: Vec<u8>,
    next_index: u32,
    done: bool,
}

impl<'a> RowIterator<'a> {
    pub(crate) fn new(reader: Box<dyn Read + 'a>, sst: &'a [String], chunk_size: usize) -> Self {
        RowIterator {
            reader,
            sst,
            buffer: Vec::with_capacity(chunk_size * 2),
            chunk: vec![0u8; chunk_size.max(1)],
            next_index: 0,
            done: false,
        }
    }

    /// Byte length of the complete `<row>` element at the buffer start, if any
    ///
    /// Data before the first row start is discarded.
    fn complete_row_len(&mut self) -> Option<usize> {
        match find_row_start(&self.buffer) {
            Some(start) => {
                self.buffer.drain(..start);
            }
            None => {
                // Keep a tail that may hold a split "<row".
                let keep = self.buffer.len().min(4);
                let cut = self.buffer.len() - keep;
                self.buffer.drain(..cut);
                return None;
            }
        }

        let gt = self.buffer.iter().position(|&b| b == b'>')?;
        if gt > 0 && self.buffer[gt - 1] == b'/' {
            return Some(gt + 1);
        }
        find_bytes(&self.buffer[gt..], b"</row>").map(|end| gt + end + 6)
    }

    fn fill(&mut self) -> Result<usize> {
        let n = self
            .reader
            .read(&mut self.chunk)
            .map_err(|e| ExcelError::ReadError(format!("Failed to read worksheet XML: {}", e)))?;
        self.buffer.extend_from_slice(&self.chunk[..n]);
        Ok(n)
    }
}

impl Iterator for RowIterator<'_> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(len) = self.complete_row_len() {
                let row_xml: Vec<u8> = self.buffer.drain(..len).collect();
                let parsed = std::str::from_utf8(&row_xml)
                    .map_err(|e| ExcelError::ReadError(format!("row XML is not UTF-8: {}", e)))
                    .and_then(|xml| parse_row(xml, self.next_index, self.sst));
                return match parsed {
                    Ok(row) => {
                        self.next_index = row.index + 1;
                        Some(Ok(row))
                    }
                    Err(e) => {
                        self.done = true;
                        Some(Err(e))
                    }
                };
            }
            if self.done {
                return None;
            }
            match self.fill() {
                Ok(0) => self.done = true,
                Ok(_) => {}
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

fn find_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn find_row_start(buffer: &[u8]) -> Option<usize> {
    let mut from = 0;
    while let Some(pos) = find_bytes(&buffer[from..], b"<row") {
        let start = from + pos;
        match buffer.get(start + 4) {
            Some(b' ' | b'>' | b'/' | b'\t' | b'\n' | b'\r') => return Some(start),
            // "<row" at the very end; wait for the next byte
            None => return None,
            _ => from = start + 4,
        }
    }
    None
}

/// Parse one complete `<row>` element
fn parse_row(xml: &str, fallback_index: u32, sst: &[String]) -> Result<Row> {
    let open_end = xml
        .find('>')
        .ok_or_else(|| ExcelError::ReadError("unterminated row tag".to_string()))?;
    let row_tag = &xml[..open_end];
    let index = attr_value(row_tag, "r")
        .and_then(|r| r.parse::<u32>().ok())
        .map(|r| r.saturating_sub(1))
        .unwrap_or(fallback_index);

    let mut cells = Vec::new();
    if row_tag.ends_with('/') {
        return Ok(Row::new(index, cells));
    }

    let mut rest = &xml[open_end + 1..];
    while let Some(start) = find_tag(rest, "c") {
        let cell = &rest[start..];
        let gt = cell
            .find('>')
            .ok_or_else(|| ExcelError::ReadError("unterminated cell tag".to_string()))?;
        let tag = &cell[..gt];
        let (body, consumed) = if tag.ends_with('/') {
            ("", gt + 1)
        } else {
            let end = cell[gt + 1..].find("</c>").ok_or_else(|| {
                ExcelError::ReadError(format!("cell in row {} is not closed", index + 1))
            })?;
            (&cell[gt + 1..gt + 1 + end], gt + 1 + end + 4)
        };

        let col = match attr_value(tag, "r") {
            Some(cell_ref) => column_index(cell_ref)?,
            None => cells.len(),
        };
        let value = cell_value(attr_value(tag, "t"), body, sst)?;
        while cells.len() < col {
            cells.push(CellValue::Empty);
        }
        if col < cells.len() {
            cells[col] = value;
        } else {
            cells.push(value);
        }
        rest = &cell[consumed..];
    }

    Ok(Row::new(index, cells))
}

fn cell_value(cell_type: Option<&str>, body: &str, sst: &[String]) -> Result<CellValue> {
    let value = element_text(body, "v");
    let value = match (cell_type, value) {
        (Some("inlineStr"), _) => CellValue::String(collect_text(body)),
        (_, None) => CellValue::Empty,
        (Some("s"), Some(v)) => {
            let idx: usize = v
                .trim()
                .parse()
                .map_err(|_| ExcelError::ReadError(format!("bad shared string index '{}'", v)))?;
            let text = sst.get(idx).ok_or_else(|| {
                ExcelError::ReadError(format!(
                    "shared string {} out of range ({} strings)",
                    idx,
                    sst.len()
                ))
            })?;
            CellValue::String(text.clone())
        }
        (Some("b"), Some(v)) => CellValue::Bool(v.trim() == "1"),
        (Some("d"), Some(v)) => match parse_datetime_text(v.trim()) {
            Some(dt) => CellValue::DateTime(dt),
            None => CellValue::String(v),
        },
        (Some("n") | None, Some(v)) => match v.trim().parse::<f64>() {
            Ok(n) => CellValue::Number(n),
            Err(_) => CellValue::String(v),
        },
        // "str", "e" and unknown types keep their text
        (Some(_), Some(v)) => CellValue::String(v),
    };
    Ok(value)
}

/// Columns in a worksheet, `A` through `XFD`
const MAX_COLUMNS: usize = 16_384;

/// Column index from a cell reference ("A1" -> 0, "AA7" -> 26)
fn column_index(cell_ref: &str) -> Result<usize> {
    let out_of_range =
        || ExcelError::ReadError(format!("cell reference '{}' is beyond column XFD", cell_ref));
    let mut col = 0usize;
    for ch in cell_ref.chars() {
        if !ch.is_ascii_alphabetic() {
            break;
        }
        let digit = ch.to_ascii_uppercase() as usize - 'A' as usize + 1;
        col = col
            .checked_mul(26)
            .and_then(|c| c.checked_add(digit))
            .filter(|&c| c <= MAX_COLUMNS)
            .ok_or_else(out_of_range)?;
    }
    Ok(col.saturating_sub(1))
}

/// Position of the next `<name>` or `<name ...>` start tag
fn find_tag(xml: &str, name: &str) -> Option<usize> {
    let pattern = format!("<{}", name);
    let mut from = 0;
    while let Some(pos) = xml[from..].find(&pattern) {
        let start = from + pos;
        match xml.as_bytes().get(start + pattern.len()) {
            Some(b' ' | b'>' | b'/' | b'\t' | b'\n' | b'\r') => return Some(start),
            _ => from = start + pattern.len(),
        }
    }
    None
}

/// Value of an attribute inside a start tag
fn attr_value<'x>(tag: &'x str, name: &str) -> Option<&'x str> {
    let mut from = 0;
    while let Some(pos) = tag[from..].find(name) {
        let start = from + pos;
        let after = start + name.len();
        let separated = tag[..start].ends_with(|c: char| c.is_ascii_whitespace());
        if separated && tag[after..].starts_with("=\"") {
            let value_start = after + 2;
            let len = tag[value_start..].find('"')?;
            return Some(&tag[value_start..value_start + len]);
        }
        from = after;
    }
    None
}

/// Decoded text of the first `<name>` element
fn element_text(xml: &str, name: &str) -> Option<String> {
    let start = find_tag(xml, name)?;
    let element = &xml[start..];
    let gt = element.find('>')?;
    if element[..gt].ends_with('/') {
        return Some(String::new());
    }
    let content = &element[gt + 1..];
    let close = format!("</{}>", name);
    let end = content.find(&close)?;
    Some(decode_entities(&content[..end]))
}

/// Concatenated text of every `<t>` element, as in rich text runs
fn collect_text(xml: &str) -> String {
    let mut text = String::new();
    let mut rest = xml;
    while let Some(start) = find_tag(rest, "t") {
        let element = &rest[start..];
        let Some(gt) = element.find('>') else { break };
        if element[..gt].ends_with('/') {
            rest = &element[gt + 1..];
            continue;
        }
        let content = &element[gt + 1..];
        let Some(end) = content.find("</t>") else { break };
        text.push_str(&decode_entities(&content[..end]));
        rest = &content[end + 4..];
    }
    text
}

fn parse_shared_strings(xml: &str) -> Vec<String> {
    let mut strings = Vec::new();
    let mut rest = xml;
    while let Some(start) = find_tag(rest, "si") {
        let item = &rest[start..];
        let Some(gt) = item.find('>') else { break };
        if item[..gt].ends_with('/') {
            strings.push(String::new());
            rest = &item[gt + 1..];
            continue;
        }
        let Some(end) = item.find("</si>") else { break };
        strings.push(collect_text(&item[gt + 1..end]));
        rest = &item[end + 5..];
    }
    strings
}

/// Sheet names and worksheet part paths, in workbook order
fn parse_sheet_info(workbook_xml: &str, rels_xml: &str) -> Result<(Vec<String>, Vec<String>)> {
    let mut targets = HashMap::new();
    let mut rest = rels_xml;
    while let Some(start) = find_tag(rest, "Relationship") {
        let element = &rest[start..];
        let Some(gt) = element.find('>') else { break };
        let tag = &element[..gt];
        if let (Some(id), Some(target)) = (attr_value(tag, "Id"), attr_value(tag, "Target")) {
            targets.insert(id.to_string(), decode_entities(target));
        }
        rest = &element[gt + 1..];
    }

    let mut names = Vec::new();
    let mut paths = Vec::new();
    let mut rest = workbook_xml;
    while let Some(start) = find_tag(rest, "sheet") {
        let element = &rest[start..];
        let Some(gt) = element.find('>') else { break };
        let tag = &element[..gt];
        let name = attr_value(tag, "name")
            .map(decode_entities)
            .ok_or_else(|| ExcelError::ReadError("sheet without a name".to_string()))?;
        let target = attr_value(tag, "r:id")
            .and_then(|rid| targets.get(rid))
            .ok_or_else(|| {
                ExcelError::ReadError(format!("sheet '{}' has no worksheet relationship", name))
            })?;
        let path = match target.strip_prefix('/') {
            Some(absolute) => absolute.to_string(),
            None => format!("xl/{}", target),
        };
        names.push(name);
        paths.push(path);
        rest = &element[gt + 1..];
    }

    Ok((names, paths))
}

/// Decode the predefined XML entities and character references
fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];
        let decoded = rest.find(';').and_then(|semi| {
            let ch = match &rest[1..semi] {
                "lt" => Some('<'),
                "gt" => Some('>'),
                "amp" => Some('&'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                entity => entity
                    .strip_prefix("#x")
                    .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                    .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
                    .and_then(char::from_u32),
            };
            ch.map(|c| (c, semi))
        });
        match decoded {
            Some((c, semi)) => {
                out.push(c);
                rest = &rest[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}
